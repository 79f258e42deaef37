//! Clients for pulling image data from OCI-compliant registries.

mod docker;
mod traits;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use docker::*;
pub use traits::*;
