//! Utility functions and types.

mod conversion;
mod file;
mod path;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use conversion::*;
pub use file::*;
pub use path::*;
