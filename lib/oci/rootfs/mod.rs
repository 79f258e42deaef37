//! Union filesystem materialization for OCI image layers.
//!
//! Each image layer is a tar archive describing a filesystem changeset relative to
//! the layers beneath it. This module reconstructs the merged tree by extracting
//! each layer and applying it onto a shared output directory in manifest order,
//! interpreting whiteout markers along the way:
//!
//! - Regular whiteouts (`.wh.<name>`) remove the corresponding file or directory
//!   from the accumulated tree
//! - Opaque whiteouts (`.wh..wh..opq`) hide all existing contents of a directory
//!
//! Application order is significant: a later layer may re-create a path an earlier
//! layer's whiteout removed, so layers are always applied strictly sequentially.
//!
//! # Examples
//!
//! ```no_run
//! use std::path::PathBuf;
//! use unlayer::oci::rootfs;
//!
//! # async fn example() -> anyhow::Result<()> {
//! rootfs::materialize(
//!     &[
//!         PathBuf::from("/staging/sha256_aaa"),
//!         PathBuf::from("/staging/sha256_bbb"),
//!     ],
//!     "/path/to/output",
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

mod apply;
mod extract;
mod materialize;
mod perm_guard;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use apply::*;
pub use extract::*;
pub use materialize::*;
pub use perm_guard::*;
