//! OCI (Open Container Initiative) module for interacting with container registries.
//!
//! This module provides functionality for:
//! - Pulling container images from OCI-compliant registries
//! - Parsing and validating image references (tags and digests)
//! - Selecting platform-specific manifests from multi-platform indexes
//! - Materializing image layers into a merged root filesystem

pub mod distribution;
pub mod rootfs;

mod platform;
mod pull;
mod reference;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use platform::*;
pub use pull::*;
pub use reference::*;
