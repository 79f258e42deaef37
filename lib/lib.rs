//! `unlayer` pulls a container image from an OCI-compatible registry and materializes
//! its merged filesystem contents into a local directory, without a container runtime.
//!
//! # Overview
//!
//! unlayer handles the interesting parts of image extraction:
//! - Registry token authentication (Docker Hub token service)
//! - Manifest retrieval with content-type negotiation (Docker v2 and OCI v1,
//!   including multi-platform manifest lists)
//! - Sequential layer blob download, digest verification, and tar extraction
//! - Union filesystem reconstruction with whiteout and opaque-whiteout semantics
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::str::FromStr;
//! use unlayer::oci::{pull_image, Platform, Reference};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reference = Reference::from_str("alpine:latest")?;
//!     let platform = Platform::default();
//!
//!     pull_image(&reference, &platform, "./output").await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`oci`] - Registry client, reference parsing, and rootfs materialization
//! - [`utils`] - Common utilities and helpers

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod oci;
pub mod utils;

pub use error::*;
