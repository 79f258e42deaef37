use std::ops::RangeBounds;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use oci_spec::image::{Digest, ImageManifest};

use crate::{
    oci::{Platform, ReferenceSelector},
    UnlayerResult,
};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Trait for obtaining authentication credentials from a registry's token service.
#[async_trait]
pub trait AuthProvider {
    /// The type of the authentication material returned by the token service.
    type AuthMaterial;

    /// Gets the necessary authentication credentials for the given repository and scopes.
    async fn get_auth_material(
        &self,
        repository: &str,
        service: &str,
        scopes: &[&str],
    ) -> UnlayerResult<Self::AuthMaterial>;
}

/// Trait defining methods for pulling image data from an OCI-compliant registry:
/// resolving manifests and fetching blobs.
#[async_trait]
pub trait OciRegistryPull: AuthProvider {
    /// Resolves an image reference to a concrete, single-platform manifest.
    ///
    /// Digest selectors are fetched as-is with no tag lookup. Tag selectors go
    /// through the manifest endpoint's content-addressed lookup keyed by tag.
    /// When the registry responds with a multi-platform manifest list, the entry
    /// matching `platform` is resolved to its manifest.
    async fn resolve_manifest(
        &self,
        repository: &str,
        selector: &ReferenceSelector,
        platform: &Platform,
    ) -> UnlayerResult<ImageManifest>;

    /// Fetches an image manifest by digest.
    /// Provides the ordered list of layers for an image.
    async fn fetch_manifest(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> UnlayerResult<ImageManifest>;

    /// Fetches an image blob from the registry by its digest.
    /// This method returns a stream for efficient processing of large blobs.
    ///
    /// `range` is the range of the blob to fetch, in bytes.
    /// If `range` is not provided, the entire blob is fetched.
    async fn fetch_image_blob(
        &self,
        repository: &str,
        digest: &Digest,
        range: impl RangeBounds<u64> + Send,
    ) -> UnlayerResult<BoxStream<'static, UnlayerResult<Bytes>>>;

    /// Downloads an image blob to a local file, verifying its content hash
    /// against the digest.
    async fn download_image_blob(
        &self,
        repository: &str,
        digest: &Digest,
        download_size: u64,
        destination: std::path::PathBuf,
    ) -> UnlayerResult<()>;
}
