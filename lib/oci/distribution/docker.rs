use std::{
    ops::RangeBounds,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{stream::BoxStream, StreamExt};
use getset::{Getters, Setters};
use oci_spec::image::{Descriptor, Digest, ImageIndex, ImageManifest};
use reqwest::{header, Client};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

use crate::{
    oci::{Platform, ReferenceSelector},
    utils, UnlayerError, UnlayerResult,
};

use super::{AuthProvider, OciRegistryPull};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Base URL for Docker Registry v2 API, used for accessing image manifests, layers, and other registry operations.
const DOCKER_REGISTRY_URL: &str = "https://registry-1.docker.io";

/// The service name used during token authentication, as specified by Docker's token-based authentication scheme.
const DOCKER_AUTH_SERVICE: &str = "registry.docker.io";

/// Endpoint for acquiring authentication tokens, as described in the Docker Registry authentication workflow.
const DOCKER_AUTH_REALM: &str = "https://auth.docker.io/token";

/// The MIME type for Docker Registry v2 manifests.
const DOCKER_MANIFEST_MIME_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// The MIME type for Docker Registry v2 manifest lists.
const DOCKER_MANIFEST_LIST_MIME_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// The MIME type for OCI v1 image manifests.
const OCI_MANIFEST_MIME_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// The MIME type for OCI v1 image indexes (multi-platform manifest lists).
const OCI_INDEX_MIME_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// The MIME type for Docker Registry v2 image blobs.
const DOCKER_IMAGE_BLOB_MIME_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Annotation key identifying attestation manifests in an index. Attestation
/// entries carry an `unknown/unknown` platform and must not be selected.
const DOCKER_REFERENCE_TYPE_ANNOTATION: &str = "vnd.docker.reference.type";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// DockerRegistry is a client for interacting with Docker's Registry HTTP API v2.
/// It handles authentication, manifest resolution with content-type negotiation,
/// and blob fetching.
///
/// [See OCI distribution specification for more details on the manifest schema][OCI Distribution Spec]
///
/// [See Docker Registry API for more details on the API][Docker Registry API]
///
/// [OCI Distribution Spec]: https://distribution.github.io/distribution/spec/manifest-v2-2/#image-manifest-version-2-schema-2
/// [Docker Registry API]: https://distribution.github.io/distribution/spec/api/#introduction
#[derive(Debug, Getters)]
#[getset(get = "pub")]
pub struct DockerRegistry {
    /// The HTTP client used to make requests to the Docker registry.
    client: ClientWithMiddleware,

    /// The directory where downloaded layer archives are staged.
    layer_dir: PathBuf,
}

/// Stores authentication credentials obtained from the Docker registry token service.
///
/// Only `token` is required; registries differ on which of the remaining fields
/// they include in the response.
#[derive(Debug, Serialize, Deserialize, Getters, Setters)]
#[getset(get = "pub", set = "pub")]
pub struct DockerAuthMaterial {
    /// The token used to authenticate requests to the Docker registry.
    token: String,

    /// The access token used to authenticate requests to the Docker registry.
    access_token: Option<String>,

    /// The expiration time of the access token.
    expires_in: Option<u32>,

    /// The time the access token was issued.
    issued_at: Option<DateTime<Utc>>,
}

/// Represents a response from the Docker registry, which could either be successful (`Ok`) or an error (`Error`).
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DockerRegistryResponse<T> {
    /// Represents a successful response from the Docker registry.
    Ok(T),

    /// Represents an error response from the Docker registry.
    Error(DockerRegistryResponseError),
}

/// Represents an error response from the Docker registry, including detailed error messages.
#[derive(Debug, Serialize, Deserialize, Error)]
#[error("docker registry error: {errors}")]
pub struct DockerRegistryResponseError {
    /// The errors returned by the Docker registry.
    errors: serde_json::Value,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerRegistry {
    /// Creates a new DockerRegistry instance with an HTTP client configured for retrying
    /// transient errors, staging layer downloads in `layer_dir`.
    pub fn with_layer_dir(layer_dir: PathBuf) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client_builder = ClientBuilder::new(Client::new());
        let client = client_builder
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self { client, layer_dir }
    }

    /// Gets a bearer token scoped to pulling from the given repository.
    ///
    /// Docker tokens expire after a few minutes, so a fresh token is fetched per
    /// request rather than cached across the run.
    async fn bearer_token(&self, repository: &str) -> UnlayerResult<String> {
        let auth_material = self
            .get_auth_material(repository, DOCKER_AUTH_SERVICE, &["pull"])
            .await?;

        if auth_material.token.is_empty() {
            return Err(UnlayerError::AuthenticationFailed(format!(
                "token service returned an empty token for {}",
                repository
            )));
        }

        Ok(auth_material.token)
    }

    /// Gets the size of a downloaded file if it exists.
    fn get_downloaded_file_size(&self, path: &Path) -> u64 {
        path.metadata().map(|m| m.len()).unwrap_or(0)
    }

    /// Selects the manifest descriptor matching the requested platform from a
    /// multi-platform index, skipping attestation manifests.
    fn select_platform_manifest<'a>(
        &self,
        index: &'a ImageIndex,
        platform: &Platform,
    ) -> UnlayerResult<&'a Descriptor> {
        index
            .manifests()
            .iter()
            .find(|m| {
                m.platform()
                    .as_ref()
                    .is_some_and(|p| platform.matches(p))
                    && !m
                        .annotations()
                        .as_ref()
                        .is_some_and(|a| a.contains_key(DOCKER_REFERENCE_TYPE_ANNOTATION))
            })
            .ok_or_else(|| UnlayerError::UnsupportedPlatform(platform.to_string()))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl AuthProvider for DockerRegistry {
    type AuthMaterial = DockerAuthMaterial;

    /// Gets the necessary authentication credentials for the given repository and scopes.
    ///
    /// The request itself is unauthenticated; the token service hands out pull-scoped
    /// bearer tokens freely for public repositories.
    async fn get_auth_material(
        &self,
        repository: &str,
        service: &str,
        scopes: &[&str],
    ) -> UnlayerResult<Self::AuthMaterial> {
        let request = self
            .client
            .get(DOCKER_AUTH_REALM)
            .query(&[
                ("service", service),
                (
                    "scope",
                    format!("repository:{}:{}", repository, scopes.join(",")).as_str(),
                ),
            ])
            .build()?;

        let response = self.client.execute(request).await?;
        let auth_credentials = response
            .json::<DockerAuthMaterial>()
            .await
            .map_err(|e| UnlayerError::AuthenticationFailed(format!("{}: {}", repository, e)))?;

        Ok(auth_credentials)
    }
}

#[async_trait::async_trait]
impl OciRegistryPull for DockerRegistry {
    async fn resolve_manifest(
        &self,
        repository: &str,
        selector: &ReferenceSelector,
        platform: &Platform,
    ) -> UnlayerResult<ImageManifest> {
        // A digest selector is already a content address; use it as-is.
        if let Some(digest) = selector.as_digest() {
            return self.fetch_manifest(repository, digest).await;
        }

        let token = self.bearer_token(repository).await?;

        let request = self
            .client
            .get(format!(
                "{}/v2/{}/manifests/{}",
                DOCKER_REGISTRY_URL, repository, selector
            ))
            .bearer_auth(token)
            .header(
                header::ACCEPT,
                format!(
                    "{},{},{},{}",
                    DOCKER_MANIFEST_MIME_TYPE,
                    OCI_MANIFEST_MIME_TYPE,
                    DOCKER_MANIFEST_LIST_MIME_TYPE,
                    OCI_INDEX_MIME_TYPE
                ),
            )
            .build()?;

        let response = self.client.execute(request).await?;

        // The registry is free to answer with either a concrete manifest or a
        // multi-platform manifest list; the Content-Type header decides.
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DOCKER_MANIFEST_MIME_TYPE)
            .to_string();
        let body = response.text().await?;

        if content_type.starts_with(DOCKER_MANIFEST_LIST_MIME_TYPE)
            || content_type.starts_with(OCI_INDEX_MIME_TYPE)
        {
            let index = match serde_json::from_str::<DockerRegistryResponse<ImageIndex>>(&body)? {
                DockerRegistryResponse::Ok(index) => index,
                DockerRegistryResponse::Error(err) => return Err(err.into()),
            };

            let manifest_desc = self.select_platform_manifest(&index, platform)?;
            self.fetch_manifest(repository, manifest_desc.digest())
                .await
        } else {
            match serde_json::from_str::<DockerRegistryResponse<ImageManifest>>(&body)? {
                DockerRegistryResponse::Ok(manifest) => Ok(manifest),
                DockerRegistryResponse::Error(err) => Err(err.into()),
            }
        }
    }

    async fn fetch_manifest(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> UnlayerResult<ImageManifest> {
        let token = self.bearer_token(repository).await?;

        let request = self
            .client
            .get(format!(
                "{}/v2/{}/manifests/{}",
                DOCKER_REGISTRY_URL, repository, digest
            ))
            .bearer_auth(token)
            .header(
                header::ACCEPT,
                format!("{},{}", DOCKER_MANIFEST_MIME_TYPE, OCI_MANIFEST_MIME_TYPE),
            )
            .build()?;

        let response = self.client.execute(request).await?;
        let manifest = response
            .json::<DockerRegistryResponse<ImageManifest>>()
            .await?;

        match manifest {
            DockerRegistryResponse::Ok(manifest) => Ok(manifest),
            DockerRegistryResponse::Error(err) => Err(err.into()),
        }
    }

    async fn fetch_image_blob(
        &self,
        repository: &str,
        digest: &Digest,
        range: impl RangeBounds<u64> + Send,
    ) -> UnlayerResult<BoxStream<'static, UnlayerResult<Bytes>>> {
        let (start, end) = utils::convert_bounds(range);
        let end = if end == u64::MAX {
            "".to_string()
        } else {
            end.to_string()
        };

        tracing::info!("fetching blob: {repository} {digest} {start}-{end}");

        let token = self.bearer_token(repository).await?;

        let request = self
            .client
            .get(format!(
                "{}/v2/{}/blobs/{}",
                DOCKER_REGISTRY_URL, repository, digest
            ))
            .bearer_auth(token)
            .header(header::ACCEPT, DOCKER_IMAGE_BLOB_MIME_TYPE)
            .header(header::RANGE, format!("bytes={start}-{end}"))
            .build()?;

        let response = self.client.execute(request).await?;
        let stream = response
            .bytes_stream()
            .map(|item| item.map_err(|e| e.into()));

        Ok(stream.boxed())
    }

    /// Downloads a blob from the registry, supports download resumption if the file
    /// already partially exists. The downloaded file's content hash is verified
    /// against the digest before it is used.
    async fn download_image_blob(
        &self,
        repository: &str,
        digest: &Digest,
        download_size: u64,
        destination: PathBuf,
    ) -> UnlayerResult<()> {
        // Ensure the destination directory exists
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Get the size of the already downloaded file if it exists
        let downloaded_size = self.get_downloaded_file_size(&destination);

        // Open the file for writing, create if it doesn't exist
        let mut file = if downloaded_size == 0 {
            OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&destination)
                .await?
        } else if downloaded_size < download_size {
            OpenOptions::new().append(true).open(&destination).await?
        } else {
            tracing::info!(
                "file already exists skipping download: {}",
                destination.display()
            );
            return Ok(());
        };

        let mut stream = self
            .fetch_image_blob(repository, digest, downloaded_size..)
            .await?;

        // Write the stream to the file
        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            file.write_all(&bytes).await?;
        }

        let algorithm = digest.algorithm();
        let expected_hash = digest.digest();
        let actual_hash = hex::encode(utils::get_file_hash(&destination, algorithm).await?);

        // Delete the already downloaded file if the hash does not match
        if actual_hash != expected_hash {
            fs::remove_file(destination).await?;
            return Err(UnlayerError::ImageLayerDownloadFailed(format!(
                "({repository}:{digest}) file hash {actual_hash} does not match expected hash {expected_hash}",
            )));
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
