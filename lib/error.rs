use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

use crate::oci::distribution::DockerRegistryResponseError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of an unlayer-related operation.
pub type UnlayerResult<T> = Result<T, UnlayerError>;

/// An error that occurred while pulling or materializing an image.
#[derive(Debug, Error)]
pub enum UnlayerError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An error that occurred during an HTTP middleware operation.
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// An error that occurred during a Docker registry operation.
    #[error("docker registry error: {0}")]
    DockerRegistry(#[from] DockerRegistryResponseError),

    /// An error that occurred when parsing a manifest or registry response body.
    #[error("json parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// An error that occurred when the registry did not return a usable token.
    #[error("registry authentication failed: {0}")]
    AuthenticationFailed(String),

    /// An error that occurred when a manifest was not found.
    #[error("manifest not found")]
    ManifestNotFound,

    /// An error that occurred when no manifest matched the requested platform.
    #[error("no manifest for platform: {0}")]
    UnsupportedPlatform(String),

    /// An error that occurred when a resolved manifest listed no layers.
    #[error("image has no layers: {0}")]
    EmptyLayerList(String),

    /// An error that occurred when an image reference could not be parsed.
    #[error("invalid image reference: {0}")]
    ImageReferenceError(String),

    /// An error that occurred when a platform triple could not be parsed.
    #[error("invalid platform: {0}")]
    InvalidPlatform(String),

    /// An error that occurred when the output path exists and is not a directory.
    #[error("output path exists and is not a directory: {0}")]
    OutputPathConflict(String),

    /// An error that occurred while extracting or applying a layer.
    #[error("layer handling error: {source}, layer: {layer}")]
    LayerHandling {
        /// The underlying I/O error.
        source: std::io::Error,

        /// The layer that caused the error.
        layer: String,
    },

    /// An error that occurred during layer extraction.
    #[error("layer extraction error: {0}")]
    LayerExtraction(String),

    /// An error that occurred when an image layer download failed.
    #[error("image layer download failed: {0}")]
    ImageLayerDownloadFailed(String),

    /// An error that occurred when an unsupported image hash algorithm was used.
    #[error("unsupported image hash algorithm: {0}")]
    UnsupportedImageHashAlgorithm(String),

    /// An error returned by a unix system call.
    #[error("system call error: {0}")]
    Errno(#[from] nix::errno::Errno),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl UnlayerError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> UnlayerError {
        UnlayerError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `UnlayerResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> UnlayerResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
