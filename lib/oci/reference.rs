use getset::{Getters, Setters};
use oci_spec::image::Digest;
use regex::Regex;
use std::{fmt, str::FromStr, sync::LazyLock};

use crate::error::UnlayerError;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The registry assumed when an image reference does not name one.
pub const DEFAULT_OCI_REGISTRY: &str = "docker.io";

/// The namespace prepended to single-component repositories (official images).
pub const DEFAULT_OCI_REFERENCE_REPO_NAMESPACE: &str = "library";

/// The tag assumed when an image reference carries neither a tag nor a digest.
pub const DEFAULT_OCI_REFERENCE_TAG: &str = "latest";

static REGISTRY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.-]+(:[0-9]+)?$").unwrap());

static REPOSITORY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]+(?:[._-][a-z0-9]+)*)(/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$").unwrap()
});

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w[\w.-]{0,127}$").unwrap());

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Represents an OCI-compliant image reference.
///
/// This struct includes the registry, repository, and a selector that is either a tag or a digest.
/// If no registry or tag is provided in the input string, default values will be used.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct Reference {
    /// The registry where the image is hosted.
    registry: String,

    /// The repository name of the image, always namespace-qualified.
    repository: String,

    /// The selector specifying either a tag or a digest.
    selector: ReferenceSelector,
}

/// Represents the selector part of an OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceSelector {
    /// A tag reference (e.g., "latest").
    Tag(String),

    /// A digest reference (e.g., "sha256:abc...").
    Digest(Digest),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ReferenceSelector {
    /// Creates a new ReferenceSelector with the specified tag.
    pub fn tag(tag: impl Into<String>) -> Self {
        Self::Tag(tag.into())
    }

    /// Creates a new ReferenceSelector using the specified digest.
    pub fn digest(digest: impl Into<Digest>) -> Self {
        Self::Digest(digest.into())
    }

    /// Returns the digest when this selector already is one. Digest selectors
    /// resolve as the identity function, no registry lookup is needed.
    pub fn as_digest(&self) -> Option<&Digest> {
        match self {
            ReferenceSelector::Tag(_) => None,
            ReferenceSelector::Digest(digest) => Some(digest),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for Reference {
    type Err = UnlayerError;

    /// Parses a string slice into an OCI image Reference.
    ///
    /// Supported formats include:
    /// - "registry/repository:tag"
    /// - "repository:tag"
    /// - "repository"
    /// - "repository:sha256:<hex>"
    /// - "registry/repository@sha256:<hex>"
    ///
    /// If the registry is omitted, it defaults to [`DEFAULT_OCI_REGISTRY`]. Repositories
    /// without a namespace component get [`DEFAULT_OCI_REFERENCE_REPO_NAMESPACE`] prepended.
    /// If the tag is omitted, it defaults to [`DEFAULT_OCI_REFERENCE_TAG`].
    ///
    /// ## Returns
    ///
    /// Returns a [`UnlayerError::ImageReferenceError`] for parse failures.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.is_empty() {
            return Err(UnlayerError::ImageReferenceError(
                "input string is empty".into(),
            ));
        }

        if let Some(at_idx) = s.find('@') {
            let digest_str = &s[at_idx + 1..];
            if !digest_str.contains(':') {
                return Err(UnlayerError::ImageReferenceError(format!(
                    "invalid digest: {}",
                    digest_str
                )));
            }

            let parsed_digest = parse_digest(digest_str)?;
            let (registry, remainder) = extract_registry_and_path(&s[..at_idx]);
            let repository = normalize_repository(remainder)?;

            validate_registry(&registry)?;
            validate_repository(&repository)?;

            Ok(Reference {
                registry,
                repository,
                selector: ReferenceSelector::digest(parsed_digest),
            })
        } else {
            let (registry, remainder) = extract_registry_and_path(s);
            let (repository, selector) = extract_repository_and_selector(remainder)?;

            validate_registry(&registry)?;
            validate_repository(&repository)?;
            if let ReferenceSelector::Tag(ref tag) = selector {
                validate_tag(tag)?;
            }

            Ok(Reference {
                registry,
                repository,
                selector,
            })
        }
    }
}

impl fmt::Display for Reference {
    /// Formats the OCI image Reference into a string.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        match &self.selector {
            ReferenceSelector::Tag(tag) => write!(f, ":{}", tag),
            ReferenceSelector::Digest(d) => write!(f, "@{}", d),
        }
    }
}

impl fmt::Display for ReferenceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceSelector::Tag(tag) => write!(f, "{}", tag),
            ReferenceSelector::Digest(d) => write!(f, "{}", d),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a digest string of the form `algorithm:hex` into an OCI digest.
fn parse_digest(s: &str) -> Result<Digest, UnlayerError> {
    s.parse::<Digest>()
        .map_err(|e| UnlayerError::ImageReferenceError(format!("invalid digest: {}", e)))
}

/// Validates the given registry string.
///
/// The registry may contain alphanumeric characters, dashes, dots, and optionally a port number.
fn validate_registry(registry: &str) -> Result<(), UnlayerError> {
    if REGISTRY_REGEX.is_match(registry) {
        Ok(())
    } else {
        Err(UnlayerError::ImageReferenceError(format!(
            "invalid registry: {}",
            registry
        )))
    }
}

/// Validates the repository name.
///
/// The repository name must consist of lowercase letters, numbers, and certain
/// punctuation (._-), with components separated by slashes.
fn validate_repository(repository: &str) -> Result<(), UnlayerError> {
    if REPOSITORY_REGEX.is_match(repository) {
        Ok(())
    } else {
        Err(UnlayerError::ImageReferenceError(format!(
            "invalid repository: {}",
            repository
        )))
    }
}

/// Validates the tag string.
///
/// Tags start with a word character followed by up to 127 characters that can be
/// alphanumeric, underscores, dashes, or dots.
fn validate_tag(tag: &str) -> Result<(), UnlayerError> {
    if TAG_REGEX.is_match(tag) {
        Ok(())
    } else {
        Err(UnlayerError::ImageReferenceError(format!(
            "invalid tag: {}",
            tag
        )))
    }
}

/// Extracts the registry and the remaining path from the OCI reference string.
/// If the registry is not specified, returns the default registry.
fn extract_registry_and_path(reference: &str) -> (String, &str) {
    let segments: Vec<&str> = reference.splitn(2, '/').collect();
    if segments.len() > 1
        && (segments[0].contains('.') || segments[0].contains(':') || segments[0] == "localhost")
    {
        (segments[0].to_string(), segments[1])
    } else {
        (DEFAULT_OCI_REGISTRY.to_string(), reference)
    }
}

/// Prepends the default namespace when the repository has a single component.
/// Repositories already containing a `/` are returned unchanged.
fn normalize_repository(repo: &str) -> Result<String, UnlayerError> {
    if repo.is_empty() {
        return Err(UnlayerError::ImageReferenceError(
            "repository is empty".into(),
        ));
    }
    if repo.contains('/') {
        Ok(repo.to_string())
    } else {
        Ok(format!("{}/{}", DEFAULT_OCI_REFERENCE_REPO_NAMESPACE, repo))
    }
}

/// Extracts the repository and selector from the given path string.
///
/// Everything after the first `:` is the ref. A ref that itself contains a `:`
/// (e.g. `sha256:<hex>`) is a digest; otherwise it is a tag. If no ref is
/// provided, the default tag is used.
fn extract_repository_and_selector(path: &str) -> Result<(String, ReferenceSelector), UnlayerError> {
    if let Some(idx) = path.find(':') {
        let repo_part = &path[..idx];
        let ref_part = &path[idx + 1..];
        let repository = normalize_repository(repo_part)?;

        if ref_part.contains(':') {
            Ok((repository, ReferenceSelector::digest(parse_digest(ref_part)?)))
        } else {
            Ok((repository, ReferenceSelector::tag(ref_part)))
        }
    } else {
        let repository = normalize_repository(path)?;
        Ok((
            repository,
            ReferenceSelector::tag(DEFAULT_OCI_REFERENCE_TAG),
        ))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
