use std::{fmt, str::FromStr};

use getset::Getters;
use oci_spec::image::Platform as OciPlatform;

use crate::error::UnlayerError;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The platform assumed when none is requested.
pub const DEFAULT_PLATFORM_OS: &str = "linux";

/// The architecture assumed when none is requested.
pub const DEFAULT_PLATFORM_ARCH: &str = "amd64";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The target platform an image should be pulled for, parsed from an
/// `os/arch[/variant]` triple (e.g. `linux/amd64`, `linux/arm64/v8`).
///
/// Used to select the matching platform-specific manifest when the registry
/// returns a multi-platform manifest list instead of a concrete manifest.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Platform {
    /// The operating system (e.g. "linux").
    os: String,

    /// The CPU architecture (e.g. "amd64", "arm64").
    arch: String,

    /// The optional architecture variant (e.g. "v8").
    variant: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Platform {
    /// Creates a new platform from its components.
    pub fn new(os: impl Into<String>, arch: impl Into<String>, variant: Option<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            variant,
        }
    }

    /// Returns true when a manifest descriptor's platform matches this one.
    ///
    /// The variant is only compared when this platform requests one, since many
    /// index entries omit it.
    pub fn matches(&self, other: &OciPlatform) -> bool {
        if other.os().to_string() != self.os {
            return false;
        }
        if other.architecture().to_string() != self.arch {
            return false;
        }
        match &self.variant {
            Some(variant) => other.variant().as_deref() == Some(variant.as_str()),
            None => true,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for Platform {
    fn default() -> Self {
        Self::new(DEFAULT_PLATFORM_OS, DEFAULT_PLATFORM_ARCH, None)
    }
}

impl FromStr for Platform {
    type Err = UnlayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [os, arch] => Ok(Self::new(*os, *arch, None)),
            [os, arch, variant] => Ok(Self::new(*os, *arch, Some((*variant).to_string()))),
            _ => Err(UnlayerError::InvalidPlatform(format!(
                "expected os/arch[/variant], got: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
