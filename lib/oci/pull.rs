use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::{
    oci::{
        distribution::{DockerRegistry, OciRegistryPull},
        rootfs, Platform, Reference,
    },
    utils::{self, LAYERS_SUBDIR},
    UnlayerError, UnlayerResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Pulls an image from the registry and materializes its merged filesystem into
/// `output_dir`.
///
/// Sequences the whole run: resolve the reference to a concrete manifest (tag or
/// digest, platform-aware), then for each layer in manifest order download the
/// blob, verify its digest, extract it, and apply it onto the output tree with
/// whiteout processing. The first fatal error from any step aborts the run; no
/// partial layer is left applied without its whiteout purge.
///
/// Layer archives are staged in a temporary directory that is cleaned up when the
/// pull finishes.
///
/// ## Example
/// ```rust,no_run
/// use std::str::FromStr;
/// use unlayer::oci::{pull_image, Platform, Reference};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let reference = Reference::from_str("library/alpine:latest")?;
///     pull_image(&reference, &Platform::default(), "./output").await?;
///     Ok(())
/// }
/// ```
pub async fn pull_image(
    reference: &Reference,
    platform: &Platform,
    output_dir: impl AsRef<Path>,
) -> UnlayerResult<()> {
    let output_dir = output_dir.as_ref();

    check_output_dir(output_dir)?;

    let staging = TempDir::new()?;
    let registry = DockerRegistry::with_layer_dir(staging.path().join(LAYERS_SUBDIR));

    let repository = reference.get_repository();
    tracing::info!("resolving manifest for {}", reference);

    let manifest = registry
        .resolve_manifest(repository, reference.get_selector(), platform)
        .await?;

    if manifest.layers().is_empty() {
        return Err(UnlayerError::EmptyLayerList(reference.to_string()));
    }

    tracing::info!(
        "manifest resolved: {} layer(s) for {}",
        manifest.layers().len(),
        platform
    );

    // Layers are fetched and applied strictly sequentially: each layer's whiteout
    // processing depends on the filesystem state left by all earlier layers.
    let mut layer_archives: Vec<PathBuf> = Vec::with_capacity(manifest.layers().len());
    for (index, layer) in manifest.layers().iter().enumerate() {
        let archive_path = registry
            .layer_dir()
            .join(utils::sanitize_name_for_path(&layer.digest().to_string()));

        tracing::info!(
            "downloading layer {}/{}: {}",
            index + 1,
            manifest.layers().len(),
            layer.digest()
        );
        registry
            .download_image_blob(repository, layer.digest(), layer.size(), archive_path.clone())
            .await?;

        layer_archives.push(archive_path);
    }

    rootfs::materialize(&layer_archives, output_dir).await?;

    tracing::info!(
        "materialized {} into {}",
        reference,
        output_dir.display()
    );

    Ok(())
}

/// Validates the output path before any network activity.
///
/// An existing non-directory is fatal. An existing directory is only a warning,
/// since re-running against a populated tree can hit overwrite hazards but is not
/// blocked.
fn check_output_dir(output_dir: &Path) -> UnlayerResult<()> {
    match std::fs::symlink_metadata(output_dir) {
        Ok(metadata) if metadata.file_type().is_dir() => {
            tracing::warn!(
                "output directory {} already exists, existing contents may conflict",
                output_dir.display()
            );
            Ok(())
        }
        Ok(_) => Err(UnlayerError::OutputPathConflict(
            output_dir.display().to_string(),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_pull_check_output_dir() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;

        // Missing path is fine
        assert!(check_output_dir(&temp_dir.path().join("not-yet")).is_ok());

        // Existing directory is a warning, not an error
        assert!(check_output_dir(temp_dir.path()).is_ok());

        // Existing non-directory is fatal
        let file_path = temp_dir.path().join("occupied");
        std::fs::write(&file_path, "in the way")?;
        assert!(matches!(
            check_output_dir(&file_path),
            Err(UnlayerError::OutputPathConflict(_))
        ));

        Ok(())
    }

    #[ignore = "requires network access to Docker Hub"]
    #[test_log::test(tokio::test)]
    async fn test_pull_image_alpine() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let output_dir = temp_dir.path().join("rootfs");

        let reference = Reference::from_str("library/alpine:latest")?;
        pull_image(&reference, &Platform::default(), &output_dir).await?;

        assert!(output_dir.join("etc").exists());
        assert!(output_dir.join("bin").exists());

        Ok(())
    }
}
