use std::path::{Path, PathBuf};

use tokio::fs;

use crate::{UnlayerError, UnlayerResult};

use super::{apply_layer, extract_layer};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const EXTRACTED_LAYER_EXTENSION: &str = "extracted";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Materializes an ordered list of compressed layer archives into a merged
/// filesystem tree at `dest_dir`.
///
/// Layers are applied strictly in the given (manifest) order: each archive is
/// extracted next to itself and then applied onto the output directory, with that
/// layer's whiteout processing completing before the next layer is touched. A later
/// layer may therefore re-create a path an earlier layer's whiteout removed.
///
/// An empty layer list is an error and leaves the output directory untouched.
pub async fn materialize(
    layer_archives: &[PathBuf],
    dest_dir: impl AsRef<Path>,
) -> UnlayerResult<()> {
    let dest_dir = dest_dir.as_ref();

    if layer_archives.is_empty() {
        return Err(UnlayerError::EmptyLayerList(dest_dir.display().to_string()));
    }

    fs::create_dir_all(dest_dir).await?;

    for (index, archive) in layer_archives.iter().enumerate() {
        let extracted_path = archive.with_extension(EXTRACTED_LAYER_EXTENSION);

        if !extracted_path.exists() {
            tracing::info!("Extracting layer {}: {}", index, archive.display());
            extract_layer(archive, &extracted_path).await?;
        }

        tracing::info!("Applying layer {}: {}", index, extracted_path.display());
        apply_layer(&extracted_path, dest_dir).await?;
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_rootfs_materialize_whiteout_handling() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;

        let layers = helper::create_layers_with_whiteouts(temp_dir.path()).await?;

        let dest_dir = temp_dir.path().join("merged");
        materialize(&layers, &dest_dir).await?;

        // Verify regular whiteout
        assert!(
            !dest_dir.join("file1.txt").exists(),
            "file1.txt should be removed by whiteout"
        );
        assert!(
            dest_dir.join("file2.txt").exists(),
            "file2.txt should still exist"
        );
        assert!(
            dest_dir.join("file3.txt").exists(),
            "file3.txt should exist"
        );

        // Verify opaque whiteout
        let dir1 = dest_dir.join("dir1");
        assert!(dir1.exists(), "dir1 should still exist");
        assert!(
            !dir1.join("inside1.txt").exists(),
            "inside1.txt should be hidden by opaque whiteout"
        );
        assert!(
            !dir1.join("inside2.txt").exists(),
            "inside2.txt should be hidden by opaque whiteout"
        );
        assert!(
            dir1.join("new_file.txt").exists(),
            "new_file.txt should exist"
        );

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rootfs_materialize_order_is_significant() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;

        // Layer A creates x, layer B whites out x.
        let layer_a = helper::build_layer_archive(temp_dir.path(), "layer_a", |contents| {
            std::fs::write(contents.join("x"), "payload")?;
            Ok(())
        })?;
        let layer_b = helper::build_layer_archive(temp_dir.path(), "layer_b", |contents| {
            std::fs::write(contents.join(".wh.x"), "")?;
            Ok(())
        })?;

        // Manifest order A then B: the whiteout wins.
        let dest_ab = temp_dir.path().join("merged_ab");
        materialize(&[layer_a.clone(), layer_b.clone()], &dest_ab).await?;
        assert!(!dest_ab.join("x").exists());

        // Reversed order B then A: the file is re-created after the whiteout ran.
        let dest_ba = temp_dir.path().join("merged_ba");
        materialize(&[layer_b, layer_a], &dest_ba).await?;
        assert!(dest_ba.join("x").exists());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rootfs_materialize_empty_layer_list_fails() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let dest_dir = temp_dir.path().join("merged");

        let result = materialize(&[], &dest_dir).await;

        assert!(matches!(result, Err(UnlayerError::EmptyLayerList(_))));
        assert!(!dest_dir.exists(), "no output should have been created");

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rootfs_materialize_later_layer_recreates_whited_out_path() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;

        let base = helper::build_layer_archive(temp_dir.path(), "base", |contents| {
            std::fs::create_dir(contents.join("etc"))?;
            std::fs::write(contents.join("etc/conf"), "old")?;
            Ok(())
        })?;
        let removal = helper::build_layer_archive(temp_dir.path(), "removal", |contents| {
            std::fs::create_dir(contents.join("etc"))?;
            std::fs::write(contents.join("etc/.wh.conf"), "")?;
            Ok(())
        })?;
        let recreate = helper::build_layer_archive(temp_dir.path(), "recreate", |contents| {
            std::fs::create_dir(contents.join("etc"))?;
            std::fs::write(contents.join("etc/conf"), "new")?;
            Ok(())
        })?;

        let dest_dir = temp_dir.path().join("merged");
        materialize(&[base, removal, recreate], &dest_dir).await?;

        assert_eq!(
            fs::read_to_string(dest_dir.join("etc/conf")).await?,
            "new"
        );

        Ok(())
    }

    mod helper {
        use std::path::{Path, PathBuf};

        use flate2::{write::GzEncoder, Compression};
        use tar::Builder;

        /// Builds a gzip-compressed tar layer archive from contents produced by `populate`.
        pub(super) fn build_layer_archive(
            base_dir: &Path,
            name: &str,
            populate: impl FnOnce(&Path) -> anyhow::Result<()>,
        ) -> anyhow::Result<PathBuf> {
            let contents = base_dir.join(format!("{}_contents", name));
            std::fs::create_dir_all(&contents)?;
            populate(&contents)?;

            let archive_path = base_dir.join(format!("{}.tar.gz", name));
            let file = std::fs::File::create(&archive_path)?;
            let encoder = GzEncoder::new(file, Compression::default());
            let mut tar = Builder::new(encoder);
            tar.append_dir_all(".", &contents)?;
            tar.finish()?;

            Ok(archive_path)
        }

        /// Creates a three-layer whiteout scenario:
        ///
        /// ```text
        /// Layer 1 (base)
        /// ├── file1.txt         ("original content")
        /// ├── file2.txt         ("keep this file")
        /// └── dir1/
        ///     ├── inside1.txt   ("inside1")
        ///     └── inside2.txt   ("inside2")
        ///
        /// Layer 2 (regular whiteout)
        /// ├── .wh.file1.txt     (removes file1.txt)
        /// └── file3.txt         ("new file")
        ///
        /// Layer 3 (opaque whiteout)
        /// └── dir1/
        ///     ├── .wh..wh..opq  (hides all prior contents of dir1)
        ///     └── new_file.txt  ("new content")
        /// ```
        pub(super) async fn create_layers_with_whiteouts(
            base_dir: &Path,
        ) -> anyhow::Result<Vec<PathBuf>> {
            let layer1 = build_layer_archive(base_dir, "layer1", |contents| {
                std::fs::write(contents.join("file1.txt"), "original content")?;
                std::fs::write(contents.join("file2.txt"), "keep this file")?;
                std::fs::create_dir(contents.join("dir1"))?;
                std::fs::write(contents.join("dir1/inside1.txt"), "inside1")?;
                std::fs::write(contents.join("dir1/inside2.txt"), "inside2")?;
                Ok(())
            })?;

            let layer2 = build_layer_archive(base_dir, "layer2", |contents| {
                std::fs::write(contents.join(".wh.file1.txt"), "")?;
                std::fs::write(contents.join("file3.txt"), "new file")?;
                Ok(())
            })?;

            let layer3 = build_layer_archive(base_dir, "layer3", |contents| {
                std::fs::create_dir(contents.join("dir1"))?;
                std::fs::write(contents.join("dir1/.wh..wh..opq"), "")?;
                std::fs::write(contents.join("dir1/new_file.txt"), "new content")?;
                Ok(())
            })?;

            Ok(vec![layer1, layer2, layer3])
        }
    }
}
