use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use tokio::fs;

use crate::{oci::rootfs::PermissionGuard, UnlayerError, UnlayerResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Reserved base-name prefix marking the deletion of the sibling entry with the prefix stripped.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Reserved entry name marking an opaque whiteout: all pre-existing contents of the
/// containing directory are hidden.
pub const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Applies one extracted layer onto the accumulating output directory, interpreting
/// whiteout markers.
///
/// - Regular whiteouts (`.wh.<name>`) remove `<name>` from the output tree (file or
///   directory, recursively). Deletion is silently idempotent when the target is
///   already absent. The marker itself is never materialized.
/// - Opaque whiteouts (`.wh..wh..opq`) clear all pre-existing contents of the
///   corresponding output directory before this layer's entries are applied.
/// - Everything else (files, directories, symlinks, hardlinks, and FIFOs) is
///   recreated in the output tree with its stored permissions, replacing
///   conflicting entries left by earlier layers, including read-only ones.
///   Files sharing an inode in the layer share an inode in the output tree.
///
/// A [`PermissionGuard`] temporarily widens restrictive modes encountered during
/// traversal and restores them when application completes.
///
/// # Errors
/// Returns error if:
/// * Failed to read the layer directory
/// * Failed to create or replace entries in the output directory
/// * Failed to set permissions
pub async fn apply_layer(
    layer_dir: impl AsRef<Path>,
    dest_dir: impl AsRef<Path>,
) -> UnlayerResult<()> {
    let layer_dir = layer_dir.as_ref();
    let dest_dir = dest_dir.as_ref();

    let mut stack = vec![layer_dir.to_path_buf()];
    let mut perm_guard = PermissionGuard::new();

    // Maps a source (dev, inode) pair to the first output path materialized for
    // it, so later occurrences become hardlinks instead of independent copies.
    let mut link_map: HashMap<(u64, u64), PathBuf> = HashMap::new();

    while let Some(current_path) = stack.pop() {
        // Make current directory readable to list contents
        perm_guard.make_readable_writable(&current_path).await?;

        let target_dir = dest_dir.join(current_path.strip_prefix(layer_dir).unwrap());
        fs::create_dir_all(&target_dir).await?;
        perm_guard.make_readable_writable(&target_dir).await?;

        // Collect the directory's entries up front so the opaque marker, when
        // present, can be honored before any of its siblings are applied.
        let mut entry_paths = Vec::new();
        let mut has_opaque = false;

        let mut entries =
            fs::read_dir(&current_path)
                .await
                .map_err(|e| UnlayerError::LayerHandling {
                    source: e,
                    layer: layer_dir.display().to_string(),
                })?;

        while let Some(entry) =
            entries
                .next_entry()
                .await
                .map_err(|e| UnlayerError::LayerHandling {
                    source: e,
                    layer: layer_dir.display().to_string(),
                })?
        {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name == WHITEOUT_OPAQUE {
                has_opaque = true;
            } else {
                entry_paths.push((entry.path(), file_name));
            }
        }

        // An opaque whiteout hides everything the earlier layers put in this
        // directory; the current layer's own entries are applied afterwards.
        if has_opaque {
            clear_directory(&target_dir).await?;
        }

        for (path, file_name) in entry_paths {
            if let Some(original_name) = file_name.strip_prefix(WHITEOUT_PREFIX) {
                let target_path = target_dir.join(original_name);
                remove_existing(&target_path).await?;
                continue;
            }

            let relative_path = path.strip_prefix(layer_dir).unwrap();
            let target_path = dest_dir.join(relative_path);

            // Make source readable and target's parent writable
            perm_guard.make_readable_writable(&path).await?;
            if let Some(parent) = target_path.parent() {
                perm_guard.make_writable(parent).await?;
            }

            handle_fs_entry(&path, &target_path, &perm_guard, &mut link_map).await?;
            if fs::symlink_metadata(&path).await?.file_type().is_dir() {
                stack.push(path);
            }
        }
    }

    Ok(())
}

/// Removes a path from the output tree, whatever it is. A missing path is a no-op.
async fn remove_existing(path: &Path) -> UnlayerResult<()> {
    match fs::symlink_metadata(path).await {
        Ok(metadata) => {
            if metadata.file_type().is_dir() {
                fs::remove_dir_all(path).await?;
            } else {
                fs::remove_file(path).await?;
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Removes every entry inside a directory, leaving the directory itself in place.
/// A missing directory is a no-op.
async fn clear_directory(dir: &Path) -> UnlayerResult<()> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        remove_existing(&entry.path()).await?;
    }

    Ok(())
}

/// Recreates one layer entry (directory, file, symlink, hardlink, or FIFO) at the
/// target path.
async fn handle_fs_entry(
    source_path: &Path,
    target_path: &Path,
    perm_guard: &PermissionGuard,
    link_map: &mut HashMap<(u64, u64), PathBuf>,
) -> UnlayerResult<()> {
    use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};

    use nix::{sys::stat::Mode, unistd};

    let metadata = fs::symlink_metadata(source_path).await?;
    let file_type = metadata.file_type();

    if file_type.is_dir() {
        tracing::debug!("Creating directory: {}", target_path.display());
        if let Ok(existing) = fs::symlink_metadata(target_path).await {
            // A lower layer's file of the same name is replaced by the directory
            if !existing.file_type().is_dir() {
                fs::remove_file(target_path).await?;
            }
        }
        fs::create_dir_all(target_path).await?;
    } else if file_type.is_file() {
        tracing::debug!(
            "Copying file: {} -> {}",
            source_path.display(),
            target_path.display()
        );

        // A file with link count > 1 is one leg of a hardlink group; the first
        // leg is copied and every later leg links to it.
        if metadata.nlink() > 1 {
            let key = (metadata.dev(), metadata.ino());
            if let Some(first_target) = link_map.get(&key) {
                remove_existing(target_path).await?;
                fs::hard_link(first_target, target_path).await?;
                return Ok(());
            }
            link_map.insert(key, target_path.to_path_buf());
        }

        // Replace whatever an earlier layer left here, read-only files included
        remove_existing(target_path).await?;
        fs::copy(source_path, target_path).await?;
    } else if file_type.is_symlink() {
        tracing::debug!(
            "Creating symlink: {} -> {}",
            target_path.display(),
            source_path.display()
        );
        let link_target = fs::read_link(source_path).await?;

        remove_existing(target_path).await?;
        fs::symlink(&link_target, target_path).await?;

        // Skip setting permissions for symlinks since they don't have their own permissions
        return Ok(());
    } else if file_type.is_fifo() {
        tracing::debug!("Creating FIFO: {}", target_path.display());
        remove_existing(target_path).await?;

        // Create FIFO with same permissions as source
        let mode = Mode::from_bits_truncate(metadata.mode() as nix::libc::mode_t & 0o777);
        unistd::mkfifo(target_path, mode)?;
    }

    // Set the original permissions on the target
    let original_mode = perm_guard
        .get_original_modes()
        .get(source_path)
        .copied()
        .unwrap_or_else(|| metadata.permissions().mode());

    fs::set_permissions(target_path, std::fs::Permissions::from_mode(original_mode)).await?;

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};

    use tempfile::tempdir;

    use super::*;

    #[test_log::test(tokio::test)]
    /// Tests applying a layer with various permissions and special files.
    ///
    /// Layer structure:
    /// ```text
    /// layer/                              dest/
    /// ├── test.txt       (rw-r--r--) ───→ ├── test.txt       (rw-r--r--)
    /// ├── readonly.txt   (r--r--r--) ───→ ├── readonly.txt   (r--r--r--)
    /// ├── writeonly.txt  (-w--w--w-) ───→ ├── writeonly.txt  (-w--w--w-)
    /// ├── test.fifo      (rw-r--r--) ───→ ├── test.fifo      (rw-r--r--)
    /// ├── link.txt     → test.txt ──────→ ├── link.txt     → test.txt
    /// └── restricted/    (--x------) ───→ └── restricted/   (--x------)
    ///     └── inner.txt  (r--------) ───→     └── inner.txt (r--------)
    /// ```
    async fn test_rootfs_apply_layer_with_permissions() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let layer_dir = temp.path().join("layer");
        let dest_dir = temp.path().join("dest");

        helper::create_layer_fixtures(&layer_dir).await?;

        apply_layer(&layer_dir, &dest_dir).await?;

        let verify_perms = |path: &Path, expected_mode: u32| -> anyhow::Result<()> {
            let metadata = std::fs::metadata(path)?;
            let mode = metadata.permissions().mode() & 0o777;
            assert_eq!(
                mode,
                expected_mode,
                "Permission mismatch for {}: expected {:#o}, got {:#o}",
                path.display(),
                expected_mode,
                mode
            );
            Ok(())
        };

        let dest_test_file = dest_dir.join("test.txt");
        assert!(dest_test_file.exists());
        verify_perms(&dest_test_file, 0o644)?;
        assert_eq!(fs::read_to_string(&dest_test_file).await?, "test content");

        let dest_readonly = dest_dir.join("readonly.txt");
        assert!(dest_readonly.exists());
        verify_perms(&dest_readonly, 0o444)?;

        let dest_writeonly = dest_dir.join("writeonly.txt");
        assert!(dest_writeonly.exists());
        verify_perms(&dest_writeonly, 0o222)?;

        let dest_restricted = dest_dir.join("restricted");
        assert!(dest_restricted.exists());
        verify_perms(&dest_restricted, 0o100)?;

        let dest_inner = dest_restricted.join("inner.txt");
        // Widen the restricted directory to look inside it
        std::fs::set_permissions(&dest_restricted, std::fs::Permissions::from_mode(0o700))?;
        assert!(dest_inner.exists());
        verify_perms(&dest_inner, 0o400)?;
        assert_eq!(fs::read_to_string(&dest_inner).await?, "inner content");

        let dest_fifo = dest_dir.join("test.fifo");
        assert!(dest_fifo.exists());
        assert!(fs::metadata(&dest_fifo).await?.file_type().is_fifo());
        verify_perms(&dest_fifo, 0o644)?;

        let dest_link = dest_dir.join("link.txt");
        assert!(fs::symlink_metadata(&dest_link)
            .await?
            .file_type()
            .is_symlink());
        assert_eq!(
            fs::read_link(&dest_link).await?,
            std::path::PathBuf::from("test.txt")
        );

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rootfs_apply_layer_whiteout_removes_file_and_marker() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let dest_dir = temp.path().join("dest");

        // Lower layer: a/b.txt
        let lower = temp.path().join("lower");
        fs::create_dir_all(lower.join("a")).await?;
        fs::write(lower.join("a/b.txt"), "from lower").await?;
        apply_layer(&lower, &dest_dir).await?;
        assert!(dest_dir.join("a/b.txt").exists());

        // Upper layer: a/.wh.b.txt
        let upper = temp.path().join("upper");
        fs::create_dir_all(upper.join("a")).await?;
        fs::write(upper.join("a/.wh.b.txt"), "").await?;
        apply_layer(&upper, &dest_dir).await?;

        assert!(!dest_dir.join("a/b.txt").exists());
        assert!(!dest_dir.join("a/.wh.b.txt").exists());
        assert!(dest_dir.join("a").exists());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rootfs_apply_layer_whiteout_removes_directory_recursively() -> anyhow::Result<()>
    {
        let temp = tempdir()?;
        let dest_dir = temp.path().join("dest");

        let lower = temp.path().join("lower");
        fs::create_dir_all(lower.join("dir/sub/nested")).await?;
        fs::write(lower.join("dir/sub/file.txt"), "x").await?;
        fs::write(lower.join("dir/sub/nested/deep.txt"), "y").await?;
        apply_layer(&lower, &dest_dir).await?;

        let upper = temp.path().join("upper");
        fs::create_dir_all(upper.join("dir")).await?;
        fs::write(upper.join("dir/.wh.sub"), "").await?;
        apply_layer(&upper, &dest_dir).await?;

        assert!(!dest_dir.join("dir/sub").exists());
        assert!(dest_dir.join("dir").exists());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rootfs_apply_layer_whiteout_without_target_is_noop() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let dest_dir = temp.path().join("dest");

        let layer = temp.path().join("layer");
        fs::create_dir_all(&layer).await?;
        fs::write(layer.join(".wh.never-existed.txt"), "").await?;
        fs::write(layer.join("kept.txt"), "kept").await?;

        apply_layer(&layer, &dest_dir).await?;

        assert!(!dest_dir.join(".wh.never-existed.txt").exists());
        assert!(!dest_dir.join("never-existed.txt").exists());
        assert!(dest_dir.join("kept.txt").exists());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rootfs_apply_layer_preserves_hardlinks() -> anyhow::Result<()> {
        use std::os::unix::fs::MetadataExt;

        let temp = tempdir()?;
        let dest_dir = temp.path().join("dest");

        // Busybox-style layer: one binary, applet names hardlinked to it
        let layer = temp.path().join("layer");
        fs::create_dir_all(layer.join("bin")).await?;
        fs::write(layer.join("bin/busybox"), "#!busybox").await?;
        fs::hard_link(layer.join("bin/busybox"), layer.join("bin/sh")).await?;
        fs::hard_link(layer.join("bin/busybox"), layer.join("bin/cat")).await?;

        apply_layer(&layer, &dest_dir).await?;

        let busybox = fs::metadata(dest_dir.join("bin/busybox")).await?;
        let sh = fs::metadata(dest_dir.join("bin/sh")).await?;
        let cat = fs::metadata(dest_dir.join("bin/cat")).await?;

        assert_eq!(busybox.ino(), sh.ino());
        assert_eq!(busybox.ino(), cat.ino());
        assert_eq!(busybox.nlink(), 3);
        assert_eq!(
            fs::read_to_string(dest_dir.join("bin/sh")).await?,
            "#!busybox"
        );

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rootfs_apply_layer_overwrites_readonly_file() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let dest_dir = temp.path().join("dest");

        let lower = temp.path().join("lower");
        fs::create_dir_all(&lower).await?;
        fs::write(lower.join("config"), "v1").await?;
        fs::set_permissions(
            lower.join("config"),
            std::fs::Permissions::from_mode(0o444),
        )
        .await?;
        apply_layer(&lower, &dest_dir).await?;

        let upper = temp.path().join("upper");
        fs::create_dir_all(&upper).await?;
        fs::write(upper.join("config"), "v2").await?;
        apply_layer(&upper, &dest_dir).await?;

        assert_eq!(fs::read_to_string(dest_dir.join("config")).await?, "v2");

        Ok(())
    }

    mod helper {
        use std::os::unix::fs::PermissionsExt;

        use nix::{sys::stat::Mode, unistd};

        use super::*;

        /// Creates layer fixtures with various file types and permissions.
        pub(super) async fn create_layer_fixtures(layer_dir: &Path) -> anyhow::Result<()> {
            fs::create_dir_all(layer_dir).await?;

            let test_file = layer_dir.join("test.txt");
            fs::write(&test_file, "test content").await?;
            fs::set_permissions(&test_file, std::fs::Permissions::from_mode(0o644)).await?;

            let readonly_file = layer_dir.join("readonly.txt");
            fs::write(&readonly_file, "readonly content").await?;
            fs::set_permissions(&readonly_file, std::fs::Permissions::from_mode(0o444)).await?;

            let writeonly_file = layer_dir.join("writeonly.txt");
            fs::write(&writeonly_file, "writeonly content").await?;
            fs::set_permissions(&writeonly_file, std::fs::Permissions::from_mode(0o222)).await?;

            let restricted_dir = layer_dir.join("restricted");
            fs::create_dir(&restricted_dir).await?;

            let inner_file = restricted_dir.join("inner.txt");
            fs::write(&inner_file, "inner content").await?;
            fs::set_permissions(&inner_file, std::fs::Permissions::from_mode(0o400)).await?;

            // Set directory permissions after creating inner file
            fs::set_permissions(&restricted_dir, std::fs::Permissions::from_mode(0o100)).await?;

            let fifo_path = layer_dir.join("test.fifo");
            unistd::mkfifo(&fifo_path, Mode::from_bits_truncate(0o644))?;

            std::os::unix::fs::symlink("test.txt", layer_dir.join("link.txt"))?;

            Ok(())
        }
    }
}
