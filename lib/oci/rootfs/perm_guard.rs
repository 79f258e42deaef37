use std::{
    collections::HashMap,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use getset::Getters;
use tokio::fs;

use crate::{utils, UnlayerResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Tracks and manages temporary permission changes for files and directories.
///
/// Layer trees routinely contain entries with restrictive modes (read-only files,
/// `--x` directories). This guard records the original mode before widening it for
/// traversal or overwrite, and restores all recorded modes in reverse order when
/// dropped.
#[derive(Debug, Default, Getters)]
#[getset(get = "pub with_prefix")]
pub struct PermissionGuard {
    /// Maps paths to their original permissions
    original_modes: HashMap<PathBuf, u32>,

    /// Paths in order they were modified (for proper restoration)
    modified_paths: Vec<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PermissionGuard {
    /// Creates a new empty permission guard.
    pub fn new() -> Self {
        Self {
            original_modes: HashMap::new(),
            modified_paths: Vec::new(),
        }
    }

    /// Makes a path temporarily writable while preserving its other permission bits.
    ///
    /// Symlinks are skipped since their permissions can't be modified. The original
    /// permissions are restored when the guard is dropped.
    pub async fn make_writable(&mut self, path: impl AsRef<Path>) -> UnlayerResult<()> {
        self.widen(path.as_ref(), 0o300).await
    }

    /// Makes a path temporarily readable and writable while preserving other permission bits.
    ///
    /// Symlinks are skipped since their permissions can't be modified. The original
    /// permissions are restored when the guard is dropped.
    pub async fn make_readable_writable(&mut self, path: impl AsRef<Path>) -> UnlayerResult<()> {
        self.widen(path.as_ref(), 0o700).await
    }

    /// Records the path's current mode and ors in the requested bits.
    async fn widen(&mut self, path: &Path, bits: u32) -> UnlayerResult<()> {
        // Skip if we've already processed this path
        if self.original_modes.contains_key(path) {
            return Ok(());
        }

        if let Ok(metadata) = fs::symlink_metadata(path).await {
            if metadata.file_type().is_symlink() {
                tracing::debug!(
                    "Skipping permission modification for symlink: {}",
                    path.display()
                );
                return Ok(());
            }

            let mode = metadata.permissions().mode();
            self.original_modes.insert(path.to_path_buf(), mode);
            self.modified_paths.push(path.to_path_buf());

            let widened = mode | bits;
            fs::set_permissions(path, std::fs::Permissions::from_mode(widened)).await?;
            tracing::debug!(
                "Widened permissions: {}, mode: {} -> {} ({:#o} -> {:#o})",
                path.display(),
                utils::format_mode(mode),
                utils::format_mode(widened),
                mode,
                widened
            );
        }

        Ok(())
    }

    /// Restores original permissions for all modified paths in reverse order
    fn restore_all(&mut self) -> UnlayerResult<()> {
        while let Some(path) = self.modified_paths.pop() {
            if let Some(&original_mode) = self.original_modes.get(&path) {
                // Skip restoration if path no longer exists
                if !path.exists() {
                    tracing::debug!(
                        "Skipping permission restoration for deleted path: {}",
                        path.display()
                    );
                    continue;
                }

                // Skip symlinks since we can't set their permissions
                if let Ok(metadata) = std::fs::symlink_metadata(&path) {
                    if metadata.file_type().is_symlink() {
                        continue;
                    }
                }

                if let Err(e) =
                    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(original_mode))
                {
                    tracing::warn!(
                        "Failed to restore permissions for {}: {}",
                        path.display(),
                        e
                    );
                    return Err(e.into());
                }
                tracing::debug!(
                    "Restored permissions for: {}, mode: {} ({:#o})",
                    path.display(),
                    utils::format_mode(original_mode),
                    original_mode
                );
            }
        }
        self.original_modes.clear();
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for PermissionGuard {
    fn drop(&mut self) {
        if !self.modified_paths.is_empty() {
            // Don't propagate errors in drop, just log them
            if let Err(e) = self.restore_all() {
                tracing::debug!("Error during permission restoration in drop: {}", e);
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_rootfs_perm_guard_restores_on_drop() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let restricted = temp_dir.path().join("restricted");
        fs::create_dir(&restricted).await?;
        fs::set_permissions(&restricted, std::fs::Permissions::from_mode(0o500)).await?;

        {
            let mut guard = PermissionGuard::new();
            guard.make_readable_writable(&restricted).await?;
            let mode = fs::metadata(&restricted).await?.permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }

        let mode = fs::metadata(&restricted).await?.permissions().mode() & 0o777;
        assert_eq!(mode, 0o500);

        Ok(())
    }
}
