use std::path::Path;

use tokio::fs;

use crate::{UnlayerError, UnlayerResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Extracts a gzip-compressed tar layer archive to the specified path.
///
/// # Arguments
/// * `layer_path` - Path to the compressed layer archive
/// * `extract_path` - Directory to extract the layer into
///
/// # Notes
/// - Runs extraction in a blocking task to avoid blocking the async runtime
/// - Creates the extract directory if it doesn't exist
/// - Preserves file permissions and attributes during extraction
///
/// # Errors
/// Returns error if:
/// - Failed to open layer archive
/// - Failed to decompress gzip data
/// - Failed to extract tar contents
/// - Failed to create extract directory
pub async fn extract_layer(layer_path: &Path, extract_path: &Path) -> UnlayerResult<()> {
    fs::create_dir_all(extract_path).await?;

    // Clone paths for the blocking task
    let layer_path = layer_path.to_path_buf();
    let extract_path = extract_path.to_path_buf();

    // Run the blocking tar extraction in a blocking task
    tokio::task::spawn_blocking(move || -> UnlayerResult<()> {
        let tar_gz = std::fs::File::open(&layer_path).map_err(|e| UnlayerError::LayerHandling {
            source: e,
            layer: layer_path.display().to_string(),
        })?;

        let tar = flate2::read::GzDecoder::new(std::io::BufReader::new(tar_gz));
        let mut archive = tar::Archive::new(tar);
        archive.set_preserve_permissions(true);

        archive
            .unpack(&extract_path)
            .map_err(|e| UnlayerError::LayerHandling {
                source: e,
                layer: layer_path.display().to_string(),
            })?;

        Ok(())
    })
    .await
    .map_err(|e| UnlayerError::LayerExtraction(format!("Join error: {}", e)))??;

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
