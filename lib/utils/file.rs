use std::path::Path;

use oci_spec::image::DigestAlgorithm;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tokio::{fs::File, io::AsyncReadExt};

use crate::{UnlayerError, UnlayerResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Gets the hash of a file.
pub async fn get_file_hash(path: &Path, algorithm: &DigestAlgorithm) -> UnlayerResult<Vec<u8>> {
    let mut file = File::open(path).await?;
    let mut hasher: Box<dyn sha2::digest::DynDigest + Send> = match algorithm {
        DigestAlgorithm::Sha256 => Box::new(Sha256::new()),
        DigestAlgorithm::Sha384 => Box::new(Sha384::new()),
        DigestAlgorithm::Sha512 => Box::new(Sha512::new()),
        _ => {
            return Err(UnlayerError::UnsupportedImageHashAlgorithm(format!(
                "unsupported algorithm: {}",
                algorithm
            )));
        }
    };

    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finalize().to_vec())
}
