//! Content hashing for cross-path deduplication

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use trailcam_common::{Error, Result};

const CHUNK_SIZE: usize = 1024 * 1024;

/// SHA-256 of a file's contents as lower-case hex
///
/// Reads in 1 MiB chunks on the blocking pool.
pub async fn hash_file(path: &Path) -> Result<String> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file_blocking(&path))
        .await
        .map_err(|e| Error::Internal(format!("Hash task failed: {}", e)))?
}

/// Synchronous variant for callers already on a blocking thread
pub fn hash_file_blocking(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open {} for hashing: {}", path.display(), e),
        ))
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read {} for hashing: {}", path.display(), e),
            ))
        })?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
