// chunks.rs — Fixed-size chunk hashing.
//
// All hashes in Fleetsync are SHA-256. File content is hashed in fixed
// 128 KiB chunks; the whole-file content hash is the digest of the
// concatenated chunk digests, so two manifests can agree on a file without
// either side re-reading it. Chunk digests travel on the wire as raw bytes
// and live in manifests hex-encoded.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::IndexError;

/// Chunk size for content hashing: 128 KiB.
pub const CHUNK_SIZE: usize = 128 * 1024;

/// Hash arbitrary bytes, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// The chunk digests and combined content hash of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHashes {
    pub size: u64,
    pub chunk_hashes: Vec<String>,
    pub content_hash: String,
}

/// Read a file in [`CHUNK_SIZE`] steps, hashing each chunk and the
/// concatenation of the chunk digests.
pub fn hash_file(path: &Path) -> Result<FileHashes, IndexError> {
    let mut file = File::open(path).map_err(|source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut chunk_hashes = Vec::new();
    let mut combined = Sha256::new();
    let mut size: u64 = 0;
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        // Fill the buffer up to a full chunk; short reads happen on pipes
        // and at EOF, so keep reading until the chunk is full or the file
        // ends.
        let mut filled = 0;
        while filled < CHUNK_SIZE {
            let n = file
                .read(&mut buf[filled..])
                .map_err(|source| IndexError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }

        let mut hasher = Sha256::new();
        hasher.update(&buf[..filled]);
        let digest = hasher.finalize();
        combined.update(digest);
        chunk_hashes.push(format!("{:x}", digest));
        size += filled as u64;

        if filled < CHUNK_SIZE {
            break;
        }
    }

    Ok(FileHashes {
        size,
        chunk_hashes,
        content_hash: format!("{:x}", combined.finalize()),
    })
}

/// Split a byte slice into [`CHUNK_SIZE`] chunks, returning each chunk's
/// hex digest. Used by the apply engine when it ingests streamed chunks.
pub fn chunk_spans(len: u64) -> impl Iterator<Item = (u64, u64)> {
    let chunk = CHUNK_SIZE as u64;
    let count = len.div_ceil(chunk);
    (0..count).map(move |i| {
        let off = i * chunk;
        (off, (len - off).min(chunk))
    })
}
