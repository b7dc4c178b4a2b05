// chunksrc.rs — Serve chunk bytes out of the source tree.
//
// The delta plan references file content by chunk hash. When a target is
// missing chunks, the bytes come from the hub's source files: the resolver
// maps each hash back to (file, offset) using the manifest the plan was
// computed from, reads the span, and re-verifies the digest — a file that
// changed under us fails the fetch rather than shipping wrong bytes.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use fsync_manifest::chunks::{hash_bytes, CHUNK_SIZE};
use fsync_manifest::Manifest;

/// Where a chunk lives in the source tree.
#[derive(Debug, Clone)]
struct ChunkLocation {
    relpath: String,
    offset: u64,
}

/// Hash → source location index for one indexing pass.
pub struct ChunkResolver {
    root: PathBuf,
    index: HashMap<String, ChunkLocation>,
}

/// A chunk fetch that could not be satisfied.
#[derive(Debug, thiserror::Error)]
pub enum ChunkFetchError {
    #[error("chunk {hash} is not part of the current manifest")]
    UnknownChunk { hash: String },

    #[error("source file {path} changed while serving chunk {hash}")]
    SourceDrifted { path: String, hash: String },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ChunkResolver {
    /// Build the index from a source manifest.
    pub fn from_manifest(root: impl Into<PathBuf>, manifest: &Manifest) -> Self {
        let mut index = HashMap::new();
        for (path, entry) in manifest.iter() {
            for (i, hash) in entry.chunk_hashes.iter().enumerate() {
                index.insert(
                    hash.clone(),
                    ChunkLocation {
                        relpath: path.clone(),
                        offset: (i * CHUNK_SIZE) as u64,
                    },
                );
            }
        }
        Self {
            root: root.into(),
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Read and verify the bytes for each requested hash.
    pub fn fetch(&self, hashes: &[String]) -> Result<Vec<(String, Vec<u8>)>, ChunkFetchError> {
        let mut out = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let loc = self
                .index
                .get(hash)
                .ok_or_else(|| ChunkFetchError::UnknownChunk { hash: hash.clone() })?;
            let path = self.root.join(&loc.relpath);
            let mut file = File::open(&path).map_err(|source| ChunkFetchError::Io {
                path: loc.relpath.clone(),
                source,
            })?;
            file.seek(SeekFrom::Start(loc.offset))
                .map_err(|source| ChunkFetchError::Io {
                    path: loc.relpath.clone(),
                    source,
                })?;
            let mut buf = vec![0u8; CHUNK_SIZE];
            let mut filled = 0;
            loop {
                let n = file
                    .read(&mut buf[filled..])
                    .map_err(|source| ChunkFetchError::Io {
                        path: loc.relpath.clone(),
                        source,
                    })?;
                if n == 0 {
                    break;
                }
                filled += n;
                if filled == CHUNK_SIZE {
                    break;
                }
            }
            buf.truncate(filled);

            if hash_bytes(&buf) != *hash {
                return Err(ChunkFetchError::SourceDrifted {
                    path: loc.relpath.clone(),
                    hash: hash.clone(),
                });
            }
            out.push((hash.clone(), buf));
        }
        Ok(out)
    }
}
