// cache.rs — Content-addressed chunk cache.
//
// Chunks are keyed by their SHA-256 hex digest and stored under a two-byte
// fan-out (`ab/abcdef…`). The cache is append-only: a chunk is written to
// a temp sibling and renamed into place, so concurrent readers and writers
// never observe partial bytes and double-writes are harmless.

use std::path::{Path, PathBuf};

use crate::error::ApplyError;

/// On-disk chunk store for one agent.
#[derive(Debug, Clone)]
pub struct ChunkCache {
    dir: PathBuf,
}

impl ChunkCache {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, ApplyError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| ApplyError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.path_for(hash).is_file()
    }

    /// Which of these hashes the cache does not hold.
    pub fn missing<'a>(&self, hashes: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        hashes
            .into_iter()
            .filter(|h| !self.contains(h))
            .cloned()
            .collect()
    }

    pub fn get(&self, hash: &str) -> Result<Option<Vec<u8>>, ApplyError> {
        let path = self.path_for(hash);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ApplyError::Io { path, source }),
        }
    }

    /// Insert chunk bytes, verifying them against the announced hash.
    pub fn put(&self, hash: &str, data: &[u8]) -> Result<(), ApplyError> {
        let actual = fsync_manifest::chunks::hash_bytes(data);
        if actual != hash {
            return Err(ApplyError::ChunkHashMismatch {
                hash: hash.to_string(),
            });
        }

        let path = self.path_for(hash);
        if path.is_file() {
            return Ok(());
        }
        let parent = path.parent().expect("fan-out parent");
        std::fs::create_dir_all(parent).map_err(|source| ApplyError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&tmp, data).map_err(|source| ApplyError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| ApplyError::Io { path, source })?;
        Ok(())
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        let (fan, rest) = if hash.len() > 2 {
            hash.split_at(2)
        } else {
            ("xx", hash)
        };
        self.dir.join(fan).join(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsync_manifest::chunks::hash_bytes;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_round_trip() {
        let dir = tempdir().unwrap();
        let cache = ChunkCache::new(dir.path().join("chunks")).unwrap();

        let data = b"chunk bytes".to_vec();
        let hash = hash_bytes(&data);
        assert!(!cache.contains(&hash));

        cache.put(&hash, &data).unwrap();
        assert!(cache.contains(&hash));
        assert_eq!(cache.get(&hash).unwrap().unwrap(), data);
    }

    #[test]
    fn double_put_is_harmless() {
        let dir = tempdir().unwrap();
        let cache = ChunkCache::new(dir.path()).unwrap();
        let data = b"x".to_vec();
        let hash = hash_bytes(&data);
        cache.put(&hash, &data).unwrap();
        cache.put(&hash, &data).unwrap();
        assert_eq!(cache.get(&hash).unwrap().unwrap(), data);
    }

    #[test]
    fn corrupt_bytes_are_refused() {
        let dir = tempdir().unwrap();
        let cache = ChunkCache::new(dir.path()).unwrap();
        let err = cache.put(&hash_bytes(b"expected"), b"actual");
        assert!(matches!(err, Err(ApplyError::ChunkHashMismatch { .. })));
    }

    #[test]
    fn missing_reports_only_absent_hashes() {
        let dir = tempdir().unwrap();
        let cache = ChunkCache::new(dir.path()).unwrap();
        let present = b"here".to_vec();
        let h1 = hash_bytes(&present);
        let h2 = hash_bytes(b"absent");
        cache.put(&h1, &present).unwrap();

        let missing = cache.missing([&h1, &h2].map(|h| h.clone()).iter());
        assert_eq!(missing, vec![h2]);
    }

    #[test]
    fn get_of_unknown_hash_is_none() {
        let dir = tempdir().unwrap();
        let cache = ChunkCache::new(dir.path()).unwrap();
        assert!(cache.get(&hash_bytes(b"nope")).unwrap().is_none());
    }
}
