// engine.rs — Apply one operation list to the target directory.
//
// The engine is synchronous and transport-agnostic. A PUT whose chunks
// are not all cached fails with MissingChunks; the caller (the agent's
// session loop, or the hub's in-process loopback) fetches them, feeds the
// cache, and retries the op. File writes land atomically: temp sibling in
// the same directory, content written and fsynced, permissions and mtime
// applied to the temp file, then rename over the destination.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use fsync_delta::SyncOp;

use crate::cache::ChunkCache;
use crate::error::ApplyError;
use crate::paths::safe_join;

/// Per-task apply policy, fixed at TASK_BEGIN.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Mirror: abort the task on the first hard error.
    /// Overlay: record the error and continue with the next op.
    pub abort_on_error: bool,
    pub preserve_mode: bool,
    pub preserve_mtime: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            abort_on_error: true,
            preserve_mode: true,
            preserve_mtime: true,
        }
    }
}

/// Outcome of one operation.
#[derive(Debug)]
pub struct OpOutcome {
    pub path: String,
    pub ok: bool,
    pub errno: u32,
    pub message: String,
}

/// Outcome of a whole plan.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: usize,
    pub failures: Vec<OpOutcome>,
    /// True when an abort-on-error policy stopped the plan early.
    pub aborted: bool,
}

impl ApplyReport {
    pub fn ok(&self) -> bool {
        self.failures.is_empty() && !self.aborted
    }
}

/// Applies operations against one target root.
pub struct Applier {
    root: PathBuf,
    cache: ChunkCache,
    options: ApplyOptions,
}

impl Applier {
    pub fn new(
        root: impl AsRef<Path>,
        cache: ChunkCache,
        options: ApplyOptions,
    ) -> Result<Self, ApplyError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(ApplyError::TargetMissing { path: root });
        }
        Ok(Self {
            root,
            cache,
            options,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// The chunk hashes a PUT needs that the cache does not hold.
    pub fn missing_chunks(&self, op: &SyncOp) -> Vec<String> {
        match op {
            SyncOp::Put { chunk_hashes, .. } => self.cache.missing(chunk_hashes.iter()),
            _ => Vec::new(),
        }
    }

    /// Apply one operation. Idempotent where the filesystem allows it:
    /// removing an already-absent path succeeds.
    pub fn apply_op(&self, op: &SyncOp) -> Result<(), ApplyError> {
        match op {
            SyncOp::Mkdir { path, mode } => self.mkdir(path, *mode),
            SyncOp::Put {
                path,
                mode,
                mtime_ms,
                chunk_hashes,
                ..
            } => self.put(path, *mode, *mtime_ms, chunk_hashes),
            SyncOp::Chmod { path, mode } => self.chmod(path, *mode),
            SyncOp::Utime { path, mtime_ms } => self.utime(path, *mtime_ms),
            SyncOp::Symlink { path, target } => self.symlink(path, target),
            SyncOp::Rm { path } => self.rm(path),
            SyncOp::Rmdir { path } => self.rmdir(path),
        }
    }

    /// Apply a whole plan, resolving missing chunks through `fetch`.
    /// `fetch` receives the missing hashes and returns (hash, bytes)
    /// pairs — the in-process equivalent of NEED_CHUNKS/CHUNK_DATA.
    pub fn apply_plan(
        &self,
        ops: &[SyncOp],
        mut fetch: impl FnMut(&[String]) -> Result<Vec<(String, Vec<u8>)>, ApplyError>,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();

        for op in ops {
            let missing = self.missing_chunks(op);
            if !missing.is_empty() {
                match fetch(&missing).and_then(|chunks| {
                    for (hash, data) in &chunks {
                        self.cache.put(hash, data)?;
                    }
                    Ok(())
                }) {
                    Ok(()) => {}
                    Err(e) => {
                        report.failures.push(outcome_for(op, &e));
                        if self.options.abort_on_error {
                            report.aborted = true;
                            return report;
                        }
                        continue;
                    }
                }
            }

            match self.apply_op(op) {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    tracing::warn!(op = op.kind(), path = op.path(), error = %e, "apply op failed");
                    report.failures.push(outcome_for(op, &e));
                    if self.options.abort_on_error {
                        report.aborted = true;
                        return report;
                    }
                }
            }
        }

        report
    }

    fn mkdir(&self, rel: &str, mode: u32) -> Result<(), ApplyError> {
        let path = safe_join(&self.root, rel)?;
        if path.is_file() || path.is_symlink() {
            fs::remove_file(&path).map_err(|source| ApplyError::Io {
                path: path.clone(),
                source,
            })?;
        }
        fs::create_dir_all(&path).map_err(|source| ApplyError::Io {
            path: path.clone(),
            source,
        })?;
        if self.options.preserve_mode {
            set_mode(&path, mode)?;
        }
        Ok(())
    }

    fn put(
        &self,
        rel: &str,
        mode: u32,
        mtime_ms: i64,
        chunk_hashes: &[String],
    ) -> Result<(), ApplyError> {
        let missing = self.cache.missing(chunk_hashes.iter());
        if !missing.is_empty() {
            return Err(ApplyError::MissingChunks { hashes: missing });
        }

        let path = safe_join(&self.root, rel)?;
        if path.is_dir() {
            // Type flip: a directory stood where a file goes.
            fs::remove_dir_all(&path).map_err(|source| ApplyError::Io {
                path: path.clone(),
                source,
            })?;
        }
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|source| ApplyError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        // Temp sibling in the same directory so the final rename cannot
        // cross filesystems.
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "put".to_string());
        let tmp = parent.join(format!(".{}.fsync-tmp.{}", file_name, std::process::id()));

        let result = (|| -> Result<(), ApplyError> {
            let mut file = fs::File::create(&tmp).map_err(|source| ApplyError::Io {
                path: tmp.clone(),
                source,
            })?;
            for hash in chunk_hashes {
                let data = self
                    .cache
                    .get(hash)?
                    .ok_or_else(|| ApplyError::MissingChunks {
                        hashes: vec![hash.clone()],
                    })?;
                file.write_all(&data).map_err(|source| ApplyError::Io {
                    path: tmp.clone(),
                    source,
                })?;
            }
            if self.options.preserve_mtime {
                let mtime = UNIX_EPOCH + Duration::from_millis(mtime_ms.max(0) as u64);
                file.set_modified(mtime).map_err(|source| ApplyError::Io {
                    path: tmp.clone(),
                    source,
                })?;
            }
            file.sync_all().map_err(|source| ApplyError::Io {
                path: tmp.clone(),
                source,
            })?;
            drop(file);

            if self.options.preserve_mode {
                set_mode(&tmp, mode)?;
            }
            fs::rename(&tmp, &path).map_err(|source| ApplyError::Io {
                path: path.clone(),
                source,
            })?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn chmod(&self, rel: &str, mode: u32) -> Result<(), ApplyError> {
        let path = safe_join(&self.root, rel)?;
        set_mode(&path, mode)
    }

    fn utime(&self, rel: &str, mtime_ms: i64) -> Result<(), ApplyError> {
        let path = safe_join(&self.root, rel)?;
        let file = fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|source| ApplyError::Io {
                path: path.clone(),
                source,
            })?;
        let mtime = UNIX_EPOCH + Duration::from_millis(mtime_ms.max(0) as u64);
        file.set_modified(mtime).map_err(|source| ApplyError::Io {
            path,
            source,
        })?;
        Ok(())
    }

    #[cfg(unix)]
    fn symlink(&self, rel: &str, target: &str) -> Result<(), ApplyError> {
        let path = safe_join(&self.root, rel)?;
        if path.is_symlink() || path.is_file() {
            fs::remove_file(&path).map_err(|source| ApplyError::Io {
                path: path.clone(),
                source,
            })?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ApplyError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::os::unix::fs::symlink(target, &path).map_err(|source| ApplyError::Io {
            path,
            source,
        })?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn symlink(&self, rel: &str, _target: &str) -> Result<(), ApplyError> {
        Err(ApplyError::SymlinkUnsupported {
            path: rel.to_string(),
        })
    }

    fn rm(&self, rel: &str) -> Result<(), ApplyError> {
        let path = safe_join(&self.root, rel)?;
        let result = if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => Ok(()),
            // Already gone: converged.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ApplyError::Io { path, source }),
        }
    }

    fn rmdir(&self, rel: &str) -> Result<(), ApplyError> {
        let path = safe_join(&self.root, rel)?;
        match fs::remove_dir(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) if dir_not_empty(&e) => {
                // Out-of-band contents appeared; the next full enumeration
                // reconciles them.
                tracing::debug!(path = %path.display(), "rmdir skipped, directory not empty");
                Ok(())
            }
            Err(source) => Err(ApplyError::Io { path, source }),
        }
    }
}

fn dir_not_empty(e: &std::io::Error) -> bool {
    // ENOTEMPTY is 39 on Linux, 66 on BSD/macOS.
    matches!(e.raw_os_error(), Some(39) | Some(66))
}

fn outcome_for(op: &SyncOp, e: &ApplyError) -> OpOutcome {
    OpOutcome {
        path: op.path().to_string(),
        ok: false,
        errno: e.errno(),
        message: e.to_string(),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), ApplyError> {
    use std::os::unix::fs::PermissionsExt;
    if mode == 0 {
        return Ok(());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| {
        ApplyError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), ApplyError> {
    Ok(())
}
