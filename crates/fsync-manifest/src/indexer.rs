// indexer.rs — Full and overlay-incremental indexing passes.
//
// Full mode walks the whole project root depth-first under the merged
// ignore set. Overlay-incremental mode starts from the previous manifest
// and re-stats only the changed paths and their parent directories; it is
// only used when the change set fits the configured budget, and falls back
// to a full walk otherwise.
//
// Unreadable entries are logged into the outcome and skipped. Only an
// unreadable project root fails the pass.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use fsync_ignore::IgnoreSet;

use crate::chunks;
use crate::config::{ProjectSyncConfig, SymlinkPolicy};
use crate::error::IndexError;
use crate::manifest::{Manifest, ManifestEntry};

/// The result of one indexing pass.
#[derive(Debug)]
pub struct IndexOutcome {
    pub manifest: Manifest,
    /// Whether this was a full walk (true) or an incremental pass (false).
    pub full: bool,
    /// Entries skipped as unreadable: (relative path, error text).
    pub skipped: Vec<(String, String)>,
}

/// Walks one project tree into a [`Manifest`].
pub struct Indexer<'a> {
    root: PathBuf,
    ignore: &'a IgnoreSet,
    config: &'a ProjectSyncConfig,
}

impl<'a> Indexer<'a> {
    pub fn new(config: &'a ProjectSyncConfig, ignore: &'a IgnoreSet) -> Self {
        Self {
            root: PathBuf::from(&config.path),
            ignore,
            config,
        }
    }

    /// Run an indexing pass.
    ///
    /// `prev` and `changed` enable overlay-incremental mode; `force_full`
    /// (from the baseline ledger) overrides it. The pass silently falls
    /// back to full mode when the change set exceeds `delta_max_files`.
    pub fn index(
        &self,
        prev: Option<&Manifest>,
        changed: Option<&[String]>,
        force_full: bool,
    ) -> Result<IndexOutcome, IndexError> {
        if !force_full && self.config.delta_index_overlay {
            if let (Some(prev), Some(changed)) = (prev, changed) {
                if !changed.is_empty() && changed.len() <= self.config.delta_max_files {
                    return self.index_incremental(prev, changed);
                }
                if changed.len() > self.config.delta_max_files {
                    tracing::debug!(
                        project = %self.config.name,
                        changed = changed.len(),
                        budget = self.config.delta_max_files,
                        "change set exceeds overlay budget, falling back to full scan"
                    );
                }
            }
        }
        self.index_full()
    }

    /// Depth-first walk of the whole tree.
    pub fn index_full(&self) -> Result<IndexOutcome, IndexError> {
        // A root we cannot enumerate fails the task (EACCES at the top).
        fs::read_dir(&self.root).map_err(|source| IndexError::RootUnreadable {
            path: self.root.clone(),
            source,
        })?;

        let mut outcome = IndexOutcome {
            manifest: Manifest::new(),
            full: true,
            skipped: Vec::new(),
        };
        self.walk_dir(&self.root, "", &mut outcome);
        Ok(outcome)
    }

    fn walk_dir(&self, dir: &Path, rel_prefix: &str, outcome: &mut IndexOutcome) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                // Below the root: log and move on.
                tracing::warn!(path = %dir.display(), error = %e, "skipping unreadable directory");
                outcome.skipped.push((rel_prefix.to_string(), e.to_string()));
                return;
            }
        };

        // Sort for deterministic manifests across platforms.
        let mut names: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.file_name()))
            .collect();
        names.sort();

        for name in names {
            let Some(name_str) = name.to_str() else {
                outcome.skipped.push((
                    format!("{}/{}", rel_prefix, name.to_string_lossy()),
                    "non-UTF-8 file name".to_string(),
                ));
                continue;
            };
            let rel = if rel_prefix.is_empty() {
                name_str.to_string()
            } else {
                format!("{}/{}", rel_prefix, name_str)
            };
            let path = dir.join(&name);

            let md = match fs::symlink_metadata(&path) {
                Ok(md) => md,
                Err(e) => {
                    outcome.skipped.push((rel, e.to_string()));
                    continue;
                }
            };

            if md.file_type().is_symlink() {
                if self.config.symlink_policy == SymlinkPolicy::Preserve
                    && !self.ignore.is_ignored(&rel, false)
                {
                    match fs::read_link(&path) {
                        Ok(target) => outcome.manifest.insert(
                            rel,
                            ManifestEntry::symlink(
                                target.to_string_lossy().into_owned(),
                                mtime_ms(&md),
                            ),
                        ),
                        Err(e) => outcome.skipped.push((rel, e.to_string())),
                    }
                }
                continue;
            }

            if md.is_dir() {
                let ignored = self.ignore.is_ignored(&rel, true);
                if ignored && !self.ignore.allows_descend(&rel) {
                    continue;
                }
                if !ignored {
                    outcome
                        .manifest
                        .insert(rel.clone(), ManifestEntry::dir(mtime_ms(&md), mode_bits(&md)));
                }
                self.walk_dir(&path, &rel, outcome);
                continue;
            }

            if self.ignore.is_ignored(&rel, false) {
                continue;
            }
            match self.file_entry(&path, &md) {
                Ok(entry) => outcome.manifest.insert(rel, entry),
                Err(e) => outcome.skipped.push((rel, e.to_string())),
            }
        }
    }

    /// Re-stat only the changed paths (plus their ancestors) against the
    /// previous manifest.
    fn index_incremental(
        &self,
        prev: &Manifest,
        changed: &[String],
    ) -> Result<IndexOutcome, IndexError> {
        // Root readability is the same contract as in full mode.
        fs::read_dir(&self.root).map_err(|source| IndexError::RootUnreadable {
            path: self.root.clone(),
            source,
        })?;

        let mut outcome = IndexOutcome {
            manifest: prev.clone(),
            full: false,
            skipped: Vec::new(),
        };

        // The work set: each changed path and every ancestor directory,
        // shallowest first so parents are in place before children.
        let mut work: BTreeSet<String> = BTreeSet::new();
        for raw in changed {
            let rel = normalize_rel(raw);
            if rel.is_empty() {
                continue;
            }
            let mut prefix = String::new();
            for comp in rel.split('/') {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(comp);
                work.insert(prefix.clone());
            }
        }

        for rel in work {
            let path = self.root.join(&rel);
            let md = match fs::symlink_metadata(&path) {
                Ok(md) => md,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    outcome.manifest.remove_subtree(&rel);
                    outcome.manifest.remove(&rel);
                    continue;
                }
                Err(e) => {
                    outcome.skipped.push((rel, e.to_string()));
                    continue;
                }
            };

            if md.file_type().is_symlink() {
                outcome.manifest.remove(&rel);
                if self.config.symlink_policy == SymlinkPolicy::Preserve
                    && !self.ignore.is_ignored(&rel, false)
                {
                    match fs::read_link(&path) {
                        Ok(target) => outcome.manifest.insert(
                            rel,
                            ManifestEntry::symlink(
                                target.to_string_lossy().into_owned(),
                                mtime_ms(&md),
                            ),
                        ),
                        Err(e) => outcome.skipped.push((rel, e.to_string())),
                    }
                }
                continue;
            }

            if md.is_dir() {
                if self.ignore.is_ignored(&rel, true) {
                    if !self.ignore.allows_descend(&rel) {
                        outcome.manifest.remove_subtree(&rel);
                        outcome.manifest.remove(&rel);
                    }
                    continue;
                }
                let newly_seen = !outcome.manifest.contains(&rel);
                outcome
                    .manifest
                    .insert(rel.clone(), ManifestEntry::dir(mtime_ms(&md), mode_bits(&md)));
                // A directory the previous manifest never saw may carry
                // contents the watcher did not report one by one.
                if newly_seen {
                    self.walk_dir(&path, &rel, &mut outcome);
                }
                continue;
            }

            if self.ignore.is_ignored(&rel, false) {
                outcome.manifest.remove(&rel);
                continue;
            }
            match self.file_entry(&path, &md) {
                Ok(entry) => outcome.manifest.insert(rel, entry),
                Err(e) => outcome.skipped.push((rel, e.to_string())),
            }
        }

        Ok(outcome)
    }

    fn file_entry(&self, path: &Path, md: &fs::Metadata) -> Result<ManifestEntry, IndexError> {
        let hashes = chunks::hash_file(path)?;
        Ok(ManifestEntry {
            kind: crate::manifest::EntryKind::File,
            size: hashes.size,
            mtime_ms: mtime_ms(md),
            mode: mode_bits(md),
            symlink_target: None,
            content_hash: hashes.content_hash,
            chunk_hashes: hashes.chunk_hashes,
        })
    }
}

fn mtime_ms(md: &fs::Metadata) -> i64 {
    md.modified()
        .ok()
        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis())
        .unwrap_or(0)
}

#[cfg(unix)]
fn mode_bits(md: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(_md: &fs::Metadata) -> u32 {
    0
}

fn normalize_rel(raw: &str) -> String {
    raw.trim_matches('/')
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/")
}
