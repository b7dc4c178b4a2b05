// listing.rs — Target-side enumeration.
//
// Answers the hub's forced enumeration during mirror fast-delete
// correction: walk the target and report what actually exists, so
// out-of-band deletions and additions are reconciled against the applied
// manifest. Hashing is whole-file (chunked under the hood) so the hub can
// also use the listing as a full target view.

use std::fs;
use std::path::Path;

use fsync_ignore::IgnoreSet;
use fsync_manifest::{chunks, EntryKind, Manifest, ManifestEntry};

use crate::error::ApplyError;

/// Walk `root` into a manifest of what the target currently holds.
/// The agent's own chunk cache directory is always skipped.
pub fn enumerate_target(root: &Path, ignore: &IgnoreSet) -> Result<Manifest, ApplyError> {
    if !root.is_dir() {
        return Err(ApplyError::TargetMissing {
            path: root.to_path_buf(),
        });
    }
    let mut manifest = Manifest::new();
    walk(root, root, ignore, &mut manifest);
    Ok(manifest)
}

fn walk(root: &Path, dir: &Path, ignore: &IgnoreSet, manifest: &mut Manifest) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "skipping unreadable directory");
            return;
        }
    };

    let mut names: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.file_name()))
        .collect();
    names.sort();

    for name in names {
        let Some(name_str) = name.to_str() else {
            continue;
        };
        let path = dir.join(&name);
        let rel = match path.strip_prefix(root) {
            Ok(r) => r.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if rel == ".fsync-cache" || rel.starts_with(".fsync-cache/") {
            continue;
        }
        // Transient temp siblings from in-flight writes.
        if name_str.contains(".fsync-tmp.") {
            continue;
        }

        let Ok(md) = fs::symlink_metadata(&path) else {
            continue;
        };

        if md.file_type().is_symlink() {
            if !ignore.is_ignored(&rel, false) {
                if let Ok(target) = fs::read_link(&path) {
                    manifest.insert(
                        rel,
                        ManifestEntry::symlink(target.to_string_lossy().into_owned(), mtime_ms(&md)),
                    );
                }
            }
            continue;
        }

        if md.is_dir() {
            let ignored = ignore.is_ignored(&rel, true);
            if ignored && !ignore.allows_descend(&rel) {
                continue;
            }
            if !ignored {
                manifest.insert(rel.clone(), ManifestEntry::dir(mtime_ms(&md), mode_bits(&md)));
            }
            walk(root, &path, ignore, manifest);
            continue;
        }

        if ignore.is_ignored(&rel, false) {
            continue;
        }
        match chunks::hash_file(&path) {
            Ok(hashes) => manifest.insert(
                rel,
                ManifestEntry {
                    kind: EntryKind::File,
                    size: hashes.size,
                    mtime_ms: mtime_ms(&md),
                    mode: mode_bits(&md),
                    symlink_target: None,
                    content_hash: hashes.content_hash,
                    chunk_hashes: hashes.chunk_hashes,
                },
            ),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }
}

fn mtime_ms(md: &fs::Metadata) -> i64 {
    md.modified()
        .ok()
        .map(|t| chrono_ms(t))
        .unwrap_or(0)
}

fn chrono_ms(t: std::time::SystemTime) -> i64 {
    t.duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn enumerates_files_and_dirs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"A").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"B").unwrap();

        let m = enumerate_target(dir.path(), &IgnoreSet::empty()).unwrap();
        assert!(m.get("a.txt").unwrap().is_file());
        assert!(m.get("sub").unwrap().is_dir());
        assert!(m.contains("sub/b.txt"));
    }

    #[test]
    fn cache_dir_is_never_listed() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".fsync-cache/ab")).unwrap();
        fs::write(dir.path().join(".fsync-cache/ab/cd"), b"chunk").unwrap();
        fs::write(dir.path().join("real.txt"), b"x").unwrap();

        let m = enumerate_target(dir.path(), &IgnoreSet::empty()).unwrap();
        assert_eq!(m.len(), 1);
        assert!(m.contains("real.txt"));
    }

    #[test]
    fn respects_the_merged_ignore_set() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), b"k").unwrap();
        fs::create_dir_all(dir.path().join("skip")).unwrap();
        fs::write(dir.path().join("skip/x"), b"x").unwrap();

        let ignore = IgnoreSet::builder().lines(["skip/"]).unwrap().build();
        let m = enumerate_target(dir.path(), &ignore).unwrap();
        assert!(m.contains("keep.txt"));
        assert!(!m.contains("skip"));
        assert!(!m.contains("skip/x"));
    }

    #[test]
    fn missing_root_errors() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            enumerate_target(&dir.path().join("gone"), &IgnoreSet::empty()),
            Err(ApplyError::TargetMissing { .. })
        ));
    }
}
