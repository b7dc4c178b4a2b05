// diff.rs — Compute the ordered operation list for one (project, node) pair.
//
// Inputs are two already-filtered manifests: the source tree as indexed on
// the hub, and the target view — either the cached applied manifest
// (mirror fast-delete) or a fresh agent-side enumeration. The diff itself
// is pure; the scheduler decides which target view to feed it.
//
// An empty source manifest always yields an empty plan. Mirror semantics
// would otherwise read "delete everything at the target", and an empty
// source is far more likely an all-ignored or misconfigured tree than an
// intentional wipe.

use std::collections::BTreeSet;

use fsync_manifest::{
    Manifest, ProjectNodeBinding, ProjectSyncConfig, SymlinkPolicy, SyncStrategy,
};

use crate::op::SyncOp;

/// Strategy and permission policy for one binding, flattened from the
/// project config and the node binding.
#[derive(Debug, Clone)]
pub struct DeltaOptions {
    pub strategy: SyncStrategy,
    pub preserve_mode: bool,
    pub preserve_mtime: bool,
    pub ignore_permissions: bool,
    pub symlink_policy: SymlinkPolicy,
    pub mirror_clean_empty_dirs: bool,
    pub mirror_sync_empty_dirs: bool,
}

impl DeltaOptions {
    pub fn for_binding(config: &ProjectSyncConfig, binding: &ProjectNodeBinding) -> Self {
        Self {
            strategy: binding.strategy,
            preserve_mode: config.preserve_mode,
            preserve_mtime: config.preserve_mtime,
            ignore_permissions: config.ignore_permissions,
            symlink_policy: config.symlink_policy,
            mirror_clean_empty_dirs: binding.mirror_clean_empty_dirs,
            mirror_sync_empty_dirs: binding.mirror_sync_empty_dirs,
        }
    }

    fn apply_modes(&self) -> bool {
        self.preserve_mode && !self.ignore_permissions
    }
}

/// An ordered operation list plus its transfer accounting.
#[derive(Debug, Default)]
pub struct DeltaPlan {
    pub ops: Vec<SyncOp>,
    /// Total bytes of file content the plan writes.
    pub bytes: u64,
    /// Total chunk references the plan writes.
    pub blocks: u64,
}

impl DeltaPlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Diff `source` against `target` and emit the converging plan.
pub fn compute_delta(source: &Manifest, target: &Manifest, opts: &DeltaOptions) -> DeltaPlan {
    let mut plan = DeltaPlan::default();
    if source.is_empty() {
        return plan;
    }

    let mut puts: Vec<SyncOp> = Vec::new();
    let mut symlinks: Vec<SyncOp> = Vec::new();
    let mut chmods: Vec<SyncOp> = Vec::new();
    let mut utimes: Vec<SyncOp> = Vec::new();
    let mut created_paths: Vec<&str> = Vec::new();

    for (path, entry) in source.iter() {
        match entry.kind {
            fsync_manifest::EntryKind::File => {
                let existing = target.get(path);
                let changed = match existing {
                    Some(t) => !entry.same_content(t),
                    None => true,
                };
                if changed {
                    plan.bytes += entry.size;
                    plan.blocks += entry.chunk_hashes.len() as u64;
                    created_paths.push(path.as_str());
                    puts.push(SyncOp::Put {
                        path: path.clone(),
                        size: entry.size,
                        mode: entry.mode,
                        mtime_ms: entry.mtime_ms,
                        content_hash: entry.content_hash.clone(),
                        chunk_hashes: entry.chunk_hashes.clone(),
                    });
                } else if let Some(t) = existing {
                    if opts.apply_modes() && t.mode != entry.mode {
                        chmods.push(SyncOp::Chmod {
                            path: path.clone(),
                            mode: entry.mode,
                        });
                    }
                    if opts.preserve_mtime && t.mtime_ms != entry.mtime_ms {
                        utimes.push(SyncOp::Utime {
                            path: path.clone(),
                            mtime_ms: entry.mtime_ms,
                        });
                    }
                }
            }
            fsync_manifest::EntryKind::Symlink => {
                if opts.symlink_policy == SymlinkPolicy::Preserve {
                    let needs = match target.get(path) {
                        Some(t) => !entry.same_content(t),
                        None => true,
                    };
                    if needs {
                        created_paths.push(path.as_str());
                        symlinks.push(SyncOp::Symlink {
                            path: path.clone(),
                            target: entry.symlink_target.clone().unwrap_or_default(),
                        });
                    }
                }
            }
            fsync_manifest::EntryKind::Dir => {
                if let Some(t) = target.get(path) {
                    if t.is_dir() && opts.apply_modes() && t.mode != entry.mode {
                        chmods.push(SyncOp::Chmod {
                            path: path.clone(),
                            mode: entry.mode,
                        });
                    }
                }
            }
        }
    }

    // Directories to create: every source directory missing at the target
    // when empty dirs are synced, otherwise only ancestors of something
    // being created.
    let mut mkdirs: BTreeSet<String> = BTreeSet::new();
    if opts.mirror_sync_empty_dirs {
        for (path, entry) in source.iter() {
            if entry.is_dir() && !target.get(path).is_some_and(|t| t.is_dir()) {
                mkdirs.insert(path.clone());
            }
        }
    }
    for path in &created_paths {
        for ancestor in ancestors(path) {
            if target.get(ancestor).is_some_and(|t| t.is_dir()) {
                continue;
            }
            mkdirs.insert(ancestor.to_string());
        }
    }

    // Removals: mirror only. Overlay never deletes.
    let mut rms: Vec<String> = Vec::new();
    let mut rmdirs: Vec<String> = Vec::new();
    if opts.strategy == SyncStrategy::Mirror {
        for (path, entry) in target.iter() {
            if source.contains(path) {
                continue;
            }
            match entry.kind {
                fsync_manifest::EntryKind::Dir => {
                    if opts.mirror_clean_empty_dirs && subtree_fully_removed(target, source, path) {
                        rmdirs.push(path.clone());
                    }
                }
                _ => rms.push(path.clone()),
            }
        }
    }

    // Assemble honoring the ordering contract: creates ascending, then
    // writes, attribute updates, symlinks; removals descending so deeper
    // paths go first.
    for path in &mkdirs {
        let mode = source.get(path).map(|e| e.mode).unwrap_or(0o755);
        plan.ops.push(SyncOp::Mkdir {
            path: path.clone(),
            mode,
        });
    }
    plan.ops.extend(puts);
    plan.ops.extend(chmods);
    plan.ops.extend(utimes);
    plan.ops.extend(symlinks);
    rms.sort_by(|a, b| b.cmp(a));
    plan.ops.extend(rms.into_iter().map(|path| SyncOp::Rm { path }));
    rmdirs.sort_by(|a, b| b.cmp(a));
    plan.ops
        .extend(rmdirs.into_iter().map(|path| SyncOp::Rmdir { path }));

    plan
}

/// Proper ancestors of a relative path, shallowest first.
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut ends = Vec::new();
    for (i, c) in path.char_indices() {
        if c == '/' {
            ends.push(i);
        }
    }
    ends.into_iter().map(move |end| &path[..end])
}

/// Whether every target entry strictly under `dir` is also absent from the
/// source (and will therefore be removed by this same plan).
fn subtree_fully_removed(target: &Manifest, source: &Manifest, dir: &str) -> bool {
    let prefix = format!("{}/", dir);
    target
        .iter()
        .filter(|(p, _)| p.starts_with(&prefix))
        .all(|(p, _)| !source.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsync_manifest::{EntryKind, ManifestEntry};

    fn file(hash: &str, size: u64) -> ManifestEntry {
        ManifestEntry {
            kind: EntryKind::File,
            size,
            mtime_ms: 1_000,
            mode: 0o644,
            symlink_target: None,
            content_hash: hash.to_string(),
            chunk_hashes: vec![hash.to_string()],
        }
    }

    fn dir() -> ManifestEntry {
        ManifestEntry::dir(1_000, 0o755)
    }

    fn mirror_opts() -> DeltaOptions {
        DeltaOptions {
            strategy: SyncStrategy::Mirror,
            preserve_mode: true,
            preserve_mtime: true,
            ignore_permissions: false,
            symlink_policy: SymlinkPolicy::Ignore,
            mirror_clean_empty_dirs: true,
            mirror_sync_empty_dirs: false,
        }
    }

    fn overlay_opts() -> DeltaOptions {
        DeltaOptions {
            strategy: SyncStrategy::Overlay,
            ..mirror_opts()
        }
    }

    #[test]
    fn initial_sync_puts_everything() {
        let mut source = Manifest::new();
        source.insert("a.txt", file("ha", 1));
        source.insert("b.txt", file("hb", 1));
        let target = Manifest::new();

        let plan = compute_delta(&source, &target, &mirror_opts());
        assert_eq!(plan.ops.len(), 2);
        assert_eq!(plan.bytes, 2);
        assert!(plan.ops.iter().all(|op| matches!(op, SyncOp::Put { .. })));
    }

    #[test]
    fn unchanged_pair_is_a_no_op() {
        let mut m = Manifest::new();
        m.insert("a.txt", file("ha", 1));
        let plan = compute_delta(&m, &m.clone(), &mirror_opts());
        assert!(plan.is_empty());
    }

    #[test]
    fn delete_propagation_is_one_rm() {
        let mut source = Manifest::new();
        source.insert("a.txt", file("ha", 1));
        let mut target = Manifest::new();
        target.insert("a.txt", file("ha", 1));
        target.insert("b.txt", file("hb", 1));

        let plan = compute_delta(&source, &target, &mirror_opts());
        assert_eq!(plan.ops, vec![SyncOp::Rm { path: "b.txt".into() }]);
    }

    #[test]
    fn overlay_preserves_extras() {
        let mut source = Manifest::new();
        source.insert("a.txt", file("ha", 1));
        let mut target = Manifest::new();
        target.insert("extra.txt", file("hx", 1));

        let plan = compute_delta(&source, &target, &overlay_opts());
        assert!(!plan.ops.iter().any(SyncOp::is_removal));
        assert!(matches!(&plan.ops[..], [SyncOp::Mkdir { .. }, ..] | [SyncOp::Put { .. }, ..]));
    }

    #[test]
    fn empty_source_yields_zero_ops_even_for_mirror() {
        let source = Manifest::new();
        let mut target = Manifest::new();
        target.insert("precious.txt", file("hp", 1));

        let plan = compute_delta(&source, &target, &mirror_opts());
        assert!(plan.is_empty());
    }

    #[test]
    fn new_file_creates_missing_ancestors() {
        let mut source = Manifest::new();
        source.insert("a", dir());
        source.insert("a/b", dir());
        source.insert("a/b/f.txt", file("hf", 3));
        let target = Manifest::new();

        let plan = compute_delta(&source, &target, &mirror_opts());
        let kinds: Vec<_> = plan.ops.iter().map(|o| (o.kind(), o.path())).collect();
        assert_eq!(
            kinds,
            vec![("mkdir", "a"), ("mkdir", "a/b"), ("put", "a/b/f.txt")]
        );
    }

    #[test]
    fn empty_dirs_only_with_sync_empty_dirs() {
        let mut source = Manifest::new();
        source.insert("empty", dir());
        let target = Manifest::new();

        let plan = compute_delta(&source, &target, &mirror_opts());
        assert!(plan.is_empty());

        let mut opts = mirror_opts();
        opts.mirror_sync_empty_dirs = true;
        let plan = compute_delta(&source, &target, &opts);
        assert_eq!(plan.ops, vec![SyncOp::Mkdir { path: "empty".into(), mode: 0o755 }]);
    }

    #[test]
    fn mode_and_mtime_divergence_emit_attribute_ops() {
        let mut source = Manifest::new();
        let mut e = file("ha", 1);
        e.mode = 0o600;
        e.mtime_ms = 2_000;
        source.insert("a.txt", e);
        let mut target = Manifest::new();
        target.insert("a.txt", file("ha", 1));

        let plan = compute_delta(&source, &target, &mirror_opts());
        assert_eq!(
            plan.ops,
            vec![
                SyncOp::Chmod { path: "a.txt".into(), mode: 0o600 },
                SyncOp::Utime { path: "a.txt".into(), mtime_ms: 2_000 },
            ]
        );
    }

    #[test]
    fn ignore_permissions_suppresses_chmod() {
        let mut source = Manifest::new();
        let mut e = file("ha", 1);
        e.mode = 0o600;
        source.insert("a.txt", e);
        let mut target = Manifest::new();
        target.insert("a.txt", file("ha", 1));

        let mut opts = mirror_opts();
        opts.ignore_permissions = true;
        opts.preserve_mtime = false;
        let plan = compute_delta(&source, &target, &opts);
        assert!(plan.is_empty());
    }

    #[test]
    fn symlink_preserve_emits_symlink_ops() {
        let mut source = Manifest::new();
        source.insert("link", ManifestEntry::symlink("a.txt".into(), 1));
        let target = Manifest::new();

        let mut opts = mirror_opts();
        opts.symlink_policy = SymlinkPolicy::Preserve;
        let plan = compute_delta(&source, &target, &opts);
        assert_eq!(
            plan.ops,
            vec![SyncOp::Symlink { path: "link".into(), target: "a.txt".into() }]
        );

        // Changed target text replaces the link.
        let mut target = Manifest::new();
        target.insert("link", ManifestEntry::symlink("other.txt".into(), 1));
        let plan = compute_delta(&source, &target, &opts);
        assert_eq!(plan.ops.len(), 1);
    }

    #[test]
    fn removals_are_deepest_first() {
        let mut source = Manifest::new();
        source.insert("keep.txt", file("hk", 1));
        let mut target = Manifest::new();
        target.insert("keep.txt", file("hk", 1));
        target.insert("old", dir());
        target.insert("old/sub", dir());
        target.insert("old/sub/f1", file("h1", 1));
        target.insert("old/f2", file("h2", 1));

        let plan = compute_delta(&source, &target, &mirror_opts());
        let paths: Vec<_> = plan.ops.iter().map(|o| (o.kind(), o.path().to_string())).collect();
        assert_eq!(
            paths,
            vec![
                ("rm", "old/sub/f1".to_string()),
                ("rm", "old/f2".to_string()),
                ("rmdir", "old/sub".to_string()),
                ("rmdir", "old".to_string()),
            ]
        );
    }

    #[test]
    fn clean_empty_dirs_can_be_disabled() {
        let mut source = Manifest::new();
        source.insert("keep.txt", file("hk", 1));
        let mut target = Manifest::new();
        target.insert("keep.txt", file("hk", 1));
        target.insert("old", dir());
        target.insert("old/f", file("h", 1));

        let mut opts = mirror_opts();
        opts.mirror_clean_empty_dirs = false;
        let plan = compute_delta(&source, &target, &opts);
        assert_eq!(plan.ops, vec![SyncOp::Rm { path: "old/f".into() }]);
    }

    #[test]
    fn surviving_child_keeps_the_directory() {
        // Directory is gone from source but one child survives under a
        // different name in source — the dir must not be removed.
        let mut source = Manifest::new();
        source.insert("d", dir());
        source.insert("d/keep", file("hk", 1));
        let mut target = Manifest::new();
        target.insert("d", dir());
        target.insert("d/keep", file("hk", 1));
        target.insert("d/drop", file("hd", 1));

        let plan = compute_delta(&source, &target, &mirror_opts());
        assert_eq!(plan.ops, vec![SyncOp::Rm { path: "d/drop".into() }]);
    }

    #[test]
    fn bytes_and_blocks_count_only_writes() {
        let mut source = Manifest::new();
        let mut big = file("hb", 300_000);
        big.chunk_hashes = vec!["c1".into(), "c2".into(), "c3".into()];
        source.insert("big.bin", big);
        source.insert("same.txt", file("hs", 5));
        let mut target = Manifest::new();
        target.insert("same.txt", file("hs", 5));

        let plan = compute_delta(&source, &target, &mirror_opts());
        assert_eq!(plan.bytes, 300_000);
        assert_eq!(plan.blocks, 3);
    }

    #[test]
    fn full_ordering_contract() {
        let mut source = Manifest::new();
        source.insert("new", dir());
        source.insert("new/f.txt", file("hn", 1));
        let mut changed = file("hc2", 1);
        changed.mode = 0o600;
        source.insert("changed.txt", changed);
        let mut attr = file("ha", 1);
        attr.mode = 0o600;
        source.insert("attr.txt", attr);

        let mut target = Manifest::new();
        target.insert("changed.txt", file("hc1", 1));
        target.insert("attr.txt", file("ha", 1));
        target.insert("gone.txt", file("hg", 1));
        target.insert("olddir", dir());
        target.insert("olddir/x", file("hx", 1));

        let plan = compute_delta(&source, &target, &mirror_opts());
        let kinds: Vec<_> = plan.ops.iter().map(SyncOp::kind).collect();
        // Class order: mkdir, put, chmod/utime, rm, rmdir.
        let first_rm = kinds.iter().position(|k| *k == "rm").unwrap();
        let last_put = kinds.iter().rposition(|k| *k == "put").unwrap();
        let chmod_pos = kinds.iter().position(|k| *k == "chmod").unwrap();
        let rmdir_pos = kinds.iter().position(|k| *k == "rmdir").unwrap();
        assert_eq!(kinds[0], "mkdir");
        assert!(last_put < chmod_pos);
        assert!(chmod_pos < first_rm);
        assert!(first_rm < rmdir_pos);
    }
}
