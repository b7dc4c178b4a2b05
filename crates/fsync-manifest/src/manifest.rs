// manifest.rs — The filtered tree snapshot used as the unit of comparison.
//
// A manifest maps relative paths (forward-slash separated, no leading
// slash) to entries. BTreeMap keeps the map ordered, which gives the delta
// engine its lexicographic ordering for free and makes serialized
// manifests diffable by eye.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What kind of filesystem object an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

/// One entry in a manifest.
///
/// `chunk_hashes` and `content_hash` are only populated for regular files;
/// directories carry mode/mtime only, symlinks carry their target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub kind: EntryKind,
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime_ms: i64,
    /// Unix permission bits (lower 12 bits); zero on platforms without them.
    pub mode: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlink_target: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_hashes: Vec<String>,
}

impl ManifestEntry {
    pub fn dir(mtime_ms: i64, mode: u32) -> Self {
        Self {
            kind: EntryKind::Dir,
            size: 0,
            mtime_ms,
            mode,
            symlink_target: None,
            content_hash: String::new(),
            chunk_hashes: Vec::new(),
        }
    }

    pub fn symlink(target: String, mtime_ms: i64) -> Self {
        Self {
            kind: EntryKind::Symlink,
            size: 0,
            mtime_ms,
            mode: 0,
            symlink_target: Some(target),
            content_hash: String::new(),
            chunk_hashes: Vec::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Whether two entries describe the same content (ignoring attributes).
    pub fn same_content(&self, other: &Self) -> bool {
        match (self.kind, other.kind) {
            (EntryKind::File, EntryKind::File) => self.content_hash == other.content_hash,
            (EntryKind::Symlink, EntryKind::Symlink) => {
                self.symlink_target == other.symlink_target
            }
            (EntryKind::Dir, EntryKind::Dir) => true,
            _ => false,
        }
    }
}

/// An ordered, ignore-filtered snapshot of a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, relpath: impl Into<String>, entry: ManifestEntry) {
        self.entries.insert(relpath.into(), entry);
    }

    pub fn remove(&mut self, relpath: &str) -> Option<ManifestEntry> {
        self.entries.remove(relpath)
    }

    /// Remove a path and everything below it.
    pub fn remove_subtree(&mut self, relpath: &str) {
        let prefix = format!("{}/", relpath);
        self.entries
            .retain(|k, _| k != relpath && !k.starts_with(&prefix));
    }

    pub fn get(&self, relpath: &str) -> Option<&ManifestEntry> {
        self.entries.get(relpath)
    }

    pub fn contains(&self, relpath: &str) -> bool {
        self.entries.contains_key(relpath)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in lexicographic path order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Total byte size of all regular files.
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .values()
            .filter(|e| e.is_file())
            .map(|e| e.size)
            .sum()
    }

    /// Every chunk hash referenced by any file, deduplicated.
    pub fn chunk_set(&self) -> std::collections::HashSet<&str> {
        self.entries
            .values()
            .flat_map(|e| e.chunk_hashes.iter().map(String::as_str))
            .collect()
    }
}
