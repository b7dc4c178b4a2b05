// config.rs — Per-project sync configuration.
//
// This is the shape persisted by the hub and consumed by the indexer, the
// delta engine, and the scheduler. Every tuning knob has a serde default so
// a minimal TOML/JSON config stays minimal.

use serde::{Deserialize, Serialize};

/// How a node's target relates to the project source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Target must match source exactly; extra target paths are deleted.
    Mirror,
    /// Target must contain source contents; extra target paths are kept.
    Overlay,
}

/// What to do with symbolic links in the source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymlinkPolicy {
    /// Skip symlinks entirely.
    Ignore,
    /// Recreate symlinks at the target with the same link text.
    Preserve,
}

impl Default for SymlinkPolicy {
    fn default() -> Self {
        Self::Ignore
    }
}

/// One node bound to a project, with its target path and strategy tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectNodeBinding {
    /// Node id (UUID string) from the registry.
    pub node_id: String,
    /// Absolute path on the agent host. Must be non-empty and not `/`.
    pub target_path: String,
    pub strategy: SyncStrategy,
    /// Node-level rules, appended after the project-level rules.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub ignore_file: Option<String>,
    /// Trust the applied manifest for RM decisions, skipping agent-side
    /// enumeration on most tasks.
    #[serde(default = "default_true")]
    pub mirror_fast_delete: bool,
    /// Force an agent-side enumeration every N tasks to catch out-of-band
    /// deletions. Zero disables the forced enumeration.
    #[serde(default = "default_fast_fullscan_every")]
    pub mirror_fast_fullscan_every: u64,
    /// Remove directories left empty by deletions.
    #[serde(default = "default_true")]
    pub mirror_clean_empty_dirs: bool,
    /// Create source directories at the target even when empty.
    #[serde(default)]
    pub mirror_sync_empty_dirs: bool,
}

impl ProjectNodeBinding {
    /// A binding is schedulable only with a sane target path.
    pub fn target_path_valid(&self) -> bool {
        let p = self.target_path.trim();
        !p.is_empty() && p != "/" && p != "\\"
    }
}

/// Per-project sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSyncConfig {
    pub name: String,
    /// Absolute path of the source tree on the hub.
    pub path: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether the filesystem watcher runs for this project. Webhook-driven
    /// enqueue works regardless of this flag.
    #[serde(default = "default_true")]
    pub watch_enabled: bool,

    // Ignore settings.
    #[serde(default = "default_true")]
    pub ignore_defaults: bool,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub ignore_file: Option<String>,

    // Permission policy.
    #[serde(default)]
    pub ignore_permissions: bool,
    #[serde(default = "default_true")]
    pub preserve_mode: bool,
    #[serde(default = "default_true")]
    pub preserve_mtime: bool,
    #[serde(default)]
    pub symlink_policy: SymlinkPolicy,

    // Overlay incremental tuning.
    #[serde(default)]
    pub delta_index_overlay: bool,
    #[serde(default = "default_delta_max_files")]
    pub delta_max_files: usize,
    /// Force a baseline full scan every N tasks (0 = never by count).
    #[serde(default = "default_overlay_full_scan_every")]
    pub overlay_full_scan_every: u64,
    /// Force a baseline full scan when this many seconds have passed since
    /// the last one (0 = never by interval).
    #[serde(default = "default_overlay_full_scan_interval_secs")]
    pub overlay_full_scan_interval_secs: u64,

    /// Watcher debounce window in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default)]
    pub nodes: Vec<ProjectNodeBinding>,
}

impl ProjectSyncConfig {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            enabled: true,
            watch_enabled: true,
            ignore_defaults: true,
            ignore_patterns: Vec::new(),
            ignore_file: None,
            ignore_permissions: false,
            preserve_mode: true,
            preserve_mtime: true,
            symlink_policy: SymlinkPolicy::Ignore,
            delta_index_overlay: false,
            delta_max_files: default_delta_max_files(),
            overlay_full_scan_every: default_overlay_full_scan_every(),
            overlay_full_scan_interval_secs: default_overlay_full_scan_interval_secs(),
            debounce_ms: default_debounce_ms(),
            nodes: Vec::new(),
        }
    }

    /// Build the merged ignore set for one node binding: defaults, then
    /// project rules, then node rules, so node-level negations win.
    pub fn ignore_set_for(
        &self,
        binding: Option<&ProjectNodeBinding>,
        fold_case: bool,
    ) -> Result<fsync_ignore::IgnoreSet, fsync_ignore::IgnoreError> {
        let mut builder = fsync_ignore::IgnoreSet::builder().fold_case(fold_case);
        if self.ignore_defaults {
            builder = builder.defaults();
        }
        builder = builder.lines(self.ignore_patterns.iter().map(String::as_str))?;
        if let Some(file) = &self.ignore_file {
            builder = builder.file(std::path::Path::new(file))?;
        }
        if let Some(b) = binding {
            builder = builder.lines(b.ignore_patterns.iter().map(String::as_str))?;
            if let Some(file) = &b.ignore_file {
                builder = builder.file(std::path::Path::new(file))?;
            }
        }
        Ok(builder.build())
    }
}

fn default_true() -> bool {
    true
}

fn default_delta_max_files() -> usize {
    512
}

fn default_overlay_full_scan_every() -> u64 {
    50
}

fn default_overlay_full_scan_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_fast_fullscan_every() -> u64 {
    20
}

fn default_debounce_ms() -> u64 {
    400
}
