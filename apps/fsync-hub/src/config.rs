// config.rs — hub.toml, the hooks file, and per-project config persistence.
//
// The TOML file seeds the hub; project configs updated over REST are
// persisted as one JSON file per project under the state directory and
// win over the TOML seed on the next start.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fsync_manifest::ProjectSyncConfig;

/// Top-level hub configuration (hub.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HubConfig {
    /// REST/WebSocket bind address.
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Control-plane (agent) listener port.
    #[serde(default = "default_sync_port")]
    pub sync_port: u16,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// PEM certificate and key for the control-plane listener.
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// Bearer value for the X-GoHook-Key header. Empty disables auth.
    #[serde(default)]
    pub auth_key: String,
    /// Queue depth per project beyond which health degrades.
    #[serde(default = "default_degraded_depth")]
    pub queue_degraded_depth: u64,
    #[serde(default = "default_deadline_secs")]
    pub task_deadline_secs: u64,
    #[serde(default)]
    pub fold_case: bool,
    #[serde(default)]
    pub projects: Vec<ProjectSyncConfig>,
    #[serde(default)]
    pub hooks: Vec<HookDef>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
            sync_port: default_sync_port(),
            state_dir: default_state_dir(),
            tls_cert: None,
            tls_key: None,
            auth_key: String::new(),
            queue_degraded_depth: default_degraded_depth(),
            task_deadline_secs: default_deadline_secs(),
            fold_case: false,
            projects: Vec::new(),
            hooks: Vec::new(),
        }
    }
}

impl HubConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        let config: HubConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("cannot parse {}: {e}", path.display()))?;
        Ok(config)
    }
}

/// One deployment hook: which project a webhook drives and whether the
/// deploy may force through local drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDef {
    pub project: String,
    #[serde(default)]
    pub force: bool,
    /// Default ref when the webhook payload names none.
    #[serde(default)]
    pub default_ref: Option<String>,
}

/// The hooks file: `[[hooks]]` entries.
#[derive(Debug, Default, Deserialize)]
struct HooksFile {
    #[serde(default)]
    hooks: Vec<HookDef>,
}

pub fn load_hooks(path: &Path) -> anyhow::Result<Vec<HookDef>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
    let parsed: HooksFile = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("cannot parse {}: {e}", path.display()))?;
    Ok(parsed.hooks)
}

pub fn hooks_by_project(hooks: Vec<HookDef>) -> HashMap<String, HookDef> {
    hooks.into_iter().map(|h| (h.project.clone(), h)).collect()
}

/// JSON persistence for project configs updated at runtime.
pub struct ProjectConfigStore {
    dir: PathBuf,
}

impl ProjectConfigStore {
    pub fn new(state_dir: &Path) -> anyhow::Result<Self> {
        let dir = state_dir.join("projects");
        std::fs::create_dir_all(&dir)
            .map_err(|e| anyhow::anyhow!("cannot create {}: {e}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn save(&self, config: &ProjectSyncConfig) -> anyhow::Result<()> {
        let path = self.file_for(&config.name);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(config)?)
            .map_err(|e| anyhow::anyhow!("cannot write {}: {e}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| anyhow::anyhow!("cannot replace {}: {e}", path.display()))?;
        Ok(())
    }

    /// Load every persisted project config.
    pub fn load_all(&self) -> anyhow::Result<Vec<ProjectSyncConfig>> {
        let mut configs = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", self.dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let raw = std::fs::read_to_string(&path)?;
                match serde_json::from_str(&raw) {
                    Ok(config) => configs.push(config),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping bad project config")
                    }
                }
            }
        }
        Ok(configs)
    }

    fn file_for(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_sync_port() -> u16 {
    9443
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_degraded_depth() -> u64 {
    1000
}

fn default_deadline_secs() -> u64 {
    30 * 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn minimal_toml_gets_defaults() {
        let config: HubConfig = toml::from_str("").unwrap();
        assert_eq!(config.ip, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.sync_port, 9443);
        assert!(config.auth_key.is_empty());
    }

    #[test]
    fn full_toml_round_trip() {
        let raw = r#"
            ip = "127.0.0.1"
            port = 8080
            authKey = "secret"

            [[projects]]
            name = "web"
            path = "/srv/web"

            [[hooks]]
            project = "web"
            force = true
        "#;
        let config: HubConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.projects[0].name, "web");
        assert!(config.hooks[0].force);
    }

    #[test]
    fn unknown_keys_are_config_errors() {
        assert!(toml::from_str::<HubConfig>("bogus = 1").is_err());
    }

    #[test]
    fn project_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = ProjectConfigStore::new(dir.path()).unwrap();
        let mut config = ProjectSyncConfig::new("web", "/srv/web");
        config.ignore_patterns = vec!["*.log".into()];
        store.save(&config).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "web");
        assert_eq!(loaded[0].ignore_patterns, vec!["*.log"]);
    }

    #[test]
    fn hooks_file_parses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hooks.toml");
        std::fs::write(&path, "[[hooks]]\nproject = \"web\"\nforce = true\n").unwrap();
        let hooks = load_hooks(&path).unwrap();
        assert_eq!(hooks.len(), 1);
        let map = hooks_by_project(hooks);
        assert!(map["web"].force);
    }
}
