//! # fsync-agent
//!
//! The Fleetsync agent daemon: maintains one mTLS session to the hub,
//! heartbeats, and applies whatever sync plans arrive against its local
//! target directories. On first start it presents the pairing token the
//! operator copied from the hub; after the hub pins the agent's
//! certificate the token becomes irrelevant.
//!
//! Exit codes: 0 normal shutdown, 1 configuration error.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use fsync_transport::{AgentConfig, AgentSession};

/// Fleetsync agent.
#[derive(Parser)]
#[command(name = "fsync-agent", about = "Fleetsync agent daemon", version)]
struct Cli {
    /// Path to agent.toml.
    #[arg(long, default_value = "agent.toml")]
    config: PathBuf,

    /// Hub control-plane address (overrides the config file).
    #[arg(long)]
    hub: Option<String>,

    /// Pairing token (overrides the config file). Needed only until the
    /// hub has pinned this agent's certificate.
    #[arg(long)]
    token: Option<String>,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    logfile: Option<PathBuf>,
}

/// agent.toml.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FileConfig {
    hub_addr: Option<String>,
    #[serde(default)]
    token: String,
    cert: PathBuf,
    key: PathBuf,
    cache_dir: Option<PathBuf>,
    #[serde(default = "default_reconnect_min")]
    reconnect_min_secs: u64,
    #[serde(default = "default_reconnect_max")]
    reconnect_max_secs: u64,
}

fn default_reconnect_min() -> u64 {
    2
}

fn default_reconnect_max() -> u64 {
    60
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.logfile.as_deref()) {
        eprintln!("fsync-agent: {e}");
        return ExitCode::from(1);
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "cannot start runtime");
            return ExitCode::from(1);
        }
    };

    runtime.block_on(async {
        let shutdown = CancellationToken::new();
        let signal_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutting down");
                signal_shutdown.cancel();
            }
        });

        tracing::info!(hub = %config.hub_addr, "agent starting");
        AgentSession::new(config).run(shutdown).await;
    });
    ExitCode::SUCCESS
}

fn load_config(cli: &Cli) -> anyhow::Result<AgentConfig> {
    let raw = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("cannot read {}", cli.config.display()))?;
    let file: FileConfig = toml::from_str(&raw)
        .with_context(|| format!("cannot parse {}", cli.config.display()))?;

    let hub_addr = cli
        .hub
        .clone()
        .or(file.hub_addr)
        .context("no hub address configured (set hubAddr or pass --hub)")?;
    let token = cli.token.clone().unwrap_or(file.token);

    if !file.cert.exists() {
        anyhow::bail!("certificate {} does not exist", file.cert.display());
    }
    if !file.key.exists() {
        anyhow::bail!("key {} does not exist", file.key.display());
    }

    Ok(AgentConfig {
        hub_addr,
        token,
        cert_path: file.cert,
        key_path: file.key,
        agent_version: env!("CARGO_PKG_VERSION").to_string(),
        cache_dir: file.cache_dir,
        reconnect_min_secs: file.reconnect_min_secs,
        reconnect_max_secs: file.reconnect_max_secs,
    })
}

fn init_logging(logfile: Option<&std::path::Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fsync_transport=info,fsync_apply=info"));
    match logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open logfile {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_config(path: &std::path::Path) -> Cli {
        Cli {
            config: path.to_path_buf(),
            hub: None,
            token: None,
            logfile: None,
        }
    }

    #[test]
    fn config_requires_existing_tls_material() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            "hubAddr = \"hub.example:9443\"\ncert = \"/nope.crt\"\nkey = \"/nope.key\"\n",
        )
        .unwrap();

        let err = load_config(&cli_with_config(&path)).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn cli_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("a.crt");
        let key = dir.path().join("a.key");
        std::fs::write(&cert, "x").unwrap();
        std::fs::write(&key, "x").unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            format!(
                "hubAddr = \"file-hub:9443\"\ntoken = \"file-token\"\ncert = {:?}\nkey = {:?}\n",
                cert, key
            ),
        )
        .unwrap();

        let mut cli = cli_with_config(&path);
        cli.hub = Some("cli-hub:9443".to_string());
        cli.token = Some("cli-token".to_string());

        let config = load_config(&cli).unwrap();
        assert_eq!(config.hub_addr, "cli-hub:9443");
        assert_eq!(config.token, "cli-token");
        assert_eq!(config.reconnect_min_secs, 2);
    }

    #[test]
    fn missing_hub_address_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("a.crt");
        let key = dir.path().join("a.key");
        std::fs::write(&cert, "x").unwrap();
        std::fs::write(&key, "x").unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, format!("cert = {:?}\nkey = {:?}\n", cert, key)).unwrap();

        let err = load_config(&cli_with_config(&path)).unwrap_err();
        assert!(err.to_string().contains("hub address"));
    }
}
