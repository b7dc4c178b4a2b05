//! # fsync-hub
//!
//! The Fleetsync hub daemon: serves the administrative REST surface and
//! the UI WebSocket, listens for agents on the mTLS control plane, and
//! runs the sync scheduler over every configured project.
//!
//! Exit codes: 0 normal shutdown, 1 configuration error (flags, TOML,
//! TLS material), 2 port bind failure.

mod api;
mod config;
mod state;
mod ws;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use fsync_events::EventBus;
use fsync_journal::TaskJournal;
use fsync_manifest::{BaselineLedger, ManifestStore};
use fsync_queue::ChangeQueue;
use fsync_registry::NodeStore;
use fsync_sched::{ProjectConfigs, Scheduler, SchedulerConfig, SchedulerDeps};
use fsync_store::Db;
use fsync_transport::{tls, HubTransport, SessionDeps};

use crate::config::{hooks_by_project, load_hooks, HubConfig, ProjectConfigStore};
use crate::state::{AppState, WatcherManager};

/// Fleetsync hub.
#[derive(Parser)]
#[command(name = "fsync-hub", about = "Fleetsync hub daemon", version)]
struct Cli {
    /// Path to hub.toml.
    #[arg(long, default_value = "hub.toml")]
    config: PathBuf,

    /// REST bind address (overrides the config file).
    #[arg(long)]
    ip: Option<String>,

    /// REST port (overrides the config file).
    #[arg(long)]
    port: Option<u16>,

    /// Deployment hooks file.
    #[arg(long)]
    hooks: Option<PathBuf>,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    logfile: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.logfile.as_deref()) {
        eprintln!("fsync-hub: {e}");
        return ExitCode::from(1);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "cannot start runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Config(e)) => {
            tracing::error!(error = %e, "configuration error");
            ExitCode::from(1)
        }
        Err(RunError::Bind(e)) => {
            tracing::error!(error = %e, "cannot bind listen port");
            ExitCode::from(2)
        }
        Err(RunError::Fatal(e)) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::from(1)
        }
    }
}

enum RunError {
    Config(anyhow::Error),
    Bind(anyhow::Error),
    Fatal(anyhow::Error),
}

fn init_logging(logfile: Option<&std::path::Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fsync_sched=info,fsync_transport=info"));
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

async fn run(cli: Cli) -> Result<(), RunError> {
    // ── Configuration ─────────────────────────────────────────────
    let mut config = if cli.config.exists() {
        HubConfig::load(&cli.config).map_err(RunError::Config)?
    } else {
        tracing::warn!(path = %cli.config.display(), "no config file, using defaults");
        HubConfig::default()
    };
    if let Some(ip) = cli.ip {
        config.ip = ip;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    let mut hooks = config.hooks.clone();
    if let Some(path) = &cli.hooks {
        hooks = load_hooks(path).map_err(RunError::Config)?;
    }

    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("cannot create state dir {}", config.state_dir.display()))
        .map_err(RunError::Config)?;

    // ── State stores ──────────────────────────────────────────────
    let db = Db::open(&config.state_dir.join("hub.db"))
        .context("cannot open hub database")
        .map_err(RunError::Config)?;
    let nodes = NodeStore::new(db.clone());
    let journal = TaskJournal::new(db.clone());
    let manifest_store = Arc::new(
        ManifestStore::new(config.state_dir.join("manifests"))
            .context("cannot open manifest store")
            .map_err(RunError::Config)?,
    );
    let ledger = Arc::new(
        BaselineLedger::load(config.state_dir.join("ledger.json"))
            .context("cannot load baseline ledger")
            .map_err(RunError::Config)?,
    );
    let project_store = Arc::new(
        ProjectConfigStore::new(&config.state_dir).map_err(RunError::Config)?,
    );

    // TOML seeds the registry; runtime-updated configs win.
    let configs = ProjectConfigs::new();
    for project in &config.projects {
        configs.upsert(project.clone());
    }
    for project in project_store.load_all().map_err(RunError::Config)? {
        configs.upsert(project);
    }

    // ── Channels and buses ────────────────────────────────────────
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let (node_online_tx, node_online_rx) = mpsc::unbounded_channel();
    let events = EventBus::new(256);
    let queue = ChangeQueue::new(db, notify_tx, config.queue_degraded_depth);
    let shutdown = CancellationToken::new();

    // ── Control-plane transport ───────────────────────────────────
    let transport = HubTransport::new(SessionDeps {
        nodes: nodes.clone(),
        events: events.clone(),
        node_online_tx,
    });
    if let (Some(cert), Some(key)) = (&config.tls_cert, &config.tls_key) {
        let server_config = tls::hub_server_config(cert, key)
            .context("TLS material")
            .map_err(RunError::Config)?;
        let listener =
            tokio::net::TcpListener::bind((config.ip.as_str(), config.sync_port))
                .await
                .with_context(|| format!("control-plane port {}", config.sync_port))
                .map_err(RunError::Bind)?;
        tracing::info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            "control-plane listening");
        let acceptor = tokio_rustls::TlsAcceptor::from(server_config);
        tokio::spawn(transport.clone().listen(listener, acceptor, shutdown.child_token()));
    } else {
        tracing::warn!("no TLS material configured, control-plane listener disabled");
    }

    // ── Scheduler ─────────────────────────────────────────────────
    let scheduler = Scheduler::spawn(
        SchedulerDeps {
            queue: queue.clone(),
            configs: configs.clone(),
            journal: journal.clone(),
            store: manifest_store,
            ledger,
            events: events.clone(),
            executor: transport.clone(),
            config: SchedulerConfig {
                task_deadline_secs: config.task_deadline_secs,
                fold_case: config.fold_case,
                ..SchedulerConfig::default()
            },
        },
        notify_rx,
        node_online_rx,
        shutdown.child_token(),
    );

    // ── Watchers, and replay of changes that survived a restart ───
    let watchers = Arc::new(WatcherManager::new(queue.clone(), shutdown.child_token()));
    for project in configs.all() {
        watchers.reconcile(&project).await;
    }
    queue
        .replay()
        .context("queue replay")
        .map_err(RunError::Fatal)?;

    // ── REST + WebSocket ──────────────────────────────────────────
    let app_state = AppState {
        nodes,
        configs,
        queue,
        journal,
        events,
        transport,
        hooks: Arc::new(hooks_by_project(hooks)),
        auth_key: Arc::new(config.auth_key.clone()),
        project_store,
        watchers,
    };
    let router = api::router(app_state);

    let listener = tokio::net::TcpListener::bind((config.ip.as_str(), config.port))
        .await
        .with_context(|| format!("REST port {}", config.port))
        .map_err(RunError::Bind)?;
    tracing::info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
        "hub listening");

    // Ctrl-C cancels everything; the server drains, then the scheduler.
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            signal_shutdown.cancel();
        }
    });

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .context("server error")
        .map_err(RunError::Fatal)?;

    scheduler.shutdown().await;
    Ok(())
}
