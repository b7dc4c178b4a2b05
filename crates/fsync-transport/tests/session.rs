// session.rs — Handshake, pairing, and task exchanges.
//
// Most tests drive the protocol over an in-memory duplex pipe with an
// injected fingerprint, exactly what the TLS layer would have extracted.
// One test runs the real thing: TCP + rustls with the PEM fixtures.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fsync_delta::{compute_delta, DeltaOptions, SyncOp};
use fsync_events::EventBus;
use fsync_manifest::{Indexer, Manifest, ProjectSyncConfig, SymlinkPolicy, SyncStrategy};
use fsync_proto::{write_frame, Message};
use fsync_registry::{cert_fingerprint, ConnectionStatus, Node, NodeKind, NodeStore};
use fsync_sched::{ChunkResolver, ExecuteRequest, TaskExecutor};
use fsync_store::Db;
use fsync_transport::{AgentConfig, AgentSession, HubTransport, SessionDeps, TransportError};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

struct HubEnv {
    hub: Arc<HubTransport>,
    nodes: NodeStore,
    node: Node,
    token: String,
    online_rx: mpsc::UnboundedReceiver<String>,
}

fn hub_env() -> HubEnv {
    let nodes = NodeStore::new(Db::open_in_memory().unwrap());
    let node = nodes.create("edge-1", "test", NodeKind::Agent).unwrap();
    let token = node.agent_token.clone().unwrap();
    let (online_tx, online_rx) = mpsc::unbounded_channel();
    let hub = HubTransport::new(SessionDeps {
        nodes: nodes.clone(),
        events: EventBus::new(64),
        node_online_tx: online_tx,
    });
    HubEnv {
        hub,
        nodes,
        node,
        token,
        online_rx,
    }
}

fn agent(token: &str) -> AgentSession {
    AgentSession::new(AgentConfig {
        hub_addr: "unused:0".to_string(),
        token: token.to_string(),
        cert_path: fixture("agent1.crt"),
        key_path: fixture("agent1.key"),
        agent_version: "0.4.2-test".to_string(),
        cache_dir: None,
        reconnect_min_secs: 1,
        reconnect_max_secs: 4,
    })
}

async fn wait_connected(nodes: &NodeStore, id: &str) {
    for _ in 0..100 {
        let node = nodes.get(id).unwrap().unwrap();
        if node.connection_status == ConnectionStatus::Connected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("node never connected");
}

#[tokio::test(flavor = "multi_thread")]
async fn first_connect_pins_fingerprint() {
    let mut env = hub_env();
    let (hub_side, agent_side) = tokio::io::duplex(1 << 20);
    let token = CancellationToken::new();

    let hub = env.hub.clone();
    let session_token = token.clone();
    tokio::spawn(async move {
        let _ = hub.serve_stream(hub_side, "f1", session_token).await;
    });
    let ag = agent(&env.token);
    let agent_token = token.clone();
    tokio::spawn(async move {
        let _ = ag.run_stream(agent_side, agent_token).await;
    });

    wait_connected(&env.nodes, &env.node.id).await;
    // agent_version lands just after the status flip; poll for it.
    let mut node = env.nodes.get(&env.node.id).unwrap().unwrap();
    for _ in 0..100 {
        if node.agent_version.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        node = env.nodes.get(&env.node.id).unwrap().unwrap();
    }
    assert_eq!(node.agent_cert_fingerprint.as_deref(), Some("f1"));
    assert_eq!(node.agent_version.as_deref(), Some("0.4.2-test"));
    assert!(node.last_seen.is_some());

    // The scheduler got its wake-up.
    let woken = tokio::time::timeout(Duration::from_secs(2), env.online_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(woken, env.node.id);
    assert!(env.hub.is_connected(&env.node.id));
    token.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn same_token_different_cert_is_rejected() {
    let env = hub_env();
    let token = CancellationToken::new();

    // Pair with fingerprint f1.
    let (hub_side, agent_side) = tokio::io::duplex(1 << 20);
    let hub = env.hub.clone();
    let t = token.clone();
    tokio::spawn(async move {
        let _ = hub.serve_stream(hub_side, "f1", t).await;
    });
    let ag = agent(&env.token);
    let t = token.clone();
    tokio::spawn(async move {
        let _ = ag.run_stream(agent_side, t).await;
    });
    wait_connected(&env.nodes, &env.node.id).await;

    // An impostor holds the (still valid) token but a different key.
    let (hub_side, agent_side) = tokio::io::duplex(1 << 20);
    let hub = env.hub.clone();
    let t = token.clone();
    tokio::spawn(async move {
        let _ = hub.serve_stream(hub_side, "f2", t).await;
    });
    let impostor = agent(&env.token);
    let err = impostor.run_stream(agent_side, token.clone()).await;

    match err {
        Err(TransportError::Rejected { reason }) => {
            assert_eq!(reason, "PAIRING_REQUIRED");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    // The original pin is untouched.
    let node = env.nodes.get(&env.node.id).unwrap().unwrap();
    assert_eq!(node.agent_cert_fingerprint.as_deref(), Some("f1"));
    token.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_token_is_rejected() {
    let env = hub_env();
    let token = CancellationToken::new();
    let (hub_side, agent_side) = tokio::io::duplex(1 << 20);

    let hub = env.hub.clone();
    let t = token.clone();
    tokio::spawn(async move {
        let _ = hub.serve_stream(hub_side, "f9", t).await;
    });
    let stranger = agent("not-a-real-token");
    let err = stranger.run_stream(agent_side, token.clone()).await;
    assert!(matches!(err, Err(TransportError::Rejected { .. })));
    token.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn version_mismatch_is_rejected_in_hello() {
    let env = hub_env();
    let token = CancellationToken::new();
    let (hub_side, mut agent_side) = tokio::io::duplex(1 << 20);

    let hub = env.hub.clone();
    let t = token.clone();
    tokio::spawn(async move {
        let _ = hub.serve_stream(hub_side, "f1", t).await;
    });

    write_frame(
        &mut agent_side,
        &Message::Hello {
            proto_version: 9999,
            agent_version: "x".into(),
            os: "linux".into(),
            arch: "x86_64".into(),
            token: env.token.clone(),
        },
    )
    .await
    .unwrap();

    let ack = fsync_proto::read_frame(&mut agent_side).await.unwrap();
    match ack {
        Message::HelloAck { accepted, reason, .. } => {
            assert!(!accepted);
            assert!(reason.contains("version"));
        }
        other => panic!("expected HelloAck, got {:?}", other),
    }
    // No pairing happened.
    let node = env.nodes.get(&env.node.id).unwrap().unwrap();
    assert!(node.agent_cert_fingerprint.is_none());
    token.cancel();
}

fn plan_for(source: &Path) -> (Vec<SyncOp>, Arc<ChunkResolver>) {
    let mut cfg = ProjectSyncConfig::new("p", source.to_string_lossy());
    cfg.ignore_defaults = false;
    let ignore = cfg.ignore_set_for(None, false).unwrap();
    let manifest = Indexer::new(&cfg, &ignore).index_full().unwrap().manifest;
    let opts = DeltaOptions {
        strategy: SyncStrategy::Mirror,
        preserve_mode: true,
        preserve_mtime: true,
        ignore_permissions: false,
        symlink_policy: SymlinkPolicy::Ignore,
        mirror_clean_empty_dirs: true,
        mirror_sync_empty_dirs: false,
    };
    let plan = compute_delta(&manifest, &Manifest::new(), &opts);
    let chunks = Arc::new(ChunkResolver::from_manifest(source, &manifest));
    (plan.ops, chunks)
}

#[tokio::test(flavor = "multi_thread")]
async fn task_exchange_applies_ops_end_to_end() {
    let env = hub_env();
    let token = CancellationToken::new();
    let (hub_side, agent_side) = tokio::io::duplex(1 << 20);

    let hub = env.hub.clone();
    let t = token.clone();
    tokio::spawn(async move {
        let _ = hub.serve_stream(hub_side, "f1", t).await;
    });
    let ag = agent(&env.token);
    let t = token.clone();
    tokio::spawn(async move {
        let _ = ag.run_stream(agent_side, t).await;
    });
    wait_connected(&env.nodes, &env.node.id).await;

    let dirs = tempfile::tempdir().unwrap();
    let source = dirs.path().join("source");
    let target = dirs.path().join("target");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::write(source.join("a.txt"), b"A").unwrap();
    std::fs::create_dir_all(source.join("sub")).unwrap();
    std::fs::write(source.join("sub/b.txt"), b"BB").unwrap();

    let (ops, chunks) = plan_for(&source);
    let outcome = env
        .hub
        .execute(ExecuteRequest {
            task_id: 1,
            project: "p".to_string(),
            node_id: env.node.id.clone(),
            target_path: target.to_string_lossy().into_owned(),
            ops,
            abort_on_error: true,
            preserve_mode: true,
            preserve_mtime: true,
            chunks,
        })
        .await
        .unwrap();

    assert!(outcome.ok());
    assert_eq!(std::fs::read(target.join("a.txt")).unwrap(), b"A");
    assert_eq!(std::fs::read(target.join("sub/b.txt")).unwrap(), b"BB");
    token.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn enumeration_reports_target_contents() {
    let env = hub_env();
    let token = CancellationToken::new();
    let (hub_side, agent_side) = tokio::io::duplex(1 << 20);

    let hub = env.hub.clone();
    let t = token.clone();
    tokio::spawn(async move {
        let _ = hub.serve_stream(hub_side, "f1", t).await;
    });
    let ag = agent(&env.token);
    let t = token.clone();
    tokio::spawn(async move {
        let _ = ag.run_stream(agent_side, t).await;
    });
    wait_connected(&env.nodes, &env.node.id).await;

    let dirs = tempfile::tempdir().unwrap();
    let target = dirs.path().join("target");
    std::fs::create_dir_all(target.join("keep")).unwrap();
    std::fs::write(target.join("keep/x.txt"), b"X").unwrap();
    std::fs::write(target.join("stray.txt"), b"S").unwrap();

    let manifest = env
        .hub
        .enumerate(
            &env.node.id,
            &target.to_string_lossy(),
            &fsync_ignore::IgnoreSet::empty(),
        )
        .await
        .unwrap();

    assert!(manifest.contains("keep/x.txt"));
    assert!(manifest.contains("stray.txt"));
    assert!(manifest.get("keep").unwrap().is_dir());
    token.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn real_tls_pairing_pins_the_presented_certificate() {
    let env = hub_env();
    let token = CancellationToken::new();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_config =
        fsync_transport::tls::hub_server_config(&fixture("hub.crt"), &fixture("hub.key")).unwrap();
    let acceptor = tokio_rustls::TlsAcceptor::from(server_config);

    let hub = env.hub.clone();
    let t = token.clone();
    tokio::spawn(async move {
        hub.listen(listener, acceptor, t).await;
    });

    let session = AgentSession::new(AgentConfig {
        hub_addr: format!("127.0.0.1:{}", addr.port()),
        token: env.token.clone(),
        cert_path: fixture("agent1.crt"),
        key_path: fixture("agent1.key"),
        agent_version: "0.4.2-test".to_string(),
        cache_dir: None,
        reconnect_min_secs: 1,
        reconnect_max_secs: 2,
    });
    let t = token.clone();
    tokio::spawn(async move {
        session.run(t).await;
    });

    wait_connected(&env.nodes, &env.node.id).await;

    // The pinned fingerprint is the SHA-256 of the fixture certificate.
    let pem = std::fs::read(fixture("agent1.crt")).unwrap();
    let der = rustls_pemfile::certs(&mut pem.as_slice())
        .next()
        .unwrap()
        .unwrap();
    let expected = cert_fingerprint(der.as_ref());
    let node = env.nodes.get(&env.node.id).unwrap().unwrap();
    assert_eq!(node.agent_cert_fingerprint.as_deref(), Some(&expected[..]));

    // An impostor with the same token but a different key pair is turned
    // away at the hello, and the pin does not move.
    let impostor = AgentSession::new(AgentConfig {
        hub_addr: format!("127.0.0.1:{}", addr.port()),
        token: env.token.clone(),
        cert_path: fixture("agent2.crt"),
        key_path: fixture("agent2.key"),
        agent_version: "0.4.2-test".to_string(),
        cache_dir: None,
        reconnect_min_secs: 1,
        reconnect_max_secs: 2,
    });
    let t = token.clone();
    tokio::spawn(async move {
        impostor.run(t).await;
    });
    tokio::time::sleep(Duration::from_millis(800)).await;
    let node = env.nodes.get(&env.node.id).unwrap().unwrap();
    assert_eq!(node.agent_cert_fingerprint.as_deref(), Some(&expected[..]));
    token.cancel();
}
