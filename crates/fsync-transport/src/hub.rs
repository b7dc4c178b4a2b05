// hub.rs — Listener, session registry, and the scheduler's executor.
//
// One session task per connected agent. The TLS accept path extracts the
// client certificate fingerprint and hands it to `serve_stream`, which
// runs the hello/pairing exchange and then the frame loop. Inbound frames
// flow through a reader task into a channel so the loop can wait on
// scheduler commands, inbound frames, and the heartbeat deadline at once.
//
// A task exchange is strictly sequential per session: TASK_BEGIN, then
// per op APPLY_OP → (NEED_CHUNKS → CHUNK_DATA…)* → APPLY_ACK, then
// TASK_END both ways. The per-pair worker upstream guarantees there is
// never more than one exchange in flight per node.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use fsync_events::{EventBus, EventKind};
use fsync_ignore::IgnoreSet;
use fsync_journal::ErrorCode;
use fsync_manifest::Manifest;
use fsync_proto::{read_frame, write_frame, Message, PROTO_VERSION};
use fsync_registry::{authorize, cert_fingerprint, NodeStore, PairingDecision};
use fsync_sched::{ExecuteOutcome, ExecuteRequest, ExecuteFailure, TaskExecutor};

use crate::error::TransportError;
use crate::HEARTBEAT_TIMEOUT_SECS;

/// What every session needs from the rest of the hub.
#[derive(Clone)]
pub struct SessionDeps {
    pub nodes: NodeStore,
    pub events: EventBus,
    /// Wakes pending scheduler work when a node comes online.
    pub node_online_tx: mpsc::UnboundedSender<String>,
}

enum SessionCommand {
    Execute {
        req: ExecuteRequest,
        reply: oneshot::Sender<Result<ExecuteOutcome, ExecuteFailure>>,
    },
    Enumerate {
        target_path: String,
        ignore: IgnoreSet,
        reply: oneshot::Sender<Result<Manifest, ExecuteFailure>>,
    },
}

/// The hub's side of the control plane: session registry + listener.
pub struct HubTransport {
    deps: SessionDeps,
    sessions: RwLock<HashMap<String, mpsc::Sender<SessionCommand>>>,
}

impl HubTransport {
    pub fn new(deps: SessionDeps) -> Arc<Self> {
        Arc::new(Self {
            deps,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn connected_nodes(&self) -> Vec<String> {
        self.sessions
            .read()
            .expect("session map poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Accept loop over a bound listener.
    pub async fn listen(
        self: Arc<Self>,
        listener: TcpListener,
        acceptor: TlsAcceptor,
        token: CancellationToken,
    ) {
        loop {
            let accepted = tokio::select! {
                _ = token.cancelled() => return,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let hub = self.clone();
            let acceptor = acceptor.clone();
            let conn_token = token.child_token();
            tokio::spawn(async move {
                let tls = match acceptor.accept(stream).await {
                    Ok(tls) => tls,
                    Err(e) => {
                        tracing::warn!(peer = %peer, error = %e, "TLS handshake failed");
                        return;
                    }
                };
                let Some(cert) = tls
                    .get_ref()
                    .1
                    .peer_certificates()
                    .and_then(|certs| certs.first().cloned())
                else {
                    tracing::warn!(peer = %peer, "no client certificate presented");
                    return;
                };
                let fingerprint = cert_fingerprint(cert.as_ref());
                if let Err(e) = hub.serve_stream(tls, &fingerprint, conn_token).await {
                    tracing::debug!(peer = %peer, error = %e, "session ended with error");
                }
            });
        }
    }

    /// Run one session whose peer presented `fingerprint`. Public so the
    /// handshake and task protocol can be exercised over any stream.
    pub async fn serve_stream<S>(
        &self,
        stream: S,
        fingerprint: &str,
        token: CancellationToken,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (rd, mut wr) = tokio::io::split(stream);

        // Reader task: frames in, until the peer goes away.
        let (in_tx, mut in_rx) = mpsc::channel::<Message>(64);
        let reader = tokio::spawn(async move {
            let mut rd = rd;
            loop {
                match read_frame(&mut rd).await {
                    Ok(frame) => {
                        if in_tx.send(frame).await.is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        });

        // Hello, within a grace period.
        let hello = tokio::time::timeout(Duration::from_secs(10), in_rx.recv())
            .await
            .map_err(|_| TransportError::UnexpectedFrame {
                got: "timeout",
                expecting: "HELLO",
            })?
            .ok_or(TransportError::UnexpectedFrame {
                got: "eof",
                expecting: "HELLO",
            })?;
        let Message::Hello {
            proto_version,
            agent_version,
            token: pairing_token,
            ..
        } = hello
        else {
            return Err(TransportError::UnexpectedFrame {
                got: "non-hello frame",
                expecting: "HELLO",
            });
        };

        if proto_version != PROTO_VERSION {
            write_frame(
                &mut wr,
                &Message::HelloAck {
                    proto_version: PROTO_VERSION,
                    accepted: false,
                    reason: format!("unsupported protocol version {proto_version}"),
                },
            )
            .await?;
            reader.abort();
            return Ok(());
        }

        let node = match authorize(&self.deps.nodes, &pairing_token, fingerprint)? {
            PairingDecision::Accepted { node, newly_paired } => {
                if newly_paired {
                    tracing::info!(node = %node.name, "agent paired");
                }
                node
            }
            PairingDecision::PairingRequired { node_id } => {
                tracing::warn!(node = %node_id, "rejecting session: certificate does not match pin");
                write_frame(
                    &mut wr,
                    &Message::HelloAck {
                        proto_version: PROTO_VERSION,
                        accepted: false,
                        reason: ErrorCode::PairingRequired.to_string(),
                    },
                )
                .await?;
                reader.abort();
                return Ok(());
            }
            PairingDecision::UnknownAgent => {
                write_frame(
                    &mut wr,
                    &Message::HelloAck {
                        proto_version: PROTO_VERSION,
                        accepted: false,
                        reason: "unknown agent".to_string(),
                    },
                )
                .await?;
                reader.abort();
                return Ok(());
            }
        };

        write_frame(
            &mut wr,
            &Message::HelloAck {
                proto_version: PROTO_VERSION,
                accepted: true,
                reason: String::new(),
            },
        )
        .await?;

        self.deps.nodes.set_agent_version(&node.id, &agent_version)?;
        self.deps.nodes.touch_last_seen(&node.id)?;
        self.publish_node_event(&node.id);

        // Register and wake pending work.
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<SessionCommand>(1);
        self.sessions
            .write()
            .expect("session map poisoned")
            .insert(node.id.clone(), cmd_tx);
        let _ = self.deps.node_online_tx.send(node.id.clone());
        tracing::info!(node = %node.name, "agent session established");

        let result = self
            .session_loop(&node.id, &mut wr, &mut in_rx, &mut cmd_rx, &token)
            .await;

        // Teardown regardless of how the loop ended.
        self.sessions
            .write()
            .expect("session map poisoned")
            .remove(&node.id);
        reader.abort();
        let _ = self
            .deps
            .nodes
            .set_connection_status(&node.id, fsync_registry::ConnectionStatus::Disconnected);
        self.publish_node_event(&node.id);
        tracing::info!(node = %node.name, "agent session closed");
        result
    }

    async fn session_loop<W>(
        &self,
        node_id: &str,
        wr: &mut W,
        in_rx: &mut mpsc::Receiver<Message>,
        cmd_rx: &mut mpsc::Receiver<SessionCommand>,
        token: &CancellationToken,
    ) -> Result<(), TransportError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut last_frame = Instant::now();
        loop {
            let deadline = last_frame + Duration::from_secs(HEARTBEAT_TIMEOUT_SECS);
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(node = %node_id, "heartbeat timeout");
                    return Ok(());
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { return Ok(()) };
                    last_frame = Instant::now();
                    match cmd {
                        SessionCommand::Execute { req, reply } => {
                            let result = self.run_task_exchange(node_id, wr, in_rx, req).await;
                            let disconnect = matches!(result, Err(ref f) if f.code == ErrorCode::Proto);
                            let _ = reply.send(result);
                            if disconnect {
                                return Ok(());
                            }
                        }
                        SessionCommand::Enumerate { target_path, ignore, reply } => {
                            let result = self
                                .run_enumerate_exchange(node_id, wr, in_rx, &target_path, &ignore)
                                .await;
                            let disconnect = matches!(result, Err(ref f) if f.code == ErrorCode::Proto);
                            let _ = reply.send(result);
                            if disconnect {
                                return Ok(());
                            }
                        }
                    }
                }
                frame = in_rx.recv() => {
                    let Some(frame) = frame else { return Ok(()) };
                    last_frame = Instant::now();
                    // Any inbound frame counts as life.
                    let _ = self.deps.nodes.touch_last_seen(node_id);
                    match frame {
                        Message::Heartbeat { .. } => {}
                        other => {
                            tracing::warn!(node = %node_id, frame = other.tag(),
                                "unexpected frame outside a task exchange");
                        }
                    }
                }
            }
        }
    }

    /// TASK_BEGIN → ops → TASK_END, collecting acks.
    async fn run_task_exchange<W>(
        &self,
        node_id: &str,
        wr: &mut W,
        in_rx: &mut mpsc::Receiver<Message>,
        req: ExecuteRequest,
    ) -> Result<ExecuteOutcome, ExecuteFailure>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let task_id = req.task_id;
        write_frame(
            wr,
            &Message::TaskBegin {
                task_id,
                project: req.project.clone(),
                target_path: req.target_path.clone(),
                abort_on_error: req.abort_on_error,
                preserve_mode: req.preserve_mode,
                preserve_mtime: req.preserve_mtime,
                enumerate: false,
                op_count: req.ops.len() as u32,
            },
        )
        .await
        .map_err(|e| ExecuteFailure::proto(e.to_string()))?;

        let mut outcome = ExecuteOutcome::default();
        'ops: for (index, op) in req.ops.iter().enumerate() {
            write_frame(
                wr,
                &Message::ApplyOp {
                    task_id,
                    index: index as u32,
                    op: op.clone(),
                },
            )
            .await
            .map_err(|e| ExecuteFailure::proto(e.to_string()))?;

            loop {
                match self.next_task_frame(node_id, in_rx).await? {
                    Message::NeedChunks { hashes, .. } => {
                        let chunks = match req.chunks.fetch(&hashes) {
                            Ok(chunks) => chunks,
                            Err(e) => {
                                // Tell the agent the task is over so it
                                // does not sit waiting for chunk bytes.
                                let _ = write_frame(
                                    wr,
                                    &Message::TaskEnd {
                                        task_id,
                                        ok: false,
                                        error: format!("chunk fetch: {e}"),
                                    },
                                )
                                .await;
                                return Err(ExecuteFailure {
                                    code: ErrorCode::Eacces,
                                    message: format!("chunk fetch: {e}"),
                                });
                            }
                        };
                        for (hash, data) in chunks {
                            write_frame(wr, &Message::ChunkData { task_id, hash, data })
                                .await
                                .map_err(|e| ExecuteFailure::proto(e.to_string()))?;
                        }
                    }
                    Message::ApplyAck {
                        ok,
                        path,
                        errno,
                        message,
                        ..
                    } => {
                        if ok {
                            outcome.applied += 1;
                        } else {
                            outcome.failures.push(fsync_sched::executor::PathFailure {
                                path,
                                errno,
                                message,
                            });
                            if req.abort_on_error {
                                outcome.aborted = true;
                                break 'ops;
                            }
                        }
                        break;
                    }
                    Message::TaskEnd { ok, error, .. } => {
                        // The agent bailed out early.
                        return Err(ExecuteFailure {
                            code: if ok { ErrorCode::Proto } else { ErrorCode::Eacces },
                            message: if error.is_empty() {
                                "agent ended the task early".to_string()
                            } else {
                                error
                            },
                        });
                    }
                    other => {
                        return Err(ExecuteFailure::proto(format!(
                            "unexpected frame {:#x} during task",
                            other.tag()
                        )))
                    }
                }
            }
        }

        let hub_ok = outcome.ok();
        write_frame(
            wr,
            &Message::TaskEnd {
                task_id,
                ok: hub_ok,
                error: if hub_ok {
                    String::new()
                } else {
                    outcome.error_message()
                },
            },
        )
        .await
        .map_err(|e| ExecuteFailure::proto(e.to_string()))?;

        // The agent confirms its final state.
        loop {
            match self.next_task_frame(node_id, in_rx).await? {
                Message::TaskEnd { ok, error, .. } => {
                    if !ok && outcome.failures.is_empty() {
                        return Err(ExecuteFailure {
                            code: ErrorCode::Eacces,
                            message: error,
                        });
                    }
                    return Ok(outcome);
                }
                Message::ApplyAck { .. } => {
                    // Late ack from an aborted plan; ignore.
                }
                other => {
                    return Err(ExecuteFailure::proto(format!(
                        "unexpected frame {:#x} awaiting TASK_END",
                        other.tag()
                    )))
                }
            }
        }
    }

    /// Listing-only exchange: the agent walks its target and streams it
    /// back; the merged ignore set is applied hub-side.
    async fn run_enumerate_exchange<W>(
        &self,
        node_id: &str,
        wr: &mut W,
        in_rx: &mut mpsc::Receiver<Message>,
        target_path: &str,
        ignore: &IgnoreSet,
    ) -> Result<Manifest, ExecuteFailure>
    where
        W: AsyncWrite + Unpin + Send,
    {
        write_frame(
            wr,
            &Message::TaskBegin {
                task_id: 0,
                project: String::new(),
                target_path: target_path.to_string(),
                abort_on_error: false,
                preserve_mode: false,
                preserve_mtime: false,
                enumerate: true,
                op_count: 0,
            },
        )
        .await
        .map_err(|e| ExecuteFailure::proto(e.to_string()))?;

        let mut manifest = Manifest::new();
        loop {
            match self.next_task_frame(node_id, in_rx).await? {
                Message::Listing { entries, done, .. } => {
                    for entry in entries {
                        let (path, entry) = entry.into_manifest_entry();
                        if !ignore.is_ignored(&path, entry.is_dir()) {
                            manifest.insert(path, entry);
                        }
                    }
                    if done {
                        break;
                    }
                }
                Message::TaskEnd { ok: false, error, .. } => {
                    return Err(ExecuteFailure {
                        code: ErrorCode::Enoent,
                        message: error,
                    });
                }
                other => {
                    return Err(ExecuteFailure::proto(format!(
                        "unexpected frame {:#x} during enumeration",
                        other.tag()
                    )))
                }
            }
        }

        // Closing TASK_END from the agent.
        match self.next_task_frame(node_id, in_rx).await? {
            Message::TaskEnd { .. } => Ok(manifest),
            other => Err(ExecuteFailure::proto(format!(
                "unexpected frame {:#x} after enumeration",
                other.tag()
            ))),
        }
    }

    /// Next frame of the current exchange; heartbeats pass through.
    async fn next_task_frame(
        &self,
        node_id: &str,
        in_rx: &mut mpsc::Receiver<Message>,
    ) -> Result<Message, ExecuteFailure> {
        loop {
            let frame = tokio::time::timeout(
                Duration::from_secs(HEARTBEAT_TIMEOUT_SECS),
                in_rx.recv(),
            )
            .await
            .map_err(|_| ExecuteFailure::proto("agent silent during task"))?
            .ok_or_else(|| ExecuteFailure::proto("agent disconnected during task"))?;
            let _ = self.deps.nodes.touch_last_seen(node_id);
            match frame {
                Message::Heartbeat { .. } => {}
                other => return Ok(other),
            }
        }
    }

    fn publish_node_event(&self, node_id: &str) {
        if let Ok(Some(node)) = self.deps.nodes.get(node_id) {
            self.deps
                .events
                .publish(EventKind::SyncNodeEvent, node.redacted());
        }
    }
}

#[async_trait]
impl TaskExecutor for HubTransport {
    fn is_connected(&self, node_id: &str) -> bool {
        self.sessions
            .read()
            .expect("session map poisoned")
            .contains_key(node_id)
    }

    async fn execute(&self, req: ExecuteRequest) -> Result<ExecuteOutcome, ExecuteFailure> {
        let cmd_tx = self
            .sessions
            .read()
            .expect("session map poisoned")
            .get(&req.node_id)
            .cloned()
            .ok_or_else(|| ExecuteFailure::proto("node is not connected"))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(SessionCommand::Execute {
                req,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ExecuteFailure::proto("session closed"))?;
        reply_rx
            .await
            .map_err(|_| ExecuteFailure::proto("session dropped mid-task"))?
    }

    async fn enumerate(
        &self,
        node_id: &str,
        target_path: &str,
        ignore: &IgnoreSet,
    ) -> Result<Manifest, ExecuteFailure> {
        let cmd_tx = self
            .sessions
            .read()
            .expect("session map poisoned")
            .get(node_id)
            .cloned()
            .ok_or_else(|| ExecuteFailure::proto("node is not connected"))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(SessionCommand::Enumerate {
                target_path: target_path.to_string(),
                ignore: ignore.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| ExecuteFailure::proto("session closed"))?;
        reply_rx
            .await
            .map_err(|_| ExecuteFailure::proto("session dropped mid-enumeration"))?
    }
}
