// agent.rs — The agent's side of the control plane.
//
// A reconnect loop with capped backoff wraps one session at a time. The
// session sends HELLO (with the pairing token until a fingerprint is
// pinned hub-side), heartbeats every 15 s, and otherwise reacts to hub
// frames: enumeration requests walk the target, task exchanges drive the
// apply engine op by op. Chunk fetches are agent-driven and windowed so
// no more than 64 chunks are ever outstanding.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use fsync_apply::{Applier, ApplyOptions, ChunkCache};
use fsync_ignore::IgnoreSet;
use fsync_proto::{read_frame, write_frame, ListingEntry, Message, PROTO_VERSION};

use crate::error::TransportError;
use crate::tls::agent_client_config;
use crate::{HEARTBEAT_INTERVAL_SECS, LISTING_BATCH, MAX_CHUNKS_IN_FLIGHT};

/// Agent-side configuration, read from `agent.toml` plus CLI overrides.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// `host:port` of the hub's control-plane listener.
    pub hub_addr: String,
    /// Pairing token; may be empty once the hub has pinned us.
    pub token: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub agent_version: String,
    /// Chunk cache location; defaults to `<target>/.fsync-cache`.
    pub cache_dir: Option<PathBuf>,
    pub reconnect_min_secs: u64,
    pub reconnect_max_secs: u64,
}

impl AgentConfig {
    fn cache_for(&self, target: &std::path::Path) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| target.join(".fsync-cache"))
    }
}

/// One agent endpoint: connect loop plus session protocol.
pub struct AgentSession {
    config: AgentConfig,
}

impl AgentSession {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Reconnect until cancelled. Successful sessions reset the backoff.
    pub async fn run(&self, token: CancellationToken) {
        let mut delay = self.config.reconnect_min_secs.max(1);
        loop {
            if token.is_cancelled() {
                return;
            }
            match self.connect_once(&token).await {
                Ok(()) => {
                    delay = self.config.reconnect_min_secs.max(1);
                    tracing::info!("session ended, reconnecting");
                }
                Err(TransportError::Rejected { reason }) => {
                    // A rejection is not transient: pairing or version
                    // trouble needs the operator. Back off hard.
                    tracing::error!(%reason, "hub rejected the session");
                    delay = self.config.reconnect_max_secs.max(delay);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "connection failed");
                    delay = (delay * 2).min(self.config.reconnect_max_secs.max(1));
                }
            }
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
            }
        }
    }

    async fn connect_once(&self, token: &CancellationToken) -> Result<(), TransportError> {
        let tls_config = agent_client_config(&self.config.cert_path, &self.config.key_path)?;
        let tcp = TcpStream::connect(&self.config.hub_addr).await?;

        let host = self
            .config
            .hub_addr
            .rsplit_once(':')
            .map(|(h, _)| h)
            .unwrap_or(self.config.hub_addr.as_str());
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| TransportError::TlsConfig(format!("bad hub host name: {e}")))?;

        let stream = TlsConnector::from(tls_config)
            .connect(server_name, tcp)
            .await?;
        tracing::info!(hub = %self.config.hub_addr, "connected, sending hello");
        self.run_stream(stream, token.clone()).await
    }

    /// Speak the session protocol over an established stream. Public so
    /// the protocol can be tested over an in-memory pipe.
    pub async fn run_stream<S>(
        &self,
        stream: S,
        token: CancellationToken,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (rd, mut wr) = tokio::io::split(stream);

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

        write_frame(
            &mut wr,
            &Message::Hello {
                proto_version: PROTO_VERSION,
                agent_version: self.config.agent_version.clone(),
                os: std::env::consts::OS.to_string(),
                arch: std::env::consts::ARCH.to_string(),
                token: self.config.token.clone(),
            },
        )
        .await?;

        let ack = tokio::time::timeout(Duration::from_secs(10), in_rx.recv())
            .await
            .map_err(|_| TransportError::UnexpectedFrame {
                got: "timeout",
                expecting: "HELLO_ACK",
            })?
            .ok_or(TransportError::UnexpectedFrame {
                got: "eof",
                expecting: "HELLO_ACK",
            })?;
        match ack {
            Message::HelloAck { accepted: true, .. } => {}
            Message::HelloAck { reason, .. } => {
                reader.abort();
                return Err(TransportError::Rejected { reason });
            }
            _ => {
                reader.abort();
                return Err(TransportError::UnexpectedFrame {
                    got: "non-ack frame",
                    expecting: "HELLO_ACK",
                });
            }
        }
        tracing::info!("session accepted");

        let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut seq: u64 = 0;

        let result = loop {
            tokio::select! {
                _ = token.cancelled() => break Ok(()),
                _ = heartbeat.tick() => {
                    seq += 1;
                    if let Err(e) = write_frame(&mut wr, &Message::Heartbeat { seq }).await {
                        break Err(e.into());
                    }
                }
                frame = in_rx.recv() => {
                    let Some(frame) = frame else { break Ok(()) };
                    match frame {
                        Message::TaskBegin { task_id, target_path, enumerate: true, .. } => {
                            if let Err(e) = self.handle_enumerate(&mut wr, task_id, &target_path).await {
                                break Err(e);
                            }
                        }
                        Message::TaskBegin {
                            task_id,
                            target_path,
                            abort_on_error,
                            preserve_mode,
                            preserve_mtime,
                            op_count,
                            ..
                        } => {
                            let opts = ApplyOptions { abort_on_error, preserve_mode, preserve_mtime };
                            if let Err(e) = self
                                .handle_task(&mut wr, &mut in_rx, task_id, &target_path, opts, op_count)
                                .await
                            {
                                break Err(e);
                            }
                        }
                        Message::Event { kind, detail } => {
                            tracing::debug!(%kind, %detail, "hub event");
                        }
                        other => {
                            tracing::warn!(frame = other.tag(), "unexpected frame while idle");
                        }
                    }
                }
            }
        };

        reader.abort();
        result
    }

    /// Walk the target and stream it back in LISTING slices.
    async fn handle_enumerate<W>(
        &self,
        wr: &mut W,
        task_id: i64,
        target_path: &str,
    ) -> Result<(), TransportError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let target = PathBuf::from(target_path);
        let listing = tokio::task::spawn_blocking(move || {
            fsync_apply::enumerate_target(&target, &IgnoreSet::empty())
        })
        .await
        .expect("enumeration task panicked");

        let manifest = match listing {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(error = %e, "enumeration failed");
                write_frame(
                    wr,
                    &Message::TaskEnd {
                        task_id,
                        ok: false,
                        error: e.to_string(),
                    },
                )
                .await?;
                return Ok(());
            }
        };

        let entries: Vec<ListingEntry> = manifest
            .iter()
            .map(|(path, e)| ListingEntry {
                path: path.clone(),
                kind: e.kind,
                size: e.size,
                mtime_ms: e.mtime_ms,
                mode: e.mode,
                content_hash: e.content_hash.clone(),
                symlink_target: e.symlink_target.clone().unwrap_or_default(),
            })
            .collect();

        if entries.is_empty() {
            write_frame(
                wr,
                &Message::Listing {
                    task_id,
                    entries: Vec::new(),
                    done: true,
                },
            )
            .await?;
        } else {
            let batches: Vec<&[ListingEntry]> = entries.chunks(LISTING_BATCH).collect();
            let last = batches.len() - 1;
            for (i, batch) in batches.into_iter().enumerate() {
                write_frame(
                    wr,
                    &Message::Listing {
                        task_id,
                        entries: batch.to_vec(),
                        done: i == last,
                    },
                )
                .await?;
            }
        }

        write_frame(
            wr,
            &Message::TaskEnd {
                task_id,
                ok: true,
                error: String::new(),
            },
        )
        .await?;
        Ok(())
    }

    /// Receive and apply `op_count` operations, acking each.
    async fn handle_task<W>(
        &self,
        wr: &mut W,
        in_rx: &mut mpsc::Receiver<Message>,
        task_id: i64,
        target_path: &str,
        opts: ApplyOptions,
        op_count: u32,
    ) -> Result<(), TransportError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let target = PathBuf::from(target_path);
        // The target must exist before the applier binds to it; first
        // sync of a fresh node creates it.
        if let Err(e) = std::fs::create_dir_all(&target) {
            write_frame(
                wr,
                &Message::TaskEnd {
                    task_id,
                    ok: false,
                    error: format!("cannot create target {}: {e}", target.display()),
                },
            )
            .await?;
            return Ok(());
        }
        let applier = match ChunkCache::new(self.config.cache_for(&target))
            .and_then(|cache| Applier::new(&target, cache, opts))
        {
            Ok(applier) => applier,
            Err(e) => {
                write_frame(
                    wr,
                    &Message::TaskEnd {
                        task_id,
                        ok: false,
                        error: e.to_string(),
                    },
                )
                .await?;
                return Ok(());
            }
        };

        let mut local_ok = true;
        for _ in 0..op_count {
            let frame = match in_rx.recv().await {
                Some(frame) => frame,
                None => return Ok(()),
            };
            let (index, op) = match frame {
                Message::ApplyOp { index, op, .. } => (index, op),
                Message::TaskEnd { .. } => {
                    // The hub aborted the plan early.
                    write_frame(
                        wr,
                        &Message::TaskEnd {
                            task_id,
                            ok: false,
                            error: String::new(),
                        },
                    )
                    .await?;
                    return Ok(());
                }
                other => {
                    tracing::warn!(frame = other.tag(), "bad frame during task");
                    return Err(TransportError::UnexpectedFrame {
                        got: "unexpected",
                        expecting: "APPLY_OP",
                    });
                }
            };

            // Agent-driven chunk window: never more than
            // MAX_CHUNKS_IN_FLIGHT outstanding.
            let missing = applier.missing_chunks(&op);
            let mut fetch_err = None;
            'batches: for batch in missing.chunks(MAX_CHUNKS_IN_FLIGHT) {
                write_frame(
                    wr,
                    &Message::NeedChunks {
                        task_id,
                        hashes: batch.to_vec(),
                    },
                )
                .await?;
                for _ in 0..batch.len() {
                    match in_rx.recv().await {
                        Some(Message::ChunkData { hash, data, .. }) => {
                            if let Err(e) = applier.cache().put(&hash, &data) {
                                fetch_err = Some(e.to_string());
                                break 'batches;
                            }
                        }
                        Some(Message::TaskEnd { .. }) | None => {
                            // Hub gave up mid-stream.
                            write_frame(
                                wr,
                                &Message::TaskEnd {
                                    task_id,
                                    ok: false,
                                    error: "chunk stream interrupted".to_string(),
                                },
                            )
                            .await?;
                            return Ok(());
                        }
                        Some(other) => {
                            tracing::warn!(frame = other.tag(), "bad frame during chunk stream");
                            return Err(TransportError::UnexpectedFrame {
                                got: "unexpected",
                                expecting: "CHUNK_DATA",
                            });
                        }
                    }
                }
            }

            let ack = if let Some(err) = fetch_err {
                local_ok = false;
                Message::ApplyAck {
                    task_id,
                    index,
                    ok: false,
                    path: op.path().to_string(),
                    errno: 74, // EBADMSG
                    message: err,
                }
            } else {
                match applier.apply_op(&op) {
                    Ok(()) => Message::ApplyAck {
                        task_id,
                        index,
                        ok: true,
                        path: op.path().to_string(),
                        errno: 0,
                        message: String::new(),
                    },
                    Err(e) => {
                        local_ok = false;
                        Message::ApplyAck {
                            task_id,
                            index,
                            ok: false,
                            path: op.path().to_string(),
                            errno: e.errno(),
                            message: e.to_string(),
                        }
                    }
                }
            };
            write_frame(wr, &ack).await?;
        }

        // Hub's TASK_END, then ours.
        loop {
            match in_rx.recv().await {
                Some(Message::TaskEnd { .. }) => break,
                Some(Message::Heartbeat { .. }) => continue,
                Some(other) => {
                    tracing::warn!(frame = other.tag(), "unexpected frame awaiting TASK_END");
                    return Err(TransportError::UnexpectedFrame {
                        got: "unexpected",
                        expecting: "TASK_END",
                    });
                }
                None => return Ok(()),
            }
        }
        write_frame(
            wr,
            &Message::TaskEnd {
                task_id,
                ok: local_ok,
                error: String::new(),
            },
        )
        .await?;
        Ok(())
    }
}
