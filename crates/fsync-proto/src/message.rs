// message.rs — Every frame the control plane speaks.
//
// Tag values are part of the wire contract and never reused. HELLO flows
// agent→hub, HELLO_ACK hub→agent; TASK_* and APPLY_* frames drive one sync
// task; LISTING answers a TASK_BEGIN that requested an agent-side
// enumeration (the mirror fast-delete correction pass).

use fsync_delta::SyncOp;
use fsync_manifest::{EntryKind, ManifestEntry};

use crate::error::ProtoError;
use crate::wire::{Reader, Writer};

/// Protocol version spoken by this build.
pub const PROTO_VERSION: u32 = 1;

mod tag {
    pub const HELLO: u8 = 0x01;
    pub const HELLO_ACK: u8 = 0x02;
    pub const HEARTBEAT: u8 = 0x03;
    pub const TASK_BEGIN: u8 = 0x04;
    pub const NEED_CHUNKS: u8 = 0x05;
    pub const CHUNK_DATA: u8 = 0x06;
    pub const APPLY_OP: u8 = 0x07;
    pub const APPLY_ACK: u8 = 0x08;
    pub const TASK_END: u8 = 0x09;
    pub const EVENT: u8 = 0x0A;
    pub const LISTING: u8 = 0x0B;
}

/// One entry of an agent-side enumeration, convertible to a
/// [`ManifestEntry`] on the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mtime_ms: i64,
    pub mode: u32,
    pub content_hash: String,
    pub symlink_target: String,
}

impl ListingEntry {
    pub fn into_manifest_entry(self) -> (String, ManifestEntry) {
        let entry = match self.kind {
            EntryKind::Dir => ManifestEntry::dir(self.mtime_ms, self.mode),
            EntryKind::Symlink => ManifestEntry::symlink(self.symlink_target, self.mtime_ms),
            EntryKind::File => ManifestEntry {
                kind: EntryKind::File,
                size: self.size,
                mtime_ms: self.mtime_ms,
                mode: self.mode,
                symlink_target: None,
                content_hash: self.content_hash,
                // An enumeration reports whole-file hashes only; chunk
                // detail is not needed for RM decisions.
                chunk_hashes: Vec::new(),
            },
        };
        (self.path, entry)
    }
}

/// A decoded control-plane frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Agent → hub, first frame of every session.
    Hello {
        proto_version: u32,
        agent_version: String,
        os: String,
        arch: String,
        /// Pairing token; empty once a fingerprint is pinned.
        token: String,
    },

    /// Hub → agent, accepting or rejecting the session.
    HelloAck {
        proto_version: u32,
        accepted: bool,
        reason: String,
    },

    /// Agent → hub keepalive.
    Heartbeat { seq: u64 },

    /// Hub → agent: a task starts. `enumerate` asks the agent to walk its
    /// target and reply with LISTING frames instead of receiving ops.
    TaskBegin {
        task_id: i64,
        project: String,
        target_path: String,
        /// Abort the whole task on the first hard error (mirror); keep
        /// going past per-path errors otherwise (overlay).
        abort_on_error: bool,
        preserve_mode: bool,
        preserve_mtime: bool,
        enumerate: bool,
        op_count: u32,
    },

    /// Agent → hub: target enumeration slice. `done` marks the last slice.
    Listing {
        task_id: i64,
        entries: Vec<ListingEntry>,
        done: bool,
    },

    /// Hub → agent: one operation of the plan.
    ApplyOp {
        task_id: i64,
        index: u32,
        op: SyncOp,
    },

    /// Agent → hub: chunk hashes it does not hold for the current PUT.
    NeedChunks { task_id: i64, hashes: Vec<String> },

    /// Hub → agent: one chunk's bytes.
    ChunkData {
        task_id: i64,
        hash: String,
        data: Vec<u8>,
    },

    /// Agent → hub: outcome of one operation.
    ApplyAck {
        task_id: i64,
        index: u32,
        ok: bool,
        path: String,
        errno: u32,
        message: String,
    },

    /// Either direction: the task is over. Hub → agent after the last op;
    /// agent → hub confirming final state.
    TaskEnd {
        task_id: i64,
        ok: bool,
        error: String,
    },

    /// Hub-local notification relayed to interested agents; best-effort.
    Event { kind: String, detail: String },
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::Hello { .. } => tag::HELLO,
            Message::HelloAck { .. } => tag::HELLO_ACK,
            Message::Heartbeat { .. } => tag::HEARTBEAT,
            Message::TaskBegin { .. } => tag::TASK_BEGIN,
            Message::NeedChunks { .. } => tag::NEED_CHUNKS,
            Message::ChunkData { .. } => tag::CHUNK_DATA,
            Message::ApplyOp { .. } => tag::APPLY_OP,
            Message::ApplyAck { .. } => tag::APPLY_ACK,
            Message::TaskEnd { .. } => tag::TASK_END,
            Message::Event { .. } => tag::EVENT,
            Message::Listing { .. } => tag::LISTING,
        }
    }

    /// Encode the payload (everything after the tag byte).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Message::Hello {
                proto_version,
                agent_version,
                os,
                arch,
                token,
            } => {
                w.put_u32(*proto_version);
                w.put_str(agent_version);
                w.put_str(os);
                w.put_str(arch);
                w.put_str(token);
            }
            Message::HelloAck {
                proto_version,
                accepted,
                reason,
            } => {
                w.put_u32(*proto_version);
                w.put_bool(*accepted);
                w.put_str(reason);
            }
            Message::Heartbeat { seq } => {
                w.put_u64(*seq);
            }
            Message::TaskBegin {
                task_id,
                project,
                target_path,
                abort_on_error,
                preserve_mode,
                preserve_mtime,
                enumerate,
                op_count,
            } => {
                w.put_i64(*task_id);
                w.put_str(project);
                w.put_str(target_path);
                w.put_bool(*abort_on_error);
                w.put_bool(*preserve_mode);
                w.put_bool(*preserve_mtime);
                w.put_bool(*enumerate);
                w.put_u32(*op_count);
            }
            Message::Listing {
                task_id,
                entries,
                done,
            } => {
                w.put_i64(*task_id);
                w.put_bool(*done);
                w.put_u32(entries.len() as u32);
                for e in entries {
                    w.put_str(&e.path);
                    w.put_u8(encode_kind(e.kind));
                    w.put_u64(e.size);
                    w.put_i64(e.mtime_ms);
                    w.put_u32(e.mode);
                    w.put_str(&e.content_hash);
                    w.put_str(&e.symlink_target);
                }
            }
            Message::ApplyOp { task_id, index, op } => {
                w.put_i64(*task_id);
                w.put_u32(*index);
                encode_op(&mut w, op);
            }
            Message::NeedChunks { task_id, hashes } => {
                w.put_i64(*task_id);
                w.put_u32(hashes.len() as u32);
                for h in hashes {
                    w.put_str(h);
                }
            }
            Message::ChunkData {
                task_id,
                hash,
                data,
            } => {
                w.put_i64(*task_id);
                w.put_str(hash);
                w.put_bytes(data);
            }
            Message::ApplyAck {
                task_id,
                index,
                ok,
                path,
                errno,
                message,
            } => {
                w.put_i64(*task_id);
                w.put_u32(*index);
                w.put_bool(*ok);
                w.put_str(path);
                w.put_u32(*errno);
                w.put_str(message);
            }
            Message::TaskEnd { task_id, ok, error } => {
                w.put_i64(*task_id);
                w.put_bool(*ok);
                w.put_str(error);
            }
            Message::Event { kind, detail } => {
                w.put_str(kind);
                w.put_str(detail);
            }
        }
        w.into_bytes()
    }

    /// Decode a payload for a known tag.
    pub fn decode(tag_byte: u8, payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = Reader::new(payload);
        let msg = match tag_byte {
            tag::HELLO => Message::Hello {
                proto_version: r.get_u32("hello.proto_version")?,
                agent_version: r.get_str("hello.agent_version")?,
                os: r.get_str("hello.os")?,
                arch: r.get_str("hello.arch")?,
                token: r.get_str("hello.token")?,
            },
            tag::HELLO_ACK => Message::HelloAck {
                proto_version: r.get_u32("hello_ack.proto_version")?,
                accepted: r.get_bool("hello_ack.accepted")?,
                reason: r.get_str("hello_ack.reason")?,
            },
            tag::HEARTBEAT => Message::Heartbeat {
                seq: r.get_u64("heartbeat.seq")?,
            },
            tag::TASK_BEGIN => Message::TaskBegin {
                task_id: r.get_i64("task_begin.task_id")?,
                project: r.get_str("task_begin.project")?,
                target_path: r.get_str("task_begin.target_path")?,
                abort_on_error: r.get_bool("task_begin.abort_on_error")?,
                preserve_mode: r.get_bool("task_begin.preserve_mode")?,
                preserve_mtime: r.get_bool("task_begin.preserve_mtime")?,
                enumerate: r.get_bool("task_begin.enumerate")?,
                op_count: r.get_u32("task_begin.op_count")?,
            },
            tag::LISTING => {
                let task_id = r.get_i64("listing.task_id")?;
                let done = r.get_bool("listing.done")?;
                let count = r.get_u32("listing.count")?;
                let mut entries = Vec::with_capacity(count.min(65_536) as usize);
                for _ in 0..count {
                    entries.push(ListingEntry {
                        path: r.get_str("listing.path")?,
                        kind: decode_kind(r.get_u8("listing.kind")?)?,
                        size: r.get_u64("listing.size")?,
                        mtime_ms: r.get_i64("listing.mtime")?,
                        mode: r.get_u32("listing.mode")?,
                        content_hash: r.get_str("listing.hash")?,
                        symlink_target: r.get_str("listing.symlink")?,
                    });
                }
                Message::Listing {
                    task_id,
                    entries,
                    done,
                }
            }
            tag::APPLY_OP => {
                let task_id = r.get_i64("apply_op.task_id")?;
                let index = r.get_u32("apply_op.index")?;
                let op = decode_op(&mut r)?;
                Message::ApplyOp { task_id, index, op }
            }
            tag::NEED_CHUNKS => {
                let task_id = r.get_i64("need_chunks.task_id")?;
                let count = r.get_u32("need_chunks.count")?;
                let mut hashes = Vec::with_capacity(count.min(65_536) as usize);
                for _ in 0..count {
                    hashes.push(r.get_str("need_chunks.hash")?);
                }
                Message::NeedChunks { task_id, hashes }
            }
            tag::CHUNK_DATA => Message::ChunkData {
                task_id: r.get_i64("chunk_data.task_id")?,
                hash: r.get_str("chunk_data.hash")?,
                data: r.get_bytes("chunk_data.data")?,
            },
            tag::APPLY_ACK => Message::ApplyAck {
                task_id: r.get_i64("apply_ack.task_id")?,
                index: r.get_u32("apply_ack.index")?,
                ok: r.get_bool("apply_ack.ok")?,
                path: r.get_str("apply_ack.path")?,
                errno: r.get_u32("apply_ack.errno")?,
                message: r.get_str("apply_ack.message")?,
            },
            tag::TASK_END => Message::TaskEnd {
                task_id: r.get_i64("task_end.task_id")?,
                ok: r.get_bool("task_end.ok")?,
                error: r.get_str("task_end.error")?,
            },
            tag::EVENT => Message::Event {
                kind: r.get_str("event.kind")?,
                detail: r.get_str("event.detail")?,
            },
            other => return Err(ProtoError::UnknownTag(other)),
        };
        Ok(msg)
    }
}

fn encode_kind(kind: EntryKind) -> u8 {
    match kind {
        EntryKind::File => 0,
        EntryKind::Dir => 1,
        EntryKind::Symlink => 2,
    }
}

fn decode_kind(v: u8) -> Result<EntryKind, ProtoError> {
    match v {
        0 => Ok(EntryKind::File),
        1 => Ok(EntryKind::Dir),
        2 => Ok(EntryKind::Symlink),
        other => Err(ProtoError::InvalidValue {
            context: "listing.kind",
            value: other as u64,
        }),
    }
}

mod opcode {
    pub const MKDIR: u8 = 1;
    pub const PUT: u8 = 2;
    pub const CHMOD: u8 = 3;
    pub const UTIME: u8 = 4;
    pub const SYMLINK: u8 = 5;
    pub const RM: u8 = 6;
    pub const RMDIR: u8 = 7;
}

fn encode_op(w: &mut Writer, op: &SyncOp) {
    match op {
        SyncOp::Mkdir { path, mode } => {
            w.put_u8(opcode::MKDIR);
            w.put_str(path);
            w.put_u32(*mode);
        }
        SyncOp::Put {
            path,
            size,
            mode,
            mtime_ms,
            content_hash,
            chunk_hashes,
        } => {
            w.put_u8(opcode::PUT);
            w.put_str(path);
            w.put_u64(*size);
            w.put_u32(*mode);
            w.put_i64(*mtime_ms);
            w.put_str(content_hash);
            w.put_u32(chunk_hashes.len() as u32);
            for h in chunk_hashes {
                w.put_str(h);
            }
        }
        SyncOp::Chmod { path, mode } => {
            w.put_u8(opcode::CHMOD);
            w.put_str(path);
            w.put_u32(*mode);
        }
        SyncOp::Utime { path, mtime_ms } => {
            w.put_u8(opcode::UTIME);
            w.put_str(path);
            w.put_i64(*mtime_ms);
        }
        SyncOp::Symlink { path, target } => {
            w.put_u8(opcode::SYMLINK);
            w.put_str(path);
            w.put_str(target);
        }
        SyncOp::Rm { path } => {
            w.put_u8(opcode::RM);
            w.put_str(path);
        }
        SyncOp::Rmdir { path } => {
            w.put_u8(opcode::RMDIR);
            w.put_str(path);
        }
    }
}

fn decode_op(r: &mut Reader<'_>) -> Result<SyncOp, ProtoError> {
    let code = r.get_u8("op.code")?;
    let op = match code {
        opcode::MKDIR => SyncOp::Mkdir {
            path: r.get_str("op.path")?,
            mode: r.get_u32("op.mode")?,
        },
        opcode::PUT => {
            let path = r.get_str("op.path")?;
            let size = r.get_u64("op.size")?;
            let mode = r.get_u32("op.mode")?;
            let mtime_ms = r.get_i64("op.mtime")?;
            let content_hash = r.get_str("op.content_hash")?;
            let count = r.get_u32("op.chunk_count")?;
            let mut chunk_hashes = Vec::with_capacity(count.min(65_536) as usize);
            for _ in 0..count {
                chunk_hashes.push(r.get_str("op.chunk_hash")?);
            }
            SyncOp::Put {
                path,
                size,
                mode,
                mtime_ms,
                content_hash,
                chunk_hashes,
            }
        }
        opcode::CHMOD => SyncOp::Chmod {
            path: r.get_str("op.path")?,
            mode: r.get_u32("op.mode")?,
        },
        opcode::UTIME => SyncOp::Utime {
            path: r.get_str("op.path")?,
            mtime_ms: r.get_i64("op.mtime")?,
        },
        opcode::SYMLINK => SyncOp::Symlink {
            path: r.get_str("op.path")?,
            target: r.get_str("op.target")?,
        },
        opcode::RM => SyncOp::Rm {
            path: r.get_str("op.path")?,
        },
        opcode::RMDIR => SyncOp::Rmdir {
            path: r.get_str("op.path")?,
        },
        other => {
            return Err(ProtoError::InvalidValue {
                context: "op.code",
                value: other as u64,
            })
        }
    };
    Ok(op)
}
