// codec.rs — Frame I/O over any async stream.
//
// Wire layout per frame:
//
//   +----------------+-----+------------------+
//   | u32 BE length  | tag | payload          |
//   +----------------+-----+------------------+
//
// The length covers the tag byte plus the payload. Frames above
// MAX_FRAME_LEN are rejected before any allocation, so a corrupt peer
// cannot make the process balloon.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtoError;
use crate::message::Message;

/// Largest accepted frame: one chunk (128 KiB) plus headroom for hashes
/// and paths, rounded far up. 16 MiB.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Write one message as a frame and flush it.
pub async fn write_frame<W>(writer: &mut W, msg: &Message) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
{
    let payload = msg.encode_payload();
    let len = payload.len() + 1;
    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut frame = Vec::with_capacity(4 + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.push(msg.tag());
    frame.extend_from_slice(&payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame, returning the decoded message.
pub async fn read_frame<R>(reader: &mut R) -> Result<Message, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(ProtoError::Truncated { context: "frame" });
    }
    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Message::decode(body[0], &body[1..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip_over_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024 * 1024);

        let msg = Message::Heartbeat { seq: 42 };
        write_frame(&mut a, &msg).await.unwrap();
        let got = read_frame(&mut b).await.unwrap();
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn back_to_back_frames_stay_delimited() {
        let (mut a, mut b) = tokio::io::duplex(1024 * 1024);

        let first = Message::Heartbeat { seq: 1 };
        let second = Message::Event {
            kind: "sync_task_event".into(),
            detail: "x".into(),
        };
        write_frame(&mut a, &first).await.unwrap();
        write_frame(&mut a, &second).await.unwrap();

        assert_eq!(read_frame(&mut b).await.unwrap(), first);
        assert_eq!(read_frame(&mut b).await.unwrap(), second);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let huge = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &huge)
            .await
            .unwrap();

        let err = read_frame(&mut b).await;
        assert!(matches!(err, Err(ProtoError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn closed_stream_reports_io_error() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(ProtoError::Io(_))));
    }
}
