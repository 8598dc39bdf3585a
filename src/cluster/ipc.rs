//! Master ↔ worker message protocol.
//!
//! Messages are newline-delimited JSON on the worker's stdin (master → worker)
//! and stdout (worker → master). The wire shapes are
//! `{"type":"app","message":"exit","status":N}` and `{"type":"ready"}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

/// A control message exchanged between master and worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub enum IpcMessage {
    /// Exit request. From the master: shut down. From a worker: the master
    /// exits with `status`.
    Exit { status: Option<i32> },
    /// Worker finished binding its listeners.
    Ready,
}

/// Errors from the IPC channel.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IPC I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed IPC message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<i32>,
}

impl TryFrom<WireMessage> for IpcMessage {
    type Error = String;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        match (wire.kind.as_str(), wire.message.as_deref()) {
            ("ready", _) => Ok(IpcMessage::Ready),
            ("app", Some("exit")) => Ok(IpcMessage::Exit { status: wire.status }),
            (kind, message) => Err(format!("unknown message type={kind} message={message:?}")),
        }
    }
}

impl From<IpcMessage> for WireMessage {
    fn from(msg: IpcMessage) -> Self {
        match msg {
            IpcMessage::Ready => WireMessage {
                kind: "ready".to_string(),
                message: None,
                status: None,
            },
            IpcMessage::Exit { status } => WireMessage {
                kind: "app".to_string(),
                message: Some("exit".to_string()),
                status,
            },
        }
    }
}

/// Encode one message as a JSON line.
pub fn encode(msg: IpcMessage) -> Result<String, IpcError> {
    let mut line = serde_json::to_string(&msg)?;
    line.push('\n');
    Ok(line)
}

/// Decode one JSON line.
pub fn decode(line: &str) -> Result<IpcMessage, IpcError> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Reads messages from a line-oriented stream.
pub struct IpcReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> IpcReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(inner).lines(),
        }
    }

    /// Next well-formed message, or `None` at end of stream.
    ///
    /// Lines that are not protocol messages are logged and skipped.
    pub async fn next_message(&mut self) -> Result<Option<IpcMessage>, IpcError> {
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match decode(&line) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => tracing::debug!(error = %e, line = %line, "Ignoring non-protocol line"),
            }
        }
        Ok(None)
    }
}

/// Writes messages to a stream, one JSON line each.
pub struct IpcWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> IpcWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, msg: IpcMessage) -> Result<(), IpcError> {
        let line = encode(msg)?;
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shapes() {
        assert_eq!(encode(IpcMessage::Ready).unwrap(), "{\"type\":\"ready\"}\n");
        assert_eq!(
            encode(IpcMessage::Exit { status: None }).unwrap(),
            "{\"type\":\"app\",\"message\":\"exit\"}\n"
        );
        assert_eq!(
            encode(IpcMessage::Exit { status: Some(3) }).unwrap(),
            "{\"type\":\"app\",\"message\":\"exit\",\"status\":3}\n"
        );
    }

    #[test]
    fn test_decode_rejects_unknown_shapes() {
        assert!(decode("{\"type\":\"app\",\"message\":\"reload\"}").is_err());
        assert!(decode("{\"type\":\"log\"}").is_err());
        assert!(decode("not json").is_err());
        assert_eq!(
            decode("{\"type\":\"app\",\"message\":\"exit\",\"status\":7}").unwrap(),
            IpcMessage::Exit { status: Some(7) }
        );
    }

    #[tokio::test]
    async fn test_reader_skips_noise() {
        let input: &[u8] = b"hello\n\n{\"type\":\"ready\"}\n{\"type\":\"app\",\"message\":\"exit\"}\n";
        let mut reader = IpcReader::new(input);
        assert_eq!(reader.next_message().await.unwrap(), Some(IpcMessage::Ready));
        assert_eq!(
            reader.next_message().await.unwrap(),
            Some(IpcMessage::Exit { status: None })
        );
        assert_eq!(reader.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_writer_round_trips_through_reader() {
        let mut buf = Vec::new();
        IpcWriter::new(&mut buf).send(IpcMessage::Ready).await.unwrap();
        let mut reader = IpcReader::new(buf.as_slice());
        assert_eq!(reader.next_message().await.unwrap(), Some(IpcMessage::Ready));
    }
}
