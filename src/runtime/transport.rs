//! Duplex frame pipes between the host and one sandboxed client.
//!
//! An [`Endpoint`] is one side of a pipe: an outbound sender and an inbound
//! receiver of JSON frames. [`Endpoint::pair`] connects two endpoints in
//! memory; [`spawn_line_transport`] backs an endpoint with any async byte
//! stream speaking newline-delimited JSON.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::envelope::Envelope;
use super::error::TransportError;

/// A single decoded JSON frame.
pub type Frame = Value;

/// Sending half of an endpoint. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Frame>,
}

impl Outbox {
    /// Encode and send an envelope. Fails only when the peer is gone.
    pub fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.send_frame(envelope.encode())
    }

    /// Send a raw frame.
    pub fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    /// Whether the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the receiving side has gone away, e.g. when a line
    /// transport's writer hits an I/O error.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Receiving half of an endpoint.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl Inbox {
    /// Next inbound frame, or `None` once the peer has closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next inbound frame decoded as an envelope, skipping malformed frames.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        loop {
            let frame = self.rx.recv().await?;
            match Envelope::decode(frame) {
                Ok(envelope) => return Some(envelope),
                Err(err) => warn!(error = %err, "dropping malformed frame"),
            }
        }
    }
}

/// One side of a duplex frame pipe.
#[derive(Debug)]
pub struct Endpoint {
    outbox: Outbox,
    inbox: Inbox,
}

impl Endpoint {
    /// Two endpoints wired to each other in memory.
    pub fn pair() -> (Endpoint, Endpoint) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Endpoint {
                outbox: Outbox { tx: a_tx },
                inbox: Inbox { rx: b_rx },
            },
            Endpoint {
                outbox: Outbox { tx: b_tx },
                inbox: Inbox { rx: a_rx },
            },
        )
    }

    /// Send an envelope to the peer.
    pub fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.outbox.send(envelope)
    }

    /// Receive the next frame from the peer.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.inbox.recv().await
    }

    /// Receive the next well-formed envelope from the peer.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        self.inbox.recv_envelope().await
    }

    /// Split into sending and receiving halves.
    pub fn split(self) -> (Outbox, Inbox) {
        (self.outbox, self.inbox)
    }
}

/// Back an endpoint with a newline-delimited JSON byte stream.
///
/// Spawns a reader task and a writer task on the current tokio runtime.
/// Lines that are not valid JSON are logged and skipped; blank lines are
/// ignored. The returned endpoint's inbox ends at EOF, and the writer stops
/// once every clone of the endpoint's outbox has been dropped.
pub fn spawn_line_transport<R, W>(reader: R, writer: W) -> Endpoint
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();

    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(&line) {
                        Ok(frame) => {
                            if in_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "dropping unparseable line"),
                    }
                }
                Ok(None) => {
                    debug!("line transport reached EOF");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "line transport read failed");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut writer = writer;
        while let Some(frame) = out_rx.recv().await {
            let mut line = frame.to_string();
            line.push('\n');
            if let Err(err) = writer.write_all(line.as_bytes()).await {
                warn!(error = %err, "line transport write failed");
                break;
            }
            if let Err(err) = writer.flush().await {
                warn!(error = %err, "line transport flush failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    Endpoint {
        outbox: Outbox { tx: out_tx },
        inbox: Inbox { rx: in_rx },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::envelope::Method;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn memory_pair_is_duplex() {
        let (a, mut b) = Endpoint::pair();
        a.send(&Envelope::notification(Method::Ready, json!({}))).unwrap();
        let envelope = b.recv_envelope().await.unwrap();
        assert_eq!(envelope.method(), Some(&Method::Ready));

        b.send(&Envelope::success(1, json!({}))).unwrap();
        let (_, mut inbox) = a.split();
        assert_eq!(inbox.recv_envelope().await.unwrap().id(), Some(1));
    }

    #[tokio::test]
    async fn closed_peer_fails_send() {
        let (a, b) = Endpoint::pair();
        drop(b);
        let err = a.send(&Envelope::notification(Method::Ping, json!({}))).unwrap_err();
        assert_eq!(err, TransportError::Closed);
    }

    #[tokio::test]
    async fn line_transport_frames_ndjson() {
        let (host_io, peer_io) = tokio::io::duplex(4096);
        let (host_read, host_write) = tokio::io::split(host_io);
        let mut endpoint = spawn_line_transport(host_read, host_write);

        let (peer_read, mut peer_write) = tokio::io::split(peer_io);
        peer_write
            .write_all(b"\nnot json\n{\"jsonrpc\":\"2.0\",\"method\":\"ui/ready\"}\n")
            .await
            .unwrap();

        let envelope = endpoint.recv_envelope().await.unwrap();
        assert_eq!(envelope.method(), Some(&Method::Ready));

        endpoint.send(&Envelope::success(4, json!({"ok": true}))).unwrap();
        let mut lines = BufReader::new(peer_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(Envelope::decode_str(&line).unwrap(), Envelope::success(4, json!({"ok": true})));
    }
}
