use std::collections::HashMap;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::frames::{read_multipart, write_multipart};
use super::strip_scheme;
use crate::protocol::error::{CourierError, Result};

/// Dealer-flavored client socket.
///
/// Owns one TCP connection per connected transport URI and an identity
/// announced to every peer. Which peer a message goes to is the caller's
/// decision ([`DealerSocket::send_to`]); replies from all peers arrive
/// interleaved through one inbound queue, so the owner can await readiness
/// on a single point regardless of how many endpoints are connected.
///
/// On connect the socket writes a single-frame greeting carrying its
/// identity, then reads multipart messages until the peer closes.
pub struct DealerSocket {
    identity: String,
    connections: HashMap<String, Connection>,
    inbound_tx: mpsc::UnboundedSender<Vec<Vec<u8>>>,
    inbound_rx: mpsc::UnboundedReceiver<Vec<Vec<u8>>>,
}

struct Connection {
    writer: tokio::net::tcp::OwnedWriteHalf,
    reader: JoinHandle<()>,
}

impl DealerSocket {
    pub fn new(identity: impl Into<String>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            identity: identity.into(),
            connections: HashMap::new(),
            inbound_tx,
            inbound_rx,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_connected(&self, uri: &str) -> bool {
        self.connections.contains_key(uri)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connects to a `tcp://host:port` URI, sends the identity greeting and
    /// starts reading replies. Connecting an already-connected URI is a
    /// no-op.
    pub async fn connect(&mut self, uri: &str) -> Result<()> {
        if self.connections.contains_key(uri) {
            return Ok(());
        }

        let addr = strip_scheme(uri);
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            CourierError::Connection(format!("failed to connect to {uri}: {e}"))
        })?;

        let (mut read_half, mut write_half) = stream.into_split();
        write_multipart(&mut write_half, &[self.identity.clone().into_bytes()]).await?;

        let tx = self.inbound_tx.clone();
        let peer = uri.to_string();
        let reader = tokio::spawn(async move {
            loop {
                match read_multipart(&mut read_half).await {
                    Ok(frames) => {
                        if tx.send(frames).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(peer = %peer, "dealer connection closed: {e}");
                        break;
                    }
                }
            }
        });

        self.connections.insert(
            uri.to_string(),
            Connection {
                writer: write_half,
                reader,
            },
        );

        Ok(())
    }

    /// Drops the connection to a URI. Safe to call for URIs that were
    /// never connected.
    pub fn disconnect(&mut self, uri: &str) {
        if let Some(conn) = self.connections.remove(uri) {
            conn.reader.abort();
        }
    }

    /// Writes one multipart message to the connection backing `uri`.
    pub async fn send_to(&mut self, uri: &str, frames: &[Vec<u8>]) -> Result<()> {
        let conn = self.connections.get_mut(uri).ok_or_else(|| {
            CourierError::Connection(format!("not connected to {uri}"))
        })?;

        write_multipart(&mut conn.writer, frames).await
    }

    /// Awaits the next inbound multipart message from any connection.
    ///
    /// Pends indefinitely while nothing arrives; never yields `None` while
    /// the socket is alive.
    pub async fn recv(&mut self) -> Option<Vec<Vec<u8>>> {
        self.inbound_rx.recv().await
    }

    /// Drains one pending inbound message without waiting.
    pub fn try_recv(&mut self) -> Option<Vec<Vec<u8>>> {
        self.inbound_rx.try_recv().ok()
    }

    /// Whether inbound messages are waiting, for callers that pump
    /// explicitly instead of awaiting readiness.
    pub fn has_pending(&self) -> bool {
        !self.inbound_rx.is_empty()
    }
}

impl Drop for DealerSocket {
    fn drop(&mut self) {
        for conn in self.connections.values() {
            conn.reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accepts one connection, checks the greeting, echoes every inbound
    /// multipart back with an extra tag frame.
    async fn spawn_echo_peer() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let greeting = read_multipart(&mut stream).await.unwrap();
            assert_eq!(greeting.len(), 1);
            assert!(!greeting[0].is_empty());

            while let Ok(mut frames) = read_multipart(&mut stream).await {
                frames.push(b"echoed".to_vec());
                write_multipart(&mut stream, &frames).await.unwrap();
            }
        });

        format!("tcp://{addr}")
    }

    #[tokio::test]
    async fn test_connect_send_recv() {
        let uri = spawn_echo_peer().await;
        let mut socket = DealerSocket::new("test-identity");

        socket.connect(&uri).await.unwrap();
        assert!(socket.is_connected(&uri));

        socket
            .send_to(&uri, &[b"a".to_vec(), b"b".to_vec()])
            .await
            .unwrap();

        let reply = socket.recv().await.unwrap();
        assert_eq!(reply, vec![b"a".to_vec(), b"b".to_vec(), b"echoed".to_vec()]);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let uri = spawn_echo_peer().await;
        let mut socket = DealerSocket::new("id");

        socket.connect(&uri).await.unwrap();
        socket.connect(&uri).await.unwrap();
        assert_eq!(socket.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_send_to_unconnected_uri_fails() {
        let mut socket = DealerSocket::new("id");
        let result = socket.send_to("tcp://127.0.0.1:1", &[b"x".to_vec()]).await;
        assert!(matches!(result, Err(CourierError::Connection(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let mut socket = DealerSocket::new("id");
        // port 1 is essentially never listening
        let result = socket.connect("tcp://127.0.0.1:1").await;
        assert!(result.is_err());
        assert!(!socket.is_connected("tcp://127.0.0.1:1"));
    }

    #[tokio::test]
    async fn test_disconnect_unknown_is_noop() {
        let mut socket = DealerSocket::new("id");
        socket.disconnect("tcp://127.0.0.1:9999");
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let mut socket = DealerSocket::new("id");
        assert!(socket.try_recv().is_none());
    }
}
