use std::collections::HashMap;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::frames::read_multipart;
use super::strip_scheme;
use crate::protocol::error::{CourierError, Result};

/// One announce read off a subscriber socket.
#[derive(Debug, Clone)]
pub struct Announce {
    /// Service this subscriber was created for
    pub service: String,
    /// Host identity carried in the announce, scheme stripped
    pub host: String,
    /// Structured announce payload, undecoded
    pub payload: Vec<u8>,
}

/// Subscriber-flavored socket for one service's announce stream.
///
/// Connects to announcing hosts and reads `[host_identity, payload]`
/// multiparts. All subscribers of a process feed announces into one shared
/// channel so the consumer awaits a single point; each announce is tagged
/// with the service the subscriber belongs to.
///
/// A per-socket connected set makes repeat connects no-ops, which is what
/// lets the discovery loop re-offer the full host list on every fetch tick.
pub struct SubSocket {
    service: String,
    announces: mpsc::UnboundedSender<Announce>,
    readers: HashMap<String, JoinHandle<()>>,
}

impl SubSocket {
    pub fn new(service: impl Into<String>, announces: mpsc::UnboundedSender<Announce>) -> Self {
        Self {
            service: service.into(),
            announces,
            readers: HashMap::new(),
        }
    }

    pub fn is_connected(&self, host: &str) -> bool {
        self.readers.contains_key(host)
    }

    pub fn connected_count(&self) -> usize {
        self.readers.len()
    }

    /// Connects to `host:port` and starts reading announces. Returns
    /// `false` without touching the network when the host is already
    /// connected.
    pub async fn connect(&mut self, host: &str) -> Result<bool> {
        if self.readers.contains_key(host) {
            return Ok(false);
        }

        let mut stream = TcpStream::connect(strip_scheme(host)).await.map_err(|e| {
            CourierError::Connection(format!("failed to subscribe to {host}: {e}"))
        })?;

        let tx = self.announces.clone();
        let service = self.service.clone();
        let peer = host.to_string();
        let reader = tokio::spawn(async move {
            loop {
                match read_multipart(&mut stream).await {
                    Ok(frames) => {
                        if frames.len() != 2 || frames[0].is_empty() || frames[1].is_empty() {
                            debug!(peer = %peer, "dropping malformed announce");
                            continue;
                        }
                        let host = strip_scheme(&String::from_utf8_lossy(&frames[0])).to_string();
                        let announce = Announce {
                            service: service.clone(),
                            host,
                            payload: frames[1].clone(),
                        };
                        if tx.send(announce).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(peer = %peer, "announce stream closed: {e}");
                        break;
                    }
                }
            }
        });

        self.readers.insert(host.to_string(), reader);
        Ok(true)
    }
}

impl Drop for SubSocket {
    fn drop(&mut self) {
        for reader in self.readers.values() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::frames::write_multipart;
    use tokio::net::TcpListener;

    async fn spawn_announcer(messages: Vec<Vec<Vec<u8>>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            for frames in messages {
                write_multipart(&mut stream, &frames).await.unwrap();
            }
            // keep the stream open so the reader does not race the writes
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });

        addr.to_string()
    }

    #[tokio::test]
    async fn test_receives_tagged_announces() {
        let host = spawn_announcer(vec![vec![
            b"tcp://10.0.0.1:5000".to_vec(),
            b"{\"apps\":{}}".to_vec(),
        ]])
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut socket = SubSocket::new("echo", tx);
        assert!(socket.connect(&host).await.unwrap());

        let announce = rx.recv().await.unwrap();
        assert_eq!(announce.service, "echo");
        assert_eq!(announce.host, "10.0.0.1:5000");
        assert_eq!(announce.payload, b"{\"apps\":{}}");
    }

    #[tokio::test]
    async fn test_repeat_connect_is_noop() {
        let host = spawn_announcer(vec![]).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut socket = SubSocket::new("echo", tx);
        assert!(socket.connect(&host).await.unwrap());
        assert!(!socket.connect(&host).await.unwrap());
        assert_eq!(socket.connected_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_announces_are_dropped() {
        let host = spawn_announcer(vec![
            vec![b"lonely-frame".to_vec()],
            vec![Vec::new(), b"payload".to_vec()],
            vec![b"tcp://10.0.0.2:5000".to_vec(), b"ok".to_vec()],
        ])
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut socket = SubSocket::new("echo", tx);
        socket.connect(&host).await.unwrap();

        let announce = rx.recv().await.unwrap();
        assert_eq!(announce.host, "10.0.0.2:5000");
    }
}
