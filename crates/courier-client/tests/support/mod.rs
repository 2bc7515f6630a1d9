//! In-process test cluster: fake server nodes speaking the request
//! framing and announcers feeding the discovery stream.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use courier_common::config::{CourierConfig, Discovery, MessageCacheKind, ServiceConfig};
use courier_common::transport::{
    decode_request, encode_response, read_multipart, write_multipart,
};
use courier_common::{ErrorCode, MessagePolicy, ResponseChunk};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How a fake node answers requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeBehavior {
    /// ACK, CHUNK(payload), CHOKE
    Echo,
    /// First request: ERROR(resource); afterwards: ACK, CHOKE
    ResourceErrorOnce,
    /// First request: no reply at all; afterwards: ACK, CHUNK, CHOKE
    DropFirstReply,
    /// Accepts requests, never replies
    Silent,
}

/// A fake server node accepting dealer connections.
pub struct TestNode {
    pub uri: String,
    requests: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TestNode {
    pub async fn start(behavior: NodeBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("tcp://{}", listener.local_addr().unwrap());
        let requests = Arc::new(AtomicUsize::new(0));

        let counter = requests.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let counter = counter.clone();
                tokio::spawn(serve_connection(stream, behavior, counter));
            }
        });

        Self {
            uri,
            requests,
            task,
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    behavior: NodeBehavior,
    counter: Arc<AtomicUsize>,
) {
    // dealer greeting
    let Ok(greeting) = read_multipart(&mut stream).await else {
        return;
    };
    assert_eq!(greeting.len(), 1);

    loop {
        let Ok(frames) = read_multipart(&mut stream).await else {
            return;
        };
        let Some(request) = decode_request(&frames) else {
            continue;
        };
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;

        let replies: Vec<ResponseChunk> = match behavior {
            NodeBehavior::Echo => vec![
                ResponseChunk::ack(request.uuid, request.route.clone()),
                ResponseChunk::chunk(request.uuid, request.route.clone(), request.payload.clone()),
                ResponseChunk::choke(request.uuid, request.route.clone()),
            ],
            NodeBehavior::ResourceErrorOnce if n == 1 => vec![ResponseChunk::error(
                request.uuid,
                request.route.clone(),
                ErrorCode::Resource as i32,
                "resource temporarily unavailable",
            )],
            NodeBehavior::ResourceErrorOnce => vec![
                ResponseChunk::ack(request.uuid, request.route.clone()),
                ResponseChunk::choke(request.uuid, request.route.clone()),
            ],
            NodeBehavior::DropFirstReply if n == 1 => Vec::new(),
            NodeBehavior::DropFirstReply => vec![
                ResponseChunk::ack(request.uuid, request.route.clone()),
                ResponseChunk::chunk(request.uuid, request.route.clone(), request.payload.clone()),
                ResponseChunk::choke(request.uuid, request.route.clone()),
            ],
            NodeBehavior::Silent => Vec::new(),
        };

        for reply in replies {
            let frames = encode_response(&reply).unwrap();
            if write_multipart(&mut stream, &frames).await.is_err() {
                return;
            }
        }
    }
}

/// A fake announcing host: accepts subscriber connections and repeats the
/// current announce payload every 50 ms. The payload can be swapped at
/// runtime; an empty payload pauses announcing.
pub struct TestAnnouncer {
    /// `host:port` as the hosts fetcher would yield it
    pub host: String,
    payload: watch::Sender<String>,
    task: JoinHandle<()>,
}

impl TestAnnouncer {
    pub async fn start(payload: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = listener.local_addr().unwrap().to_string();
        let (payload_tx, payload_rx) = watch::channel(payload);

        let identity = format!("tcp://{host}");
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(announce_loop(stream, identity.clone(), payload_rx.clone()));
            }
        });

        Self {
            host,
            payload: payload_tx,
            task,
        }
    }

    /// Swaps the announce payload all connected subscribers will receive
    /// from now on.
    pub fn set_payload(&self, payload: String) {
        let _ = self.payload.send(payload);
    }

    /// Stops announcing; connections stay open so endpoints age out by
    /// silence, exactly like a wedged host.
    pub fn go_silent(&self) {
        self.set_payload(String::new());
    }
}

impl Drop for TestAnnouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn announce_loop(
    mut stream: TcpStream,
    identity: String,
    payload: watch::Receiver<String>,
) {
    let mut tick = tokio::time::interval(std::time::Duration::from_millis(50));
    loop {
        tick.tick().await;
        let current = payload.borrow().clone();
        if current.is_empty() {
            continue;
        }
        let frames = vec![identity.clone().into_bytes(), current.into_bytes()];
        if write_multipart(&mut stream, &frames).await.is_err() {
            return;
        }
    }
}

/// Announce payload for one app with one handle.
pub fn announce(app: &str, status: &str, handle: &str, endpoint_uri: &str, route: &str) -> String {
    format!(
        r#"{{
            "identity": "test-node",
            "uptime": 1.0,
            "apps": {{
                "{app}": {{
                    "status": "{status}",
                    "tasks": {{
                        "{handle}": {{"endpoint": "{endpoint_uri}", "route": "{route}"}}
                    }}
                }}
            }}
        }}"#
    )
}

/// Writes a hosts file and builds a config with one file-discovered
/// service. The temp file must outlive the test.
pub fn config_for_hosts(
    service: &str,
    app: &str,
    hosts: &[&str],
    endpoint_timeout: f64,
) -> (CourierConfig, tempfile::NamedTempFile) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for host in hosts {
        writeln!(file, "tcp://{host}").unwrap();
    }
    file.flush().unwrap();

    let config = CourierConfig {
        services: vec![ServiceConfig {
            name: service.to_string(),
            app: app.to_string(),
            discovery: Discovery::File {
                path: file.path().to_path_buf(),
            },
            policy_defaults: None,
        }],
        control_port: 5000,
        endpoint_timeout,
        message_cache_type: MessageCacheKind::RamOnly,
        persistent_storage: None,
        policy_defaults: MessagePolicy::default(),
    };

    (config, file)
}
