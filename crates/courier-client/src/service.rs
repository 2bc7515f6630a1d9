//! Per-service router.
//!
//! Owns the handle dispatchers of one service and the glue around them:
//! user messages go to the right dispatcher (or wait in an "unhandled"
//! queue until discovery produces the handle), routing events drive handle
//! lifecycle, and response chunks coming back from the dispatchers are
//! demultiplexed to the per-message response streams.
//!
//! The mutable collections (handles, unhandled queues, response map) live
//! behind one short-held lock; no lock is held across an I/O call.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_common::config::{MessageCacheKind, ServiceConfig};
use courier_common::{Message, ResponseChunk};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::cache::MessageCache;
use crate::context::Context;
use crate::handle::{HandleDispatcher, HandleInfo};
use crate::overseer::{RoutingEvent, RoutingEventKind};
use crate::response::Response;

const HARVEST_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct ServiceInner {
    handles: HashMap<String, HandleDispatcher>,
    /// Messages that arrived before their handle existed
    unhandled: HashMap<String, VecDeque<Message>>,
    /// Live response streams by message uuid
    responses: HashMap<Uuid, mpsc::UnboundedSender<ResponseChunk>>,
}

impl ServiceInner {
    /// Routes one chunk to its response stream. Chunks for unknown or
    /// abandoned messages are silently discarded.
    fn deliver(&mut self, chunk: ResponseChunk) {
        let uuid = chunk.uuid;
        let terminal = chunk.is_terminal();

        if let Some(stream) = self.responses.get(&uuid) {
            if stream.send(chunk).is_err() || terminal {
                self.responses.remove(&uuid);
            }
        }
    }
}

pub struct ServiceRouter {
    config: ServiceConfig,
    context: Arc<Context>,
    inner: Arc<Mutex<ServiceInner>>,
    /// Cloned into every dispatcher as its response callback
    chunks_tx: mpsc::UnboundedSender<ResponseChunk>,
    demux_task: JoinHandle<()>,
    harvest_task: JoinHandle<()>,
}

impl ServiceRouter {
    pub fn new(config: ServiceConfig, context: Arc<Context>) -> Self {
        let inner = Arc::new(Mutex::new(ServiceInner::default()));
        let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();

        let demux_task = tokio::spawn(demux_loop(inner.clone(), chunks_rx));
        let harvest_task = tokio::spawn(harvest_loop(inner.clone(), config.name.clone()));

        Self {
            config,
            context,
            inner,
            chunks_tx,
            demux_task,
            harvest_task,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Submits a message: to the live handle when one exists, to the
    /// unhandled queue otherwise. Returns the response stream.
    pub async fn send_message(&self, message: Message) -> Response {
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let uuid = message.uuid;
        let handle_name = message.path.handle.clone();

        let mut inner = self.inner.lock().await;
        inner.responses.insert(uuid, stream_tx);

        match inner.handles.get(&handle_name) {
            Some(dispatcher) => {
                debug!(
                    service = %self.config.name,
                    handle = %handle_name,
                    uuid = %uuid,
                    "enqueued message to existing handle"
                );
                dispatcher.enqueue_message(message);
            }
            None => {
                debug!(
                    service = %self.config.name,
                    handle = %handle_name,
                    uuid = %uuid,
                    "no handle yet, message queued as unhandled"
                );
                inner.unhandled.entry(handle_name).or_default().push_back(message);
            }
        }

        Response::new(uuid, stream_rx)
    }

    /// Applies one routing event to the handle lifecycle.
    pub async fn handle_event(&self, event: RoutingEvent) {
        match event.kind {
            RoutingEventKind::Create => self.create_handle(event).await,
            RoutingEventKind::Update => {
                let inner = self.inner.lock().await;
                match inner.handles.get(&event.handle) {
                    Some(dispatcher) => dispatcher.update_endpoints(event.endpoints),
                    None => warn!(
                        service = %self.config.name,
                        handle = %event.handle,
                        "no handle to update"
                    ),
                }
            }
            RoutingEventKind::Destroy => self.destroy_handle(&event.handle).await,
        }
    }

    async fn create_handle(&self, event: RoutingEvent) {
        let info = HandleInfo::new(
            self.config.name.clone(),
            self.config.app.clone(),
            event.handle.clone(),
        );
        let dispatcher = HandleDispatcher::spawn(
            info,
            event.endpoints,
            self.build_cache(),
            self.chunks_tx.clone(),
        )
        .await;

        let previous = {
            let mut inner = self.inner.lock().await;

            if let Some(queue) = inner.unhandled.remove(&event.handle) {
                debug!(
                    service = %self.config.name,
                    handle = %event.handle,
                    count = queue.len(),
                    "assigning unhandled queue to new handle"
                );
                dispatcher.append_queue(queue);
            }

            inner.handles.insert(event.handle.clone(), dispatcher)
        };

        // a repeated CREATE replaces the dispatcher; its messages carry over
        if let Some(previous) = previous {
            warn!(
                service = %self.config.name,
                handle = %event.handle,
                "replacing existing handle"
            );
            let recovered = previous.kill().await;
            if !recovered.is_empty() {
                let inner = self.inner.lock().await;
                if let Some(dispatcher) = inner.handles.get(&event.handle) {
                    dispatcher.append_queue(recovered);
                }
            }
        }
    }

    async fn destroy_handle(&self, handle_name: &str) {
        let dispatcher = self.inner.lock().await.handles.remove(handle_name);
        let Some(dispatcher) = dispatcher else {
            error!(
                service = %self.config.name,
                handle = %handle_name,
                "no handle to destroy"
            );
            return;
        };

        let mut recovered = dispatcher.kill().await;
        for message in &mut recovered {
            message.reset_send_state();
        }

        if !recovered.is_empty() {
            debug!(
                service = %self.config.name,
                handle = %handle_name,
                count = recovered.len(),
                "moving messages from destroyed handle to unhandled queue"
            );
            let mut inner = self.inner.lock().await;
            inner
                .unhandled
                .entry(handle_name.to_string())
                .or_default()
                .extend(recovered);
        }
    }

    /// Kills every handle and stops the background tasks.
    pub async fn shutdown(&self) {
        let handles: Vec<HandleDispatcher> = {
            let mut inner = self.inner.lock().await;
            inner.handles.drain().map(|(_, dispatcher)| dispatcher).collect()
        };
        for dispatcher in handles {
            dispatcher.kill().await;
        }

        self.demux_task.abort();
        self.harvest_task.abort();
    }

    fn build_cache(&self) -> MessageCache {
        match self.context.config.message_cache_type {
            MessageCacheKind::Persistent => {
                MessageCache::with_store(self.config.name.clone(), self.context.storage.clone())
            }
            MessageCacheKind::RamOnly => MessageCache::new(self.config.name.clone()),
        }
    }
}

async fn demux_loop(
    inner: Arc<Mutex<ServiceInner>>,
    mut chunks: mpsc::UnboundedReceiver<ResponseChunk>,
) {
    while let Some(chunk) = chunks.recv().await {
        inner.lock().await.deliver(chunk);
    }
}

/// Periodic housekeeping: fails unhandled messages whose deadline elapsed
/// and forgets response streams nobody listens to anymore.
async fn harvest_loop(inner: Arc<Mutex<ServiceInner>>, service: String) {
    let mut tick = tokio::time::interval(HARVEST_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tick.tick().await;
        let now = Instant::now();
        let mut inner = inner.lock().await;

        let mut expired = Vec::new();
        for queue in inner.unhandled.values_mut() {
            let mut keep = VecDeque::with_capacity(queue.len());
            for message in queue.drain(..) {
                if message.is_deadlined(now) {
                    expired.push(message);
                } else {
                    keep.push_back(message);
                }
            }
            *queue = keep;
        }
        inner.unhandled.retain(|_, queue| !queue.is_empty());

        for message in expired {
            error!(
                service = %service,
                uuid = %message.uuid,
                "deadline exceeded for unhandled message"
            );
            inner.deliver(ResponseChunk::deadline_error(
                message.uuid,
                "unhandled message expired",
            ));
        }

        inner.responses.retain(|_, stream| !stream.is_closed());
    }
}
