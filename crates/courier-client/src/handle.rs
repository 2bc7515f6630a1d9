//! Per-handle message dispatcher.
//!
//! One dispatcher exists per `(service, handle)` pair. It owns the
//! handle's message cache and its load-balanced outbound connection, and
//! runs them on a single task: all state is touched only from that task,
//! and the public [`HandleDispatcher`] crosses the boundary by posting
//! commands into it.
//!
//! The task reacts to four event sources: ingress commands, balancer
//! readability, a 500 ms expiry sweep, and an internal wakeup that fires
//! whenever new messages may be waiting. After every event the queue pump
//! drains the new FIFO into the balancer, in batches, as long as an
//! endpoint with positive weight exists.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use courier_common::endpoint::EndpointSet;
use courier_common::{Message, ResponseChunk, RpcCode};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::balancer::Balancer;
use crate::cache::MessageCache;

const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Messages sent per pump wakeup before yielding back to the event loop.
const SEND_BATCH: usize = 100;

/// Identity of one handle: the full `(service, app, handle)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandleInfo {
    pub service: String,
    pub app: String,
    pub name: String,
}

impl HandleInfo {
    pub fn new(
        service: impl Into<String>,
        app: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            app: app.into(),
            name: name.into(),
        }
    }

    /// Socket identity of this handle's balancer; unique per dispatcher
    /// incarnation.
    fn balancer_identity(&self) -> String {
        format!("{}.{}.{}.{}", self.service, self.app, self.name, Uuid::new_v4())
    }
}

impl std::fmt::Display for HandleInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.service, self.app, self.name)
    }
}

enum HandleCommand {
    Enqueue(Box<Message>),
    UpdateEndpoints(EndpointSet),
    AppendQueue(VecDeque<Message>),
    Kill(oneshot::Sender<VecDeque<Message>>),
}

/// Owning handle to a spawned dispatcher task.
///
/// All methods are cheap posts into the task. [`HandleDispatcher::kill`]
/// stops the task synchronously and recovers whatever messages were still
/// in the cache, already converted back to "new".
pub struct HandleDispatcher {
    info: HandleInfo,
    commands: mpsc::UnboundedSender<HandleCommand>,
    task: JoinHandle<()>,
}

impl HandleDispatcher {
    pub async fn spawn(
        info: HandleInfo,
        endpoints: EndpointSet,
        cache: MessageCache,
        responses: mpsc::UnboundedSender<ResponseChunk>,
    ) -> Self {
        let balancer = Balancer::new(info.balancer_identity(), endpoints).await;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let driver = HandleDriver {
            info: info.clone(),
            cache,
            balancer,
            commands: commands_rx,
            responses,
            pump: Notify::new(),
        };
        let task = tokio::spawn(driver.run());

        debug!(handle = %info, "created handle");

        Self {
            info,
            commands: commands_tx,
            task,
        }
    }

    pub fn info(&self) -> &HandleInfo {
        &self.info
    }

    pub fn enqueue_message(&self, message: Message) {
        let _ = self.commands.send(HandleCommand::Enqueue(Box::new(message)));
    }

    pub fn update_endpoints(&self, endpoints: EndpointSet) {
        let _ = self.commands.send(HandleCommand::UpdateEndpoints(endpoints));
    }

    pub fn append_queue(&self, queue: VecDeque<Message>) {
        let _ = self.commands.send(HandleCommand::AppendQueue(queue));
    }

    /// Stops the dispatcher and returns its remaining messages, send
    /// metadata cleared, so they can be reattached to a future handle.
    pub async fn kill(self) -> VecDeque<Message> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(HandleCommand::Kill(reply_tx)).is_err() {
            return VecDeque::new();
        }
        let recovered = reply_rx.await.unwrap_or_default();
        let _ = self.task.await;
        recovered
    }
}

struct HandleDriver {
    info: HandleInfo,
    cache: MessageCache,
    balancer: Balancer,
    commands: mpsc::UnboundedReceiver<HandleCommand>,
    responses: mpsc::UnboundedSender<ResponseChunk>,
    pump: Notify,
}

impl HandleDriver {
    async fn run(mut self) {
        debug!(handle = %self.info, "started message dispatch");

        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(HandleCommand::Enqueue(message)) => self.enqueue(*message),
                    Some(HandleCommand::UpdateEndpoints(endpoints)) => {
                        self.update_endpoints(endpoints).await;
                    }
                    Some(HandleCommand::AppendQueue(queue)) => {
                        debug!(handle = %self.info, count = queue.len(), "assigned message queue");
                        self.cache.append_queue(queue);
                    }
                    Some(HandleCommand::Kill(reply)) => {
                        let _ = reply.send(self.cache.drain_all_as_new());
                        debug!(handle = %self.info, "destroyed handle");
                        return;
                    }
                    None => return,
                },
                chunk = self.balancer.recv() => {
                    if let Some(chunk) = chunk {
                        self.dispatch_chunk(chunk);
                    }
                    while let Some(chunk) = self.balancer.try_recv() {
                        self.dispatch_chunk(chunk);
                    }
                },
                _ = sweep.tick() => self.sweep_expired(),
                _ = self.pump.notified() => {},
            }

            self.pump_queue().await;
        }
    }

    fn enqueue(&mut self, message: Message) {
        let uuid = message.uuid;
        if let Err(e) = self.cache.enqueue(message) {
            error!(handle = %self.info, uuid = %uuid, "could not enqueue message: {e}");
            self.emit(ResponseChunk::internal_error(
                uuid,
                format!("could not enqueue message: {e}"),
            ));
        }
    }

    /// Drains the new FIFO into the balancer. A failed send recycles the
    /// message to the head of the queue without consuming a retry.
    async fn pump_queue(&mut self) {
        for _ in 0..SEND_BATCH {
            if !self.balancer.has_available() {
                return;
            }
            let Some(mut message) = self.cache.pop_new() else {
                return;
            };

            match self.balancer.send(&message).await {
                Ok(endpoint) => {
                    message.mark_sent(endpoint.route.clone());
                    self.cache.move_new_to_sent(endpoint.route, message);
                }
                Err(e) => {
                    warn!(
                        handle = %self.info,
                        uuid = %message.uuid,
                        "send failed, message recycled: {e}"
                    );
                    self.cache.enqueue_with_priority(message);
                    return;
                }
            }
        }

        // batch exhausted with work left over
        if self.cache.new_count() > 0 {
            self.pump.notify_one();
        }
    }

    fn dispatch_chunk(&mut self, chunk: ResponseChunk) {
        match chunk.code {
            RpcCode::Ack => {
                // ACKs never reach the user
                if let Some(message) = self.cache.get_sent_mut(&chunk.route, chunk.uuid) {
                    message.ack_received = true;
                }
            }

            RpcCode::Chunk => self.emit(chunk),

            RpcCode::Choke => {
                self.cache.remove_sent(&chunk.route, chunk.uuid);
                self.emit(chunk);
            }

            RpcCode::Error if chunk.is_resource_error() => {
                if self.cache.reshedule(&chunk.route, chunk.uuid) {
                    // transparent retry, nothing surfaces
                    warn!(
                        handle = %self.info,
                        uuid = %chunk.uuid,
                        "resource error received, message rescheduled"
                    );
                    self.pump.notify_one();
                } else {
                    error!(
                        handle = %self.info,
                        uuid = %chunk.uuid,
                        code = ?chunk.error_code,
                        "resource error for unknown message"
                    );
                    self.cache.drop_mirror_by_uuid(chunk.uuid);
                    self.emit(chunk);
                }
            }

            RpcCode::Error => {
                error!(
                    handle = %self.info,
                    uuid = %chunk.uuid,
                    code = ?chunk.error_code,
                    detail = chunk.error_message.as_deref().unwrap_or(""),
                    "error received"
                );
                if self.cache.remove_sent(&chunk.route, chunk.uuid).is_none() {
                    self.cache.drop_mirror_by_uuid(chunk.uuid);
                }
                self.emit(chunk);
            }
        }
    }

    /// Resolves expired messages: deadlined ones fail terminally, messages
    /// whose ACK never arrived are rescheduled until the retry budget runs
    /// out.
    fn sweep_expired(&mut self) {
        let now = Instant::now();
        for mut message in self.cache.take_expired(now) {
            if message.is_deadlined(now) {
                error!(
                    handle = %self.info,
                    uuid = %message.uuid,
                    "deadline exceeded"
                );
                self.cache.drop_mirror(&message);
                self.emit(ResponseChunk::deadline_error(
                    message.uuid,
                    "message expired in handle",
                ));
            } else if message.can_retry() {
                message.retries_used += 1;
                message.reset_send_state();
                warn!(
                    handle = %self.info,
                    uuid = %message.uuid,
                    retries = message.retries_used,
                    "no ACK in time, message rescheduled"
                );
                self.cache.enqueue_with_priority(message);
                self.pump.notify_one();
            } else {
                warn!(
                    handle = %self.info,
                    uuid = %message.uuid,
                    "no ACK in time, retry budget exhausted"
                );
                self.cache.drop_mirror(&message);
                self.emit(ResponseChunk::request_error(
                    message.uuid,
                    "server did not reply with ack in time",
                ));
            }
        }
    }

    async fn update_endpoints(&mut self, endpoints: EndpointSet) {
        debug!(handle = %self.info, count = endpoints.len(), "updating endpoints");

        let dropped = self.balancer.update_endpoints(endpoints).await;
        for endpoint in dropped {
            let moved = self.cache.reshedule_all_for_route(&endpoint.route);
            if moved > 0 {
                debug!(
                    handle = %self.info,
                    route = %endpoint.route_hex(),
                    moved,
                    "endpoint gone, recalled in-flight messages"
                );
                self.pump.notify_one();
            }
        }
    }

    fn emit(&self, chunk: ResponseChunk) {
        let _ = self.responses.send(chunk);
    }
}
