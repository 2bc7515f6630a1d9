//! Per-handle message cache.
//!
//! Holds new, in-flight and reschedulable messages for one handle. New
//! messages wait in a FIFO; sent messages are keyed by the route they went
//! out through, so the disappearance of one endpoint can recall exactly the
//! messages that were in flight to it.
//!
//! When a blob store is attached and a message's policy marks it
//! persistent, [`MessageCache::enqueue`] mirrors the message into the store
//! before the in-memory insert, and every terminal path deletes the mirror
//! after the in-memory removal.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use courier_common::{Message, Result};
use courier_storage::BlobStore;
use tracing::warn;
use uuid::Uuid;

pub struct MessageCache {
    /// Blob-store namespace (the service alias)
    namespace: String,
    store: Option<Arc<dyn BlobStore>>,
    new_fifo: VecDeque<Message>,
    /// route -> FIFO of sent messages awaiting ack/choke
    sent: HashMap<Vec<u8>, VecDeque<Message>>,
    sent_count: usize,
}

impl MessageCache {
    /// Creates a ram-only cache.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::with_store(namespace, None)
    }

    /// Creates a cache that mirrors persistent messages into `store`.
    pub fn with_store(namespace: impl Into<String>, store: Option<Arc<dyn BlobStore>>) -> Self {
        Self {
            namespace: namespace.into(),
            store,
            new_fifo: VecDeque::new(),
            sent: HashMap::new(),
            sent_count: 0,
        }
    }

    pub fn new_count(&self) -> usize {
        self.new_fifo.len()
    }

    pub fn sent_count(&self) -> usize {
        self.sent_count
    }

    pub fn is_empty(&self) -> bool {
        self.new_fifo.is_empty() && self.sent_count == 0
    }

    /// Appends a message to the new FIFO. Mirrors it into the blob store
    /// first when the policy asks for persistence.
    pub fn enqueue(&mut self, message: Message) -> Result<()> {
        self.write_mirror(&message)?;
        self.new_fifo.push_back(message);
        Ok(())
    }

    /// Pushes a message to the front of the new FIFO. Used for reschedules
    /// (lost ACK, failed send); the mirror already exists, so no
    /// write-through happens here.
    pub fn enqueue_with_priority(&mut self, message: Message) {
        self.new_fifo.push_front(message);
    }

    /// Pops the head of the new FIFO.
    pub fn pop_new(&mut self) -> Option<Message> {
        self.new_fifo.pop_front()
    }

    /// Records a sent message under its destination route.
    pub fn move_new_to_sent(&mut self, route: Vec<u8>, message: Message) {
        self.sent.entry(route).or_default().push_back(message);
        self.sent_count += 1;
    }

    pub fn get_sent(&self, route: &[u8], uuid: Uuid) -> Option<&Message> {
        self.sent
            .get(route)
            .and_then(|queue| queue.iter().find(|m| m.uuid == uuid))
    }

    pub fn get_sent_mut(&mut self, route: &[u8], uuid: Uuid) -> Option<&mut Message> {
        self.sent
            .get_mut(route)
            .and_then(|queue| queue.iter_mut().find(|m| m.uuid == uuid))
    }

    /// Terminal resolution: removes a sent message and deletes its mirror.
    pub fn remove_sent(&mut self, route: &[u8], uuid: Uuid) -> Option<Message> {
        let message = self.take_sent(route, uuid)?;
        self.drop_mirror(&message);
        Some(message)
    }

    /// Moves a sent message back to the new FIFO for redelivery. Returns
    /// whether the message was found.
    pub fn reshedule(&mut self, route: &[u8], uuid: Uuid) -> bool {
        match self.take_sent(route, uuid) {
            Some(mut message) => {
                message.reset_send_state();
                self.new_fifo.push_back(message);
                true
            }
            None => false,
        }
    }

    /// Recalls every in-flight message routed through `route` back to the
    /// new FIFO. Used when an endpoint disappears. Returns how many
    /// messages moved.
    pub fn reshedule_all_for_route(&mut self, route: &[u8]) -> usize {
        let Some(queue) = self.sent.remove(route) else {
            return 0;
        };
        let moved = queue.len();
        self.sent_count -= moved;
        for mut message in queue {
            message.reset_send_state();
            self.new_fifo.push_back(message);
        }
        moved
    }

    /// Drains every sent message back to the new FIFO, clearing send
    /// metadata. Sent messages come back ahead of the queued ones, in
    /// their original order.
    pub fn make_all_messages_new(&mut self) {
        let mut recalled: Vec<Message> = Vec::with_capacity(self.sent_count);
        for (_, queue) in self.sent.drain() {
            recalled.extend(queue);
        }
        self.sent_count = 0;

        for mut message in recalled.into_iter().rev() {
            message.reset_send_state();
            self.new_fifo.push_front(message);
        }
    }

    /// Removes and returns every expired message: deadlined ones from both
    /// queues, plus sent messages whose ACK timeout fired. The caller
    /// decides between retry and terminal failure.
    pub fn take_expired(&mut self, now: Instant) -> Vec<Message> {
        let mut expired = Vec::new();

        let mut keep = VecDeque::with_capacity(self.new_fifo.len());
        for message in self.new_fifo.drain(..) {
            if message.is_deadlined(now) {
                expired.push(message);
            } else {
                keep.push_back(message);
            }
        }
        self.new_fifo = keep;

        for queue in self.sent.values_mut() {
            let mut keep = VecDeque::with_capacity(queue.len());
            for message in queue.drain(..) {
                if message.is_deadlined(now) || message.is_ack_timed_out(now) {
                    self.sent_count -= 1;
                    expired.push(message);
                } else {
                    keep.push_back(message);
                }
            }
            *queue = keep;
        }
        self.sent.retain(|_, queue| !queue.is_empty());

        expired
    }

    /// Splices a transplanted queue onto the back of the new FIFO,
    /// mirroring persistent messages that have not been mirrored yet.
    pub fn append_queue(&mut self, queue: VecDeque<Message>) {
        for message in queue {
            if let Err(e) = self.write_mirror(&message) {
                warn!(uuid = %message.uuid, "could not mirror transplanted message: {e}");
            }
            self.new_fifo.push_back(message);
        }
    }

    /// Drains the whole cache (sent first, then queued) as new messages.
    /// Used when the owning handle dies and its messages return to the
    /// service for reattachment.
    pub fn drain_all_as_new(&mut self) -> VecDeque<Message> {
        self.make_all_messages_new();
        std::mem::take(&mut self.new_fifo)
    }

    /// Deletes the persistent mirror of a message, when one was written.
    pub fn drop_mirror(&mut self, message: &Message) {
        if !message.policy.persistent {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(&self.namespace, message.uuid.as_bytes()) {
                warn!(uuid = %message.uuid, "could not remove message mirror: {e}");
            }
        }
    }

    /// Deletes a mirror by uuid alone, for terminal chunks whose message
    /// the cache no longer remembers.
    pub fn drop_mirror_by_uuid(&mut self, uuid: Uuid) {
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(&self.namespace, uuid.as_bytes()) {
                warn!(uuid = %uuid, "could not remove message mirror: {e}");
            }
        }
    }

    fn take_sent(&mut self, route: &[u8], uuid: Uuid) -> Option<Message> {
        let queue = self.sent.get_mut(route)?;
        let index = queue.iter().position(|m| m.uuid == uuid)?;
        let message = queue.remove(index)?;
        self.sent_count -= 1;
        if queue.is_empty() {
            self.sent.remove(route);
        }
        Some(message)
    }

    fn write_mirror(&mut self, message: &Message) -> Result<()> {
        if !message.policy.persistent {
            return Ok(());
        }
        if let Some(store) = &self.store {
            let bytes = postcard::to_allocvec(&message.to_stored())?;
            store.write(&self.namespace, message.uuid.as_bytes(), &bytes)?;
        }
        Ok(())
    }
}
