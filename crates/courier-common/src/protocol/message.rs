//! Courier Message Types
//!
//! This module defines the message submitted by the user, its routing path
//! and its delivery policy.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime};
use uuid::Uuid;

/// Routing path of a message: which service and which handle of that
/// service should execute it.
///
/// Both components must be non-empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessagePath {
    /// Logical service name (resolved through configuration)
    pub service: String,
    /// Handle (method) name exposed by the service's app
    pub handle: String,
}

impl MessagePath {
    pub fn new(service: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            handle: handle.into(),
        }
    }
}

impl std::fmt::Display for MessagePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.handle)
    }
}

/// Delivery policy of a single message.
///
/// All timeouts are in seconds; a value of `0` disables the corresponding
/// timer.
///
/// - `deadline > 0`: fail the message with a deadline error if it is not
///   terminally answered within `deadline` after enqueue.
/// - `ack_timeout > 0`: if no ACK arrives within this after send, reschedule
///   the message, up to `max_retries` times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagePolicy {
    /// Server-side priority hint
    pub urgent: bool,
    /// Mirror the message into the persistent blob store while in flight
    pub persistent: bool,
    /// Server-side per-chunk processing timeout, seconds
    pub chunk_timeout: f64,
    /// Client-side ACK timeout, seconds
    pub ack_timeout: f64,
    /// Client-side total deadline, seconds since enqueue
    pub deadline: f64,
    /// Maximum reschedules after a lost ACK
    pub max_retries: u32,
}

impl Default for MessagePolicy {
    fn default() -> Self {
        Self {
            urgent: false,
            persistent: false,
            chunk_timeout: 0.0,
            ack_timeout: 0.05,
            deadline: 0.0,
            max_retries: 0,
        }
    }
}

impl MessagePolicy {
    pub fn with_deadline(mut self, deadline: f64) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_ack_timeout(mut self, ack_timeout: f64) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }
}

/// Compact form of a message mirrored into the persistent blob store.
///
/// Only the fields needed to resubmit the message survive; send-state
/// metadata is intentionally left out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub uuid: Uuid,
    pub path: MessagePath,
    pub payload: Vec<u8>,
    pub policy: MessagePolicy,
}

/// A user message travelling through the client.
///
/// The message is created on submission and mutated by the handle
/// dispatcher as it is sent, acknowledged and retried. `enqueued_at` is the
/// anchor for the deadline timer and survives handle destruction and
/// reattachment; `sent_at`, `destination_route` and `ack_received` are
/// send-state metadata and are cleared whenever the message returns to a
/// "new" queue.
#[derive(Debug, Clone)]
pub struct Message {
    pub uuid: Uuid,
    pub path: MessagePath,
    pub payload: Vec<u8>,
    pub policy: MessagePolicy,
    /// Monotonic enqueue timestamp, anchors the deadline timer
    pub enqueued_at: Instant,
    /// Wall-clock enqueue timestamp, seconds since the UNIX epoch; used to
    /// rewrite the relative deadline into an absolute one on the wire
    pub enqueued_unix: f64,
    pub sent_at: Option<Instant>,
    pub destination_route: Option<Vec<u8>>,
    pub ack_received: bool,
    pub retries_used: u32,
}

impl Message {
    pub fn new(payload: Vec<u8>, path: MessagePath, policy: MessagePolicy) -> Self {
        let enqueued_unix = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        Self {
            uuid: Uuid::new_v4(),
            path,
            payload,
            policy,
            enqueued_at: Instant::now(),
            enqueued_unix,
            sent_at: None,
            destination_route: None,
            ack_received: false,
            retries_used: 0,
        }
    }

    /// Absolute wall-clock deadline carried on the wire, or `0.0` when the
    /// policy has no deadline.
    pub fn absolute_deadline(&self) -> f64 {
        if self.policy.deadline > 0.0 {
            self.enqueued_unix + self.policy.deadline
        } else {
            0.0
        }
    }

    /// Whether the total deadline has elapsed. A zero deadline never fires.
    pub fn is_deadlined(&self, now: Instant) -> bool {
        self.policy.deadline > 0.0
            && now.duration_since(self.enqueued_at) > Duration::from_secs_f64(self.policy.deadline)
    }

    /// Whether the message was sent, is still unacknowledged, and its ACK
    /// timeout has elapsed. A zero ack timeout never fires.
    pub fn is_ack_timed_out(&self, now: Instant) -> bool {
        if self.ack_received || self.policy.ack_timeout <= 0.0 {
            return false;
        }
        match self.sent_at {
            Some(sent_at) => {
                now.duration_since(sent_at) > Duration::from_secs_f64(self.policy.ack_timeout)
            }
            None => false,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retries_used < self.policy.max_retries
    }

    pub fn mark_sent(&mut self, route: Vec<u8>) {
        self.sent_at = Some(Instant::now());
        self.destination_route = Some(route);
    }

    /// Clears all send-state metadata, returning the message to the state
    /// it had right after enqueue (retry count excluded).
    pub fn reset_send_state(&mut self) {
        self.sent_at = None;
        self.destination_route = None;
        self.ack_received = false;
    }

    pub fn to_stored(&self) -> StoredMessage {
        StoredMessage {
            uuid: self.uuid,
            path: self.path.clone(),
            payload: self.payload.clone(),
            policy: self.policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_policy(policy: MessagePolicy) -> Message {
        Message::new(b"payload".to_vec(), MessagePath::new("svc", "handle"), policy)
    }

    #[test]
    fn test_policy_defaults() {
        let policy = MessagePolicy::default();
        assert!(!policy.urgent);
        assert!(!policy.persistent);
        assert_eq!(policy.chunk_timeout, 0.0);
        assert_eq!(policy.ack_timeout, 0.05);
        assert_eq!(policy.deadline, 0.0);
        assert_eq!(policy.max_retries, 0);
    }

    #[test]
    fn test_message_creation() {
        let msg = message_with_policy(MessagePolicy::default());
        assert_eq!(msg.payload, b"payload");
        assert!(msg.sent_at.is_none());
        assert!(msg.destination_route.is_none());
        assert!(!msg.ack_received);
        assert_eq!(msg.retries_used, 0);
    }

    #[test]
    fn test_message_uuid_uniqueness() {
        let a = message_with_policy(MessagePolicy::default());
        let b = message_with_policy(MessagePolicy::default());
        assert_ne!(a.uuid, b.uuid);
    }

    #[test]
    fn test_zero_deadline_never_fires() {
        let msg = message_with_policy(MessagePolicy::default());
        let far_future = Instant::now() + Duration::from_secs(3600);
        assert!(!msg.is_deadlined(far_future));
    }

    #[test]
    fn test_deadline_fires_after_elapse() {
        let msg = message_with_policy(MessagePolicy::default().with_deadline(0.5));
        assert!(!msg.is_deadlined(Instant::now()));
        assert!(msg.is_deadlined(Instant::now() + Duration::from_secs(1)));
    }

    #[test]
    fn test_ack_timeout_requires_sent() {
        let msg = message_with_policy(MessagePolicy::default().with_ack_timeout(0.05));
        let later = Instant::now() + Duration::from_secs(1);
        assert!(!msg.is_ack_timed_out(later));
    }

    #[test]
    fn test_ack_timeout_fires_without_ack() {
        let mut msg = message_with_policy(MessagePolicy::default().with_ack_timeout(0.05));
        msg.mark_sent(b"route".to_vec());
        let later = Instant::now() + Duration::from_secs(1);
        assert!(msg.is_ack_timed_out(later));
    }

    #[test]
    fn test_ack_timeout_suppressed_by_ack() {
        let mut msg = message_with_policy(MessagePolicy::default().with_ack_timeout(0.05));
        msg.mark_sent(b"route".to_vec());
        msg.ack_received = true;
        let later = Instant::now() + Duration::from_secs(1);
        assert!(!msg.is_ack_timed_out(later));
    }

    #[test]
    fn test_reset_send_state() {
        let mut msg = message_with_policy(MessagePolicy::default());
        msg.mark_sent(b"route".to_vec());
        msg.ack_received = true;
        msg.reset_send_state();
        assert!(msg.sent_at.is_none());
        assert!(msg.destination_route.is_none());
        assert!(!msg.ack_received);
    }

    #[test]
    fn test_absolute_deadline_rewrite() {
        let msg = message_with_policy(MessagePolicy::default().with_deadline(2.0));
        let absolute = msg.absolute_deadline();
        assert!((absolute - msg.enqueued_unix - 2.0).abs() < 1e-9);

        let no_deadline = message_with_policy(MessagePolicy::default());
        assert_eq!(no_deadline.absolute_deadline(), 0.0);
    }

    #[test]
    fn test_can_retry() {
        let mut msg = message_with_policy(MessagePolicy::default().with_max_retries(1));
        assert!(msg.can_retry());
        msg.retries_used = 1;
        assert!(!msg.can_retry());
    }

    #[test]
    fn test_stored_message_round_trip() {
        let msg = message_with_policy(MessagePolicy::default().with_persistent(true));
        let bytes = postcard::to_allocvec(&msg.to_stored()).unwrap();
        let stored: StoredMessage = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(stored.uuid, msg.uuid);
        assert_eq!(stored.path, msg.path);
        assert_eq!(stored.payload, msg.payload);
        assert_eq!(stored.policy, msg.policy);
    }
}
