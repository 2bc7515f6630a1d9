//! Load-balanced outbound connection of one handle.
//!
//! The balancer owns one dealer socket, keeps it connected to the current
//! endpoint set, and round-robins sends over the endpoints with positive
//! weight. Inbound traffic is parsed into typed response chunks; malformed
//! messages are dropped whole.

use courier_common::endpoint::{Endpoint, EndpointSet};
use courier_common::transport::{decode_response, encode_request, DealerSocket};
use courier_common::{CourierError, Message, ResponseChunk, Result};
use tracing::{debug, warn};

pub struct Balancer {
    socket: DealerSocket,
    endpoints: Vec<Endpoint>,
    cursor: usize,
}

impl Balancer {
    /// Creates a balancer and connects it to every endpoint in the set.
    ///
    /// A refused connection is logged and tolerated: the endpoint stays in
    /// the rotation, and a send through it surfaces as a send failure that
    /// recycles the message.
    pub async fn new(identity: impl Into<String>, endpoints: EndpointSet) -> Self {
        let mut balancer = Self {
            socket: DealerSocket::new(identity),
            endpoints: endpoints.iter().cloned().collect(),
            cursor: 0,
        };

        for endpoint in &balancer.endpoints {
            if let Err(e) = balancer.socket.connect(&endpoint.uri).await {
                warn!(uri = %endpoint.uri, "balancer could not connect: {e}");
            }
        }

        balancer
    }

    pub fn identity(&self) -> &str {
        self.socket.identity()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Whether any endpoint can currently take a send.
    pub fn has_available(&self) -> bool {
        self.endpoints.iter().any(|e| e.weight > 0)
    }

    /// Replaces the endpoint set. Newly usable endpoints are connected,
    /// endpoints that became weight-0 or vanished are disconnected, and the
    /// round-robin cursor resets. Returns the endpoints that dropped out so
    /// the caller can recall their in-flight messages.
    pub async fn update_endpoints(&mut self, new_set: EndpointSet) -> Vec<Endpoint> {
        let dropped: Vec<Endpoint> = self
            .endpoints
            .iter()
            .filter(|old| {
                old.weight > 0
                    && new_set
                        .get(old)
                        .map(|incoming| incoming.weight == 0)
                        .unwrap_or(true)
            })
            .cloned()
            .collect();

        let desired: std::collections::HashSet<&str> = new_set
            .iter()
            .filter(|e| e.weight > 0)
            .map(|e| e.uri.as_str())
            .collect();

        for endpoint in &new_set {
            if endpoint.weight > 0 && !self.socket.is_connected(&endpoint.uri) {
                if let Err(e) = self.socket.connect(&endpoint.uri).await {
                    warn!(uri = %endpoint.uri, "balancer could not connect: {e}");
                }
            }
        }

        let stale: Vec<String> = self
            .endpoints
            .iter()
            .map(|e| e.uri.clone())
            .filter(|uri| !desired.contains(uri.as_str()))
            .collect();
        for uri in stale {
            self.socket.disconnect(&uri);
        }

        self.endpoints = new_set.iter().cloned().collect();
        self.cursor = 0;

        dropped
    }

    /// Picks the next endpoint with positive weight, starting one past the
    /// cursor and wrapping. Errors when every endpoint is dead; the caller
    /// must not dequeue messages in that state.
    pub fn select_endpoint(&mut self) -> Result<Endpoint> {
        let n = self.endpoints.len();
        if n == 0 {
            return Err(CourierError::NoAvailableEndpoints);
        }

        let start = (self.cursor + 1) % n;
        for offset in 0..n {
            let index = (start + offset) % n;
            if self.endpoints[index].weight > 0 {
                self.cursor = index;
                return Ok(self.endpoints[index].clone());
            }
        }

        Err(CourierError::NoAvailableEndpoints)
    }

    /// Sends one message to the next available endpoint, emitting the
    /// five-frame request layout. Returns the endpoint it went to.
    pub async fn send(&mut self, message: &Message) -> Result<Endpoint> {
        let endpoint = self.select_endpoint()?;
        let frames = encode_request(message, &endpoint.route)?;
        self.socket.send_to(&endpoint.uri, &frames).await?;

        debug!(
            uuid = %message.uuid,
            uri = %endpoint.uri,
            route = %endpoint.route_hex(),
            "sent message"
        );

        Ok(endpoint)
    }

    /// Awaits the next well-formed response chunk.
    pub async fn recv(&mut self) -> Option<ResponseChunk> {
        loop {
            let frames = self.socket.recv().await?;
            match decode_response(&frames) {
                Some(chunk) => return Some(chunk),
                None => warn!("dropping malformed response"),
            }
        }
    }

    /// Whether responses are waiting to be drained.
    pub fn has_pending(&self) -> bool {
        self.socket.has_pending()
    }

    /// Drains one pending response chunk without waiting.
    pub fn try_recv(&mut self) -> Option<ResponseChunk> {
        while let Some(frames) = self.socket.try_recv() {
            match decode_response(&frames) {
                Some(chunk) => return Some(chunk),
                None => warn!("dropping malformed response"),
            }
        }
        None
    }
}
