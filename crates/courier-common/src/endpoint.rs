//! Routed endpoint descriptors and routing-table types.
//!
//! An [`Endpoint`] is one reachable transport address of one handle,
//! together with the opaque routing token the server requires as the first
//! frame of every request. Identity (and therefore set membership and
//! ordering) is `(uri, route)` only; `weight` and `last_seen` are mutable
//! metadata that a fresher announce overwrites.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// One reachable endpoint of one handle.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Transport URI, e.g. `tcp://10.1.2.3:5001`
    pub uri: String,
    /// Opaque routing token received from the announce. Never interpreted,
    /// never logged as text (see [`Endpoint::route_hex`]).
    pub route: Vec<u8>,
    /// `0` means "known but unusable; do not send, but do not forget"
    pub weight: u32,
    /// Monotonic timestamp of the announce that last refreshed this endpoint
    pub last_seen: Instant,
}

impl Endpoint {
    pub fn new(uri: impl Into<String>, route: Vec<u8>, weight: u32) -> Self {
        Self {
            uri: uri.into(),
            route,
            weight,
            last_seen: Instant::now(),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.weight == 0
    }

    /// Hex rendering of the routing token, for logs.
    pub fn route_hex(&self) -> String {
        let mut out = String::with_capacity(self.route.len() * 2);
        for byte in &self.route {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri && self.route == other.route
    }
}

impl Eq for Endpoint {}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.uri, &self.route).cmp(&(&other.uri, &other.route))
    }
}

impl std::hash::Hash for Endpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
        self.route.hash(state);
    }
}

/// Endpoints of one handle.
pub type EndpointSet = BTreeSet<Endpoint>;

/// Handle name to its endpoint set.
pub type HandleEndpoints = BTreeMap<String, EndpointSet>;

/// Service name to its handles. The table contains exactly the configured
/// services; a service with nothing announced has an empty map, not a
/// missing entry.
pub type RoutingTable = BTreeMap<String, HandleEndpoints>;

/// A handle is dead iff every endpoint it has carries zero weight. An
/// empty set is vacuously dead.
pub fn all_endpoints_dead(endpoints: &EndpointSet) -> bool {
    endpoints.iter().all(Endpoint::is_dead)
}

/// Inserts `incoming` into `set`, replacing any endpoint with the same
/// identity. The incoming record wins: a fresh announce overwrites weight
/// and `last_seen`.
pub fn merge_endpoint(set: &mut EndpointSet, incoming: Endpoint) {
    set.remove(&incoming);
    set.insert(incoming);
}

/// Whether two endpoint sets are equal by identity and weight. `last_seen`
/// is metadata and does not participate.
pub fn endpoint_sets_equal(lhs: &EndpointSet, rhs: &EndpointSet) -> bool {
    if lhs.len() != rhs.len() {
        return false;
    }
    lhs.iter().all(|endpoint| {
        rhs.get(endpoint)
            .map(|other| other.weight == endpoint.weight)
            .unwrap_or(false)
    })
}
