//! Routing discovery.
//!
//! The overseer continuously converges an in-memory routing table from two
//! independent sources: the per-service hosts fetcher and the announce
//! stream read off per-service subscriber sockets. Whenever the table
//! changes it emits differential events (handle created, updated,
//! destroyed) that the service routers consume.
//!
//! The table is mutated only by the overseer's own task; consumers observe
//! it exclusively through the event stream, and events for one
//! `(service, handle)` are strictly serialized.
//!
//! Hosts that disappear from the fetcher are not disconnected on the spot:
//! the announce-timeout sweep ages their endpoints out, which tolerates a
//! flaky fetcher.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_common::endpoint::{
    all_endpoints_dead, endpoint_sets_equal, merge_endpoint, Endpoint, EndpointSet, RoutingTable,
};
use courier_common::transport::{Announce, SubSocket};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::fetcher::HostsFetcher;

const FETCH_INTERVAL: Duration = Duration::from_secs(15);
const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// A wedged fetcher must not stall announce processing and the sweeps.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingEventKind {
    Create,
    Update,
    Destroy,
}

/// One differential change to the routing table.
#[derive(Debug, Clone)]
pub struct RoutingEvent {
    pub kind: RoutingEventKind,
    pub service: String,
    pub handle: String,
    /// Snapshot of the handle's endpoint set after the change
    pub endpoints: EndpointSet,
}

/// Application status carried in an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum AppStatus {
    Unknown,
    Running,
    Stopping,
    Stopped,
    Broken,
}

#[derive(Debug, Clone, Deserialize)]
struct TaskInfo {
    endpoint: String,
    route: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AppInfo {
    status: AppStatus,
    #[serde(default)]
    tasks: HashMap<String, TaskInfo>,
}

/// Parsed announce payload of one host.
#[derive(Debug, Clone, Deserialize)]
struct NodeInfo {
    #[serde(default)]
    #[allow(dead_code)]
    identity: String,
    #[serde(default)]
    #[allow(dead_code)]
    uptime: f64,
    #[serde(default)]
    apps: HashMap<String, AppInfo>,
}

/// Owning handle to the spawned discovery task.
pub struct Overseer {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Overseer {
    /// Spawns the discovery task. `fetchers` maps each configured service
    /// to its host-list source; `events` receives the differential table
    /// changes.
    pub fn spawn(
        context: Arc<Context>,
        fetchers: HashMap<String, Box<dyn HostsFetcher>>,
        events: mpsc::UnboundedSender<RoutingEvent>,
    ) -> Self {
        let (announces_tx, announces_rx) = mpsc::unbounded_channel();
        let sockets = fetchers
            .keys()
            .map(|service| {
                (
                    service.clone(),
                    SubSocket::new(service.clone(), announces_tx.clone()),
                )
            })
            .collect();

        let driver = OverseerDriver {
            context,
            fetchers,
            sockets,
            service_hosts: HashMap::new(),
            routing: RoutingTable::new(),
            announces: announces_rx,
            events,
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(driver.run(stop_rx));

        Self {
            stop: stop_tx,
            task,
        }
    }

    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

/// Parses one announce into the batch; unparsable payloads are dropped.
fn absorb_announce(batch: &mut HashMap<String, NodeInfo>, announce: Announce) {
    match serde_json::from_slice::<NodeInfo>(&announce.payload) {
        Ok(node) => {
            batch.insert(announce.host, node);
        }
        Err(e) => {
            warn!(host = %announce.host, "dropping unparsable announce: {e}");
        }
    }
}

struct OverseerDriver {
    context: Arc<Context>,
    fetchers: HashMap<String, Box<dyn HostsFetcher>>,
    sockets: HashMap<String, SubSocket>,
    /// Last successfully fetched host set per service (last known good)
    service_hosts: HashMap<String, BTreeSet<String>>,
    routing: RoutingTable,
    announces: mpsc::UnboundedReceiver<Announce>,
    events: mpsc::UnboundedSender<RoutingEvent>,
}

impl OverseerDriver {
    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        debug!("overseer started");
        self.reset_routing_table();

        let mut fetch = tokio::time::interval(FETCH_INTERVAL);
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!("overseer stopped");
                    return;
                }
                _ = fetch.tick() => self.fetch_and_connect().await,
                _ = sweep.tick() => self.sweep_timed_out(),
                announce = self.announces.recv() => {
                    let Some(announce) = announce else { return };
                    let mut batch = HashMap::new();
                    absorb_announce(&mut batch, announce);
                    while let Ok(announce) = self.announces.try_recv() {
                        absorb_announce(&mut batch, announce);
                    }
                    if !batch.is_empty() {
                        self.apply_announces(&batch);
                    }
                }
            }
        }
    }

    /// The routing table always carries exactly the configured services;
    /// a service with nothing announced has an empty map.
    fn reset_routing_table(&mut self) {
        self.routing.clear();
        for service in &self.context.config.services {
            self.routing.insert(service.name.clone(), Default::default());
        }
    }

    /// Fetch tick: refresh each service's host list and offer every host
    /// to its subscriber socket. Already-connected hosts are skipped by the
    /// socket's connected-set; unreachable ones are retried next tick.
    /// A failed fetch keeps the previously known hosts.
    async fn fetch_and_connect(&mut self) {
        let Self {
            fetchers,
            sockets,
            service_hosts,
            ..
        } = self;

        for (service, fetcher) in fetchers.iter() {
            let fetched = match tokio::time::timeout(FETCH_TIMEOUT, fetcher.fetch()).await {
                Ok(result) => result,
                Err(_) => {
                    error!(service = %service, "hosts fetch timed out");
                    continue;
                }
            };
            match fetched {
                Ok(hosts) if hosts.is_empty() => {
                    error!(service = %service, "fetcher returned no hosts");
                }
                Ok(hosts) => {
                    let fetched: BTreeSet<String> = hosts.into_iter().collect();
                    service_hosts.insert(service.clone(), fetched.clone());

                    let Some(socket) = sockets.get_mut(service) else {
                        continue;
                    };
                    for host in &fetched {
                        match socket.connect(host).await {
                            Ok(true) => debug!(service = %service, host = %host, "subscribed"),
                            Ok(false) => {}
                            Err(e) => {
                                error!(service = %service, host = %host, "could not subscribe: {e}");
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(service = %service, "failed to retrieve hosts: {e}");
                }
            }
        }
    }

    /// Builds the desired table from one batch of freshly drained
    /// announces and folds it into the live table, emitting events for
    /// every difference.
    fn apply_announces(&mut self, batch: &HashMap<String, NodeInfo>) {
        let desired = self.build_desired_table(batch);
        self.merge_desired(desired);
    }

    fn build_desired_table(&self, batch: &HashMap<String, NodeInfo>) -> RoutingTable {
        let mut desired = RoutingTable::new();

        for service in &self.context.config.services {
            let handles = desired.entry(service.name.clone()).or_default();

            let Some(hosts) = self.service_hosts.get(&service.name) else {
                continue;
            };

            for host in hosts {
                let Some(node) = batch.get(host) else {
                    continue;
                };
                let Some(app) = node.apps.get(&service.app) else {
                    continue;
                };

                let weight = match app.status {
                    AppStatus::Running => 1,
                    AppStatus::Stopping => 0,
                    AppStatus::Unknown => {
                        error!(service = %service.name, app = %service.app, host = %host,
                               "app has unknown status");
                        continue;
                    }
                    AppStatus::Stopped => {
                        warn!(service = %service.name, app = %service.app, host = %host,
                              "app is stopped");
                        continue;
                    }
                    AppStatus::Broken => {
                        warn!(service = %service.name, app = %service.app, host = %host,
                              "app is broken");
                        continue;
                    }
                };

                if app.tasks.is_empty() {
                    warn!(service = %service.name, app = %service.app, host = %host,
                          "app has no tasks");
                    continue;
                }

                for (handle_name, task) in &app.tasks {
                    let endpoint = Endpoint::new(
                        task.endpoint.clone(),
                        task.route.clone().into_bytes(),
                        weight,
                    );
                    merge_endpoint(handles.entry(handle_name.clone()).or_default(), endpoint);
                }
            }
        }

        desired
    }

    fn merge_desired(&mut self, desired: RoutingTable) {
        for (service_name, handles) in desired {
            for (handle_name, incoming) in handles {
                let Some(live_handles) = self.routing.get_mut(&service_name) else {
                    error!(service = %service_name, "service missing in routing table");
                    continue;
                };

                let live = live_handles.entry(handle_name.clone()).or_default();
                let was_dead = all_endpoints_dead(live);
                let before = live.clone();

                for endpoint in incoming {
                    merge_endpoint(live, endpoint);
                }

                if was_dead {
                    let endpoints = live.clone();
                    self.emit(RoutingEventKind::Create, &service_name, &handle_name, endpoints);
                } else if all_endpoints_dead(live) {
                    live.clear();
                    self.emit(
                        RoutingEventKind::Destroy,
                        &service_name,
                        &handle_name,
                        EndpointSet::new(),
                    );
                } else if !endpoint_sets_equal(&before, live) {
                    let endpoints = live.clone();
                    self.emit(RoutingEventKind::Update, &service_name, &handle_name, endpoints);
                }
                // identical set: the merge refreshed last_seen, nothing to emit
            }
        }
    }

    /// Flips endpoints silent for longer than the configured timeout to
    /// weight 0, destroying handles that thereby die out entirely.
    fn sweep_timed_out(&mut self) {
        let now = Instant::now();
        let timeout = Duration::from_secs_f64(self.context.config.endpoint_timeout);
        let mut pending = Vec::new();

        for (service_name, handles) in &mut self.routing {
            for (handle_name, endpoints) in handles.iter_mut() {
                let mut timed_out = false;
                let mut updated = EndpointSet::new();

                for endpoint in endpoints.iter() {
                    let mut endpoint = endpoint.clone();
                    if endpoint.weight > 0 && now.duration_since(endpoint.last_seen) > timeout {
                        endpoint.weight = 0;
                        timed_out = true;
                    }
                    updated.insert(endpoint);
                }

                if !timed_out {
                    continue;
                }

                if all_endpoints_dead(&updated) {
                    endpoints.clear();
                    pending.push((
                        RoutingEventKind::Destroy,
                        service_name.clone(),
                        handle_name.clone(),
                        EndpointSet::new(),
                    ));
                } else {
                    *endpoints = updated.clone();
                    pending.push((
                        RoutingEventKind::Update,
                        service_name.clone(),
                        handle_name.clone(),
                        updated,
                    ));
                }
            }
        }

        for (kind, service, handle, endpoints) in pending {
            self.emit(kind, &service, &handle, endpoints);
        }
    }

    fn emit(
        &self,
        kind: RoutingEventKind,
        service: &str,
        handle: &str,
        endpoints: EndpointSet,
    ) {
        debug!(service = %service, handle = %handle, ?kind, count = endpoints.len(),
               "routing event");
        let _ = self.events.send(RoutingEvent {
            kind,
            service: service.to_string(),
            handle: handle.to_string(),
            endpoints,
        });
    }
}
