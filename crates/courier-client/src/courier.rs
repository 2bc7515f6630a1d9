//! Top-level client.
//!
//! [`Courier`] ties the subsystems together: it builds the shared context,
//! one service router per configured service and the discovery task, and
//! pumps routing events from the latter into the former. Messages go in
//! through [`Courier::send_message`]; chunks come back through the
//! returned [`Response`].

use std::collections::HashMap;
use std::sync::Arc;

use courier_common::{CourierConfig, CourierError, Message, MessagePath, MessagePolicy, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::context::Context;
use crate::fetcher::build_fetcher;
use crate::overseer::Overseer;
use crate::response::Response;
use crate::service::ServiceRouter;

pub struct Courier {
    context: Arc<Context>,
    services: Arc<HashMap<String, ServiceRouter>>,
    overseer: Overseer,
    event_pump: JoinHandle<()>,
}

impl Courier {
    /// Starts the client: opens storage when configured, spawns the
    /// service routers and the discovery task.
    pub async fn new(config: CourierConfig) -> Result<Self> {
        let context = Context::new(config)?;

        let mut services = HashMap::new();
        let mut fetchers = HashMap::new();
        for service_config in &context.config.services {
            services.insert(
                service_config.name.clone(),
                ServiceRouter::new(service_config.clone(), context.clone()),
            );
            fetchers.insert(
                service_config.name.clone(),
                build_fetcher(service_config, context.config.control_port),
            );
        }
        let services = Arc::new(services);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let overseer = Overseer::spawn(context.clone(), fetchers, events_tx);

        let pump_services = services.clone();
        let event_pump = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match pump_services.get(&event.service) {
                    Some(service) => service.handle_event(event).await,
                    None => error!(service = %event.service, "routing event for unknown service"),
                }
            }
        });

        info!(services = context.config.services.len(), "courier client started");

        Ok(Self {
            context,
            services,
            overseer,
            event_pump,
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Submits a message and returns the stream its response chunks will
    /// arrive on. When no policy is given, the configured defaults for the
    /// service apply.
    pub async fn send_message(
        &self,
        payload: impl Into<Vec<u8>>,
        path: MessagePath,
        policy: Option<MessagePolicy>,
    ) -> Result<Response> {
        if path.handle.is_empty() {
            return Err(CourierError::InvalidPath(
                "empty handle name".to_string(),
            ));
        }

        let service = self
            .services
            .get(&path.service)
            .ok_or_else(|| CourierError::UnknownService(path.service.clone()))?;

        let policy = policy.unwrap_or_else(|| self.context.config.policy_for(&path.service));
        let message = Message::new(payload.into(), path, policy);

        Ok(service.send_message(message).await)
    }

    /// Stops discovery, kills every handle and tears the client down.
    pub async fn shutdown(self) {
        self.overseer.stop().await;
        self.event_pump.abort();
        for service in self.services.values() {
            service.shutdown().await;
        }
        info!("courier client stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_common::config::{Discovery, MessageCacheKind, ServiceConfig};

    fn config() -> CourierConfig {
        CourierConfig {
            services: vec![ServiceConfig {
                name: "echo".to_string(),
                app: "echo-app".to_string(),
                discovery: Discovery::File {
                    path: "/nonexistent/hosts".into(),
                },
                policy_defaults: None,
            }],
            control_port: 5000,
            endpoint_timeout: 2.0,
            message_cache_type: MessageCacheKind::RamOnly,
            persistent_storage: None,
            policy_defaults: MessagePolicy::default(),
        }
    }

    #[tokio::test]
    async fn test_unknown_service_is_rejected() {
        let courier = Courier::new(config()).await.unwrap();

        let result = courier
            .send_message(b"x".to_vec(), MessagePath::new("ghost", "invoke"), None)
            .await;
        assert!(matches!(result, Err(CourierError::UnknownService(_))));

        courier.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_handle_is_rejected() {
        let courier = Courier::new(config()).await.unwrap();

        let result = courier
            .send_message(b"x".to_vec(), MessagePath::new("echo", ""), None)
            .await;
        assert!(matches!(result, Err(CourierError::InvalidPath(_))));

        courier.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_to_known_service_yields_response() {
        let courier = Courier::new(config()).await.unwrap();

        let response = courier
            .send_message(b"x".to_vec(), MessagePath::new("echo", "invoke"), None)
            .await
            .unwrap();
        assert!(!response.uuid().is_nil());

        courier.shutdown().await;
    }
}
