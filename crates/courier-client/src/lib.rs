//! Courier Client Core
//!
//! The client side of a messaging and RPC layer for a cluster of
//! long-lived application hosts. Hosts announce themselves over a pub/sub
//! stream; requests travel over a dealer-style framed transport and come
//! back as streamed response chunks.
//!
//! # Architecture
//!
//! - [`overseer`]: discovers routes. Polls the per-service hosts fetcher,
//!   subscribes to announces, converges a routing table and emits
//!   CREATE / UPDATE / DESTROY handle events.
//! - [`service`]: per-service router. Owns the handle dispatchers,
//!   queues messages whose handle does not exist yet, demultiplexes
//!   response chunks back to callers.
//! - [`handle`]: per-handle dispatcher. One task owning the message
//!   cache and the balancer, running the send, retry and deadline state
//!   machines.
//! - [`balancer`]: the load-balanced outbound connection of one handle.
//! - [`cache`]: new / in-flight message store with optional persistent
//!   mirroring.
//! - [`fetcher`]: file- and HTTP-based host-list sources.
//! - [`context`]: configuration and storage shared by every subsystem.
//!
//! # Example
//!
//! ```no_run
//! use courier_client::Courier;
//! use courier_common::{CourierConfig, MessagePath};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CourierConfig::from_file("courier.json")?;
//! let courier = Courier::new(config).await?;
//!
//! let mut response = courier
//!     .send_message(b"hello".to_vec(), MessagePath::new("echo", "invoke"), None)
//!     .await?;
//!
//! while let Some(chunk) = response.get().await {
//!     println!("{:?}", chunk.code);
//! }
//! # Ok(())
//! # }
//! ```

pub mod balancer;
pub mod cache;
pub mod context;
pub mod courier;
pub mod fetcher;
pub mod handle;
pub mod overseer;
pub mod response;
pub mod service;

pub use balancer::Balancer;
pub use cache::MessageCache;
pub use context::Context;
pub use courier::Courier;
pub use fetcher::{build_fetcher, FileHostsFetcher, HostsFetcher, HttpHostsFetcher};
pub use handle::{HandleDispatcher, HandleInfo};
pub use overseer::{Overseer, RoutingEvent, RoutingEventKind};
pub use response::Response;
pub use service::ServiceRouter;
