//! Courier Common Types and Transport
//!
//! This crate provides the shared protocol definitions, wire framing and
//! transport sockets for the courier messaging client.
//!
//! # Overview
//!
//! Courier is a client-side messaging and RPC layer for a cluster of
//! long-lived application hosts. Hosts announce themselves over a pub/sub
//! stream and accept unary or streaming requests over a dealer/router-style
//! transport. This crate contains the pieces every component shares:
//!
//! - **Protocol Layer**: messages, policies, response chunks, error handling
//! - **Transport Layer**: multipart TCP framing with dealer- and
//!   subscriber-flavored sockets
//! - **Endpoints**: routed endpoint descriptors and routing-table types
//! - **Configuration**: service bindings, discovery sources and defaults
//!
//! # Wire Format
//!
//! One logical message is a sequence of frames:
//!
//! ```text
//! [4-byte frame count] ([4-byte length] [frame bytes])*
//! ```
//!
//! All lengths are big-endian u32. Request and response frame layouts are
//! documented in [`transport`].

pub mod config;
pub mod endpoint;
pub mod protocol;
pub mod transport;

pub use config::{CourierConfig, Discovery, MessageCacheKind, ServiceConfig};
pub use endpoint::{Endpoint, EndpointSet, HandleEndpoints, RoutingTable};
pub use protocol::{
    CourierError, ErrorCode, Message, MessagePath, MessagePolicy, Result, ResponseChunk, RpcCode,
};
