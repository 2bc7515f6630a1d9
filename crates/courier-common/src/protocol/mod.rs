//! Courier Protocol Definitions
//!
//! Core protocol types shared by every component: messages and their
//! delivery policies, streamed response chunks, and the crate-wide error
//! type.
//!
//! # Message Lifecycle
//!
//! A [`Message`] is created when the user submits a payload for a
//! `(service, handle)` path. It lives until a terminal [`ResponseChunk`]
//! (CHOKE or ERROR) is delivered, its deadline elapses, or the caller drops
//! interest in the response.
//!
//! # RPC Codes
//!
//! Servers stream replies as chunks tagged with an [`RpcCode`]:
//!
//! - **ACK**: request received (never surfaced to the user)
//! - **CHUNK**: one frame of a streamed response
//! - **CHOKE**: end of stream (terminal)
//! - **ERROR**: failure (terminal, unless the code asks for a reschedule)

pub mod chunks;
pub mod error;
pub mod message;

pub use chunks::{ErrorCode, ResponseChunk, RpcCode};
pub use error::{CourierError, Result};
pub use message::{Message, MessagePath, MessagePolicy};
