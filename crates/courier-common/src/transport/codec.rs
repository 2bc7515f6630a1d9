//! Frame-level codec for requests, responses and announces.
//!
//! # Outbound request (client to server)
//!
//! 1. routing token (opaque bytes, from the endpoint)
//! 2. empty delimiter frame
//! 3. message uuid, 16 raw bytes
//! 4. packed server policy `(urgent, chunk_timeout, absolute_deadline, max_retries)`
//! 5. payload bytes
//!
//! The policy's relative deadline is rewritten to an absolute wall-clock
//! value (`enqueued_at + deadline`) before packing.
//!
//! # Inbound response (server to client)
//!
//! 1. routing token
//! 2. packed rpc code (ACK=1, CHUNK=2, CHOKE=3, ERROR=4)
//! 3. message uuid, 16 raw bytes
//! 4. code-dependent payload: CHUNK carries bytes, ERROR carries packed
//!    `(code, message)`, ACK and CHOKE carry nothing

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::chunks::{ResponseChunk, RpcCode};
use crate::protocol::error::Result;
use crate::protocol::message::Message;

/// Policy tuple as seen by the server. Packed into frame 4 of a request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WirePolicy {
    pub urgent: bool,
    pub chunk_timeout: f64,
    /// Absolute wall-clock deadline, seconds since the UNIX epoch; `0.0`
    /// means no deadline
    pub deadline: f64,
    pub max_retries: i32,
}

/// Error payload packed into frame 4 of an ERROR response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: i32,
    pub message: String,
}

/// A request decoded on the server side.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub route: Vec<u8>,
    pub uuid: Uuid,
    pub policy: WirePolicy,
    pub payload: Vec<u8>,
}

/// Encodes one message into the five-frame request layout, addressed
/// through `route`.
pub fn encode_request(message: &Message, route: &[u8]) -> Result<Vec<Vec<u8>>> {
    let policy = WirePolicy {
        urgent: message.policy.urgent,
        chunk_timeout: message.policy.chunk_timeout,
        deadline: message.absolute_deadline(),
        max_retries: message.policy.max_retries as i32,
    };

    Ok(vec![
        route.to_vec(),
        Vec::new(),
        message.uuid.as_bytes().to_vec(),
        postcard::to_allocvec(&policy)?,
        message.payload.clone(),
    ])
}

/// Decodes a five-frame request. Used by the server side of the protocol
/// (and by the test harness standing in for one).
pub fn decode_request(frames: &[Vec<u8>]) -> Option<WireRequest> {
    if frames.len() != 5 || !frames[1].is_empty() {
        return None;
    }

    let uuid = Uuid::from_slice(&frames[2]).ok()?;
    let policy: WirePolicy = postcard::from_bytes(&frames[3]).ok()?;

    Some(WireRequest {
        route: frames[0].clone(),
        uuid,
        policy,
        payload: frames[4].clone(),
    })
}

/// Encodes a response chunk into the inbound frame layout. Used by the
/// server side of the protocol.
pub fn encode_response(chunk: &ResponseChunk) -> Result<Vec<Vec<u8>>> {
    let mut frames = vec![
        chunk.route.clone(),
        postcard::to_allocvec(&(chunk.code as u32))?,
        chunk.uuid.as_bytes().to_vec(),
    ];

    match chunk.code {
        RpcCode::Chunk => frames.push(chunk.data.clone()),
        RpcCode::Error => {
            let error = WireError {
                code: chunk.error_code.unwrap_or(0),
                message: chunk.error_message.clone().unwrap_or_default(),
            };
            frames.push(postcard::to_allocvec(&error)?);
        }
        RpcCode::Ack | RpcCode::Choke => {}
    }

    Ok(frames)
}

/// Decodes an inbound response into a typed chunk.
///
/// Returns `None` on malformed framing (the caller drops the message). A
/// structurally valid message with an unknown rpc code is surfaced as an
/// internal ERROR chunk so the owning message resolves instead of leaking.
pub fn decode_response(frames: &[Vec<u8>]) -> Option<ResponseChunk> {
    if frames.len() < 3 {
        return None;
    }

    let route = frames[0].clone();
    let raw_code: u32 = postcard::from_bytes(&frames[1]).ok()?;
    let uuid = Uuid::from_slice(&frames[2]).ok()?;

    let code = match RpcCode::from_wire(raw_code) {
        Some(code) => code,
        None => {
            return Some(ResponseChunk::internal_error(
                uuid,
                format!("unknown rpc code: {raw_code}"),
            ));
        }
    };

    match code {
        RpcCode::Ack => Some(ResponseChunk::ack(uuid, route)),
        RpcCode::Choke => Some(ResponseChunk::choke(uuid, route)),
        RpcCode::Chunk => {
            let data = frames.get(3)?.clone();
            Some(ResponseChunk::chunk(uuid, route, data))
        }
        RpcCode::Error => {
            let error: WireError = postcard::from_bytes(frames.get(3)?).ok()?;
            Some(ResponseChunk::error(uuid, route, error.code, error.message))
        }
    }
}
