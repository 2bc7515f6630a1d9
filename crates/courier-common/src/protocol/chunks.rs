//! Streamed response chunks and their codes.

use uuid::Uuid;

/// RPC code of a single response chunk.
///
/// The numeric values are part of the wire protocol and must stay frozen
/// for interop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RpcCode {
    /// Request was received by a server (never surfaced to the user)
    Ack = 1,
    /// One frame of a streamed response
    Chunk = 2,
    /// End of stream, terminal
    Choke = 3,
    /// Failure, terminal unless the error code asks for a reschedule
    Error = 4,
}

impl RpcCode {
    pub fn from_wire(code: u32) -> Option<Self> {
        match code {
            1 => Some(RpcCode::Ack),
            2 => Some(RpcCode::Chunk),
            3 => Some(RpcCode::Choke),
            4 => Some(RpcCode::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RpcCode::Choke | RpcCode::Error)
    }
}

/// Stable error codes carried in ERROR chunks or synthesized locally.
///
/// Server-originated codes outside this set are passed through verbatim as
/// application errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// ACK timeout exceeded beyond the retry budget
    Request = 400,
    /// Local deadline exceeded
    Deadline = 406,
    /// Server-side application failure
    ServerApplication = 500,
    /// Server signalled temporary unavailability; the client reschedules
    Resource = 503,
    /// Malformed framing or unrecoverable client failure
    Internal = 520,
}

/// One chunk of a streamed response, either received off the wire or
/// synthesized locally (deadline and ack-timeout errors).
#[derive(Debug, Clone)]
pub struct ResponseChunk {
    pub uuid: Uuid,
    /// Routing token of the endpoint that produced the chunk; empty for
    /// locally synthesized chunks
    pub route: Vec<u8>,
    pub code: RpcCode,
    /// CHUNK payload, empty otherwise
    pub data: Vec<u8>,
    /// Raw server error code for ERROR chunks, passed through verbatim
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
}

impl ResponseChunk {
    pub fn ack(uuid: Uuid, route: Vec<u8>) -> Self {
        Self::bare(uuid, route, RpcCode::Ack)
    }

    pub fn chunk(uuid: Uuid, route: Vec<u8>, data: Vec<u8>) -> Self {
        let mut chunk = Self::bare(uuid, route, RpcCode::Chunk);
        chunk.data = data;
        chunk
    }

    pub fn choke(uuid: Uuid, route: Vec<u8>) -> Self {
        Self::bare(uuid, route, RpcCode::Choke)
    }

    pub fn error(uuid: Uuid, route: Vec<u8>, code: i32, message: impl Into<String>) -> Self {
        let mut chunk = Self::bare(uuid, route, RpcCode::Error);
        chunk.error_code = Some(code);
        chunk.error_message = Some(message.into());
        chunk
    }

    /// Locally synthesized deadline failure.
    pub fn deadline_error(uuid: Uuid, message: impl Into<String>) -> Self {
        Self::error(uuid, Vec::new(), ErrorCode::Deadline as i32, message)
    }

    /// Locally synthesized ack-timeout failure.
    pub fn request_error(uuid: Uuid, message: impl Into<String>) -> Self {
        Self::error(uuid, Vec::new(), ErrorCode::Request as i32, message)
    }

    /// Locally synthesized client failure.
    pub fn internal_error(uuid: Uuid, message: impl Into<String>) -> Self {
        Self::error(uuid, Vec::new(), ErrorCode::Internal as i32, message)
    }

    pub fn is_terminal(&self) -> bool {
        self.code.is_terminal()
    }

    pub fn is_resource_error(&self) -> bool {
        self.code == RpcCode::Error && self.error_code == Some(ErrorCode::Resource as i32)
    }

    fn bare(uuid: Uuid, route: Vec<u8>, code: RpcCode) -> Self {
        Self {
            uuid,
            route,
            code,
            data: Vec::new(),
            error_code: None,
            error_message: None,
        }
    }
}
