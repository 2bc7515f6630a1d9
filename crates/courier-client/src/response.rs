//! User-facing response handle.

use courier_common::ResponseChunk;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Stream of response chunks for one submitted message.
///
/// Yields zero or more CHUNKs followed by exactly one terminal (CHOKE or
/// ERROR), then `None`. Dropping the handle cancels local interest: chunks
/// that keep arriving for the message are silently discarded, and no
/// network cancellation is sent.
pub struct Response {
    uuid: Uuid,
    chunks: mpsc::UnboundedReceiver<ResponseChunk>,
    finished: bool,
}

impl Response {
    pub(crate) fn new(uuid: Uuid, chunks: mpsc::UnboundedReceiver<ResponseChunk>) -> Self {
        Self {
            uuid,
            chunks,
            finished: false,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Awaits the next chunk. Returns `None` once a terminal chunk has
    /// been yielded (or the client shut down underneath the caller).
    pub async fn get(&mut self) -> Option<ResponseChunk> {
        if self.finished {
            return None;
        }
        match self.chunks.recv().await {
            Some(chunk) => {
                if chunk.is_terminal() {
                    self.finished = true;
                }
                Some(chunk)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}
