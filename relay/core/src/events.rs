//! Dispatch Events
//!
//! Callers observe the dispatcher through [`DispatchObserver`]. Every hook
//! defaults to a no-op, so an observer implements only what it needs.
//! [`ChannelObserver`] turns the hooks into a [`DispatchEvent`] stream;
//! dropping the receiver detaches it.
//!
//! Hooks run on the dispatcher's tasks. Keep them short and never block.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::request::{BatchId, LlmResponse, RequestId};

/// Receives dispatcher notifications
pub trait DispatchObserver: Send + Sync {
    /// A request finished successfully
    fn on_completed(&self, _request_id: &RequestId, _response: &LlmResponse) {}

    /// A streamed fragment arrived; `is_final` marks the last one
    fn on_stream_chunk(&self, _request_id: &RequestId, _text: &str, _is_final: bool) {}

    /// A request failed terminally
    fn on_error(&self, _request_id: &RequestId, _message: &str, _attempts: u32) {}

    /// An unhealthy model was replaced before an attempt
    fn on_model_switched(&self, _from: &str, _to: &str, _reason: &str) {}

    /// A batch member reached a terminal state
    fn on_batch_progress(&self, _batch_id: &BatchId, _completed: usize, _total: usize) {}
}

/// Owned form of every observer hook
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// Request completed
    Completed {
        /// Request
        request_id: RequestId,
        /// Result
        response: LlmResponse,
    },
    /// Streamed fragment
    StreamChunk {
        /// Request
        request_id: RequestId,
        /// Fragment text
        text: String,
        /// Last fragment of the stream
        is_final: bool,
    },
    /// Terminal failure
    Failed {
        /// Request
        request_id: RequestId,
        /// Failure description
        message: String,
        /// Retries performed before giving up
        attempts: u32,
    },
    /// Model switch
    ModelSwitched {
        /// Model originally resolved
        from: String,
        /// Replacement
        to: String,
        /// Why the switch happened
        reason: String,
    },
    /// Batch progress
    BatchProgress {
        /// Batch
        batch_id: BatchId,
        /// Members in a terminal state
        completed: usize,
        /// Batch size
        total: usize,
    },
}

/// Forwards hooks into an unbounded channel
#[derive(Clone, Debug)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<DispatchEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its event stream
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: DispatchEvent) {
        // Receiver gone: the observer is detached
        let _ = self.tx.send(event);
    }
}

impl DispatchObserver for ChannelObserver {
    fn on_completed(&self, request_id: &RequestId, response: &LlmResponse) {
        self.send(DispatchEvent::Completed {
            request_id: request_id.clone(),
            response: response.clone(),
        });
    }

    fn on_stream_chunk(&self, request_id: &RequestId, text: &str, is_final: bool) {
        self.send(DispatchEvent::StreamChunk {
            request_id: request_id.clone(),
            text: text.to_string(),
            is_final,
        });
    }

    fn on_error(&self, request_id: &RequestId, message: &str, attempts: u32) {
        self.send(DispatchEvent::Failed {
            request_id: request_id.clone(),
            message: message.to_string(),
            attempts,
        });
    }

    fn on_model_switched(&self, from: &str, to: &str, reason: &str) {
        self.send(DispatchEvent::ModelSwitched {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        });
    }

    fn on_batch_progress(&self, batch_id: &BatchId, completed: usize, total: usize) {
        self.send(DispatchEvent::BatchProgress {
            batch_id: batch_id.clone(),
            completed,
            total,
        });
    }
}
