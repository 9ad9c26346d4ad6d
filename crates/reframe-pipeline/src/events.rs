//! Notifications emitted during a transcode.

use bytes::Bytes;

use crate::error::ErrorKind;
use crate::state::PipelineState;

/// Something a caller may want to observe about a running transcode.
#[derive(Debug, Clone)]
pub enum TranscodeEvent {
    StateChanged(PipelineState),
    DecodeProgress { decoded: u32, total: u32 },
    DecodeComplete,
    EncodeProgress { encoded: u32, total: u32 },
    /// The finished file.
    TranscodeComplete { bytes: Bytes },
    Error { kind: ErrorKind, message: String },
    Destroyed,
}

/// Sender for pipeline notifications.
///
/// Wraps a callback invoked synchronously for every event, in order.
pub struct EventSender {
    callback: Box<dyn Fn(TranscodeEvent) + Send + Sync>,
}

impl EventSender {
    pub fn new(callback: impl Fn(TranscodeEvent) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Create a sender that discards all events.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_| {}),
        }
    }

    pub fn send(&self, event: TranscodeEvent) {
        (self.callback)(event);
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender").finish_non_exhaustive()
    }
}
