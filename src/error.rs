use derive_more::{Display, Error};

use crate::event::CheckpointTagError;

/// Construction-time and protocol-level failures.
///
/// Construction errors are rejected synchronously, before any I/O is issued
/// (mirrors `EphemeralEventsConfig`/`SwarmConfig` validating their inputs up
/// front rather than failing deep inside a background task). Protocol
/// violations indicate a bug in the caller or transport — a completion
/// arrived that does not match anything the core is waiting for — and are
/// surfaced to the host rather than silently ignored, the way
/// `event_store_ref::Error` distinguishes recoverable overload/abort from
/// conditions the caller must fix.
#[derive(Debug, Clone, Display, Error)]
pub enum ReaderError {
    #[display(fmt = "eventTypes must be non-empty")]
    EmptyEventTypes,
    #[display(
        fmt = "fromPositions must have exactly one entry per configured event type (got {}, expected {})",
        got,
        expected
    )]
    FromPositionsSizeMismatch { got: usize, expected: usize },
    #[display(fmt = "fromPositions is missing an entry for configured type {}", _0)]
    FromPositionsMissingType(String),
    #[display(
        fmt = "read completed for stream {} but no read was outstanding for it",
        stream_id
    )]
    UnrequestedCompletion { stream_id: String },
    #[display(fmt = "unexpected read result for stream {}: {}", stream_id, detail)]
    UnsupportedResult { stream_id: String, detail: String },
    #[display(fmt = "could not parse checkpoint tag on stream {}: {}", stream_id, source)]
    BadCheckpointTag {
        stream_id: String,
        source: CheckpointTagError,
    },
}
