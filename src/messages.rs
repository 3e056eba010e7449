use derive_more::Display;

use crate::event::ResolvedEvent;
use crate::output::OutputEvent;
use crate::position::TfPos;

/// Per-stream forward read batch size (§6).
pub const STREAM_READ_COUNT: i32 = 111;
/// Checkpoint-stream forward read batch size (§6).
pub const CHECKPOINT_READ_COUNT: i32 = 100;
/// TF-log forward read batch size (§6).
pub const TF_READ_COUNT: i32 = 111;
/// Delayed-retry backoff (§6).
pub const RETRY_DELAY_MS: u64 = 250;

/// Outcome of a `ReadStreamEventsForward`/`Backward` completion.
#[derive(Debug, Clone)]
pub enum StreamReadResult {
    Success {
        events: Vec<ResolvedEvent>,
        next_event_number: i32,
        last_event_number: i32,
    },
    NoStream,
    /// Any result code this core does not know how to interpret; a protocol
    /// violation surfaced to the host rather than silently ignored.
    Other(String),
}

/// Outcome of a `ReadAllEventsForward` completion.
#[derive(Debug, Clone)]
pub enum AllReadResult {
    Success {
        events: Vec<ResolvedEvent>,
        next_pos: TfPos,
        tf_eof_position: TfPos,
    },
    Other(String),
}

/// Messages arriving at the reader from the publisher/transport.
#[derive(Debug, Clone, Display)]
pub enum InboundMessage {
    #[display(fmt = "ReadStreamForwardCompleted({})", stream_id)]
    ReadStreamForwardCompleted {
        stream_id: String,
        result: StreamReadResult,
    },
    #[display(fmt = "ReadStreamBackwardCompleted({})", stream_id)]
    ReadStreamBackwardCompleted {
        stream_id: String,
        result: StreamReadResult,
    },
    #[display(fmt = "ReadAllForwardCompleted")]
    ReadAllForwardCompleted { result: AllReadResult },
}

/// Messages the reader emits towards the publisher/transport.
///
/// `Effect::Io(..).delayed_if(true)` is the crate's rendering of §4.1's
/// `publishIo(delay, msg)`: instead of a boolean flag threaded through every
/// call site, the delay is captured by wrapping the I/O request effect
/// itself in a `ScheduleTimer`, which the runtime (or a test) resolves by
/// publishing the inner effect after the backoff elapses.
#[derive(Debug, Clone, Display)]
pub enum Effect {
    #[display(fmt = "ReadStreamForward({}, from={})", stream_id, from_event_number)]
    ReadStreamForward {
        stream_id: String,
        from_event_number: i32,
        max_count: i32,
        resolve_link_tos: bool,
    },
    #[display(fmt = "ReadStreamBackward({})", stream_id)]
    ReadStreamBackward {
        stream_id: String,
        from_event_number: i32,
        max_count: i32,
    },
    #[display(fmt = "ReadAllForward(commit={}, prepare={})", commit, prepare)]
    ReadAllForward {
        commit: i64,
        prepare: i64,
        max_count: i32,
        resolve_link_tos: bool,
    },
    #[display(fmt = "ScheduleTimer({}ms, {})", delay_ms, effect)]
    ScheduleTimer { delay_ms: u64, effect: Box<Effect> },
    #[display(fmt = "Publish({})", _0)]
    Publish(OutputEvent),
}

impl Effect {
    /// Wraps `self` in a `ScheduleTimer` when `delay` is set, otherwise
    /// returns it unchanged. `Publish` effects are never delayed — only
    /// read requests back off against an observed-empty tail.
    pub fn delayed_if(self, delay: bool) -> Effect {
        if delay && !matches!(self, Effect::Publish(_) | Effect::ScheduleTimer { .. }) {
            Effect::ScheduleTimer {
                delay_ms: RETRY_DELAY_MS,
                effect: Box::new(self),
            }
        } else {
            self
        }
    }
}
