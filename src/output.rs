use derive_more::Display;

use crate::event::ResolvedEvent;
use crate::position::TfPos;

/// The position at which a downstream subscription may safely join live
/// distribution. `null` in the spec becomes `None`; the two delivery paths
/// hand back different shapes of position (§4.4), which this type keeps
/// distinct instead of collapsing them into a single `TfPos` that would
/// silently drop the TF-delivery case down to one field.
#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub enum SafeJoinPosition {
    #[display(fmt = "{}", _0)]
    LogPosition(TfPos),
    #[display(fmt = "prepare={}", _0)]
    PreparePosition(i64),
}

/// Messages carried to the subscription layer (§4.4).
#[derive(Debug, Clone, Display)]
pub enum OutputEvent {
    #[display(
        fmt = "CommittedEventDistributed(correlation={}, progress={:.1})",
        correlation_id,
        progress
    )]
    CommittedEventDistributed {
        correlation_id: String,
        /// `None` indicates a bare position heartbeat, no event attached.
        resolved_event: Option<ResolvedEvent>,
        safe_join_pos: Option<SafeJoinPosition>,
        progress: f64,
    },
    #[display(fmt = "EventReaderIdle(correlation={})", correlation_id)]
    EventReaderIdle { correlation_id: String, timestamp: i64 },
    #[display(fmt = "EventReaderEof(correlation={}, max_events_reached={})", correlation_id, max_events_reached)]
    EventReaderEof {
        correlation_id: String,
        max_events_reached: bool,
    },
    /// The final `LastCommitPosition` marker published on TF EOF when
    /// `stopOnEof` applies and no `maxDeliveries` was set (§4.3).
    #[display(fmt = "LastCommitPosition({})", _0)]
    LastCommitPosition(TfPos),
    /// A keep-alive published after each completion "to drive the
    /// surrounding subscription layer" (§4.2, §4.3). Carries no data beyond
    /// the correlation id; the host treats it as a scheduling nudge, not an
    /// event delivery.
    #[display(fmt = "Tick(correlation={})", correlation_id)]
    Tick { correlation_id: String },
}
