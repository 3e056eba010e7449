use serde::{Deserialize, Serialize};

use crate::position::TfPos;

/// Opaque payload mirroring the minimal fields this crate needs from the
/// underlying store's event record. The host's real transport will carry a
/// richer type; only the fields the reader core inspects are modeled here,
/// the way `actyx_sdk::Event<T>` separates the generic `payload` from the
/// `key`/`meta` the core actually reasons about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub stream_id: String,
    pub event_number: i32,
    pub event_id: String,
    pub event_type: String,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
    pub timestamp: i64,
    pub log_position: TfPos,
    pub is_json: bool,
}

/// An event plus an optional link. When read from a type-index stream, the
/// link points at the original event and carries the checkpoint tag this
/// crate parses to recover a `TfPos`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEvent {
    pub event: EventRecord,
    pub link: Option<EventRecord>,
}

impl ResolvedEvent {
    /// The event used for positioning: the link when present, else the
    /// event itself.
    pub fn position_event(&self) -> &EventRecord {
        self.link.as_ref().unwrap_or(&self.event)
    }
}

/// An event queued inside an index-stream buffer, with its TF position
/// resolved and its progress fraction precomputed.
///
/// Spec §3 describes this as `{ event, positionEvent, tfPos, progress }`;
/// `positionEvent` is kept as a derived accessor over `resolved`
/// (`resolved.position_event()`) rather than a duplicated field, since
/// storing it separately would just be two copies of the same data to keep
/// in sync.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub resolved: ResolvedEvent,
    pub tf_pos: TfPos,
    pub progress: f64,
}

/// `{ "$v": "...", "$s": { ... }, "$p": { "commit": ..., "prepare": ... } }`.
/// Only `$p` is required by this core; the rest is round-tripped as opaque
/// JSON so callers that need it can re-parse the raw bytes themselves.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointTag {
    #[serde(rename = "$p")]
    pub position: CheckpointPosition,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointPosition {
    pub commit: i64,
    pub prepare: i64,
}

/// Errors parsing a checkpoint tag out of event metadata/data.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
pub enum CheckpointTagError {
    #[display(fmt = "checkpoint tag metadata was not valid UTF-8")]
    NotUtf8,
    #[display(fmt = "checkpoint tag JSON was malformed: {}", _0)]
    Malformed(serde_json::Error),
}

/// Parses a `TfPos` out of a checkpoint-tag JSON payload (an index event's
/// `metadata`, or a `$et` event's `data`).
pub fn parse_checkpoint_tag(bytes: &[u8]) -> Result<TfPos, CheckpointTagError> {
    let text = std::str::from_utf8(bytes).map_err(|_| CheckpointTagError::NotUtf8)?;
    let tag: CheckpointTag = serde_json::from_str(text).map_err(CheckpointTagError::Malformed)?;
    Ok(TfPos::new(tag.position.commit, tag.position.prepare))
}

/// The type-index stream name for a configured event type: `"$et-" + t`.
pub fn type_stream_name(event_type: &str) -> String {
    format!("$et-{event_type}")
}

/// The checkpoint ("all events") meta-stream name.
pub const CHECKPOINT_STREAM: &str = "$et";
