//! Multi-type event reader.
//!
//! Merges the per-type-index streams (`$et-<type>`) into a single
//! TF-position-ordered stream, switching over to a raw transaction-log scan
//! once the index side has nothing left to safely deliver (`IndexMode` →
//! `TfMode`). See `SPEC_FULL.md` for the full component design and
//! `DESIGN.md` for the grounding ledger behind each module.
//!
//! ## Code structure
//!
//! ## ReaderCoordinator
//! the externally visible state machine: lifecycle (`start`/`pause`/
//! `resume`/`dispose`), mode, and the single `deliver` chokepoint enforcing
//! at-most-once delivery past the high-water mark.
//! ## IndexState / index_reader
//! `IndexMode`'s per-stream buffers, the checkpoint safety gate, and the
//! k-way merge.
//! ## TfState / tf_reader
//! `TfMode`'s single raw-log cursor.
//! ## runtime
//! the `acto`-based actor loop that drives `ReaderCoordinator` from real
//! channels and timers; the only module that touches `tokio`.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod index_reader;
pub mod messages;
pub mod metrics;
pub mod output;
pub mod position;
pub mod runtime;
pub mod tf_reader;

pub use config::ReaderConfig;
pub use coordinator::{Mode, ReaderCoordinator};
pub use error::ReaderError;
pub use event::{CheckpointTag, EventRecord, PendingEvent, ResolvedEvent};
pub use messages::{AllReadResult, Effect, InboundMessage, StreamReadResult};
pub use metrics::ReaderMetrics;
pub use output::{OutputEvent, SafeJoinPosition};
pub use position::TfPos;

#[cfg(test)]
mod tests;
