use std::collections::{BTreeMap, BTreeSet};

use crate::error::ReaderError;
use crate::event::type_stream_name;
use crate::position::TfPos;

/// Construction-time options for a [`crate::coordinator::ReaderCoordinator`].
///
/// Validated eagerly in [`ReaderConfig::new`] so construction errors never
/// surface later as a handler-time protocol violation — the same contract
/// `SwarmConfig` and `EphemeralEventsConfig` give their callers in the
/// teacher crate.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub event_types: BTreeSet<String>,
    pub from_tf_pos: TfPos,
    pub from_positions: BTreeMap<String, i32>,
    pub resolve_link_tos: bool,
    pub stop_on_eof: bool,
    pub max_deliveries: Option<u64>,
}

impl ReaderConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_types: impl IntoIterator<Item = String>,
        from_tf_pos: TfPos,
        from_positions: BTreeMap<String, i32>,
        resolve_link_tos: bool,
        stop_on_eof: bool,
        max_deliveries: Option<u64>,
    ) -> Result<Self, ReaderError> {
        let event_types: BTreeSet<String> = event_types.into_iter().collect();
        if event_types.is_empty() {
            return Err(ReaderError::EmptyEventTypes);
        }
        if from_positions.len() != event_types.len() {
            return Err(ReaderError::FromPositionsSizeMismatch {
                got: from_positions.len(),
                expected: event_types.len(),
            });
        }
        for t in &event_types {
            let stream = type_stream_name(t);
            if !from_positions.contains_key(&stream) {
                return Err(ReaderError::FromPositionsMissingType(t.clone()));
            }
        }
        Ok(Self {
            event_types,
            from_tf_pos,
            from_positions,
            resolve_link_tos,
            stop_on_eof,
            max_deliveries,
        })
    }
}
