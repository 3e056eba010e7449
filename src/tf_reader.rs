use std::collections::BTreeSet;

use crate::coordinator::{Mode, ReaderCoordinator};
use crate::error::ReaderError;
use crate::event::type_stream_name;
use crate::messages::{AllReadResult, Effect, TF_READ_COUNT};
use crate::output::OutputEvent;
use crate::position::TfPos;

/// Phase-exclusive state for `TfMode` (§4.3): a single outstanding
/// `ReadAllForward` cursor, no per-type buffering since the raw log is
/// already totally ordered.
pub struct TfState {
    pub(crate) tf_requested: bool,
    pub(crate) tf_eof_position: Option<TfPos>,
}

impl TfState {
    pub fn new() -> Self {
        Self {
            tf_requested: false,
            tf_eof_position: None,
        }
    }
}

/// Issues (or re-issues) a `ReadAllForward` from `from_pos` (§4.1 `resume`,
/// §4.2 switch, §4.3 continued polling).
pub fn request_next(coordinator: &mut ReaderCoordinator, from_pos: TfPos, delay: bool) -> Vec<Effect> {
    if coordinator.disposed {
        return vec![];
    }
    let Mode::Tf(state) = &mut coordinator.mode else {
        return vec![];
    };
    state.tf_requested = true;
    let (commit, prepare) = from_pos.read_all_params();
    vec![Effect::ReadAllForward {
        commit,
        prepare,
        max_count: TF_READ_COUNT,
        resolve_link_tos: coordinator.resolve_link_tos,
    }
    .delayed_if(delay)]
}

/// Completion of a `ReadAllForward`: delivers every event whose type is in
/// the configured set (§4.3), in log order, then either re-polls
/// immediately (more data was returned), backs off and re-polls (caught up
/// to the tip but still tailing), or — when `stopOnEof` applies — emits the
/// terminal `Idle`/`Eof` pair and disposes, per the resolved reading of
/// §4.3's EOF clause (see `SPEC_FULL.md` §9).
pub fn handle_completed(
    coordinator: &mut ReaderCoordinator,
    result: AllReadResult,
    now_millis: i64,
) -> Result<Vec<Effect>, ReaderError> {
    let Mode::Tf(state) = &mut coordinator.mode else {
        return Ok(vec![]);
    };
    if !state.tf_requested {
        return Err(ReaderError::UnrequestedCompletion {
            stream_id: "$all".to_string(),
        });
    }
    state.tf_requested = false;

    let (events, next_pos, tf_eof_position) = match result {
        AllReadResult::Success {
            events,
            next_pos,
            tf_eof_position,
        } => (events, next_pos, tf_eof_position),
        AllReadResult::Other(detail) => {
            return Err(ReaderError::UnsupportedResult {
                stream_id: "$all".to_string(),
                detail,
            })
        }
    };

    // §4.3: "fromTfPos := msg.nextPos" — unconditional on every completion,
    // not just ones that went on to deliver an event, so a `pause`/`resume`
    // or a later `IndexState` re-derivation always sees where the scan
    // actually left off rather than the position at which TfMode began.
    coordinator.from_tf_pos = next_pos;

    let Mode::Tf(state) = &mut coordinator.mode else {
        return Ok(vec![]);
    };
    state.tf_eof_position = Some(tf_eof_position);
    let batch_len = events.len();

    // The type-index streams' own link events are themselves entries in the
    // TF log; a forward scan walks right over them. §4.3 "byStream": when a
    // resolved event's link points into one of the streams we'd otherwise be
    // reading from the index side, it is bookkeeping, not a deliverable
    // event — skip it but keep `from_positions` advancing so a reader that
    // later fell back to the index side would resume from the right spot.
    let index_stream_names: BTreeSet<String> = coordinator.event_types.iter().map(|t| type_stream_name(t)).collect();

    let mut effects = Vec::new();
    for resolved in events {
        if let Some(link) = &resolved.link {
            if index_stream_names.contains(&link.stream_id) {
                let existing = *coordinator.from_positions.get(&link.stream_id).unwrap_or(&0);
                coordinator
                    .from_positions
                    .insert(link.stream_id.clone(), existing.max(link.event_number + 1));
            }
            // A link to anything else (resolveLinkTos following a regular
            // $>-link into an unrelated stream) carries no event of a
            // configured type at the TF position we're scanning; ignore it.
            continue;
        }
        // "byEvent": no link, and the raw event itself is a configured type.
        if !coordinator.event_types.contains(&resolved.event.event_type) {
            continue;
        }
        let tf_pos = resolved.event.log_position;
        let progress = progress_fraction(tf_pos, tf_eof_position);
        effects.extend(coordinator.deliver(resolved, tf_pos, progress, false));
        if coordinator.disposed {
            return Ok(effects);
        }
    }

    let caught_up = next_pos >= tf_eof_position;
    if batch_len > 0 && !caught_up {
        effects.extend(request_next(coordinator, next_pos, false));
        return Ok(effects);
    }

    effects.push(Effect::Publish(OutputEvent::EventReaderIdle {
        correlation_id: coordinator.correlation_id.clone(),
        timestamp: now_millis,
    }));
    effects.push(coordinator.tick());

    if coordinator.stop_on_eof {
        coordinator.dispose();
        effects.push(Effect::Publish(OutputEvent::EventReaderEof {
            correlation_id: coordinator.correlation_id.clone(),
            max_events_reached: false,
        }));
    } else {
        effects.extend(request_next(coordinator, next_pos, true));
    }
    Ok(effects)
}

/// §4.3: `progress = 100.0 * event.logPosition / tfEofPosition` — same
/// 0-100 percentage scale the index side uses (§4.2), so a subscriber sees
/// one consistent unit across the mode switch regardless of which path
/// delivered the event.
fn progress_fraction(tf_pos: TfPos, tf_eof_position: TfPos) -> f64 {
    if tf_eof_position.commit <= 0 {
        return 100.0;
    }
    (100.0 * tf_pos.commit as f64 / tf_eof_position.commit as f64).clamp(0.0, 100.0)
}
