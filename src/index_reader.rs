use std::collections::{BTreeMap, BTreeSet};

use crate::coordinator::{Mode, ReaderCoordinator};
use crate::error::ReaderError;
use crate::event::{self, parse_checkpoint_tag, CHECKPOINT_STREAM};
use crate::messages::{Effect, StreamReadResult, STREAM_READ_COUNT};
use crate::output::OutputEvent;
use crate::position::TfPos;
use crate::tf_reader::TfState;

/// Phase-exclusive state for `IndexMode` (§4.2). Keyed throughout by the
/// type-index stream name (`"$et-<type>"`) — a link event's own `stream_id`
/// equals the stream it was read from, so there is no separate "type" key to
/// keep in sync with the stream key.
pub struct IndexState {
    pub(crate) buffers: BTreeMap<String, Vec<event::PendingEvent>>,
    pub(crate) next_event_number: BTreeMap<String, i32>,
    pub(crate) eofs: BTreeMap<String, bool>,
    pub(crate) requested: BTreeSet<String>,
    /// The most recent position the `$et` checkpoint stream has certified as
    /// fully indexed. `None` until the first backward probe completes.
    pub(crate) checkpoint_pos: Option<TfPos>,
    pub(crate) checkpoint_next_event_number: i32,
    pub(crate) checkpoint_requested: bool,
    pub(crate) checkpoint_probed_backward: bool,
}

impl IndexState {
    pub fn new() -> Self {
        Self {
            buffers: BTreeMap::new(),
            next_event_number: BTreeMap::new(),
            eofs: BTreeMap::new(),
            requested: BTreeSet::new(),
            checkpoint_pos: None,
            checkpoint_next_event_number: 0,
            checkpoint_requested: false,
            checkpoint_probed_backward: false,
        }
    }

    /// Issues the initial per-type forward reads plus the checkpoint
    /// backward probe (§4.1 `start`).
    pub fn start(
        &mut self,
        event_types: &BTreeSet<String>,
        from_positions: &BTreeMap<String, i32>,
        resolve_link_tos: bool,
    ) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(event_types.len() + 1);
        for t in event_types {
            let stream = event::type_stream_name(t);
            let from_event_number = *from_positions.get(&stream).unwrap_or(&0);
            self.buffers.insert(stream.clone(), Vec::new());
            self.next_event_number.insert(stream.clone(), from_event_number);
            self.eofs.insert(stream.clone(), false);
            self.requested.insert(stream.clone());
            effects.push(Effect::ReadStreamForward {
                stream_id: stream,
                from_event_number,
                max_count: STREAM_READ_COUNT,
                resolve_link_tos,
            });
        }
        self.checkpoint_requested = true;
        effects.push(Effect::ReadStreamBackward {
            stream_id: CHECKPOINT_STREAM.to_string(),
            from_event_number: -1,
            max_count: 1,
        });
        effects
    }
}

/// Re-issues the reads that would currently be outstanding, for a reader
/// coming back from `pause` (§4.1 `resume`): any stream without buffered
/// data and not already at EOF, plus the checkpoint tail if not already
/// in flight.
pub fn resume_reads(coordinator: &mut ReaderCoordinator) -> Vec<Effect> {
    let Mode::Index(state) = &mut coordinator.mode else {
        return vec![];
    };
    let mut effects = Vec::new();
    let streams: Vec<String> = state.buffers.keys().cloned().collect();
    for stream in streams {
        let eof = *state.eofs.get(&stream).unwrap_or(&false);
        let has_buffer = !state.buffers.get(&stream).map(Vec::is_empty).unwrap_or(true);
        if !eof && !has_buffer && !state.requested.contains(&stream) {
            let from_event_number = *state.next_event_number.get(&stream).unwrap_or(&0);
            state.requested.insert(stream.clone());
            effects.push(Effect::ReadStreamForward {
                stream_id: stream,
                from_event_number,
                max_count: STREAM_READ_COUNT,
                resolve_link_tos: coordinator.resolve_link_tos,
            });
        }
    }
    if !state.checkpoint_requested {
        state.checkpoint_requested = true;
        effects.push(checkpoint_follow_effect(state));
    }
    effects
}

fn checkpoint_follow_effect(state: &IndexState) -> Effect {
    if state.checkpoint_probed_backward {
        Effect::ReadStreamForward {
            stream_id: CHECKPOINT_STREAM.to_string(),
            from_event_number: state.checkpoint_next_event_number,
            max_count: crate::messages::CHECKPOINT_READ_COUNT,
            resolve_link_tos: false,
        }
    } else {
        Effect::ReadStreamBackward {
            stream_id: CHECKPOINT_STREAM.to_string(),
            from_event_number: -1,
            max_count: 1,
        }
    }
}

/// Completion of the one-shot backward probe used to learn the latest
/// checkpoint position cheaply, without scanning `$et` from the start
/// (§4.2).
pub fn handle_checkpoint_backward_completed(
    coordinator: &mut ReaderCoordinator,
    stream_id: String,
    result: StreamReadResult,
) -> Result<Vec<Effect>, ReaderError> {
    if coordinator.mode_is_tf() {
        return Ok(vec![]);
    }
    let Mode::Index(state) = &mut coordinator.mode else {
        return Ok(vec![]);
    };
    if !state.checkpoint_requested || state.checkpoint_probed_backward {
        return Err(ReaderError::UnrequestedCompletion { stream_id });
    }
    state.checkpoint_requested = false;
    state.checkpoint_probed_backward = true;

    match result {
        StreamReadResult::Success { events, next_event_number, .. } => {
            if let Some(newest) = events.first() {
                let tag = parse_checkpoint_tag(&newest.event.data).map_err(|source| ReaderError::BadCheckpointTag {
                    stream_id: stream_id.clone(),
                    source,
                })?;
                state.checkpoint_pos = Some(tag);
            }
            state.checkpoint_next_event_number = next_event_number;
        }
        StreamReadResult::NoStream => {
            // No checkpoint has ever been written; nothing is provably
            // indexed yet, so the safety gate stays closed until a forward
            // tail read sees the first checkpoint event.
            state.checkpoint_next_event_number = 0;
        }
        StreamReadResult::Other(detail) => {
            return Err(ReaderError::UnsupportedResult { stream_id, detail });
        }
    }

    let delay = matches!(
        &coordinator.mode,
        Mode::Index(s) if s.checkpoint_pos.is_none()
    );
    let Mode::Index(state) = &mut coordinator.mode else {
        unreachable!()
    };
    state.checkpoint_requested = true;
    let mut effects = vec![checkpoint_follow_effect(state).delayed_if(delay)];
    effects.extend(process_buffers(coordinator));
    effects.extend(check_switch(coordinator));
    effects.push(coordinator.tick());
    Ok(effects)
}

/// Completion of a forward tail read of `$et`, keeping `checkpoint_pos`
/// current as the store keeps indexing (§4.2).
pub fn handle_checkpoint_forward_completed(
    coordinator: &mut ReaderCoordinator,
    stream_id: String,
    result: StreamReadResult,
) -> Result<Vec<Effect>, ReaderError> {
    apply_checkpoint_event(coordinator, stream_id, result)
}

pub(crate) fn apply_checkpoint_event(
    coordinator: &mut ReaderCoordinator,
    stream_id: String,
    result: StreamReadResult,
) -> Result<Vec<Effect>, ReaderError> {
    let Mode::Index(state) = &mut coordinator.mode else {
        return Ok(vec![]);
    };
    if !state.checkpoint_requested {
        return Err(ReaderError::UnrequestedCompletion { stream_id });
    }
    state.checkpoint_requested = false;

    let (events, next_event_number, empty) = match result {
        StreamReadResult::Success { events, next_event_number, .. } => {
            let empty = events.is_empty();
            (events, next_event_number, empty)
        }
        StreamReadResult::NoStream => (vec![], state.checkpoint_next_event_number, true),
        StreamReadResult::Other(detail) => return Err(ReaderError::UnsupportedResult { stream_id, detail }),
    };

    for candidate in &events {
        let tag = parse_checkpoint_tag(&candidate.event.data).map_err(|source| ReaderError::BadCheckpointTag {
            stream_id: CHECKPOINT_STREAM.to_string(),
            source,
        })?;
        if state.checkpoint_pos.is_none_or(|p| tag > p) {
            state.checkpoint_pos = Some(tag);
        }
    }
    state.checkpoint_next_event_number = next_event_number;
    state.checkpoint_requested = true;

    let mut effects = vec![checkpoint_follow_effect(state).delayed_if(empty)];
    effects.extend(process_buffers(coordinator));
    effects.extend(check_switch(coordinator));
    effects.push(coordinator.tick());
    Ok(effects)
}

/// Completion of a forward read on a type-index stream: buffers the
/// resolved candidates (link-resolved, TF position attached) and drains
/// whatever the safety gate now allows (§4.2).
pub fn handle_stream_forward_completed(
    coordinator: &mut ReaderCoordinator,
    stream_id: String,
    result: StreamReadResult,
    now_millis: i64,
) -> Result<Vec<Effect>, ReaderError> {
    if stream_id == CHECKPOINT_STREAM {
        let Mode::Index(state) = &coordinator.mode else {
            return Ok(vec![]);
        };
        return if state.checkpoint_probed_backward {
            handle_checkpoint_forward_completed(coordinator, stream_id, result)
        } else {
            Err(ReaderError::UnrequestedCompletion { stream_id })
        };
    }

    let Mode::Index(state) = &mut coordinator.mode else {
        return Ok(vec![]);
    };
    if !state.requested.remove(&stream_id) {
        return Err(ReaderError::UnrequestedCompletion { stream_id });
    }

    // §4.2 step 5 ties `eofs[stream]` to whether the returned batch was
    // empty, not to a `nextEventNumber > lastEventNumber` comparison — a
    // batch can be non-empty and still leave the stream caught up to its
    // tip, but that's an efficiency question for the next re-request, not
    // the safety-relevant "is there anything buffered to merge" signal
    // `process_buffers`/`check_switch` read off `eofs`.
    let (events, next_event_number, last_event_number, hit_eof) = match result {
        StreamReadResult::Success {
            events,
            next_event_number,
            last_event_number,
        } => {
            let hit_eof = events.is_empty();
            (events, next_event_number, last_event_number, hit_eof)
        }
        StreamReadResult::NoStream => (vec![], *state.next_event_number.get(&stream_id).unwrap_or(&0), -1, true),
        StreamReadResult::Other(detail) => return Err(ReaderError::UnsupportedResult { stream_id, detail }),
    };

    let empty = events.is_empty();
    for resolved in events {
        let position_event = resolved.position_event();
        // §3/§4.2: `tfPos` is parsed from `positionEvent.metadata` as a
        // checkpoint-tag JSON payload, not read off `positionEvent`'s own
        // `logPosition` field — for a link-resolved index read that field
        // reflects where the store physically served the record from, not
        // necessarily the globally comparable TF position the checkpoint tag
        // carries.
        let tf_pos = parse_checkpoint_tag(&position_event.metadata).map_err(|source| ReaderError::BadCheckpointTag {
            stream_id: stream_id.clone(),
            source,
        })?;
        // Spec §4.2: `progress = 100.0 * (link ?? event).eventNumber /
        // lastEventNumber` — flagged "incorrect" by the source itself but
        // preserved verbatim (SPEC_FULL.md §9) for observable compatibility.
        let progress = if last_event_number > 0 {
            (100.0 * position_event.event_number as f64 / last_event_number as f64).clamp(0.0, 100.0)
        } else {
            100.0
        };
        state
            .buffers
            .entry(stream_id.clone())
            .or_default()
            .push(event::PendingEvent { resolved, tf_pos, progress });
    }
    // Max-monotone for the same reason as the `from_positions` update below:
    // a late or out-of-order completion must never walk the read cursor
    // backwards and re-read already-consumed events.
    let existing_cursor = *state.next_event_number.get(&stream_id).unwrap_or(&0);
    state
        .next_event_number
        .insert(stream_id.clone(), existing_cursor.max(next_event_number));
    state.eofs.insert(stream_id.clone(), hit_eof);

    // §4.2 step 5 / §9 "fromPositions update semantics": index completions
    // are the other path (besides TF's byStream) that advances the
    // coordinator-level `from_positions`, max-monotone so a late or
    // out-of-order completion can never regress it.
    let existing = *coordinator.from_positions.get(&stream_id).unwrap_or(&0);
    coordinator
        .from_positions
        .insert(stream_id.clone(), existing.max(next_event_number));

    let mut effects = idle_effect(coordinator, now_millis);
    effects.extend(process_buffers(coordinator));
    let switched = check_switch(coordinator);
    if switched.is_empty() {
        effects.extend(maybe_rerequest_stream(coordinator, &stream_id, hit_eof, empty));
    }
    effects.extend(switched);
    effects.push(coordinator.tick());
    Ok(effects)
}

/// §4.2 "Idle detection": when every configured type-stream has hit EOF,
/// publish `EventReaderIdle`. Fires on every completion that leaves all
/// `eofs` true, same as the TF reader republishing `Idle` on every caught-up
/// completion rather than only on the first one — the host is expected to
/// treat it as a level signal, not an edge-triggered one.
fn idle_effect(coordinator: &ReaderCoordinator, now_millis: i64) -> Vec<Effect> {
    let Mode::Index(state) = &coordinator.mode else {
        return vec![];
    };
    if !state.eofs.is_empty() && state.eofs.values().all(|&eof| eof) {
        vec![Effect::Publish(OutputEvent::EventReaderIdle {
            correlation_id: coordinator.correlation_id.clone(),
            timestamp: now_millis,
        })]
    } else {
        vec![]
    }
}

fn maybe_rerequest_stream(
    coordinator: &mut ReaderCoordinator,
    stream_id: &str,
    hit_eof: bool,
    empty_batch: bool,
) -> Vec<Effect> {
    if coordinator.paused || coordinator.pause_requested || coordinator.disposed {
        return vec![];
    }
    let Mode::Index(state) = &mut coordinator.mode else {
        return vec![];
    };
    // `hit_eof` and `empty_batch` are the same observation (an empty
    // returned batch, per §4.2 step 5) by the time both reach here; kept as
    // two parameters because they name distinct spec concepts at the call
    // site (EOF bookkeeping vs. the re-request backoff flag).
    if hit_eof || state.buffers.get(stream_id).map(Vec::is_empty).unwrap_or(true) {
        state.requested.insert(stream_id.to_string());
        let from_event_number = *state.next_event_number.get(stream_id).unwrap_or(&0);
        return vec![Effect::ReadStreamForward {
            stream_id: stream_id.to_string(),
            from_event_number,
            max_count: STREAM_READ_COUNT,
            resolve_link_tos: coordinator.resolve_link_tos,
        }
        .delayed_if(empty_batch)];
    }
    vec![]
}

/// The k-way merge (§4.2, invariant 1). Each pass scans every configured
/// stream: a stream whose buffer is empty but *not* at EOF means we have no
/// visibility into what it might deliver next, so we cannot trust any
/// candidate found elsewhere to truly be the global minimum — the whole pass
/// aborts rather than risk delivering an event out of TF order. Only once
/// every stream either has a buffered head or is known to be at EOF do we
/// pick the smallest head across all of them and check whether it is safe
/// to deliver: unconditionally safe if no stream is silently at EOF (every
/// stream's current head was compared, so this candidate really is the
/// minimum — the checkpoint boundary is never consulted on this path, per
/// §4.2 `processBuffers`), otherwise only if it is strictly inside the
/// indexed prefix (`tf_pos < checkpoint_pos`, defaulting to `lastCheckpointPos`'s
/// spec'd initial value `(0, 0)` until a checkpoint has actually been read) —
/// a stream sitting at EOF might still have an earlier not-yet-indexed event
/// on the way.
pub(crate) fn process_buffers(coordinator: &mut ReaderCoordinator) -> Vec<Effect> {
    let mut effects = Vec::new();
    loop {
        let Mode::Index(state) = &coordinator.mode else {
            break;
        };

        let mut any_eof = false;
        let mut candidate: Option<(TfPos, String)> = None;
        let mut waiting = false;
        for (stream, buf) in &state.buffers {
            match buf.first() {
                Some(head) => {
                    if candidate.as_ref().is_none_or(|(pos, _)| head.tf_pos < *pos) {
                        candidate = Some((head.tf_pos, stream.clone()));
                    }
                }
                None if *state.eofs.get(stream).unwrap_or(&false) => any_eof = true,
                None => {
                    waiting = true;
                    break;
                }
            }
        }
        if waiting {
            break;
        }
        let Some((pos, stream)) = candidate else {
            break;
        };
        if any_eof {
            let checkpoint_pos = state.checkpoint_pos.unwrap_or(TfPos::new(0, 0));
            if pos >= checkpoint_pos {
                break;
            }
        }

        let Mode::Index(state) = &mut coordinator.mode else {
            break;
        };
        let pending = state.buffers.get_mut(&stream).unwrap().remove(0);
        effects.extend(coordinator.deliver(pending.resolved, pending.tf_pos, pending.progress, true));
        if coordinator.disposed {
            break;
        }
    }
    effects
}

/// Decides whether IndexMode has extracted everything it safely can and
/// should hand off to a raw TF scan (§4.2 "switch"): for every configured
/// type-stream, either it has hit EOF, or its buffered head already sits
/// beyond the indexed prefix (`>= checkpoint_pos`, the same boundary
/// `process_buffers` refuses to cross, defaulting to `lastCheckpointPos`'s
/// spec'd initial value `(0, 0)` until a checkpoint has actually been read).
/// A stream can satisfy this with a non-empty buffer — the event sitting in
/// it is not lost, since TfMode's scan starts at-or-before `last_delivered`
/// and will re-encounter it; requiring every buffer to be literally empty
/// here would stall forever if one stream keeps filling past the checkpoint
/// while a sibling type has genuinely run dry.
pub(crate) fn check_switch(coordinator: &mut ReaderCoordinator) -> Vec<Effect> {
    let ready = match &coordinator.mode {
        Mode::Index(state) => {
            let checkpoint_pos = state.checkpoint_pos.unwrap_or(TfPos::new(0, 0));
            !state.buffers.is_empty()
                && state.buffers.iter().all(|(stream, buf)| {
                    let eof = *state.eofs.get(stream).unwrap_or(&false);
                    eof || buf.first().is_some_and(|head| head.tf_pos >= checkpoint_pos)
                })
        }
        Mode::Tf(_) => false,
    };
    if !ready {
        return vec![];
    }

    let switch_from = coordinator.last_delivered.max(coordinator.from_tf_pos);
    coordinator.mode = Mode::Tf(TfState::new());
    if let Some(metrics) = &coordinator.metrics {
        metrics.mode.set(1);
    }
    tracing::debug!(%switch_from, "switching from index mode to tf mode");
    crate::tf_reader::request_next(coordinator, switch_from, false)
}
