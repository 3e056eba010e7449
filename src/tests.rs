use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use quickcheck_macros::quickcheck;

use crate::config::ReaderConfig;
use crate::coordinator::ReaderCoordinator;
use crate::error::ReaderError;
use crate::event::{type_stream_name, EventRecord, ResolvedEvent, CHECKPOINT_STREAM};
use crate::messages::{AllReadResult, Effect, StreamReadResult};
use crate::output::OutputEvent;
use crate::position::TfPos;

fn record(stream_id: &str, event_number: i32, event_type: &str, pos: TfPos) -> EventRecord {
    // The checkpoint-tag JSON is what index reads parse `tfPos` out of
    // (§3/§4.2); carry it in `metadata` so `index_reader` can recover `pos`
    // the same way a real store-resolved link event would.
    let tag = format!(r#"{{"$v":"1","$s":{{}},"$p":{{"commit":{},"prepare":{}}}}}"#, pos.commit, pos.prepare);
    EventRecord {
        stream_id: stream_id.to_string(),
        event_number,
        event_id: format!("{stream_id}-{event_number}"),
        event_type: event_type.to_string(),
        data: tag.clone().into_bytes(),
        metadata: tag.into_bytes(),
        timestamp: 0,
        log_position: pos,
        is_json: true,
    }
}

fn index_resolved(event_type: &str, index_number: i32, orig_stream: &str, orig_number: i32, pos: TfPos) -> ResolvedEvent {
    let stream = type_stream_name(event_type);
    ResolvedEvent {
        event: record(&stream, index_number, event_type, pos),
        link: Some(record(orig_stream, orig_number, event_type, pos)),
    }
}

fn checkpoint_event(index_number: i32, pos: TfPos) -> ResolvedEvent {
    let data = format!(r#"{{"$v":"1","$s":{{}},"$p":{{"commit":{},"prepare":{}}}}}"#, pos.commit, pos.prepare);
    let mut ev = record(CHECKPOINT_STREAM, index_number, "$checkpoint", pos);
    ev.data = data.into_bytes();
    ResolvedEvent { event: ev, link: None }
}

fn config(types: &[&str]) -> ReaderConfig {
    let from_positions: BTreeMap<String, i32> = types.iter().map(|t| (type_stream_name(t), 0)).collect();
    ReaderConfig::new(
        types.iter().map(|t| t.to_string()),
        TfPos::START,
        from_positions,
        true,
        false,
        None,
    )
    .unwrap()
}

fn checkpoint_backward(c: &mut ReaderCoordinator, pos: TfPos) {
    c.on_read_stream_backward_completed(
        CHECKPOINT_STREAM.to_string(),
        StreamReadResult::Success {
            events: vec![checkpoint_event(0, pos)],
            next_event_number: 1,
            last_event_number: 0,
        },
    )
    .unwrap();
}

fn checkpoint_backward_no_stream(c: &mut ReaderCoordinator) {
    c.on_read_stream_backward_completed(CHECKPOINT_STREAM.to_string(), StreamReadResult::NoStream)
        .unwrap();
}

fn delivered_positions(effects: &[Effect]) -> Vec<TfPos> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Publish(OutputEvent::CommittedEventDistributed {
                resolved_event: Some(ev),
                ..
            }) => Some(ev.position_event().log_position),
            _ => None,
        })
        .collect()
}

fn publishes_eof(effects: &[Effect], max_events_reached: bool) -> bool {
    effects.iter().any(|e| {
        matches!(
            e,
            Effect::Publish(OutputEvent::EventReaderEof { max_events_reached: m, .. }) if *m == max_events_reached
        )
    })
}

fn stream_read(stream: &str, events: Vec<ResolvedEvent>, next: i32, last: i32) -> (String, StreamReadResult) {
    (
        stream.to_string(),
        StreamReadResult::Success {
            events,
            next_event_number: next,
            last_event_number: last,
        },
    )
}

// --- Scenario A: two-type merge in IndexMode delivers strictly by TfPos.
// Neither stream's head can be trusted as "next" until every configured
// stream has reported in at least once (§4.2 processBuffers: an empty,
// not-yet-eof buffer blocks the whole merge pass) — so Foo's completion
// alone buffers its event without delivering anything, and only once Bar's
// completion arrives do both get merged out in TF order. ---
#[test]
fn scenario_a_merges_two_types_in_tf_order() {
    let mut c = ReaderCoordinator::new(config(&["Foo", "Bar"]), "corr-a").unwrap();
    c.start();
    checkpoint_backward(&mut c, TfPos::new(10, 0));

    let (stream, result) = stream_read(
        &type_stream_name("Foo"),
        vec![index_resolved("Foo", 0, "orig-foo", 0, TfPos::new(1, 0))],
        1,
        0,
    );
    let effects = c.on_read_stream_forward_completed(stream, result, 0).unwrap();
    assert!(
        delivered_positions(&effects).is_empty(),
        "Bar has not reported in yet, so Foo's buffered event cannot be proven next"
    );

    let (stream, result) = stream_read(
        &type_stream_name("Bar"),
        vec![index_resolved("Bar", 0, "orig-bar", 0, TfPos::new(2, 0))],
        1,
        0,
    );
    let effects = c.on_read_stream_forward_completed(stream, result, 0).unwrap();
    assert_eq!(delivered_positions(&effects), vec![TfPos::new(1, 0), TfPos::new(2, 0)]);
}

// --- §4.2 processBuffers delivers the global-minimum head unconditionally
// once every configured stream has a buffered head and none is silently at
// EOF — this is true even before any `$et` checkpoint has ever been read
// (`lastCheckpointPos`'s spec'd initial value is `(0, 0)`, not "unknown").
// Regression for a prior stall: if both type-index streams were populated
// before the first checkpoint write, gating every delivery on a known
// checkpoint left the reader stuck forever on valid input. ---
#[test]
fn delivers_before_any_checkpoint_is_known_when_no_stream_is_at_eof() {
    let mut c = ReaderCoordinator::new(config(&["Foo", "Bar"]), "corr-nocheckpoint").unwrap();
    c.start();
    checkpoint_backward_no_stream(&mut c);

    let (stream, result) = stream_read(
        &type_stream_name("Foo"),
        vec![index_resolved("Foo", 0, "orig-foo", 0, TfPos::new(1, 0))],
        1,
        0,
    );
    let effects = c.on_read_stream_forward_completed(stream, result, 0).unwrap();
    assert!(delivered_positions(&effects).is_empty(), "Bar has not reported in yet");

    let (stream, result) = stream_read(
        &type_stream_name("Bar"),
        vec![index_resolved("Bar", 0, "orig-bar", 0, TfPos::new(2, 0))],
        1,
        0,
    );
    let effects = c.on_read_stream_forward_completed(stream, result, 0).unwrap();
    assert_eq!(delivered_positions(&effects), vec![TfPos::new(1, 0), TfPos::new(2, 0)]);
}

// --- Companion to the above for `check_switch`: with no checkpoint ever
// observed, a reader whose single configured stream hits EOF must still be
// able to switch to TfMode rather than stall waiting on a checkpoint that
// may never arrive. ---
#[test]
fn switches_to_tf_mode_with_no_checkpoint_known_once_stream_is_at_eof() {
    let mut c = ReaderCoordinator::new(config(&["Foo"]), "corr-switch-nocheckpoint").unwrap();
    c.start();
    checkpoint_backward_no_stream(&mut c);

    let (stream, result) = stream_read(&type_stream_name("Foo"), vec![], 0, -1);
    c.on_read_stream_forward_completed(stream, result, 0).unwrap();

    assert!(c.mode_is_tf());
}

// --- Scenario B: duplicate / out-of-order completions are discarded ---
#[test]
fn scenario_b_discards_duplicate_delivery() {
    let mut c = ReaderCoordinator::new(config(&["Foo"]), "corr-b").unwrap();
    c.start();
    checkpoint_backward(&mut c, TfPos::new(10, 0));

    let resolved = index_resolved("Foo", 0, "orig-foo", 0, TfPos::new(1, 0));
    let (stream, result) = stream_read(&type_stream_name("Foo"), vec![resolved.clone()], 1, 0);
    let effects = c.on_read_stream_forward_completed(stream.clone(), result, 0).unwrap();
    assert_eq!(delivered_positions(&effects), vec![TfPos::new(1, 0)]);
    assert_eq!(c.last_delivered(), TfPos::new(1, 0));

    // The same event arrives again (e.g. a re-request raced with a retry).
    let (stream2, result2) = stream_read(&stream, vec![resolved], 2, 1);
    let effects = c.on_read_stream_forward_completed(stream2, result2, 0).unwrap();
    assert!(delivered_positions(&effects).is_empty());
    assert_eq!(c.delivered_count(), 1);
}

// --- Scenario C: pause suspends reads; resume re-requests ---
#[test]
fn scenario_c_pause_then_resume() {
    let mut c = ReaderCoordinator::new(config(&["Foo"]), "corr-c").unwrap();
    c.start();
    assert!(!c.is_paused());
    c.pause();
    let resumed = c.resume();
    assert!(!c.is_paused());
    assert!(resumed.iter().any(|e| matches!(e, Effect::ReadStreamForward { .. })));
}

// --- Scenario D: IndexMode switches to TfMode once every stream buffer is
// drained and at EOF, with a known checkpoint position ---
#[test]
fn scenario_d_switches_to_tf_mode_on_index_exhaustion() {
    let mut c = ReaderCoordinator::new(config(&["Foo"]), "corr-d").unwrap();
    c.start();
    checkpoint_backward(&mut c, TfPos::new(5, 0));

    let (stream, result) = stream_read(&type_stream_name("Foo"), vec![], 0, -1);
    c.on_read_stream_forward_completed(stream, result, 0).unwrap();

    assert!(c.mode_is_tf());
}

// --- check_switch must not wait for a buffer to be literally empty: once
// every configured stream either is at EOF or already has a buffered head
// beyond the checkpoint boundary, the switch proceeds even though that head
// is still sitting in its buffer, unconsumed — that event isn't lost,
// TfMode's scan starts at-or-before `last_delivered` and will walk over it
// again ---
#[test]
fn switches_to_tf_mode_even_with_unconsumed_buffered_event_beyond_checkpoint() {
    let mut c = ReaderCoordinator::new(config(&["Foo", "Bar"]), "corr-switch").unwrap();
    c.start();
    checkpoint_backward(&mut c, TfPos::new(100, 0));

    // Bar reports in first so Foo's later event isn't blocked from merging.
    let (stream, result) = stream_read(&type_stream_name("Bar"), vec![], 0, -1);
    c.on_read_stream_forward_completed(stream, result, 0).unwrap();
    assert!(!c.mode_is_tf());

    // Foo returns an event beyond the checkpoint, without itself having hit
    // EOF yet — the old "every buffer must be literally empty" rule would
    // stall here forever since Foo's buffer now holds an undeliverable
    // event that is never popped.
    let (stream, result) = stream_read(
        &type_stream_name("Foo"),
        vec![index_resolved("Foo", 0, "orig-foo", 0, TfPos::new(150, 0))],
        1,
        0,
    );
    let effects = c.on_read_stream_forward_completed(stream, result, 0).unwrap();
    assert!(delivered_positions(&effects).is_empty());
    assert!(
        c.mode_is_tf(),
        "Bar's eof plus Foo's buffered-but-beyond-checkpoint head should already allow the switch"
    );
}

// --- §4.2 idle detection: publishes EventReaderIdle once every configured
// stream has reported EOF ---
#[test]
fn publishes_idle_once_all_streams_are_at_eof() {
    let mut c = ReaderCoordinator::new(config(&["Foo"]), "corr-idle").unwrap();
    c.start();
    checkpoint_backward(&mut c, TfPos::new(5, 0));

    let (stream, result) = stream_read(&type_stream_name("Foo"), vec![], 0, -1);
    let effects = c.on_read_stream_forward_completed(stream, result, 1_234).unwrap();
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::Publish(OutputEvent::EventReaderIdle { timestamp: 1_234, .. })
    )));
}

// --- §4.3 byStream: a TF-log link event pointing into one of the
// configured type-index streams is bookkeeping, not a delivery; it advances
// `fromPositions` but nothing is published ---
#[test]
fn tf_mode_skips_byestream_link_events_but_advances_from_positions() {
    let cfg = ReaderConfig::new(
        vec!["Foo".to_string()],
        TfPos::START,
        [(type_stream_name("Foo"), 0)].into_iter().collect(),
        true,
        false,
        None,
    )
    .unwrap();
    let mut c = ReaderCoordinator::new(cfg, "corr-bystream").unwrap();
    c.start();
    checkpoint_backward(&mut c, TfPos::new(5, 0));
    let (stream, result) = stream_read(&type_stream_name("Foo"), vec![], 0, -1);
    c.on_read_stream_forward_completed(stream, result, 0).unwrap();
    assert!(c.mode_is_tf());

    let link_to_index_stream = ResolvedEvent {
        event: record("orig-stream", 7, "Foo", TfPos::new(20, 0)),
        link: Some(record(&type_stream_name("Foo"), 3, "Foo", TfPos::new(20, 0))),
    };
    let effects = c
        .on_read_all_forward_completed(
            AllReadResult::Success {
                events: vec![link_to_index_stream],
                next_pos: TfPos::new(21, 0),
                tf_eof_position: TfPos::new(21, 0),
            },
            0,
        )
        .unwrap();

    assert!(delivered_positions(&effects).is_empty());
}

// --- §9 "fromPositions update semantics": index completions advance
// `from_positions` max-monotone, the same contract TF's byStream path
// upholds after the mode switch ---
#[test]
fn index_completion_advances_from_positions_max_monotone() {
    let mut c = ReaderCoordinator::new(config(&["Foo"]), "corr-frompos").unwrap();
    c.start();
    assert_eq!(*c.from_positions().get(&type_stream_name("Foo")).unwrap(), 0);

    // An empty completion still advances `next_event_number`/`from_positions`
    // and, since the batch was empty, gets automatically re-requested.
    let (stream, result) = stream_read(&type_stream_name("Foo"), vec![], 5, -1);
    c.on_read_stream_forward_completed(stream, result, 0).unwrap();
    assert_eq!(*c.from_positions().get(&type_stream_name("Foo")).unwrap(), 5);

    // A stale, lower nextEventNumber on the re-requested read must not
    // regress the high-water mark.
    let (stream, result) = stream_read(&type_stream_name("Foo"), vec![], 2, -1);
    c.on_read_stream_forward_completed(stream, result, 0).unwrap();
    assert_eq!(*c.from_positions().get(&type_stream_name("Foo")).unwrap(), 5);
}

// --- Scenario E: stop-after-N disposes and emits a terminal Eof ---
#[test]
fn scenario_e_stops_after_max_deliveries() {
    let cfg = ReaderConfig::new(
        vec!["Foo".to_string()],
        TfPos::START,
        [(type_stream_name("Foo"), 0)].into_iter().collect(),
        true,
        false,
        Some(1),
    )
    .unwrap();
    let mut c = ReaderCoordinator::new(cfg, "corr-e").unwrap();
    c.start();
    checkpoint_backward(&mut c, TfPos::new(10, 0));

    let (stream, result) = stream_read(
        &type_stream_name("Foo"),
        vec![index_resolved("Foo", 0, "orig-foo", 0, TfPos::new(1, 0))],
        1,
        0,
    );
    let effects = c.on_read_stream_forward_completed(stream, result, 0).unwrap();
    assert_eq!(delivered_positions(&effects), vec![TfPos::new(1, 0)]);
    assert!(publishes_eof(&effects, true));
    assert!(c.is_disposed());
}

// --- Scenario F: TF-mode EOF with stopOnEof publishes Idle then a
// non-max-events Eof and disposes, with no LastCommitPosition marker ---
#[test]
fn scenario_f_tf_eof_with_stop_on_eof() {
    let cfg = ReaderConfig::new(
        vec!["Foo".to_string()],
        TfPos::START,
        [(type_stream_name("Foo"), 0)].into_iter().collect(),
        true,
        true,
        None,
    )
    .unwrap();
    let mut c = ReaderCoordinator::new(cfg, "corr-f").unwrap();
    c.start();
    checkpoint_backward(&mut c, TfPos::new(5, 0));
    let (stream, result) = stream_read(&type_stream_name("Foo"), vec![], 0, -1);
    c.on_read_stream_forward_completed(stream, result, 0).unwrap();
    assert!(c.mode_is_tf());

    let effects = c
        .on_read_all_forward_completed(
            AllReadResult::Success {
                events: vec![],
                next_pos: TfPos::new(5, 0),
                tf_eof_position: TfPos::new(5, 0),
            },
            1_000,
        )
        .unwrap();

    assert!(effects
        .iter()
        .any(|e| matches!(e, Effect::Publish(OutputEvent::EventReaderIdle { .. }))));
    assert!(publishes_eof(&effects, false));
    assert!(!effects
        .iter()
        .any(|e| matches!(e, Effect::Publish(OutputEvent::LastCommitPosition(_)))));
    assert!(c.is_disposed());
}

#[test]
fn unrequested_completion_is_reported_as_an_error() {
    let mut c = ReaderCoordinator::new(config(&["Foo"]), "corr-err").unwrap();
    // No `start()` was called, so nothing is outstanding.
    let (stream, result) = stream_read(&type_stream_name("Foo"), vec![], 0, -1);
    let err = c.on_read_stream_forward_completed(stream, result, 0).unwrap_err();
    assert!(matches!(err, ReaderError::UnrequestedCompletion { .. }));
}

#[test]
fn stale_stream_completion_in_tf_mode_is_dropped_not_errored() {
    let mut c = ReaderCoordinator::new(config(&["Foo"]), "corr-stale").unwrap();
    c.start();
    checkpoint_backward(&mut c, TfPos::new(5, 0));
    let (stream, result) = stream_read(&type_stream_name("Foo"), vec![], 0, -1);
    c.on_read_stream_forward_completed(stream.clone(), result, 0).unwrap();
    assert!(c.mode_is_tf());

    // A late reply for the now-abandoned index stream arrives after the
    // switch; it must not be reported as a protocol violation.
    let (stream2, result2) = stream_read(&stream, vec![], 0, -1);
    let effects = c.on_read_stream_forward_completed(stream2, result2, 0).unwrap();
    assert!(effects.is_empty());
}

// --- Property: within a single IndexMode merge pass, delivered events are
// strictly increasing in TfPos (invariant 1) ---
#[quickcheck]
fn prop_index_mode_delivers_strictly_increasing_positions(mut commits: Vec<i64>) -> bool {
    commits.truncate(12);
    commits.retain(|c| *c > 0);
    commits.sort_unstable();
    commits.dedup();
    if commits.len() < 2 {
        return true;
    }

    let mut c = ReaderCoordinator::new(config(&["Foo", "Bar"]), "corr-prop").unwrap();
    c.start();
    let top = commits.last().copied().unwrap_or(0) + 1;
    checkpoint_backward(&mut c, TfPos::new(top, 0));

    let mut all_delivered = Vec::new();
    for (i, commit) in commits.iter().enumerate() {
        let ty = if i % 2 == 0 { "Foo" } else { "Bar" };
        let resolved = index_resolved(ty, i as i32, "orig", i as i32, TfPos::new(*commit, 0));
        let (stream, result) = stream_read(&type_stream_name(ty), vec![resolved], i as i32 + 1, i as i32);
        let effects = c.on_read_stream_forward_completed(stream, result, 0).unwrap();
        all_delivered.extend(delivered_positions(&effects));
    }

    all_delivered.windows(2).all(|w| w[0] < w[1])
}

// --- Property: only configured types are ever delivered in TfMode (invariant 2) ---
#[quickcheck]
fn prop_tf_mode_filters_to_configured_types(other_type: String) -> bool {
    if other_type.is_empty() || other_type == "Foo" {
        return true;
    }
    let mut c = ReaderCoordinator::new(config(&["Foo"]), "corr-filter").unwrap();
    c.start();
    checkpoint_backward(&mut c, TfPos::new(1, 0));
    let (stream, result) = stream_read(&type_stream_name("Foo"), vec![], 0, -1);
    c.on_read_stream_forward_completed(stream, result, 0).unwrap();
    if !c.mode_is_tf() {
        return true;
    }

    let foreign = ResolvedEvent {
        event: record("$all", 0, &other_type, TfPos::new(2, 0)),
        link: None,
    };
    let effects = c
        .on_read_all_forward_completed(
            AllReadResult::Success {
                events: vec![foreign],
                next_pos: TfPos::new(3, 0),
                tf_eof_position: TfPos::new(3, 0),
            },
            0,
        )
        .unwrap();
    delivered_positions(&effects).is_empty()
}

// --- Property: construction rejects any (event_types, from_positions)
// mismatch (invariant 7) ---
#[quickcheck]
fn prop_construction_rejects_mismatched_from_positions(extra_key: String) -> bool {
    if extra_key.is_empty() || extra_key == type_stream_name("Foo") {
        return true;
    }
    let from_positions: BTreeMap<String, i32> = [(extra_key, 0)].into_iter().collect();
    ReaderConfig::new(vec!["Foo".to_string()], TfPos::START, from_positions, true, false, None).is_err()
}

// --- Property: deliveredCount never exceeds maxDeliveries; reaching it
// disposes the reader and publishes exactly one
// `EventReaderEof{maxEventsReached:true}` (invariant 3) ---
#[quickcheck]
fn prop_stop_after_n_never_overshoots(max: u8, event_count: u8) -> bool {
    let max = (max % 5) as u64 + 1;
    let event_count = (event_count % 8) as i32;
    if event_count == 0 {
        return true;
    }

    let cfg = ReaderConfig::new(
        vec!["Foo".to_string()],
        TfPos::START,
        [(type_stream_name("Foo"), 0)].into_iter().collect(),
        true,
        false,
        Some(max),
    )
    .unwrap();
    let mut c = ReaderCoordinator::new(cfg, "corr-stopn").unwrap();
    c.start();
    checkpoint_backward(&mut c, TfPos::new(event_count as i64 + 1, 0));

    let events: Vec<ResolvedEvent> = (0..event_count)
        .map(|i| index_resolved("Foo", i, "orig", i, TfPos::new(i as i64 + 1, 0)))
        .collect();
    let (stream, result) = stream_read(&type_stream_name("Foo"), events, event_count, event_count - 1);
    let effects = c.on_read_stream_forward_completed(stream, result, 0).unwrap();

    let expected_delivered = (event_count as u64).min(max);
    let eof_count = effects
        .iter()
        .filter(|e| matches!(e, Effect::Publish(OutputEvent::EventReaderEof { max_events_reached: true, .. })))
        .count();

    c.delivered_count() == expected_delivered
        && delivered_positions(&effects).len() as u64 == expected_delivered
        && c.is_disposed() == (event_count as u64 >= max)
        && eof_count == if event_count as u64 >= max { 1 } else { 0 }
}
