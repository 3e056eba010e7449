use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use itertools::Itertools;

use crate::config::ReaderConfig;
use crate::error::ReaderError;
use crate::event::ResolvedEvent;
use crate::index_reader::IndexState;
use crate::messages::{AllReadResult, Effect, StreamReadResult};
use crate::metrics::ReaderMetrics;
use crate::output::{OutputEvent, SafeJoinPosition};
use crate::position::TfPos;
use crate::tf_reader::TfState;
use crate::{index_reader, tf_reader};

/// The reader's two phases (Design Note §9): a flat tagged `mode` rather
/// than nested sub-readers holding a back-pointer to their parent. Fields
/// needed by both phases — `from_positions`, `event_types` — live on
/// [`ReaderCoordinator`] itself instead of inside `IndexState`, since the TF
/// reader's `byStream` bookkeeping (§4.3, §9 "`fromPositions` update
/// semantics") keeps updating `from_positions` after the switch to
/// `TfMode`, even though the per-stream buffers and checkpoint tracker are
/// genuinely index-only and are dropped at the transition.
pub enum Mode {
    Index(IndexState),
    Tf(TfState),
}

/// Owns mode, lifecycle and the high-water mark; the single chokepoint
/// (`deliver`) through which every event delivery passes.
pub struct ReaderCoordinator {
    pub(crate) correlation_id: String,
    pub(crate) event_types: BTreeSet<String>,
    pub(crate) mode: Mode,
    pub(crate) from_tf_pos: TfPos,
    pub(crate) from_positions: BTreeMap<String, i32>,
    pub(crate) last_delivered: TfPos,
    pub(crate) delivered_count: u64,
    pub(crate) max_deliveries: Option<u64>,
    pub(crate) stop_on_eof: bool,
    pub(crate) paused: bool,
    pub(crate) pause_requested: bool,
    pub(crate) disposed: bool,
    pub(crate) resolve_link_tos: bool,
    pub(crate) metrics: Option<Arc<ReaderMetrics>>,
}

impl ReaderCoordinator {
    pub fn new(config: ReaderConfig, correlation_id: impl Into<String>) -> Result<Self, ReaderError> {
        // `ReaderConfig::new` already validated non-empty types and a
        // matching `from_positions`; re-validating here would just
        // duplicate that check.
        Ok(Self {
            correlation_id: correlation_id.into(),
            event_types: config.event_types,
            mode: Mode::Index(IndexState::new()),
            from_tf_pos: config.from_tf_pos,
            from_positions: config.from_positions,
            last_delivered: TfPos::START,
            delivered_count: 0,
            max_deliveries: config.max_deliveries,
            stop_on_eof: config.stop_on_eof,
            paused: false,
            pause_requested: false,
            disposed: false,
            resolve_link_tos: config.resolve_link_tos,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<ReaderMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn mode_is_tf(&self) -> bool {
        matches!(self.mode, Mode::Tf(_))
    }

    pub fn last_delivered(&self) -> TfPos {
        self.last_delivered
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered_count
    }

    /// Current per-type-stream resume positions (§3 `fromPositions`),
    /// max-monotone updated by both index completions and TF `byStream`
    /// records (§9). A caller persisting resume state across restarts reads
    /// this alongside [`Self::from_tf_pos`] and [`Self::last_delivered`].
    pub fn from_positions(&self) -> &BTreeMap<String, i32> {
        &self.from_positions
    }

    pub fn from_tf_pos(&self) -> TfPos {
        self.from_tf_pos
    }

    fn any_in_flight(&self) -> bool {
        match &self.mode {
            Mode::Index(state) => !state.requested.is_empty() || state.checkpoint_requested,
            Mode::Tf(state) => state.tf_requested,
        }
    }

    /// Emits the initial reads: one per configured type-stream plus the
    /// checkpoint probe (§4.1 `start`).
    pub fn start(&mut self) -> Vec<Effect> {
        if self.disposed {
            return vec![];
        }
        let event_types = self.event_types.clone();
        let from_positions = self.from_positions.clone();
        let resolve_link_tos = self.resolve_link_tos;
        let Mode::Index(state) = &mut self.mode else {
            return vec![];
        };
        state.start(&event_types, &from_positions, resolve_link_tos)
    }

    pub fn pause(&mut self) {
        self.pause_requested = true;
        if !self.any_in_flight() {
            self.paused = true;
        }
    }

    /// Re-requests events as appropriate for the current mode (§4.1
    /// `resume`).
    pub fn resume(&mut self) -> Vec<Effect> {
        self.pause_requested = false;
        self.paused = false;
        if self.disposed {
            return vec![];
        }
        match &self.mode {
            Mode::Index(_) => index_reader::resume_reads(self),
            Mode::Tf(_) => tf_reader::request_next(self, self.from_tf_pos, false),
        }
    }

    /// Idempotent; subsequent completions are dropped once set.
    pub fn dispose(&mut self) {
        self.disposed = true;
    }

    pub fn on_read_stream_forward_completed(
        &mut self,
        stream_id: String,
        result: StreamReadResult,
        now_millis: i64,
    ) -> Result<Vec<Effect>, ReaderError> {
        // Non-checkpoint stream completions arriving after the switch to
        // TfMode are stale: the index reader's own bookkeeping for that
        // stream no longer exists, so routing them through its normal
        // validation would misreport a protocol violation instead of the
        // staleness it actually is.
        if self.mode_is_tf() && stream_id != crate::event::CHECKPOINT_STREAM {
            return Ok(vec![]);
        }
        let effects = index_reader::handle_stream_forward_completed(self, stream_id, result, now_millis)?;
        self.finalize_pause();
        Ok(effects)
    }

    pub fn on_read_stream_backward_completed(
        &mut self,
        stream_id: String,
        result: StreamReadResult,
    ) -> Result<Vec<Effect>, ReaderError> {
        let effects = index_reader::handle_checkpoint_backward_completed(self, stream_id, result)?;
        self.finalize_pause();
        Ok(effects)
    }

    pub fn on_read_all_forward_completed(
        &mut self,
        result: AllReadResult,
        now_millis: i64,
    ) -> Result<Vec<Effect>, ReaderError> {
        let effects = tf_reader::handle_completed(self, result, now_millis)?;
        self.finalize_pause();
        Ok(effects)
    }

    fn finalize_pause(&mut self) {
        if self.pause_requested && !self.any_in_flight() {
            self.paused = true;
        }
    }

    /// The single chokepoint enforcing the high-water invariant (§4.1
    /// `deliver`). Returns the effects to publish; empties to `[]` when the
    /// event is a discarded duplicate.
    pub(crate) fn deliver(
        &mut self,
        resolved: ResolvedEvent,
        tf_pos: TfPos,
        progress: f64,
        from_index: bool,
    ) -> Vec<Effect> {
        if tf_pos <= self.last_delivered {
            tracing::trace!(%tf_pos, last_delivered = %self.last_delivered, "discarding duplicate/out-of-order delivery");
            return vec![];
        }
        self.last_delivered = tf_pos;
        if from_index {
            self.from_tf_pos = tf_pos;
        }
        self.delivered_count += 1;
        if let Some(metrics) = &self.metrics {
            metrics.delivered_total.inc();
        }

        let safe_join_pos = if self.stop_on_eof {
            None
        } else if from_index {
            Some(SafeJoinPosition::LogPosition(resolved.position_event().log_position))
        } else {
            Some(SafeJoinPosition::PreparePosition(tf_pos.prepare))
        };

        let mut effects = vec![Effect::Publish(OutputEvent::CommittedEventDistributed {
            correlation_id: self.correlation_id.clone(),
            resolved_event: Some(resolved),
            safe_join_pos,
            progress,
        })];

        effects.extend(self.check_stop_after_n());
        effects
    }

    fn check_stop_after_n(&mut self) -> Vec<Effect> {
        if let Some(max) = self.max_deliveries {
            if self.delivered_count >= max {
                self.dispose();
                return vec![Effect::Publish(OutputEvent::EventReaderEof {
                    correlation_id: self.correlation_id.clone(),
                    max_events_reached: true,
                })];
            }
        }
        vec![]
    }

    pub(crate) fn tick(&self) -> Effect {
        Effect::Publish(OutputEvent::Tick {
            correlation_id: self.correlation_id.clone(),
        })
    }

    /// Pushes current buffer depths and mode into `self.metrics`, if set.
    /// Cheap enough to call after every batch of effects rather than on a
    /// separate timer.
    pub fn sync_metrics(&self) {
        let Some(metrics) = &self.metrics else { return };
        if let Mode::Index(state) = &self.mode {
            for (stream, depth) in state.buffers.iter().sorted_by_key(|(stream, _)| stream.clone()) {
                metrics.buffer_depth.with_label_values(&[stream]).set(depth.len() as i64);
            }
        }
    }
}
