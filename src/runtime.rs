//! Drives a [`ReaderCoordinator`] from real channels and a real clock.
//!
//! The core (`coordinator`, `index_reader`, `tf_reader`) stays a pure,
//! synchronous effects-list state machine; this module is the only place
//! that touches `tokio` or talks to an actual transport, the same split
//! `event_store_ref::EventStoreRef` draws between "send a request, get a
//! reply" (an opaque closure/port) and the concrete channel plumbing behind
//! it.

use std::collections::VecDeque;
use std::time::Duration;

use acto::{ActoCell, ActoInput, ActoRef, ActoRuntime, AcTokio};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::coordinator::ReaderCoordinator;
use crate::error::ReaderError;
use crate::messages::{AllReadResult, Effect, InboundMessage, StreamReadResult};
use crate::output::OutputEvent;

/// The transport-facing port: issues the three read request shapes a
/// reader ever emits. Stands in for the real store/RPC layer — this crate
/// has no opinion on how reads actually reach the log, only on what order
/// to issue them in and how to interpret their completions.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
pub enum PublisherError {
    #[display(fmt = "publisher channel closed")]
    Closed,
}

#[async_trait::async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn read_stream_forward(
        &self,
        stream_id: String,
        from_event_number: i32,
        max_count: i32,
        resolve_link_tos: bool,
    ) -> Result<StreamReadResult, PublisherError>;

    async fn read_stream_backward(
        &self,
        stream_id: String,
        from_event_number: i32,
        max_count: i32,
    ) -> Result<StreamReadResult, PublisherError>;

    async fn read_all_forward(
        &self,
        commit: i64,
        prepare: i64,
        max_count: i32,
        resolve_link_tos: bool,
    ) -> Result<AllReadResult, PublisherError>;

    /// Delivers an [`OutputEvent`] to the subscription layer.
    async fn publish(&self, event: OutputEvent);
}

/// Commands a caller can send into a running reader loop (§4.1's
/// pause/resume/dispose, issued from outside the actor).
#[derive(Debug, Clone, Copy)]
pub enum Command {
    Pause,
    Resume,
    Dispose,
}

/// Runs `coordinator` to completion (until `dispose`d), driving it off
/// completions pushed onto `inbound` and commands pushed onto `commands`,
/// publishing effects through `publisher`. Mirrors the request/drive loop
/// of `node::actors`' `ActoCell`/`ActoRuntime` pattern, specialized to a
/// single non-actor task since the core has no child actors to supervise.
pub async fn run<P: Publisher>(
    mut coordinator: ReaderCoordinator,
    publisher: P,
    mut inbound: mpsc::Receiver<InboundMessage>,
    mut commands: mpsc::Receiver<Command>,
) -> Result<(), ReaderError> {
    let started_at = Instant::now();
    apply(&mut coordinator, &publisher, coordinator_start(&mut coordinator)).await?;

    loop {
        if coordinator.is_disposed() {
            return Ok(());
        }
        tokio::select! {
            Some(command) = commands.recv() => {
                let effects = match command {
                    Command::Pause => {
                        coordinator.pause();
                        vec![]
                    }
                    Command::Resume => coordinator.resume(),
                    Command::Dispose => {
                        coordinator.dispose();
                        vec![]
                    }
                };
                apply(&mut coordinator, &publisher, effects).await?;
            }
            Some(message) = inbound.recv() => {
                let now_millis = started_at.elapsed().as_millis() as i64;
                let effects = match message {
                    InboundMessage::ReadStreamForwardCompleted { stream_id, result } => {
                        coordinator.on_read_stream_forward_completed(stream_id, result, now_millis)?
                    }
                    InboundMessage::ReadStreamBackwardCompleted { stream_id, result } => {
                        coordinator.on_read_stream_backward_completed(stream_id, result)?
                    }
                    InboundMessage::ReadAllForwardCompleted { result } => {
                        coordinator.on_read_all_forward_completed(result, now_millis)?
                    }
                };
                apply(&mut coordinator, &publisher, effects).await?;
            }
            else => return Ok(()),
        }
    }
}

fn coordinator_start(coordinator: &mut ReaderCoordinator) -> Vec<Effect> {
    coordinator.start()
}

/// A single reader's mailbox message: either a real completion or an
/// externally issued lifecycle command, unified so one `ActoCell` can serve
/// both (§5: "the reader lives inside an actor/dispatch loop that
/// serializes all handler invocations").
pub enum ReaderMessage {
    Inbound(InboundMessage),
    Command(Command),
}

/// Spawns `coordinator` as an `acto` actor on the given Tokio-backed
/// runtime, returning the `ActoRef` callers use to feed it completions and
/// commands. This is the production entry point; `run` above remains the
/// plain-channel variant used directly in tests that don't need a full
/// actor runtime.
pub fn spawn_actor<P: Publisher>(
    runtime: &AcTokio,
    name: &str,
    mut coordinator: ReaderCoordinator,
    publisher: P,
) -> ActoRef<ReaderMessage> {
    runtime
        .spawn_actor(name, move |mut cell: ActoCell<ReaderMessage, AcTokio>| async move {
            let started_at = Instant::now();
            if let Err(err) = apply(&mut coordinator, &publisher, coordinator_start(&mut coordinator)).await {
                tracing::error!(%err, "reader actor failed during start");
                return;
            }
            loop {
                if coordinator.is_disposed() {
                    return;
                }
                match cell.recv().await {
                    ActoInput::NoMoreSenders => return,
                    ActoInput::Supervision { .. } => {}
                    ActoInput::Message(ReaderMessage::Command(command)) => {
                        let effects = match command {
                            Command::Pause => {
                                coordinator.pause();
                                vec![]
                            }
                            Command::Resume => coordinator.resume(),
                            Command::Dispose => {
                                coordinator.dispose();
                                vec![]
                            }
                        };
                        if let Err(err) = apply(&mut coordinator, &publisher, effects).await {
                            tracing::error!(%err, "reader actor failed handling command");
                            return;
                        }
                    }
                    ActoInput::Message(ReaderMessage::Inbound(message)) => {
                        let now_millis = started_at.elapsed().as_millis() as i64;
                        let effects = match message {
                            InboundMessage::ReadStreamForwardCompleted { stream_id, result } => {
                                coordinator.on_read_stream_forward_completed(stream_id, result, now_millis)
                            }
                            InboundMessage::ReadStreamBackwardCompleted { stream_id, result } => {
                                coordinator.on_read_stream_backward_completed(stream_id, result)
                            }
                            InboundMessage::ReadAllForwardCompleted { result } => {
                                coordinator.on_read_all_forward_completed(result, now_millis)
                            }
                        };
                        match effects {
                            Ok(effects) => {
                                if let Err(err) = apply(&mut coordinator, &publisher, effects).await {
                                    tracing::error!(%err, "reader actor failed applying effects");
                                    return;
                                }
                            }
                            Err(err) => {
                                tracing::error!(%err, "reader actor rejected a completion");
                                return;
                            }
                        }
                    }
                }
            }
        })
        .me
}

/// Executes an effect list against the publisher, re-entering the
/// coordinator via `inbound` for any `ScheduleTimer` once its delay has
/// elapsed. Timers are spawned as detached tasks that feed the result back
/// onto a channel rather than blocking this loop, matching how
/// `BanyanStore::spawn_task` fires off background work instead of awaiting
/// it inline.
///
/// A plain `Vec` used as a LIFO stack here would publish a batch of
/// deliveries in reverse order — `process_buffers` appends
/// `Publish(CommittedEventDistributed)` effects in strictly increasing
/// `tfPos` order (§8 invariant 1), so draining front-to-back via a
/// `VecDeque` is required to preserve it on the wire.
async fn apply<P: Publisher>(
    coordinator: &mut ReaderCoordinator,
    publisher: &P,
    effects: Vec<Effect>,
) -> Result<(), ReaderError> {
    let mut pending: VecDeque<Effect> = effects.into();
    while let Some(effect) = pending.pop_front() {
        let followups = execute(coordinator, publisher, effect).await?;
        pending.extend(followups);
    }
    coordinator.sync_metrics();
    Ok(())
}

/// Boxed because `ScheduleTimer` recurses into `execute` after its delay —
/// an `async fn` cannot call itself directly without indirection.
fn execute<'a, P: Publisher>(
    coordinator: &'a mut ReaderCoordinator,
    publisher: &'a P,
    effect: Effect,
) -> BoxFuture<'a, Result<Vec<Effect>, ReaderError>> {
    async move {
    match effect {
        Effect::ReadStreamForward {
            stream_id,
            from_event_number,
            max_count,
            resolve_link_tos,
        } => {
            let result = publisher
                .read_stream_forward(stream_id.clone(), from_event_number, max_count, resolve_link_tos)
                .await
                .unwrap_or(StreamReadResult::Other("publisher unavailable".into()));
            coordinator.on_read_stream_forward_completed(stream_id, result, 0)
        }
        Effect::ReadStreamBackward {
            stream_id,
            from_event_number,
            max_count,
        } => {
            let result = publisher
                .read_stream_backward(stream_id.clone(), from_event_number, max_count)
                .await
                .unwrap_or(StreamReadResult::Other("publisher unavailable".into()));
            coordinator.on_read_stream_backward_completed(stream_id, result)
        }
        Effect::ReadAllForward {
            commit,
            prepare,
            max_count,
            resolve_link_tos,
        } => {
            let result = publisher
                .read_all_forward(commit, prepare, max_count, resolve_link_tos)
                .await
                .unwrap_or(AllReadResult::Other("publisher unavailable".into()));
            coordinator.on_read_all_forward_completed(result, 0)
        }
        Effect::ScheduleTimer { delay_ms, effect } => {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            execute(coordinator, publisher, *effect).await
        }
        Effect::Publish(event) => {
            publisher.publish(event).await;
            Ok(vec![])
        }
    }
    }
    .boxed()
}
