//! Per-partition swimlane dispatchers.
//!
//! A swimlane is a single-writer execution lane: a mutex-guarded FIFO queue
//! drained by at most one worker task at a time. Routing every record of a
//! partition to the same lane preserves broker offset order within the
//! partition while different partitions run concurrently.
//!
//! The worker is short-lived: it is spawned when a message lands in an idle
//! lane and exits when the queue drains. The emptiness re-check and the
//! `running = false` write happen under one mutex acquisition, which closes
//! the race where a producer enqueues between the worker's empty read and
//! its exit decision.

use conveyor_core::consumer::ShutdownMode;
use conveyor_core::decorator::{HandlerError, HandlerFuture};
use conveyor_core::message::Message;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Callback fired exactly once per started delivery with the handler
/// outcome. Dropped unfired for abandoned (never-started) deliveries, so
/// their offsets are never committed.
pub type CompletionCallback = Box<dyn FnOnce(Result<(), HandlerError>) + Send>;

/// The per-message consumer a swimlane invokes: ultimately the decorator
/// chain. Receives the lane's cancellation watch so cooperating handlers
/// can observe shutdown.
pub type SwimlaneConsumer =
    Arc<dyn Fn(Message, watch::Receiver<bool>) -> HandlerFuture + Send + Sync>;

struct QueuedDelivery {
    message: Message,
    consumer: SwimlaneConsumer,
    completion: CompletionCallback,
}

struct SwimlaneState {
    queue: VecDeque<QueuedDelivery>,
    running: bool,
    stopped: bool,
    worker: Option<JoinHandle<()>>,
}

fn lock(state: &Mutex<SwimlaneState>) -> MutexGuard<'_, SwimlaneState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A single-writer FIFO dispatcher for one `(subscriber, partition)` pair.
pub struct SwimlaneDispatcher {
    subscriber_id: String,
    partition: i32,
    state: Arc<Mutex<SwimlaneState>>,
    cancel: watch::Sender<bool>,
}

impl SwimlaneDispatcher {
    /// Create an idle lane.
    #[must_use]
    pub fn new(subscriber_id: impl Into<String>, partition: i32) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            subscriber_id: subscriber_id.into(),
            partition,
            state: Arc::new(Mutex::new(SwimlaneState {
                queue: VecDeque::new(),
                running: false,
                stopped: false,
                worker: None,
            })),
            cancel,
        }
    }

    /// Enqueue a delivery, starting a worker if the lane is idle.
    ///
    /// Returns `false` (and drops the delivery, completion unfired) when
    /// the lane has been stopped.
    pub fn dispatch(
        &self,
        message: Message,
        consumer: SwimlaneConsumer,
        completion: CompletionCallback,
    ) -> bool {
        let mut state = lock(&self.state);
        if state.stopped {
            return false;
        }

        state.queue.push_back(QueuedDelivery {
            message,
            consumer,
            completion,
        });

        if !state.running {
            state.running = true;
            let handle = tokio::spawn(Self::run_worker(
                Arc::clone(&self.state),
                self.cancel.subscribe(),
                self.subscriber_id.clone(),
                self.partition,
            ));
            state.worker = Some(handle);
        }

        true
    }

    /// Stop the lane. Idempotent.
    ///
    /// Queued-but-unstarted deliveries are abandoned in both modes (their
    /// completions never fire). [`ShutdownMode::CancelCurrent`] additionally
    /// signals cancellation to the in-flight handler; either way the worker
    /// is awaited so no handler is left running when this returns.
    pub async fn stop(&self, mode: ShutdownMode) {
        let worker = {
            let mut state = lock(&self.state);
            if state.stopped {
                None
            } else {
                state.stopped = true;
                if mode == ShutdownMode::CancelCurrent {
                    let _ = self.cancel.send(true);
                }
                let abandoned = state.queue.len();
                if abandoned > 0 {
                    tracing::info!(
                        subscriber_id = %self.subscriber_id,
                        partition = self.partition,
                        abandoned,
                        "Abandoning queued deliveries on swimlane stop"
                    );
                }
                state.queue.clear();
                state.worker.take()
            }
        };

        if let Some(handle) = worker {
            if let Err(join_err) = handle.await {
                if join_err.is_panic() {
                    tracing::error!(
                        subscriber_id = %self.subscriber_id,
                        partition = self.partition,
                        "Swimlane worker panicked"
                    );
                }
            }
        }
    }

    /// Whether the lane has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        lock(&self.state).stopped
    }

    /// Mark a freshly created lane as stopped without waiting (used when a
    /// lane is requested after its map was stopped).
    fn mark_stopped(&self) {
        lock(&self.state).stopped = true;
    }

    /// Whether no worker is running. An idle lane with a non-empty queue is
    /// a halted lane (its last delivery failed).
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !lock(&self.state).running
    }

    async fn run_worker(
        state: Arc<Mutex<SwimlaneState>>,
        cancellation: watch::Receiver<bool>,
        subscriber_id: String,
        partition: i32,
    ) {
        loop {
            let next = {
                let mut guard = lock(&state);
                if guard.stopped {
                    guard.running = false;
                    return;
                }
                match guard.queue.pop_front() {
                    Some(delivery) => delivery,
                    None => {
                        // Queue observably empty under the mutex: the exit
                        // decision is atomic with the emptiness check.
                        guard.running = false;
                        return;
                    }
                }
            };

            let message_id = next.message.id.clone();

            if *cancellation.borrow() {
                tracing::info!(
                    subscriber_id = %subscriber_id,
                    partition,
                    message_id = %message_id,
                    "Cancellation observed before handler start"
                );
                (next.completion)(Err(HandlerError::Cancelled));
                lock(&state).running = false;
                return;
            }

            let outcome = (*next.consumer)(next.message, cancellation.clone()).await;
            let failed = outcome.is_err();

            if let Err(e) = &outcome {
                tracing::error!(
                    subscriber_id = %subscriber_id,
                    partition,
                    message_id = %message_id,
                    error = %e,
                    "Handler failed; swimlane worker exiting"
                );
            }

            (next.completion)(outcome);

            if failed {
                // The lane goes quiescent without being stopped; the
                // enclosing consumer stops feeding a failed partition, so
                // its offset stalls and the broker redelivers from there.
                lock(&state).running = false;
                return;
            }
        }
    }
}

struct SwimlaneMapState {
    lanes: HashMap<i32, Arc<SwimlaneDispatcher>>,
    stopped: bool,
}

/// Lazily-populated map of partition number to swimlane for one
/// subscription. Populated only from the subscription's fetch task.
pub struct SwimlaneMap {
    subscriber_id: String,
    state: Mutex<SwimlaneMapState>,
}

impl SwimlaneMap {
    /// Create an empty map for a subscriber.
    #[must_use]
    pub fn new(subscriber_id: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            state: Mutex::new(SwimlaneMapState {
                lanes: HashMap::new(),
                stopped: false,
            }),
        }
    }

    /// The lane for a partition, created on first use. Once the map is
    /// stopped, lanes are created stopped, so late dispatches are rejected.
    #[must_use]
    pub fn lane(&self, partition: i32) -> Arc<SwimlaneDispatcher> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let stopped = guard.stopped;
        let subscriber_id = self.subscriber_id.clone();
        Arc::clone(guard.lanes.entry(partition).or_insert_with(|| {
            let lane = SwimlaneDispatcher::new(subscriber_id, partition);
            if stopped {
                lane.mark_stopped();
            }
            Arc::new(lane)
        }))
    }

    /// Whether every lane is idle (no worker running anywhere).
    #[must_use]
    pub fn all_idle(&self) -> bool {
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        guard.lanes.values().all(|lane| lane.is_idle())
    }

    /// Stop every lane and reject lanes created afterwards.
    pub async fn stop_all(&self, mode: ShutdownMode) {
        let lanes: Vec<Arc<SwimlaneDispatcher>> = {
            let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            guard.stopped = true;
            guard.lanes.values().cloned().collect()
        };
        for lane in lanes {
            lane.stop(mode).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn recording_consumer(
        log: Arc<Mutex<Vec<String>>>,
        delay: Duration,
    ) -> SwimlaneConsumer {
        Arc::new(move |message: Message, _cancellation| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                log.lock().unwrap().push(message.id);
                Ok(())
            })
        })
    }

    fn noop_completion() -> CompletionCallback {
        Box::new(|_outcome| {})
    }

    fn message_with_id(id: &str) -> Message {
        let mut message = Message::new("{}");
        message.id = id.to_string();
        message
    }

    async fn wait_until_quiescent(lane: &SwimlaneDispatcher) {
        for _ in 0..200 {
            if !lock(&lane.state).running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!lock(&lane.state).running, "lane never went quiescent");
    }

    #[tokio::test]
    async fn deliveries_run_in_enqueue_order() {
        let lane = SwimlaneDispatcher::new("sub", 0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let consumer = recording_consumer(Arc::clone(&log), Duration::from_millis(1));

        for n in 0..5 {
            assert!(lane.dispatch(
                message_with_id(&format!("m{n}")),
                Arc::clone(&consumer),
                noop_completion(),
            ));
        }

        wait_until_quiescent(&lane).await;
        assert_eq!(*log.lock().unwrap(), vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn at_most_one_worker_runs_at_a_time() {
        let lane = SwimlaneDispatcher::new("sub", 0);
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let consumer: SwimlaneConsumer = {
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            Arc::new(move |_message, _cancellation| {
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                Box::pin(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        };

        for n in 0..20 {
            lane.dispatch(
                message_with_id(&format!("m{n}")),
                Arc::clone(&consumer),
                noop_completion(),
            );
        }

        wait_until_quiescent(&lane).await;
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn worker_restarts_after_the_queue_drains() {
        let lane = SwimlaneDispatcher::new("sub", 0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let consumer = recording_consumer(Arc::clone(&log), Duration::ZERO);

        lane.dispatch(message_with_id("m0"), Arc::clone(&consumer), noop_completion());
        wait_until_quiescent(&lane).await;

        lane.dispatch(message_with_id("m1"), Arc::clone(&consumer), noop_completion());
        wait_until_quiescent(&lane).await;

        assert_eq!(*log.lock().unwrap(), vec!["m0", "m1"]);
    }

    #[tokio::test]
    async fn handler_failure_halts_the_lane_without_stopping_it() {
        let lane = SwimlaneDispatcher::new("sub", 0);
        let completions = Arc::new(Mutex::new(Vec::new()));

        let consumer: SwimlaneConsumer = Arc::new(move |message: Message, _cancellation| {
            Box::pin(async move {
                if message.id == "poison" {
                    Err(HandlerError::Handler("boom".to_string()))
                } else {
                    Ok(())
                }
            })
        });

        for id in ["poison", "after1", "after2"] {
            let completions = Arc::clone(&completions);
            lane.dispatch(
                message_with_id(id),
                Arc::clone(&consumer),
                Box::new(move |outcome| {
                    completions.lock().unwrap().push((id, outcome.is_ok()));
                }),
            );
        }

        wait_until_quiescent(&lane).await;

        // Only the failing delivery completed (with an error); the rest
        // stayed queued because the worker exited.
        assert_eq!(*completions.lock().unwrap(), vec![("poison", false)]);
        assert!(!lane.is_stopped());
        assert_eq!(lock(&lane.state).queue.len(), 2);
    }

    #[tokio::test]
    async fn dispatch_after_stop_is_rejected() {
        let lane = SwimlaneDispatcher::new("sub", 0);
        lane.stop(ShutdownMode::WaitForCompletion).await;

        let accepted = lane.dispatch(
            message_with_id("m0"),
            recording_consumer(Arc::new(Mutex::new(Vec::new())), Duration::ZERO),
            noop_completion(),
        );

        assert!(!accepted);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let lane = SwimlaneDispatcher::new("sub", 0);
        lane.stop(ShutdownMode::WaitForCompletion).await;
        lane.stop(ShutdownMode::WaitForCompletion).await;
        assert!(lane.is_stopped());
    }

    #[tokio::test]
    async fn wait_for_completion_lets_the_in_flight_handler_finish() {
        let lane = SwimlaneDispatcher::new("sub", 0);
        let (started_tx, started_rx) = oneshot::channel();
        let finished = Arc::new(AtomicUsize::new(0));

        let consumer: SwimlaneConsumer = {
            let finished = Arc::clone(&finished);
            let started_tx = Arc::new(Mutex::new(Some(started_tx)));
            Arc::new(move |_message, _cancellation| {
                let finished = Arc::clone(&finished);
                let started_tx = Arc::clone(&started_tx);
                Box::pin(async move {
                    if let Some(tx) = started_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        };

        lane.dispatch(message_with_id("slow"), Arc::clone(&consumer), noop_completion());
        // A queued-but-unstarted delivery is abandoned by stop.
        lane.dispatch(message_with_id("queued"), Arc::clone(&consumer), noop_completion());

        started_rx.await.unwrap();
        lane.stop(ShutdownMode::WaitForCompletion).await;

        assert_eq!(finished.load(Ordering::SeqCst), 1, "in-flight finished, queued abandoned");
    }

    #[tokio::test]
    async fn cancel_current_interrupts_a_cooperating_handler() {
        let lane = SwimlaneDispatcher::new("sub", 0);
        let (started_tx, started_rx) = oneshot::channel();
        let outcome = Arc::new(Mutex::new(None));

        let consumer: SwimlaneConsumer = {
            let started_tx = Arc::new(Mutex::new(Some(started_tx)));
            Arc::new(move |_message, mut cancellation: watch::Receiver<bool>| {
                let started_tx = Arc::clone(&started_tx);
                Box::pin(async move {
                    if let Some(tx) = started_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                    tokio::select! {
                        _ = cancellation.wait_for(|cancelled| *cancelled) => {
                            Err(HandlerError::Cancelled)
                        }
                        () = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
                    }
                })
            })
        };

        let completion_outcome = Arc::clone(&outcome);
        lane.dispatch(
            message_with_id("delayed"),
            Arc::clone(&consumer),
            Box::new(move |result| {
                *completion_outcome.lock().unwrap() = Some(result);
            }),
        );

        started_rx.await.unwrap();
        lane.stop(ShutdownMode::CancelCurrent).await;

        let outcome = outcome.lock().unwrap().take();
        assert!(matches!(outcome, Some(Err(HandlerError::Cancelled))));
    }

    #[tokio::test]
    async fn map_reuses_lanes_per_partition() {
        let map = SwimlaneMap::new("sub");
        let first = map.lane(3);
        let again = map.lane(3);
        let other = map.lane(4);

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn stop_all_stops_every_lane() {
        let map = SwimlaneMap::new("sub");
        let a = map.lane(0);
        let b = map.lane(1);

        map.stop_all(ShutdownMode::WaitForCompletion).await;

        assert!(a.is_stopped());
        assert!(b.is_stopped());
    }
}
