//! Background runner: one worker task per pipeline, single-flight.
//!
//! The caller keeps control of its own task. Progress flows outward through a
//! `watch` snapshot and an event stream; the only inward signal is the
//! cooperative [`StopSignal`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::pipeline::{
    BatchReport, BatchStart, Pipeline, ProgressReporter, RunState, RunSummary, StopSignal,
};

/// Immutable view of a run for status polls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub state: RunState,
    /// Last batch started.
    pub batch: usize,
    pub total_batches: usize,
    pub processed: usize,
    pub total: usize,
}

/// Events emitted by a running pipeline, in order.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StateChanged(RunState),
    /// Rows already completed and rows in range, known right after loading.
    CheckpointLoaded { processed: usize, total: usize },
    BatchStarted(BatchStart),
    BatchFinished(BatchReport),
    Log(String),
    Finished(RunSummary),
}

/// Forwards reporter callbacks into the snapshot and the event stream.
struct ChannelReporter {
    snapshot: Arc<watch::Sender<ProgressSnapshot>>,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelReporter {
    fn emit(&self, event: PipelineEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

impl ProgressReporter for ChannelReporter {
    fn state_changed(&self, state: &RunState) {
        self.snapshot.send_modify(|s| s.state = state.clone());
        self.emit(PipelineEvent::StateChanged(state.clone()));
    }

    fn checkpoint_loaded(&self, processed: usize, total: usize) {
        self.snapshot.send_modify(|s| {
            s.processed = processed;
            s.total = total;
        });
        self.emit(PipelineEvent::CheckpointLoaded { processed, total });
    }

    fn batch_started(&self, batch: &BatchStart) {
        self.snapshot.send_modify(|s| {
            s.batch = batch.number;
            s.total_batches = batch.total_batches;
        });
        self.emit(PipelineEvent::BatchStarted(batch.clone()));
    }

    fn batch_finished(&self, report: &BatchReport) {
        self.snapshot.send_modify(|s| {
            s.processed = report.processed;
            s.total = report.total;
        });
        self.emit(PipelineEvent::BatchFinished(report.clone()));
    }

    fn log(&self, message: &str) {
        self.emit(PipelineEvent::Log(message.to_string()));
    }
}

/// Owns the worker task for a [`Pipeline`].
pub struct PipelineRunner {
    pipeline: Arc<Pipeline>,
    stop: StopSignal,
    snapshot: Arc<watch::Sender<ProgressSnapshot>>,
    events_tx: mpsc::UnboundedSender<PipelineEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PipelineEvent>>>,
    task: Mutex<Option<JoinHandle<RunSummary>>>,
}

impl PipelineRunner {
    pub fn new(pipeline: Pipeline) -> Self {
        let (snapshot, _) = watch::channel(ProgressSnapshot::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            pipeline: Arc::new(pipeline),
            stop: StopSignal::new(),
            snapshot: Arc::new(snapshot),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            task: Mutex::new(None),
        }
    }

    /// Spawn a run on the current Tokio runtime.
    ///
    /// Returns `false` and does nothing while a run is still active.
    pub fn start(&self) -> bool {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("start ignored, run already active");
            return false;
        }

        self.stop.reset();
        self.snapshot.send_replace(ProgressSnapshot::default());

        let pipeline = Arc::clone(&self.pipeline);
        let stop = self.stop.clone();
        let reporter = ChannelReporter {
            snapshot: Arc::clone(&self.snapshot),
            events: self.events_tx.clone(),
        };
        *task = Some(tokio::spawn(async move {
            let summary = pipeline.run(&reporter, &stop).await;
            reporter.emit(PipelineEvent::Finished(summary.clone()));
            summary
        }));
        true
    }

    /// Request a cooperative stop of the active run.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Current progress, copied.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that observes every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshot.subscribe()
    }

    /// The event stream. Available once; later calls return `None`.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PipelineEvent>> {
        lock(&self.events_rx).take()
    }

    /// Wait for the active (or last finished) run. `None` if nothing was started
    /// since the previous join.
    pub async fn join(&self) -> Option<RunSummary> {
        let handle = lock(&self.task).take()?;
        match handle.await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(error = %e, "pipeline task aborted");
                let snapshot = self.snapshot();
                Some(RunSummary {
                    state: RunState::Failed(format!("pipeline task aborted: {e}")),
                    batches: 0,
                    completed: 0,
                    failed: 0,
                    processed: snapshot.processed,
                    total: snapshot.total,
                    started_at: Utc::now(),
                    elapsed: Duration::ZERO,
                })
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
