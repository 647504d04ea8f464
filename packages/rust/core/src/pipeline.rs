//! Resumable batch pipeline: load → plan → dispatch → merge → flush, per batch.
//!
//! The run is a small state machine ([`RunState`]). Batches go out strictly one
//! at a time in ascending id order and the checkpoint is flushed after every
//! batch, so a crash loses at most the batch in flight. Stop requests are
//! honoured between batches only.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use aibridge_codec::{decode, encode, fill_template};
use aibridge_providers::TransformProvider;
use aibridge_shared::{AiBridgeError, TranslationRecord};
use aibridge_storage::{IdRange, ProgressStore, WorkItemStore, filter, merge, progress, unprocessed};

use crate::planner::{Batch, plan};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Loading,
    Planning,
    Dispatching,
    Merging,
    Completed,
    /// Fatal error; carries a human-readable reason.
    Failed(String),
    /// Cancelled between batches.
    Stopped,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Stopped)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Planning => "planning",
            Self::Dispatching => "dispatching",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Config / results
// ---------------------------------------------------------------------------

/// Settings for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Source document.
    pub input: PathBuf,
    /// Checkpoint artifact, read at start and rewritten after every batch.
    pub output: PathBuf,
    /// Inclusive id bounds applied after loading.
    pub range: IdRange,
    pub batch_size: usize,
    /// Pause before every batch except the first.
    pub batch_delay: Duration,
    /// Prompt template with `{count_info}` and `{text}` placeholders.
    pub template: String,
}

/// Notification that a batch is about to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStart {
    pub number: usize,
    pub total_batches: usize,
    pub ids: Vec<i64>,
}

/// Outcome of one merged and flushed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub number: usize,
    pub total_batches: usize,
    /// Rows of this batch that received a non-empty result.
    pub completed: usize,
    /// Rows of this batch left without a result.
    pub failed: usize,
    /// Completed rows in range after this batch.
    pub processed: usize,
    /// Rows in range.
    pub total: usize,
    /// Provider error that cost this batch, if any.
    pub error: Option<String>,
}

/// Final report of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: RunState,
    /// Batches dispatched and merged.
    pub batches: usize,
    /// Rows completed by this run.
    pub completed: usize,
    /// Rows that came back empty in this run.
    pub failed: usize,
    /// Completed rows in range according to the checkpoint.
    pub processed: usize,
    pub total: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.state {
            RunState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Outward event sink for a run.
pub trait ProgressReporter: Send + Sync {
    /// Called on every state transition.
    fn state_changed(&self, state: &RunState);
    /// Called once the source and checkpoint are loaded, with the rows already
    /// completed among the rows in range.
    fn checkpoint_loaded(&self, processed: usize, total: usize);
    /// Called before a batch is sent to the provider.
    fn batch_started(&self, batch: &BatchStart);
    /// Called after a batch has been merged and flushed.
    fn batch_finished(&self, report: &BatchReport);
    /// Free-form operator message.
    fn log(&self, message: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn state_changed(&self, _state: &RunState) {}
    fn checkpoint_loaded(&self, _processed: usize, _total: usize) {}
    fn batch_started(&self, _batch: &BatchStart) {}
    fn batch_finished(&self, _report: &BatchReport) {}
    fn log(&self, _message: &str) {}
}

// ---------------------------------------------------------------------------
// StopSignal
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag shared between the caller and a run.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. The current batch still completes.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Clear a previous request before a new run.
    pub fn reset(&self) {
        self.inner.stopped.store(false, Ordering::Release);
    }

    /// Resolve once a stop has been requested.
    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A configured pipeline. Each [`Pipeline::run`] is one resumable pass.
pub struct Pipeline {
    config: PipelineConfig,
    store: WorkItemStore,
    provider: Arc<dyn TransformProvider>,
}

/// Mutable bookkeeping of a run in progress.
struct RunTracker<'a> {
    progress: &'a dyn ProgressReporter,
    state: RunState,
    batches: usize,
    completed: usize,
    failed: usize,
    processed: usize,
    total: usize,
}

impl RunTracker<'_> {
    fn transition(&mut self, state: RunState) {
        debug!(
            from = self.state.name(),
            to = state.name(),
            "state transition"
        );
        self.state = state;
        self.progress.state_changed(&self.state);
    }
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: WorkItemStore,
        provider: Arc<dyn TransformProvider>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one pass until every row in range is done, a stop is
    /// requested, or a fatal error occurs.
    ///
    /// Never returns an error: fatal conditions end in [`RunState::Failed`]
    /// with the last flushed checkpoint left in place.
    #[instrument(skip_all, fields(input = %self.config.input.display(), provider = self.provider.name()))]
    pub async fn run(&self, progress: &dyn ProgressReporter, stop: &StopSignal) -> RunSummary {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut tracker = RunTracker {
            progress,
            state: RunState::Idle,
            batches: 0,
            completed: 0,
            failed: 0,
            processed: 0,
            total: 0,
        };

        let outcome = self.drive(&mut tracker, stop).await;
        tracker.transition(outcome);

        let summary = RunSummary {
            state: tracker.state,
            batches: tracker.batches,
            completed: tracker.completed,
            failed: tracker.failed,
            processed: tracker.processed,
            total: tracker.total,
            started_at,
            elapsed: start.elapsed(),
        };

        match &summary.state {
            RunState::Failed(reason) => warn!(%reason, batches = summary.batches, "run failed"),
            state => info!(
                state = state.name(),
                batches = summary.batches,
                completed = summary.completed,
                failed = summary.failed,
                processed = summary.processed,
                total = summary.total,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "run finished"
            ),
        }
        summary
    }

    /// Walk the state machine; returns the terminal state.
    async fn drive(&self, tracker: &mut RunTracker<'_>, stop: &StopSignal) -> RunState {
        let config = &self.config;

        // --- Loading ---
        tracker.transition(RunState::Loading);
        let items = match self.store.load(&config.input) {
            Ok(items) => filter(items, config.range),
            Err(e) => return RunState::Failed(e.to_string()),
        };
        let store = ProgressStore::new(&config.output);
        let mut checkpoint = store.load();
        (tracker.processed, tracker.total) = progress(&checkpoint, &items);
        tracker
            .progress
            .checkpoint_loaded(tracker.processed, tracker.total);

        // --- Planning ---
        tracker.transition(RunState::Planning);
        let plan = match plan(unprocessed(&items, &checkpoint), config.batch_size) {
            Ok(plan) => plan,
            Err(e) => return RunState::Failed(e.to_string()),
        };
        info!(
            rows = tracker.total,
            done = tracker.processed,
            pending = plan.rows(),
            batches = plan.total(),
            "planned run"
        );
        if plan.is_empty() {
            tracker
                .progress
                .log("nothing to do: every row in range is completed");
            return RunState::Completed;
        }
        let pending = format!(
            "{} of {} rows pending, {} batches",
            plan.rows(),
            tracker.total,
            plan.total()
        );
        tracker.progress.log(&pending);

        self.provider.begin_run();

        for batch in plan.batches() {
            if stop.is_stopped() {
                return RunState::Stopped;
            }
            if batch.number > 1 && !config.batch_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(config.batch_delay) => {}
                    _ = stop.stopped() => return RunState::Stopped,
                }
            }

            // --- Dispatching ---
            tracker.transition(RunState::Dispatching);
            let start = BatchStart {
                number: batch.number,
                total_batches: plan.total(),
                ids: batch.ids(),
            };
            tracker.progress.batch_started(&start);

            let (records, error) = match self.dispatch(&batch).await {
                Ok(records) => (records, None),
                Err(AiBridgeError::RelayCancelled) => {
                    tracker.progress.log("relay cancelled by operator");
                    return RunState::Stopped;
                }
                Err(e) if !e.is_fatal() => {
                    warn!(batch = batch.number, error = %e, "batch lost, rows marked failed");
                    let records = batch.items.iter().map(TranslationRecord::failed).collect();
                    (records, Some(e.to_string()))
                }
                Err(e) => return RunState::Failed(e.to_string()),
            };

            // --- Merging ---
            tracker.transition(RunState::Merging);
            let completed = records.iter().filter(|r| r.is_completed()).count();
            let failed = records.len() - completed;
            merge(&mut checkpoint, records);
            if let Err(e) = store.flush(&checkpoint) {
                return RunState::Failed(e.to_string());
            }

            tracker.batches += 1;
            tracker.completed += completed;
            tracker.failed += failed;
            tracker.processed = progress(&checkpoint, &items).0;

            let report = BatchReport {
                number: batch.number,
                total_batches: plan.total(),
                completed,
                failed,
                processed: tracker.processed,
                total: tracker.total,
                error,
            };
            info!(
                batch = report.number,
                of = report.total_batches,
                completed,
                failed,
                processed = report.processed,
                total = report.total,
                "batch merged"
            );
            tracker.progress.batch_finished(&report);
        }

        RunState::Completed
    }

    /// Encode, call the provider, and decode one batch into records.
    async fn dispatch(&self, batch: &Batch<'_>) -> aibridge_shared::Result<Vec<TranslationRecord>> {
        let prompt = fill_template(&self.config.template, batch.len(), &encode(batch.items));
        debug!(batch = batch.number, ids = ?batch.ids(), "dispatching batch");

        let response = self.provider.call(&prompt).await?;
        let rows = decode(&response, batch.len());

        Ok(batch
            .items
            .iter()
            .zip(rows)
            .map(|(item, edit)| TranslationRecord::from_result(item, edit))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use aibridge_providers::{ManualRelayProvider, MemoryRelayChannel};

    const TEMPLATE: &str = "{count_info}\n{text}";

    /// Echoes numbered lines back with a suffix; scripted failures by call index.
    struct EchoProvider {
        suffix: String,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
        fail_at: Option<(usize, fn() -> AiBridgeError)>,
        stop_at: Option<(usize, StopSignal)>,
    }

    impl EchoProvider {
        fn new(suffix: &str) -> Self {
            Self {
                suffix: suffix.to_string(),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
                fail_at: None,
                stop_at: None,
            }
        }

        fn failing_at(mut self, call: usize, error: fn() -> AiBridgeError) -> Self {
            self.fail_at = Some((call, error));
            self
        }

        fn stopping_at(mut self, call: usize, stop: StopSignal) -> Self {
            self.stop_at = Some((call, stop));
            self
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TransformProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn call(&self, prompt: &str) -> aibridge_shared::Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.prompts.lock().unwrap().push(prompt.to_string());

            if let Some((at, stop)) = &self.stop_at {
                if *at == call {
                    stop.stop();
                }
            }
            if let Some((at, error)) = self.fail_at {
                if at == call {
                    return Err(error());
                }
            }

            Ok(prompt
                .lines()
                .filter(|line| line.chars().next().is_some_and(|c| c.is_ascii_digit()))
                .map(|line| format!("{line} {}", self.suffix))
                .collect::<Vec<_>>()
                .join("\n"))
        }
    }

    /// Returns a fixed response for every call.
    struct FixedProvider(&'static str);

    #[async_trait]
    impl TransformProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn call(&self, _prompt: &str) -> aibridge_shared::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        states: Mutex<Vec<RunState>>,
        loaded: Mutex<Vec<(usize, usize)>>,
        finished: Mutex<Vec<BatchReport>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn state_changed(&self, state: &RunState) {
            self.states.lock().unwrap().push(state.clone());
        }
        fn checkpoint_loaded(&self, processed: usize, total: usize) {
            self.loaded.lock().unwrap().push((processed, total));
        }
        fn batch_started(&self, _batch: &BatchStart) {}
        fn batch_finished(&self, report: &BatchReport) {
            self.finished.lock().unwrap().push(report.clone());
        }
        fn log(&self, _message: &str) {}
    }

    fn source(dir: &TempDir, ids: impl IntoIterator<Item = i64>) -> PathBuf {
        let path = dir.path().join("novel_CN.csv");
        let mut content = String::from("id,text\n");
        for id in ids {
            content.push_str(&format!("{id},row {id}\n"));
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    fn config(input: &Path, output: &Path, batch_size: usize) -> PipelineConfig {
        PipelineConfig {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            range: IdRange::default(),
            batch_size,
            batch_delay: Duration::ZERO,
            template: TEMPLATE.to_string(),
        }
    }

    fn pipeline(config: PipelineConfig, provider: Arc<dyn TransformProvider>) -> Pipeline {
        Pipeline::new(config, WorkItemStore::default(), provider)
    }

    #[tokio::test]
    async fn full_run_completes_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(&dir, 1..=25);
        let output = dir.path().join("out").join("novel_translated.csv");
        let provider = Arc::new(EchoProvider::new("ok"));
        let progress = RecordingProgress::default();

        let summary = pipeline(config(&input, &output, 10), provider.clone())
            .run(&progress, &StopSignal::new())
            .await;

        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.batches, 3);
        assert_eq!((summary.completed, summary.failed), (25, 0));
        assert_eq!((summary.processed, summary.total), (25, 25));

        let checkpoint = ProgressStore::new(&output).load();
        assert_eq!(checkpoint.get(7).unwrap().edit, "row 7 ok");
        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[2].starts_with("Source text consists of 5 numbered lines"));

        let states = progress.states.lock().unwrap().clone();
        assert_eq!(
            states,
            vec![
                RunState::Loading,
                RunState::Planning,
                RunState::Dispatching,
                RunState::Merging,
                RunState::Dispatching,
                RunState::Merging,
                RunState::Dispatching,
                RunState::Merging,
                RunState::Completed,
            ]
        );
        assert_eq!(*progress.loaded.lock().unwrap(), vec![(0, 25)]);
        let reports = progress.finished.lock().unwrap().clone();
        assert_eq!(reports.last().unwrap().processed, 25);
    }

    #[tokio::test]
    async fn resume_after_fatal_error_reprocesses_only_remaining_rows() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(&dir, 1..=25);
        let output = dir.path().join("out.csv");

        let first = Arc::new(EchoProvider::new("first").failing_at(3, || {
            AiBridgeError::NoCredentials {
                provider: "echo".into(),
            }
        }));
        let summary = pipeline(config(&input, &output, 10), first)
            .run(&SilentProgress, &StopSignal::new())
            .await;
        assert!(matches!(summary.state, RunState::Failed(_)));
        let reason = summary.failure_reason().unwrap();
        assert!(reason.contains("no usable credentials"));

        let checkpoint = ProgressStore::new(&output).load();
        assert_eq!(checkpoint.completed_count(), 20);
        assert!((1..=20).all(|id| checkpoint.is_completed(id)));
        // Remaining rows stay pending, not failed.
        assert!((21..=25).all(|id| checkpoint.get(id).is_none()));

        let second = Arc::new(EchoProvider::new("second"));
        let progress = RecordingProgress::default();
        let summary = pipeline(config(&input, &output, 10), second.clone())
            .run(&progress, &StopSignal::new())
            .await;
        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.batches, 1);
        // Counts from the checkpoint are reported before any batch runs.
        assert_eq!(*progress.loaded.lock().unwrap(), vec![(20, 25)]);

        let prompts = second.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("1. row 21"));
        assert!(prompts[0].contains("5. row 25"));
        assert!(!prompts[0].contains("row 20"));

        let checkpoint = ProgressStore::new(&output).load();
        assert_eq!(checkpoint.completed_count(), 25);
        assert_eq!(checkpoint.get(20).unwrap().edit, "row 20 first");
        assert_eq!(checkpoint.get(21).unwrap().edit, "row 21 second");
    }

    #[tokio::test]
    async fn stop_during_batch_finishes_merge_first() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(&dir, 1..=25);
        let output = dir.path().join("out.csv");
        let stop = StopSignal::new();

        let provider = Arc::new(EchoProvider::new("ok").stopping_at(2, stop.clone()));
        let summary = pipeline(config(&input, &output, 10), provider.clone())
            .run(&SilentProgress, &stop)
            .await;

        assert_eq!(summary.state, RunState::Stopped);
        assert_eq!(summary.batches, 2);
        assert_eq!(provider.prompts().len(), 2);
        assert_eq!(ProgressStore::new(&output).load().completed_count(), 20);
    }

    #[tokio::test]
    async fn stop_interrupts_pacing_delay() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(&dir, 1..=4);
        let output = dir.path().join("out.csv");
        let stop = StopSignal::new();

        let mut config = config(&input, &output, 2);
        config.batch_delay = Duration::from_secs(60);
        let pipeline = pipeline(config, Arc::new(EchoProvider::new("ok")));

        let stopper = {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                stop.stop();
            })
        };
        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            pipeline.run(&SilentProgress, &stop),
        )
        .await
        .expect("delay was not interrupted");
        stopper.await.unwrap();

        assert_eq!(summary.state, RunState::Stopped);
        assert_eq!(summary.batches, 1);
    }

    #[tokio::test]
    async fn malformed_response_degrades_to_failed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(&dir, 1..=5);
        let output = dir.path().join("out.csv");

        let summary = pipeline(
            config(&input, &output, 5),
            Arc::new(FixedProvider("alpha\nbeta\ngamma")),
        )
        .run(&SilentProgress, &StopSignal::new())
        .await;

        assert_eq!(summary.state, RunState::Completed);
        assert_eq!((summary.completed, summary.failed), (3, 2));

        let checkpoint = ProgressStore::new(&output).load();
        assert_eq!(checkpoint.get(3).unwrap().edit, "gamma");
        assert_eq!(checkpoint.get(4).unwrap().edit, "");
        assert!(!checkpoint.is_completed(5));
    }

    #[tokio::test]
    async fn recoverable_provider_error_costs_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(&dir, 1..=6);
        let output = dir.path().join("out.csv");

        let provider = Arc::new(
            EchoProvider::new("ok")
                .failing_at(1, || AiBridgeError::provider("echo", "request timed out after 30s")),
        );
        let progress = RecordingProgress::default();
        let summary = pipeline(config(&input, &output, 3), provider)
            .run(&progress, &StopSignal::new())
            .await;

        assert_eq!(summary.state, RunState::Completed);
        assert_eq!((summary.completed, summary.failed), (3, 3));
        let reports = progress.finished.lock().unwrap().clone();
        assert!(reports[0].error.as_deref().unwrap().contains("timed out"));
        assert!(reports[1].error.is_none());

        let checkpoint = ProgressStore::new(&output).load();
        assert_eq!(
            checkpoint.get(1).unwrap().status,
            aibridge_shared::RecordStatus::Failed
        );
        assert!(checkpoint.is_completed(4));
    }

    #[tokio::test]
    async fn nothing_pending_completes_without_calls() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(&dir, 1..=3);
        let output = dir.path().join("out.csv");

        let first = pipeline(config(&input, &output, 10), Arc::new(EchoProvider::new("ok")));
        first.run(&SilentProgress, &StopSignal::new()).await;

        let idle = Arc::new(EchoProvider::new("again"));
        let summary = pipeline(config(&input, &output, 10), idle.clone())
            .run(&SilentProgress, &StopSignal::new())
            .await;
        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.batches, 0);
        assert_eq!((summary.processed, summary.total), (3, 3));
        assert!(idle.prompts().is_empty());
    }

    #[tokio::test]
    async fn id_range_limits_work() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(&dir, 1..=10);
        let output = dir.path().join("out.csv");

        let mut config = config(&input, &output, 10);
        config.range = IdRange::new(Some(4), Some(6));
        let provider = Arc::new(EchoProvider::new("ok"));
        let summary = pipeline(config, provider.clone())
            .run(&SilentProgress, &StopSignal::new())
            .await;

        assert_eq!((summary.processed, summary.total), (3, 3));
        assert!(provider.prompts()[0].contains("1. row 4"));
        assert_eq!(ProgressStore::new(&output).load().len(), 3);
    }

    #[tokio::test]
    async fn missing_source_fails_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let progress = RecordingProgress::default();
        let summary = pipeline(
            config(
                &dir.path().join("absent.csv"),
                &dir.path().join("out.csv"),
                10,
            ),
            Arc::new(EchoProvider::new("ok")),
        )
        .run(&progress, &StopSignal::new())
        .await;

        let reason = summary.failure_reason().unwrap();
        assert!(reason.contains("source file not found"));
        assert_eq!(
            progress.states.lock().unwrap().first(),
            Some(&RunState::Loading)
        );
        assert!(!dir.path().join("out.csv").exists());
    }

    #[tokio::test]
    async fn zero_batch_size_fails_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(&dir, 1..=3);
        let provider = Arc::new(EchoProvider::new("ok"));
        let summary = pipeline(config(&input, &dir.path().join("out.csv"), 0), provider.clone())
            .run(&SilentProgress, &StopSignal::new())
            .await;

        assert!(summary.failure_reason().unwrap().contains("batch size"));
        assert!(provider.prompts().is_empty());
    }

    #[tokio::test]
    async fn flush_failure_halts_run() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(&dir, 1..=4);
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();

        let provider = Arc::new(EchoProvider::new("ok"));
        let summary = pipeline(config(&input, &blocker.join("out.csv"), 2), provider.clone())
            .run(&SilentProgress, &StopSignal::new())
            .await;

        assert!(matches!(summary.state, RunState::Failed(_)));
        assert_eq!(summary.batches, 0);
        assert_eq!(provider.prompts().len(), 1);
    }

    #[tokio::test]
    async fn relay_cancel_stops_without_touching_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(&dir, 1..=3);
        let output = dir.path().join("out.csv");

        let channel = Arc::new(MemoryRelayChannel::new());
        let relay = Arc::new(ManualRelayProvider::new(channel.clone()));
        let handle = relay.handle();
        let canceller = tokio::spawn(async move {
            while channel.published().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            handle.cancel();
        });

        let summary = pipeline(config(&input, &output, 10), relay)
            .run(&SilentProgress, &StopSignal::new())
            .await;
        canceller.await.unwrap();

        assert_eq!(summary.state, RunState::Stopped);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn stop_signal_resolves_waiters() {
        let stop = StopSignal::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.stopped().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        assert!(stop.is_stopped());
        stop.reset();
        assert!(!stop.is_stopped());
    }

    #[test]
    fn run_state_display() {
        assert_eq!(RunState::Merging.to_string(), "merging");
        assert_eq!(RunState::Failed("boom".into()).to_string(), "failed: boom");
        assert!(RunState::Stopped.is_terminal());
        assert!(!RunState::Dispatching.is_terminal());
    }
}
