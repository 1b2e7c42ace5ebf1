//! Run lifecycle: the state machine that owns one conversion run at a time.
//!
//! A run is started from form settings, drives the pipeline's event stream to completion (or
//! until the user stops it), and folds every event into the result table. All mutations go
//! through one short-lived lock; the pipeline is awaited with the lock released.

mod controller;
mod log;
mod post_process;
mod reduce;

pub use controller::{run_controller, ControllerEvent, UiCommand};
pub use log::{LogLine, LogLines};
pub use post_process::{process_run_completion, PostProcessOptions, ProcessedRun, RunReport};
pub use reduce::ResultTable;

use crate::model::{
    ConversionEvent, JobConfig, JobSettings, Outcome, ResultRow, RunOutcome, RunState,
};
use crate::pipeline::ConversionPipeline;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const ADVISORY_MISSING_FOLDERS: &str = "Select input and output folders before running.";
pub const ADVISORY_NOTHING_TO_STOP: &str = "No active run to stop.";
pub const STOPPED_BY_USER: &str = "Run stopped by user.";
pub const RUN_COMPLETE: &str = "Run complete.";

/// Consistent copy of everything a UI renders.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub state: RunState,
    /// Config of the most recently accepted run.
    pub config: Option<JobConfig>,
    pub log: Vec<LogLine>,
    /// Sorted by source.
    pub results: Vec<ResultRow>,
}

struct ActiveRun {
    id: u64,
    dry_run: bool,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    state: RunState,
    next_run_id: u64,
    active: Option<ActiveRun>,
    last_config: Option<JobConfig>,
    log: LogLines,
    results: ResultTable,
}

impl Inner {
    fn is_current(&self, run_id: u64) -> bool {
        self.state == RunState::Running && self.active.as_ref().is_some_and(|a| a.id == run_id)
    }
}

pub struct Orchestrator {
    pipeline: Arc<dyn ConversionPipeline>,
    inner: Mutex<Inner>,
    revision: watch::Sender<u64>,
}

impl Orchestrator {
    pub fn new(pipeline: Arc<dyn ConversionPipeline>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            pipeline,
            inner: Mutex::new(Inner::default()),
            revision,
        }
    }

    pub fn state(&self) -> RunState {
        self.inner.lock().state
    }

    /// Whether `start(settings)` would be accepted right now.
    pub fn can_start(&self, settings: &JobSettings) -> bool {
        self.state() != RunState::Running && JobConfig::try_from(settings).is_ok()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let inner = self.inner.lock();
        RunSnapshot {
            state: inner.state,
            config: inner.last_config.clone(),
            log: inner.log.lines().to_vec(),
            results: inner.results.rows().cloned().collect(),
        }
    }

    /// Log lines after the first `seen`, for incremental rendering.
    pub fn log_since(&self, seen: usize) -> Vec<LogLine> {
        self.inner.lock().log.since(seen).to_vec()
    }

    /// Revision counter bumped after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn reset_log(&self) {
        self.inner.lock().log.reset();
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Start a run and drive it until the pipeline is exhausted, fails, or `stop` is called.
    ///
    /// Call from a task other than the one that will call `stop`; the future resolves only
    /// when the run is over.
    pub async fn start(&self, settings: &JobSettings) -> RunOutcome {
        let (run_id, config, cancel) = {
            let mut inner = self.inner.lock();
            if inner.state == RunState::Running {
                debug!("start ignored: a run is already in progress");
                return RunOutcome::AlreadyRunning;
            }
            let config = match JobConfig::try_from(settings) {
                Ok(config) => config,
                Err(e) => {
                    debug!("start rejected: {e}");
                    inner.log.push(ADVISORY_MISSING_FOLDERS);
                    drop(inner);
                    self.bump();
                    return RunOutcome::Rejected;
                }
            };

            inner.next_run_id += 1;
            let run_id = inner.next_run_id;
            let cancel = CancellationToken::new();
            inner.state = RunState::Running;
            inner.results.clear();
            for line in config.summary_lines() {
                inner.log.push(line);
            }
            inner.active = Some(ActiveRun {
                id: run_id,
                dry_run: config.dry_run,
                cancel: cancel.clone(),
            });
            inner.last_config = Some(config.clone());
            (run_id, config, cancel)
        };
        self.bump();
        info!(
            run_id,
            input = config.input_folder(),
            output = config.output_folder(),
            dry_run = config.dry_run,
            "run started"
        );

        let mut events = match self.pipeline.run(&config, cancel.clone()) {
            Ok(events) => events,
            Err(e) => return self.fail(run_id, &e.to_string()),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RunOutcome::Stopped,
                next = events.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    if !self.reduce(run_id, &event) {
                        return RunOutcome::Stopped;
                    }
                }
                Some(Err(e)) => return self.fail(run_id, &e.to_string()),
                None => return self.complete(run_id),
            }
        }
    }

    /// Stop the active run. Rows reduced so far are kept.
    pub fn stop(&self) {
        {
            let mut inner = self.inner.lock();
            match inner.active.take() {
                Some(active) if inner.state == RunState::Running => {
                    // Never visible to readers: the lock is held until Idle.
                    inner.state = RunState::Stopping;
                    active.cancel.cancel();
                    inner.log.push(STOPPED_BY_USER);
                    inner.state = RunState::Idle;
                    info!(run_id = active.id, rows = inner.results.len(), "run stopped by user");
                }
                other => {
                    inner.active = other;
                    inner.log.push(ADVISORY_NOTHING_TO_STOP);
                }
            }
        }
        self.bump();
    }

    /// Fold one event into the table. Returns false if the run is no longer current.
    fn reduce(&self, run_id: u64, event: &ConversionEvent) -> bool {
        {
            let mut inner = self.inner.lock();
            if !inner.is_current(run_id) {
                debug!(run_id, source = %event.source, "dropping event from a stopped run");
                return false;
            }
            let dry_run = inner.active.as_ref().is_some_and(|a| a.dry_run);
            let status = inner.results.apply(event, dry_run).status;
            debug!(run_id, source = %event.source, ?status, "event reduced");
            if event.outcome == Outcome::Error {
                if let Some(detail) = event.detail.as_deref() {
                    inner.log.push(format!("{}: {}", event.source, detail));
                }
            }
        }
        self.bump();
        true
    }

    fn complete(&self, run_id: u64) -> RunOutcome {
        let files = {
            let mut inner = self.inner.lock();
            if !inner.is_current(run_id) {
                return RunOutcome::Stopped;
            }
            let dry_run = inner.active.take().is_some_and(|a| a.dry_run);
            let files = inner.results.len();
            let verb = if dry_run { "Probed" } else { "Converted" };
            let noun = if files == 1 { "file" } else { "files" };
            inner.log.push(format!("{verb} {files} {noun}."));
            inner.log.push(RUN_COMPLETE);
            inner.state = RunState::Completed;
            files
        };
        self.bump();
        info!(run_id, files, "run completed");
        RunOutcome::Completed { files }
    }

    fn fail(&self, run_id: u64, reason: &str) -> RunOutcome {
        {
            let mut inner = self.inner.lock();
            if !inner.is_current(run_id) {
                return RunOutcome::Stopped;
            }
            inner.active = None;
            inner.log.push(format!("Run failed: {reason}"));
            inner.state = RunState::Completed;
        }
        self.bump();
        warn!(run_id, "run failed: {reason}");
        RunOutcome::Failed {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RowStatus;
    use crate::pipeline::{ScriptFeeder, ScriptedPipeline};
    use std::time::Duration;

    fn settings(input: &str, output: &str) -> JobSettings {
        JobSettings {
            input_folder: input.into(),
            output_folder: output.into(),
            ..Default::default()
        }
    }

    fn event(source: &str) -> ConversionEvent {
        ConversionEvent::new(source, Outcome::Ready)
            .with_timecode("01:00:00:00")
            .with_reel("A001")
    }

    fn live() -> (Arc<Orchestrator>, ScriptFeeder) {
        let (pipeline, feeder) = ScriptedPipeline::live();
        (Arc::new(Orchestrator::new(Arc::new(pipeline))), feeder)
    }

    async fn wait_until(orch: &Orchestrator, mut cond: impl FnMut(&RunSnapshot) -> bool) {
        let mut rev = orch.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if cond(&orch.snapshot()) {
                    return;
                }
                rev.changed().await.expect("orchestrator dropped");
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn missing_folders_logs_one_advisory() {
        let orch = Orchestrator::new(Arc::new(ScriptedPipeline::new(Vec::new())));
        for s in [settings("", "/out"), settings("/in", ""), settings(" ", "\t")] {
            let before = orch.snapshot().log.len();
            assert_eq!(orch.start(&s).await, RunOutcome::Rejected);
            let snap = orch.snapshot();
            assert_eq!(snap.state, RunState::Idle);
            assert_eq!(snap.log.len(), before + 1);
            assert_eq!(snap.log.last().unwrap().message, ADVISORY_MISSING_FOLDERS);
        }
        assert!(orch.snapshot().config.is_none());
    }

    #[tokio::test]
    async fn accepted_start_logs_seven_facets_before_events() {
        let (orch, feeder) = live();
        let task = tokio::spawn({
            let orch = orch.clone();
            async move { orch.start(&settings("/in", "/out")).await }
        });

        wait_until(&orch, |s| s.state == RunState::Running).await;
        let snap = orch.snapshot();
        assert_eq!(snap.log.len(), 7);
        assert!(snap.results.is_empty());
        assert_eq!(snap.log[0].message, "Input folder: /in");
        assert_eq!(snap.log[6].message, "Stream selection: Stream 0 (default)");

        drop(feeder);
        assert_eq!(task.await.unwrap(), RunOutcome::Completed { files: 0 });
    }

    #[tokio::test]
    async fn start_while_running_is_a_no_op() {
        let (orch, feeder) = live();
        let task = tokio::spawn({
            let orch = orch.clone();
            async move { orch.start(&settings("/in", "/out")).await }
        });
        feeder.send(event("a.mov"));
        wait_until(&orch, |s| s.results.len() == 1).await;
        let before = orch.snapshot();

        let again = orch.start(&settings("/other", "/elsewhere")).await;
        assert_eq!(again, RunOutcome::AlreadyRunning);
        let after = orch.snapshot();
        assert_eq!(after.state, RunState::Running);
        assert_eq!(after.results, before.results);
        assert_eq!(after.log.len(), before.log.len());
        assert!(!orch.can_start(&settings("/in", "/out")));

        drop(feeder);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_run_is_advisory() {
        let orch = Orchestrator::new(Arc::new(ScriptedPipeline::new(Vec::new())));
        orch.stop();
        let snap = orch.snapshot();
        assert_eq!(snap.state, RunState::Idle);
        assert_eq!(snap.log.len(), 1);
        assert_eq!(snap.log[0].message, ADVISORY_NOTHING_TO_STOP);
    }

    #[tokio::test]
    async fn stop_after_completion_is_advisory() {
        let orch = Orchestrator::new(Arc::new(ScriptedPipeline::new([event("a.mov")])));
        orch.start(&settings("/in", "/out")).await;
        let before = orch.snapshot().log.len();
        orch.stop();
        let snap = orch.snapshot();
        assert_eq!(snap.state, RunState::Completed);
        assert_eq!(snap.log.len(), before + 1);
        assert_eq!(snap.results.len(), 1);
    }

    #[tokio::test]
    async fn stop_while_running_goes_idle_with_one_line() {
        let (orch, feeder) = live();
        let task = tokio::spawn({
            let orch = orch.clone();
            async move { orch.start(&settings("/in", "/out")).await }
        });
        wait_until(&orch, |s| s.state == RunState::Running).await;
        let before = orch.snapshot().log.len();

        orch.stop();
        let snap = orch.snapshot();
        assert_eq!(snap.state, RunState::Idle);
        assert_eq!(snap.log.len(), before + 1);
        assert_eq!(snap.log.last().unwrap().message, STOPPED_BY_USER);
        assert_eq!(task.await.unwrap(), RunOutcome::Stopped);
        // Nothing more lands after the run task exits.
        assert!(!feeder.send(event("late.mov")));
        assert_eq!(orch.snapshot().log.len(), before + 1);
    }

    #[tokio::test]
    async fn completed_orchestrator_can_start_again() {
        let orch = Orchestrator::new(Arc::new(ScriptedPipeline::new([event("a.mov")])));
        assert_eq!(
            orch.start(&settings("/in", "/out")).await,
            RunOutcome::Completed { files: 1 }
        );
        assert!(orch.can_start(&settings("/in", "/out")));
        assert!(!orch.can_start(&settings("/in", "")));

        let first_log = orch.snapshot().log.len();
        orch.start(&settings("/in", "/out")).await;
        let snap = orch.snapshot();
        // Log carries over between runs; results are rebuilt.
        assert_eq!(snap.log.len(), first_log * 2);
        assert_eq!(snap.results.len(), 1);
        assert_eq!(snap.log.last().unwrap().message, RUN_COMPLETE);
        assert_eq!(snap.log[snap.log.len() - 2].message, "Converted 1 file.");
    }

    #[tokio::test]
    async fn pipeline_death_completes_with_failure_line() {
        let pipeline = ScriptedPipeline::failing_after([event("a.mov")], "tool crashed");
        let orch = Orchestrator::new(Arc::new(pipeline));
        let outcome = orch.start(&settings("/in", "/out")).await;
        assert_eq!(
            outcome,
            RunOutcome::Failed {
                reason: "tool crashed".into()
            }
        );
        let snap = orch.snapshot();
        assert_eq!(snap.state, RunState::Completed);
        assert_eq!(snap.results.len(), 1);
        assert_eq!(snap.log.last().unwrap().message, "Run failed: tool crashed");
    }

    #[tokio::test]
    async fn launch_failure_never_sticks_in_running() {
        let (pipeline, feeder) = ScriptedPipeline::live();
        drop(feeder);
        let orch = Orchestrator::new(Arc::new(pipeline));
        assert_eq!(
            orch.start(&settings("/in", "/out")).await,
            RunOutcome::Completed { files: 0 }
        );
        // The live script is single use, so the second run cannot launch.
        let outcome = orch.start(&settings("/in", "/out")).await;
        assert!(matches!(outcome, RunOutcome::Failed { .. }));
        assert_eq!(orch.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn per_file_error_detail_is_logged_and_run_continues() {
        let pipeline = ScriptedPipeline::new([
            ConversionEvent::new("bad.mov", Outcome::Error).with_detail("no audio stream"),
            event("good.mov"),
        ]);
        let orch = Orchestrator::new(Arc::new(pipeline));
        let outcome = orch.start(&settings("/in", "/out")).await;
        assert_eq!(outcome, RunOutcome::Completed { files: 2 });
        let snap = orch.snapshot();
        assert_eq!(snap.results[0].status, RowStatus::Error);
        assert_eq!(snap.results[1].status, RowStatus::Ready);
        assert!(snap
            .log
            .iter()
            .any(|l| l.message == "bad.mov: no audio stream"));
    }

    #[tokio::test]
    async fn reset_log_clears_lines_only() {
        let orch = Orchestrator::new(Arc::new(ScriptedPipeline::new([event("a.mov")])));
        orch.start(&settings("/in", "/out")).await;
        orch.reset_log();
        let snap = orch.snapshot();
        assert!(snap.log.is_empty());
        assert_eq!(snap.results.len(), 1);
        assert_eq!(snap.state, RunState::Completed);
    }
}
