//! Run lifecycle controller.
//!
//! Turns UI commands into orchestrator calls, keeping each run on its own task so the UI
//! loop never waits on the pipeline, and reports outcomes back to presentation layers.

use super::Orchestrator;
use crate::model::{JobSettings, RunOutcome, RunState};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinError, JoinSet};

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub enum UiCommand {
    Start(JobSettings),
    Stop,
    Quit,
}

/// Notifications for presentation layers. Log and table changes are observed through
/// [`Orchestrator::subscribe`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    RunFinished(RunOutcome),
}

/// Serve UI commands until `Quit` or until every command sender is gone.
pub async fn run_controller(
    orchestrator: Arc<Orchestrator>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
    event_tx: UnboundedSender<ControllerEvent>,
) -> Result<()> {
    let mut runs: JoinSet<RunOutcome> = JoinSet::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(UiCommand::Start(settings)) => {
                    let orchestrator = orchestrator.clone();
                    runs.spawn(async move { orchestrator.start(&settings).await });
                }
                Some(UiCommand::Stop) => orchestrator.stop(),
                Some(UiCommand::Quit) | None => break,
            },
            // Only polled while something is in flight; an empty JoinSet resolves immediately.
            Some(joined) = runs.join_next(), if !runs.is_empty() => {
                report(&event_tx, joined);
            }
        }
    }

    // Quit waits for in-flight runs so their final state is settled before returning.
    if orchestrator.state() == RunState::Running {
        orchestrator.stop();
    }
    while let Some(joined) = runs.join_next().await {
        report(&event_tx, joined);
    }
    Ok(())
}

fn report(event_tx: &UnboundedSender<ControllerEvent>, joined: Result<RunOutcome, JoinError>) {
    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => RunOutcome::Failed {
            reason: format!("run task failed: {e}"),
        },
    };
    tracing::debug!(?outcome, "run finished");
    let _ = event_tx.send(ControllerEvent::RunFinished(outcome));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConversionEvent, Outcome};
    use crate::pipeline::ScriptedPipeline;
    use tokio::sync::mpsc;

    fn settings() -> JobSettings {
        JobSettings {
            input_folder: "/in".into(),
            output_folder: "/out".into(),
            dry_run: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_reports_outcome() {
        let pipeline = ScriptedPipeline::new([ConversionEvent::new("a.mov", Outcome::Probed)]);
        let orch = Arc::new(Orchestrator::new(Arc::new(pipeline)));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, mut evt_rx) = mpsc::unbounded_channel();
        let controller = tokio::spawn(run_controller(orch.clone(), cmd_rx, evt_tx));

        cmd_tx.send(UiCommand::Start(settings())).unwrap();
        assert_eq!(
            evt_rx.recv().await,
            Some(ControllerEvent::RunFinished(RunOutcome::Completed { files: 1 }))
        );

        cmd_tx.send(UiCommand::Quit).unwrap();
        controller.await.unwrap().unwrap();
        assert_eq!(orch.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn quit_stops_active_run() {
        let (pipeline, _feeder) = ScriptedPipeline::live();
        let orch = Arc::new(Orchestrator::new(Arc::new(pipeline)));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, mut evt_rx) = mpsc::unbounded_channel();
        let controller = tokio::spawn(run_controller(orch.clone(), cmd_rx, evt_tx));

        let mut rev = orch.subscribe();
        cmd_tx.send(UiCommand::Start(settings())).unwrap();
        while orch.state() != RunState::Running {
            rev.changed().await.unwrap();
        }

        cmd_tx.send(UiCommand::Quit).unwrap();
        controller.await.unwrap().unwrap();
        assert_eq!(orch.state(), RunState::Idle);
        assert_eq!(
            evt_rx.recv().await,
            Some(ControllerEvent::RunFinished(RunOutcome::Stopped))
        );
    }
}
