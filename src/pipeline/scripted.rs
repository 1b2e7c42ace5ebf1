use super::{ConversionPipeline, EventStream};
use crate::error::PipelineError;
use crate::model::{ConversionEvent, JobConfig};
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type ScriptItem = Result<ConversionEvent, String>;

enum Script {
    /// Replayed on every run.
    Fixed(Vec<ScriptItem>),
    /// Fed live by a [`ScriptFeeder`]; usable for one run.
    Live(Mutex<Option<mpsc::UnboundedReceiver<ScriptItem>>>),
}

/// In-memory pipeline that emits a prepared or live-fed sequence of events.
///
/// Honors cancellation between events the same way the process-backed pipeline does, which
/// makes it the stand-in for the external tool in tests and demos.
pub struct ScriptedPipeline {
    script: Script,
}

/// Sending half of a live [`ScriptedPipeline`].
#[derive(Debug, Clone)]
pub struct ScriptFeeder {
    tx: mpsc::UnboundedSender<ScriptItem>,
}

impl ScriptFeeder {
    /// Returns false once the run has finished listening.
    pub fn send(&self, event: ConversionEvent) -> bool {
        self.tx.send(Ok(event)).is_ok()
    }

    /// Simulate the tool dying mid-run.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx.send(Err(reason.into())).is_ok()
    }
}

impl ScriptedPipeline {
    pub fn new(events: impl IntoIterator<Item = ConversionEvent>) -> Self {
        Self {
            script: Script::Fixed(events.into_iter().map(Ok).collect()),
        }
    }

    /// Emits `events`, then fails the run with `reason`.
    pub fn failing_after(events: impl IntoIterator<Item = ConversionEvent>, reason: &str) -> Self {
        let mut items: Vec<ScriptItem> = events.into_iter().map(Ok).collect();
        items.push(Err(reason.to_string()));
        Self {
            script: Script::Fixed(items),
        }
    }

    /// A pipeline whose events arrive only when the returned feeder sends them. The run ends when
    /// every feeder is dropped.
    pub fn live() -> (Self, ScriptFeeder) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            script: Script::Live(Mutex::new(Some(rx))),
        };
        (pipeline, ScriptFeeder { tx })
    }
}

fn into_stream_item(item: ScriptItem) -> Result<ConversionEvent, PipelineError> {
    item.map_err(PipelineError::Unavailable)
}

impl ConversionPipeline for ScriptedPipeline {
    fn run(
        &self,
        _config: &JobConfig,
        cancel: CancellationToken,
    ) -> Result<EventStream, PipelineError> {
        let items: EventStream = match &self.script {
            Script::Fixed(items) => stream::iter(items.clone()).map(into_stream_item).boxed(),
            Script::Live(rx) => {
                let rx = rx.lock().take().ok_or_else(|| {
                    PipelineError::Unavailable("live script already consumed".into())
                })?;
                stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (into_stream_item(item), rx))
                })
                .boxed()
            }
        };
        Ok(items.take_until(cancel.cancelled_owned()).boxed())
    }
}
