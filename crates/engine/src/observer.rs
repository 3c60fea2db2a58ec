//! Progress and exploration observers

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use autoqa_common::{Progress, TestRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    DropdownOption,
    PopupTab,
    PopupButton,
}

/// One visited sub-state during exploration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationStep {
    pub kind: StepKind,
    pub description: String,
    /// `data:image/png;base64,...` of the viewport after the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

/// Receives run events. Every method defaults to doing nothing.
pub trait RunObserver: Send + Sync {
    fn on_progress(&self, _progress: &Progress) {}

    fn on_step(&self, _step: &ExplorationStep) {}

    fn on_record(&self, _record: &TestRecord) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

#[derive(Debug, Clone)]
pub enum RunEvent {
    Progress(Progress),
    Step(ExplorationStep),
    Record(TestRecord),
}

/// Forwards events to an unbounded channel.
///
/// Sends never block the run; events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RunObserver for ChannelObserver {
    fn on_progress(&self, progress: &Progress) {
        let _ = self.tx.send(RunEvent::Progress(progress.clone()));
    }

    fn on_step(&self, step: &ExplorationStep) {
        let _ = self.tx.send(RunEvent::Step(step.clone()));
    }

    fn on_record(&self, record: &TestRecord) {
        let _ = self.tx.send(RunEvent::Record(record.clone()));
    }
}
