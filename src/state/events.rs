// Notifications from the controller to whoever drives it

use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::state::registry::SeriesHandle;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ControllerEvent {
    ParseProgress { file: String, percent: u8 },
    ParseFinished { file: String, series: usize },
    ParseFailed { file: String, message: String },
    SyncDone { factors: Vec<(String, f64)>, applied: Vec<String> },
    CorrectionNotPerformed { channel: String },
    SeriesAdded { handle: SeriesHandle, name: String },
    SeriesRemoved { handle: SeriesHandle, name: String },
    IntervalsChanged { count: usize },
    CalibrationDone { factor_a: f64, factor_b: f64 },
    CorrectionDone { name: String },
    SnapshotSaved { index: usize, description: String },
    SnapshotRestored { index: usize, series: usize },
    SnapshotFailed { message: String },
    Diagnostic(String),
}

pub type EventReceiver = UnboundedReceiver<ControllerEvent>;

/// Sending half that never fails: events to a dropped receiver are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<ControllerEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ControllerEvent) {
        if self.tx.send(event).is_err() {
            debug!("event dropped: no listener");
        }
    }

    pub fn diagnostic(&self, text: impl Into<String>) {
        self.emit(ControllerEvent::Diagnostic(text.into()));
    }
}
