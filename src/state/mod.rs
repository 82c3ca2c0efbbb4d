pub mod controller;
pub mod events;
pub mod registry;

pub use controller::{Controller, CorrectionOutcome, CorrectionRequest, DvlSlot, LeavingPoint, SeriesSummary};
pub use events::{ControllerEvent, EventReceiver, EventSink};
pub use registry::{SeriesHandle, SeriesRegistry};
