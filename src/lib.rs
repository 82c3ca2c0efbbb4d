// Drill-string depth calculation
// Main library entry point

pub mod core;
pub mod export;
pub mod models;
pub mod parsers;
pub mod pipeline;
pub mod snapshot;
pub mod state;
pub mod utils;

// Re-export main types
pub use crate::core::error::{DepthError, Result};
pub use crate::core::intervals::{Interval, IntervalSet};
pub use crate::core::series::{ChannelKind, TimeSeries};
pub use crate::models::settings::Settings;
pub use crate::state::{Controller, ControllerEvent, EventSink, SeriesHandle};

#[cfg(test)]
mod tests {
    #[test]
    fn test_constants() {
        use crate::core::constants::*;
        assert_eq!(FRAME_SIZE, 16);
        assert_eq!(FOOTER_MARKER, b"#####");
        assert_eq!(SNAPSHOT_VERSION, 1);
    }
}
