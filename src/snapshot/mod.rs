pub mod format;
pub mod history;

pub use format::{read_snapshot, write_snapshot, SnapshotData, SnapshotEntry};
pub use history::{SnapshotHistory, SnapshotRecord};
