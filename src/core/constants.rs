// Format and pipeline constants

// Telemetry frame: sec(3) ms(2) pad(2) valueA(3) pad(3) valueB(3)
pub const FRAME_SIZE: usize = 16;
pub const FRAME_SEC_OFFSET: usize = 0;
pub const FRAME_MS_OFFSET: usize = 3;
pub const FRAME_VALUE_A_OFFSET: usize = 7;
pub const FRAME_VALUE_B_OFFSET: usize = 13;

// Milliseconds per second for the fill state machine
pub const MS_PER_SECOND: u32 = 1000;
pub const LOAD_STEP_MS: u32 = 100;
pub const DEFAULT_STEP_MS: u32 = 8;

// Footer: '#####' + 2 x (date(20) + skip(2) + hex(6))
pub const FOOTER_SIZE: u64 = 61;
pub const FOOTER_MARKER: &[u8; 5] = b"#####";
pub const FOOTER_DATE_FIELD: usize = 20;
pub const FOOTER_SKIP: usize = 2;
pub const FOOTER_HEX_FIELD: usize = 6;
pub const FOOTER_DATE_LEN: usize = 19; // "dd.MM.yyyy HH:mm:ss"
pub const FOOTER_DATE_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

// Angle log: approx bytes per line, used for progress estimates
pub const ANGLE_LOG_LINE_BYTES: u64 = 39;
pub const ANGLE_LOG_PROGRESS_EVERY: usize = 800;
pub const FRAME_PROGRESS_EVERY: usize = 100_000;

// Stage record: x(f64) y(f64)
pub const STAGE_RECORD_SIZE: usize = 16;

// Visible-window caps
pub const VISIBLE_CAP_DEFAULT: usize = 4000;
pub const VISIBLE_CAP_BIT_POSITION: usize = 2000;
pub const VISIBLE_EPS: f64 = 0.1;

// Sync
pub const SYNC_GRID_STEP: f64 = 0.008;
pub const SYNC_FACTOR_MIN: f64 = 0.85;
pub const SYNC_FACTOR_MAX: f64 = 1.15;

// Calibration
pub const CALIBRATION_ANGLE_STEP_DEG: f64 = 18.0;
pub const DEFAULT_MK_FACTOR: f64 = 0.0488;
pub const DEFAULT_CALIBRATION_MEDIAN: usize = 7;
pub const PALETTE_ANGLE_STEP: f64 = 1.0;

// Interval detection
pub const MIN_INTERVAL_DURATION: f64 = 3.0;

// Exports
pub const PD_GRID_STEP: f64 = 1.0;
pub const GL1_FRAME_STEP: f64 = 2.097152;
pub const PD_DATE_FORMAT: &str = "%d.%m.%Y %H:%M:%S";
pub const PD_DATE_HEADER: &str = "Date/time\tDepth(m)";

// Snapshot container
pub const SNAPSHOT_VERSION: i32 = 1;
pub const SNAPSHOT_BLOCK: usize = 10_000;
pub const SNAPSHOT_EXTENSION: &str = "dcsnap";
pub const DEFAULT_MAX_SNAPSHOTS: usize = 10;

// Series names created by the pipeline
pub const NAME_POSITION: &str = "przPT.psc";
pub const NAME_BIT_POSITION: &str = "PDOL";
pub const NAME_DEPTH: &str = "gl1";
pub const NAME_SYNTHETIC_PRZ: &str = "1.prz";
pub const DVL_SUFFIX_X: &str = "_X";
pub const DVL_SUFFIX_Z: &str = "_Z";

// Snapshot descriptions
pub const SNAP_LOADED: &str = "PRZ snapshot";
pub const SNAP_POSITION: &str = "Block position";
pub const SNAP_DEPTH: &str = "Depth";
pub const SNAP_SYNTHETIC: &str = "prz";
