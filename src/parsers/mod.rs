// Sensor file parsers: routing by file name and the shared parse result

pub mod angle_log;
pub mod frame;
pub mod measure;
pub mod stage;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::core::constants::{DEFAULT_STEP_MS, DVL_SUFFIX_X, DVL_SUFFIX_Z, LOAD_STEP_MS};
use crate::core::error::{DepthError, Result};
use crate::core::filters::median_edge_clamped;
use crate::core::series::{ChannelKind, TimeSeries};

/// Start/finish of the recorded span and their reference counterparts from the footer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SyncStamps {
    pub start: f64,
    pub finish: f64,
    pub ref_start: f64,
    pub ref_finish: f64,
}

impl SyncStamps {
    /// `(finish - start) / (ref_finish - ref_start)`, or 0 when the reference span is empty.
    pub fn sync_factor(&self) -> f64 {
        let span = self.ref_finish - self.ref_start;
        if span != 0.0 {
            (self.finish - self.start) / span
        } else {
            0.0
        }
    }

    /// Offset from the recorder's clock to real time.
    pub fn delta(&self) -> f64 {
        self.start - self.ref_start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    AngleLog,
    LoadFrames,
    DvlFrames,
    WheelFrames,
    Stage,
}

impl FileFormat {
    pub fn detect(file_name: &str) -> Option<Self> {
        let upper = file_name.to_uppercase();

        if upper.ends_with(".PRZ") {
            Some(FileFormat::AngleLog)
        } else if upper.ends_with(".IFH") && upper.contains("DN") {
            Some(FileFormat::LoadFrames)
        } else if upper.ends_with(".IFH") && upper.contains("DV") {
            Some(FileFormat::DvlFrames)
        } else if upper.ends_with(".IFH") && (upper.contains("MK") || upper.contains("KM")) {
            Some(FileFormat::WheelFrames)
        } else if upper.ends_with("FS") || upper.ends_with("SC") {
            Some(FileFormat::Stage)
        } else {
            None
        }
    }

    /// How many series a file of this format produces.
    pub fn channel_count(self) -> usize {
        match self {
            FileFormat::DvlFrames => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedChannel {
    pub name: String,
    pub kind: ChannelKind,
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
}

impl ParsedChannel {
    pub fn into_series(self, path: &Path) -> TimeSeries {
        TimeSeries::new(self.name, self.kind, self.timestamps, self.values).with_path(path)
    }
}

/// Everything a parse worker hands back to the controller.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub file_name: String,
    pub format: FileFormat,
    pub channels: Vec<ParsedChannel>,
    pub stamps: SyncStamps,
}

impl ParsedFile {
    pub fn sync_factor(&self) -> f64 {
        self.stamps.sync_factor()
    }

    pub fn delta(&self) -> f64 {
        self.stamps.delta()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(|c| c.timestamps.is_empty())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    pub dn_median_radius: usize,
    pub sample_step_ms: u32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            dn_median_radius: 3,
            sample_step_ms: DEFAULT_STEP_MS,
        }
    }
}

/// Progress sink plus cooperative cancellation shared by the parsers.
pub struct ParseContext<'a> {
    progress: &'a mut dyn FnMut(u8),
    cancel: Option<&'a AtomicBool>,
}

impl<'a> ParseContext<'a> {
    pub fn new(progress: &'a mut dyn FnMut(u8)) -> Self {
        Self { progress, cancel: None }
    }

    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn report(&mut self, done: usize, total: usize) {
        let pct = if total == 0 { 100 } else { (done * 100 / total).min(100) };
        (self.progress)(pct as u8);
    }

    pub fn finish(&mut self) {
        (self.progress)(100);
    }

    pub fn check_cancel(&self, what: &str) -> Result<()> {
        match self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(DepthError::Cancelled(what.to_string())),
            _ => Ok(()),
        }
    }
}

/// Parses any supported sensor file, picking the decoder from the file name.
pub fn parse_file(path: &Path, options: &ParseOptions, ctx: &mut ParseContext<'_>) -> Result<ParsedFile> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    if file_name.is_empty() {
        return Err(DepthError::UnrecognizedFile(path.display().to_string()));
    }

    let format = FileFormat::detect(&file_name)
        .ok_or_else(|| DepthError::UnrecognizedFile(file_name.clone()))?;

    debug!("parsing {} as {:?}", file_name, format);

    let (channels, stamps) = match format {
        FileFormat::AngleLog => {
            let log = angle_log::read_angle_log(path, ctx)?;
            let channel = ParsedChannel {
                name: file_name.clone(),
                kind: ChannelKind::Angle,
                timestamps: log.timestamps,
                values: log.values,
            };
            (vec![channel], log.stamps)
        }
        FileFormat::LoadFrames | FileFormat::WheelFrames => {
            let (step, kind) = if format == FileFormat::LoadFrames {
                (LOAD_STEP_MS, ChannelKind::Load)
            } else {
                (options.sample_step_ms, ChannelKind::Wheel)
            };

            let data = frame::read_frames(path, step, frame::FrameLayout::Single, ctx)?;
            let values = if kind == ChannelKind::Load {
                median_edge_clamped(&data.primary, options.dn_median_radius)
            } else {
                data.primary
            };

            let channel = ParsedChannel {
                name: file_name.clone(),
                kind,
                timestamps: data.timestamps,
                values,
            };
            (vec![channel], data.stamps)
        }
        FileFormat::DvlFrames => {
            let data = frame::read_frames(path, options.sample_step_ms, frame::FrameLayout::Dual, ctx)?;
            let z = ParsedChannel {
                name: format!("{file_name}{DVL_SUFFIX_Z}"),
                kind: ChannelKind::DvlZ,
                timestamps: data.timestamps.clone(),
                values: data.primary,
            };
            let x = ParsedChannel {
                name: format!("{file_name}{DVL_SUFFIX_X}"),
                kind: ChannelKind::DvlX,
                timestamps: data.timestamps,
                values: data.secondary.unwrap_or_default(),
            };
            (vec![z, x], data.stamps)
        }
        FileFormat::Stage => {
            let (timestamps, values) = stage::read_stage(path)?;
            let channel = ParsedChannel {
                kind: ChannelKind::from_name(&file_name),
                name: file_name.clone(),
                timestamps,
                values,
            };
            (vec![channel], SyncStamps::default())
        }
    };

    ctx.finish();

    let parsed = ParsedFile {
        file_name,
        format,
        channels,
        stamps,
    };

    info!(
        "loaded {}: {} samples, sync factor {:.5}",
        parsed.file_name,
        parsed.channels.first().map(|c| c.timestamps.len()).unwrap_or(0),
        parsed.sync_factor()
    );

    Ok(parsed)
}
