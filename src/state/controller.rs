// Single owner of the loaded series and the operations that transform them

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::core::constants::{SNAP_DEPTH, SNAP_LOADED, SNAP_POSITION, SNAP_SYNTHETIC};
use crate::core::error::{DepthError, Result};
use crate::core::intervals::{detect_from_load, estimate_load_level, Interval, IntervalSet};
use crate::core::series::{ChannelKind, TimeSeries};
use crate::export::{write_gl1, write_pd, PdFormat};
use crate::models::settings::Settings;
use crate::parsers::measure::{read_measure, MeasureList};
use crate::parsers::{parse_file, FileFormat, ParseContext};
use crate::pipeline::dvl::{sensor_base, DvlSet};
use crate::pipeline::{
    approximate, bit_position, calibrate, candle_correction, depth_from_bit_position, interval_lengths,
    interval_params, leaving_correction, length_correction, prz_transform, synchronize, synthesize_prz,
    Approximation, Calibration, Direction, DvlPoint, Edge, IntervalParams, SyncCandidate, SyncReport,
};
use crate::snapshot::{SnapshotData, SnapshotEntry, SnapshotHistory};
use crate::state::events::{ControllerEvent, EventSink};
use crate::state::registry::{SeriesHandle, SeriesRegistry};

/// Which of the two rotation-sensor reference points to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DvlSlot {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeavingPoint {
    pub time: f64,
    pub depth_cm: f64,
}

/// Corrections to run, always in the order candle, length, leaving.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub candle: bool,
    /// Median half-window over the candle coefficients
    pub candle_window: usize,
    pub length: bool,
    pub leaving: Option<LeavingPoint>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionOutcome {
    pub candle: Option<Vec<f64>>,
    pub length: Option<f64>,
    pub leaving: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub id: u64,
    pub name: String,
    pub kind: ChannelKind,
    pub len: usize,
    pub synced: bool,
}

pub struct Controller {
    settings: Settings,
    registry: SeriesRegistry,
    intervals: IntervalSet,
    measured: MeasureList,
    /// Per-interval lengths from the last bit position walk, cm
    computed_lengths: Vec<f64>,
    calibration: Option<(Calibration, Approximation)>,
    dvl_points: [Option<DvlPoint>; 2],
    last_sync: Option<SyncReport>,
    derived_stale: bool,
    history: SnapshotHistory,
    events: EventSink,
    cancel: Arc<AtomicBool>,
}

fn not_found(handle: SeriesHandle) -> DepthError {
    DepthError::SeriesNotFound(handle.to_id().to_string())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

impl Controller {
    pub fn new(settings: Settings, events: EventSink) -> Result<Self> {
        let history = SnapshotHistory::new(&settings.snapshots_dir, settings.max_snapshots)?;

        Ok(Self {
            settings,
            registry: SeriesRegistry::new(),
            intervals: IntervalSet::new(),
            measured: MeasureList::default(),
            computed_lengths: Vec::new(),
            calibration: None,
            dvl_points: [None, None],
            last_sync: None,
            derived_stale: false,
            history,
            events,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    pub fn intervals(&self) -> &IntervalSet {
        &self.intervals
    }

    pub fn measured(&self) -> &MeasureList {
        &self.measured
    }

    pub fn calibration(&self) -> Option<&(Calibration, Approximation)> {
        self.calibration.as_ref()
    }

    pub fn last_sync(&self) -> Option<&SyncReport> {
        self.last_sync.as_ref()
    }

    pub fn dvl_points(&self) -> [Option<DvlPoint>; 2] {
        self.dvl_points
    }

    /// True after an interval was added since the last bit position was built.
    pub fn derived_stale(&self) -> bool {
        self.derived_stale
    }

    pub fn series(&self, handle: SeriesHandle) -> Option<&TimeSeries> {
        self.registry.get(handle)
    }

    pub fn find(&self, kind: ChannelKind) -> Option<SeriesHandle> {
        self.registry.find_by_kind(kind)
    }

    pub fn series_list(&self) -> Vec<SeriesSummary> {
        self.registry
            .iter()
            .map(|(h, s)| SeriesSummary {
                id: h.to_id(),
                name: s.name().to_string(),
                kind: s.kind(),
                len: s.len(),
                synced: s.is_synced(),
            })
            .collect()
    }

    /// Stops running parse and snapshot workers at their next checkpoint.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
        self.history.cancel();
    }

    pub fn add_series(&mut self, series: TimeSeries) -> SeriesHandle {
        let name = series.name().to_string();
        let handle = self.registry.insert(series);
        debug!("series added: {} ({:?})", name, handle);
        self.events.emit(ControllerEvent::SeriesAdded { handle, name });
        handle
    }

    pub fn remove_series(&mut self, handle: SeriesHandle) -> Option<TimeSeries> {
        let series = self.registry.remove(handle)?;
        self.events.emit(ControllerEvent::SeriesRemoved {
            handle,
            name: series.name().to_string(),
        });
        Some(series)
    }

    fn remove_where(&mut self, pred: impl Fn(&TimeSeries) -> bool) {
        for handle in self.registry.find_all(pred) {
            self.remove_series(handle);
        }
    }

    fn require(&self, kind: ChannelKind, what: &str) -> Result<SeriesHandle> {
        self.registry
            .find_by_kind(kind)
            .ok_or_else(|| DepthError::Precondition(format!("{what} is not loaded")))
    }

    /// Calibrated position if present, otherwise the raw angle curve.
    fn rotation_handle(&self) -> Option<SeriesHandle> {
        self.registry
            .find_by_kind(ChannelKind::Position)
            .or_else(|| self.registry.find_by_kind(ChannelKind::Angle))
    }

    async fn snapshot(&self, description: &str) -> Option<usize> {
        let entries: Vec<SnapshotEntry> = self
            .registry
            .iter()
            .map(|(_, s)| SnapshotEntry::from_series(s))
            .collect();

        match self.history.create(entries, description, |_| {}).await {
            Ok(index) => {
                self.events.emit(ControllerEvent::SnapshotSaved {
                    index,
                    description: description.to_string(),
                });
                Some(index)
            }
            Err(e) => {
                warn!("snapshot {:?} not saved: {}", description, e);
                self.events.emit(ControllerEvent::SnapshotFailed { message: e.diagnostic() });
                None
            }
        }
    }

    /// Parses every file on its own blocking worker, then synchronizes the results.
    ///
    /// A file that fails to parse is reported and skipped.
    pub async fn load_files(&mut self, paths: &[PathBuf]) -> Result<Vec<SeriesHandle>> {
        self.cancel.store(false, Ordering::Release);
        let options = self.settings.parse_options();
        let mut expected = 0usize;
        let mut workers = JoinSet::new();

        for (order, path) in paths.iter().enumerate() {
            let file_name = file_name_of(path);
            let Some(format) = FileFormat::detect(&file_name) else {
                let e = DepthError::UnrecognizedFile(path.display().to_string());
                warn!("{}", e);
                self.events.emit(ControllerEvent::ParseFailed {
                    file: file_name,
                    message: e.diagnostic(),
                });
                continue;
            };

            let channels = format.channel_count();
            expected += channels;

            let path = path.clone();
            let sink = self.events.clone();
            let cancel = Arc::clone(&self.cancel);

            workers.spawn_blocking(move || {
                let file = file_name.clone();
                let mut progress = |percent: u8| {
                    sink.emit(ControllerEvent::ParseProgress {
                        file: file.clone(),
                        percent,
                    })
                };
                let mut ctx = ParseContext::new(&mut progress).with_cancel(&cancel);
                let result = parse_file(&path, &options, &mut ctx);
                (order, channels, path, file_name, result)
            });
        }

        let mut results = Vec::with_capacity(workers.len());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(r) => results.push(r),
                Err(e) => error!("parse worker failed: {}", e),
            }
        }
        results.sort_by_key(|r| r.0);

        let mut candidates = Vec::new();
        for (_, channels, path, file_name, result) in results {
            match result {
                Ok(parsed) => {
                    let (factor, delta) = (parsed.sync_factor(), parsed.delta());
                    self.events.emit(ControllerEvent::ParseFinished {
                        file: file_name,
                        series: parsed.channels.len(),
                    });
                    for channel in parsed.channels {
                        if channel.timestamps.is_empty() {
                            warn!("{}: no samples, skipped", channel.name);
                            continue;
                        }
                        candidates.push(SyncCandidate::new(channel.into_series(&path), factor, delta));
                    }
                }
                Err(e) => {
                    expected = expected.saturating_sub(channels);
                    warn!("failed to parse {}: {}", path.display(), e);
                    self.events.emit(ControllerEvent::ParseFailed {
                        file: file_name,
                        message: e.diagnostic(),
                    });
                }
            }
        }

        info!("{} of {} expected series loaded", candidates.len(), expected);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let report = synchronize(&mut candidates, self.settings.time_sync);
        self.events.emit(ControllerEvent::SyncDone {
            factors: report.factors.clone(),
            applied: report.applied.clone(),
        });
        for channel in &report.not_performed {
            self.events.emit(ControllerEvent::CorrectionNotPerformed {
                channel: channel.clone(),
            });
        }
        self.last_sync = Some(report);

        let has_dvl = candidates.iter().any(|c| c.series.kind().is_dvl());
        let handles: Vec<SeriesHandle> = candidates
            .into_iter()
            .map(|c| self.add_series(c.series))
            .collect();

        if !has_dvl {
            self.snapshot(SNAP_LOADED).await;
        }
        Ok(handles)
    }

    /// Replaces the interval list with the runs where load stays at or above `level`.
    pub fn detect_intervals(&mut self, level: f64) -> Result<usize> {
        let load = self.require(ChannelKind::Load, "load curve")?;
        let load = self.registry.get(load).ok_or_else(|| not_found(load))?;
        let rotation = self.rotation_handle().and_then(|h| self.registry.get(h));

        let set = detect_from_load(load, level, rotation, self.settings.min_candle_len_cm / 100.0);
        let count = set.len();
        self.intervals = set;
        self.derived_stale = true;
        self.events.emit(ControllerEvent::IntervalsChanged { count });
        Ok(count)
    }

    pub fn estimate_load_level(&self, window: usize) -> Result<(f64, f64)> {
        let load = self.require(ChannelKind::Load, "load curve")?;
        let rotation = self
            .rotation_handle()
            .ok_or_else(|| DepthError::Precondition("angle curve is not loaded".to_string()))?;

        match (self.registry.get(rotation), self.registry.get(load)) {
            (Some(r), Some(l)) => estimate_load_level(r, l, window)
                .ok_or_else(|| DepthError::Precondition("load level cannot be estimated".to_string())),
            _ => Err(DepthError::Precondition("load level cannot be estimated".to_string())),
        }
    }

    pub fn add_interval(&mut self, start: f64, finish: f64) -> bool {
        let changed = self.intervals.add(start, finish);
        if changed {
            self.derived_stale = true;
            self.events.emit(ControllerEvent::IntervalsChanged {
                count: self.intervals.len(),
            });
        }
        changed
    }

    /// Deleting an interval drops the bit position and depth curves built on it.
    pub fn delete_interval(&mut self, start: f64, finish: f64) -> bool {
        let changed = self.intervals.delete(start, finish);
        if changed {
            self.remove_where(|s| s.kind().is_correctable());
            self.computed_lengths.clear();
            self.events.emit(ControllerEvent::IntervalsChanged {
                count: self.intervals.len(),
            });
        }
        changed
    }

    pub fn set_intervals(&mut self, intervals: impl IntoIterator<Item = Interval>) {
        self.intervals = IntervalSet::from_intervals(intervals);
        self.derived_stale = true;
        self.events.emit(ControllerEvent::IntervalsChanged {
            count: self.intervals.len(),
        });
    }

    /// Calibrates the angle curve against the measuring wheel over `[start, finish]`.
    pub fn calibrate(&mut self, start: f64, finish: f64, inverted: bool) -> Result<Approximation> {
        let angle = self.require(ChannelKind::Angle, "angle curve")?;
        let wheel = self.require(ChannelKind::Wheel, "measuring wheel curve")?;
        let (Some(angle), Some(wheel)) = (self.registry.get(angle), self.registry.get(wheel)) else {
            return Err(DepthError::Precondition("calibration curves are missing".to_string()));
        };

        let cal = calibrate(
            angle,
            wheel,
            start,
            finish,
            self.settings.mk_factor,
            inverted,
            self.settings.calibration_median_window,
        )
        .ok_or_else(|| DepthError::Precondition(format!("no calibration data in [{start}, {finish}]")))?;

        let appr = approximate(&cal)
            .ok_or_else(|| DepthError::Precondition("calibration fit is degenerate".to_string()))?;

        self.events.emit(ControllerEvent::CalibrationDone {
            factor_a: appr.factor_a,
            factor_b: appr.factor_b,
        });
        self.calibration = Some((cal, appr.clone()));
        Ok(appr)
    }

    /// Turns the angle curve into block position with the last calibration.
    ///
    /// The angle and measuring wheel curves are replaced by the result.
    pub async fn convert_prz(&mut self) -> Result<SeriesHandle> {
        let (factor_a, factor_b) = match &self.calibration {
            Some((_, appr)) => (appr.factor_a, appr.factor_b),
            None => return Err(DepthError::Precondition("calibration is required".to_string())),
        };

        let angle = self.require(ChannelKind::Angle, "angle curve")?;
        let position = self
            .registry
            .get(angle)
            .and_then(|s| prz_transform(s, factor_a, factor_b))
            .ok_or_else(|| DepthError::Precondition("transform produced no data".to_string()))?;

        self.remove_series(angle);
        self.remove_where(|s| s.kind() == ChannelKind::Wheel);
        self.remove_where(|s| s.kind() == ChannelKind::Position);
        let handle = self.add_series(position);

        self.snapshot(SNAP_POSITION).await;
        Ok(handle)
    }

    /// Builds the bit position curve and crops the intervals to the chosen bounds.
    pub fn create_bit_position(
        &mut self,
        anchor_time: f64,
        anchor_depth_cm: f64,
        first_point: f64,
        second_point: f64,
    ) -> Result<SeriesHandle> {
        let position = self.require(ChannelKind::Position, "block position curve")?;
        let bit = self
            .registry
            .get(position)
            .and_then(|s| {
                bit_position(
                    s,
                    &self.intervals,
                    anchor_time,
                    anchor_depth_cm,
                    first_point,
                    second_point,
                )
            })
            .ok_or_else(|| DepthError::Precondition("bit position needs movement intervals".to_string()))?;

        if !bit.anchored {
            self.events.diagnostic(format!(
                "anchor time {anchor_time} is outside the position curve; bit position is not anchored"
            ));
        }

        self.remove_where(|s| s.kind() == ChannelKind::BitPosition);
        self.intervals = bit.intervals;
        self.computed_lengths = bit.lengths;
        self.derived_stale = false;
        self.events.emit(ControllerEvent::IntervalsChanged {
            count: self.intervals.len(),
        });

        Ok(self.add_series(bit.series))
    }

    pub async fn create_depth(&mut self, direction: Direction, edge: Edge) -> Result<SeriesHandle> {
        let bit = self.require(ChannelKind::BitPosition, "bit position curve")?;
        let depth = self
            .registry
            .get(bit)
            .and_then(|s| depth_from_bit_position(s, direction, edge))
            .ok_or_else(|| DepthError::Precondition("bit position curve is empty".to_string()))?;

        self.remove_where(|s| s.kind() == ChannelKind::Depth);
        let handle = self.add_series(depth);

        self.snapshot(SNAP_DEPTH).await;
        Ok(handle)
    }

    pub fn interval_params(&self, kind: ChannelKind) -> Result<Vec<IntervalParams>> {
        if !kind.is_correctable() {
            return Err(DepthError::Precondition(format!("no interval parameters for {kind:?}")));
        }
        let handle = self.require(kind, "derived curve")?;
        let series = self.registry.get(handle).ok_or_else(|| not_found(handle))?;
        Ok(interval_params(series, &self.intervals))
    }

    /// Runs the requested corrections on a bit position or depth curve.
    ///
    /// Leaving correction only runs after a candle or length correction.
    pub fn apply_corrections(&mut self, target: SeriesHandle, request: &CorrectionRequest) -> Result<CorrectionOutcome> {
        let series = self.registry.get_mut(target).ok_or_else(|| not_found(target))?;
        if !series.kind().is_correctable() {
            return Err(DepthError::Precondition(format!(
                "{} is not a bit position or depth curve",
                series.name()
            )));
        }

        let mut outcome = CorrectionOutcome::default();

        if request.candle {
            if self.measured.is_empty() {
                return Err(DepthError::Precondition("measured candle lengths are not loaded".to_string()));
            }
            let computed = if self.computed_lengths.len() == self.intervals.len() && !self.computed_lengths.is_empty() {
                self.computed_lengths.clone()
            } else {
                interval_lengths(series, &self.intervals)
            };
            outcome.candle = Some(candle_correction(
                series,
                &computed,
                &self.measured.lengths,
                &self.intervals,
                request.candle_window,
            )?);
        }

        if request.length {
            if self.measured.total > 0.0 {
                outcome.length = length_correction(series, self.measured.total)?;
            } else {
                warn!("length correction skipped: measured total length is zero");
            }
        }

        if let Some(point) = request.leaving {
            if outcome.candle.is_some() || outcome.length.is_some() {
                outcome.leaving = leaving_correction(series, point.time, point.depth_cm / 100.0)?;
            } else {
                warn!("leaving correction skipped: no candle or length correction was applied");
            }
        }

        let name = series.name().to_string();
        self.events.emit(ControllerEvent::CorrectionDone { name });
        Ok(outcome)
    }

    /// The series plus, for a rotation sensor component, its sibling component.
    fn with_sibling(&self, handle: SeriesHandle) -> Result<Vec<SeriesHandle>> {
        let series = self.registry.get(handle).ok_or_else(|| not_found(handle))?;
        let mut out = vec![handle];

        if series.kind().is_dvl() {
            let kind = series.kind();
            let base = sensor_base(series.name()).to_string();
            out.extend(
                self.registry
                    .find_all(|s| s.kind().is_dvl() && s.kind() != kind && sensor_base(s.name()) == base),
            );
        }
        Ok(out)
    }

    pub fn shift_series(&mut self, handle: SeriesHandle, ms: f64) -> Result<()> {
        for h in self.with_sibling(handle)? {
            if let Some(s) = self.registry.get_mut(h) {
                s.shift(ms / 1000.0);
                debug!("{} shifted to {:.3} s", s.name(), s.shift_amount());
            }
        }
        Ok(())
    }

    pub fn cancel_shift(&mut self, handle: SeriesHandle) -> Result<()> {
        for h in self.with_sibling(handle)? {
            if let Some(s) = self.registry.get_mut(h) {
                let undo = -s.shift_amount();
                s.shift(undo);
            }
        }
        Ok(())
    }

    /// Records both sensors' current shifts at `time`, snapped to the 8 ms grid.
    pub fn set_dvl_point(&mut self, slot: DvlSlot, time: f64) -> Result<DvlPoint> {
        let set = DvlSet::collect(self.registry.iter().map(|(_, s)| s)).ok_or_else(|| {
            DepthError::Precondition("two rotation sensors with X and Z components are required".to_string())
        })?;

        let point = DvlPoint::new(set.x1.shift_amount(), set.x2.shift_amount(), time);
        let idx = match slot {
            DvlSlot::First => 0,
            DvlSlot::Second => 1,
        };
        self.dvl_points[idx] = Some(point);
        info!("rotation sensor point {:?}: {:?}", slot, point);
        Ok(point)
    }

    /// Replaces the rotation sensor components with the synthetic angle curve.
    pub async fn synthesize_prz(&mut self) -> Result<SeriesHandle> {
        let [Some(p1), Some(p2)] = self.dvl_points else {
            return Err(DepthError::Precondition("both rotation sensor points must be set".to_string()));
        };
        let set = DvlSet::collect(self.registry.iter().map(|(_, s)| s)).ok_or_else(|| {
            DepthError::Precondition("two rotation sensors with X and Z components are required".to_string())
        })?;

        let prz = synthesize_prz(
            set,
            p1,
            p2,
            self.settings.dv_median_radius,
            self.settings.dv_exp_alpha,
        )
        .ok_or_else(|| DepthError::Precondition("rotation sensors cannot be combined".to_string()))?;

        self.remove_where(|s| s.kind().is_dvl());
        let handle = self.add_series(prz);
        self.dvl_points = [None, None];

        self.snapshot(SNAP_SYNTHETIC).await;
        Ok(handle)
    }

    pub fn export_pd(&self, handle: SeriesHandle, path: &Path, format: PdFormat) -> Result<usize> {
        let series = self.registry.get(handle).ok_or_else(|| not_found(handle))?;
        write_pd(series, path, format)
    }

    pub fn export_gl1(&self, handle: SeriesHandle, path: &Path, start_frame: i32) -> Result<usize> {
        let series = self.registry.get(handle).ok_or_else(|| not_found(handle))?;
        write_gl1(series, path, start_frame)
    }

    /// Loads measured candle lengths. Returns how many were read.
    pub fn open_measure(&mut self, path: &Path) -> Result<usize> {
        let list = read_measure(path)?;
        info!("{} measured candles, total {:.1} cm", list.len(), list.total);
        self.events
            .diagnostic(format!("{} measured candles loaded from {}", list.len(), file_name_of(path)));
        let count = list.len();
        self.measured = list;
        Ok(count)
    }

    fn replace_all(&mut self, data: SnapshotData) {
        for (handle, series) in self.registry.drain() {
            self.events.emit(ControllerEvent::SeriesRemoved {
                handle,
                name: series.name().to_string(),
            });
        }

        let count = data.entries.len();
        for entry in data.entries {
            self.add_series(entry.into_series());
        }
        self.events.emit(ControllerEvent::SnapshotRestored {
            index: self.history.current_index().unwrap_or(0),
            series: count,
        });
    }

    /// Restores the previous snapshot. Returns false when there is none.
    pub async fn undo(&mut self) -> Result<bool> {
        let history = self.history.clone();
        let restored = history.undo(|_| {}).await;
        self.finish_restore(restored)
    }

    pub async fn redo(&mut self) -> Result<bool> {
        let history = self.history.clone();
        let restored = history.redo(|_| {}).await;
        self.finish_restore(restored)
    }

    fn finish_restore(&mut self, restored: Result<Option<SnapshotData>>) -> Result<bool> {
        match restored {
            Ok(Some(data)) => {
                self.replace_all(data);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                self.events.emit(ControllerEvent::SnapshotFailed { message: e.diagnostic() });
                Err(e)
            }
        }
    }

    /// Drops every series, interval, measurement and snapshot.
    pub fn clear_all(&mut self) {
        for (handle, series) in self.registry.drain() {
            self.events.emit(ControllerEvent::SeriesRemoved {
                handle,
                name: series.name().to_string(),
            });
        }
        self.intervals.clear();
        self.measured = MeasureList::default();
        self.computed_lengths.clear();
        self.calibration = None;
        self.dvl_points = [None, None];
        self.last_sync = None;
        self.derived_stale = false;
        self.history.clear_history();
        self.events.emit(ControllerEvent::IntervalsChanged { count: 0 });
        info!("workspace cleared");
    }
}
