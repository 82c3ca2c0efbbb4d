// In-memory time series store

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::constants::*;
use crate::core::error::{DepthError, Result};
use crate::core::filters::{lower_bound, median_edge_clamped, resample_linear, upper_bound};

/// What a series measures. Decided once by whoever creates the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Raw angle encoder curve (radians)
    Angle,
    /// Load cell
    Load,
    /// Measuring wheel
    Wheel,
    /// Rotation sensor, X component
    DvlX,
    /// Rotation sensor, Z component
    DvlZ,
    /// Calibrated block position (meters)
    Position,
    /// Bit position derived from movement intervals
    BitPosition,
    /// Monotone depth derived from bit position
    Depth,
    /// Already-processed data with no sensor semantics
    Staged,
}

impl ChannelKind {
    /// Tag a series from its display name. Used where only a name survives,
    /// e.g. stage files and restored snapshots.
    pub fn from_name(name: &str) -> Self {
        let upper = name.to_uppercase();

        if upper.contains("PDOL") {
            ChannelKind::BitPosition
        } else if upper.contains("GL1") {
            ChannelKind::Depth
        } else if upper.contains("PSC") {
            ChannelKind::Position
        } else if upper.contains("PRZ") || upper.ends_with("PFS") {
            ChannelKind::Angle
        } else if upper.contains("DV") && upper.ends_with(DVL_SUFFIX_X) {
            ChannelKind::DvlX
        } else if upper.contains("DV") && upper.ends_with(DVL_SUFFIX_Z) {
            ChannelKind::DvlZ
        } else if upper.contains("DN") {
            ChannelKind::Load
        } else if upper.contains("MK") || upper.contains("KM") {
            ChannelKind::Wheel
        } else {
            ChannelKind::Staged
        }
    }

    pub fn is_dvl(self) -> bool {
        matches!(self, ChannelKind::DvlX | ChannelKind::DvlZ)
    }

    /// Curves the three corrections may rewrite.
    pub fn is_correctable(self) -> bool {
        matches!(self, ChannelKind::BitPosition | ChannelKind::Depth)
    }

    /// Curves usable wherever a rotation curve is expected.
    pub fn is_rotation(self) -> bool {
        matches!(self, ChannelKind::Angle | ChannelKind::Position)
    }

    pub fn visible_cap(self) -> usize {
        match self {
            ChannelKind::BitPosition => VISIBLE_CAP_BIT_POSITION,
            _ => VISIBLE_CAP_DEFAULT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeSeries {
    name: String,
    path: Option<PathBuf>,
    kind: ChannelKind,
    timestamps: Vec<f64>,
    values: Vec<f64>,
    shift_amount: f64,
    synced: bool,
    visible_cap: usize,
}

impl TimeSeries {
    pub fn new(
        name: impl Into<String>,
        kind: ChannelKind,
        mut timestamps: Vec<f64>,
        mut values: Vec<f64>,
    ) -> Self {
        let name = name.into();

        if timestamps.len() != values.len() {
            warn!(
                "series {}: {} timestamps vs {} values, truncating",
                name,
                timestamps.len(),
                values.len()
            );
            let n = timestamps.len().min(values.len());
            timestamps.truncate(n);
            values.truncate(n);
        }

        Self {
            name,
            path: None,
            kind,
            timestamps,
            values,
            shift_amount: 0.0,
            synced: false,
            visible_cap: kind.visible_cap(),
        }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn shift_amount(&self) -> f64 {
        self.shift_amount
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn start_x(&self) -> Option<f64> {
        self.timestamps.first().copied()
    }

    pub fn finish_x(&self) -> Option<f64> {
        self.timestamps.last().copied()
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    /// `|Y.last - Y.first|`
    pub fn total_len(&self) -> f64 {
        match (self.values.first(), self.values.last()) {
            (Some(a), Some(b)) => (b - a).abs(),
            _ => 0.0,
        }
    }

    fn range_indices(&self, start: Option<f64>, finish: Option<f64>) -> Option<(usize, usize)> {
        let (first, last) = (self.start_x()?, self.finish_x()?);

        if start.is_none() && finish.is_none() {
            return Some((0, self.len()));
        }

        let mut lo = start.unwrap_or(first).max(first);
        let mut hi = finish.unwrap_or(last).min(last);

        if start.is_some_and(|s| s > last) || finish.is_some_and(|f| f < first) {
            lo = first;
            hi = last;
        }

        let st = lower_bound(&self.timestamps, lo);
        let fn_ = lower_bound(&self.timestamps, hi);
        (st < fn_).then_some((st, fn_))
    }

    /// Minimum over `[start, finish)` clipped to the series; `None` when the range holds no samples.
    pub fn range_min(&self, start: Option<f64>, finish: Option<f64>) -> Option<f64> {
        let (st, fn_) = self.range_indices(start, finish)?;
        self.values[st..fn_].iter().copied().reduce(f64::min)
    }

    pub fn range_max(&self, start: Option<f64>, finish: Option<f64>) -> Option<f64> {
        let (st, fn_) = self.range_indices(start, finish)?;
        self.values[st..fn_].iter().copied().reduce(f64::max)
    }

    /// Copy of the samples in `[start, finish]`. Fails when the bounds leave the series.
    pub fn data_part(&self, start: f64, finish: f64) -> Option<(Vec<f64>, Vec<f64>)> {
        let (first, last) = (self.start_x()?, self.finish_x()?);
        if start < first || finish > last {
            return None;
        }

        let lo = lower_bound(&self.timestamps, start);
        let hi = upper_bound(&self.timestamps, finish);
        if hi <= lo {
            return None;
        }

        Some((
            self.timestamps[lo..hi].to_vec(),
            self.values[lo..hi].to_vec(),
        ))
    }

    /// Display decimation of `[min, max]` plus one window width on each side.
    pub fn visible_window(&self, min: f64, max: f64) -> (Vec<f64>, Vec<f64>) {
        let n = self.len();
        if n == 0 {
            return (Vec::new(), Vec::new());
        }

        let lo = lower_bound(&self.timestamps, min - VISIBLE_EPS);
        let hi = upper_bound(&self.timestamps, max + VISIBLE_EPS);
        if hi == 0 || lo >= hi || lo > n - 1 {
            return (Vec::new(), Vec::new());
        }

        let end = hi - 1;
        let buffer = end - lo + 1;
        let start = lo.saturating_sub(buffer);
        let end = (end + buffer).min(n - 1);
        let real_size = end - start + 1;

        if real_size <= self.visible_cap {
            return (
                self.timestamps[start..=end].to_vec(),
                self.values[start..=end].to_vec(),
            );
        }

        let cap = self.visible_cap;
        let step = (real_size - 1) as f64 / (cap - 1) as f64;
        let mut xs = Vec::with_capacity(cap);
        let mut ys = Vec::with_capacity(cap);
        for j in 0..cap {
            let i = ((j as f64 * step).floor() as usize + start).min(end);
            xs.push(self.timestamps[i]);
            ys.push(self.values[i]);
        }
        (xs, ys)
    }

    /// Moves the series in time and remembers the offset for `cancel`.
    pub fn shift(&mut self, delta: f64) {
        self.shift_amount += delta;
        for x in &mut self.timestamps {
            *x += delta;
        }
    }

    /// Flat offset that is not tracked as a user shift.
    pub fn add_delta_time(&mut self, delta: f64) {
        for x in &mut self.timestamps {
            *x += delta;
        }
    }

    pub fn save_shift(&mut self) {
        self.shift_amount = 0.0;
    }

    /// Drops the last `k` samples.
    pub fn chop(&mut self, k: usize) {
        if k == 0 || k > self.len() {
            return;
        }
        let n = self.len() - k;
        self.timestamps.truncate(n);
        self.values.truncate(n);
    }

    /// Keeps only `[start, finish]`. Returns false and leaves the series alone if nothing remains.
    pub fn crop(&mut self, start: f64, finish: f64) -> bool {
        let lo = lower_bound(&self.timestamps, start);
        let hi = upper_bound(&self.timestamps, finish);
        if lo >= hi {
            return false;
        }

        self.timestamps.truncate(hi);
        self.values.truncate(hi);
        self.timestamps.drain(..lo);
        self.values.drain(..lo);
        true
    }

    pub fn resample(&mut self, dx: f64) -> bool {
        if self.len() < 2 || dx <= 0.0 {
            return false;
        }

        let (xs, ys) = resample_linear(&self.timestamps, &self.values, dx);
        self.timestamps = xs;
        self.values = ys;
        true
    }

    /// Rescales elapsed time by `factor` and puts the series back on the 8 ms grid.
    pub fn time_sync(&mut self, factor: f64) {
        let Some(x0) = self.start_x() else {
            return;
        };

        for x in &mut self.timestamps {
            *x = x0 + (*x - x0) * factor;
        }

        if self.len() >= 2 {
            let (xs, ys) = resample_linear(&self.timestamps, &self.values, SYNC_GRID_STEP);
            self.timestamps = xs;
            self.values = ys;
        }

        debug!("series {} synced with factor {:.5}, {} samples", self.name, factor, self.len());
        self.synced = true;
    }

    /// Stretches (or compresses) time around the middle sample, keeping the original spacing.
    pub fn stretch_from_middle(&mut self, factor: f64) {
        let n = self.len();
        if n < 2 || factor == 1.0 {
            return;
        }

        let dx = self.timestamps[1] - self.timestamps[0];
        if dx <= 0.0 {
            return;
        }

        let snap = |v: f64| (v / dx).round() * dx;
        let xs = &self.timestamps;
        let ys = &self.values;
        let middle = n / 2;
        let pivot = xs[middle];
        let even = n % 2 == 0;

        let cap = (n as f64 * factor.abs()).round() as usize + 2;
        let mut nx = Vec::with_capacity(cap);
        let mut ny = Vec::with_capacity(cap);

        let seed = if even { middle - 1 } else { middle };
        nx.push(xs[seed]);
        ny.push(ys[seed]);

        // left half, walking away from the middle
        for i in (0..seed).rev() {
            let x = snap(pivot - (pivot - xs[i]) * factor);
            let (mut bx, mut by) = (nx[nx.len() - 1], ny[ny.len() - 1]);
            if x >= bx {
                continue;
            }

            while bx - x > dx {
                let ins = bx - dx;
                let y = by + (ys[i] - by) * ((ins - bx) / (x - bx));
                nx.push(ins);
                ny.push(y);
                bx = ins;
                by = y;
            }

            if x != bx {
                nx.push(x);
                ny.push(ys[i]);
            }
        }

        nx.reverse();
        ny.reverse();

        if even {
            nx.push(xs[middle]);
            ny.push(ys[middle]);
        }

        // right half
        for i in middle + 1..n {
            let x = snap(pivot + (xs[i] - pivot) * factor);
            let (mut bx, mut by) = (nx[nx.len() - 1], ny[ny.len() - 1]);
            if x <= bx {
                continue;
            }

            while x - bx > dx {
                let ins = bx + dx;
                let y = by + (ys[i] - by) * ((ins - bx) / (x - bx));
                nx.push(ins);
                ny.push(y);
                bx = ins;
                by = y;
            }

            if x != bx {
                nx.push(x);
                ny.push(ys[i]);
            }
        }

        debug!("series {} stretched x{}: {} -> {} samples", self.name, factor, n, nx.len());
        self.timestamps = nx;
        self.values = ny;
    }

    /// Edge-clamped median over the values.
    pub fn median_filter(&mut self, radius: usize) {
        self.values = median_edge_clamped(&self.values, radius);
    }

    /// Replaces the values, keeping the time axis.
    pub fn set_values(&mut self, values: Vec<f64>) -> Result<()> {
        if values.len() != self.timestamps.len() {
            return Err(DepthError::Precondition(format!(
                "series {}: {} values for {} timestamps",
                self.name,
                values.len(),
                self.timestamps.len()
            )));
        }
        self.values = values;
        Ok(())
    }

    pub fn into_parts(self) -> (String, Vec<f64>, Vec<f64>) {
        (self.name, self.timestamps, self.values)
    }
}
