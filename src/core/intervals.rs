// Movement intervals: detection from load and non-overlapping edits

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::constants::MIN_INTERVAL_DURATION;
use crate::core::filters::lower_bound;
use crate::core::series::TimeSeries;

/// A time range where the string is considered moving.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: f64,
    pub finish: f64,
    /// Envelope height for rendering only.
    pub peak: f64,
}

impl Interval {
    pub fn new(start: f64, finish: f64, peak: f64) -> Self {
        let (start, finish) = if start <= finish { (start, finish) } else { (finish, start) };
        Self { start, finish, peak }
    }

    pub fn duration(&self) -> f64 {
        self.finish - self.start
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.finish
    }

    fn overlaps(&self, start: f64, finish: f64) -> bool {
        self.start <= finish && self.finish >= start
    }
}

/// Sorted, non-overlapping list of intervals. Position + 1 is the interval number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalSet {
    items: Vec<Interval>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Builds a set from arbitrary ranges, merging anything that overlaps.
    pub fn from_intervals(list: impl IntoIterator<Item = Interval>) -> Self {
        let mut set = Self::new();
        for iv in list {
            set.add_with_peak(iv.start, iv.finish, Some(iv.peak));
        }
        set
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<&Interval> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&Interval> {
        self.items.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.items.iter()
    }

    /// `(number, interval)` pairs, numbered from 1.
    pub fn numbered(&self) -> impl Iterator<Item = (usize, &Interval)> {
        self.items.iter().enumerate().map(|(i, iv)| (i + 1, iv))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn is_consistent(&self) -> bool {
        self.items.iter().all(|iv| iv.start <= iv.finish)
            && self.items.windows(2).all(|w| w[0].finish < w[1].start)
    }

    /// Adds `[start, finish]`, absorbing every interval it touches.
    /// Returns false when the range is already covered by one interval.
    pub fn add(&mut self, start: f64, finish: f64) -> bool {
        self.add_with_peak(start, finish, None)
    }

    fn add_with_peak(&mut self, start: f64, finish: f64, peak: Option<f64>) -> bool {
        let (start, finish) = if start <= finish { (start, finish) } else { (finish, start) };

        if self.items.iter().any(|iv| iv.start <= start && iv.finish >= finish) {
            return false;
        }

        let mut merged = Interval::new(
            start,
            finish,
            peak.or_else(|| self.items.first().map(|iv| iv.peak)).unwrap_or(0.0),
        );

        self.items.retain(|iv| {
            if iv.overlaps(start, finish) {
                merged.start = merged.start.min(iv.start);
                merged.finish = merged.finish.max(iv.finish);
                merged.peak = merged.peak.max(iv.peak);
                false
            } else {
                true
            }
        });

        let pos = self.items.partition_point(|iv| iv.start < merged.start);
        self.items.insert(pos, merged);
        debug!("interval added [{}, {}], {} total", merged.start, merged.finish, self.items.len());
        true
    }

    /// Removes `[start, finish]` from the movement ranges, trimming or splitting
    /// the intervals it cuts. Returns true if anything changed.
    pub fn delete(&mut self, start: f64, finish: f64) -> bool {
        let (start, finish) = if start <= finish { (start, finish) } else { (finish, start) };
        if start == finish {
            return false;
        }
        let mut out = Vec::with_capacity(self.items.len() + 1);
        let mut changed = false;

        for iv in self.items.drain(..) {
            // a range that only touches an end point cuts nothing
            if start >= iv.finish || finish <= iv.start {
                out.push(iv);
                continue;
            }

            changed = true;

            if start <= iv.start && finish >= iv.finish {
                continue;
            }

            if start > iv.start && finish < iv.finish {
                out.push(Interval { finish: start, ..iv });
                out.push(Interval { start: finish, ..iv });
            } else if start > iv.start {
                out.push(Interval { finish: start, ..iv });
            } else {
                out.push(Interval { start: finish, ..iv });
            }
        }

        self.items = out;
        changed
    }

    /// Drops everything outside `[start, finish]`.
    pub fn crop(&mut self, start: f64, finish: f64) {
        let (start, finish) = if start <= finish { (start, finish) } else { (finish, start) };

        self.items.retain(|iv| iv.finish > start && iv.start < finish);
        for iv in &mut self.items {
            iv.start = iv.start.max(start);
            iv.finish = iv.finish.min(finish);
        }
    }

    /// Keeps only intervals with index in `[first, last]`.
    pub fn retain_range(&mut self, first: usize, last: usize) {
        if self.items.is_empty() || first > last {
            return;
        }
        let last = last.min(self.items.len() - 1);
        self.items.truncate(last + 1);
        self.items.drain(..first.min(self.items.len()));
    }
}

/// Finds runs where `load >= level` lasting more than 3 s.
///
/// When a rotation curve is given, a run is kept only if the curve moves by more
/// than `min_candle_len_m` across it.
pub fn detect_from_load(
    load: &TimeSeries,
    level: f64,
    rotation: Option<&TimeSeries>,
    min_candle_len_m: f64,
) -> IntervalSet {
    let xs = load.timestamps();
    let ys = load.values();
    let peak = load.max().unwrap_or(0.0);
    let mut set = IntervalSet::new();

    let rotation_at = |t: f64| -> Option<f64> {
        let r = rotation?;
        if r.is_empty() {
            return None;
        }
        let i = lower_bound(r.timestamps(), t).min(r.len() - 1);
        Some(r.values()[i])
    };

    let close_run = |st: usize, fn_: usize, set: &mut IntervalSet| {
        if (xs[fn_] - xs[st]).abs() <= MIN_INTERVAL_DURATION {
            return;
        }
        let keep = match rotation {
            None => true,
            Some(_) => match (rotation_at(xs[st]), rotation_at(xs[fn_])) {
                (Some(a), Some(b)) => (b - a).abs() > min_candle_len_m,
                _ => false,
            },
        };
        if keep {
            set.items.push(Interval::new(xs[st], xs[fn_], peak));
        }
    };

    let mut run: Option<(usize, usize)> = None;
    for (i, &y) in ys.iter().enumerate() {
        if y >= level {
            run = Some(match run {
                Some((st, _)) => (st, i),
                None => (i, i),
            });
        } else if let Some((st, fn_)) = run.take() {
            close_run(st, fn_, &mut set);
        }
    }
    if let Some((st, fn_)) = run {
        close_run(st, fn_, &mut set);
    }

    info!("load level {}: {} movement intervals", level, set.len());
    set
}

/// Estimates `(lower, upper)` load levels by averaging the load around every
/// rotation step, split by rotation direction.
pub fn estimate_load_level(rotation: &TimeSeries, load: &TimeSeries, window: usize) -> Option<(f64, f64)> {
    if rotation.len() < 2 || load.is_empty() {
        return None;
    }

    let window = if window == 0 { 2 } else { window };
    let half = window / 2;
    let lx = load.timestamps();
    let ly = load.values();
    let rx = rotation.timestamps();
    let ry = rotation.values();

    let (mut up, mut up_n, mut down, mut down_n) = (0.0, 0usize, 0.0, 0usize);

    for i in 1..ry.len() {
        let d = ry[i] - ry[i - 1];
        if d == 0.0 {
            continue;
        }

        let a = lower_bound(lx, rx[i]);
        if a >= lx.len() {
            break;
        }
        let lo = a.saturating_sub(half);
        let hi = (a + half).min(lx.len() - 1);
        let mean = ly[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64;

        if d > 0.0 {
            up += mean;
            up_n += 1;
        } else {
            down += mean;
            down_n += 1;
        }
    }

    if up_n == 0 || down_n == 0 {
        return None;
    }

    let levels = (down / down_n as f64, up / up_n as f64);
    info!("estimated load levels: {:.3} / {:.3}", levels.0, levels.1);
    Some(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::series::ChannelKind;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn set(ranges: &[(f64, f64)]) -> IntervalSet {
        IntervalSet::from_intervals(ranges.iter().map(|&(a, b)| Interval::new(a, b, 1.0)))
    }

    fn bounds(s: &IntervalSet) -> Vec<(f64, f64)> {
        s.iter().map(|iv| (iv.start, iv.finish)).collect()
    }

    #[test]
    fn test_add_appends_and_merges() {
        let mut s = set(&[(0.0, 10.0), (20.0, 30.0)]);
        assert!(s.add(40.0, 50.0));
        assert_eq!(bounds(&s), vec![(0.0, 10.0), (20.0, 30.0), (40.0, 50.0)]);

        assert!(s.add(5.0, 25.0));
        assert_eq!(bounds(&s), vec![(0.0, 30.0), (40.0, 50.0)]);

        assert!(!s.add(41.0, 45.0));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_add_into_gap_keeps_order() {
        let mut s = set(&[(0.0, 10.0), (40.0, 50.0)]);
        s.add(20.0, 30.0);
        assert_eq!(bounds(&s), vec![(0.0, 10.0), (20.0, 30.0), (40.0, 50.0)]);
        assert_eq!(s.numbered().map(|(n, _)| n).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_delete_trims_removes_and_splits() {
        let mut s = set(&[(0.0, 10.0), (20.0, 30.0), (40.0, 50.0)]);

        // right trim of the first, full removal of the second, left trim of the third
        assert!(s.delete(5.0, 45.0));
        assert_eq!(bounds(&s), vec![(0.0, 5.0), (45.0, 50.0)]);

        // split
        let mut s = set(&[(0.0, 10.0)]);
        s.delete(3.0, 4.0);
        assert_eq!(bounds(&s), vec![(0.0, 3.0), (4.0, 10.0)]);

        // outside
        assert!(!s.delete(20.0, 30.0));
    }

    #[test]
    fn test_crop() {
        let mut s = set(&[(0.0, 10.0), (20.0, 30.0), (40.0, 50.0)]);
        s.crop(5.0, 42.0);
        assert_eq!(bounds(&s), vec![(5.0, 10.0), (20.0, 30.0), (40.0, 42.0)]);

        // intervals that only touch the bounds are dropped
        let mut s = set(&[(0.0, 10.0), (20.0, 30.0), (40.0, 50.0)]);
        s.crop(10.0, 40.0);
        assert_eq!(bounds(&s), vec![(20.0, 30.0)]);
    }

    #[test]
    fn test_retain_range() {
        let mut s = set(&[(0.0, 1.0), (2.0, 3.0), (4.0, 5.0), (6.0, 7.0)]);
        s.retain_range(1, 2);
        assert_eq!(bounds(&s), vec![(2.0, 3.0), (4.0, 5.0)]);
    }

    #[test]
    fn test_random_edits_stay_sorted_and_disjoint() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut s = IntervalSet::new();

        for _ in 0..500 {
            let a: f64 = rng.gen_range(0.0..1000.0);
            let b = a + rng.gen_range(0.5..80.0);
            if rng.gen_bool(0.6) {
                s.add(a, b);
            } else {
                s.delete(a, b);
            }
            assert!(s.is_consistent(), "broken after edit: {:?}", bounds(&s));
        }
    }

    #[test]
    fn test_delete_empty_or_touching_range_is_noop() {
        let mut s = set(&[(0.0, 10.0), (20.0, 30.0)]);

        assert!(!s.delete(5.0, 5.0));
        assert!(!s.delete(10.0, 20.0));
        assert!(!s.delete(-5.0, 0.0));
        assert_eq!(bounds(&s), vec![(0.0, 10.0), (20.0, 30.0)]);

        // ends exactly on a boundary
        assert!(s.delete(5.0, 10.0));
        assert!(s.delete(20.0, 25.0));
        assert_eq!(bounds(&s), vec![(0.0, 5.0), (25.0, 30.0)]);
        assert!(s.is_consistent());
    }

    #[test]
    fn test_random_edits_with_point_and_boundary_deletes() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut s = IntervalSet::new();

        for _ in 0..500 {
            let a = rng.gen_range(0..200) as f64;
            let b = a + rng.gen_range(0..20) as f64;
            match rng.gen_range(0..4) {
                0 | 1 => {
                    s.add(a, b);
                }
                2 => {
                    s.delete(a, a);
                }
                _ => {
                    // snap one end onto an existing boundary
                    let edge = s.iter().nth(rng.gen_range(0..s.len().max(1))).map(|iv| iv.finish);
                    s.delete(a, edge.unwrap_or(b));
                }
            }
            assert!(s.is_consistent(), "broken after edit: {:?}", bounds(&s));
        }
    }

    #[test]
    fn test_detect_from_load() {
        // 1 Hz load: high for t in [10, 20] and [30, 32] (too short)
        let xs: Vec<f64> = (0..60).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs
            .iter()
            .map(|&t| if (10.0..=20.0).contains(&t) || (30.0..=32.0).contains(&t) { 5.0 } else { 0.0 })
            .collect();
        let load = TimeSeries::new("ADN.ifh", ChannelKind::Load, xs, ys);

        let found = detect_from_load(&load, 4.0, None, 0.5);
        assert_eq!(bounds(&found), vec![(10.0, 20.0)]);
        assert_eq!(found.first().map(|iv| iv.peak), Some(5.0));
    }

    #[test]
    fn test_detect_from_load_requires_rotation_movement() {
        let xs: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|&t| if (5.0..=15.0).contains(&t) { 5.0 } else { 0.0 }).collect();
        let load = TimeSeries::new("ADN.ifh", ChannelKind::Load, xs.clone(), ys);

        let still = TimeSeries::new("1.prz", ChannelKind::Angle, xs.clone(), vec![1.0; 40]);
        assert!(detect_from_load(&load, 1.0, Some(&still), 0.5).is_empty());

        let moving: Vec<f64> = xs.iter().map(|t| t * 0.1).collect();
        let moving = TimeSeries::new("1.prz", ChannelKind::Angle, xs, moving);
        assert_eq!(detect_from_load(&load, 1.0, Some(&moving), 0.5).len(), 1);
    }

    #[test]
    fn test_detect_closes_trailing_run() {
        let xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|&t| if t >= 4.0 { 2.0 } else { 0.0 }).collect();
        let load = TimeSeries::new("ADN.ifh", ChannelKind::Load, xs, ys);
        assert_eq!(bounds(&detect_from_load(&load, 1.0, None, 0.0)), vec![(4.0, 9.0)]);
    }

    #[test]
    fn test_estimate_load_level() {
        // rotation rises on even seconds and falls on odd seconds
        let xs: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let rot: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
        let load: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 10.0 } else { 2.0 }).collect();

        let rotation = TimeSeries::new("1.prz", ChannelKind::Angle, xs.clone(), rot);
        let load = TimeSeries::new("ADN.ifh", ChannelKind::Load, xs, load);

        let (low, high) = estimate_load_level(&rotation, &load, 1).unwrap();
        assert_eq!(low, 2.0);
        assert_eq!(high, 10.0);
    }

    #[test]
    fn test_estimate_load_level_needs_both_directions() {
        let xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let rotation = TimeSeries::new("1.prz", ChannelKind::Angle, xs.clone(), xs.clone());
        let load = TimeSeries::new("ADN.ifh", ChannelKind::Load, xs, vec![1.0; 10]);
        assert!(estimate_load_level(&rotation, &load, 2).is_none());
    }
}
