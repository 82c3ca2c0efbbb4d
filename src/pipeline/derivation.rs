// Bit position and depth derivation from the calibrated position curve

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::constants::{NAME_BIT_POSITION, NAME_DEPTH};
use crate::core::filters::{lower_bound, upper_bound};
use crate::core::intervals::IntervalSet;
use crate::core::series::{ChannelKind, TimeSeries};

/// Result of [`bit_position`].
#[derive(Debug, Clone)]
pub struct BitPosition {
    pub series: TimeSeries,
    /// Intervals touched by the crop bounds
    pub intervals: IntervalSet,
    /// Accumulated movement per touched interval, cm
    pub lengths: Vec<f64>,
    /// False when the anchor time fell outside the curve and no offset was applied
    pub anchored: bool,
}

/// Trims the requested right bound back to the end of the last interval it passed.
fn right_bound(intervals: &IntervalSet, finish: f64) -> f64 {
    let Some(last) = intervals.last() else {
        return finish;
    };
    if finish > last.finish {
        return last.finish;
    }

    let items = intervals.as_slice();
    for (i, iv) in items.iter().enumerate() {
        if iv.finish < finish {
            continue;
        }
        if iv.start > finish && i > 0 {
            return items[i - 1].finish - 1.0;
        }
        break;
    }
    finish
}

/// Integrates the position curve inside movement intervals only.
///
/// Outside an interval the result is held flat; inside, it accumulates the
/// negated sample-to-sample change. The result is offset so that its value at
/// `anchor_time` equals `anchor_depth_cm / 100`, then cropped to the bounds.
pub fn bit_position(
    position: &TimeSeries,
    intervals: &IntervalSet,
    anchor_time: f64,
    anchor_depth_cm: f64,
    first_point: f64,
    second_point: f64,
) -> Option<BitPosition> {
    if intervals.is_empty() || position.is_empty() {
        warn!("bit position needs a position curve and movement intervals");
        return None;
    }

    let xs = position.timestamps();
    let ys = position.values();
    let n = xs.len();
    let (x_first, x_last) = (xs[0], xs[n - 1]);

    let mut start = first_point.min(second_point);
    let mut finish = right_bound(intervals, first_point.max(second_point));

    start = start.max(x_first);
    finish = finish.min(x_last);
    if start >= finish {
        start = x_first;
        finish = x_last;
    }

    let items = intervals.as_slice();
    let mut lengths = vec![0.0; items.len()];
    let mut values = Vec::with_capacity(n);
    let mut len = 0.0;
    let mut j = 0usize;
    let mut base: Option<(usize, f64)> = None;

    for k in 0..n {
        while j < items.len() && items[j].finish < xs[k] {
            j += 1;
        }

        let inside = j < items.len() && items[j].contains(xs[k]);
        if inside {
            let entry = match base {
                Some((idx, b)) if idx == j => b,
                _ => {
                    base = Some((j, len));
                    len
                }
            };
            if k > 0 {
                len += -(ys[k] - ys[k - 1]);
            }
            lengths[j] = (len - entry).abs() * 100.0;
        }
        values.push(len);
    }

    let anchored = anchor_time >= x_first && anchor_time <= x_last;
    if anchored {
        let idx = lower_bound(xs, anchor_time).min(n - 1);
        let offset = anchor_depth_cm / 100.0 - values[idx];
        for v in &mut values {
            *v += offset;
        }
    } else {
        warn!(
            "anchor time {} is outside [{}, {}]; bit position left unanchored",
            anchor_time, x_first, x_last
        );
    }

    let lo = lower_bound(xs, start);
    let hi = upper_bound(xs, finish);

    let touched: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, iv)| iv.finish >= start && iv.start <= finish)
        .map(|(i, _)| i)
        .collect();

    let kept = IntervalSet::from_intervals(touched.iter().map(|&i| items[i]));
    let kept_lengths = touched.iter().map(|&i| lengths[i]).collect();

    debug!("bit position crop [{}, {}] -> samples {}..{}", start, finish, lo, hi);

    let series = TimeSeries::new(
        NAME_BIT_POSITION,
        ChannelKind::BitPosition,
        xs[lo..hi].to_vec(),
        values[lo..hi].to_vec(),
    );

    info!(
        "bit position: {} samples, {} intervals{}",
        series.len(),
        kept.len(),
        if anchored { "" } else { " (unanchored)" }
    );

    Some(BitPosition {
        series,
        intervals: kept,
        lengths: kept_lengths,
        anchored,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    Descent,
    Ascent,
    /// Ascent when the curve ends above where it started
    #[default]
    Auto,
}

/// Which end of the run the depth ratchet starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Edge {
    /// Output never increases along the traversal
    #[default]
    FromTop,
    /// Output never decreases along the traversal
    FromBottom,
}

fn traversal_step(direction: Direction, edge: Edge, ys: &[f64]) -> isize {
    let direction = match direction {
        Direction::Auto => match (ys.first(), ys.last()) {
            (Some(a), Some(b)) if b - a > 0.0 => Direction::Ascent,
            _ => Direction::Descent,
        },
        d => d,
    };

    match (direction, edge) {
        (Direction::Descent, Edge::FromTop) | (Direction::Ascent, Edge::FromBottom) => 1,
        _ => -1,
    }
}

/// Builds the one-way depth curve from bit position.
pub fn depth_from_bit_position(bit: &TimeSeries, direction: Direction, edge: Edge) -> Option<TimeSeries> {
    if bit.is_empty() {
        return None;
    }

    let xs = bit.timestamps();
    let ys = bit.values();
    let step = traversal_step(direction, edge, ys);

    let order: Box<dyn Iterator<Item = usize>> = if step > 0 {
        Box::new(0..ys.len())
    } else {
        Box::new((0..ys.len()).rev())
    };

    let mut out_x = Vec::with_capacity(ys.len());
    let mut out_y: Vec<f64> = Vec::with_capacity(ys.len());

    for i in order {
        let next = ys[i];
        let y = match out_y.last() {
            None => next,
            Some(&prev) => match edge {
                Edge::FromTop if prev - next < 0.0 => prev,
                Edge::FromBottom if prev - next > 0.0 => prev,
                _ => next,
            },
        };
        out_x.push(xs[i]);
        out_y.push(y);
    }

    if step < 0 {
        out_x.reverse();
        out_y.reverse();
    }

    info!("depth: {:?}/{:?}, {} samples", direction, edge, out_y.len());
    Some(TimeSeries::new(NAME_DEPTH, ChannelKind::Depth, out_x, out_y))
}

/// Per-interval summary of a bit position or depth curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalParams {
    pub length_cm: f64,
    pub depth: f64,
    /// Units per hour
    pub speed: f64,
}

pub fn interval_params(series: &TimeSeries, intervals: &IntervalSet) -> Vec<IntervalParams> {
    let xs = series.timestamps();
    let ys = series.values();
    if xs.is_empty() {
        return Vec::new();
    }

    intervals
        .iter()
        .map(|iv| {
            let lo = lower_bound(xs, iv.start);
            let hi = upper_bound(xs, iv.finish);
            if lo >= xs.len() || lo >= hi {
                return IntervalParams::default();
            }

            let d = (ys[hi - 1] - ys[lo]).abs();
            let duration = iv.duration();
            IntervalParams {
                length_cm: d * 100.0,
                depth: ys[hi - 1],
                speed: if duration > 0.0 { d / duration * 3600.0 } else { 0.0 },
            }
        })
        .collect()
}

/// `|Y[after] - Y[first]| * 100` per interval, where `after` is the first sample past its end.
pub fn interval_lengths(curve: &TimeSeries, intervals: &IntervalSet) -> Vec<f64> {
    let xs = curve.timestamps();
    let ys = curve.values();
    if xs.is_empty() {
        return vec![0.0; intervals.len()];
    }

    let last = xs.len() - 1;
    intervals
        .iter()
        .map(|iv| {
            let lo = lower_bound(xs, iv.start);
            if lo > last {
                return 0.0;
            }
            let hi = upper_bound(xs, iv.finish).min(last);
            (ys[hi] - ys[lo]).abs() * 100.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::intervals::Interval;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn curve(ys: &[f64]) -> TimeSeries {
        let xs = (0..ys.len()).map(|i| i as f64).collect();
        TimeSeries::new(NAME_BIT_POSITION, ChannelKind::BitPosition, xs, ys.to_vec())
    }

    fn falling_position(n: usize) -> TimeSeries {
        let xs = (0..n).map(|i| i as f64).collect();
        let ys = (0..n).map(|i| 100.0 - i as f64 * 0.5).collect();
        TimeSeries::new("przPT.psc", ChannelKind::Position, xs, ys)
    }

    #[test]
    fn test_bit_position_accumulates_inside_intervals_only() {
        let pos = falling_position(21);
        let ivs = IntervalSet::from_intervals([Interval::new(2.0, 5.0, 1.0), Interval::new(10.0, 12.0, 1.0)]);

        let bp = bit_position(&pos, &ivs, 0.0, 0.0, 0.0, 20.0).unwrap();
        let v = bp.series.values();

        assert!(bp.anchored);
        assert_eq!(bp.series.name(), NAME_BIT_POSITION);
        // flat before the first interval
        assert_eq!(&v[..2], &[0.0, 0.0]);
        // 4 samples inside [2, 5], 0.5 each
        assert_eq!(v[5], 2.0);
        assert_eq!(v[9], 2.0);
        assert_eq!(v[12], 3.5);
        assert_eq!(bp.lengths, vec![200.0, 150.0]);
    }

    #[test]
    fn test_bit_position_anchor_offset() {
        let pos = falling_position(21);
        let ivs = IntervalSet::from_intervals([Interval::new(0.0, 20.0, 1.0)]);

        let bp = bit_position(&pos, &ivs, 10.0, 1500.0, 0.0, 20.0).unwrap();
        let v = bp.series.values();
        assert!((v[10] - 15.0).abs() < 1e-12);
        assert!((v[0] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_bit_position_unanchored_fallback() {
        // anchor outside the curve keeps the raw accumulation and is reported
        let pos = falling_position(21);
        let ivs = IntervalSet::from_intervals([Interval::new(0.0, 20.0, 1.0)]);

        let bp = bit_position(&pos, &ivs, 500.0, 1500.0, 0.0, 20.0).unwrap();
        assert!(!bp.anchored);
        assert_eq!(bp.series.values()[0], 0.0);
        assert_eq!(bp.series.values()[20], 10.0);
    }

    #[test]
    fn test_bit_position_crop_and_interval_subset() {
        let pos = falling_position(41);
        let ivs = IntervalSet::from_intervals([
            Interval::new(2.0, 5.0, 1.0),
            Interval::new(10.0, 15.0, 1.0),
            Interval::new(25.0, 30.0, 1.0),
        ]);

        // right bound between intervals 2 and 3 is pulled back to 15 - 1
        let bp = bit_position(&pos, &ivs, 0.0, 0.0, 8.0, 20.0).unwrap();
        assert_eq!(bp.series.start_x(), Some(8.0));
        assert_eq!(bp.series.finish_x(), Some(14.0));
        assert_eq!(bp.intervals.len(), 1);
        assert_eq!(bp.intervals.first().map(|i| i.start), Some(10.0));
        assert_eq!(bp.lengths.len(), 1);
    }

    #[test]
    fn test_bit_position_needs_intervals() {
        let pos = falling_position(5);
        assert!(bit_position(&pos, &IntervalSet::new(), 0.0, 0.0, 0.0, 4.0).is_none());
    }

    #[test]
    fn test_depth_ratchet_from_top() {
        let bp = curve(&[5.0, 4.0, 4.5, 3.0, 3.5, 2.0]);
        let gl1 = depth_from_bit_position(&bp, Direction::Descent, Edge::FromTop).unwrap();
        assert_eq!(gl1.values(), &[5.0, 4.0, 4.0, 3.0, 3.0, 2.0]);
        assert_eq!(gl1.name(), NAME_DEPTH);
    }

    #[test]
    fn test_depth_ratchet_reversed_keeps_time_order() {
        let bp = curve(&[1.0, 2.0, 1.5, 3.0]);
        // descent from bottom walks backward and ratchets upward
        let gl1 = depth_from_bit_position(&bp, Direction::Descent, Edge::FromBottom).unwrap();
        assert_eq!(gl1.timestamps(), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(gl1.values(), &[3.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_depth_auto_direction() {
        assert_eq!(traversal_step(Direction::Auto, Edge::FromTop, &[0.0, 1.0]), -1);
        assert_eq!(traversal_step(Direction::Auto, Edge::FromTop, &[1.0, 0.0]), 1);
        assert_eq!(traversal_step(Direction::Ascent, Edge::FromBottom, &[]), 1);
        assert_eq!(traversal_step(Direction::Descent, Edge::FromBottom, &[]), -1);
    }

    #[test]
    fn test_depth_is_monotone_along_traversal() {
        let mut rng = StdRng::seed_from_u64(7);
        let ys: Vec<f64> = (0..500).map(|_| rng.gen_range(-10.0..10.0)).collect();
        let bp = curve(&ys);

        for direction in [Direction::Descent, Direction::Ascent, Direction::Auto] {
            for edge in [Edge::FromTop, Edge::FromBottom] {
                let gl1 = depth_from_bit_position(&bp, direction, edge).unwrap();
                let mut v = gl1.values().to_vec();
                if traversal_step(direction, edge, &ys) < 0 {
                    v.reverse();
                }
                let ok = match edge {
                    Edge::FromTop => v.windows(2).all(|w| w[1] <= w[0]),
                    Edge::FromBottom => v.windows(2).all(|w| w[1] >= w[0]),
                };
                assert!(ok, "{direction:?}/{edge:?}");
            }
        }
    }

    #[test]
    fn test_interval_params() {
        let c = curve(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let ivs = IntervalSet::from_intervals([Interval::new(1.0, 3.0, 0.0), Interval::new(100.0, 200.0, 0.0)]);
        let p = interval_params(&c, &ivs);

        assert_eq!(p.len(), 2);
        assert_eq!(p[0].length_cm, 200.0);
        assert_eq!(p[0].depth, 3.0);
        assert_eq!(p[0].speed, 3600.0);
        assert_eq!(p[1], IntervalParams::default());
    }

    #[test]
    fn test_interval_lengths_use_first_sample_after_end() {
        let c = curve(&[0.0, 1.0, 2.0, 3.0, 4.0]);
        let ivs = IntervalSet::from_intervals([Interval::new(1.0, 2.0, 0.0), Interval::new(3.5, 10.0, 0.0)]);
        assert_eq!(interval_lengths(&c, &ivs), vec![200.0, 0.0]);
    }
}
