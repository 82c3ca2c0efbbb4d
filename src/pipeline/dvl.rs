// Synthetic angle curve from two coupled rotation sensors

use std::f64::consts::PI;
use tracing::{debug, info, warn};

use crate::core::constants::{NAME_SYNTHETIC_PRZ, SYNC_GRID_STEP};
use crate::core::filters::{exp_filter, median_shrinking_mean};
use crate::core::series::{ChannelKind, TimeSeries};

/// Sensor shifts captured at one real moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DvlPoint {
    pub shift_1: f64,
    pub shift_2: f64,
    pub time: f64,
}

impl DvlPoint {
    /// Snaps `time` to the 8 ms grid.
    pub fn new(shift_1: f64, shift_2: f64, time: f64) -> Self {
        Self {
            shift_1,
            shift_2,
            time: snap_time(time),
        }
    }
}

pub fn snap_time(t: f64) -> f64 {
    (t / SYNC_GRID_STEP).round() * SYNC_GRID_STEP
}

/// Sensor file name without the `_X`/`_Z` component suffix.
pub fn sensor_base(name: &str) -> &str {
    let cut = name.len().saturating_sub(2);
    name.get(..cut).unwrap_or(name)
}

/// The X and Z components of two rotation sensors.
#[derive(Debug, Clone)]
pub struct DvlSet {
    pub x1: TimeSeries,
    pub z1: TimeSeries,
    pub x2: TimeSeries,
    pub z2: TimeSeries,
}

impl DvlSet {
    /// Groups rotation-sensor components by file; the first two distinct sensors win.
    pub fn collect<'a>(series: impl IntoIterator<Item = &'a TimeSeries>) -> Option<Self> {
        let mut sensors: Vec<(String, Option<TimeSeries>, Option<TimeSeries>)> = Vec::new();

        for s in series.into_iter().filter(|s| s.kind().is_dvl()) {
            let base = sensor_base(s.name());
            let slot = match sensors.iter().position(|(b, _, _)| b == base) {
                Some(i) => i,
                None if sensors.len() < 2 => {
                    sensors.push((base.to_string(), None, None));
                    sensors.len() - 1
                }
                None => continue,
            };

            let entry = &mut sensors[slot];
            match s.kind() {
                ChannelKind::DvlX => entry.1 = Some(s.clone()),
                _ => entry.2 = Some(s.clone()),
            }
        }

        let mut it = sensors.into_iter();
        let (_, x1, z1) = it.next()?;
        let (_, x2, z2) = it.next()?;
        Some(Self {
            x1: x1?,
            z1: z1?,
            x2: x2?,
            z2: z2?,
        })
    }

    fn first_mut(&mut self) -> [&mut TimeSeries; 2] {
        [&mut self.x1, &mut self.z1]
    }

    fn second_mut(&mut self) -> [&mut TimeSeries; 2] {
        [&mut self.x2, &mut self.z2]
    }

    fn all_mut(&mut self) -> [&mut TimeSeries; 4] {
        [&mut self.x1, &mut self.z1, &mut self.x2, &mut self.z2]
    }
}

fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Brings both sensors onto a common clock. Returns the two stretch factors.
pub fn time_correction(set: &mut DvlSet, p1: DvlPoint, p2: DvlPoint) -> Option<(f64, f64)> {
    for s in set.all_mut() {
        let undo = -s.shift_amount();
        s.shift(undo);
    }

    let (a1, a2) = (p1.time - p1.shift_1, p2.time - p2.shift_1);
    let (b1, b2) = (p1.time - p1.shift_2, p2.time - p2.shift_2);
    if a2 == a1 || b2 == b1 {
        return None;
    }

    let t_cor = (a2 - a1 + b2 - b1) / 2.0;
    let k1 = t_cor / (a2 - a1);
    let k2 = t_cor / (b2 - b1);

    let half = (p1.shift_1.abs() + p1.shift_2.abs()) / 2.0;

    for s in set.first_mut() {
        s.crop(a1, a2);
        s.shift(half * sign(p1.shift_1));
        s.time_sync(k1);
        s.save_shift();
    }
    for s in set.second_mut() {
        s.crop(b1, b2);
        s.shift(half * sign(p1.shift_2));
        s.time_sync(k2);
        s.save_shift();
    }

    let (n1, n2) = (set.z1.len(), set.z2.len());
    if n1 > n2 {
        set.z1.chop(n1 - n2);
        set.x1.chop(n1 - n2);
    } else if n2 > n1 {
        set.z2.chop(n2 - n1);
        set.x2.chop(n2 - n1);
    }

    if let (Some(s1), Some(s2)) = (set.z1.start_x(), set.z2.start_x()) {
        let delta = s2 - s1;
        if delta != 0.0 {
            set.z1.shift(delta);
            set.x1.shift(delta);
        }
    }

    info!("rotation sensors corrected: k1 = {:.10}, k2 = {:.10}", k1, k2);
    Some((k1, k2))
}

/// `atan2(x, z)` per sample, unwrapped and based on the minimum.
///
/// Sample 0 is not rebased; on the first step it only follows the unwrap.
pub fn unwrap_angles(x: &[f64], z: &[f64]) -> Vec<f64> {
    let mut res: Vec<f64> = Vec::with_capacity(x.len().min(z.len()));
    let mut delta = 0.0;

    for (i, (xv, zv)) in x.iter().zip(z).enumerate() {
        res.push(xv.atan2(*zv));
        if i == 0 {
            continue;
        }

        res[i] += delta;
        let diff = res[i] - res[i - 1];

        let wrap = if diff > PI {
            -2.0 * PI
        } else if diff < -PI {
            2.0 * PI
        } else {
            0.0
        };

        if wrap != 0.0 {
            delta += wrap;
            res[i] += wrap;
            if i == 1 {
                res[0] += wrap;
            }
        }
    }

    let min = res.iter().copied().fold(f64::INFINITY, f64::min);
    for v in res.iter_mut().skip(1) {
        *v -= min;
    }
    res
}

/// Builds the synthetic angle curve `1.prz` from the sensor difference.
pub fn synthesize_prz(
    mut set: DvlSet,
    p1: DvlPoint,
    p2: DvlPoint,
    median_radius: usize,
    alpha: f64,
) -> Option<TimeSeries> {
    if p1.time == p2.time {
        warn!("rotation sensor points must differ in time");
        return None;
    }

    time_correction(&mut set, p1, p2)?;

    let n = set.x1.len();
    if n == 0 || set.x2.len() != n || set.z1.len() != n || set.z2.len() != n {
        warn!(
            "rotation sensor lengths differ: {} {} {} {}",
            set.x1.len(),
            set.z1.len(),
            set.x2.len(),
            set.z2.len()
        );
        return None;
    }

    let mut dx: Vec<f64> = set.x1.values().iter().zip(set.x2.values()).map(|(a, b)| a - b).collect();
    let mut dz: Vec<f64> = set.z1.values().iter().zip(set.z2.values()).map(|(a, b)| a - b).collect();

    dx = median_shrinking_mean(&dx, median_radius);
    exp_filter(&mut dx, alpha);
    dz = median_shrinking_mean(&dz, median_radius);
    exp_filter(&mut dz, alpha);

    let values = unwrap_angles(&dx, &dz);
    debug!("synthetic angle: {} samples", values.len());

    let (_, xs, _) = set.x1.into_parts();
    Some(TimeSeries::new(NAME_SYNTHETIC_PRZ, ChannelKind::Angle, xs, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(name: &str, kind: ChannelKind, n: usize, f: impl Fn(usize) -> f64) -> TimeSeries {
        let xs = (0..n).map(|i| i as f64 * SYNC_GRID_STEP).collect();
        let ys = (0..n).map(f).collect();
        TimeSeries::new(name, kind, xs, ys)
    }

    fn sensors(n: usize) -> DvlSet {
        DvlSet {
            x1: component("DV1.ifh_X", ChannelKind::DvlX, n, |i| (i as f64 * 0.01).sin()),
            z1: component("DV1.ifh_Z", ChannelKind::DvlZ, n, |i| (i as f64 * 0.01).cos()),
            x2: component("DV2.ifh_X", ChannelKind::DvlX, n, |_| 0.0),
            z2: component("DV2.ifh_Z", ChannelKind::DvlZ, n, |_| 0.0),
        }
    }

    #[test]
    fn test_snap_and_base() {
        assert!((snap_time(1.0037) - 1.0).abs() < 1e-12);
        assert!((snap_time(1.0041) - 1.008).abs() < 1e-12);
        assert_eq!(sensor_base("DV1.ifh_X"), "DV1.ifh");
        assert_eq!(sensor_base("X"), "");
    }

    #[test]
    fn test_collect_groups_by_file() {
        let s = sensors(10);
        let list = [s.z1.clone(), s.x2.clone(), s.x1.clone(), s.z2.clone()];
        let set = DvlSet::collect(list.iter()).unwrap();
        assert_eq!(set.x1.name(), "DV1.ifh_X");
        assert_eq!(set.z2.name(), "DV2.ifh_Z");

        assert!(DvlSet::collect(list[..3].iter()).is_none());
    }

    #[test]
    fn test_unwrap_is_pinned() {
        // angle 0.1 + 0.5 i wraps past pi several times
        let theta: Vec<f64> = (0..20).map(|i| 0.1 + 0.5 * i as f64).collect();
        let x: Vec<f64> = theta.iter().map(|t| t.sin()).collect();
        let z: Vec<f64> = theta.iter().map(|t| t.cos()).collect();

        let out = unwrap_angles(&x, &z);
        // sample 0 keeps its raw value, the rest are rebased on the minimum (0.1)
        assert!((out[0] - 0.1).abs() < 1e-9);
        for i in 1..20 {
            assert!((out[i] - 0.5 * i as f64).abs() < 1e-9, "sample {i}");
        }
    }

    #[test]
    fn test_unwrap_first_step_moves_sample_zero() {
        // a jump from just below pi to just above -pi on the first step
        let x = [(3.0f64).sin(), (-3.0f64).sin()];
        let z = [(3.0f64).cos(), (-3.0f64).cos()];
        let out = unwrap_angles(&x, &z);
        // the wrap is applied to both samples, so their gap survives
        assert!((out[0] - (3.0 + 2.0 * PI)).abs() < 1e-9);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn test_time_correction_factors() {
        let mut set = sensors(3750);
        set.z2.shift(1.5);
        let p1 = DvlPoint::new(0.0, 0.4, 10.0);
        let p2 = DvlPoint::new(0.0, 0.8, 20.0);

        let (k1, k2) = time_correction(&mut set, p1, p2).unwrap();
        assert!((k1 - 0.98).abs() < 1e-9);
        assert!((k2 - 9.8 / 9.6).abs() < 1e-9);

        assert_eq!(set.z1.len(), set.z2.len());
        assert_eq!(set.x1.len(), set.z1.len());
        let (s1, s2) = (set.z1.start_x().unwrap(), set.z2.start_x().unwrap());
        assert!((s1 - s2).abs() < 1e-9);
        assert_eq!(set.z2.shift_amount(), 0.0);
    }

    #[test]
    fn test_synthesize_prz() {
        let set = sensors(2000);
        let p1 = DvlPoint::new(0.0, 0.0, 1.0);
        let p2 = DvlPoint::new(0.0, 0.0, 12.0);

        let prz = synthesize_prz(set, p1, p2, 0, 1.0).unwrap();
        assert_eq!(prz.name(), NAME_SYNTHETIC_PRZ);
        assert_eq!(prz.kind(), ChannelKind::Angle);
        assert!(prz.len() > 1000);
        // a steadily turning sensor gives a steadily rising angle
        assert!(prz.values().windows(2).skip(1).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_synthesize_needs_distinct_points() {
        let set = sensors(100);
        let p = DvlPoint::new(0.0, 0.0, 0.4);
        assert!(synthesize_prz(set, p, p, 0, 1.0).is_none());
    }
}
