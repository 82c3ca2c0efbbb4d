// Raw angle -> calibrated block position

use tracing::{info, warn};

use crate::core::constants::NAME_POSITION;
use crate::core::series::{ChannelKind, TimeSeries};

/// Applies `(A y^2 / 2 + B y) / 100`, anchored at the maximum angle and then zero-based.
///
/// Returns `None` for an empty curve or `A == 0` with `B == 0`.
pub fn prz_transform(angle: &TimeSeries, factor_a: f64, factor_b: f64) -> Option<TimeSeries> {
    let max = angle.max()?;

    if factor_a == 0.0 && factor_b == 0.0 {
        warn!("transform skipped: calibration factors are zero");
        return None;
    }

    let s = |y: f64| factor_a * y * y / 2.0 + factor_b * y;
    let anchor = s(max);

    let mut values: Vec<f64> = angle.values().iter().map(|&y| (s(y) - anchor) / 100.0).collect();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    for v in &mut values {
        *v -= min;
    }

    info!(
        "transform {}: A = {:.6e}, B = {:.6e}, span {:.3} m",
        angle.name(),
        factor_a,
        factor_b,
        values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    );

    let mut out = TimeSeries::new(NAME_POSITION, ChannelKind::Position, angle.timestamps().to_vec(), values);
    if let Some(p) = angle.path() {
        out = out.with_path(p);
    }
    Some(out)
}
