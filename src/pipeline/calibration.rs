//! Angle vs. measuring-wheel calibration.
//!
//! [`calibrate`] walks a reference interval and emits one point per 18 degrees
//! of rotation: the integrated revolution count against the wheel distance
//! covered per revolution. [`approximate`] fits a line through those points and
//! integrates it into a palette plus the two factors used by the transform.

use std::f64::consts::PI;
use tracing::{debug, info, warn};

use crate::core::constants::{CALIBRATION_ANGLE_STEP_DEG, PALETTE_ANGLE_STEP};
use crate::core::filters::median_edge_clamped;
use crate::core::series::TimeSeries;

/// Raw and filtered calibration points together with the angle range of the source curve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    /// Integrated revolutions
    pub revolutions: Vec<f64>,
    /// Wheel distance per revolution
    pub amplitude: Vec<f64>,
    /// `amplitude` after the median filter
    pub filtered: Vec<f64>,
    pub min_angle: f64,
    pub max_angle: f64,
    pub inverted: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Approximation {
    /// Slope and intercept of the fitted line
    pub a: f64,
    pub b: f64,
    /// Fitted line evaluated at each calibration point
    pub fitted: Vec<f64>,
    /// Palette: revolutions and position in meters
    pub palette_revolutions: Vec<f64>,
    pub palette_position: Vec<f64>,
    /// Factors applied directly to raw angles
    pub factor_a: f64,
    pub factor_b: f64,
}

/// Builds calibration points from `angle` and `wheel` over `[start, finish]`.
///
/// Returns `None` when either curve has no data in that range.
pub fn calibrate(
    angle: &TimeSeries,
    wheel: &TimeSeries,
    start: f64,
    finish: f64,
    mk_factor: f64,
    inverted: bool,
    median_window: usize,
) -> Option<Calibration> {
    let Some((_, prz)) = angle.data_part(start, finish) else {
        warn!("calibration failed: no angle data in [{}, {}]", start, finish);
        return None;
    };
    let Some((_, mk)) = wheel.data_part(start, finish) else {
        warn!("calibration failed: no wheel data in [{}, {}]", start, finish);
        return None;
    };

    let m = if inverted { -1.0 } else { 1.0 };
    let n = prz.len().min(mk.len());
    if n == 0 {
        return None;
    }

    let mut cal = Calibration {
        min_angle: angle.min().unwrap_or(0.0),
        max_angle: angle.max().unwrap_or(0.0),
        inverted,
        ..Calibration::default()
    };

    // descending curve is walked from the end
    let backward = m * (prz[0] - prz[prz.len() - 1]) > 0.0;
    let indices: Box<dyn Iterator<Item = usize>> = if backward {
        Box::new((1..n).rev())
    } else {
        Box::new(0..n)
    };

    let mut ref_index = if backward { n - 1 } else { 0 };
    let mut len = 0.0;

    for i in indices {
        let d_angle = prz[i] - prz[ref_index];
        if d_angle.abs().to_degrees() < CALIBRATION_ANGLE_STEP_DEG {
            continue;
        }

        len += m * d_angle / (2.0 * PI);
        let ampl = mk_factor * 2.0 * PI * (mk[i] - mk[ref_index]) / m / d_angle;

        cal.revolutions.push(len);
        cal.amplitude.push(ampl);
        ref_index = i;
    }

    let radius = median_window.max(1) / 2;
    cal.filtered = median_edge_clamped(&cal.amplitude, radius);

    info!(
        "calibration: {} points, angle range [{:.3}, {:.3}]",
        cal.revolutions.len(),
        cal.min_angle,
        cal.max_angle
    );
    Some(cal)
}

/// Least-squares line through `(xs, ys)`; `None` when the system is degenerate.
pub fn fit_line(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return None;
    }

    let nf = n as f64;
    let (mut sx, mut sy, mut sxy, mut sxx) = (0.0, 0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        sx += x;
        sy += y;
        sxy += x * y;
        sxx += x * x;
    }

    let det = nf * sxx - sx * sx;
    if det == 0.0 {
        return None;
    }

    let a = (nf * sxy - sx * sy) / det;
    let b = (sy - a * sx) / nf;
    Some((a, b))
}

/// Fits the filtered calibration points and integrates the palette.
pub fn approximate(cal: &Calibration) -> Option<Approximation> {
    approximate_points(&cal.revolutions, &cal.filtered, cal.min_angle, cal.max_angle, cal.inverted)
}

pub fn approximate_points(
    xs: &[f64],
    ys: &[f64],
    min_angle: f64,
    max_angle: f64,
    inverted: bool,
) -> Option<Approximation> {
    if xs.is_empty() || min_angle == max_angle {
        return None;
    }

    let (a, b) = fit_line(xs, ys)?;
    debug!("calibration line: A = {}, B = {}", a, b);

    let fitted = xs.iter().map(|x| a * x + b).collect();

    let mut palette_revolutions = Vec::new();
    let mut palette_position = Vec::new();
    let mut ang = min_angle;
    while ang <= max_angle {
        let rev = ang / (2.0 * PI);
        palette_revolutions.push(rev);
        palette_position.push((a * rev * rev / 2.0 + b * rev) / 100.0);
        ang += PALETTE_ANGLE_STEP;
    }

    let sign = if inverted { -1.0 } else { 1.0 };
    let factor_a = sign * a / (2.0 * PI) / (2.0 * PI);
    let factor_b = sign * b / (2.0 * PI);

    info!("calibration factors: A = {:.6e}, B = {:.6e}", factor_a, factor_b);

    Some(Approximation {
        a,
        b,
        fitted,
        palette_revolutions,
        palette_position,
        factor_a,
        factor_b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::series::ChannelKind;

    #[test]
    fn test_fit_recovers_line() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64 * 0.5).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x + 3.0).collect();

        let appr = approximate_points(&xs, &ys, 0.0, 10.0, false).unwrap();
        assert!((appr.a - 2.0).abs() < 1e-9);
        assert!((appr.b - 3.0).abs() < 1e-9);
        assert!((appr.fitted[4] - 7.0).abs() < 1e-9);

        // A and B both positive: palette grows with N
        assert_eq!(appr.palette_revolutions.len(), 11);
        assert!(appr.palette_position.windows(2).all(|w| w[1] > w[0]));

        assert!((appr.factor_a - 2.0 / (4.0 * PI * PI)).abs() < 1e-12);
        assert!((appr.factor_b - 3.0 / (2.0 * PI)).abs() < 1e-12);
    }

    #[test]
    fn test_fit_inverted_flips_factors() {
        let xs = [1.0, 2.0, 3.0];
        let ys = [5.0, 7.0, 9.0];
        let straight = approximate_points(&xs, &ys, 0.0, 1.0, false).unwrap();
        let flipped = approximate_points(&xs, &ys, 0.0, 1.0, true).unwrap();
        assert_eq!(flipped.factor_a, -straight.factor_a);
        assert_eq!(flipped.factor_b, -straight.factor_b);
    }

    #[test]
    fn test_fit_degenerate() {
        assert!(fit_line(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(approximate_points(&[], &[], 0.0, 1.0, false).is_none());
        assert!(approximate_points(&[1.0, 2.0], &[1.0, 2.0], 3.0, 3.0, false).is_none());
    }

    #[test]
    fn test_calibrate_forward() {
        // angle rises 0.1 rad per sample, wheel 1 unit per sample
        let xs: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let angle = TimeSeries::new("0001.prz", ChannelKind::Angle, xs.clone(), xs.iter().map(|i| i * 0.1).collect());
        let wheel = TimeSeries::new("MK.ifh", ChannelKind::Wheel, xs.clone(), xs.clone());

        let cal = calibrate(&angle, &wheel, 0.0, 99.0, 1.0, false, 7).unwrap();

        // 18 degrees = pi/10 ~ 0.314 rad, reached every 4th sample
        assert_eq!(cal.revolutions.len(), 24);
        assert!((cal.revolutions[0] - 0.4 / (2.0 * PI)).abs() < 1e-12);
        // distance per revolution: 2pi * 4 / 0.4
        let expected = 2.0 * PI * 10.0;
        assert!(cal.amplitude.iter().all(|a| (a - expected).abs() < 1e-9));
        assert_eq!(cal.filtered.len(), cal.amplitude.len());
        assert!((cal.max_angle - 9.9).abs() < 1e-12);
    }

    #[test]
    fn test_calibrate_backward_on_descending_curve() {
        let xs: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let angle = TimeSeries::new("0001.prz", ChannelKind::Angle, xs.clone(), xs.iter().map(|i| 10.0 - i * 0.1).collect());
        let wheel = TimeSeries::new("MK.ifh", ChannelKind::Wheel, xs.clone(), xs.iter().map(|i| -i).collect());

        let cal = calibrate(&angle, &wheel, 0.0, 49.0, 1.0, false, 7).unwrap();
        assert!(!cal.revolutions.is_empty());
        // walking backward the angle grows, so revolutions accumulate positively
        assert!(cal.revolutions.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_calibrate_outside_range() {
        let xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let angle = TimeSeries::new("0001.prz", ChannelKind::Angle, xs.clone(), xs.clone());
        let wheel = TimeSeries::new("MK.ifh", ChannelKind::Wheel, xs.clone(), xs.clone());
        assert!(calibrate(&angle, &wheel, -5.0, 5.0, 1.0, false, 7).is_none());
    }
}
