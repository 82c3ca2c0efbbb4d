// Candle, total length and leaving corrections for bit position / depth curves

use tracing::{debug, info, warn};

use crate::core::error::{DepthError, Result};
use crate::core::filters::{lower_bound, median_shrinking};
use crate::core::intervals::IntervalSet;
use crate::core::series::TimeSeries;

fn ensure_correctable(series: &TimeSeries) -> Result<()> {
    if series.kind().is_correctable() {
        Ok(())
    } else {
        Err(DepthError::Precondition(format!(
            "{} is not a bit position or depth curve",
            series.name()
        )))
    }
}

/// Rescales each interval by `measured / computed`, keeping neighbours contiguous.
///
/// Returns the coefficients actually applied (after the median filter).
pub fn candle_correction(
    series: &mut TimeSeries,
    computed: &[f64],
    measured: &[f64],
    intervals: &IntervalSet,
    window: usize,
) -> Result<Vec<f64>> {
    ensure_correctable(series)?;
    if series.is_empty() {
        return Ok(Vec::new());
    }

    let raw: Vec<f64> = measured
        .iter()
        .zip(computed)
        .map(|(m, c)| if *c != 0.0 { m / c } else { 1.0 })
        .collect();
    let coeff = median_shrinking(&raw, window);
    if coeff.is_empty() {
        return Ok(coeff);
    }

    let xs = series.timestamps();
    let ys = series.values();
    let mut out = ys.to_vec();
    let mut k = 0usize;
    let mut delta = 0.0;

    for (iv, &c) in intervals.iter().zip(&coeff) {
        if k >= xs.len() {
            break;
        }
        let ref_y = ys[k] + delta;

        while k < xs.len() && xs[k] <= iv.finish {
            out[k] = ref_y + (ys[k] + delta - ref_y) * c;
            k += 1;
        }

        if k > 0 {
            delta += (c - 1.0) * (ys[k - 1] + delta - ref_y);
        }
        debug!("candle {:.3}..{:.3}: coefficient {:.5}", iv.start, iv.finish, c);
    }

    series.set_values(out)?;
    info!("candle correction on {}: {} coefficients", series.name(), coeff.len());
    Ok(coeff)
}

/// Stretches the whole curve around its first sample so its length equals `ref_total_cm`.
///
/// Returns the coefficient, or `None` when the curve has zero length.
pub fn length_correction(series: &mut TimeSeries, ref_total_cm: f64) -> Result<Option<f64>> {
    ensure_correctable(series)?;

    let total = series.total_len() * 100.0;
    if total == 0.0 {
        warn!("length correction skipped: {} has zero length", series.name());
        return Ok(None);
    }

    let coef = ref_total_cm / total;
    let ys = series.values();
    let y0 = ys[0];
    let out: Vec<f64> = ys
        .iter()
        .enumerate()
        .map(|(i, &y)| if i == 0 { y } else { y0 + (y - y0) * coef })
        .collect();

    series.set_values(out)?;
    info!("length correction on {}: coefficient {:.5}", series.name(), coef);
    Ok(Some(coef))
}

/// Shifts the curve so the sample at `ref_time` equals `ref_depth`.
///
/// A non-positive `ref_time`, or one past the end, pins the last sample.
pub fn leaving_correction(series: &mut TimeSeries, ref_time: f64, ref_depth: f64) -> Result<Option<f64>> {
    ensure_correctable(series)?;
    if series.is_empty() {
        return Ok(None);
    }

    let xs = series.timestamps();
    let last = xs.len() - 1;
    let idx = if ref_time > 0.0 {
        lower_bound(xs, ref_time).min(last)
    } else {
        last
    };

    let delta = ref_depth - series.values()[idx];
    let out = series.values().iter().map(|y| y + delta).collect();
    series.set_values(out)?;

    info!("leaving correction on {}: delta {:.3}", series.name(), delta);
    Ok(Some(delta))
}
