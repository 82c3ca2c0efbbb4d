// Writers for bit-position, depth and staged curves

use chrono::DateTime;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::core::constants::*;
use crate::core::error::{DepthError, Result};
use crate::core::filters::{resample_frames, resample_linear};
use crate::core::series::TimeSeries;

/// Time column layout of a PD text file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdFormat {
    /// Seconds since the epoch
    #[default]
    Unix,
    /// `dd.MM.yyyy HH:mm:ss` with a header line
    Date,
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| {
        warn!("Failed to create file {}: {}", path.display(), e);
        e
    })?;
    Ok(BufWriter::new(file))
}

/// Writes the curve resampled to one second as `time<TAB>depth` lines.
pub fn write_pd(series: &TimeSeries, path: &Path, format: PdFormat) -> Result<usize> {
    let (xs, ys) = resample_linear(series.timestamps(), series.values(), PD_GRID_STEP);
    if xs.is_empty() {
        return Err(DepthError::Precondition(format!(
            "{}: not enough data for a PD file",
            series.name()
        )));
    }

    let mut out = create(path)?;

    if format == PdFormat::Date {
        writeln!(out, "{PD_DATE_HEADER}")?;
    }

    for (x, y) in xs.iter().zip(&ys) {
        match format {
            PdFormat::Unix => writeln!(out, "{x:.0}\t{y:.3}")?,
            PdFormat::Date => {
                let stamp = DateTime::from_timestamp(x.round() as i64, 0)
                    .map(|dt| dt.format(PD_DATE_FORMAT).to_string())
                    .unwrap_or_default();
                writeln!(out, "{stamp}\t{y:.3}")?;
            }
        }
    }
    out.flush()?;

    info!("PD written: {} ({} rows)", path.display(), xs.len());
    Ok(xs.len())
}

/// Writes `(frame + start_frame, round(depth_cm))` little-endian `i32` pairs on the 2.097152 s grid.
pub fn write_gl1(series: &TimeSeries, path: &Path, start_frame: i32) -> Result<usize> {
    let (frames, values) = resample_frames(series.timestamps(), series.values(), GL1_FRAME_STEP)
        .ok_or_else(|| DepthError::Precondition(format!("{}: not enough data for a GL1 file", series.name())))?;

    let mut out = create(path)?;
    for (frame, depth) in frames.iter().zip(&values) {
        out.write_all(&(frame + start_frame).to_le_bytes())?;
        out.write_all(&((depth * 100.0).round() as i32).to_le_bytes())?;
    }
    out.flush()?;

    info!("GL1 written: {} ({} frames)", path.display(), frames.len());
    Ok(frames.len())
}

/// Dumps any series as raw `(f64, f64)` pairs readable by the stage parser.
pub fn write_stage(series: &TimeSeries, path: &Path) -> Result<()> {
    let mut out = create(path)?;
    for (x, y) in series.timestamps().iter().zip(series.values()) {
        out.write_all(&x.to_le_bytes())?;
        out.write_all(&y.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::series::ChannelKind;
    use crate::parsers::stage::read_stage;
    use std::fs;

    fn depth_curve() -> TimeSeries {
        let xs: Vec<f64> = (0..=40).map(|i| 1_704_067_200.0 + i as f64 * 0.25).collect();
        let ys: Vec<f64> = (0..=40).map(|i| i as f64 * 0.1).collect();
        TimeSeries::new("gl1", ChannelKind::Depth, xs, ys)
    }

    #[test]
    fn test_pd_unix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pd");

        let rows = write_pd(&depth_curve(), &path, PdFormat::Unix).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(rows, 11);
        assert_eq!(lines[0], "1704067200\t0.000");
        assert_eq!(lines[1], "1704067201\t0.400");
        assert_eq!(lines[10], "1704067210\t4.000");
    }

    #[test]
    fn test_pd_date_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pd");

        write_pd(&depth_curve(), &path, PdFormat::Date).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();

        assert_eq!(lines.next(), Some(PD_DATE_HEADER));
        assert_eq!(lines.next(), Some("01.01.2024 00:00:00\t0.000"));
    }

    #[test]
    fn test_pd_rejects_short_series() {
        let dir = tempfile::tempdir().unwrap();
        let s = TimeSeries::new("gl1", ChannelKind::Depth, vec![1.0], vec![1.0]);
        let err = write_pd(&s, &dir.path().join("x.pd"), PdFormat::Unix).unwrap_err();
        assert!(matches!(err, DepthError::Precondition(_)));
    }

    #[test]
    fn test_gl1_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gl1");
        let s = TimeSeries::new("gl1", ChannelKind::Depth, vec![0.0, 10.0], vec![1.0, 11.0]);

        let frames = write_gl1(&s, &path, 100).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), frames * 8);

        let word = |i: usize| i32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(word(0), 100);
        assert_eq!(word(1), 100);
        assert_eq!(word(2), 101);
        // 1 + 2.097152 m at frame 1, rounded to the nearest cm
        assert_eq!(word(3), 310);
    }

    #[test]
    fn test_gl1_rounds_negative_depth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neg.gl1");
        let s = TimeSeries::new("gl1", ChannelKind::Depth, vec![0.0, 10.0], vec![-1.006, -1.006]);

        write_gl1(&s, &path, 0).unwrap();
        let bytes = fs::read(&path).unwrap();
        let word = |i: usize| i32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(word(1), -101);
    }

    #[test]
    fn test_stage_dump_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curve.dfs");
        let s = depth_curve();

        write_stage(&s, &path).unwrap();
        let (xs, ys) = read_stage(&path).unwrap();
        assert_eq!(xs, s.timestamps());
        assert_eq!(ys, s.values());
    }
}
