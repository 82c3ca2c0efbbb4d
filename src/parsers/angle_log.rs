// Angle encoder text log (.prz)

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

use crate::core::constants::{ANGLE_LOG_LINE_BYTES, ANGLE_LOG_PROGRESS_EVERY};
use crate::core::error::{DepthError, Result};
use crate::parsers::{ParseContext, SyncStamps};

#[derive(Debug, Clone)]
pub struct AngleLog {
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
    pub stamps: SyncStamps,
}

fn field<'a>(fields: &[&'a str], idx: usize, line_no: usize) -> Result<&'a str> {
    fields.get(idx).copied().ok_or_else(|| {
        DepthError::Format(format!("line {line_no}: expected at least {} fields", idx + 1))
    })
}

fn number(text: &str, line_no: usize) -> Result<f64> {
    text.trim()
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|e| DepthError::Format(format!("line {line_no}: bad number {text:?}: {e}")))
}

/// Reads the header `start _ finish` and then `radians _ relative_ms` lines.
///
/// Sample time is `trunc(start / 1000) + relative_ms / 1000`. The log carries no
/// reference counters, so its sync factor is always zero.
pub fn read_angle_log(path: &Path, ctx: &mut ParseContext<'_>) -> Result<AngleLog> {
    ctx.check_cancel("Parsing")?;

    let file = File::open(path).map_err(|e| {
        warn!("Failed to open file {}: {}", path.display(), e);
        e
    })?;
    let approx_points = (file.metadata()?.len() / ANGLE_LOG_LINE_BYTES) as usize;
    let mut lines = BufReader::new(file).lines();

    let header = lines
        .next()
        .transpose()?
        .ok_or_else(|| DepthError::Format("empty angle log".to_string()))?;
    let head: Vec<&str> = header.split(' ').collect();
    let start = number(field(&head, 0, 1)?, 1)?;
    let finish = number(field(&head, 2, 1)?, 1)?;
    let base = (start / 1000.0).trunc();

    let mut timestamps = Vec::with_capacity(approx_points);
    let mut values = Vec::with_capacity(approx_points);

    for (i, line) in lines.enumerate() {
        let line = line?;
        let line_no = i + 2;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        let radians = number(field(&parts, 0, line_no)?, line_no)?;
        let rel_ms = field(&parts, 2, line_no)?
            .parse::<i64>()
            .map_err(|e| DepthError::Format(format!("line {line_no}: bad time: {e}")))?;

        timestamps.push(rel_ms as f64 / 1000.0 + base);
        values.push(radians);

        if values.len() % ANGLE_LOG_PROGRESS_EVERY == 0 {
            ctx.check_cancel("Parsing")?;
            ctx.report(values.len(), approx_points);
        }
    }

    debug!("angle log {}: {} samples", path.display(), values.len());

    Ok(AngleLog {
        timestamps,
        values,
        stamps: SyncStamps {
            start,
            finish,
            ref_start: 0.0,
            ref_finish: 0.0,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;
    use std::fs;

    fn write_log(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_read_angle_log() {
        let dir = tempfile::tempdir().unwrap();
        // epoch given in milliseconds
        let mut body = String::from("1000000000 - 1000240000\n");
        for i in 0..240 {
            let rad = format!("{:.1}", i as f64 * 0.1).replace('.', ",");
            writeln!(body, "{rad}  x  {}", i * 1000).unwrap();
        }
        let path = write_log(&dir, "0001.prz", &body);

        let mut sink = |_p: u8| {};
        let mut ctx = ParseContext::new(&mut sink);
        let log = read_angle_log(&path, &mut ctx).unwrap();

        assert_eq!(log.timestamps.len(), 240);
        assert_eq!(log.timestamps[0], 1_000_000.0);
        assert_eq!(log.timestamps[239], 1_000_239.0);
        assert!((log.values[239] - 23.9).abs() < 1e-9);
        assert_eq!(log.stamps.start, 1_000_000_000.0);
        assert_eq!(log.stamps.finish, 1_000_240_000.0);
        assert_eq!(log.stamps.sync_factor(), 0.0);
    }

    #[test]
    fn test_short_line_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, "bad.prz", "0 - 1000\n0,5 x 0\n0,6\n");

        let mut sink = |_p: u8| {};
        let mut ctx = ParseContext::new(&mut sink);
        assert!(matches!(read_angle_log(&path, &mut ctx), Err(DepthError::Format(_))));
    }

    #[test]
    fn test_non_numeric_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, "bad.prz", "0 - 1000\nabc x 0\n");

        let mut sink = |_p: u8| {};
        let mut ctx = ParseContext::new(&mut sink);
        assert!(read_angle_log(&path, &mut ctx).is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = |_p: u8| {};
        let mut ctx = ParseContext::new(&mut sink);
        let err = read_angle_log(&dir.path().join("absent.prz"), &mut ctx).unwrap_err();
        assert!(matches!(err, DepthError::Io(_)));
    }
}
