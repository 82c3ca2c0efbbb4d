// Staged curves: little-endian (f64, f64) pairs with no header

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};

use crate::core::constants::STAGE_RECORD_SIZE;
use crate::core::error::Result;

/// Reads pairs until end of file; a trailing partial record is ignored.
pub fn read_stage(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    let file = File::open(path).map_err(|e| {
        warn!("Failed to open file {}: {}", path.display(), e);
        e
    })?;
    let len = file.metadata()?.len() as usize;
    let count = len / STAGE_RECORD_SIZE;

    let mut reader = BufReader::new(file);
    let mut xs = Vec::with_capacity(count);
    let mut ys = Vec::with_capacity(count);
    let mut record = [0u8; STAGE_RECORD_SIZE];

    for _ in 0..count {
        reader.read_exact(&mut record)?;
        let (x, y) = record.split_at(8);
        xs.push(f64::from_le_bytes(x.try_into().unwrap_or([0; 8])));
        ys.push(f64::from_le_bytes(y.try_into().unwrap_or([0; 8])));
    }

    if len % STAGE_RECORD_SIZE != 0 {
        debug!("{}: {} trailing bytes ignored", path.display(), len % STAGE_RECORD_SIZE);
    }

    Ok((xs, ys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_read_stage_ignores_partial_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prz0001.pfs");

        let mut bytes = Vec::new();
        for (x, y) in [(1.0f64, -2.5f64), (2.0, 3.25)] {
            bytes.extend_from_slice(&x.to_le_bytes());
            bytes.extend_from_slice(&y.to_le_bytes());
        }
        bytes.extend_from_slice(&[1, 2, 3]);
        fs::write(&path, bytes).unwrap();

        let (xs, ys) = read_stage(&path).unwrap();
        assert_eq!(xs, vec![1.0, 2.0]);
        assert_eq!(ys, vec![-2.5, 3.25]);
    }

    #[test]
    fn test_read_stage_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.psc");
        fs::write(&path, []).unwrap();

        let (xs, ys) = read_stage(&path).unwrap();
        assert!(xs.is_empty() && ys.is_empty());
    }
}
