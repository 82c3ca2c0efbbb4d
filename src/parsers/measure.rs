// Measured candle lengths (cm), one per line

use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::core::error::{DepthError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasureList {
    pub lengths: Vec<f64>,
    pub total: f64,
}

impl MeasureList {
    pub fn from_lengths(lengths: Vec<f64>) -> Self {
        let total = lengths.iter().sum();
        Self { lengths, total }
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }
}

/// Only files whose name contains `DSV` (any case) are measure lists.
pub fn is_measure_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_uppercase().contains("DSV"))
        .unwrap_or(false)
}

pub fn read_measure(path: &Path) -> Result<MeasureList> {
    if !is_measure_file(path) {
        return Err(DepthError::UnrecognizedFile(path.display().to_string()));
    }

    let text = fs::read_to_string(path)?;
    let mut lengths = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.replace(',', ".").parse::<f64>() {
            Ok(v) => lengths.push(v),
            Err(_) => debug!("{}: line {} skipped", path.display(), i + 1),
        }
    }

    let list = MeasureList::from_lengths(lengths);
    info!("measure list: {} candles, total {:.1} cm", list.len(), list.total);
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_measure_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("well_dsv.txt");
        fs::write(&path, "1200\n\n  950.5 \nn/a\n1100,5\n").unwrap();

        let list = read_measure(&path).unwrap();
        assert_eq!(list.lengths, vec![1200.0, 950.5, 1100.5]);
        assert_eq!(list.total, 3251.0);
    }

    #[test]
    fn test_read_measure_requires_dsv_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lengths.txt");
        fs::write(&path, "1200\n").unwrap();
        assert!(matches!(read_measure(&path), Err(DepthError::UnrecognizedFile(_))));
    }
}
