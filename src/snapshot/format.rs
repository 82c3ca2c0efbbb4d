// Snapshot container codec (.dcsnap)
//
// i32 version | string description | i32 count | count x (string name | i32 n | n x f64 X | n x f64 Y)
// string = u32 byte length + UTF-8, everything little-endian

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::core::constants::{SNAPSHOT_BLOCK, SNAPSHOT_VERSION};
use crate::core::error::{DepthError, Result};
use crate::core::series::{ChannelKind, TimeSeries};

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub name: String,
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
}

impl SnapshotEntry {
    pub fn from_series(series: &TimeSeries) -> Self {
        Self {
            name: series.name().to_string(),
            timestamps: series.timestamps().to_vec(),
            values: series.values().to_vec(),
        }
    }

    /// Restored series are re-tagged from their names.
    pub fn into_series(self) -> TimeSeries {
        let kind = ChannelKind::from_name(&self.name);
        TimeSeries::new(self.name, kind, self.timestamps, self.values)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotData {
    pub description: String,
    pub entries: Vec<SnapshotEntry>,
}

fn cancelled(cancel: &AtomicBool) -> bool {
    cancel.load(Ordering::Relaxed)
}

fn write_i32<W: Write>(out: &mut W, v: i32) -> Result<()> {
    out.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_string<W: Write>(out: &mut W, s: &str) -> Result<()> {
    out.write_all(&(s.len() as u32).to_le_bytes())?;
    out.write_all(s.as_bytes())?;
    Ok(())
}

fn write_block<W: Write>(out: &mut W, block: &[f64]) -> Result<()> {
    let mut buf = Vec::with_capacity(block.len() * 8);
    for v in block {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    out.write_all(&buf)?;
    Ok(())
}

fn read_i32<R: Read>(input: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_string<R: Read>(input: &mut R, limit: u64) -> Result<String> {
    let mut len_buf = [0u8; 4];
    input.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf);
    if u64::from(len) > limit {
        return Err(DepthError::Format(format!("string length {len} exceeds file size")));
    }
    let len = len as usize;

    let mut str_buf = vec![0u8; len];
    input.read_exact(&mut str_buf)?;

    String::from_utf8(str_buf).map_err(|e| e.into())
}

fn read_doubles<R: Read>(input: &mut R, n: usize) -> Result<Vec<f64>> {
    let mut raw = vec![0u8; n * 8];
    input.read_exact(&mut raw)?;
    Ok(raw
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}

/// Bytes left between the read position and the end of the file.
fn remaining(input: &mut BufReader<File>, file_len: u64) -> Result<u64> {
    Ok(file_len.saturating_sub(input.stream_position()?))
}

fn write_body(
    path: &Path,
    data: &SnapshotData,
    progress: &mut dyn FnMut(u8),
    cancel: &AtomicBool,
) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    let count = data.entries.len().max(1);

    write_i32(&mut out, SNAPSHOT_VERSION)?;
    write_string(&mut out, &data.description)?;
    write_i32(&mut out, data.entries.len() as i32)?;

    for (i, entry) in data.entries.iter().enumerate() {
        if cancelled(cancel) {
            return Err(DepthError::Cancelled("Snapshot saving".to_string()));
        }

        let n = entry.timestamps.len().min(entry.values.len());
        write_string(&mut out, &entry.name)?;
        write_i32(&mut out, n as i32)?;

        // X fills the first half of this entry's progress, Y the second
        for (half, column) in [&entry.timestamps[..n], &entry.values[..n]].into_iter().enumerate() {
            for (b, block) in column.chunks(SNAPSHOT_BLOCK).enumerate() {
                if cancelled(cancel) {
                    return Err(DepthError::Cancelled("Snapshot saving".to_string()));
                }
                write_block(&mut out, block)?;

                let done = half * 50 + (b * SNAPSHOT_BLOCK * 50) / n.max(1);
                progress(((i * 100 + done) / count) as u8);
            }
        }
    }

    out.flush()?;
    Ok(())
}

/// Writes the container; on any failure or cancellation the partial file is removed.
pub fn write_snapshot(
    path: &Path,
    data: &SnapshotData,
    progress: &mut dyn FnMut(u8),
    cancel: &AtomicBool,
) -> Result<()> {
    progress(0);

    match write_body(path, data, progress, cancel) {
        Ok(()) => {
            progress(100);
            debug!("snapshot written: {} ({} series)", path.display(), data.entries.len());
            Ok(())
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(path) {
                warn!("failed to remove partial snapshot {}: {}", path.display(), rm);
            }
            Err(e)
        }
    }
}

pub fn read_snapshot(path: &Path, progress: &mut dyn FnMut(u8), cancel: &AtomicBool) -> Result<SnapshotData> {
    progress(0);
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut input = BufReader::new(file);

    if cancelled(cancel) {
        return Err(DepthError::Cancelled("Snapshot loading".to_string()));
    }

    let version = read_i32(&mut input)?;
    if version != SNAPSHOT_VERSION {
        return Err(DepthError::UnsupportedVersion(version));
    }

    let left = remaining(&mut input, file_len)?;
    let description = read_string(&mut input, left)?;
    let count = read_i32(&mut input)?;
    if count < 0 {
        return Err(DepthError::Format(format!("negative series count {count}")));
    }
    // every series carries at least a name length and a sample count
    if count as u64 * 8 > remaining(&mut input, file_len)? {
        return Err(DepthError::Format(format!("series count {count} exceeds file size")));
    }

    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        if cancelled(cancel) {
            return Err(DepthError::Cancelled("Snapshot loading".to_string()));
        }

        let left = remaining(&mut input, file_len)?;
        let name = read_string(&mut input, left)?;
        let n = read_i32(&mut input)?;
        if n < 0 {
            return Err(DepthError::Format(format!("{name}: negative sample count {n}")));
        }
        if n as u64 * 16 > remaining(&mut input, file_len)? {
            return Err(DepthError::Format(format!("{name}: sample count {n} exceeds file size")));
        }

        let timestamps = read_doubles(&mut input, n as usize)?;
        let values = read_doubles(&mut input, n as usize)?;
        entries.push(SnapshotEntry { name, timestamps, values });

        progress((10 + (i + 1) * 80 / count as usize) as u8);
    }

    progress(100);
    Ok(SnapshotData { description, entries })
}
