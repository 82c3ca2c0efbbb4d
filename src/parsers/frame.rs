// 16-byte telemetry frames (.ifh) with the trailing '#####' footer

use chrono::NaiveDateTime;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

use crate::core::constants::*;
use crate::core::error::Result;
use crate::parsers::{ParseContext, SyncStamps};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLayout {
    /// One value at offset 13
    Single,
    /// Values at offsets 13 (primary) and 7 (secondary)
    Dual,
}

#[derive(Debug, Clone, Default)]
pub struct FrameData {
    pub timestamps: Vec<f64>,
    /// Value at offset 13
    pub primary: Vec<f64>,
    /// Value at offset 7, dual layout only
    pub secondary: Option<Vec<f64>>,
    /// Millisecond counter of the first frame
    pub first_ms: u16,
    pub stamps: SyncStamps,
}

fn be_u24(b: &[u8]) -> u32 {
    (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
}

fn be_i24(b: &[u8]) -> i32 {
    let raw = be_u24(b);
    if b[0] & 0x80 != 0 {
        (raw | 0xFF00_0000) as i32
    } else {
        raw as i32
    }
}

fn is_end_marker(frame: &[u8; FRAME_SIZE]) -> bool {
    frame.iter().all(|&b| b == 0xFF)
}

/// Finds `dd.MM.yyyy HH:mm:ss` anywhere in a Latin-1 field and returns UTC epoch seconds.
fn find_date(field: &[u8]) -> Option<f64> {
    let text: String = field.iter().map(|&b| b as char).collect();
    let chars: Vec<char> = text.chars().collect();

    chars.windows(FOOTER_DATE_LEN).find_map(|w| {
        let shaped = w.iter().enumerate().all(|(i, c)| match i {
            2 | 5 => *c == '.',
            10 => *c == ' ',
            13 | 16 => *c == ':',
            _ => c.is_ascii_digit(),
        });
        if !shaped {
            return None;
        }
        let s: String = w.iter().collect();
        NaiveDateTime::parse_from_str(&s, FOOTER_DATE_FORMAT)
            .ok()
            .map(|dt| dt.and_utc().timestamp() as f64)
    })
}

fn parse_hex(field: &[u8]) -> f64 {
    let text: String = field.iter().map(|&b| b as char).collect();
    u32::from_str_radix(text.trim(), 16).map(f64::from).unwrap_or(0.0)
}

/// Decodes the 61-byte footer. `None` when the marker or either timestamp is missing.
pub fn parse_footer(footer: &[u8]) -> Option<SyncStamps> {
    if footer.len() < FOOTER_SIZE as usize || &footer[..FOOTER_MARKER.len()] != FOOTER_MARKER {
        return None;
    }

    let mut pos = FOOTER_MARKER.len();
    let mut fields = [(0.0, 0.0); 2];

    for slot in &mut fields {
        let time = find_date(&footer[pos..pos + FOOTER_DATE_FIELD])?;
        pos += FOOTER_DATE_FIELD + FOOTER_SKIP;
        let counter = parse_hex(&footer[pos..pos + FOOTER_HEX_FIELD]);
        pos += FOOTER_HEX_FIELD;
        *slot = (time, counter);
    }

    Some(SyncStamps {
        start: fields[0].0,
        finish: fields[1].0,
        ref_start: fields[0].1,
        ref_finish: fields[1].1,
    })
}

fn read_footer(file: &mut File, len: u64) -> Result<Option<SyncStamps>> {
    if len < FOOTER_SIZE {
        return Ok(None);
    }

    let mut buf = [0u8; FOOTER_SIZE as usize];
    file.seek(SeekFrom::Start(len - FOOTER_SIZE))?;
    file.read_exact(&mut buf)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(parse_footer(&buf))
}

/// Keeps each second densely sampled at `step_ms`, repeating the last value over gaps.
struct SecondFiller {
    step: u32,
    ms: u32,
    last_sec: f64,
    started: bool,
}

enum FrameAction {
    Skip,
    Emit(f64),
}

impl SecondFiller {
    fn new(step: u32) -> Self {
        Self {
            step,
            ms: MS_PER_SECOND,
            last_sec: 0.0,
            started: false,
        }
    }

    /// Advances the state for a frame stamped `sec`, calling `fill` for each padded slot.
    fn on_frame(&mut self, sec: f64, mut fill: impl FnMut(f64)) -> FrameAction {
        if !self.started || (sec > self.last_sec && self.ms == MS_PER_SECOND) {
            self.started = true;
            self.ms = 0;
            self.last_sec = sec;
        } else if sec > self.last_sec && self.ms <= MS_PER_SECOND {
            while self.ms < MS_PER_SECOND {
                fill(self.last_sec + f64::from(self.ms) / 1000.0);
                self.ms += self.step;
            }
            self.ms = 0;
            self.last_sec = sec;
        }

        if self.ms >= MS_PER_SECOND {
            return FrameAction::Skip;
        }

        let t = sec + f64::from(self.ms) / 1000.0;
        self.ms += self.step;
        FrameAction::Emit(t)
    }
}

/// Reads telemetry frames until the all-0xFF marker, the footer or end of file.
pub fn read_frames(
    path: &Path,
    step_ms: u32,
    layout: FrameLayout,
    ctx: &mut ParseContext<'_>,
) -> Result<FrameData> {
    ctx.check_cancel("Parsing")?;

    let mut file = File::open(path).map_err(|e| {
        warn!("Failed to open file {}: {}", path.display(), e);
        e
    })?;
    let len = file.metadata()?.len();

    let footer = read_footer(&mut file, len)?;
    let data_len = if footer.is_some() { len - FOOTER_SIZE } else { len };
    let frame_count = (data_len / FRAME_SIZE as u64) as usize;

    let step = step_ms.max(1);
    let mut out = FrameData {
        timestamps: Vec::with_capacity(frame_count),
        primary: Vec::with_capacity(frame_count),
        secondary: (layout == FrameLayout::Dual).then(|| Vec::with_capacity(frame_count)),
        first_ms: 0,
        stamps: footer.unwrap_or_default(),
    };

    let mut reader = BufReader::new(file);
    let mut frame = [0u8; FRAME_SIZE];
    let mut filler = SecondFiller::new(step);
    let mut emitted = 0usize;

    for idx in 0..frame_count {
        reader.read_exact(&mut frame)?;

        if is_end_marker(&frame) {
            debug!("end marker at frame {}", idx);
            break;
        }

        let sec = f64::from(be_u24(&frame[FRAME_SEC_OFFSET..]));
        if idx == 0 {
            out.first_ms = u16::from_be_bytes([frame[FRAME_MS_OFFSET], frame[FRAME_MS_OFFSET + 1]]);
            debug!("first frame: sec {} ms {}", sec, out.first_ms);
        }

        let primary = f64::from(be_i24(&frame[FRAME_VALUE_B_OFFSET..]));
        let secondary = f64::from(be_i24(&frame[FRAME_VALUE_A_OFFSET..]));

        let FrameData {
            timestamps,
            primary: prim,
            secondary: sec_vals,
            ..
        } = &mut out;

        let action = filler.on_frame(sec, |t| {
            timestamps.push(t);
            if let Some(&last) = prim.last() {
                prim.push(last);
            }
            if let Some(v) = sec_vals.as_mut() {
                if let Some(&last) = v.last() {
                    v.push(last);
                }
            }
        });

        if let FrameAction::Emit(t) = action {
            timestamps.push(t);
            prim.push(primary);
            if let Some(v) = sec_vals.as_mut() {
                v.push(secondary);
            }

            emitted += 1;
            if emitted % FRAME_PROGRESS_EVERY == 0 {
                ctx.check_cancel("Parsing")?;
                ctx.report(idx, frame_count);
            }
        }
    }

    debug!(
        "frames {}: {} samples, footer {}",
        path.display(),
        out.timestamps.len(),
        if footer.is_some() { "found" } else { "missing" }
    );

    Ok(out)
}

/// Builders for synthetic frame files used across the test suite.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    fn be_i24_bytes(v: i32) -> [u8; 3] {
        let b = v.to_be_bytes();
        [b[1], b[2], b[3]]
    }

    pub fn frame(sec: u32, ms: u16, value_a: i32, value_b: i32) -> [u8; FRAME_SIZE] {
        let mut f = [0u8; FRAME_SIZE];
        let s = sec.to_be_bytes();
        f[0..3].copy_from_slice(&s[1..4]);
        f[3..5].copy_from_slice(&ms.to_be_bytes());
        f[7..10].copy_from_slice(&be_i24_bytes(value_a));
        f[13..16].copy_from_slice(&be_i24_bytes(value_b));
        f
    }

    pub fn footer(start: &str, ref_start: u32, finish: &str, ref_finish: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(FOOTER_SIZE as usize);
        out.extend_from_slice(FOOTER_MARKER);
        for (date, counter) in [(start, ref_start), (finish, ref_finish)] {
            let mut field = date.as_bytes().to_vec();
            field.resize(FOOTER_DATE_FIELD, b' ');
            out.extend_from_slice(&field);
            out.extend_from_slice(b"  ");
            out.extend_from_slice(format!("{counter:06X}").as_bytes());
        }
        out
    }

    pub fn file(frames: &[[u8; FRAME_SIZE]], footer: Option<Vec<u8>>) -> Vec<u8> {
        let mut out: Vec<u8> = frames.iter().flatten().copied().collect();
        if let Some(f) = footer {
            out.extend_from_slice(&f);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use std::fs;

    fn read(bytes: Vec<u8>, step: u32, layout: FrameLayout) -> FrameData {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MK.ifh");
        fs::write(&path, bytes).unwrap();
        let mut sink = |_p: u8| {};
        let mut ctx = ParseContext::new(&mut sink);
        read_frames(&path, step, layout, &mut ctx).unwrap()
    }

    #[test]
    fn test_sign_extension() {
        assert_eq!(be_i24(&[0xFF, 0xFF, 0xFE]), -2);
        assert_eq!(be_i24(&[0x7F, 0xFF, 0xFF]), 8_388_607);
        assert_eq!(be_u24(&[0x01, 0x00, 0x00]), 65_536);
    }

    #[test]
    fn test_gap_is_filled_with_last_value() {
        // five frames in second 10, then second 11 starts
        let mut frames: Vec<_> = (0..5).map(|i| frame(10, 0, 0, i)).collect();
        frames.push(frame(11, 0, 0, 99));
        let data = read(file(&frames, None), 100, FrameLayout::Single);

        // 5 real + 5 padded + 1
        assert_eq!(data.timestamps.len(), 11);
        assert_eq!(data.timestamps[0], 10.0);
        assert!((data.timestamps[5] - 10.5).abs() < 1e-12);
        assert_eq!(data.primary[5], 4.0);
        assert_eq!(data.primary[9], 4.0);
        assert_eq!(data.timestamps[10], 11.0);
        assert_eq!(data.primary[10], 99.0);
    }

    #[test]
    fn test_overfull_second_is_truncated() {
        let frames: Vec<_> = (0..15).map(|i| frame(3, 0, 0, i)).collect();
        let data = read(file(&frames, None), 100, FrameLayout::Single);
        assert_eq!(data.timestamps.len(), 10);
        assert_eq!(data.primary.last().copied(), Some(9.0));
    }

    #[test]
    fn test_first_frame_ms_is_decoded() {
        let frames = vec![frame(3, 420, 0, 1), frame(3, 0, 0, 2)];
        let data = read(file(&frames, None), 8, FrameLayout::Single);
        assert_eq!(data.first_ms, 420);
        assert_eq!(data.timestamps[0], 3.0);
    }

    #[test]
    fn test_end_marker_stops_parsing() {
        let mut frames: Vec<_> = (0..3).map(|i| frame(1, 0, 0, i)).collect();
        frames.push([0xFF; FRAME_SIZE]);
        frames.push(frame(1, 0, 0, 77));
        let data = read(file(&frames, None), 8, FrameLayout::Single);
        assert_eq!(data.primary, vec![0.0, 1.0, 2.0]);
        assert_eq!(data.stamps, SyncStamps::default());
    }

    #[test]
    fn test_footer_is_decoded_and_not_parsed_as_frames() {
        let frames: Vec<_> = (0..4).map(|i| frame(1, 0, 0, i)).collect();
        let foot = footer("01.01.2024 00:00:00", 0x10, "01.01.2024 01:00:00", 0xE20);
        let data = read(file(&frames, Some(foot)), 8, FrameLayout::Single);

        assert_eq!(data.primary.len(), 4);
        assert_eq!(data.stamps.start, 1_704_067_200.0);
        assert_eq!(data.stamps.finish, 1_704_070_800.0);
        assert_eq!(data.stamps.ref_start, 16.0);
        assert_eq!(data.stamps.ref_finish, 3616.0);
        assert_eq!(data.stamps.sync_factor(), 1.0);
    }

    #[test]
    fn test_bad_footer_leaves_stamps_zero() {
        let mut foot = footer("01.01.2024 00:00:00", 1, "01.01.2024 01:00:00", 2);
        foot[0] = b'!';
        assert!(parse_footer(&foot).is_none());

        let foot = footer("1.1.2024 00:00", 1, "01.01.2024 01:00:00", 2);
        assert!(parse_footer(&foot).is_none());
    }

    #[test]
    fn test_dual_layout() {
        let frames = vec![frame(1, 0, -5, 7), frame(1, 0, -6, 8)];
        let data = read(file(&frames, None), 8, FrameLayout::Dual);
        assert_eq!(data.primary, vec![7.0, 8.0]);
        assert_eq!(data.secondary, Some(vec![-5.0, -6.0]));
    }
}
