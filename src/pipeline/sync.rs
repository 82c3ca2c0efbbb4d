// Clock synchronization of freshly loaded series

use tracing::{info, warn};

use crate::core::constants::{SYNC_FACTOR_MAX, SYNC_FACTOR_MIN};
use crate::core::series::{ChannelKind, TimeSeries};

/// A loaded series with the clock data of the file it came from.
#[derive(Debug, Clone)]
pub struct SyncCandidate {
    pub series: TimeSeries,
    pub factor: f64,
    pub delta: f64,
}

impl SyncCandidate {
    pub fn new(series: TimeSeries, factor: f64, delta: f64) -> Self {
        Self { series, factor, delta }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub enabled: bool,
    /// Flat offset applied to every series.
    pub delta: f64,
    pub factors: Vec<(String, f64)>,
    pub applied: Vec<String>,
    /// Sensor channels left unsynchronized.
    pub not_performed: Vec<String>,
    pub wheel_factor: f64,
    pub load_factor: f64,
}

pub fn sync_factor_is_ok(factor: f64) -> bool {
    (SYNC_FACTOR_MIN..=SYNC_FACTOR_MAX).contains(&factor)
}

fn is_clocked(kind: ChannelKind) -> bool {
    matches!(kind, ChannelKind::Load | ChannelKind::Wheel) || kind.is_dvl()
}

/// Offset of the first clocked channel that has one.
fn reference_delta(items: &[SyncCandidate]) -> f64 {
    items
        .iter()
        .filter(|c| is_clocked(c.series.kind()))
        .map(|c| c.delta)
        .find(|d| *d != 0.0)
        .unwrap_or(0.0)
}

/// Applies the real-time offset and the per-channel stretch factors.
///
/// Rotation sensors sync everything when every factor is plausible. Otherwise a
/// load + wheel pair syncs only together, and a lone load or wheel syncs alone.
pub fn synchronize(items: &mut [SyncCandidate], enabled: bool) -> SyncReport {
    let mut report = SyncReport {
        enabled,
        factors: items
            .iter()
            .map(|c| (c.series.name().to_string(), c.factor))
            .collect(),
        ..SyncReport::default()
    };

    if !enabled {
        info!("time sync disabled");
        return report;
    }

    report.delta = reference_delta(items);
    for c in items.iter_mut() {
        c.series.add_delta_time(report.delta);
    }

    let load = items.iter().rposition(|c| c.series.kind() == ChannelKind::Load);
    let wheel = items.iter().rposition(|c| c.series.kind() == ChannelKind::Wheel);
    let dvl = items.iter().any(|c| c.series.kind().is_dvl());
    let all_ok = items.iter().all(|c| sync_factor_is_ok(c.factor));

    let mut targets: Vec<usize> = Vec::new();

    if dvl && all_ok {
        targets.extend(0..items.len());
    } else {
        match (load, wheel) {
            (Some(l), Some(w)) => {
                if sync_factor_is_ok(items[l].factor) && sync_factor_is_ok(items[w].factor) {
                    targets.extend([w, l]);
                    report.wheel_factor = items[w].factor;
                    report.load_factor = items[l].factor;
                }
            }
            (Some(l), None) if sync_factor_is_ok(items[l].factor) => {
                targets.push(l);
                report.load_factor = items[l].factor;
            }
            (None, Some(w)) if sync_factor_is_ok(items[w].factor) => {
                targets.push(w);
                report.wheel_factor = items[w].factor;
            }
            _ => {}
        }
    }

    for &i in &targets {
        let c = &mut items[i];
        c.series.time_sync(c.factor);
        info!("sync factor {}: {:.5}", c.series.name(), c.factor);
        report.applied.push(c.series.name().to_string());
    }

    for c in items.iter() {
        let name = c.series.name();
        if is_clocked(c.series.kind()) && !report.applied.iter().any(|a| a == name) {
            warn!("{}: correction was not performed (factor {:.5})", name, c.factor);
            report.not_performed.push(name.to_string());
        }
    }

    report
}
