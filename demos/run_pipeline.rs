// Example run of the depth pipeline on synthetic sensor files

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::{info, Level};

use depthcalc::export::{write_stage, PdFormat};
use depthcalc::pipeline::{Direction, Edge};
use depthcalc::state::{CorrectionRequest, LeavingPoint};
use depthcalc::{ChannelKind, Controller, EventSink, Result, Settings, TimeSeries};

const START_MS: u64 = 1_700_000_000_000;
const SAMPLES: usize = 6000;

/// Moving for 30 s out of every 60 s.
fn moving(t: f64) -> bool {
    t % 60.0 >= 20.0 && t % 60.0 < 50.0
}

fn write_inputs(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let base = (START_MS / 1000) as f64;
    let mut xs = Vec::with_capacity(SAMPLES);
    let mut angle = Vec::with_capacity(SAMPLES);
    let mut wheel = Vec::with_capacity(SAMPLES);
    let mut load = Vec::with_capacity(SAMPLES);

    let mut a = 0.0;
    for i in 0..SAMPLES {
        let t = (i * 100) as f64 / 1000.0;
        if moving(t) {
            a += 0.05;
        }
        xs.push(base + t);
        angle.push(a);
        wheel.push(a * 2500.0);
        load.push(if moving(t) { 10.0 } else { 1.0 });
    }

    let mut body = format!("{} - {}\n", START_MS, START_MS + (SAMPLES as u64) * 100);
    for (i, v) in angle.iter().enumerate() {
        let rad = format!("{v:.4}").replace('.', ",");
        let _ = writeln!(body, "{rad} 0 {}", i * 100);
    }
    let prz = dir.join("0001.prz");
    fs::write(&prz, body)?;

    let wheel_path = dir.join("KM_wheel.mfs");
    write_stage(&TimeSeries::new("KM", ChannelKind::Wheel, xs.clone(), wheel), &wheel_path)?;
    let load_path = dir.join("ADN_load.dfs");
    write_stage(&TimeSeries::new("ADN", ChannelKind::Load, xs, load), &load_path)?;

    let measure = dir.join("DSV_candles.txt");
    fs::write(&measure, "1800\n".repeat(10))?;

    Ok(vec![prz, wheel_path, load_path, measure])
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let dir = tempfile::tempdir()?;
    let mut files = write_inputs(dir.path())?;
    let measure = files.pop().unwrap_or_default();

    let settings = Settings {
        snapshots_dir: dir.path().join("snapshots"),
        ..Settings::default()
    };
    let (sink, mut rx) = EventSink::channel();
    let mut controller = Controller::new(settings, sink)?;

    controller.load_files(&files).await?;

    // a string that only descends gives no upward estimate
    match controller.estimate_load_level(4) {
        Ok((low, high)) => info!("load levels: {:.2} / {:.2}", low, high),
        Err(e) => info!("load level not estimated: {}", e),
    }
    controller.detect_intervals(5.0)?;

    let angle = controller.find(ChannelKind::Angle);
    let (start, finish) = match angle.and_then(|h| controller.series(h)) {
        Some(s) => (s.start_x().unwrap_or(0.0), s.finish_x().unwrap_or(0.0)),
        None => (0.0, 0.0),
    };
    let appr = controller.calibrate(start, finish, false)?;
    info!("factors: A = {:.6e}, B = {:.6e}", appr.factor_a, appr.factor_b);

    controller.convert_prz().await?;
    controller.create_bit_position(start, 0.0, start, finish)?;
    let depth = controller.create_depth(Direction::Auto, Edge::FromTop).await?;

    controller.open_measure(&measure)?;
    let outcome = controller.apply_corrections(
        depth,
        &CorrectionRequest {
            candle: true,
            candle_window: 1,
            length: true,
            leaving: Some(LeavingPoint {
                time: 0.0,
                depth_cm: 20000.0,
            }),
        },
    )?;
    info!("corrections: {:?}", outcome);

    for p in controller.interval_params(ChannelKind::Depth)? {
        info!("  {:8.1} cm  depth {:8.3} m  speed {:8.1} m/h", p.length_cm, p.depth, p.speed);
    }

    let written = controller.export_pd(depth, &dir.path().join("depth.pd"), PdFormat::Date)?;
    let frames = controller.export_gl1(depth, &dir.path().join("depth.gl1"), 0)?;
    info!("exported {} PD lines and {} GL1 frames", written, frames);

    controller.undo().await?;
    info!("after undo: {:?}", controller.series_list());

    rx.close();
    let mut events = 0;
    while rx.try_recv().is_ok() {
        events += 1;
    }
    info!("{} controller events", events);
    Ok(())
}
