use anyhow::{bail, Context};
use std::path::PathBuf;
use tracing::{debug, info, warn, Level};

mod routes;

use depthcalc::state::EventReceiver;
use depthcalc::utils::conf_helper::{bind_listener, init_settings, SETTINGS_FILE};
use depthcalc::{Controller, ControllerEvent, EventSink};

use crate::routes::AppState;

const USAGE: &str = "usage: drill_depth_calc [--verbose] [--config <file>] <run|serve> [--level <load>] <files...>";

#[derive(Debug, PartialEq)]
enum Command {
    Run,
    Serve,
}

#[derive(Debug)]
struct Args {
    command: Command,
    verbose: bool,
    config: PathBuf,
    level: Option<f64>,
    files: Vec<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut command = None;
    let mut verbose = false;
    let mut config = PathBuf::from(SETTINGS_FILE);
    let mut level = None;
    let mut files = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--verbose" | "-v" => verbose = true,
            "--config" => config = args.next().map(PathBuf::from).context("--config needs a path")?,
            "--level" => {
                let value = args.next().context("--level needs a value")?;
                level = Some(value.parse::<f64>().with_context(|| format!("bad load level {value:?}"))?);
            }
            "run" if command.is_none() => command = Some(Command::Run),
            "serve" if command.is_none() => command = Some(Command::Serve),
            other if other.starts_with("--") => bail!("unknown option {other}\n{USAGE}"),
            other => files.push(PathBuf::from(other)),
        }
    }

    let Some(command) = command else {
        bail!("{USAGE}");
    };

    Ok(Args {
        command,
        verbose,
        config,
        level,
        files,
    })
}

async fn log_events(mut rx: EventReceiver) {
    while let Some(event) = rx.recv().await {
        match event {
            ControllerEvent::ParseProgress { file, percent } => debug!("{}: {}%", file, percent),
            ControllerEvent::Diagnostic(text) => warn!("{}", text),
            ControllerEvent::ParseFailed { file, message } => warn!("{}: {}", file, message),
            ControllerEvent::CorrectionNotPerformed { channel } => {
                warn!("{}: correction was not performed", channel)
            }
            other => debug!("{:?}", other),
        }
    }
}

async fn run(controller: &mut Controller, args: &Args) -> anyhow::Result<()> {
    if let Some(report) = controller.last_sync() {
        info!("sync applied to {:?}, delta {:.3} s", report.applied, report.delta);
    }

    let level = match args.level {
        Some(level) => Some(level),
        None => match controller.estimate_load_level(0) {
            Ok((low, high)) => {
                info!("estimated load levels: {:.3} / {:.3}", low, high);
                Some((low + high) / 2.0)
            }
            Err(e) => {
                debug!("no load level: {}", e);
                None
            }
        },
    };

    if let Some(level) = level {
        match controller.detect_intervals(level) {
            Ok(count) => info!("{} movement intervals at load level {:.3}", count, level),
            Err(e) => warn!("interval detection skipped: {}", e.diagnostic()),
        }
    }

    for s in controller.series_list() {
        info!("{:>20} {:?}: {} samples{}", s.name, s.kind, s.len, if s.synced { ", synced" } else { "" });
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1))?;

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let mut settings = init_settings(&args.config)
        .with_context(|| format!("cannot load settings from {}", args.config.display()))?
        .clone();

    let listener = if args.command == Command::Serve {
        Some(bind_listener(&mut settings).await.context("bind failed")?)
    } else {
        None
    };

    let (sink, rx) = EventSink::channel();
    tokio::spawn(log_events(rx));

    let mut controller = Controller::new(settings, sink).context("cannot open snapshot directory")?;
    let handles = controller.load_files(&args.files).await?;
    info!("{} series loaded from {} files", handles.len(), args.files.len());

    match listener {
        None => run(&mut controller, &args).await,
        Some(listener) => {
            let port = controller.settings().server.port;
            info!("Server initialized on {}:{}", controller.settings().server.ip, port);

            let app = routes::router(AppState::new(controller));
            axum::serve(listener, app).await.context("server stopped")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> anyhow::Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let a = args(&["--verbose", "run", "--level", "2.5", "0001.prz", "ADN.ifh"]).unwrap();
        assert_eq!(a.command, Command::Run);
        assert!(a.verbose);
        assert_eq!(a.level, Some(2.5));
        assert_eq!(a.files.len(), 2);
        assert_eq!(a.config, PathBuf::from(SETTINGS_FILE));

        let a = args(&["serve", "--config", "x.json"]).unwrap();
        assert_eq!(a.command, Command::Serve);
        assert_eq!(a.config, PathBuf::from("x.json"));
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(args(&["0001.prz"]).is_err());
        assert!(args(&["run", "--level"]).is_err());
        assert!(args(&["run", "--bogus"]).is_err());
    }
}
