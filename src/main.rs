//! gaze-cursor command-line front end
//!
//! Camera capture and landmark detection run elsewhere; this binary works on
//! recorded landmark streams (JSON lines) and stored calibrations.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncBufReadExt;

use gaze_cursor_lib::calibration::{define_grid, CalibrationStore};
use gaze_cursor_lib::capture::source::read_frames;
use gaze_cursor_lib::capture::JsonLinesSource;
use gaze_cursor_lib::commands::ControlCommand;
use gaze_cursor_lib::tracker::{spawn, FrameReport, RecordingActuator, TrackingLoop, TrackingMode};
use gaze_cursor_lib::{init_tracing, GazeConfig, ScreenGeometry};

/// Command-line arguments for gaze-cursor
#[derive(Parser, Debug)]
#[command(name = "gaze-cursor")]
#[command(version, about = "Gaze-driven cursor control", long_about = None)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "gaze_cursor_lib=debug" (RUST_LOG wins)
    #[arg(long)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print calibration targets as JSON
    Grid {
        /// Grid size (9 or 21)
        #[arg(long, default_value_t = 9)]
        points: usize,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
    /// Refit a stored calibration dataset
    Fit {
        /// calibration_dataset.json to refit
        #[arg(long)]
        dataset: PathBuf,
        /// Save the refitted dataset and model into this directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Drive the tracking loop over recorded landmark frames
    Replay {
        /// Landmark frames, one JSON object per line
        #[arg(long)]
        frames: PathBuf,
        /// Run an N-point calibration over the leading frames first
        #[arg(long)]
        calibrate: Option<usize>,
        /// Calibration directory (defaults to storage.calibration_dir)
        #[arg(long)]
        calibration_dir: Option<PathBuf>,
        /// Write per-frame reports here instead of stdout
        #[arg(long)]
        report: Option<PathBuf>,
        /// Write the cursor moves and clicks as JSON
        #[arg(long)]
        actions: Option<PathBuf>,
        /// Use the concurrent runtime and read control keys from stdin
        ///
        /// A pending stdin read cannot be cancelled, so exit may wait for
        /// one more line on an interactive terminal.
        #[arg(long)]
        live: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => GazeConfig::load(path)?,
        None => GazeConfig::default(),
    };
    init_tracing(args.log.as_deref().unwrap_or(&config.logging.filter));
    tracing::debug!("Config: {:?}", config);

    match args.command {
        Command::Grid {
            points,
            width,
            height,
        } => {
            let screen = ScreenGeometry::new(
                width.unwrap_or(config.screen.width),
                height.unwrap_or(config.screen.height),
            );
            let targets = define_grid(points, screen)?;
            println!("{}", serde_json::to_string_pretty(&targets)?);
        }
        Command::Fit { dataset, out } => fit(&config, &dataset, out.as_deref())?,
        Command::Replay {
            frames,
            calibrate,
            calibration_dir,
            report,
            actions,
            live,
        } => {
            let store = CalibrationStore::new(
                calibration_dir.unwrap_or_else(|| config.storage.calibration_dir.clone()),
            );
            let actuator = RecordingActuator::new();
            let mut tracker =
                TrackingLoop::new(config.clone(), Box::new(actuator.clone())).with_store(store);
            match calibrate {
                Some(points) => {
                    tracker.begin_recalibration(points)?;
                }
                None => {
                    if !tracker.load_calibration() {
                        tracing::warn!("Running uncalibrated; only features will be reported");
                    }
                }
            }

            let out = open_output(report.as_deref())?;
            let tracker = if live {
                replay_live(tracker, &frames, out).await?
            } else {
                replay(tracker, &frames, out).await?
            };

            if tracker.mode() == TrackingMode::Calibrating {
                tracing::warn!("Frames ran out before calibration finished");
            }
            tracing::info!("Replay stats: {}", serde_json::to_string(tracker.stats())?);
            if let Some(path) = actions {
                actuator
                    .write_json(&path)
                    .with_context(|| format!("Failed to write actions to {}", path.display()))?;
            }
        }
    }

    Ok(())
}

fn fit(config: &GazeConfig, path: &Path, out: Option<&Path>) -> Result<()> {
    let mut dataset = CalibrationStore::load_dataset(path)
        .with_context(|| format!("Failed to load dataset {}", path.display()))?;
    let (regressor, report) = dataset.fit(&config.calibration)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(dir) = out {
        dataset.training_error = Some(report);
        CalibrationStore::new(dir).save(&dataset, &regressor)?;
    }
    Ok(())
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(path) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout()),
    })
}

fn write_report(out: &mut dyn Write, report: &FrameReport) -> Result<()> {
    serde_json::to_writer(&mut *out, report)?;
    writeln!(out)?;
    Ok(())
}

/// Process every recorded frame in order
async fn replay(
    mut tracker: TrackingLoop,
    frames: &Path,
    mut out: Box<dyn Write + Send>,
) -> Result<TrackingLoop> {
    let frames = read_frames(frames)
        .await
        .with_context(|| format!("Failed to read frames from {}", frames.display()))?;
    if frames.is_empty() {
        bail!("No landmark frames to replay");
    }
    tracing::info!("Replaying {} frames", frames.len());

    for frame in &frames {
        let report = tracker.process_frame(frame);
        write_report(out.as_mut(), &report)?;
    }
    out.flush()?;
    Ok(tracker)
}

/// Run the frames through the concurrent runtime with keyboard control
async fn replay_live(
    tracker: TrackingLoop,
    frames: &Path,
    mut out: Box<dyn Write + Send>,
) -> Result<TrackingLoop> {
    let source = JsonLinesSource::open(frames)
        .await
        .with_context(|| format!("Failed to open {}", frames.display()))?;
    let handle = spawn(tracker, source);

    let mut reports = handle.subscribe();
    let writer = tokio::spawn(async move {
        loop {
            match reports.recv().await {
                Ok(report) => write_report(out.as_mut(), &report)?,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Report writer fell behind; {} reports skipped", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        out.flush()?;
        anyhow::Ok(())
    });

    let mut keys = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    'input: loop {
        tokio::select! {
            line = keys.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    // No more keys; let the stream run out on its own.
                    tracing::debug!("stdin closed, waiting for the landmark stream to end");
                    stdin_open = false;
                    continue 'input;
                };
                for key in line.chars() {
                    let cursor = handle.snapshot().position;
                    if let Some(command) = ControlCommand::from_key(key, cursor) {
                        let quit = command == ControlCommand::Quit;
                        handle.send(command)?;
                        if quit {
                            break 'input;
                        }
                    }
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {
                if handle.is_finished() {
                    break 'input;
                }
            }
        }
    }

    let tracker = handle.shutdown().await?;
    writer.await??;
    Ok(tracker)
}
