// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - The interactive command shell
//! - Fixed-length recordings
//! - Single snapshots
//! - Printing the effective configuration

use camera_sdk::constants::OutputResolution;
use camera_sdk::{CameraController, Config};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Time to let finished outputs reach durable storage before exiting
const MOVE_GRACE: Duration = Duration::from_secs(10);

/// One line of the interactive shell
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Record(String),
    RecordStop,
    Stream(String),
    StreamStop,
    Snapshot,
    Osd(bool),
    ZoomIn,
    ZoomOut,
    Iso(u32),
    Ev(f32),
    Position(f64, f64),
    Speed(f64),
    Help,
    Exit,
}

impl ShellCommand {
    /// Parse a shell line; `Ok(None)` for blank lines
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = words.split_first() else {
            return Ok(None);
        };

        let number = |value: Option<&&str>, what: &str| -> Result<f64, String> {
            value
                .ok_or_else(|| format!("missing {}", what))?
                .parse::<f64>()
                .map_err(|e| format!("invalid {}: {}", what, e))
        };

        let parsed = match (command, args) {
            ("record", ["stop"]) => ShellCommand::RecordStop,
            ("record", [resolution]) => ShellCommand::Record(resolution.to_string()),
            ("stream", ["stop"]) => ShellCommand::StreamStop,
            ("stream", [url]) => ShellCommand::Stream(url.to_string()),
            ("snapshot", []) => ShellCommand::Snapshot,
            ("osd", ["on"]) => ShellCommand::Osd(true),
            ("osd", ["off"]) => ShellCommand::Osd(false),
            ("+", []) => ShellCommand::ZoomIn,
            ("-", []) => ShellCommand::ZoomOut,
            ("iso", [value]) => ShellCommand::Iso(
                value
                    .parse()
                    .map_err(|e| format!("invalid ISO '{}': {}", value, e))?,
            ),
            ("ev", _) => ShellCommand::Ev(number(args.first(), "EV")? as f32),
            ("pos", _) => ShellCommand::Position(
                number(args.first(), "latitude")?,
                number(args.get(1), "longitude")?,
            ),
            ("speed", _) => ShellCommand::Speed(number(args.first(), "speed")?),
            ("help", _) => ShellCommand::Help,
            ("exit" | "quit", _) => ShellCommand::Exit,
            _ => return Err(format!("unknown command '{}' (try 'help')", line.trim())),
        };
        Ok(Some(parsed))
    }
}

fn print_help() {
    println!("Commands:");
    println!("  record <1080p|720p|360p>   start recording");
    println!("  record stop                stop recording");
    println!("  stream <url>               start streaming");
    println!("  stream stop                stop streaming");
    println!("  snapshot                   take a snapshot");
    println!("  osd on|off                 toggle the overlay");
    println!("  + / -                      zoom in / out");
    println!("  iso <100-1600>             set ISO");
    println!("  ev <-4.0-4.0>              set exposure compensation");
    println!("  pos <lat> <lon>            set position telemetry");
    println!("  speed <km/h>               set speed telemetry");
    println!("  help                       show this help");
    println!("  exit                       shut down and quit");
}

/// Ctrl+C sets the returned flag
fn install_interrupt() -> Result<Arc<AtomicBool>, Box<dyn std::error::Error>> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;
    Ok(stop_flag)
}

fn execute(camera: &CameraController, command: ShellCommand) -> Result<bool, Box<dyn std::error::Error>> {
    match command {
        ShellCommand::Record(resolution) => {
            camera.start_recording(&resolution)?;
            println!("Recording at {}", resolution);
        }
        ShellCommand::RecordStop => {
            let report = camera.stop_recording()?;
            println!(
                "Recording stopped: {} frames, {:.1}s",
                report.stats.frames_encoded,
                report.summary.duration.as_secs_f64()
            );
        }
        ShellCommand::Stream(url) => {
            camera.start_streaming(&url)?;
            println!("Streaming to {}", url);
        }
        ShellCommand::StreamStop => {
            let report = camera.stop_streaming()?;
            println!("Stream stopped after {} packets", report.summary.packets);
        }
        ShellCommand::Snapshot => {
            // Result is reported by the worker's log; the shell stays responsive
            drop(camera.take_snapshot()?);
            println!("Snapshot requested");
        }
        ShellCommand::Osd(enabled) => {
            camera.set_osd_enabled(enabled);
            println!("OSD {}", if enabled { "on" } else { "off" });
        }
        ShellCommand::ZoomIn => {
            camera.zoom_in();
            println!("Zoom {:.1}x", camera.zoom_level());
        }
        ShellCommand::ZoomOut => {
            camera.zoom_out();
            println!("Zoom {:.1}x", camera.zoom_level());
        }
        ShellCommand::Iso(iso) => camera.set_iso(iso)?,
        ShellCommand::Ev(ev) => camera.set_ev(ev)?,
        ShellCommand::Position(lat, lon) => camera.set_position(lat, lon),
        ShellCommand::Speed(kmh) => camera.set_speed(kmh),
        ShellCommand::Help => print_help(),
        ShellCommand::Exit => return Ok(false),
    }
    Ok(true)
}

/// Interactive shell until `exit`, end of input or Ctrl+C
pub fn run_shell(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let stop_flag = install_interrupt()?;
    let camera = CameraController::open(config)?;
    println!("Camera ready. Type 'help' for commands.");

    let (sender, receiver) = mpsc::channel::<String>();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines().map_while(Result::ok) {
                if sender.send(line).is_err() {
                    break;
                }
            }
        })?;

    while !stop_flag.load(Ordering::SeqCst) {
        let line = match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match ShellCommand::parse(&line) {
            Ok(Some(command)) => match execute(&camera, command) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => eprintln!("Error: {}", e),
            },
            Ok(None) => {}
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    println!("Shutting down...");
    camera.shutdown();
    Ok(())
}

/// Record for `duration` seconds, or until Ctrl+C
pub fn record(config: Config, resolution: &str, duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    let resolution: OutputResolution = resolution.parse()?;
    let stop_flag = install_interrupt()?;
    let camera = CameraController::open(config)?;

    println!("Resolution: {}", resolution);
    println!("Duration: {} seconds", duration);
    camera.start_recording(resolution.key())?;

    println!();
    println!("Recording... (press Ctrl+C to stop early)");

    let start = Instant::now();
    let target_duration = Duration::from_secs(duration);
    while start.elapsed() < target_duration && camera.is_recording() {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        // Print progress
        let elapsed = start.elapsed().as_secs();
        print!("\rRecording: {:02}:{:02}", elapsed / 60, elapsed % 60);
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    let report = camera.stop_recording()?;
    camera.file_mover().wait_idle(MOVE_GRACE);
    println!(
        "Video saved: {} ({} frames)",
        camera
            .file_mover()
            .destination()
            .join(file_name(&report.target.to_string()))
            .display(),
        report.stats.frames_encoded
    );
    camera.shutdown();
    Ok(())
}

/// Take one snapshot and wait for it to reach storage
pub fn snapshot(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let camera = CameraController::open(config)?;
    let handle = camera.take_snapshot()?;
    let result = handle
        .join()
        .map_err(|_| "snapshot thread panicked".to_string())??;
    camera.file_mover().wait_idle(MOVE_GRACE);

    let saved = result
        .path
        .file_name()
        .map(|name| camera.file_mover().destination().join(name))
        .unwrap_or(result.path);
    println!("Photo saved: {} ({}x{})", saved.display(), result.width, result.height);
    camera.shutdown();
    Ok(())
}

/// Print the configuration as JSON, optionally saving it
pub fn print_config(config: &Config, save_to: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if let Some(path) = save_to {
        config.save(&path)?;
        println!("Saved to {}", path.display());
    }
    Ok(())
}

fn file_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
