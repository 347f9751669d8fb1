//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Entry point and composition root of the `isi-core` executable.
//!
//! Replaces the teacher's GTK-coupled `ProgramData`/`main()` wiring
//! (no UI is in scope here, `spec.md` §1) with a small headless
//! composition root: it builds a `Services` context once and starts
//! the three long-lived threads of `spec.md` §5 (render/present,
//! camera-ingest, control dispatch) plus the session writer thread
//! owned by whichever `SessionRecorder` is active.
//!

mod acquisition;
mod analysis;
mod args;
mod camera;
mod config;
mod control;
mod error;
mod frame;
mod geometry;
mod parameters;
mod render;
mod session;
mod stimulus;
mod sync;
mod timer;

use acquisition::AcquisitionCoordinator;
use args::Command;
use camera::{FrameSource, SimulatedFrameSource};
use control::{ControlPlane, Services};
use frame::PixelDepth;
use parameters::ParameterStore;
use parameters::schema::Direction;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const EXIT_OK: i32 = 0;
const EXIT_FATAL: i32 = 1;
const EXIT_BAD_ARGS: i32 = 2;

fn main() {
    let parsed = match args::parse_command_line(std::env::args()) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("isi-core: {message}");
            std::process::exit(EXIT_BAD_ARGS);
        }
    };

    init_logging(parsed.logging);

    let exit_code = match parsed.command {
        Command::Serve { simulate_camera } => {
            run_serve(parsed.config_path, parsed.sessions_dir, simulate_camera)
        }
        Command::Analyze { session_dir } => run_analyze(&session_dir),
    };

    std::process::exit(exit_code);
}

fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
}

/// Runs `analyze`: a one-shot `AnalysisPipeline` pass over an already
/// recorded session, writing results alongside it, then exits
/// (`spec.md` §6 exit codes).
fn run_analyze(session_dir: &std::path::Path) -> i32 {
    match analysis::run(session_dir) {
        Ok(result) => {
            let dir_name = session_dir.file_name().and_then(|n| n.to_str()).unwrap_or("session");
            let output_dir = session_dir.with_file_name(format!("{dir_name}-analysis"));
            match analysis::persist(&result, &output_dir) {
                Ok(()) => {
                    log::info!("AnalysisPipeline: results written to {}", output_dir.display());
                    EXIT_OK
                }
                Err(err) => {
                    log::error!("AnalysisPipeline: failed to persist results: {err}");
                    EXIT_FATAL
                }
            }
        }
        Err(err) => {
            log::error!("AnalysisPipeline failed: {err}");
            EXIT_FATAL
        }
    }
}

/// Runs `serve`: the headless acquisition/control-plane process.
/// Starts the render/present, camera-ingest, and control-dispatch
/// threads (`spec.md` §5) and drives the control plane off stdin/
/// stdout as the local channel to the external UI (`spec.md` §6;
/// the wire framing itself is this process's chosen realization of
/// that boundary, not a subsystem `spec.md` prescribes).
fn run_serve(
    config_path: Option<std::path::PathBuf>,
    sessions_dir: Option<std::path::PathBuf>,
    simulate_camera: bool,
) -> i32 {
    let config_path = config_path.unwrap_or_else(config::default_parameter_file_path);
    let sessions_dir = sessions_dir.unwrap_or_else(config::default_sessions_dir);

    if let Err(err) = std::fs::create_dir_all(&sessions_dir) {
        eprintln!("isi-core: failed to create sessions directory {}: {err}", sessions_dir.display());
        return EXIT_FATAL;
    }

    let parameters = Arc::new(ParameterStore::load(config_path));
    let stimulus = Arc::new(stimulus::StimulusEngine::new());
    let sync_tracker = Arc::new(sync::SyncTracker::new());
    let acquisition = Arc::new(AcquisitionCoordinator::new(Arc::clone(&stimulus), Arc::clone(&sync_tracker)));

    let camera_params = parameters.get_all().camera;
    let camera_depth = PixelDepth::Eight;

    let services = Arc::new(Services::new(
        Arc::clone(&parameters),
        Arc::clone(&acquisition),
        sessions_dir,
        camera_params.width_px,
        camera_params.height_px,
        camera_depth,
    ));

    let shutdown = Arc::new(AtomicBool::new(false));

    let frame_source: Box<dyn FrameSource> = if simulate_camera {
        Box::new(SimulatedFrameSource::new(
            camera_params.width_px,
            camera_params.height_px,
            camera_depth,
            camera_params.fps,
        ))
    } else {
        log::error!(
            "isi-core: no camera driver is built into this crate (spec.md §1 treats cameras as an \
             external collaborator); pass --simulate-camera to exercise the acquisition pipeline \
             without real hardware"
        );
        return EXIT_FATAL;
    };

    let render_handle = spawn_render_thread(Arc::clone(&acquisition), Arc::clone(&shutdown));
    let camera_handle =
        spawn_camera_thread(Arc::clone(&acquisition), frame_source, Arc::clone(&shutdown));

    log::info!("isi-core: serving control-plane commands on stdin/stdout");
    run_control_loop(&services);

    shutdown.store(true, Ordering::SeqCst);
    let _ = render_handle.join();
    let _ = camera_handle.join();

    EXIT_OK
}

/// Drives `StimulusEngine` at `monitor.fps`: advances the coordinator's
/// time-based phases, renders the next stimulus frame while `SWEEPING`,
/// and confirms presentation with a wall-clock fallback timestamp
/// (`spec.md` §4.4: "fallback: wall-clock at the submit moment with a
/// logged `timestamp_source`" since there is no real display surface
/// to drive a VSYNC callback in this headless process).
fn spawn_render_thread(
    acquisition: Arc<AcquisitionCoordinator>,
    shutdown: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let frame_period = Duration::from_secs_f64(1.0 / 60.0);
        while !shutdown.load(Ordering::SeqCst) {
            let tick_start = Instant::now();

            if let Err(err) = acquisition.tick(tick_start) {
                log::error!("AcquisitionCoordinator: tick failed: {err}");
            }

            match acquisition.render_next_frame() {
                Ok(Some(rendered)) => {
                    acquisition.confirm_presentation(&rendered, Some(sync::wall_clock_us()));
                }
                Ok(None) => {}
                Err(err) => log::error!("StimulusEngine: render failed: {err}"),
            }

            let elapsed = tick_start.elapsed();
            if elapsed < frame_period {
                std::thread::sleep(frame_period - elapsed);
            }
        }
    })
}

/// Forwards frames from `FrameSource` to `AcquisitionCoordinator` for
/// whichever direction is currently active, resetting the per-direction
/// frame-index counter whenever the active direction changes.
fn spawn_camera_thread(
    acquisition: Arc<AcquisitionCoordinator>,
    mut frame_source: Box<dyn FrameSource>,
    shutdown: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut current_direction: Option<Direction> = None;
        let mut frame_index: u32 = 0;

        while !shutdown.load(Ordering::SeqCst) {
            let Some(direction) = acquisition.status().direction else {
                std::thread::sleep(Duration::from_millis(10));
                continue;
            };

            if current_direction != Some(direction) {
                current_direction = Some(direction);
                frame_index = 0;
            }

            match frame_source.poll_frame() {
                Ok((frame, hw_timestamp_us)) => {
                    acquisition.on_camera_frame(direction, frame_index, hw_timestamp_us, frame);
                    frame_index += 1;
                }
                Err(camera::FrameSourceError::FrameUnavailable) => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(camera::FrameSourceError::Disconnected(reason)) => {
                    log::error!("FrameSource disconnected: {reason}");
                    break;
                }
            }
        }
    })
}

/// Reads one newline-delimited JSON command per line from stdin,
/// dispatches it through `ControlPlane`, and writes the JSON response
/// to stdout (`spec.md` §6: "Request/Response over a local channel to
/// the UI"). Exits the loop on EOF.
fn run_control_loop(services: &Services) {
    let control_plane = ControlPlane::new();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<serde_json::Value>(line) {
            Ok(request) => match request.get("type").and_then(serde_json::Value::as_str) {
                Some(command) => {
                    let command = command.to_string();
                    control_plane.dispatch(services, &command, request)
                }
                None => control::CommandResponse::err(
                    error::ControlError::MalformedPayload("missing 'type'".to_string()),
                ),
            },
            Err(err) => control::CommandResponse::err(format!("malformed request: {err}")),
        };

        if let Ok(text) = serde_json::to_string(&response) {
            let _ = writeln!(stdout, "{text}");
            let _ = stdout.flush();
        }
    }
}
