pub mod capture;
pub mod clock;
pub mod config;
pub mod db;
pub mod frames;
pub mod models;
pub mod reclaim;
pub mod session;
pub mod synthesis;
mod utils;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use tokio::sync::broadcast::error::RecvError;

use capture::{DefaultClassifier, FfmpegCamera};
use clock::SystemClock;
use config::SettingsStore;
use db::Database;
use frames::DiskFrameStore;
use models::SessionMode;
use session::{SessionController, SessionDeps, SessionEvent, SessionReport, StopError};
use synthesis::{probe_strategy, SynthesisEngine, SynthesisStage};
use utils::ffmpeg::find_ffmpeg;

fn parse_mode_arg(raw: Option<String>) -> Result<SessionMode> {
    let Some(raw) = raw else {
        return Ok(SessionMode::default());
    };
    match raw.to_ascii_lowercase().as_str() {
        "timelapse" => Ok(SessionMode::Timelapse),
        "stopwatch" => Ok(SessionMode::Stopwatch),
        "pomodoro" => Ok(SessionMode::Pomodoro),
        other => bail!("unknown mode {other:?}; expected timelapse, stopwatch or pomodoro"),
    }
}

fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("FOCUSLAPSE_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::data_dir().context("no per-user data directory on this platform")?;
    Ok(base.join("focuslapse"))
}

async fn run_session(mode: SessionMode) -> Result<SessionReport> {
    let data_dir = data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let settings_path = data_dir.join("settings.json");
    let first_run = !settings_path.exists();
    let settings = SettingsStore::new(settings_path)?;
    if first_run {
        // Write the defaults out so they can be edited.
        if let Err(err) = settings.update_pipeline(settings.pipeline()) {
            warn!("Failed to write default settings: {err:#}");
        }
    }
    let mut config = settings.pipeline();
    config.apply_env_overrides();
    config.validate().context("invalid pipeline settings")?;

    let database = Database::new(data_dir.join("focuslapse.sqlite3"))?;

    // Finalize sessions that were running when the process last died.
    for stale in database.recover_interrupted_sessions().await? {
        warn!(
            "Recovered session {} left in {}; kept {}s and marked it interrupted",
            stale.id,
            stale.status.as_str(),
            stale.elapsed_secs
        );
    }

    let frame_root = config.frame_root_in(&data_dir);
    if let Err(err) = DiskFrameStore::purge_root(&frame_root).await {
        warn!("Failed to purge stale frames: {err:#}");
    }

    let output_dir = config.output_dir_in(&data_dir);
    let (choice, strategy) = probe_strategy(&config, &output_dir).await;
    info!("Video synthesis: {:?}", choice);

    let ffmpeg = match find_ffmpeg(config.ffmpeg_path.as_deref()) {
        Some(path) => path,
        None if mode.captures_frames() => bail!("timelapse needs ffmpeg to read the camera"),
        None => PathBuf::from("ffmpeg"),
    };
    let camera = FfmpegCamera::new(
        ffmpeg,
        config.camera_input_format.clone(),
        config.camera_device.clone(),
    );

    let controller = SessionController::new(
        config,
        frame_root,
        SessionDeps {
            camera: Arc::new(camera),
            classifier: Arc::new(DefaultClassifier),
            log: Arc::new(database.clone()),
            clock: Arc::new(SystemClock),
            engine: SynthesisEngine::new(strategy),
        },
    );

    let mut events = controller.subscribe();
    let mut progress = controller.progress();
    tokio::spawn(async move {
        let mut last_stage = SynthesisStage::Idle;
        while progress.changed().await.is_ok() {
            let current = *progress.borrow_and_update();
            if current.stage != last_stage {
                info!(
                    "Synthesis {:?}: {}/{} frames ({:.0}%)",
                    current.stage,
                    current.frames_done,
                    current.frames_total,
                    current.fraction * 100.0
                );
                last_stage = current.stage;
            }
        }
    });

    let session_id = controller.start(mode).await?;
    println!(
        "Recording {} session {}. Press Ctrl-C to stop.",
        mode.as_str(),
        session_id
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                if let Some(report) = request_stop(&controller).await? {
                    return Ok(report);
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Interrupted { reason, .. }) => {
                    println!("Camera stopped: {reason}. Finishing the session.");
                }
                Ok(SessionEvent::Finished(report)) => return Ok(*report),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => bail!("session controller shut down"),
            },
        }
    }
}

/// Handles one Ctrl-C. `None` means the session is still finishing and the
/// caller should keep waiting for `SessionEvent::Finished`.
async fn request_stop(controller: &SessionController) -> Result<Option<SessionReport>> {
    match controller.stop().await {
        Ok(report) => Ok(Some(report)),
        Err(err @ (StopError::TooSoon { .. } | StopError::AlreadyStopping)) => {
            println!("{err}");
            Ok(None)
        }
        Err(StopError::NotRunning) => match controller.last_report() {
            Some(report) => Ok(Some(report)),
            None => bail!("session ended without a report"),
        },
    }
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Focuslapse starting up...");

    let mode = match parse_mode_arg(std::env::args().nth(1)) {
        Ok(mode) => mode,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to build async runtime: {err}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(run_session(mode)) {
        Ok(report) => println!("{}", report.summary()),
        Err(err) => {
            error!("{err:#}");
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    }
}
