use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FrameStoreKind {
    Memory,
    Disk,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SynthesisPreference {
    /// Local encode when ffmpeg is present, otherwise remote when configured.
    Auto,
    Local,
    Remote,
    /// Never encode; sessions keep their duration and drop the video.
    Disabled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PacingMode {
    /// Hold each frame on the canvas for one frame period of wall-clock time.
    WallClock,
    /// Step one frame per period without waiting.
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteConfig {
    pub endpoint: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            batch_size: 25,
            max_retries: 3,
            retry_backoff_ms: 500,
            poll_interval_ms: 2_000,
            poll_timeout_secs: 300,
            request_timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Tunables for the capture-and-synthesis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub capture_interval_secs: u64,
    /// Upper bound for one camera read before it counts as a transient failure.
    pub capture_timeout_secs: u64,
    pub target_fps: u32,
    /// Stop requests are rejected for this long after start.
    pub safety_lock_ms: u64,
    pub drain_timeout_ms: u64,
    pub drain_poll_ms: u64,
    /// How often the running duration is persisted.
    pub checkpoint_interval_secs: u64,
    pub output_width: u32,
    pub output_height: u32,
    pub pacing: PacingMode,
    pub frame_store: FrameStoreKind,
    pub frame_root: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub synthesis: SynthesisPreference,
    pub remote: RemoteConfig,
    pub ffmpeg_path: Option<PathBuf>,
    pub camera_device: String,
    pub camera_input_format: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture_interval_secs: 4,
            capture_timeout_secs: 10,
            target_fps: 30,
            safety_lock_ms: 3_000,
            drain_timeout_ms: 5_000,
            drain_poll_ms: 100,
            checkpoint_interval_secs: 10,
            output_width: 1280,
            output_height: 720,
            pacing: PacingMode::Offline,
            frame_store: FrameStoreKind::Disk,
            frame_root: None,
            output_dir: None,
            synthesis: SynthesisPreference::Auto,
            remote: RemoteConfig::default(),
            ffmpeg_path: None,
            camera_device: default_camera_device().into(),
            camera_input_format: default_camera_input_format().into(),
        }
    }
}

fn default_camera_device() -> &'static str {
    if cfg!(target_os = "macos") {
        "0"
    } else if cfg!(target_os = "windows") {
        "video=Integrated Camera"
    } else {
        "/dev/video0"
    }
}

fn default_camera_input_format() -> &'static str {
    if cfg!(target_os = "macos") {
        "avfoundation"
    } else if cfg!(target_os = "windows") {
        "dshow"
    } else {
        "v4l2"
    }
}

impl PipelineConfig {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs(self.capture_interval_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn safety_lock(&self) -> Duration {
        Duration::from_millis(self.safety_lock_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    /// Frame directory root, defaulting to `<data_dir>/frames`.
    pub fn frame_root_in(&self, data_dir: &Path) -> PathBuf {
        self.frame_root
            .clone()
            .unwrap_or_else(|| data_dir.join("frames"))
    }

    /// Where local encodes are written, defaulting to `<data_dir>/videos`.
    pub fn output_dir_in(&self, data_dir: &Path) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("videos"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture_interval_secs == 0 {
            bail!("captureIntervalSecs must be greater than zero");
        }
        if self.target_fps == 0 {
            bail!("targetFps must be greater than zero");
        }
        if self.drain_poll_ms == 0 || self.drain_poll_ms > self.drain_timeout_ms {
            bail!(
                "drainPollMs ({}) must be non-zero and no larger than drainTimeoutMs ({})",
                self.drain_poll_ms,
                self.drain_timeout_ms
            );
        }
        if self.checkpoint_interval_secs == 0 {
            bail!("checkpointIntervalSecs must be greater than zero");
        }
        if self.output_width == 0 || self.output_height == 0 {
            bail!("output dimensions must be non-zero");
        }
        if self.output_width % 2 != 0 || self.output_height % 2 != 0 {
            bail!("output dimensions must be even for yuv420p encoding");
        }
        if self.remote.batch_size == 0 {
            bail!("remote.batchSize must be greater than zero");
        }
        if self.remote.poll_interval_ms == 0 {
            bail!("remote.pollIntervalMs must be greater than zero");
        }
        Ok(())
    }

    /// Applies `FOCUSLAPSE_*` environment overrides on top of file settings.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(
            lookup: impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring {key}={raw:?}: not a valid value");
                    None
                }
            }
        }

        if let Some(v) = parsed(&lookup, "FOCUSLAPSE_CAPTURE_INTERVAL_SECS") {
            self.capture_interval_secs = v;
        }
        if let Some(v) = parsed(&lookup, "FOCUSLAPSE_TARGET_FPS") {
            self.target_fps = v;
        }
        if let Some(v) = parsed(&lookup, "FOCUSLAPSE_SAFETY_LOCK_MS") {
            self.safety_lock_ms = v;
        }
        if let Some(v) = parsed(&lookup, "FOCUSLAPSE_DRAIN_TIMEOUT_MS") {
            self.drain_timeout_ms = v;
        }
        if let Some(device) = lookup("FOCUSLAPSE_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        if let Some(path) = lookup("FOCUSLAPSE_FFMPEG") {
            self.ffmpeg_path = Some(PathBuf::from(path));
        }
        if let Some(endpoint) = lookup("FOCUSLAPSE_REMOTE_ENDPOINT") {
            self.remote.endpoint = Some(endpoint);
        }
        if let Some(raw) = lookup("FOCUSLAPSE_SYNTHESIS") {
            match raw.to_ascii_lowercase().as_str() {
                "auto" => self.synthesis = SynthesisPreference::Auto,
                "local" => self.synthesis = SynthesisPreference::Local,
                "remote" => self.synthesis = SynthesisPreference::Remote,
                "disabled" | "none" => self.synthesis = SynthesisPreference::Disabled,
                other => warn!("Ignoring FOCUSLAPSE_SYNTHESIS={other:?}"),
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    #[serde(default)]
    pipeline: PipelineConfig,
}

/// JSON-backed settings file.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(data) => data,
                Err(err) => {
                    warn!("Settings at {} are invalid ({err}); using defaults", path.display());
                    UserSettings::default()
                }
            }
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn pipeline(&self) -> PipelineConfig {
        self.read().pipeline.clone()
    }

    pub fn update_pipeline(&self, config: PipelineConfig) -> Result<()> {
        config.validate()?;
        let mut guard = self.write();
        guard.pipeline = config;
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
