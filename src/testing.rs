//! Scripted collaborators shared by unit and session tests.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use image::{ImageFormat, Rgba, RgbaImage};
use tokio::time::Instant;

use crate::capture::{CameraHandle, CameraSource, CaptureError};
use crate::clock::WallClock;
use crate::models::{Session, SessionRecord};
use crate::session::SessionLog;
use crate::synthesis::{
    Artifact, EncodeError, EncodeSpec, EncoderBackend, EncoderSink, FrameUpload, ProgressReporter,
    RemoteDelegate, RemoteError, RemoteStatus, SynthesisJob, SynthesisOutcome, SynthesisStrategy,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Encoded PNG of a solid grey square.
pub fn png_bytes(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([shade, shade, shade, 255]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode test png");
    out.into_inner()
}

/// Wall clock moved by hand.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: chrono::Duration) {
        *lock(&self.now) += by;
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Wall clock that follows tokio's (possibly paused) clock.
pub struct TokioClock {
    base_wall: DateTime<Utc>,
    base_instant: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            base_wall: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            base_instant: Instant::now(),
        }
    }
}

impl WallClock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now() - self.base_instant;
        self.base_wall + chrono::Duration::from_std(elapsed).unwrap()
    }
}

#[derive(Debug, Clone)]
pub enum CameraScript {
    Frame,
    Transient(&'static str),
    StreamEnded,
}

#[derive(Default)]
struct CameraState {
    script: VecDeque<CameraScript>,
    delay: Duration,
    acquire_error: Option<String>,
    acquired: usize,
    released: usize,
    captured: u8,
    capture_starts: Vec<Instant>,
}

/// Camera that plays back a script, then keeps returning frames.
#[derive(Default)]
pub struct ScriptedCamera {
    state: Mutex<CameraState>,
}

impl ScriptedCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<CameraScript>) -> Self {
        let camera = Self::default();
        lock(&camera.state).script = script.into();
        camera
    }

    pub fn set_delay(&self, delay: Duration) {
        lock(&self.state).delay = delay;
    }

    pub fn fail_acquire(&self, reason: &str) {
        lock(&self.state).acquire_error = Some(reason.to_string());
    }

    pub fn acquired(&self) -> usize {
        lock(&self.state).acquired
    }

    pub fn released(&self) -> usize {
        lock(&self.state).released
    }

    pub fn capture_starts(&self) -> Vec<Instant> {
        lock(&self.state).capture_starts.clone()
    }
}

#[async_trait]
impl CameraSource for ScriptedCamera {
    async fn acquire(&self) -> Result<CameraHandle, CaptureError> {
        let mut state = lock(&self.state);
        if let Some(reason) = &state.acquire_error {
            return Err(CaptureError::Unavailable(reason.clone()));
        }
        state.acquired += 1;
        Ok(CameraHandle {
            id: state.acquired as u64,
            device: "scripted".into(),
        })
    }

    async fn capture_frame(&self, _handle: &CameraHandle) -> Result<Vec<u8>, CaptureError> {
        let delay = {
            let mut state = lock(&self.state);
            state.capture_starts.push(Instant::now());
            state.delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        match state.script.pop_front().unwrap_or(CameraScript::Frame) {
            CameraScript::Frame => {
                state.captured = state.captured.wrapping_add(1);
                Ok(png_bytes(4, 4, state.captured))
            }
            CameraScript::Transient(message) => Err(CaptureError::device(message)),
            CameraScript::StreamEnded => Err(CaptureError::StreamEnded("device unplugged".into())),
        }
    }

    async fn release(&self, _handle: CameraHandle) {
        lock(&self.state).released += 1;
    }
}

#[derive(Default)]
struct BackendState {
    frames: Vec<Vec<u8>>,
    opened: Vec<EncodeSpec>,
}

/// Encoder that keeps written canvases in memory.
#[derive(Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<BackendState>>,
    unavailable: Option<String>,
    fail_after: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            unavailable: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn failing_after(writes: usize) -> Self {
        Self {
            fail_after: Some(writes),
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        lock(&self.state).frames.clone()
    }

    pub fn opened(&self) -> Vec<EncodeSpec> {
        lock(&self.state).opened.clone()
    }
}

#[async_trait]
impl EncoderBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, spec: &EncodeSpec) -> Result<Box<dyn EncoderSink>, EncodeError> {
        if let Some(reason) = &self.unavailable {
            return Err(EncodeError::Unavailable(reason.clone()));
        }
        lock(&self.state).opened.push(spec.clone());
        Ok(Box::new(MemorySink {
            state: Arc::clone(&self.state),
            location: spec.output.display().to_string(),
            written: 0,
            fail_after: self.fail_after,
        }))
    }
}

struct MemorySink {
    state: Arc<Mutex<BackendState>>,
    location: String,
    written: usize,
    fail_after: Option<usize>,
}

#[async_trait]
impl EncoderSink for MemorySink {
    async fn write_frame(&mut self, rgba: &[u8]) -> Result<(), EncodeError> {
        if self.fail_after.is_some_and(|limit| self.written >= limit) {
            return Err(EncodeError::Encoder("scripted write failure".into()));
        }
        self.written += 1;
        lock(&self.state).frames.push(rgba.to_vec());
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<String, EncodeError> {
        Ok(self.location)
    }
}

/// Strategy that records job sizes instead of encoding.
pub struct RecordingStrategy {
    unavailable: Option<String>,
    delay: Duration,
    calls: Mutex<Vec<usize>>,
}

impl RecordingStrategy {
    pub fn succeeding() -> Self {
        Self {
            unavailable: None,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            unavailable: Some(reason.to_string()),
            ..Self::succeeding()
        }
    }

    /// Succeeds after `delay` of (tokio) time.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::succeeding()
        }
    }

    pub fn calls(&self) -> Vec<usize> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl SynthesisStrategy for RecordingStrategy {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn synthesize(
        &self,
        job: &SynthesisJob,
        _progress: &ProgressReporter,
    ) -> SynthesisOutcome {
        lock(&self.calls).push(job.frame_count());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.unavailable {
            Some(reason) => SynthesisOutcome::CapabilityUnavailable {
                reason: reason.clone(),
                frames: job.frame_count(),
            },
            None => SynthesisOutcome::Artifact(Artifact::new(
                format!("memory://{}.mp4", job.session_id()),
                job.frame_count(),
                job.target_fps(),
            )),
        }
    }
}

#[derive(Default)]
struct DelegateState {
    statuses: VecDeque<RemoteStatus>,
    upload_failures: VecDeque<Option<RemoteError>>,
    keep_pending: bool,
    batches: Vec<Vec<u64>>,
    synthesize_calls: Vec<(u32, usize)>,
}

/// Remote service double with scripted upload failures and status replies.
#[derive(Default)]
pub struct ScriptedDelegate {
    state: Mutex<DelegateState>,
}

impl ScriptedDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: RemoteStatus) {
        lock(&self.state).statuses.push_back(status);
    }

    pub fn fail_uploads(&self, script: Vec<Option<RemoteError>>) {
        lock(&self.state).upload_failures = script.into();
    }

    pub fn keep_pending(&self) {
        lock(&self.state).keep_pending = true;
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        lock(&self.state).batches.iter().map(Vec::len).collect()
    }

    pub fn batch_first_indices(&self) -> Vec<u64> {
        lock(&self.state)
            .batches
            .iter()
            .filter_map(|batch| batch.first().copied())
            .collect()
    }

    pub fn synthesize_calls(&self) -> Vec<(u32, usize)> {
        lock(&self.state).synthesize_calls.clone()
    }

    fn next_status(&self, session_id: &str) -> RemoteStatus {
        let mut state = lock(&self.state);
        match state.statuses.pop_front() {
            Some(status) => status,
            None if state.keep_pending => RemoteStatus::Pending { progress: None },
            None => RemoteStatus::Complete {
                artifact_url: format!("https://remote.test/{session_id}.mp4"),
            },
        }
    }
}

#[async_trait]
impl RemoteDelegate for ScriptedDelegate {
    async fn upload(&self, _session_id: &str, batch: &[FrameUpload]) -> Result<(), RemoteError> {
        let mut state = lock(&self.state);
        state
            .batches
            .push(batch.iter().map(|frame| frame.index).collect());
        match state.upload_failures.pop_front().flatten() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn synthesize(
        &self,
        session_id: &str,
        target_fps: u32,
        frame_count: usize,
    ) -> Result<RemoteStatus, RemoteError> {
        lock(&self.state)
            .synthesize_calls
            .push((target_fps, frame_count));
        Ok(self.next_status(session_id))
    }

    async fn status(&self, session_id: &str) -> Result<RemoteStatus, RemoteError> {
        Ok(self.next_status(session_id))
    }
}

#[derive(Default)]
struct LogState {
    begun: Vec<Session>,
    checkpoints: Vec<(String, u64)>,
    completed: Vec<SessionRecord>,
    fail_begin: bool,
}

/// Session log that keeps every call for inspection.
#[derive(Default)]
pub struct RecordingLog {
    state: Mutex<LogState>,
}

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_begin(&self) {
        lock(&self.state).fail_begin = true;
    }

    pub fn begun(&self) -> Vec<Session> {
        lock(&self.state).begun.clone()
    }

    pub fn checkpoints(&self) -> Vec<(String, u64)> {
        lock(&self.state).checkpoints.clone()
    }

    pub fn completed(&self) -> Vec<SessionRecord> {
        lock(&self.state).completed.clone()
    }
}

#[async_trait]
impl SessionLog for RecordingLog {
    async fn begin(&self, session: &Session) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_begin {
            bail!("session log is read-only");
        }
        state.begun.push(session.clone());
        Ok(())
    }

    async fn checkpoint(&self, session_id: &str, elapsed_secs: u64) -> Result<()> {
        lock(&self.state)
            .checkpoints
            .push((session_id.to_string(), elapsed_secs));
        Ok(())
    }

    async fn complete(&self, record: SessionRecord) -> Result<()> {
        lock(&self.state).completed.push(record);
        Ok(())
    }
}
