//! Turns a sealed frame sequence into one playable video.
//!
//! Playback length is fixed by the frame count and the target rate
//! (`frames / fps` seconds) and never by how long capture took. Which
//! strategy runs is decided once by [`probe_strategy`]; a missing encoder is
//! reported as [`SynthesisOutcome::CapabilityUnavailable`], never as a
//! capture failure.

pub mod canvas;
pub mod ffmpeg;
pub mod http;
pub mod local;
pub mod pacing;
pub mod probe;
pub mod progress;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::frames::{Frame, FrameStore};
use crate::models::OutcomeKind;

pub use ffmpeg::FfmpegBackend;
pub use http::HttpDelegate;
pub use local::{EncodeError, EncodeSpec, EncoderBackend, EncoderSink, LocalSynthesizer};
pub use pacing::{playback_secs, FramePacer};
pub use probe::{probe_strategy, StrategyChoice};
pub use progress::{ProgressReporter, SynthesisProgress, SynthesisStage};
pub use remote::{FrameUpload, RemoteDelegate, RemoteError, RemoteStatus, RemoteSynthesizer};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("capture is still active; the frame store has not been sealed")]
    CaptureActive,
    #[error("failed to read frame sequence: {0}")]
    Read(#[from] anyhow::Error),
}

/// One attempt to turn a frame sequence into a video.
#[derive(Debug, Clone)]
pub struct SynthesisJob {
    session_id: String,
    frames: Vec<Frame>,
    target_fps: u32,
}

impl SynthesisJob {
    /// Snapshots the store for synthesis.
    ///
    /// Refuses to build a job from a store the capture loop may still write
    /// to.
    pub async fn from_sealed_store(
        session_id: impl Into<String>,
        store: &dyn FrameStore,
        target_fps: u32,
    ) -> Result<Self, JobError> {
        if !store.is_sealed() {
            return Err(JobError::CaptureActive);
        }
        let frames = store.read_all().await?;
        Ok(Self {
            session_id: session_id.into(),
            frames,
            target_fps: target_fps.max(1),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn target_duration_secs(&self) -> f64 {
        playback_secs(self.frame_count(), self.target_fps)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Local file path or remote URL.
    pub location: String,
    pub frame_count: usize,
    pub fps: u32,
    pub duration_secs: f64,
}

impl Artifact {
    pub fn new(location: impl Into<String>, frame_count: usize, fps: u32) -> Self {
        Self {
            location: location.into(),
            frame_count,
            fps,
            duration_secs: playback_secs(frame_count, fps),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SynthesisOutcome {
    Artifact(Artifact),
    /// Nothing was captured, so there is nothing to encode.
    Skipped,
    /// Frames were captured but this runtime cannot encode them.
    CapabilityUnavailable { reason: String, frames: usize },
    /// Encoding started and broke part way through.
    Failed { reason: String, frames: usize },
}

impl SynthesisOutcome {
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            SynthesisOutcome::Artifact(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            SynthesisOutcome::Artifact(_) => OutcomeKind::Artifact,
            SynthesisOutcome::Skipped => OutcomeKind::Skipped,
            SynthesisOutcome::CapabilityUnavailable { .. } => OutcomeKind::CapabilityUnavailable,
            SynthesisOutcome::Failed { .. } => OutcomeKind::Failed,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SynthesisOutcome::Failed { .. })
    }
}

#[async_trait]
pub trait SynthesisStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Encodes a job with at least one frame.
    async fn synthesize(&self, job: &SynthesisJob, progress: &ProgressReporter)
        -> SynthesisOutcome;
}

/// Chosen when the probe finds no usable encoder.
pub struct UnavailableStrategy {
    reason: String,
}

impl UnavailableStrategy {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl SynthesisStrategy for UnavailableStrategy {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn synthesize(
        &self,
        job: &SynthesisJob,
        _progress: &ProgressReporter,
    ) -> SynthesisOutcome {
        SynthesisOutcome::CapabilityUnavailable {
            reason: self.reason.clone(),
            frames: job.frame_count(),
        }
    }
}

/// Runs at most one job at a time against the probed strategy.
#[derive(Clone)]
pub struct SynthesisEngine {
    strategy: Arc<dyn SynthesisStrategy>,
    progress: ProgressReporter,
}

impl SynthesisEngine {
    pub fn new(strategy: Arc<dyn SynthesisStrategy>) -> Self {
        Self {
            strategy,
            progress: ProgressReporter::new(),
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn progress(&self) -> watch::Receiver<SynthesisProgress> {
        self.progress.subscribe()
    }

    pub async fn run(&self, job: &SynthesisJob) -> SynthesisOutcome {
        self.progress.begin(job.frame_count());

        if job.frame_count() == 0 {
            info!(
                "Synthesis skipped for session {}: no frames captured",
                job.session_id()
            );
            self.progress.finish();
            return SynthesisOutcome::Skipped;
        }

        info!(
            "Synthesizing {} frames for session {} via {} strategy ({} fps, {:.2}s)",
            job.frame_count(),
            job.session_id(),
            self.strategy.name(),
            job.target_fps(),
            job.target_duration_secs()
        );

        let outcome = self.strategy.synthesize(job, &self.progress).await;
        match &outcome {
            SynthesisOutcome::Artifact(artifact) => {
                self.progress.finish();
                info!(
                    "Synthesis complete for session {}: {} ({:.2}s)",
                    job.session_id(),
                    artifact.location,
                    artifact.duration_secs
                );
            }
            SynthesisOutcome::CapabilityUnavailable { reason, frames } => {
                warn!(
                    "Video unavailable for session {} ({} frames kept): {}",
                    job.session_id(),
                    frames,
                    reason
                );
            }
            SynthesisOutcome::Failed { reason, frames } => {
                warn!(
                    "Synthesis failed for session {} after {} frames: {}",
                    job.session_id(),
                    frames,
                    reason
                );
            }
            SynthesisOutcome::Skipped => {}
        }
        outcome
    }
}
