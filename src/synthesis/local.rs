use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use thiserror::Error;
use tokio::time::{self, Instant};

use crate::config::PacingMode;

use super::canvas::{self, Canvas};
use super::pacing::FramePacer;
use super::progress::{ProgressReporter, SynthesisStage};
use super::{Artifact, SynthesisJob, SynthesisOutcome, SynthesisStrategy};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Share of the progress bar spent drawing; the rest is container finalize.
const ENCODE_SHARE: f64 = 0.95;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encoder unavailable: {0}")]
    Unavailable(String),
    #[error("encoder I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("encoder failed: {0}")]
    Encoder(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSpec {
    pub session_id: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub output: PathBuf,
}

/// Consumes raw RGBA frames of a fixed size at a fixed rate.
#[async_trait]
pub trait EncoderSink: Send {
    async fn write_frame(&mut self, rgba: &[u8]) -> Result<(), EncodeError>;

    /// Flushes and closes the stream, returning where the video landed.
    async fn finish(self: Box<Self>) -> Result<String, EncodeError>;
}

#[async_trait]
pub trait EncoderBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn open(&self, spec: &EncodeSpec) -> Result<Box<dyn EncoderSink>, EncodeError>;
}

/// In-process encode: draws each frame onto a fixed canvas and streams the
/// canvas to an encoder, one frame per output period.
pub struct LocalSynthesizer {
    backend: Arc<dyn EncoderBackend>,
    width: u32,
    height: u32,
    pacing: PacingMode,
    output_dir: PathBuf,
}

impl LocalSynthesizer {
    pub fn new(
        backend: Arc<dyn EncoderBackend>,
        width: u32,
        height: u32,
        pacing: PacingMode,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            backend,
            width,
            height,
            pacing,
            output_dir,
        }
    }

    fn spec_for(&self, job: &SynthesisJob) -> EncodeSpec {
        EncodeSpec {
            session_id: job.session_id().to_string(),
            width: self.width,
            height: self.height,
            fps: job.target_fps(),
            output: self.output_dir.join(format!("{}.mp4", job.session_id())),
        }
    }

    async fn render(&self, job: &SynthesisJob, frame_pos: usize, canvas: &mut Canvas) {
        let frame = &job.frames()[frame_pos];
        let bytes = match frame.load().await {
            Ok(bytes) => bytes.into_owned(),
            Err(err) => {
                log_warn!(
                    "frame {} unreadable for session {}, holding previous image: {err:#}",
                    frame.index,
                    job.session_id()
                );
                return;
            }
        };

        let (width, height) = (self.width, self.height);
        let rendered = tokio::task::spawn_blocking(move || -> anyhow::Result<RgbaImage> {
            let decoded = canvas::decode(&bytes)?;
            Ok(canvas::letterbox(&decoded, width, height))
        })
        .await;

        match rendered {
            Ok(Ok(image)) => canvas.set(image),
            Ok(Err(err)) => log_warn!(
                "frame {} undecodable for session {}, holding previous image: {err:#}",
                frame.index,
                job.session_id()
            ),
            Err(err) => log_warn!("frame {} render task failed: {err}", frame.index),
        }
    }
}

#[async_trait]
impl SynthesisStrategy for LocalSynthesizer {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn synthesize(
        &self,
        job: &SynthesisJob,
        progress: &ProgressReporter,
    ) -> SynthesisOutcome {
        let total = job.frame_count();
        let spec = self.spec_for(job);

        if let Err(err) = tokio::fs::create_dir_all(&self.output_dir).await {
            return SynthesisOutcome::CapabilityUnavailable {
                reason: format!(
                    "cannot create output directory {}: {err}",
                    self.output_dir.display()
                ),
                frames: total,
            };
        }

        let mut sink = match self.backend.open(&spec).await {
            Ok(sink) => sink,
            Err(EncodeError::Unavailable(reason)) => {
                return SynthesisOutcome::CapabilityUnavailable {
                    reason,
                    frames: total,
                };
            }
            Err(err) => {
                return SynthesisOutcome::CapabilityUnavailable {
                    reason: err.to_string(),
                    frames: total,
                };
            }
        };

        log_info!(
            "encoding {} frames with {} backend at {}x{} ({:?} pacing)",
            total,
            self.backend.name(),
            self.width,
            self.height,
            self.pacing
        );

        let mut canvas = Canvas::new(self.width, self.height);
        let mut pacer = FramePacer::new(job.target_fps());
        let mut next = 0usize;
        let mut last_tick = Instant::now();

        while next < total {
            let due = match self.pacing {
                PacingMode::Offline => 1,
                PacingMode::WallClock => {
                    let wait = pacer.until_next();
                    if !wait.is_zero() {
                        time::sleep(wait).await;
                    }
                    let now = Instant::now();
                    let due = pacer.advance(now - last_tick);
                    last_tick = now;
                    due as usize
                }
            };

            for _ in 0..due.min(total - next) {
                self.render(job, next, &mut canvas).await;
                if let Err(err) = sink.write_frame(canvas.pixels()).await {
                    return SynthesisOutcome::Failed {
                        reason: err.to_string(),
                        frames: total,
                    };
                }
                next += 1;
                progress.report(
                    SynthesisStage::Encoding,
                    ENCODE_SHARE * next as f64 / total as f64,
                    next,
                );
            }

            if due > 1 {
                log_debug!("pacer released {} frames in one step", due);
            }
            tokio::task::yield_now().await;
        }

        progress.report(SynthesisStage::Finalizing, ENCODE_SHARE, total);
        match sink.finish().await {
            Ok(location) => {
                SynthesisOutcome::Artifact(Artifact::new(location, total, job.target_fps()))
            }
            Err(err) => SynthesisOutcome::Failed {
                reason: err.to_string(),
                frames: total,
            },
        }
    }
}
