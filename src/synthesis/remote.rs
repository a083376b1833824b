use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{self, Instant};

use crate::config::RemoteConfig;

use super::progress::{ProgressReporter, SynthesisStage};
use super::{Artifact, SynthesisJob, SynthesisOutcome, SynthesisStrategy};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Share of the progress bar spent uploading.
const UPLOAD_SHARE: f64 = 0.7;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid response: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Client errors other than timeouts and rate limits will not succeed on
    /// retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport(_) => true,
            RemoteError::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            RemoteError::Protocol(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameUpload {
    pub index: u64,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RemoteStatus {
    Pending {
        #[serde(default)]
        progress: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    Complete { artifact_url: String },
    Failed {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Storage/encoding service that turns uploaded frames into a video.
#[async_trait]
pub trait RemoteDelegate: Send + Sync {
    async fn upload(&self, session_id: &str, batch: &[FrameUpload]) -> Result<(), RemoteError>;

    async fn synthesize(
        &self,
        session_id: &str,
        target_fps: u32,
        frame_count: usize,
    ) -> Result<RemoteStatus, RemoteError>;

    async fn status(&self, session_id: &str) -> Result<RemoteStatus, RemoteError>;
}

pub struct RemoteSynthesizer {
    delegate: Arc<dyn RemoteDelegate>,
    config: RemoteConfig,
}

impl RemoteSynthesizer {
    pub fn new(delegate: Arc<dyn RemoteDelegate>, config: RemoteConfig) -> Self {
        Self { delegate, config }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff_ms.max(1);
        let exp = base.saturating_mul(1u64 << attempt.min(6));
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(exp.saturating_add(jitter))
    }

    async fn load_batch(
        &self,
        job: &SynthesisJob,
        range: std::ops::Range<usize>,
    ) -> Vec<FrameUpload> {
        let mut batch = Vec::with_capacity(range.len());
        for frame in &job.frames()[range] {
            match frame.load().await {
                Ok(bytes) => batch.push(FrameUpload {
                    index: frame.index,
                    file_name: frame.file_name(),
                    bytes: bytes.into_owned(),
                }),
                Err(err) => log_warn!(
                    "skipping unreadable frame {} for session {}: {err:#}",
                    frame.index,
                    job.session_id()
                ),
            }
        }
        batch
    }

    /// Uploads one buffered batch, retrying only that batch.
    async fn upload_with_retry(
        &self,
        session_id: &str,
        batch: &[FrameUpload],
    ) -> Result<(), RemoteError> {
        let mut attempt = 0u32;
        loop {
            match self.delegate.upload(session_id, batch).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let wait = self.backoff(attempt);
                    attempt += 1;
                    log_warn!(
                        "upload of {} frames failed (attempt {}), retrying in {}ms: {}",
                        batch.len(),
                        attempt,
                        wait.as_millis(),
                        err
                    );
                    time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn await_artifact(
        &self,
        session_id: &str,
        mut status: RemoteStatus,
        progress: &ProgressReporter,
        uploaded: usize,
    ) -> Result<String, String> {
        let deadline = Instant::now() + self.config.poll_timeout();
        let mut transient_errors = 0u32;

        loop {
            match status {
                RemoteStatus::Complete { artifact_url } => return Ok(artifact_url),
                RemoteStatus::Failed { reason } => {
                    return Err(reason.unwrap_or_else(|| "remote synthesis failed".into()))
                }
                RemoteStatus::Pending { progress: remote } => {
                    if let Some(p) = remote {
                        progress.report(
                            SynthesisStage::AwaitingRemote,
                            UPLOAD_SHARE + (1.0 - UPLOAD_SHARE) * p.clamp(0.0, 1.0) * 0.99,
                            uploaded,
                        );
                    }
                }
            }

            if Instant::now() + self.config.poll_interval() > deadline {
                return Err(format!(
                    "remote synthesis did not finish within {}s",
                    self.config.poll_timeout_secs
                ));
            }
            time::sleep(self.config.poll_interval()).await;

            status = match self.delegate.status(session_id).await {
                Ok(next) => next,
                Err(err) if err.is_retryable() && transient_errors < self.config.max_retries => {
                    transient_errors += 1;
                    log_debug!(
                        "status poll failed ({}), will poll again: {}",
                        transient_errors,
                        err
                    );
                    RemoteStatus::Pending { progress: None }
                }
                Err(err) => return Err(err.to_string()),
            };
        }
    }
}

#[async_trait]
impl SynthesisStrategy for RemoteSynthesizer {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn synthesize(
        &self,
        job: &SynthesisJob,
        progress: &ProgressReporter,
    ) -> SynthesisOutcome {
        let total = job.frame_count();
        let batch_size = self.config.batch_size.max(1);
        let unavailable = |reason: String| SynthesisOutcome::CapabilityUnavailable {
            reason,
            frames: total,
        };

        let mut uploaded = 0usize;
        let mut start = 0usize;
        while start < total {
            let end = (start + batch_size).min(total);
            let batch = self.load_batch(job, start..end).await;

            if !batch.is_empty() {
                if let Err(err) = self.upload_with_retry(job.session_id(), &batch).await {
                    return unavailable(format!(
                        "upload failed after {} of {} frames: {}",
                        uploaded, total, err
                    ));
                }
            }
            uploaded += batch.len();
            start = end;

            progress.report(
                SynthesisStage::Uploading,
                UPLOAD_SHARE * start as f64 / total as f64,
                start,
            );
        }

        if uploaded == 0 {
            return unavailable("no frame could be read for upload".into());
        }

        log_info!(
            "uploaded {} frames for session {}, requesting synthesis",
            uploaded,
            job.session_id()
        );

        let initial = match self
            .delegate
            .synthesize(job.session_id(), job.target_fps(), uploaded)
            .await
        {
            Ok(status) => status,
            Err(err) => return unavailable(format!("synthesis request failed: {err}")),
        };

        match self
            .await_artifact(job.session_id(), initial, progress, uploaded)
            .await
        {
            Ok(url) => SynthesisOutcome::Artifact(Artifact::new(url, uploaded, job.target_fps())),
            Err(reason) => unavailable(reason),
        }
    }
}
