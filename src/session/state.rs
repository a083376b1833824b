use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::capture::{CaptureError, DrainReport, LoopPhase};
use crate::models::{OutcomeKind, Session, SessionMode, SessionRecord, SessionStatus};
use crate::reclaim::ReclaimReport;
use crate::synthesis::{Artifact, SynthesisOutcome};

/// Receives the durable record of each session.
#[async_trait]
pub trait SessionLog: Send + Sync {
    async fn begin(&self, session: &Session) -> Result<()>;

    /// Persists the running duration so it survives a crash.
    async fn checkpoint(&self, session_id: &str, elapsed_secs: u64) -> Result<()>;

    /// Called exactly once per finished session.
    async fn complete(&self, record: SessionRecord) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ControllerPhase {
    Idle,
    Running,
    Paused,
    Stopping,
    Synthesizing,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("a session is already active")]
    AlreadyActive,
    #[error(transparent)]
    Camera(#[from] CaptureError),
    #[error("failed to prepare session: {0:#}")]
    Setup(#[from] anyhow::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StopError {
    #[error("wait a moment: stopping is possible in {}ms", remaining.as_millis())]
    TooSoon { remaining: Duration },
    #[error("no session is running")]
    NotRunning,
    #[error("the session is already stopping")]
    AlreadyStopping,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: ControllerPhase,
    pub session_id: Option<String>,
    pub mode: Option<SessionMode>,
    pub elapsed_secs: u64,
    pub frames_captured: usize,
    pub capture_phase: LoopPhase,
    pub safety_lock_remaining_ms: u64,
}

/// Final result of a session: the duration always, the video when possible.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub elapsed_secs: u64,
    pub frame_count: usize,
    pub outcome: SynthesisOutcome,
    /// Set when the camera stream ended on its own.
    pub interrupted: Option<String>,
    pub drain: DrainReport,
    pub reclaim: ReclaimReport,
}

impl SessionReport {
    pub fn artifact(&self) -> Option<&Artifact> {
        self.outcome.artifact()
    }

    pub fn outcome_kind(&self) -> OutcomeKind {
        if self.interrupted.is_some() {
            OutcomeKind::Interrupted
        } else {
            self.outcome.kind()
        }
    }

    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.session_id.clone(),
            mode: self.mode,
            status: self.status,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            elapsed_secs: self.elapsed_secs,
            frame_count: self.frame_count,
            artifact: self.artifact().map(|a| a.location.clone()),
            outcome: self.outcome_kind(),
        }
    }

    /// One line for the user. Partial success never reads like failure.
    pub fn summary(&self) -> String {
        let duration = format_duration(self.elapsed_secs);
        let video = match &self.outcome {
            SynthesisOutcome::Artifact(artifact) => format!(
                "{} frames became a {:.1}s video at {}",
                artifact.frame_count, artifact.duration_secs, artifact.location
            ),
            SynthesisOutcome::Skipped => "no frames were captured, so there is no video".into(),
            SynthesisOutcome::CapabilityUnavailable { reason, frames } => format!(
                "{frames} frames captured but video is unavailable here ({reason})"
            ),
            SynthesisOutcome::Failed { reason, frames } => {
                format!("video encoding failed after capturing {frames} frames ({reason})")
            }
        };

        match &self.interrupted {
            Some(reason) => {
                format!("Recording interrupted ({reason}). Focused for {duration}; {video}.")
            }
            None => format!("Focused for {duration}; {video}."),
        }
    }
}

pub fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    Started { session_id: String, mode: SessionMode },
    #[serde(rename_all = "camelCase")]
    Paused { session_id: String, elapsed_secs: u64 },
    #[serde(rename_all = "camelCase")]
    Resumed { session_id: String },
    #[serde(rename_all = "camelCase")]
    Stopping { session_id: String, elapsed_secs: u64 },
    #[serde(rename_all = "camelCase")]
    Interrupted { session_id: String, reason: String },
    Finished(Box<SessionReport>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::DrainReport;

    fn report(outcome: SynthesisOutcome, interrupted: Option<&str>) -> SessionReport {
        SessionReport {
            session_id: "s".into(),
            mode: SessionMode::Timelapse,
            status: SessionStatus::Complete,
            started_at: Utc::now(),
            stopped_at: Utc::now(),
            elapsed_secs: 1_830,
            frame_count: 12,
            outcome,
            interrupted: interrupted.map(str::to_string),
            drain: DrainReport {
                was_running: true,
                quiesced: true,
                waited_ms: 0,
                frames_at_drain: 12,
            },
            reclaim: ReclaimReport::default(),
        }
    }

    #[test]
    fn partial_success_is_worded_differently_from_failure() {
        let unavailable = report(
            SynthesisOutcome::CapabilityUnavailable {
                reason: "no encoder".into(),
                frames: 12,
            },
            None,
        );
        let failed = report(
            SynthesisOutcome::Failed {
                reason: "pipe closed".into(),
                frames: 12,
            },
            None,
        );
        assert!(unavailable.summary().contains("12 frames captured but video is unavailable"));
        assert!(failed.summary().contains("encoding failed"));
        assert!(unavailable.summary().starts_with("Focused for 30m 30s"));
    }

    #[test]
    fn interruption_is_surfaced_and_recorded() {
        let report = report(SynthesisOutcome::Skipped, Some("camera unplugged"));
        assert!(report.summary().starts_with("Recording interrupted (camera unplugged)"));
        let record = report.to_record();
        assert_eq!(record.outcome, OutcomeKind::Interrupted);
        assert_eq!(record.elapsed_secs, 1_830);
        assert!(record.artifact.is_none());
    }

    #[test]
    fn durations_format_compactly() {
        assert_eq!(format_duration(9), "9s");
        assert_eq!(format_duration(61), "1m 01s");
        assert_eq!(format_duration(3_725), "1h 02m 05s");
    }

    #[test]
    fn too_soon_message_asks_user_to_wait() {
        let err = StopError::TooSoon {
            remaining: Duration::from_millis(1_200),
        };
        assert_eq!(err.to_string(), "wait a moment: stopping is possible in 1200ms");
    }
}
