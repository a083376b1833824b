use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionMode {
    Stopwatch,
    Pomodoro,
    #[default]
    Timelapse,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Stopwatch => "Stopwatch",
            SessionMode::Pomodoro => "Pomodoro",
            SessionMode::Timelapse => "Timelapse",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Stopwatch" => Some(SessionMode::Stopwatch),
            "Pomodoro" => Some(SessionMode::Pomodoro),
            "Timelapse" => Some(SessionMode::Timelapse),
            _ => None,
        }
    }

    pub fn captures_frames(&self) -> bool {
        matches!(self, SessionMode::Timelapse)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Idle,
    Capturing,
    Stopping,
    Synthesizing,
    Complete,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "Idle",
            SessionStatus::Capturing => "Capturing",
            SessionStatus::Stopping => "Stopping",
            SessionStatus::Synthesizing => "Synthesizing",
            SessionStatus::Complete => "Complete",
            SessionStatus::Failed => "Failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Idle" => Some(SessionStatus::Idle),
            "Capturing" => Some(SessionStatus::Capturing),
            "Stopping" => Some(SessionStatus::Stopping),
            "Synthesizing" => Some(SessionStatus::Synthesizing),
            "Complete" => Some(SessionStatus::Complete),
            "Failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SessionStatus::Idle => 0,
            SessionStatus::Capturing => 1,
            SessionStatus::Stopping => 2,
            SessionStatus::Synthesizing => 3,
            SessionStatus::Complete | SessionStatus::Failed => 4,
        }
    }

    /// Forward-only transitions; `Failed` is reachable from `Capturing` and
    /// `Synthesizing` only.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match next {
            SessionStatus::Failed => matches!(
                self,
                SessionStatus::Capturing | SessionStatus::Synthesizing
            ),
            _ => {
                !matches!(self, SessionStatus::Complete | SessionStatus::Failed)
                    && next.rank() > self.rank()
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Complete | SessionStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid session transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// One focus-tracking attempt. Owned and mutated by the session controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: String, mode: SessionMode, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            mode,
            status: SessionStatus::Idle,
            started_at,
            stopped_at: None,
        }
    }

    pub fn advance(&mut self, next: SessionStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// How a finished session's video turned out, as persisted by the session log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeKind {
    Artifact,
    Skipped,
    CapabilityUnavailable,
    Failed,
    Interrupted,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Artifact => "artifact",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::CapabilityUnavailable => "capability_unavailable",
            OutcomeKind::Failed => "failed",
            OutcomeKind::Interrupted => "interrupted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "artifact" => Some(OutcomeKind::Artifact),
            "skipped" => Some(OutcomeKind::Skipped),
            "capability_unavailable" => Some(OutcomeKind::CapabilityUnavailable),
            "failed" => Some(OutcomeKind::Failed),
            "interrupted" => Some(OutcomeKind::Interrupted),
            _ => None,
        }
    }
}

/// The final `(elapsedSeconds, artifact|null)` pair handed to the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub elapsed_secs: u64,
    pub frame_count: usize,
    pub artifact: Option<String>,
    pub outcome: OutcomeKind,
}
