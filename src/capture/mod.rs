//! Periodic camera capture for timelapse sessions.

pub mod camera;
pub mod classify;
pub mod controller;
pub mod ffmpeg_camera;
pub mod guard;
mod loop_worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

pub use camera::{CameraHandle, CameraSource, CaptureError};
pub use classify::{DefaultClassifier, ErrorClassifier, FailureClass};
pub use controller::{CaptureController, CaptureSettings, DrainReport};
pub use ffmpeg_camera::FfmpegCamera;
pub use guard::{CaptureGuard, InFlight};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LoopPhase {
    Idle,
    /// Camera acquired, no capture issued yet.
    Armed,
    CapturingFrame,
    Waiting,
    Paused,
    Draining,
}

/// Session-terminal conditions escalated from the loop to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureFault {
    StreamTerminated(String),
}

#[derive(Debug, Default)]
pub struct CaptureStats {
    attempts: AtomicU64,
    captured: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStatsSnapshot {
    pub attempts: u64,
    pub captured: u64,
    pub failed: u64,
    pub discarded: u64,
}

impl CaptureStats {
    fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_capture(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_discard(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            captured: self.captured.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the capture loop task and its controller.
#[derive(Debug)]
pub struct CaptureShared {
    pub guard: Arc<CaptureGuard>,
    phase: Mutex<LoopPhase>,
    pub stats: CaptureStats,
}

impl CaptureShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            guard: CaptureGuard::new(),
            phase: Mutex::new(LoopPhase::Idle),
            stats: CaptureStats::default(),
        })
    }

    pub fn phase(&self) -> LoopPhase {
        match self.phase.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub(crate) fn set_phase(&self, next: LoopPhase) {
        let mut guard = match self.phase.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Once draining, only the loop's own exit may move the phase on.
        if *guard == LoopPhase::Draining && next != LoopPhase::Idle {
            return;
        }
        *guard = next;
    }
}
