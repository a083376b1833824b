use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SynthesisStage {
    Idle,
    Preparing,
    Encoding,
    Uploading,
    AwaitingRemote,
    Finalizing,
    Done,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisProgress {
    pub stage: SynthesisStage,
    /// Overall completion in `[0, 1]`.
    pub fraction: f64,
    pub frames_done: usize,
    pub frames_total: usize,
}

impl SynthesisProgress {
    pub fn idle() -> Self {
        Self {
            stage: SynthesisStage::Idle,
            fraction: 0.0,
            frames_done: 0,
            frames_total: 0,
        }
    }
}

/// Publishes synthesis progress to any number of watchers.
///
/// Within one job the fraction never moves backwards: a late or smaller
/// report is folded into the current value instead of replacing it.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<SynthesisProgress>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SynthesisProgress::idle());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<SynthesisProgress> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> SynthesisProgress {
        *self.tx.borrow()
    }

    /// Starts a new job. This is the only way the fraction goes back to zero.
    pub fn begin(&self, frames_total: usize) {
        self.tx.send_replace(SynthesisProgress {
            stage: SynthesisStage::Preparing,
            fraction: 0.0,
            frames_done: 0,
            frames_total,
        });
    }

    pub fn report(&self, stage: SynthesisStage, fraction: f64, frames_done: usize) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };

        self.tx.send_if_modified(|current| {
            let next = SynthesisProgress {
                stage,
                fraction: fraction.max(current.fraction),
                frames_done: frames_done.max(current.frames_done),
                frames_total: current.frames_total,
            };
            if next == *current {
                return false;
            }
            *current = next;
            true
        });
    }

    pub fn finish(&self) {
        self.tx.send_modify(|current| {
            current.stage = SynthesisStage::Done;
            current.fraction = 1.0;
            current.frames_done = current.frames_total;
        });
    }
}
