use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Source of wall-clock time.
///
/// Elapsed time is always recomputed from wall-clock deltas, never from a
/// count of ticks, so a process that was suspended for an hour still reports
/// the hour once it wakes up.
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockStatus {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Elapsed-time tracker for one session.
///
/// Time accumulated from earlier running windows lives in `baseline_ms`; the
/// current window is measured from `anchor`. `stop()` freezes the value.
pub struct ElapsedClock {
    source: Arc<dyn WallClock>,
    status: ClockStatus,
    started_at: Option<DateTime<Utc>>,
    anchor: Option<DateTime<Utc>>,
    baseline_ms: u64,
}

impl ElapsedClock {
    pub fn new(source: Arc<dyn WallClock>) -> Self {
        Self {
            source,
            status: ClockStatus::Idle,
            started_at: None,
            anchor: None,
            baseline_ms: 0,
        }
    }

    /// Records the current wall-clock time as `t0` and returns it.
    pub fn start(&mut self) -> DateTime<Utc> {
        let now = self.source.now();
        self.status = ClockStatus::Running;
        self.started_at = Some(now);
        self.anchor = Some(now);
        self.baseline_ms = 0;
        now
    }

    pub fn pause(&mut self) {
        if self.status != ClockStatus::Running {
            return;
        }
        self.baseline_ms = self.current_ms();
        self.anchor = None;
        self.status = ClockStatus::Paused;
    }

    pub fn resume(&mut self) {
        if self.status != ClockStatus::Paused {
            return;
        }
        self.anchor = Some(self.source.now());
        self.status = ClockStatus::Running;
    }

    /// Freezes the clock and returns the final elapsed whole seconds.
    pub fn stop(&mut self) -> u64 {
        if self.status == ClockStatus::Running {
            self.baseline_ms = self.current_ms();
        }
        self.anchor = None;
        if self.status != ClockStatus::Idle {
            self.status = ClockStatus::Stopped;
        }
        self.baseline_ms / 1000
    }

    /// Elapsed whole seconds, never negative.
    pub fn elapsed_secs(&self) -> u64 {
        self.current_ms() / 1000
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.current_ms()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn is_running(&self) -> bool {
        self.status == ClockStatus::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.status == ClockStatus::Stopped
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.source.now()
    }

    fn current_ms(&self) -> u64 {
        match (self.status, self.anchor) {
            (ClockStatus::Running, Some(anchor)) => {
                // A wall clock stepped backwards contributes nothing rather
                // than going negative.
                let delta = (self.source.now() - anchor).num_milliseconds().max(0) as u64;
                self.baseline_ms.saturating_add(delta)
            }
            _ => self.baseline_ms,
        }
    }
}
