use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Drift-free fixed-rate stepper.
///
/// Elapsed time is accumulated and the number of frames due is derived from
/// the total, so rounding never compounds: frame `n` is always due at exactly
/// `n / fps` seconds no matter how irregular the calls to `advance` are.
#[derive(Debug, Clone)]
pub struct FramePacer {
    fps: u32,
    accumulated: Duration,
    emitted: u64,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            accumulated: Duration::ZERO,
            emitted: 0,
        }
    }

    /// Presentation time of output frame `n`.
    pub fn timestamp(&self, n: u64) -> Duration {
        let nanos = (n as u128 * NANOS_PER_SEC) / self.fps as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    /// Adds elapsed time and returns how many frames have newly come due.
    pub fn advance(&mut self, elapsed: Duration) -> u64 {
        self.accumulated = self.accumulated.saturating_add(elapsed);
        let total_due = (self.accumulated.as_nanos() * self.fps as u128 / NANOS_PER_SEC) as u64;
        let due = total_due.saturating_sub(self.emitted);
        self.emitted = self.emitted.max(total_due);
        due
    }

    /// Time remaining until the next frame comes due.
    pub fn until_next(&self) -> Duration {
        self.timestamp(self.emitted + 1)
            .saturating_sub(self.accumulated)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// Playback duration of `frame_count` frames at `fps`, in seconds.
pub fn playback_secs(frame_count: usize, fps: u32) -> f64 {
    if fps == 0 {
        return 0.0;
    }
    frame_count as f64 / fps as f64
}
