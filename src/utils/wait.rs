use std::time::Duration;

use tokio::time::{self, Instant};

/// Outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    pub satisfied: bool,
    pub waited: Duration,
    pub polls: u32,
}

/// Polls `condition` every `poll` until it holds or `timeout` elapses.
///
/// Always returns; the condition is checked once more at the deadline so a
/// state change during the last sleep is not missed.
pub async fn wait_until<F>(timeout: Duration, poll: Duration, mut condition: F) -> WaitOutcome
where
    F: FnMut() -> bool,
{
    let started = Instant::now();
    let deadline = started + timeout;
    let poll = poll.max(Duration::from_millis(1));
    let mut polls = 0u32;

    loop {
        if condition() {
            return WaitOutcome {
                satisfied: true,
                waited: started.elapsed(),
                polls,
            };
        }

        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome {
                satisfied: false,
                waited: started.elapsed(),
                polls,
            };
        }

        let remaining = deadline - now;
        time::sleep(poll.min(remaining)).await;
        polls = polls.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn returns_immediately_when_condition_holds() {
        let outcome = wait_until(Duration::from_secs(5), Duration::from_millis(100), || true).await;
        assert!(outcome.satisfied);
        assert_eq!(outcome.polls, 0);
        assert_eq!(outcome.waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_timeout() {
        let outcome =
            wait_until(Duration::from_secs(5), Duration::from_millis(100), || false).await;
        assert!(!outcome.satisfied);
        assert_eq!(outcome.waited, Duration::from_secs(5));
        assert_eq!(outcome.polls, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn observes_flag_flipped_by_another_task() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(350)).await;
            setter.store(true, Ordering::SeqCst);
        });

        let outcome = wait_until(Duration::from_secs(5), Duration::from_millis(100), || {
            flag.load(Ordering::SeqCst)
        })
        .await;

        assert!(outcome.satisfied);
        assert_eq!(outcome.waited, Duration::from_millis(400));
    }
}
