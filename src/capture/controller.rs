use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::frames::FrameStore;
use crate::utils::wait_until;

use super::camera::{CameraHandle, CameraSource, CaptureError};
use super::classify::ErrorClassifier;
use super::loop_worker::{capture_loop, LoopContext};
use super::{CaptureFault, CaptureShared, CaptureStatsSnapshot, LoopPhase};

#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub interval: Duration,
    pub capture_timeout: Duration,
}

/// Result of the drain barrier.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// False when the loop had never been started.
    pub was_running: bool,
    /// False when the drain timeout elapsed with a capture still in flight.
    pub quiesced: bool,
    pub waited_ms: u64,
    pub frames_at_drain: usize,
}

/// Owns the camera handle and the capture loop task for one session.
pub struct CaptureController {
    camera: Arc<dyn CameraSource>,
    classifier: Arc<dyn ErrorClassifier>,
    shared: Arc<CaptureShared>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    pause_tx: Option<watch::Sender<bool>>,
    camera_handle: Option<CameraHandle>,
    store: Option<Arc<dyn FrameStore>>,
}

impl CaptureController {
    pub fn new(camera: Arc<dyn CameraSource>, classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self {
            camera,
            classifier,
            shared: CaptureShared::new(),
            handle: None,
            cancel_token: None,
            pause_tx: None,
            camera_handle: None,
            store: None,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.shared.phase()
    }

    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn shared(&self) -> Arc<CaptureShared> {
        Arc::clone(&self.shared)
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Acquires the camera and spawns the capture loop.
    ///
    /// On error nothing is left running and no camera is held. The returned
    /// receiver yields session-terminal faults from the loop.
    pub async fn start(
        &mut self,
        session_id: String,
        store: Arc<dyn FrameStore>,
        settings: CaptureSettings,
    ) -> Result<mpsc::UnboundedReceiver<CaptureFault>, CaptureError> {
        if self.handle.is_some() || self.camera_handle.is_some() {
            return Err(CaptureError::Unavailable("capture already active".into()));
        }

        let camera_handle = self.camera.acquire().await?;
        self.shared.set_phase(LoopPhase::Armed);

        let cancel_token = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();

        let ctx = LoopContext {
            session_id,
            camera: Arc::clone(&self.camera),
            handle: camera_handle.clone(),
            store: Arc::clone(&store),
            classifier: Arc::clone(&self.classifier),
            shared: Arc::clone(&self.shared),
            interval: settings.interval,
            capture_timeout: settings.capture_timeout,
            faults: fault_tx,
        };

        let handle = tokio::spawn(capture_loop(ctx, cancel_token.clone(), pause_rx));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.pause_tx = Some(pause_tx);
        self.camera_handle = Some(camera_handle);
        self.store = Some(store);
        Ok(fault_rx)
    }

    pub fn pause(&self) {
        if let Some(tx) = &self.pause_tx {
            let _ = tx.send(true);
        }
    }

    pub fn resume(&self) {
        if let Some(tx) = &self.pause_tx {
            let _ = tx.send(false);
        }
    }

    /// Stops issuing captures, waits (bounded) for an in-flight capture to
    /// finish, then seals the frame store.
    ///
    /// After this returns the store can no longer grow, even if a capture
    /// outlived the timeout: its result is discarded when it lands.
    pub async fn drain(&mut self, timeout: Duration, poll: Duration) -> DrainReport {
        let Some(token) = self.cancel_token.as_ref() else {
            if let Some(store) = &self.store {
                store.seal().await;
            }
            return DrainReport {
                was_running: false,
                quiesced: true,
                waited_ms: 0,
                frames_at_drain: self.store.as_ref().map(|s| s.len()).unwrap_or(0),
            };
        };

        self.shared.set_phase(LoopPhase::Draining);
        token.cancel();
        info!("Drain signal sent to capture loop");

        let guard = Arc::clone(&self.shared.guard);
        let outcome = wait_until(timeout, poll, || !guard.is_in_flight()).await;

        if !outcome.satisfied {
            warn!(
                "capture still in flight after {}ms drain wait; its result will be discarded",
                outcome.waited.as_millis()
            );
        }

        let frames_at_drain = match &self.store {
            Some(store) => {
                store.seal().await;
                store.len()
            }
            None => 0,
        };

        DrainReport {
            was_running: true,
            quiesced: outcome.satisfied,
            waited_ms: outcome.waited.as_millis() as u64,
            frames_at_drain,
        }
    }

    /// Cancels the loop, aborts it if still running, and releases the
    /// camera. Idempotent.
    pub async fn release(&mut self) -> bool {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                handle.abort();
            }
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!("capture loop task failed: {err}");
                }
            }
        }

        self.pause_tx = None;
        self.store = None;

        let released = match self.camera_handle.take() {
            Some(camera_handle) => {
                self.camera.release(camera_handle).await;
                true
            }
            None => false,
        };

        self.shared.set_phase(LoopPhase::Idle);
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::DefaultClassifier;
    use crate::frames::MemoryFrameStore;
    use crate::testing::{CameraScript, ScriptedCamera};
    use tokio::time::{self, Instant};

    fn settings(interval_secs: u64) -> CaptureSettings {
        CaptureSettings {
            interval: Duration::from_secs(interval_secs),
            capture_timeout: Duration::from_secs(60),
        }
    }

    fn controller_for(camera: Arc<ScriptedCamera>) -> CaptureController {
        CaptureController::new(camera, Arc::new(DefaultClassifier))
    }

    #[tokio::test(start_paused = true)]
    async fn captures_once_per_interval() {
        let camera = Arc::new(ScriptedCamera::new());
        let store = Arc::new(MemoryFrameStore::new());
        let mut controller = controller_for(camera.clone());

        let _faults = controller
            .start("s1".into(), store.clone(), settings(4))
            .await
            .unwrap();

        // Captures land at 4s, 8s, 12s, 16s and 20s.
        time::sleep(Duration::from_millis(20_100)).await;
        assert_eq!(store.len(), 5);

        let report = controller
            .drain(Duration::from_secs(5), Duration::from_millis(100))
            .await;
        assert!(report.quiesced);
        assert_eq!(report.frames_at_drain, 5);
        assert!(controller.release().await);
        assert_eq!(camera.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_capture_shortens_next_wait() {
        let camera = Arc::new(ScriptedCamera::new());
        camera.set_delay(Duration::from_secs(3));
        let store = Arc::new(MemoryFrameStore::new());
        let mut controller = controller_for(camera.clone());
        let started = Instant::now();

        let _faults = controller
            .start("s".into(), store.clone(), settings(4))
            .await
            .unwrap();

        // Reads begin at 4s, 8s, 12s and finish 3s later each.
        time::sleep(Duration::from_millis(15_500)).await;
        assert_eq!(store.len(), 3);

        let starts = camera.capture_starts();
        let offsets: Vec<u64> = starts
            .iter()
            .map(|t| (*t - started).as_secs())
            .collect();
        assert_eq!(offsets, vec![4, 8, 12]);
        controller.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_skip_the_frame_without_advancing_index() {
        let camera = Arc::new(ScriptedCamera::with_script(vec![
            CameraScript::Frame,
            CameraScript::Transient("glitch"),
            CameraScript::Frame,
        ]));
        let store = Arc::new(MemoryFrameStore::new());
        let mut controller = controller_for(camera.clone());

        let _faults = controller
            .start("s".into(), store.clone(), settings(1))
            .await
            .unwrap();
        time::sleep(Duration::from_millis(3_500)).await;

        let frames = store.read_all().await.unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].index, 1);
        assert_eq!(controller.stats().failed, 1);
        controller.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stream_end_is_escalated_and_stops_loop() {
        let camera = Arc::new(ScriptedCamera::with_script(vec![
            CameraScript::Frame,
            CameraScript::StreamEnded,
        ]));
        let store = Arc::new(MemoryFrameStore::new());
        let mut controller = controller_for(camera.clone());

        let mut faults = controller
            .start("s".into(), store.clone(), settings(1))
            .await
            .unwrap();

        let fault = faults.recv().await.expect("fault reported");
        assert!(matches!(fault, CaptureFault::StreamTerminated(_)));

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.len(), 1);
        controller.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_in_flight_capture() {
        let camera = Arc::new(ScriptedCamera::new());
        camera.set_delay(Duration::from_secs(2));
        let store = Arc::new(MemoryFrameStore::new());
        let mut controller = controller_for(camera.clone());

        let _faults = controller
            .start("s".into(), store.clone(), settings(4))
            .await
            .unwrap();

        // The first read is in flight between 4s and 6s.
        time::sleep(Duration::from_millis(4_500)).await;
        assert!(controller.shared().guard.is_in_flight());

        let report = controller
            .drain(Duration::from_secs(5), Duration::from_millis(100))
            .await;
        assert!(report.quiesced);
        assert_eq!(report.frames_at_drain, 1);

        // Nothing more is appended after the barrier.
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.len(), 1);
        controller.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drain_timeout_discards_late_frame() {
        let camera = Arc::new(ScriptedCamera::new());
        camera.set_delay(Duration::from_secs(20));
        let store = Arc::new(MemoryFrameStore::new());
        let mut controller = controller_for(camera.clone());

        let _faults = controller
            .start("s".into(), store.clone(), settings(1))
            .await
            .unwrap();
        time::sleep(Duration::from_millis(1_500)).await;

        let report = controller
            .drain(Duration::from_secs(5), Duration::from_millis(100))
            .await;
        assert!(!report.quiesced);
        assert_eq!(report.waited_ms, 5_000);
        assert_eq!(report.frames_at_drain, 0);

        // The slow read completes at 21s and is thrown away.
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.len(), 0);
        assert_eq!(controller.stats().discarded, 1);
        controller.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drain_before_start_is_a_no_op() {
        let camera = Arc::new(ScriptedCamera::new());
        let mut controller = controller_for(camera.clone());

        let report = controller
            .drain(Duration::from_secs(5), Duration::from_millis(100))
            .await;
        assert!(!report.was_running);
        assert!(report.quiesced);
        assert!(!controller.release().await);
        assert_eq!(camera.acquired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_loop_takes_no_frames() {
        let camera = Arc::new(ScriptedCamera::new());
        let store = Arc::new(MemoryFrameStore::new());
        let mut controller = controller_for(camera.clone());

        let _faults = controller
            .start("s".into(), store.clone(), settings(2))
            .await
            .unwrap();
        time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(store.len(), 1);

        controller.pause();
        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(store.len(), 1);
        assert_eq!(controller.phase(), LoopPhase::Paused);

        controller.resume();
        time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(store.len(), 2);
        controller.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_acquire_leaves_nothing_running() {
        let camera = Arc::new(ScriptedCamera::new());
        camera.fail_acquire("no camera");
        let store = Arc::new(MemoryFrameStore::new());
        let mut controller = controller_for(camera.clone());

        let err = controller
            .start("s".into(), store, settings(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Unavailable(_)));
        assert!(!controller.is_active());
        assert!(!controller.release().await);
    }
}
