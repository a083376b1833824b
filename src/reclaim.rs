use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::capture::CaptureController;
use crate::frames::FrameStore;

/// Everything a session holds that must be given back when it ends.
pub struct SessionResources {
    pub capture: CaptureController,
    pub store: Arc<dyn FrameStore>,
    timers: Vec<JoinHandle<()>>,
}

impl SessionResources {
    pub fn new(capture: CaptureController, store: Arc<dyn FrameStore>) -> Self {
        Self {
            capture,
            store,
            timers: Vec::new(),
        }
    }

    /// Registers a background task that must not outlive the session.
    pub fn track_timer(&mut self, handle: JoinHandle<()>) {
        self.timers.push(handle);
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.iter().filter(|t| !t.is_finished()).count()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimReport {
    pub camera_released: bool,
    pub timers_cancelled: usize,
    pub frames_cleared: usize,
    pub errors: Vec<String>,
}

/// Releases the camera, cancels pending timers, and deletes captured frames.
///
/// Safe to run any number of times; later runs find nothing left to do.
pub struct Reclaimer;

impl Reclaimer {
    pub async fn reclaim(resources: &mut SessionResources) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        report.camera_released = resources.capture.release().await;

        for timer in resources.timers.drain(..) {
            if !timer.is_finished() {
                timer.abort();
                report.timers_cancelled += 1;
            }
        }

        report.frames_cleared = resources.store.len();
        if let Err(err) = resources.store.clear().await {
            warn!("Failed to clear frame store: {err:#}");
            report.errors.push(format!("{err:#}"));
        }

        if report.camera_released || report.timers_cancelled > 0 || report.frames_cleared > 0 {
            info!(
                "Reclaimed session: camera_released={}, timers_cancelled={}, frames_cleared={}",
                report.camera_released, report.timers_cancelled, report.frames_cleared
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureSettings, DefaultClassifier};
    use crate::frames::{DiskFrameStore, MemoryFrameStore};
    use crate::testing::ScriptedCamera;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn reclaim_twice_is_harmless_and_leaves_store_empty() {
        let camera = Arc::new(ScriptedCamera::new());
        let store: Arc<dyn FrameStore> = Arc::new(MemoryFrameStore::new());
        let mut capture = CaptureController::new(camera.clone(), Arc::new(DefaultClassifier));
        let _faults = capture
            .start(
                "s".into(),
                store.clone(),
                CaptureSettings {
                    interval: Duration::from_secs(1),
                    capture_timeout: Duration::from_secs(5),
                },
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        let mut resources = SessionResources::new(capture, store.clone());
        resources.track_timer(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }));

        let first = Reclaimer::reclaim(&mut resources).await;
        assert!(first.camera_released);
        assert_eq!(first.timers_cancelled, 1);
        assert_eq!(first.frames_cleared, 3);
        assert!(first.errors.is_empty());
        assert!(store.is_empty());

        let second = Reclaimer::reclaim(&mut resources).await;
        assert_eq!(second, ReclaimReport::default());
        assert!(store.is_empty());
        assert_eq!(camera.released(), 1);
    }

    #[tokio::test]
    async fn reclaim_removes_session_frame_directory() {
        let root = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskFrameStore::create(root.path(), "sess").await.unwrap());
        disk.append(vec![1, 2, 3], Utc::now()).await.unwrap();
        let dir = disk.dir().to_path_buf();
        assert!(dir.exists());

        let camera = Arc::new(ScriptedCamera::new());
        let capture = CaptureController::new(camera, Arc::new(DefaultClassifier));
        let mut resources = SessionResources::new(capture, disk.clone());

        let report = Reclaimer::reclaim(&mut resources).await;
        assert_eq!(report.frames_cleared, 1);
        assert!(!report.camera_released);
        assert!(!dir.exists());

        Reclaimer::reclaim(&mut resources).await;
        assert!(!dir.exists());
    }
}
