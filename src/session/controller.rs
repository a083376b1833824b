use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::capture::{
    CameraSource, CaptureController, CaptureFault, CaptureSettings, ErrorClassifier, LoopPhase,
};
use crate::clock::{ElapsedClock, WallClock};
use crate::config::PipelineConfig;
use crate::frames::open_store;
use crate::models::{Session, SessionMode, SessionStatus};
use crate::reclaim::{Reclaimer, SessionResources};
use crate::synthesis::{SynthesisEngine, SynthesisJob, SynthesisOutcome, SynthesisProgress};

use super::state::{
    ControllerPhase, SessionEvent, SessionLog, SessionReport, SessionSnapshot, StartError,
    StopError,
};

const EVENT_CAPACITY: usize = 64;

/// Collaborators a controller is built from.
pub struct SessionDeps {
    pub camera: Arc<dyn CameraSource>,
    pub classifier: Arc<dyn ErrorClassifier>,
    pub log: Arc<dyn SessionLog>,
    pub clock: Arc<dyn WallClock>,
    pub engine: SynthesisEngine,
}

struct ActiveSession {
    session: Session,
    clock: ElapsedClock,
    resources: SessionResources,
    /// Monotonic start instant for the safety lock.
    started: Instant,
    paused: bool,
}

struct ControllerState {
    phase: ControllerPhase,
    active: Option<ActiveSession>,
}

struct Inner {
    config: PipelineConfig,
    frame_root: PathBuf,
    deps: SessionDeps,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<SessionEvent>,
    last_report: StdMutex<Option<SessionReport>>,
}

/// Owns the start/pause/stop lifecycle of at most one session at a time.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(config: PipelineConfig, frame_root: PathBuf, deps: SessionDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                frame_root,
                deps,
                state: Mutex::new(ControllerState {
                    phase: ControllerPhase::Idle,
                    active: None,
                }),
                events,
                last_report: StdMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn progress(&self) -> watch::Receiver<SynthesisProgress> {
        self.inner.deps.engine.progress()
    }

    pub fn last_report(&self) -> Option<SessionReport> {
        match self.inner.last_report.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock().await;
        match &state.active {
            Some(active) => SessionSnapshot {
                phase: state.phase,
                session_id: Some(active.session.id.clone()),
                mode: Some(active.session.mode),
                elapsed_secs: active.clock.elapsed_secs(),
                frames_captured: active.resources.store.len(),
                capture_phase: active.resources.capture.phase(),
                safety_lock_remaining_ms: self
                    .lock_remaining(active)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
            },
            None => SessionSnapshot {
                phase: state.phase,
                session_id: None,
                mode: None,
                elapsed_secs: 0,
                frames_captured: 0,
                capture_phase: LoopPhase::Idle,
                safety_lock_remaining_ms: 0,
            },
        }
    }

    /// Starts the clock and, for timelapse sessions, the capture loop.
    ///
    /// Either both are running when this returns `Ok` or neither is.
    pub async fn start(&self, mode: SessionMode) -> Result<String, StartError> {
        let mut state = self.inner.state.lock().await;
        if state.phase != ControllerPhase::Idle || state.active.is_some() {
            return Err(StartError::AlreadyActive);
        }

        let config = &self.inner.config;
        let session_id = Uuid::new_v4().to_string();
        let store = open_store(&config.frame_store, &self.inner.frame_root, &session_id).await?;

        let mut capture = CaptureController::new(
            Arc::clone(&self.inner.deps.camera),
            Arc::clone(&self.inner.deps.classifier),
        );

        let faults = if mode.captures_frames() {
            let settings = CaptureSettings {
                interval: config.capture_interval(),
                capture_timeout: config.capture_timeout(),
            };
            match capture.start(session_id.clone(), Arc::clone(&store), settings).await {
                Ok(faults) => Some(faults),
                Err(err) => {
                    if let Err(clear_err) = store.clear().await {
                        warn!("Failed to clean up frames after camera error: {clear_err:#}");
                    }
                    return Err(StartError::Camera(err));
                }
            }
        } else {
            None
        };

        let mut clock = ElapsedClock::new(Arc::clone(&self.inner.deps.clock));
        let started_at = clock.start();
        let mut session = Session::new(session_id.clone(), mode, started_at);
        if let Err(err) = session.advance(SessionStatus::Capturing) {
            warn!("{err}");
        }

        let mut resources = SessionResources::new(capture, store);

        if let Err(err) = self.inner.deps.log.begin(&session).await {
            Reclaimer::reclaim(&mut resources).await;
            return Err(StartError::Setup(err.context("failed to record session start")));
        }

        resources.track_timer(self.spawn_checkpoints(session_id.clone()));
        if let Some(faults) = faults {
            self.spawn_fault_supervisor(session_id.clone(), faults);
        }

        state.active = Some(ActiveSession {
            session,
            clock,
            resources,
            started: Instant::now(),
            paused: false,
        });
        state.phase = ControllerPhase::Running;
        drop(state);

        info!("Session {} started ({})", session_id, mode.as_str());
        self.emit(SessionEvent::Started {
            session_id: session_id.clone(),
            mode,
        });
        Ok(session_id)
    }

    pub async fn pause(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(active) = state.active.as_mut() else {
            return false;
        };
        if active.paused {
            return false;
        }
        active.clock.pause();
        active.resources.capture.pause();
        active.paused = true;
        let event = SessionEvent::Paused {
            session_id: active.session.id.clone(),
            elapsed_secs: active.clock.elapsed_secs(),
        };
        state.phase = ControllerPhase::Paused;
        drop(state);
        self.emit(event);
        true
    }

    pub async fn resume(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(active) = state.active.as_mut() else {
            return false;
        };
        if !active.paused {
            return false;
        }
        active.clock.resume();
        active.resources.capture.resume();
        active.paused = false;
        let event = SessionEvent::Resumed {
            session_id: active.session.id.clone(),
        };
        state.phase = ControllerPhase::Running;
        drop(state);
        self.emit(event);
        true
    }

    /// Ends the running session.
    ///
    /// Inside the safety-lock window this returns `TooSoon` and the session
    /// keeps running. While an earlier stop is still finishing it returns
    /// `AlreadyStopping`; that stop delivers the report. Otherwise the clock
    /// is frozen, capture is drained, and the report carries the elapsed time
    /// whatever synthesis produced.
    pub async fn stop(&self) -> Result<SessionReport, StopError> {
        self.stop_with(None).await
    }

    /// Forced stop for a session whose camera stream ended. Skips the
    /// safety lock; everything else is the user stop.
    async fn interrupt(&self, session_id: &str, reason: String) -> Option<SessionReport> {
        self.stop_with(Some((session_id, reason))).await.ok()
    }

    async fn stop_with(
        &self,
        interrupted: Option<(&str, String)>,
    ) -> Result<SessionReport, StopError> {
        let active = {
            let mut state = self.inner.state.lock().await;
            let Some(active) = state.active.as_ref() else {
                return match state.phase {
                    ControllerPhase::Stopping | ControllerPhase::Synthesizing => {
                        Err(StopError::AlreadyStopping)
                    }
                    _ => Err(StopError::NotRunning),
                };
            };
            match &interrupted {
                Some((session_id, _)) if active.session.id != *session_id => {
                    return Err(StopError::NotRunning);
                }
                Some(_) => {}
                None => {
                    if let Some(remaining) = self.lock_remaining(active) {
                        info!(
                            "Stop rejected for session {}: safety lock has {}ms left",
                            active.session.id,
                            remaining.as_millis()
                        );
                        return Err(StopError::TooSoon { remaining });
                    }
                }
            }
            state.phase = ControllerPhase::Stopping;
            state.active.take()
        };
        let Some(active) = active else {
            return Err(StopError::NotRunning);
        };

        let reason = interrupted.map(|(session_id, reason)| {
            warn!("Session {} interrupted: {}", session_id, reason);
            self.emit(SessionEvent::Interrupted {
                session_id: session_id.to_string(),
                reason: reason.clone(),
            });
            reason
        });
        Ok(self.finish(active, reason).await)
    }

    async fn finish(
        &self,
        mut active: ActiveSession,
        interrupted: Option<String>,
    ) -> SessionReport {
        let config = &self.inner.config;
        let session_id = active.session.id.clone();

        // Elapsed time is fixed before anything that can fail or take long.
        let elapsed_secs = active.clock.stop();
        let stopped_at = active.clock.now();
        active.session.stopped_at = Some(stopped_at);
        self.advance(&mut active.session, SessionStatus::Stopping);
        self.emit(SessionEvent::Stopping {
            session_id: session_id.clone(),
            elapsed_secs,
        });

        let drain = active
            .resources
            .capture
            .drain(config.drain_timeout(), config.drain_poll())
            .await;
        active.resources.store.seal().await;
        if !drain.quiesced {
            warn!(
                "Session {}: capture did not quiesce within {}ms, continuing without it",
                session_id, drain.waited_ms
            );
        }

        if let Err(err) = self.inner.deps.log.checkpoint(&session_id, elapsed_secs).await {
            error!("Failed to persist final duration for session {}: {err:#}", session_id);
        }

        let frame_count = active.resources.store.len();
        self.set_phase(ControllerPhase::Synthesizing).await;
        self.advance(&mut active.session, SessionStatus::Synthesizing);

        let outcome = match SynthesisJob::from_sealed_store(
            session_id.clone(),
            active.resources.store.as_ref(),
            config.target_fps,
        )
        .await
        {
            Ok(job) if active.session.mode.captures_frames() => {
                self.inner.deps.engine.run(&job).await
            }
            Ok(_) => SynthesisOutcome::Skipped,
            Err(err) => SynthesisOutcome::Failed {
                reason: err.to_string(),
                frames: active.resources.store.len(),
            },
        };
        let reclaim = Reclaimer::reclaim(&mut active.resources).await;

        let terminal = if interrupted.is_some() || outcome.is_failure() {
            SessionStatus::Failed
        } else {
            SessionStatus::Complete
        };
        self.advance(&mut active.session, terminal);

        let report = SessionReport {
            session_id: session_id.clone(),
            mode: active.session.mode,
            status: active.session.status,
            started_at: active.session.started_at,
            stopped_at,
            elapsed_secs,
            frame_count,
            outcome,
            interrupted,
            drain,
            reclaim,
        };

        if let Err(err) = self.inner.deps.log.complete(report.to_record()).await {
            error!("Failed to record completed session {}: {err:#}", session_id);
        }

        info!("Session {} finished: {}", session_id, report.summary());

        match self.inner.last_report.lock() {
            Ok(mut guard) => *guard = Some(report.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(report.clone()),
        }
        self.set_phase(ControllerPhase::Idle).await;
        self.emit(SessionEvent::Finished(Box::new(report.clone())));
        report
    }

    fn lock_remaining(&self, active: &ActiveSession) -> Option<Duration> {
        let lock = self.inner.config.safety_lock();
        let since = active.started.elapsed();
        (since < lock).then(|| lock - since)
    }

    fn advance(&self, session: &mut Session, next: SessionStatus) {
        if let Err(err) = session.advance(next) {
            warn!("Session {}: {err}", session.id);
        }
    }

    async fn set_phase(&self, phase: ControllerPhase) {
        self.inner.state.lock().await.phase = phase;
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }

    fn spawn_checkpoints(&self, session_id: String) -> tokio::task::JoinHandle<()> {
        let controller = self.clone();
        let period = self.inner.config.checkpoint_interval();

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;

                let elapsed = {
                    let state = controller.inner.state.lock().await;
                    match &state.active {
                        Some(active) if active.session.id == session_id => {
                            active.clock.elapsed_secs()
                        }
                        _ => break,
                    }
                };

                if let Err(err) = controller
                    .inner
                    .deps
                    .log
                    .checkpoint(&session_id, elapsed)
                    .await
                {
                    warn!("Checkpoint failed for session {}: {err:#}", session_id);
                }
            }
        })
    }

    fn spawn_fault_supervisor(
        &self,
        session_id: String,
        mut faults: mpsc::UnboundedReceiver<CaptureFault>,
    ) {
        let controller = self.clone();
        tokio::spawn(async move {
            if let Some(CaptureFault::StreamTerminated(reason)) = faults.recv().await {
                controller.interrupt(&session_id, reason).await;
            }
        });
    }
}
