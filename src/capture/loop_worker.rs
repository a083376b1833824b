use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::frames::FrameStore;

use super::camera::{CameraHandle, CameraSource, CaptureError};
use super::classify::{ErrorClassifier, FailureClass};
use super::{CaptureFault, CaptureShared, LoopPhase};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub(crate) struct LoopContext {
    pub session_id: String,
    pub camera: Arc<dyn CameraSource>,
    pub handle: CameraHandle,
    pub store: Arc<dyn FrameStore>,
    pub classifier: Arc<dyn ErrorClassifier>,
    pub shared: Arc<CaptureShared>,
    pub interval: Duration,
    pub capture_timeout: Duration,
    pub faults: mpsc::UnboundedSender<CaptureFault>,
}

enum CaptureStep {
    Stored,
    Skipped,
    Terminated(String),
}

/// Captures one frame per interval until cancelled.
///
/// The next capture is scheduled relative to when the previous one
/// *started*, minus however long it took, so a slow read shortens the
/// following wait instead of piling up a backlog. Cancellation is only
/// observed between captures; an in-flight read is allowed to finish.
pub(crate) async fn capture_loop(
    ctx: LoopContext,
    cancel_token: CancellationToken,
    mut paused: watch::Receiver<bool>,
) {
    log_info!(
        "capture loop started for session {} (every {:?})",
        ctx.session_id,
        ctx.interval
    );

    let mut delay = ctx.interval;

    loop {
        ctx.shared.set_phase(LoopPhase::Waiting);

        let tick_due = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = time::sleep(delay) => true,
            changed = paused.changed() => {
                if changed.is_err() {
                    break;
                }
                false
            }
        };

        if *paused.borrow_and_update() {
            ctx.shared.set_phase(LoopPhase::Paused);
            log_debug!("capture loop paused for session {}", ctx.session_id);
            if !wait_while_paused(&mut paused, &cancel_token).await {
                break;
            }
            log_debug!("capture loop resumed for session {}", ctx.session_id);
            delay = ctx.interval;
            continue;
        }

        if !tick_due {
            continue;
        }

        let Some(in_flight) = ctx.shared.guard.try_begin() else {
            log_warn!(
                "previous capture still in flight for session {}; skipping tick",
                ctx.session_id
            );
            delay = ctx.interval;
            continue;
        };

        if cancel_token.is_cancelled() {
            in_flight.end();
            break;
        }

        ctx.shared.set_phase(LoopPhase::CapturingFrame);
        let started = Instant::now();
        let step = capture_once(&ctx).await;
        in_flight.end();

        let took = started.elapsed();
        match step {
            CaptureStep::Stored | CaptureStep::Skipped => {}
            CaptureStep::Terminated(reason) => {
                log_error!(
                    "camera stream terminated for session {}: {}",
                    ctx.session_id,
                    reason
                );
                let _ = ctx.faults.send(CaptureFault::StreamTerminated(reason));
                break;
            }
        }

        if took > ctx.interval {
            log_warn!(
                "capture took {}ms, longer than the {}ms interval",
                took.as_millis(),
                ctx.interval.as_millis()
            );
        }
        delay = ctx.interval.saturating_sub(took);
    }

    ctx.shared.set_phase(LoopPhase::Idle);
    log_info!("capture loop shutting down for session {}", ctx.session_id);
}

async fn wait_while_paused(
    paused: &mut watch::Receiver<bool>,
    cancel_token: &CancellationToken,
) -> bool {
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return false,
            changed = paused.changed() => {
                if changed.is_err() {
                    return false;
                }
                if !*paused.borrow_and_update() {
                    return true;
                }
            }
        }
    }
}

async fn capture_once(ctx: &LoopContext) -> CaptureStep {
    let stats = &ctx.shared.stats;
    stats.record_attempt();

    let captured_at = Utc::now();
    let read_start = Instant::now();
    let capture = ctx.camera.capture_frame(&ctx.handle);
    let result = match time::timeout(ctx.capture_timeout, capture).await {
        Ok(result) => result,
        Err(_) => Err(CaptureError::Timeout(ctx.capture_timeout)),
    };
    let read_ms = read_start.elapsed().as_millis();

    let image = match result {
        Ok(image) => image,
        Err(err) => {
            return match ctx.classifier.classify(&err) {
                FailureClass::Transient => {
                    stats.record_failure();
                    log_warn!(
                        "capture failed for session {} after {}ms: {}",
                        ctx.session_id,
                        read_ms,
                        err
                    );
                    CaptureStep::Skipped
                }
                FailureClass::StreamTerminated => {
                    stats.record_failure();
                    CaptureStep::Terminated(err.to_string())
                }
            };
        }
    };

    let bytes = image.len();
    match ctx.store.append(image, captured_at).await {
        Ok(Some(frame)) => {
            stats.record_capture();
            log_info!(
                "frame {} captured for session {}: {} bytes, read={}ms",
                frame.index,
                ctx.session_id,
                bytes,
                read_ms
            );
            CaptureStep::Stored
        }
        Ok(None) => {
            stats.record_discard();
            log_info!(
                "frame store sealed; discarding late capture for session {}",
                ctx.session_id
            );
            CaptureStep::Skipped
        }
        Err(err) => {
            stats.record_failure();
            log_error!(
                "failed to store frame for session {}: {err:?}",
                ctx.session_id
            );
            CaptureStep::Skipped
        }
    }
}
