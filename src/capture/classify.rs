use std::io::ErrorKind;

use super::camera::CaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Skip this frame and keep going.
    Transient,
    /// The device is gone; the session must be stopped.
    StreamTerminated,
}

/// Decides whether a failed capture is worth retrying on the next tick.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, err: &CaptureError) -> FailureClass;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&CaptureError) -> FailureClass + Send + Sync,
{
    fn classify(&self, err: &CaptureError) -> FailureClass {
        self(err)
    }
}

const DEVICE_GONE_MARKERS: &[&str] = &[
    "no such device",
    "device disconnected",
    "device not found",
    "device has been removed",
    "stream ended",
    "track ended",
];

/// Treats explicit stream ends, vanished devices, and disconnect messages
/// as terminal; everything else is transient.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, err: &CaptureError) -> FailureClass {
        match err {
            CaptureError::StreamEnded(_) | CaptureError::Unavailable(_) => {
                FailureClass::StreamTerminated
            }
            CaptureError::Timeout(_) => FailureClass::Transient,
            CaptureError::Device { message, kind } => {
                if matches!(
                    kind,
                    Some(ErrorKind::NotFound | ErrorKind::BrokenPipe | ErrorKind::NotConnected)
                ) {
                    return FailureClass::StreamTerminated;
                }
                let lowered = message.to_ascii_lowercase();
                if DEVICE_GONE_MARKERS.iter().any(|m| lowered.contains(m)) {
                    FailureClass::StreamTerminated
                } else {
                    FailureClass::Transient
                }
            }
        }
    }
}
