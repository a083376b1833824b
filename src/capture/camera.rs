use std::io;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Opaque handle to an acquired camera. Owned by the capture loop for the
/// duration of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraHandle {
    pub id: u64,
    pub device: String,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[error("camera read timed out after {0:?}")]
    Timeout(Duration),

    #[error("camera read failed: {message}")]
    Device {
        message: String,
        kind: Option<io::ErrorKind>,
    },

    #[error("camera stream ended: {0}")]
    StreamEnded(String),
}

impl CaptureError {
    pub fn device(message: impl Into<String>) -> Self {
        CaptureError::Device {
            message: message.into(),
            kind: None,
        }
    }
}

impl From<io::Error> for CaptureError {
    fn from(err: io::Error) -> Self {
        CaptureError::Device {
            kind: Some(err.kind()),
            message: err.to_string(),
        }
    }
}

/// A live image source.
///
/// Implementations must tolerate being released and acquired again across
/// sessions. `capture_frame` returns one encoded image (PNG or JPEG).
#[async_trait]
pub trait CameraSource: Send + Sync {
    async fn acquire(&self) -> Result<CameraHandle, CaptureError>;

    async fn capture_frame(&self, handle: &CameraHandle) -> Result<Vec<u8>, CaptureError>;

    async fn release(&self, handle: CameraHandle);
}
