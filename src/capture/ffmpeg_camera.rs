use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::{debug, info};

use crate::utils::ffmpeg::{ffmpeg_command, stderr_tail};

use super::camera::{CameraHandle, CameraSource, CaptureError};

/// Grabs one still per request by running ffmpeg against a capture device.
///
/// Each read opens the device, takes a single frame and exits, so nothing
/// stays open between captures and a slow read cannot wedge a long-lived
/// stream.
pub struct FfmpegCamera {
    ffmpeg_path: PathBuf,
    input_format: String,
    device: String,
    next_handle: AtomicU64,
}

impl FfmpegCamera {
    pub fn new(
        ffmpeg_path: PathBuf,
        input_format: impl Into<String>,
        device: impl Into<String>,
    ) -> Self {
        Self {
            ffmpeg_path,
            input_format: input_format.into(),
            device: device.into(),
            next_handle: AtomicU64::new(1),
        }
    }

    fn device_is_path(&self) -> bool {
        self.input_format == "v4l2"
    }

    fn capture_args(&self) -> Vec<String> {
        vec![
            "-f".into(),
            self.input_format.clone(),
            "-i".into(),
            self.device.clone(),
            "-frames:v".into(),
            "1".into(),
            "-f".into(),
            "image2pipe".into(),
            "-c:v".into(),
            "png".into(),
            "-".into(),
        ]
    }
}

#[async_trait]
impl CameraSource for FfmpegCamera {
    async fn acquire(&self) -> Result<CameraHandle, CaptureError> {
        if !self.ffmpeg_path.is_file() {
            return Err(CaptureError::Unavailable(format!(
                "ffmpeg not found at {}",
                self.ffmpeg_path.display()
            )));
        }
        if self.device_is_path() && !Path::new(&self.device).exists() {
            return Err(CaptureError::Unavailable(format!(
                "capture device {} does not exist",
                self.device
            )));
        }

        let handle = CameraHandle {
            id: self.next_handle.fetch_add(1, Ordering::Relaxed),
            device: self.device.clone(),
        };
        info!("Acquired camera {} (handle {})", handle.device, handle.id);
        Ok(handle)
    }

    async fn capture_frame(&self, handle: &CameraHandle) -> Result<Vec<u8>, CaptureError> {
        if self.device_is_path() && !Path::new(&handle.device).exists() {
            return Err(CaptureError::Device {
                message: format!("{}: no such device", handle.device),
                kind: Some(ErrorKind::NotFound),
            });
        }

        let output = ffmpeg_command(&self.ffmpeg_path)
            .args(self.capture_args())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(CaptureError::device(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }
        if output.stdout.is_empty() {
            return Err(CaptureError::device("ffmpeg produced no image data"));
        }

        debug!("Camera {} returned {} bytes", handle.device, output.stdout.len());
        Ok(output.stdout)
    }

    async fn release(&self, handle: CameraHandle) {
        info!("Released camera {} (handle {})", handle.device, handle.id);
    }
}
