//! H.264 encoding through an ffmpeg child process fed raw RGBA on stdin.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};

use crate::utils::ffmpeg::{ffmpeg_command, stderr_tail};

use super::local::{EncodeError, EncodeSpec, EncoderBackend, EncoderSink};

pub struct FfmpegBackend {
    ffmpeg_path: PathBuf,
}

impl FfmpegBackend {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }
}

/// Arguments for a rawvideo-in, MP4-out encode.
pub fn encode_args(spec: &EncodeSpec) -> Vec<String> {
    vec![
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-s".into(),
        format!("{}x{}", spec.width, spec.height),
        "-r".into(),
        spec.fps.to_string(),
        "-i".into(),
        "-".into(),
        "-an".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-crf".into(),
        "26".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-g".into(),
        spec.fps.to_string(),
        "-movflags".into(),
        "+faststart".into(),
        spec.output.to_string_lossy().into_owned(),
    ]
}

#[async_trait]
impl EncoderBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn open(&self, spec: &EncodeSpec) -> Result<Box<dyn EncoderSink>, EncodeError> {
        if !self.ffmpeg_path.is_file() {
            return Err(EncodeError::Unavailable(format!(
                "ffmpeg not found at {}",
                self.ffmpeg_path.display()
            )));
        }

        let args = encode_args(spec);
        info!("Starting encoder: ffmpeg {}", args.join(" "));

        let mut child = ffmpeg_command(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncodeError::Unavailable(format!("failed to start ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncodeError::Encoder("ffmpeg stdin was not captured".into()))?;

        Ok(Box::new(FfmpegSink {
            child,
            stdin: Some(stdin),
            output: spec.output.clone(),
            frame_bytes: spec.width as usize * spec.height as usize * 4,
            written: 0,
        }))
    }
}

struct FfmpegSink {
    child: Child,
    stdin: Option<ChildStdin>,
    output: PathBuf,
    frame_bytes: usize,
    written: u64,
}

#[async_trait]
impl EncoderSink for FfmpegSink {
    async fn write_frame(&mut self, rgba: &[u8]) -> Result<(), EncodeError> {
        if rgba.len() != self.frame_bytes {
            return Err(EncodeError::Encoder(format!(
                "frame is {} bytes, expected {}",
                rgba.len(),
                self.frame_bytes
            )));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(EncodeError::Encoder("encoder input already closed".into()));
        };

        match stdin.write_all(rgba).await {
            Ok(()) => {
                self.written += 1;
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                self.stdin = None;
                Err(EncodeError::Encoder(format!(
                    "ffmpeg exited after {} frames",
                    self.written
                )))
            }
            Err(err) => Err(EncodeError::Io(err)),
        }
    }

    async fn finish(mut self: Box<Self>) -> Result<String, EncodeError> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().await?;
            drop(stdin);
        }

        let FfmpegSink {
            child,
            output,
            written,
            ..
        } = *self;
        let result = child.wait_with_output().await?;
        if !result.status.success() {
            return Err(EncodeError::Encoder(format!(
                "ffmpeg failed to finalize video ({}): {}",
                result.status,
                stderr_tail(&result.stderr)
            )));
        }

        debug!("ffmpeg wrote {} frames to {}", written, output.display());
        Ok(display_path(&output))
    }
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> EncodeSpec {
        EncodeSpec {
            session_id: "abc".into(),
            width: 1280,
            height: 720,
            fps: 30,
            output: PathBuf::from("/tmp/out/abc.mp4"),
        }
    }

    #[test]
    fn args_describe_raw_rgba_input_and_h264_output() {
        let args = encode_args(&spec());
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgba -s 1280x720 -r 30 -i -"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-pix_fmt yuv420p"));
        assert!(joined.contains("-movflags +faststart"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out/abc.mp4"));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FfmpegBackend::new(dir.path().join("ffmpeg"));
        let err = backend.open(&spec()).await.err().unwrap();
        assert!(matches!(err, EncodeError::Unavailable(_)));
    }
}
