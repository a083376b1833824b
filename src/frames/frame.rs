use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// Where a frame's encoded image lives.
#[derive(Debug, Clone)]
pub enum FramePayload {
    /// Encoded image bytes held in memory.
    Bytes(Arc<[u8]>),
    /// Encoded image persisted as an individual file.
    File(PathBuf),
}

/// One captured still.
///
/// `captured_at` is diagnostic only; playback timing comes from `index` and
/// the target frame rate.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub captured_at: DateTime<Utc>,
    pub payload: FramePayload,
}

impl Frame {
    pub async fn load(&self) -> Result<Cow<'_, [u8]>> {
        match &self.payload {
            FramePayload::Bytes(bytes) => Ok(Cow::Borrowed(bytes.as_ref())),
            FramePayload::File(path) => tokio::fs::read(path)
                .await
                .map(Cow::Owned)
                .with_context(|| format!("failed to read frame {}", path.display())),
        }
    }

    pub fn file_name(&self) -> String {
        frame_file_name(self.index)
    }
}

pub fn frame_file_name(index: u64) -> String {
    format!("frame_{index:06}.png")
}

pub fn parse_frame_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("frame_")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}
