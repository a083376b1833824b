use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{frame_file_name, parse_frame_file_name, Frame, FramePayload, FrameStore};

struct DiskState {
    next_index: u64,
    sealed: bool,
}

/// Frames persisted as individually named files under a per-session
/// directory: `<root>/<session_id>/frame_000000.png`.
pub struct DiskFrameStore {
    dir: PathBuf,
    state: Mutex<DiskState>,
    count: AtomicUsize,
    sealed: AtomicBool,
}

impl DiskFrameStore {
    pub async fn create(root: &Path, session_id: &str) -> Result<Self> {
        let dir = root.join(session_id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create frame directory {}", dir.display()))?;

        debug!("Frame store ready at {}", dir.display());

        Ok(Self {
            dir,
            state: Mutex::new(DiskState {
                next_index: 0,
                sealed: false,
            }),
            count: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Removes session directories left under `root`, e.g. by a crash
    /// mid-capture. Only call while no session is active.
    ///
    /// `root` may be user-chosen, so only directories holding nothing but
    /// frame files are removed, and only if they carry a session id name or
    /// at least one frame. Anything else is left alone.
    pub async fn purge_root(root: &Path) -> Result<usize> {
        let mut entries = match fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to list frame root {}", root.display()))
            }
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            if !is_session_dir(&path).await? {
                debug!("Leaving {} alone: not a frame directory", path.display());
                continue;
            }
            fs::remove_dir_all(&path)
                .await
                .with_context(|| format!("failed to remove {}", path.display()))?;
            removed += 1;
        }

        if removed > 0 {
            info!("Removed {} stale frame directories from {}", removed, root.display());
        }
        Ok(removed)
    }
}

fn is_frame_entry(name: &str) -> bool {
    let name = name.strip_suffix(".tmp").unwrap_or(name);
    parse_frame_file_name(name).is_some()
}

async fn is_session_dir(dir: &Path) -> Result<bool> {
    let named_like_session = dir
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| Uuid::parse_str(name).is_ok());

    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to list {}", dir.display()))?;
    let mut frames = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        let is_frame = entry.file_type().await?.is_file()
            && entry.file_name().to_str().is_some_and(is_frame_entry);
        if !is_frame {
            return Ok(false);
        }
        frames += 1;
    }
    Ok(named_like_session || frames > 0)
}

#[async_trait]
impl FrameStore for DiskFrameStore {
    async fn append(&self, image: Vec<u8>, captured_at: DateTime<Utc>) -> Result<Option<Frame>> {
        let mut state = self.state.lock().await;
        if state.sealed {
            return Ok(None);
        }

        fs::create_dir_all(&self.dir).await?;

        let index = state.next_index;
        let path = self.dir.join(frame_file_name(index));
        let tmp_path = path.with_extension("png.tmp");

        fs::write(&tmp_path, &image)
            .await
            .with_context(|| format!("failed to write frame {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("failed to finalize frame {}", path.display()))?;

        state.next_index += 1;
        self.count.fetch_add(1, Ordering::SeqCst);

        Ok(Some(Frame {
            index,
            captured_at,
            payload: FramePayload::File(path),
        }))
    }

    async fn read_all(&self) -> Result<Vec<Frame>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to list {}", self.dir.display()))
            }
        };

        let mut frames = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(index) = name.to_str().and_then(parse_frame_file_name) else {
                continue;
            };
            let captured_at = entry
                .metadata()
                .await
                .ok()
                .and_then(|meta| meta.modified().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);

            frames.push(Frame {
                index,
                captured_at,
                payload: FramePayload::File(entry.path()),
            });
        }

        frames.sort_by_key(|frame| frame.index);
        Ok(frames)
    }

    fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn seal(&self) {
        let mut state = self.state.lock().await;
        state.sealed = true;
        self.sealed.store(true, Ordering::SeqCst);
    }

    fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    async fn clear(&self) -> Result<()> {
        let _state = self.state.lock().await;
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                debug!("Removed frame directory {}", self.dir.display());
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to remove {}", self.dir.display()))
            }
        }
        self.count.store(0, Ordering::SeqCst);
        Ok(())
    }
}
