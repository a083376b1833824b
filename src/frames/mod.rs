//! Ordered, append-only storage for captured frames.
//!
//! The capture loop is the only writer while a session runs; the synthesis
//! engine is the only reader, and only after the store has been sealed by the
//! drain barrier. Sealing is what guarantees the sequence handed to synthesis
//! can no longer grow.

mod disk;
mod frame;
mod memory;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use disk::DiskFrameStore;
pub use frame::{frame_file_name, parse_frame_file_name, Frame, FramePayload};
pub use memory::MemoryFrameStore;

use crate::config::FrameStoreKind;

#[async_trait]
pub trait FrameStore: Send + Sync {
    /// Appends an encoded image and assigns it the next index.
    ///
    /// Returns `Ok(None)` once the store is sealed; a capture that completes
    /// after the drain barrier is discarded rather than appended.
    async fn append(&self, image: Vec<u8>, captured_at: DateTime<Utc>) -> Result<Option<Frame>>;

    /// The full sequence in index order.
    async fn read_all(&self) -> Result<Vec<Frame>>;

    /// Number of frames currently stored.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting appends. Waits for an append already in progress.
    async fn seal(&self);

    fn is_sealed(&self) -> bool;

    /// Deletes every frame. Safe to call on an empty or cleared store.
    async fn clear(&self) -> Result<()>;
}

/// Opens the store for one session according to the configured kind.
pub async fn open_store(
    kind: &FrameStoreKind,
    frame_root: &Path,
    session_id: &str,
) -> Result<Arc<dyn FrameStore>> {
    match kind {
        FrameStoreKind::Memory => Ok(Arc::new(MemoryFrameStore::new())),
        FrameStoreKind::Disk => {
            let store = DiskFrameStore::create(frame_root, session_id).await?;
            Ok(Arc::new(store))
        }
    }
}
