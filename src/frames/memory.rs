use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Frame, FramePayload, FrameStore};

#[derive(Default)]
struct Inner {
    frames: Vec<Frame>,
    next_index: u64,
    sealed: bool,
}

/// Frames held as in-memory encoded buffers.
#[derive(Default)]
pub struct MemoryFrameStore {
    inner: Mutex<Inner>,
}

impl MemoryFrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl FrameStore for MemoryFrameStore {
    async fn append(&self, image: Vec<u8>, captured_at: DateTime<Utc>) -> Result<Option<Frame>> {
        let mut inner = self.lock();
        if inner.sealed {
            return Ok(None);
        }

        let frame = Frame {
            index: inner.next_index,
            captured_at,
            payload: FramePayload::Bytes(Arc::from(image)),
        };
        inner.next_index += 1;
        inner.frames.push(frame.clone());
        Ok(Some(frame))
    }

    async fn read_all(&self) -> Result<Vec<Frame>> {
        Ok(self.lock().frames.clone())
    }

    fn len(&self) -> usize {
        self.lock().frames.len()
    }

    async fn seal(&self) {
        self.lock().sealed = true;
    }

    fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.frames.clear();
        inner.frames.shrink_to_fit();
        Ok(())
    }
}
