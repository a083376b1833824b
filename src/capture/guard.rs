use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-slot "capture in flight" flag.
///
/// At most one camera read may be outstanding. `try_begin` atomically
/// claims the slot and hands back a token that frees it on `end` or drop.
#[derive(Debug, Default)]
pub struct CaptureGuard {
    in_flight: AtomicBool,
}

impl CaptureGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_begin(self: &Arc<Self>) -> Option<InFlight> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight {
                guard: Arc::clone(self),
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct InFlight {
    guard: Arc<CaptureGuard>,
}

impl InFlight {
    pub fn end(self) {}
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.guard.in_flight.store(false, Ordering::Release);
    }
}
