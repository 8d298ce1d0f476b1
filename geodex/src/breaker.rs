//! Cooperative cancellation for long-running queries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag, polled between index cell visits.
///
/// Tripping the breaker makes the running query return its partial result
/// with the `aborted` marker set instead of raising an error. Callers
/// compose deadlines by tripping the breaker from a timer thread.
#[derive(Clone, Default)]
pub struct Breaker {
    tripped: Arc<AtomicBool>,
}

impl Breaker {
    pub fn new() -> Breaker {
        Breaker::default()
    }

    pub fn trip(&self) {
        self.tripped.store(true, Ordering::Relaxed);
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }

    /// Re-arm the breaker for the next operation.
    pub fn reset(&self) {
        self.tripped.store(false, Ordering::Relaxed);
    }
}
