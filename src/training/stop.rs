use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// A flag shared between a running trainer and whoever wants it to stop.
///
/// The trainer checks it between batches, so the batch in flight always finishes.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every holder of this signal to stop.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
