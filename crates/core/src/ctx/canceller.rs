use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A handle that cancels its originating context, and that context's
/// children, when called.
#[derive(Clone, Debug, Default)]
pub struct Canceller {
	cancelled: Arc<AtomicBool>,
}

impl Canceller {
	/// Create a new canceller over the given flag.
	pub(super) fn new(cancelled: Arc<AtomicBool>) -> Canceller {
		Canceller {
			cancelled,
		}
	}

	/// Cancel the context.
	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::Relaxed);
	}
}
