use crate::ctx::canceller::Canceller;
use crate::ctx::reason::Reason;
use crate::err::{Error, Result};
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A frozen, shareable context.
pub type Context = Arc<MutableContext>;

/// A cancellation scope with an optional deadline and an optional parent.
/// Cancellation propagates monotonically: cancelling a context is observed
/// by all of its children, while a child cancels independently of its
/// parent.
#[non_exhaustive]
pub struct MutableContext {
	// An optional parent context.
	parent: Option<Context>,
	// An optional deadline.
	deadline: Option<Instant>,
	// The timeout this context's deadline was derived from, for messages.
	timeout: Option<Duration>,
	// Whether or not this context is cancelled.
	cancelled: Arc<AtomicBool>,
}

impl Default for MutableContext {
	fn default() -> Self {
		MutableContext::background()
	}
}

impl Debug for MutableContext {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("Context")
			.field("deadline", &self.deadline)
			.field("cancelled", &self.cancelled)
			.finish()
	}
}

impl MutableContext {
	/// Create an empty background context.
	pub fn background() -> Self {
		MutableContext {
			parent: None,
			deadline: None,
			timeout: None,
			cancelled: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Create a new child from a frozen context.
	pub fn new(parent: &Context) -> Self {
		MutableContext {
			deadline: parent.deadline,
			timeout: parent.timeout,
			cancelled: Arc::new(AtomicBool::new(false)),
			parent: Some(parent.clone()),
		}
	}

	/// Freeze the context for sharing.
	pub fn freeze(self) -> Context {
		Arc::new(self)
	}

	/// Add cancellation to the context. The returned value cancels this
	/// context and its children once called.
	pub fn add_cancel(&mut self) -> Canceller {
		Canceller::new(self.cancelled.clone())
	}

	/// Add a deadline to the context. An already-sooner deadline wins.
	pub fn add_deadline(&mut self, deadline: Instant) {
		match self.deadline {
			Some(current) if current < deadline => (),
			_ => self.deadline = Some(deadline),
		}
	}

	/// Add a timeout to the context. Fails when the timeout overflows the
	/// clock.
	pub fn add_timeout(&mut self, timeout: Duration) -> Result<()> {
		match Instant::now().checked_add(timeout) {
			Some(deadline) => {
				self.add_deadline(deadline);
				self.timeout = Some(timeout);
				Ok(())
			}
			None => Err(Error::InvalidTimeout(timeout.as_secs())),
		}
	}

	/// The remaining time before the deadline, if one is set.
	pub fn timeout(&self) -> Option<Duration> {
		self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
	}

	/// Check if the context is done. `None` means the operation may
	/// proceed.
	pub fn done(&self) -> Option<Reason> {
		match self.deadline {
			Some(deadline) if deadline <= Instant::now() => {
				Some(Reason::Timedout(self.timeout.unwrap_or_default()))
			}
			_ if self.cancelled.load(Ordering::Relaxed) => Some(Reason::Canceled),
			_ => match &self.parent {
				Some(parent) => parent.done(),
				None => None,
			},
		}
	}

	/// Check if the context is ok to continue.
	pub fn is_ok(&self) -> bool {
		self.done().is_none()
	}

	/// Check if the context is not ok to continue.
	pub fn is_done(&self) -> bool {
		self.done().is_some()
	}

	/// Fail with the matching error when the context is done. Plan nodes
	/// call this between rows and between pages.
	pub fn check(&self) -> Result<()> {
		match self.done() {
			Some(reason) => Err(reason.into_error()),
			None => Ok(()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cancel_propagates_to_children() {
		let mut root = MutableContext::background();
		let canceller = root.add_cancel();
		let root = root.freeze();
		let child = MutableContext::new(&root).freeze();
		assert!(child.is_ok());
		canceller.cancel();
		assert!(child.is_done());
		assert!(matches!(child.done(), Some(Reason::Canceled)));
	}

	#[test]
	fn child_cancel_leaves_parent_alone() {
		let root = MutableContext::background().freeze();
		let mut child = MutableContext::new(&root);
		let canceller = child.add_cancel();
		let child = child.freeze();
		canceller.cancel();
		assert!(child.is_done());
		assert!(root.is_ok());
	}

	#[test]
	fn expired_deadline_reports_timeout() {
		let mut ctx = MutableContext::background();
		ctx.add_timeout(Duration::from_millis(0)).unwrap();
		let ctx = ctx.freeze();
		std::thread::sleep(Duration::from_millis(2));
		assert!(matches!(ctx.done(), Some(Reason::Timedout(_))));
		assert!(matches!(ctx.check(), Err(Error::QueryTimedout { .. })));
	}
}
