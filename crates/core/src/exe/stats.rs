//! Per-request execution statistics: total rows and pages, and per-node
//! timings for EXPLAIN ANALYZE and telemetry.

use crate::backend::RowStream;
use futures::Stream;
use pin_project_lite::pin_project;
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// The timing record of one plan node.
#[derive(Clone, Debug, Serialize)]
#[non_exhaustive]
pub struct NodeTiming {
	pub node: String,
	pub rows: u64,
	pub elapsed_ms: u64,
}

/// The per-request statistics accumulator. Shared across nodes through the
/// execution context; never shared across requests.
#[derive(Debug, Default)]
pub struct Statistics {
	rows: AtomicU64,
	pages: AtomicU64,
	nodes: Mutex<Vec<NodeTiming>>,
}

impl Statistics {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record one row emitted from a scan.
	pub fn add_row(&self) {
		self.rows.fetch_add(1, Ordering::Relaxed);
	}

	/// Record one backend page fetched.
	pub fn add_page(&self) {
		self.pages.fetch_add(1, Ordering::Relaxed);
	}

	pub fn rows(&self) -> u64 {
		self.rows.load(Ordering::Relaxed)
	}

	pub fn pages(&self) -> u64 {
		self.pages.load(Ordering::Relaxed)
	}

	fn record_node(&self, node: String, rows: u64, elapsed: Duration) {
		let mut nodes = self.nodes.lock().expect("statistics lock poisoned");
		nodes.push(NodeTiming {
			node,
			rows,
			elapsed_ms: elapsed.as_millis() as u64,
		});
	}

	/// The per-node timings recorded so far.
	pub fn node_timings(&self) -> Vec<NodeTiming> {
		self.nodes.lock().expect("statistics lock poisoned").clone()
	}
}

pin_project! {
	/// A stream wrapper counting rows and wall time for one node. The
	/// timing is recorded when the stream is dropped, so cancelled and
	/// partially-consumed nodes still report.
	struct Instrumented {
		#[pin]
		inner: RowStream,
		description: String,
		stats: Arc<Statistics>,
		rows: u64,
		started: Instant,
		recorded: bool,
	}

	impl PinnedDrop for Instrumented {
		fn drop(this: Pin<&mut Self>) {
			let this = this.project();
			if !*this.recorded {
				this.stats.record_node(
					std::mem::take(this.description),
					*this.rows,
					this.started.elapsed(),
				);
			}
		}
	}
}

impl Stream for Instrumented {
	type Item = crate::err::Result<crate::sql::Row>;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.project();
		let polled = this.inner.poll_next(cx);
		if let Poll::Ready(Some(Ok(_))) = polled {
			*this.rows += 1;
		}
		polled
	}
}

/// Wrap a node's output stream with row counting and timing.
pub fn instrument(description: String, stats: Arc<Statistics>, inner: RowStream) -> RowStream {
	Box::pin(Instrumented {
		inner,
		description,
		stats,
		rows: 0,
		started: Instant::now(),
		recorded: false,
	})
}
