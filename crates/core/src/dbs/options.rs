use crate::cnf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Plan-time and run-time options for one request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Options {
	/// Wrap paged scans with a page-ahead prefetcher.
	pub prefetch: bool,
	/// How many rows the prefetcher may buffer ahead of the consumer.
	pub prefetch_buffer: usize,
	/// The cap on rows any single node may hold in memory.
	pub max_materialization_rows: usize,
	/// An overall cap on returned rows, when set.
	pub max_rows: Option<u64>,
	/// A clamp on partitioned-aggregate concurrency.
	pub max_parallelism: Option<usize>,
	/// The wall-clock budget for the request.
	pub timeout: Duration,
	/// Route eligible SELECTs to the TDS read replica.
	pub use_replica: bool,
	/// Override the environment's advertised pool capacity.
	pub pool_capacity: Option<usize>,
}

impl Default for Options {
	fn default() -> Self {
		Options {
			prefetch: true,
			prefetch_buffer: *cnf::PREFETCH_BUFFER_SIZE,
			max_materialization_rows: *cnf::MAX_MATERIALIZATION_ROWS,
			max_rows: None,
			max_parallelism: None,
			timeout: Duration::from_millis(*cnf::QUERY_TIMEOUT_MS),
			use_replica: false,
			pool_capacity: None,
		}
	}
}

/// The write-safety posture of one request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub struct DmlSafety {
	/// The caller explicitly confirmed dangerous writes, such as DML
	/// without a WHERE clause or writes into a production environment.
	pub confirmed: bool,
	/// Plan and validate, but do not call the bulk write executor.
	pub dry_run: bool,
	/// Lift the DML row cap.
	pub no_limit: bool,
	/// The cap on rows one DML statement may touch.
	pub row_cap: u64,
}

impl Default for DmlSafety {
	fn default() -> Self {
		DmlSafety {
			confirmed: false,
			dry_run: false,
			no_limit: false,
			row_cap: *cnf::DML_ROW_CAP,
		}
	}
}

impl DmlSafety {
	/// The effective row cap: none when the caller passed no-limit.
	pub fn effective_row_cap(&self) -> Option<u64> {
		if self.no_limit {
			None
		} else {
			Some(self.row_cap)
		}
	}
}
