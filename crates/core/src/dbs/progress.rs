use serde::Serialize;
use std::fmt;

/// The coarse phases a request moves through.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub enum Phase {
	Executing,
	Partitioning,
	Aggregating,
	Writing,
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Phase::Executing => f.write_str("Executing"),
			Phase::Partitioning => f.write_str("Partitioning"),
			Phase::Aggregating => f.write_str("Aggregating"),
			Phase::Writing => f.write_str("Writing"),
		}
	}
}

/// A sink for phase changes and incremental progress counts. DML nodes
/// report per batch; parallel partitions report per completed partition.
pub trait Progress: Send + Sync {
	/// The request entered a new phase.
	fn phase(&self, phase: Phase);

	/// `count` more units of the current phase completed.
	fn advance(&self, count: u64);
}

/// A progress sink that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgress;

impl Progress for NoopProgress {
	fn phase(&self, _: Phase) {}
	fn advance(&self, _: u64) {}
}
