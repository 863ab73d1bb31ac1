use serde::{Deserialize, Serialize};
use std::fmt;

/// A per-query hint from an OPTION clause.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Hint {
	/// Override the bulk write batch size.
	BatchSize(u32),
	/// Clamp the effective parallelism of partitioned execution.
	MaxDop(u32),
	/// Ask the bulk write executor to bypass synchronous plugins.
	BypassPlugins,
	/// Ask the bulk write executor to bypass flows.
	BypassFlows,
	/// Route the query to the TDS read replica.
	UseTds,
	/// Emit the FetchXML no-lock attribute.
	NoLock,
	/// Force client-side hash aggregation even when the group is pushable.
	HashGroup,
	/// Force merge joins over the default hash joins.
	MergeJoin,
	/// Cap the number of rows the query may return.
	MaxRows(u64),
	/// Override the recursion ceiling for recursive CTEs.
	MaxRecursion(u32),
}

impl fmt::Display for Hint {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Hint::BatchSize(n) => write!(f, "BATCH_SIZE {n}"),
			Hint::MaxDop(n) => write!(f, "MAXDOP {n}"),
			Hint::BypassPlugins => f.write_str("BYPASS_PLUGINS"),
			Hint::BypassFlows => f.write_str("BYPASS_FLOWS"),
			Hint::UseTds => f.write_str("USE_TDS"),
			Hint::NoLock => f.write_str("NOLOCK"),
			Hint::HashGroup => f.write_str("HASH GROUP"),
			Hint::MergeJoin => f.write_str("MERGE JOIN"),
			Hint::MaxRows(n) => write!(f, "MAX_ROWS {n}"),
			Hint::MaxRecursion(n) => write!(f, "MAXRECURSION {n}"),
		}
	}
}
