//! Bounded-concurrency execution of partitioned subtrees, used by the
//! aggregate-partitioning strategy that works around the backend's 50k
//! aggregate ceiling.

use crate::backend::{rows_stream, RowStream};
use crate::cnf::AGGREGATE_RECORD_LIMIT;
use crate::dbs::progress::Phase;
use crate::err::{first_meaningful, Error, Result};
use crate::exe::{collect_rows, ExecContext, Node, PlanNode};
use crate::sql::Row;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Executes its partition subtrees concurrently under a semaphore sized to
/// the pool's logical capacity (clamped by the max-parallelism option),
/// reporting progress per completed partition and collecting every
/// partition's rows. Partition order is not preserved; the downstream
/// merge aggregate is insensitive to it.
pub struct ParallelPartition {
	pub partitions: Vec<Node>,
	pub max_parallelism: Option<usize>,
}

impl ParallelPartition {
	/// The effective concurrency for this node under the given context.
	pub fn effective_parallelism(&self, ctx: &ExecContext) -> usize {
		let capacity = ctx.options.pool_capacity.unwrap_or_else(|| ctx.env.capacity());
		let clamp = self.max_parallelism.or(ctx.options.max_parallelism);
		clamp.map_or(capacity, |m| capacity.min(m)).max(1)
	}
}

#[async_trait]
impl PlanNode for ParallelPartition {
	fn describe(&self) -> String {
		format!("ParallelPartition: {} partitions", self.partitions.len())
	}

	fn children(&self) -> Vec<Node> {
		self.partitions.clone()
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let parallelism = self.effective_parallelism(ctx);
		let semaphore = Arc::new(Semaphore::new(parallelism));
		ctx.progress.phase(Phase::Partitioning);
		tracing::debug!(
			partitions = self.partitions.len(),
			parallelism,
			"executing partitioned aggregate",
		);
		let mut handles = Vec::with_capacity(self.partitions.len());
		for partition in self.partitions.iter().cloned() {
			let semaphore = semaphore.clone();
			let ctx = ctx.clone();
			handles.push(tokio::spawn(async move {
				let _permit = semaphore
					.acquire()
					.await
					.map_err(|_| Error::Unreachable("partition semaphore closed"))?;
				let rows = collect_rows(&partition, &ctx).await?;
				ctx.progress.advance(1);
				Ok::<Vec<Row>, Error>(rows)
			}));
		}
		let mut rows = Vec::new();
		let mut errors = Vec::new();
		for handle in handles {
			match handle.await {
				Ok(Ok(partition_rows)) => rows.extend(partition_rows),
				Ok(Err(error)) => errors.push(error),
				Err(join_error) => errors.push(Error::Unreachable(if join_error.is_panic() {
					"partition task panicked"
				} else {
					"partition task was aborted"
				})),
			}
		}
		// Flatten before inspection: an inner aggregate-limit fault means
		// partitioning was already tried and still failed, which is
		// surfaced to the user under its own code. Cancellations lose to
		// any meaningful sibling error.
		if let Some(error) = first_meaningful(errors) {
			if error.is_aggregate_limit() {
				return Err(Error::AggregateLimitExceeded {
					limit: AGGREGATE_RECORD_LIMIT,
				});
			}
			return Err(error);
		}
		ctx.progress.phase(Phase::Aggregating);
		Ok(rows_stream(rows))
	}
}
