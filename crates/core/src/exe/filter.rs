use crate::backend::RowStream;
use crate::err::Result;
use crate::exe::{ExecContext, Node, PlanNode};
use crate::exp::CompiledCond;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::TryStreamExt;

/// Drops rows for which the predicate is not true. Used for residual WHERE
/// clauses the backend cannot evaluate, and for HAVING over aggregates.
pub struct ClientFilter {
	pub child: Node,
	pub predicate: CompiledCond,
	/// The printed predicate, for EXPLAIN.
	pub display: String,
}

#[async_trait]
impl PlanNode for ClientFilter {
	fn describe(&self) -> String {
		format!("ClientFilter: {}", self.display)
	}

	fn children(&self) -> Vec<Node> {
		vec![self.child.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let mut input = self.child.execute(ctx).await?;
		let predicate = self.predicate.clone();
		let bindings = ctx.bindings();
		let ctx = ctx.clone();
		let stream = try_stream! {
			while let Some(row) = input.try_next().await? {
				ctx.check()?;
				if predicate(&row, &bindings)?.is_true() {
					yield row;
				}
			}
		};
		Ok(Box::pin(stream))
	}
}
