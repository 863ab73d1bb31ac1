use crate::backend::RowStream;
use crate::err::Result;
use crate::exe::{ExecContext, Node, PlanNode};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::TryStreamExt;
use std::collections::HashSet;

/// Hash-deduplication over a pre-specified key set. Used by DISTINCT and
/// UNION. String keys fold case by default, matching the engine's
/// collation.
pub struct Distinct {
	pub child: Node,
	pub key_columns: Vec<String>,
	pub case_insensitive: bool,
}

#[async_trait]
impl PlanNode for Distinct {
	fn describe(&self) -> String {
		format!("Distinct: {}", self.key_columns.join(", "))
	}

	fn children(&self) -> Vec<Node> {
		vec![self.child.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let mut input = self.child.execute(ctx).await?;
		let keys = self.key_columns.clone();
		let case_insensitive = self.case_insensitive;
		let ctx = ctx.clone();
		let stream = try_stream! {
			let mut seen: HashSet<String> = HashSet::new();
			while let Some(row) = input.try_next().await? {
				ctx.check()?;
				let key = row.key_of(&keys, case_insensitive);
				if seen.insert(key) {
					ctx.check_materialized(seen.len())?;
					yield row;
				}
			}
		};
		Ok(Box::pin(stream))
	}
}
