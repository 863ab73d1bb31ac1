//! Scalar subquery evaluation with its at-most-one-row assertion.

use crate::backend::RowStream;
use crate::err::{Error, Result};
use crate::exe::{ExecContext, Node, PlanNode};
use crate::sql::Value;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::TryStreamExt;

/// Evaluates an uncorrelated scalar subquery once, asserts it produced at
/// most one row, and appends its value to every row of the input as a
/// generated column the rewritten outer expression references.
pub struct ScalarSubquery {
	pub input: Node,
	pub subplan: Node,
	pub output: String,
}

#[async_trait]
impl PlanNode for ScalarSubquery {
	fn describe(&self) -> String {
		format!("ScalarSubquery: {}", self.output)
	}

	fn children(&self) -> Vec<Node> {
		vec![self.input.clone(), self.subplan.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let mut rows = self.subplan.execute(ctx).await?;
		let value = match rows.try_next().await? {
			None => Value::Null,
			Some(first) => {
				if rows.try_next().await?.is_some() {
					return Err(Error::SubqueryTooManyRows);
				}
				first.iter().next().map(|(_, v)| v.clone()).unwrap_or(Value::Null)
			}
		};
		let mut input = self.input.execute(ctx).await?;
		let output = self.output.clone();
		let ctx = ctx.clone();
		let stream = try_stream! {
			while let Some(row) = input.try_next().await? {
				ctx.check()?;
				let mut row = row;
				row.set(&output, value.clone());
				yield row;
			}
		};
		Ok(Box::pin(stream))
	}
}
