use crate::backend::RowStream;
use crate::err::Result;
use crate::exe::{ExecContext, Node, PlanNode};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::TryStreamExt;

/// Yields all rows of each child in order. UNION ALL, and the backbone of
/// script result streaming.
pub struct Concatenate {
	pub children: Vec<Node>,
}

#[async_trait]
impl PlanNode for Concatenate {
	fn describe(&self) -> String {
		format!("Concatenate: {} inputs", self.children.len())
	}

	fn children(&self) -> Vec<Node> {
		self.children.clone()
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let children = self.children.clone();
		let ctx = ctx.clone();
		let stream = try_stream! {
			for child in children {
				let mut input = child.execute(&ctx).await?;
				while let Some(row) = input.try_next().await? {
					ctx.check()?;
					yield row;
				}
			}
		};
		Ok(Box::pin(stream))
	}
}
