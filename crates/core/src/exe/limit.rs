use crate::backend::RowStream;
use crate::err::Result;
use crate::exe::{ExecContext, Node, PlanNode};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::TryStreamExt;

/// Client-side TOP and OFFSET/FETCH: skips, then takes, then stops pulling
/// from the child.
pub struct Limit {
	pub child: Node,
	pub skip: Option<u64>,
	pub take: Option<u64>,
}

#[async_trait]
impl PlanNode for Limit {
	fn describe(&self) -> String {
		match (self.skip, self.take) {
			(Some(skip), Some(take)) => format!("Limit: skip {skip}, take {take}"),
			(Some(skip), None) => format!("Limit: skip {skip}"),
			(None, Some(take)) => format!("Limit: take {take}"),
			(None, None) => "Limit".to_owned(),
		}
	}

	fn children(&self) -> Vec<Node> {
		vec![self.child.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let mut input = self.child.execute(ctx).await?;
		let skip = self.skip.unwrap_or(0);
		let take = self.take;
		let ctx = ctx.clone();
		let stream = try_stream! {
			let mut seen: u64 = 0;
			let mut taken: u64 = 0;
			while let Some(row) = input.try_next().await? {
				ctx.check()?;
				seen += 1;
				if seen <= skip {
					continue;
				}
				if take.is_some_and(|t| taken >= t) {
					break;
				}
				taken += 1;
				yield row;
				if take.is_some_and(|t| taken >= t) {
					break;
				}
			}
		};
		Ok(Box::pin(stream))
	}
}
