//! Page-ahead buffering around paged scans: one background producer per
//! wrapped scan, writing into a bounded channel sized to roughly one
//! backend page. Order-preserving by construction.

use crate::backend::RowStream;
use crate::err::Result;
use crate::exe::{ExecContext, Node, PlanNode};
use crate::sql::Row;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::TryStreamExt;

/// Wraps a scan with a bounded background fetcher. The producer blocks
/// when the buffer fills; the consumer blocks when it drains. Memory use
/// is bounded to the buffer size ahead of the consumer.
pub struct Prefetch {
	pub child: Node,
	pub buffer_size: usize,
}

#[async_trait]
impl PlanNode for Prefetch {
	fn describe(&self) -> String {
		format!("Prefetch: buffer {}", self.buffer_size)
	}

	fn children(&self) -> Vec<Node> {
		vec![self.child.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let mut input = self.child.execute(ctx).await?;
		let (sender, receiver) = channel::bounded::<Result<Row>>(self.buffer_size.max(1));
		let producer_ctx = ctx.clone();
		tokio::spawn(async move {
			loop {
				if producer_ctx.ctx.is_done() {
					// Cancellation: stop pulling and release the channel.
					break;
				}
				match input.try_next().await {
					Ok(Some(row)) => {
						// A send failure means the consumer hung up.
						if sender.send(Ok(row)).await.is_err() {
							break;
						}
					}
					Ok(None) => break,
					Err(error) => {
						let _ = sender.send(Err(error)).await;
						break;
					}
				}
			}
		});
		let ctx = ctx.clone();
		let stream = try_stream! {
			while let Ok(item) = receiver.recv().await {
				ctx.check()?;
				let row = item?;
				yield row;
			}
			// The producer hung up: surface cancellation if that is why.
			ctx.check()?;
		};
		Ok(Box::pin(stream))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::rows_stream;
	use crate::sql::Value;
	use std::sync::Arc;

	struct Numbers {
		n: usize,
	}

	#[async_trait]
	impl PlanNode for Numbers {
		fn describe(&self) -> String {
			"Numbers".to_owned()
		}

		async fn execute(&self, _: &ExecContext) -> Result<RowStream> {
			let rows = (0..self.n)
				.map(|i| {
					let mut row = Row::new();
					row.set("n", Value::Int(i as i32));
					row
				})
				.collect();
			Ok(rows_stream(rows))
		}
	}

	#[tokio::test]
	async fn prefetch_preserves_order() {
		let prefetch = Prefetch {
			child: Arc::new(Numbers {
				n: 100,
			}),
			buffer_size: 8,
		};
		let ctx = crate::dbs::test_context();
		let mut stream = prefetch.execute(&ctx).await.unwrap();
		let mut expected = 0;
		while let Some(row) = stream.try_next().await.unwrap() {
			assert_eq!(row.get("n"), Some(&Value::Int(expected)));
			expected += 1;
		}
		assert_eq!(expected, 100);
	}
}
