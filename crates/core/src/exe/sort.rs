use crate::backend::{rows_stream, RowStream};
use crate::err::Result;
use crate::exe::{collect_rows, stats, ExecContext, Node, PlanNode};
use crate::exp::CompiledExpr;
use crate::sql::{Row, Value};
use async_trait::async_trait;
use std::cmp::Ordering;

/// One sort key.
pub struct SortKey {
	pub expr: CompiledExpr,
	pub descending: bool,
	pub display: String,
}

/// Client-side ORDER BY: materializes the input (memory-capped), sorts,
/// and replays. NULLs order first ascending, matching the backend.
pub struct Sort {
	pub child: Node,
	pub keys: Vec<SortKey>,
}

impl Sort {
	fn compare(values_a: &[Value], values_b: &[Value], keys: &[SortKey]) -> Ordering {
		for (i, key) in keys.iter().enumerate() {
			let a = &values_a[i];
			let b = &values_b[i];
			let ordering = match (a.is_null(), b.is_null()) {
				(true, true) => Ordering::Equal,
				(true, false) => Ordering::Less,
				(false, true) => Ordering::Greater,
				(false, false) => a.compare(b).ok().flatten().unwrap_or(Ordering::Equal),
			};
			let ordering = if key.descending {
				ordering.reverse()
			} else {
				ordering
			};
			if ordering != Ordering::Equal {
				return ordering;
			}
		}
		Ordering::Equal
	}
}

#[async_trait]
impl PlanNode for Sort {
	fn describe(&self) -> String {
		let keys: Vec<String> = self
			.keys
			.iter()
			.map(|k| {
				if k.descending {
					format!("{} DESC", k.display)
				} else {
					k.display.clone()
				}
			})
			.collect();
		format!("Sort: {}", keys.join(", "))
	}

	fn children(&self) -> Vec<Node> {
		vec![self.child.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let rows = collect_rows(&self.child, ctx).await?;
		let bindings = ctx.bindings();
		// Evaluate every key once per row before sorting.
		let mut keyed: Vec<(Vec<Value>, Row)> = Vec::with_capacity(rows.len());
		for row in rows {
			let mut values = Vec::with_capacity(self.keys.len());
			for key in &self.keys {
				values.push((key.expr)(&row, &bindings)?);
			}
			keyed.push((values, row));
		}
		keyed.sort_by(|(a, _), (b, _)| Self::compare(a, b, &self.keys));
		let sorted: Vec<Row> = keyed.into_iter().map(|(_, row)| row).collect();
		Ok(stats::instrument(self.describe(), ctx.stats.clone(), rows_stream(sorted)))
	}
}
