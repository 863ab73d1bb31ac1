//! Spools: shared materialization points for CTE reuse and correlated
//! probing. The plan tree stays a strict tree; reuse is expressed by
//! materializing a child once into a spool and letting downstream nodes
//! consume from it.

use crate::backend::{rows_stream, RowStream};
use crate::err::Result;
use crate::exe::{collect_rows, ExecContext, Node, PlanNode};
use crate::exp::CompiledExpr;
use crate::sql::Row;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::TryStreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Materializes its child on first execution and replays the rows on every
/// subsequent execution within the same request.
pub struct TableSpool {
	pub child: Node,
	cell: OnceCell<Vec<Row>>,
}

impl TableSpool {
	pub fn new(child: Node) -> Self {
		TableSpool {
			child,
			cell: OnceCell::new(),
		}
	}

	/// The materialized rows, loading the child on first call.
	pub async fn rows(&self, ctx: &ExecContext) -> Result<&Vec<Row>> {
		self.cell.get_or_try_init(|| collect_rows(&self.child, ctx)).await
	}
}

#[async_trait]
impl PlanNode for TableSpool {
	fn describe(&self) -> String {
		"TableSpool".to_owned()
	}

	fn children(&self) -> Vec<Node> {
		vec![self.child.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let rows = self.rows(ctx).await?.clone();
		Ok(rows_stream(rows))
	}
}

/// An indexed spool for correlated-subquery probing: materializes the
/// child once, indexed by a key column set, and answers point probes.
pub struct IndexSpool {
	pub child: Node,
	pub key_columns: Vec<String>,
	cell: OnceCell<(Vec<Row>, HashMap<String, Vec<usize>>)>,
}

impl IndexSpool {
	pub fn new(child: Node, key_columns: Vec<String>) -> Self {
		IndexSpool {
			child,
			key_columns,
			cell: OnceCell::new(),
		}
	}

	async fn load(&self, ctx: &ExecContext) -> Result<&(Vec<Row>, HashMap<String, Vec<usize>>)> {
		self.cell
			.get_or_try_init(|| async {
				let rows = collect_rows(&self.child, ctx).await?;
				let mut index: HashMap<String, Vec<usize>> = HashMap::new();
				for (i, row) in rows.iter().enumerate() {
					index.entry(row.key_of(&self.key_columns, true)).or_default().push(i);
				}
				Ok((rows, index))
			})
			.await
	}

	/// Whether any spooled row matches the probe key.
	pub async fn contains(&self, ctx: &ExecContext, key: &str) -> Result<bool> {
		let (_, index) = self.load(ctx).await?;
		Ok(index.contains_key(key))
	}
}

#[async_trait]
impl PlanNode for IndexSpool {
	fn describe(&self) -> String {
		format!("IndexSpool: keyed on {}", self.key_columns.join(", "))
	}

	fn children(&self) -> Vec<Node> {
		vec![self.child.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let (rows, _) = self.load(ctx).await?;
		Ok(rows_stream(rows.clone()))
	}
}

/// Probes an [`IndexSpool`] per outer row, keeping rows with (or, negated,
/// without) a spooled match. The executor behind correlated EXISTS.
pub struct IndexSpoolProbe {
	pub input: Node,
	pub spool: Arc<IndexSpool>,
	/// The outer-side key expressions, positionally matching the spool's
	/// key columns.
	pub outer_keys: Vec<CompiledExpr>,
	pub negated: bool,
}

#[async_trait]
impl PlanNode for IndexSpoolProbe {
	fn describe(&self) -> String {
		let kind = if self.negated {
			"anti"
		} else {
			"semi"
		};
		format!("IndexSpoolProbe ({kind})")
	}

	fn children(&self) -> Vec<Node> {
		vec![self.input.clone(), self.spool.clone() as Node]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let mut input = self.input.execute(ctx).await?;
		let spool = self.spool.clone();
		let outer_keys = self.outer_keys.clone();
		let negated = self.negated;
		let bindings = ctx.bindings();
		let ctx = ctx.clone();
		let stream = try_stream! {
			while let Some(row) = input.try_next().await? {
				ctx.check()?;
				let mut key = String::new();
				let mut null_key = false;
				for expr in &outer_keys {
					let value = expr(&row, &bindings)?;
					null_key |= value.is_null();
					key.push_str(&value.canonical_key(true));
					key.push('\u{1}');
				}
				// NULL keys never match the spool.
				let hit = !null_key && spool.contains(&ctx, &key).await?;
				if hit != negated {
					yield row;
				}
			}
		};
		Ok(Box::pin(stream))
	}
}
