//! Projection, including virtual `*name` companion expansion for lookup
//! and option-set columns.

use crate::backend::RowStream;
use crate::err::Result;
use crate::exe::{ExecContext, Node, PlanNode};
use crate::exp::CompiledExpr;
use crate::sql::{Column, Row, Value};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::TryStreamExt;

/// One output column of a projection.
pub struct ProjectColumn {
	pub column: Column,
	pub expr: CompiledExpr,
	/// The printed source expression, for EXPLAIN.
	pub display: String,
	/// Emit a `<name>name` companion carrying the value's display string.
	/// Set for lookup and option-set columns the user did not already
	/// project a companion for.
	pub expand_name: bool,
}

/// Evaluates each output column per input row. Rows leaving a projection
/// have exactly the declared columns, in declared order.
pub struct Project {
	pub child: Node,
	pub columns: Vec<ProjectColumn>,
}

impl Project {
	/// The output descriptors, companions included.
	pub fn descriptors(&self) -> Vec<Column> {
		let mut out = Vec::with_capacity(self.columns.len());
		for column in &self.columns {
			out.push(column.column.clone());
			if column.expand_name {
				out.push(column.column.name_companion());
			}
		}
		out
	}
}

/// Renames a child's columns positionally, for CTE declared column lists.
pub struct RenameColumns {
	pub child: Node,
	pub names: Vec<String>,
}

#[async_trait]
impl PlanNode for RenameColumns {
	fn describe(&self) -> String {
		format!("Rename: {}", self.names.join(", "))
	}

	fn children(&self) -> Vec<Node> {
		vec![self.child.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let mut input = self.child.execute(ctx).await?;
		let names = self.names.clone();
		let ctx = ctx.clone();
		let stream = try_stream! {
			while let Some(row) = input.try_next().await? {
				ctx.check()?;
				let mut out = Row::new();
				for (i, (_, value)) in row.iter().enumerate() {
					match names.get(i) {
						Some(name) => out.set(name, value.clone()),
						None => break,
					}
				}
				yield out;
			}
		};
		Ok(Box::pin(stream))
	}
}

#[async_trait]
impl PlanNode for Project {
	fn describe(&self) -> String {
		let parts: Vec<String> = self
			.columns
			.iter()
			.map(|c| {
				if c.display == c.column.name {
					c.display.clone()
				} else {
					format!("{} as {}", c.display, c.column.name)
				}
			})
			.collect();
		format!("Project: {}", parts.join(", "))
	}

	fn children(&self) -> Vec<Node> {
		vec![self.child.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let mut input = self.child.execute(ctx).await?;
		let bindings = ctx.bindings();
		let columns: Vec<(Column, CompiledExpr, bool)> = self
			.columns
			.iter()
			.map(|c| (c.column.clone(), c.expr.clone(), c.expand_name))
			.collect();
		let ctx = ctx.clone();
		let stream = try_stream! {
			while let Some(row) = input.try_next().await? {
				ctx.check()?;
				let mut out = match row.entity() {
					Some(entity) => Row::for_entity(entity),
					None => Row::new(),
				};
				for (column, expr, expand) in &columns {
					let value = expr(&row, &bindings)?;
					if *expand {
						let companion = match value.display_name() {
							Some(name) => Value::Strand(name.to_owned()),
							None => Value::Null,
						};
						out.set(&column.name, value);
						out.set(format!("{}name", column.name), companion);
					} else {
						out.set(&column.name, value);
					}
				}
				yield out;
			}
		};
		Ok(Box::pin(stream))
	}
}
