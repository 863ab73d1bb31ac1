//! Window computation: ROW_NUMBER, RANK, DENSE_RANK, and per-window
//! aggregates, materialized per partition under the memory cap.

use crate::backend::{rows_stream, RowStream};
use crate::err::Result;
use crate::exe::aggregate::{Accumulator, AggregateFunction};
use crate::exe::{collect_rows, stats, ExecContext, Node, PlanNode};
use crate::exp::{Bindings, CompiledExpr};
use crate::sql::{Row, Value};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;

/// The functions a [`ClientWindow`] computes.
pub enum WindowFunction {
	RowNumber,
	Rank,
	DenseRank,
	/// An aggregate evaluated over the whole window partition.
	Aggregate {
		function: AggregateFunction,
		arg: Option<CompiledExpr>,
	},
}

impl WindowFunction {
	fn name(&self) -> String {
		match self {
			WindowFunction::RowNumber => "ROW_NUMBER()".to_owned(),
			WindowFunction::Rank => "RANK()".to_owned(),
			WindowFunction::DenseRank => "DENSE_RANK()".to_owned(),
			WindowFunction::Aggregate {
				function,
				..
			} => format!("{function}(...) OVER"),
		}
	}
}

/// One computed window column.
pub struct WindowColumn {
	pub function: WindowFunction,
	pub output: String,
}

/// Materializes all input rows, partitions them by the partition key,
/// orders within each partition, and appends the window outputs to every
/// row. Input order is preserved for rows leaving the node.
pub struct ClientWindow {
	pub child: Node,
	pub partition_by: Vec<CompiledExpr>,
	pub order_by: Vec<(CompiledExpr, bool)>,
	pub columns: Vec<WindowColumn>,
}

impl ClientWindow {
	fn order_values(&self, row: &Row, bindings: &Bindings) -> Result<Vec<Value>> {
		let mut out = Vec::with_capacity(self.order_by.len());
		for (expr, _) in &self.order_by {
			out.push(expr(row, bindings)?);
		}
		Ok(out)
	}

	fn compare_order(&self, a: &[Value], b: &[Value]) -> Ordering {
		for (i, (_, descending)) in self.order_by.iter().enumerate() {
			let ordering = match (a[i].is_null(), b[i].is_null()) {
				(true, true) => Ordering::Equal,
				(true, false) => Ordering::Less,
				(false, true) => Ordering::Greater,
				(false, false) => {
					a[i].compare(&b[i]).ok().flatten().unwrap_or(Ordering::Equal)
				}
			};
			let ordering = if *descending {
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
impl PlanNode for ClientWindow {
	fn describe(&self) -> String {
		let cols: Vec<String> =
			self.columns.iter().map(|c| format!("{} as {}", c.function.name(), c.output)).collect();
		format!("ClientWindow: {}", cols.join(", "))
	}

	fn children(&self) -> Vec<Node> {
		vec![self.child.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let bindings = ctx.bindings();
		let rows = collect_rows(&self.child, ctx).await?;
		// Partition rows, remembering each row's original position.
		let mut partitions: HashMap<String, Vec<usize>> = HashMap::new();
		for (i, row) in rows.iter().enumerate() {
			let mut key = String::new();
			for expr in &self.partition_by {
				key.push_str(&expr(row, &bindings)?.canonical_key(true));
				key.push('\u{1}');
			}
			partitions.entry(key).or_default().push(i);
		}
		// Computed outputs per original row index.
		let mut outputs: Vec<Vec<Value>> = vec![Vec::new(); rows.len()];
		for indices in partitions.into_values() {
			ctx.check()?;
			let mut ordered: Vec<(usize, Vec<Value>)> = Vec::with_capacity(indices.len());
			for &i in &indices {
				ordered.push((i, self.order_values(&rows[i], &bindings)?));
			}
			ordered.sort_by(|(_, a), (_, b)| self.compare_order(a, b));
			// Per-partition aggregates are shared by every member row.
			let mut partition_aggregates: Vec<Option<Value>> = Vec::new();
			for column in &self.columns {
				if let WindowFunction::Aggregate {
					function,
					arg,
				} = &column.function
				{
					let mut accumulator = Accumulator::default();
					for &i in &indices {
						let value = match arg {
							Some(arg) => Some(arg(&rows[i], &bindings)?),
							None => None,
						};
						accumulator.push(value, false)?;
					}
					partition_aggregates.push(Some(accumulator.finish(*function, arg.is_none())));
				} else {
					partition_aggregates.push(None);
				}
			}
			let mut rank = 0u64;
			let mut dense_rank = 0u64;
			let mut previous: Option<&Vec<Value>> = None;
			for (position, (i, order_key)) in ordered.iter().enumerate() {
				let row_number = position as u64 + 1;
				let tied = previous.is_some_and(|p| self.compare_order(p, order_key) == Ordering::Equal);
				if !tied {
					rank = row_number;
					dense_rank += 1;
				}
				previous = Some(order_key);
				let mut values = Vec::with_capacity(self.columns.len());
				for (c, column) in self.columns.iter().enumerate() {
					let value = match column.function {
						WindowFunction::RowNumber => Value::BigInt(row_number as i64),
						WindowFunction::Rank => Value::BigInt(rank as i64),
						WindowFunction::DenseRank => Value::BigInt(dense_rank as i64),
						WindowFunction::Aggregate {
							..
						} => partition_aggregates[c].clone().unwrap_or(Value::Null),
					};
					values.push(value);
				}
				outputs[*i] = values;
			}
		}
		let mut out = Vec::with_capacity(rows.len());
		for (row, values) in rows.into_iter().zip(outputs) {
			let mut row = row;
			for (column, value) in self.columns.iter().zip(values) {
				row.set(&column.output, value);
			}
			out.push(row);
		}
		Ok(stats::instrument(self.describe(), ctx.stats.clone(), rows_stream(out)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::exp::{compile_expr, CompileEnv};
	use crate::sql::{ColumnRef, Expression};
	use futures::TryStreamExt;
	use std::sync::Arc;

	fn expr(name: &str) -> CompiledExpr {
		compile_expr(&Expression::Column(ColumnRef::bare(name)), &CompileEnv::new()).unwrap()
	}

	struct Fixed {
		rows: Vec<Row>,
	}

	#[async_trait]
	impl PlanNode for Fixed {
		fn describe(&self) -> String {
			"Fixed".to_owned()
		}

		async fn execute(&self, _: &ExecContext) -> Result<RowStream> {
			Ok(rows_stream(self.rows.clone()))
		}
	}

	#[tokio::test]
	async fn row_number_and_rank_within_partitions() {
		let data = [("a", 30), ("a", 10), ("a", 10), ("b", 5)];
		let rows: Vec<Row> = data
			.iter()
			.map(|(owner, score)| {
				let mut row = Row::new();
				row.set("owner", Value::from(*owner));
				row.set("score", Value::Int(*score));
				row
			})
			.collect();
		let window = ClientWindow {
			child: Arc::new(Fixed {
				rows,
			}),
			partition_by: vec![expr("owner")],
			order_by: vec![(expr("score"), false)],
			columns: vec![
				WindowColumn {
					function: WindowFunction::RowNumber,
					output: "rn".into(),
				},
				WindowColumn {
					function: WindowFunction::Rank,
					output: "rk".into(),
				},
				WindowColumn {
					function: WindowFunction::DenseRank,
					output: "drk".into(),
				},
			],
		};
		let ctx = crate::dbs::test_context();
		let mut stream = window.execute(&ctx).await.unwrap();
		let mut out = Vec::new();
		while let Some(row) = stream.try_next().await.unwrap() {
			out.push(row);
		}
		// Input order is preserved.
		assert_eq!(out[0].get("owner"), Some(&Value::from("a")));
		assert_eq!(out[0].get("score"), Some(&Value::Int(30)));
		assert_eq!(out[0].get("rn"), Some(&Value::BigInt(3)));
		assert_eq!(out[0].get("rk"), Some(&Value::BigInt(3)));
		assert_eq!(out[0].get("drk"), Some(&Value::BigInt(2)));
		// The two tied rows share rank 1.
		assert_eq!(out[1].get("rk"), Some(&Value::BigInt(1)));
		assert_eq!(out[2].get("rk"), Some(&Value::BigInt(1)));
		assert_eq!(out[3].get("rn"), Some(&Value::BigInt(1)));
	}
}
