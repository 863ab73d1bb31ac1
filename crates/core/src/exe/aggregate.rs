//! Client-side hash aggregation, and the merge node combining per-partition
//! partial aggregates from partitioned execution.

use crate::backend::{rows_stream, RowStream};
use crate::err::Result;
use crate::exe::{stats, ExecContext, Node, PlanNode};
use crate::exp::CompiledExpr;
use crate::sql::{Row, Value};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// The aggregate functions the engine computes client-side.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AggregateFunction {
	Count,
	CountBig,
	Sum,
	Avg,
	Min,
	Max,
	/// Sample standard deviation.
	Stdev,
	/// Population standard deviation.
	StdevP,
	/// Sample variance.
	Var,
	/// Population variance.
	VarP,
}

impl AggregateFunction {
	/// Resolve one of the recognized aggregate names.
	pub fn from_name(name: &str) -> Option<AggregateFunction> {
		match name.to_uppercase().as_str() {
			"COUNT" => Some(AggregateFunction::Count),
			"COUNT_BIG" => Some(AggregateFunction::CountBig),
			"SUM" => Some(AggregateFunction::Sum),
			"AVG" => Some(AggregateFunction::Avg),
			"MIN" => Some(AggregateFunction::Min),
			"MAX" => Some(AggregateFunction::Max),
			"STDEV" => Some(AggregateFunction::Stdev),
			"STDEVP" => Some(AggregateFunction::StdevP),
			"VAR" => Some(AggregateFunction::Var),
			"VARP" => Some(AggregateFunction::VarP),
			_ => None,
		}
	}

	/// Whether this aggregate needs sum-of-squares statistics.
	pub fn is_variance_family(&self) -> bool {
		matches!(
			self,
			AggregateFunction::Stdev
				| AggregateFunction::StdevP
				| AggregateFunction::Var
				| AggregateFunction::VarP
		)
	}
}

impl fmt::Display for AggregateFunction {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let name = match self {
			AggregateFunction::Count => "COUNT",
			AggregateFunction::CountBig => "COUNT_BIG",
			AggregateFunction::Sum => "SUM",
			AggregateFunction::Avg => "AVG",
			AggregateFunction::Min => "MIN",
			AggregateFunction::Max => "MAX",
			AggregateFunction::Stdev => "STDEV",
			AggregateFunction::StdevP => "STDEVP",
			AggregateFunction::Var => "VAR",
			AggregateFunction::VarP => "VARP",
		};
		f.write_str(name)
	}
}

/// One aggregate computed by a [`ClientAggregate`].
pub struct AggregateExpr {
	pub function: AggregateFunction,
	/// The argument expression; `None` for `COUNT(*)`.
	pub arg: Option<CompiledExpr>,
	pub distinct: bool,
	/// The output column the result lands in.
	pub output: String,
	/// The printed call, for EXPLAIN.
	pub display: String,
}

/// One grouping column of a [`ClientAggregate`].
pub struct GroupColumn {
	pub output: String,
	pub expr: CompiledExpr,
	pub display: String,
}

/// Streaming state for one aggregate over one group. Shared with the
/// window node, which aggregates over window partitions.
#[derive(Default)]
pub(crate) struct Accumulator {
	count: u64,
	non_null: u64,
	sum: Value,
	sum_f: f64,
	sum_sq: f64,
	min: Value,
	max: Value,
	distinct: HashSet<String>,
}

impl Accumulator {
	pub(crate) fn push(&mut self, value: Option<Value>, distinct: bool) -> Result<()> {
		self.count += 1;
		let Some(value) = value else {
			return Ok(());
		};
		if value.is_null() {
			return Ok(());
		}
		if distinct && !self.distinct.insert(value.canonical_key(true)) {
			return Ok(());
		}
		self.non_null += 1;
		if value.is_numeric() {
			let f = value.as_f64()?;
			self.sum_f += f;
			self.sum_sq += f * f;
			self.sum = if self.sum.is_null() {
				value.clone()
			} else {
				self.sum.try_add(&value)?
			};
		}
		if self.min.is_null() || value.compare(&self.min)? == Some(Ordering::Less) {
			self.min = value.clone();
		}
		if self.max.is_null() || value.compare(&self.max)? == Some(Ordering::Greater) {
			self.max = value;
		}
		Ok(())
	}

	fn variance(&self, population: bool) -> Value {
		let n = self.non_null as f64;
		if n == 0.0 || (!population && n < 2.0) {
			return Value::Null;
		}
		let divisor = if population {
			n
		} else {
			n - 1.0
		};
		let variance = (self.sum_sq - self.sum_f * self.sum_f / n) / divisor;
		Value::Float(variance.max(0.0))
	}

	pub(crate) fn finish(&self, function: AggregateFunction, counts_rows: bool) -> Value {
		match function {
			AggregateFunction::Count => {
				let n = if counts_rows {
					self.count
				} else {
					self.non_null
				};
				match i32::try_from(n) {
					Ok(n) => Value::Int(n),
					Err(_) => Value::BigInt(n as i64),
				}
			}
			AggregateFunction::CountBig => {
				let n = if counts_rows {
					self.count
				} else {
					self.non_null
				};
				Value::BigInt(n as i64)
			}
			AggregateFunction::Sum => self.sum.clone(),
			AggregateFunction::Avg => {
				if self.non_null == 0 {
					Value::Null
				} else {
					Value::Float(self.sum_f / self.non_null as f64)
				}
			}
			AggregateFunction::Min => self.min.clone(),
			AggregateFunction::Max => self.max.clone(),
			AggregateFunction::Stdev => match self.variance(false) {
				Value::Float(v) => Value::Float(v.sqrt()),
				other => other,
			},
			AggregateFunction::StdevP => match self.variance(true) {
				Value::Float(v) => Value::Float(v.sqrt()),
				other => other,
			},
			AggregateFunction::Var => self.variance(false),
			AggregateFunction::VarP => self.variance(true),
		}
	}
}

/// Hash aggregation. Consumes the whole child, groups by the grouping
/// columns, and emits one row per group whose column set is exactly
/// `group_by ∪ aggregate outputs`.
///
/// In partial mode, used below a [`MergeAggregate`], each variance-family
/// aggregate additionally emits its sufficient statistics
/// (`<output>$count`, `<output>$sum`, `<output>$sumsq`) so partitions can
/// be combined exactly.
pub struct ClientAggregate {
	pub child: Node,
	pub group_by: Vec<GroupColumn>,
	pub aggregates: Vec<AggregateExpr>,
	pub partial: bool,
}

#[async_trait]
impl PlanNode for ClientAggregate {
	fn describe(&self) -> String {
		let mut parts = Vec::new();
		if !self.group_by.is_empty() {
			let cols: Vec<&str> = self.group_by.iter().map(|g| g.display.as_str()).collect();
			parts.push(format!("group by {}", cols.join(", ")));
		}
		for aggregate in &self.aggregates {
			parts.push(format!("{} as {}", aggregate.display, aggregate.output));
		}
		format!("ClientAggregate: {}", parts.join("; "))
	}

	fn children(&self) -> Vec<Node> {
		vec![self.child.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let bindings = ctx.bindings();
		let mut input = self.child.execute(ctx).await?;
		// Group state in first-seen order.
		let mut order: Vec<String> = Vec::new();
		let mut groups: HashMap<String, (Vec<Value>, Vec<Accumulator>)> = HashMap::new();
		while let Some(row) = input.try_next().await? {
			ctx.check()?;
			let mut key = String::new();
			let mut key_values = Vec::with_capacity(self.group_by.len());
			for group in &self.group_by {
				let value = (group.expr)(&row, &bindings)?;
				key.push_str(&value.canonical_key(true));
				key.push('\u{1}');
				key_values.push(value);
			}
			if !groups.contains_key(&key) {
				ctx.check_materialized(groups.len() + 1)?;
				order.push(key.clone());
				groups.insert(
					key.clone(),
					(
						key_values,
						(0..self.aggregates.len()).map(|_| Accumulator::default()).collect(),
					),
				);
			}
			let Some(entry) = groups.get_mut(&key) else {
				fail!("aggregate group was just ensured");
			};
			for (aggregate, accumulator) in self.aggregates.iter().zip(entry.1.iter_mut()) {
				let value = match aggregate.arg {
					Some(ref arg) => Some(arg(&row, &bindings)?),
					None => None,
				};
				accumulator.push(value, aggregate.distinct)?;
			}
		}
		// A grand aggregate with no input rows still produces one row.
		if groups.is_empty() && self.group_by.is_empty() {
			let key = String::new();
			order.push(key.clone());
			groups.insert(
				key,
				(Vec::new(), (0..self.aggregates.len()).map(|_| Accumulator::default()).collect()),
			);
		}
		let mut out = Vec::with_capacity(groups.len());
		for key in order {
			let Some((key_values, accumulators)) = groups.remove(&key) else {
				fail!("aggregate group vanished");
			};
			let mut row = Row::new();
			for (group, value) in self.group_by.iter().zip(key_values) {
				row.set(&group.output, value);
			}
			for (aggregate, accumulator) in self.aggregates.iter().zip(&accumulators) {
				let counts_rows = aggregate.arg.is_none();
				row.set(&aggregate.output, accumulator.finish(aggregate.function, counts_rows));
				let needs_statistics = aggregate.function.is_variance_family()
					|| aggregate.function == AggregateFunction::Avg;
				if self.partial && needs_statistics {
					row.set(
						format!("{}$count", aggregate.output),
						Value::BigInt(accumulator.non_null as i64),
					);
					row.set(format!("{}$sum", aggregate.output), Value::Float(accumulator.sum_f));
					row.set(
						format!("{}$sumsq", aggregate.output),
						Value::Float(accumulator.sum_sq),
					);
				}
			}
			out.push(row);
		}
		Ok(stats::instrument(self.describe(), ctx.stats.clone(), rows_stream(out)))
	}
}

/// How one output column of a [`MergeAggregate`] combines per-partition
/// values.
#[derive(Clone, Debug)]
pub enum MergeKind {
	/// COUNT and COUNT_BIG: the sum of per-partition counts, zero when no
	/// partition produced a row.
	CountSum,
	/// SUM: the sum of per-partition values.
	Sum,
	Min,
	Max,
	/// AVG: weighted by the partition's companion count column.
	WeightedAvg {
		count_column: String,
	},
	/// STDEV/VAR: recombined from per-partition sufficient statistics.
	Variance {
		count_column: String,
		sum_column: String,
		sumsq_column: String,
		population: bool,
		stdev: bool,
	},
}

/// One merged output column.
#[derive(Clone, Debug)]
pub struct MergeColumn {
	pub output: String,
	pub kind: MergeKind,
}

/// Combines per-partition partial aggregate rows into final aggregates.
/// Insensitive to partition arrival order.
pub struct MergeAggregate {
	pub child: Node,
	pub group_by: Vec<String>,
	pub columns: Vec<MergeColumn>,
}

#[async_trait]
impl PlanNode for MergeAggregate {
	fn describe(&self) -> String {
		let cols: Vec<&str> = self.columns.iter().map(|c| c.output.as_str()).collect();
		format!("MergeAggregate: {}", cols.join(", "))
	}

	fn children(&self) -> Vec<Node> {
		vec![self.child.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let mut input = self.child.execute(ctx).await?;
		let mut order: Vec<String> = Vec::new();
		let mut groups: HashMap<String, Vec<Row>> = HashMap::new();
		while let Some(row) = input.try_next().await? {
			ctx.check()?;
			let key = row.key_of(&self.group_by, true);
			if !groups.contains_key(&key) {
				ctx.check_materialized(groups.len() + 1)?;
				order.push(key.clone());
				groups.insert(key.clone(), Vec::new());
			}
			let Some(members) = groups.get_mut(&key) else {
				fail!("merge group was just ensured");
			};
			members.push(row);
		}
		// A grand aggregate over zero partition rows still yields one row.
		if groups.is_empty() && self.group_by.is_empty() {
			order.push(String::new());
			groups.insert(String::new(), Vec::new());
		}
		let mut out = Vec::with_capacity(groups.len());
		for key in order {
			let Some(members) = groups.remove(&key) else {
				fail!("merge group vanished");
			};
			let mut row = Row::new();
			for column in &self.group_by {
				let value = members[0].get(column).cloned().unwrap_or(Value::Null);
				row.set(column, value);
			}
			for column in &self.columns {
				row.set(&column.output, merge_column(column, &members)?);
			}
			out.push(row);
		}
		Ok(rows_stream(out))
	}
}

fn merge_column(column: &MergeColumn, members: &[Row]) -> Result<Value> {
	let values = |name: &str| -> Vec<&Value> {
		members.iter().filter_map(|m| m.get(name)).filter(|v| !v.is_null()).collect()
	};
	match &column.kind {
		MergeKind::CountSum => {
			let mut total: i64 = 0;
			for v in values(&column.output) {
				total += v.as_i64()?;
			}
			Ok(Value::BigInt(total))
		}
		MergeKind::Sum => {
			let mut total = Value::Null;
			for v in values(&column.output) {
				total = if total.is_null() {
					v.clone()
				} else {
					total.try_add(v)?
				};
			}
			Ok(total)
		}
		MergeKind::Min => {
			let mut best = Value::Null;
			for v in values(&column.output) {
				if best.is_null() || v.compare(&best)? == Some(Ordering::Less) {
					best = v.clone();
				}
			}
			Ok(best)
		}
		MergeKind::Max => {
			let mut best = Value::Null;
			for v in values(&column.output) {
				if best.is_null() || v.compare(&best)? == Some(Ordering::Greater) {
					best = v.clone();
				}
			}
			Ok(best)
		}
		MergeKind::WeightedAvg {
			count_column,
		} => {
			let mut total = 0f64;
			let mut count = 0f64;
			for member in members {
				let avg = member.get(&column.output).cloned().unwrap_or(Value::Null);
				let n = member.get(count_column).cloned().unwrap_or(Value::Null);
				if avg.is_null() || n.is_null() {
					continue;
				}
				let n = n.as_f64()?;
				total += avg.as_f64()? * n;
				count += n;
			}
			if count == 0.0 {
				Ok(Value::Null)
			} else {
				Ok(Value::Float(total / count))
			}
		}
		MergeKind::Variance {
			count_column,
			sum_column,
			sumsq_column,
			population,
			stdev,
		} => {
			let mut n = 0f64;
			let mut sum = 0f64;
			let mut sumsq = 0f64;
			for member in members {
				let Some(count) = member.get(count_column) else {
					continue;
				};
				if count.is_null() {
					continue;
				}
				n += count.as_f64()?;
				sum += member.get(sum_column).map_or(Ok(0.0), |v| v.as_f64())?;
				sumsq += member.get(sumsq_column).map_or(Ok(0.0), |v| v.as_f64())?;
			}
			if n == 0.0 || (!population && n < 2.0) {
				return Ok(Value::Null);
			}
			let divisor = if *population {
				n
			} else {
				n - 1.0
			};
			let variance = ((sumsq - sum * sum / n) / divisor).max(0.0);
			Ok(Value::Float(if *stdev {
				variance.sqrt()
			} else {
				variance
			}))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::exp::{compile_expr, CompileEnv};
	use crate::sql::{ColumnRef, Expression};
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

	fn input(data: Vec<(&str, Option<i64>)>) -> Node {
		let rows = data
			.into_iter()
			.map(|(owner, revenue)| {
				let mut row = Row::new();
				row.set("ownerid", Value::from(owner));
				row.set("revenue", revenue.map(Value::BigInt).unwrap_or(Value::Null));
				row
			})
			.collect();
		Arc::new(Fixed {
			rows,
		})
	}

	async fn run(node: &dyn PlanNode) -> Vec<Row> {
		let ctx = crate::dbs::test_context();
		let mut out = Vec::new();
		let mut stream = node.execute(&ctx).await.unwrap();
		while let Some(row) = stream.try_next().await.unwrap() {
			out.push(row);
		}
		out
	}

	#[tokio::test]
	async fn grouped_count_and_sum() {
		let aggregate = ClientAggregate {
			child: input(vec![("a", Some(10)), ("a", Some(20)), ("b", None)]),
			group_by: vec![GroupColumn {
				output: "ownerid".into(),
				expr: expr("ownerid"),
				display: "ownerid".into(),
			}],
			aggregates: vec![
				AggregateExpr {
					function: AggregateFunction::Count,
					arg: None,
					distinct: false,
					output: "cnt".into(),
					display: "COUNT(*)".into(),
				},
				AggregateExpr {
					function: AggregateFunction::Sum,
					arg: Some(expr("revenue")),
					distinct: false,
					output: "total".into(),
					display: "SUM(revenue)".into(),
				},
			],
			partial: false,
		};
		let rows = run(&aggregate).await;
		assert_eq!(rows.len(), 2);
		let a = rows.iter().find(|r| r.get("ownerid") == Some(&Value::from("a"))).unwrap();
		assert_eq!(a.get("cnt"), Some(&Value::Int(2)));
		assert_eq!(a.get("total"), Some(&Value::BigInt(30)));
		let b = rows.iter().find(|r| r.get("ownerid") == Some(&Value::from("b"))).unwrap();
		// COUNT(*) counts NULL rows, SUM ignores them.
		assert_eq!(b.get("cnt"), Some(&Value::Int(1)));
		assert!(b.get("total").unwrap().is_null());
	}

	#[tokio::test]
	async fn empty_grand_aggregate_emits_one_row() {
		let aggregate = ClientAggregate {
			child: input(vec![]),
			group_by: vec![],
			aggregates: vec![AggregateExpr {
				function: AggregateFunction::Count,
				arg: None,
				distinct: false,
				output: "cnt".into(),
				display: "COUNT(*)".into(),
			}],
			partial: false,
		};
		let rows = run(&aggregate).await;
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].get("cnt"), Some(&Value::Int(0)));
	}

	#[tokio::test]
	async fn stdev_uses_sample_variance() {
		let aggregate = ClientAggregate {
			child: input(vec![("a", Some(2)), ("a", Some(4)), ("a", Some(6))]),
			group_by: vec![],
			aggregates: vec![AggregateExpr {
				function: AggregateFunction::Stdev,
				arg: Some(expr("revenue")),
				distinct: false,
				output: "sd".into(),
				display: "STDEV(revenue)".into(),
			}],
			partial: false,
		};
		let rows = run(&aggregate).await;
		let Value::Float(sd) = rows[0].get("sd").unwrap() else {
			panic!("expected float");
		};
		assert!((sd - 2.0).abs() < 1e-9);
	}

	#[tokio::test]
	async fn distinct_count() {
		let aggregate = ClientAggregate {
			child: input(vec![("a", Some(1)), ("a", Some(1)), ("a", Some(2))]),
			group_by: vec![],
			aggregates: vec![AggregateExpr {
				function: AggregateFunction::Count,
				arg: Some(expr("revenue")),
				distinct: true,
				output: "cnt".into(),
				display: "COUNT(DISTINCT revenue)".into(),
			}],
			partial: false,
		};
		let rows = run(&aggregate).await;
		assert_eq!(rows[0].get("cnt"), Some(&Value::Int(2)));
	}

	#[tokio::test]
	async fn weighted_average_merge() {
		// Two partitions: (avg=10, n=100) and (avg=20, n=300) must merge
		// to 17.5, not 15.
		let rows = vec![
			{
				let mut r = Row::new();
				r.set("avg_revenue", Value::Float(10.0));
				r.set("avg_revenue$n", Value::BigInt(100));
				r
			},
			{
				let mut r = Row::new();
				r.set("avg_revenue", Value::Float(20.0));
				r.set("avg_revenue$n", Value::BigInt(300));
				r
			},
		];
		let merge = MergeAggregate {
			child: Arc::new(Fixed {
				rows,
			}),
			group_by: vec![],
			columns: vec![MergeColumn {
				output: "avg_revenue".into(),
				kind: MergeKind::WeightedAvg {
					count_column: "avg_revenue$n".into(),
				},
			}],
		};
		let rows = run(&merge).await;
		assert_eq!(rows[0].get("avg_revenue"), Some(&Value::Float(17.5)));
	}

	#[tokio::test]
	async fn variance_merge_matches_single_pass() {
		// Partition A holds {2, 4}, partition B holds {6}.
		let rows = vec![
			{
				let mut r = Row::new();
				r.set("sd$count", Value::BigInt(2));
				r.set("sd$sum", Value::Float(6.0));
				r.set("sd$sumsq", Value::Float(20.0));
				r
			},
			{
				let mut r = Row::new();
				r.set("sd$count", Value::BigInt(1));
				r.set("sd$sum", Value::Float(6.0));
				r.set("sd$sumsq", Value::Float(36.0));
				r
			},
		];
		let merge = MergeAggregate {
			child: Arc::new(Fixed {
				rows,
			}),
			group_by: vec![],
			columns: vec![MergeColumn {
				output: "sd".into(),
				kind: MergeKind::Variance {
					count_column: "sd$count".into(),
					sum_column: "sd$sum".into(),
					sumsq_column: "sd$sumsq".into(),
					population: false,
					stdev: true,
				},
			}],
		};
		let rows = run(&merge).await;
		let Value::Float(sd) = rows[0].get("sd").unwrap() else {
			panic!("expected float");
		};
		// {2, 4, 6} has sample standard deviation 2.
		assert!((sd - 2.0).abs() < 1e-9);
	}
}
