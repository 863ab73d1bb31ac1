//! Client-side joins: hash join (the default), merge join for sorted
//! inputs, and nested-loop join covering cross joins and the correlated
//! apply variants.

use crate::backend::RowStream;
use crate::err::Result;
use crate::exe::{collect_rows, stats, ExecContext, Node, PlanNode};
use crate::exp::{Bindings, CompiledCond, CompiledExpr};
use crate::sql::{Row, Value};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::TryStreamExt;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// The join flavors of the hash and merge joins.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinType {
	Inner,
	Left,
	Right,
	Full,
	/// Emit each outer row at most once when a match exists.
	Semi,
	/// Emit each outer row only when no match exists.
	Anti,
}

impl JoinType {
	fn name(&self) -> &'static str {
		match self {
			JoinType::Inner => "Inner",
			JoinType::Left => "Left",
			JoinType::Right => "Right",
			JoinType::Full => "FullOuter",
			JoinType::Semi => "Semi",
			JoinType::Anti => "Anti",
		}
	}

	fn emits_unmatched_left(&self) -> bool {
		matches!(self, JoinType::Left | JoinType::Full)
	}

	fn emits_unmatched_right(&self) -> bool {
		matches!(self, JoinType::Right | JoinType::Full)
	}
}

/// Evaluate a key expression list. `None` when any component is NULL,
/// since NULL keys never join.
fn join_key(keys: &[CompiledExpr], row: &Row, bindings: &Bindings) -> Result<Option<String>> {
	let mut out = String::new();
	for key in keys {
		let value = key(row, bindings)?;
		if value.is_null() {
			return Ok(None);
		}
		out.push_str(&value.canonical_key(true));
		out.push('\u{1}');
	}
	Ok(Some(out))
}

/// Builds a hash table from the right input, then probes with rows from
/// the left. Tracks build-side matched bits for Right and FullOuter
/// emission.
pub struct HashJoin {
	pub left: Node,
	pub right: Node,
	pub left_keys: Vec<CompiledExpr>,
	pub right_keys: Vec<CompiledExpr>,
	pub residual: Option<CompiledCond>,
	pub join_type: JoinType,
	/// Null-filled schema templates for unmatched-side emission, built by
	/// the planner from the children's declared descriptors so a template
	/// exists even when a side never produced a row.
	pub left_template: Row,
	pub right_template: Row,
	pub display: String,
}

#[async_trait]
impl PlanNode for HashJoin {
	fn describe(&self) -> String {
		format!("HashJoin ({}): {}", self.join_type.name(), self.display)
	}

	fn children(&self) -> Vec<Node> {
		vec![self.left.clone(), self.right.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let bindings = ctx.bindings();
		// Build from the right input.
		let build_rows = collect_rows(&self.right, ctx).await?;
		let mut table: HashMap<String, Vec<usize>> = HashMap::new();
		for (i, row) in build_rows.iter().enumerate() {
			if let Some(key) = join_key(&self.right_keys, row, &bindings)? {
				table.entry(key).or_default().push(i);
			}
		}
		let mut matched = vec![false; build_rows.len()];

		let mut probe = self.left.execute(ctx).await?;
		let left_keys = self.left_keys.clone();
		let residual = self.residual.clone();
		let join_type = self.join_type;
		let left_template = self.left_template.clone();
		let right_template = self.right_template.clone();
		let ctx2 = ctx.clone();
		let description = self.describe();
		let stats_handle = ctx.stats.clone();
		let stream = try_stream! {
			while let Some(left_row) = probe.try_next().await? {
				ctx2.check()?;
				let mut hit = false;
				if let Some(key) = join_key(&left_keys, &left_row, &bindings)? {
					if let Some(candidates) = table.get(&key) {
						for &i in candidates {
							let merged = left_row.merged(&build_rows[i]);
							if let Some(ref residual) = residual {
								if !residual(&merged, &bindings)?.is_true() {
									continue;
								}
							}
							hit = true;
							matched[i] = true;
							match join_type {
								JoinType::Semi | JoinType::Anti => break,
								_ => yield merged,
							}
						}
					}
				}
				match join_type {
					JoinType::Semi if hit => yield left_row,
					JoinType::Anti if !hit => yield left_row,
					_ if !hit && join_type.emits_unmatched_left() => {
						yield left_row.merged(&right_template);
					}
					_ => {}
				}
			}
			if join_type.emits_unmatched_right() {
				for (i, row) in build_rows.iter().enumerate() {
					if !matched[i] {
						ctx2.check()?;
						yield left_template.merged(row);
					}
				}
			}
		};
		Ok(stats::instrument(description, stats_handle, Box::pin(stream)))
	}
}

/// Compare two key-value vectors with NULLs ordering first.
fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
	for (x, y) in a.iter().zip(b.iter()) {
		let ordering = match (x.is_null(), y.is_null()) {
			(true, true) => Ordering::Equal,
			(true, false) => Ordering::Less,
			(false, true) => Ordering::Greater,
			(false, false) => x.compare(y).ok().flatten().unwrap_or(Ordering::Equal),
		};
		if ordering != Ordering::Equal {
			return ordering;
		}
	}
	Ordering::Equal
}

/// Merge join over inputs already sorted on the join keys. Walks both
/// inputs group-by-group, emitting the cross product on key equality and
/// unmatched-side rows per the join type at each step.
pub struct MergeJoin {
	pub left: Node,
	pub right: Node,
	pub left_keys: Vec<CompiledExpr>,
	pub right_keys: Vec<CompiledExpr>,
	pub join_type: JoinType,
	pub left_template: Row,
	pub right_template: Row,
	pub display: String,
}

type Group = (Vec<Value>, Vec<Row>);

impl MergeJoin {
	/// Pull the next run of rows sharing one key value.
	async fn next_group(
		stream: &mut RowStream,
		lookahead: &mut Option<Row>,
		keys: &[CompiledExpr],
		bindings: &Bindings,
	) -> Result<Option<Group>> {
		let first = match lookahead.take() {
			Some(row) => row,
			None => match stream.try_next().await? {
				Some(row) => row,
				None => return Ok(None),
			},
		};
		let mut key = Vec::with_capacity(keys.len());
		for k in keys {
			key.push(k(&first, bindings)?);
		}
		let mut rows = vec![first];
		loop {
			let Some(next) = stream.try_next().await? else {
				break;
			};
			let mut next_key = Vec::with_capacity(keys.len());
			for k in keys {
				next_key.push(k(&next, bindings)?);
			}
			if compare_keys(&key, &next_key) == Ordering::Equal {
				rows.push(next);
			} else {
				*lookahead = Some(next);
				break;
			}
		}
		Ok(Some((key, rows)))
	}
}

#[async_trait]
impl PlanNode for MergeJoin {
	fn describe(&self) -> String {
		format!("MergeJoin ({}): {}", self.join_type.name(), self.display)
	}

	fn children(&self) -> Vec<Node> {
		vec![self.left.clone(), self.right.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let bindings = ctx.bindings();
		let mut left = self.left.execute(ctx).await?;
		let mut right = self.right.execute(ctx).await?;
		let left_keys = self.left_keys.clone();
		let right_keys = self.right_keys.clone();
		let join_type = self.join_type;
		let left_template = self.left_template.clone();
		let right_template = self.right_template.clone();
		let ctx2 = ctx.clone();
		let stream = try_stream! {
			let mut left_ahead: Option<Row> = None;
			let mut right_ahead: Option<Row> = None;
			let mut lg =
				MergeJoin::next_group(&mut left, &mut left_ahead, &left_keys, &bindings).await?;
			let mut rg =
				MergeJoin::next_group(&mut right, &mut right_ahead, &right_keys, &bindings)
					.await?;
			loop {
				ctx2.check()?;
				match (&lg, &rg) {
					(None, None) => break,
					(Some((_, rows)), None) => {
						if join_type.emits_unmatched_left() {
							for row in rows {
								yield row.merged(&right_template);
							}
						}
						lg = MergeJoin::next_group(
							&mut left,
							&mut left_ahead,
							&left_keys,
							&bindings,
						)
						.await?;
					}
					(None, Some((_, rows))) => {
						if join_type.emits_unmatched_right() {
							for row in rows {
								yield left_template.merged(row);
							}
						}
						rg = MergeJoin::next_group(
							&mut right,
							&mut right_ahead,
							&right_keys,
							&bindings,
						)
						.await?;
					}
					(Some((lk, lrows)), Some((rk, rrows))) => {
						// NULL keys never match; the null group orders
						// first and drains as unmatched.
						let null_key = lk.iter().any(Value::is_null)
							|| rk.iter().any(Value::is_null);
						match compare_keys(lk, rk) {
							Ordering::Equal if !null_key => {
								for lrow in lrows {
									for rrow in rrows {
										yield lrow.merged(rrow);
									}
								}
								lg = MergeJoin::next_group(
									&mut left,
									&mut left_ahead,
									&left_keys,
									&bindings,
								)
								.await?;
								rg = MergeJoin::next_group(
									&mut right,
									&mut right_ahead,
									&right_keys,
									&bindings,
								)
								.await?;
							}
							Ordering::Greater => {
								if join_type.emits_unmatched_right() {
									for row in rrows {
										yield left_template.merged(row);
									}
								}
								rg = MergeJoin::next_group(
									&mut right,
									&mut right_ahead,
									&right_keys,
									&bindings,
								)
								.await?;
							}
							_ => {
								if join_type.emits_unmatched_left() {
									for row in lrows {
										yield row.merged(&right_template);
									}
								}
								lg = MergeJoin::next_group(
									&mut left,
									&mut left_ahead,
									&left_keys,
									&bindings,
								)
								.await?;
							}
						}
					}
				}
			}
		};
		Ok(Box::pin(stream))
	}
}

/// The nested-loop join types, including the correlated apply variants.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NestedJoinType {
	Inner,
	Left,
	Right,
	Full,
	Cross,
	CrossApply,
	OuterApply,
}

/// The right input of a nested-loop join: a plan, or a factory re-invoked
/// per outer row with the outer row as context.
#[derive(Clone)]
pub enum RightSource {
	Plan(Node),
	Factory(Arc<dyn Fn(&Row) -> Result<Node> + Send + Sync>),
}

/// Nested-loop join. The default for non-equi predicates, CROSS JOIN, and
/// the correlated CrossApply/OuterApply variants.
pub struct NestedLoopJoin {
	pub left: Node,
	pub right: RightSource,
	pub predicate: Option<CompiledCond>,
	pub join_type: NestedJoinType,
	pub left_template: Row,
	pub right_template: Row,
	pub display: String,
}

#[async_trait]
impl PlanNode for NestedLoopJoin {
	fn describe(&self) -> String {
		let kind = match self.join_type {
			NestedJoinType::Inner => "Inner",
			NestedJoinType::Left => "Left",
			NestedJoinType::Right => "Right",
			NestedJoinType::Full => "FullOuter",
			NestedJoinType::Cross => "Cross",
			NestedJoinType::CrossApply => "CrossApply",
			NestedJoinType::OuterApply => "OuterApply",
		};
		if self.display.is_empty() {
			format!("NestedLoopJoin ({kind})")
		} else {
			format!("NestedLoopJoin ({kind}): {}", self.display)
		}
	}

	fn children(&self) -> Vec<Node> {
		let mut out = vec![self.left.clone()];
		if let RightSource::Plan(ref right) = self.right {
			out.push(right.clone());
		}
		out
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let bindings = ctx.bindings();
		let mut probe = self.left.execute(ctx).await?;
		let predicate = self.predicate.clone();
		let join_type = self.join_type;
		let left_template = self.left_template.clone();
		let right_template = self.right_template.clone();
		let right = self.right.clone();
		let ctx2 = ctx.clone();
		let stream = try_stream! {
			// A plan right side is materialized once and replayed per
			// outer row; a factory right side is rebuilt per outer row.
			let inner_rows = match right {
				RightSource::Plan(ref node) => collect_rows(node, &ctx2).await?,
				RightSource::Factory(_) => Vec::new(),
			};
			let mut inner_matched = vec![false; inner_rows.len()];
			while let Some(left_row) = probe.try_next().await? {
				ctx2.check()?;
				let mut hit = false;
				match right {
					RightSource::Plan(_) => {
						for (i, right_row) in inner_rows.iter().enumerate() {
							let merged = left_row.merged(right_row);
							let keep = match predicate {
								Some(ref p) => p(&merged, &bindings)?.is_true(),
								None => true,
							};
							if keep {
								hit = true;
								inner_matched[i] = true;
								yield merged;
							}
						}
					}
					RightSource::Factory(ref factory) => {
						let node = factory(&left_row)?;
						let mut rows = node.execute(&ctx2).await?;
						while let Some(right_row) = rows.try_next().await? {
							ctx2.check()?;
							let merged = left_row.merged(&right_row);
							let keep = match predicate {
								Some(ref p) => p(&merged, &bindings)?.is_true(),
								None => true,
							};
							if keep {
								hit = true;
								yield merged;
							}
						}
					}
				}
				let emits_left_null = matches!(
					join_type,
					NestedJoinType::Left | NestedJoinType::Full | NestedJoinType::OuterApply
				);
				if !hit && emits_left_null {
					yield left_row.merged(&right_template);
				}
			}
			if matches!(join_type, NestedJoinType::Right | NestedJoinType::Full) {
				for (i, row) in inner_rows.iter().enumerate() {
					if !inner_matched[i] {
						ctx2.check()?;
						yield left_template.merged(row);
					}
				}
			}
		};
		Ok(Box::pin(stream))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::rows_stream;
	use crate::exe::scan::ConstantScan;
	use crate::exp::{compile_expr, CompileEnv};
	use crate::sql::{ColumnRef, Expression};

	fn key(name: &str) -> CompiledExpr {
		compile_expr(&Expression::Column(ColumnRef::bare(name)), &CompileEnv::new()).unwrap()
	}

	fn rows_node(columns: &[&str], data: Vec<Vec<Value>>) -> Node {
		let rows: Vec<Row> = data
			.into_iter()
			.map(|values| {
				columns
					.iter()
					.zip(values)
					.map(|(c, v)| ((*c).to_owned(), v))
					.collect()
			})
			.collect();
		Arc::new(Fixed {
			rows,
		})
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

	fn template(columns: &[&str]) -> Row {
		columns.iter().map(|c| ((*c).to_owned(), Value::Null)).collect()
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

	fn hash_join(join_type: JoinType) -> HashJoin {
		HashJoin {
			left: rows_node(
				&["l.id", "l.name"],
				vec![
					vec![Value::Int(1), Value::from("a")],
					vec![Value::Int(2), Value::from("b")],
					vec![Value::Null, Value::from("n")],
				],
			),
			right: rows_node(
				&["r.id", "r.tag"],
				vec![
					vec![Value::Int(1), Value::from("x")],
					vec![Value::Int(1), Value::from("y")],
					vec![Value::Int(3), Value::from("z")],
				],
			),
			left_keys: vec![key("l.id")],
			right_keys: vec![key("r.id")],
			residual: None,
			join_type,
			left_template: template(&["l.id", "l.name"]),
			right_template: template(&["r.id", "r.tag"]),
			display: "l.id = r.id".to_owned(),
		}
	}

	#[tokio::test]
	async fn hash_join_inner_emits_all_matches() {
		let rows = run(&hash_join(JoinType::Inner)).await;
		assert_eq!(rows.len(), 2);
		assert!(rows.iter().all(|r| r.get("l.id") == Some(&Value::Int(1))));
	}

	#[tokio::test]
	async fn hash_join_left_emits_null_padded_misses() {
		let rows = run(&hash_join(JoinType::Left)).await;
		assert_eq!(rows.len(), 4);
		let miss = rows.iter().find(|r| r.get("l.name") == Some(&Value::from("b"))).unwrap();
		assert!(miss.get("r.tag").unwrap().is_null());
		// The NULL-keyed left row is unmatched, not joined.
		let null_row = rows.iter().find(|r| r.get("l.name") == Some(&Value::from("n"))).unwrap();
		assert!(null_row.get("r.tag").unwrap().is_null());
	}

	#[tokio::test]
	async fn hash_join_full_outer_covers_both_sides() {
		let rows = run(&hash_join(JoinType::Full)).await;
		// 2 matches + 2 unmatched left + 1 unmatched right.
		assert_eq!(rows.len(), 5);
		let unmatched_right =
			rows.iter().find(|r| r.get("r.tag") == Some(&Value::from("z"))).unwrap();
		assert!(unmatched_right.get("l.name").unwrap().is_null());
	}

	#[tokio::test]
	async fn hash_join_semi_and_anti_partition_the_left() {
		let semi = run(&hash_join(JoinType::Semi)).await;
		assert_eq!(semi.len(), 1);
		assert_eq!(semi[0].get("l.name"), Some(&Value::from("a")));
		let anti = run(&hash_join(JoinType::Anti)).await;
		assert_eq!(anti.len(), 2);
	}

	#[tokio::test]
	async fn merge_join_walks_sorted_inputs() {
		let join = MergeJoin {
			left: rows_node(
				&["l.k", "l.v"],
				vec![
					vec![Value::Int(1), Value::from("a")],
					vec![Value::Int(2), Value::from("b")],
					vec![Value::Int(2), Value::from("b2")],
					vec![Value::Int(4), Value::from("d")],
				],
			),
			right: rows_node(
				&["r.k", "r.w"],
				vec![
					vec![Value::Int(2), Value::from("x")],
					vec![Value::Int(3), Value::from("y")],
				],
			),
			left_keys: vec![key("l.k")],
			right_keys: vec![key("r.k")],
			join_type: JoinType::Full,
			left_template: template(&["l.k", "l.v"]),
			right_template: template(&["r.k", "r.w"]),
			display: "l.k = r.k".to_owned(),
		};
		let rows = run(&join).await;
		// 1 unmatched left (k=1), 2 matches (k=2), 1 unmatched right
		// (k=3), 1 unmatched left (k=4).
		assert_eq!(rows.len(), 5);
	}

	#[tokio::test]
	async fn cross_join_is_a_cartesian_product() {
		let join = NestedLoopJoin {
			left: rows_node(&["l.a"], vec![vec![Value::Int(1)], vec![Value::Int(2)]]),
			right: RightSource::Plan(rows_node(
				&["r.b"],
				vec![vec![Value::Int(10)], vec![Value::Int(20)]],
			)),
			predicate: None,
			join_type: NestedJoinType::Cross,
			left_template: template(&["l.a"]),
			right_template: template(&["r.b"]),
			display: String::new(),
		};
		let rows = run(&join).await;
		assert_eq!(rows.len(), 4);
	}

	#[tokio::test]
	async fn outer_apply_pads_empty_factories() {
		let join = NestedLoopJoin {
			left: rows_node(&["l.a"], vec![vec![Value::Int(1)], vec![Value::Int(2)]]),
			right: RightSource::Factory(Arc::new(|outer: &Row| {
				// Only outer rows with a = 1 produce inner rows.
				let rows = if outer.get("l.a") == Some(&Value::Int(1)) {
					vec![vec![]]
				} else {
					vec![]
				};
				Ok(Arc::new(ConstantScan {
					columns: vec![],
					rows: rows
						.into_iter()
						.map(|_: Vec<CompiledExpr>| Vec::new())
						.collect(),
				}) as Node)
			})),
			predicate: None,
			join_type: NestedJoinType::OuterApply,
			left_template: template(&["l.a"]),
			right_template: template(&["r.b"]),
			display: String::new(),
		};
		let rows = run(&join).await;
		assert_eq!(rows.len(), 2);
		let padded = rows.iter().find(|r| r.get("l.a") == Some(&Value::Int(2))).unwrap();
		assert!(padded.get("r.b").unwrap().is_null());
	}
}
