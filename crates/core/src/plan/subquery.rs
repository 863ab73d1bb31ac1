//! Subquery rewrites: IN and EXISTS become FetchXML semi-join links when
//! foldable, hash semi/anti joins or indexed spool probes otherwise, and
//! scalar subqueries become cardinality-asserted value nodes.

use crate::err::{Error, Result};
use crate::exe::filter::ClientFilter;
use crate::exe::join::{HashJoin, JoinType};
use crate::exe::spool::{IndexSpool, IndexSpoolProbe};
use crate::exe::subquery::ScalarSubquery;
use crate::exe::Node;
use crate::exp::{compile_cond, compile_expr, CompileEnv};
use crate::plan::fetchxml::FetchLink;
use crate::plan::pushdown::{self, PushScope};
use crate::plan::select::CteScope;
use crate::plan::Planner;
use crate::sql::{
	ColumnRef, ComparisonOperator, Condition, Expression, Row, SelectColumn, SelectStatement,
};
use async_recursion::async_recursion;
use std::sync::Arc;

impl Planner {
	/// Try to fold an IN or EXISTS conjunct into a FetchXML semi-join
	/// link. Only the positive forms fold; FetchXML has no anti link.
	pub(crate) async fn push_subquery_link(
		&self,
		condition: &Condition,
		scope: &PushScope<'_>,
	) -> Result<Option<FetchLink>> {
		match condition {
			Condition::InSubquery {
				expr,
				subquery,
				negated: false,
			} => {
				let Some(outer) = expr.as_column() else {
					return Ok(None);
				};
				if scope.binding_of(outer) != Some(scope.base_binding()) {
					return Ok(None);
				}
				let Some((entity, inner_column, filter)) =
					self.simple_subquery_body(subquery, scope).await?
				else {
					return Ok(None);
				};
				Ok(Some(FetchLink {
					name: entity,
					from: inner_column,
					to: outer.column.clone(),
					alias: None,
					link_type: "in".to_owned(),
					attributes: Vec::new(),
					filter,
					links: Vec::new(),
				}))
			}
			Condition::Exists {
				subquery,
				negated: false,
			} => {
				let Some((inner, correlations)) = split_correlation(subquery, scope) else {
					return Ok(None);
				};
				let [(outer_column, inner_column)] = correlations.as_slice() else {
					return Ok(None);
				};
				let Some((entity, _, filter)) =
					self.simple_subquery_body_with(&inner, scope, None).await?
				else {
					return Ok(None);
				};
				Ok(Some(FetchLink {
					name: entity,
					from: inner_column.clone(),
					to: outer_column.column.clone(),
					alias: None,
					link_type: "exists".to_owned(),
					attributes: Vec::new(),
					filter,
					links: Vec::new(),
				}))
			}
			_ => Ok(None),
		}
	}

	/// A subquery body FetchXML can absorb: one local entity, no joins, no
	/// grouping, a fully pushable WHERE, and (for IN) a single projected
	/// column.
	async fn simple_subquery_body(
		&self,
		subquery: &SelectStatement,
		outer_scope: &PushScope<'_>,
	) -> Result<Option<(String, String, Option<crate::plan::fetchxml::FetchFilter>)>> {
		let column = match subquery.columns.as_slice() {
			[SelectColumn::Expr {
				expr,
				..
			}] => match expr.as_column() {
				Some(column) if column.table.is_none() => Some(column.column.clone()),
				_ => return Ok(None),
			},
			_ => return Ok(None),
		};
		self.simple_subquery_body_with(subquery, outer_scope, column).await
	}

	async fn simple_subquery_body_with(
		&self,
		subquery: &SelectStatement,
		outer_scope: &PushScope<'_>,
		column: Option<String>,
	) -> Result<Option<(String, String, Option<crate::plan::fetchxml::FetchFilter>)>> {
		if !subquery.joins.is_empty()
			|| !subquery.group.is_empty()
			|| subquery.having.is_some()
			|| !subquery.ctes.is_empty()
			|| subquery.distinct
			|| subquery.top.is_some()
		{
			return Ok(None);
		}
		let Some(ref from) = subquery.from else {
			return Ok(None);
		};
		if from.is_remote() || from.schema.as_deref() == Some("metadata") {
			return Ok(None);
		}
		if !self.meta.entity_exists(&from.entity).await? {
			return Ok(None);
		}
		let inner_scope = PushScope {
			tables: vec![(from.binding().to_lowercase(), from.entity.clone())],
			variables: outer_scope.variables,
		};
		let mut filter = None;
		if let Some(ref cond) = subquery.cond {
			let mut combined = crate::plan::fetchxml::FetchFilter::and();
			for conjunct in cond.conjuncts() {
				let Some(pushed) = pushdown::push_conjunct(conjunct, &inner_scope) else {
					return Ok(None);
				};
				if pushed.filter.kind == "and" && pushed.filter.filters.is_empty() {
					combined.conditions.extend(pushed.filter.conditions);
				} else {
					combined.filters.push(pushed.filter);
				}
			}
			if !combined.is_empty() {
				filter = Some(combined);
			}
		}
		Ok(Some((from.entity.clone(), column.unwrap_or_default(), filter)))
	}

	/// Apply one residual WHERE conjunct to the client-side pipeline,
	/// rewriting subquery shapes into joins, probes, or scalar nodes.
	#[async_recursion]
	pub(crate) async fn apply_residual_condition(
		&self,
		node: Node,
		condition: Condition,
		bindings: &[(String, String)],
		ctes: &CteScope,
	) -> Result<Node> {
		let env = CompileEnv::new();
		match condition {
			Condition::InSubquery {
				expr,
				subquery,
				negated,
			} => {
				// Semi-join for IN, anti-semi-join for NOT IN via the
				// LEFT JOIN + IS NULL equivalent.
				let subplan = self.plan_select(&subquery, ctes).await?;
				let Some(key_column) = subplan.columns.first().map(|c| c.name.clone()) else {
					return Err(Error::InvalidStatement {
						message: "the IN subquery projects no column".to_owned(),
					});
				};
				let display = format!(
					"{} {}IN (subquery)",
					expr,
					if negated {
						"NOT "
					} else {
						""
					}
				);
				Ok(Arc::new(HashJoin {
					left: node,
					right: subplan.node,
					left_keys: vec![compile_expr(&expr, &env)?],
					right_keys: vec![compile_expr(
						&Expression::Column(ColumnRef::bare(key_column)),
						&env,
					)?],
					residual: None,
					join_type: if negated {
						JoinType::Anti
					} else {
						JoinType::Semi
					},
					left_template: Row::new(),
					right_template: Row::new(),
					display,
				}) as Node)
			}
			Condition::Exists {
				subquery,
				negated,
			} => {
				let scope = PushScope {
					tables: bindings.to_vec(),
					variables: &self.variables,
				};
				match split_correlation(&subquery, &scope) {
					Some((mut inner, correlations)) if !correlations.is_empty() => {
						// Correlated EXISTS: an indexed spool of the inner
						// rows probed once per outer row. The inner plan
						// must project the correlation keys for the spool
						// to index on.
						for (_, inner_column) in &correlations {
							let projected = inner.columns.iter().any(|c| {
								c.output_name().eq_ignore_ascii_case(inner_column)
							});
							if !projected {
								inner.columns.push(SelectColumn::Expr {
									expr: Expression::Column(ColumnRef::bare(
										inner_column.clone(),
									)),
									alias: None,
								});
							}
						}
						let subplan = self.plan_select(&inner, ctes).await?;
						let mut outer_keys = Vec::with_capacity(correlations.len());
						let mut key_columns = Vec::with_capacity(correlations.len());
						for (outer_column, inner_column) in correlations {
							outer_keys.push(compile_expr(
								&Expression::Column(outer_column),
								&env,
							)?);
							key_columns.push(inner_column);
						}
						let spool = Arc::new(IndexSpool::new(subplan.node, key_columns));
						Ok(Arc::new(IndexSpoolProbe {
							input: node,
							spool,
							outer_keys,
							negated,
						}) as Node)
					}
					_ => {
						// Uncorrelated EXISTS: every outer row passes (or
						// fails, negated) on a non-empty inner result.
						let subplan = self.plan_select(&subquery, ctes).await?;
						let spool = Arc::new(IndexSpool::new(subplan.node, Vec::new()));
						Ok(Arc::new(IndexSpoolProbe {
							input: node,
							spool,
							outer_keys: Vec::new(),
							negated,
						}) as Node)
					}
				}
			}
			Condition::Not(inner) => {
				match *inner {
					Condition::InSubquery {
						expr,
						subquery,
						negated,
					} => {
						self.apply_residual_condition(
							node,
							Condition::InSubquery {
								expr,
								subquery,
								negated: !negated,
							},
							bindings,
							ctes,
						)
						.await
					}
					Condition::Exists {
						subquery,
						negated,
					} => {
						self.apply_residual_condition(
							node,
							Condition::Exists {
								subquery,
								negated: !negated,
							},
							bindings,
							ctes,
						)
						.await
					}
					other => self.apply_plain_filter(node, Condition::Not(Box::new(other)), ctes).await,
				}
			}
			other => self.apply_plain_filter(node, other, ctes).await,
		}
	}

	/// Compile a residual condition into a client filter, unwrapping any
	/// scalar subqueries it contains first.
	async fn apply_plain_filter(
		&self,
		node: Node,
		condition: Condition,
		ctes: &CteScope,
	) -> Result<Node> {
		let display = condition.to_string();
		let (condition, subqueries) = extract_scalar_subqueries_cond(condition);
		let mut node = node;
		for (subselect, output) in subqueries {
			let subplan = self.plan_select(&subselect, ctes).await?;
			node = Arc::new(ScalarSubquery {
				input: node,
				subplan: subplan.node,
				output,
			});
		}
		let env = CompileEnv::new();
		Ok(Arc::new(ClientFilter {
			child: node,
			predicate: compile_cond(&condition, &env)?,
			display,
		}))
	}

	/// Pull scalar subqueries out of a projection, returning the rewritten
	/// statement and the subqueries with their generated output columns.
	pub(crate) fn extract_projection_subqueries(
		&self,
		select: &SelectStatement,
	) -> (SelectStatement, Vec<(SelectStatement, String)>) {
		let mut out = select.clone();
		let mut found = Vec::new();
		for item in &mut out.columns {
			if let SelectColumn::Expr {
				expr,
				..
			} = item
			{
				*expr = extract_scalar_subqueries_expr(expr.clone(), &mut found);
			}
		}
		(out, found)
	}
}

/// Split a correlated subquery: remove equality conjuncts referencing the
/// outer scope from its WHERE clause and return them as
/// (outer column, inner column) pairs. `None` when the subquery carries
/// correlation the engine cannot express (a documented one-level,
/// equality-only limitation).
fn split_correlation(
	subquery: &SelectStatement,
	outer: &PushScope,
) -> Option<(SelectStatement, Vec<(ColumnRef, String)>)> {
	let inner_bindings: Vec<String> = subquery
		.from
		.iter()
		.map(|f| f.binding().to_lowercase())
		.chain(subquery.joins.iter().map(|j| j.table.binding().to_lowercase()))
		.collect();
	let is_outer = |column: &ColumnRef| {
		column.table.as_ref().is_some_and(|t| {
			let t = t.to_lowercase();
			!inner_bindings.contains(&t)
				&& outer.tables.iter().any(|(binding, _)| *binding == t)
		})
	};
	let is_inner = |column: &ColumnRef| match column.table {
		Some(ref t) => inner_bindings.contains(&t.to_lowercase()),
		None => true,
	};
	let mut correlations = Vec::new();
	let mut remaining = Vec::new();
	if let Some(ref cond) = subquery.cond {
		for conjunct in cond.conjuncts() {
			if let Condition::Comparison {
				op: ComparisonOperator::Eq,
				left,
				right,
			} = conjunct
			{
				if let (Some(l), Some(r)) = (left.as_column(), right.as_column()) {
					if is_outer(l) && is_inner(r) {
						correlations.push((l.clone(), r.column.clone()));
						continue;
					}
					if is_outer(r) && is_inner(l) {
						correlations.push((r.clone(), l.column.clone()));
						continue;
					}
				}
			}
			// Any other reference to the outer scope is out of reach.
			if references_outer(conjunct, &is_outer) {
				return None;
			}
			remaining.push(conjunct.clone());
		}
	}
	let mut inner = subquery.clone();
	inner.cond = Condition::conjoin(remaining);
	Some((inner, correlations))
}

fn references_outer(condition: &Condition, is_outer: &impl Fn(&ColumnRef) -> bool) -> bool {
	let mut found = false;
	let mut check = |column: &ColumnRef| {
		if is_outer(column) {
			found = true;
		}
	};
	walk_condition_columns(condition, &mut check);
	found
}

fn walk_condition_columns(condition: &Condition, check: &mut impl FnMut(&ColumnRef)) {
	let mut walk_expr = |expr: &Expression| {
		crate::plan::select::walk_columns(expr, check);
	};
	match condition {
		Condition::Comparison {
			left,
			right,
			..
		} => {
			walk_expr(left);
			walk_expr(right);
		}
		Condition::Like {
			expr,
			pattern,
			..
		} => {
			walk_expr(expr);
			walk_expr(pattern);
		}
		Condition::Null {
			expr,
			..
		} => walk_expr(expr),
		Condition::In {
			expr,
			list,
			..
		} => {
			walk_expr(expr);
			for item in list {
				walk_expr(item);
			}
		}
		Condition::Between {
			expr,
			low,
			high,
			..
		} => {
			walk_expr(expr);
			walk_expr(low);
			walk_expr(high);
		}
		Condition::And(a, b) | Condition::Or(a, b) => {
			walk_condition_columns(a, check);
			walk_condition_columns(b, check);
		}
		Condition::Not(inner) => walk_condition_columns(inner, check),
		Condition::Expr(expr) => walk_expr(expr),
		Condition::InSubquery {
			expr,
			..
		} => walk_expr(expr),
		Condition::Exists {
			..
		} => {}
	}
}

/// Replace scalar subqueries in an expression with generated column
/// references, collecting the subqueries.
fn extract_scalar_subqueries_expr(
	expr: Expression,
	found: &mut Vec<(SelectStatement, String)>,
) -> Expression {
	match expr {
		Expression::Subquery(subquery) => {
			let output = format!("sq{}", found.len() + 1);
			found.push((*subquery, output.clone()));
			Expression::Column(ColumnRef::bare(output))
		}
		Expression::Binary {
			op,
			left,
			right,
		} => Expression::Binary {
			op,
			left: Box::new(extract_scalar_subqueries_expr(*left, found)),
			right: Box::new(extract_scalar_subqueries_expr(*right, found)),
		},
		Expression::Unary {
			op,
			expr,
		} => Expression::Unary {
			op,
			expr: Box::new(extract_scalar_subqueries_expr(*expr, found)),
		},
		Expression::Cast {
			expr,
			to,
		} => Expression::Cast {
			expr: Box::new(extract_scalar_subqueries_expr(*expr, found)),
			to,
		},
		Expression::Function(mut call) => {
			call.args = call
				.args
				.into_iter()
				.map(|a| extract_scalar_subqueries_expr(a, found))
				.collect();
			Expression::Function(call)
		}
		other => other,
	}
}

fn extract_scalar_subqueries_cond(
	condition: Condition,
) -> (Condition, Vec<(SelectStatement, String)>) {
	let mut found = Vec::new();
	let rewritten = rewrite_cond(condition, &mut found);
	(rewritten, found)
}

fn rewrite_cond(condition: Condition, found: &mut Vec<(SelectStatement, String)>) -> Condition {
	match condition {
		Condition::Comparison {
			op,
			left,
			right,
		} => Condition::Comparison {
			op,
			left: extract_scalar_subqueries_expr(left, found),
			right: extract_scalar_subqueries_expr(right, found),
		},
		Condition::Between {
			expr,
			low,
			high,
			negated,
		} => Condition::Between {
			expr: extract_scalar_subqueries_expr(expr, found),
			low: extract_scalar_subqueries_expr(low, found),
			high: extract_scalar_subqueries_expr(high, found),
			negated,
		},
		Condition::And(a, b) => Condition::And(
			Box::new(rewrite_cond(*a, found)),
			Box::new(rewrite_cond(*b, found)),
		),
		Condition::Or(a, b) => Condition::Or(
			Box::new(rewrite_cond(*a, found)),
			Box::new(rewrite_cond(*b, found)),
		),
		Condition::Not(inner) => Condition::Not(Box::new(rewrite_cond(*inner, found))),
		other => other,
	}
}
