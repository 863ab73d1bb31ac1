//! Push-down analysis: which conditions, groupings, aggregates, and
//! orderings the backend's FetchXML dialect can evaluate, and their
//! translations.

use crate::plan::fetchxml::{FetchCondition, FetchFilter, FetchOrder};
use crate::sql::expression::is_aggregate_name;
use crate::sql::{
	ColumnRef, ComparisonOperator, Condition, Expression, FunctionCall, Literal, OrderItem,
	Value,
};
use chrono::SecondsFormat;
use std::collections::HashMap;

/// The tables visible to push-down analysis: binding name (alias or entity
/// name, lowercase) paired with the entity's logical name. The first entry
/// is the base table.
pub(crate) struct PushScope<'a> {
	pub tables: Vec<(String, String)>,
	pub variables: &'a HashMap<String, Value>,
}

impl PushScope<'_> {
	/// The binding a column reference targets: its qualifier when present,
	/// otherwise the base table.
	pub fn binding_of(&self, column: &ColumnRef) -> Option<&str> {
		match column.table {
			Some(ref qualifier) => {
				let qualifier = qualifier.to_lowercase();
				self.tables
					.iter()
					.find(|(binding, _)| *binding == qualifier)
					.map(|(binding, _)| binding.as_str())
			}
			None => self.tables.first().map(|(binding, _)| binding.as_str()),
		}
	}

	pub fn base_binding(&self) -> &str {
		self.tables.first().map(|(binding, _)| binding.as_str()).unwrap_or_default()
	}
}

/// A condition the backend can evaluate, routed to the filter of one
/// table.
pub(crate) struct Pushed {
	pub binding: String,
	pub filter: FetchFilter,
}

/// Try to push one conjunct. `None` means the conjunct stays client-side.
pub(crate) fn push_conjunct(condition: &Condition, scope: &PushScope) -> Option<Pushed> {
	let (binding, filter) = push_filter(condition, scope)?;
	Some(Pushed {
		binding: binding.to_owned(),
		filter,
	})
}

/// Push a condition subtree, requiring every leaf to target the same
/// binding.
fn push_filter<'s>(condition: &Condition, scope: &'s PushScope) -> Option<(&'s str, FetchFilter)> {
	match condition {
		Condition::And(a, b) => merge(push_filter(a, scope)?, push_filter(b, scope)?, "and"),
		Condition::Or(a, b) => merge(push_filter(a, scope)?, push_filter(b, scope)?, "or"),
		Condition::Not(inner) => {
			let (binding, condition) = push_leaf_negated(inner, scope)?;
			let mut filter = FetchFilter::and();
			filter.conditions.push(condition);
			Some((binding, filter))
		}
		Condition::Between {
			expr,
			low,
			high,
			negated,
		} => {
			let column = plain_column(expr)?;
			let binding = scope.binding_of(column)?;
			let low = render_value(low, scope)?;
			let high = render_value(high, scope)?;
			let filter = if *negated {
				let mut f = FetchFilter::or();
				f.conditions.push(FetchCondition::new(&column.column, "lt", Some(low)));
				f.conditions.push(FetchCondition::new(&column.column, "gt", Some(high)));
				f
			} else {
				let mut f = FetchFilter::and();
				f.conditions.push(FetchCondition::new(&column.column, "ge", Some(low)));
				f.conditions.push(FetchCondition::new(&column.column, "le", Some(high)));
				f
			};
			Some((binding, filter))
		}
		other => {
			let (binding, condition) = push_leaf(other, scope)?;
			let mut filter = FetchFilter::and();
			filter.conditions.push(condition);
			Some((binding, filter))
		}
	}
}

fn merge<'a>(
	a: (&'a str, FetchFilter),
	b: (&'a str, FetchFilter),
	kind: &str,
) -> Option<(&'a str, FetchFilter)> {
	// Cross-table boolean groups stay client-side.
	if a.0 != b.0 {
		return None;
	}
	let mut filter = FetchFilter {
		kind: kind.to_owned(),
		conditions: Vec::new(),
		filters: Vec::new(),
	};
	for side in [a.1, b.1] {
		// Flatten same-kind children to keep the emitted XML shallow.
		if side.kind == filter.kind && side.filters.is_empty() {
			filter.conditions.extend(side.conditions);
		} else {
			filter.filters.push(side);
		}
	}
	Some((a.0, filter))
}

fn push_leaf<'s>(
	condition: &Condition,
	scope: &'s PushScope,
) -> Option<(&'s str, FetchCondition)> {
	match condition {
		Condition::Comparison {
			op,
			left,
			right,
		} => {
			// Column against a constant, either way around. Column against
			// column is never pushable.
			if let (Some(column), Some(value)) = (plain_column(left), render_value(right, scope))
			{
				let binding = scope.binding_of(column)?;
				return Some((
					binding,
					FetchCondition::new(&column.column, comparison_op(*op), Some(value)),
				));
			}
			if let (Some(value), Some(column)) = (render_value(left, scope), plain_column(right))
			{
				let binding = scope.binding_of(column)?;
				return Some((
					binding,
					FetchCondition::new(&column.column, comparison_op(op.flipped()), Some(value)),
				));
			}
			None
		}
		Condition::Like {
			expr,
			pattern,
			negated,
		} => {
			let column = plain_column(expr)?;
			let binding = scope.binding_of(column)?;
			let pattern = render_value(pattern, scope)?;
			let operator = if *negated {
				"not-like"
			} else {
				"like"
			};
			Some((binding, FetchCondition::new(&column.column, operator, Some(pattern))))
		}
		Condition::Null {
			expr,
			negated,
		} => {
			let column = plain_column(expr)?;
			let binding = scope.binding_of(column)?;
			let operator = if *negated {
				"not-null"
			} else {
				"null"
			};
			Some((binding, FetchCondition::new(&column.column, operator, None)))
		}
		Condition::In {
			expr,
			list,
			negated,
		} => {
			let column = plain_column(expr)?;
			let binding = scope.binding_of(column)?;
			let mut condition = FetchCondition::new(
				&column.column,
				if *negated {
					"not-in"
				} else {
					"in"
				},
				None,
			);
			for item in list {
				condition.values.push(render_value(item, scope)?);
			}
			Some((binding, condition))
		}
		_ => None,
	}
}

fn push_leaf_negated<'s>(
	condition: &Condition,
	scope: &'s PushScope,
) -> Option<(&'s str, FetchCondition)> {
	match condition {
		Condition::Comparison {
			op,
			left,
			right,
		} => push_leaf(
			&Condition::Comparison {
				op: op.negated(),
				left: left.clone(),
				right: right.clone(),
			},
			scope,
		),
		Condition::Like {
			expr,
			pattern,
			negated,
		} => push_leaf(
			&Condition::Like {
				expr: expr.clone(),
				pattern: pattern.clone(),
				negated: !negated,
			},
			scope,
		),
		Condition::Null {
			expr,
			negated,
		} => push_leaf(
			&Condition::Null {
				expr: expr.clone(),
				negated: !negated,
			},
			scope,
		),
		_ => None,
	}
}

fn comparison_op(op: ComparisonOperator) -> &'static str {
	match op {
		ComparisonOperator::Eq => "eq",
		ComparisonOperator::Ne => "ne",
		ComparisonOperator::Lt => "lt",
		ComparisonOperator::Le => "le",
		ComparisonOperator::Gt => "gt",
		ComparisonOperator::Ge => "ge",
	}
}

impl ComparisonOperator {
	/// The operator with its operands swapped, as in `5 < x` ⇒ `x > 5`.
	pub(crate) fn flipped(&self) -> ComparisonOperator {
		match self {
			ComparisonOperator::Eq => ComparisonOperator::Eq,
			ComparisonOperator::Ne => ComparisonOperator::Ne,
			ComparisonOperator::Lt => ComparisonOperator::Gt,
			ComparisonOperator::Le => ComparisonOperator::Ge,
			ComparisonOperator::Gt => ComparisonOperator::Lt,
			ComparisonOperator::Ge => ComparisonOperator::Le,
		}
	}
}

/// The column reference behind an expression, when it is nothing more.
pub(crate) fn plain_column(expr: &Expression) -> Option<&ColumnRef> {
	expr.as_column()
}

/// Render a constant-valued expression into FetchXML condition-value text.
/// Variables are inlined from the session scope at plan time.
pub(crate) fn render_value(expr: &Expression, scope: &PushScope) -> Option<String> {
	match expr {
		Expression::Literal(literal) => match literal {
			Literal::Null => None,
			Literal::Bool(v) => Some(if *v { "1" } else { "0" }.to_owned()),
			Literal::Int(v) => Some(v.to_string()),
			Literal::Decimal(v) => Some(v.to_string()),
			Literal::Float(v) => Some(v.to_string()),
			Literal::Strand(v) => Some(v.clone()),
		},
		Expression::Variable(name) => {
			let value = scope.variables.get(&name.to_lowercase())?;
			match value {
				Value::Null => None,
				Value::DateTime(d) => Some(d.to_rfc3339_opts(SecondsFormat::Secs, true)),
				other => Some(other.as_string()),
			}
		}
		_ => None,
	}
}

/// Fold a GROUP BY expression into a FetchXML grouping: a plain column, or
/// one of the date-part functions over a column, which become
/// `dategrouping` attributes.
pub(crate) fn fold_group(expr: &Expression) -> Option<(String, Option<String>)> {
	match expr {
		Expression::Column(column) => Some((column.column.clone(), None)),
		Expression::Function(call) if call.over.is_none() && call.args.len() == 1 => {
			let part = match call.name.to_uppercase().as_str() {
				"YEAR" => "year",
				"QUARTER" => "quarter",
				"MONTH" => "month",
				"WEEK" => "week",
				"DAY" => "day",
				_ => return None,
			};
			let column = plain_column(&call.args[0])?;
			Some((column.column.clone(), Some(part.to_owned())))
		}
		_ => None,
	}
}

/// Translate an aggregate call into its FetchXML aggregate operation and
/// source column. `None` means client-side aggregation is required.
pub(crate) fn push_aggregate(call: &FunctionCall, primary_id: &str) -> Option<(String, String)> {
	if !is_aggregate_name(&call.name) || call.over.is_some() || call.distinct {
		return None;
	}
	let name = call.name.to_uppercase();
	match name.as_str() {
		"COUNT" | "COUNT_BIG" => {
			if call.star {
				Some((primary_id.to_owned(), "count".to_owned()))
			} else {
				let column = plain_column(call.args.first()?)?;
				Some((column.column.clone(), "countcolumn".to_owned()))
			}
		}
		"SUM" | "AVG" | "MIN" | "MAX" => {
			let column = plain_column(call.args.first()?)?;
			Some((column.column.clone(), name.to_lowercase()))
		}
		// The variance family needs sufficient statistics FetchXML cannot
		// produce.
		_ => None,
	}
}

/// Translate an ORDER BY item for push-down. In aggregate mode the item
/// must name a grouped or aggregated output alias; otherwise it must be a
/// plain base-table column.
pub(crate) fn push_order(
	item: &OrderItem,
	scope: &PushScope,
	aggregate_outputs: Option<&HashMap<String, String>>,
) -> Option<FetchOrder> {
	match aggregate_outputs {
		Some(outputs) => {
			let alias = match &item.expr {
				Expression::Column(column) if column.table.is_none() => {
					outputs.get(&column.column.to_lowercase()).cloned()
				}
				Expression::Function(call) => outputs.get(&call.signature()).cloned(),
				_ => None,
			}?;
			Some(FetchOrder {
				attribute: None,
				alias: Some(alias),
				descending: item.descending,
			})
		}
		None => {
			let column = plain_column(&item.expr)?;
			let binding = scope.binding_of(column)?;
			// Ordering on linked tables stays client-side.
			if binding != scope.base_binding() {
				return None;
			}
			Some(FetchOrder {
				attribute: Some(column.column.clone()),
				alias: None,
				descending: item.descending,
			})
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::syn::parser::Parser;

	fn scope(vars: &HashMap<String, Value>) -> PushScope {
		PushScope {
			tables: vec![
				("account".to_owned(), "account".to_owned()),
				("c".to_owned(), "contact".to_owned()),
			],
			variables: vars,
		}
	}

	fn cond(text: &str) -> Condition {
		Parser::new(text).parse_condition().unwrap()
	}

	#[test]
	fn simple_comparison_pushes() {
		let vars = HashMap::new();
		let pushed = push_conjunct(&cond("revenue > 1000"), &scope(&vars)).unwrap();
		assert_eq!(pushed.binding, "account");
		assert_eq!(pushed.filter.conditions[0].operator, "gt");
		assert_eq!(pushed.filter.conditions[0].value.as_deref(), Some("1000"));
	}

	#[test]
	fn flipped_comparison_normalizes() {
		let vars = HashMap::new();
		let pushed = push_conjunct(&cond("1000 < revenue"), &scope(&vars)).unwrap();
		assert_eq!(pushed.filter.conditions[0].operator, "gt");
	}

	#[test]
	fn column_to_column_stays_client_side() {
		let vars = HashMap::new();
		assert!(push_conjunct(&cond("revenue = budget"), &scope(&vars)).is_none());
	}

	#[test]
	fn function_calls_stay_client_side() {
		let vars = HashMap::new();
		assert!(push_conjunct(&cond("UPPER(name) = 'X'"), &scope(&vars)).is_none());
	}

	#[test]
	fn cross_table_or_stays_client_side() {
		let vars = HashMap::new();
		assert!(push_conjunct(&cond("name = 'x' OR c.fullname = 'y'"), &scope(&vars)).is_none());
	}

	#[test]
	fn same_table_or_pushes_as_a_group() {
		let vars = HashMap::new();
		let pushed = push_conjunct(&cond("name = 'x' OR name = 'y'"), &scope(&vars)).unwrap();
		assert_eq!(pushed.filter.kind, "or");
		assert_eq!(pushed.filter.conditions.len(), 2);
	}

	#[test]
	fn variables_inline_at_plan_time() {
		let mut vars = HashMap::new();
		vars.insert("minimum".to_owned(), Value::Int(500));
		let pushed = push_conjunct(&cond("revenue >= @minimum"), &scope(&vars)).unwrap();
		assert_eq!(pushed.filter.conditions[0].value.as_deref(), Some("500"));
	}

	#[test]
	fn group_folding_recognizes_date_parts() {
		let expr = Parser::new("YEAR(createdon)").parse_expr().unwrap();
		assert_eq!(
			fold_group(&expr),
			Some(("createdon".to_owned(), Some("year".to_owned())))
		);
		let expr = Parser::new("UPPER(name)").parse_expr().unwrap();
		assert_eq!(fold_group(&expr), None);
	}

	#[test]
	fn between_expands_to_a_range_filter() {
		let vars = HashMap::new();
		let pushed =
			push_conjunct(&cond("revenue BETWEEN 10 AND 20"), &scope(&vars)).unwrap();
		assert_eq!(pushed.filter.conditions.len(), 2);
		assert_eq!(pushed.filter.conditions[0].operator, "ge");
		assert_eq!(pushed.filter.conditions[1].operator, "le");
	}
}
