use crate::sql::cast::CastType;
use crate::sql::condition::Condition;
use crate::sql::statement::SelectStatement;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A literal scalar appearing in SQL text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Literal {
	Null,
	Bool(bool),
	Int(i64),
	Decimal(Decimal),
	Float(f64),
	Strand(String),
}

impl fmt::Display for Literal {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Literal::Null => f.write_str("NULL"),
			Literal::Bool(v) => write!(f, "{}", if *v { 1 } else { 0 }),
			Literal::Int(v) => write!(f, "{v}"),
			Literal::Decimal(v) => write!(f, "{v}"),
			Literal::Float(v) => write!(f, "{v:?}"),
			Literal::Strand(v) => write!(f, "'{}'", v.replace('\'', "''")),
		}
	}
}

/// A possibly-qualified column reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
	pub table: Option<String>,
	pub column: String,
}

impl ColumnRef {
	pub fn bare(column: impl Into<String>) -> Self {
		ColumnRef {
			table: None,
			column: column.into(),
		}
	}
}

impl fmt::Display for ColumnRef {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if let Some(ref t) = self.table {
			write!(f, "{t}.")?;
		}
		f.write_str(&self.column)
	}
}

/// Arithmetic binary operators, in the precedence the parser assigns them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BinaryOperator {
	Multiply,
	Divide,
	Modulo,
	Add,
	Subtract,
}

impl BinaryOperator {
	/// Binding power for precedence-climbing; higher binds tighter.
	pub fn binding_power(&self) -> u8 {
		match self {
			BinaryOperator::Multiply | BinaryOperator::Divide | BinaryOperator::Modulo => 20,
			BinaryOperator::Add | BinaryOperator::Subtract => 10,
		}
	}
}

impl fmt::Display for BinaryOperator {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(match self {
			BinaryOperator::Multiply => "*",
			BinaryOperator::Divide => "/",
			BinaryOperator::Modulo => "%",
			BinaryOperator::Add => "+",
			BinaryOperator::Subtract => "-",
		})
	}
}

/// Unary expression operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum UnaryOperator {
	Negate,
}

impl fmt::Display for UnaryOperator {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("-")
	}
}

/// The OVER clause of a window function call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct OverClause {
	pub partition_by: Vec<Expression>,
	pub order_by: Vec<OrderItem>,
}

impl fmt::Display for OverClause {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("OVER (")?;
		if !self.partition_by.is_empty() {
			f.write_str("PARTITION BY ")?;
			fmt_list(f, &self.partition_by)?;
			if !self.order_by.is_empty() {
				f.write_str(" ")?;
			}
		}
		if !self.order_by.is_empty() {
			f.write_str("ORDER BY ")?;
			fmt_list(f, &self.order_by)?;
		}
		f.write_str(")")
	}
}

/// One ORDER BY item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
	pub expr: Expression,
	pub descending: bool,
}

impl fmt::Display for OrderItem {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.expr)?;
		if self.descending {
			f.write_str(" DESC")?;
		}
		Ok(())
	}
}

/// A scalar, aggregate, or window function call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct FunctionCall {
	pub name: String,
	pub args: Vec<Expression>,
	/// Whether the call was `f(*)`, as in `COUNT(*)`.
	pub star: bool,
	pub distinct: bool,
	pub over: Option<OverClause>,
}

impl FunctionCall {
	pub fn new(name: impl Into<String>, args: Vec<Expression>) -> Self {
		FunctionCall {
			name: name.into(),
			args,
			star: false,
			distinct: false,
			over: None,
		}
	}

	/// The normalized signature of this call, used to resolve references to
	/// aggregate output aliases in HAVING and ORDER BY.
	pub fn signature(&self) -> String {
		self.to_string().to_lowercase()
	}
}

impl fmt::Display for FunctionCall {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}(", self.name.to_uppercase())?;
		if self.distinct {
			f.write_str("DISTINCT ")?;
		}
		if self.star {
			f.write_str("*")?;
		} else {
			fmt_list(f, &self.args)?;
		}
		f.write_str(")")?;
		if let Some(ref over) = self.over {
			write!(f, " {over}")?;
		}
		Ok(())
	}
}

/// A searched or simple CASE expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum CaseExpression {
	Searched {
		branches: Vec<(Condition, Expression)>,
		otherwise: Option<Box<Expression>>,
	},
	Simple {
		operand: Box<Expression>,
		branches: Vec<(Expression, Expression)>,
		otherwise: Option<Box<Expression>>,
	},
}

impl fmt::Display for CaseExpression {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("CASE")?;
		match self {
			CaseExpression::Searched {
				branches,
				otherwise,
			} => {
				for (cond, expr) in branches {
					write!(f, " WHEN {cond} THEN {expr}")?;
				}
				if let Some(e) = otherwise {
					write!(f, " ELSE {e}")?;
				}
			}
			CaseExpression::Simple {
				operand,
				branches,
				otherwise,
			} => {
				write!(f, " {operand}")?;
				for (val, expr) in branches {
					write!(f, " WHEN {val} THEN {expr}")?;
				}
				if let Some(e) = otherwise {
					write!(f, " ELSE {e}")?;
				}
			}
		}
		f.write_str(" END")
	}
}

/// A scalar-producing expression node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Expression {
	Literal(Literal),
	Column(ColumnRef),
	Variable(String),
	Binary {
		op: BinaryOperator,
		left: Box<Expression>,
		right: Box<Expression>,
	},
	Unary {
		op: UnaryOperator,
		expr: Box<Expression>,
	},
	Function(FunctionCall),
	Case(Box<CaseExpression>),
	Cast {
		expr: Box<Expression>,
		to: CastType,
	},
	Subquery(Box<SelectStatement>),
}

impl Expression {
	/// Whether any node of this expression is an aggregate function call.
	pub fn contains_aggregate(&self) -> bool {
		match self {
			Expression::Function(call) => {
				(call.over.is_none() && is_aggregate_name(&call.name))
					|| call.args.iter().any(Expression::contains_aggregate)
			}
			Expression::Binary {
				left,
				right,
				..
			} => left.contains_aggregate() || right.contains_aggregate(),
			Expression::Unary {
				expr,
				..
			} => expr.contains_aggregate(),
			Expression::Case(case) => match case.as_ref() {
				CaseExpression::Searched {
					branches,
					otherwise,
				} => {
					branches.iter().any(|(c, e)| c.contains_aggregate() || e.contains_aggregate())
						|| otherwise.as_ref().is_some_and(|e| e.contains_aggregate())
				}
				CaseExpression::Simple {
					operand,
					branches,
					otherwise,
				} => {
					operand.contains_aggregate()
						|| branches
							.iter()
							.any(|(v, e)| v.contains_aggregate() || e.contains_aggregate())
						|| otherwise.as_ref().is_some_and(|e| e.contains_aggregate())
				}
			},
			Expression::Cast {
				expr,
				..
			} => expr.contains_aggregate(),
			_ => false,
		}
	}

	/// Whether any node of this expression is a window function call.
	pub fn contains_window(&self) -> bool {
		match self {
			Expression::Function(call) => {
				call.over.is_some() || call.args.iter().any(Expression::contains_window)
			}
			Expression::Binary {
				left,
				right,
				..
			} => left.contains_window() || right.contains_window(),
			Expression::Unary {
				expr,
				..
			} => expr.contains_window(),
			Expression::Cast {
				expr,
				..
			} => expr.contains_window(),
			_ => false,
		}
	}

	/// Whether any node of this expression is a subquery.
	pub fn contains_subquery(&self) -> bool {
		match self {
			Expression::Subquery(_) => true,
			Expression::Function(call) => call.args.iter().any(Expression::contains_subquery),
			Expression::Binary {
				left,
				right,
				..
			} => left.contains_subquery() || right.contains_subquery(),
			Expression::Unary {
				expr,
				..
			} => expr.contains_subquery(),
			Expression::Cast {
				expr,
				..
			} => expr.contains_subquery(),
			_ => false,
		}
	}

	/// The bare column name when this expression is a plain column
	/// reference.
	pub fn as_column(&self) -> Option<&ColumnRef> {
		match self {
			Expression::Column(c) => Some(c),
			_ => None,
		}
	}
}

/// Whether a function name denotes one of the recognized aggregates.
pub fn is_aggregate_name(name: &str) -> bool {
	matches!(
		name.to_uppercase().as_str(),
		"COUNT" | "COUNT_BIG" | "SUM" | "AVG" | "MIN" | "MAX" | "STDEV" | "STDEVP" | "VAR"
			| "VARP"
	)
}

impl fmt::Display for Expression {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Expression::Literal(l) => write!(f, "{l}"),
			Expression::Column(c) => write!(f, "{c}"),
			Expression::Variable(name) => write!(f, "@{name}"),
			Expression::Binary {
				op,
				left,
				right,
			} => {
				fmt_operand(f, left, op.binding_power())?;
				write!(f, " {op} ")?;
				fmt_operand(f, right, op.binding_power() + 1)
			}
			Expression::Unary {
				op,
				expr,
			} => {
				write!(f, "{op}")?;
				fmt_operand(f, expr, 30)
			}
			Expression::Function(call) => write!(f, "{call}"),
			Expression::Case(case) => write!(f, "{case}"),
			Expression::Cast {
				expr,
				to,
			} => write!(f, "CAST({expr} AS {to})"),
			Expression::Subquery(q) => write!(f, "({q})"),
		}
	}
}

/// Parenthesise operands whose binding power is lower than the context
/// requires, so printing preserves the parsed shape.
fn fmt_operand(f: &mut fmt::Formatter, expr: &Expression, min_power: u8) -> fmt::Result {
	let power = match expr {
		Expression::Binary {
			op,
			..
		} => op.binding_power(),
		_ => u8::MAX,
	};
	if power < min_power {
		write!(f, "({expr})")
	} else {
		write!(f, "{expr}")
	}
}

pub(crate) fn fmt_list<T: fmt::Display>(f: &mut fmt::Formatter, items: &[T]) -> fmt::Result {
	for (i, item) in items.iter().enumerate() {
		if i > 0 {
			f.write_str(", ")?;
		}
		write!(f, "{item}")?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn col(name: &str) -> Expression {
		Expression::Column(ColumnRef::bare(name))
	}

	#[test]
	fn display_preserves_precedence() {
		// (a + b) * c must keep its parentheses.
		let expr = Expression::Binary {
			op: BinaryOperator::Multiply,
			left: Box::new(Expression::Binary {
				op: BinaryOperator::Add,
				left: Box::new(col("a")),
				right: Box::new(col("b")),
			}),
			right: Box::new(col("c")),
		};
		assert_eq!(expr.to_string(), "(a + b) * c");
	}

	#[test]
	fn aggregate_signature_is_normalized() {
		let mut call = FunctionCall::new("count", vec![]);
		call.star = true;
		assert_eq!(call.signature(), "count(*)");
		let call = FunctionCall::new("Sum", vec![col("Revenue")]);
		assert_eq!(call.signature(), "sum(revenue)");
	}

	#[test]
	fn window_calls_are_not_aggregates() {
		let mut call = FunctionCall::new("count", vec![]);
		call.star = true;
		call.over = Some(OverClause::default());
		let expr = Expression::Function(call);
		assert!(!expr.contains_aggregate());
		assert!(expr.contains_window());
	}
}
