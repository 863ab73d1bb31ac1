use crate::sql::expression::{fmt_list, Expression};
use crate::sql::statement::SelectStatement;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison operators between two expressions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ComparisonOperator {
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
}

impl ComparisonOperator {
	/// The operator testing the opposite relation.
	pub fn negated(&self) -> ComparisonOperator {
		match self {
			ComparisonOperator::Eq => ComparisonOperator::Ne,
			ComparisonOperator::Ne => ComparisonOperator::Eq,
			ComparisonOperator::Lt => ComparisonOperator::Ge,
			ComparisonOperator::Le => ComparisonOperator::Gt,
			ComparisonOperator::Gt => ComparisonOperator::Le,
			ComparisonOperator::Ge => ComparisonOperator::Lt,
		}
	}
}

impl fmt::Display for ComparisonOperator {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(match self {
			ComparisonOperator::Eq => "=",
			ComparisonOperator::Ne => "<>",
			ComparisonOperator::Lt => "<",
			ComparisonOperator::Le => "<=",
			ComparisonOperator::Gt => ">",
			ComparisonOperator::Ge => ">=",
		})
	}
}

/// A truth-valued predicate node. WHERE and HAVING accept a row only when
/// their condition evaluates to true; unknown is treated as not-true.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Condition {
	Comparison {
		op: ComparisonOperator,
		left: Expression,
		right: Expression,
	},
	Like {
		expr: Expression,
		pattern: Expression,
		negated: bool,
	},
	Null {
		expr: Expression,
		negated: bool,
	},
	In {
		expr: Expression,
		list: Vec<Expression>,
		negated: bool,
	},
	InSubquery {
		expr: Expression,
		subquery: Box<SelectStatement>,
		negated: bool,
	},
	Exists {
		subquery: Box<SelectStatement>,
		negated: bool,
	},
	Between {
		expr: Expression,
		low: Expression,
		high: Expression,
		negated: bool,
	},
	And(Box<Condition>, Box<Condition>),
	Or(Box<Condition>, Box<Condition>),
	Not(Box<Condition>),
	/// A bare expression in condition position, accepted when it evaluates
	/// to boolean true.
	Expr(Expression),
}

impl Condition {
	/// Whether any node of this condition is an aggregate function call.
	pub fn contains_aggregate(&self) -> bool {
		match self {
			Condition::Comparison {
				left,
				right,
				..
			} => left.contains_aggregate() || right.contains_aggregate(),
			Condition::Like {
				expr,
				pattern,
				..
			} => expr.contains_aggregate() || pattern.contains_aggregate(),
			Condition::Null {
				expr,
				..
			} => expr.contains_aggregate(),
			Condition::In {
				expr,
				list,
				..
			} => expr.contains_aggregate() || list.iter().any(Expression::contains_aggregate),
			Condition::InSubquery {
				expr,
				..
			} => expr.contains_aggregate(),
			Condition::Exists {
				..
			} => false,
			Condition::Between {
				expr,
				low,
				high,
				..
			} => {
				expr.contains_aggregate() || low.contains_aggregate() || high.contains_aggregate()
			}
			Condition::And(a, b) | Condition::Or(a, b) => {
				a.contains_aggregate() || b.contains_aggregate()
			}
			Condition::Not(c) => c.contains_aggregate(),
			Condition::Expr(e) => e.contains_aggregate(),
		}
	}

	/// Whether any node of this condition is a subquery.
	pub fn contains_subquery(&self) -> bool {
		match self {
			Condition::InSubquery {
				..
			}
			| Condition::Exists {
				..
			} => true,
			Condition::Comparison {
				left,
				right,
				..
			} => left.contains_subquery() || right.contains_subquery(),
			Condition::Like {
				expr,
				pattern,
				..
			} => expr.contains_subquery() || pattern.contains_subquery(),
			Condition::Null {
				expr,
				..
			} => expr.contains_subquery(),
			Condition::In {
				expr,
				list,
				..
			} => expr.contains_subquery() || list.iter().any(Expression::contains_subquery),
			Condition::Between {
				expr,
				low,
				high,
				..
			} => expr.contains_subquery() || low.contains_subquery() || high.contains_subquery(),
			Condition::And(a, b) | Condition::Or(a, b) => {
				a.contains_subquery() || b.contains_subquery()
			}
			Condition::Not(c) => c.contains_subquery(),
			Condition::Expr(e) => e.contains_subquery(),
		}
	}

	/// Split a conjunction into its flattened AND-ed parts.
	pub fn conjuncts(&self) -> Vec<&Condition> {
		match self {
			Condition::And(a, b) => {
				let mut out = a.conjuncts();
				out.extend(b.conjuncts());
				out
			}
			other => vec![other],
		}
	}

	/// Rebuild a conjunction from parts. Returns `None` for an empty list.
	pub fn conjoin(parts: Vec<Condition>) -> Option<Condition> {
		parts.into_iter().reduce(|a, b| Condition::And(Box::new(a), Box::new(b)))
	}
}

impl fmt::Display for Condition {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Condition::Comparison {
				op,
				left,
				right,
			} => write!(f, "{left} {op} {right}"),
			Condition::Like {
				expr,
				pattern,
				negated,
			} => {
				write!(f, "{expr} {}LIKE {pattern}", if *negated { "NOT " } else { "" })
			}
			Condition::Null {
				expr,
				negated,
			} => {
				write!(f, "{expr} IS {}NULL", if *negated { "NOT " } else { "" })
			}
			Condition::In {
				expr,
				list,
				negated,
			} => {
				write!(f, "{expr} {}IN (", if *negated { "NOT " } else { "" })?;
				fmt_list(f, list)?;
				f.write_str(")")
			}
			Condition::InSubquery {
				expr,
				subquery,
				negated,
			} => {
				write!(f, "{expr} {}IN ({subquery})", if *negated { "NOT " } else { "" })
			}
			Condition::Exists {
				subquery,
				negated,
			} => {
				write!(f, "{}EXISTS ({subquery})", if *negated { "NOT " } else { "" })
			}
			Condition::Between {
				expr,
				low,
				high,
				negated,
			} => write!(
				f,
				"{expr} {}BETWEEN {low} AND {high}",
				if *negated { "NOT " } else { "" }
			),
			Condition::And(a, b) => {
				fmt_cond_operand(f, a, 2)?;
				f.write_str(" AND ")?;
				fmt_cond_operand(f, b, 2)
			}
			Condition::Or(a, b) => {
				fmt_cond_operand(f, a, 1)?;
				f.write_str(" OR ")?;
				fmt_cond_operand(f, b, 1)
			}
			Condition::Not(c) => {
				f.write_str("NOT ")?;
				fmt_cond_operand(f, c, 3)
			}
			Condition::Expr(e) => write!(f, "{e}"),
		}
	}
}

fn cond_power(cond: &Condition) -> u8 {
	match cond {
		Condition::Or(..) => 1,
		Condition::And(..) => 2,
		_ => u8::MAX,
	}
}

fn fmt_cond_operand(f: &mut fmt::Formatter, cond: &Condition, min_power: u8) -> fmt::Result {
	if cond_power(cond) < min_power {
		write!(f, "({cond})")
	} else {
		write!(f, "{cond}")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sql::expression::ColumnRef;

	fn cmp(name: &str) -> Condition {
		Condition::Comparison {
			op: ComparisonOperator::Eq,
			left: Expression::Column(ColumnRef::bare(name)),
			right: Expression::Literal(crate::sql::expression::Literal::Int(1)),
		}
	}

	#[test]
	fn or_inside_and_keeps_parentheses() {
		let cond = Condition::And(
			Box::new(Condition::Or(Box::new(cmp("a")), Box::new(cmp("b")))),
			Box::new(cmp("c")),
		);
		assert_eq!(cond.to_string(), "(a = 1 OR b = 1) AND c = 1");
	}

	#[test]
	fn conjuncts_flatten_nested_ands() {
		let cond = Condition::And(
			Box::new(Condition::And(Box::new(cmp("a")), Box::new(cmp("b")))),
			Box::new(cmp("c")),
		);
		assert_eq!(cond.conjuncts().len(), 3);
	}
}
