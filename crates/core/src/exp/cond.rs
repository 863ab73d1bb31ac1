//! Condition compilation with Kleene three-valued logic.

use crate::err::{Error, Result};
use crate::exp::{expr, CompileEnv, CompiledCond, Truth};
use crate::sql::{ComparisonOperator, Condition, Expression, Literal, Value};
use regex::Regex;
use std::cmp::Ordering;
use std::sync::Arc;

pub(super) fn compile(condition: &Condition, env: &CompileEnv) -> Result<CompiledCond> {
	match condition {
		Condition::Comparison {
			op,
			left,
			right,
		} => {
			let op = *op;
			let left = expr::compile(left, env)?;
			let right = expr::compile(right, env)?;
			Ok(Arc::new(move |row, bindings| {
				let l = left(row, bindings)?;
				let r = right(row, bindings)?;
				Ok(compare_truth(op, l.compare(&r)?))
			}))
		}
		Condition::Like {
			expr: subject,
			pattern,
			negated,
		} => compile_like(subject, pattern, *negated, env),
		Condition::Null {
			expr: subject,
			negated,
		} => {
			let negated = *negated;
			let subject = expr::compile(subject, env)?;
			Ok(Arc::new(move |row, bindings| {
				let is_null = subject(row, bindings)?.is_null();
				Ok(Truth::from(is_null != negated))
			}))
		}
		Condition::In {
			expr: subject,
			list,
			negated,
		} => {
			let negated = *negated;
			let subject = expr::compile(subject, env)?;
			let list = list.iter().map(|e| expr::compile(e, env)).collect::<Result<Vec<_>>>()?;
			Ok(Arc::new(move |row, bindings| {
				let needle = subject(row, bindings)?;
				if needle.is_null() {
					return Ok(Truth::Unknown);
				}
				let mut saw_null = false;
				for candidate in &list {
					let candidate = candidate(row, bindings)?;
					if candidate.is_null() {
						saw_null = true;
						continue;
					}
					if needle.compare(&candidate)? == Some(Ordering::Equal) {
						return Ok(Truth::from(!negated));
					}
				}
				// No match: NULL members make the outcome unknown.
				let truth = if saw_null {
					Truth::Unknown
				} else {
					Truth::False
				};
				Ok(if negated {
					truth.not()
				} else {
					truth
				})
			}))
		}
		Condition::Between {
			expr: subject,
			low,
			high,
			negated,
		} => {
			// BETWEEN expands to `x >= lo AND x <= hi` with K3 semantics.
			let negated = *negated;
			let subject = expr::compile(subject, env)?;
			let low = expr::compile(low, env)?;
			let high = expr::compile(high, env)?;
			Ok(Arc::new(move |row, bindings| {
				let v = subject(row, bindings)?;
				let lo = compare_truth(ComparisonOperator::Ge, v.compare(&low(row, bindings)?)?);
				let hi = compare_truth(ComparisonOperator::Le, v.compare(&high(row, bindings)?)?);
				let truth = lo.and(hi);
				Ok(if negated {
					truth.not()
				} else {
					truth
				})
			}))
		}
		Condition::And(a, b) => {
			let a = compile(a, env)?;
			let b = compile(b, env)?;
			Ok(Arc::new(move |row, bindings| {
				Ok(a(row, bindings)?.and(b(row, bindings)?))
			}))
		}
		Condition::Or(a, b) => {
			let a = compile(a, env)?;
			let b = compile(b, env)?;
			Ok(Arc::new(move |row, bindings| {
				Ok(a(row, bindings)?.or(b(row, bindings)?))
			}))
		}
		Condition::Not(inner) => {
			let inner = compile(inner, env)?;
			Ok(Arc::new(move |row, bindings| Ok(inner(row, bindings)?.not())))
		}
		Condition::Expr(e) => {
			let e = expr::compile(e, env)?;
			Ok(Arc::new(move |row, bindings| match e(row, bindings)? {
				Value::Null => Ok(Truth::Unknown),
				Value::Bool(v) => Ok(Truth::from(v)),
				other => Err(Error::TypeMismatch {
					message: format!(
						"an expression of type {} is not a condition",
						other.kind().map(|k| k.to_string()).unwrap_or_else(|| "null".into())
					),
				}),
			}))
		}
		Condition::InSubquery {
			..
		}
		| Condition::Exists {
			..
		} => Err(Error::Unreachable(
			"subquery condition reached the compiler without being planned",
		)),
	}
}

fn compare_truth(op: ComparisonOperator, ordering: Option<Ordering>) -> Truth {
	let Some(ordering) = ordering else {
		return Truth::Unknown;
	};
	let result = match op {
		ComparisonOperator::Eq => ordering == Ordering::Equal,
		ComparisonOperator::Ne => ordering != Ordering::Equal,
		ComparisonOperator::Lt => ordering == Ordering::Less,
		ComparisonOperator::Le => ordering != Ordering::Greater,
		ComparisonOperator::Gt => ordering == Ordering::Greater,
		ComparisonOperator::Ge => ordering != Ordering::Less,
	};
	Truth::from(result)
}

fn compile_like(
	subject: &Expression,
	pattern: &Expression,
	negated: bool,
	env: &CompileEnv,
) -> Result<CompiledCond> {
	let subject = expr::compile(subject, env)?;
	// A literal pattern compiles its regex once; dynamic patterns build one
	// per row.
	if let Expression::Literal(Literal::Strand(pattern)) = pattern {
		let regex = like_regex(pattern)?;
		return Ok(Arc::new(move |row, bindings| {
			match subject(row, bindings)? {
				Value::Null => Ok(Truth::Unknown),
				v => {
					let matched = regex.is_match(&v.as_string());
					Ok(Truth::from(matched != negated))
				}
			}
		}));
	}
	let pattern = expr::compile(pattern, env)?;
	Ok(Arc::new(move |row, bindings| {
		let v = subject(row, bindings)?;
		let p = pattern(row, bindings)?;
		if v.is_null() || p.is_null() {
			return Ok(Truth::Unknown);
		}
		let regex = like_regex(&p.as_string())?;
		let matched = regex.is_match(&v.as_string());
		Ok(Truth::from(matched != negated))
	}))
}

/// Translate a LIKE pattern to an anchored, case-insensitive regex:
/// `%` matches any run, `_` matches one character, everything else is
/// literal.
pub(crate) fn like_regex(pattern: &str) -> Result<Regex> {
	let mut out = String::with_capacity(pattern.len() + 8);
	out.push_str("(?is)^");
	for c in pattern.chars() {
		match c {
			'%' => out.push_str(".*"),
			'_' => out.push('.'),
			c => out.push_str(&regex::escape(&c.to_string())),
		}
	}
	out.push('$');
	Regex::new(&out).map_err(|e| Error::InvalidStatement {
		message: format!("invalid LIKE pattern '{pattern}': {e}"),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::exp::Bindings;
	use crate::sql::Row;
	use crate::syn::parser::Parser;

	fn eval(text: &str, row: &Row) -> Truth {
		let cond = Parser::new(text).parse_condition().unwrap();
		let compiled = compile(&cond, &CompileEnv::new()).unwrap();
		compiled(row, &Bindings::new()).unwrap()
	}

	fn row(pairs: &[(&str, Value)]) -> Row {
		pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
	}

	#[test]
	fn null_comparison_is_unknown() {
		let r = row(&[("a", Value::Null)]);
		assert_eq!(eval("a = 1", &r), Truth::Unknown);
		assert_eq!(eval("a <> 1", &r), Truth::Unknown);
	}

	#[test]
	fn is_null_sees_through_three_valued_logic() {
		let r = row(&[("a", Value::Null)]);
		assert_eq!(eval("a IS NULL", &r), Truth::True);
		assert_eq!(eval("a IS NOT NULL", &r), Truth::False);
	}

	#[test]
	fn like_translates_wildcards() {
		let r = row(&[("name", Value::from("Contoso Ltd"))]);
		assert_eq!(eval("name LIKE 'con%'", &r), Truth::True);
		assert_eq!(eval("name LIKE 'c_ntoso%'", &r), Truth::True);
		assert_eq!(eval("name LIKE 'con'", &r), Truth::False);
		assert_eq!(eval("name NOT LIKE 'x%'", &r), Truth::True);
	}

	#[test]
	fn like_escapes_regex_metacharacters() {
		let r = row(&[("name", Value::from("a.b"))]);
		assert_eq!(eval("name LIKE 'a.b'", &r), Truth::True);
		let r = row(&[("name", Value::from("axb"))]);
		assert_eq!(eval("name LIKE 'a.b'", &r), Truth::False);
	}

	#[test]
	fn in_list_with_null_member_is_unknown_on_miss() {
		let r = row(&[("x", Value::Int(5))]);
		assert_eq!(eval("x IN (1, 2, NULL)", &r), Truth::Unknown);
		assert_eq!(eval("x IN (5, NULL)", &r), Truth::True);
		assert_eq!(eval("x NOT IN (1, 2, NULL)", &r), Truth::Unknown);
	}

	#[test]
	fn between_expands_with_k3() {
		let r = row(&[("x", Value::Int(5))]);
		assert_eq!(eval("x BETWEEN 1 AND 10", &r), Truth::True);
		assert_eq!(eval("x NOT BETWEEN 1 AND 10", &r), Truth::False);
		let r = row(&[("x", Value::Null)]);
		assert_eq!(eval("x BETWEEN 1 AND 10", &r), Truth::Unknown);
	}

	#[test]
	fn kleene_connectives() {
		let r = row(&[("a", Value::Null), ("b", Value::Int(1))]);
		assert_eq!(eval("a = 1 OR b = 1", &r), Truth::True);
		assert_eq!(eval("a = 1 AND b = 1", &r), Truth::Unknown);
		assert_eq!(eval("NOT (a = 1)", &r), Truth::Unknown);
	}
}
