//! Expression compilation.

use crate::err::{Error, Result};
use crate::exp::{cast_value, cond, resolve_column, CompileEnv, CompiledExpr};
use crate::fnc;
use crate::fnc::time::DatePart;
use crate::sql::expression::is_aggregate_name;
use crate::sql::{
	BinaryOperator, CaseExpression, ColumnRef, Expression, FunctionCall, Literal, UnaryOperator,
	Value,
};
use std::sync::Arc;

pub(super) fn compile(expression: &Expression, env: &CompileEnv) -> Result<CompiledExpr> {
	match expression {
		Expression::Literal(lit) => {
			let value = literal_value(lit);
			Ok(Arc::new(move |_, _| Ok(value.clone())))
		}
		Expression::Column(column) => compile_column(column),
		Expression::Variable(name) => {
			let name = name.clone();
			Ok(Arc::new(move |_, bindings| {
				bindings.get(&name).cloned().ok_or_else(|| Error::VariableNotFound {
					name: name.clone(),
				})
			}))
		}
		Expression::Binary {
			op,
			left,
			right,
		} => {
			let op = *op;
			let left = compile(left, env)?;
			let right = compile(right, env)?;
			Ok(Arc::new(move |row, bindings| {
				let l = left(row, bindings)?;
				let r = right(row, bindings)?;
				match op {
					BinaryOperator::Add => l.try_add(&r),
					BinaryOperator::Subtract => l.try_sub(&r),
					BinaryOperator::Multiply => l.try_mul(&r),
					BinaryOperator::Divide => l.try_div(&r),
					BinaryOperator::Modulo => l.try_rem(&r),
				}
			}))
		}
		Expression::Unary {
			op: UnaryOperator::Negate,
			expr,
		} => {
			let inner = compile(expr, env)?;
			Ok(Arc::new(move |row, bindings| inner(row, bindings)?.try_neg()))
		}
		Expression::Function(call) => compile_function(call, env),
		Expression::Case(case) => compile_case(case, env),
		Expression::Cast {
			expr,
			to,
		} => {
			let inner = compile(expr, env)?;
			let to = *to;
			Ok(Arc::new(move |row, bindings| cast_value(&inner(row, bindings)?, &to)))
		}
		Expression::Subquery(_) => Err(Error::Unreachable(
			"scalar subquery reached the expression compiler without being planned",
		)),
	}
}

pub(super) fn literal_value(lit: &Literal) -> Value {
	match lit {
		Literal::Null => Value::Null,
		Literal::Bool(v) => Value::Bool(*v),
		Literal::Int(v) => match i32::try_from(*v) {
			Ok(v) => Value::Int(v),
			Err(_) => Value::BigInt(*v),
		},
		Literal::Decimal(v) => Value::Decimal(*v),
		Literal::Float(v) => Value::Float(*v),
		Literal::Strand(v) => Value::Strand(v.clone()),
	}
}

fn compile_column(column: &ColumnRef) -> Result<CompiledExpr> {
	let table = column.table.clone();
	let name = column.column.clone();
	Ok(Arc::new(move |row, _| resolve_column(row, table.as_deref(), &name)))
}

fn compile_function(call: &FunctionCall, env: &CompileEnv) -> Result<CompiledExpr> {
	if call.over.is_some() {
		return Err(Error::InvalidStatement {
			message: format!(
				"window function {} is only allowed in the SELECT list",
				call.name.to_uppercase()
			),
		});
	}
	if is_aggregate_name(&call.name) {
		// Aggregates in HAVING and ORDER BY resolve to the aggregate's
		// output column rather than a re-invocation.
		if let Some(output) = env.aliases.resolve(call) {
			return compile_column(&ColumnRef::bare(output));
		}
		return Err(Error::InvalidStatement {
			message: format!(
				"aggregate {} is not valid in this position",
				call.name.to_uppercase()
			),
		});
	}
	let function = fnc::resolve(&call.name, call.args.len())?;
	let mut args = Vec::with_capacity(call.args.len());
	for (i, arg) in call.args.iter().enumerate() {
		// The leading date-part argument of the date functions is written
		// as a bare identifier, not a string.
		if i == 0 && is_date_part_function(&function.name) {
			if let Expression::Column(ColumnRef {
				table: None,
				column,
			}) = arg
			{
				if DatePart::from_name(column).is_some() {
					let part = Value::Strand(column.clone());
					let expr: CompiledExpr =
						Arc::new(move |_: &crate::sql::Row, _: &crate::exp::Bindings| {
							Ok(part.clone())
						});
					args.push(expr);
					continue;
				}
			}
		}
		args.push(compile(arg, env)?);
	}
	let invoke = function.invoke.clone();
	Ok(Arc::new(move |row, bindings| {
		let mut values = Vec::with_capacity(args.len());
		for arg in &args {
			values.push(arg(row, bindings)?);
		}
		invoke(values)
	}))
}

fn is_date_part_function(name: &str) -> bool {
	matches!(
		name.to_uppercase().as_str(),
		"DATEADD" | "DATEDIFF" | "DATEPART" | "DATETRUNC"
	)
}

fn compile_case(case: &CaseExpression, env: &CompileEnv) -> Result<CompiledExpr> {
	match case {
		CaseExpression::Searched {
			branches,
			otherwise,
		} => {
			let mut compiled = Vec::with_capacity(branches.len());
			for (when, then) in branches {
				compiled.push((cond::compile(when, env)?, compile(then, env)?));
			}
			let otherwise = otherwise.as_ref().map(|e| compile(e, env)).transpose()?;
			Ok(Arc::new(move |row, bindings| {
				for (when, then) in &compiled {
					if when(row, bindings)?.is_true() {
						return then(row, bindings);
					}
				}
				match &otherwise {
					Some(e) => e(row, bindings),
					None => Ok(Value::Null),
				}
			}))
		}
		CaseExpression::Simple {
			operand,
			branches,
			otherwise,
		} => {
			let operand = compile(operand, env)?;
			let mut compiled = Vec::with_capacity(branches.len());
			for (when, then) in branches {
				compiled.push((compile(when, env)?, compile(then, env)?));
			}
			let otherwise = otherwise.as_ref().map(|e| compile(e, env)).transpose()?;
			Ok(Arc::new(move |row, bindings| {
				let subject = operand(row, bindings)?;
				for (when, then) in &compiled {
					let candidate = when(row, bindings)?;
					if subject.compare(&candidate)? == Some(std::cmp::Ordering::Equal) {
						return then(row, bindings);
					}
				}
				match &otherwise {
					Some(e) => e(row, bindings),
					None => Ok(Value::Null),
				}
			}))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::exp::Bindings;
	use crate::sql::Row;
	use crate::syn::parser::Parser;

	fn eval(text: &str, row: &Row) -> Result<Value> {
		let expr = Parser::new(text).parse_expr().unwrap();
		let compiled = compile(&expr, &CompileEnv::new())?;
		compiled(row, &Bindings::new())
	}

	fn row(pairs: &[(&str, Value)]) -> Row {
		pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
	}

	#[test]
	fn arithmetic_with_columns() {
		let r = row(&[("a", Value::Int(7)), ("b", Value::Int(2))]);
		assert_eq!(eval("a + b * 2", &r).unwrap(), Value::Int(11));
	}

	#[test]
	fn coalesce_and_nullif_compose() {
		let r = row(&[("name", Value::Null), ("qty", Value::Int(0))]);
		assert_eq!(
			eval("COALESCE(name, 'Unknown')", &r).unwrap(),
			Value::from("Unknown")
		);
		assert_eq!(eval("NULLIF(qty, 0)", &r).unwrap(), Value::Null);
	}

	#[test]
	fn division_guarded_by_nullif_yields_null() {
		let r = row(&[("revenue", Value::Int(10)), ("qty", Value::Int(0))]);
		assert_eq!(eval("revenue / NULLIF(qty, 0)", &r).unwrap(), Value::Null);
	}

	#[test]
	fn searched_case_falls_through_to_null() {
		let r = row(&[("x", Value::Int(5))]);
		assert_eq!(eval("CASE WHEN x > 10 THEN 'big' END", &r).unwrap(), Value::Null);
	}

	#[test]
	fn simple_case_matches_values() {
		let r = row(&[("status", Value::Int(2))]);
		assert_eq!(
			eval("CASE status WHEN 1 THEN 'open' WHEN 2 THEN 'closed' ELSE '?' END", &r).unwrap(),
			Value::from("closed")
		);
	}

	#[test]
	fn date_part_identifier_argument() {
		let d: chrono::DateTime<chrono::Utc> = "2024-03-15T00:00:00Z".parse().unwrap();
		let r = row(&[("createdon", Value::DateTime(d))]);
		assert_eq!(eval("DATEPART(month, createdon)", &r).unwrap(), Value::Int(3));
	}

	#[test]
	fn aggregate_alias_resolves_to_column() {
		let mut aliases = crate::exp::AliasMap::new();
		aliases.insert("count(*)".into(), "cnt".into());
		let env = CompileEnv::with_aliases(aliases);
		let expr = Parser::new("COUNT(*)").parse_expr().unwrap();
		let compiled = compile(&expr, &env).unwrap();
		let r = row(&[("cnt", Value::BigInt(3))]);
		assert_eq!(compiled(&r, &Bindings::new()).unwrap(), Value::BigInt(3));
	}

	#[test]
	fn variables_resolve_from_bindings() {
		let expr = Parser::new("@limit + 1").parse_expr().unwrap();
		let compiled = compile(&expr, &CompileEnv::new()).unwrap();
		let mut bindings = Bindings::new();
		bindings.set("limit", Value::Int(9));
		assert_eq!(compiled(&Row::new(), &bindings).unwrap(), Value::Int(10));
	}
}
