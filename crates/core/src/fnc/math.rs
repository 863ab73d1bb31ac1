//! Built-in numeric functions.

use crate::err::{Error, Result};
use crate::sql::Value;
use rust_decimal::Decimal;

pub fn abs(args: Vec<Value>) -> Result<Value> {
	match &args[0] {
		Value::Null => Ok(Value::Null),
		Value::Int(v) => Ok(Value::Int(v.abs())),
		Value::BigInt(v) => Ok(Value::BigInt(v.abs())),
		Value::Decimal(v) => Ok(Value::Decimal(v.abs())),
		Value::Float(v) => Ok(Value::Float(v.abs())),
		v => Err(non_numeric("ABS", v)),
	}
}

pub fn ceiling(args: Vec<Value>) -> Result<Value> {
	match &args[0] {
		Value::Null => Ok(Value::Null),
		Value::Int(v) => Ok(Value::Int(*v)),
		Value::BigInt(v) => Ok(Value::BigInt(*v)),
		Value::Decimal(v) => Ok(Value::Decimal(v.ceil())),
		Value::Float(v) => Ok(Value::Float(v.ceil())),
		v => Err(non_numeric("CEILING", v)),
	}
}

pub fn floor(args: Vec<Value>) -> Result<Value> {
	match &args[0] {
		Value::Null => Ok(Value::Null),
		Value::Int(v) => Ok(Value::Int(*v)),
		Value::BigInt(v) => Ok(Value::BigInt(*v)),
		Value::Decimal(v) => Ok(Value::Decimal(v.floor())),
		Value::Float(v) => Ok(Value::Float(v.floor())),
		v => Err(non_numeric("FLOOR", v)),
	}
}

pub fn round(args: Vec<Value>) -> Result<Value> {
	if args[0].is_null() || args[1].is_null() {
		return Ok(Value::Null);
	}
	let places = args[1].as_i64()?;
	match &args[0] {
		Value::Int(v) => Ok(Value::Int(*v)),
		Value::BigInt(v) => Ok(Value::BigInt(*v)),
		Value::Decimal(v) => {
			if places >= 0 {
				Ok(Value::Decimal(v.round_dp(places.min(28) as u32)))
			} else {
				let factor = Decimal::from(10i64.pow((-places).min(18) as u32));
				Ok(Value::Decimal((v / factor).round() * factor))
			}
		}
		Value::Float(v) => {
			let factor = 10f64.powi(places as i32);
			Ok(Value::Float((v * factor).round() / factor))
		}
		v => Err(non_numeric("ROUND", v)),
	}
}

pub fn power(args: Vec<Value>) -> Result<Value> {
	if args[0].is_null() || args[1].is_null() {
		return Ok(Value::Null);
	}
	let base = args[0].as_f64()?;
	let exponent = args[1].as_f64()?;
	Ok(Value::Float(base.powf(exponent)))
}

pub fn sqrt(args: Vec<Value>) -> Result<Value> {
	if args[0].is_null() {
		return Ok(Value::Null);
	}
	let v = args[0].as_f64()?;
	if v < 0.0 {
		return Err(Error::TypeMismatch {
			message: "SQRT of a negative number".to_owned(),
		});
	}
	Ok(Value::Float(v.sqrt()))
}

/// ISNULL(a, b): the first argument unless it is NULL.
pub fn isnull(mut args: Vec<Value>) -> Result<Value> {
	let replacement = args.pop().unwrap_or(Value::Null);
	let value = args.pop().unwrap_or(Value::Null);
	Ok(if value.is_null() {
		replacement
	} else {
		value
	})
}

/// COALESCE(a, b, ...): the first non-NULL argument.
pub fn coalesce(args: Vec<Value>) -> Result<Value> {
	Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null))
}

/// NULLIF(a, b): NULL when the arguments compare equal, otherwise a.
pub fn nullif(mut args: Vec<Value>) -> Result<Value> {
	let b = args.pop().unwrap_or(Value::Null);
	let a = args.pop().unwrap_or(Value::Null);
	match a.compare(&b)? {
		Some(std::cmp::Ordering::Equal) => Ok(Value::Null),
		_ => Ok(a),
	}
}

fn non_numeric(name: &str, v: &Value) -> Error {
	Error::InvalidArguments {
		name: name.to_owned(),
		expected: format!("a numeric argument, not {v}"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn nullif_guards_division() {
		assert_eq!(nullif(vec![Value::Int(0), Value::Int(0)]).unwrap(), Value::Null);
		assert_eq!(nullif(vec![Value::Int(5), Value::Int(0)]).unwrap(), Value::Int(5));
	}

	#[test]
	fn coalesce_finds_first_non_null() {
		assert_eq!(
			coalesce(vec![Value::Null, Value::Null, Value::from("x")]).unwrap(),
			Value::from("x")
		);
		assert_eq!(coalesce(vec![Value::Null]).unwrap(), Value::Null);
	}

	#[test]
	fn round_to_negative_places() {
		assert_eq!(
			round(vec![Value::Float(1234.5), Value::Int(-2)]).unwrap(),
			Value::Float(1200.0)
		);
	}
}
