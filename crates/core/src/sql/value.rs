use crate::err::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// A reference to a record in another entity, carrying the display name the
/// backend resolved alongside the raw identifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lookup {
	pub entity: String,
	pub id: Uuid,
	pub name: Option<String>,
}

/// A choice value, carrying the label the backend resolved alongside the
/// raw option number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionSet {
	pub value: i32,
	pub label: Option<String>,
}

/// The static type of a [`Value`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Kind {
	Bool,
	Int,
	BigInt,
	Decimal,
	Float,
	String,
	DateTime,
	Guid,
	Lookup,
	OptionSet,
}

impl fmt::Display for Kind {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let name = match self {
			Kind::Bool => "bit",
			Kind::Int => "int",
			Kind::BigInt => "bigint",
			Kind::Decimal => "decimal",
			Kind::Float => "float",
			Kind::String => "nvarchar",
			Kind::DateTime => "datetime",
			Kind::Guid => "uniqueidentifier",
			Kind::Lookup => "lookup",
			Kind::OptionSet => "optionset",
		};
		f.write_str(name)
	}
}

/// A single scalar produced or consumed by the engine.
///
/// Every arithmetic and comparison operation propagates `Null` per SQL
/// three-valued logic: an operation with a `Null` operand yields `Null`
/// rather than an error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Value {
	#[default]
	Null,
	Bool(bool),
	Int(i32),
	BigInt(i64),
	Decimal(Decimal),
	Float(f64),
	Strand(String),
	DateTime(DateTime<Utc>),
	Guid(Uuid),
	Lookup(Lookup),
	OptionSet(OptionSet),
}

impl Value {
	/// Check if this value is NULL.
	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	/// Check if this value is boolean true. NULL and non-boolean values are
	/// not true.
	pub fn is_true(&self) -> bool {
		matches!(self, Value::Bool(true))
	}

	/// The static kind of this value, or `None` for NULL.
	pub fn kind(&self) -> Option<Kind> {
		match self {
			Value::Null => None,
			Value::Bool(_) => Some(Kind::Bool),
			Value::Int(_) => Some(Kind::Int),
			Value::BigInt(_) => Some(Kind::BigInt),
			Value::Decimal(_) => Some(Kind::Decimal),
			Value::Float(_) => Some(Kind::Float),
			Value::Strand(_) => Some(Kind::String),
			Value::DateTime(_) => Some(Kind::DateTime),
			Value::Guid(_) => Some(Kind::Guid),
			Value::Lookup(_) => Some(Kind::Lookup),
			Value::OptionSet(_) => Some(Kind::OptionSet),
		}
	}

	/// Whether this value carries a numeric kind.
	pub fn is_numeric(&self) -> bool {
		matches!(
			self,
			Value::Int(_) | Value::BigInt(_) | Value::Decimal(_) | Value::Float(_)
		)
	}

	/// The display-name sidecar for lookup and option-set values, used to
	/// populate virtual `*name` companion columns.
	pub fn display_name(&self) -> Option<&str> {
		match self {
			Value::Lookup(l) => l.name.as_deref(),
			Value::OptionSet(o) => o.label.as_deref(),
			_ => None,
		}
	}

	/// Coerce to an i64, when the value is numeric.
	pub fn as_i64(&self) -> Result<i64> {
		match self {
			Value::Int(v) => Ok(*v as i64),
			Value::BigInt(v) => Ok(*v),
			Value::Decimal(v) => v.to_i64().ok_or_else(|| mismatch(self, "bigint")),
			Value::Float(v) if v.fract() == 0.0 => Ok(*v as i64),
			Value::OptionSet(o) => Ok(o.value as i64),
			v => Err(mismatch(v, "bigint")),
		}
	}

	/// Coerce to an f64, when the value is numeric.
	pub fn as_f64(&self) -> Result<f64> {
		match self {
			Value::Int(v) => Ok(*v as f64),
			Value::BigInt(v) => Ok(*v as f64),
			Value::Decimal(v) => v.to_f64().ok_or_else(|| mismatch(self, "float")),
			Value::Float(v) => Ok(*v),
			v => Err(mismatch(v, "float")),
		}
	}

	/// Coerce to a decimal, when the value is numeric.
	pub fn as_decimal(&self) -> Result<Decimal> {
		match self {
			Value::Int(v) => Ok(Decimal::from(*v)),
			Value::BigInt(v) => Ok(Decimal::from(*v)),
			Value::Decimal(v) => Ok(*v),
			Value::Float(v) => Decimal::from_f64(*v).ok_or_else(|| mismatch(self, "decimal")),
			v => Err(mismatch(v, "decimal")),
		}
	}

	/// Render the value as display text. NULL renders as the empty string;
	/// lookups and option sets render their raw identifier.
	pub fn as_string(&self) -> String {
		match self {
			Value::Null => String::new(),
			Value::Strand(s) => s.clone(),
			v => v.to_string(),
		}
	}

	/// Addition with SQL semantics. String operands concatenate.
	pub fn try_add(&self, other: &Value) -> Result<Value> {
		if self.is_null() || other.is_null() {
			return Ok(Value::Null);
		}
		if matches!(self, Value::Strand(_)) || matches!(other, Value::Strand(_)) {
			return Ok(Value::Strand(format!("{}{}", self.as_string(), other.as_string())));
		}
		numeric_op(self, other, "add", |a, b| a.checked_add(b), |a, b| a.checked_add(b), |a, b| {
			a.checked_add(b)
		}, |a, b| Some(a + b))
	}

	/// Subtraction with SQL semantics.
	pub fn try_sub(&self, other: &Value) -> Result<Value> {
		if self.is_null() || other.is_null() {
			return Ok(Value::Null);
		}
		numeric_op(self, other, "subtract", |a, b| a.checked_sub(b), |a, b| a.checked_sub(b), |a, b| {
			a.checked_sub(b)
		}, |a, b| Some(a - b))
	}

	/// Multiplication with SQL semantics.
	pub fn try_mul(&self, other: &Value) -> Result<Value> {
		if self.is_null() || other.is_null() {
			return Ok(Value::Null);
		}
		numeric_op(self, other, "multiply", |a, b| a.checked_mul(b), |a, b| a.checked_mul(b), |a, b| {
			a.checked_mul(b)
		}, |a, b| Some(a * b))
	}

	/// Division with SQL semantics. Integer operands divide truncating, and
	/// division by zero is an error rather than infinity.
	pub fn try_div(&self, other: &Value) -> Result<Value> {
		if self.is_null() || other.is_null() {
			return Ok(Value::Null);
		}
		if is_zero(other) {
			return Err(Error::TypeMismatch {
				message: "division by zero".into(),
			});
		}
		numeric_op(self, other, "divide", |a, b| a.checked_div(b), |a, b| a.checked_div(b), |a, b| {
			a.checked_div(b)
		}, |a, b| Some(a / b))
	}

	/// Modulo with SQL semantics.
	pub fn try_rem(&self, other: &Value) -> Result<Value> {
		if self.is_null() || other.is_null() {
			return Ok(Value::Null);
		}
		if is_zero(other) {
			return Err(Error::TypeMismatch {
				message: "division by zero".into(),
			});
		}
		numeric_op(self, other, "modulo", |a, b| a.checked_rem(b), |a, b| a.checked_rem(b), |a, b| {
			a.checked_rem(b)
		}, |a, b| Some(a % b))
	}

	/// Arithmetic negation.
	pub fn try_neg(&self) -> Result<Value> {
		match self {
			Value::Null => Ok(Value::Null),
			Value::Int(v) => Ok(Value::Int(-v)),
			Value::BigInt(v) => Ok(Value::BigInt(-v)),
			Value::Decimal(v) => Ok(Value::Decimal(-v)),
			Value::Float(v) => Ok(Value::Float(-v)),
			v => Err(mismatch(v, "a numeric type")),
		}
	}

	/// SQL ordering comparison. Returns `None` when either side is NULL.
	/// Strings compare case-insensitively, matching the engine's default
	/// collation. Comparing incompatible kinds is an error.
	pub fn compare(&self, other: &Value) -> Result<Option<Ordering>> {
		let ord = match (self, other) {
			(Value::Null, _) | (_, Value::Null) => return Ok(None),
			(Value::Bool(a), Value::Bool(b)) => a.cmp(b),
			(Value::Strand(a), Value::Strand(b)) => {
				a.to_lowercase().cmp(&b.to_lowercase())
			}
			(Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
			(Value::Guid(a), Value::Guid(b)) => a.cmp(b),
			(Value::Guid(a), Value::Lookup(b)) => a.cmp(&b.id),
			(Value::Lookup(a), Value::Guid(b)) => a.id.cmp(b),
			(Value::Lookup(a), Value::Lookup(b)) => a.id.cmp(&b.id),
			(Value::OptionSet(a), Value::OptionSet(b)) => a.value.cmp(&b.value),
			(Value::OptionSet(a), b) if b.is_numeric() => {
				return Value::Int(a.value).compare(b);
			}
			(a, Value::OptionSet(b)) if a.is_numeric() => {
				return a.compare(&Value::Int(b.value));
			}
			(a, b) if a.is_numeric() && b.is_numeric() => {
				// Floats force float comparison, otherwise compare exactly
				// as decimals.
				if matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)) {
					a.as_f64()?
						.partial_cmp(&b.as_f64()?)
						.ok_or_else(|| mismatch(a, "a comparable number"))?
				} else {
					a.as_decimal()?.cmp(&b.as_decimal()?)
				}
			}
			(a, b) => {
				return Err(Error::TypeMismatch {
					message: format!(
						"cannot compare {} with {}",
						kind_name(a),
						kind_name(b)
					),
				});
			}
		};
		Ok(Some(ord))
	}

	/// The canonical string form used for DISTINCT and UNION deduplication.
	/// NULL maps to a NUL byte so it cannot collide with real data, numerics
	/// render in invariant form, and strings fold case when the planner asks
	/// for case-insensitive comparison.
	pub fn canonical_key(&self, case_insensitive: bool) -> String {
		match self {
			Value::Null => "\0".to_owned(),
			Value::Bool(v) => if *v { "1" } else { "0" }.to_owned(),
			Value::Int(v) => v.to_string(),
			Value::BigInt(v) => v.to_string(),
			Value::Decimal(v) => v.normalize().to_string(),
			Value::Float(v) => v.to_string(),
			Value::Strand(s) => {
				if case_insensitive {
					s.to_lowercase()
				} else {
					s.clone()
				}
			}
			Value::DateTime(v) => v.to_rfc3339_opts(SecondsFormat::AutoSi, true),
			Value::Guid(v) => v.to_string(),
			Value::Lookup(l) => l.id.to_string(),
			Value::OptionSet(o) => o.value.to_string(),
		}
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Value::Null => f.write_str("NULL"),
			Value::Bool(v) => write!(f, "{v}"),
			Value::Int(v) => write!(f, "{v}"),
			Value::BigInt(v) => write!(f, "{v}"),
			Value::Decimal(v) => write!(f, "{v}"),
			Value::Float(v) => write!(f, "{v}"),
			Value::Strand(v) => f.write_str(v),
			Value::DateTime(v) => f.write_str(&v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
			Value::Guid(v) => write!(f, "{v}"),
			Value::Lookup(l) => write!(f, "{}", l.id),
			Value::OptionSet(o) => write!(f, "{}", o.value),
		}
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Strand(v.to_owned())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Strand(v)
	}
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Value::Int(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::BigInt(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::Float(v)
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<Uuid> for Value {
	fn from(v: Uuid) -> Self {
		Value::Guid(v)
	}
}

impl From<DateTime<Utc>> for Value {
	fn from(v: DateTime<Utc>) -> Self {
		Value::DateTime(v)
	}
}

fn kind_name(v: &Value) -> String {
	v.kind().map(|k| k.to_string()).unwrap_or_else(|| "null".to_owned())
}

fn mismatch(v: &Value, wanted: &str) -> Error {
	Error::TypeMismatch {
		message: format!("cannot convert {} to {wanted}", kind_name(v)),
	}
}

fn is_zero(v: &Value) -> bool {
	match v {
		Value::Int(0) | Value::BigInt(0) => true,
		Value::Decimal(d) => d.is_zero(),
		Value::Float(f) => *f == 0.0,
		_ => false,
	}
}

/// Applies a binary numeric operation after promoting both operands to
/// their common kind: Int → BigInt → Decimal → Float.
fn numeric_op(
	a: &Value,
	b: &Value,
	op: &str,
	f_int: fn(i32, i32) -> Option<i32>,
	f_big: fn(i64, i64) -> Option<i64>,
	f_dec: fn(Decimal, Decimal) -> Option<Decimal>,
	f_flt: fn(f64, f64) -> Option<f64>,
) -> Result<Value> {
	let overflow = || Error::TypeMismatch {
		message: format!("arithmetic overflow in {op}"),
	};
	match (a, b) {
		(Value::Int(x), Value::Int(y)) => f_int(*x, *y).map(Value::Int).ok_or_else(overflow),
		(Value::Float(_), _) | (_, Value::Float(_)) => {
			f_flt(a.as_f64()?, b.as_f64()?).map(Value::Float).ok_or_else(overflow)
		}
		(Value::Decimal(_), _) | (_, Value::Decimal(_)) => {
			f_dec(a.as_decimal()?, b.as_decimal()?).map(Value::Decimal).ok_or_else(overflow)
		}
		(x, y) if x.is_numeric() && y.is_numeric() => {
			f_big(a.as_i64()?, b.as_i64()?).map(Value::BigInt).ok_or_else(overflow)
		}
		_ => Err(Error::TypeMismatch {
			message: format!("cannot {op} {} and {}", kind_name(a), kind_name(b)),
		}),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn null_propagates_through_arithmetic() {
		assert_eq!(Value::Null.try_add(&Value::Int(1)).unwrap(), Value::Null);
		assert_eq!(Value::Int(1).try_mul(&Value::Null).unwrap(), Value::Null);
		assert_eq!(Value::Null.try_neg().unwrap(), Value::Null);
	}

	#[test]
	fn integer_division_truncates() {
		assert_eq!(Value::Int(7).try_div(&Value::Int(2)).unwrap(), Value::Int(3));
	}

	#[test]
	fn division_by_zero_is_an_error() {
		let err = Value::Int(1).try_div(&Value::Int(0)).unwrap_err();
		assert!(matches!(err, Error::TypeMismatch { .. }));
	}

	#[test]
	fn numeric_promotion_reaches_float() {
		assert_eq!(
			Value::Int(1).try_add(&Value::Float(0.5)).unwrap(),
			Value::Float(1.5)
		);
		assert_eq!(
			Value::Int(2_000_000_000).try_add(&Value::BigInt(2_000_000_000)).unwrap(),
			Value::BigInt(4_000_000_000)
		);
	}

	#[test]
	fn string_operand_concatenates() {
		assert_eq!(
			Value::from("a").try_add(&Value::Int(1)).unwrap(),
			Value::from("a1")
		);
	}

	#[test]
	fn comparison_is_unknown_with_null() {
		assert_eq!(Value::Int(1).compare(&Value::Null).unwrap(), None);
	}

	#[test]
	fn strings_compare_case_insensitively() {
		assert_eq!(
			Value::from("ABC").compare(&Value::from("abc")).unwrap(),
			Some(Ordering::Equal)
		);
	}

	#[test]
	fn canonical_key_distinguishes_null_from_empty() {
		assert_ne!(
			Value::Null.canonical_key(true),
			Value::from("").canonical_key(true)
		);
	}

	#[test]
	fn lookup_compares_by_id() {
		let id = Uuid::new_v4();
		let l = Value::Lookup(Lookup {
			entity: "account".into(),
			id,
			name: Some("Contoso".into()),
		});
		assert_eq!(l.compare(&Value::Guid(id)).unwrap(), Some(Ordering::Equal));
	}
}
