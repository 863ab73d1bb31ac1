//! Runtime CAST and CONVERT semantics.

use crate::err::{Error, Result};
use crate::sql::{CastType, Value};
use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

/// Cast a value to a named target type. Narrowing overflow and unparseable
/// text are type-mismatch errors; NULL casts to NULL for every target.
pub fn cast_value(value: &Value, to: &CastType) -> Result<Value> {
	if value.is_null() {
		return Ok(Value::Null);
	}
	match to {
		CastType::Int => cast_int(value),
		CastType::BigInt => cast_bigint(value),
		CastType::Decimal {
			scale,
			..
		} => cast_decimal(value, *scale),
		CastType::Float => Ok(Value::Float(to_f64(value)?)),
		CastType::NVarChar(len) => cast_string(value, *len),
		CastType::DateTime => cast_datetime(value),
		CastType::Date => {
			let Value::DateTime(d) = cast_datetime(value)? else {
				fail!("datetime cast produced a non-datetime");
			};
			let truncated = d
				.with_hour(0)
				.and_then(|d| d.with_minute(0))
				.and_then(|d| d.with_second(0))
				.and_then(|d| d.with_nanosecond(0));
			match truncated {
				Some(d) => Ok(Value::DateTime(d)),
				None => Ok(Value::DateTime(d)),
			}
		}
		CastType::Bit => cast_bit(value),
		CastType::UniqueIdentifier => cast_guid(value),
		CastType::Money => cast_decimal(value, Some(4)),
	}
}

fn overflow(to: &str) -> Error {
	Error::TypeMismatch {
		message: format!("value out of range for {to}"),
	}
}

fn unparseable(text: &str, to: &str) -> Error {
	Error::TypeMismatch {
		message: format!("cannot convert '{text}' to {to}"),
	}
}

fn cast_int(value: &Value) -> Result<Value> {
	match value {
		Value::Int(v) => Ok(Value::Int(*v)),
		Value::BigInt(v) => i32::try_from(*v).map(Value::Int).map_err(|_| overflow("int")),
		Value::Decimal(v) => {
			v.trunc().to_i32().map(Value::Int).ok_or_else(|| overflow("int"))
		}
		Value::Float(v) => {
			let t = v.trunc();
			if t < i32::MIN as f64 || t > i32::MAX as f64 {
				Err(overflow("int"))
			} else {
				Ok(Value::Int(t as i32))
			}
		}
		Value::Bool(v) => Ok(Value::Int(*v as i32)),
		Value::Strand(s) => {
			s.trim().parse::<i32>().map(Value::Int).map_err(|_| unparseable(s, "int"))
		}
		Value::OptionSet(o) => Ok(Value::Int(o.value)),
		v => Err(unparseable(&v.to_string(), "int")),
	}
}

fn cast_bigint(value: &Value) -> Result<Value> {
	match value {
		Value::Int(v) => Ok(Value::BigInt(*v as i64)),
		Value::BigInt(v) => Ok(Value::BigInt(*v)),
		Value::Decimal(v) => {
			v.trunc().to_i64().map(Value::BigInt).ok_or_else(|| overflow("bigint"))
		}
		Value::Float(v) => {
			let t = v.trunc();
			if t < i64::MIN as f64 || t > i64::MAX as f64 {
				Err(overflow("bigint"))
			} else {
				Ok(Value::BigInt(t as i64))
			}
		}
		Value::Bool(v) => Ok(Value::BigInt(*v as i64)),
		Value::Strand(s) => {
			s.trim().parse::<i64>().map(Value::BigInt).map_err(|_| unparseable(s, "bigint"))
		}
		v => Err(unparseable(&v.to_string(), "bigint")),
	}
}

fn cast_decimal(value: &Value, scale: Option<u32>) -> Result<Value> {
	let d = match value {
		Value::Strand(s) => {
			Decimal::from_str(s.trim()).map_err(|_| unparseable(s, "decimal"))?
		}
		Value::Bool(v) => Decimal::from(*v as i32),
		v => v.as_decimal()?,
	};
	Ok(Value::Decimal(match scale {
		Some(s) => d.round_dp(s),
		None => d,
	}))
}

fn to_f64(value: &Value) -> Result<f64> {
	match value {
		Value::Strand(s) => s.trim().parse::<f64>().map_err(|_| unparseable(s, "float")),
		Value::Bool(v) => Ok(*v as i32 as f64),
		v => v.as_f64(),
	}
}

fn cast_string(value: &Value, len: Option<u32>) -> Result<Value> {
	let mut s = value.as_string();
	if let Some(len) = len {
		s = s.chars().take(len as usize).collect();
	}
	Ok(Value::Strand(s))
}

fn cast_datetime(value: &Value) -> Result<Value> {
	match value {
		Value::DateTime(d) => Ok(Value::DateTime(*d)),
		Value::Strand(s) => parse_datetime(s)
			.map(Value::DateTime)
			.ok_or_else(|| unparseable(s, "datetime")),
		v => Err(unparseable(&v.to_string(), "datetime")),
	}
}

/// Parse the datetime shapes the backend and users commonly produce.
pub(crate) fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
	let text = text.trim();
	if let Ok(d) = text.parse::<DateTime<Utc>>() {
		return Some(d);
	}
	if let Ok(d) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
		return Some(Utc.from_utc_datetime(&d));
	}
	if let Ok(d) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
		return Some(Utc.from_utc_datetime(&d));
	}
	if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
		return d.and_hms_opt(0, 0, 0).map(|d| Utc.from_utc_datetime(&d));
	}
	None
}

fn cast_bit(value: &Value) -> Result<Value> {
	match value {
		Value::Bool(v) => Ok(Value::Bool(*v)),
		Value::Int(v) => Ok(Value::Bool(*v != 0)),
		Value::BigInt(v) => Ok(Value::Bool(*v != 0)),
		Value::Decimal(v) => Ok(Value::Bool(!v.is_zero())),
		Value::Float(v) => Ok(Value::Bool(*v != 0.0)),
		Value::Strand(s) => match s.trim().to_lowercase().as_str() {
			"true" | "1" => Ok(Value::Bool(true)),
			"false" | "0" => Ok(Value::Bool(false)),
			_ => Err(unparseable(s, "bit")),
		},
		v => Err(unparseable(&v.to_string(), "bit")),
	}
}

fn cast_guid(value: &Value) -> Result<Value> {
	match value {
		Value::Guid(v) => Ok(Value::Guid(*v)),
		Value::Lookup(l) => Ok(Value::Guid(l.id)),
		Value::Strand(s) => {
			Uuid::parse_str(s.trim()).map(Value::Guid).map_err(|_| unparseable(s, "uniqueidentifier"))
		}
		v => Err(unparseable(&v.to_string(), "uniqueidentifier")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn null_casts_to_null() {
		assert_eq!(cast_value(&Value::Null, &CastType::Int).unwrap(), Value::Null);
	}

	#[test]
	fn narrowing_overflow_errors() {
		let err = cast_value(&Value::BigInt(i64::MAX), &CastType::Int).unwrap_err();
		assert!(matches!(err, Error::TypeMismatch { .. }));
	}

	#[test]
	fn string_to_int_trims() {
		assert_eq!(
			cast_value(&Value::from(" 42 "), &CastType::Int).unwrap(),
			Value::Int(42)
		);
	}

	#[test]
	fn money_rounds_to_four_places() {
		let v = cast_value(&Value::Float(1.23456), &CastType::Money).unwrap();
		assert_eq!(v, Value::Decimal(Decimal::from_f64(1.2346).unwrap().round_dp(4)));
	}

	#[test]
	fn date_cast_truncates_time() {
		let d: DateTime<Utc> = "2024-05-01T13:45:00Z".parse().unwrap();
		let v = cast_value(&Value::DateTime(d), &CastType::Date).unwrap();
		let expect: DateTime<Utc> = "2024-05-01T00:00:00Z".parse().unwrap();
		assert_eq!(v, Value::DateTime(expect));
	}

	#[test]
	fn nvarchar_truncates_to_length() {
		let v = cast_value(&Value::from("Dataverse"), &CastType::NVarChar(Some(4))).unwrap();
		assert_eq!(v, Value::from("Data"));
	}
}
