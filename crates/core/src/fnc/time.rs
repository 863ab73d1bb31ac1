//! Built-in date and time functions.

use crate::err::{Error, Result};
use crate::sql::Value;
use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Timelike, Utc};

/// The date parts accepted by DATEADD, DATEDIFF, DATEPART, and DATETRUNC.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DatePart {
	Year,
	Quarter,
	Month,
	Week,
	Day,
	Hour,
	Minute,
	Second,
}

impl DatePart {
	/// Resolve a date part name, accepting the T-SQL abbreviations.
	pub fn from_name(name: &str) -> Option<DatePart> {
		match name.to_lowercase().as_str() {
			"year" | "yyyy" | "yy" => Some(DatePart::Year),
			"quarter" | "qq" | "q" => Some(DatePart::Quarter),
			"month" | "mm" | "m" => Some(DatePart::Month),
			"week" | "wk" | "ww" => Some(DatePart::Week),
			"day" | "dd" | "d" => Some(DatePart::Day),
			"hour" | "hh" => Some(DatePart::Hour),
			"minute" | "mi" | "n" => Some(DatePart::Minute),
			"second" | "ss" | "s" => Some(DatePart::Second),
			_ => None,
		}
	}
}

fn part_arg(v: &Value, function: &str) -> Result<DatePart> {
	DatePart::from_name(&v.as_string()).ok_or_else(|| Error::InvalidArguments {
		name: function.to_owned(),
		expected: "a date part such as year, month, or day".to_owned(),
	})
}

fn date_arg(v: &Value, function: &str) -> Result<Option<DateTime<Utc>>> {
	match v {
		Value::Null => Ok(None),
		Value::DateTime(d) => Ok(Some(*d)),
		Value::Strand(s) => s
			.parse::<DateTime<Utc>>()
			.ok()
			.or_else(|| {
				chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
					.ok()
					.and_then(|d| d.and_hms_opt(0, 0, 0))
					.map(|d| Utc.from_utc_datetime(&d))
			})
			.map(Some)
			.ok_or_else(|| Error::InvalidArguments {
				name: function.to_owned(),
				expected: "a datetime".to_owned(),
			}),
		_ => Err(Error::InvalidArguments {
			name: function.to_owned(),
			expected: "a datetime".to_owned(),
		}),
	}
}

pub fn getdate(_: Vec<Value>) -> Result<Value> {
	Ok(Value::DateTime(Utc::now()))
}

pub fn getutcdate(_: Vec<Value>) -> Result<Value> {
	Ok(Value::DateTime(Utc::now()))
}

pub fn year(args: Vec<Value>) -> Result<Value> {
	match date_arg(&args[0], "YEAR")? {
		Some(d) => Ok(Value::Int(d.year())),
		None => Ok(Value::Null),
	}
}

pub fn month(args: Vec<Value>) -> Result<Value> {
	match date_arg(&args[0], "MONTH")? {
		Some(d) => Ok(Value::Int(d.month() as i32)),
		None => Ok(Value::Null),
	}
}

pub fn day(args: Vec<Value>) -> Result<Value> {
	match date_arg(&args[0], "DAY")? {
		Some(d) => Ok(Value::Int(d.day() as i32)),
		None => Ok(Value::Null),
	}
}

pub fn week(args: Vec<Value>) -> Result<Value> {
	match date_arg(&args[0], "WEEK")? {
		Some(d) => Ok(Value::Int(d.iso_week().week() as i32)),
		None => Ok(Value::Null),
	}
}

pub fn quarter(args: Vec<Value>) -> Result<Value> {
	match date_arg(&args[0], "QUARTER")? {
		Some(d) => Ok(Value::Int(quarter_of(d) as i32)),
		None => Ok(Value::Null),
	}
}

pub fn dateadd(args: Vec<Value>) -> Result<Value> {
	let part = part_arg(&args[0], "DATEADD")?;
	if args[1].is_null() {
		return Ok(Value::Null);
	}
	let n = args[1].as_i64()?;
	let Some(date) = date_arg(&args[2], "DATEADD")? else {
		return Ok(Value::Null);
	};
	let out = match part {
		DatePart::Year => shift_months(date, n * 12),
		DatePart::Quarter => shift_months(date, n * 3),
		DatePart::Month => shift_months(date, n),
		DatePart::Week => date + Duration::weeks(n),
		DatePart::Day => date + Duration::days(n),
		DatePart::Hour => date + Duration::hours(n),
		DatePart::Minute => date + Duration::minutes(n),
		DatePart::Second => date + Duration::seconds(n),
	};
	Ok(Value::DateTime(out))
}

fn shift_months(date: DateTime<Utc>, months: i64) -> DateTime<Utc> {
	if months >= 0 {
		date + Months::new(months as u32)
	} else {
		date - Months::new((-months) as u32)
	}
}

pub fn datediff(args: Vec<Value>) -> Result<Value> {
	let part = part_arg(&args[0], "DATEDIFF")?;
	let (Some(start), Some(end)) =
		(date_arg(&args[1], "DATEDIFF")?, date_arg(&args[2], "DATEDIFF")?)
	else {
		return Ok(Value::Null);
	};
	// DATEDIFF counts crossed boundaries, not elapsed durations.
	let diff = match part {
		DatePart::Year => (end.year() - start.year()) as i64,
		DatePart::Quarter => {
			(end.year() as i64 - start.year() as i64) * 4
				+ (quarter_of(end) as i64 - quarter_of(start) as i64)
		}
		DatePart::Month => {
			(end.year() as i64 - start.year() as i64) * 12
				+ (end.month() as i64 - start.month() as i64)
		}
		DatePart::Week => {
			(end.date_naive().signed_duration_since(start.date_naive()).num_days()) / 7
		}
		DatePart::Day => end.date_naive().signed_duration_since(start.date_naive()).num_days(),
		DatePart::Hour => (end - start).num_hours(),
		DatePart::Minute => (end - start).num_minutes(),
		DatePart::Second => (end - start).num_seconds(),
	};
	Ok(Value::BigInt(diff))
}

fn quarter_of(d: DateTime<Utc>) -> u32 {
	(d.month() - 1) / 3 + 1
}

pub fn datepart(args: Vec<Value>) -> Result<Value> {
	let part = part_arg(&args[0], "DATEPART")?;
	let Some(d) = date_arg(&args[1], "DATEPART")? else {
		return Ok(Value::Null);
	};
	let out = match part {
		DatePart::Year => d.year(),
		DatePart::Quarter => quarter_of(d) as i32,
		DatePart::Month => d.month() as i32,
		DatePart::Week => d.iso_week().week() as i32,
		DatePart::Day => d.day() as i32,
		DatePart::Hour => d.hour() as i32,
		DatePart::Minute => d.minute() as i32,
		DatePart::Second => d.second() as i32,
	};
	Ok(Value::Int(out))
}

pub fn datetrunc(args: Vec<Value>) -> Result<Value> {
	let part = part_arg(&args[0], "DATETRUNC")?;
	let Some(d) = date_arg(&args[1], "DATETRUNC")? else {
		return Ok(Value::Null);
	};
	let date = d.date_naive();
	let truncated = match part {
		DatePart::Year => date.with_month(1).and_then(|d| d.with_day(1)).map(|d| (d, 0, 0, 0)),
		DatePart::Quarter => {
			let month = (quarter_of(d) - 1) * 3 + 1;
			date.with_month(month).and_then(|d| d.with_day(1)).map(|d| (d, 0, 0, 0))
		}
		DatePart::Month => date.with_day(1).map(|d| (d, 0, 0, 0)),
		DatePart::Week => {
			let days_from_monday = date.weekday().num_days_from_monday() as i64;
			Some((date - Duration::days(days_from_monday), 0, 0, 0))
		}
		DatePart::Day => Some((date, 0, 0, 0)),
		DatePart::Hour => Some((date, d.hour(), 0, 0)),
		DatePart::Minute => Some((date, d.hour(), d.minute(), 0)),
		DatePart::Second => Some((date, d.hour(), d.minute(), d.second())),
	};
	let Some((date, h, m, s)) = truncated else {
		fail!("date truncation produced an out-of-range date");
	};
	let Some(out) = date.and_hms_opt(h, m, s) else {
		fail!("date truncation produced an out-of-range time");
	};
	Ok(Value::DateTime(Utc.from_utc_datetime(&out)))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn date(s: &str) -> Value {
		Value::DateTime(s.parse().unwrap())
	}

	#[test]
	fn dateadd_shifts_months_with_clamping() {
		let v = dateadd(vec![Value::from("month"), Value::Int(1), date("2024-01-31T00:00:00Z")])
			.unwrap();
		assert_eq!(v, date("2024-02-29T00:00:00Z"));
	}

	#[test]
	fn datediff_counts_boundaries() {
		let v = datediff(vec![
			Value::from("year"),
			date("2023-12-31T23:59:59Z"),
			date("2024-01-01T00:00:00Z"),
		])
		.unwrap();
		assert_eq!(v, Value::BigInt(1));
	}

	#[test]
	fn datetrunc_to_quarter() {
		let v = datetrunc(vec![Value::from("quarter"), date("2024-08-15T10:30:00Z")]).unwrap();
		assert_eq!(v, date("2024-07-01T00:00:00Z"));
	}

	#[test]
	fn null_dates_propagate() {
		assert_eq!(year(vec![Value::Null]).unwrap(), Value::Null);
		assert_eq!(
			dateadd(vec![Value::from("day"), Value::Int(1), Value::Null]).unwrap(),
			Value::Null
		);
	}
}
