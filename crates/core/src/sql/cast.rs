use serde::{Deserialize, Serialize};
use std::fmt;

/// The named target types accepted by CAST and CONVERT.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum CastType {
	Int,
	BigInt,
	Decimal {
		precision: Option<u32>,
		scale: Option<u32>,
	},
	Float,
	NVarChar(Option<u32>),
	DateTime,
	Date,
	Bit,
	UniqueIdentifier,
	Money,
}

impl CastType {
	/// Resolve a type name from SQL text, case-insensitively.
	pub fn from_name(name: &str) -> Option<CastType> {
		match name.to_lowercase().as_str() {
			"int" => Some(CastType::Int),
			"bigint" => Some(CastType::BigInt),
			"decimal" | "numeric" => Some(CastType::Decimal {
				precision: None,
				scale: None,
			}),
			"float" | "real" => Some(CastType::Float),
			"nvarchar" | "varchar" => Some(CastType::NVarChar(None)),
			"datetime" | "datetime2" => Some(CastType::DateTime),
			"date" => Some(CastType::Date),
			"bit" => Some(CastType::Bit),
			"uniqueidentifier" => Some(CastType::UniqueIdentifier),
			"money" => Some(CastType::Money),
			_ => None,
		}
	}
}

impl fmt::Display for CastType {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			CastType::Int => f.write_str("int"),
			CastType::BigInt => f.write_str("bigint"),
			CastType::Decimal {
				precision,
				scale,
			} => match (precision, scale) {
				(Some(p), Some(s)) => write!(f, "decimal({p}, {s})"),
				(Some(p), None) => write!(f, "decimal({p})"),
				_ => f.write_str("decimal"),
			},
			CastType::Float => f.write_str("float"),
			CastType::NVarChar(len) => match len {
				Some(n) => write!(f, "nvarchar({n})"),
				None => f.write_str("nvarchar"),
			},
			CastType::DateTime => f.write_str("datetime"),
			CastType::Date => f.write_str("date"),
			CastType::Bit => f.write_str("bit"),
			CastType::UniqueIdentifier => f.write_str("uniqueidentifier"),
			CastType::Money => f.write_str("money"),
		}
	}
}
