use crate::sql::condition::Condition;
use crate::sql::expression::{fmt_list, Expression};
use crate::sql::hint::Hint;
use crate::sql::statements::select::{SelectStatement, TableSource};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The row source of an INSERT statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum InsertSource {
	/// One or more VALUES tuples.
	Values(Vec<Vec<Expression>>),
	/// An INSERT ... SELECT source. Columns map positionally.
	Select(Box<SelectStatement>),
}

/// An INSERT statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct InsertStatement {
	pub target: TableSource,
	pub columns: Vec<String>,
	pub source: InsertSource,
	pub hints: Vec<Hint>,
}

impl fmt::Display for InsertStatement {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "INSERT INTO {} (", self.target)?;
		for (i, c) in self.columns.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			f.write_str(c)?;
		}
		f.write_str(") ")?;
		match &self.source {
			InsertSource::Values(rows) => {
				f.write_str("VALUES ")?;
				for (i, row) in rows.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					f.write_str("(")?;
					fmt_list(f, row)?;
					f.write_str(")")?;
				}
			}
			InsertSource::Select(s) => write!(f, "{s}")?,
		}
		fmt_hints(f, &self.hints)
	}
}

/// An UPDATE statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct UpdateStatement {
	pub target: TableSource,
	pub set: Vec<(String, Expression)>,
	pub cond: Option<Condition>,
	pub top: Option<u64>,
	pub hints: Vec<Hint>,
}

impl fmt::Display for UpdateStatement {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("UPDATE ")?;
		if let Some(top) = self.top {
			write!(f, "TOP ({top}) ")?;
		}
		write!(f, "{} SET ", self.target)?;
		for (i, (col, expr)) in self.set.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{col} = {expr}")?;
		}
		if let Some(ref cond) = self.cond {
			write!(f, " WHERE {cond}")?;
		}
		fmt_hints(f, &self.hints)
	}
}

/// A DELETE statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct DeleteStatement {
	pub target: TableSource,
	pub cond: Option<Condition>,
	pub top: Option<u64>,
	pub hints: Vec<Hint>,
}

impl fmt::Display for DeleteStatement {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("DELETE ")?;
		if let Some(top) = self.top {
			write!(f, "TOP ({top}) ")?;
		}
		write!(f, "FROM {}", self.target)?;
		if let Some(ref cond) = self.cond {
			write!(f, " WHERE {cond}")?;
		}
		fmt_hints(f, &self.hints)
	}
}

fn fmt_hints(f: &mut fmt::Formatter, hints: &[Hint]) -> fmt::Result {
	if !hints.is_empty() {
		f.write_str(" OPTION (")?;
		fmt_list(f, hints)?;
		f.write_str(")")?;
	}
	Ok(())
}
