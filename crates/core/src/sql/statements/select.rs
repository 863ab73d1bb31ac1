use crate::sql::condition::Condition;
use crate::sql::expression::{fmt_list, Expression, OrderItem};
use crate::sql::hint::Hint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A table reference of up to three parts: an optional bracketed
/// environment profile label, an optional schema, and the entity name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TableSource {
	pub environment: Option<String>,
	pub schema: Option<String>,
	pub entity: String,
	pub alias: Option<String>,
}

impl TableSource {
	pub fn named(entity: impl Into<String>) -> Self {
		TableSource {
			environment: None,
			schema: None,
			entity: entity.into(),
			alias: None,
		}
	}

	/// The name other clauses refer to this table by: its alias when one
	/// was declared, otherwise the entity name.
	pub fn binding(&self) -> &str {
		self.alias.as_deref().unwrap_or(&self.entity)
	}

	/// Whether the reference targets a remote environment.
	pub fn is_remote(&self) -> bool {
		self.environment.is_some()
	}
}

impl fmt::Display for TableSource {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if let Some(ref env) = self.environment {
			write!(f, "[{env}].")?;
		}
		if let Some(ref schema) = self.schema {
			write!(f, "{schema}.")?;
		}
		f.write_str(&self.entity)?;
		if let Some(ref alias) = self.alias {
			write!(f, " AS {alias}")?;
		}
		Ok(())
	}
}

/// The join flavors the parser accepts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JoinKind {
	Inner,
	Left,
	Right,
	Full,
	Cross,
}

impl fmt::Display for JoinKind {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(match self {
			JoinKind::Inner => "INNER JOIN",
			JoinKind::Left => "LEFT OUTER JOIN",
			JoinKind::Right => "RIGHT OUTER JOIN",
			JoinKind::Full => "FULL OUTER JOIN",
			JoinKind::Cross => "CROSS JOIN",
		})
	}
}

/// One JOIN clause of a SELECT statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Join {
	pub kind: JoinKind,
	pub table: TableSource,
	pub on: Option<Condition>,
}

impl fmt::Display for Join {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} {}", self.kind, self.table)?;
		if let Some(ref on) = self.on {
			write!(f, " ON {on}")?;
		}
		Ok(())
	}
}

/// One item of the SELECT projection list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SelectColumn {
	/// `*` or `alias.*`.
	Wildcard(Option<String>),
	Expr {
		expr: Expression,
		alias: Option<String>,
	},
}

impl SelectColumn {
	/// The output column name: the alias when declared, the column name for
	/// plain references, otherwise the printed expression.
	pub fn output_name(&self) -> String {
		match self {
			SelectColumn::Wildcard(_) => "*".to_owned(),
			SelectColumn::Expr {
				expr,
				alias,
			} => match alias {
				Some(a) => a.clone(),
				None => match expr {
					Expression::Column(c) => c.column.clone(),
					other => other.to_string(),
				},
			},
		}
	}
}

impl fmt::Display for SelectColumn {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			SelectColumn::Wildcard(None) => f.write_str("*"),
			SelectColumn::Wildcard(Some(t)) => write!(f, "{t}.*"),
			SelectColumn::Expr {
				expr,
				alias,
			} => {
				write!(f, "{expr}")?;
				if let Some(a) = alias {
					write!(f, " AS {a}")?;
				}
				Ok(())
			}
		}
	}
}

/// A common table expression. The body is a chain of one or more SELECTs
/// combined with UNION; a CTE whose later members reference its own name is
/// recursive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Cte {
	pub name: String,
	pub columns: Vec<String>,
	pub body: Vec<SelectStatement>,
	pub union_all: bool,
}

impl Cte {
	/// Whether any member of the body references the CTE's own name.
	pub fn is_recursive(&self) -> bool {
		self.body.iter().any(|s| s.references_table(&self.name))
	}
}

impl fmt::Display for Cte {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(&self.name)?;
		if !self.columns.is_empty() {
			f.write_str(" (")?;
			for (i, c) in self.columns.iter().enumerate() {
				if i > 0 {
					f.write_str(", ")?;
				}
				f.write_str(c)?;
			}
			f.write_str(")")?;
		}
		f.write_str(" AS (")?;
		for (i, s) in self.body.iter().enumerate() {
			if i > 0 {
				f.write_str(if self.union_all { " UNION ALL " } else { " UNION " })?;
			}
			write!(f, "{s}")?;
		}
		f.write_str(")")
	}
}

/// A SELECT statement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct SelectStatement {
	pub ctes: Vec<Cte>,
	pub distinct: bool,
	pub top: Option<u64>,
	pub columns: Vec<SelectColumn>,
	pub from: Option<TableSource>,
	pub joins: Vec<Join>,
	pub cond: Option<Condition>,
	pub group: Vec<Expression>,
	pub having: Option<Condition>,
	pub order: Vec<OrderItem>,
	pub offset: Option<u64>,
	pub fetch: Option<u64>,
	pub hints: Vec<Hint>,
}

impl SelectStatement {
	/// Whether this statement, or any of its joins, references the named
	/// table. Used to detect recursive CTEs.
	pub fn references_table(&self, name: &str) -> bool {
		let hit = |t: &TableSource| t.entity.eq_ignore_ascii_case(name);
		self.from.as_ref().is_some_and(hit) || self.joins.iter().any(|j| hit(&j.table))
	}

	/// Whether the projection or HAVING or ORDER BY carries any aggregate
	/// function call.
	pub fn is_aggregate(&self) -> bool {
		!self.group.is_empty()
			|| self.columns.iter().any(|c| match c {
				SelectColumn::Expr {
					expr,
					..
				} => expr.contains_aggregate(),
				SelectColumn::Wildcard(_) => false,
			})
			|| self.having.as_ref().is_some_and(Condition::contains_aggregate)
	}
}

impl fmt::Display for SelectStatement {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if !self.ctes.is_empty() {
			f.write_str("WITH ")?;
			fmt_list(f, &self.ctes)?;
			f.write_str(" ")?;
		}
		f.write_str("SELECT ")?;
		if self.distinct {
			f.write_str("DISTINCT ")?;
		}
		if let Some(top) = self.top {
			write!(f, "TOP {top} ")?;
		}
		fmt_list(f, &self.columns)?;
		if let Some(ref from) = self.from {
			write!(f, " FROM {from}")?;
		}
		for join in &self.joins {
			write!(f, " {join}")?;
		}
		if let Some(ref cond) = self.cond {
			write!(f, " WHERE {cond}")?;
		}
		if !self.group.is_empty() {
			f.write_str(" GROUP BY ")?;
			fmt_list(f, &self.group)?;
		}
		if let Some(ref having) = self.having {
			write!(f, " HAVING {having}")?;
		}
		if !self.order.is_empty() {
			f.write_str(" ORDER BY ")?;
			fmt_list(f, &self.order)?;
		}
		if let Some(offset) = self.offset {
			write!(f, " OFFSET {offset} ROWS")?;
			if let Some(fetch) = self.fetch {
				write!(f, " FETCH NEXT {fetch} ROWS ONLY")?;
			}
		}
		if !self.hints.is_empty() {
			f.write_str(" OPTION (")?;
			fmt_list(f, &self.hints)?;
			f.write_str(")")?;
		}
		Ok(())
	}
}

/// A UNION chain of SELECT statements, with an optional trailing ORDER BY
/// applied to the combined result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct UnionStatement {
	pub selects: Vec<SelectStatement>,
	/// `all[i]` records whether the UNION between member i and i+1 was
	/// UNION ALL.
	pub all: Vec<bool>,
	pub order: Vec<OrderItem>,
}

impl fmt::Display for UnionStatement {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, s) in self.selects.iter().enumerate() {
			if i > 0 {
				let all = self.all.get(i - 1).copied().unwrap_or(false);
				f.write_str(if all { " UNION ALL " } else { " UNION " })?;
			}
			write!(f, "{s}")?;
		}
		if !self.order.is_empty() {
			f.write_str(" ORDER BY ")?;
			fmt_list(f, &self.order)?;
		}
		Ok(())
	}
}
