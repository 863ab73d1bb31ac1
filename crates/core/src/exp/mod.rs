//! Compiles AST expressions and conditions, once per plan, into delegates
//! evaluated per row. Hot-path dispatch cost is one indirect call per node.

pub(crate) mod cast;
pub(crate) mod cond;
pub(crate) mod expr;

pub use cast::cast_value;

use crate::err::{Error, Result};
use crate::sql::{Condition, Expression, FunctionCall, Row, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Kleene three-valued truth. WHERE and HAVING accept only [`Truth::True`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Truth {
	True,
	False,
	Unknown,
}

impl Truth {
	pub fn is_true(self) -> bool {
		self == Truth::True
	}

	pub fn and(self, other: Truth) -> Truth {
		match (self, other) {
			(Truth::False, _) | (_, Truth::False) => Truth::False,
			(Truth::True, Truth::True) => Truth::True,
			_ => Truth::Unknown,
		}
	}

	pub fn or(self, other: Truth) -> Truth {
		match (self, other) {
			(Truth::True, _) | (_, Truth::True) => Truth::True,
			(Truth::False, Truth::False) => Truth::False,
			_ => Truth::Unknown,
		}
	}

	pub fn not(self) -> Truth {
		match self {
			Truth::True => Truth::False,
			Truth::False => Truth::True,
			Truth::Unknown => Truth::Unknown,
		}
	}
}

impl From<bool> for Truth {
	fn from(v: bool) -> Self {
		if v {
			Truth::True
		} else {
			Truth::False
		}
	}
}

/// A snapshot of the script variable scope, taken when a statement starts
/// executing.
#[derive(Clone, Debug, Default)]
pub struct Bindings {
	vars: HashMap<String, Value>,
}

impl Bindings {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.vars.get(&name.to_lowercase())
	}

	pub fn set(&mut self, name: &str, value: Value) {
		self.vars.insert(name.to_lowercase(), value);
	}

	pub fn contains(&self, name: &str) -> bool {
		self.vars.contains_key(&name.to_lowercase())
	}
}

impl FromIterator<(String, Value)> for Bindings {
	fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
		let mut bindings = Bindings::new();
		for (name, value) in iter {
			bindings.set(&name, value);
		}
		bindings
	}
}

/// A compiled expression delegate.
pub type CompiledExpr = Arc<dyn Fn(&Row, &Bindings) -> Result<Value> + Send + Sync>;

/// A compiled condition delegate.
pub type CompiledCond = Arc<dyn Fn(&Row, &Bindings) -> Result<Truth> + Send + Sync>;

/// Maps normalized aggregate call signatures to the output column holding
/// the aggregate's value, so HAVING and ORDER BY compile aggregate
/// references as column lookups rather than re-invocations.
#[derive(Clone, Debug, Default)]
pub struct AliasMap {
	map: HashMap<String, String>,
}

impl AliasMap {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, signature: String, output: String) {
		self.map.insert(signature.to_lowercase(), output);
	}

	pub fn resolve(&self, call: &FunctionCall) -> Option<&str> {
		self.map.get(&call.signature()).map(String::as_str)
	}

	pub fn is_empty(&self) -> bool {
		self.map.is_empty()
	}

	/// The (signature, output) pairs, for EXPLAIN rendering.
	pub fn pairs(&self) -> Vec<(String, String)> {
		self.map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
	}
}

/// The static context an expression is compiled against.
#[derive(Clone, Debug, Default)]
pub struct CompileEnv {
	/// Aggregate alias substitutions, populated for HAVING and ORDER BY
	/// over aggregate plans.
	pub aliases: AliasMap,
}

impl CompileEnv {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_aliases(aliases: AliasMap) -> Self {
		CompileEnv {
			aliases,
		}
	}
}

/// Compile an expression into a per-row delegate.
pub fn compile_expr(expression: &Expression, env: &CompileEnv) -> Result<CompiledExpr> {
	expr::compile(expression, env)
}

/// Compile a condition into a per-row truth delegate.
pub fn compile_cond(condition: &Condition, env: &CompileEnv) -> Result<CompiledCond> {
	cond::compile(condition, env)
}

/// Resolve a possibly-qualified column reference against a row.
///
/// Qualified references try the `alias.column` key first, then the bare
/// column when the row originated from the named table. Bare references try
/// the column directly, then fall back to a unique `*.column` suffix match
/// across qualified keys, failing as ambiguous when several tables carry
/// the column.
pub(crate) fn resolve_column(row: &Row, table: Option<&str>, column: &str) -> Result<Value> {
	if let Some(table) = table {
		let qualified = format!("{}.{}", table.to_lowercase(), column.to_lowercase());
		if let Some(v) = row.get(&qualified) {
			return Ok(v.clone());
		}
		if let Some(v) = row.get(column) {
			return Ok(v.clone());
		}
		return Err(Error::ColumnNotFound {
			entity: table.to_owned(),
			column: column.to_owned(),
		});
	}
	if let Some(v) = row.get(column) {
		return Ok(v.clone());
	}
	let suffix = format!(".{}", column.to_lowercase());
	let mut found = None;
	for (name, value) in row.iter() {
		if name.ends_with(&suffix) {
			if found.is_some() {
				return Err(Error::AmbiguousColumn {
					name: column.to_owned(),
				});
			}
			found = Some(value.clone());
		}
	}
	found.ok_or_else(|| Error::ColumnNotFound {
		entity: row.entity().unwrap_or_default().to_owned(),
		column: column.to_owned(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kleene_truth_tables() {
		use Truth::*;
		assert_eq!(True.and(Unknown), Unknown);
		assert_eq!(False.and(Unknown), False);
		assert_eq!(True.or(Unknown), True);
		assert_eq!(False.or(Unknown), Unknown);
		assert_eq!(Unknown.not(), Unknown);
	}

	#[test]
	fn qualified_resolution_prefers_the_alias_key() {
		let mut row = Row::new();
		row.set("a.name", Value::from("left"));
		row.set("b.name", Value::from("right"));
		assert_eq!(resolve_column(&row, Some("b"), "name").unwrap(), Value::from("right"));
		assert!(matches!(
			resolve_column(&row, None, "name"),
			Err(Error::AmbiguousColumn { .. })
		));
	}
}
