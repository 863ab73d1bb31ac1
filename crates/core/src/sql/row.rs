use crate::sql::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// An ordered mapping from column name to [`Value`], plus the logical name
/// of the entity the row originated from.
///
/// Column names are case-insensitive: lookups fold to lowercase, while the
/// declared order of insertion is preserved for projection. Rows are
/// immutable by convention; plan nodes build new rows rather than mutating
/// the ones they receive.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
	columns: IndexMap<String, Value>,
	entity: Option<String>,
}

impl Row {
	/// Create an empty row.
	pub fn new() -> Self {
		Self::default()
	}

	/// Create an empty row tagged with its source entity.
	pub fn for_entity(entity: impl Into<String>) -> Self {
		Row {
			columns: IndexMap::new(),
			entity: Some(entity.into()),
		}
	}

	/// The logical name of the entity this row originated from, if any.
	pub fn entity(&self) -> Option<&str> {
		self.entity.as_deref()
	}

	/// Set a column value, preserving insertion order for new columns.
	pub fn set(&mut self, name: impl AsRef<str>, value: Value) {
		self.columns.insert(name.as_ref().to_lowercase(), value);
	}

	/// Get a column value by case-insensitive name.
	pub fn get(&self, name: &str) -> Option<&Value> {
		if let Some(v) = self.columns.get(name) {
			return Some(v);
		}
		self.columns.get(&name.to_lowercase())
	}

	/// Whether the row carries a column with this name, even when NULL.
	pub fn contains(&self, name: &str) -> bool {
		self.columns.contains_key(name) || self.columns.contains_key(&name.to_lowercase())
	}

	/// The number of columns in this row.
	pub fn len(&self) -> usize {
		self.columns.len()
	}

	/// Whether the row has no columns.
	pub fn is_empty(&self) -> bool {
		self.columns.is_empty()
	}

	/// Iterate over columns in declared order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.columns.iter().map(|(k, v)| (k.as_str(), v))
	}

	/// The column names in declared order.
	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.columns.keys().map(|k| k.as_str())
	}

	/// Build a new row holding this row's columns prefixed with a table
	/// alias, used when combining multiple tables client-side.
	pub fn qualified(&self, alias: &str) -> Row {
		let mut out = Row {
			columns: IndexMap::with_capacity(self.columns.len()),
			entity: self.entity.clone(),
		};
		for (name, value) in self.columns.iter() {
			out.columns.insert(format!("{}.{}", alias.to_lowercase(), name), value.clone());
		}
		out
	}

	/// Build the concatenation of two rows. Columns from `other` overwrite
	/// same-named columns from `self`.
	pub fn merged(&self, other: &Row) -> Row {
		let mut out = self.clone();
		for (name, value) in other.columns.iter() {
			out.columns.insert(name.clone(), value.clone());
		}
		out
	}

	/// Build a row with the same column names and all values NULL, used as
	/// the unmatched-side template for outer joins.
	pub fn null_template(&self) -> Row {
		let mut out = Row {
			columns: IndexMap::with_capacity(self.columns.len()),
			entity: self.entity.clone(),
		};
		for name in self.columns.keys() {
			out.columns.insert(name.clone(), Value::Null);
		}
		out
	}

	/// The canonical key of the named columns, used for join and DISTINCT
	/// hashing. Missing columns key as NULL.
	pub fn key_of(&self, columns: &[String], case_insensitive: bool) -> String {
		let mut key = String::new();
		for name in columns {
			match self.get(name) {
				Some(v) => key.push_str(&v.canonical_key(case_insensitive)),
				None => key.push('\0'),
			}
			key.push('\u{1}');
		}
		key
	}
}

impl FromIterator<(String, Value)> for Row {
	fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
		let mut row = Row::new();
		for (name, value) in iter {
			row.set(name, value);
		}
		row
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lookup_is_case_insensitive() {
		let mut row = Row::new();
		row.set("Name", Value::from("Contoso"));
		assert_eq!(row.get("name"), Some(&Value::from("Contoso")));
		assert_eq!(row.get("NAME"), Some(&Value::from("Contoso")));
	}

	#[test]
	fn order_is_preserved() {
		let mut row = Row::new();
		row.set("b", Value::Int(1));
		row.set("a", Value::Int(2));
		let names: Vec<_> = row.names().collect();
		assert_eq!(names, vec!["b", "a"]);
	}

	#[test]
	fn null_template_matches_schema() {
		let mut row = Row::new();
		row.set("a", Value::Int(1));
		row.set("b", Value::from("x"));
		let t = row.null_template();
		assert_eq!(t.len(), 2);
		assert!(t.get("a").unwrap().is_null());
	}

	#[test]
	fn key_distinguishes_column_boundaries() {
		let mut a = Row::new();
		a.set("x", Value::from("ab"));
		a.set("y", Value::from("c"));
		let mut b = Row::new();
		b.set("x", Value::from("a"));
		b.set("y", Value::from("bc"));
		let cols = vec!["x".to_owned(), "y".to_owned()];
		assert_ne!(a.key_of(&cols, true), b.key_of(&cols, true));
	}
}
