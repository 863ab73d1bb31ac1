use crate::sql::value::Kind;
use serde::{Deserialize, Serialize};

/// Describes one output column of a plan node or result set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Column {
	/// The logical column name rows are keyed by.
	pub name: String,
	/// The name shown to the user. Defaults to the logical name.
	pub display: String,
	/// The inferred value kind, when known before execution.
	pub kind: Option<Kind>,
	/// Whether the column may hold NULL.
	pub nullable: bool,
	/// Whether the column holds lookup references.
	pub lookup: bool,
	/// Whether the column holds option-set values.
	pub option_set: bool,
	/// Whether the column is the output alias of an aggregate.
	pub aggregate_alias: bool,
	/// Whether the column is a synthesized `*name` companion for a lookup
	/// or option-set column.
	pub virtual_name: bool,
}

impl Column {
	/// Create a plain nullable column.
	pub fn new(name: impl Into<String>) -> Self {
		let name = name.into();
		Column {
			display: name.clone(),
			name,
			kind: None,
			nullable: true,
			lookup: false,
			option_set: false,
			aggregate_alias: false,
			virtual_name: false,
		}
	}

	/// Create a column with a known kind.
	pub fn typed(name: impl Into<String>, kind: Kind) -> Self {
		let mut col = Self::new(name);
		col.kind = Some(kind);
		col.lookup = kind == Kind::Lookup;
		col.option_set = kind == Kind::OptionSet;
		col
	}

	/// Rename the user-facing label, keeping the logical name.
	pub fn with_display(mut self, display: impl Into<String>) -> Self {
		self.display = display.into();
		self
	}

	/// Mark the column as an aggregate output alias.
	pub fn as_aggregate(mut self) -> Self {
		self.aggregate_alias = true;
		self
	}

	/// Build the synthesized `*name` companion column for this column.
	pub fn name_companion(&self) -> Column {
		let mut col = Column::typed(format!("{}name", self.name), Kind::String);
		col.display = format!("{}name", self.display);
		col.virtual_name = true;
		col
	}

	/// Whether projection should emit a `*name` companion for this column.
	pub fn wants_name_companion(&self) -> bool {
		self.lookup || self.option_set
	}
}
