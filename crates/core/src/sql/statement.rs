use crate::sql::statements::{
	Block, DeclareStatement, DeleteStatement, IfStatement, InsertStatement, RaiseErrorStatement,
	SetStatement, UnionStatement, UpdateStatement, WhileStatement,
};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use crate::sql::statements::SelectStatement;

/// A single parsed statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Statement {
	Select(SelectStatement),
	Union(UnionStatement),
	Insert(InsertStatement),
	Update(UpdateStatement),
	Delete(DeleteStatement),
	If(IfStatement),
	While(WhileStatement),
	Block(Block),
	Declare(DeclareStatement),
	Set(SetStatement),
	RaiseError(RaiseErrorStatement),
	Break,
	Continue,
}

impl Statement {
	/// Whether this statement, or any statement nested within it, writes to
	/// the backend.
	pub fn writes(&self) -> bool {
		match self {
			Statement::Insert(_) | Statement::Update(_) | Statement::Delete(_) => true,
			Statement::If(s) => {
				s.then.writes() || s.otherwise.as_ref().is_some_and(|e| e.writes())
			}
			Statement::While(s) => s.body.writes(),
			Statement::Block(b) => b.0.iter().any(Statement::writes),
			_ => false,
		}
	}
}

impl fmt::Display for Statement {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Statement::Select(s) => write!(f, "{s}"),
			Statement::Union(s) => write!(f, "{s}"),
			Statement::Insert(s) => write!(f, "{s}"),
			Statement::Update(s) => write!(f, "{s}"),
			Statement::Delete(s) => write!(f, "{s}"),
			Statement::If(s) => write!(f, "{s}"),
			Statement::While(s) => write!(f, "{s}"),
			Statement::Block(s) => write!(f, "{s}"),
			Statement::Declare(s) => write!(f, "{s}"),
			Statement::Set(s) => write!(f, "{s}"),
			Statement::RaiseError(s) => write!(f, "{s}"),
			Statement::Break => f.write_str("BREAK"),
			Statement::Continue => f.write_str("CONTINUE"),
		}
	}
}

/// A parsed batch of statements, in source order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Script(pub Vec<Statement>);

impl Script {
	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Statement> {
		self.0.iter()
	}
}

impl fmt::Display for Script {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, s) in self.0.iter().enumerate() {
			if i > 0 {
				f.write_str("; ")?;
			}
			write!(f, "{s}")?;
		}
		Ok(())
	}
}

impl IntoIterator for Script {
	type Item = Statement;
	type IntoIter = std::vec::IntoIter<Statement>;
	fn into_iter(self) -> Self::IntoIter {
		self.0.into_iter()
	}
}
