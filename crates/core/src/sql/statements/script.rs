use crate::sql::cast::CastType;
use crate::sql::condition::Condition;
use crate::sql::expression::Expression;
use crate::sql::statement::Statement;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An IF statement with an optional ELSE branch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct IfStatement {
	pub cond: Condition,
	pub then: Box<Statement>,
	pub otherwise: Option<Box<Statement>>,
}

impl fmt::Display for IfStatement {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "IF {} {}", self.cond, self.then)?;
		if let Some(ref e) = self.otherwise {
			write!(f, " ELSE {e}")?;
		}
		Ok(())
	}
}

/// A WHILE loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct WhileStatement {
	pub cond: Condition,
	pub body: Box<Statement>,
}

impl fmt::Display for WhileStatement {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "WHILE {} {}", self.cond, self.body)
	}
}

/// A BEGIN ... END block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Block(pub Vec<Statement>);

impl fmt::Display for Block {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("BEGIN")?;
		for s in &self.0 {
			write!(f, " {s};")?;
		}
		f.write_str(" END")
	}
}

/// A DECLARE statement introducing one or more variables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct DeclareStatement {
	pub vars: Vec<DeclaredVar>,
}

/// One variable of a DECLARE statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct DeclaredVar {
	pub name: String,
	pub ty: CastType,
	pub init: Option<Expression>,
}

impl fmt::Display for DeclareStatement {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("DECLARE ")?;
		for (i, v) in self.vars.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "@{} {}", v.name, v.ty)?;
			if let Some(ref init) = v.init {
				write!(f, " = {init}")?;
			}
		}
		Ok(())
	}
}

/// A SET statement assigning a variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct SetStatement {
	pub name: String,
	pub expr: Expression,
}

impl fmt::Display for SetStatement {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "SET @{} = {}", self.name, self.expr)
	}
}

/// A RAISERROR statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct RaiseErrorStatement {
	pub message: Expression,
	pub severity: i32,
	pub state: i32,
}

impl RaiseErrorStatement {
	/// Severity 11 and above terminates the script with an error; lower
	/// severities are informational.
	pub fn is_error(&self) -> bool {
		self.severity >= 11
	}
}

impl fmt::Display for RaiseErrorStatement {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "RAISERROR({}, {}, {})", self.message, self.severity, self.state)
	}
}
