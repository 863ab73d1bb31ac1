pub mod dml;
pub mod script;
pub mod select;

pub use dml::{DeleteStatement, InsertSource, InsertStatement, UpdateStatement};
pub use script::{
	Block, DeclareStatement, DeclaredVar, IfStatement, RaiseErrorStatement, SetStatement,
	WhileStatement,
};
pub use select::{
	Cte, Join, JoinKind, SelectColumn, SelectStatement, TableSource, UnionStatement,
};
