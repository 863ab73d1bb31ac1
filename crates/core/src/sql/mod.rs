//! The abstract syntax tree of the engine's T-SQL surface, and the runtime
//! value model rows are built from.

pub mod cast;
pub mod column;
pub mod condition;
pub mod expression;
pub mod hint;
pub mod row;
pub mod statement;
pub mod statements;
pub mod value;

pub use cast::CastType;
pub use column::Column;
pub use condition::{ComparisonOperator, Condition};
pub use expression::{
	BinaryOperator, CaseExpression, ColumnRef, Expression, FunctionCall, Literal, OrderItem,
	OverClause, UnaryOperator,
};
pub use hint::Hint;
pub use row::Row;
pub use statement::{Script, Statement};
pub use statements::{
	Cte, DeleteStatement, InsertSource, InsertStatement, Join, JoinKind, SelectColumn,
	SelectStatement, TableSource, UnionStatement, UpdateStatement,
};
pub use value::{Kind, Lookup, OptionSet, Value};
