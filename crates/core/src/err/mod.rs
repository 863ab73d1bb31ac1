use crate::syn::error::SyntaxError;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// A convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The stable, user-facing classification of an [`Error`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub enum ErrorCode {
	Parse,
	Validation,
	TypeMismatch,
	AggregateLimitExceeded,
	MemoryLimit,
	PlanTimeout,
	Cancelled,
	DmlBlocked,
	RemoteFailure,
	Internal,
}

/// An error originating from the query engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The SQL text could not be parsed
	#[error("Parse error: {0}")]
	Syntax(#[from] SyntaxError),

	/// A statement referenced an entity the environment does not define
	#[error("Unknown entity '{name}'")]
	EntityNotFound {
		name: String,
	},

	/// A statement referenced an attribute the entity does not define
	#[error("Unknown column '{column}' on entity '{entity}'")]
	ColumnNotFound {
		entity: String,
		column: String,
	},

	/// A column reference matched more than one table in scope
	#[error("Ambiguous column reference '{name}'")]
	AmbiguousColumn {
		name: String,
	},

	/// A statement failed semantic validation
	#[error("Invalid statement: {message}")]
	InvalidStatement {
		message: String,
	},

	/// A scalar subquery produced more than one row at runtime
	#[error("Scalar subquery returned more than one row")]
	SubqueryTooManyRows,

	/// Incompatible operand types, an overflowing CAST, or division by zero
	#[error("Type mismatch: {message}")]
	TypeMismatch {
		message: String,
	},

	/// The backend refused an aggregate over more than 50,000 records and
	/// partitioned retry was exhausted or not possible
	#[error("The aggregate query touches more than {limit} records and could not be partitioned further")]
	AggregateLimitExceeded {
		limit: u64,
	},

	/// A materializing plan node exceeded the configured row cap
	#[error("Query exceeded the in-memory row limit of {limit} rows")]
	MemoryLimit {
		limit: usize,
	},

	/// The wall-clock budget for the request was exhausted
	#[error("The query exceeded its {:.0?} time budget; in-flight requests may still complete server-side", .timeout)]
	QueryTimedout {
		timeout: Duration,
	},

	/// Cooperative cancellation fired
	#[error("The query was cancelled; in-flight requests may still complete server-side")]
	QueryCancelled,

	/// The DML safety guard refused to run the write
	#[error("Statement blocked: {reason}")]
	DmlBlocked {
		reason: String,
	},

	/// The DML statement touched more rows than the configured safety cap
	#[error("The statement affects more than {cap} rows")]
	DmlRowCapExceeded {
		cap: u64,
	},

	/// A recursive common table expression exceeded its recursion ceiling
	#[error("The maximum recursion {max} has been exhausted before statement completion")]
	RecursionLimitExceeded {
		max: u32,
	},

	/// A WHILE loop exceeded the maximum number of iterations
	#[error("The loop exceeded {max} iterations")]
	LoopLimitExceeded {
		max: u64,
	},

	/// A RAISERROR statement fired with error severity
	#[error("{message}")]
	Raised {
		message: String,
	},

	/// A variable was referenced before being declared
	#[error("Must declare the scalar variable '@{name}'")]
	VariableNotFound {
		name: String,
	},

	/// No function with this name is registered
	#[error("'{name}' is not a recognized built-in function name")]
	FunctionNotFound {
		name: String,
	},

	/// A function was invoked with the wrong number of arguments
	#[error("The {name} function requires {expected} argument(s)")]
	InvalidArguments {
		name: String,
		expected: String,
	},

	/// No environment with this profile label is registered with the pool
	#[error("Unknown environment '{label}'")]
	EnvironmentNotFound {
		label: String,
	},

	/// The backend reported a failure executing a request
	#[error("Backend request failed: {message}")]
	Remote {
		message: String,
	},

	/// The provided timeout would overflow the clock
	#[error("Invalid timeout of {0} seconds")]
	InvalidTimeout(u64),

	/// An internal invariant was violated. Always a bug
	#[error("Internal error: {0}")]
	Unreachable(&'static str),

	/// Flow-control sentinel for BREAK inside WHILE. Never user-visible
	#[doc(hidden)]
	#[error("BREAK outside of a loop")]
	FlowBreak,

	/// Flow-control sentinel for CONTINUE inside WHILE. Never user-visible
	#[doc(hidden)]
	#[error("CONTINUE outside of a loop")]
	FlowContinue,
}

impl Error {
	/// The stable error code for this error.
	pub fn code(&self) -> ErrorCode {
		match self {
			Self::Syntax(_) => ErrorCode::Parse,
			Self::EntityNotFound { .. }
			| Self::ColumnNotFound { .. }
			| Self::AmbiguousColumn { .. }
			| Self::InvalidStatement { .. }
			| Self::SubqueryTooManyRows
			| Self::RecursionLimitExceeded { .. }
			| Self::LoopLimitExceeded { .. }
			| Self::Raised { .. }
			| Self::VariableNotFound { .. }
			| Self::FunctionNotFound { .. }
			| Self::InvalidArguments { .. }
			| Self::EnvironmentNotFound { .. } => ErrorCode::Validation,
			Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
			Self::AggregateLimitExceeded { .. } => ErrorCode::AggregateLimitExceeded,
			Self::MemoryLimit { .. } => ErrorCode::MemoryLimit,
			Self::QueryTimedout { .. } => ErrorCode::PlanTimeout,
			Self::QueryCancelled => ErrorCode::Cancelled,
			Self::DmlBlocked { .. } | Self::DmlRowCapExceeded { .. } => ErrorCode::DmlBlocked,
			Self::Remote { .. } => ErrorCode::RemoteFailure,
			// A BREAK or CONTINUE that escapes every loop is a statement
			// error, not an engine bug.
			Self::FlowBreak | Self::FlowContinue => ErrorCode::Validation,
			Self::InvalidTimeout(_) | Self::Unreachable(_) => ErrorCode::Internal,
		}
	}

	/// A short imperative hint shown alongside the user-visible message.
	pub fn hint(&self) -> Option<&'static str> {
		match self {
			Self::DmlBlocked { .. } => Some("add a WHERE clause, or confirm the full-table write"),
			Self::DmlRowCapExceeded { .. } => Some("use --no-limit to lift the row cap"),
			Self::AggregateLimitExceeded { .. } => {
				Some("reduce the date range, or add a more selective WHERE clause")
			}
			Self::MemoryLimit { .. } => {
				Some("add a TOP clause, or raise the materialization limit")
			}
			Self::QueryTimedout { .. } => Some("raise the timeout, or narrow the query"),
			Self::RecursionLimitExceeded { .. } => Some("raise MAXRECURSION, or bound the CTE"),
			_ => None,
		}
	}

	/// Whether this error is a cooperative cancellation or timeout.
	/// Cancellations from concurrent siblings are swallowed in favor of the
	/// first meaningful error.
	pub fn is_cancellation(&self) -> bool {
		matches!(self, Self::QueryCancelled | Self::QueryTimedout { .. })
	}

	/// Whether this error, or any message it wraps, indicates the backend's
	/// 50k aggregate record ceiling.
	pub fn is_aggregate_limit(&self) -> bool {
		match self {
			Self::AggregateLimitExceeded { .. } => true,
			Self::Remote { message } => {
				let m = message.to_ascii_lowercase();
				m.contains("aggregatequeryrecordlimit")
					|| (m.contains("aggregate") && m.contains("limit"))
			}
			_ => false,
		}
	}

}

/// Picks the most meaningful error out of a set raised by concurrent
/// children: the first non-cancellation error wins, with cancellations
/// surfaced only when nothing else went wrong.
pub fn first_meaningful(errors: Vec<Error>) -> Option<Error> {
	let mut cancelled = None;
	for e in errors {
		if e.is_cancellation() {
			cancelled.get_or_insert(e);
		} else {
			return Some(e);
		}
	}
	cancelled
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn codes_match_spec_table() {
		assert_eq!(
			Error::TypeMismatch {
				message: "x".into()
			}
			.code(),
			ErrorCode::TypeMismatch
		);
		assert_eq!(
			Error::DmlBlocked {
				reason: "no WHERE".into()
			}
			.code(),
			ErrorCode::DmlBlocked
		);
		assert_eq!(Error::QueryCancelled.code(), ErrorCode::Cancelled);
		assert_eq!(Error::Unreachable("x").code(), ErrorCode::Internal);
	}

	#[test]
	fn cancellation_message_mentions_in_flight_requests() {
		assert!(Error::QueryCancelled.to_string().contains("in-flight"));
	}

	#[test]
	fn aggregate_limit_detected_in_remote_faults() {
		let e = Error::Remote {
			message: "AggregateQueryRecordLimit exceeded. Cannot perform this operation.".into(),
		};
		assert!(e.is_aggregate_limit());
		let e = Error::Remote {
			message: "entity does not exist".into(),
		};
		assert!(!e.is_aggregate_limit());
	}

	#[test]
	fn meaningful_error_wins_over_cancellation() {
		let picked = first_meaningful(vec![
			Error::QueryCancelled,
			Error::Remote {
				message: "boom".into(),
			},
		])
		.unwrap();
		assert!(matches!(picked, Error::Remote { .. }));
	}
}
