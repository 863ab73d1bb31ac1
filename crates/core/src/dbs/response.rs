use crate::dbs::options::{DmlSafety, Options};
use crate::err::{Error, ErrorCode};
use crate::exe::NodeTiming;
use crate::sql::{Column, Row, Value};
use crate::syn::token::Span;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// One request into the query service.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Request {
	pub sql: String,
	#[serde(default)]
	pub options: Options,
	#[serde(default)]
	pub safety: DmlSafety,
	/// Session variables seeded into the script scope.
	#[serde(default)]
	pub variables: HashMap<String, Value>,
}

impl Request {
	pub fn new(sql: impl Into<String>) -> Self {
		Request {
			sql: sql.into(),
			..Default::default()
		}
	}

	/// Confirm dangerous writes for this request.
	pub fn confirmed(mut self) -> Self {
		self.safety.confirmed = true;
		self
	}
}

/// Execution statistics attached to every response.
#[derive(Clone, Debug, Default, Serialize)]
#[non_exhaustive]
pub struct Stats {
	pub rows: u64,
	pub pages: u64,
	pub elapsed_ms: u64,
	pub node_timings: Vec<NodeTiming>,
}

/// A successful result set.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct ResultSet {
	pub columns: Vec<Column>,
	pub rows: Vec<Row>,
	/// The pushed-down FetchXML, for EXPLAIN output and logs.
	pub executed_fetch_xml: Option<String>,
}

/// The return value of a buffered execution.
#[derive(Debug)]
#[non_exhaustive]
pub struct Response {
	pub time: Duration,
	pub result: Result<ResultSet, Error>,
	pub stats: Stats,
}

impl Response {
	/// The transport-friendly error body, when the request failed.
	pub fn error_body(&self) -> Option<ErrorBody> {
		match self.result {
			Ok(_) => None,
			Err(ref error) => Some(ErrorBody {
				code: error.code(),
				message: error.to_string(),
				hint: error.hint().map(str::to_owned),
			}),
		}
	}
}

/// A serializable error surface: stable code, message, and an imperative
/// hint. Raw internal diagnostics never leak here.
#[derive(Clone, Debug, Serialize)]
#[non_exhaustive]
pub struct ErrorBody {
	pub code: ErrorCode,
	pub message: String,
	pub hint: Option<String>,
}

/// The severity of a validation diagnostic.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub enum Severity {
	Error,
	Warning,
}

/// A validation-time diagnostic. Non-fatal: the editor shows these
/// alongside a best-effort plan.
#[derive(Clone, Debug, Serialize)]
#[non_exhaustive]
pub struct Diagnostic {
	pub severity: Severity,
	pub message: String,
	pub span: Option<Span>,
}

/// The output of EXPLAIN: the rendered plan and the FetchXML it would
/// send.
#[derive(Clone, Debug, Serialize)]
#[non_exhaustive]
pub struct ExplainOutput {
	pub text: String,
	pub fetch_xml: Option<String>,
	pub columns: Vec<Column>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_body_serializes_with_stable_code() {
		let error = Error::DmlBlocked {
			reason: "no WHERE clause".to_owned(),
		};
		let body = ErrorBody {
			code: error.code(),
			message: error.to_string(),
			hint: error.hint().map(str::to_owned),
		};
		let json = serde_json::to_value(&body).unwrap();
		assert_eq!(json["code"], "DmlBlocked");
		assert!(json["hint"].as_str().unwrap().contains("WHERE"));
	}

	#[test]
	fn requests_deserialize_with_defaults() {
		let request: Request = serde_json::from_str(r#"{"sql": "SELECT 1"}"#).unwrap();
		assert_eq!(request.sql, "SELECT 1");
		assert!(request.options.prefetch);
		assert!(!request.safety.confirmed);
	}
}
