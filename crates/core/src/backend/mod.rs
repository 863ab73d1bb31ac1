//! The narrow interfaces the engine consumes the outside world through: the
//! backend query executor, the bulk write executor, and the connection
//! pool. The engine never talks HTTP itself; everything flows through these
//! traits, which keeps the executor testable against [`mem::MemBackend`].

pub mod mem;
pub mod pool;

pub use pool::{normalize_environment_key, Environment, Pool};

use crate::err::{Error, Result};
use crate::sql::{Column, Row};
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use uuid::Uuid;

/// The lazy row sequence every plan node produces.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<Row>> + Send>>;

/// Build a stream over an already-materialized set of rows.
pub fn rows_stream(rows: Vec<Row>) -> RowStream {
	Box::pin(futures::stream::iter(rows.into_iter().map(Ok)))
}

/// One page of FetchXML results.
#[derive(Clone, Debug, Default)]
pub struct FetchPage {
	pub rows: Vec<Row>,
	/// The paging cookie to pass back for the next page.
	pub cookie: Option<String>,
	/// Whether more records exist beyond this page.
	pub more: bool,
}

/// A buffered TDS result set.
#[derive(Clone, Debug, Default)]
pub struct TdsResult {
	pub columns: Vec<Column>,
	pub rows: Vec<Row>,
}

/// Executes one page of a FetchXML query, a fast record count, or a TDS
/// statement. The caller owns paging.
#[async_trait]
pub trait QueryBackend: Send + Sync {
	/// Execute one page of a FetchXML query. `page` is one-based; the
	/// cookie from the previous page must be passed back for pages after
	/// the first.
	async fn execute_fetch_xml(
		&self,
		fetch_xml: &str,
		page: Option<u32>,
		cookie: Option<&str>,
	) -> Result<FetchPage>;

	/// The near-instant total record count for an entity.
	async fn total_record_count(&self, entity: &str) -> Result<i64>;

	/// Execute a read-only statement against the TDS replica.
	async fn execute_tds(&self, sql: &str) -> Result<TdsResult>;
}

/// Options for a bulk write call.
#[derive(Clone, Debug)]
pub struct BulkOptions {
	pub batch_size: usize,
	pub bypass_plugins: bool,
	pub bypass_flows: bool,
}

impl Default for BulkOptions {
	fn default() -> Self {
		BulkOptions {
			batch_size: *crate::cnf::DML_BATCH_SIZE,
			bypass_plugins: false,
			bypass_flows: false,
		}
	}
}

/// The outcome of one record of a bulk write.
#[derive(Clone, Debug)]
pub struct WriteOutcome {
	pub id: Option<Uuid>,
	pub error: Option<String>,
}

impl WriteOutcome {
	pub fn ok(id: Uuid) -> Self {
		WriteOutcome {
			id: Some(id),
			error: None,
		}
	}
}

/// Performs CreateMultiple/UpdateMultiple/DeleteMultiple calls with its own
/// batching and retry. Consumed by the DML plan leaf.
#[async_trait]
pub trait BulkWriter: Send + Sync {
	async fn create_multiple(
		&self,
		entity: &str,
		records: Vec<Row>,
		options: &BulkOptions,
	) -> Result<Vec<WriteOutcome>>;

	async fn update_multiple(
		&self,
		entity: &str,
		records: Vec<Row>,
		options: &BulkOptions,
	) -> Result<Vec<WriteOutcome>>;

	async fn delete_multiple(
		&self,
		entity: &str,
		ids: Vec<Uuid>,
		options: &BulkOptions,
	) -> Result<Vec<WriteOutcome>>;
}

/// Map a backend transport failure into the engine's error space.
pub fn remote_error(message: impl Into<String>) -> Error {
	Error::Remote {
		message: message.into(),
	}
}
