use once_cell::sync::Lazy;

/// The maximum number of rows the backend returns per FetchXML page.
/// Requests asking for more are clamped to this value.
pub const MAX_PAGE_SIZE: u32 = 5000;

/// The number of records beyond which the backend refuses to evaluate an
/// aggregate FetchXML query.
pub const AGGREGATE_RECORD_LIMIT: u64 = 50_000;

/// Default number of rows buffered ahead of the consumer by a prefetching
/// scan. One backend page by default.
pub static PREFETCH_BUFFER_SIZE: Lazy<usize> =
	lazy_env_parse!("FETCHQL_PREFETCH_BUFFER_SIZE", usize, 5000);

/// Default cap on the number of rows any single plan node may materialize
/// into memory. Exceeding it fails the query with a memory-limit error.
pub static MAX_MATERIALIZATION_ROWS: Lazy<usize> =
	lazy_env_parse!("FETCHQL_MAX_MATERIALIZATION_ROWS", usize, 500_000);

/// Default cap on the number of rows a single DML statement may touch
/// without the caller passing an explicit no-limit flag.
pub static DML_ROW_CAP: Lazy<u64> = lazy_env_parse!("FETCHQL_DML_ROW_CAP", u64, 10_000);

/// Default number of records sent to the bulk write executor per batch.
pub static DML_BATCH_SIZE: Lazy<usize> = lazy_env_parse!("FETCHQL_DML_BATCH_SIZE", usize, 100);

/// Default wall-clock budget for a single request, in milliseconds.
pub static QUERY_TIMEOUT_MS: Lazy<u64> = lazy_env_parse!("FETCHQL_QUERY_TIMEOUT_MS", u64, 300_000);

/// Default time-to-live for cached per-entity attribute and relationship
/// metadata, in seconds.
pub static METADATA_TTL_SECS: Lazy<u64> = lazy_env_parse!("FETCHQL_METADATA_TTL_SECS", u64, 300);

/// Default logical connection capacity advertised per environment.
pub static POOL_CAPACITY: Lazy<usize> = lazy_env_parse!("FETCHQL_POOL_CAPACITY", usize, 4);

/// Maximum number of iterations a WHILE loop may run before the executor
/// aborts the script.
pub static MAX_LOOP_ITERATIONS: Lazy<u64> =
	lazy_env_parse!("FETCHQL_MAX_LOOP_ITERATIONS", u64, 100_000);

/// Default recursion ceiling for recursive common table expressions.
pub static MAX_RECURSION: Lazy<u32> = lazy_env_parse!("FETCHQL_MAX_RECURSION", u32, 100);

/// Specifies how deeply nested a query may be before parsing fails.
/// Subqueries, CASE expressions, and parenthesised conditions all count
/// towards this limit.
pub static MAX_QUERY_DEPTH: Lazy<u32> = lazy_env_parse!("FETCHQL_MAX_QUERY_DEPTH", u32, 60);
