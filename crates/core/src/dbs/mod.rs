//! The query service layer: request/response contracts, plan options,
//! progress reporting, and the façade driving parse → plan → execute.

pub mod executor;
pub mod options;
pub mod progress;
pub mod response;

pub use executor::{QueryService, StreamingResponse};
pub use options::{DmlSafety, Options};
pub use progress::{NoopProgress, Phase, Progress};
pub use response::{
	Diagnostic, ErrorBody, ExplainOutput, Request, Response, ResultSet, Severity, Stats,
};

#[cfg(test)]
pub(crate) fn test_context() -> crate::exe::ExecContext {
	use crate::backend::mem::MemBackend;
	use crate::backend::{Environment, Pool};
	use crate::ctx::MutableContext;
	use crate::err::Result;
	use crate::meta::{EntityMetadata, MetadataProvider};
	use async_trait::async_trait;
	use std::sync::Arc;

	struct EmptyMeta;

	#[async_trait]
	impl MetadataProvider for EmptyMeta {
		async fn entity_names(&self) -> Result<Vec<String>> {
			Ok(Vec::new())
		}

		async fn entity(&self, logical_name: &str) -> Result<Arc<EntityMetadata>> {
			let mut meta = EntityMetadata::default();
			meta.logical_name = logical_name.to_owned();
			Ok(Arc::new(meta))
		}
	}

	let backend = Arc::new(MemBackend::new());
	let pool = Arc::new(Pool::new());
	let env = pool.register(Environment::new(
		"test",
		"https://test.crm.dynamics.com",
		backend.clone(),
		backend,
		Arc::new(EmptyMeta),
	));
	crate::exe::ExecContext::new(
		MutableContext::background().freeze(),
		env,
		pool,
		Arc::new(Options::default()),
		Arc::new(NoopProgress),
	)
}
