//! The connection pool: a registry of configured environments, each
//! advertising a logical capacity that plan nodes borrow permits from.

use crate::backend::{BulkWriter, QueryBackend};
use crate::cnf::POOL_CAPACITY;
use crate::err::{Error, Result};
use crate::meta::{MetadataCache, MetadataProvider};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Normalize an environment URL into its cross-environment key form:
/// lowercased with a trailing slash.
pub fn normalize_environment_key(url: &str) -> String {
	let mut key = url.trim().to_lowercase();
	if !key.ends_with('/') {
		key.push('/');
	}
	key
}

/// One configured environment: a backend, a bulk writer, metadata, and a
/// capacity-bounded semaphore.
#[non_exhaustive]
pub struct Environment {
	pub label: String,
	/// The URL-normalized environment key.
	pub key: String,
	/// Whether the profile is marked as production. Cross-environment DML
	/// into a production target always requires confirmation.
	pub production: bool,
	pub backend: Arc<dyn QueryBackend>,
	pub bulk: Arc<dyn BulkWriter>,
	pub meta: Arc<MetadataCache>,
	capacity: usize,
	semaphore: Arc<Semaphore>,
}

impl Environment {
	/// Build an environment around backend handles.
	pub fn new(
		label: impl Into<String>,
		url: &str,
		backend: Arc<dyn QueryBackend>,
		bulk: Arc<dyn BulkWriter>,
		meta: Arc<dyn MetadataProvider>,
	) -> Self {
		Self::with_capacity(label, url, backend, bulk, meta, *POOL_CAPACITY)
	}

	/// Build an environment with an explicit logical capacity.
	pub fn with_capacity(
		label: impl Into<String>,
		url: &str,
		backend: Arc<dyn QueryBackend>,
		bulk: Arc<dyn BulkWriter>,
		meta: Arc<dyn MetadataProvider>,
		capacity: usize,
	) -> Self {
		let capacity = capacity.max(1);
		Environment {
			label: label.into(),
			key: normalize_environment_key(url),
			production: false,
			backend,
			bulk,
			meta: Arc::new(MetadataCache::new(meta)),
			capacity,
			semaphore: Arc::new(Semaphore::new(capacity)),
		}
	}

	/// Mark the environment as production-protected.
	pub fn mark_production(mut self) -> Self {
		self.production = true;
		self
	}

	/// The logical capacity of this environment's connection pool.
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Borrow one unit of connection capacity. Held across a single page or
	/// bulk batch, never across the caller's row-iteration boundary.
	pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
		self.semaphore
			.clone()
			.acquire_owned()
			.await
			.map_err(|_| Error::Unreachable("environment semaphore closed"))
	}
}

/// The process-wide pool of environments, keyed by profile label.
#[derive(Default)]
pub struct Pool {
	environments: DashMap<String, Arc<Environment>>,
	default_label: std::sync::RwLock<Option<String>>,
}

impl Pool {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register an environment. The first registered environment becomes
	/// the default.
	pub fn register(&self, environment: Environment) -> Arc<Environment> {
		let label = environment.label.to_lowercase();
		let environment = Arc::new(environment);
		self.environments.insert(label.clone(), environment.clone());
		let mut default = self.default_label.write().expect("pool lock poisoned");
		if default.is_none() {
			*default = Some(label);
		}
		environment
	}

	/// The environment a profile label resolves to.
	pub fn get(&self, label: &str) -> Result<Arc<Environment>> {
		self.environments.get(&label.to_lowercase()).map(|e| e.clone()).ok_or_else(|| {
			Error::EnvironmentNotFound {
				label: label.to_owned(),
			}
		})
	}

	/// The default environment for unqualified table names.
	pub fn default_environment(&self) -> Result<Arc<Environment>> {
		let default = self.default_label.read().expect("pool lock poisoned");
		match default.as_deref() {
			Some(label) => self.get(label),
			None => Err(Error::EnvironmentNotFound {
				label: "(default)".to_owned(),
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keys_normalize_to_lowercase_with_trailing_slash() {
		assert_eq!(
			normalize_environment_key("https://Contoso.crm.dynamics.com"),
			"https://contoso.crm.dynamics.com/"
		);
		assert_eq!(
			normalize_environment_key("https://contoso.crm.dynamics.com/"),
			"https://contoso.crm.dynamics.com/"
		);
	}
}
