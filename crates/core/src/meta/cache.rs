use crate::cnf::METADATA_TTL_SECS;
use crate::err::Result;
use crate::meta::{EntityMetadata, MetadataProvider};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// The process-wide, environment-scoped metadata cache.
///
/// Two tiers: the entity name list is cached for the lifetime of the
/// session, while per-entity attribute and relationship definitions carry a
/// TTL. A miss triggers a single coalesced load; concurrent callers for the
/// same key wait on a per-key mutex for that load instead of issuing their
/// own.
pub struct MetadataCache {
	inner: Arc<dyn MetadataProvider>,
	ttl: Duration,
	names: Mutex<Option<Arc<Vec<String>>>>,
	entities: DashMap<String, (Arc<EntityMetadata>, Instant)>,
	loads: DashMap<String, Arc<Mutex<()>>>,
}

impl MetadataCache {
	/// Wrap a provider with the default TTL.
	pub fn new(inner: Arc<dyn MetadataProvider>) -> Self {
		Self::with_ttl(inner, Duration::from_secs(*METADATA_TTL_SECS))
	}

	/// Wrap a provider with an explicit TTL.
	pub fn with_ttl(inner: Arc<dyn MetadataProvider>, ttl: Duration) -> Self {
		MetadataCache {
			inner,
			ttl,
			names: Mutex::new(None),
			entities: DashMap::new(),
			loads: DashMap::new(),
		}
	}

	/// The entity list, loaded once per session.
	pub async fn entity_names(&self) -> Result<Arc<Vec<String>>> {
		let mut guard = self.names.lock().await;
		if let Some(ref names) = *guard {
			return Ok(names.clone());
		}
		let names = Arc::new(self.inner.entity_names().await?);
		*guard = Some(names.clone());
		Ok(names)
	}

	/// One entity's definition, from cache when fresh.
	pub async fn entity(&self, logical_name: &str) -> Result<Arc<EntityMetadata>> {
		let key = logical_name.to_lowercase();
		if let Some(hit) = self.lookup(&key) {
			return Ok(hit);
		}
		// Coalesce concurrent loads for the same entity.
		let lock = self
			.loads
			.entry(key.clone())
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone();
		let _guard = lock.lock().await;
		if let Some(hit) = self.lookup(&key) {
			return Ok(hit);
		}
		let loaded = self.inner.entity(&key).await?;
		self.entities.insert(key, (loaded.clone(), Instant::now()));
		Ok(loaded)
	}

	fn lookup(&self, key: &str) -> Option<Arc<EntityMetadata>> {
		let entry = self.entities.get(key)?;
		let (value, loaded_at) = entry.value();
		if loaded_at.elapsed() < self.ttl {
			Some(value.clone())
		} else {
			None
		}
	}

	/// Whether an entity with this name exists in the environment.
	pub async fn entity_exists(&self, logical_name: &str) -> Result<bool> {
		let names = self.entity_names().await?;
		Ok(names.iter().any(|n| n.eq_ignore_ascii_case(logical_name)))
	}

	/// Drop one entity's cached definition.
	pub fn invalidate(&self, logical_name: &str) {
		self.entities.remove(&logical_name.to_lowercase());
	}

	/// Drop everything, including the entity list. Called when the profile
	/// or environment changes.
	pub async fn invalidate_all(&self) {
		self.entities.clear();
		self.loads.clear();
		*self.names.lock().await = None;
	}
}

#[async_trait]
impl MetadataProvider for MetadataCache {
	async fn entity_names(&self) -> Result<Vec<String>> {
		Ok(MetadataCache::entity_names(self).await?.as_ref().clone())
	}

	async fn entity(&self, logical_name: &str) -> Result<Arc<EntityMetadata>> {
		MetadataCache::entity(self, logical_name).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct CountingProvider {
		loads: AtomicUsize,
	}

	#[async_trait]
	impl MetadataProvider for CountingProvider {
		async fn entity_names(&self) -> Result<Vec<String>> {
			Ok(vec!["account".to_owned()])
		}

		async fn entity(&self, logical_name: &str) -> Result<Arc<EntityMetadata>> {
			self.loads.fetch_add(1, Ordering::SeqCst);
			let mut meta = EntityMetadata::default();
			meta.logical_name = logical_name.to_owned();
			Ok(Arc::new(meta))
		}
	}

	#[tokio::test]
	async fn concurrent_misses_coalesce_into_one_load() {
		let provider = Arc::new(CountingProvider {
			loads: AtomicUsize::new(0),
		});
		let cache = Arc::new(MetadataCache::with_ttl(provider.clone(), Duration::from_secs(60)));
		let mut handles = Vec::new();
		for _ in 0..8 {
			let cache = cache.clone();
			handles.push(tokio::spawn(async move { cache.entity("account").await }));
		}
		for handle in handles {
			handle.await.unwrap().unwrap();
		}
		assert_eq!(provider.loads.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn expired_entries_reload() {
		let provider = Arc::new(CountingProvider {
			loads: AtomicUsize::new(0),
		});
		let cache = MetadataCache::with_ttl(provider.clone(), Duration::from_millis(1));
		cache.entity("account").await.unwrap();
		tokio::time::sleep(Duration::from_millis(5)).await;
		cache.entity("account").await.unwrap();
		assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn invalidation_forces_a_reload() {
		let provider = Arc::new(CountingProvider {
			loads: AtomicUsize::new(0),
		});
		let cache = MetadataCache::with_ttl(provider.clone(), Duration::from_secs(60));
		cache.entity("account").await.unwrap();
		cache.entity("Account").await.unwrap();
		assert_eq!(provider.loads.load(Ordering::SeqCst), 1);
		cache.invalidate("account");
		cache.entity("account").await.unwrap();
		assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
	}
}
