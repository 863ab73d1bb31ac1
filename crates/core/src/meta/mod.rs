//! Entity metadata: the model, the provider interface, and the process-wide
//! two-tier cache in front of it.

mod cache;
pub mod tables;

pub use cache::MetadataCache;

use crate::err::Result;
use crate::sql::Kind;
use async_trait::async_trait;
use std::sync::Arc;

/// One attribute of an entity.
#[derive(Clone, Debug)]
pub struct AttributeMetadata {
	pub logical_name: String,
	pub display_name: String,
	pub kind: Kind,
	pub nullable: bool,
	/// Target entities, for lookup attributes.
	pub targets: Vec<String>,
	/// Value/label pairs, for option-set attributes.
	pub options: Vec<(i32, String)>,
}

impl AttributeMetadata {
	pub fn new(logical_name: impl Into<String>, kind: Kind) -> Self {
		let logical_name = logical_name.into();
		AttributeMetadata {
			display_name: logical_name.clone(),
			logical_name,
			kind,
			nullable: true,
			targets: Vec::new(),
			options: Vec::new(),
		}
	}
}

/// One relationship between two entities.
#[derive(Clone, Debug)]
pub struct RelationshipMetadata {
	pub schema_name: String,
	pub referencing_entity: String,
	pub referencing_attribute: String,
	pub referenced_entity: String,
	pub referenced_attribute: String,
}

/// The definition of one entity.
#[derive(Clone, Debug, Default)]
pub struct EntityMetadata {
	pub logical_name: String,
	pub display_name: String,
	pub primary_id_attribute: String,
	pub primary_name_attribute: String,
	pub attributes: Vec<AttributeMetadata>,
	pub relationships: Vec<RelationshipMetadata>,
}

impl EntityMetadata {
	/// Look up an attribute by case-insensitive logical name.
	pub fn attribute(&self, name: &str) -> Option<&AttributeMetadata> {
		self.attributes.iter().find(|a| a.logical_name.eq_ignore_ascii_case(name))
	}

	/// The date column partitioned aggregates split on when the WHERE
	/// clause offers no candidate: the created-on attribute when present,
	/// otherwise the first datetime attribute.
	pub fn partition_date_attribute(&self) -> Option<&str> {
		if let Some(a) = self.attribute("createdon") {
			return Some(&a.logical_name);
		}
		self.attributes
			.iter()
			.find(|a| a.kind == Kind::DateTime)
			.map(|a| a.logical_name.as_str())
	}
}

/// The source of entity definitions: the backend's metadata endpoints, or a
/// fixture in tests. Consumed through [`MetadataCache`].
#[async_trait]
pub trait MetadataProvider: Send + Sync {
	/// The logical names of every entity in the environment.
	async fn entity_names(&self) -> Result<Vec<String>>;

	/// The full definition of one entity.
	async fn entity(&self, logical_name: &str) -> Result<Arc<EntityMetadata>>;
}
