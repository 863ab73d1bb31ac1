//! Synthetic metadata tables. `SELECT ... FROM metadata.entity` and friends
//! stream these rows instead of touching the backend's record store.

use crate::err::{Error, Result};
use crate::meta::MetadataCache;
use crate::sql::{Column, Kind, Row, Value};
use serde::{Deserialize, Serialize};

/// The synthetic tables the metadata schema exposes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MetadataTable {
	Entity,
	Attribute,
	OptionSet,
	Relationship,
}

impl MetadataTable {
	/// Resolve a metadata table by name.
	pub fn from_name(name: &str) -> Option<MetadataTable> {
		match name.to_lowercase().as_str() {
			"entity" => Some(MetadataTable::Entity),
			"attribute" => Some(MetadataTable::Attribute),
			"optionset" => Some(MetadataTable::OptionSet),
			"relationship" => Some(MetadataTable::Relationship),
			_ => None,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			MetadataTable::Entity => "entity",
			MetadataTable::Attribute => "attribute",
			MetadataTable::OptionSet => "optionset",
			MetadataTable::Relationship => "relationship",
		}
	}

	/// The column descriptors of this table.
	pub fn columns(&self) -> Vec<Column> {
		let names: &[&str] = match self {
			MetadataTable::Entity => {
				&["logicalname", "displayname", "primaryidattribute", "primarynameattribute"]
			}
			MetadataTable::Attribute => {
				&["entitylogicalname", "logicalname", "displayname", "attributetype", "nullable"]
			}
			MetadataTable::OptionSet => {
				&["entitylogicalname", "attributelogicalname", "value", "label"]
			}
			MetadataTable::Relationship => &[
				"schemaname",
				"referencingentity",
				"referencingattribute",
				"referencedentity",
				"referencedattribute",
			],
		};
		names
			.iter()
			.map(|n| {
				let kind = match *n {
					"value" => Kind::Int,
					"nullable" => Kind::Bool,
					_ => Kind::String,
				};
				Column::typed(*n, kind)
			})
			.collect()
	}
}

/// Materialize the rows of a metadata table from the cache.
pub async fn rows(table: MetadataTable, meta: &MetadataCache) -> Result<Vec<Row>> {
	let names = meta.entity_names().await?;
	let mut out = Vec::new();
	for name in names.iter() {
		let entity = match meta.entity(name).await {
			Ok(entity) => entity,
			Err(Error::EntityNotFound {
				..
			}) => continue,
			Err(e) => return Err(e),
		};
		match table {
			MetadataTable::Entity => {
				let mut row = Row::for_entity("entity");
				row.set("logicalname", Value::from(entity.logical_name.as_str()));
				row.set("displayname", Value::from(entity.display_name.as_str()));
				row.set("primaryidattribute", Value::from(entity.primary_id_attribute.as_str()));
				row.set(
					"primarynameattribute",
					Value::from(entity.primary_name_attribute.as_str()),
				);
				out.push(row);
			}
			MetadataTable::Attribute => {
				for attribute in &entity.attributes {
					let mut row = Row::for_entity("attribute");
					row.set("entitylogicalname", Value::from(entity.logical_name.as_str()));
					row.set("logicalname", Value::from(attribute.logical_name.as_str()));
					row.set("displayname", Value::from(attribute.display_name.as_str()));
					row.set("attributetype", Value::from(attribute.kind.to_string()));
					row.set("nullable", Value::Bool(attribute.nullable));
					out.push(row);
				}
			}
			MetadataTable::OptionSet => {
				for attribute in &entity.attributes {
					for (value, label) in &attribute.options {
						let mut row = Row::for_entity("optionset");
						row.set("entitylogicalname", Value::from(entity.logical_name.as_str()));
						row.set(
							"attributelogicalname",
							Value::from(attribute.logical_name.as_str()),
						);
						row.set("value", Value::Int(*value));
						row.set("label", Value::from(label.as_str()));
						out.push(row);
					}
				}
			}
			MetadataTable::Relationship => {
				for rel in &entity.relationships {
					let mut row = Row::for_entity("relationship");
					row.set("schemaname", Value::from(rel.schema_name.as_str()));
					row.set("referencingentity", Value::from(rel.referencing_entity.as_str()));
					row.set(
						"referencingattribute",
						Value::from(rel.referencing_attribute.as_str()),
					);
					row.set("referencedentity", Value::from(rel.referenced_entity.as_str()));
					row.set(
						"referencedattribute",
						Value::from(rel.referenced_attribute.as_str()),
					);
					out.push(row);
				}
			}
		}
	}
	Ok(out)
}
