//! Shared test fixture: an in-memory backend with a small business schema
//! and a query service wired to it.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fetchql_core::backend::mem::MemBackend;
use fetchql_core::backend::{Environment, Pool};
use fetchql_core::dbs::QueryService;
use fetchql_core::err::Result;
use fetchql_core::meta::{AttributeMetadata, EntityMetadata, MetadataProvider};
use fetchql_core::sql::{Kind, Lookup, Row, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub struct FixtureMeta {
	entities: HashMap<String, Arc<EntityMetadata>>,
}

impl FixtureMeta {
	fn new() -> Self {
		let mut entities = HashMap::new();
		for entity in [
			entity(
				"account",
				"accountid",
				"name",
				vec![
					attr("accountid", Kind::Guid),
					attr("name", Kind::String),
					attr("revenue", Kind::BigInt),
					lookup_attr("ownerid", "systemuser"),
					attr("createdon", Kind::DateTime),
				],
			),
			entity(
				"contact",
				"contactid",
				"fullname",
				vec![
					attr("contactid", Kind::Guid),
					attr("fullname", Kind::String),
					lookup_attr("parentcustomerid", "account"),
				],
			),
			entity(
				"product",
				"productid",
				"name",
				vec![
					attr("productid", Kind::Guid),
					attr("name", Kind::String),
					attr("revenue", Kind::BigInt),
					attr("qty", Kind::Int),
				],
			),
			entity(
				"salesorder",
				"salesorderid",
				"name",
				vec![
					attr("salesorderid", Kind::Guid),
					attr("name", Kind::String),
					attr("revenue", Kind::BigInt),
					attr("createdon", Kind::DateTime),
				],
			),
			entity(
				"source",
				"sourceid",
				"col_b",
				vec![attr("sourceid", Kind::Guid), attr("col_b", Kind::Int)],
			),
			entity(
				"target",
				"targetid",
				"col_a",
				vec![attr("targetid", Kind::Guid), attr("col_a", Kind::Int)],
			),
			entity(
				"systemuser",
				"systemuserid",
				"fullname",
				vec![attr("systemuserid", Kind::Guid), attr("fullname", Kind::String)],
			),
		] {
			entities.insert(entity.logical_name.clone(), Arc::new(entity));
		}
		FixtureMeta {
			entities,
		}
	}
}

fn entity(
	name: &str,
	primary_id: &str,
	primary_name: &str,
	attributes: Vec<AttributeMetadata>,
) -> EntityMetadata {
	let mut meta = EntityMetadata::default();
	meta.logical_name = name.to_owned();
	meta.display_name = name.to_owned();
	meta.primary_id_attribute = primary_id.to_owned();
	meta.primary_name_attribute = primary_name.to_owned();
	meta.attributes = attributes;
	meta
}

fn attr(name: &str, kind: Kind) -> AttributeMetadata {
	AttributeMetadata::new(name, kind)
}

fn lookup_attr(name: &str, target: &str) -> AttributeMetadata {
	let mut meta = AttributeMetadata::new(name, Kind::Lookup);
	meta.targets = vec![target.to_owned()];
	meta
}

#[async_trait]
impl MetadataProvider for FixtureMeta {
	async fn entity_names(&self) -> Result<Vec<String>> {
		let mut names: Vec<String> = self.entities.keys().cloned().collect();
		names.sort();
		Ok(names)
	}

	async fn entity(&self, logical_name: &str) -> Result<Arc<EntityMetadata>> {
		self.entities.get(&logical_name.to_lowercase()).cloned().ok_or_else(|| {
			fetchql_core::err::Error::EntityNotFound {
				name: logical_name.to_owned(),
			}
		})
	}
}

pub struct Fixture {
	pub backend: Arc<MemBackend>,
	pub pool: Arc<Pool>,
	pub service: QueryService,
}

pub fn fixture() -> Fixture {
	fixture_with(MemBackend::new(), 4)
}

pub fn fixture_with(backend: MemBackend, capacity: usize) -> Fixture {
	let backend = Arc::new(backend);
	let pool = Arc::new(Pool::new());
	pool.register(Environment::with_capacity(
		"dev",
		"https://dev.crm.dynamics.com",
		backend.clone(),
		backend.clone(),
		Arc::new(FixtureMeta::new()),
		capacity,
	));
	let service = QueryService::new(pool.clone());
	Fixture {
		backend,
		pool,
		service,
	}
}

pub fn owner(name: &str, id: Uuid) -> Value {
	Value::Lookup(Lookup {
		entity: "systemuser".to_owned(),
		id,
		name: Some(name.to_owned()),
	})
}

pub fn account(name: &str, revenue: Option<i64>) -> Row {
	let mut row = Row::for_entity("account");
	row.set("accountid", Value::Guid(Uuid::new_v4()));
	row.set("name", Value::from(name));
	row.set("revenue", revenue.map(Value::BigInt).unwrap_or(Value::Null));
	row
}

pub fn account_owned(name: &str, revenue: Option<i64>, owner_value: Value) -> Row {
	let mut row = account(name, revenue);
	row.set("ownerid", owner_value);
	row
}

pub fn product(name: Option<&str>, revenue: Option<i64>, qty: i32) -> Row {
	let mut row = Row::for_entity("product");
	row.set("productid", Value::Guid(Uuid::new_v4()));
	row.set("name", name.map(Value::from).unwrap_or(Value::Null));
	row.set("revenue", revenue.map(Value::BigInt).unwrap_or(Value::Null));
	row.set("qty", Value::Int(qty));
	row
}

pub fn salesorder(revenue: i64, created: DateTime<Utc>) -> Row {
	let mut row = Row::for_entity("salesorder");
	row.set("salesorderid", Value::Guid(Uuid::new_v4()));
	row.set("revenue", Value::BigInt(revenue));
	row.set("createdon", Value::DateTime(created));
	row
}

pub fn date(s: &str) -> DateTime<Utc> {
	s.parse().unwrap()
}
