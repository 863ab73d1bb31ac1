//! An in-memory backend interpreting enough FetchXML to drive the engine's
//! test suite: attributes, filters, link entities, orders, aggregates with
//! date grouping, paging with the 5000-row page clamp, and the 50,000-row
//! aggregate ceiling. Every FetchXML document it receives is recorded so
//! tests can make golden assertions about what the planner emitted.

use crate::backend::{BulkOptions, BulkWriter, FetchPage, QueryBackend, TdsResult, WriteOutcome};
use crate::cnf::AGGREGATE_RECORD_LIMIT;
use crate::err::{Error, Result};
use crate::exp::cond::like_regex;
use crate::plan::fetchxml::{
	parse_paging, FetchAttribute, FetchCondition, FetchFilter, FetchLink, FetchXml,
};
use crate::sql::{Row, Value};
use async_trait::async_trait;
use chrono::Datelike;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// The in-memory record store and FetchXML interpreter.
#[derive(Default)]
pub struct MemBackend {
	tables: DashMap<String, Vec<Row>>,
	issued: Mutex<Vec<String>>,
	tds: DashMap<String, TdsResult>,
	aggregate_limit: Option<u64>,
	fail_count_rpc: AtomicBool,
	page_delay: Option<Duration>,
	writes: Mutex<Vec<WriteCall>>,
}

/// One recorded bulk write call.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct WriteCall {
	pub kind: WriteKind,
	pub entity: String,
	pub records: Vec<Row>,
	pub ids: Vec<Uuid>,
	pub batch_size: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteKind {
	Create,
	Update,
	Delete,
}

impl MemBackend {
	pub fn new() -> Self {
		MemBackend {
			aggregate_limit: Some(AGGREGATE_RECORD_LIMIT),
			..Default::default()
		}
	}

	/// Override the aggregate record ceiling, or disable it with `None`.
	pub fn with_aggregate_limit(mut self, limit: Option<u64>) -> Self {
		self.aggregate_limit = limit;
		self
	}

	/// Sleep this long before serving each page, so tests can cancel
	/// between pages.
	pub fn with_page_delay(mut self, delay: Duration) -> Self {
		self.page_delay = Some(delay);
		self
	}

	/// Make the fast record-count RPC fail, forcing the aggregate
	/// fallback.
	pub fn fail_total_record_count(&self, fail: bool) {
		self.fail_count_rpc.store(fail, AtomicOrdering::SeqCst);
	}

	/// Load rows into an entity table.
	pub fn insert_rows(&self, entity: &str, rows: Vec<Row>) {
		self.tables.entry(entity.to_lowercase()).or_default().extend(rows);
	}

	/// Preload the result a TDS statement should return.
	pub fn set_tds_result(&self, sql: &str, result: TdsResult) {
		self.tds.insert(sql.trim().to_owned(), result);
	}

	/// Every FetchXML document issued against this backend, in order.
	pub fn issued_fetch_xml(&self) -> Vec<String> {
		self.issued.lock().expect("issued lock poisoned").clone()
	}

	/// Every bulk write issued against this backend, in order.
	pub fn writes(&self) -> Vec<WriteCall> {
		self.writes.lock().expect("writes lock poisoned").clone()
	}

	/// The current contents of an entity table.
	pub fn rows_of(&self, entity: &str) -> Vec<Row> {
		self.tables.get(&entity.to_lowercase()).map(|r| r.clone()).unwrap_or_default()
	}

	fn matching_rows(&self, fetch: &FetchXml) -> Result<Vec<Row>> {
		let mut rows = self.rows_of(&fetch.entity.name);
		for link in &fetch.entity.links {
			rows = self.apply_link(rows, link)?;
		}
		if let Some(ref filter) = fetch.entity.filter {
			let mut kept = Vec::with_capacity(rows.len());
			for row in rows {
				if eval_filter(filter, &row)? {
					kept.push(row);
				}
			}
			rows = kept;
		}
		Ok(rows)
	}

	fn apply_link(&self, rows: Vec<Row>, link: &FetchLink) -> Result<Vec<Row>> {
		let mut linked = self.rows_of(&link.name);
		for nested in &link.links {
			linked = self.apply_link(linked, nested)?;
		}
		if let Some(ref filter) = link.filter {
			let mut kept = Vec::with_capacity(linked.len());
			for row in linked {
				if eval_filter(filter, &row)? {
					kept.push(row);
				}
			}
			linked = kept;
		}
		let alias = link.alias.clone().unwrap_or_else(|| link.name.clone());
		let mut out = Vec::new();
		for base in rows {
			let key = base.get(&link.to).cloned().unwrap_or(Value::Null);
			let matches: Vec<&Row> = linked
				.iter()
				.filter(|l| {
					let lk = l.get(&link.from).cloned().unwrap_or(Value::Null);
					!key.is_null() && lk.compare(&key).ok().flatten() == Some(Ordering::Equal)
				})
				.collect();
			match link.link_type.as_str() {
				"in" | "exists" => {
					// Semi-join: keep the base row once when any match
					// exists.
					if !matches.is_empty() {
						out.push(base);
					}
				}
				"outer" => {
					if matches.is_empty() {
						out.push(base);
					} else {
						for m in matches {
							out.push(merge_linked(&base, m, &alias, &link.attributes));
						}
					}
				}
				_ => {
					for m in matches {
						out.push(merge_linked(&base, m, &alias, &link.attributes));
					}
				}
			}
		}
		Ok(out)
	}
}

fn merge_linked(base: &Row, linked: &Row, alias: &str, attributes: &[FetchAttribute]) -> Row {
	let mut out = base.clone();
	if attributes.is_empty() {
		for (name, value) in linked.iter() {
			out.set(format!("{alias}.{name}"), value.clone());
		}
	} else {
		for attribute in attributes {
			let value = linked.get(&attribute.name).cloned().unwrap_or(Value::Null);
			let name = attribute
				.alias
				.clone()
				.unwrap_or_else(|| format!("{alias}.{}", attribute.name));
			out.set(name, value);
		}
	}
	out
}

/// Coerce a FetchXML condition value to the kind of the stored value so the
/// comparison is typed rather than textual.
fn coerce(actual: &Value, raw: &str) -> Value {
	match actual {
		Value::Int(_) | Value::BigInt(_) | Value::OptionSet(_) => {
			raw.parse::<i64>().map(Value::BigInt).unwrap_or_else(|_| Value::Strand(raw.into()))
		}
		Value::Decimal(_) => raw
			.parse::<rust_decimal::Decimal>()
			.map(Value::Decimal)
			.unwrap_or_else(|_| Value::Strand(raw.into())),
		Value::Float(_) => {
			raw.parse::<f64>().map(Value::Float).unwrap_or_else(|_| Value::Strand(raw.into()))
		}
		Value::DateTime(_) => crate::exp::cast::parse_datetime(raw)
			.map(Value::DateTime)
			.unwrap_or_else(|| Value::Strand(raw.into())),
		Value::Guid(_) | Value::Lookup(_) => {
			Uuid::parse_str(raw).map(Value::Guid).unwrap_or_else(|_| Value::Strand(raw.into()))
		}
		Value::Bool(_) => match raw {
			"1" | "true" => Value::Bool(true),
			_ => Value::Bool(false),
		},
		_ => Value::Strand(raw.into()),
	}
}

fn eval_filter(filter: &FetchFilter, row: &Row) -> Result<bool> {
	let conjunctive = filter.kind != "or";
	let mut any = false;
	for condition in &filter.conditions {
		let hit = eval_condition(condition, row)?;
		if conjunctive && !hit {
			return Ok(false);
		}
		any |= hit;
	}
	for nested in &filter.filters {
		let hit = eval_filter(nested, row)?;
		if conjunctive && !hit {
			return Ok(false);
		}
		any |= hit;
	}
	if conjunctive {
		Ok(true)
	} else {
		Ok(any)
	}
}

fn eval_condition(condition: &FetchCondition, row: &Row) -> Result<bool> {
	let actual = row.get(&condition.attribute).cloned().unwrap_or(Value::Null);
	match condition.operator.as_str() {
		"null" => return Ok(actual.is_null()),
		"not-null" => return Ok(!actual.is_null()),
		_ => {}
	}
	if actual.is_null() {
		return Ok(false);
	}
	let raw = condition.value.as_deref().unwrap_or_default();
	let ordering = || -> Result<Option<Ordering>> { actual.compare(&coerce(&actual, raw)) };
	let result = match condition.operator.as_str() {
		"eq" => ordering()? == Some(Ordering::Equal),
		"ne" | "neq" => matches!(ordering()?, Some(o) if o != Ordering::Equal),
		"lt" => ordering()? == Some(Ordering::Less),
		"le" | "on-or-before" => {
			matches!(ordering()?, Some(o) if o != Ordering::Greater)
		}
		"gt" => ordering()? == Some(Ordering::Greater),
		"ge" | "on-or-after" => matches!(ordering()?, Some(o) if o != Ordering::Less),
		"like" => like_regex(raw)?.is_match(&actual.as_string()),
		"not-like" => !like_regex(raw)?.is_match(&actual.as_string()),
		"in" => {
			let mut hit = false;
			for v in &condition.values {
				if actual.compare(&coerce(&actual, v))? == Some(Ordering::Equal) {
					hit = true;
					break;
				}
			}
			hit
		}
		other => {
			return Err(Error::Remote {
				message: format!("the mock backend does not implement operator '{other}'"),
			});
		}
	};
	Ok(result)
}

fn project(fetch: &FetchXml, row: &Row) -> Row {
	if fetch.entity.all_attributes || fetch.entity.attributes.is_empty() {
		return row.clone();
	}
	let mut out = Row::for_entity(&fetch.entity.name);
	for attribute in &fetch.entity.attributes {
		let value = row.get(&attribute.name).cloned().unwrap_or(Value::Null);
		out.set(attribute.output_name(), value);
	}
	// Columns contributed by link-entity attributes carry their alias
	// already.
	for (name, value) in row.iter() {
		if name.contains('.') {
			out.set(name, value.clone());
		}
	}
	out
}

fn date_group(value: &Value, grouping: &str) -> Value {
	let Value::DateTime(d) = value else {
		return Value::Null;
	};
	match grouping {
		"year" => Value::Int(d.year()),
		"quarter" => Value::Int(((d.month() - 1) / 3 + 1) as i32),
		"month" => Value::Int(d.month() as i32),
		"week" => Value::Int(d.iso_week().week() as i32),
		"day" => Value::Int(d.day() as i32),
		_ => Value::Null,
	}
}

fn aggregate_rows(fetch: &FetchXml, rows: &[Row]) -> Result<Vec<Row>> {
	let mut groups: Vec<(String, Vec<&Row>)> = Vec::new();
	let mut index: HashMap<String, usize> = HashMap::new();
	for row in rows {
		let mut key = String::new();
		for attribute in &fetch.entity.attributes {
			if attribute.groupby {
				let value = row.get(&attribute.name).cloned().unwrap_or(Value::Null);
				let value = match &attribute.dategrouping {
					Some(g) => date_group(&value, g),
					None => value,
				};
				key.push_str(&value.canonical_key(true));
				key.push('\u{1}');
			}
		}
		match index.get(&key) {
			Some(&i) => groups[i].1.push(row),
			None => {
				index.insert(key.clone(), groups.len());
				groups.push((key, vec![row]));
			}
		}
	}
	let mut out = Vec::with_capacity(groups.len());
	for (_, members) in groups {
		let mut result = Row::for_entity(&fetch.entity.name);
		for attribute in &fetch.entity.attributes {
			let output = attribute.output_name();
			if attribute.groupby {
				let value = members[0].get(&attribute.name).cloned().unwrap_or(Value::Null);
				let value = match &attribute.dategrouping {
					Some(g) => date_group(&value, g),
					None => value,
				};
				result.set(output, value);
				continue;
			}
			let Some(ref aggregate) = attribute.aggregate else {
				continue;
			};
			let values: Vec<Value> = members
				.iter()
				.filter_map(|r| r.get(&attribute.name).cloned())
				.filter(|v| !v.is_null())
				.collect();
			let value = match aggregate.as_str() {
				"count" => Value::BigInt(members.len() as i64),
				"countcolumn" => Value::BigInt(values.len() as i64),
				"sum" => {
					let mut total = Value::Null;
					for v in &values {
						total = if total.is_null() {
							v.clone()
						} else {
							total.try_add(v)?
						};
					}
					total
				}
				"avg" => {
					if values.is_empty() {
						Value::Null
					} else {
						let mut total = 0f64;
						for v in &values {
							total += v.as_f64()?;
						}
						Value::Float(total / values.len() as f64)
					}
				}
				"min" => fold_extremum(&values, Ordering::Less)?,
				"max" => fold_extremum(&values, Ordering::Greater)?,
				other => {
					return Err(Error::Remote {
						message: format!("unsupported aggregate '{other}'"),
					});
				}
			};
			result.set(output, value);
		}
		out.push(result);
	}
	Ok(out)
}

fn fold_extremum(values: &[Value], keep: Ordering) -> Result<Value> {
	let mut best = Value::Null;
	for v in values {
		if best.is_null() || v.compare(&best)? == Some(keep) {
			best = v.clone();
		}
	}
	Ok(best)
}

#[async_trait]
impl QueryBackend for MemBackend {
	async fn execute_fetch_xml(
		&self,
		fetch_xml: &str,
		page: Option<u32>,
		_cookie: Option<&str>,
	) -> Result<FetchPage> {
		self.issued.lock().expect("issued lock poisoned").push(fetch_xml.to_owned());
		if let Some(delay) = self.page_delay {
			tokio::time::sleep(delay).await;
		}
		let fetch = FetchXml::parse(fetch_xml)?;
		let page = match page {
			Some(p) => Some(p),
			None => parse_paging(fetch_xml)?.page,
		};
		let rows = self.matching_rows(&fetch)?;
		if fetch.aggregate {
			if let Some(limit) = self.aggregate_limit {
				if rows.len() as u64 > limit {
					return Err(Error::Remote {
						message: "AggregateQueryRecordLimit exceeded. Cannot perform this \
						          operation."
							.to_owned(),
					});
				}
			}
			let rows = aggregate_rows(&fetch, &rows)?;
			return Ok(FetchPage {
				rows,
				cookie: None,
				more: false,
			});
		}
		let mut rows = rows;
		if !fetch.entity.orders.is_empty() {
			sort_rows(&mut rows, &fetch);
		}
		let projected: Vec<Row> = rows.iter().map(|r| project(&fetch, r)).collect();
		let size = fetch.page_size() as usize;
		let page = page.unwrap_or(1).max(1) as usize;
		let start = (page - 1) * size;
		let end = (start + size).min(projected.len());
		let slice = if start >= projected.len() {
			Vec::new()
		} else {
			projected[start..end].to_vec()
		};
		let more = end < projected.len();
		Ok(FetchPage {
			rows: slice,
			cookie: more.then(|| format!("<cookie page=\"{page}\"/>")),
			more,
		})
	}

	async fn total_record_count(&self, entity: &str) -> Result<i64> {
		if self.fail_count_rpc.load(AtomicOrdering::SeqCst) {
			return Err(Error::Remote {
				message: "RetrieveTotalRecordCount is not available".to_owned(),
			});
		}
		Ok(self.rows_of(entity).len() as i64)
	}

	async fn execute_tds(&self, sql: &str) -> Result<TdsResult> {
		self.tds.get(sql.trim()).map(|r| r.clone()).ok_or_else(|| Error::Remote {
			message: "no TDS result configured for this statement".to_owned(),
		})
	}
}

fn sort_rows(rows: &mut [Row], fetch: &FetchXml) {
	rows.sort_by(|a, b| {
		for order in &fetch.entity.orders {
			let name = order.alias.as_deref().or(order.attribute.as_deref()).unwrap_or_default();
			let left = a.get(name).cloned().unwrap_or(Value::Null);
			let right = b.get(name).cloned().unwrap_or(Value::Null);
			// NULLs sort first, then by value.
			let ordering = match (left.is_null(), right.is_null()) {
				(true, true) => Ordering::Equal,
				(true, false) => Ordering::Less,
				(false, true) => Ordering::Greater,
				(false, false) => left.compare(&right).ok().flatten().unwrap_or(Ordering::Equal),
			};
			let ordering = if order.descending {
				ordering.reverse()
			} else {
				ordering
			};
			if ordering != Ordering::Equal {
				return ordering;
			}
		}
		Ordering::Equal
	});
}

#[async_trait]
impl BulkWriter for MemBackend {
	async fn create_multiple(
		&self,
		entity: &str,
		records: Vec<Row>,
		options: &BulkOptions,
	) -> Result<Vec<WriteOutcome>> {
		let mut outcomes = Vec::with_capacity(records.len());
		let mut stored = Vec::with_capacity(records.len());
		for record in &records {
			let id = Uuid::new_v4();
			let mut row = record.clone();
			row.set(format!("{entity}id"), Value::Guid(id));
			stored.push(row);
			outcomes.push(WriteOutcome::ok(id));
		}
		self.insert_rows(entity, stored);
		self.writes.lock().expect("writes lock poisoned").push(WriteCall {
			kind: WriteKind::Create,
			entity: entity.to_owned(),
			records,
			ids: Vec::new(),
			batch_size: options.batch_size,
		});
		Ok(outcomes)
	}

	async fn update_multiple(
		&self,
		entity: &str,
		records: Vec<Row>,
		options: &BulkOptions,
	) -> Result<Vec<WriteOutcome>> {
		let id_column = format!("{entity}id");
		let mut outcomes = Vec::with_capacity(records.len());
		if let Some(mut table) = self.tables.get_mut(&entity.to_lowercase()) {
			for record in &records {
				let Some(Value::Guid(id)) = record.get(&id_column).cloned() else {
					outcomes.push(WriteOutcome {
						id: None,
						error: Some("record is missing its primary id".to_owned()),
					});
					continue;
				};
				for row in table.iter_mut() {
					if row.get(&id_column) == Some(&Value::Guid(id)) {
						*row = row.merged(record);
					}
				}
				outcomes.push(WriteOutcome::ok(id));
			}
		}
		self.writes.lock().expect("writes lock poisoned").push(WriteCall {
			kind: WriteKind::Update,
			entity: entity.to_owned(),
			records,
			ids: Vec::new(),
			batch_size: options.batch_size,
		});
		Ok(outcomes)
	}

	async fn delete_multiple(
		&self,
		entity: &str,
		ids: Vec<Uuid>,
		options: &BulkOptions,
	) -> Result<Vec<WriteOutcome>> {
		let id_column = format!("{entity}id");
		if let Some(mut table) = self.tables.get_mut(&entity.to_lowercase()) {
			table.retain(|row| match row.get(&id_column) {
				Some(Value::Guid(id)) => !ids.contains(id),
				_ => true,
			});
		}
		let outcomes = ids.iter().map(|id| WriteOutcome::ok(*id)).collect();
		self.writes.lock().expect("writes lock poisoned").push(WriteCall {
			kind: WriteKind::Delete,
			entity: entity.to_owned(),
			records: Vec::new(),
			ids,
			batch_size: options.batch_size,
		});
		Ok(outcomes)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn account(name: &str, revenue: i64) -> Row {
		let mut row = Row::for_entity("account");
		row.set("accountid", Value::Guid(Uuid::new_v4()));
		row.set("name", Value::from(name));
		row.set("revenue", Value::BigInt(revenue));
		row
	}

	#[tokio::test]
	async fn filtering_and_paging() {
		let backend = MemBackend::new();
		backend.insert_rows("account", (0..12).map(|i| account(&format!("a{i}"), i)).collect());
		let mut fetch = FetchXml::for_entity("account");
		fetch.count = Some(5);
		fetch.entity.attributes.push(FetchAttribute::named("name"));
		let mut filter = FetchFilter::and();
		filter.conditions.push(FetchCondition::new("revenue", "ge", Some("2".into())));
		fetch.entity.filter = Some(filter);

		let xml = fetch.render(Some(1), None).unwrap();
		let page1 = backend.execute_fetch_xml(&xml, Some(1), None).await.unwrap();
		assert_eq!(page1.rows.len(), 5);
		assert!(page1.more);
		let page2 = backend
			.execute_fetch_xml(&xml, Some(2), page1.cookie.as_deref())
			.await
			.unwrap();
		assert_eq!(page2.rows.len(), 5);
		assert!(!page2.more);
	}

	#[tokio::test]
	async fn aggregate_ceiling_trips() {
		let backend = MemBackend::new().with_aggregate_limit(Some(10));
		backend.insert_rows("account", (0..11).map(|i| account(&format!("a{i}"), i)).collect());
		let mut fetch = FetchXml::for_entity("account");
		fetch.aggregate = true;
		fetch.entity.attributes.push(FetchAttribute {
			name: "accountid".into(),
			alias: Some("cnt".into()),
			aggregate: Some("count".into()),
			..Default::default()
		});
		let xml = fetch.render(None, None).unwrap();
		let err = backend.execute_fetch_xml(&xml, None, None).await.unwrap_err();
		assert!(err.is_aggregate_limit());
	}

	#[tokio::test]
	async fn grouped_aggregates_compute() {
		let backend = MemBackend::new();
		let mut rows = Vec::new();
		for (owner, revenue) in [("a", 10), ("a", 20), ("b", 5)] {
			let mut row = account(owner, revenue);
			row.set("ownerid", Value::from(owner));
			rows.push(row);
		}
		backend.insert_rows("account", rows);
		let mut fetch = FetchXml::for_entity("account");
		fetch.aggregate = true;
		fetch.entity.attributes.push(FetchAttribute {
			name: "ownerid".into(),
			alias: Some("owner".into()),
			groupby: true,
			..Default::default()
		});
		fetch.entity.attributes.push(FetchAttribute {
			name: "revenue".into(),
			alias: Some("total".into()),
			aggregate: Some("sum".into()),
			..Default::default()
		});
		let xml = fetch.render(None, None).unwrap();
		let page = backend.execute_fetch_xml(&xml, None, None).await.unwrap();
		assert_eq!(page.rows.len(), 2);
		let a = page.rows.iter().find(|r| r.get("owner") == Some(&Value::from("a"))).unwrap();
		assert_eq!(a.get("total"), Some(&Value::BigInt(30)));
	}

	#[tokio::test]
	async fn inner_link_entity_joins() {
		let backend = MemBackend::new();
		let a1 = account("Contoso", 10);
		let id = a1.get("accountid").cloned().unwrap();
		backend.insert_rows("account", vec![a1, account("Fabrikam", 20)]);
		let mut contact = Row::for_entity("contact");
		contact.set("contactid", Value::Guid(Uuid::new_v4()));
		contact.set("fullname", Value::from("Sue Smith"));
		contact.set("parentcustomerid", id);
		backend.insert_rows("contact", vec![contact]);

		let mut fetch = FetchXml::for_entity("account");
		fetch.entity.attributes.push(FetchAttribute::named("name"));
		fetch.entity.links.push(FetchLink {
			name: "contact".into(),
			from: "parentcustomerid".into(),
			to: "accountid".into(),
			alias: Some("c".into()),
			link_type: "inner".into(),
			attributes: vec![FetchAttribute::named("fullname")],
			filter: None,
			links: Vec::new(),
		});
		let xml = fetch.render(None, None).unwrap();
		let page = backend.execute_fetch_xml(&xml, None, None).await.unwrap();
		assert_eq!(page.rows.len(), 1);
		assert_eq!(page.rows[0].get("c.fullname"), Some(&Value::from("Sue Smith")));
	}
}
