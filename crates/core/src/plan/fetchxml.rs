//! The FetchXML document model: built by the planner during push-down,
//! rendered per page by the scan, and parsed back by the in-memory backend.

use crate::cnf::MAX_PAGE_SIZE;
use crate::err::{Error, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One projected attribute.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct FetchAttribute {
	pub name: String,
	pub alias: Option<String>,
	/// count, countcolumn, sum, avg, min, or max.
	pub aggregate: Option<String>,
	pub groupby: bool,
	/// year, quarter, month, week, or day.
	pub dategrouping: Option<String>,
}

impl FetchAttribute {
	pub fn named(name: impl Into<String>) -> Self {
		FetchAttribute {
			name: name.into(),
			..Default::default()
		}
	}

	/// The column name this attribute produces on result rows.
	pub fn output_name(&self) -> &str {
		self.alias.as_deref().unwrap_or(&self.name)
	}
}

/// A single filter condition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct FetchCondition {
	pub attribute: String,
	pub operator: String,
	pub value: Option<String>,
	/// For multi-valued operators such as `in`.
	pub values: Vec<String>,
}

impl FetchCondition {
	pub fn new(
		attribute: impl Into<String>,
		operator: impl Into<String>,
		value: Option<String>,
	) -> Self {
		FetchCondition {
			attribute: attribute.into(),
			operator: operator.into(),
			value,
			values: Vec::new(),
		}
	}
}

/// A boolean filter group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct FetchFilter {
	/// `and` or `or`.
	pub kind: String,
	pub conditions: Vec<FetchCondition>,
	pub filters: Vec<FetchFilter>,
}

impl FetchFilter {
	pub fn and() -> Self {
		FetchFilter {
			kind: "and".to_owned(),
			conditions: Vec::new(),
			filters: Vec::new(),
		}
	}

	pub fn or() -> Self {
		FetchFilter {
			kind: "or".to_owned(),
			conditions: Vec::new(),
			filters: Vec::new(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.conditions.is_empty() && self.filters.is_empty()
	}
}

/// A sort order element.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct FetchOrder {
	pub attribute: Option<String>,
	pub alias: Option<String>,
	pub descending: bool,
}

/// A joined entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct FetchLink {
	pub name: String,
	/// The attribute on the linked entity.
	pub from: String,
	/// The attribute on the parent entity.
	pub to: String,
	pub alias: Option<String>,
	/// inner, outer, in, or exists.
	pub link_type: String,
	pub attributes: Vec<FetchAttribute>,
	pub filter: Option<FetchFilter>,
	pub links: Vec<FetchLink>,
}

/// The queried entity with its attributes, filters, orders, and links.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct FetchEntity {
	pub name: String,
	pub all_attributes: bool,
	pub attributes: Vec<FetchAttribute>,
	pub filter: Option<FetchFilter>,
	pub orders: Vec<FetchOrder>,
	pub links: Vec<FetchLink>,
}

impl FetchEntity {
	pub fn named(name: impl Into<String>) -> Self {
		FetchEntity {
			name: name.into(),
			..Default::default()
		}
	}
}

/// A complete FetchXML document.
///
/// The page size lives in the fetch-level `count` attribute. A SQL `TOP` is
/// never rendered as a fetch-level `top`: the backend rejects `top`
/// together with a `page` attribute, so the planner converts `TOP n` into
/// `count = min(n, page limit)` and lets the scan stop at n rows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct FetchXml {
	pub count: Option<u32>,
	pub aggregate: bool,
	pub distinct: bool,
	pub no_lock: bool,
	pub entity: FetchEntity,
}

impl FetchXml {
	pub fn for_entity(entity: impl Into<String>) -> Self {
		FetchXml {
			entity: FetchEntity::named(entity),
			..Default::default()
		}
	}

	/// The effective page size: the requested count clamped to the
	/// backend's page maximum.
	pub fn page_size(&self) -> u32 {
		self.count.unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE)
	}

	/// Render the document, optionally with paging attributes.
	pub fn render(&self, page: Option<u32>, cookie: Option<&str>) -> Result<String> {
		let mut writer = Writer::new(Vec::new());
		let mut fetch = BytesStart::new("fetch");
		fetch.push_attribute(("version", "1.0"));
		if let Some(count) = self.count {
			fetch.push_attribute(("count", count.min(MAX_PAGE_SIZE).to_string().as_str()));
		}
		if let Some(page) = page {
			fetch.push_attribute(("page", page.to_string().as_str()));
		}
		if let Some(cookie) = cookie {
			fetch.push_attribute(("paging-cookie", cookie));
		}
		if self.aggregate {
			fetch.push_attribute(("aggregate", "true"));
		}
		if self.distinct {
			fetch.push_attribute(("distinct", "true"));
		}
		if self.no_lock {
			fetch.push_attribute(("no-lock", "true"));
		}
		write_event(&mut writer, Event::Start(fetch))?;
		self.write_entity(&mut writer)?;
		write_event(&mut writer, Event::End(BytesEnd::new("fetch")))?;
		String::from_utf8(writer.into_inner())
			.map_err(|_| Error::Unreachable("fetchxml rendered invalid utf-8"))
	}

	fn write_entity(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
		let mut entity = BytesStart::new("entity");
		entity.push_attribute(("name", self.entity.name.as_str()));
		write_event(writer, Event::Start(entity))?;
		if self.entity.all_attributes {
			write_event(writer, Event::Empty(BytesStart::new("all-attributes")))?;
		}
		for attribute in &self.entity.attributes {
			write_attribute(writer, attribute)?;
		}
		if let Some(ref filter) = self.entity.filter {
			write_filter(writer, filter)?;
		}
		for order in &self.entity.orders {
			write_order(writer, order)?;
		}
		for link in &self.entity.links {
			write_link(writer, link)?;
		}
		write_event(writer, Event::End(BytesEnd::new("entity")))
	}

	/// Parse a FetchXML document.
	pub fn parse(xml: &str) -> Result<FetchXml> {
		parse::parse(xml)
	}
}

impl fmt::Display for FetchXml {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self.render(None, None) {
			Ok(xml) => f.write_str(&xml),
			Err(_) => Err(fmt::Error),
		}
	}
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event) -> Result<()> {
	writer
		.write_event(event)
		.map_err(|_| Error::Unreachable("fetchxml serialization failed"))
}

fn write_attribute(writer: &mut Writer<Vec<u8>>, attribute: &FetchAttribute) -> Result<()> {
	let mut el = BytesStart::new("attribute");
	el.push_attribute(("name", attribute.name.as_str()));
	if let Some(ref alias) = attribute.alias {
		el.push_attribute(("alias", alias.as_str()));
	}
	if let Some(ref aggregate) = attribute.aggregate {
		el.push_attribute(("aggregate", aggregate.as_str()));
	}
	if attribute.groupby {
		el.push_attribute(("groupby", "true"));
	}
	if let Some(ref dategrouping) = attribute.dategrouping {
		el.push_attribute(("dategrouping", dategrouping.as_str()));
	}
	write_event(writer, Event::Empty(el))
}

fn write_filter(writer: &mut Writer<Vec<u8>>, filter: &FetchFilter) -> Result<()> {
	let mut el = BytesStart::new("filter");
	el.push_attribute(("type", filter.kind.as_str()));
	write_event(writer, Event::Start(el))?;
	for condition in &filter.conditions {
		let mut el = BytesStart::new("condition");
		el.push_attribute(("attribute", condition.attribute.as_str()));
		el.push_attribute(("operator", condition.operator.as_str()));
		if let Some(ref value) = condition.value {
			el.push_attribute(("value", value.as_str()));
		}
		if condition.values.is_empty() {
			write_event(writer, Event::Empty(el))?;
		} else {
			write_event(writer, Event::Start(el))?;
			for value in &condition.values {
				write_event(writer, Event::Start(BytesStart::new("value")))?;
				write_event(
					writer,
					Event::Text(BytesText::new(value)),
				)?;
				write_event(writer, Event::End(BytesEnd::new("value")))?;
			}
			write_event(writer, Event::End(BytesEnd::new("condition")))?;
		}
	}
	for nested in &filter.filters {
		write_filter(writer, nested)?;
	}
	write_event(writer, Event::End(BytesEnd::new("filter")))
}

fn write_order(writer: &mut Writer<Vec<u8>>, order: &FetchOrder) -> Result<()> {
	let mut el = BytesStart::new("order");
	if let Some(ref attribute) = order.attribute {
		el.push_attribute(("attribute", attribute.as_str()));
	}
	if let Some(ref alias) = order.alias {
		el.push_attribute(("alias", alias.as_str()));
	}
	if order.descending {
		el.push_attribute(("descending", "true"));
	}
	write_event(writer, Event::Empty(el))
}

fn write_link(writer: &mut Writer<Vec<u8>>, link: &FetchLink) -> Result<()> {
	let mut el = BytesStart::new("link-entity");
	el.push_attribute(("name", link.name.as_str()));
	el.push_attribute(("from", link.from.as_str()));
	el.push_attribute(("to", link.to.as_str()));
	if let Some(ref alias) = link.alias {
		el.push_attribute(("alias", alias.as_str()));
	}
	el.push_attribute(("link-type", link.link_type.as_str()));
	write_event(writer, Event::Start(el))?;
	for attribute in &link.attributes {
		write_attribute(writer, attribute)?;
	}
	if let Some(ref filter) = link.filter {
		write_filter(writer, filter)?;
	}
	for nested in &link.links {
		write_link(writer, nested)?;
	}
	write_event(writer, Event::End(BytesEnd::new("link-entity")))
}

mod parse {
	use super::*;
	use quick_xml::events::BytesStart;

	fn invalid(message: impl Into<String>) -> Error {
		Error::Remote {
			message: format!("invalid FetchXML: {}", message.into()),
		}
	}

	fn attr(el: &BytesStart, name: &str) -> Result<Option<String>> {
		match el.try_get_attribute(name) {
			Ok(Some(a)) => a
				.unescape_value()
				.map(|v| Some(v.into_owned()))
				.map_err(|e| invalid(e.to_string())),
			Ok(None) => Ok(None),
			Err(e) => Err(invalid(e.to_string())),
		}
	}

	fn flag(el: &BytesStart, name: &str) -> Result<bool> {
		Ok(attr(el, name)?.is_some_and(|v| v == "true" || v == "1"))
	}

	fn read_attribute(el: &BytesStart) -> Result<FetchAttribute> {
		Ok(FetchAttribute {
			name: attr(el, "name")?.ok_or_else(|| invalid("attribute without a name"))?,
			alias: attr(el, "alias")?,
			aggregate: attr(el, "aggregate")?,
			groupby: flag(el, "groupby")?,
			dategrouping: attr(el, "dategrouping")?,
		})
	}

	/// The paging attributes of a rendered document, read back by the
	/// in-memory backend.
	pub(crate) struct Paging {
		pub page: Option<u32>,
	}

	pub(crate) fn parse_paging(xml: &str) -> Result<Paging> {
		let mut reader = Reader::from_str(xml);
		loop {
			match reader.read_event().map_err(|e| invalid(e.to_string()))? {
				Event::Start(el) | Event::Empty(el) if el.name().as_ref() == b"fetch" => {
					let page =
						attr(&el, "page")?.map(|v| v.parse::<u32>()).transpose().map_err(|_| {
							invalid("page is not a number")
						})?;
					return Ok(Paging {
						page,
					});
				}
				Event::Eof => return Err(invalid("missing fetch element")),
				_ => {}
			}
		}
	}

	pub(super) fn parse(xml: &str) -> Result<FetchXml> {
		let mut reader = Reader::from_str(xml);
		let mut fetch = FetchXml::default();
		// Stacks tracking the open filter groups and link entities.
		let mut filters: Vec<FetchFilter> = Vec::new();
		let mut links: Vec<FetchLink> = Vec::new();
		let mut pending_condition: Option<FetchCondition> = None;
		let mut in_value = false;
		loop {
			let event = reader.read_event().map_err(|e| invalid(e.to_string()))?;
			match event {
				Event::Start(_) | Event::Empty(_) => {
					let (el, is_empty) = match event {
						Event::Start(el) => (el, false),
						Event::Empty(el) => (el, true),
						_ => unreachable!("outer match narrowed the event"),
					};
					match el.name().as_ref() {
						b"fetch" => {
							fetch.count = attr(&el, "count")?
								.map(|v| v.parse::<u32>())
								.transpose()
								.map_err(|_| invalid("count is not a number"))?;
							fetch.aggregate = flag(&el, "aggregate")?;
							fetch.distinct = flag(&el, "distinct")?;
							fetch.no_lock = flag(&el, "no-lock")?;
						}
						b"entity" => {
							fetch.entity.name = attr(&el, "name")?
								.ok_or_else(|| invalid("entity without a name"))?;
						}
						b"all-attributes" => {
							if links.is_empty() {
								fetch.entity.all_attributes = true;
							}
						}
						b"attribute" => {
							let attribute = read_attribute(&el)?;
							match links.last_mut() {
								Some(link) => link.attributes.push(attribute),
								None => fetch.entity.attributes.push(attribute),
							}
						}
						b"filter" => {
							let mut filter = FetchFilter::and();
							if let Some(kind) = attr(&el, "type")? {
								filter.kind = kind;
							}
							filters.push(filter);
							if is_empty {
								close_filter(&mut filters, &mut links, &mut fetch)?;
							}
						}
						b"condition" => {
							let mut condition = FetchCondition::new(
								attr(&el, "attribute")?
									.ok_or_else(|| invalid("condition without attribute"))?,
								attr(&el, "operator")?
									.ok_or_else(|| invalid("condition without operator"))?,
								attr(&el, "value")?,
							);
							if is_empty {
								push_condition(&mut filters, condition)?;
							} else {
								condition.values.clear();
								pending_condition = Some(condition);
							}
						}
						b"value" => {
							in_value = true;
						}
						b"order" => {
							fetch.entity.orders.push(FetchOrder {
								attribute: attr(&el, "attribute")?,
								alias: attr(&el, "alias")?,
								descending: flag(&el, "descending")?,
							});
						}
						b"link-entity" => {
							let link = FetchLink {
								name: attr(&el, "name")?
									.ok_or_else(|| invalid("link-entity without a name"))?,
								from: attr(&el, "from")?.unwrap_or_default(),
								to: attr(&el, "to")?.unwrap_or_default(),
								alias: attr(&el, "alias")?,
								link_type: attr(&el, "link-type")?
									.unwrap_or_else(|| "inner".to_owned()),
								attributes: Vec::new(),
								filter: None,
								links: Vec::new(),
							};
							links.push(link);
							if is_empty {
								close_link(&mut links, &mut fetch);
							}
						}
						_ => {}
					}
				}
				Event::Text(text) => {
					if in_value {
						if let Some(ref mut condition) = pending_condition {
							let v = text.unescape().map_err(|e| invalid(e.to_string()))?;
							condition.values.push(v.into_owned());
						}
					}
				}
				Event::End(el) => match el.name().as_ref() {
					b"filter" => close_filter(&mut filters, &mut links, &mut fetch)?,
					b"condition" => {
						if let Some(condition) = pending_condition.take() {
							push_condition(&mut filters, condition)?;
						}
					}
					b"value" => {
						in_value = false;
					}
					b"link-entity" => close_link(&mut links, &mut fetch),
					_ => {}
				},
				Event::Eof => break,
				_ => {}
			}
		}
		if fetch.entity.name.is_empty() {
			return Err(invalid("missing entity element"));
		}
		Ok(fetch)
	}

	fn push_condition(filters: &mut [FetchFilter], condition: FetchCondition) -> Result<()> {
		match filters.last_mut() {
			Some(filter) => {
				filter.conditions.push(condition);
				Ok(())
			}
			None => Err(invalid("condition outside of a filter")),
		}
	}

	fn close_filter(
		filters: &mut Vec<FetchFilter>,
		links: &mut [FetchLink],
		fetch: &mut FetchXml,
	) -> Result<()> {
		let Some(done) = filters.pop() else {
			return Err(invalid("mismatched filter nesting"));
		};
		if let Some(parent) = filters.last_mut() {
			parent.filters.push(done);
		} else if let Some(link) = links.last_mut() {
			link.filter = Some(done);
		} else {
			fetch.entity.filter = Some(done);
		}
		Ok(())
	}

	fn close_link(links: &mut Vec<FetchLink>, fetch: &mut FetchXml) {
		let Some(done) = links.pop() else {
			return;
		};
		if let Some(parent) = links.last_mut() {
			parent.links.push(done);
		} else {
			fetch.entity.links.push(done);
		}
	}
}

pub(crate) use parse::parse_paging;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_count_never_top() {
		let mut fetch = FetchXml::for_entity("account");
		fetch.count = Some(100);
		fetch.entity.attributes.push(FetchAttribute::named("name"));
		let xml = fetch.render(Some(1), None).unwrap();
		assert!(xml.contains(r#"count="100""#), "{xml}");
		assert!(!xml.contains("top="), "{xml}");
		assert!(xml.contains(r#"page="1""#), "{xml}");
	}

	#[test]
	fn page_size_clamps_to_backend_maximum() {
		let mut fetch = FetchXml::for_entity("account");
		fetch.count = Some(7000);
		assert_eq!(fetch.page_size(), 5000);
		let xml = fetch.render(None, None).unwrap();
		assert!(xml.contains(r#"count="5000""#), "{xml}");
	}

	#[test]
	fn render_parse_preserves_structure() {
		let mut fetch = FetchXml::for_entity("account");
		fetch.count = Some(10);
		fetch.entity.attributes.push(FetchAttribute::named("name"));
		fetch.entity.attributes.push(FetchAttribute {
			name: "revenue".into(),
			alias: Some("total".into()),
			aggregate: Some("sum".into()),
			..Default::default()
		});
		let mut filter = FetchFilter::and();
		filter.conditions.push(FetchCondition::new("statecode", "eq", Some("0".into())));
		let mut or_group = FetchFilter::or();
		or_group.conditions.push(FetchCondition::new("name", "like", Some("a%".into())));
		or_group.conditions.push(FetchCondition::new("name", "null", None));
		filter.filters.push(or_group);
		fetch.entity.filter = Some(filter);
		fetch.entity.orders.push(FetchOrder {
			attribute: Some("name".into()),
			alias: None,
			descending: true,
		});
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
		let parsed = FetchXml::parse(&xml).unwrap();
		assert_eq!(parsed, fetch);
	}

	#[test]
	fn in_condition_values_roundtrip() {
		let mut fetch = FetchXml::for_entity("account");
		let mut filter = FetchFilter::and();
		let mut cond = FetchCondition::new("statecode", "in", None);
		cond.values = vec!["0".to_owned(), "1".to_owned()];
		filter.conditions.push(cond);
		fetch.entity.filter = Some(filter);
		let xml = fetch.render(None, None).unwrap();
		let parsed = FetchXml::parse(&xml).unwrap();
		assert_eq!(parsed.entity.filter.unwrap().conditions[0].values, vec!["0", "1"]);
	}
}
