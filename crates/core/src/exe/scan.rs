//! Leaf scans: the paged FetchXML scan, the TDS replica scan, the
//! metadata-table scan, the fast count path, and the constant scan behind
//! INSERT ... VALUES.

use crate::backend::{rows_stream, RowStream};
use crate::err::Result;
use crate::exe::{stats, ExecContext, Node, PlanNode};
use crate::exp::CompiledExpr;
use crate::meta::tables::{self, MetadataTable};
use crate::plan::fetchxml::FetchXml;
use crate::sql::{Row, Value};
use async_stream::try_stream;
use async_trait::async_trait;

/// Drives the backend page by page, yielding rows in page-arrival order.
///
/// A SQL `TOP n` becomes `max_rows = n` with the page size clamped, never a
/// fetch-level `top` attribute, because the backend rejects `top` together
/// with paging. The scan stops pulling pages once `max_rows` rows have been
/// yielded, and polls cancellation between pages and between rows.
pub struct FetchXmlScan {
	pub fetch: FetchXml,
	pub entity: String,
	/// A remote environment label, for cross-environment scans.
	pub environment: Option<String>,
	pub auto_page: bool,
	pub max_rows: Option<u64>,
	/// Prefix output columns with this binding name, for client-side join
	/// plans.
	pub qualify_as: Option<String>,
}

impl FetchXmlScan {
	pub fn new(entity: impl Into<String>, fetch: FetchXml) -> Self {
		FetchXmlScan {
			fetch,
			entity: entity.into(),
			environment: None,
			auto_page: true,
			max_rows: None,
			qualify_as: None,
		}
	}
}

#[async_trait]
impl PlanNode for FetchXmlScan {
	fn describe(&self) -> String {
		let mut out = match self.environment {
			Some(ref env) => format!("RemoteScan: [{env}].{}", self.entity),
			None => format!("FetchXmlScan: {}", self.entity),
		};
		if self.fetch.aggregate {
			out.push_str(" (aggregate)");
		} else if self.auto_page {
			out.push_str(" (autopage)");
		}
		if let Some(max) = self.max_rows {
			out.push_str(&format!(" (max {max} rows)"));
		}
		out
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let env = ctx.environment(self.environment.as_deref())?;
		let fetch = self.fetch.clone();
		let auto_page = self.auto_page;
		let max_rows = self.max_rows;
		let qualify = self.qualify_as.clone();
		let ctx = ctx.clone();
		let description = self.describe();
		let stats = ctx.stats.clone();
		let stream = try_stream! {
			let mut page: u32 = 1;
			let mut cookie: Option<String> = None;
			let mut emitted: u64 = 0;
			loop {
				// Stop pulling new pages once cancelled.
				ctx.check()?;
				let xml = fetch.render(Some(page), cookie.as_deref())?;
				let permit = env.acquire().await?;
				let result =
					env.backend.execute_fetch_xml(&xml, Some(page), cookie.as_deref()).await?;
				drop(permit);
				ctx.stats.add_page();
				for row in result.rows {
					ctx.check()?;
					if max_rows.is_some_and(|max| emitted >= max) {
						return;
					}
					emitted += 1;
					let row = match qualify {
						Some(ref alias) => row.qualified(alias),
						None => row,
					};
					yield row;
				}
				if !result.more || !auto_page || max_rows.is_some_and(|max| emitted >= max) {
					break;
				}
				cookie = result.cookie;
				page += 1;
			}
		};
		Ok(stats::instrument(description, stats, Box::pin(stream)))
	}
}

/// Streams rows from the read-replica TDS endpoint.
pub struct TdsScan {
	pub sql: String,
}

#[async_trait]
impl PlanNode for TdsScan {
	fn describe(&self) -> String {
		"TdsScan".to_owned()
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let permit = ctx.env.acquire().await?;
		let result = ctx.env.backend.execute_tds(&self.sql).await?;
		drop(permit);
		for _ in 0..result.rows.len() {
			ctx.stats.add_row();
		}
		ctx.stats.add_page();
		Ok(stats::instrument(self.describe(), ctx.stats.clone(), rows_stream(result.rows)))
	}
}

/// Streams synthetic rows from the metadata provider.
pub struct MetadataScan {
	pub table: MetadataTable,
}

#[async_trait]
impl PlanNode for MetadataScan {
	fn describe(&self) -> String {
		format!("MetadataScan: {}", self.table.name())
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let rows = tables::rows(self.table, &ctx.env.meta).await?;
		Ok(rows_stream(rows))
	}
}

/// The fast path for a bare `SELECT COUNT(*) FROM entity`: the
/// near-instant record-count RPC, falling back to an aggregate FetchXML
/// scan when the RPC fails.
pub struct CountOptimized {
	pub entity: String,
	pub output: String,
	pub fallback: Node,
}

#[async_trait]
impl PlanNode for CountOptimized {
	fn describe(&self) -> String {
		format!("CountOptimized: {}", self.entity)
	}

	fn children(&self) -> Vec<Node> {
		vec![self.fallback.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		match ctx.env.backend.total_record_count(&self.entity).await {
			Ok(count) => {
				let mut row = Row::for_entity(&self.entity);
				row.set(&self.output, Value::BigInt(count));
				Ok(rows_stream(vec![row]))
			}
			Err(error) => {
				tracing::warn!(
					entity = %self.entity,
					%error,
					"record-count RPC failed, falling back to aggregate FetchXML",
				);
				self.fallback.execute(ctx).await
			}
		}
	}
}

/// Produces literal rows without touching the backend. The leaf below
/// INSERT ... VALUES.
pub struct ConstantScan {
	pub columns: Vec<String>,
	pub rows: Vec<Vec<CompiledExpr>>,
}

#[async_trait]
impl PlanNode for ConstantScan {
	fn describe(&self) -> String {
		format!("ConstantScan: {} row(s)", self.rows.len())
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let bindings = ctx.bindings();
		let empty = Row::new();
		let mut out = Vec::with_capacity(self.rows.len());
		for exprs in &self.rows {
			let mut row = Row::new();
			for (column, expr) in self.columns.iter().zip(exprs) {
				row.set(column, expr(&empty, &bindings)?);
			}
			out.push(row);
		}
		Ok(rows_stream(out))
	}
}
