//! The DML leaf: consumes rows from its child and dispatches bulk writes,
//! honoring the safety row cap, batch size, bypass flags, and dry-run
//! mode, and reporting progress per batch.

use crate::backend::{rows_stream, BulkOptions, RowStream, WriteOutcome};
use crate::dbs::progress::Phase;
use crate::err::{Error, Result};
use crate::exe::{ExecContext, Node, PlanNode};
use crate::exp::CompiledExpr;
use crate::sql::{Row, Value};
use async_trait::async_trait;
use futures::TryStreamExt;
use uuid::Uuid;

/// The write flavors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DmlKind {
	Insert,
	Update,
	Delete,
}

impl DmlKind {
	fn verb(&self) -> &'static str {
		match self {
			DmlKind::Insert => "Insert",
			DmlKind::Update => "Update",
			DmlKind::Delete => "Delete",
		}
	}
}

/// Executes a bulk write fed by the child plan.
///
/// For INSERT ... SELECT the mapping is positional: `source_columns[i]`
/// names the column on each input row that supplies the value of
/// `target_columns[i]`. UPDATE evaluates its SET expressions against each
/// retrieved row; DELETE collects primary ids. The node emits a single
/// `affected` row.
pub struct DmlExecute {
	pub kind: DmlKind,
	pub target_entity: String,
	/// A remote environment label, for cross-environment DML.
	pub environment: Option<String>,
	pub child: Node,
	pub target_columns: Vec<String>,
	pub source_columns: Vec<String>,
	/// UPDATE assignments: output column, compiled expression, display.
	pub set: Vec<(String, CompiledExpr, String)>,
	/// The target's primary id attribute.
	pub id_column: String,
	pub row_cap: Option<u64>,
	pub batch_size: usize,
	pub bypass_plugins: bool,
	pub bypass_flows: bool,
	pub dry_run: bool,
}

#[async_trait]
impl PlanNode for DmlExecute {
	fn describe(&self) -> String {
		let mut out = format!("DmlExecute ({}): {}", self.kind.verb(), self.target_entity);
		if let Some(cap) = self.row_cap {
			out.push_str(&format!(" (cap {cap})"));
		}
		if self.dry_run {
			out.push_str(" (dry run)");
		}
		out
	}

	fn children(&self) -> Vec<Node> {
		vec![self.child.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let env = ctx.environment(self.environment.as_deref())?;
		let bindings = ctx.bindings();
		ctx.progress.phase(Phase::Writing);

		// Materialize the source rows, enforcing the safety cap before any
		// write is dispatched.
		let mut input = self.child.execute(ctx).await?;
		let mut source = Vec::new();
		while let Some(row) = input.try_next().await? {
			ctx.check()?;
			source.push(row);
			if let Some(cap) = self.row_cap {
				if source.len() as u64 > cap {
					return Err(Error::DmlRowCapExceeded {
						cap,
					});
				}
			}
			ctx.check_materialized(source.len())?;
		}

		let options = BulkOptions {
			batch_size: self.batch_size,
			bypass_plugins: self.bypass_plugins,
			bypass_flows: self.bypass_flows,
		};
		let mut affected: u64 = 0;
		for batch in source.chunks(self.batch_size.max(1)) {
			ctx.check()?;
			let outcomes = if self.dry_run {
				batch.iter().map(|_| WriteOutcome::ok(Uuid::nil())).collect()
			} else {
				let permit = env.acquire().await?;
				let outcomes = self.write_batch(batch, &env, &options, &bindings).await?;
				drop(permit);
				outcomes
			};
			for outcome in &outcomes {
				if let Some(ref error) = outcome.error {
					return Err(Error::Remote {
						message: format!(
							"{} failed on {}: {error}",
							self.kind.verb(),
							self.target_entity
						),
					});
				}
			}
			affected += outcomes.len() as u64;
			ctx.progress.advance(outcomes.len() as u64);
		}

		let mut summary = Row::for_entity(&self.target_entity);
		summary.set("affected", Value::BigInt(affected as i64));
		Ok(rows_stream(vec![summary]))
	}
}

impl DmlExecute {
	async fn write_batch(
		&self,
		batch: &[Row],
		env: &crate::backend::Environment,
		options: &BulkOptions,
		bindings: &crate::exp::Bindings,
	) -> Result<Vec<WriteOutcome>> {
		match self.kind {
			DmlKind::Insert => {
				let mut records = Vec::with_capacity(batch.len());
				for row in batch {
					let mut record = Row::for_entity(&self.target_entity);
					for (target, source) in
						self.target_columns.iter().zip(&self.source_columns)
					{
						let value = row.get(source).cloned().unwrap_or(Value::Null);
						record.set(target, value);
					}
					records.push(record);
				}
				env.bulk.create_multiple(&self.target_entity, records, options).await
			}
			DmlKind::Update => {
				let mut records = Vec::with_capacity(batch.len());
				for row in batch {
					let mut record = Row::for_entity(&self.target_entity);
					let id = row.get(&self.id_column).cloned().unwrap_or(Value::Null);
					record.set(&self.id_column, id);
					for (column, expr, _) in &self.set {
						record.set(column, expr(row, bindings)?);
					}
					records.push(record);
				}
				env.bulk.update_multiple(&self.target_entity, records, options).await
			}
			DmlKind::Delete => {
				let mut ids = Vec::with_capacity(batch.len());
				for row in batch {
					match row.get(&self.id_column) {
						Some(Value::Guid(id)) => ids.push(*id),
						Some(Value::Lookup(lookup)) => ids.push(lookup.id),
						_ => {
							return Err(Error::InvalidStatement {
								message: format!(
									"delete source row is missing the {} column",
									self.id_column
								),
							});
						}
					}
				}
				env.bulk.delete_multiple(&self.target_entity, ids, options).await
			}
		}
	}
}
