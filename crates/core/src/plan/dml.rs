//! DML planning and the write-safety guard. The guard runs at plan time,
//! not inside the DML node, so whole scripts are analyzed before anything
//! executes: the worst verdict among a script's branches wins.

use crate::cnf::DML_BATCH_SIZE;
use crate::err::{Error, Result};
use crate::exe::dml::{DmlExecute, DmlKind};
use crate::exe::scan::ConstantScan;
use crate::exe::Node;
use crate::exp::{compile_expr, CompileEnv};
use crate::plan::select::CteScope;
use crate::plan::{PlanResult, Planner, SafetyVerdict};
use crate::sql::{
	Column, DeleteStatement, Hint, InsertSource, InsertStatement, Kind, SelectColumn,
	SelectStatement, TableSource, UpdateStatement,
};
use std::sync::Arc;

struct DmlTargets {
	environment: Option<String>,
	id_column: String,
	production: bool,
}

impl Planner {
	async fn resolve_dml_target(&self, target: &TableSource) -> Result<DmlTargets> {
		let environment = target.environment.clone();
		let (meta, production) = match environment {
			Some(ref label) => {
				let env = self.pool.get(label)?;
				(env.meta.clone(), env.production)
			}
			None => (self.meta.clone(), false),
		};
		if !meta.entity_exists(&target.entity).await? {
			return Err(Error::EntityNotFound {
				name: target.entity.clone(),
			});
		}
		let entity = meta.entity(&target.entity).await?;
		Ok(DmlTargets {
			environment,
			id_column: entity.primary_id_attribute.clone(),
			production,
		})
	}

	/// The verdict for a write: cross-environment DML into a
	/// production-protected profile always requires confirmation, and
	/// UPDATE/DELETE without a WHERE clause is blocked outright.
	fn write_safety(&self, production_target: bool, missing_where: bool) -> SafetyVerdict {
		let mut verdict = SafetyVerdict::Ok;
		if production_target {
			verdict = verdict.worst(SafetyVerdict::RequiresConfirmation(
				"the target environment is marked as production".to_owned(),
			));
		}
		if missing_where {
			verdict = verdict.worst(SafetyVerdict::Blocked(
				"the statement has no WHERE clause and touches every row".to_owned(),
			));
		}
		verdict
	}

	fn batch_size(hints: &[Hint]) -> usize {
		hints
			.iter()
			.find_map(|h| match h {
				Hint::BatchSize(n) => Some(*n as usize),
				_ => None,
			})
			.unwrap_or(*DML_BATCH_SIZE)
	}

	pub(super) async fn plan_insert(&self, insert: &InsertStatement) -> Result<PlanResult> {
		let target = self.resolve_dml_target(&insert.target).await?;
		let env = CompileEnv::new();
		let (child, source_columns): (Node, Vec<String>) = match &insert.source {
			InsertSource::Values(rows) => {
				let mut compiled = Vec::with_capacity(rows.len());
				for row in rows {
					if row.len() != insert.columns.len() {
						return Err(Error::InvalidStatement {
							message: format!(
								"INSERT expects {} value(s) per row, found {}",
								insert.columns.len(),
								row.len()
							),
						});
					}
					let mut exprs = Vec::with_capacity(row.len());
					for expr in row {
						exprs.push(compile_expr(expr, &env)?);
					}
					compiled.push(exprs);
				}
				let scan = ConstantScan {
					columns: insert.columns.clone(),
					rows: compiled,
				};
				(Arc::new(scan), insert.columns.clone())
			}
			InsertSource::Select(select) => {
				let plan = self.plan_select(select, &CteScope::default()).await?;
				if plan.columns.len() < insert.columns.len() {
					return Err(Error::InvalidStatement {
						message: format!(
							"INSERT names {} column(s) but the SELECT supplies {}",
							insert.columns.len(),
							plan.columns.len()
						),
					});
				}
				// Positional mapping: INSERT column i is fed by the i'th
				// projected column of the source.
				let source_columns = plan
					.columns
					.iter()
					.take(insert.columns.len())
					.map(|c| c.name.clone())
					.collect();
				(plan.node, source_columns)
			}
		};
		let node = DmlExecute {
			kind: DmlKind::Insert,
			target_entity: insert.target.entity.clone(),
			environment: target.environment,
			child,
			target_columns: insert.columns.clone(),
			source_columns,
			set: Vec::new(),
			id_column: target.id_column,
			row_cap: self.safety.effective_row_cap(),
			batch_size: Self::batch_size(&insert.hints),
			bypass_plugins: insert.hints.contains(&Hint::BypassPlugins),
			bypass_flows: insert.hints.contains(&Hint::BypassFlows),
			dry_run: self.safety.dry_run,
		};
		Ok(PlanResult {
			root: Arc::new(node),
			label: "INSERT".to_owned(),
			columns: vec![Column::typed("affected", Kind::BigInt)],
			entity: Some(insert.target.entity.clone()),
			fetch_xml: None,
			safety: self.write_safety(target.production, false),
			decoration: None,
		})
	}

	pub(super) async fn plan_update(&self, update: &UpdateStatement) -> Result<PlanResult> {
		let target = self.resolve_dml_target(&update.target).await?;
		// Retrieve the target rows through a regular SELECT plan, so the
		// WHERE clause enjoys the same push-down as reads.
		let retrieval = SelectStatement {
			columns: vec![SelectColumn::Wildcard(None)],
			from: Some(update.target.clone()),
			cond: update.cond.clone(),
			top: update.top,
			..Default::default()
		};
		let plan = self.plan_select(&retrieval, &CteScope::default()).await?;
		let env = CompileEnv::new();
		let mut set = Vec::with_capacity(update.set.len());
		for (column, expr) in &update.set {
			set.push((column.clone(), compile_expr(expr, &env)?, expr.to_string()));
		}
		let node = DmlExecute {
			kind: DmlKind::Update,
			target_entity: update.target.entity.clone(),
			environment: target.environment,
			child: plan.node,
			target_columns: Vec::new(),
			source_columns: Vec::new(),
			set,
			id_column: target.id_column,
			row_cap: self.safety.effective_row_cap(),
			batch_size: Self::batch_size(&update.hints),
			bypass_plugins: update.hints.contains(&Hint::BypassPlugins),
			bypass_flows: update.hints.contains(&Hint::BypassFlows),
			dry_run: self.safety.dry_run,
		};
		Ok(PlanResult {
			root: Arc::new(node),
			label: "UPDATE".to_owned(),
			columns: vec![Column::typed("affected", Kind::BigInt)],
			entity: Some(update.target.entity.clone()),
			fetch_xml: None,
			safety: self.write_safety(target.production, update.cond.is_none()),
			decoration: None,
		})
	}

	pub(super) async fn plan_delete(&self, delete: &DeleteStatement) -> Result<PlanResult> {
		let target = self.resolve_dml_target(&delete.target).await?;
		let retrieval = SelectStatement {
			columns: vec![SelectColumn::Wildcard(None)],
			from: Some(delete.target.clone()),
			cond: delete.cond.clone(),
			top: delete.top,
			..Default::default()
		};
		let plan = self.plan_select(&retrieval, &CteScope::default()).await?;
		let node = DmlExecute {
			kind: DmlKind::Delete,
			target_entity: delete.target.entity.clone(),
			environment: target.environment,
			child: plan.node,
			target_columns: Vec::new(),
			source_columns: Vec::new(),
			set: Vec::new(),
			id_column: target.id_column,
			row_cap: self.safety.effective_row_cap(),
			batch_size: Self::batch_size(&delete.hints),
			bypass_plugins: delete.hints.contains(&Hint::BypassPlugins),
			bypass_flows: delete.hints.contains(&Hint::BypassFlows),
			dry_run: self.safety.dry_run,
		};
		Ok(PlanResult {
			root: Arc::new(node),
			label: "DELETE".to_owned(),
			columns: vec![Column::typed("affected", Kind::BigInt)],
			entity: Some(delete.target.entity.clone()),
			fetch_xml: None,
			safety: self.write_safety(target.production, delete.cond.is_none()),
			decoration: None,
		})
	}
}
