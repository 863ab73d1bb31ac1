//! The planner: turns parsed statements into executable plan trees,
//! deciding what is pushed down to FetchXML and what runs client-side.
//! Plan construction performs no backend record I/O; the only awaits are
//! metadata-cache reads.

pub mod dml;
pub mod explain;
pub mod fetchxml;
pub mod partition;
pub mod pushdown;
mod select;
mod subquery;

use crate::dbs::options::{DmlSafety, Options};
use crate::err::{Error, Result};
use crate::exe::control::{
	FlowSignal, IfElse, RaiseError, ScriptNode, VarDeclare, VarInit, VarSet, While,
};
use crate::exe::{Node, PlanNode};
use crate::exp::{compile_cond, compile_expr, CompileEnv};
use crate::meta::MetadataCache;
use crate::backend::Pool;
use crate::sql::{Column, Statement, Value};
use async_recursion::async_recursion;
use std::collections::HashMap;
use std::sync::Arc;

/// The DML safety guard's verdict for a plan. The worst verdict among a
/// script's children wins.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SafetyVerdict {
	Ok,
	RequiresConfirmation(String),
	Blocked(String),
}

impl SafetyVerdict {
	fn rank(&self) -> u8 {
		match self {
			SafetyVerdict::Ok => 0,
			SafetyVerdict::RequiresConfirmation(_) => 1,
			SafetyVerdict::Blocked(_) => 2,
		}
	}

	/// Combine with another verdict; the worse one wins.
	pub fn worst(self, other: SafetyVerdict) -> SafetyVerdict {
		if other.rank() > self.rank() {
			other
		} else {
			self
		}
	}
}

/// The output of planning one statement.
#[non_exhaustive]
pub struct PlanResult {
	pub root: Node,
	/// The label EXPLAIN renders above the tree.
	pub label: String,
	pub columns: Vec<Column>,
	/// The primary entity, when the statement targets one.
	pub entity: Option<String>,
	/// The pushed-down FetchXML, for EXPLAIN and logs.
	pub fetch_xml: Option<String>,
	pub safety: SafetyVerdict,
	/// Root decoration for EXPLAIN when partitioned execution is active.
	pub decoration: Option<String>,
}

impl PlanResult {
	/// Render the EXPLAIN text for this plan.
	pub fn explain(&self) -> String {
		explain::render(&self.label, &self.root, self.decoration.as_deref())
	}
}

/// The planner. Referentially transparent given options, variables, and
/// metadata: planning the same statement twice yields structurally equal
/// trees.
pub struct Planner {
	pub(crate) meta: Arc<MetadataCache>,
	pub(crate) pool: Arc<Pool>,
	pub(crate) options: Arc<Options>,
	pub(crate) safety: DmlSafety,
	pub(crate) variables: HashMap<String, Value>,
	pub(crate) pool_capacity: usize,
}

impl Planner {
	pub fn new(
		meta: Arc<MetadataCache>,
		pool: Arc<Pool>,
		options: Arc<Options>,
		safety: DmlSafety,
		variables: HashMap<String, Value>,
		pool_capacity: usize,
	) -> Self {
		Planner {
			meta,
			pool,
			options,
			safety,
			variables,
			pool_capacity,
		}
	}

	/// Plan a single statement.
	#[async_recursion]
	pub async fn plan(&self, statement: &Statement) -> Result<PlanResult> {
		match statement {
			Statement::Select(select) => self.plan_select_statement(select).await,
			Statement::Union(union) => self.plan_union(union).await,
			Statement::Insert(insert) => self.plan_insert(insert).await,
			Statement::Update(update) => self.plan_update(update).await,
			Statement::Delete(delete) => self.plan_delete(delete).await,
			Statement::If(statement) => {
				let env = CompileEnv::new();
				let cond = compile_cond(&statement.cond, &env)?;
				let then = self.plan(&statement.then).await?;
				let mut safety = then.safety.clone();
				let else_plan = match statement.otherwise {
					Some(ref otherwise) => {
						let planned = self.plan(otherwise).await?;
						safety = safety.worst(planned.safety.clone());
						Some(planned.root)
					}
					None => None,
				};
				Ok(PlanResult {
					root: Arc::new(IfElse {
						cond,
						display: statement.cond.to_string(),
						then_plan: then.root,
						else_plan,
					}),
					label: "IF".to_owned(),
					columns: then.columns,
					entity: then.entity,
					fetch_xml: then.fetch_xml,
					safety,
					decoration: None,
				})
			}
			Statement::While(statement) => {
				let env = CompileEnv::new();
				let cond = compile_cond(&statement.cond, &env)?;
				let body = self.plan(&statement.body).await?;
				Ok(PlanResult {
					root: Arc::new(While::new(
						cond,
						statement.cond.to_string(),
						body.root,
					)),
					label: "WHILE".to_owned(),
					columns: body.columns,
					entity: body.entity,
					fetch_xml: None,
					safety: body.safety,
					decoration: None,
				})
			}
			Statement::Block(block) => {
				let mut nodes: Vec<Node> = Vec::with_capacity(block.0.len());
				let mut safety = SafetyVerdict::Ok;
				let mut columns = Vec::new();
				let mut entity = None;
				for inner in &block.0 {
					let planned = self.plan(inner).await?;
					safety = safety.worst(planned.safety.clone());
					columns = planned.columns;
					entity = entity.or(planned.entity);
					nodes.push(planned.root);
				}
				Ok(PlanResult {
					root: Arc::new(ScriptNode {
						statements: nodes,
					}),
					label: "BLOCK".to_owned(),
					columns,
					entity,
					fetch_xml: None,
					safety,
					decoration: None,
				})
			}
			Statement::Declare(declare) => {
				let env = CompileEnv::new();
				let mut vars = Vec::with_capacity(declare.vars.len());
				for var in &declare.vars {
					vars.push(VarInit {
						name: var.name.clone(),
						ty: var.ty,
						init: var.init.as_ref().map(|e| compile_expr(e, &env)).transpose()?,
					});
				}
				Ok(control_result(
					Arc::new(VarDeclare {
						vars,
					}),
					"DECLARE",
				))
			}
			Statement::Set(set) => {
				let env = CompileEnv::new();
				Ok(control_result(
					Arc::new(VarSet {
						name: set.name.clone(),
						expr: compile_expr(&set.expr, &env)?,
						display: set.expr.to_string(),
					}),
					"SET",
				))
			}
			Statement::RaiseError(raise) => {
				let env = CompileEnv::new();
				Ok(control_result(
					Arc::new(RaiseError {
						message: compile_expr(&raise.message, &env)?,
						severity: raise.severity,
					}),
					"RAISERROR",
				))
			}
			Statement::Break => Ok(control_result(
				Arc::new(FlowSignal {
					is_break: true,
				}),
				"BREAK",
			)),
			Statement::Continue => Ok(control_result(
				Arc::new(FlowSignal {
					is_break: false,
				}),
				"CONTINUE",
			)),
		}
	}

	/// Plan a whole script: one statement becomes its own plan, several
	/// become a sequential script node with the worst child safety
	/// verdict.
	pub async fn plan_script(&self, statements: &[Statement]) -> Result<PlanResult> {
		if statements.is_empty() {
			return Err(Error::InvalidStatement {
				message: "the script contains no statements".to_owned(),
			});
		}
		if statements.len() == 1 {
			return self.plan(&statements[0]).await;
		}
		let mut nodes: Vec<Node> = Vec::with_capacity(statements.len());
		let mut safety = SafetyVerdict::Ok;
		let mut columns = Vec::new();
		let mut entity = None;
		let mut fetch_xml = None;
		for statement in statements {
			let planned = self.plan(statement).await?;
			safety = safety.worst(planned.safety.clone());
			if !planned.columns.is_empty() {
				columns = planned.columns;
			}
			entity = entity.or(planned.entity);
			fetch_xml = fetch_xml.or(planned.fetch_xml);
			nodes.push(planned.root);
		}
		Ok(PlanResult {
			root: Arc::new(ScriptNode {
				statements: nodes,
			}),
			label: "SCRIPT".to_owned(),
			columns,
			entity,
			fetch_xml,
			safety,
			decoration: None,
		})
	}

	/// The decoration string EXPLAIN places on the root when partitioned
	/// execution is in effect.
	pub(crate) fn partition_decoration(&self, parallelism: usize) -> String {
		format!("Pool capacity: {}, Effective parallelism: {parallelism}", self.pool_capacity)
	}
}

fn control_result(node: Arc<dyn PlanNode>, label: &str) -> PlanResult {
	PlanResult {
		root: node,
		label: label.to_owned(),
		columns: Vec::new(),
		entity: None,
		fetch_xml: None,
		safety: SafetyVerdict::Ok,
		decoration: None,
	}
}
