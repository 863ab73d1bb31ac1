//! Control-flow nodes: scripts, IF/ELSE, WHILE with BREAK/CONTINUE, the
//! variable statements, RAISERROR, and the recursive CTE driver.

use crate::backend::{rows_stream, RowStream};
use crate::cnf::MAX_LOOP_ITERATIONS;
use crate::err::{Error, Result};
use crate::exe::{collect_rows, ExecContext, Node, PlanNode};
use crate::exp::{cast_value, CompiledCond, CompiledExpr};
use crate::sql::{CastType, Row};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::TryStreamExt;
use std::sync::{Arc, RwLock};

/// Sequential statement execution. Yields each child's rows in order and
/// holds the request's variable scope through the execution context.
pub struct ScriptNode {
	pub statements: Vec<Node>,
}

#[async_trait]
impl PlanNode for ScriptNode {
	fn describe(&self) -> String {
		format!("Script: {} statement(s)", self.statements.len())
	}

	fn children(&self) -> Vec<Node> {
		self.statements.clone()
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let statements = self.statements.clone();
		let ctx = ctx.clone();
		let stream = try_stream! {
			for statement in statements {
				let mut rows = statement.execute(&ctx).await?;
				// Flow-control sentinels pass through untouched so an
				// enclosing WHILE can catch them.
				while let Some(row) = rows.try_next().await? {
					ctx.check()?;
					yield row;
				}
			}
		};
		Ok(Box::pin(stream))
	}
}

/// IF with an optional ELSE. The condition is evaluated against the
/// variable scope; the chosen branch streams its rows.
pub struct IfElse {
	pub cond: CompiledCond,
	pub display: String,
	pub then_plan: Node,
	pub else_plan: Option<Node>,
}

#[async_trait]
impl PlanNode for IfElse {
	fn describe(&self) -> String {
		format!("If: {}", self.display)
	}

	fn children(&self) -> Vec<Node> {
		let mut out = vec![self.then_plan.clone()];
		if let Some(ref e) = self.else_plan {
			out.push(e.clone());
		}
		out
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let bindings = ctx.bindings();
		let empty = Row::new();
		if (self.cond)(&empty, &bindings)?.is_true() {
			self.then_plan.execute(ctx).await
		} else if let Some(ref else_plan) = self.else_plan {
			else_plan.execute(ctx).await
		} else {
			Ok(rows_stream(Vec::new()))
		}
	}
}

/// WHILE with BREAK/CONTINUE sentinels and an iteration ceiling. The
/// condition re-reads the variable scope before every iteration.
pub struct While {
	pub cond: CompiledCond,
	pub display: String,
	pub body: Node,
	pub max_iterations: u64,
}

impl While {
	pub fn new(cond: CompiledCond, display: String, body: Node) -> Self {
		While {
			cond,
			display,
			body,
			max_iterations: *MAX_LOOP_ITERATIONS,
		}
	}
}

#[async_trait]
impl PlanNode for While {
	fn describe(&self) -> String {
		format!("While: {}", self.display)
	}

	fn children(&self) -> Vec<Node> {
		vec![self.body.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let cond = self.cond.clone();
		let body = self.body.clone();
		let max_iterations = self.max_iterations;
		let ctx = ctx.clone();
		let stream = try_stream! {
			let empty = Row::new();
			let mut iterations: u64 = 0;
			'outer: loop {
				ctx.check()?;
				// Re-snapshot the variables: the body mutates them.
				let bindings = ctx.bindings();
				if !cond(&empty, &bindings)?.is_true() {
					break;
				}
				iterations += 1;
				if iterations > max_iterations {
					Err(Error::LoopLimitExceeded {
						max: max_iterations,
					})?;
				}
				let mut rows = body.execute(&ctx).await?;
				loop {
					match rows.try_next().await {
						Ok(Some(row)) => {
							ctx.check()?;
							yield row;
						}
						Ok(None) => break,
						Err(Error::FlowBreak) => break 'outer,
						Err(Error::FlowContinue) => break,
						Err(error) => Err(error)?,
					}
				}
			}
		};
		Ok(Box::pin(stream))
	}
}

/// The BREAK and CONTINUE sentinels: error-shaped flow control consumed by
/// the enclosing [`While`].
pub struct FlowSignal {
	pub is_break: bool,
}

#[async_trait]
impl PlanNode for FlowSignal {
	fn describe(&self) -> String {
		if self.is_break {
			"Break".to_owned()
		} else {
			"Continue".to_owned()
		}
	}

	async fn execute(&self, _: &ExecContext) -> Result<RowStream> {
		let error = if self.is_break {
			Error::FlowBreak
		} else {
			Error::FlowContinue
		};
		Ok(Box::pin(futures::stream::once(async move { Err(error) })))
	}
}

/// One declared variable.
pub struct VarInit {
	pub name: String,
	pub ty: CastType,
	pub init: Option<CompiledExpr>,
}

/// DECLARE: introduces variables into the scope, NULL unless initialized.
pub struct VarDeclare {
	pub vars: Vec<VarInit>,
}

#[async_trait]
impl PlanNode for VarDeclare {
	fn describe(&self) -> String {
		let names: Vec<String> = self.vars.iter().map(|v| format!("@{}", v.name)).collect();
		format!("Declare: {}", names.join(", "))
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let bindings = ctx.bindings();
		let empty = Row::new();
		for var in &self.vars {
			let value = match var.init {
				Some(ref init) => cast_value(&init(&empty, &bindings)?, &var.ty)?,
				None => crate::sql::Value::Null,
			};
			ctx.set_var(&var.name, value);
		}
		Ok(rows_stream(Vec::new()))
	}
}

/// SET: assigns a declared variable.
pub struct VarSet {
	pub name: String,
	pub expr: CompiledExpr,
	pub display: String,
}

#[async_trait]
impl PlanNode for VarSet {
	fn describe(&self) -> String {
		format!("Set: @{} = {}", self.name, self.display)
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		if !ctx.has_var(&self.name) {
			return Err(Error::VariableNotFound {
				name: self.name.clone(),
			});
		}
		let bindings = ctx.bindings();
		let empty = Row::new();
		ctx.set_var(&self.name, (self.expr)(&empty, &bindings)?);
		Ok(rows_stream(Vec::new()))
	}
}

/// RAISERROR: severities of 11 and above fail the script; lower
/// severities log and continue.
pub struct RaiseError {
	pub message: CompiledExpr,
	pub severity: i32,
}

#[async_trait]
impl PlanNode for RaiseError {
	fn describe(&self) -> String {
		format!("RaiseError: severity {}", self.severity)
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let bindings = ctx.bindings();
		let empty = Row::new();
		let message = (self.message)(&empty, &bindings)?.as_string();
		if self.severity >= 11 {
			return Err(Error::Raised {
				message,
			});
		}
		tracing::info!(severity = self.severity, "{message}");
		Ok(rows_stream(Vec::new()))
	}
}

/// The shared working set between a [`RecursiveCte`] and the
/// [`WorkingSetScan`] leaves inside its recursive member.
pub type WorkingSet = Arc<RwLock<Vec<Row>>>;

/// Reads the previous iteration's rows inside a recursive CTE member.
pub struct WorkingSetScan {
	pub name: String,
	pub slot: WorkingSet,
}

#[async_trait]
impl PlanNode for WorkingSetScan {
	fn describe(&self) -> String {
		format!("WorkingSetScan: {}", self.name)
	}

	async fn execute(&self, _: &ExecContext) -> Result<RowStream> {
		let rows = self.slot.read().expect("working set poisoned").clone();
		Ok(rows_stream(rows))
	}
}

/// Evaluates the anchor member, then repeatedly re-runs the recursive
/// member against the previous iteration's rows until it produces nothing
/// or the recursion ceiling is hit, which is an error.
pub struct RecursiveCte {
	pub name: String,
	pub anchor: Node,
	pub recursive: Node,
	pub slot: WorkingSet,
	pub max_recursion: u32,
}

#[async_trait]
impl PlanNode for RecursiveCte {
	fn describe(&self) -> String {
		format!("RecursiveCte: {} (max recursion {})", self.name, self.max_recursion)
	}

	fn children(&self) -> Vec<Node> {
		vec![self.anchor.clone(), self.recursive.clone()]
	}

	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream> {
		let mut out = collect_rows(&self.anchor, ctx).await?;
		let mut working = out.clone();
		let mut depth: u32 = 0;
		while !working.is_empty() {
			ctx.check()?;
			depth += 1;
			if depth > self.max_recursion {
				return Err(Error::RecursionLimitExceeded {
					max: self.max_recursion,
				});
			}
			*self.slot.write().expect("working set poisoned") = working;
			let produced = collect_rows(&self.recursive, ctx).await?;
			out.extend(produced.iter().cloned());
			ctx.check_materialized(out.len())?;
			working = produced;
		}
		Ok(rows_stream(out))
	}
}
