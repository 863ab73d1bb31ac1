//! The plan-node library and execution runtime. Plan nodes form a strict
//! tree built by the planner; each node implements the pull-based iterator
//! contract, yielding rows lazily as an async stream and polling the
//! cancellation context between rows and between backend pages.

pub mod aggregate;
pub mod concat;
pub mod control;
pub mod distinct;
pub mod dml;
pub mod filter;
pub mod join;
pub mod limit;
pub mod parallel;
pub mod prefetch;
pub mod project;
pub mod scan;
pub mod sort;
pub mod spool;
pub mod stats;
pub mod subquery;
pub mod window;

pub use stats::{NodeTiming, Statistics};

use crate::backend::{Environment, Pool, RowStream};
use crate::ctx::Context;
use crate::dbs::options::Options;
use crate::dbs::progress::Progress;
use crate::err::{Error, Result};
use crate::exp::Bindings;
use crate::sql::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A shared, immutable plan node.
pub type Node = Arc<dyn PlanNode>;

/// The iterator contract every plan node implements.
#[async_trait]
pub trait PlanNode: Send + Sync {
	/// One line describing this node for EXPLAIN output.
	fn describe(&self) -> String;

	/// The child nodes, in execution order. Used to render the plan tree.
	fn children(&self) -> Vec<Node> {
		Vec::new()
	}

	/// Start pulling rows from this node.
	async fn execute(&self, ctx: &ExecContext) -> Result<RowStream>;
}

/// The per-request execution context: external interfaces, options,
/// cancellation, statistics, and the script variable scope.
#[derive(Clone)]
pub struct ExecContext {
	/// The cancellation and deadline scope of this request.
	pub ctx: Context,
	/// The environment unqualified table names execute against.
	pub env: Arc<Environment>,
	/// The pool resolving remote environment labels.
	pub pool: Arc<Pool>,
	/// The request's plan options.
	pub options: Arc<Options>,
	/// The progress sink.
	pub progress: Arc<dyn Progress>,
	/// The per-request statistics accumulator.
	pub stats: Arc<Statistics>,
	vars: Arc<RwLock<HashMap<String, Value>>>,
}

impl ExecContext {
	/// Build a context for one request.
	pub fn new(
		ctx: Context,
		env: Arc<Environment>,
		pool: Arc<Pool>,
		options: Arc<Options>,
		progress: Arc<dyn Progress>,
	) -> Self {
		ExecContext {
			ctx,
			env,
			pool,
			options,
			progress,
			stats: Arc::new(Statistics::new()),
			vars: Arc::new(RwLock::new(HashMap::new())),
		}
	}

	/// Fail when the request has been cancelled or timed out.
	pub fn check(&self) -> Result<()> {
		self.ctx.check()
	}

	/// The environment a scan should run against: the request default, or a
	/// labelled remote environment.
	pub fn environment(&self, label: Option<&str>) -> Result<Arc<Environment>> {
		match label {
			Some(label) => self.pool.get(label),
			None => Ok(self.env.clone()),
		}
	}

	/// Snapshot the variable scope for expression evaluation.
	pub fn bindings(&self) -> Bindings {
		let vars = self.vars.read().expect("variable scope poisoned");
		vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
	}

	/// Declare or assign a script variable.
	pub fn set_var(&self, name: &str, value: Value) {
		let mut vars = self.vars.write().expect("variable scope poisoned");
		vars.insert(name.to_lowercase(), value);
	}

	/// Whether a variable has been declared.
	pub fn has_var(&self, name: &str) -> bool {
		let vars = self.vars.read().expect("variable scope poisoned");
		vars.contains_key(&name.to_lowercase())
	}

	/// Seed the variable scope from request-supplied values.
	pub fn seed_vars(&self, values: &HashMap<String, Value>) {
		let mut vars = self.vars.write().expect("variable scope poisoned");
		for (name, value) in values {
			vars.insert(name.to_lowercase(), value.clone());
		}
	}

	/// Fail when a materializing node has grown past the configured row
	/// cap.
	pub fn check_materialized(&self, rows: usize) -> Result<()> {
		let limit = self.options.max_materialization_rows;
		if rows > limit {
			Err(Error::MemoryLimit {
				limit,
			})
		} else {
			Ok(())
		}
	}
}

/// Materialize a child stream fully, observing cancellation and the
/// materialization cap. The workhorse behind joins, sorts, spools, and
/// windows.
pub(crate) async fn collect_rows(
	node: &Node,
	ctx: &ExecContext,
) -> Result<Vec<crate::sql::Row>> {
	use futures::TryStreamExt;
	let mut stream = node.execute(ctx).await?;
	let mut rows = Vec::new();
	while let Some(row) = stream.try_next().await? {
		ctx.check()?;
		rows.push(row);
		ctx.check_materialized(rows.len())?;
	}
	Ok(rows)
}
