//! The query service façade: the narrow interface the rest of the
//! application drives the engine through.

use crate::backend::{Environment, Pool, RowStream};
use crate::ctx::{Context, MutableContext};
use crate::dbs::options::Options;
use crate::dbs::progress::{NoopProgress, Phase, Progress};
use crate::dbs::response::{
	Diagnostic, ExplainOutput, Request, Response, ResultSet, Severity, Stats,
};
use crate::err::{Error, Result};
use crate::exe::ExecContext;
use crate::plan::{PlanResult, Planner, SafetyVerdict};
use crate::sql::{Row, SelectColumn, Statement, TableSource};
use crate::syn;
use crate::syn::token::ColoredToken;
use futures::stream::Stream;
use futures::TryStreamExt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// How many rows a streaming chunk carries.
const STREAM_CHUNK_ROWS: usize = 500;

/// The streaming counterpart of [`Response`]: column descriptors up front,
/// rows delivered lazily in chunks. Chunks go through the same projection
/// as the buffered path, so virtual name companions are never lost.
#[non_exhaustive]
pub struct StreamingResponse {
	pub columns: Vec<crate::sql::Column>,
	pub executed_fetch_xml: Option<String>,
	pub chunks: Pin<Box<dyn Stream<Item = Result<Vec<Row>>> + Send>>,
}

/// The engine façade. Owns nothing but handles: the pool provides
/// backends, metadata, and capacity per environment.
pub struct QueryService {
	pool: Arc<Pool>,
	progress: Arc<dyn Progress>,
}

impl QueryService {
	pub fn new(pool: Arc<Pool>) -> Self {
		QueryService {
			pool,
			progress: Arc::new(NoopProgress),
		}
	}

	/// Attach a progress sink receiving phase changes and counts.
	pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
		self.progress = progress;
		self
	}

	fn planner(&self, env: &Arc<Environment>, request: &Request) -> Planner {
		let options = Arc::new(request.options.clone());
		let capacity = request.options.pool_capacity.unwrap_or_else(|| env.capacity());
		Planner::new(
			env.meta.clone(),
			self.pool.clone(),
			options,
			request.safety.clone(),
			request.variables.clone(),
			capacity,
		)
	}

	/// Execute a request to completion, buffering the result.
	pub async fn execute(&self, request: Request) -> Response {
		self.execute_with_context(request, MutableContext::background().freeze()).await
	}

	/// Execute a request under an externally cancellable context.
	pub async fn execute_with_context(&self, request: Request, ctx: Context) -> Response {
		let started = Instant::now();
		let (result, stats) = match self.run_buffered(&request, ctx).await {
			Ok((result_set, stats)) => (Ok(result_set), stats),
			Err(error) => (Err(error), Stats::default()),
		};
		Response {
			time: started.elapsed(),
			result,
			stats,
		}
	}

	async fn run_buffered(&self, request: &Request, ctx: Context) -> Result<(ResultSet, Stats)> {
		let started = Instant::now();
		let (plan, exec, mut stream) = self.prepare(request, ctx).await?;
		let mut rows = Vec::new();
		loop {
			match stream.try_next().await {
				Ok(Some(row)) => rows.push(row),
				Ok(None) => break,
				Err(error) => return Err(error),
			}
		}
		let stats = Stats {
			rows: rows.len() as u64,
			pages: exec.stats.pages(),
			elapsed_ms: started.elapsed().as_millis() as u64,
			node_timings: exec.stats.node_timings(),
		};
		Ok((
			ResultSet {
				columns: plan.columns,
				rows,
				executed_fetch_xml: plan.fetch_xml,
			},
			stats,
		))
	}

	/// Execute a request as a lazy chunk stream.
	pub async fn execute_streaming(&self, request: Request) -> Result<StreamingResponse> {
		self.execute_streaming_with_context(request, MutableContext::background().freeze()).await
	}

	/// Streaming execution under an externally cancellable context.
	pub async fn execute_streaming_with_context(
		&self,
		request: Request,
		ctx: Context,
	) -> Result<StreamingResponse> {
		let (plan, _exec, mut stream) = self.prepare(&request, ctx).await?;
		let chunks = async_stream::try_stream! {
			let mut chunk = Vec::with_capacity(STREAM_CHUNK_ROWS);
			while let Some(row) = stream.try_next().await? {
				chunk.push(row);
				if chunk.len() >= STREAM_CHUNK_ROWS {
					yield std::mem::take(&mut chunk);
				}
			}
			if !chunk.is_empty() {
				yield chunk;
			}
		};
		Ok(StreamingResponse {
			columns: plan.columns,
			executed_fetch_xml: plan.fetch_xml,
			chunks: Box::pin(chunks),
		})
	}

	/// Parse, plan, enforce write safety, and start execution, retrying
	/// once with the partitioned plan when the backend reports its
	/// aggregate record ceiling.
	async fn prepare(
		&self,
		request: &Request,
		ctx: Context,
	) -> Result<(PlanResult, ExecContext, RowStream)> {
		let env = self.pool.default_environment()?;
		// The wall-clock budget links into the caller's context.
		let mut scoped = MutableContext::new(&ctx);
		scoped.add_timeout(request.options.timeout)?;
		let ctx = scoped.freeze();

		let script =
			syn::parse(&request.sql).map_err(Error::Syntax)?;
		let planner = self.planner(&env, request);
		let plan = planner.plan_script(&script.0).await?;
		self.enforce_safety(&plan.safety, request)?;

		let exec = ExecContext::new(
			ctx,
			env,
			self.pool.clone(),
			Arc::new(request.options.clone()),
			self.progress.clone(),
		);
		exec.seed_vars(&request.variables);
		exec.progress.phase(Phase::Executing);

		// Nodes that consume their input eagerly surface an aggregate-limit
		// fault at execute time; bare pushed-aggregate scans surface it on
		// the first poll. Check both before handing the stream out, and
		// re-plan into date-partitioned form when the statement allows it.
		let stream = match plan.root.execute(&exec).await {
			Ok(stream) => stream,
			Err(error) if error.is_aggregate_limit() => {
				let Some(retried) = self.partitioned_retry(&script, &planner).await? else {
					return Err(error);
				};
				let stream = retried.root.execute(&exec).await?;
				return Ok((retried, exec.clone(), stream));
			}
			Err(error) => return Err(error),
		};
		let mut peekable = Box::pin(futures::StreamExt::peekable(stream));
		let hit_limit = matches!(
			peekable.as_mut().peek().await,
			Some(Err(error)) if error.is_aggregate_limit()
		);
		if hit_limit {
			if let Some(retried) = self.partitioned_retry(&script, &planner).await? {
				let stream = retried.root.execute(&exec).await?;
				return Ok((retried, exec.clone(), stream));
			}
			// No partitioned form: the peeked error surfaces on first pull.
		}
		Ok((plan, exec.clone(), Box::pin(peekable) as RowStream))
	}

	async fn partitioned_retry(
		&self,
		script: &crate::sql::Script,
		planner: &Planner,
	) -> Result<Option<PlanResult>> {
		let [Statement::Select(select)] = script.0.as_slice() else {
			return Ok(None);
		};
		let retried = planner.plan_select_partitioned(select).await?;
		if retried.is_some() {
			tracing::warn!("aggregate record limit hit, retrying with partitioned execution");
		}
		Ok(retried)
	}

	fn enforce_safety(&self, verdict: &SafetyVerdict, request: &Request) -> Result<()> {
		match verdict {
			SafetyVerdict::Ok => Ok(()),
			SafetyVerdict::RequiresConfirmation(reason) | SafetyVerdict::Blocked(reason) => {
				if request.safety.confirmed {
					Ok(())
				} else {
					Err(Error::DmlBlocked {
						reason: reason.clone(),
					})
				}
			}
		}
	}

	/// Plan a statement and render its tree without executing anything.
	/// Dry-run semantics: no backend record I/O happens.
	pub async fn explain(&self, sql: &str) -> Result<ExplainOutput> {
		self.explain_with_options(sql, Options::default()).await
	}

	/// EXPLAIN with explicit plan options.
	pub async fn explain_with_options(&self, sql: &str, options: Options) -> Result<ExplainOutput> {
		let env = self.pool.default_environment()?;
		let request = Request {
			sql: sql.to_owned(),
			options,
			..Default::default()
		};
		let script = syn::parse(sql).map_err(Error::Syntax)?;
		let planner = self.planner(&env, &request);
		let plan = planner.plan_script(&script.0).await?;
		Ok(ExplainOutput {
			text: plan.explain(),
			fetch_xml: plan.fetch_xml.clone(),
			columns: plan.columns,
		})
	}

	/// Parse and check a script, returning non-fatal diagnostics for the
	/// editor: syntax errors plus unknown entities and attributes.
	pub async fn validate(&self, sql: &str) -> Vec<Diagnostic> {
		let mut diagnostics = Vec::new();
		let (script, errors) = syn::parse_partial(sql);
		for error in errors {
			diagnostics.push(Diagnostic {
				severity: Severity::Error,
				message: error.to_string(),
				span: Some(error.span),
			});
		}
		let Ok(env) = self.pool.default_environment() else {
			return diagnostics;
		};
		for statement in script.iter() {
			self.validate_statement(statement, &env, &mut diagnostics).await;
		}
		diagnostics
	}

	async fn validate_statement(
		&self,
		statement: &Statement,
		env: &Arc<Environment>,
		diagnostics: &mut Vec<Diagnostic>,
	) {
		let mut tables: Vec<&TableSource> = Vec::new();
		let mut cte_names: Vec<String> = Vec::new();
		match statement {
			Statement::Select(select) => {
				tables.extend(select.from.iter());
				tables.extend(select.joins.iter().map(|j| &j.table));
				cte_names.extend(select.ctes.iter().map(|c| c.name.to_lowercase()));
			}
			Statement::Insert(insert) => tables.push(&insert.target),
			Statement::Update(update) => tables.push(&update.target),
			Statement::Delete(delete) => tables.push(&delete.target),
			_ => {}
		}
		for table in &tables {
			if table.is_remote()
				|| table.schema.as_deref() == Some("metadata")
				|| cte_names.contains(&table.entity.to_lowercase())
			{
				continue;
			}
			match env.meta.entity_exists(&table.entity).await {
				Ok(true) => {}
				Ok(false) => diagnostics.push(Diagnostic {
					severity: Severity::Error,
					message: format!("unknown entity '{}'", table.entity),
					span: None,
				}),
				Err(_) => return,
			}
		}
		// Attribute checks for the single-table case, where bare column
		// references are unambiguous.
		if let Statement::Select(select) = statement {
			if !select.joins.is_empty() || !select.ctes.is_empty() {
				return;
			}
			let Some(ref from) = select.from else {
				return;
			};
			if from.is_remote() || from.schema.as_deref() == Some("metadata") {
				return;
			}
			let Ok(meta) = env.meta.entity(&from.entity).await else {
				return;
			};
			for item in &select.columns {
				if let SelectColumn::Expr {
					expr: crate::sql::Expression::Column(column),
					..
				} = item
				{
					if column.table.is_none() && meta.attribute(&column.column).is_none() {
						diagnostics.push(Diagnostic {
							severity: Severity::Error,
							message: format!(
								"unknown column '{}' on entity '{}'",
								column.column, from.entity
							),
							span: None,
						});
					}
				}
			}
		}
	}

	/// Tokenize SQL text for highlighting. Pure and total over the input.
	pub fn tokenize(&self, sql: &str) -> Vec<ColoredToken> {
		syn::tokenize(sql)
	}
}
