//! SELECT planning: full FetchXML push-down when the backend can take the
//! whole query, and the client-side pipeline of scans, joins, filters,
//! aggregation, windows, projection, ordering, and limits otherwise.

use crate::cnf::{MAX_PAGE_SIZE, MAX_RECURSION};
use crate::err::{Error, Result};
use crate::exe::aggregate::{
	AggregateExpr, AggregateFunction, ClientAggregate, GroupColumn,
};
use crate::exe::control::{RecursiveCte, WorkingSet, WorkingSetScan};
use crate::exe::distinct::Distinct;
use crate::exe::filter::ClientFilter;
use crate::exe::join::{HashJoin, JoinType, MergeJoin, NestedJoinType, NestedLoopJoin, RightSource};
use crate::exe::limit::Limit;
use crate::exe::prefetch::Prefetch;
use crate::exe::project::{Project, ProjectColumn, RenameColumns};
use crate::exe::scan::{ConstantScan, CountOptimized, FetchXmlScan, MetadataScan, TdsScan};
use crate::exe::sort::{Sort, SortKey};
use crate::exe::spool::TableSpool;
use crate::exe::window::{ClientWindow, WindowColumn, WindowFunction};
use crate::exe::{concat::Concatenate, Node};
use crate::exp::{compile_cond, compile_expr, AliasMap, CompileEnv};
use crate::meta::{EntityMetadata, MetadataCache};
use crate::plan::fetchxml::{FetchAttribute, FetchFilter, FetchLink, FetchXml};
use crate::plan::pushdown::{self, PushScope};
use crate::plan::{PlanResult, Planner, SafetyVerdict};
use crate::sql::expression::is_aggregate_name;
use crate::sql::{
	Column, ColumnRef, Condition, Expression, FunctionCall, Hint, Join, JoinKind, Kind,
	OrderItem, SelectColumn, SelectStatement, TableSource, UnionStatement,
};
use async_recursion::async_recursion;
use std::collections::HashMap;
use std::sync::Arc;

/// The outcome of planning one SELECT.
pub(crate) struct SelectPlan {
	pub node: Node,
	pub columns: Vec<Column>,
	pub entity: Option<String>,
	pub fetch: Option<FetchXml>,
	pub decoration: Option<String>,
}

/// Common table expressions visible while planning a SELECT.
#[derive(Clone, Default)]
pub(crate) struct CteScope {
	map: HashMap<String, CtePlan>,
}

#[derive(Clone)]
pub(crate) struct CtePlan {
	node: Node,
	columns: Vec<String>,
}

impl CteScope {
	fn get(&self, name: &str) -> Option<&CtePlan> {
		self.map.get(&name.to_lowercase())
	}
}

/// One FROM-clause table with its join information resolved.
pub(crate) struct TableUnit {
	pub(crate) binding: String,
	pub(crate) entity: String,
	pub(crate) kind: UnitKind,
	pub(crate) join: Option<Join>,
}

pub(crate) enum UnitKind {
	Local,
	Remote(String),
	Cte(CtePlan),
	Metadata(crate::meta::tables::MetadataTable),
}

impl TableUnit {
	fn is_local(&self) -> bool {
		matches!(self.kind, UnitKind::Local)
	}
}

/// The aggregate shape of a SELECT: grouping expressions and distinct
/// aggregate calls, each with a stable output column name.
pub(crate) struct AggregateInfo {
	pub(crate) group: Vec<(Expression, String)>,
	pub(crate) aggregates: Vec<(FunctionCall, String)>,
	pub(crate) alias_map: AliasMap,
}

impl Planner {
	pub(super) async fn plan_select_statement(
		&self,
		select: &SelectStatement,
	) -> Result<PlanResult> {
		let plan = self.plan_select(select, &CteScope::default()).await?;
		Ok(PlanResult {
			root: plan.node,
			label: "SELECT".to_owned(),
			columns: plan.columns,
			entity: plan.entity,
			fetch_xml: match plan.fetch {
				Some(ref fetch) => Some(fetch.render(None, None)?),
				None => None,
			},
			safety: SafetyVerdict::Ok,
			decoration: plan.decoration,
		})
	}

	pub(super) async fn plan_union(&self, union: &UnionStatement) -> Result<PlanResult> {
		let mut members = Vec::with_capacity(union.selects.len());
		let mut columns = Vec::new();
		for (i, select) in union.selects.iter().enumerate() {
			let plan = self.plan_select(select, &CteScope::default()).await?;
			if i == 0 {
				columns = plan.columns.clone();
				members.push(plan.node);
			} else {
				if plan.columns.len() != columns.len() {
					return Err(Error::InvalidStatement {
						message: "all UNION members must project the same number of columns"
							.to_owned(),
					});
				}
				// Later members adopt the first member's column names
				// positionally, per T-SQL.
				members.push(Arc::new(RenameColumns {
					child: plan.node,
					names: columns.iter().map(|c| c.name.to_lowercase()).collect(),
				}) as Node);
			}
		}
		let mut node: Node = Arc::new(Concatenate {
			children: members,
		});
		// Any non-ALL separator deduplicates the whole combined result,
		// matching T-SQL's left-associative UNION evaluation over a
		// homogeneous chain.
		if union.all.iter().any(|all| !all) {
			node = Arc::new(Distinct {
				child: node,
				key_columns: columns.iter().map(|c| c.name.clone()).collect(),
				case_insensitive: true,
			});
		}
		if !union.order.is_empty() {
			node = self.client_sort(node, &union.order, &AliasMap::new())?;
		}
		Ok(PlanResult {
			root: node,
			label: "UNION".to_owned(),
			columns,
			entity: None,
			fetch_xml: None,
			safety: SafetyVerdict::Ok,
			decoration: None,
		})
	}

	/// Plan one SELECT under a CTE scope.
	#[async_recursion]
	pub(crate) async fn plan_select(
		&self,
		select: &SelectStatement,
		outer_ctes: &CteScope,
	) -> Result<SelectPlan> {
		let ctes = self.plan_ctes(select, outer_ctes).await?;

		// SELECT without FROM evaluates the projection over one empty row.
		let Some(ref from) = select.from else {
			return self.plan_table_less(select);
		};

		// The replica toggle and the USE_TDS hint both route the statement
		// to the read-only TDS endpoint.
		if select.hints.contains(&Hint::UseTds) || self.options.use_replica {
			return self.plan_tds(select);
		}

		if let Some(plan) = self.plan_count_optimized(select, from).await? {
			return Ok(plan);
		}

		let units = self.resolve_tables(select, from, &ctes)?;

		// Attempt the full FetchXML transpilation first.
		if let Some(plan) = self.try_full_pushdown(select, &units).await? {
			return Ok(plan);
		}

		self.plan_client_side(select, units, &ctes).await
	}

	async fn plan_ctes(
		&self,
		select: &SelectStatement,
		outer: &CteScope,
	) -> Result<CteScope> {
		let mut scope = outer.clone();
		for cte in &select.ctes {
			let columns = if cte.columns.is_empty() {
				// Derive output names from the first member's projection.
				cte.body
					.first()
					.map(|s| s.columns.iter().map(SelectColumn::output_name).collect())
					.unwrap_or_default()
			} else {
				cte.columns.clone()
			};
			let node = if cte.is_recursive() {
				self.plan_recursive_cte(cte, &columns, &scope).await?
			} else {
				let mut members = Vec::with_capacity(cte.body.len());
				for member in &cte.body {
					members.push(self.plan_select(member, &scope).await?.node);
				}
				let body: Node = if members.len() == 1 {
					members.pop().expect("one member")
				} else {
					let node: Node = Arc::new(Concatenate {
						children: members,
					});
					if cte.union_all {
						node
					} else {
						Arc::new(Distinct {
							child: node,
							key_columns: columns.clone(),
							case_insensitive: true,
						})
					}
				};
				Arc::new(TableSpool::new(self.rename_columns(body, &columns)?)) as Node
			};
			scope.map.insert(
				cte.name.to_lowercase(),
				CtePlan {
					node,
					columns,
				},
			);
		}
		Ok(scope)
	}

	async fn plan_recursive_cte(
		&self,
		cte: &crate::sql::Cte,
		columns: &[String],
		scope: &CteScope,
	) -> Result<Node> {
		if !cte.union_all {
			return Err(Error::InvalidStatement {
				message: format!("recursive CTE '{}' requires UNION ALL", cte.name),
			});
		}
		let slot: WorkingSet = Arc::new(std::sync::RwLock::new(Vec::new()));
		let mut anchors = Vec::new();
		let mut recursives = Vec::new();
		for member in &cte.body {
			if member.references_table(&cte.name) {
				// The recursive member reads the previous iteration through
				// the working-set scan.
				let mut inner_scope = scope.clone();
				inner_scope.map.insert(
					cte.name.to_lowercase(),
					CtePlan {
						node: Arc::new(WorkingSetScan {
							name: cte.name.clone(),
							slot: slot.clone(),
						}),
						columns: columns.to_vec(),
					},
				);
				recursives.push(self.plan_select(member, &inner_scope).await?.node);
			} else {
				anchors.push(self.plan_select(member, scope).await?.node);
			}
		}
		if anchors.is_empty() || recursives.is_empty() {
			return Err(Error::InvalidStatement {
				message: format!(
					"recursive CTE '{}' needs both an anchor and a recursive member",
					cte.name
				),
			});
		}
		let max_recursion = cte
			.body
			.iter()
			.flat_map(|s| s.hints.iter())
			.find_map(|h| match h {
				Hint::MaxRecursion(n) => Some(*n),
				_ => None,
			})
			.unwrap_or(*MAX_RECURSION);
		let anchor: Node = if anchors.len() == 1 {
			anchors.pop().expect("one anchor")
		} else {
			Arc::new(Concatenate {
				children: anchors,
			})
		};
		let recursive: Node = if recursives.len() == 1 {
			recursives.pop().expect("one recursive member")
		} else {
			Arc::new(Concatenate {
				children: recursives,
			})
		};
		// Spool the fixpoint so downstream references replay the computed
		// rows instead of re-running the recursion.
		Ok(Arc::new(TableSpool::new(Arc::new(RecursiveCte {
			name: cte.name.clone(),
			anchor: self.rename_columns(anchor, columns)?,
			recursive: self.rename_columns(recursive, columns)?,
			slot,
			max_recursion,
		}))))
	}

	/// Rename a node's output columns positionally to the CTE's declared
	/// column list. An empty list is the identity.
	fn rename_columns(&self, node: Node, columns: &[String]) -> Result<Node> {
		if columns.is_empty() {
			return Ok(node);
		}
		Ok(Arc::new(RenameColumns {
			child: node,
			names: columns.iter().map(|c| c.to_lowercase()).collect(),
		}))
	}

	fn plan_table_less(&self, select: &SelectStatement) -> Result<SelectPlan> {
		let scan: Node = Arc::new(ConstantScan {
			columns: Vec::new(),
			rows: vec![Vec::new()],
		});
		let env = CompileEnv::new();
		let mut columns = Vec::new();
		for item in &select.columns {
			let SelectColumn::Expr {
				expr,
				alias,
			} = item
			else {
				return Err(Error::InvalidStatement {
					message: "SELECT * requires a FROM clause".to_owned(),
				});
			};
			columns.push(ProjectColumn {
				column: Column::new(
					alias.clone().unwrap_or_else(|| item.output_name()),
				),
				expr: compile_expr(expr, &env)?,
				display: expr.to_string(),
				expand_name: false,
			});
		}
		let project = Project {
			child: scan,
			columns,
		};
		let descriptors = project.descriptors();
		Ok(SelectPlan {
			node: Arc::new(project),
			columns: descriptors,
			entity: None,
			fetch: None,
			decoration: None,
		})
	}

	fn plan_tds(&self, select: &SelectStatement) -> Result<SelectPlan> {
		// Strip the OPTION clause before shipping the statement.
		let mut stripped = select.clone();
		stripped.hints.clear();
		let columns = stripped
			.columns
			.iter()
			.map(|c| Column::new(c.output_name()))
			.collect::<Vec<_>>();
		Ok(SelectPlan {
			node: Arc::new(TdsScan {
				sql: stripped.to_string(),
			}),
			columns,
			entity: stripped.from.as_ref().map(|f| f.entity.clone()),
			fetch: None,
			decoration: None,
		})
	}

	/// The fast path for a bare `SELECT COUNT(*) FROM entity`.
	async fn plan_count_optimized(
		&self,
		select: &SelectStatement,
		from: &TableSource,
	) -> Result<Option<SelectPlan>> {
		let simple = select.joins.is_empty()
			&& select.cond.is_none()
			&& select.group.is_empty()
			&& select.having.is_none()
			&& !select.distinct
			&& select.top.is_none()
			&& select.order.is_empty()
			&& !from.is_remote()
			&& from.schema.as_deref() != Some("metadata")
			&& select.columns.len() == 1;
		if !simple {
			return Ok(None);
		}
		let Some(SelectColumn::Expr {
			expr: Expression::Function(call),
			alias,
		}) = select.columns.first()
		else {
			return Ok(None);
		};
		if !call.star || !call.name.eq_ignore_ascii_case("count") || call.over.is_some() {
			return Ok(None);
		}
		let meta = self.entity_meta(&from.entity, None).await?;
		let output = alias.clone().unwrap_or_else(|| "count".to_owned());
		// The fallback is an aggregate FetchXML count.
		let mut fetch = FetchXml::for_entity(&from.entity);
		fetch.aggregate = true;
		fetch.entity.attributes.push(FetchAttribute {
			name: meta.primary_id_attribute.clone(),
			alias: Some(output.clone()),
			aggregate: Some("count".to_owned()),
			..Default::default()
		});
		let fallback: Node = Arc::new(FetchXmlScan {
			fetch: fetch.clone(),
			entity: from.entity.clone(),
			environment: None,
			auto_page: false,
			max_rows: None,
			qualify_as: None,
		});
		let column = Column::typed(output.clone(), Kind::BigInt).as_aggregate();
		Ok(Some(SelectPlan {
			node: Arc::new(CountOptimized {
				entity: from.entity.clone(),
				output,
				fallback,
			}),
			columns: vec![column],
			entity: Some(from.entity.clone()),
			fetch: Some(fetch),
			decoration: None,
		}))
	}

	fn resolve_tables(
		&self,
		select: &SelectStatement,
		from: &TableSource,
		ctes: &CteScope,
	) -> Result<Vec<TableUnit>> {
		let mut units = Vec::with_capacity(select.joins.len() + 1);
		units.push(self.resolve_table(from, ctes, None)?);
		for join in &select.joins {
			units.push(self.resolve_table(&join.table, ctes, Some(join.clone()))?);
		}
		Ok(units)
	}

	pub(crate) fn resolve_table(
		&self,
		source: &TableSource,
		ctes: &CteScope,
		join: Option<Join>,
	) -> Result<TableUnit> {
		let binding = source.binding().to_lowercase();
		let kind = if let Some(ref label) = source.environment {
			UnitKind::Remote(label.clone())
		} else if source.schema.as_deref() == Some("metadata") {
			let table = crate::meta::tables::MetadataTable::from_name(&source.entity)
				.ok_or_else(|| Error::EntityNotFound {
					name: format!("metadata.{}", source.entity),
				})?;
			UnitKind::Metadata(table)
		} else if let Some(cte) = ctes.get(&source.entity) {
			UnitKind::Cte(cte.clone())
		} else {
			UnitKind::Local
		};
		Ok(TableUnit {
			binding,
			entity: source.entity.clone(),
			kind,
			join,
		})
	}

	pub(crate) async fn entity_meta(
		&self,
		entity: &str,
		environment: Option<&str>,
	) -> Result<Arc<EntityMetadata>> {
		let meta: Arc<MetadataCache> = match environment {
			Some(label) => self.pool.get(label)?.meta.clone(),
			None => self.meta.clone(),
		};
		if !meta.entity_exists(entity).await? {
			return Err(Error::EntityNotFound {
				name: entity.to_owned(),
			});
		}
		meta.entity(entity).await
	}

	/// Collect the SELECT's aggregate shape, or `None` when the statement
	/// does not aggregate.
	pub(crate) fn analyze_aggregates(&self, select: &SelectStatement) -> Result<Option<AggregateInfo>> {
		if !select.is_aggregate() {
			return Ok(None);
		}
		let mut aggregates: Vec<(FunctionCall, String)> = Vec::new();
		let mut collect = |call: &FunctionCall, alias: Option<&String>| {
			if aggregates.iter().any(|(c, _)| c.signature() == call.signature()) {
				return;
			}
			let output = alias
				.cloned()
				.unwrap_or_else(|| format!("agg{}", aggregates.len() + 1));
			aggregates.push((call.clone(), output));
		};
		for item in &select.columns {
			if let SelectColumn::Expr {
				expr,
				alias,
			} = item
			{
				// A projection item that is exactly one aggregate call
				// donates its alias as the output column name.
				if let Expression::Function(call) = expr {
					if is_aggregate_name(&call.name) && call.over.is_none() {
						collect(call, alias.as_ref());
						continue;
					}
				}
				collect_aggregates(expr, &mut collect);
			}
		}
		if let Some(ref having) = select.having {
			collect_aggregates_cond(having, &mut collect);
		}
		for item in &select.order {
			collect_aggregates(&item.expr, &mut collect);
		}
		let mut group = Vec::with_capacity(select.group.len());
		for (i, expr) in select.group.iter().enumerate() {
			let output = select
				.columns
				.iter()
				.find_map(|c| match c {
					SelectColumn::Expr {
						expr: e,
						alias: Some(alias),
					} if e == expr => Some(alias.clone()),
					_ => None,
				})
				.or_else(|| expr.as_column().map(|c| c.column.clone()))
				.unwrap_or_else(|| format!("grp{}", i + 1));
			group.push((expr.clone(), output));
		}
		let mut alias_map = AliasMap::new();
		for (call, output) in &aggregates {
			alias_map.insert(call.signature(), output.clone());
		}
		Ok(Some(AggregateInfo {
			group,
			aggregates,
			alias_map,
		}))
	}

	/// Try to transpile the whole SELECT into one FetchXML document.
	/// Returns `None` when any fallback trigger fires: RIGHT/FULL/CROSS
	/// joins, column-to-column conditions, unfoldable groupings, function
	/// calls in WHERE, subqueries, window functions, CTE or metadata or
	/// mixed-environment sources.
	async fn try_full_pushdown(
		&self,
		select: &SelectStatement,
		units: &[TableUnit],
	) -> Result<Option<SelectPlan>> {
		let base = &units[0];
		let environment = match base.kind {
			UnitKind::Local => None,
			UnitKind::Remote(ref label) => Some(label.clone()),
			_ => return Ok(None),
		};
		// Joins must be INNER or LEFT onto local tables in the same
		// environment, with a single column-equality ON.
		for unit in &units[1..] {
			if !unit.is_local() {
				return Ok(None);
			}
			let Some(ref join) = unit.join else {
				return Ok(None);
			};
			if !matches!(join.kind, JoinKind::Inner | JoinKind::Left) || environment.is_some() {
				return Ok(None);
			}
			if extract_link_keys(join, units).is_none() {
				return Ok(None);
			}
		}
		// Window functions always need the client.
		let has_window = select.columns.iter().any(|c| match c {
			SelectColumn::Expr {
				expr,
				..
			} => expr.contains_window(),
			SelectColumn::Wildcard(_) => false,
		});
		if has_window {
			return Ok(None);
		}
		// Subqueries in WHERE may still push as link-type in/exists; other
		// subqueries fall back.
		if select.columns.iter().any(|c| match c {
			SelectColumn::Expr {
				expr,
				..
			} => expr.contains_subquery(),
			SelectColumn::Wildcard(_) => false,
		}) {
			return Ok(None);
		}

		let meta = self.entity_meta(&base.entity, environment.as_deref()).await?;
		let scope = PushScope {
			tables: units.iter().map(|u| (u.binding.clone(), u.entity.clone())).collect(),
			variables: &self.variables,
		};

		let mut fetch = FetchXml::for_entity(&base.entity);
		fetch.no_lock = select.hints.contains(&Hint::NoLock);

		// WHERE: every conjunct must push, subquery conjuncts push as
		// semi-join links.
		let mut filters_by_binding: HashMap<String, FetchFilter> = HashMap::new();
		let mut semi_links: Vec<FetchLink> = Vec::new();
		if let Some(ref cond) = select.cond {
			for conjunct in cond.conjuncts() {
				if let Some(link) = self.push_subquery_link(conjunct, &scope).await? {
					semi_links.push(link);
					continue;
				}
				let Some(pushed) = pushdown::push_conjunct(conjunct, &scope) else {
					return Ok(None);
				};
				merge_filter(&mut filters_by_binding, pushed.binding, pushed.filter);
			}
		}

		// Aggregation: groupings fold or fail, aggregates translate or
		// fail, unless the HASH GROUP hint forces the client.
		let aggregate_info = self.analyze_aggregates(select)?;
		if let Some(ref info) = aggregate_info {
			if select.hints.contains(&Hint::HashGroup) {
				return Ok(None);
			}
			fetch.aggregate = true;
			for (expr, output) in &info.group {
				let Some((column, dategrouping)) = pushdown::fold_group(expr) else {
					return Ok(None);
				};
				fetch.entity.attributes.push(FetchAttribute {
					name: column,
					alias: Some(output.clone()),
					aggregate: None,
					groupby: true,
					dategrouping,
				});
			}
			for (call, output) in &info.aggregates {
				let Some((column, operation)) =
					pushdown::push_aggregate(call, &meta.primary_id_attribute)
				else {
					return Ok(None);
				};
				fetch.entity.attributes.push(FetchAttribute {
					name: column,
					alias: Some(output.clone()),
					aggregate: Some(operation),
					groupby: false,
					dategrouping: None,
				});
			}
		} else {
			// Plain scan: project the referenced attributes, or everything
			// for wildcards and computed expressions.
			let mut attributes: Vec<FetchAttribute> = Vec::new();
			let mut all = false;
			for item in &select.columns {
				match item {
					SelectColumn::Wildcard(_) => all = true,
					SelectColumn::Expr {
						expr,
						..
					} => match expr.as_column() {
						Some(column) => {
							let binding = scope.binding_of(column).unwrap_or_default();
							if binding == scope.base_binding() {
								if !attributes.iter().any(|a| a.name == column.column) {
									attributes.push(FetchAttribute::named(&column.column));
								}
							}
							// Linked columns land on their link element
							// below.
						}
						None => all = true,
					},
				}
			}
			if all {
				fetch.entity.all_attributes = true;
			} else {
				fetch.entity.attributes = attributes;
			}
			fetch.distinct = select.distinct;
		}

		// ORDER BY: push plain-column orderings. Aggregate queries sort
		// client-side above the HAVING filter, referencing the aggregate
		// output aliases.
		let mut client_order: Vec<OrderItem> = Vec::new();
		if aggregate_info.is_some() {
			client_order = select.order.clone();
		} else {
			for item in &select.order {
				match pushdown::push_order(item, &scope, None) {
					Some(order) => fetch.entity.orders.push(order),
					None => client_order.push(item.clone()),
				}
			}
		}

		// Joins become link-entities carrying their table's filter and
		// referenced attributes.
		for unit in &units[1..] {
			let join = unit.join.as_ref().expect("joined unit");
			let Some((from_attr, to_attr)) = extract_link_keys(join, units) else {
				return Ok(None);
			};
			let filter = filters_by_binding.remove(&unit.binding);
			let attributes = linked_attributes(select, &unit.binding);
			fetch.entity.links.push(FetchLink {
				name: unit.entity.clone(),
				from: from_attr,
				to: to_attr,
				alias: Some(unit.binding.clone()),
				link_type: match join.kind {
					JoinKind::Left => "outer",
					_ => "inner",
				}
				.to_owned(),
				attributes,
				filter,
				links: Vec::new(),
			});
		}
		fetch.entity.links.extend(semi_links);
		if let Some(filter) = filters_by_binding.remove(&units[0].binding) {
			fetch.entity.filter = Some(filter);
		}
		// Any filter left over targets a binding that never materialized.
		if !filters_by_binding.is_empty() {
			return Ok(None);
		}

		// TOP converts to the page-size count with the scan stopping at n
		// rows; OFFSET stays client-side.
		let mut max_rows = select.top;
		if let Some(Hint::MaxRows(n)) = select
			.hints
			.iter()
			.find(|h| matches!(h, Hint::MaxRows(_)))
		{
			max_rows = Some(max_rows.map_or(*n, |m| m.min(*n)));
		}
		if let Some(limit) = self.options.max_rows {
			max_rows = Some(max_rows.map_or(limit, |m| m.min(limit)));
		}
		if !fetch.aggregate {
			if let Some(top) = max_rows {
				fetch.count = Some(top.min(MAX_PAGE_SIZE as u64) as u32);
			}
		}

		let scan: Node = Arc::new(FetchXmlScan {
			fetch: fetch.clone(),
			entity: base.entity.clone(),
			environment: environment.clone(),
			auto_page: !fetch.aggregate,
			max_rows,
			qualify_as: None,
		});
		// Remote scans joined with nothing still spool, so repeated pulls
		// within one request replay instead of re-fetching.
		let mut node: Node = if environment.is_some() {
			Arc::new(TableSpool::new(scan))
		} else if self.options.prefetch && !fetch.aggregate {
			Arc::new(Prefetch {
				child: scan,
				buffer_size: self.options.prefetch_buffer,
			})
		} else {
			scan
		};

		let alias_map = aggregate_info
			.as_ref()
			.map(|info| info.alias_map.clone())
			.unwrap_or_default();

		// HAVING runs client-side above the aggregate, compiled against
		// the aggregate output aliases.
		if let Some(ref having) = select.having {
			let env = CompileEnv::with_aliases(alias_map.clone());
			node = Arc::new(ClientFilter {
				child: node,
				predicate: compile_cond(having, &env)?,
				display: display_with_aliases(having, &alias_map),
			});
		}

		// Final projection, with aggregate substitution when aggregating.
		let (node, columns) = self
			.build_projection(select, node, &meta, aggregate_info.as_ref(), units)
			.await?;
		let mut node = node;

		if !client_order.is_empty() {
			node = self.client_sort(node, &client_order, &alias_map)?;
		}
		if select.offset.is_some() || (select.top.is_some() && fetch.aggregate) {
			node = Arc::new(Limit {
				child: node,
				skip: select.offset,
				take: select.fetch.or(select.top),
			});
		}

		Ok(Some(SelectPlan {
			node,
			columns,
			entity: Some(base.entity.clone()),
			fetch: Some(fetch),
			decoration: None,
		}))
	}

	/// Build the final projection and its descriptors. When aggregating,
	/// projection expressions are rewritten so group expressions and
	/// aggregate calls become references to the aggregate's output
	/// columns.
	pub(crate) async fn build_projection(
		&self,
		select: &SelectStatement,
		input: Node,
		base_meta: &EntityMetadata,
		aggregate: Option<&AggregateInfo>,
		units: &[TableUnit],
	) -> Result<(Node, Vec<Column>)> {
		let alias_map =
			aggregate.map(|info| info.alias_map.clone()).unwrap_or_default();
		let env = CompileEnv::with_aliases(alias_map);
		let qualified = units.len() > 1 && aggregate.is_none();

		// Names the user projected explicitly, to avoid duplicating
		// virtual name companions.
		let explicit: Vec<String> = select
			.columns
			.iter()
			.map(|c| c.output_name().to_lowercase())
			.collect();

		let mut columns: Vec<ProjectColumn> = Vec::new();
		for item in &select.columns {
			match item {
				SelectColumn::Wildcard(target) => {
					self.expand_wildcard(
						target.as_deref(),
						units,
						base_meta,
						qualified,
						&explicit,
						&env,
						&mut columns,
					)
					.await?;
				}
				SelectColumn::Expr {
					expr,
					alias,
				} => {
					let rewritten = match aggregate {
						Some(info) => substitute_aggregates(expr, info),
						None => expr.clone(),
					};
					let output = alias.clone().unwrap_or_else(|| item.output_name());
					let mut column = Column::new(output);
					let is_aggregate_item = aggregate.is_some_and(|info| {
						info.aggregates.iter().any(|(call, _)| match expr {
							Expression::Function(c) => c.signature() == call.signature(),
							_ => false,
						})
					});
					if is_aggregate_item {
						column.aggregate_alias = true;
						column.kind = Some(Kind::BigInt);
					}
					let mut expand_name = false;
					if let Some(column_ref) = expr.as_column() {
						if let Some(attribute) = self
							.attribute_meta(column_ref, units, base_meta)
							.await?
						{
							column.kind = Some(attribute.kind);
							column.nullable = attribute.nullable;
							column.lookup = attribute.kind == Kind::Lookup;
							column.option_set = attribute.kind == Kind::OptionSet;
							let companion =
								format!("{}name", column_ref.column.to_lowercase());
							expand_name = column.wants_name_companion()
								&& !explicit.contains(&companion);
						}
					}
					columns.push(ProjectColumn {
						column,
						expr: compile_expr(&rewritten, &env)?,
						display: expr.to_string(),
						expand_name,
					});
				}
			}
		}
		let project = Project {
			child: input,
			columns,
		};
		let descriptors = project.descriptors();
		Ok((Arc::new(project) as Node, descriptors))
	}

	#[allow(clippy::too_many_arguments)]
	async fn expand_wildcard(
		&self,
		target: Option<&str>,
		units: &[TableUnit],
		base_meta: &EntityMetadata,
		qualified: bool,
		explicit: &[String],
		env: &CompileEnv,
		columns: &mut Vec<ProjectColumn>,
	) -> Result<()> {
		for (i, unit) in units.iter().enumerate() {
			if let Some(target) = target {
				if !unit.binding.eq_ignore_ascii_case(target) {
					continue;
				}
			}
			match &unit.kind {
				UnitKind::Cte(cte) => {
					for name in &cte.columns {
						let reference = ColumnRef {
							table: qualified.then(|| unit.binding.clone()),
							column: name.clone(),
						};
						columns.push(ProjectColumn {
							column: Column::new(name.clone()),
							expr: compile_expr(&Expression::Column(reference), env)?,
							display: name.clone(),
							expand_name: false,
						});
					}
				}
				UnitKind::Metadata(table) => {
					for column in table.columns() {
						let reference = ColumnRef {
							table: qualified.then(|| unit.binding.clone()),
							column: column.name.clone(),
						};
						columns.push(ProjectColumn {
							display: column.name.clone(),
							expr: compile_expr(&Expression::Column(reference), env)?,
							column,
							expand_name: false,
						});
					}
				}
				UnitKind::Local | UnitKind::Remote(_) => {
					let environment = match &unit.kind {
						UnitKind::Remote(label) => Some(label.as_str()),
						_ => None,
					};
					let meta = if i == 0 && environment.is_none() {
						Arc::new(base_meta.clone())
					} else {
						self.entity_meta(&unit.entity, environment).await?
					};
					for attribute in &meta.attributes {
						let reference = ColumnRef {
							table: qualified.then(|| unit.binding.clone()),
							column: attribute.logical_name.clone(),
						};
						let mut column =
							Column::typed(attribute.logical_name.clone(), attribute.kind);
						column.nullable = attribute.nullable;
						let companion = format!("{}name", attribute.logical_name);
						let expand_name = column.wants_name_companion()
							&& !explicit.contains(&companion);
						columns.push(ProjectColumn {
							display: reference.to_string(),
							expr: compile_expr(&Expression::Column(reference), env)?,
							column,
							expand_name,
						});
					}
				}
			}
		}
		Ok(())
	}

	async fn attribute_meta(
		&self,
		column: &ColumnRef,
		units: &[TableUnit],
		base_meta: &EntityMetadata,
	) -> Result<Option<crate::meta::AttributeMetadata>> {
		let unit = match column.table {
			Some(ref qualifier) => {
				units.iter().find(|u| u.binding.eq_ignore_ascii_case(qualifier))
			}
			None => units.first(),
		};
		let Some(unit) = unit else {
			return Ok(None);
		};
		match &unit.kind {
			UnitKind::Local => {
				let meta = if unit.entity.eq_ignore_ascii_case(&base_meta.logical_name) {
					return Ok(base_meta.attribute(&column.column).cloned());
				} else {
					self.entity_meta(&unit.entity, None).await?
				};
				Ok(meta.attribute(&column.column).cloned())
			}
			UnitKind::Remote(label) => {
				let meta = self.entity_meta(&unit.entity, Some(label)).await?;
				Ok(meta.attribute(&column.column).cloned())
			}
			_ => Ok(None),
		}
	}

	pub(crate) fn client_sort(
		&self,
		node: Node,
		order: &[OrderItem],
		aliases: &AliasMap,
	) -> Result<Node> {
		let env = CompileEnv::with_aliases(aliases.clone());
		let mut keys = Vec::with_capacity(order.len());
		for item in order {
			keys.push(SortKey {
				expr: compile_expr(&item.expr, &env)?,
				descending: item.descending,
				display: item.expr.to_string(),
			});
		}
		Ok(Arc::new(Sort {
			child: node,
			keys,
		}))
	}

	/// The client-side pipeline: per-table scans with partial push-down,
	/// a join tree, residual filtering with subquery rewrites, aggregation,
	/// windows, projection, ordering, and limits.
	async fn plan_client_side(
		&self,
		select: &SelectStatement,
		units: Vec<TableUnit>,
		ctes: &CteScope,
	) -> Result<SelectPlan> {
		// Scalar subqueries in the projection become generated columns
		// appended by cardinality-asserting subquery nodes.
		let (select_owned, projection_subqueries) = self.extract_projection_subqueries(select);
		let select = &select_owned;
		let base_meta = match units[0].kind {
			UnitKind::Local => Some(self.entity_meta(&units[0].entity, None).await?),
			UnitKind::Remote(ref label) => {
				Some(self.entity_meta(&units[0].entity, Some(label)).await?)
			}
			_ => None,
		};
		let scope = PushScope {
			tables: units.iter().map(|u| (u.binding.clone(), u.entity.clone())).collect(),
			variables: &self.variables,
		};
		let qualified = units.len() > 1;

		// Split the WHERE clause: push per-table conjuncts into the scans,
		// keep the rest for the client.
		let mut pushed: HashMap<String, FetchFilter> = HashMap::new();
		let mut residual: Vec<Condition> = Vec::new();
		if let Some(ref cond) = select.cond {
			for conjunct in cond.conjuncts() {
				if conjunct.contains_subquery() {
					residual.push(conjunct.clone());
					continue;
				}
				match pushdown::push_conjunct(conjunct, &scope) {
					// Only FetchXML-backed tables accept pushed filters;
					// conditions over CTE and metadata sources stay
					// client-side.
					Some(p)
						if units.iter().any(|u| {
							u.binding == p.binding
								&& matches!(u.kind, UnitKind::Local | UnitKind::Remote(_))
						}) =>
					{
						merge_filter(&mut pushed, p.binding, p.filter);
					}
					_ => residual.push(conjunct.clone()),
				}
			}
		}

		// Build each table's scan.
		let mut nodes: Vec<(Node, Vec<String>)> = Vec::new();
		for unit in &units {
			let filter = pushed.remove(&unit.binding);
			let (node, columns) = self.build_unit_scan(unit, filter, qualified).await?;
			nodes.push((node, columns));
		}

		// Fold the join tree left-deep over the base.
		let force_merge = select.hints.contains(&Hint::MergeJoin);
		let mut iter = nodes.into_iter();
		let (mut node, mut left_columns) = iter.next().expect("at least the base table");
		for (unit, (right_node, right_columns)) in units[1..].iter().zip(iter) {
			let join = unit.join.as_ref().expect("joined unit");
			node = self.build_join(
				node,
				&left_columns,
				right_node,
				&right_columns,
				join,
				&units,
				force_merge,
			)?;
			left_columns.extend(right_columns);
		}

		// Residual WHERE: rewrite subquery conditions, compile the rest.
		for condition in residual {
			node = self.apply_residual_condition(node, condition, &scope.tables, ctes).await?;
		}

		// Attach projection scalar subqueries before anything reads their
		// generated columns.
		for (subselect, output) in projection_subqueries {
			let subplan = self.plan_select(&subselect, ctes).await?;
			node = Arc::new(crate::exe::subquery::ScalarSubquery {
				input: node,
				subplan: subplan.node,
				output,
			});
		}

		// Aggregation.
		let aggregate_info = self.analyze_aggregates(select)?;
		let alias_map = aggregate_info
			.as_ref()
			.map(|info| info.alias_map.clone())
			.unwrap_or_default();
		if let Some(ref info) = aggregate_info {
			let env = CompileEnv::new();
			let mut group = Vec::with_capacity(info.group.len());
			for (expr, output) in &info.group {
				group.push(GroupColumn {
					output: output.clone(),
					expr: compile_expr(expr, &env)?,
					display: expr.to_string(),
				});
			}
			let mut aggregates = Vec::with_capacity(info.aggregates.len());
			for (call, output) in &info.aggregates {
				aggregates.push(build_aggregate_expr(call, output, &env)?);
			}
			node = Arc::new(ClientAggregate {
				child: node,
				group_by: group,
				aggregates,
				partial: false,
			});
			if let Some(ref having) = select.having {
				let env = CompileEnv::with_aliases(info.alias_map.clone());
				node = Arc::new(ClientFilter {
					child: node,
					predicate: compile_cond(having, &env)?,
					display: display_with_aliases(having, &info.alias_map),
				});
			}
		}

		// Window functions materialize between filtering and projection.
		let window_columns = collect_windows(select);
		let select_rewritten;
		let select_for_projection = if window_columns.is_empty() {
			select
		} else {
			let env = CompileEnv::new();
			let mut functions = Vec::with_capacity(window_columns.len());
			let mut partition_by = Vec::new();
			let mut order_by = Vec::new();
			for (i, call) in window_columns.iter().enumerate() {
				let over = call.over.clone().unwrap_or_default();
				if i == 0 {
					for expr in &over.partition_by {
						partition_by.push(compile_expr(expr, &env)?);
					}
					for item in &over.order_by {
						order_by.push((compile_expr(&item.expr, &env)?, item.descending));
					}
				}
				let function = match call.name.to_uppercase().as_str() {
					"ROW_NUMBER" => WindowFunction::RowNumber,
					"RANK" => WindowFunction::Rank,
					"DENSE_RANK" => WindowFunction::DenseRank,
					name => {
						let Some(function) = AggregateFunction::from_name(name) else {
							return Err(Error::InvalidStatement {
								message: format!("unknown window function {name}"),
							});
						};
						WindowFunction::Aggregate {
							function,
							arg: call
								.args
								.first()
								.map(|a| compile_expr(a, &env))
								.transpose()?,
						}
					}
				};
				functions.push(WindowColumn {
					function,
					output: format!("win{}", i + 1),
				});
			}
			node = Arc::new(ClientWindow {
				child: node,
				partition_by,
				order_by,
				columns: functions,
			});
			select_rewritten = substitute_windows(select, &window_columns);
			&select_rewritten
		};

		// Projection, DISTINCT, ORDER BY, TOP/OFFSET.
		let placeholder_meta = EntityMetadata::default();
		let meta_ref: &EntityMetadata = base_meta.as_deref().unwrap_or(&placeholder_meta);
		let (mut node, columns) = self
			.build_projection(
				select_for_projection,
				node,
				meta_ref,
				aggregate_info.as_ref(),
				&units,
			)
			.await?;

		if select.distinct {
			node = Arc::new(Distinct {
				child: node,
				key_columns: columns.iter().map(|c| c.name.clone()).collect(),
				case_insensitive: true,
			});
		}
		if !select.order.is_empty() {
			node = self.client_sort(node, &select.order, &alias_map)?;
		}
		let mut take = select.top.or(select.fetch);
		if let Some(Hint::MaxRows(n)) =
			select.hints.iter().find(|h| matches!(h, Hint::MaxRows(_)))
		{
			take = Some(take.map_or(*n, |t| t.min(*n)));
		}
		if let Some(limit) = self.options.max_rows {
			take = Some(take.map_or(limit, |t| t.min(limit)));
		}
		if take.is_some() || select.offset.is_some() {
			node = Arc::new(Limit {
				child: node,
				skip: select.offset,
				take,
			});
		}

		Ok(SelectPlan {
			node,
			columns,
			entity: Some(units[0].entity.clone()),
			fetch: None,
			decoration: None,
		})
	}

	/// Build the scan for one FROM-clause table in a client-side plan,
	/// returning the node and its qualified output column names.
	async fn build_unit_scan(
		&self,
		unit: &TableUnit,
		filter: Option<FetchFilter>,
		qualified: bool,
	) -> Result<(Node, Vec<String>)> {
		let qualify = |name: &str| {
			if qualified {
				format!("{}.{}", unit.binding, name.to_lowercase())
			} else {
				name.to_lowercase()
			}
		};
		match &unit.kind {
			UnitKind::Local | UnitKind::Remote(_) => {
				let environment = match &unit.kind {
					UnitKind::Remote(label) => Some(label.clone()),
					_ => None,
				};
				let meta = self.entity_meta(&unit.entity, environment.as_deref()).await?;
				let mut fetch = FetchXml::for_entity(&unit.entity);
				fetch.entity.all_attributes = true;
				fetch.entity.filter = filter;
				let scan: Node = Arc::new(FetchXmlScan {
					fetch,
					entity: unit.entity.clone(),
					environment: environment.clone(),
					auto_page: true,
					max_rows: None,
					qualify_as: qualified.then(|| unit.binding.clone()),
				});
				// Remote scans are always spooled before joining with
				// local plans; local scans get the prefetcher.
				let node: Node = if environment.is_some() {
					Arc::new(TableSpool::new(scan))
				} else if self.options.prefetch {
					Arc::new(Prefetch {
						child: scan,
						buffer_size: self.options.prefetch_buffer,
					})
				} else {
					scan
				};
				let columns =
					meta.attributes.iter().map(|a| qualify(&a.logical_name)).collect();
				Ok((node, columns))
			}
			UnitKind::Cte(cte) => {
				let node = if qualified {
					self.qualify_node(cte.node.clone(), &cte.columns, &unit.binding)?
				} else {
					cte.node.clone()
				};
				Ok((node, cte.columns.iter().map(|c| qualify(c)).collect()))
			}
			UnitKind::Metadata(table) => {
				let scan: Node = Arc::new(MetadataScan {
					table: *table,
				});
				let names: Vec<String> =
					table.columns().iter().map(|c| c.name.clone()).collect();
				let node = if qualified {
					self.qualify_node(scan, &names, &unit.binding)?
				} else {
					scan
				};
				Ok((node, names.iter().map(|c| qualify(c)).collect()))
			}
		}
	}

	/// Wrap a node so its columns come out prefixed with a binding name,
	/// for client-side joins over CTE and metadata sources.
	fn qualify_node(&self, node: Node, columns: &[String], binding: &str) -> Result<Node> {
		let env = CompileEnv::new();
		let mut projected = Vec::with_capacity(columns.len());
		for name in columns {
			projected.push(ProjectColumn {
				column: Column::new(format!("{}.{}", binding, name.to_lowercase())),
				expr: compile_expr(
					&Expression::Column(ColumnRef::bare(name.clone())),
					&env,
				)?,
				display: name.clone(),
				expand_name: false,
			});
		}
		Ok(Arc::new(Project {
			child: node,
			columns: projected,
		}))
	}

	fn build_join(
		&self,
		left: Node,
		left_columns: &[String],
		right: Node,
		right_columns: &[String],
		join: &Join,
		units: &[TableUnit],
		force_merge: bool,
	) -> Result<Node> {
		let env = CompileEnv::new();
		let left_template = null_template(left_columns);
		let right_template = null_template(right_columns);
		let display = join.on.as_ref().map(|c| c.to_string()).unwrap_or_default();

		if join.kind == JoinKind::Cross {
			return Ok(Arc::new(NestedLoopJoin {
				left,
				right: RightSource::Plan(right),
				predicate: None,
				join_type: NestedJoinType::Cross,
				left_template,
				right_template,
				display,
			}));
		}

		let join_type = match join.kind {
			JoinKind::Inner => JoinType::Inner,
			JoinKind::Left => JoinType::Left,
			JoinKind::Right => JoinType::Right,
			JoinKind::Full => JoinType::Full,
			JoinKind::Cross => unreachable!("handled above"),
		};

		// Split the ON clause into equi-key pairs and a residual.
		let binding = join.table.binding().to_lowercase();
		let mut left_keys = Vec::new();
		let mut right_keys = Vec::new();
		let mut residual = Vec::new();
		if let Some(ref on) = join.on {
			for conjunct in on.conjuncts() {
				match equi_key(conjunct, &binding, units) {
					Some((left_expr, right_expr)) => {
						left_keys.push(compile_expr(&left_expr, &env)?);
						right_keys.push(compile_expr(&right_expr, &env)?);
					}
					None => residual.push(conjunct.clone()),
				}
			}
		}

		if left_keys.is_empty() {
			// No equi keys: nested loop with the whole ON as predicate.
			let predicate = join.on.as_ref().map(|on| compile_cond(on, &env)).transpose()?;
			let join_type = match join_type {
				JoinType::Inner => NestedJoinType::Inner,
				JoinType::Left => NestedJoinType::Left,
				JoinType::Right => NestedJoinType::Right,
				_ => NestedJoinType::Full,
			};
			return Ok(Arc::new(NestedLoopJoin {
				left,
				right: RightSource::Plan(right),
				predicate,
				join_type,
				left_template,
				right_template,
				display,
			}));
		}

		let residual_cond = Condition::conjoin(residual);
		let residual = residual_cond.as_ref().map(|c| compile_cond(c, &env)).transpose()?;

		// The MERGE JOIN hint forces sorted inputs and a merge walk; hash
		// join is the default.
		if force_merge && residual.is_none() {
			let sort_on = |node: Node, keys: &[crate::exp::CompiledExpr]| -> Node {
				Arc::new(Sort {
					child: node,
					keys: keys
						.iter()
						.map(|k| SortKey {
							expr: k.clone(),
							descending: false,
							display: "join key".to_owned(),
						})
						.collect(),
				})
			};
			return Ok(Arc::new(MergeJoin {
				left: sort_on(left, &left_keys),
				right: sort_on(right, &right_keys),
				left_keys,
				right_keys,
				join_type,
				left_template,
				right_template,
				display,
			}));
		}
		Ok(Arc::new(HashJoin {
			left,
			right,
			left_keys,
			right_keys,
			residual,
			join_type,
			left_template,
			right_template,
			display,
		}))
	}
}

/// Walk an expression collecting aggregate calls not wrapped in an OVER
/// clause.
fn collect_aggregates(expr: &Expression, collect: &mut impl FnMut(&FunctionCall, Option<&String>)) {
	match expr {
		Expression::Function(call) => {
			if is_aggregate_name(&call.name) && call.over.is_none() {
				collect(call, None);
			} else {
				for arg in &call.args {
					collect_aggregates(arg, collect);
				}
			}
		}
		Expression::Binary {
			left,
			right,
			..
		} => {
			collect_aggregates(left, collect);
			collect_aggregates(right, collect);
		}
		Expression::Unary {
			expr,
			..
		} => collect_aggregates(expr, collect),
		Expression::Cast {
			expr,
			..
		} => collect_aggregates(expr, collect),
		Expression::Case(case) => match case.as_ref() {
			crate::sql::CaseExpression::Searched {
				branches,
				otherwise,
			} => {
				for (cond, then) in branches {
					collect_aggregates_cond(cond, collect);
					collect_aggregates(then, collect);
				}
				if let Some(e) = otherwise {
					collect_aggregates(e, collect);
				}
			}
			crate::sql::CaseExpression::Simple {
				operand,
				branches,
				otherwise,
			} => {
				collect_aggregates(operand, collect);
				for (value, then) in branches {
					collect_aggregates(value, collect);
					collect_aggregates(then, collect);
				}
				if let Some(e) = otherwise {
					collect_aggregates(e, collect);
				}
			}
		},
		_ => {}
	}
}

fn collect_aggregates_cond(
	condition: &Condition,
	collect: &mut impl FnMut(&FunctionCall, Option<&String>),
) {
	match condition {
		Condition::Comparison {
			left,
			right,
			..
		} => {
			collect_aggregates(left, collect);
			collect_aggregates(right, collect);
		}
		Condition::Like {
			expr,
			pattern,
			..
		} => {
			collect_aggregates(expr, collect);
			collect_aggregates(pattern, collect);
		}
		Condition::Null {
			expr,
			..
		} => collect_aggregates(expr, collect),
		Condition::In {
			expr,
			list,
			..
		} => {
			collect_aggregates(expr, collect);
			for item in list {
				collect_aggregates(item, collect);
			}
		}
		Condition::Between {
			expr,
			low,
			high,
			..
		} => {
			collect_aggregates(expr, collect);
			collect_aggregates(low, collect);
			collect_aggregates(high, collect);
		}
		Condition::And(a, b) | Condition::Or(a, b) => {
			collect_aggregates_cond(a, collect);
			collect_aggregates_cond(b, collect);
		}
		Condition::Not(inner) => collect_aggregates_cond(inner, collect),
		Condition::Expr(expr) => collect_aggregates(expr, collect),
		_ => {}
	}
}

/// Build a null-filled template row from a column name list.
fn null_template(columns: &[String]) -> crate::sql::Row {
	columns.iter().map(|c| (c.clone(), crate::sql::Value::Null)).collect()
}

/// Extract the FetchXML link attributes of a pushable join: a single ON
/// equality between a column of the joined table (`from`) and a column of
/// an earlier table (`to`).
fn extract_link_keys(join: &Join, units: &[TableUnit]) -> Option<(String, String)> {
	let on = join.on.as_ref()?;
	let conjuncts = on.conjuncts();
	let [conjunct] = conjuncts.as_slice() else {
		return None;
	};
	let binding = join.table.binding().to_lowercase();
	let (outer_expr, inner_expr) = equi_key(conjunct, &binding, units)?;
	let from = inner_expr.as_column()?.column.clone();
	let to = outer_expr.as_column()?.column.clone();
	Some((from, to))
}

/// Extract an equi-join key pair from one ON conjunct: a column equality
/// where one side belongs to the newly joined binding and the other to an
/// earlier table. Returns (left-side, right-side) expressions.
fn equi_key(
	condition: &Condition,
	right_binding: &str,
	units: &[TableUnit],
) -> Option<(Expression, Expression)> {
	let Condition::Comparison {
		op: crate::sql::ComparisonOperator::Eq,
		left,
		right,
	} = condition
	else {
		return None;
	};
	let left_column = left.as_column()?;
	let right_column = right.as_column()?;
	let belongs = |column: &ColumnRef, binding: &str| {
		column
			.table
			.as_ref()
			.is_some_and(|t| t.eq_ignore_ascii_case(binding))
	};
	let known = |column: &ColumnRef| {
		column.table.as_ref().is_some_and(|t| {
			units.iter().any(|u| u.binding.eq_ignore_ascii_case(t))
		})
	};
	if belongs(right_column, right_binding) && known(left_column) {
		return Some((left.clone(), right.clone()));
	}
	if belongs(left_column, right_binding) && known(right_column) {
		return Some((right.clone(), left.clone()));
	}
	None
}

/// The FetchXML link attributes referenced through a binding in the
/// projection and ordering.
fn linked_attributes(select: &SelectStatement, binding: &str) -> Vec<FetchAttribute> {
	let mut out: Vec<FetchAttribute> = Vec::new();
	let mut add = |column: &ColumnRef| {
		if column.table.as_ref().is_some_and(|t| t.eq_ignore_ascii_case(binding))
			&& !out.iter().any(|a| a.name == column.column)
		{
			out.push(FetchAttribute::named(&column.column));
		}
	};
	for item in &select.columns {
		if let SelectColumn::Expr {
			expr,
			..
		} = item
		{
			walk_columns(expr, &mut add);
		}
	}
	for item in &select.order {
		walk_columns(&item.expr, &mut add);
	}
	out
}

pub(crate) fn walk_columns(expr: &Expression, add: &mut impl FnMut(&ColumnRef)) {
	match expr {
		Expression::Column(column) => add(column),
		Expression::Binary {
			left,
			right,
			..
		} => {
			walk_columns(left, add);
			walk_columns(right, add);
		}
		Expression::Unary {
			expr,
			..
		} => walk_columns(expr, add),
		Expression::Function(call) => {
			for arg in &call.args {
				walk_columns(arg, add);
			}
		}
		Expression::Cast {
			expr,
			..
		} => walk_columns(expr, add),
		_ => {}
	}
}

fn merge_filter(filters: &mut HashMap<String, FetchFilter>, binding: String, new: FetchFilter) {
	match filters.get_mut(&binding) {
		Some(existing) => {
			if new.kind == "and" && new.filters.is_empty() {
				existing.conditions.extend(new.conditions);
			} else {
				existing.filters.push(new);
			}
		}
		None => {
			let filter = if new.kind == "and" {
				new
			} else {
				let mut wrapper = FetchFilter::and();
				wrapper.filters.push(new);
				wrapper
			};
			filters.insert(binding, filter);
		}
	}
}

/// Collect the distinct window-function calls of a projection, in
/// encounter order.
fn collect_windows(select: &SelectStatement) -> Vec<FunctionCall> {
	let mut out: Vec<FunctionCall> = Vec::new();
	for item in &select.columns {
		if let SelectColumn::Expr {
			expr,
			..
		} = item
		{
			collect_windows_expr(expr, &mut out);
		}
	}
	out
}

fn collect_windows_expr(expr: &Expression, out: &mut Vec<FunctionCall>) {
	match expr {
		Expression::Function(call) if call.over.is_some() => {
			if !out.iter().any(|c| c == call) {
				out.push(call.clone());
			}
		}
		Expression::Binary {
			left,
			right,
			..
		} => {
			collect_windows_expr(left, out);
			collect_windows_expr(right, out);
		}
		Expression::Unary {
			expr,
			..
		} => collect_windows_expr(expr, out),
		Expression::Cast {
			expr,
			..
		} => collect_windows_expr(expr, out),
		_ => {}
	}
}

/// Rewrite a SELECT so each window call becomes a reference to the window
/// node's output column.
fn substitute_windows(select: &SelectStatement, windows: &[FunctionCall]) -> SelectStatement {
	let mut out = select.clone();
	for item in &mut out.columns {
		if let SelectColumn::Expr {
			expr,
			..
		} = item
		{
			*expr = substitute_window_expr(expr, windows);
		}
	}
	out
}

fn substitute_window_expr(expr: &Expression, windows: &[FunctionCall]) -> Expression {
	if let Expression::Function(call) = expr {
		if let Some(i) = windows.iter().position(|c| c == call) {
			return Expression::Column(ColumnRef::bare(format!("win{}", i + 1)));
		}
	}
	match expr {
		Expression::Binary {
			op,
			left,
			right,
		} => Expression::Binary {
			op: *op,
			left: Box::new(substitute_window_expr(left, windows)),
			right: Box::new(substitute_window_expr(right, windows)),
		},
		Expression::Unary {
			op,
			expr,
		} => Expression::Unary {
			op: *op,
			expr: Box::new(substitute_window_expr(expr, windows)),
		},
		Expression::Cast {
			expr,
			to,
		} => Expression::Cast {
			expr: Box::new(substitute_window_expr(expr, windows)),
			to: *to,
		},
		other => other.clone(),
	}
}

/// Rewrite an expression after aggregation: group expressions become
/// references to their output columns. Aggregate calls are left in place
/// for the alias map to resolve at compile time.
fn substitute_aggregates(expr: &Expression, info: &AggregateInfo) -> Expression {
	for (group_expr, output) in &info.group {
		if expr == group_expr {
			return Expression::Column(ColumnRef::bare(output.clone()));
		}
	}
	match expr {
		Expression::Binary {
			op,
			left,
			right,
		} => Expression::Binary {
			op: *op,
			left: Box::new(substitute_aggregates(left, info)),
			right: Box::new(substitute_aggregates(right, info)),
		},
		Expression::Unary {
			op,
			expr,
		} => Expression::Unary {
			op: *op,
			expr: Box::new(substitute_aggregates(expr, info)),
		},
		Expression::Cast {
			expr,
			to,
		} => Expression::Cast {
			expr: Box::new(substitute_aggregates(expr, info)),
			to: *to,
		},
		other => other.clone(),
	}
}

/// Compile one aggregate call into its executor form.
pub(crate) fn build_aggregate_expr(
	call: &FunctionCall,
	output: &str,
	env: &CompileEnv,
) -> Result<AggregateExpr> {
	let Some(function) = AggregateFunction::from_name(&call.name) else {
		return Err(Error::InvalidStatement {
			message: format!("{} is not an aggregate function", call.name),
		});
	};
	let arg = if call.star {
		None
	} else {
		call.args.first().map(|a| compile_expr(a, env)).transpose()?
	};
	Ok(AggregateExpr {
		function,
		arg,
		distinct: call.distinct,
		output: output.to_owned(),
		display: call.to_string(),
	})
}

/// Render a HAVING condition with aggregate calls replaced by their output
/// aliases, so EXPLAIN shows `cnt > 1` rather than `COUNT(*) > 1`.
fn display_with_aliases(condition: &Condition, aliases: &AliasMap) -> String {
	let mut text = condition.to_string();
	// Alias substitution on the printed form: signatures print in their
	// canonical shape, so a textual replace is faithful.
	for (signature, output) in aliases_iter(aliases) {
		let printed = signature.to_uppercase().replace(", ", ", ");
		text = replace_case_insensitive(&text, &printed, &output);
	}
	text
}

fn aliases_iter(map: &AliasMap) -> Vec<(String, String)> {
	// AliasMap is intentionally opaque elsewhere; EXPLAIN rendering is the
	// one consumer that needs the pairs.
	map.pairs()
}

fn replace_case_insensitive(text: &str, needle: &str, replacement: &str) -> String {
	let lower_text = text.to_lowercase();
	let lower_needle = needle.to_lowercase();
	let mut out = String::with_capacity(text.len());
	let mut pos = 0;
	while let Some(found) = lower_text[pos..].find(&lower_needle) {
		let at = pos + found;
		out.push_str(&text[pos..at]);
		out.push_str(replacement);
		pos = at + needle.len();
	}
	out.push_str(&text[pos..]);
	out
}
