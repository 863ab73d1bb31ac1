//! Aggregate partitioning: splitting an aggregate query into disjoint date
//! ranges executed concurrently, to work around the backend's 50,000-row
//! aggregate ceiling.

use crate::err::Result;
use crate::exe::aggregate::{
	AggregateFunction, ClientAggregate, MergeAggregate, MergeColumn, MergeKind,
};
use crate::exe::filter::ClientFilter;
use crate::exe::limit::Limit;
use crate::exe::parallel::ParallelPartition;
use crate::exe::scan::FetchXmlScan;
use crate::exe::Node;
use crate::exp::{compile_cond, CompileEnv};
use crate::plan::fetchxml::{FetchAttribute, FetchCondition, FetchFilter, FetchXml};
use crate::plan::pushdown::{self, PushScope};
use crate::plan::select::build_aggregate_expr;
use crate::plan::{PlanResult, Planner, SafetyVerdict};
use crate::sql::{Hint, SelectStatement};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

/// Splits a date interval into N disjoint, covering subranges.
#[derive(Clone, Debug)]
pub struct DateRangePartitioner {
	pub column: String,
	pub start: DateTime<Utc>,
	pub end: DateTime<Utc>,
}

impl DateRangePartitioner {
	/// The subrange boundaries: `n` half-open `[from, to)` intervals whose
	/// union is `[start, end)`.
	pub fn split(&self, n: usize) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
		let n = n.max(1);
		let total = (self.end - self.start).num_seconds().max(1);
		let step = (total / n as i64).max(1);
		let mut out = Vec::with_capacity(n);
		let mut from = self.start;
		for i in 0..n {
			let to = if i + 1 == n {
				self.end
			} else {
				from + Duration::seconds(step)
			};
			if from >= self.end {
				break;
			}
			out.push((from, to.min(self.end)));
			from = to;
		}
		out
	}
}

impl Planner {
	/// Build the partitioned form of an aggregate SELECT: per-subrange
	/// scans under a bounded parallel executor, combined by a merge
	/// aggregate. `None` when the statement's shape cannot partition.
	pub async fn plan_select_partitioned(
		&self,
		select: &SelectStatement,
	) -> Result<Option<PlanResult>> {
		let Some(ref from) = select.from else {
			return Ok(None);
		};
		if !select.joins.is_empty()
			|| from.is_remote()
			|| from.schema.as_deref() == Some("metadata")
			|| !select.ctes.is_empty()
		{
			return Ok(None);
		}
		let Some(info) = self.analyze_aggregates(select)? else {
			return Ok(None);
		};
		let meta = self.entity_meta(&from.entity, None).await?;
		let scope = PushScope {
			tables: vec![(from.binding().to_lowercase(), from.entity.clone())],
			variables: &self.variables,
		};

		// The WHERE clause must push in full; its bounds on a date column
		// also pick the partitioning column.
		let mut filter = FetchFilter::and();
		let mut bounds: Option<(String, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> = None;
		if let Some(ref cond) = select.cond {
			for conjunct in cond.conjuncts() {
				let Some(pushed) = pushdown::push_conjunct(conjunct, &scope) else {
					return Ok(None);
				};
				for condition in &pushed.filter.conditions {
					note_date_bound(&mut bounds, condition, &meta);
				}
				if pushed.filter.kind == "and" && pushed.filter.filters.is_empty() {
					filter.conditions.extend(pushed.filter.conditions);
				} else {
					filter.filters.push(pushed.filter);
				}
			}
		}
		let (column, start, end) = match bounds {
			Some((column, start, end)) => (
				column,
				start.unwrap_or_else(default_start),
				end.unwrap_or_else(default_end),
			),
			None => {
				let Some(column) = meta.partition_date_attribute() else {
					return Ok(None);
				};
				(column.to_owned(), default_start(), default_end())
			}
		};

		// Groupings must fold; aggregates decide the partition flavor.
		let mut group_attributes = Vec::with_capacity(info.group.len());
		for (expr, output) in &info.group {
			let Some((source, dategrouping)) = pushdown::fold_group(expr) else {
				return Ok(None);
			};
			group_attributes.push(FetchAttribute {
				name: source,
				alias: Some(output.clone()),
				aggregate: None,
				groupby: true,
				dategrouping,
			});
		}
		let all_pushable = info
			.aggregates
			.iter()
			.all(|(call, _)| {
				pushdown::push_aggregate(call, &meta.primary_id_attribute).is_some()
			});

		let parallelism = {
			let capacity = self.options.pool_capacity.unwrap_or(self.pool_capacity);
			let mut clamp = self.options.max_parallelism;
			if let Some(Hint::MaxDop(n)) =
				select.hints.iter().find(|h| matches!(h, Hint::MaxDop(_)))
			{
				let n = *n as usize;
				clamp = Some(clamp.map_or(n, |c| c.min(n)));
			}
			clamp.map_or(capacity, |c| capacity.min(c)).max(1)
		};
		let partitioner = DateRangePartitioner {
			column: column.clone(),
			start,
			end,
		};
		let ranges = partitioner.split(parallelism);

		let mut merge_columns = Vec::with_capacity(info.aggregates.len());
		let mut partitions: Vec<Node> = Vec::with_capacity(ranges.len());

		if all_pushable {
			// Push the aggregate FetchXML per partition, with a companion
			// count injected for every AVG so the merge can weight it.
			let mut fetch = FetchXml::for_entity(&from.entity);
			fetch.aggregate = true;
			fetch.no_lock = select.hints.contains(&Hint::NoLock);
			fetch.entity.attributes = group_attributes.clone();
			for (call, output) in &info.aggregates {
				let (source, operation) = pushdown::push_aggregate(call, &meta.primary_id_attribute)
					.expect("checked pushable above");
				let function =
					AggregateFunction::from_name(&call.name).expect("recognized aggregate");
				let kind = match function {
					AggregateFunction::Count | AggregateFunction::CountBig => {
						MergeKind::CountSum
					}
					AggregateFunction::Sum => MergeKind::Sum,
					AggregateFunction::Min => MergeKind::Min,
					AggregateFunction::Max => MergeKind::Max,
					AggregateFunction::Avg => {
						let count_column = format!("{output}xn");
						fetch.entity.attributes.push(FetchAttribute {
							name: source.clone(),
							alias: Some(count_column.clone()),
							aggregate: Some("countcolumn".to_owned()),
							groupby: false,
							dategrouping: None,
						});
						MergeKind::WeightedAvg {
							count_column,
						}
					}
					_ => unreachable!("variance aggregates are not pushable"),
				};
				fetch.entity.attributes.push(FetchAttribute {
					name: source,
					alias: Some(output.clone()),
					aggregate: Some(operation),
					groupby: false,
					dategrouping: None,
				});
				merge_columns.push(MergeColumn {
					output: output.clone(),
					kind,
				});
			}
			for (range_start, range_end) in &ranges {
				let mut partition_fetch = fetch.clone();
				let mut partition_filter = filter.clone();
				inject_range(&mut partition_filter, &column, *range_start, *range_end);
				partition_fetch.entity.filter = Some(partition_filter);
				partitions.push(Arc::new(FetchXmlScan {
					fetch: partition_fetch,
					entity: from.entity.clone(),
					environment: None,
					auto_page: false,
					max_rows: None,
					qualify_as: None,
				}));
			}
		} else {
			// Variance-family or distinct aggregates: raw per-partition
			// scans with client aggregation emitting sufficient
			// statistics.
			let env = CompileEnv::new();
			for (call, output) in &info.aggregates {
				let function =
					AggregateFunction::from_name(&call.name).unwrap_or(AggregateFunction::Count);
				let kind = match function {
					AggregateFunction::Count | AggregateFunction::CountBig => {
						MergeKind::CountSum
					}
					AggregateFunction::Sum => MergeKind::Sum,
					AggregateFunction::Min => MergeKind::Min,
					AggregateFunction::Max => MergeKind::Max,
					AggregateFunction::Avg => MergeKind::WeightedAvg {
						count_column: format!("{output}$count"),
					},
					f => MergeKind::Variance {
						count_column: format!("{output}$count"),
						sum_column: format!("{output}$sum"),
						sumsq_column: format!("{output}$sumsq"),
						population: matches!(
							f,
							AggregateFunction::StdevP | AggregateFunction::VarP
						),
						stdev: matches!(
							f,
							AggregateFunction::Stdev | AggregateFunction::StdevP
						),
					},
				};
				merge_columns.push(MergeColumn {
					output: output.clone(),
					kind,
				});
			}
			for (range_start, range_end) in &ranges {
				let mut fetch = FetchXml::for_entity(&from.entity);
				fetch.entity.all_attributes = true;
				let mut partition_filter = filter.clone();
				inject_range(&mut partition_filter, &column, *range_start, *range_end);
				fetch.entity.filter = Some(partition_filter);
				let scan: Node = Arc::new(FetchXmlScan {
					fetch,
					entity: from.entity.clone(),
					environment: None,
					auto_page: true,
					max_rows: None,
					qualify_as: None,
				});
				let mut group = Vec::with_capacity(info.group.len());
				for (expr, output) in &info.group {
					group.push(crate::exe::aggregate::GroupColumn {
						output: output.clone(),
						expr: crate::exp::compile_expr(expr, &env)?,
						display: expr.to_string(),
					});
				}
				let mut aggregates = Vec::with_capacity(info.aggregates.len());
				for (call, output) in &info.aggregates {
					aggregates.push(build_aggregate_expr(call, output, &env)?);
				}
				partitions.push(Arc::new(ClientAggregate {
					child: scan,
					group_by: group,
					aggregates,
					partial: true,
				}));
			}
		}

		let group_outputs: Vec<String> = info.group.iter().map(|(_, o)| o.clone()).collect();
		let mut node: Node = Arc::new(MergeAggregate {
			child: Arc::new(ParallelPartition {
				partitions,
				max_parallelism: Some(parallelism),
			}),
			group_by: group_outputs,
			columns: merge_columns,
		});

		// The post-aggregate pipeline matches the unpartitioned plan.
		if let Some(ref having) = select.having {
			let env = CompileEnv::with_aliases(info.alias_map.clone());
			node = Arc::new(ClientFilter {
				child: node,
				predicate: compile_cond(having, &env)?,
				display: having.to_string(),
			});
		}
		let units = vec![self.resolve_table(from, &crate::plan::select::CteScope::default(), None)?];
		let (mut node, columns) =
			self.build_projection(select, node, &meta, Some(&info), &units).await?;
		if !select.order.is_empty() {
			node = self.client_sort(node, &select.order, &info.alias_map)?;
		}
		if select.top.is_some() || select.offset.is_some() {
			node = Arc::new(Limit {
				child: node,
				skip: select.offset,
				take: select.fetch.or(select.top),
			});
		}

		tracing::debug!(
			entity = %from.entity,
			partitions = ranges.len(),
			column = %column,
			"planned partitioned aggregate",
		);
		Ok(Some(PlanResult {
			root: node,
			label: "SELECT".to_owned(),
			columns,
			entity: Some(from.entity.clone()),
			fetch_xml: None,
			safety: SafetyVerdict::Ok,
			decoration: Some(self.partition_decoration(parallelism)),
		}))
	}
}

fn default_start() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).single().expect("epoch is valid")
}

fn default_end() -> DateTime<Utc> {
	Utc::now() + Duration::days(1)
}

/// Record WHERE bounds on a datetime attribute so partitioning reuses the
/// user's own range.
fn note_date_bound(
	bounds: &mut Option<(String, Option<DateTime<Utc>>, Option<DateTime<Utc>>)>,
	condition: &FetchCondition,
	meta: &crate::meta::EntityMetadata,
) {
	let Some(attribute) = meta.attribute(&condition.attribute) else {
		return;
	};
	if attribute.kind != crate::sql::Kind::DateTime {
		return;
	}
	let Some(parsed) = condition.value.as_deref().and_then(crate::exp::cast::parse_datetime)
	else {
		return;
	};
	let entry = bounds.get_or_insert((condition.attribute.clone(), None, None));
	if entry.0 != condition.attribute {
		return;
	}
	match condition.operator.as_str() {
		"ge" | "gt" | "on-or-after" => entry.1 = Some(parsed),
		// Partition ranges are half-open; widen inclusive upper bounds by
		// a second so boundary rows stay covered. The user's own filter
		// still applies inside every partition.
		"le" | "on-or-before" => entry.2 = Some(parsed + Duration::seconds(1)),
		"lt" => entry.2 = Some(parsed),
		_ => {}
	}
}

fn inject_range(
	filter: &mut FetchFilter,
	column: &str,
	start: DateTime<Utc>,
	end: DateTime<Utc>,
) {
	filter.conditions.push(FetchCondition::new(
		column,
		"ge",
		Some(start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
	));
	filter.conditions.push(FetchCondition::new(
		column,
		"lt",
		Some(end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
	));
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn split_covers_the_range_without_overlap() {
		let partitioner = DateRangePartitioner {
			column: "createdon".into(),
			start: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
			end: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
		};
		let ranges = partitioner.split(4);
		assert_eq!(ranges.len(), 4);
		assert_eq!(ranges[0].0, partitioner.start);
		assert_eq!(ranges[3].1, partitioner.end);
		for pair in ranges.windows(2) {
			assert_eq!(pair[0].1, pair[1].0);
		}
	}

	#[test]
	fn split_of_one_is_the_whole_range() {
		let partitioner = DateRangePartitioner {
			column: "createdon".into(),
			start: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
			end: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
		};
		let ranges = partitioner.split(1);
		assert_eq!(ranges, vec![(partitioner.start, partitioner.end)]);
	}
}
