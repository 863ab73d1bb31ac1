//! End-to-end aggregation: push-down, alias resolution in HAVING and ORDER
//! BY, the count fast path, and the partitioned fallback around the
//! backend's aggregate record ceiling.

mod common;

use common::{account, account_owned, date, fixture, fixture_with, owner, salesorder};
use fetchql_core::backend::mem::MemBackend;
use fetchql_core::dbs::Request;
use fetchql_core::sql::Value;
use uuid::Uuid;

#[tokio::test]
async fn having_and_order_resolve_aggregate_aliases() {
	let fx = fixture();
	let a = owner("A", Uuid::new_v4());
	let b = owner("B", Uuid::new_v4());
	let c = owner("C", Uuid::new_v4());
	let mut rows = Vec::new();
	for (who, count) in [(&a, 3), (&b, 1), (&c, 2)] {
		for i in 0..count {
			rows.push(account_owned(&format!("r{i}"), Some(i), (*who).clone()));
		}
	}
	fx.backend.insert_rows("account", rows);

	let response = fx
		.service
		.execute(Request::new(
			"SELECT ownerid, COUNT(*) AS cnt FROM account GROUP BY ownerid \
			 HAVING COUNT(*) > 1 ORDER BY cnt DESC",
		))
		.await;
	let result = response.result.unwrap();
	let got: Vec<(String, i64)> = result
		.rows
		.iter()
		.map(|r| {
			let name = r.get("owneridname").unwrap().as_string();
			let cnt = r.get("cnt").unwrap().as_i64().unwrap();
			(name, cnt)
		})
		.collect();
	assert_eq!(got, vec![("A".to_owned(), 3), ("C".to_owned(), 2)]);
	// The aggregate was pushed down, not recomputed client-side.
	let xml = result.executed_fetch_xml.unwrap();
	assert!(xml.contains(r#"aggregate="true""#), "{xml}");
	assert!(xml.contains(r#"groupby="true""#), "{xml}");
}

#[tokio::test]
async fn count_star_uses_the_fast_path() {
	let fx = fixture();
	fx.backend.insert_rows("account", (0..42).map(|i| account(&format!("a{i}"), None)).collect());
	let response = fx.service.execute(Request::new("SELECT COUNT(*) FROM account")).await;
	let result = response.result.unwrap();
	assert_eq!(result.rows[0].get("count"), Some(&Value::BigInt(42)));
	// The fast RPC answered; no FetchXML was issued.
	assert!(fx.backend.issued_fetch_xml().is_empty());
}

#[tokio::test]
async fn count_star_falls_back_to_aggregate_fetchxml() {
	let fx = fixture();
	fx.backend.insert_rows("account", (0..7).map(|i| account(&format!("a{i}"), None)).collect());
	fx.backend.fail_total_record_count(true);
	let response =
		fx.service.execute(Request::new("SELECT COUNT(*) AS total FROM account")).await;
	let result = response.result.unwrap();
	assert_eq!(result.rows[0].get("total"), Some(&Value::BigInt(7)));
	let issued = fx.backend.issued_fetch_xml();
	assert!(issued.iter().any(|xml| xml.contains(r#"aggregate="true""#)));
}

#[tokio::test]
async fn dategrouping_folds_into_fetchxml() {
	let fx = fixture();
	let mut rows = Vec::new();
	for (when, revenue) in [
		("2023-03-01T00:00:00Z", 10),
		("2023-06-01T00:00:00Z", 20),
		("2024-01-15T00:00:00Z", 30),
	] {
		let mut row = account("x", Some(revenue));
		row.set("createdon", Value::DateTime(date(when)));
		rows.push(row);
	}
	fx.backend.insert_rows("account", rows);
	let response = fx
		.service
		.execute(Request::new(
			"SELECT YEAR(createdon) AS yr, COUNT(*) AS cnt FROM account \
			 GROUP BY YEAR(createdon) ORDER BY yr",
		))
		.await;
	let result = response.result.unwrap();
	let got: Vec<(i64, i64)> = result
		.rows
		.iter()
		.map(|r| {
			(
				r.get("yr").unwrap().as_i64().unwrap(),
				r.get("cnt").unwrap().as_i64().unwrap(),
			)
		})
		.collect();
	assert_eq!(got, vec![(2023, 2), (2024, 1)]);
	let xml = result.executed_fetch_xml.unwrap();
	assert!(xml.contains(r#"dategrouping="year""#), "{xml}");
}

#[tokio::test]
async fn aggregate_limit_triggers_partitioned_retry_with_weighted_avg() {
	// 100 orders averaging 10 in the first half of the year, 300 orders
	// averaging 20 in the second half. The single-scan aggregate trips the
	// lowered ceiling; the partitioned retry must produce the weighted
	// average 17.5, not the average of averages 15.
	let backend = MemBackend::new().with_aggregate_limit(Some(350));
	let fx = fixture_with(backend, 2);
	let mut rows = Vec::new();
	for _ in 0..100 {
		rows.push(salesorder(10, date("2024-02-01T00:00:00Z")));
	}
	for _ in 0..300 {
		rows.push(salesorder(20, date("2024-10-01T00:00:00Z")));
	}
	fx.backend.insert_rows("salesorder", rows);

	let response = fx
		.service
		.execute(Request::new(
			"SELECT AVG(revenue) AS avg_revenue FROM salesorder \
			 WHERE createdon >= '2024-01-01' AND createdon <= '2024-12-31'",
		))
		.await;
	let result = response.result.unwrap();
	let Value::Float(avg) = result.rows[0].get("avg_revenue").cloned().unwrap() else {
		panic!("expected a float average");
	};
	assert!((avg - 17.5).abs() < 1e-9, "got {avg}");
	// More than one aggregate FetchXML was issued: the failed single scan
	// plus one per partition.
	let aggregates = fx
		.backend
		.issued_fetch_xml()
		.iter()
		.filter(|xml| xml.contains(r#"aggregate="true""#))
		.count();
	assert!(aggregates >= 3, "issued {aggregates} aggregate documents");
}

#[tokio::test]
async fn partitioned_aggregates_match_single_scan_for_sums() {
	let backend = MemBackend::new().with_aggregate_limit(Some(60));
	let fx = fixture_with(backend, 4);
	let mut rows = Vec::new();
	let mut expected_sum = 0i64;
	for i in 0..200 {
		let month = (i % 12) + 1;
		let when = date(&format!("2024-{month:02}-03T00:00:00Z"));
		rows.push(salesorder(i, when));
		expected_sum += i;
	}
	fx.backend.insert_rows("salesorder", rows);
	let response = fx
		.service
		.execute(Request::new(
			"SELECT COUNT(*) AS cnt, SUM(revenue) AS total, MIN(revenue) AS low, \
			 MAX(revenue) AS high FROM salesorder \
			 WHERE createdon >= '2024-01-01' AND createdon <= '2024-12-31'",
		))
		.await;
	let result = response.result.unwrap();
	let row = &result.rows[0];
	assert_eq!(row.get("cnt").unwrap().as_i64().unwrap(), 200);
	assert_eq!(row.get("total").unwrap().as_i64().unwrap(), expected_sum);
	assert_eq!(row.get("low").unwrap().as_i64().unwrap(), 0);
	assert_eq!(row.get("high").unwrap().as_i64().unwrap(), 199);
}

#[tokio::test]
async fn stdev_partitions_through_sufficient_statistics() {
	// Variance aggregates cannot be pushed as FetchXML, so the partitioned
	// plan scans raw rows and recombines sufficient statistics. The merged
	// result must equal the single-pass value.
	let backend = MemBackend::new().with_aggregate_limit(Some(12));
	let fx = fixture_with(backend, 2);
	let values = [2i64, 4, 4, 4, 5, 5, 7, 9, 1, 3, 8, 6, 2, 9, 4, 7];
	let mut rows = Vec::new();
	for (i, v) in values.iter().enumerate() {
		let month = (i % 12) + 1;
		rows.push(salesorder(*v, date(&format!("2024-{month:02}-10T00:00:00Z"))));
	}
	fx.backend.insert_rows("salesorder", rows);

	let n = values.len() as f64;
	let mean = values.iter().sum::<i64>() as f64 / n;
	let expected =
		(values.iter().map(|v| (*v as f64 - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();

	let response = fx
		.service
		.execute(Request::new(
			"SELECT STDEV(revenue) AS sd FROM salesorder \
			 WHERE createdon >= '2024-01-01' AND createdon <= '2024-12-31'",
		))
		.await;
	let result = response.result.unwrap();
	let Value::Float(sd) = result.rows[0].get("sd").cloned().unwrap() else {
		panic!("expected a float");
	};
	assert!((sd - expected).abs() < 1e-9, "got {sd}, expected {expected}");
}

#[tokio::test]
async fn hash_group_hint_forces_client_aggregation() {
	let fx = fixture();
	fx.backend.insert_rows("account", vec![account("a", Some(1)), account("b", Some(2))]);
	let explain = fx
		.service
		.explain("SELECT COUNT(*) AS cnt, SUM(revenue) AS total FROM account WHERE revenue > 0 OPTION (HASH GROUP)")
		.await
		.unwrap();
	assert!(explain.text.contains("ClientAggregate"), "{}", explain.text);
}
