//! End-to-end SELECT behavior over the in-memory backend.

mod common;

use common::{account, account_owned, fixture, owner, product};
use fetchql_core::dbs::Request;
use fetchql_core::err::ErrorCode;
use fetchql_core::sql::Value;
use futures::TryStreamExt;
use uuid::Uuid;

#[tokio::test]
async fn simple_select_pushes_down_and_projects() {
	let fx = fixture();
	fx.backend.insert_rows(
		"account",
		vec![account("Contoso", Some(1500)), account("Fabrikam", Some(500))],
	);
	let response = fx
		.service
		.execute(Request::new("SELECT name FROM account WHERE revenue > 1000"))
		.await;
	let result = response.result.unwrap();
	assert_eq!(result.rows.len(), 1);
	assert_eq!(result.rows[0].get("name"), Some(&Value::from("Contoso")));
	// The filter travelled to the backend.
	let xml = result.executed_fetch_xml.unwrap();
	assert!(xml.contains(r#"operator="gt""#), "{xml}");
}

#[tokio::test]
async fn top_emits_count_never_top_attribute() {
	let fx = fixture();
	fx.backend.insert_rows("account", (0..10).map(|i| account(&format!("a{i}"), None)).collect());
	let response = fx
		.service
		.execute(Request::new("SELECT TOP 100 accountid, name, createdon FROM account"))
		.await;
	response.result.unwrap();
	let issued = fx.backend.issued_fetch_xml();
	assert!(!issued.is_empty());
	assert!(issued[0].contains(r#"count="100""#), "{}", issued[0]);
	assert!(!issued[0].contains("top="), "{}", issued[0]);
}

#[tokio::test]
async fn top_beyond_page_size_pages_and_stops() {
	let fx = fixture();
	fx.backend.insert_rows("account", (0..8000).map(|i| account(&format!("a{i}"), None)).collect());
	let response =
		fx.service.execute(Request::new("SELECT TOP 7000 accountid FROM account")).await;
	let result = response.result.unwrap();
	assert_eq!(result.rows.len(), 7000);
	assert_eq!(response.stats.pages, 2);
	let issued = fx.backend.issued_fetch_xml();
	assert!(issued[0].contains(r#"count="5000""#), "{}", issued[0]);
	assert!(!issued[0].contains("top="), "{}", issued[0]);
}

#[tokio::test]
async fn null_handling_matches_sql_semantics() {
	let fx = fixture();
	fx.backend.insert_rows(
		"product",
		vec![
			product(None, Some(10), 0),
			product(Some("X"), None, 2),
			product(Some("Y"), Some(20), 5),
		],
	);
	let response = fx
		.service
		.execute(Request::new(
			"SELECT COALESCE(name, 'Unknown') AS label, revenue / NULLIF(qty, 0) AS unit \
			 FROM product",
		))
		.await;
	let result = response.result.unwrap();
	let got: Vec<(Value, Value)> = result
		.rows
		.iter()
		.map(|r| {
			(r.get("label").cloned().unwrap(), r.get("unit").cloned().unwrap_or(Value::Null))
		})
		.collect();
	assert_eq!(
		got,
		vec![
			(Value::from("Unknown"), Value::Null),
			(Value::from("X"), Value::Null),
			(Value::from("Y"), Value::BigInt(4)),
		]
	);
}

#[tokio::test]
async fn lookup_columns_expand_virtual_name_companions() {
	let fx = fixture();
	let sue = owner("Sue Smith", Uuid::new_v4());
	fx.backend.insert_rows("account", vec![account_owned("Contoso", Some(1), sue.clone())]);
	let response = fx.service.execute(Request::new("SELECT name, ownerid FROM account")).await;
	let result = response.result.unwrap();
	assert!(result.columns.iter().any(|c| c.name == "owneridname" && c.virtual_name));
	assert_eq!(result.rows[0].get("owneridname"), Some(&Value::from("Sue Smith")));
}

#[tokio::test]
async fn inner_join_pushes_to_link_entity() {
	let fx = fixture();
	let a = account("Contoso", Some(1));
	let id = a.get("accountid").cloned().unwrap();
	fx.backend.insert_rows("account", vec![a, account("Fabrikam", Some(2))]);
	let mut contact = fetchql_core::sql::Row::for_entity("contact");
	contact.set("contactid", Value::Guid(Uuid::new_v4()));
	contact.set("fullname", Value::from("Sue Smith"));
	contact.set("parentcustomerid", id);
	fx.backend.insert_rows("contact", vec![contact]);

	let response = fx
		.service
		.execute(Request::new(
			"SELECT a.name, c.fullname FROM account a \
			 INNER JOIN contact c ON c.parentcustomerid = a.accountid",
		))
		.await;
	let result = response.result.unwrap();
	assert_eq!(result.rows.len(), 1);
	assert_eq!(result.rows[0].get("fullname"), Some(&Value::from("Sue Smith")));
	let xml = result.executed_fetch_xml.unwrap();
	assert!(xml.contains("link-entity"), "{xml}");
	assert!(xml.contains(r#"link-type="inner""#), "{xml}");
}

#[tokio::test]
async fn full_outer_join_falls_back_to_client_hash_join() {
	let fx = fixture();
	fx.backend.insert_rows("account", vec![account("Contoso", Some(1))]);
	let mut contact = fetchql_core::sql::Row::for_entity("contact");
	contact.set("contactid", Value::Guid(Uuid::new_v4()));
	contact.set("fullname", Value::from("Orphan"));
	contact.set("parentcustomerid", Value::Guid(Uuid::new_v4()));
	fx.backend.insert_rows("contact", vec![contact]);

	let explain = fx
		.service
		.explain(
			"SELECT a.name, c.fullname FROM account a \
			 FULL OUTER JOIN contact c ON c.parentcustomerid = a.accountid",
		)
		.await
		.unwrap();
	assert!(explain.text.contains("HashJoin (FullOuter)"), "{}", explain.text);

	let response = fx
		.service
		.execute(Request::new(
			"SELECT a.name, c.fullname FROM account a \
			 FULL OUTER JOIN contact c ON c.parentcustomerid = a.accountid",
		))
		.await;
	let result = response.result.unwrap();
	// One unmatched account plus one unmatched contact.
	assert_eq!(result.rows.len(), 2);
}

#[tokio::test]
async fn union_deduplicates_and_union_all_keeps_duplicates() {
	let fx = fixture();
	fx.backend.insert_rows("account", vec![account("Shared", None), account("OnlyA", None)]);
	let mut contact = fetchql_core::sql::Row::for_entity("contact");
	contact.set("contactid", Value::Guid(Uuid::new_v4()));
	contact.set("fullname", Value::from("shared"));
	fx.backend.insert_rows("contact", vec![contact]);

	let distinct = fx
		.service
		.execute(Request::new(
			"SELECT name FROM account UNION SELECT fullname FROM contact",
		))
		.await;
	// Case-insensitive deduplication merges Shared/shared.
	assert_eq!(distinct.result.unwrap().rows.len(), 2);

	let all = fx
		.service
		.execute(Request::new(
			"SELECT name FROM account UNION ALL SELECT fullname FROM contact",
		))
		.await;
	assert_eq!(all.result.unwrap().rows.len(), 3);
}

#[tokio::test]
async fn in_subquery_pushes_as_semi_join_link() {
	let fx = fixture();
	let a = account("HasContact", Some(1));
	let id = a.get("accountid").cloned().unwrap();
	fx.backend.insert_rows("account", vec![a, account("NoContact", Some(2))]);
	let mut contact = fetchql_core::sql::Row::for_entity("contact");
	contact.set("contactid", Value::Guid(Uuid::new_v4()));
	contact.set("parentcustomerid", id);
	fx.backend.insert_rows("contact", vec![contact]);

	let response = fx
		.service
		.execute(Request::new(
			"SELECT name FROM account WHERE accountid IN \
			 (SELECT parentcustomerid FROM contact)",
		))
		.await;
	let result = response.result.unwrap();
	assert_eq!(result.rows.len(), 1);
	assert_eq!(result.rows[0].get("name"), Some(&Value::from("HasContact")));
	let xml = result.executed_fetch_xml.unwrap();
	assert!(xml.contains(r#"link-type="in""#), "{xml}");
}

#[tokio::test]
async fn not_in_subquery_is_an_anti_join() {
	let fx = fixture();
	let a = account("HasContact", Some(1));
	let id = a.get("accountid").cloned().unwrap();
	fx.backend.insert_rows("account", vec![a, account("NoContact", Some(2))]);
	let mut contact = fetchql_core::sql::Row::for_entity("contact");
	contact.set("contactid", Value::Guid(Uuid::new_v4()));
	contact.set("parentcustomerid", id);
	fx.backend.insert_rows("contact", vec![contact]);

	let response = fx
		.service
		.execute(Request::new(
			"SELECT name FROM account WHERE accountid NOT IN \
			 (SELECT parentcustomerid FROM contact)",
		))
		.await;
	let result = response.result.unwrap();
	assert_eq!(result.rows.len(), 1);
	assert_eq!(result.rows[0].get("name"), Some(&Value::from("NoContact")));
}

#[tokio::test]
async fn correlated_exists_probes_a_spool() {
	let fx = fixture();
	let a = account("HasContact", Some(1));
	let id = a.get("accountid").cloned().unwrap();
	fx.backend.insert_rows("account", vec![a, account("NoContact", Some(2))]);
	let mut contact = fetchql_core::sql::Row::for_entity("contact");
	contact.set("contactid", Value::Guid(Uuid::new_v4()));
	contact.set("parentcustomerid", id);
	fx.backend.insert_rows("contact", vec![contact]);

	// The uppercase function blocks full push-down, forcing the client
	// path where EXISTS becomes a spool probe.
	let response = fx
		.service
		.execute(Request::new(
			"SELECT name FROM account a WHERE UPPER(name) LIKE '%CONTACT%' AND NOT EXISTS \
			 (SELECT contactid FROM contact c WHERE c.parentcustomerid = a.accountid)",
		))
		.await;
	let result = response.result.unwrap();
	assert_eq!(result.rows.len(), 1);
	assert_eq!(result.rows[0].get("name"), Some(&Value::from("NoContact")));
}

#[tokio::test]
async fn window_functions_compute_client_side() {
	let fx = fixture();
	fx.backend.insert_rows(
		"account",
		vec![
			account("small", Some(10)),
			account("big", Some(100)),
			account("mid", Some(50)),
		],
	);
	let response = fx
		.service
		.execute(Request::new(
			"SELECT name, ROW_NUMBER() OVER (ORDER BY revenue DESC) AS rn FROM account \
			 ORDER BY rn",
		))
		.await;
	let result = response.result.unwrap();
	let names: Vec<_> = result.rows.iter().map(|r| r.get("name").cloned().unwrap()).collect();
	assert_eq!(
		names,
		vec![Value::from("big"), Value::from("mid"), Value::from("small")]
	);
}

#[tokio::test]
async fn recursive_cte_runs_to_fixpoint() {
	let fx = fixture();
	let response = fx
		.service
		.execute(Request::new(
			"WITH nums (n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM nums WHERE n < 5) \
			 SELECT n FROM nums ORDER BY n",
		))
		.await;
	let result = response.result.unwrap();
	let values: Vec<_> = result.rows.iter().map(|r| r.get("n").cloned().unwrap()).collect();
	assert_eq!(
		values,
		vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4), Value::Int(5)]
	);
}

#[tokio::test]
async fn metadata_tables_stream_from_the_provider() {
	let fx = fixture();
	let response =
		fx.service.execute(Request::new("SELECT logicalname FROM metadata.entity")).await;
	let result = response.result.unwrap();
	let names: Vec<String> =
		result.rows.iter().map(|r| r.get("logicalname").unwrap().as_string()).collect();
	assert!(names.contains(&"account".to_owned()));
	assert!(names.contains(&"contact".to_owned()));
}

#[tokio::test]
async fn streaming_matches_buffered_and_keeps_companions() {
	let fx = fixture();
	let sue = owner("Sue Smith", Uuid::new_v4());
	fx.backend
		.insert_rows("account", (0..7).map(|i| account_owned(&format!("a{i}"), Some(i), sue.clone())).collect());
	let buffered = fx
		.service
		.execute(Request::new("SELECT name, ownerid FROM account"))
		.await
		.result
		.unwrap();
	let streaming = fx
		.service
		.execute_streaming(Request::new("SELECT name, ownerid FROM account"))
		.await
		.unwrap();
	let chunks: Vec<Vec<fetchql_core::sql::Row>> =
		streaming.chunks.try_collect().await.unwrap();
	let streamed: Vec<fetchql_core::sql::Row> = chunks.into_iter().flatten().collect();
	assert_eq!(streamed.len(), buffered.rows.len());
	assert!(streamed.iter().all(|r| r.contains("owneridname")));
}

#[tokio::test]
async fn parse_errors_surface_with_position() {
	let fx = fixture();
	let response = fx.service.execute(Request::new("SELECT FROM account")).await;
	let body = response.error_body().unwrap();
	assert_eq!(body.code, ErrorCode::Parse);
}

#[tokio::test]
async fn validation_flags_unknown_entities_and_columns() {
	let fx = fixture();
	let diagnostics = fx.service.validate("SELECT name FROM nosuchentity").await;
	assert!(diagnostics.iter().any(|d| d.message.contains("nosuchentity")));
	let diagnostics = fx.service.validate("SELECT nosuchcolumn FROM account").await;
	assert!(diagnostics.iter().any(|d| d.message.contains("nosuchcolumn")));
}

#[tokio::test]
async fn explain_is_referentially_transparent_and_never_executes() {
	let fx = fixture();
	fx.backend.insert_rows("account", vec![account("Contoso", Some(1))]);
	let sql = "SELECT ownerid, COUNT(*) AS cnt FROM account GROUP BY ownerid \
	           HAVING COUNT(*) > 1 ORDER BY cnt DESC";
	let first = fx.service.explain(sql).await.unwrap();
	let second = fx.service.explain(sql).await.unwrap();
	assert_eq!(first.text, second.text);
	// Dry-run: the backend never saw a request.
	assert!(fx.backend.issued_fetch_xml().is_empty());
	assert!(first.text.contains("ClientFilter: cnt > 1"), "{}", first.text);
	assert!(first.text.contains("Sort: cnt DESC"), "{}", first.text);
	assert!(first.text.contains("FetchXmlScan: account (aggregate)"), "{}", first.text);
	assert!(first.text.contains("└──"), "{}", first.text);
}
