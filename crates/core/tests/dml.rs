//! End-to-end DML: positional INSERT ... SELECT, the write-safety guard,
//! row caps, dry runs, and script-level analysis.

mod common;

use common::{account, fixture};
use fetchql_core::backend::mem::WriteKind;
use fetchql_core::dbs::Request;
use fetchql_core::err::ErrorCode;
use fetchql_core::sql::{Row, Value};
use uuid::Uuid;

fn source_row(col_b: i32) -> Row {
	let mut row = Row::for_entity("source");
	row.set("sourceid", Value::Guid(Uuid::new_v4()));
	row.set("col_b", Value::Int(col_b));
	row
}

#[tokio::test]
async fn insert_from_select_maps_columns_positionally() {
	let fx = fixture();
	fx.backend.insert_rows("source", vec![source_row(7)]);
	let response = fx
		.service
		.execute(Request::new("INSERT INTO target (col_a) SELECT col_b FROM source"))
		.await;
	let result = response.result.unwrap();
	assert_eq!(result.rows[0].get("affected"), Some(&Value::BigInt(1)));
	let writes = fx.backend.writes();
	assert_eq!(writes.len(), 1);
	assert_eq!(writes[0].kind, WriteKind::Create);
	assert_eq!(writes[0].entity, "target");
	assert_eq!(writes[0].records[0].get("col_a"), Some(&Value::Int(7)));
}

#[tokio::test]
async fn insert_values_writes_literal_rows() {
	let fx = fixture();
	let response = fx
		.service
		.execute(Request::new(
			"INSERT INTO account (name, revenue) VALUES ('Contoso', 100), ('Fabrikam', 200)",
		))
		.await;
	let result = response.result.unwrap();
	assert_eq!(result.rows[0].get("affected"), Some(&Value::BigInt(2)));
	assert_eq!(fx.backend.rows_of("account").len(), 2);
}

#[tokio::test]
async fn delete_without_where_is_blocked_until_confirmed() {
	let fx = fixture();
	fx.backend.insert_rows("account", vec![account("a", None), account("b", None)]);

	let blocked = fx.service.execute(Request::new("DELETE FROM account")).await;
	let body = blocked.error_body().unwrap();
	assert_eq!(body.code, ErrorCode::DmlBlocked);
	assert!(body.hint.is_some());
	assert_eq!(fx.backend.rows_of("account").len(), 2);

	let confirmed = fx.service.execute(Request::new("DELETE FROM account").confirmed()).await;
	let result = confirmed.result.unwrap();
	assert_eq!(result.rows[0].get("affected"), Some(&Value::BigInt(2)));
	assert!(fx.backend.rows_of("account").is_empty());
}

#[tokio::test]
async fn update_without_where_is_blocked() {
	let fx = fixture();
	fx.backend.insert_rows("account", vec![account("a", Some(1))]);
	let blocked = fx.service.execute(Request::new("UPDATE account SET revenue = 1")).await;
	assert_eq!(blocked.error_body().unwrap().code, ErrorCode::DmlBlocked);
}

#[tokio::test]
async fn dml_inside_control_flow_is_blocked_pre_execution() {
	let fx = fixture();
	fx.backend.insert_rows("account", vec![account("a", None)]);
	let blocked = fx
		.service
		.execute(Request::new("IF 1 = 1 BEGIN DELETE FROM account; END"))
		.await;
	assert_eq!(blocked.error_body().unwrap().code, ErrorCode::DmlBlocked);
	// The guard ran at plan time: nothing was deleted.
	assert_eq!(fx.backend.rows_of("account").len(), 1);
}

#[tokio::test]
async fn update_evaluates_set_expressions_per_row() {
	let fx = fixture();
	fx.backend.insert_rows(
		"account",
		vec![account("Contoso", Some(10)), account("Fabrikam", Some(20))],
	);
	let response = fx
		.service
		.execute(Request::new(
			"UPDATE account SET revenue = revenue * 2 WHERE name = 'Contoso'",
		))
		.await;
	let result = response.result.unwrap();
	assert_eq!(result.rows[0].get("affected"), Some(&Value::BigInt(1)));
	let rows = fx.backend.rows_of("account");
	let contoso = rows.iter().find(|r| r.get("name") == Some(&Value::from("Contoso"))).unwrap();
	assert_eq!(contoso.get("revenue"), Some(&Value::BigInt(20)));
	let fabrikam = rows.iter().find(|r| r.get("name") == Some(&Value::from("Fabrikam"))).unwrap();
	assert_eq!(fabrikam.get("revenue"), Some(&Value::BigInt(20)));
}

#[tokio::test]
async fn dml_row_cap_refuses_oversized_writes() {
	let fx = fixture();
	fx.backend.insert_rows("account", (0..20).map(|i| account(&format!("a{i}"), Some(0))).collect());
	let mut request = Request::new("UPDATE account SET revenue = 1 WHERE revenue = 0").confirmed();
	request.safety.row_cap = 10;
	let response = fx.service.execute(request).await;
	assert_eq!(response.error_body().unwrap().code, ErrorCode::DmlBlocked);
	// No partial batch went out.
	assert!(fx.backend.writes().is_empty());

	let mut request = Request::new("UPDATE account SET revenue = 1 WHERE revenue = 0").confirmed();
	request.safety.row_cap = 10;
	request.safety.no_limit = true;
	let response = fx.service.execute(request).await;
	assert_eq!(
		response.result.unwrap().rows[0].get("affected"),
		Some(&Value::BigInt(20))
	);
}

#[tokio::test]
async fn dry_run_plans_and_counts_without_writing() {
	let fx = fixture();
	fx.backend.insert_rows("account", vec![account("a", Some(0)), account("b", Some(0))]);
	let mut request = Request::new("DELETE FROM account WHERE revenue = 0");
	request.safety.dry_run = true;
	let response = fx.service.execute(request).await;
	let result = response.result.unwrap();
	assert_eq!(result.rows[0].get("affected"), Some(&Value::BigInt(2)));
	assert!(fx.backend.writes().is_empty());
	assert_eq!(fx.backend.rows_of("account").len(), 2);
}

#[tokio::test]
async fn batch_size_hint_controls_bulk_batching() {
	let fx = fixture();
	fx.backend.insert_rows("account", (0..7).map(|i| account(&format!("a{i}"), Some(0))).collect());
	let response = fx
		.service
		.execute(
			Request::new(
				"DELETE FROM account WHERE revenue = 0 OPTION (BATCH_SIZE 3)",
			)
			.confirmed(),
		)
		.await;
	response.result.unwrap();
	let writes = fx.backend.writes();
	// 7 rows in batches of 3.
	assert_eq!(writes.len(), 3);
	assert!(writes.iter().all(|w| w.kind == WriteKind::Delete));
	assert!(writes.iter().all(|w| w.batch_size == 3));
}

#[tokio::test]
async fn scripts_with_variables_drive_dml() {
	let fx = fixture();
	fx.backend.insert_rows(
		"account",
		vec![account("small", Some(10)), account("big", Some(1000))],
	);
	let response = fx
		.service
		.execute(Request::new(
			"DECLARE @floor int = 100; \
			 DELETE FROM account WHERE revenue < @floor",
		))
		.await;
	let result = response.result.unwrap();
	assert_eq!(result.rows[0].get("affected"), Some(&Value::BigInt(1)));
	let rows = fx.backend.rows_of("account");
	assert_eq!(rows.len(), 1);
	assert_eq!(rows[0].get("name"), Some(&Value::from("big")));
}

#[tokio::test]
async fn raiserror_with_error_severity_fails_the_script() {
	let fx = fixture();
	let response = fx
		.service
		.execute(Request::new("RAISERROR('boom', 16, 1)"))
		.await;
	let body = response.error_body().unwrap();
	assert!(body.message.contains("boom"));
	assert_eq!(body.code, ErrorCode::Validation);
}

#[tokio::test]
async fn while_loop_with_break_terminates() {
	let fx = fixture();
	let response = fx
		.service
		.execute(Request::new(
			"DECLARE @i int = 0; \
			 WHILE @i < 100 BEGIN \
			   SET @i = @i + 1; \
			   IF @i = 3 BREAK; \
			 END; \
			 SELECT @i AS final_value",
		))
		.await;
	let result = response.result.unwrap();
	assert_eq!(result.rows[0].get("final_value"), Some(&Value::Int(3)));
}
