//! Runtime behavior: cancellation, timeouts, memory caps, prefetch, and
//! the tokenizer surface.

mod common;

use common::{account, fixture, fixture_with};
use fetchql_core::backend::mem::MemBackend;
use fetchql_core::ctx::MutableContext;
use fetchql_core::dbs::Request;
use fetchql_core::err::ErrorCode;
use fetchql_core::syn::token::TokenCategory;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn cancellation_mid_paging_surfaces_cleanly() {
	let backend = MemBackend::new().with_page_delay(Duration::from_millis(40));
	let fx = fixture_with(backend, 4);
	fx.backend
		.insert_rows("account", (0..10_001).map(|i| account(&format!("a{i}"), None)).collect());

	let mut root = MutableContext::background();
	let canceller = root.add_cancel();
	let ctx = root.freeze();

	let service = Arc::new(fx.service);
	let task = {
		let service = service.clone();
		tokio::spawn(async move {
			service
				.execute_with_context(Request::new("SELECT accountid FROM account"), ctx)
				.await
		})
	};
	tokio::time::sleep(Duration::from_millis(10)).await;
	canceller.cancel();
	let response = task.await.unwrap();
	let body = response.error_body().expect("cancellation should fail the request");
	assert_eq!(body.code, ErrorCode::Cancelled);
	assert!(body.message.contains("in-flight"), "{}", body.message);

	// The service stays healthy: a fresh request succeeds.
	let again = service.execute(Request::new("SELECT TOP 5 accountid FROM account")).await;
	assert_eq!(again.result.unwrap().rows.len(), 5);
}

#[tokio::test]
async fn timeout_converts_to_plan_timeout() {
	let backend = MemBackend::new().with_page_delay(Duration::from_millis(60));
	let fx = fixture_with(backend, 4);
	fx.backend.insert_rows("account", (0..10).map(|i| account(&format!("a{i}"), None)).collect());
	let mut request = Request::new("SELECT accountid FROM account");
	request.options.timeout = Duration::from_millis(5);
	let response = fx.service.execute(request).await;
	let body = response.error_body().unwrap();
	assert_eq!(body.code, ErrorCode::PlanTimeout);
	assert!(body.message.contains("in-flight"), "{}", body.message);
}

#[tokio::test]
async fn materialization_cap_fails_oversized_sorts() {
	let fx = fixture();
	fx.backend.insert_rows("account", (0..50).map(|i| account(&format!("a{i}"), Some(i))).collect());
	let mut request = Request::new(
		"SELECT UPPER(name) AS n FROM account ORDER BY LEN(name) DESC",
	);
	request.options.max_materialization_rows = 10;
	let response = fx.service.execute(request).await;
	let body = response.error_body().unwrap();
	assert_eq!(body.code, ErrorCode::MemoryLimit);
	assert!(body.hint.is_some());
}

#[tokio::test]
async fn max_rows_option_caps_the_result() {
	let fx = fixture();
	fx.backend.insert_rows("account", (0..30).map(|i| account(&format!("a{i}"), None)).collect());
	let mut request = Request::new("SELECT accountid FROM account");
	request.options.max_rows = Some(7);
	let response = fx.service.execute(request).await;
	assert_eq!(response.result.unwrap().rows.len(), 7);
}

#[tokio::test]
async fn prefetch_can_be_disabled() {
	let fx = fixture();
	fx.backend.insert_rows("account", vec![account("a", None)]);
	let explain = fx.service.explain("SELECT name FROM account").await.unwrap();
	assert!(explain.text.contains("Prefetch"), "{}", explain.text);

	let mut options = fetchql_core::dbs::Options::default();
	options.prefetch = false;
	let explain = fx
		.service
		.explain_with_options("SELECT name FROM account", options)
		.await
		.unwrap();
	assert!(!explain.text.contains("Prefetch"), "{}", explain.text);
}

#[tokio::test]
async fn tokenize_is_total_and_categorized() {
	let fx = fixture();
	let sql = "SELECT name, 'it''s' FROM [a b] -- done";
	let tokens = fx.service.tokenize(sql);
	let total: usize = tokens.iter().map(|t| t.span.len as usize).sum();
	assert_eq!(total, sql.len());
	assert!(tokens.iter().any(|t| t.category == TokenCategory::Keyword));
	assert!(tokens.iter().any(|t| t.category == TokenCategory::String));
	assert!(tokens.iter().any(|t| t.category == TokenCategory::Comment));
}

#[tokio::test]
async fn reexecution_is_stable_without_order_by() {
	let fx = fixture();
	fx.backend.insert_rows("account", (0..20).map(|i| account(&format!("a{i}"), Some(i))).collect());
	let first = fx
		.service
		.execute(Request::new("SELECT name FROM account WHERE revenue >= 5"))
		.await
		.result
		.unwrap();
	let second = fx
		.service
		.execute(Request::new("SELECT name FROM account WHERE revenue >= 5"))
		.await
		.result
		.unwrap();
	let mut a: Vec<String> = first.rows.iter().map(|r| r.get("name").unwrap().as_string()).collect();
	let mut b: Vec<String> =
		second.rows.iter().map(|r| r.get("name").unwrap().as_string()).collect();
	a.sort();
	b.sort();
	assert_eq!(a, b);
}

#[tokio::test]
async fn statistics_report_rows_and_pages() {
	let fx = fixture();
	fx.backend
		.insert_rows("account", (0..6000).map(|i| account(&format!("a{i}"), None)).collect());
	let response = fx.service.execute(Request::new("SELECT accountid FROM account")).await;
	assert_eq!(response.stats.rows, 6000);
	assert_eq!(response.stats.pages, 2);
	assert!(!response.stats.node_timings.is_empty());
}
