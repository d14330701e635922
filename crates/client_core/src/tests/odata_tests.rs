use super::*;
use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use serde_json::json;
use shared::{error::ErrorKind, record::FieldValue};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone)]
struct ODataServerState {
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    status: Arc<Mutex<StatusCode>>,
    body: Arc<Mutex<String>>,
    failures_before_success: Arc<Mutex<u32>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl ODataServerState {
    fn with_body(body: serde_json::Value) -> Self {
        Self {
            queries: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(Mutex::new(StatusCode::OK)),
            body: Arc::new(Mutex::new(body.to_string())),
            failures_before_success: Arc::new(Mutex::new(0)),
            delay: Arc::new(Mutex::new(None)),
        }
    }
}

async fn serve_entity_set(
    State(state): State<ODataServerState>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    state.queries.lock().await.push(query);
    let delay = *state.delay.lock().await;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    {
        let mut failures = state.failures_before_success.lock().await;
        if *failures > 0 {
            *failures -= 1;
            return (StatusCode::SERVICE_UNAVAILABLE, String::new());
        }
    }
    let status = *state.status.lock().await;
    (status, state.body.lock().await.clone())
}

async fn spawn_odata_server(state: ODataServerState) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/svc/Customers", get(serve_entity_set))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/svc")
}

fn customers_body(names: &[&str]) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = names
        .iter()
        .map(|name| json!({ "CompanyName": name, "Country": "Germany" }))
        .collect();
    json!({ "value": rows })
}

#[test]
fn escape_literal_doubles_single_quotes() {
    assert_eq!(escape_literal("O'Brien"), "O''Brien");
    assert_eq!(escape_literal("''"), "''''");
    assert_eq!(escape_literal("Alfreds"), "Alfreds");
}

#[test]
fn contains_filter_joins_fields_with_or() {
    let fields = vec!["CompanyName".to_string(), "ContactName".to_string()];
    assert_eq!(
        contains_filter(&fields, "  O'Brien "),
        Some("contains(CompanyName,'O''Brien') or contains(ContactName,'O''Brien')".into())
    );
}

#[test]
fn contains_filter_needs_query_and_fields() {
    let fields = vec!["CompanyName".to_string()];
    assert_eq!(contains_filter(&fields, "   "), None);
    assert_eq!(contains_filter(&[], "Alfreds"), None);
}

#[test]
fn decode_page_reads_v4_value_array() {
    let page = decode_page(&customers_body(&["Alfreds", "Ana Trujillo"]), 2).expect("page");
    assert_eq!(page.records.len(), 2);
    assert!(!page.is_last_page);
    assert_eq!(
        page.records[1].get("CompanyName"),
        &FieldValue::Text("Ana Trujillo".into())
    );
}

#[test]
fn decode_page_reads_v2_envelopes() {
    let results = json!({ "d": { "results": [{ "OrderID": 10248 }] } });
    let bare = json!({ "d": [{ "OrderID": 10248 }, { "OrderID": 10249 }] });

    let page = decode_page(&results, 20).expect("d.results");
    assert_eq!(page.records.len(), 1);
    assert!(page.is_last_page);

    let page = decode_page(&bare, 2).expect("d array");
    assert_eq!(page.records.len(), 2);
    assert!(!page.is_last_page);
}

#[test]
fn decode_page_rejects_body_without_rows() {
    let err = decode_page(&json!({ "error": { "message": "nope" } }), 20).expect_err("malformed");
    assert_eq!(err.kind, ErrorKind::MalformedResponse);

    let err = decode_page(&json!({ "value": [1, 2] }), 20).expect_err("non-object rows");
    assert_eq!(err.kind, ErrorKind::MalformedResponse);
}

#[test]
fn entity_url_appends_to_service_root_path() {
    let source = ODataSource::new("https://services.odata.org/V4/Northwind/Northwind.svc")
        .expect("url");
    assert_eq!(
        source.entity_url("Customers").expect("entity").as_str(),
        "https://services.odata.org/V4/Northwind/Northwind.svc/Customers"
    );

    let source = ODataSource::new("https://example.test/odata/").expect("url");
    assert_eq!(
        source.entity_url("/Orders").expect("entity").as_str(),
        "https://example.test/odata/Orders"
    );
}

#[test]
fn invalid_service_root_is_rejected() {
    assert!(ODataSource::new("not a url").is_err());
}

#[tokio::test]
async fn fetch_page_sends_paging_and_escaped_filter() {
    let state = ODataServerState::with_body(customers_body(&["O'Brien Imports"]));
    let base = spawn_odata_server(state.clone()).await;
    let source = ODataSource::new(&base).expect("source");
    let fields = vec!["CompanyName".to_string()];

    let request = PageRequest::at(40, 20).with_filter(contains_filter(&fields, "O'Brien"));
    let page = source
        .fetch_page("Customers", &request)
        .await
        .expect("page");

    assert_eq!(page.records.len(), 1);
    assert!(page.is_last_page);

    let queries = state.queries.lock().await;
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].get("$top").map(String::as_str), Some("20"));
    assert_eq!(queries[0].get("$skip").map(String::as_str), Some("40"));
    assert_eq!(
        queries[0].get("$filter").map(String::as_str),
        Some("contains(CompanyName,'O''Brien')")
    );
}

#[tokio::test]
async fn unfiltered_request_omits_filter_parameter() {
    let state = ODataServerState::with_body(customers_body(&[]));
    let base = spawn_odata_server(state.clone()).await;
    let source = ODataSource::new(&base).expect("source");

    source
        .fetch_page("Customers", &PageRequest::first(20))
        .await
        .expect("page");

    assert!(!state.queries.lock().await[0].contains_key("$filter"));
}

#[tokio::test]
async fn non_success_status_is_fetch_failed_with_status() {
    let state = ODataServerState::with_body(customers_body(&[]));
    *state.status.lock().await = StatusCode::INTERNAL_SERVER_ERROR;
    let base = spawn_odata_server(state).await;
    let source = ODataSource::new(&base).expect("source");

    let err = source
        .fetch_page("Customers", &PageRequest::first(20))
        .await
        .expect_err("500");
    assert_eq!(err.kind, ErrorKind::FetchFailed);
    assert_eq!(err.status, Some(500));
}

#[tokio::test]
async fn invalid_json_is_malformed_response() {
    let state = ODataServerState::with_body(json!(null));
    *state.body.lock().await = "<html>maintenance</html>".into();
    let base = spawn_odata_server(state).await;
    let source = ODataSource::new(&base).expect("source");

    let err = source
        .fetch_page("Customers", &PageRequest::first(20))
        .await
        .expect_err("not json");
    assert_eq!(err.kind, ErrorKind::MalformedResponse);
}

#[tokio::test]
async fn unreachable_service_is_fetch_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let source = ODataSource::new(&format!("http://{addr}/svc")).expect("source");

    let err = source
        .fetch_page("Customers", &PageRequest::first(20))
        .await
        .expect_err("connection refused");
    assert_eq!(err.kind, ErrorKind::FetchFailed);
    assert_eq!(err.status, None);
}

#[tokio::test]
async fn default_policy_does_not_retry() {
    let state = ODataServerState::with_body(customers_body(&["Alfreds"]));
    *state.failures_before_success.lock().await = 1;
    let base = spawn_odata_server(state.clone()).await;
    let source = ODataSource::new(&base).expect("source");

    let err = source
        .fetch_page("Customers", &PageRequest::first(20))
        .await
        .expect_err("503");
    assert_eq!(err.status, Some(503));
    assert_eq!(state.queries.lock().await.len(), 1);
}

#[tokio::test]
async fn retry_policy_recovers_from_transient_failures() {
    let state = ODataServerState::with_body(customers_body(&["Alfreds"]));
    *state.failures_before_success.lock().await = 2;
    let base = spawn_odata_server(state.clone()).await;
    let source = ODataSource::new(&base).expect("source").with_policy(FetchPolicy {
        timeout: None,
        retry_attempts: 2,
        retry_backoff: Duration::from_millis(1),
    });

    let page = source
        .fetch_page("Customers", &PageRequest::first(20))
        .await
        .expect("third attempt succeeds");
    assert_eq!(page.records.len(), 1);
    assert_eq!(state.queries.lock().await.len(), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let state = ODataServerState::with_body(customers_body(&[]));
    *state.status.lock().await = StatusCode::BAD_REQUEST;
    let base = spawn_odata_server(state.clone()).await;
    let source = ODataSource::new(&base).expect("source").with_policy(FetchPolicy {
        timeout: None,
        retry_attempts: 3,
        retry_backoff: Duration::from_millis(1),
    });

    let err = source
        .fetch_page("Customers", &PageRequest::first(20))
        .await
        .expect_err("400");
    assert_eq!(err.status, Some(400));
    assert_eq!(state.queries.lock().await.len(), 1);
}

#[tokio::test]
async fn timeout_turns_hung_fetch_into_failure() {
    let state = ODataServerState::with_body(customers_body(&["Alfreds"]));
    *state.delay.lock().await = Some(Duration::from_secs(5));
    let base = spawn_odata_server(state).await;
    let source = ODataSource::new(&base).expect("source").with_policy(FetchPolicy {
        timeout: Some(Duration::from_millis(100)),
        ..FetchPolicy::default()
    });

    let err = source
        .fetch_page("Customers", &PageRequest::first(20))
        .await
        .expect_err("timeout");
    assert_eq!(err.kind, ErrorKind::FetchFailed);
    assert!(err.message.contains("timed out"), "{}", err.message);
}

#[test]
fn retry_delay_grows_linearly_and_saturates() {
    let backoff = Duration::from_millis(500);
    assert_eq!(retry_delay(backoff, 1), Duration::from_millis(500));
    assert_eq!(retry_delay(backoff, 3), Duration::from_millis(1500));
    assert_eq!(
        retry_delay(Duration::from_millis(u64::MAX), 2),
        Duration::MAX
    );
}
