//! HTTP client tests against a mock sdsc2 server
//!
//! Covers:
//! - query construction and pagination
//! - HTTP status and result code classification
//! - gateway text bodies and schema mismatches
//! - transport timeouts

use std::collections::BTreeMap;
use std::time::Duration;

use sdsc_common::types::{Category, Cursor, PageRequest};
use sdsc_ingest::config::ApiConfig;
use sdsc_ingest::{ApiClient, FetchError, PageSource};
use serde_json::{json, Value};
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn client(server: &MockServer, timeout_secs: u64) -> ApiClient {
    let config = ApiConfig {
        service_key: Some("test-key".to_string()),
        base_url: server.uri(),
        request_timeout_secs: timeout_secs,
    };
    ApiClient::new(&config, "test-key").expect("client")
}

fn envelope(items: Value, total: Value, page_no: u32, rows: u32) -> Value {
    json!({
        "header": { "resultCode": "00", "resultMsg": "NORMAL SERVICE" },
        "body": { "items": items, "totalCount": total, "numOfRows": rows, "pageNo": page_no }
    })
}

fn stores(from: usize, count: usize) -> Value {
    Value::Array(
        (from..from + count)
            .map(|i| json!({ "bizesId": format!("MA{:05}", i), "bizesNm": format!("store {}", i) }))
            .collect(),
    )
}

fn request(category: Category, page_size: u32) -> PageRequest {
    PageRequest::first(category, page_size, BTreeMap::new())
}

#[tokio::test]
async fn test_pages_through_reported_total() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/storeListInDong"))
        .and(query_param("pageNo", "1"))
        .and(query_param("numOfRows", "100"))
        .and(query_param("serviceKey", "test-key"))
        .and(query_param("type", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(stores(0, 100), json!(240), 1, 100)))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/storeListInDong"))
        .and(query_param("pageNo", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(stores(200, 40), json!("240"), 3, 100)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, 5);
    let first = request(Category::Stores, 100);

    let page = client.fetch(&first).await.unwrap();
    assert_eq!(page.records.len(), 100);
    assert_eq!(page.total_count, Some(240));
    assert_eq!(page.next_cursor, Some(Cursor::new(2).unwrap()));

    let last = client.fetch(&first.at(Cursor::new(3).unwrap())).await.unwrap();
    assert_eq!(last.records.len(), 40);
    assert_eq!(last.next_cursor, None);
}

#[tokio::test]
async fn test_filters_override_fixed_params() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/baroApi"))
        .and(query_param("resId", "dong"))
        .and(query_param("catId", "mega"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            json!([{ "ctprvnCd": "11", "ctprvnNm": "서울특별시" }]),
            json!(1),
            1,
            100,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let filters = BTreeMap::from([("catId".to_string(), "mega".to_string())]);
    let page = client(&server, 5)
        .fetch(&PageRequest::first(Category::Districts, 100, filters))
        .await
        .unwrap();
    assert_eq!(page.records.len(), 1);
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server, 5).fetch(&request(Category::Zones, 100)).await.unwrap_err();
    assert!(err.is_transient(), "{}", err);
    assert!(err.reason().contains("503"));
}

#[tokio::test]
async fn test_auth_errors_are_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client(&server, 5).fetch(&request(Category::Zones, 100)).await.unwrap_err();
    assert!(matches!(err, FetchError::Permanent { category: Category::Zones, page: 1, .. }));
}

#[tokio::test]
async fn test_quota_result_code_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "header": { "resultCode": "22", "resultMsg": "LIMITED NUMBER OF SERVICE REQUESTS EXCEEDS ERROR" }
        })))
        .mount(&server)
        .await;

    let err = client(&server, 5).fetch(&request(Category::Stores, 100)).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_no_data_result_code_ends_stream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "header": { "resultCode": "03", "resultMsg": "NODATA_ERROR" }
        })))
        .mount(&server)
        .await;

    let page = client(&server, 5)
        .fetch(&request(Category::Classifications, 100))
        .await
        .unwrap();
    assert!(page.records.is_empty());
    assert_eq!(page.next_cursor, None);
}

#[tokio::test]
async fn test_gateway_text_bodies() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/storeListInDong"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<OpenAPI_ServiceResponse><cmmMsgHeader><returnAuthMsg>LIMITED_NUMBER_OF_SERVICE_REQUESTS_EXCEEDS_ERROR</returnAuthMsg></cmmMsgHeader></OpenAPI_ServiceResponse>",
        ))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/storeZoneInAdmi"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<OpenAPI_ServiceResponse><cmmMsgHeader><returnAuthMsg>SERVICE_KEY_IS_NOT_REGISTERED_ERROR</returnAuthMsg></cmmMsgHeader></OpenAPI_ServiceResponse>",
        ))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/smallUpjongList"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let client = client(&server, 5);
    assert!(client.fetch(&request(Category::Stores, 10)).await.unwrap_err().is_transient());

    let key_err = client.fetch(&request(Category::Zones, 10)).await.unwrap_err();
    assert!(!key_err.is_transient());

    let html_err = client.fetch(&request(Category::Classifications, 10)).await.unwrap_err();
    assert!(!html_err.is_transient());
    assert!(html_err.reason().contains("schema mismatch"));
}

#[tokio::test]
async fn test_items_that_are_not_objects_are_schema_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([1, 2, 3]), json!(3), 1, 10)))
        .mount(&server)
        .await;

    let err = client(&server, 5).fetch(&request(Category::Stores, 10)).await.unwrap_err();
    assert!(!err.is_transient());
    assert!(err.reason().contains("schema mismatch"));
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope(stores(0, 1), json!(1), 1, 10))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let err = client(&server, 1).fetch(&request(Category::Stores, 10)).await.unwrap_err();
    assert!(err.is_transient());
    assert!(err.reason().contains("timed out"), "{}", err.reason());
}
