//! End-to-end tests: the full router against mocked archive and manuscript services.

pub mod utils;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use axum_test::multipart::{MultipartForm, Part};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::CorsOrigin;

use utils::{
    GOOD_TOKEN, bucket_path, bucket_response, create_test_config, create_test_server, deposition, mount_auth,
    raw_upload_request,
};

fn file_form(file_name: &str, content: Vec<u8>) -> MultipartForm {
    MultipartForm::new().add_part("file", Part::bytes(content).file_name(file_name))
}

async fn mock_services() -> (MockServer, MockServer) {
    let archive = MockServer::start().await;
    let manuscripts = MockServer::start().await;
    mount_auth(&manuscripts).await;
    (archive, manuscripts)
}

#[test_log::test(tokio::test)]
async fn test_healthz_needs_no_token() {
    let (archive, manuscripts) = mock_services().await;
    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    let response = server.get("/healthz").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "OK");
}

#[test_log::test(tokio::test)]
async fn test_upload_adds_one_file_to_deposition() {
    let (archive, manuscripts) = mock_services().await;

    // Served to the pre-upload read and to the bucket lookup
    Mock::given(method("GET"))
        .and(path("/api/deposit/depositions/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(deposition(&archive, 42, 1)))
        .up_to_n_times(2)
        .mount(&archive)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/deposit/depositions/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(deposition(&archive, 42, 2)))
        .mount(&archive)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{}/results.csv", bucket_path(42))))
        .and(header("authorization", "Bearer archive-token"))
        .and(header("content-length", "1024"))
        .respond_with(ResponseTemplate::new(201).set_body_json(bucket_response("results.csv", 1024)))
        .expect(1)
        .mount(&archive)
        .await;

    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    let before: Value = server
        .get("/depositions/42")
        .add_header("authorization", GOOD_TOKEN)
        .await
        .json();
    let before_files = before["files"].as_array().unwrap().len();

    let response = server
        .post("/upload")
        .add_query_param("resourceId", 42)
        .add_header("authorization", GOOD_TOKEN)
        .multipart(file_form("results.csv", vec![7u8; 1024]))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK, "{}", response.text());
    let after: Value = response.json();
    assert_eq!(after["id"], 42);
    assert_eq!(after["files"].as_array().unwrap().len(), before_files + 1);
    // Fields the gateway does not model are passed through
    assert_eq!(after["state"], "unsubmitted");
}

#[test_log::test(tokio::test)]
async fn test_upload_over_ceiling_never_reaches_archive() {
    let (archive, manuscripts) = mock_services().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(deposition(&archive, 42, 0)))
        .expect(0)
        .mount(&archive)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&archive)
        .await;

    let mut config = create_test_config(&archive, &manuscripts);
    config.archive.max_file_size = 512;
    let server = create_test_server(config).await;

    let response = server
        .post("/upload")
        .add_query_param("resourceId", 42)
        .add_header("authorization", GOOD_TOKEN)
        .multipart(file_form("big.bin", vec![0u8; 1024]))
        .await;

    assert_eq!(response.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = response.json();
    assert_eq!(body["kind"], "payload_too_large");
    assert_eq!(body["detail"], "1.00 KiB exceeds the limit: 512 B");
}

#[test_log::test(tokio::test)]
async fn test_upload_without_bearer_token_is_rejected_locally() {
    let archive = MockServer::start().await;
    let manuscripts = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&manuscripts)
        .await;

    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    let response = server
        .post("/upload")
        .add_query_param("resourceId", 42)
        .multipart(file_form("a.txt", b"hello".to_vec()))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["kind"], "unauthenticated");
    assert_eq!(body["detail"], "Bearer token is missing");
}

#[test_log::test(tokio::test)]
async fn test_rejected_token_carries_manuscript_service_detail() {
    let archive = MockServer::start().await;
    let manuscripts = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/user_info/"))
        .and(header("authorization", "Bearer stale-token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid token."})))
        .expect(1)
        .mount(&manuscripts)
        .await;

    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    let response = server
        .get("/depositions/42")
        .add_header("authorization", "Bearer stale-token")
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["detail"], "Invalid token.");
}

#[test_log::test(tokio::test)]
async fn test_upload_reports_partial_success_when_refetch_fails() {
    let (archive, manuscripts) = mock_services().await;
    Mock::given(method("GET"))
        .and(path("/api/deposit/depositions/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(deposition(&archive, 7, 0)))
        .up_to_n_times(1)
        .mount(&archive)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/deposit/depositions/7"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "Index unavailable"})))
        .mount(&archive)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{}/notes.txt", bucket_path(7))))
        .respond_with(ResponseTemplate::new(201).set_body_json(bucket_response("notes.txt", 5)))
        .expect(1)
        .mount(&archive)
        .await;

    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    let response = server
        .post("/upload")
        .add_query_param("resourceId", 7)
        .add_header("authorization", GOOD_TOKEN)
        .multipart(file_form("notes.txt", b"hello".to_vec()))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["reconciled"], false);
    assert_eq!(body["resource_id"], 7);
    assert_eq!(body["file"]["key"], "notes.txt");
    assert!(body["detail"].as_str().unwrap().contains("Index unavailable"));
}

#[test_log::test(tokio::test)]
async fn test_bare_success_from_bucket_still_reconciles() {
    let (archive, manuscripts) = mock_services().await;
    Mock::given(method("GET"))
        .and(path("/api/deposit/depositions/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(deposition(&archive, 42, 0)))
        .up_to_n_times(1)
        .mount(&archive)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/deposit/depositions/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(deposition(&archive, 42, 1)))
        .expect(1)
        .mount(&archive)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{}/empty-reply.bin", bucket_path(42))))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&archive)
        .await;

    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    let response = server
        .post("/upload")
        .add_query_param("resourceId", 42)
        .add_header("authorization", GOOD_TOKEN)
        .multipart(file_form("empty-reply.bin", vec![1u8; 64]))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK, "{}", response.text());
    let body: Value = response.json();
    assert_eq!(body["id"], 42);
    assert_eq!(body["files"].as_array().unwrap().len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_archive_rejection_is_bad_gateway_without_retry() {
    let (archive, manuscripts) = mock_services().await;
    Mock::given(method("GET"))
        .and(path("/api/deposit/depositions/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(deposition(&archive, 42, 0)))
        .expect(1)
        .mount(&archive)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "Bucket is locked", "status": 400})))
        .expect(1)
        .mount(&archive)
        .await;

    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    let response = server
        .post("/upload")
        .add_query_param("resourceId", 42)
        .add_header("authorization", GOOD_TOKEN)
        .multipart(file_form("a.txt", b"hello".to_vec()))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["kind"], "remote_api_error");
    assert_eq!(body["detail"], "Archive responded with 400: Bucket is locked");
}

#[test_log::test(tokio::test)]
async fn test_deposition_without_bucket_is_conflict() {
    let (archive, manuscripts) = mock_services().await;
    Mock::given(method("GET"))
        .and(path("/api/deposit/depositions/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9, "files": [], "links": {}})))
        .mount(&archive)
        .await;

    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    let response = server
        .post("/upload")
        .add_query_param("resourceId", 9)
        .add_header("authorization", GOOD_TOKEN)
        .multipart(file_form("a.txt", b"hello".to_vec()))
        .await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["kind"], "missing_bucket");
}

#[test_log::test(tokio::test)]
async fn test_malformed_upload_requests() {
    let (archive, manuscripts) = mock_services().await;
    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    // No resourceId
    let response = server
        .post("/upload")
        .add_header("authorization", GOOD_TOKEN)
        .multipart(file_form("a.txt", b"hello".to_vec()))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["kind"], "bad_request");

    // No file part
    let response = server
        .post("/upload")
        .add_query_param("resourceId", 42)
        .add_header("authorization", GOOD_TOKEN)
        .multipart(MultipartForm::new().add_text("description", "no file here"))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>()["detail"],
        "Missing `file` field in multipart body"
    );
}

#[test_log::test(tokio::test)]
async fn test_legacy_deposition_id_query_is_accepted() {
    let (archive, manuscripts) = mock_services().await;
    Mock::given(method("GET"))
        .and(path("/api/deposit/depositions/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(deposition(&archive, 42, 0)))
        .mount(&archive)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201).set_body_json(bucket_response("a.txt", 5)))
        .mount(&archive)
        .await;

    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    let response = server
        .post("/upload")
        .add_query_param("deposition_id", 42)
        .add_header("authorization", GOOD_TOKEN)
        .multipart(file_form("a.txt", b"hello".to_vec()))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

/// A client that goes away mid-transfer must release its pool slot, or the next upload
/// would queue behind a transfer nobody is waiting for.
#[test_log::test(tokio::test)]
async fn test_disconnect_cancels_transfer_and_frees_slot() {
    let (archive, manuscripts) = mock_services().await;
    for id in [42, 43] {
        Mock::given(method("GET"))
            .and(path(format!("/api/deposit/depositions/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(deposition(&archive, id, 0)))
            .mount(&archive)
            .await;
    }
    Mock::given(method("PUT"))
        .and(path(format!("{}/slow.bin", bucket_path(42))))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(bucket_response("slow.bin", 1024))
                .set_delay(Duration::from_secs(10)),
        )
        .expect(1)
        .mount(&archive)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{}/fast.bin", bucket_path(43))))
        .respond_with(ResponseTemplate::new(201).set_body_json(bucket_response("fast.bin", 1024)))
        .expect(1)
        .mount(&archive)
        .await;

    let mut config = create_test_config(&archive, &manuscripts);
    config.upload.max_concurrent_transfers = 1;
    let state = crate::AppState::from_config(config).unwrap();
    let router = crate::build_router(state).unwrap();

    // Dropping the response future is what hyper does when the peer closes the connection
    let abandoned = tokio::time::timeout(
        Duration::from_millis(500),
        router.clone().oneshot(raw_upload_request(42, "slow.bin", &[1u8; 1024])),
    )
    .await;
    assert!(abandoned.is_err(), "slow upload should still be in flight");

    let response = tokio::time::timeout(
        Duration::from_secs(3),
        router.oneshot(raw_upload_request(43, "fast.bin", &[2u8; 1024])),
    )
    .await
    .expect("second upload queued behind an abandoned transfer")
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // No reconciliation read for the abandoned upload
    let refetches = archive
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.method.as_str() == "GET" && request.url.path() == "/api/deposit/depositions/42")
        .count();
    assert_eq!(refetches, 1);
}

#[test_log::test(tokio::test)]
async fn test_create_deposition_files_into_community() {
    let (archive, manuscripts) = mock_services().await;
    Mock::given(method("POST"))
        .and(path("/api/deposit/depositions"))
        .and(body_partial_json(json!({
            "metadata": {"upload_type": "dataset", "communities": [{"identifier": "cdrxiv"}]}
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(deposition(&archive, 100, 0)))
        .expect(1)
        .mount(&archive)
        .await;

    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    let response = server
        .post("/depositions")
        .add_header("authorization", GOOD_TOKEN)
        .await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    assert_eq!(response.json::<Value>()["id"], 100);
}

#[test_log::test(tokio::test)]
async fn test_update_deposition_forwards_body() {
    let (archive, manuscripts) = mock_services().await;
    let update = json!({"metadata": {"title": "Soil carbon 2024", "upload_type": "dataset"}});
    Mock::given(method("PUT"))
        .and(path("/api/deposit/depositions/42"))
        .and(body_partial_json(update.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(deposition(&archive, 42, 0)))
        .expect(1)
        .mount(&archive)
        .await;

    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    let response = server
        .put("/depositions/42")
        .add_header("authorization", GOOD_TOKEN)
        .json(&update)
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
}

#[test_log::test(tokio::test)]
async fn test_new_version_and_upstream_errors() {
    let (archive, manuscripts) = mock_services().await;
    Mock::given(method("POST"))
        .and(path("/api/deposit/depositions/42/actions/newversion"))
        .respond_with(ResponseTemplate::new(201).set_body_json(deposition(&archive, 43, 0)))
        .expect(1)
        .mount(&archive)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/deposit/depositions/5/actions/newversion"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "Deposition is not published"})))
        .expect(1)
        .mount(&archive)
        .await;

    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    let response = server
        .post("/depositions/42/versions")
        .add_header("authorization", GOOD_TOKEN)
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    assert_eq!(response.json::<Value>()["id"], 43);

    let response = server
        .post("/depositions/5/versions")
        .add_header("authorization", GOOD_TOKEN)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        response.json::<Value>()["detail"],
        "Archive responded with 400: Deposition is not published"
    );
}

#[test_log::test(tokio::test)]
async fn test_get_deposition_does_not_retry_remote_errors() {
    let (archive, manuscripts) = mock_services().await;
    Mock::given(method("GET"))
        .and(path("/api/deposit/depositions/42"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "PID does not exist."})))
        .expect(1)
        .mount(&archive)
        .await;

    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;

    let response = server
        .get("/depositions/42")
        .add_header("authorization", GOOD_TOKEN)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.json::<Value>()["kind"], "remote_api_error");
}

#[test_log::test(tokio::test)]
async fn test_docs_and_metrics_routes() {
    let (archive, manuscripts) = mock_services().await;
    let mut config = create_test_config(&archive, &manuscripts);
    config.enable_metrics = true;
    let server = create_test_server(config).await;

    let doc: Value = server.get("/api-docs/openapi.json").await.json();
    assert!(doc["paths"]["/upload"]["post"].is_object());

    server.get("/healthz").await;
    let metrics = server.get("/internal/metrics").await;
    assert_eq!(metrics.status_code(), StatusCode::OK);
    assert!(metrics.text().contains("axum_http_requests"));
}

#[test_log::test(tokio::test)]
async fn test_cors_preflight() {
    let (archive, manuscripts) = mock_services().await;
    let preflight = |server: &axum_test::TestServer| {
        server
            .method(Method::OPTIONS, "/upload")
            .add_header("origin", "https://journal.example.org")
            .add_header("access-control-request-method", "POST")
    };

    // Any origin by default
    let server = create_test_server(create_test_config(&archive, &manuscripts)).await;
    let response = preflight(&server).await;
    assert_eq!(response.header("access-control-allow-origin"), "*");

    let mut config = create_test_config(&archive, &manuscripts);
    config.cors.allowed_origins = vec![CorsOrigin::Url(url::Url::parse("https://journal.example.org").unwrap())];
    config.cors.allow_credentials = true;
    let server = create_test_server(config).await;
    let response = preflight(&server).await;
    assert_eq!(response.header("access-control-allow-origin"), "https://journal.example.org");
    assert_eq!(response.header("access-control-allow-credentials"), "true");
}
