//! Helpers shared by the end-to-end tests.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, header};
use axum_test::TestServer;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{header as header_eq, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::Config;
use crate::upload::RetryPolicy;

pub const GOOD_TOKEN: &str = "Bearer good-token";
pub const BOUNDARY: &str = "depogate-test-boundary";

/// Config pointing at the two mock services, with retries and polling shrunk to test scale.
pub fn create_test_config(archive: &MockServer, manuscripts: &MockServer) -> Config {
    let mut config = Config::default();
    config.archive.url = Url::parse(&archive.uri()).unwrap();
    config.archive.access_token = Some("archive-token".to_string());
    config.manuscripts.url = Url::parse(&manuscripts.uri()).unwrap();
    config.upload.disconnect_poll_interval = Duration::from_millis(50);
    config.upload.retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        multiplier: 2,
    };
    config.enable_metrics = false;
    config
}

pub async fn create_test_server(config: Config) -> TestServer {
    crate::Application::new(config)
        .await
        .expect("Failed to create application")
        .into_test_server()
}

/// The manuscript service accepts [`GOOD_TOKEN`].
pub async fn mount_auth(manuscripts: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/user_info/"))
        .and(header_eq("authorization", GOOD_TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"username": "author"})))
        .mount(manuscripts)
        .await;
}

/// Bucket path on the archive mock for a deposition.
pub fn bucket_path(id: u64) -> String {
    format!("/api/files/bucket-{id}")
}

/// A deposition as the archive returns it, with `files` uploaded files.
pub fn deposition(archive: &MockServer, id: u64, files: usize) -> Value {
    let files: Vec<Value> = (0..files)
        .map(|i| json!({"id": format!("file-{i}"), "filename": format!("data-{i}.csv"), "filesize": 1024}))
        .collect();
    json!({
        "id": id,
        "submitted": false,
        "state": "unsubmitted",
        "files": files,
        "links": {
            "bucket": format!("{}{}", archive.uri(), bucket_path(id)),
            "html": format!("{}/deposit/{id}", archive.uri()),
        },
        "metadata": {"upload_type": "dataset"},
    })
}

pub fn bucket_response(file_name: &str, size: u64) -> Value {
    json!({
        "key": file_name,
        "size": size,
        "checksum": "md5:2942bfabb3d05332b66eb128e0842cff",
        "mimetype": "application/octet-stream",
    })
}

/// A raw `POST /upload` request, for tests that need to drop the request mid-flight.
pub fn raw_upload_request(resource_id: u64, file_name: &str, content: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(format!("/upload?resourceId={resource_id}"))
        .header(header::AUTHORIZATION, GOOD_TOKEN)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}
