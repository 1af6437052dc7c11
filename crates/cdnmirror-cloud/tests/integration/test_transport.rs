//! The HTTPS transport against a mock object store

use std::time::Duration;

use cdnmirror_cloud::client::HttpTransport;
use cdnmirror_core::ports::{ITransport, RemoteMethod, RemoteRequest, TransportError};
use url::Url;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> HttpTransport {
    HttpTransport::new(Duration::from_secs(5)).expect("transport")
}

fn url(server: &MockServer, rest: &str) -> Url {
    Url::parse(&format!("{}{rest}", server.uri())).unwrap()
}

#[tokio::test]
async fn test_put_sends_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/AUTH_x/photos/a/b.jpg"))
        .and(header("X-Auth-Token", "tok"))
        .and(header("X-Detect-Content-Type", "true"))
        .and(body_string("jpeg bytes"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let request = RemoteRequest::new(RemoteMethod::Put, url(&server, "/v1/AUTH_x/photos/a/b.jpg"))
        .header("X-Auth-Token", "tok")
        .header("X-Detect-Content-Type", "true")
        .body(b"jpeg bytes".to_vec());

    let response = transport().send(request).await.unwrap();
    assert_eq!(response.status, 201);
    assert!(response.is_success());
}

#[tokio::test]
async fn test_put_streams_file_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/AUTH_x/backups/disk.img"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let content: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("disk.img");
    std::fs::write(&local, &content).unwrap();

    let request = RemoteRequest::new(RemoteMethod::Put, url(&server, "/v1/AUTH_x/backups/disk.img"))
        .file_body(&local);
    let response = transport().send(request).await.unwrap();
    assert_eq!(response.status, 201);

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, content);
}

#[tokio::test]
async fn test_missing_body_file_is_permanent() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let request = RemoteRequest::new(RemoteMethod::Put, url(&server, "/v1/AUTH_x/c/gone.txt"))
        .file_body(dir.path().join("gone.txt"));
    let err = transport().send(request).await.unwrap_err();

    assert!(matches!(err, TransportError::LocalFile(_)));
    assert!(!err.is_transient());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_copy_uses_extension_method() {
    let server = MockServer::start().await;
    Mock::given(method("COPY"))
        .and(path("/v1/AUTH_x/photos/old.jpg"))
        .and(header("Destination", "photos/new.jpg"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let request = RemoteRequest::new(RemoteMethod::Copy, url(&server, "/v1/AUTH_x/photos/old.jpg"))
        .header("Destination", "photos/new.jpg");

    let response = transport().send(request).await.unwrap();
    assert_eq!(response.status, 201);
}

#[tokio::test]
async fn test_error_statuses_are_responses() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;

    let request = RemoteRequest::new(RemoteMethod::Delete, url(&server, "/v1/AUTH_x/c/missing"));
    let response = transport().send(request).await.unwrap();

    assert_eq!(response.status, 404);
    assert!(!response.is_success());
    assert_eq!(response.body, b"Not Found".to_vec());
}

#[tokio::test]
async fn test_get_passes_query_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/AUTH_x/c"))
        .and(query_param("format", "json"))
        .and(query_param("prefix", "dir/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let request = RemoteRequest::new(RemoteMethod::Get, url(&server, "/v1/AUTH_x/c?format=json&prefix=dir/"));
    let response = transport().send(request).await.unwrap();
    assert_eq!(response.body, b"[]".to_vec());
}

#[tokio::test]
async fn test_unreachable_host_is_transient() {
    let server = MockServer::start().await;
    let dead = url(&server, "/v1/AUTH_x/c/o");
    drop(server);

    let request = RemoteRequest::new(RemoteMethod::Put, dead).body(Vec::new());
    let err = transport().send(request).await.unwrap_err();

    assert!(matches!(err, TransportError::Network(_) | TransportError::Timeout));
    assert!(err.is_transient());
}
