//! Login against the identity service and account-cache filling

use cdnmirror_cloud::auth::fill_account_cache;
use cdnmirror_cloud::CloudError;
use cdnmirror_core::config::Config;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_login_sends_api_key_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(common::TOKENS_PATH))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "auth": {"RAX-KSKEY:apiKeyCredentials": {"username": "bob", "apiKey": "secret"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::token_response(&server, "tok-bob")))
        .expect(1)
        .mount(&server)
        .await;

    let session = common::identity_client(&server)
        .login("bob", "secret")
        .await
        .expect("login failed");

    assert_eq!(session.username(), "bob");
    assert_eq!(session.token(), "tok-bob");
    // the DNS service is not an object store
    assert_eq!(session.endpoints().len(), 2);
    assert_eq!(
        session.endpoint_url("DFW", true).unwrap().as_str(),
        format!("{}/snet/v1/AUTH_dfw", server.uri())
    );
}

#[tokio::test]
async fn test_login_rejected_key_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(common::TOKENS_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let err = common::identity_client(&server)
        .login("bob", "wrong")
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::Unauthorized(ref m) if m == "bad credentials"));
}

#[tokio::test]
async fn test_login_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = common::identity_client(&server).login("bob", "k").await.unwrap_err();
    assert!(matches!(err, CloudError::ServerError(_)));
}

#[tokio::test]
async fn test_login_without_object_store_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access": {"token": {"id": "t"}, "serviceCatalog": [
                {"type": "compute", "endpoints": [{"region": "DFW", "publicURL": "https://c.example.com"}]}
            ]}
        })))
        .mount(&server)
        .await;

    let err = common::identity_client(&server).login("bob", "k").await.unwrap_err();
    assert!(matches!(err, CloudError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_fill_account_cache_logs_in_once_per_username() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(common::TOKENS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::token_response(&server, "tok")))
        .expect(2)
        .mount(&server)
        .await;

    let config = Config::parse(
        "username=bob\napikey=k1\nregion=DFW\ncontainer=a\nlocal_dir=/srv/a\nlocal_dir=/srv/b\n\
         username=eve\napikey=k2\nregion=ORD\ncontainer=c\nlocal_dir=/srv/c\n",
    )
    .unwrap();

    let cache = fill_account_cache(&config, &common::identity_client(&server))
        .await
        .expect("fill failed");

    assert_eq!(cache.len(), 2);
    assert!(cache.contains("bob"));
    assert!(cache.contains("eve"));
}

#[tokio::test]
async fn test_fill_account_cache_rejects_unserved_region() {
    let server = MockServer::start().await;
    common::mount_login(&server, "tok").await;

    // ORD has no internal URL in the catalog
    let config = Config::parse("username=bob\napikey=k\nregion=ORD\nsnet=true\ncontainer=c\nlocal_dir=/srv/c\n").unwrap();

    let err = fill_account_cache(&config, &common::identity_client(&server))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Account(_)));
}

#[tokio::test]
async fn test_fill_account_cache_requires_api_key() {
    let server = MockServer::start().await;
    common::mount_login(&server, "tok").await;

    let config = Config::parse("username=bob\nregion=DFW\ncontainer=c\nlocal_dir=/srv/c\n").unwrap();

    let err = fill_account_cache(&config, &common::identity_client(&server))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::MissingApiKey(ref u) if u == "bob"));
}
