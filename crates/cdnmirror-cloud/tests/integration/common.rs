//! Shared helpers for the identity and object-store mocks

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cdnmirror_cloud::auth::IdentityClient;

pub const TOKENS_PATH: &str = "/v2.0/tokens";

/// A token response whose object-store catalog lists DFW (public and
/// internal) and ORD (public only), both pointing at `server`
pub fn token_response(server: &MockServer, token: &str) -> Value {
    json!({
        "access": {
            "token": {"id": token, "expires": "2030-01-01T00:00:00Z"},
            "serviceCatalog": [
                {"type": "object-store", "name": "cloudFiles", "endpoints": [
                    {
                        "region": "DFW",
                        "publicURL": format!("{}/v1/AUTH_dfw", server.uri()),
                        "internalURL": format!("{}/snet/v1/AUTH_dfw", server.uri())
                    },
                    {
                        "region": "ORD",
                        "publicURL": format!("{}/v1/AUTH_ord", server.uri())
                    }
                ]},
                {"type": "rax:dns", "name": "cloudDNS", "endpoints": [
                    {"publicURL": "https://dns.example.com/v1.0/1"}
                ]}
            ]
        }
    })
}

/// Mounts a login endpoint answering every POST with `token`
pub async fn mount_login(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path(TOKENS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(server, token)))
        .mount(server)
        .await;
}

/// An identity client posting to the mock server
pub fn identity_client(server: &MockServer) -> IdentityClient {
    IdentityClient::new(&format!("{}{TOKENS_PATH}", server.uri()), Duration::from_secs(5))
        .expect("identity client")
}
