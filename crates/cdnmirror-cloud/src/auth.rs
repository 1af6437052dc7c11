//! API-key login against the identity service
//!
//! One login per distinct username, once, before watching starts. The token
//! and the object-store endpoints from the service catalog become an
//! [`AccountSession`]; the sessions together form the [`AccountCache`] the
//! translator and the workers read from.
//!
//! ## Components
//!
//! - [`IdentityClient`] - posts the credentials and parses the catalog
//! - [`fill_account_cache`] - logs every rule-file account in and checks
//!   that every rule's region is served

use std::time::Duration;

use cdnmirror_core::config::Config;
use cdnmirror_core::domain::{AccountCache, AccountSession, ServiceEndpoint};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::client::USER_AGENT;
use crate::CloudError;

/// Service-catalog type of the object store
const OBJECT_STORE_TYPE: &str = "object-store";

// ============================================================================
// Identity response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: Access,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Access {
    token: Token,
    #[serde(default)]
    service_catalog: Vec<CatalogService>,
}

#[derive(Debug, Deserialize)]
struct Token {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CatalogService {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    #[serde(default)]
    region: Option<String>,
    #[serde(rename = "publicURL")]
    public_url: String,
    #[serde(rename = "internalURL", default)]
    internal_url: Option<String>,
}

// ============================================================================
// IdentityClient
// ============================================================================

/// Client for the identity service's token endpoint
pub struct IdentityClient {
    client: Client,
    identity_url: Url,
}

impl IdentityClient {
    /// Creates a client posting to `identity_url`
    pub fn new(identity_url: &str, timeout: Duration) -> Result<Self, CloudError> {
        let identity_url = Url::parse(identity_url)
            .map_err(|e| CloudError::InvalidResponse(format!("invalid identity URL {identity_url}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, identity_url })
    }

    /// Logs `username` in with `apikey`
    pub async fn login(&self, username: &str, apikey: &str) -> Result<AccountSession, CloudError> {
        debug!(username, url = %self.identity_url, "Logging in");

        let body = json!({
            "auth": {
                "RAX-KSKEY:apiKeyCredentials": {
                    "username": username,
                    "apiKey": apikey,
                }
            }
        });

        let response = self
            .client
            .post(self.identity_url.clone())
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CloudError::from_status(status.as_u16(), &text));
        }

        let session = parse_token_response(username, &text)?;
        info!(
            username,
            endpoints = session.endpoints().len(),
            "Logged in"
        );
        Ok(session)
    }
}

fn parse_token_response(username: &str, text: &str) -> Result<AccountSession, CloudError> {
    let parsed: TokenResponse = serde_json::from_str(text)
        .map_err(|e| CloudError::InvalidResponse(format!("token response: {e}")))?;

    let endpoints: Vec<ServiceEndpoint> = parsed
        .access
        .service_catalog
        .into_iter()
        .filter(|service| service.kind == OBJECT_STORE_TYPE)
        .flat_map(|service| service.endpoints)
        .map(|endpoint| ServiceEndpoint {
            region: endpoint.region.unwrap_or_default(),
            public_url: endpoint.public_url,
            internal_url: endpoint.internal_url,
        })
        .collect();

    if endpoints.is_empty() {
        return Err(CloudError::InvalidResponse(format!(
            "no {OBJECT_STORE_TYPE} endpoints in the service catalog for {username}"
        )));
    }

    Ok(AccountSession::new(username, parsed.access.token.id, endpoints))
}

/// Logs in every username of `config` once and checks that every rule's
/// region (and network) has an endpoint
pub async fn fill_account_cache(config: &Config, identity: &IdentityClient) -> Result<AccountCache, CloudError> {
    let mut cache = AccountCache::new();

    for username in config.usernames() {
        let apikey = config
            .apikey(username)
            .ok_or_else(|| CloudError::MissingApiKey(username.clone()))?;
        let session = identity.login(username, apikey).await?;
        cache.insert(session);
    }

    for entry in config.entries() {
        cache
            .get(&entry.username)?
            .endpoint_url(&entry.region, entry.snet)?;
    }

    Ok(cache)
}
