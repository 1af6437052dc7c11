//! Logged-in accounts
//!
//! An [`AccountSession`] is what a successful login yields: the auth token
//! and the object-store endpoints per region. The [`AccountCache`] holds one
//! session per distinct username; it is filled once before watching starts
//! and is read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use super::errors::AccountError;

/// One object-store endpoint from the service catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Region code, e.g. `DFW`
    pub region: String,
    /// Endpoint reachable over the public internet
    pub public_url: String,
    /// Endpoint on the provider's service network, when offered
    pub internal_url: Option<String>,
}

/// An authenticated account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSession {
    username: String,
    token: String,
    endpoints: Vec<ServiceEndpoint>,
}

impl AccountSession {
    pub fn new(
        username: impl Into<String>,
        token: impl Into<String>,
        endpoints: Vec<ServiceEndpoint>,
    ) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
            endpoints,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The value sent as `X-Auth-Token`
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn endpoints(&self) -> &[ServiceEndpoint] {
        &self.endpoints
    }

    /// Base URL of the object store for `region`
    ///
    /// With `snet` the service-network (internal) URL is used. Region codes
    /// compare case-insensitively.
    pub fn endpoint_url(&self, region: &str, snet: bool) -> Result<Url, AccountError> {
        let endpoint = self
            .endpoints
            .iter()
            .find(|e| e.region.eq_ignore_ascii_case(region));

        let raw = match (endpoint, snet) {
            (Some(e), false) => Some(e.public_url.as_str()),
            (Some(e), true) => e.internal_url.as_deref(),
            (None, _) => None,
        };

        let raw = raw.ok_or_else(|| AccountError::NoEndpoint {
            username: self.username.clone(),
            region: region.to_string(),
            kind: if snet { "internal" } else { "public" },
        })?;

        let url = Url::parse(raw).map_err(|_| AccountError::InvalidEndpoint(raw.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(AccountError::InvalidEndpoint(raw.to_string()));
        }
        Ok(url)
    }
}

/// Sessions keyed by username
#[derive(Debug, Clone, Default)]
pub struct AccountCache {
    sessions: HashMap<String, Arc<AccountSession>>,
}

impl AccountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a session under its username, replacing any previous one
    pub fn insert(&mut self, session: AccountSession) {
        self.sessions
            .insert(session.username().to_string(), Arc::new(session));
    }

    pub fn get(&self, username: &str) -> Result<&Arc<AccountSession>, AccountError> {
        self.sessions
            .get(username)
            .ok_or_else(|| AccountError::UnknownAccount(username.to_string()))
    }

    pub fn contains(&self, username: &str) -> bool {
        self.sessions.contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
