//! Object-store requests
//!
//! Builders for the handful of Swift-style requests the workers issue, and
//! the JSON container listing format.

use std::path::Path;

use cdnmirror_core::domain::{AccountSession, ObjectRef};
use cdnmirror_core::ports::{RemoteMethod, RemoteRequest, AUTH_TOKEN_HEADER, DESTINATION_HEADER};
use serde::Deserialize;

use crate::RemoteError;

/// Page size requested from container listings
pub const LISTING_LIMIT: usize = 10_000;

/// Largest object a single PUT may create (5 GiB plus the store's slack)
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024 + 2;

/// Asks the store to pick the content type from the object name
const DETECT_CONTENT_TYPE_HEADER: &str = "X-Detect-Content-Type";

/// One entry of a container listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteObject {
    pub name: String,
    pub bytes: u64,
}

fn authorized(session: &AccountSession, method: RemoteMethod, url: url::Url) -> RemoteRequest {
    RemoteRequest::new(method, url).header(AUTH_TOKEN_HEADER, session.token())
}

/// `PUT endpoint/container/name` streaming the content of `local`
pub fn upload_request(session: &AccountSession, target: &ObjectRef, local: &Path) -> RemoteRequest {
    authorized(session, RemoteMethod::Put, target.url())
        .header(DETECT_CONTENT_TYPE_HEADER, "true")
        .file_body(local)
}

/// Rejects a file too large for a single-object upload
pub fn check_upload_size(local: &Path, len: u64) -> Result<(), RemoteError> {
    if len > MAX_OBJECT_SIZE {
        return Err(RemoteError::permanent(format!(
            "{} is {len} bytes, above the {MAX_OBJECT_SIZE}-byte object limit",
            local.display()
        )));
    }
    Ok(())
}

/// `DELETE endpoint/container/name`
pub fn delete_request(session: &AccountSession, target: &ObjectRef) -> RemoteRequest {
    authorized(session, RemoteMethod::Delete, target.url()).header("Content-Type", "application/json")
}

/// `COPY endpoint/container/source` with `Destination: container/dest`
pub fn copy_request(session: &AccountSession, source: &ObjectRef, dest: &ObjectRef) -> RemoteRequest {
    authorized(session, RemoteMethod::Copy, source.url())
        .header("Content-Type", "application/json")
        .header(DESTINATION_HEADER, dest.destination_header())
}

/// One page of the listing below `prefix`, starting after `marker`
pub fn listing_request(session: &AccountSession, prefix: &ObjectRef, marker: Option<&str>) -> RemoteRequest {
    let mut url = prefix.container_url();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("format", "json")
            .append_pair("limit", &LISTING_LIMIT.to_string());
        let listing_prefix = prefix.listing_prefix();
        if !listing_prefix.is_empty() {
            query.append_pair("prefix", &listing_prefix);
        }
        if let Some(marker) = marker {
            query.append_pair("marker", marker);
        }
    }
    authorized(session, RemoteMethod::Get, url).header("Accept", "application/json")
}

/// Parses a listing body; an empty body (204) is an empty page
pub fn parse_listing(body: &[u8]) -> Result<Vec<RemoteObject>, RemoteError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(body).map_err(|e| RemoteError::permanent(format!("malformed container listing: {e}")))
}
