//! Integration tests for cdnmirror-cloud
//!
//! Uses wiremock to stand in for the identity service and the object store
//! and checks the requests the login and the transport put on the wire.

mod common;

mod test_login;
mod test_transport;
