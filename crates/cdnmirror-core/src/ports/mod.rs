//! Port definitions
//!
//! - [`ITransport`] - the request/response primitive remote operations go through

pub mod transport;

pub use transport::{
    ITransport, RemoteMethod, RemoteRequest, RemoteResponse, RequestBody, TransportError,
    AUTH_TOKEN_HEADER, DESTINATION_HEADER,
};
