//! Domain entities
//!
//! - Account sessions and the account cache
//! - Jobs, their operations, object references and worker keys
//! - Domain-specific error types

pub mod account;
pub mod errors;
pub mod job;

// Re-export commonly used types
pub use account::{AccountCache, AccountSession, ServiceEndpoint};
pub use errors::{AccountError, ConfigError};
pub use job::{join_object_name, path_to_object_name, Job, JobId, JobOp, ObjectRef, WorkerKey};
