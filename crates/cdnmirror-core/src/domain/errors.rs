//! Domain error types
//!
//! Errors raised while reading the rule file and while resolving accounts
//! and endpoints. Both are fatal at startup.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while parsing or validating the rule file
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A non-blank, non-comment line without `=`
    #[error("line {line}: expected key=value, got '{content}'")]
    Syntax {
        /// 1-based line number
        line: usize,
        /// The offending line, trimmed
        content: String,
    },

    /// `local_dir` appeared before a required key had been set
    #[error("line {line}: local_dir given before '{missing}' was set")]
    Incomplete {
        /// 1-based line number of the `local_dir`
        line: usize,
        /// Name of the missing key
        missing: &'static str,
    },

    /// A boolean key had a value that is not a boolean
    #[error("line {line}: invalid boolean '{value}' for {key}")]
    InvalidBool {
        line: usize,
        key: &'static str,
        value: String,
    },

    /// The same username was given two different API keys
    #[error("conflicting apikey for username '{0}'")]
    ConflictingApiKey(String),

    /// A username referenced by an entry has no API key
    #[error("no apikey given for username '{0}'")]
    MissingApiKey(String),

    /// The rule file produced no entries
    #[error("no local_dir entries configured")]
    NoEntries,

    /// `local_dir` must be an absolute path
    #[error("local_dir must be absolute: {0}")]
    RelativeLocalDir(PathBuf),

    /// Two entries watch the same tree, or one sits inside the other
    #[error("local_dir {inner} overlaps {outer}")]
    OverlappingLocalDirs {
        /// The nested (or equal) directory
        inner: PathBuf,
        /// The enclosing directory
        outer: PathBuf,
    },

    /// The rule file could not be read
    #[error("cannot read config: {0}")]
    Io(String),
}

/// Errors resolving an account or one of its endpoints
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccountError {
    /// No session was cached for the username
    #[error("no session for account '{0}'")]
    UnknownAccount(String),

    /// The account's catalog has no endpoint for the region
    #[error("account '{username}' has no {kind} endpoint in region '{region}'")]
    NoEndpoint {
        username: String,
        region: String,
        /// `public` or `internal`
        kind: &'static str,
    },

    /// The catalog endpoint is not a usable base URL
    #[error("invalid endpoint URL '{0}'")]
    InvalidEndpoint(String),
}
