//! cdnmirror core - domain types and ports
//!
//! This crate contains:
//! - **Domain types** - `ConfigEntry`, `Job`, `WorkerKey`, `ObjectRef`, `AccountSession`, `AccountCache`
//! - **Rule file** - the line-oriented `key=value` parser in [`config`]
//! - **Settings** - YAML daemon tunables in [`settings`]
//! - **Ports** - the [`ports::transport::ITransport`] trait the workers send requests through
//!
//! # Architecture
//!
//! Like the other crates in this workspace, core follows the ports & adapters
//! layout: the domain module has no I/O, the ports module defines the traits
//! that adapter crates (`cdnmirror-cloud`) implement.

pub mod config;
pub mod domain;
pub mod ports;
pub mod settings;
