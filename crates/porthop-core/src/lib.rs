//! porthop-core: Shared types and configuration for Porthop
//!
//! This crate provides the domain types (tunnel names, states, status
//! records), configuration structures, error taxonomy, and retry policy
//! shared by the session adapter and the orchestrator.

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::{AuthMethod, HostConfig, PorthopConfig, TunnelConfig, WorkerSettings};
pub use error::{ConfigError, TunnelError};
pub use types::{ErrorKind, StatusRecord, TunnelName, TunnelState};
