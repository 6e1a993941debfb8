//! Error taxonomy for Porthop
//!
//! Tunnel failures never cross the worker boundary as errors; they are
//! classified here and surfaced as `reason`/`errorType` status fields.
//! Only configuration problems are reported synchronously to callers.

use std::time::Duration;

use thiserror::Error;

use crate::types::ErrorKind;

/// A failure while establishing or supervising a tunnel.
///
/// Every variant maps onto a stable [`ErrorKind`] via [`TunnelError::kind`];
/// the display string becomes the published `reason`.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Credential rejected while authenticating a hop
    #[error("authentication rejected by {host}")]
    Auth { host: String },

    /// Connection refused, reset, or timed out while reaching a hop
    #[error("connection to {host} failed: {message}")]
    Network { host: String, message: String },

    /// The remote shell refused or terminated the reverse-forward command
    #[error("reverse forward rejected: {message}")]
    ForwardRejected { message: String },

    /// The relay never passed a probe connection within the bound
    #[error("relay verification timed out after {timeout:?}")]
    VerificationTimeout { timeout: Duration },

    /// A hop session terminated or errored after it was established
    #[error("session error on {host}: {message}")]
    Session { host: String, message: String },
}

impl TunnelError {
    /// Taxonomy key for the status contract
    pub fn kind(&self) -> ErrorKind {
        match self {
            TunnelError::Auth { .. } => ErrorKind::Auth,
            TunnelError::Network { .. } => ErrorKind::Network,
            TunnelError::ForwardRejected { .. } => ErrorKind::ForwardRejected,
            TunnelError::VerificationTimeout { .. } => ErrorKind::VerificationTimeout,
            TunnelError::Session { .. } => ErrorKind::Network,
        }
    }

    /// Network-style failure helper
    pub fn network(host: impl Into<String>, message: impl ToString) -> Self {
        TunnelError::Network {
            host: host.into(),
            message: message.to_string(),
        }
    }

    /// Session-died failure helper
    pub fn session(host: impl Into<String>, message: impl ToString) -> Self {
        TunnelError::Session {
            host: host.into(),
            message: message.to_string(),
        }
    }
}

/// Configuration-related errors, rejected synchronously at `connect` time
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("config file not found: {0}")]
    NotFound(std::path::PathBuf),

    /// Invalid configuration
    #[error("invalid config: {0}")]
    Invalid(String),

    /// Missing required field
    #[error("missing required field: {0}")]
    MissingField(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = TunnelError::Auth {
            host: "db.internal".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Auth);

        let err = TunnelError::network("db.internal", "connection refused");
        assert_eq!(err.kind(), ErrorKind::Network);

        let err = TunnelError::ForwardRejected {
            message: "remote port forwarding disabled".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::ForwardRejected);

        let err = TunnelError::VerificationTimeout {
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.kind(), ErrorKind::VerificationTimeout);
    }

    #[test]
    fn test_session_errors_read_as_network() {
        let err = TunnelError::session("app.internal", "channel closed");
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.to_string().contains("app.internal"));
    }
}
