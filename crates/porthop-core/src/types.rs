//! Core domain types

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unique identifier for a configured tunnel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TunnelName(pub String);

impl TunnelName {
    /// Create a new tunnel name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the raw name string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TunnelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TunnelName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TunnelName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    /// No relay and no activity; the initial and post-teardown state
    Disconnected,
    /// Opening and authenticating the two hop sessions
    Connecting,
    /// Hops are up, the forward command was issued, awaiting the probe
    Verifying,
    /// The relay was verified to pass traffic
    Connected,
    /// A previously verified relay dropped or failed a keep-alive probe
    Unstable,
    /// Waiting out the backoff delay before the next attempt
    Retrying,
    /// Retry budget exhausted; terminal until an explicit reconnect
    Failed,
    /// Graceful teardown in progress
    Disconnecting,
}

impl TunnelState {
    /// Whether a worker in this state has finished its lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, TunnelState::Disconnected | TunnelState::Failed)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelState::Disconnected => "disconnected",
            TunnelState::Connecting => "connecting",
            TunnelState::Verifying => "verifying",
            TunnelState::Connected => "connected",
            TunnelState::Unstable => "unstable",
            TunnelState::Retrying => "retrying",
            TunnelState::Failed => "failed",
            TunnelState::Disconnecting => "disconnecting",
        };
        write!(f, "{}", s)
    }
}

/// Classification of a tunnel failure, exposed so a UI can distinguish
/// "fix your credentials" from "just wait"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credential rejected on either hop
    Auth,
    /// Connection refused, reset, or timed out on either hop
    Network,
    /// The remote host refused the reverse-forward command
    ForwardRejected,
    /// Hops connected but the liveness probe never saw traffic
    VerificationTimeout,
    /// Derived terminal condition: the retry budget ran out
    RetryExhausted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Network => "network",
            ErrorKind::ForwardRejected => "forward_rejected",
            ErrorKind::VerificationTimeout => "verification_timeout",
            ErrorKind::RetryExhausted => "retry_exhausted",
        };
        write!(f, "{}", s)
    }
}

/// The published status snapshot for one tunnel.
///
/// Exactly one record exists per tunnel name at any time; it is always the
/// most recent transition, never a queue. Wire field names are the stable
/// polling contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    /// Current lifecycle state
    pub state: TunnelState,
    /// Human-readable explanation of the last transition, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Failure classification, if the last transition was failure-driven
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
    /// Consecutive failed attempts since the last verified connection
    pub retry_count: u32,
    /// Configured cap on consecutive reconnect attempts
    pub max_retries: u32,
    /// Seconds until the next automatic attempt, while retrying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_in: Option<u64>,
    /// Whether the retry budget has been exhausted
    pub retry_exhausted: bool,
}

impl StatusRecord {
    /// The implicit record for a tunnel nobody has ever connected
    pub fn disconnected() -> Self {
        Self {
            state: TunnelState::Disconnected,
            reason: None,
            error_type: None,
            retry_count: 0,
            max_retries: 0,
            next_retry_in: None,
            retry_exhausted: false,
        }
    }

    /// Seconds until the next retry, rounded up from the computed delay
    pub fn secs_until(delay: Duration) -> u64 {
        let millis = delay.as_millis() as u64;
        millis.div_ceil(1000)
    }
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self::disconnected()
    }
}
