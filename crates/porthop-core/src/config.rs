//! Configuration for the Porthop daemon and its tunnels

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::TunnelName;

/// Credential used to authenticate one hop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Password authentication
    Password { password: String },
    /// Private-key authentication
    Key {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

/// One hop of a tunnel: an SSH endpoint plus its credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Hostname or address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Login user
    pub username: String,
    /// Credential
    pub auth: AuthMethod,
    /// Expected host-key fingerprint; when set, a mismatching key is
    /// rejected instead of merely logged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl HostConfig {
    /// `host:port` form used for connecting and in log lines
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for one named tunnel, immutable per connect attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Unique name across all tunnels
    pub name: TunnelName,
    /// The hop on which the forwarded port is bound
    pub source: HostConfig,
    /// The hop whose local service is being exposed
    pub endpoint: HostConfig,
    /// Port opened on `source`
    pub source_port: u16,
    /// Port the relay must reach on `endpoint`
    pub endpoint_port: u16,
    /// Cap on consecutive reconnect attempts after the initial one
    #[serde(default)]
    pub max_retries: u32,
    /// Base delay between attempts, in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Connect this tunnel automatically at daemon startup
    #[serde(default)]
    pub auto_start: bool,
    /// UI ordering hint; no effect on orchestration
    #[serde(default)]
    pub pinned: bool,
}

fn default_retry_interval_ms() -> u64 {
    1000
}

impl TunnelConfig {
    /// Validate the config before a worker is ever created
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.as_str().is_empty() {
            return Err(ConfigError::MissingField("name".to_string()));
        }
        if self.source_port == 0 {
            return Err(ConfigError::Invalid("source_port must be positive".to_string()));
        }
        if self.endpoint_port == 0 {
            return Err(ConfigError::Invalid(
                "endpoint_port must be positive".to_string(),
            ));
        }
        validate_host(&self.source, "source")?;
        validate_host(&self.endpoint, "endpoint")?;

        // The nested forward command on the endpoint re-authenticates against
        // the source non-interactively; an encrypted key cannot be unlocked
        // from inside that invocation.
        if let AuthMethod::Key {
            passphrase: Some(_),
            ..
        } = &self.source.auth
        {
            return Err(ConfigError::Invalid(
                "source hop key must not require a passphrase".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_host(host: &HostConfig, hop: &str) -> Result<(), ConfigError> {
    if host.host.is_empty() {
        return Err(ConfigError::MissingField(format!("{}.host", hop)));
    }
    if host.port == 0 {
        return Err(ConfigError::Invalid(format!("{}.port must be positive", hop)));
    }
    if host.username.is_empty() {
        return Err(ConfigError::MissingField(format!("{}.username", hop)));
    }
    match &host.auth {
        AuthMethod::Password { password } if password.is_empty() => {
            Err(ConfigError::MissingField(format!("{}.auth.password", hop)))
        }
        AuthMethod::Key { path, .. } if path.as_os_str().is_empty() => {
            Err(ConfigError::MissingField(format!("{}.auth.path", hop)))
        }
        _ => Ok(()),
    }
}

/// Timing knobs for the tunnel workers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Timeout for opening and authenticating one hop session
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Total bound on relay verification after the forward command is issued
    #[serde(with = "duration_secs")]
    pub verify_timeout: Duration,

    /// Timeout for a single liveness probe
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Interval between keep-alive probes while connected
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// Hard bound on closing a session, even against an unresponsive peer
    #[serde(with = "duration_secs")]
    pub close_grace: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            verify_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
            keepalive_interval: Duration::from_secs(30),
            close_grace: Duration::from_secs(5),
        }
    }
}

/// Daemon configuration: HTTP listen address, worker timing, and the set
/// of configured tunnels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PorthopConfig {
    /// Address the status/control HTTP server binds to
    pub listen_address: String,

    /// Worker timing settings
    pub worker: WorkerSettings,

    /// Configured tunnels; entries with `auto_start` connect at startup
    pub tunnels: Vec<TunnelConfig>,
}

impl Default for PorthopConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:7070".to_string(),
            worker: WorkerSettings::default(),
            tunnels: Vec::new(),
        }
    }
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    std::env::var_os("PORTHOP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("porthop.toml"))
}

/// Load configuration from a TOML file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a TOML file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("failed to write config: {}", e)))?;

    Ok(())
}

/// Helper module for Duration serialization as seconds
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a Duration as seconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    /// Deserialize a Duration from seconds (u64)
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
