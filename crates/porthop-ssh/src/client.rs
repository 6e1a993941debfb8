//! russh-backed implementation of the session adapter

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tokio::sync::mpsc;

use porthop_core::{AuthMethod, HostConfig, TunnelError};

use crate::command::join_argv;
use crate::session::{ExecEvent, ExecHandle, RemoteSession, SessionFactory};

/// Buffer for exec stream events between the channel reader and the worker
const EXEC_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Opens russh client sessions to tunnel hops
pub struct SshSessionFactory {
    /// Shared russh client configuration
    config: Arc<Config>,
    /// Timeout for connecting and authenticating one hop
    connect_timeout: Duration,
    /// Hard bound on session close
    close_grace: Duration,
}

impl SshSessionFactory {
    /// Create a factory with the given timing bounds
    pub fn new(connect_timeout: Duration, close_grace: Duration) -> Self {
        let mut config = Config::default();
        config.keepalive_interval = Some(Duration::from_secs(15));
        Self {
            config: Arc::new(config),
            connect_timeout,
            close_grace,
        }
    }
}

#[async_trait]
impl SessionFactory for SshSessionFactory {
    async fn open(&self, host: &HostConfig) -> Result<Box<dyn RemoteSession>, TunnelError> {
        let address = host.address();
        tracing::debug!("Connecting to {}", address);

        // One bound over the whole sequence; a peer that completes the key
        // exchange and then stalls during auth must not hold the attempt
        // open past the timeout.
        let connect_and_auth = async {
            let handler = ClientHandler::new(address.clone(), host.fingerprint.clone());
            let mut handle = client::connect(Arc::clone(&self.config), address.clone(), handler)
                .await
                .map_err(|e| TunnelError::network(&host.host, e))?;

            tracing::debug!("Authenticating as user '{}'", host.username);
            let authenticated = match &host.auth {
                AuthMethod::Password { password } => handle
                    .authenticate_password(&host.username, password)
                    .await
                    .map_err(|e| TunnelError::network(&host.host, e))?,
                AuthMethod::Key { path, passphrase } => {
                    let key = russh_keys::load_secret_key(path, passphrase.as_deref())
                        .map_err(|_| TunnelError::Auth {
                            host: host.host.clone(),
                        })?;
                    handle
                        .authenticate_publickey(&host.username, Arc::new(key))
                        .await
                        .map_err(|e| TunnelError::network(&host.host, e))?
                }
            };

            if !authenticated {
                return Err(TunnelError::Auth {
                    host: host.host.clone(),
                });
            }

            Ok(handle)
        };

        let handle = tokio::time::timeout(self.connect_timeout, connect_and_auth)
            .await
            .map_err(|_| {
                TunnelError::network(
                    &host.host,
                    format!(
                        "connect and auth timed out after {:?}",
                        self.connect_timeout
                    ),
                )
            })??;

        Ok(Box::new(SshRemoteSession {
            host: host.host.clone(),
            handle,
            close_grace: self.close_grace,
        }))
    }
}

/// One authenticated russh session
struct SshRemoteSession {
    /// Hostname, for error messages and log lines
    host: String,
    /// russh client handle
    handle: Handle<ClientHandler>,
    /// Hard bound on disconnect
    close_grace: Duration,
}

impl std::fmt::Debug for SshRemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshRemoteSession")
            .field("host", &self.host)
            .field("close_grace", &self.close_grace)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteSession for SshRemoteSession {
    async fn exec(&mut self, argv: &[String]) -> Result<ExecHandle, TunnelError> {
        let command = join_argv(argv);

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| TunnelError::session(&self.host, e))?;

        channel
            .exec(true, command.as_bytes())
            .await
            .map_err(|e| TunnelError::session(&self.host, e))?;

        let (tx, rx) = mpsc::channel(EXEC_EVENT_CHANNEL_CAPACITY);
        tokio::spawn(pump_channel(channel, tx));

        Ok(ExecHandle::new(rx))
    }

    async fn probe(&self, port: u16, timeout: Duration) -> Result<(), TunnelError> {
        let opened = tokio::time::timeout(
            timeout,
            self.handle
                .channel_open_direct_tcpip("127.0.0.1", u32::from(port), "127.0.0.1", 0),
        )
        .await
        .map_err(|_| {
            TunnelError::network(&self.host, format!("probe of port {} timed out", port))
        })?;

        match opened {
            // The channel served its purpose by opening; drop closes it.
            Ok(_channel) => Ok(()),
            Err(e) => Err(TunnelError::network(
                &self.host,
                format!("probe of port {} failed: {}", port, e),
            )),
        }
    }

    async fn close(&mut self) {
        let disconnect = self
            .handle
            .disconnect(Disconnect::ByApplication, "closing", "en");
        match tokio::time::timeout(self.close_grace, disconnect).await {
            Ok(Ok(())) => tracing::debug!("Closed session to {}", self.host),
            Ok(Err(e)) => tracing::debug!("Disconnect from {} failed: {}", self.host, e),
            Err(_) => tracing::warn!(
                "Disconnect from {} did not complete within {:?}",
                self.host,
                self.close_grace
            ),
        }
    }
}

/// Forward channel messages to the exec event stream until the channel dies
async fn pump_channel(mut channel: Channel<Msg>, tx: mpsc::Sender<ExecEvent>) {
    while let Some(msg) = channel.wait().await {
        let event = match msg {
            ChannelMsg::Data { data } => Some(ExecEvent::Data(Bytes::copy_from_slice(&data))),
            ChannelMsg::ExtendedData { data, .. } => {
                Some(ExecEvent::Data(Bytes::copy_from_slice(&data)))
            }
            ChannelMsg::ExitStatus { exit_status } => Some(ExecEvent::Exited(exit_status)),
            _ => None,
        };

        if let Some(event) = event {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }

    let _ = tx.send(ExecEvent::Closed).await;
}

/// Client-side russh handler for hop sessions
struct ClientHandler {
    /// Address being connected, for log lines
    address: String,
    /// Pinned host-key fingerprint, if the config carries one
    expected_fingerprint: Option<String>,
}

impl ClientHandler {
    fn new(address: String, expected_fingerprint: Option<String>) -> Self {
        Self {
            address,
            expected_fingerprint,
        }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    /// Hop hosts are operator-configured; without a pinned fingerprint the
    /// key is accepted but logged so a changed key is visible in the daemon
    /// log.
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        match &self.expected_fingerprint {
            Some(expected) if expected != &fingerprint => {
                tracing::error!(
                    "Host key mismatch for {}: expected {}, got {}",
                    self.address,
                    expected,
                    fingerprint
                );
                Ok(false)
            }
            Some(_) => Ok(true),
            None => {
                tracing::debug!("Host key for {}: {}", self.address, fingerprint);
                Ok(true)
            }
        }
    }
}
