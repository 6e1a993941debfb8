//! Per-tunnel worker: the connection state machine
//!
//! One worker task per live tunnel. It opens the two hop sessions, issues
//! the nested reverse-forward command on the endpoint hop, verifies the
//! bound port actually passes a connection, then supervises the relay,
//! reconnecting with bounded backoff when it drops. Every transition is
//! published to the status store before control moves on; failures never
//! escape the worker as errors.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use porthop_core::retry::RetryPolicy;
use porthop_core::{
    ErrorKind, StatusRecord, TunnelConfig, TunnelError, TunnelState, WorkerSettings,
};
use porthop_ssh::{reverse_forward_argv, ExecEvent, ExecHandle, RemoteSession, SessionFactory};

use crate::status::StatusStore;

/// Pause between liveness probes while the forward command is settling
const PROBE_RETRY_DELAY: Duration = Duration::from_millis(250);

/// An external instruction that ends the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// Graceful teardown requested
    Shutdown,
    /// Forceful abort requested
    Cancelled,
}

/// Why an attempt ended without an established relay
enum AttemptEnd {
    Interrupted(Interrupt),
    Failed(TunnelError),
}

/// Why supervision of an established relay ended
enum SuperviseEnd {
    Interrupted(Interrupt),
    Dropped(TunnelError),
}

/// Whether the main loop keeps running after a failure
enum LoopControl {
    Continue,
    Exit,
}

/// An established relay: both hop sessions plus the forward command stream
struct Relay {
    source: Box<dyn RemoteSession>,
    endpoint: Box<dyn RemoteSession>,
    exec: ExecHandle,
}

impl Relay {
    /// Close both hops. Each close is internally time-bounded.
    async fn close(mut self) {
        self.endpoint.close().await;
        self.source.close().await;
    }
}

/// One tunnel's state machine, run as an independent task
pub(crate) struct TunnelWorker {
    config: TunnelConfig,
    settings: WorkerSettings,
    policy: RetryPolicy,
    factory: Arc<dyn SessionFactory>,
    store: Arc<StatusStore>,
    shutdown_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
    /// Consecutive failed attempts since the last verified connection
    retry_count: u32,
}

impl TunnelWorker {
    pub(crate) fn new(
        config: TunnelConfig,
        settings: WorkerSettings,
        factory: Arc<dyn SessionFactory>,
        store: Arc<StatusStore>,
        shutdown_rx: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) -> Self {
        let policy = RetryPolicy::new(config.retry_interval_ms, config.max_retries);
        Self {
            config,
            settings,
            policy,
            factory,
            store,
            shutdown_rx,
            cancel,
            retry_count: 0,
        }
    }

    /// Publish the initial `Connecting` record. Called by the registry
    /// before the task starts, so callers never observe a stale snapshot
    /// after `connect` returns.
    pub(crate) fn publish_connecting(&self) {
        self.publish(TunnelState::Connecting, None, None, None, false);
    }

    /// Drive the state machine until teardown, cancellation, or exhaustion
    pub(crate) async fn run(mut self) {
        let mut first = true;
        loop {
            if !first {
                self.publish(TunnelState::Connecting, None, None, None, false);
            }
            first = false;

            match self.attempt().await {
                Ok(relay) => {
                    tracing::info!(tunnel = %self.config.name, "Relay verified and connected");
                    self.publish(TunnelState::Connected, None, None, None, false);
                    // A verified relay refreshes the consecutive-failure budget
                    self.retry_count = 0;

                    match self.supervise(relay).await {
                        SuperviseEnd::Interrupted(interrupt) => {
                            self.finish(interrupt);
                            return;
                        }
                        SuperviseEnd::Dropped(err) => {
                            tracing::warn!(tunnel = %self.config.name, "Relay dropped: {}", err);
                            self.publish(
                                TunnelState::Unstable,
                                Some(err.to_string()),
                                Some(err.kind()),
                                None,
                                false,
                            );
                            if let LoopControl::Exit = self.backoff(err).await {
                                return;
                            }
                        }
                    }
                }
                Err(AttemptEnd::Interrupted(interrupt)) => {
                    self.finish(interrupt);
                    return;
                }
                Err(AttemptEnd::Failed(err)) => {
                    tracing::warn!(tunnel = %self.config.name, "Connect attempt failed: {}", err);
                    if let LoopControl::Exit = self.backoff(err).await {
                        return;
                    }
                }
            }
        }
    }

    /// One full connect attempt: open both hops, issue the forward command,
    /// verify the relay. Any session opened before a failure is closed
    /// before this returns.
    async fn attempt(&mut self) -> Result<Relay, AttemptEnd> {
        let factory = Arc::clone(&self.factory);
        let source_cfg = self.config.source.clone();
        let endpoint_cfg = self.config.endpoint.clone();
        let settings = self.settings.clone();
        let source_port = self.config.source_port;
        let argv = reverse_forward_argv(&self.config);

        // Hops open sequentially; failure of either is a connect failure.
        let mut source = match self.checkpoint(factory.open(&source_cfg)).await {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => return Err(AttemptEnd::Failed(err)),
            Err(interrupt) => return Err(AttemptEnd::Interrupted(interrupt)),
        };

        let mut endpoint = match self.checkpoint(factory.open(&endpoint_cfg)).await {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => {
                source.close().await;
                return Err(AttemptEnd::Failed(err));
            }
            Err(interrupt) => {
                source.close().await;
                return Err(AttemptEnd::Interrupted(interrupt));
            }
        };

        self.publish(TunnelState::Verifying, None, None, None, false);

        let mut exec = match self.checkpoint(endpoint.exec(&argv)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                endpoint.close().await;
                source.close().await;
                return Err(AttemptEnd::Failed(err));
            }
            Err(interrupt) => {
                endpoint.close().await;
                source.close().await;
                return Err(AttemptEnd::Interrupted(interrupt));
            }
        };

        let verified = self
            .checkpoint(verify_relay(
                source.as_ref(),
                &mut exec,
                source_port,
                &settings,
            ))
            .await;

        match verified {
            Ok(Ok(())) => Ok(Relay {
                source,
                endpoint,
                exec,
            }),
            Ok(Err(err)) => {
                endpoint.close().await;
                source.close().await;
                Err(AttemptEnd::Failed(err))
            }
            Err(interrupt) => {
                endpoint.close().await;
                source.close().await;
                Err(AttemptEnd::Interrupted(interrupt))
            }
        }
    }

    /// Watch an established relay until it drops or the worker is told to
    /// stop. Both hops are closed before this returns.
    async fn supervise(&mut self, mut relay: Relay) -> SuperviseEnd {
        let mut keepalive = tokio::time::interval_at(
            Instant::now() + self.settings.keepalive_interval,
            self.settings.keepalive_interval,
        );

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    relay.close().await;
                    return SuperviseEnd::Interrupted(Interrupt::Cancelled);
                }

                _ = self.shutdown_rx.recv() => {
                    relay.close().await;
                    return SuperviseEnd::Interrupted(Interrupt::Shutdown);
                }

                // The endpoint hop's stream is polled before the keep-alive
                // probe, making it authoritative when both hops die at once.
                event = relay.exec.recv() => {
                    let detail = match event {
                        Some(ExecEvent::Data(_)) => continue,
                        Some(ExecEvent::Exited(code)) => {
                            format!("forward command exited with status {}", code)
                        }
                        Some(ExecEvent::Closed) | None => {
                            "forward command stream closed".to_string()
                        }
                    };
                    let err = TunnelError::session(&self.config.endpoint.host, detail);
                    relay.close().await;
                    return SuperviseEnd::Dropped(err);
                }

                _ = keepalive.tick() => {
                    let probed = relay
                        .source
                        .probe(self.config.source_port, self.settings.probe_timeout)
                        .await;
                    if let Err(probe_err) = probed {
                        let err = TunnelError::session(
                            &self.config.source.host,
                            format!("keep-alive probe failed: {}", probe_err),
                        );
                        relay.close().await;
                        return SuperviseEnd::Dropped(err);
                    }
                }
            }
        }
    }

    /// Count a failed attempt, then either park in `Failed` or wait out the
    /// backoff delay. The delay is interruptible by shutdown and cancel.
    async fn backoff(&mut self, err: TunnelError) -> LoopControl {
        self.retry_count += 1;

        if self.policy.exhausted(self.retry_count) {
            tracing::error!(
                tunnel = %self.config.name,
                retries = self.config.max_retries,
                "Retries exhausted: {}", err
            );
            self.publish(
                TunnelState::Failed,
                Some(format!("retries exhausted: {}", err)),
                Some(ErrorKind::RetryExhausted),
                None,
                true,
            );
            // The registry entry and this record stay observable until an
            // explicit disconnect or reconnect.
            return LoopControl::Exit;
        }

        let delay = self.policy.delay_for(self.retry_count);
        self.publish(
            TunnelState::Retrying,
            Some(err.to_string()),
            Some(err.kind()),
            Some(StatusRecord::secs_until(delay)),
            false,
        );

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.finish(Interrupt::Cancelled);
                LoopControl::Exit
            }
            _ = self.shutdown_rx.recv() => {
                self.finish(Interrupt::Shutdown);
                LoopControl::Exit
            }
            _ = tokio::time::sleep(delay) => LoopControl::Continue,
        }
    }

    /// Race a step of the attempt against shutdown and cancel signals.
    ///
    /// The caller owns any sessions opened so far and closes them on
    /// interruption; the step's own future is simply dropped.
    async fn checkpoint<T>(&mut self, fut: impl Future<Output = T>) -> Result<T, Interrupt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = self.shutdown_rx.recv() => Err(Interrupt::Shutdown),
            out = fut => Ok(out),
        }
    }

    /// Publish the terminal transition for an interrupt
    fn finish(&mut self, interrupt: Interrupt) {
        match interrupt {
            Interrupt::Shutdown => {
                self.publish(TunnelState::Disconnecting, None, None, None, false);
                self.publish_stopped();
            }
            Interrupt::Cancelled => self.publish_stopped(),
        }
        tracing::info!(tunnel = %self.config.name, "Worker stopped");
    }

    /// Publish the final `Disconnected` record with retry state cleared
    fn publish_stopped(&mut self) {
        self.retry_count = 0;
        self.publish(TunnelState::Disconnected, None, None, None, false);
    }

    fn publish(
        &self,
        state: TunnelState,
        reason: Option<String>,
        error_type: Option<ErrorKind>,
        next_retry_in: Option<u64>,
        retry_exhausted: bool,
    ) {
        self.store.publish(
            &self.config.name,
            StatusRecord {
                state,
                reason,
                error_type,
                retry_count: self.retry_count,
                max_retries: self.config.max_retries,
                next_retry_in,
                retry_exhausted,
            },
        );
    }
}

/// Confirm the freshly issued forward actually passes a connection.
///
/// Probes the bound port through the source hop until one succeeds, while
/// watching the forward command's stream for an early exit. The whole check
/// is bounded by `verify_timeout`.
async fn verify_relay(
    source: &dyn RemoteSession,
    exec: &mut ExecHandle,
    source_port: u16,
    settings: &WorkerSettings,
) -> Result<(), TunnelError> {
    let check = async {
        loop {
            tokio::select! {
                biased;

                event = exec.recv() => {
                    return match event {
                        Some(ExecEvent::Data(_)) => continue,
                        Some(ExecEvent::Exited(code)) => Err(TunnelError::ForwardRejected {
                            message: format!("forward command exited with status {}", code),
                        }),
                        Some(ExecEvent::Closed) | None => Err(TunnelError::ForwardRejected {
                            message: "forward command stream closed".to_string(),
                        }),
                    };
                }

                probed = source.probe(source_port, settings.probe_timeout) => {
                    match probed {
                        Ok(()) => return Ok(()),
                        // The remote bind may not be up yet
                        Err(_) => tokio::time::sleep(PROBE_RETRY_DELAY).await,
                    }
                }
            }
        }
    };

    match tokio::time::timeout(settings.verify_timeout, check).await {
        Ok(result) => result,
        Err(_) => Err(TunnelError::VerificationTimeout {
            timeout: settings.verify_timeout,
        }),
    }
}
