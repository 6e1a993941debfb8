//! The tunnel registry: supervisor of all workers
//!
//! Owns the name→worker map. Guarantees at most one live worker per tunnel
//! name, routes control commands, and never blocks a caller on network
//! work: `connect` returns as soon as the worker is scheduled.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use porthop_core::{
    ConfigError, StatusRecord, TunnelConfig, TunnelName, TunnelState, WorkerSettings,
};
use porthop_ssh::SessionFactory;

use crate::status::StatusStore;
use crate::worker::TunnelWorker;

/// Control handle to one spawned worker
struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Supervisor for all tunnel workers
pub struct TunnelRegistry {
    /// One entry per known tunnel name; entries for workers parked in
    /// `Failed` stay until an explicit disconnect or reconnect
    workers: DashMap<TunnelName, WorkerHandle>,
    store: Arc<StatusStore>,
    factory: Arc<dyn SessionFactory>,
    settings: WorkerSettings,
}

impl TunnelRegistry {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        store: Arc<StatusStore>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            workers: DashMap::new(),
            store,
            factory,
            settings,
        }
    }

    /// Start a worker for the config, or return the existing worker's
    /// status.
    ///
    /// Idempotent: a second `connect` for a name whose worker is neither
    /// `Disconnected` nor `Failed` observes the live worker's status rather
    /// than creating a second one. Invalid configs are rejected here,
    /// before any worker exists.
    pub fn connect(&self, config: TunnelConfig) -> Result<StatusRecord, ConfigError> {
        config.validate()?;
        let name = config.name.clone();

        // The map entry serializes racing connects for the same name:
        // exactly one caller creates the worker, the rest read its status.
        match self.workers.entry(name.clone()) {
            Entry::Occupied(mut entry) => {
                if self.store.get(&name).state.is_terminal() {
                    tracing::info!(tunnel = %name, "Restarting finished tunnel");
                    entry.insert(self.spawn(config));
                } else {
                    tracing::debug!(tunnel = %name, "Tunnel already live; connect is a no-op");
                }
            }
            Entry::Vacant(entry) => {
                tracing::info!(tunnel = %name, "Starting tunnel");
                entry.insert(self.spawn(config));
            }
        }

        Ok(self.store.get(&name))
    }

    /// Gracefully tear down a tunnel. No-op if the name is unknown.
    pub fn disconnect(&self, name: &TunnelName) {
        let Some((_, handle)) = self.workers.remove(name) else {
            tracing::debug!(tunnel = %name, "Disconnect for unknown tunnel ignored");
            return;
        };

        tracing::info!(tunnel = %name, "Disconnecting tunnel");
        let _ = handle.shutdown_tx.try_send(());
        let grace = self.settings.close_grace.saturating_mul(2);
        let store = Arc::clone(&self.store);
        let name = name.clone();

        tokio::spawn(async move {
            let mut join = handle.join;
            match tokio::time::timeout(grace, &mut join).await {
                Ok(_) => {
                    // A worker parked in `Failed` exits without acting on the
                    // signal, even when the send itself succeeded; its
                    // terminal record is reset here instead.
                    if store.get(&name).state == TunnelState::Failed {
                        store.publish(&name, StatusRecord::disconnected());
                    }
                }
                Err(_) => {
                    tracing::warn!(tunnel = %name, "Graceful teardown overran; aborting worker");
                    handle.cancel.cancel();
                    if tokio::time::timeout(grace, &mut join).await.is_err() {
                        join.abort();
                        store.publish(&name, StatusRecord::disconnected());
                    }
                }
            }
        });
    }

    /// Forcefully abort a tunnel, safe against a worker stuck
    /// mid-connect. No-op if the name is unknown.
    pub fn cancel(&self, name: &TunnelName) {
        let Some((_, handle)) = self.workers.remove(name) else {
            tracing::debug!(tunnel = %name, "Cancel for unknown tunnel ignored");
            return;
        };

        tracing::info!(tunnel = %name, "Cancelling tunnel");
        handle.cancel.cancel();
        let grace = self.settings.close_grace.saturating_mul(2);
        let store = Arc::clone(&self.store);
        let name = name.clone();

        tokio::spawn(async move {
            let mut join = handle.join;
            if tokio::time::timeout(grace, &mut join).await.is_err() {
                tracing::warn!(tunnel = %name, "Worker ignored cancel within grace; aborting");
                join.abort();
                store.publish(&name, StatusRecord::disconnected());
            } else if store.get(&name).state == TunnelState::Failed {
                // A parked worker exits without seeing the cancel; reset its
                // terminal record here.
                store.publish(&name, StatusRecord::disconnected());
            }
        });
    }

    /// Latest status for one tunnel; implicit `Disconnected` when unknown
    pub fn status(&self, name: &TunnelName) -> StatusRecord {
        self.store.get(name)
    }

    /// Snapshot of all tunnel statuses
    pub fn status_all(&self) -> std::collections::BTreeMap<TunnelName, StatusRecord> {
        self.store.snapshot()
    }

    /// Connect every config marked `auto_start`
    pub fn start_auto(&self, configs: impl IntoIterator<Item = TunnelConfig>) {
        for config in configs {
            if !config.auto_start {
                continue;
            }
            let name = config.name.clone();
            if let Err(e) = self.connect(config) {
                tracing::warn!(tunnel = %name, "Skipping auto-start: {}", e);
            }
        }
    }

    /// Number of registered workers, live or parked
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Tear down every worker and wait for the teardowns to complete.
    ///
    /// Used at process shutdown, where the spawned watchdogs of
    /// [`disconnect`](Self::disconnect) would be dropped with the runtime.
    /// Each worker gets the same grace as an individual disconnect before
    /// being cancelled and finally aborted.
    pub async fn drain(&self) {
        let names: Vec<TunnelName> = self.workers.iter().map(|e| e.key().clone()).collect();
        let grace = self.settings.close_grace.saturating_mul(2);

        for name in names {
            let Some((_, handle)) = self.workers.remove(&name) else {
                continue;
            };
            tracing::info!(tunnel = %name, "Draining tunnel");
            let _ = handle.shutdown_tx.try_send(());

            let mut join = handle.join;
            if tokio::time::timeout(grace, &mut join).await.is_err() {
                handle.cancel.cancel();
                if tokio::time::timeout(grace, &mut join).await.is_err() {
                    join.abort();
                }
            }
            if self.store.get(&name).state == TunnelState::Failed {
                self.store.publish(&name, StatusRecord::disconnected());
            }
        }
    }

    fn spawn(&self, config: TunnelConfig) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let worker = TunnelWorker::new(
            config,
            self.settings.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.store),
            shutdown_rx,
            cancel.clone(),
        );

        // Published before the task starts so a poll right after `connect`
        // already sees `Connecting`.
        worker.publish_connecting();
        let join = tokio::spawn(worker.run());

        WorkerHandle {
            shutdown_tx,
            cancel,
            join,
        }
    }
}
