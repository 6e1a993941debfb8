//! Scripted fake session adapter for orchestrator tests
//!
//! Opens are scripted per host (accept, reject auth, refuse, or hang
//! forever), probes are scripted globally, and every successful open and
//! close is counted so tests can assert nothing leaks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use porthop_core::{
    AuthMethod, HostConfig, TunnelConfig, TunnelError, TunnelName, WorkerSettings,
};
use porthop_ssh::{ExecEvent, ExecHandle, RemoteSession, SessionFactory};

/// Outcome of one scripted `open` call
#[derive(Debug, Clone, Copy)]
pub enum OpenPlan {
    Accept,
    RejectAuth,
    Refuse,
    Hang,
}

struct FakeInner {
    /// Per-host queues of scripted outcomes, consumed front-first
    scripts: Mutex<HashMap<String, VecDeque<OpenPlan>>>,
    /// Per-host fallback once a script runs dry
    defaults: Mutex<HashMap<String, OpenPlan>>,
    /// Scripted probe outcomes, then `probe_default`
    probe_script: Mutex<VecDeque<bool>>,
    probe_default: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    /// Live forward-command streams; dropping the senders simulates the
    /// relay dying
    exec_txs: Mutex<Vec<mpsc::Sender<ExecEvent>>>,
}

#[derive(Clone)]
pub struct FakeFactory {
    inner: Arc<FakeInner>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FakeInner {
                scripts: Mutex::new(HashMap::new()),
                defaults: Mutex::new(HashMap::new()),
                probe_script: Mutex::new(VecDeque::new()),
                probe_default: AtomicBool::new(true),
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                exec_txs: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Queue outcomes for the next opens of `host`
    pub fn script_open(&self, host: &str, plans: impl IntoIterator<Item = OpenPlan>) {
        self.inner
            .scripts
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .extend(plans);
    }

    /// Set the fallback outcome for `host`
    pub fn set_default(&self, host: &str, plan: OpenPlan) {
        self.inner
            .defaults
            .lock()
            .unwrap()
            .insert(host.to_string(), plan);
    }

    /// Make every unscripted probe fail
    pub fn fail_probes(&self) {
        self.inner.probe_default.store(false, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Kill every live forward-command stream
    pub fn drop_relays(&self) {
        self.inner.exec_txs.lock().unwrap().clear();
    }

    fn next_plan(&self, host: &str) -> OpenPlan {
        if let Some(plan) = self
            .inner
            .scripts
            .lock()
            .unwrap()
            .get_mut(host)
            .and_then(|q| q.pop_front())
        {
            return plan;
        }
        self.inner
            .defaults
            .lock()
            .unwrap()
            .get(host)
            .copied()
            .unwrap_or(OpenPlan::Accept)
    }

    /// Queue outcomes for the next probes, ahead of the default
    pub fn script_probes(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.inner.probe_script.lock().unwrap().extend(outcomes);
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self, host: &HostConfig) -> Result<Box<dyn RemoteSession>, TunnelError> {
        match self.next_plan(&host.host) {
            OpenPlan::Accept => {
                self.inner.opens.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FakeSession {
                    inner: Arc::clone(&self.inner),
                }))
            }
            OpenPlan::RejectAuth => Err(TunnelError::Auth {
                host: host.host.clone(),
            }),
            OpenPlan::Refuse => Err(TunnelError::network(&host.host, "connection refused")),
            OpenPlan::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

struct FakeSession {
    inner: Arc<FakeInner>,
}

impl std::fmt::Debug for FakeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeSession").finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn exec(&mut self, _argv: &[String]) -> Result<ExecHandle, TunnelError> {
        let (tx, rx) = mpsc::channel(8);
        self.inner.exec_txs.lock().unwrap().push(tx);
        Ok(ExecHandle::new(rx))
    }

    async fn probe(&self, port: u16, _timeout: Duration) -> Result<(), TunnelError> {
        if self.next_probe_ok() {
            Ok(())
        } else {
            Err(TunnelError::network(
                "src.test",
                format!("probe of port {} refused", port),
            ))
        }
    }

    async fn close(&mut self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeSession {
    fn next_probe_ok(&self) -> bool {
        self.inner
            .probe_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.inner.probe_default.load(Ordering::SeqCst))
    }
}

/// A tunnel between the fake hosts `src.test` and `end.test`
pub fn tunnel_config(name: &str, max_retries: u32) -> TunnelConfig {
    TunnelConfig {
        name: TunnelName::new(name),
        source: host("src.test"),
        endpoint: host("end.test"),
        source_port: 15432,
        endpoint_port: 5432,
        max_retries,
        retry_interval_ms: 1000,
        auto_start: false,
        pinned: false,
    }
}

fn host(name: &str) -> HostConfig {
    HostConfig {
        host: name.to_string(),
        port: 22,
        username: "relay".to_string(),
        auth: AuthMethod::Password {
            password: "secret".to_string(),
        },
        fingerprint: None,
    }
}

/// Worker timing small enough for tests, deterministic under paused time
pub fn fast_settings() -> WorkerSettings {
    WorkerSettings {
        connect_timeout: Duration::from_secs(5),
        verify_timeout: Duration::from_secs(2),
        probe_timeout: Duration::from_secs(1),
        keepalive_interval: Duration::from_secs(30),
        close_grace: Duration::from_secs(1),
    }
}
