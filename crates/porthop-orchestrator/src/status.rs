//! The status store: latest record per tunnel, readable at any time

use std::collections::BTreeMap;

use dashmap::DashMap;
use tokio::sync::broadcast;

use porthop_core::{StatusRecord, TunnelName};

/// Buffer for the best-effort transition broadcast
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A status transition, as published by a worker
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub name: TunnelName,
    pub record: StatusRecord,
}

/// Concurrent map from tunnel name to its latest status record.
///
/// Writes are single-writer-per-key (the owning worker); reads may happen at
/// any time. Reading a name with no record yields the implicit
/// `Disconnected` default rather than "not found". Polling the snapshot is
/// the primary contract; the broadcast of transitions is best-effort and
/// lossy.
pub struct StatusStore {
    /// Latest record per tunnel name
    records: DashMap<TunnelName, StatusRecord>,
    /// Transition broadcast; send errors are ignored when nobody listens
    events: broadcast::Sender<StatusEvent>,
}

impl StatusStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            records: DashMap::new(),
            events,
        }
    }

    /// Replace the record for a tunnel and broadcast the transition
    pub fn publish(&self, name: &TunnelName, record: StatusRecord) {
        self.records.insert(name.clone(), record.clone());
        let _ = self.events.send(StatusEvent {
            name: name.clone(),
            record,
        });
    }

    /// Latest record for a tunnel; implicit `Disconnected` if none exists
    pub fn get(&self, name: &TunnelName) -> StatusRecord {
        self.records
            .get(name)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Snapshot of all records, ordered by name
    pub fn snapshot(&self) -> BTreeMap<TunnelName, StatusRecord> {
        self.records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Subscribe to status transitions
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}
