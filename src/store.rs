//! Shared execution state.
//!
//! `ExecutionStore` is the single place client-side execution progress lives.
//! Only the sync client writes to it; consumers hold an
//! [`ExecutionStoreReader`] and listen for [`StoreChange`] notifications.
//!
//! Merge contract: an update is merged shallowly into the stored entry.
//! Top-level fields present in the update replace the stored ones; fields the
//! update does not mention are kept. Entries are never evicted.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};

use crate::connection::ConnectionStatus;
use crate::protocol::ScreenshotFrame;

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Latest known fields of one execution, without its `execution_id`.
pub type ExecutionEntry = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Execution(String),
    Frame(String),
}

#[derive(Default)]
struct StoreInner {
    executions: HashMap<String, ExecutionEntry>,
    frames: HashMap<String, ScreenshotFrame>,
    connection: Option<watch::Receiver<ConnectionStatus>>,
}

/// Shared handle to the execution state.
///
/// Writes are crate-private; code outside the sync client can only read.
///
/// ```compile_fail
/// let store = playbook_sync::ExecutionStore::new();
/// store.set_execution_update("e1", serde_json::Map::new());
/// ```
#[derive(Clone)]
pub struct ExecutionStore {
    inner: Arc<RwLock<StoreInner>>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            changes,
        }
    }

    /// Read-only handle for consumers.
    pub fn reader(&self) -> ExecutionStoreReader {
        ExecutionStoreReader {
            store: self.clone(),
        }
    }

    /// Mirrors a connection manager's status for observability.
    pub(crate) fn attach_connection_status(&self, status: watch::Receiver<ConnectionStatus>) {
        self.inner.write().connection = Some(status);
    }

    pub(crate) fn set_execution_update(&self, execution_id: &str, update: Map<String, Value>) {
        {
            let mut inner = self.inner.write();
            let entry = inner.executions.entry(execution_id.to_string()).or_default();
            for (key, value) in update {
                entry.insert(key, value);
            }
        }
        let _ = self
            .changes
            .send(StoreChange::Execution(execution_id.to_string()));
    }

    pub(crate) fn set_screenshot_frame(&self, execution_id: &str, frame: ScreenshotFrame) {
        self.inner
            .write()
            .frames
            .insert(execution_id.to_string(), frame);
        let _ = self.changes.send(StoreChange::Frame(execution_id.to_string()));
    }

    pub fn execution(&self, execution_id: &str) -> Option<ExecutionEntry> {
        self.inner.read().executions.get(execution_id).cloned()
    }

    pub fn status(&self, execution_id: &str) -> Option<String> {
        self.inner
            .read()
            .executions
            .get(execution_id)
            .and_then(|entry| entry.get("status"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    }

    pub fn latest_frame(&self, execution_id: &str) -> Option<ScreenshotFrame> {
        self.inner.read().frames.get(execution_id).cloned()
    }

    pub fn execution_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().executions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> HashMap<String, ExecutionEntry> {
        self.inner.read().executions.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().executions.is_empty()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner
            .read()
            .connection
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Consumer view of an [`ExecutionStore`]: lookups and change notifications,
/// no setters.
#[derive(Clone)]
pub struct ExecutionStoreReader {
    store: ExecutionStore,
}

impl ExecutionStoreReader {
    pub fn execution(&self, execution_id: &str) -> Option<ExecutionEntry> {
        self.store.execution(execution_id)
    }

    pub fn status(&self, execution_id: &str) -> Option<String> {
        self.store.status(execution_id)
    }

    pub fn latest_frame(&self, execution_id: &str) -> Option<ScreenshotFrame> {
        self.store.latest_frame(execution_id)
    }

    pub fn execution_ids(&self) -> Vec<String> {
        self.store.execution_ids()
    }

    pub fn snapshot(&self) -> HashMap<String, ExecutionEntry> {
        self.store.snapshot()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.store.connection_status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }
}
