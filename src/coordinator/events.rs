use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPhase {
    Queued,
    Started,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorEvent {
    pub phase: OperationPhase,
    pub mode: OperationMode,
    pub workbook_id: String,
    pub session_id: String,
    pub op_id: String,
    pub tool_name: String,
    pub revision: u64,
    pub queued_writes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type Listener = Arc<dyn Fn(&CoordinatorEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Deliver outside the lock so listeners may query the coordinator.
    pub(crate) fn emit(&self, event: &CoordinatorEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(
                    workbook_id = %event.workbook_id,
                    op_id = %event.op_id,
                    phase = ?event.phase,
                    "coordinator listener panicked"
                );
            }
        }
    }
}

/// Handle returned by `subscribe`. Listening continues until `unsubscribe` is called.
#[must_use = "dropping the subscription keeps the listener registered; call unsubscribe() to stop"]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(registry: &Arc<ListenerRegistry>, id: u64) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            id,
        }
    }

    /// Returns false when the listener was already gone.
    pub fn unsubscribe(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.id))
    }
}
