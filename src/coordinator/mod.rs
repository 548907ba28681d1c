//! Per-workbook write ordering.
//!
//! Writes for one workbook run strictly one at a time in submission order;
//! reads never wait. The revision counter advances once per committed write,
//! before the caller sees the result.

mod events;

pub use events::{CoordinatorEvent, Listener, OperationMode, OperationPhase, Subscription};

use crate::errors::{AbortError, AbortStage, StaleRevisionError};
use anyhow::{Result, anyhow};
use events::ListenerRegistry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bucket for calls that arrive without a workbook identity.
pub const UNKNOWN_WORKBOOK: &str = "unknown";

pub fn normalize_workbook_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        UNKNOWN_WORKBOOK.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Identity of one tool call as it passes through the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbookOperationContext {
    pub workbook_id: String,
    pub session_id: String,
    pub op_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_revision: Option<u64>,
}

impl WorkbookOperationContext {
    pub fn new(
        workbook_id: impl Into<String>,
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        Self {
            workbook_id: workbook_id.into(),
            session_id: session_id.into(),
            op_id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            expected_revision: None,
        }
    }

    pub fn with_op_id(mut self, op_id: impl Into<String>) -> Self {
        self.op_id = op_id.into();
        self
    }

    pub fn with_expected_revision(mut self, revision: u64) -> Self {
        self.expected_revision = Some(revision);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub revision: u64,
    pub queued_writes: usize,
    pub active_write: Option<WorkbookOperationContext>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome<T> {
    pub result: T,
    pub revision: u64,
}

struct PendingWrite {
    ticket: u64,
    ctx: WorkbookOperationContext,
    start: oneshot::Sender<()>,
}

#[derive(Default)]
struct WorkbookQueueState {
    revision: u64,
    running: bool,
    active: Option<(u64, WorkbookOperationContext)>,
    queue: VecDeque<PendingWrite>,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, WorkbookQueueState>>,
    listeners: Arc<ListenerRegistry>,
    next_ticket: AtomicU64,
}

impl Inner {
    fn event(
        &self,
        phase: OperationPhase,
        mode: OperationMode,
        workbook_id: &str,
        ctx: &WorkbookOperationContext,
        error: Option<String>,
    ) -> CoordinatorEvent {
        let (revision, queued_writes) = {
            let queues = self.queues.lock();
            queues
                .get(workbook_id)
                .map(|state| (state.revision, state.queue.len()))
                .unwrap_or_default()
        };
        CoordinatorEvent {
            phase,
            mode,
            workbook_id: workbook_id.to_string(),
            session_id: ctx.session_id.clone(),
            op_id: ctx.op_id.clone(),
            tool_name: ctx.tool_name.clone(),
            revision,
            queued_writes,
            error,
        }
    }

    /// Start the head of the queue when nothing is running.
    fn process_queue(&self, workbook_id: &str) {
        let mut queues = self.queues.lock();
        let Some(state) = queues.get_mut(workbook_id) else {
            return;
        };
        if state.running {
            return;
        }
        while let Some(next) = state.queue.pop_front() {
            if next.start.send(()).is_ok() {
                debug!(workbook_id, op_id = %next.ctx.op_id, "write dequeued");
                state.running = true;
                state.active = Some((next.ticket, next.ctx));
                return;
            }
            // caller went away between enqueue and start
        }
    }

    fn release(&self, workbook_id: &str, ticket: u64) {
        {
            let mut queues = self.queues.lock();
            if let Some(state) = queues.get_mut(workbook_id) {
                let is_active = state
                    .active
                    .as_ref()
                    .is_some_and(|(active, _)| *active == ticket);
                if is_active {
                    state.running = false;
                    state.active = None;
                } else {
                    state.queue.retain(|pending| pending.ticket != ticket);
                }
            }
        }
        self.process_queue(workbook_id);
    }
}

/// Releases the queue slot (or the queued entry) however the write future ends.
struct TicketGuard {
    inner: Arc<Inner>,
    workbook_id: String,
    ticket: u64,
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        self.inner.release(&self.workbook_id, self.ticket);
    }
}

/// Arbitrates reads and writes against shared workbooks within this process.
///
/// Cloning is cheap and shares the same queues.
#[derive(Clone, Default)]
pub struct WorkbookOperationCoordinator {
    inner: Arc<Inner>,
}

impl WorkbookOperationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `op` immediately. Reads are never queued and never change the revision.
    pub async fn run_read<T, F, Fut>(
        &self,
        ctx: &WorkbookOperationContext,
        abort: &CancellationToken,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let workbook_id = normalize_workbook_id(&ctx.workbook_id);
        if abort.is_cancelled() {
            return Err(AbortError::new(&ctx.op_id, AbortStage::BeforeStart).into());
        }

        let inner = &self.inner;
        inner.listeners.emit(&inner.event(
            OperationPhase::Started,
            OperationMode::Read,
            &workbook_id,
            ctx,
            None,
        ));
        match op().await {
            Ok(value) => {
                inner.listeners.emit(&inner.event(
                    OperationPhase::Completed,
                    OperationMode::Read,
                    &workbook_id,
                    ctx,
                    None,
                ));
                Ok(value)
            }
            Err(error) => {
                debug!(workbook_id = %workbook_id, op_id = %ctx.op_id, error = %error, "read failed");
                inner.listeners.emit(&inner.event(
                    OperationPhase::Failed,
                    OperationMode::Read,
                    &workbook_id,
                    ctx,
                    Some(error.to_string()),
                ));
                Err(error)
            }
        }
    }

    /// Queue `op` behind earlier writes for the same workbook and run it when its turn comes.
    ///
    /// A failing write rejects only its own result; the queue moves on either way.
    pub async fn run_write<T, F, Fut>(
        &self,
        ctx: &WorkbookOperationContext,
        abort: &CancellationToken,
        op: F,
    ) -> Result<WriteOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let workbook_id = normalize_workbook_id(&ctx.workbook_id);
        if abort.is_cancelled() {
            return Err(AbortError::new(&ctx.op_id, AbortStage::BeforeEnqueue).into());
        }

        let inner = self.inner.clone();
        let ticket = inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (start_tx, start_rx) = oneshot::channel();

        let queued_event = {
            let mut queues = inner.queues.lock();
            let state = queues.entry(workbook_id.clone()).or_default();
            let busy = state.running || !state.queue.is_empty();
            let event = busy.then(|| CoordinatorEvent {
                phase: OperationPhase::Queued,
                mode: OperationMode::Write,
                workbook_id: workbook_id.clone(),
                session_id: ctx.session_id.clone(),
                op_id: ctx.op_id.clone(),
                tool_name: ctx.tool_name.clone(),
                revision: state.revision,
                queued_writes: state.queue.len() + 1,
                error: None,
            });
            state.queue.push_back(PendingWrite {
                ticket,
                ctx: ctx.clone(),
                start: start_tx,
            });
            event
        };
        let _guard = TicketGuard {
            inner: inner.clone(),
            workbook_id: workbook_id.clone(),
            ticket,
        };
        if let Some(event) = queued_event {
            debug!(workbook_id = %workbook_id, op_id = %ctx.op_id, depth = event.queued_writes, "write queued");
            inner.listeners.emit(&event);
        }
        inner.process_queue(&workbook_id);

        tokio::select! {
            biased;
            started = start_rx => {
                started.map_err(|_| anyhow!("write queue for '{workbook_id}' was dropped"))?;
            }
            _ = abort.cancelled() => {
                return Err(AbortError::new(&ctx.op_id, AbortStage::BeforeStart).into());
            }
        }
        if abort.is_cancelled() {
            return Err(AbortError::new(&ctx.op_id, AbortStage::BeforeStart).into());
        }

        if let Some(expected) = ctx.expected_revision {
            let actual = self.get_revision(&workbook_id);
            if actual != expected {
                let error = StaleRevisionError::new(&workbook_id, expected, actual);
                warn!(workbook_id = %workbook_id, op_id = %ctx.op_id, expected, actual, "stale write rejected");
                inner.listeners.emit(&inner.event(
                    OperationPhase::Failed,
                    OperationMode::Write,
                    &workbook_id,
                    ctx,
                    Some(error.to_string()),
                ));
                return Err(error.into());
            }
        }

        inner.listeners.emit(&inner.event(
            OperationPhase::Started,
            OperationMode::Write,
            &workbook_id,
            ctx,
            None,
        ));

        match op().await {
            Ok(result) => {
                let revision = {
                    let mut queues = inner.queues.lock();
                    let state = queues.entry(workbook_id.clone()).or_default();
                    state.revision += 1;
                    state.revision
                };
                debug!(workbook_id = %workbook_id, op_id = %ctx.op_id, revision, "write committed");
                inner.listeners.emit(&inner.event(
                    OperationPhase::Completed,
                    OperationMode::Write,
                    &workbook_id,
                    ctx,
                    None,
                ));
                Ok(WriteOutcome { result, revision })
            }
            Err(error) => {
                warn!(workbook_id = %workbook_id, op_id = %ctx.op_id, error = %error, "write failed");
                inner.listeners.emit(&inner.event(
                    OperationPhase::Failed,
                    OperationMode::Write,
                    &workbook_id,
                    ctx,
                    Some(error.to_string()),
                ));
                Err(error)
            }
        }
    }

    pub fn get_revision(&self, workbook_id: &str) -> u64 {
        let workbook_id = normalize_workbook_id(workbook_id);
        self.inner
            .queues
            .lock()
            .get(&workbook_id)
            .map(|state| state.revision)
            .unwrap_or(0)
    }

    pub fn get_snapshot(&self, workbook_id: &str) -> QueueSnapshot {
        let workbook_id = normalize_workbook_id(workbook_id);
        let queues = self.inner.queues.lock();
        match queues.get(&workbook_id) {
            Some(state) => QueueSnapshot {
                revision: state.revision,
                queued_writes: state.queue.len(),
                active_write: state.active.as_ref().map(|(_, ctx)| ctx.clone()),
            },
            None => QueueSnapshot {
                revision: 0,
                queued_writes: 0,
                active_write: None,
            },
        }
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&CoordinatorEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.listeners.add(Arc::new(listener));
        Subscription::new(&self.inner.listeners, id)
    }
}
