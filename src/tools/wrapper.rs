use crate::coordinator::{WorkbookOperationContext, normalize_workbook_id};
use crate::recovery::CaptureRequest;
use crate::state::GuardState;
use crate::tools::planner::ToolRecoveryPlanner;
use crate::tools::{AgentTool, MutationImpact, ToolMode, ToolOutput, UpdateCallback};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sent to the observer after every committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationEvent {
    pub workbook_id: String,
    pub session_id: String,
    pub tool_name: String,
    pub impact: MutationImpact,
    pub revision: u64,
}

/// Receives mutation events (UI refresh, context cache invalidation).
///
/// Errors are logged and dropped; they never fail the tool call.
#[async_trait]
pub trait MutationObserver: Send + Sync {
    async fn on_mutation(&self, event: &MutationEvent) -> Result<()>;
}

/// Decides what to capture before a mutating tool runs. `None` means no backup.
pub trait RecoveryPlanner: Send + Sync {
    fn plan(&self, tool_name: &str, params: &Value) -> Option<CaptureRequest>;
}

/// Supplies the workbook id for each call.
pub trait WorkbookIdentity: Send + Sync {
    fn workbook_id(&self) -> Option<String>;
}

struct FixedWorkbookId(String);

impl WorkbookIdentity for FixedWorkbookId {
    fn workbook_id(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Builds [`WrappedTool`]s sharing one guard state, session and set of hooks.
#[derive(Clone)]
pub struct MutationWrapper {
    state: Arc<GuardState>,
    session_id: String,
    observer: Option<Arc<dyn MutationObserver>>,
    planner: Option<Arc<dyn RecoveryPlanner>>,
    identity: Option<Arc<dyn WorkbookIdentity>>,
}

impl MutationWrapper {
    pub fn new(state: Arc<GuardState>, session_id: impl Into<String>) -> Self {
        Self {
            state,
            session_id: session_id.into(),
            observer: None,
            planner: Some(Arc::new(ToolRecoveryPlanner)),
            identity: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn MutationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn RecoveryPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn without_planner(mut self) -> Self {
        self.planner = None;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn WorkbookIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_workbook_id(self, workbook_id: impl Into<String>) -> Self {
        self.with_identity(Arc::new(FixedWorkbookId(workbook_id.into())))
    }

    pub fn wrap(&self, tool: Arc<dyn AgentTool>) -> WrappedTool {
        WrappedTool {
            inner: tool,
            wrapper: self.clone(),
        }
    }

    fn workbook_id(&self) -> String {
        let raw = self
            .identity
            .as_ref()
            .and_then(|identity| identity.workbook_id())
            .unwrap_or_default();
        normalize_workbook_id(&raw)
    }

    async fn notify(&self, event: MutationEvent) {
        let Some(observer) = &self.observer else {
            return;
        };
        if let Err(error) = observer.on_mutation(&event).await {
            warn!(
                workbook_id = %event.workbook_id,
                tool = %event.tool_name,
                revision = event.revision,
                error = %error,
                "mutation observer failed"
            );
        }
    }
}

/// A tool whose calls are classified, coordinated and (for mutations) backed up.
pub struct WrappedTool {
    inner: Arc<dyn AgentTool>,
    wrapper: MutationWrapper,
}

impl WrappedTool {
    /// Capture, run the tool, then persist the capture as a checkpoint.
    async fn execute_mutation(
        &self,
        ctx: &WorkbookOperationContext,
        plan: Option<CaptureRequest>,
        params: Value,
        abort: CancellationToken,
        on_update: Option<UpdateCallback>,
    ) -> Result<ToolOutput> {
        let state = self.wrapper.state.as_ref();
        let capture = match &plan {
            Some(request) => Some(state.recovery().capture(state.host(), request).await?),
            None => None,
        };

        let mut output = self
            .inner
            .execute(&ctx.op_id, params, abort, on_update)
            .await?;

        let Some(capture) = capture else {
            return Ok(output);
        };
        let recovery = match capture.into_result() {
            Ok(snapshot) => match state
                .checkpoints()
                .save(&ctx.workbook_id, &ctx.tool_name, snapshot)
                .await
            {
                Ok(checkpoint) => {
                    debug!(
                        workbook_id = %ctx.workbook_id,
                        checkpoint_id = %checkpoint.checkpoint_id,
                        "recovery checkpoint saved"
                    );
                    json!({"status": "saved", "checkpoint_id": checkpoint.checkpoint_id})
                }
                Err(error) => {
                    warn!(workbook_id = %ctx.workbook_id, error = %error, "checkpoint save failed");
                    skipped(&mut output, format!("checkpoint could not be saved: {error}"))
                }
            },
            Err(reason) => skipped(&mut output, reason),
        };
        output.set_detail("recovery", recovery);
        Ok(output)
    }
}

fn skipped(output: &mut ToolOutput, reason: String) -> Value {
    output.push_text(format!(
        "Backup skipped: {reason}. This change has no recovery checkpoint and cannot be undone automatically."
    ));
    json!({"status": "skipped", "reason": reason})
}

#[async_trait]
impl AgentTool for WrappedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn execute(
        &self,
        call_id: &str,
        params: Value,
        abort: CancellationToken,
        on_update: Option<UpdateCallback>,
    ) -> Result<ToolOutput> {
        let wrapper = &self.wrapper;
        let state = wrapper.state.as_ref();
        let tool_name = self.inner.name().to_string();
        info!(tool = %tool_name, call_id, "tool invocation requested");

        let ctx = WorkbookOperationContext::new(
            wrapper.workbook_id(),
            wrapper.session_id.clone(),
            tool_name.clone(),
        )
        .with_op_id(call_id);

        if state.policy().classify(&tool_name, &params) == ToolMode::Read {
            let inner = self.inner.as_ref();
            let call_abort = abort.clone();
            return state
                .coordinator()
                .run_read(&ctx, &abort, move || {
                    inner.execute(call_id, params, call_abort, on_update)
                })
                .await;
        }

        let impact = state.policy().impact(&tool_name, &params);
        let plan = if state.config().backups_enabled {
            wrapper
                .planner
                .as_ref()
                .and_then(|planner| planner.plan(&tool_name, &params))
        } else {
            None
        };

        let call_abort = abort.clone();
        let ctx_ref = &ctx;
        let outcome = state
            .coordinator()
            .run_write(&ctx, &abort, move || {
                self.execute_mutation(ctx_ref, plan, params, call_abort, on_update)
            })
            .await?;

        wrapper
            .notify(MutationEvent {
                workbook_id: ctx.workbook_id.clone(),
                session_id: ctx.session_id.clone(),
                tool_name,
                impact,
                revision: outcome.revision,
            })
            .await;
        Ok(outcome.result)
    }
}
