use crate::checkpoints::{CheckpointStore, SnapshotStore};
use crate::config::GuardConfig;
use crate::coordinator::{WorkbookOperationContext, WorkbookOperationCoordinator};
use crate::errors::ValidationError;
use crate::host::WorkbookHost;
use crate::recovery::RecoveryEngine;
use crate::tools::ToolPolicy;
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What a restore wrote, independent of the write turn it ran in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoredCheckpoint {
    pub restored: String,
    /// Checkpoint holding the state the restore overwrote.
    pub redo_checkpoint_id: Option<String>,
    /// Set when the redo checkpoint could not be saved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redo_skipped: Option<String>,
}

/// Result of restoring a checkpoint as a coordinated write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreOutcome {
    pub restored: String,
    pub redo_checkpoint_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redo_skipped: Option<String>,
    pub revision: u64,
}

/// Everything one session needs, built once at startup and shared by reference.
pub struct GuardState {
    config: Arc<GuardConfig>,
    coordinator: WorkbookOperationCoordinator,
    recovery: RecoveryEngine,
    checkpoints: CheckpointStore,
    host: Arc<dyn WorkbookHost>,
    policy: ToolPolicy,
}

impl GuardState {
    pub fn new(
        config: Arc<GuardConfig>,
        host: Arc<dyn WorkbookHost>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self::with_coordinator(config, host, store, WorkbookOperationCoordinator::new())
    }

    /// Share an existing coordinator, e.g. between several wrappers for one workbook.
    pub fn with_coordinator(
        config: Arc<GuardConfig>,
        host: Arc<dyn WorkbookHost>,
        store: Arc<dyn SnapshotStore>,
        coordinator: WorkbookOperationCoordinator,
    ) -> Self {
        let recovery = RecoveryEngine::new(config.capture_cost_ceiling());
        let checkpoints = CheckpointStore::new(store, config.max_checkpoints);
        let policy = ToolPolicy::new(config.unknown_tools_mutate);
        Self {
            config,
            coordinator,
            recovery,
            checkpoints,
            host,
            policy,
        }
    }

    pub fn config(&self) -> Arc<GuardConfig> {
        self.config.clone()
    }

    pub fn coordinator(&self) -> &WorkbookOperationCoordinator {
        &self.coordinator
    }

    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn host(&self) -> &dyn WorkbookHost {
        self.host.as_ref()
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    /// Restore a stored checkpoint as a coordinated write.
    ///
    /// The overwritten state is saved as a new checkpoint so the restore itself can be undone.
    pub async fn restore_checkpoint(
        &self,
        ctx: &WorkbookOperationContext,
        abort: &CancellationToken,
        checkpoint_id: &str,
    ) -> Result<RestoreOutcome> {
        let outcome = self
            .coordinator
            .run_write(ctx, abort, || {
                self.restore_checkpoint_in_turn(&ctx.workbook_id, &ctx.tool_name, checkpoint_id)
            })
            .await?;

        let RestoredCheckpoint {
            restored,
            redo_checkpoint_id,
            redo_skipped,
        } = outcome.result;
        info!(
            workbook_id = %ctx.workbook_id,
            checkpoint_id = %restored,
            redo_checkpoint_id = ?redo_checkpoint_id,
            revision = outcome.revision,
            "checkpoint restored"
        );
        Ok(RestoreOutcome {
            restored,
            redo_checkpoint_id,
            redo_skipped,
            revision: outcome.revision,
        })
    }

    /// Restore a stored checkpoint inside a write turn the caller already holds.
    ///
    /// Wrapped `restore_checkpoint` tools call this; the wrapper owns the turn and the revision.
    /// Once the host has been written, a failed redo save is reported in `redo_skipped`.
    pub async fn restore_checkpoint_in_turn(
        &self,
        workbook_id: &str,
        tool_name: &str,
        checkpoint_id: &str,
    ) -> Result<RestoredCheckpoint> {
        let checkpoint = self
            .checkpoints
            .get(workbook_id, checkpoint_id)
            .await?
            .ok_or_else(|| {
                ValidationError::new(format!("checkpoint '{checkpoint_id}' not found"))
                    .with_path("checkpoint_id")
            })?;
        let previous = self
            .recovery
            .restore(self.host(), &checkpoint.snapshot)
            .await?;
        let (redo_checkpoint_id, redo_skipped) =
            match self.checkpoints.save(workbook_id, tool_name, previous).await {
                Ok(redo) => (Some(redo.checkpoint_id), None),
                Err(err) => {
                    warn!(
                        workbook_id,
                        checkpoint_id = %checkpoint.checkpoint_id,
                        error = %err,
                        "redo checkpoint not saved"
                    );
                    (None, Some(format!("redo checkpoint not saved: {err}")))
                }
            };
        Ok(RestoredCheckpoint {
            restored: checkpoint.checkpoint_id,
            redo_checkpoint_id,
            redo_skipped,
        })
    }
}
