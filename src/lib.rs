//! Serialized workbook writes and typed recovery checkpoints for agent tool calls
//! against a live, shared spreadsheet.

pub mod address;
pub mod checkpoints;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod host;
pub mod recovery;
pub mod state;
pub mod telemetry;
pub mod tools;

pub use checkpoints::{
    CheckpointStore, CheckpointSummary, MemorySnapshotStore, RecoveryCheckpoint, SnapshotStore,
};
pub use config::{GuardArgs, GuardConfig};
pub use coordinator::{
    CoordinatorEvent, OperationMode, OperationPhase, QueueSnapshot, Subscription,
    WorkbookOperationContext, WorkbookOperationCoordinator, WriteOutcome,
};
pub use errors::is_abort;
pub use host::{MemoryWorkbook, WorkbookHost};
pub use recovery::{
    CaptureRequest, CaptureResult, CaptureSelection, RecoveryEngine, RecoverySnapshot,
    capture_request_schema,
};
pub use state::{GuardState, RestoreOutcome, RestoredCheckpoint};
pub use telemetry::{init_tracing, init_tracing_from};
pub use tools::{AgentTool, MutationWrapper, ToolOutput, ToolPolicy};
