#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use workbook_guard::config::GuardConfig;
use workbook_guard::host::{HostCommand, NativeBorder, WorkbookHost};
use workbook_guard::tools::{AgentTool, ToolOutput, UpdateCallback};
use workbook_guard::{GuardState, MemorySnapshotStore, MemoryWorkbook, WorkbookOperationContext};

pub const WORKBOOK_ID: &str = "book-1";

/// `Sheet1` (active) and `Data`.
pub fn workbook() -> Arc<MemoryWorkbook> {
    Arc::new(MemoryWorkbook::with_sheets(&["Sheet1", "Data"]))
}

pub struct Fixture {
    pub host: Arc<MemoryWorkbook>,
    pub store: Arc<MemorySnapshotStore>,
    pub state: Arc<GuardState>,
}

pub fn fixture() -> Fixture {
    fixture_with(GuardConfig::default())
}

pub fn fixture_with(config: GuardConfig) -> Fixture {
    let host = workbook();
    let store = Arc::new(MemorySnapshotStore::new());
    let state = Arc::new(GuardState::new(
        Arc::new(config),
        host.clone(),
        store.clone(),
    ));
    Fixture { host, store, state }
}

pub fn ctx(tool_name: &str) -> WorkbookOperationContext {
    WorkbookOperationContext::new(WORKBOOK_ID, "session-1", tool_name)
}

pub fn border(style: &str, weight: Option<&str>) -> NativeBorder {
    NativeBorder {
        style: style.to_string(),
        weight: weight.map(str::to_string),
        color: None,
    }
}

/// A tool that queues fixed host commands and syncs, recording every call.
pub struct ScriptedTool {
    name: String,
    host: Arc<MemoryWorkbook>,
    commands: Vec<HostCommand>,
    fail_with: Option<String>,
    pub calls: Mutex<Vec<Value>>,
}

impl ScriptedTool {
    pub fn new(name: &str, host: Arc<MemoryWorkbook>) -> Self {
        Self {
            name: name.to_string(),
            host,
            commands: Vec::new(),
            fail_with: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn queues(mut self, command: HostCommand) -> Self {
        self.commands.push(command);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl AgentTool for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        call_id: &str,
        params: Value,
        _abort: CancellationToken,
        _on_update: Option<UpdateCallback>,
    ) -> Result<ToolOutput> {
        self.calls.lock().push(params);
        if let Some(message) = &self.fail_with {
            bail!("{message}");
        }
        for command in &self.commands {
            self.host.queue(command.clone());
        }
        self.host.sync().await?;
        Ok(ToolOutput::text(format!("{} done", self.name))
            .with_details(json!({"call_id": call_id})))
    }
}
