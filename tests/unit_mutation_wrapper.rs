use anyhow::{Result, anyhow};
use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workbook_guard::address::CellRange;
use workbook_guard::config::GuardConfig;
use workbook_guard::errors::TransientHostError;
use workbook_guard::host::HostCommand;
use workbook_guard::tools::{
    AgentTool, MutationEvent, MutationImpact, MutationObserver, MutationWrapper, ToolOutput,
    UpdateCallback,
};
use workbook_guard::{GuardState, is_abort};

mod support;

use support::{Fixture, ScriptedTool, WORKBOOK_ID};

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<MutationEvent>>,
    fail: bool,
}

#[async_trait]
impl MutationObserver for RecordingObserver {
    async fn on_mutation(&self, event: &MutationEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        if self.fail {
            return Err(anyhow!("ui refresh failed"));
        }
        Ok(())
    }
}

/// `restore_checkpoint` as an agent tool: restores inside the wrapper's write turn.
struct RestoreTool {
    state: Arc<GuardState>,
}

#[async_trait]
impl AgentTool for RestoreTool {
    fn name(&self) -> &str {
        "restore_checkpoint"
    }

    async fn execute(
        &self,
        _call_id: &str,
        params: Value,
        _abort: CancellationToken,
        _on_update: Option<UpdateCallback>,
    ) -> Result<ToolOutput> {
        let checkpoint_id = params["checkpoint_id"]
            .as_str()
            .ok_or_else(|| anyhow!("checkpoint_id is required"))?;
        let restored = self
            .state
            .restore_checkpoint_in_turn(WORKBOOK_ID, self.name(), checkpoint_id)
            .await?;
        Ok(ToolOutput::text(format!("Restored {}", restored.restored))
            .with_details(serde_json::to_value(&restored)?))
    }
}

fn wrapper(fixture: &Fixture) -> MutationWrapper {
    MutationWrapper::new(fixture.state.clone(), "session-1").with_workbook_id(WORKBOOK_ID)
}

fn set_fill(range: &str, color: &str) -> Result<HostCommand> {
    Ok(HostCommand::SetFill {
        sheet: "Sheet1".to_string(),
        range: CellRange::parse(range)?,
        color: Some(color.to_string()),
    })
}

async fn call(tool: &dyn AgentTool, params: Value) -> Result<ToolOutput> {
    tool.execute("call-1", params, CancellationToken::new(), None)
        .await
}

#[tokio::test(flavor = "current_thread")]
async fn reads_pass_through_without_a_revision() -> Result<()> {
    let fixture = support::fixture();
    let inner = Arc::new(ScriptedTool::new("read_range", fixture.host.clone()));
    let tool = wrapper(&fixture).wrap(inner.clone());

    let output = call(&tool, json!({"range": "Sheet1!A1:B2"})).await?;
    assert_eq!(output.texts().collect::<Vec<_>>(), vec!["read_range done"]);
    assert_eq!(output.details, json!({"call_id": "call-1"}));
    assert_eq!(inner.call_count(), 1);
    assert_eq!(fixture.state.coordinator().get_revision(WORKBOOK_ID), 0);
    assert!(fixture.store.keys().is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn mutation_saves_a_restorable_checkpoint() -> Result<()> {
    let fixture = support::fixture();
    fixture
        .host
        .update_cells("Sheet1", "A1:B2", |cell| cell.fill = Some("#FFFF00".to_string()))?;
    let observer = Arc::new(RecordingObserver::default());
    let inner = Arc::new(
        ScriptedTool::new("format_cells", fixture.host.clone())
            .queues(set_fill("A1:B2", "#00FF00")?),
    );
    let tool = wrapper(&fixture)
        .with_observer(observer.clone())
        .wrap(inner);

    let output = call(&tool, json!({"range": "Sheet1!A1:B2", "fill_color": "#00FF00"})).await?;
    assert_eq!(output.details["call_id"], "call-1");
    assert_eq!(output.details["recovery"]["status"], "saved");
    let checkpoint_id = output.details["recovery"]["checkpoint_id"]
        .as_str()
        .ok_or_else(|| anyhow!("checkpoint id missing"))?
        .to_string();
    assert_eq!(output.texts().count(), 1);
    assert_eq!(
        fixture.host.cell_format("Sheet1", "A1")?.fill.as_deref(),
        Some("#00FF00")
    );

    let listed = fixture.state.checkpoints().list(WORKBOOK_ID).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].checkpoint_id, checkpoint_id);
    assert_eq!(listed[0].tool_name, "format_cells");
    assert_eq!(listed[0].feature, "format");

    assert_eq!(
        observer.events.lock().clone(),
        vec![MutationEvent {
            workbook_id: WORKBOOK_ID.to_string(),
            session_id: "session-1".to_string(),
            tool_name: "format_cells".to_string(),
            impact: MutationImpact::Content,
            revision: 1,
        }]
    );

    let outcome = fixture
        .state
        .restore_checkpoint(
            &support::ctx("restore_checkpoint"),
            &CancellationToken::new(),
            &checkpoint_id,
        )
        .await?;
    assert_eq!(outcome.revision, 2);
    assert_eq!(
        fixture.host.cell_format("Sheet1", "B2")?.fill.as_deref(),
        Some("#FFFF00")
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn unsupported_capture_discloses_the_skipped_backup() -> Result<()> {
    let fixture = support::fixture();
    fixture
        .host
        .update_cells("Sheet1", "A1", |cell| cell.fill = Some("#FFFF00".to_string()))?;
    let inner = Arc::new(
        ScriptedTool::new("format_cells", fixture.host.clone())
            .queues(set_fill("A1:B2", "#00FF00")?),
    );
    let tool = wrapper(&fixture).wrap(inner.clone());

    let output = call(&tool, json!({"range": "Sheet1!A1:B2", "fill_color": "#00FF00"})).await?;
    assert_eq!(inner.call_count(), 1);
    assert_eq!(
        output.details["recovery"],
        json!({"status": "skipped", "reason": "fill color is not uniform across Sheet1!A1:B2"})
    );
    let texts: Vec<_> = output.texts().collect();
    assert_eq!(texts.len(), 2);
    assert_eq!(
        texts[1],
        "Backup skipped: fill color is not uniform across Sheet1!A1:B2. \
         This change has no recovery checkpoint and cannot be undone automatically."
    );
    assert!(fixture.state.checkpoints().list(WORKBOOK_ID).await?.is_empty());
    assert_eq!(fixture.state.coordinator().get_revision(WORKBOOK_ID), 1);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn capture_cost_ceiling_skips_the_backup() -> Result<()> {
    let fixture = support::fixture_with(GuardConfig {
        max_capture_cost: Some(10),
        ..GuardConfig::default()
    });
    let inner = Arc::new(ScriptedTool::new("format_cells", fixture.host.clone()));
    let tool = wrapper(&fixture).wrap(inner);

    let output = call(&tool, json!({"range": "Sheet1!A1:E10", "number_format": "0.00"})).await?;
    assert_eq!(output.details["recovery"]["status"], "skipped");
    assert_matches!(
        output.details["recovery"]["reason"].as_str(),
        Some(reason) if reason.contains("exceeds the limit of 10")
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn observer_failures_do_not_fail_the_call() -> Result<()> {
    let fixture = support::fixture();
    let observer = Arc::new(RecordingObserver {
        fail: true,
        ..Default::default()
    });
    let inner = Arc::new(
        ScriptedTool::new("modify_structure", fixture.host.clone()).queues(
            HostCommand::RenameSheet {
                sheet_id: fixture.host.sheet("Data").map(|s| s.id).unwrap_or_default(),
                name: "Inputs".to_string(),
            },
        ),
    );
    let tool = wrapper(&fixture)
        .with_observer(observer.clone())
        .wrap(inner);

    let output = call(
        &tool,
        json!({"action": "rename_sheet", "sheet": "Data", "new_name": "Inputs"}),
    )
    .await?;
    assert_eq!(output.details["recovery"]["status"], "saved");
    assert!(fixture.host.sheet("Inputs").is_some());

    let events = observer.events.lock().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].impact, MutationImpact::Structure);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn aborted_calls_never_reach_the_tool() -> Result<()> {
    let fixture = support::fixture();
    let inner = Arc::new(ScriptedTool::new("write_cells", fixture.host.clone()));
    let tool = wrapper(&fixture).wrap(inner.clone());
    let abort = CancellationToken::new();
    abort.cancel();

    let err = tool
        .execute("call-1", json!({"range": "A1"}), abort, None)
        .await
        .unwrap_err();
    assert!(is_abort(&err), "{err}");
    assert_eq!(inner.call_count(), 0);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn capture_errors_stop_the_mutation() -> Result<()> {
    let fixture = support::fixture();
    fixture.host.fail_next_sync("GeneralException", "host unavailable");
    let inner = Arc::new(ScriptedTool::new("format_cells", fixture.host.clone()));
    let tool = wrapper(&fixture).wrap(inner.clone());

    let err = call(&tool, json!({"range": "Sheet1!A1", "fill_color": "#00FF00"}))
        .await
        .unwrap_err();
    assert!(err.is::<TransientHostError>(), "{err}");
    assert_eq!(inner.call_count(), 0);
    assert_eq!(fixture.state.coordinator().get_revision(WORKBOOK_ID), 0);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn failed_tools_leave_no_checkpoint() -> Result<()> {
    let fixture = support::fixture();
    let inner = Arc::new(ScriptedTool::new("format_cells", fixture.host.clone()).failing("bad range"));
    let tool = wrapper(&fixture).wrap(inner);

    let err = call(&tool, json!({"range": "Sheet1!A1", "fill_color": "#00FF00"}))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "bad range");
    assert!(fixture.store.keys().is_empty());
    assert_eq!(fixture.state.coordinator().get_revision(WORKBOOK_ID), 0);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn disabled_backups_add_no_recovery_details() -> Result<()> {
    let fixture = support::fixture_with(GuardConfig {
        backups_enabled: false,
        ..GuardConfig::default()
    });
    let inner = Arc::new(ScriptedTool::new("format_cells", fixture.host.clone()));
    let tool = wrapper(&fixture).wrap(inner);

    let output = call(&tool, json!({"range": "Sheet1!A1", "fill_color": "#00FF00"})).await?;
    assert_eq!(output.details, json!({"call_id": "call-1"}));
    assert_eq!(fixture.state.coordinator().get_revision(WORKBOOK_ID), 1);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_tools_follow_the_configured_policy() -> Result<()> {
    let fixture = support::fixture();
    let tool = MutationWrapper::new(fixture.state.clone(), "session-1")
        .wrap(Arc::new(ScriptedTool::new("custom_macro", fixture.host.clone())));
    let output = call(&tool, json!({})).await?;
    assert!(output.details.get("recovery").is_none());
    // no identity configured: writes land in the shared bucket
    assert_eq!(fixture.state.coordinator().get_revision("unknown"), 1);

    let lenient = support::fixture_with(GuardConfig {
        unknown_tools_mutate: false,
        ..GuardConfig::default()
    });
    let tool = wrapper(&lenient)
        .wrap(Arc::new(ScriptedTool::new("custom_macro", lenient.host.clone())));
    call(&tool, json!({})).await?;
    assert_eq!(lenient.state.coordinator().get_revision(WORKBOOK_ID), 0);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn wrapped_restore_runs_inside_the_held_write_turn() -> Result<()> {
    let fixture = support::fixture();
    fixture
        .host
        .update_cells("Sheet1", "A1", |cell| cell.fill = Some("#FFFF00".to_string()))?;
    let format = wrapper(&fixture).wrap(Arc::new(
        ScriptedTool::new("format_cells", fixture.host.clone()).queues(set_fill("A1", "#00FF00")?),
    ));
    let output = call(&format, json!({"range": "Sheet1!A1", "fill_color": "#00FF00"})).await?;
    let checkpoint_id = output.details["recovery"]["checkpoint_id"]
        .as_str()
        .ok_or_else(|| anyhow!("checkpoint id missing"))?
        .to_string();

    let restore = wrapper(&fixture).wrap(Arc::new(RestoreTool {
        state: fixture.state.clone(),
    }));
    let output = tokio::time::timeout(
        Duration::from_secs(2),
        call(&restore, json!({"checkpoint_id": checkpoint_id})),
    )
    .await
    .map_err(|_| anyhow!("wrapped restore did not finish"))??;

    assert_eq!(output.details["restored"], checkpoint_id.as_str());
    assert!(output.details["redo_checkpoint_id"].is_string());
    assert!(output.details.get("recovery").is_none());
    assert_eq!(
        fixture.host.cell_format("Sheet1", "A1")?.fill.as_deref(),
        Some("#FFFF00")
    );
    // one revision per wrapped call
    assert_eq!(fixture.state.coordinator().get_revision(WORKBOOK_ID), 2);
    assert_eq!(fixture.state.checkpoints().list(WORKBOOK_ID).await?.len(), 2);
    Ok(())
}
