use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use workbook_guard::config::GuardConfig;
use workbook_guard::errors::{RestoreIntegrityError, ValidationError};
use workbook_guard::recovery::CommentThreadState;
use workbook_guard::{
    CheckpointStore, GuardState, MemorySnapshotStore, RecoverySnapshot, SnapshotStore,
};

mod support;

/// Memory store whose writes can be switched off.
#[derive(Default)]
struct ReadOnlyAfter {
    inner: MemorySnapshotStore,
    read_only: AtomicBool,
}

#[async_trait]
impl SnapshotStore for ReadOnlyAfter {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            bail!("snapshot store is read-only");
        }
        self.inner.set(key, value).await
    }
}

fn comment_snapshot(content: &str) -> RecoverySnapshot {
    RecoverySnapshot::Comment {
        address: "Sheet1!A1".to_string(),
        state: CommentThreadState {
            exists: true,
            content: content.to_string(),
            resolved: false,
            replies: Vec::new(),
        },
    }
}

#[tokio::test(flavor = "current_thread")]
async fn save_keeps_the_newest_checkpoints_per_workbook() -> Result<()> {
    let store = Arc::new(MemorySnapshotStore::new());
    let checkpoints = CheckpointStore::new(store.clone(), 2);

    let first = checkpoints.save(" book-1 ", "comments", comment_snapshot("one")).await?;
    let second = checkpoints.save("book-1", "comments", comment_snapshot("two")).await?;
    let third = checkpoints.save("book-1", "format_cells", comment_snapshot("three")).await?;
    checkpoints.save("book-2", "comments", comment_snapshot("other")).await?;

    assert_eq!(first.workbook_id, "book-1");
    let listed = checkpoints.list("book-1 ").await?;
    let ids: Vec<_> = listed.iter().map(|c| c.checkpoint_id.as_str()).collect();
    assert_eq!(ids, vec![second.checkpoint_id.as_str(), third.checkpoint_id.as_str()]);
    assert_eq!(listed[1].tool_name, "format_cells");
    assert_eq!(listed[1].feature, "comment");

    assert_eq!(checkpoints.get("book-1", &first.checkpoint_id).await?, None);
    assert_eq!(
        checkpoints.get("book-1", &third.checkpoint_id).await?,
        Some(third.clone())
    );
    assert_eq!(checkpoints.list("book-2").await?.len(), 1);
    assert!(
        !store
            .keys()
            .iter()
            .any(|key| key.ends_with(&first.checkpoint_id))
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn delete_removes_entry_and_index_row() -> Result<()> {
    let store = Arc::new(MemorySnapshotStore::new());
    let checkpoints = CheckpointStore::new(store.clone(), 5);
    let saved = checkpoints.save("book-1", "comments", comment_snapshot("one")).await?;

    assert!(checkpoints.delete("book-1", &saved.checkpoint_id).await?);
    assert!(!checkpoints.delete("book-1", &saved.checkpoint_id).await?);
    assert!(checkpoints.list("book-1").await?.is_empty());
    assert!(store.keys().is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn unreadable_entries_are_integrity_errors() -> Result<()> {
    let store = Arc::new(MemorySnapshotStore::new());
    let checkpoints = CheckpointStore::new(store.clone(), 5);
    store.put_raw(
        "workbook-guard:book-1:checkpoint:legacy",
        json!({"checkpoint_id": "legacy", "snapshot": {"feature": "charts"}}),
    );
    let err = checkpoints.get("book-1", "legacy").await.unwrap_err();
    assert!(err.is::<RestoreIntegrityError>(), "{err}");

    store.put_raw("workbook-guard:book-1:index", json!({"not": "a list"}));
    let err = checkpoints.list("book-1").await.unwrap_err();
    assert!(err.is::<RestoreIntegrityError>(), "{err}");

    store.set("workbook-guard:book-1:index", serde_json::Value::Null).await?;
    assert!(checkpoints.list("book-1").await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn restore_checkpoint_writes_state_and_saves_redo() -> Result<()> {
    let fixture = support::fixture();
    fixture.host.add_comment("Sheet1", "A1", "before", false, &[])?;
    let checkpoints = fixture.state.checkpoints();
    let saved = checkpoints
        .save(support::WORKBOOK_ID, "comments", comment_snapshot("restored text"))
        .await?;

    let outcome = fixture
        .state
        .restore_checkpoint(
            &support::ctx("restore_checkpoint"),
            &CancellationToken::new(),
            &saved.checkpoint_id,
        )
        .await?;
    assert_eq!(outcome.restored, saved.checkpoint_id);
    assert_eq!(outcome.revision, 1);
    assert_eq!(
        fixture.state.coordinator().get_revision(support::WORKBOOK_ID),
        1
    );
    assert_eq!(fixture.host.comments("Sheet1")?[0].content, "restored text");
    assert_eq!(outcome.redo_skipped, None);

    let redo_id = outcome
        .redo_checkpoint_id
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("redo checkpoint id missing"))?;
    let redo = checkpoints
        .get(support::WORKBOOK_ID, redo_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("redo checkpoint missing"))?;
    assert_eq!(redo.tool_name, "restore_checkpoint");
    assert_eq!(redo.snapshot, comment_snapshot("before"));

    // restoring the redo checkpoint undoes the restore
    fixture
        .state
        .restore_checkpoint(
            &support::ctx("restore_checkpoint"),
            &CancellationToken::new(),
            redo_id,
        )
        .await?;
    assert_eq!(fixture.host.comments("Sheet1")?[0].content, "before");
    assert_eq!(checkpoints.list(support::WORKBOOK_ID).await?.len(), 3);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_checkpoint_is_a_validation_error() -> Result<()> {
    let fixture = support::fixture_with(GuardConfig {
        max_checkpoints: 3,
        ..GuardConfig::default()
    });
    let err = fixture
        .state
        .restore_checkpoint(
            &support::ctx("restore_checkpoint"),
            &CancellationToken::new(),
            "nope",
        )
        .await
        .unwrap_err();
    let validation = err
        .downcast_ref::<ValidationError>()
        .ok_or_else(|| anyhow::anyhow!("expected a validation error, got {err}"))?;
    assert_eq!(validation.path(), Some("checkpoint_id"));
    assert!(validation.message().contains("'nope'"));
    // failed writes still take a turn but leave the revision alone
    assert_eq!(
        fixture.state.coordinator().get_revision(support::WORKBOOK_ID),
        0
    );
    assert!(fixture.host.command_log().is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn restore_commits_when_the_redo_save_fails() -> Result<()> {
    let host = support::workbook();
    let store = Arc::new(ReadOnlyAfter::default());
    let state = GuardState::new(Arc::new(GuardConfig::default()), host.clone(), store.clone());
    host.add_comment("Sheet1", "A1", "before", false, &[])?;
    let saved = state
        .checkpoints()
        .save(support::WORKBOOK_ID, "comments", comment_snapshot("restored text"))
        .await?;
    store.read_only.store(true, Ordering::SeqCst);

    let outcome = state
        .restore_checkpoint(
            &support::ctx("restore_checkpoint"),
            &CancellationToken::new(),
            &saved.checkpoint_id,
        )
        .await?;
    assert_eq!(outcome.restored, saved.checkpoint_id);
    assert_eq!(outcome.redo_checkpoint_id, None);
    assert_matches::assert_matches!(
        outcome.redo_skipped.as_deref(),
        Some(reason) if reason.contains("read-only")
    );
    assert_eq!(outcome.revision, 1);
    assert_eq!(state.coordinator().get_revision(support::WORKBOOK_ID), 1);
    assert_eq!(host.comments("Sheet1")?[0].content, "restored text");
    assert_eq!(state.checkpoints().list(support::WORKBOOK_ID).await?.len(), 1);
    Ok(())
}
