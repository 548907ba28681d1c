use super::{CaptureResult, StateCapturer, resolve_sheet};
use crate::address::{RangeRef, normalize_first_cell};
use crate::errors::RestoreIntegrityError;
use crate::host::{HostCommand, NativeComment, NativeSheet, WorkbookHost};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The comment thread anchored at a range's first cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentThreadState {
    pub exists: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub replies: Vec<String>,
}

impl CommentThreadState {
    fn from_native(comment: &NativeComment) -> Self {
        Self {
            exists: true,
            content: comment.content.clone(),
            resolved: comment.resolved,
            replies: comment.replies.clone(),
        }
    }
}

pub struct CommentCapturer;

#[async_trait]
impl StateCapturer for CommentCapturer {
    type State = CommentThreadState;
    type Selection = ();

    async fn capture(
        &self,
        host: &dyn WorkbookHost,
        address: &str,
        _selection: &(),
    ) -> Result<CaptureResult<CommentThreadState>> {
        let reference = RangeRef::parse(address)?;
        let sheet = match resolve_sheet(host, &single_area(&reference)).await?.for_capture() {
            Ok(sheet) => sheet,
            Err(reason) => return Ok(CaptureResult::unsupported(reason)),
        };
        let (state, _) = find_thread(host, &sheet, &reference).await?;
        Ok(CaptureResult::supported(state))
    }

    /// Deletes any thread at the location, then recreates content, replies in
    /// order and finally the resolved flag.
    async fn apply(
        &self,
        host: &dyn WorkbookHost,
        address: &str,
        target: &CommentThreadState,
    ) -> Result<CommentThreadState> {
        let reference = RangeRef::parse(address)?;
        if target.exists && target.content.trim().is_empty() {
            return Err(RestoreIntegrityError::new("comment snapshot has no content").into());
        }
        let sheet = resolve_sheet(host, &single_area(&reference))
            .await?
            .for_restore()?;
        let (previous, existing_id) = find_thread(host, &sheet, &reference).await?;

        if let Some(comment_id) = existing_id {
            host.queue(HostCommand::DeleteComment { comment_id });
        }
        if target.exists {
            host.queue(HostCommand::CreateCommentThread {
                sheet: sheet.name.clone(),
                cell: reference.first_area().range.first_cell(),
                content: target.content.clone(),
                replies: target.replies.clone(),
                resolved: target.resolved,
            });
        }
        host.sync().await?;
        Ok(previous)
    }
}

/// Comments only ever look at the first area; ignore the rest for sheet resolution.
fn single_area(reference: &RangeRef) -> RangeRef {
    let first = reference.first_area().to_string();
    RangeRef::parse(&first).unwrap_or_else(|_| reference.clone())
}

async fn find_thread(
    host: &dyn WorkbookHost,
    sheet: &NativeSheet,
    reference: &RangeRef,
) -> Result<(CommentThreadState, Option<String>)> {
    let target = reference.first_area().range.first_cell().to_string();
    let pending = host.load_comments(&sheet.name);
    host.sync().await?;

    let found = pending.take()?.into_iter().find(|comment| {
        normalize_first_cell(&comment.anchor)
            .is_some_and(|anchor| anchor.eq_ignore_ascii_case(&target))
    });
    Ok(match found {
        Some(comment) => (
            CommentThreadState::from_native(&comment),
            Some(comment.id),
        ),
        None => (CommentThreadState::default(), None),
    })
}
