//! The agent tool surface and the wrapper that puts every call under coordination.

pub mod planner;
pub mod policy;
pub mod wrapper;

pub use planner::ToolRecoveryPlanner;
pub use policy::{MutationImpact, ToolMode, ToolPolicy};
pub use wrapper::{
    MutationEvent, MutationObserver, MutationWrapper, RecoveryPlanner, WorkbookIdentity,
    WrappedTool,
};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
}

/// What a tool returns: content blocks for the model plus structured details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub details: Value,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.content.push(ToolContent::Text { text: text.into() });
    }

    /// Set `details.<key>`, turning non-object details into `{"value": <old>}` first.
    pub fn set_detail(&mut self, key: &str, value: Value) {
        if !self.details.is_object() {
            let previous = std::mem::take(&mut self.details);
            let mut map = Map::new();
            if !previous.is_null() {
                map.insert("value".to_string(), previous);
            }
            self.details = Value::Object(map);
        }
        if let Value::Object(map) = &mut self.details {
            map.insert(key.to_string(), value);
        }
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().map(|block| match block {
            ToolContent::Text { text } => text.as_str(),
        })
    }
}

pub type UpdateCallback = Arc<dyn Fn(ToolOutput) + Send + Sync>;

#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        call_id: &str,
        params: Value,
        abort: CancellationToken,
        on_update: Option<UpdateCallback>,
    ) -> Result<ToolOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_detail_wraps_scalar_details() {
        let mut output = ToolOutput::text("ok").with_details(json!(3));
        output.set_detail("recovery", json!({"status": "saved"}));
        assert_eq!(
            output.details,
            json!({"value": 3, "recovery": {"status": "saved"}})
        );

        let mut empty = ToolOutput::text("ok");
        empty.set_detail("k", json!(true));
        assert_eq!(empty.details, json!({"k": true}));
    }

    #[test]
    fn content_serializes_with_type_tag() {
        let output = ToolOutput::text("hello");
        assert_eq!(
            serde_json::to_value(&output.content).unwrap(),
            json!([{"type": "text", "text": "hello"}])
        );
    }
}
