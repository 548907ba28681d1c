use ahash::AHashSet;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use strum::AsRefStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolMode {
    Read,
    Mutate,
}

/// How much cached context about the workbook a committed mutation invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MutationImpact {
    None,
    Content,
    Structure,
}

static READ_TOOLS: Lazy<AHashSet<&'static str>> = Lazy::new(|| {
    [
        "get_workbook_overview",
        "read_range",
        "search_workbook",
        "trace_dependencies",
        "explain_formula",
        "list_checkpoints",
        "web_search",
        "fetch_page",
    ]
    .into_iter()
    .collect()
});

static MUTATE_TOOLS: Lazy<AHashSet<&'static str>> = Lazy::new(|| {
    [
        "write_cells",
        "fill_formula",
        "format_cells",
        "conditional_format",
        "comments",
        "modify_structure",
        "view_settings",
        "restore_checkpoint",
    ]
    .into_iter()
    .collect()
});

/// `modify_structure` actions that change the workbook's sheet list.
static STRUCTURE_ACTIONS: Lazy<AHashSet<&'static str>> = Lazy::new(|| {
    [
        "add_sheet",
        "delete_sheet",
        "rename_sheet",
        "hide_sheet",
        "unhide_sheet",
        "move_sheet",
        "duplicate_sheet",
    ]
    .into_iter()
    .collect()
});

fn action(params: &Value) -> Option<&str> {
    params.get("action").and_then(Value::as_str).map(str::trim)
}

/// Read/mutate classification table for tool calls.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    unknown_tools_mutate: bool,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ToolPolicy {
    pub fn new(unknown_tools_mutate: bool) -> Self {
        Self {
            unknown_tools_mutate,
        }
    }

    pub fn classify(&self, tool_name: &str, params: &Value) -> ToolMode {
        let action = action(params);
        match tool_name {
            "view_settings" if action == Some("get") => return ToolMode::Read,
            "comments" if matches!(action, Some("list" | "read")) => return ToolMode::Read,
            "conditional_format" if action == Some("list") => return ToolMode::Read,
            _ => {}
        }
        if READ_TOOLS.contains(tool_name) {
            ToolMode::Read
        } else if MUTATE_TOOLS.contains(tool_name) || self.unknown_tools_mutate {
            ToolMode::Mutate
        } else {
            ToolMode::Read
        }
    }

    /// Impact of a call that committed; reads never have one.
    pub fn impact(&self, tool_name: &str, params: &Value) -> MutationImpact {
        if self.classify(tool_name, params) == ToolMode::Read {
            return MutationImpact::None;
        }
        match (tool_name, action(params)) {
            ("modify_structure", Some(action)) if STRUCTURE_ACTIONS.contains(action) => {
                MutationImpact::Structure
            }
            _ => MutationImpact::Content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_exceptions_read() {
        let policy = ToolPolicy::default();
        assert_eq!(
            policy.classify("view_settings", &json!({"action": "get"})),
            ToolMode::Read
        );
        assert_eq!(
            policy.classify("view_settings", &json!({"action": "freeze_panes"})),
            ToolMode::Mutate
        );
        assert_eq!(
            policy.classify("comments", &json!({"action": "list"})),
            ToolMode::Read
        );
        assert_eq!(
            policy.classify("comments", &json!({"action": "add"})),
            ToolMode::Mutate
        );
        assert_eq!(
            policy.classify("conditional_format", &json!({"action": "list"})),
            ToolMode::Read
        );
    }

    #[test]
    fn unknown_tools_follow_configuration() {
        assert_eq!(
            ToolPolicy::new(true).classify("mystery", &json!({})),
            ToolMode::Mutate
        );
        assert_eq!(
            ToolPolicy::new(false).classify("mystery", &json!({})),
            ToolMode::Read
        );
        assert_eq!(
            ToolPolicy::new(false).classify("write_cells", &json!({})),
            ToolMode::Mutate
        );
    }

    #[test]
    fn structure_impact_only_for_sheet_shape_changes() {
        let policy = ToolPolicy::default();
        assert_eq!(
            policy.impact("modify_structure", &json!({"action": "rename_sheet"})),
            MutationImpact::Structure
        );
        assert_eq!(
            policy.impact("modify_structure", &json!({"action": "insert_rows"})),
            MutationImpact::Content
        );
        assert_eq!(
            policy.impact("write_cells", &json!({})),
            MutationImpact::Content
        );
        assert_eq!(
            policy.impact("read_range", &json!({})),
            MutationImpact::None
        );
    }
}
