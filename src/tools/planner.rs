use crate::recovery::{CaptureRequest, CaptureSelection, StructureProperty};
use crate::tools::wrapper::RecoveryPlanner;
use serde_json::Value;

/// Maps the built-in mutating tools onto the feature slice each one is about to touch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolRecoveryPlanner;

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn has(params: &Value, key: &str) -> bool {
    params.get(key).is_some_and(|value| !value.is_null())
}

/// Selection covering exactly the properties present in `format_cells` params.
fn format_selection(params: &Value) -> CaptureSelection {
    let mut selection = CaptureSelection {
        number_format: has(params, "number_format"),
        fill_color: has(params, "fill_color"),
        horizontal_alignment: has(params, "horizontal_alignment"),
        vertical_alignment: has(params, "vertical_alignment"),
        wrap_text: has(params, "wrap_text"),
        column_width: has(params, "column_width"),
        row_height: has(params, "row_height"),
        merged_areas: has(params, "merge") || has(params, "unmerge"),
        ..CaptureSelection::default()
    };

    if let Some(font) = params.get("font") {
        selection.font_color = has(font, "color");
        selection.bold = has(font, "bold");
        selection.italic = has(font, "italic");
        selection.underline = has(font, "underline");
        selection.font_name = has(font, "name");
        selection.font_size = has(font, "size");
    }

    match params.get("borders") {
        Some(Value::String(preset)) if preset.eq_ignore_ascii_case("all") => {
            selection.border_top = true;
            selection.border_bottom = true;
            selection.border_left = true;
            selection.border_right = true;
            selection.border_inside_horizontal = true;
            selection.border_inside_vertical = true;
        }
        Some(Value::String(preset)) if preset.eq_ignore_ascii_case("outline") => {
            selection.border_top = true;
            selection.border_bottom = true;
            selection.border_left = true;
            selection.border_right = true;
        }
        Some(edges @ Value::Object(_)) => {
            selection.border_top = has(edges, "top");
            selection.border_bottom = has(edges, "bottom");
            selection.border_left = has(edges, "left");
            selection.border_right = has(edges, "right");
            selection.border_inside_horizontal = has(edges, "inside_horizontal");
            selection.border_inside_vertical = has(edges, "inside_vertical");
        }
        _ => {}
    }
    selection
}

impl RecoveryPlanner for ToolRecoveryPlanner {
    fn plan(&self, tool_name: &str, params: &Value) -> Option<CaptureRequest> {
        let action = str_param(params, "action");
        match tool_name {
            "format_cells" => {
                let address = str_param(params, "range")?;
                let selection = format_selection(params);
                (!selection.is_empty()).then(|| CaptureRequest::Format {
                    address: address.to_string(),
                    selection,
                })
            }
            "conditional_format" => match action {
                Some("add" | "clear") => Some(CaptureRequest::ConditionalFormat {
                    address: str_param(params, "range")?.to_string(),
                }),
                _ => None,
            },
            "comments" => match action {
                Some("add" | "update" | "reply" | "resolve" | "reopen" | "delete") => {
                    let address = str_param(params, "range").or(str_param(params, "cell"))?;
                    Some(CaptureRequest::Comment {
                        address: address.to_string(),
                    })
                }
                _ => None,
            },
            "modify_structure" => {
                let property = match action? {
                    "rename_sheet" => StructureProperty::SheetName,
                    "hide_sheet" | "unhide_sheet" => StructureProperty::SheetVisibility,
                    _ => return None,
                };
                Some(CaptureRequest::Structure {
                    sheet: str_param(params, "sheet")?.to_string(),
                    property,
                })
            }
            _ => None,
        }
    }
}
