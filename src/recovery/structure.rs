use super::{CaptureResult, StateCapturer};
use crate::address::RangeArea;
use crate::errors::RestoreIntegrityError;
use crate::host::{HostCommand, NativeSheet, SheetSelector, WorkbookHost};
use crate::recovery::values::{SheetVisibility, parse_host_value};
use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const MAX_SHEET_NAME_LEN: usize = 31;
const FORBIDDEN_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StructureProperty {
    SheetName,
    SheetVisibility,
}

/// Sheet structure addressed by the host's stable sheet id, so renames do not orphan it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModifyStructureState {
    SheetName {
        sheet_id: String,
        name: String,
    },
    SheetVisibility {
        sheet_id: String,
        visibility: SheetVisibility,
    },
}

impl ModifyStructureState {
    pub fn sheet_id(&self) -> &str {
        match self {
            ModifyStructureState::SheetName { sheet_id, .. }
            | ModifyStructureState::SheetVisibility { sheet_id, .. } => sheet_id,
        }
    }
}

pub fn validate_sheet_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("sheet name is empty".to_string());
    }
    if name.chars().count() > MAX_SHEET_NAME_LEN {
        return Err(format!(
            "sheet name '{name}' is longer than {MAX_SHEET_NAME_LEN} characters"
        ));
    }
    if let Some(ch) = name.chars().find(|ch| FORBIDDEN_SHEET_CHARS.contains(ch)) {
        return Err(format!("sheet name '{name}' contains '{ch}'"));
    }
    Ok(())
}

fn state_of(
    sheet: &NativeSheet,
    property: StructureProperty,
) -> Result<ModifyStructureState, String> {
    Ok(match property {
        StructureProperty::SheetName => ModifyStructureState::SheetName {
            sheet_id: sheet.id.clone(),
            name: sheet.name.clone(),
        },
        StructureProperty::SheetVisibility => ModifyStructureState::SheetVisibility {
            sheet_id: sheet.id.clone(),
            visibility: parse_host_value("sheet visibility", &sheet.visibility)?,
        },
    })
}

/// `Sheet1`, `'My Sheet'` or any sheet-qualified range. Blank means the active sheet.
fn sheet_selector(address: &str) -> SheetSelector {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return SheetSelector::Active;
    }
    if let Ok(area) = RangeArea::parse(trimmed)
        && let Some(sheet) = area.sheet
    {
        return SheetSelector::Name(sheet);
    }
    let unquoted = trimmed
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .map(|inner| inner.replace("''", "'"))
        .unwrap_or_else(|| trimmed.to_string());
    SheetSelector::Name(unquoted)
}

pub struct StructureCapturer;

#[async_trait]
impl StateCapturer for StructureCapturer {
    type State = ModifyStructureState;
    type Selection = StructureProperty;

    async fn capture(
        &self,
        host: &dyn WorkbookHost,
        address: &str,
        property: &StructureProperty,
    ) -> Result<CaptureResult<ModifyStructureState>> {
        let pending = host.load_sheet(sheet_selector(address));
        host.sync().await?;
        let Some(sheet) = pending.take()? else {
            return Ok(CaptureResult::unsupported(format!(
                "worksheet '{}' does not exist",
                address.trim()
            )));
        };
        Ok(match state_of(&sheet, *property) {
            Ok(state) => CaptureResult::supported(state),
            Err(reason) => CaptureResult::unsupported(reason),
        })
    }

    /// Resolves the sheet by id; `address` is not consulted.
    async fn apply(
        &self,
        host: &dyn WorkbookHost,
        _address: &str,
        target: &ModifyStructureState,
    ) -> Result<ModifyStructureState> {
        if let ModifyStructureState::SheetName { name, .. } = target {
            validate_sheet_name(name).map_err(RestoreIntegrityError::new)?;
        }

        let sheet_id = target.sheet_id().to_string();
        let pending = host.load_sheet(SheetSelector::Id(sheet_id.clone()));
        host.sync().await?;
        let sheet = pending.take()?.ok_or_else(|| {
            RestoreIntegrityError::new(format!("worksheet with id '{sheet_id}' no longer exists"))
        })?;

        let (previous, command) = match target {
            ModifyStructureState::SheetName { name, .. } => {
                let previous = state_of(&sheet, StructureProperty::SheetName)
                    .map_err(RestoreIntegrityError::new)?;
                (previous, HostCommand::RenameSheet {
                    sheet_id,
                    name: name.clone(),
                })
            }
            ModifyStructureState::SheetVisibility { visibility, .. } => {
                let previous = state_of(&sheet, StructureProperty::SheetVisibility)
                    .map_err(RestoreIntegrityError::new)?;
                (previous, HostCommand::SetSheetVisibility {
                    sheet_id,
                    visibility: visibility.as_ref().to_string(),
                })
            }
        };
        host.queue(command);
        host.sync().await?;
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_names_follow_host_rules() {
        assert!(validate_sheet_name("Budget 2024").is_ok());
        assert!(validate_sheet_name("  ").is_err());
        assert!(validate_sheet_name(&"x".repeat(32)).is_err());
        assert!(validate_sheet_name(&"x".repeat(31)).is_ok());
        let err = validate_sheet_name("Q1/Q2").unwrap_err();
        assert!(err.contains("'/'"), "{err}");
    }

    #[test]
    fn selector_accepts_names_and_qualified_ranges() {
        assert_eq!(
            sheet_selector("'My Sheet'!A1:B2"),
            SheetSelector::Name("My Sheet".to_string())
        );
        assert_eq!(
            sheet_selector("'Bob''s'"),
            SheetSelector::Name("Bob's".to_string())
        );
        assert_eq!(sheet_selector("Data"), SheetSelector::Name("Data".to_string()));
        assert_eq!(sheet_selector(""), SheetSelector::Active);
    }
}
