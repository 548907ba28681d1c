//! Bounded, typed snapshots of the feature state a mutation is about to touch.
//!
//! Each feature has a [`StateCapturer`] that converts live host state into a
//! plain serializable value and back. Expected gaps (mixed values, unknown
//! enumerations, too-expensive captures) come back as
//! `CaptureResult { supported: false, reason }`; integrity problems during a
//! restore are errors and nothing is written.

pub mod comments;
pub mod conditional_format;
pub mod format;
pub mod selection;
pub mod structure;
pub mod values;

pub use comments::{CommentCapturer, CommentThreadState};
pub use conditional_format::{
    ConditionalFormatCapturer, ConditionalFormatKind, ConditionalFormatRule,
    ConditionalFormatRuleKind, ConditionalFormatState,
};
pub use format::{BorderState, FormatAreaState, FormatCapturer, FormatState};
pub use selection::CaptureSelection;
pub use structure::{ModifyStructureState, StructureCapturer, StructureProperty};

use crate::address::RangeRef;
use crate::errors::{RestoreIntegrityError, UnsupportedStateError};
use crate::host::{NativeSheet, SheetSelector, WorkbookHost};
use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Universal capture outcome. `reason` is always set when `supported` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureResult<T> {
    pub supported: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl<T> CaptureResult<T> {
    pub fn supported(state: T) -> Self {
        Self {
            supported: true,
            state: Some(state),
            reason: None,
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            supported: false,
            state: None,
            reason: Some(reason.into()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CaptureResult<U> {
        CaptureResult {
            supported: self.supported,
            state: self.state.map(f),
            reason: self.reason,
        }
    }

    /// The captured state, or the reason it could not be captured.
    pub fn into_result(self) -> std::result::Result<T, String> {
        match (self.supported, self.state) {
            (true, Some(state)) => Ok(state),
            _ => Err(self
                .reason
                .unwrap_or_else(|| "capture returned no state".to_string())),
        }
    }
}

#[async_trait]
pub trait StateCapturer: Send + Sync {
    type State: Send + Sync;
    type Selection: Send + Sync;

    async fn capture(
        &self,
        host: &dyn WorkbookHost,
        address: &str,
        selection: &Self::Selection,
    ) -> Result<CaptureResult<Self::State>>;

    /// Write `target` and return the state it replaced.
    async fn apply(
        &self,
        host: &dyn WorkbookHost,
        address: &str,
        target: &Self::State,
    ) -> Result<Self::State>;
}

/// What to capture before a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "feature", rename_all = "snake_case")]
pub enum CaptureRequest {
    Format {
        address: String,
        #[serde(default)]
        selection: CaptureSelection,
    },
    ConditionalFormat {
        address: String,
    },
    Comment {
        address: String,
    },
    Structure {
        sheet: String,
        property: StructureProperty,
    },
}

impl CaptureRequest {
    pub fn feature(&self) -> &'static str {
        match self {
            CaptureRequest::Format { .. } => "format",
            CaptureRequest::ConditionalFormat { .. } => "conditional_format",
            CaptureRequest::Comment { .. } => "comment",
            CaptureRequest::Structure { .. } => "structure",
        }
    }
}

/// JSON schema of [`CaptureRequest`], for hosts that publish capture as a tool parameter.
pub fn capture_request_schema() -> serde_json::Value {
    schemars::schema_for!(CaptureRequest).to_value()
}

/// A stored, restorable slice of workbook state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "feature", rename_all = "snake_case")]
pub enum RecoverySnapshot {
    Format {
        address: String,
        state: FormatState,
    },
    ConditionalFormat {
        address: String,
        state: ConditionalFormatState,
    },
    Comment {
        address: String,
        state: CommentThreadState,
    },
    Structure {
        state: ModifyStructureState,
    },
}

impl RecoverySnapshot {
    pub fn feature(&self) -> &'static str {
        match self {
            RecoverySnapshot::Format { .. } => "format",
            RecoverySnapshot::ConditionalFormat { .. } => "conditional_format",
            RecoverySnapshot::Comment { .. } => "comment",
            RecoverySnapshot::Structure { .. } => "structure",
        }
    }

    pub fn address(&self) -> Option<&str> {
        match self {
            RecoverySnapshot::Format { address, .. }
            | RecoverySnapshot::ConditionalFormat { address, .. }
            | RecoverySnapshot::Comment { address, .. } => Some(address),
            RecoverySnapshot::Structure { .. } => None,
        }
    }
}

/// Facade over the feature capturers, applying the configured cost ceiling.
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    max_capture_cost: u64,
}

impl RecoveryEngine {
    /// `max_capture_cost == 0` disables the ceiling.
    pub fn new(max_capture_cost: u64) -> Self {
        Self { max_capture_cost }
    }

    pub fn max_capture_cost(&self) -> u64 {
        self.max_capture_cost
    }

    pub async fn capture(
        &self,
        host: &dyn WorkbookHost,
        request: &CaptureRequest,
    ) -> Result<CaptureResult<RecoverySnapshot>> {
        let result = match request {
            CaptureRequest::Format { address, selection } => {
                let reference = RangeRef::parse(address)?;
                let cost = selection.estimate_cost(reference.areas().iter().map(|a| &a.range));
                if self.max_capture_cost > 0 && cost > self.max_capture_cost {
                    CaptureResult::unsupported(format!(
                        "estimated capture cost {cost} exceeds the limit of {}",
                        self.max_capture_cost
                    ))
                } else {
                    match pin_to_sheet(host, &reference).await? {
                        Err(reason) => CaptureResult::unsupported(reason),
                        Ok(address) => {
                            debug!(address = %address, cost, "capturing format state");
                            let captured = FormatCapturer.capture(host, &address, selection).await?;
                            captured.map(|state| RecoverySnapshot::Format { address, state })
                        }
                    }
                }
            }
            CaptureRequest::ConditionalFormat { address } => {
                match pin_to_sheet(host, &RangeRef::parse(address)?).await? {
                    Err(reason) => CaptureResult::unsupported(reason),
                    Ok(address) => {
                        let captured = ConditionalFormatCapturer.capture(host, &address, &()).await?;
                        captured.map(|state| RecoverySnapshot::ConditionalFormat { address, state })
                    }
                }
            }
            CaptureRequest::Comment { address } => {
                match pin_to_sheet(host, &RangeRef::parse(address)?).await? {
                    Err(reason) => CaptureResult::unsupported(reason),
                    Ok(address) => {
                        let captured = CommentCapturer.capture(host, &address, &()).await?;
                        captured.map(|state| RecoverySnapshot::Comment { address, state })
                    }
                }
            }
            CaptureRequest::Structure { sheet, property } => StructureCapturer
                .capture(host, sheet, property)
                .await?
                .map(|state| RecoverySnapshot::Structure { state }),
        };

        if let Some(reason) = &result.reason {
            info!(feature = request.feature(), reason = %reason, "capture unsupported");
        }
        Ok(result)
    }

    /// Apply `snapshot` and return the state it replaced, ready to restore back (redo).
    pub async fn restore(
        &self,
        host: &dyn WorkbookHost,
        snapshot: &RecoverySnapshot,
    ) -> Result<RecoverySnapshot> {
        debug!(feature = snapshot.feature(), "restoring snapshot");
        let previous = match snapshot {
            RecoverySnapshot::Format { address, state } => RecoverySnapshot::Format {
                address: address.clone(),
                state: FormatCapturer.apply(host, address, state).await?,
            },
            RecoverySnapshot::ConditionalFormat { address, state } => {
                RecoverySnapshot::ConditionalFormat {
                    address: address.clone(),
                    state: ConditionalFormatCapturer.apply(host, address, state).await?,
                }
            }
            RecoverySnapshot::Comment { address, state } => RecoverySnapshot::Comment {
                address: address.clone(),
                state: CommentCapturer.apply(host, address, state).await?,
            },
            RecoverySnapshot::Structure { state } => RecoverySnapshot::Structure {
                state: StructureCapturer.apply(host, "", state).await?,
            },
        };
        Ok(previous)
    }
}

/// Qualify every area with the worksheet it resolves to right now.
///
/// Snapshots store the pinned address, so a restore never follows the active sheet.
async fn pin_to_sheet(
    host: &dyn WorkbookHost,
    reference: &RangeRef,
) -> Result<std::result::Result<String, String>> {
    let sheet = match resolve_sheet(host, reference).await?.for_capture() {
        Ok(sheet) => sheet,
        Err(reason) => return Ok(Err(reason)),
    };
    Ok(Ok(reference
        .areas()
        .iter()
        .map(|area| area.qualified(&sheet.name))
        .collect::<Vec<_>>()
        .join(",")))
}

/// How a reference maps onto worksheets.
pub(crate) enum SheetResolution {
    Resolved(NativeSheet),
    MultipleSheets(Vec<String>),
    Missing(String),
}

/// Resolve the single worksheet a reference addresses; unqualified areas use the active sheet.
pub(crate) async fn resolve_sheet(
    host: &dyn WorkbookHost,
    reference: &RangeRef,
) -> Result<SheetResolution> {
    let explicit = reference.explicit_sheets();
    if explicit.len() > 1 {
        return Ok(SheetResolution::MultipleSheets(explicit));
    }
    let selector = match explicit.into_iter().next() {
        Some(name) => SheetSelector::Name(name),
        None => SheetSelector::Active,
    };
    let missing_label = match &selector {
        SheetSelector::Name(name) => name.clone(),
        _ => "active worksheet".to_string(),
    };
    let pending = host.load_sheet(selector);
    host.sync().await?;
    Ok(match pending.take()? {
        Some(sheet) => SheetResolution::Resolved(sheet),
        None => SheetResolution::Missing(missing_label),
    })
}

impl SheetResolution {
    /// Restore-side view: a missing sheet is fatal, several sheets cannot be re-captured.
    pub(crate) fn for_restore(self) -> Result<NativeSheet> {
        match self {
            SheetResolution::Resolved(sheet) => Ok(sheet),
            SheetResolution::Missing(name) => Err(RestoreIntegrityError::new(format!(
                "worksheet '{name}' no longer exists"
            ))
            .into()),
            SheetResolution::MultipleSheets(sheets) => Err(UnsupportedStateError::new(
                format!("address spans multiple worksheets ({})", sheets.join(", ")),
            )
            .into()),
        }
    }

    /// Capture-side view: every failure is an unsupported reason.
    pub(crate) fn for_capture(self) -> std::result::Result<NativeSheet, String> {
        match self {
            SheetResolution::Resolved(sheet) => Ok(sheet),
            SheetResolution::Missing(name) => Err(format!("worksheet '{name}' does not exist")),
            SheetResolution::MultipleSheets(sheets) => Err(format!(
                "address spans multiple worksheets ({}); capture one worksheet at a time",
                sheets.join(", ")
            )),
        }
    }
}
