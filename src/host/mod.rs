//! Narrow capability surface over the live spreadsheet host.
//!
//! Every interaction is batched: `load_*` calls and `queue` register work and
//! return immediately, nothing is visible until `sync()` resolves. Loads and
//! commands are processed in the order they were registered.

pub mod memory;

pub use memory::MemoryWorkbook;

use crate::address::CellRange;
use crate::recovery::values::BorderEdge;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A value that becomes readable once the batch it was loaded in has synced.
#[derive(Debug)]
pub struct PendingRead<T> {
    label: &'static str,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for PendingRead<T> {
    fn clone(&self) -> Self {
        Self {
            label: self.label,
            slot: self.slot.clone(),
        }
    }
}

impl<T> PendingRead<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Called by host implementations while processing `sync()`.
    pub fn fulfil(&self, value: T) {
        *self.slot.lock() = Some(value);
    }

    pub fn is_ready(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Take the loaded value. Fails when read before the batch synced.
    pub fn take(&self) -> Result<T> {
        self.slot
            .lock()
            .take()
            .ok_or_else(|| anyhow!("{} was read before sync() resolved", self.label))
    }
}

/// Either one value shared by every cell of an area, or a mix.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyRead<T> {
    Uniform(T),
    Mixed,
}

impl<T> PropertyRead<T> {
    pub fn uniform(self) -> Option<T> {
        match self {
            PropertyRead::Uniform(value) => Some(value),
            PropertyRead::Mixed => None,
        }
    }
}

/// Which format properties a `load_range_format` call should populate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatLoadRequest {
    pub number_format: bool,
    pub fill_color: bool,
    pub font_color: bool,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub font_name: bool,
    pub font_size: bool,
    pub horizontal_alignment: bool,
    pub vertical_alignment: bool,
    pub wrap_text: bool,
    pub column_width: bool,
    pub row_height: bool,
    pub merged_areas: bool,
    pub borders: [bool; 6],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeBorder {
    pub style: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl NativeBorder {
    pub fn none() -> Self {
        Self {
            style: "None".to_string(),
            weight: None,
            color: None,
        }
    }
}

/// Format properties of one area as the host reports them. Fields not requested stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeFormatRead {
    pub address: String,
    pub row_count: u32,
    pub column_count: u32,
    pub number_format: Option<Vec<Vec<String>>>,
    /// Inner `None` means the area has no fill.
    pub fill_color: Option<PropertyRead<Option<String>>>,
    pub font_color: Option<PropertyRead<String>>,
    pub bold: Option<PropertyRead<bool>>,
    pub italic: Option<PropertyRead<bool>>,
    pub underline: Option<PropertyRead<String>>,
    pub font_name: Option<PropertyRead<String>>,
    pub font_size: Option<PropertyRead<f64>>,
    pub horizontal_alignment: Option<PropertyRead<String>>,
    pub vertical_alignment: Option<PropertyRead<String>>,
    pub wrap_text: Option<PropertyRead<bool>>,
    pub column_widths: Option<Vec<f64>>,
    pub row_heights: Option<Vec<f64>>,
    pub merged_areas: Option<Vec<String>>,
    pub borders: Vec<(BorderEdge, PropertyRead<NativeBorder>)>,
}

/// Summary of one conditional format as listed on a range (details load separately).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeConditionalFormat {
    pub id: String,
    pub kind: String,
    pub applies_to: String,
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_if_true: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeCfFormat {
    pub fill_color: Option<String>,
    pub font_color: Option<String>,
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub underline: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeThreshold {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeDataBar {
    pub axis_color: Option<String>,
    pub axis_format: String,
    pub bar_direction: String,
    pub show_data_bar_only: bool,
    pub lower_bound: NativeThreshold,
    pub upper_bound: NativeThreshold,
    pub positive_fill_color: String,
    pub positive_border_color: Option<String>,
    pub positive_gradient_fill: bool,
    pub negative_fill_color: String,
    pub negative_border_color: Option<String>,
    pub negative_match_positive_fill_color: bool,
    pub negative_match_positive_border_color: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeColorScaleStop {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeColorScale {
    pub minimum: NativeColorScaleStop,
    pub midpoint: Option<NativeColorScaleStop>,
    pub maximum: NativeColorScaleStop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeCustomIcon {
    pub set: String,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeIconCriterion {
    pub kind: String,
    pub operator: String,
    pub formula: String,
    pub custom_icon: Option<NativeCustomIcon>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeIconSet {
    pub style: String,
    pub reverse_icon_order: bool,
    pub show_icon_only: bool,
    pub criteria: Vec<NativeIconCriterion>,
}

/// The type-specific half of a conditional format, as the host models it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NativeRuleDetails {
    Custom {
        formula: String,
        format: NativeCfFormat,
    },
    CellValue {
        operator: String,
        formula1: String,
        formula2: Option<String>,
        format: NativeCfFormat,
    },
    TextComparison {
        operator: String,
        text: String,
        format: NativeCfFormat,
    },
    TopBottom {
        rank_type: String,
        rank: u32,
        format: NativeCfFormat,
    },
    PresetCriteria {
        criterion: String,
        format: NativeCfFormat,
    },
    DataBar(NativeDataBar),
    ColorScale(NativeColorScale),
    IconSet(NativeIconSet),
}

impl NativeRuleDetails {
    /// The host's type name for this rule (matches `NativeConditionalFormat::kind`).
    pub fn host_kind(&self) -> &'static str {
        match self {
            NativeRuleDetails::Custom { .. } => "Custom",
            NativeRuleDetails::CellValue { .. } => "CellValue",
            NativeRuleDetails::TextComparison { .. } => "ContainsText",
            NativeRuleDetails::TopBottom { .. } => "TopBottom",
            NativeRuleDetails::PresetCriteria { .. } => "PresetCriteria",
            NativeRuleDetails::DataBar(_) => "DataBar",
            NativeRuleDetails::ColorScale(_) => "ColorScale",
            NativeRuleDetails::IconSet(_) => "IconSet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeComment {
    pub id: String,
    /// Anchor location, usually sheet-qualified (`Sheet1!B2`).
    pub anchor: String,
    pub content: String,
    pub resolved: bool,
    pub replies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeSheet {
    pub id: String,
    pub name: String,
    pub visibility: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetSelector {
    Id(String),
    Name(String),
    Active,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FontPatch {
    pub color: Option<String>,
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub underline: Option<String>,
    pub name: Option<String>,
    pub size: Option<f64>,
}

impl FontPatch {
    pub fn is_empty(&self) -> bool {
        self.color.is_none()
            && self.bold.is_none()
            && self.italic.is_none()
            && self.underline.is_none()
            && self.name.is_none()
            && self.size.is_none()
    }
}

/// A queued write. Ranges are sheet-local; `sheet` is the display name.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    SetNumberFormat {
        sheet: String,
        range: CellRange,
        formats: Vec<Vec<String>>,
    },
    SetFill {
        sheet: String,
        range: CellRange,
        color: Option<String>,
    },
    SetFont {
        sheet: String,
        range: CellRange,
        patch: FontPatch,
    },
    SetAlignment {
        sheet: String,
        range: CellRange,
        horizontal: Option<String>,
        vertical: Option<String>,
        wrap_text: Option<bool>,
    },
    SetColumnWidth {
        sheet: String,
        column: u32,
        width: f64,
    },
    SetRowHeight {
        sheet: String,
        row: u32,
        height: f64,
    },
    Merge {
        sheet: String,
        range: CellRange,
    },
    Unmerge {
        sheet: String,
        range: CellRange,
    },
    SetBorder {
        sheet: String,
        range: CellRange,
        edge: BorderEdge,
        border: NativeBorder,
    },
    ClearConditionalFormats {
        sheet: String,
        range: CellRange,
    },
    /// New rules are inserted at the top of the priority list.
    AddConditionalFormat {
        sheet: String,
        applies_to: String,
        stop_if_true: Option<bool>,
        details: NativeRuleDetails,
    },
    DeleteComment {
        comment_id: String,
    },
    CreateCommentThread {
        sheet: String,
        cell: CellRange,
        content: String,
        replies: Vec<String>,
        resolved: bool,
    },
    RenameSheet {
        sheet_id: String,
        name: String,
    },
    SetSheetVisibility {
        sheet_id: String,
        visibility: String,
    },
}

#[async_trait]
pub trait WorkbookHost: Send + Sync {
    fn load_sheet(&self, selector: SheetSelector) -> PendingRead<Option<NativeSheet>>;

    fn load_range_format(
        &self,
        sheet: &str,
        range: CellRange,
        request: FormatLoadRequest,
    ) -> PendingRead<RangeFormatRead>;

    /// Rules whose applies-to area intersects `range`, highest priority first.
    fn load_conditional_formats(
        &self,
        sheet: &str,
        range: CellRange,
    ) -> PendingRead<Vec<NativeConditionalFormat>>;

    /// Load the type-specific details of one rule. `host_kind` must match the rule's type.
    fn load_conditional_format_details(
        &self,
        sheet: &str,
        rule_id: &str,
        host_kind: &'static str,
    ) -> PendingRead<NativeRuleDetails>;

    fn load_comments(&self, sheet: &str) -> PendingRead<Vec<NativeComment>>;

    fn queue(&self, command: HostCommand);

    async fn sync(&self) -> Result<()>;
}
