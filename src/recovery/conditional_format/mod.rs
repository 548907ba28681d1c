//! Conditional-format rules as a closed, restorable union.
//!
//! Capture and restore both route through [`handlers::handler`], one entry per
//! [`ConditionalFormatKind`].

mod handlers;

pub use handlers::{RuleHandler, handler};

use super::{CaptureResult, StateCapturer, resolve_sheet};
use crate::address::RangeRef;
use crate::errors::{RestoreIntegrityError, UnsupportedStateError};
use crate::host::{HostCommand, NativeConditionalFormat, NativeSheet, WorkbookHost};
use crate::recovery::values::{
    CellValueOperator, DataBarAxisFormat, DataBarDirection, IconCriterionOperator,
    IconCriterionType, IconSetStyle, PresetCriterion, TextComparisonOperator, ThresholdType,
    TopBottomType, UnderlineStyle,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum::{AsRefStr, EnumIter, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ConditionalFormatKind {
    Custom,
    CellValue,
    TextComparison,
    TopBottom,
    PresetCriteria,
    DataBar,
    ColorScale,
    IconSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    #[serde(rename = "type")]
    pub kind: ThresholdType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBarRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis_color: Option<String>,
    pub axis_format: DataBarAxisFormat,
    pub bar_direction: DataBarDirection,
    pub show_data_bar_only: bool,
    pub lower_bound: Threshold,
    pub upper_bound: Threshold,
    pub positive_fill_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive_border_color: Option<String>,
    pub positive_gradient_fill: bool,
    pub negative_fill_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_border_color: Option<String>,
    pub negative_match_positive_fill_color: bool,
    pub negative_match_positive_border_color: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorScaleStop {
    #[serde(rename = "type")]
    pub kind: ThresholdType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorScaleRule {
    pub minimum: ColorScaleStop,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midpoint: Option<ColorScaleStop>,
    pub maximum: ColorScaleStop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomIcon {
    pub set: IconSetStyle,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconCriterion {
    #[serde(rename = "type")]
    pub kind: IconCriterionType,
    pub operator: IconCriterionOperator,
    pub formula: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_icon: Option<CustomIcon>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconSetRule {
    pub style: IconSetStyle,
    pub reverse_icon_order: bool,
    pub show_icon_only: bool,
    pub criteria: Vec<IconCriterion>,
}

/// The variant-specific half of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionalFormatRuleKind {
    Custom {
        formula: String,
    },
    CellValue {
        operator: CellValueOperator,
        formula1: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        formula2: Option<String>,
    },
    TextComparison {
        operator: TextComparisonOperator,
        text: String,
    },
    TopBottom {
        #[serde(rename = "type")]
        rank_type: TopBottomType,
        rank: u32,
    },
    PresetCriteria {
        criterion: PresetCriterion,
    },
    DataBar(DataBarRule),
    ColorScale(ColorScaleRule),
    IconSet(IconSetRule),
}

impl ConditionalFormatRuleKind {
    pub fn kind(&self) -> ConditionalFormatKind {
        match self {
            Self::Custom { .. } => ConditionalFormatKind::Custom,
            Self::CellValue { .. } => ConditionalFormatKind::CellValue,
            Self::TextComparison { .. } => ConditionalFormatKind::TextComparison,
            Self::TopBottom { .. } => ConditionalFormatKind::TopBottom,
            Self::PresetCriteria { .. } => ConditionalFormatKind::PresetCriteria,
            Self::DataBar(_) => ConditionalFormatKind::DataBar,
            Self::ColorScale(_) => ConditionalFormatKind::ColorScale,
            Self::IconSet(_) => ConditionalFormatKind::IconSet,
        }
    }
}

/// One rule: shared fields plus the tagged variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalFormatRule {
    /// Sheet-local address the rule applies to; may differ from the queried range.
    pub applies_to_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_if_true: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<UnderlineStyle>,
    #[serde(flatten)]
    pub rule: ConditionalFormatRuleKind,
}

impl ConditionalFormatRule {
    pub fn new(applies_to_address: impl Into<String>, rule: ConditionalFormatRuleKind) -> Self {
        Self {
            applies_to_address: applies_to_address.into(),
            stop_if_true: None,
            fill_color: None,
            font_color: None,
            bold: None,
            italic: None,
            underline: None,
            rule,
        }
    }

    fn has_format(&self) -> bool {
        self.fill_color.is_some()
            || self.font_color.is_some()
            || self.bold.is_some()
            || self.italic.is_some()
            || self.underline.is_some()
    }
}

/// Rules intersecting a range, highest priority first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalFormatState {
    pub rules: Vec<ConditionalFormatRule>,
}

pub struct ConditionalFormatCapturer;

#[async_trait]
impl StateCapturer for ConditionalFormatCapturer {
    type State = ConditionalFormatState;
    type Selection = ();

    async fn capture(
        &self,
        host: &dyn WorkbookHost,
        address: &str,
        _selection: &(),
    ) -> Result<CaptureResult<ConditionalFormatState>> {
        let reference = RangeRef::parse(address)?;
        let sheet = match resolve_sheet(host, &reference).await?.for_capture() {
            Ok(sheet) => sheet,
            Err(reason) => return Ok(CaptureResult::unsupported(reason)),
        };
        capture_on_sheet(host, &sheet, &reference).await
    }

    async fn apply(
        &self,
        host: &dyn WorkbookHost,
        address: &str,
        target: &ConditionalFormatState,
    ) -> Result<ConditionalFormatState> {
        let reference = RangeRef::parse(address)?;

        // every rule must rebuild before anything is cleared
        let mut rebuilt = Vec::with_capacity(target.rules.len());
        for (idx, rule) in target.rules.iter().enumerate() {
            RangeRef::parse(&rule.applies_to_address).map_err(|e| {
                RestoreIntegrityError::new(format!(
                    "rule {idx} has an invalid applies-to address: {e}"
                ))
            })?;
            let entry = handler(rule.rule.kind());
            let details = (entry.build)(rule).map_err(|reason| {
                RestoreIntegrityError::new(format!("rule {idx} ({}): {reason}", entry.kind.as_ref()))
            })?;
            rebuilt.push((rule, details));
        }

        let sheet = resolve_sheet(host, &reference).await?.for_restore()?;
        let previous = capture_on_sheet(host, &sheet, &reference)
            .await?
            .into_result()
            .map_err(UnsupportedStateError::new)?;

        for area in reference.areas() {
            host.queue(HostCommand::ClearConditionalFormats {
                sheet: sheet.name.clone(),
                range: area.range,
            });
        }
        // the host inserts at top priority, so the lowest-priority rule goes first
        for (rule, details) in rebuilt.into_iter().rev() {
            host.queue(HostCommand::AddConditionalFormat {
                sheet: sheet.name.clone(),
                applies_to: rule.applies_to_address.clone(),
                stop_if_true: rule.stop_if_true,
                details,
            });
        }
        host.sync().await?;
        Ok(previous)
    }
}

async fn capture_on_sheet(
    host: &dyn WorkbookHost,
    sheet: &NativeSheet,
    reference: &RangeRef,
) -> Result<CaptureResult<ConditionalFormatState>> {
    let listed: Vec<_> = reference
        .areas()
        .iter()
        .map(|area| host.load_conditional_formats(&sheet.name, area.range))
        .collect();
    host.sync().await?;

    let mut seen = HashSet::new();
    let mut summaries: Vec<NativeConditionalFormat> = Vec::new();
    for pending in listed {
        for summary in pending.take()? {
            if seen.insert(summary.id.clone()) {
                summaries.push(summary);
            }
        }
    }
    summaries.sort_by_key(|s| s.priority);

    let mut entries = Vec::with_capacity(summaries.len());
    for summary in &summaries {
        let Some(entry) = handler_for_host_kind(&summary.kind) else {
            return Ok(CaptureResult::unsupported(format!(
                "conditional format type '{}' on {} cannot be restored",
                summary.kind, summary.applies_to
            )));
        };
        entries.push((entry, (entry.preload)(host, &sheet.name, summary)));
    }
    if !entries.is_empty() {
        host.sync().await?;
    }

    let mut rules = Vec::with_capacity(entries.len());
    for (summary, (entry, pending)) in summaries.iter().zip(entries) {
        let details = pending.take()?;
        match (entry.read)(summary, details) {
            Ok(rule) => rules.push(rule),
            Err(reason) => {
                return Ok(CaptureResult::unsupported(format!(
                    "{} rule on {}: {reason}",
                    entry.kind.as_ref(),
                    summary.applies_to
                )));
            }
        }
    }
    Ok(CaptureResult::supported(ConditionalFormatState { rules }))
}

fn handler_for_host_kind(host_kind: &str) -> Option<&'static RuleHandler> {
    use strum::IntoEnumIterator;
    ConditionalFormatKind::iter()
        .map(handler)
        .find(|entry| entry.host_kind.eq_ignore_ascii_case(host_kind))
}

/// Strip any sheet qualifier so applies-to addresses stay sheet-local.
pub(crate) fn local_applies_to(raw: &str) -> Result<String, String> {
    let reference = RangeRef::parse(raw).map_err(|e| format!("invalid applies-to '{raw}': {e}"))?;
    Ok(reference
        .areas()
        .iter()
        .map(|area| area.range.to_string())
        .collect::<Vec<_>>()
        .join(","))
}
