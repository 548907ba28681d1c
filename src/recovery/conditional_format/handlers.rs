use super::{
    ColorScaleRule, ColorScaleStop, ConditionalFormatKind, ConditionalFormatRule,
    ConditionalFormatRuleKind, CustomIcon, DataBarRule, IconCriterion, IconSetRule, Threshold,
    local_applies_to,
};
use crate::host::{
    NativeCfFormat, NativeColorScale, NativeColorScaleStop, NativeConditionalFormat,
    NativeCustomIcon, NativeDataBar, NativeIconCriterion, NativeIconSet, NativeRuleDetails,
    NativeThreshold, PendingRead, WorkbookHost,
};
use crate::recovery::values::{
    CellValueOperator, IconSetStyle, ThresholdType, TopBottomType, parse_host_value,
};

type Preload =
    fn(&dyn WorkbookHost, &str, &NativeConditionalFormat) -> PendingRead<NativeRuleDetails>;
type Read = fn(&NativeConditionalFormat, NativeRuleDetails) -> Result<ConditionalFormatRule, String>;
type Build = fn(&ConditionalFormatRule) -> Result<NativeRuleDetails, String>;

/// How one rule variant is loaded, read into plain state, and re-created.
pub struct RuleHandler {
    pub kind: ConditionalFormatKind,
    /// The host's type name, used to pick this handler for a listed rule.
    pub host_kind: &'static str,
    /// Queue whatever must be loaded before `read` can run.
    pub preload: Preload,
    pub read: Read,
    pub build: Build,
}

static CUSTOM: RuleHandler = RuleHandler {
    kind: ConditionalFormatKind::Custom,
    host_kind: "Custom",
    preload: preload_custom,
    read: read_custom,
    build: build_custom,
};

static CELL_VALUE: RuleHandler = RuleHandler {
    kind: ConditionalFormatKind::CellValue,
    host_kind: "CellValue",
    preload: preload_cell_value,
    read: read_cell_value,
    build: build_cell_value,
};

static TEXT_COMPARISON: RuleHandler = RuleHandler {
    kind: ConditionalFormatKind::TextComparison,
    host_kind: "ContainsText",
    preload: preload_text_comparison,
    read: read_text_comparison,
    build: build_text_comparison,
};

static TOP_BOTTOM: RuleHandler = RuleHandler {
    kind: ConditionalFormatKind::TopBottom,
    host_kind: "TopBottom",
    preload: preload_top_bottom,
    read: read_top_bottom,
    build: build_top_bottom,
};

static PRESET_CRITERIA: RuleHandler = RuleHandler {
    kind: ConditionalFormatKind::PresetCriteria,
    host_kind: "PresetCriteria",
    preload: preload_preset_criteria,
    read: read_preset_criteria,
    build: build_preset_criteria,
};

static DATA_BAR: RuleHandler = RuleHandler {
    kind: ConditionalFormatKind::DataBar,
    host_kind: "DataBar",
    preload: preload_data_bar,
    read: read_data_bar,
    build: build_data_bar,
};

static COLOR_SCALE: RuleHandler = RuleHandler {
    kind: ConditionalFormatKind::ColorScale,
    host_kind: "ColorScale",
    preload: preload_color_scale,
    read: read_color_scale,
    build: build_color_scale,
};

static ICON_SET: RuleHandler = RuleHandler {
    kind: ConditionalFormatKind::IconSet,
    host_kind: "IconSet",
    preload: preload_icon_set,
    read: read_icon_set,
    build: build_icon_set,
};

pub fn handler(kind: ConditionalFormatKind) -> &'static RuleHandler {
    match kind {
        ConditionalFormatKind::Custom => &CUSTOM,
        ConditionalFormatKind::CellValue => &CELL_VALUE,
        ConditionalFormatKind::TextComparison => &TEXT_COMPARISON,
        ConditionalFormatKind::TopBottom => &TOP_BOTTOM,
        ConditionalFormatKind::PresetCriteria => &PRESET_CRITERIA,
        ConditionalFormatKind::DataBar => &DATA_BAR,
        ConditionalFormatKind::ColorScale => &COLOR_SCALE,
        ConditionalFormatKind::IconSet => &ICON_SET,
    }
}

macro_rules! preload_details {
    ($name:ident, $host_kind:literal) => {
        fn $name(
            host: &dyn WorkbookHost,
            sheet: &str,
            summary: &NativeConditionalFormat,
        ) -> PendingRead<NativeRuleDetails> {
            host.load_conditional_format_details(sheet, &summary.id, $host_kind)
        }
    };
}

preload_details!(preload_custom, "Custom");
preload_details!(preload_cell_value, "CellValue");
preload_details!(preload_text_comparison, "ContainsText");
preload_details!(preload_top_bottom, "TopBottom");
preload_details!(preload_preset_criteria, "PresetCriteria");
preload_details!(preload_data_bar, "DataBar");
preload_details!(preload_color_scale, "ColorScale");
preload_details!(preload_icon_set, "IconSet");

fn unexpected(expected: &str, found: &str) -> String {
    format!("expected {expected} details but the host returned {found}")
}

/// Shared fields of a captured rule: address, stop-if-true and the cell format.
fn with_shared(
    summary: &NativeConditionalFormat,
    format: Option<NativeCfFormat>,
    rule: ConditionalFormatRuleKind,
) -> Result<ConditionalFormatRule, String> {
    let mut captured = ConditionalFormatRule::new(local_applies_to(&summary.applies_to)?, rule);
    captured.stop_if_true = summary.stop_if_true;
    if let Some(format) = format {
        captured.fill_color = format.fill_color;
        captured.font_color = format.font_color;
        captured.bold = format.bold;
        captured.italic = format.italic;
        captured.underline = format
            .underline
            .as_deref()
            .map(|u| parse_host_value("underline style", u))
            .transpose()?;
    }
    Ok(captured)
}

fn cell_format(rule: &ConditionalFormatRule) -> NativeCfFormat {
    NativeCfFormat {
        fill_color: rule.fill_color.clone(),
        font_color: rule.font_color.clone(),
        bold: rule.bold,
        italic: rule.italic,
        underline: rule.underline.map(|u| u.as_ref().to_string()),
    }
}

fn reject_cell_format(rule: &ConditionalFormatRule, what: &str) -> Result<(), String> {
    if rule.has_format() {
        return Err(format!("{what} rules do not carry a cell format"));
    }
    Ok(())
}

fn non_empty<'a>(value: &'a str, label: &str) -> Result<&'a str, String> {
    if value.trim().is_empty() {
        return Err(format!("{label} is empty"));
    }
    Ok(value)
}

fn read_custom(
    summary: &NativeConditionalFormat,
    details: NativeRuleDetails,
) -> Result<ConditionalFormatRule, String> {
    let found = details.host_kind();
    let NativeRuleDetails::Custom { formula, format } = details else {
        return Err(unexpected("Custom", found));
    };
    with_shared(
        summary,
        Some(format),
        ConditionalFormatRuleKind::Custom { formula },
    )
}

fn build_custom(rule: &ConditionalFormatRule) -> Result<NativeRuleDetails, String> {
    let ConditionalFormatRuleKind::Custom { formula } = &rule.rule else {
        return Err("not a custom rule".to_string());
    };
    Ok(NativeRuleDetails::Custom {
        formula: non_empty(formula, "formula")?.to_string(),
        format: cell_format(rule),
    })
}

fn read_cell_value(
    summary: &NativeConditionalFormat,
    details: NativeRuleDetails,
) -> Result<ConditionalFormatRule, String> {
    let found = details.host_kind();
    let NativeRuleDetails::CellValue {
        operator,
        formula1,
        formula2,
        format,
    } = details
    else {
        return Err(unexpected("CellValue", found));
    };
    let operator: CellValueOperator = parse_host_value("cell value operator", &operator)?;
    let formula2 = if operator.takes_second_formula() {
        Some(formula2.ok_or_else(|| format!("{} needs a second formula", operator.as_ref()))?)
    } else {
        None
    };
    with_shared(
        summary,
        Some(format),
        ConditionalFormatRuleKind::CellValue {
            operator,
            formula1,
            formula2,
        },
    )
}

fn build_cell_value(rule: &ConditionalFormatRule) -> Result<NativeRuleDetails, String> {
    let ConditionalFormatRuleKind::CellValue {
        operator,
        formula1,
        formula2,
    } = &rule.rule
    else {
        return Err("not a cell value rule".to_string());
    };
    let formula2 = if operator.takes_second_formula() {
        let second = formula2
            .as_deref()
            .ok_or_else(|| format!("{} needs formula2", operator.as_ref()))?;
        Some(non_empty(second, "formula2")?.to_string())
    } else {
        None
    };
    Ok(NativeRuleDetails::CellValue {
        operator: operator.as_ref().to_string(),
        formula1: non_empty(formula1, "formula1")?.to_string(),
        formula2,
        format: cell_format(rule),
    })
}

fn read_text_comparison(
    summary: &NativeConditionalFormat,
    details: NativeRuleDetails,
) -> Result<ConditionalFormatRule, String> {
    let found = details.host_kind();
    let NativeRuleDetails::TextComparison {
        operator,
        text,
        format,
    } = details
    else {
        return Err(unexpected("ContainsText", found));
    };
    with_shared(
        summary,
        Some(format),
        ConditionalFormatRuleKind::TextComparison {
            operator: parse_host_value("text comparison operator", &operator)?,
            text,
        },
    )
}

fn build_text_comparison(rule: &ConditionalFormatRule) -> Result<NativeRuleDetails, String> {
    let ConditionalFormatRuleKind::TextComparison { operator, text } = &rule.rule else {
        return Err("not a text comparison rule".to_string());
    };
    Ok(NativeRuleDetails::TextComparison {
        operator: operator.as_ref().to_string(),
        text: text.clone(),
        format: cell_format(rule),
    })
}

fn read_top_bottom(
    summary: &NativeConditionalFormat,
    details: NativeRuleDetails,
) -> Result<ConditionalFormatRule, String> {
    let found = details.host_kind();
    let NativeRuleDetails::TopBottom {
        rank_type,
        rank,
        format,
    } = details
    else {
        return Err(unexpected("TopBottom", found));
    };
    let rank_type: TopBottomType = parse_host_value("top/bottom type", &rank_type)?;
    with_shared(
        summary,
        Some(format),
        ConditionalFormatRuleKind::TopBottom { rank_type, rank },
    )
}

fn build_top_bottom(rule: &ConditionalFormatRule) -> Result<NativeRuleDetails, String> {
    let ConditionalFormatRuleKind::TopBottom { rank_type, rank } = &rule.rule else {
        return Err("not a top/bottom rule".to_string());
    };
    if *rank == 0 {
        return Err("rank must be at least 1".to_string());
    }
    let percent = matches!(
        rank_type,
        TopBottomType::TopPercent | TopBottomType::BottomPercent
    );
    if percent && *rank > 100 {
        return Err(format!("rank {rank} is not a percentage"));
    }
    Ok(NativeRuleDetails::TopBottom {
        rank_type: rank_type.as_ref().to_string(),
        rank: *rank,
        format: cell_format(rule),
    })
}

fn read_preset_criteria(
    summary: &NativeConditionalFormat,
    details: NativeRuleDetails,
) -> Result<ConditionalFormatRule, String> {
    let found = details.host_kind();
    let NativeRuleDetails::PresetCriteria { criterion, format } = details else {
        return Err(unexpected("PresetCriteria", found));
    };
    with_shared(
        summary,
        Some(format),
        ConditionalFormatRuleKind::PresetCriteria {
            criterion: parse_host_value("preset criterion", &criterion)?,
        },
    )
}

fn build_preset_criteria(rule: &ConditionalFormatRule) -> Result<NativeRuleDetails, String> {
    let ConditionalFormatRuleKind::PresetCriteria { criterion } = &rule.rule else {
        return Err("not a preset criteria rule".to_string());
    };
    Ok(NativeRuleDetails::PresetCriteria {
        criterion: criterion.as_ref().to_string(),
        format: cell_format(rule),
    })
}

fn read_threshold(label: &str, kind: &str, formula: Option<String>) -> Result<Threshold, String> {
    let kind: ThresholdType = parse_host_value(label, kind)?;
    let formula = if kind.takes_formula() {
        Some(formula.ok_or_else(|| format!("{label} {} has no value", kind.as_ref()))?)
    } else {
        None
    };
    Ok(Threshold { kind, formula })
}

fn build_threshold(label: &str, threshold: &Threshold) -> Result<NativeThreshold, String> {
    let formula = if threshold.kind.takes_formula() {
        let value = threshold
            .formula
            .as_deref()
            .ok_or_else(|| format!("{label} {} needs a value", threshold.kind.as_ref()))?;
        Some(non_empty(value, label)?.to_string())
    } else {
        None
    };
    Ok(NativeThreshold {
        kind: threshold.kind.as_ref().to_string(),
        formula,
    })
}

fn read_data_bar(
    summary: &NativeConditionalFormat,
    details: NativeRuleDetails,
) -> Result<ConditionalFormatRule, String> {
    let found = details.host_kind();
    let NativeRuleDetails::DataBar(bar) = details else {
        return Err(unexpected("DataBar", found));
    };
    let rule = DataBarRule {
        axis_color: bar.axis_color,
        axis_format: parse_host_value("data bar axis format", &bar.axis_format)?,
        bar_direction: parse_host_value("data bar direction", &bar.bar_direction)?,
        show_data_bar_only: bar.show_data_bar_only,
        lower_bound: read_threshold(
            "lower bound",
            &bar.lower_bound.kind,
            bar.lower_bound.formula,
        )?,
        upper_bound: read_threshold(
            "upper bound",
            &bar.upper_bound.kind,
            bar.upper_bound.formula,
        )?,
        positive_fill_color: bar.positive_fill_color,
        positive_border_color: bar.positive_border_color,
        positive_gradient_fill: bar.positive_gradient_fill,
        negative_fill_color: bar.negative_fill_color,
        negative_border_color: bar.negative_border_color,
        negative_match_positive_fill_color: bar.negative_match_positive_fill_color,
        negative_match_positive_border_color: bar.negative_match_positive_border_color,
    };
    with_shared(summary, None, ConditionalFormatRuleKind::DataBar(rule))
}

fn build_data_bar(rule: &ConditionalFormatRule) -> Result<NativeRuleDetails, String> {
    let ConditionalFormatRuleKind::DataBar(bar) = &rule.rule else {
        return Err("not a data bar rule".to_string());
    };
    reject_cell_format(rule, "data bar")?;
    Ok(NativeRuleDetails::DataBar(NativeDataBar {
        axis_color: bar.axis_color.clone(),
        axis_format: bar.axis_format.as_ref().to_string(),
        bar_direction: bar.bar_direction.as_ref().to_string(),
        show_data_bar_only: bar.show_data_bar_only,
        lower_bound: build_threshold("lower bound", &bar.lower_bound)?,
        upper_bound: build_threshold("upper bound", &bar.upper_bound)?,
        positive_fill_color: non_empty(&bar.positive_fill_color, "positive fill color")?
            .to_string(),
        positive_border_color: bar.positive_border_color.clone(),
        positive_gradient_fill: bar.positive_gradient_fill,
        negative_fill_color: non_empty(&bar.negative_fill_color, "negative fill color")?
            .to_string(),
        negative_border_color: bar.negative_border_color.clone(),
        negative_match_positive_fill_color: bar.negative_match_positive_fill_color,
        negative_match_positive_border_color: bar.negative_match_positive_border_color,
    }))
}

fn read_stop(label: &str, stop: NativeColorScaleStop) -> Result<ColorScaleStop, String> {
    let threshold = read_threshold(label, &stop.kind, stop.formula)?;
    Ok(ColorScaleStop {
        kind: threshold.kind,
        formula: threshold.formula,
        color: stop.color,
    })
}

fn build_stop(label: &str, stop: &ColorScaleStop) -> Result<NativeColorScaleStop, String> {
    let threshold = build_threshold(
        label,
        &Threshold {
            kind: stop.kind,
            formula: stop.formula.clone(),
        },
    )?;
    Ok(NativeColorScaleStop {
        kind: threshold.kind,
        formula: threshold.formula,
        color: non_empty(&stop.color, label)?.to_string(),
    })
}

fn read_color_scale(
    summary: &NativeConditionalFormat,
    details: NativeRuleDetails,
) -> Result<ConditionalFormatRule, String> {
    let found = details.host_kind();
    let NativeRuleDetails::ColorScale(scale) = details else {
        return Err(unexpected("ColorScale", found));
    };
    let rule = ColorScaleRule {
        minimum: read_stop("minimum", scale.minimum)?,
        midpoint: scale
            .midpoint
            .map(|stop| read_stop("midpoint", stop))
            .transpose()?,
        maximum: read_stop("maximum", scale.maximum)?,
    };
    with_shared(summary, None, ConditionalFormatRuleKind::ColorScale(rule))
}

fn build_color_scale(rule: &ConditionalFormatRule) -> Result<NativeRuleDetails, String> {
    let ConditionalFormatRuleKind::ColorScale(scale) = &rule.rule else {
        return Err("not a color scale rule".to_string());
    };
    reject_cell_format(rule, "color scale")?;
    Ok(NativeRuleDetails::ColorScale(NativeColorScale {
        minimum: build_stop("minimum", &scale.minimum)?,
        midpoint: scale
            .midpoint
            .as_ref()
            .map(|stop| build_stop("midpoint", stop))
            .transpose()?,
        maximum: build_stop("maximum", &scale.maximum)?,
    }))
}

fn check_icon_index(set: IconSetStyle, index: u32) -> Result<(), String> {
    if index as usize >= set.icon_count() {
        return Err(format!(
            "icon index {index} is out of range for {}",
            set.as_ref()
        ));
    }
    Ok(())
}

fn read_icon_set(
    summary: &NativeConditionalFormat,
    details: NativeRuleDetails,
) -> Result<ConditionalFormatRule, String> {
    let found = details.host_kind();
    let NativeRuleDetails::IconSet(icons) = details else {
        return Err(unexpected("IconSet", found));
    };
    let style: IconSetStyle = parse_host_value("icon set", &icons.style)?;
    if icons.criteria.len() != style.icon_count() {
        return Err(format!(
            "{} has {} criteria, expected {}",
            style.as_ref(),
            icons.criteria.len(),
            style.icon_count()
        ));
    }
    let mut criteria = Vec::with_capacity(icons.criteria.len());
    for criterion in icons.criteria {
        let custom_icon = match criterion.custom_icon {
            Some(icon) => {
                let set: IconSetStyle = parse_host_value("icon set", &icon.set)?;
                check_icon_index(set, icon.index)?;
                Some(CustomIcon {
                    set,
                    index: icon.index,
                })
            }
            None => None,
        };
        criteria.push(IconCriterion {
            kind: parse_host_value("icon criterion type", &criterion.kind)?,
            operator: parse_host_value("icon criterion operator", &criterion.operator)?,
            formula: criterion.formula,
            custom_icon,
        });
    }
    let rule = IconSetRule {
        style,
        reverse_icon_order: icons.reverse_icon_order,
        show_icon_only: icons.show_icon_only,
        criteria,
    };
    with_shared(summary, None, ConditionalFormatRuleKind::IconSet(rule))
}

fn build_icon_set(rule: &ConditionalFormatRule) -> Result<NativeRuleDetails, String> {
    let ConditionalFormatRuleKind::IconSet(icons) = &rule.rule else {
        return Err("not an icon set rule".to_string());
    };
    reject_cell_format(rule, "icon set")?;
    if icons.criteria.len() != icons.style.icon_count() {
        return Err(format!(
            "{} needs {} criteria, got {}",
            icons.style.as_ref(),
            icons.style.icon_count(),
            icons.criteria.len()
        ));
    }
    let mut criteria = Vec::with_capacity(icons.criteria.len());
    for criterion in &icons.criteria {
        if let Some(icon) = &criterion.custom_icon {
            check_icon_index(icon.set, icon.index)?;
        }
        criteria.push(NativeIconCriterion {
            kind: criterion.kind.as_ref().to_string(),
            operator: criterion.operator.as_ref().to_string(),
            formula: criterion.formula.clone(),
            custom_icon: criterion.custom_icon.as_ref().map(|icon| NativeCustomIcon {
                set: icon.set.as_ref().to_string(),
                index: icon.index,
            }),
        });
    }
    Ok(NativeRuleDetails::IconSet(NativeIconSet {
        style: icons.style.as_ref().to_string(),
        reverse_icon_order: icons.reverse_icon_order,
        show_icon_only: icons.show_icon_only,
        criteria,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::values::TextComparisonOperator;
    use strum::IntoEnumIterator;

    fn summary(kind: &str) -> NativeConditionalFormat {
        NativeConditionalFormat {
            id: "cf-1".to_string(),
            kind: kind.to_string(),
            applies_to: "Sheet1!A1:A10".to_string(),
            priority: 0,
            stop_if_true: Some(true),
        }
    }

    #[test]
    fn every_kind_has_a_matching_handler() {
        for kind in ConditionalFormatKind::iter() {
            assert_eq!(handler(kind).kind, kind);
        }
    }

    #[test]
    fn read_strips_sheet_and_keeps_shared_fields() {
        let details = NativeRuleDetails::TextComparison {
            operator: "beginsWith".to_string(),
            text: "ERR".to_string(),
            format: NativeCfFormat {
                font_color: Some("#FF0000".to_string()),
                underline: Some("Single".to_string()),
                ..Default::default()
            },
        };
        let rule = read_text_comparison(&summary("ContainsText"), details).unwrap();
        assert_eq!(rule.applies_to_address, "A1:A10");
        assert_eq!(rule.stop_if_true, Some(true));
        assert_eq!(rule.font_color.as_deref(), Some("#FF0000"));
        assert_eq!(
            rule.rule,
            ConditionalFormatRuleKind::TextComparison {
                operator: TextComparisonOperator::BeginsWith,
                text: "ERR".to_string(),
            }
        );
    }

    #[test]
    fn unknown_preset_is_rejected_with_reason() {
        let details = NativeRuleDetails::PresetCriteria {
            criterion: "NextFortnight".to_string(),
            format: NativeCfFormat::default(),
        };
        let reason = read_preset_criteria(&summary("PresetCriteria"), details).unwrap_err();
        assert!(reason.contains("unrecognized preset criterion"), "{reason}");
    }

    #[test]
    fn between_requires_second_formula() {
        let rule = ConditionalFormatRule::new(
            "B2:B9",
            ConditionalFormatRuleKind::CellValue {
                operator: CellValueOperator::Between,
                formula1: "1".to_string(),
                formula2: None,
            },
        );
        assert!(build_cell_value(&rule).unwrap_err().contains("formula2"));
    }

    #[test]
    fn graphical_rules_reject_cell_formats() {
        let mut rule = ConditionalFormatRule::new(
            "A1:A5",
            ConditionalFormatRuleKind::ColorScale(ColorScaleRule {
                minimum: ColorScaleStop {
                    kind: ThresholdType::LowestValue,
                    formula: None,
                    color: "#F8696B".to_string(),
                },
                midpoint: None,
                maximum: ColorScaleStop {
                    kind: ThresholdType::HighestValue,
                    formula: None,
                    color: "#63BE7B".to_string(),
                },
            }),
        );
        assert!(build_color_scale(&rule).is_ok());
        rule.bold = Some(true);
        assert!(build_color_scale(&rule).is_err());
    }

    #[test]
    fn icon_set_criteria_must_match_icon_count() {
        let details = NativeRuleDetails::IconSet(NativeIconSet {
            style: "ThreeArrows".to_string(),
            reverse_icon_order: false,
            show_icon_only: false,
            criteria: vec![NativeIconCriterion {
                kind: "Percent".to_string(),
                operator: "GreaterThanOrEqual".to_string(),
                formula: "0".to_string(),
                custom_icon: None,
            }],
        });
        let reason = read_icon_set(&summary("IconSet"), details).unwrap_err();
        assert!(reason.contains("expected 3"), "{reason}");
    }
}
