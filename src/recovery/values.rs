//! Closed value sets the recovery engine knows how to restore.
//!
//! Host values arrive as strings. Anything outside these sets makes the whole
//! capture unsupported; a checkpoint that silently dropped one property would
//! restore the wrong state without any signal.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{AsRefStr, EnumString, VariantNames};

fn normalize_literal(value: &str) -> String {
    value
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .flat_map(|ch| ch.to_lowercase())
        .collect()
}

fn levenshtein_distance(left: &str, right: &str) -> usize {
    if left.is_empty() {
        return right.chars().count();
    }
    if right.is_empty() {
        return left.chars().count();
    }

    let right_chars: Vec<char> = right.chars().collect();
    let mut previous: Vec<usize> = (0..=right_chars.len()).collect();
    let mut current = vec![0; right_chars.len() + 1];

    for (i, left_ch) in left.chars().enumerate() {
        current[0] = i + 1;
        for (j, right_ch) in right_chars.iter().enumerate() {
            let substitution_cost = if left_ch == *right_ch { 0 } else { 1 };
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + substitution_cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[right_chars.len()]
}

fn suggest_literal<'a>(input: &str, valid: &'a [&'a str]) -> Option<&'a str> {
    let normalized_input = normalize_literal(input);
    let mut best: Option<(&str, usize)> = None;

    for candidate in valid {
        let distance = levenshtein_distance(&normalized_input, &normalize_literal(candidate));
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((candidate, distance)),
        }
    }

    match best {
        Some((candidate, distance)) if distance <= 3 => Some(candidate),
        _ => None,
    }
}

fn unknown_value_reason(label: &str, input: &str, valid: &[&str]) -> String {
    let valid_list = valid.join("|");
    match suggest_literal(input, valid) {
        Some(candidate) if !candidate.eq_ignore_ascii_case(input) => format!(
            "unrecognized {label} '{input}' (closest: '{candidate}'); known: {valid_list}"
        ),
        _ => format!("unrecognized {label} '{input}'; known: {valid_list}"),
    }
}

/// Parse a host-reported string into a known value, or explain why not.
pub fn parse_host_value<T>(label: &str, raw: &str) -> Result<T, String>
where
    T: FromStr + VariantNames,
{
    raw.trim()
        .parse::<T>()
        .map_err(|_| unknown_value_reason(label, raw, T::VARIANTS))
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum BorderStyle {
    None,
    Continuous,
    Dash,
    DashDot,
    DashDotDot,
    Dot,
    Double,
    SlantDashDot,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum BorderWeight {
    Hairline,
    Thin,
    Medium,
    Thick,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum BorderEdge {
    EdgeTop,
    EdgeBottom,
    EdgeLeft,
    EdgeRight,
    InsideHorizontal,
    InsideVertical,
}

impl BorderEdge {
    pub const ALL: [BorderEdge; 6] = [
        BorderEdge::EdgeTop,
        BorderEdge::EdgeBottom,
        BorderEdge::EdgeLeft,
        BorderEdge::EdgeRight,
        BorderEdge::InsideHorizontal,
        BorderEdge::InsideVertical,
    ];
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum HorizontalAlignment {
    General,
    Left,
    Center,
    Right,
    Fill,
    Justify,
    CenterAcrossSelection,
    Distributed,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum VerticalAlignment {
    Top,
    Center,
    Bottom,
    Justify,
    Distributed,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum UnderlineStyle {
    None,
    Single,
    Double,
    SingleAccountant,
    DoubleAccountant,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum SheetVisibility {
    Visible,
    Hidden,
    VeryHidden,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum CellValueOperator {
    Between,
    NotBetween,
    EqualTo,
    NotEqualTo,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl CellValueOperator {
    pub fn takes_second_formula(self) -> bool {
        matches!(self, Self::Between | Self::NotBetween)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum TextComparisonOperator {
    Contains,
    NotContains,
    BeginsWith,
    EndsWith,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum TopBottomType {
    TopItems,
    TopPercent,
    BottomItems,
    BottomPercent,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum PresetCriterion {
    Blanks,
    NonBlanks,
    Errors,
    NonErrors,
    Yesterday,
    Today,
    Tomorrow,
    LastSevenDays,
    LastWeek,
    ThisWeek,
    NextWeek,
    LastMonth,
    ThisMonth,
    NextMonth,
    AboveAverage,
    BelowAverage,
    EqualOrAboveAverage,
    EqualOrBelowAverage,
    OneStdDevAboveAverage,
    OneStdDevBelowAverage,
    TwoStdDevAboveAverage,
    TwoStdDevBelowAverage,
    ThreeStdDevAboveAverage,
    ThreeStdDevBelowAverage,
    UniqueValues,
    DuplicateValues,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum DataBarAxisFormat {
    Automatic,
    None,
    CellMidPoint,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum DataBarDirection {
    Context,
    LeftToRight,
    RightToLeft,
}

/// Threshold kinds shared by data bar bounds and color scale stops.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum ThresholdType {
    Automatic,
    LowestValue,
    HighestValue,
    Number,
    Percent,
    Formula,
    Percentile,
}

impl ThresholdType {
    /// Kinds that carry a formula/value alongside the type.
    pub fn takes_formula(self) -> bool {
        matches!(
            self,
            Self::Number | Self::Percent | Self::Formula | Self::Percentile
        )
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum IconSetStyle {
    ThreeArrows,
    ThreeArrowsGray,
    ThreeFlags,
    ThreeTrafficLights1,
    ThreeTrafficLights2,
    ThreeSigns,
    ThreeSymbols,
    ThreeSymbols2,
    ThreeStars,
    ThreeTriangles,
    FourArrows,
    FourArrowsGray,
    FourRedToBlack,
    FourRating,
    FourTrafficLights,
    FiveArrows,
    FiveArrowsGray,
    FiveRating,
    FiveQuarters,
    FiveBoxes,
}

impl IconSetStyle {
    pub fn icon_count(self) -> usize {
        let name = self.as_ref();
        if name.starts_with("Three") {
            3
        } else if name.starts_with("Four") {
            4
        } else {
            5
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum IconCriterionType {
    Number,
    Percent,
    Formula,
    Percentile,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum IconCriterionOperator {
    GreaterThan,
    GreaterThanOrEqual,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_values_case_insensitively() {
        let style: BorderStyle = parse_host_value("border style", "continuous").unwrap();
        assert_eq!(style, BorderStyle::Continuous);
        let weight: BorderWeight = parse_host_value("border weight", " Thin ").unwrap();
        assert_eq!(weight, BorderWeight::Thin);
    }

    #[test]
    fn unknown_values_name_the_closest_match() {
        let err = parse_host_value::<BorderStyle>("border style", "Continous").unwrap_err();
        assert!(err.contains("unrecognized border style 'Continous'"));
        assert!(err.contains("closest: 'Continuous'"));

        let err = parse_host_value::<IconSetStyle>("icon set", "Hexagons").unwrap_err();
        assert!(err.contains("known: ThreeArrows|"));
        assert!(!err.contains("closest"));
    }

    #[test]
    fn icon_counts_follow_style_family() {
        assert_eq!(IconSetStyle::ThreeSymbols2.icon_count(), 3);
        assert_eq!(IconSetStyle::FourRating.icon_count(), 4);
        assert_eq!(IconSetStyle::FiveBoxes.icon_count(), 5);
    }

    #[test]
    fn host_strings_serialize_verbatim() {
        let json = serde_json::to_string(&PresetCriterion::OneStdDevAboveAverage).unwrap();
        assert_eq!(json, "\"OneStdDevAboveAverage\"");
    }
}
