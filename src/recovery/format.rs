use super::{CaptureResult, StateCapturer, resolve_sheet};
use crate::address::{CellRange, RangeRef};
use crate::errors::{RestoreIntegrityError, UnsupportedStateError};
use crate::host::{
    FontPatch, HostCommand, NativeBorder, NativeSheet, PropertyRead, RangeFormatRead, WorkbookHost,
};
use crate::recovery::selection::CaptureSelection;
use crate::recovery::values::{
    BorderEdge, BorderStyle, BorderWeight, HorizontalAlignment, UnderlineStyle, VerticalAlignment,
    parse_host_value,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::rust::double_option;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderState {
    pub style: BorderStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<BorderWeight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl BorderState {
    pub fn none() -> Self {
        Self {
            style: BorderStyle::None,
            weight: None,
            color: None,
        }
    }

    fn from_native(native: NativeBorder) -> Result<Self, String> {
        let style: BorderStyle = parse_host_value("border style", &native.style)?;
        if style == BorderStyle::None {
            // hosts keep reporting a weight and colour for absent borders
            return Ok(Self::none());
        }
        let weight = native
            .weight
            .as_deref()
            .map(|w| parse_host_value::<BorderWeight>("border weight", w))
            .transpose()?;
        Ok(Self {
            style,
            weight,
            color: native.color,
        })
    }

    fn to_native(&self) -> NativeBorder {
        NativeBorder {
            style: self.style.as_ref().to_string(),
            weight: self.weight.map(|w| w.as_ref().to_string()),
            color: self.color.clone(),
        }
    }
}

/// Captured properties of one area. `None` means the property was not selected.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FormatAreaState {
    pub address: String,
    pub row_count: u32,
    pub column_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_format: Option<Vec<Vec<String>>>,
    /// Absent: not captured. `null`: no fill. Otherwise a colour.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "double_option"
    )]
    pub fill_color: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<UnderlineStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal_alignment: Option<HorizontalAlignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_alignment: Option<VerticalAlignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_text: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_widths: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_heights: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_areas: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_top: Option<BorderState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_bottom: Option<BorderState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_left: Option<BorderState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_right: Option<BorderState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_inside_horizontal: Option<BorderState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_inside_vertical: Option<BorderState>,
}

impl FormatAreaState {
    pub fn border(&self, edge: BorderEdge) -> Option<&BorderState> {
        match edge {
            BorderEdge::EdgeTop => self.border_top.as_ref(),
            BorderEdge::EdgeBottom => self.border_bottom.as_ref(),
            BorderEdge::EdgeLeft => self.border_left.as_ref(),
            BorderEdge::EdgeRight => self.border_right.as_ref(),
            BorderEdge::InsideHorizontal => self.border_inside_horizontal.as_ref(),
            BorderEdge::InsideVertical => self.border_inside_vertical.as_ref(),
        }
    }

    pub fn set_border(&mut self, edge: BorderEdge, border: BorderState) {
        let slot = match edge {
            BorderEdge::EdgeTop => &mut self.border_top,
            BorderEdge::EdgeBottom => &mut self.border_bottom,
            BorderEdge::EdgeLeft => &mut self.border_left,
            BorderEdge::EdgeRight => &mut self.border_right,
            BorderEdge::InsideHorizontal => &mut self.border_inside_horizontal,
            BorderEdge::InsideVertical => &mut self.border_inside_vertical,
        };
        *slot = Some(border);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatState {
    pub selection: CaptureSelection,
    pub areas: Vec<FormatAreaState>,
}

pub struct FormatCapturer;

#[async_trait]
impl StateCapturer for FormatCapturer {
    type State = FormatState;
    type Selection = CaptureSelection;

    async fn capture(
        &self,
        host: &dyn WorkbookHost,
        address: &str,
        selection: &CaptureSelection,
    ) -> Result<CaptureResult<FormatState>> {
        let reference = RangeRef::parse(address)?;
        if selection.is_empty() {
            return Ok(CaptureResult::unsupported(
                "no format properties were selected for capture",
            ));
        }
        let sheet = match resolve_sheet(host, &reference).await?.for_capture() {
            Ok(sheet) => sheet,
            Err(reason) => return Ok(CaptureResult::unsupported(reason)),
        };
        capture_on_sheet(host, &sheet, &reference, selection).await
    }

    async fn apply(
        &self,
        host: &dyn WorkbookHost,
        address: &str,
        target: &FormatState,
    ) -> Result<FormatState> {
        let reference = RangeRef::parse(address)?;
        if target.selection.is_empty() {
            return Err(RestoreIntegrityError::new("format snapshot selects no properties").into());
        }
        let sheet = resolve_sheet(host, &reference).await?.for_restore()?;

        let previous = capture_on_sheet(host, &sheet, &reference, &target.selection)
            .await?
            .into_result()
            .map_err(UnsupportedStateError::new)?;

        if previous.areas.len() != target.areas.len() {
            return Err(RestoreIntegrityError::new(format!(
                "snapshot has {} area(s) but '{address}' has {}",
                target.areas.len(),
                previous.areas.len()
            ))
            .into());
        }

        let mut commands = Vec::new();
        for ((area, before), after) in reference
            .areas()
            .iter()
            .zip(&previous.areas)
            .zip(&target.areas)
        {
            validate_target_area(&target.selection, area.range, after)?;
            commands.extend(area_commands(
                &sheet.name,
                area.range,
                &target.selection,
                before,
                after,
            )?);
        }

        for command in commands {
            host.queue(command);
        }
        host.sync().await?;
        Ok(previous)
    }
}

async fn capture_on_sheet(
    host: &dyn WorkbookHost,
    sheet: &NativeSheet,
    reference: &RangeRef,
    selection: &CaptureSelection,
) -> Result<CaptureResult<FormatState>> {
    let request = selection.load_request();
    let pending: Vec<_> = reference
        .areas()
        .iter()
        .map(|area| host.load_range_format(&sheet.name, area.range, request))
        .collect();
    host.sync().await?;

    let mut areas = Vec::with_capacity(pending.len());
    for read in pending {
        match area_state(read.take()?, selection) {
            Ok(state) => areas.push(state),
            Err(reason) => return Ok(CaptureResult::unsupported(reason)),
        }
    }
    Ok(CaptureResult::supported(FormatState {
        selection: *selection,
        areas,
    }))
}

fn uniform<T>(read: Option<PropertyRead<T>>, label: &str, address: &str) -> Result<T, String> {
    match read {
        Some(PropertyRead::Uniform(value)) => Ok(value),
        Some(PropertyRead::Mixed) => Err(format!("{label} is not uniform across {address}")),
        None => Err(format!("host did not report {label} for {address}")),
    }
}

/// Translate one host read into plain state. `Err` carries the unsupported reason.
fn area_state(read: RangeFormatRead, selection: &CaptureSelection) -> Result<FormatAreaState, String> {
    let address = read.address.clone();
    let mut state = FormatAreaState {
        address: read.address,
        row_count: read.row_count,
        column_count: read.column_count,
        ..Default::default()
    };

    if selection.number_format {
        let matrix = read
            .number_format
            .ok_or_else(|| format!("host did not report number formats for {address}"))?;
        let shaped = matrix.len() == read.row_count as usize
            && matrix.iter().all(|row| row.len() == read.column_count as usize);
        if !shaped {
            return Err(format!(
                "number format matrix for {address} does not match its {}x{} shape",
                read.row_count, read.column_count
            ));
        }
        state.number_format = Some(matrix);
    }
    if selection.fill_color {
        state.fill_color = Some(uniform(read.fill_color, "fill color", &address)?);
    }
    if selection.font_color {
        state.font_color = Some(uniform(read.font_color, "font color", &address)?);
    }
    if selection.bold {
        state.bold = Some(uniform(read.bold, "bold", &address)?);
    }
    if selection.italic {
        state.italic = Some(uniform(read.italic, "italic", &address)?);
    }
    if selection.underline {
        let raw = uniform(read.underline, "underline", &address)?;
        state.underline = Some(parse_host_value("underline style", &raw)?);
    }
    if selection.font_name {
        state.font_name = Some(uniform(read.font_name, "font name", &address)?);
    }
    if selection.font_size {
        state.font_size = Some(uniform(read.font_size, "font size", &address)?);
    }
    if selection.horizontal_alignment {
        let raw = uniform(read.horizontal_alignment, "horizontal alignment", &address)?;
        state.horizontal_alignment = Some(parse_host_value("horizontal alignment", &raw)?);
    }
    if selection.vertical_alignment {
        let raw = uniform(read.vertical_alignment, "vertical alignment", &address)?;
        state.vertical_alignment = Some(parse_host_value("vertical alignment", &raw)?);
    }
    if selection.wrap_text {
        state.wrap_text = Some(uniform(read.wrap_text, "wrap text", &address)?);
    }
    if selection.column_width {
        let widths = read
            .column_widths
            .ok_or_else(|| format!("host did not report column widths for {address}"))?;
        if widths.len() != read.column_count as usize {
            return Err(format!("column width count does not match {address}"));
        }
        state.column_widths = Some(widths);
    }
    if selection.row_height {
        let heights = read
            .row_heights
            .ok_or_else(|| format!("host did not report row heights for {address}"))?;
        if heights.len() != read.row_count as usize {
            return Err(format!("row height count does not match {address}"));
        }
        state.row_heights = Some(heights);
    }
    if selection.merged_areas {
        let mut merges = read
            .merged_areas
            .ok_or_else(|| format!("host did not report merged areas for {address}"))?;
        merges.sort();
        state.merged_areas = Some(merges);
    }

    let mut borders = read.borders;
    for edge in selection.selected_borders() {
        let idx = borders
            .iter()
            .position(|(e, _)| *e == edge)
            .ok_or_else(|| format!("host did not report {} border for {address}", edge.as_ref()))?;
        let (_, native) = borders.swap_remove(idx);
        let native = match native {
            PropertyRead::Uniform(native) => native,
            PropertyRead::Mixed => {
                return Err(format!(
                    "{} border is not uniform across {address}",
                    edge.as_ref()
                ));
            }
        };
        state.set_border(edge, BorderState::from_native(native)?);
    }

    Ok(state)
}

fn missing(property: &str, address: &str) -> anyhow::Error {
    RestoreIntegrityError::new(format!("snapshot for {address} is missing {property}")).into()
}

fn validate_target_area(
    selection: &CaptureSelection,
    range: CellRange,
    target: &FormatAreaState,
) -> Result<()> {
    let address = target.address.as_str();
    if target.row_count != range.row_count() || target.column_count != range.column_count() {
        return Err(RestoreIntegrityError::new(format!(
            "{address} was captured as {}x{} but the range is now {}x{}",
            target.row_count,
            target.column_count,
            range.row_count(),
            range.column_count()
        ))
        .into());
    }
    if selection.number_format {
        let matrix = target
            .number_format
            .as_ref()
            .ok_or_else(|| missing("number formats", address))?;
        let shaped = matrix.len() == range.row_count() as usize
            && matrix
                .iter()
                .all(|row| row.len() == range.column_count() as usize);
        if !shaped {
            return Err(RestoreIntegrityError::new(format!(
                "number format matrix for {address} does not match its shape"
            ))
            .into());
        }
    }
    if selection.column_width
        && target.column_widths.as_ref().map(Vec::len) != Some(range.column_count() as usize)
    {
        return Err(missing("one width per column", address));
    }
    if selection.row_height
        && target.row_heights.as_ref().map(Vec::len) != Some(range.row_count() as usize)
    {
        return Err(missing("one height per row", address));
    }
    if selection.merged_areas {
        for merge in target
            .merged_areas
            .as_ref()
            .ok_or_else(|| missing("merged areas", address))?
        {
            CellRange::parse(merge).map_err(|e| {
                RestoreIntegrityError::new(format!("invalid merged area '{merge}': {e}"))
            })?;
        }
    }
    let scalars = [
        (selection.fill_color, target.fill_color.is_some(), "fill color"),
        (selection.font_color, target.font_color.is_some(), "font color"),
        (selection.bold, target.bold.is_some(), "bold"),
        (selection.italic, target.italic.is_some(), "italic"),
        (selection.underline, target.underline.is_some(), "underline"),
        (selection.font_name, target.font_name.is_some(), "font name"),
        (selection.font_size, target.font_size.is_some(), "font size"),
        (
            selection.horizontal_alignment,
            target.horizontal_alignment.is_some(),
            "horizontal alignment",
        ),
        (
            selection.vertical_alignment,
            target.vertical_alignment.is_some(),
            "vertical alignment",
        ),
        (selection.wrap_text, target.wrap_text.is_some(), "wrap text"),
    ];
    for (selected, present, label) in scalars {
        if selected && !present {
            return Err(missing(label, address));
        }
    }
    for edge in selection.selected_borders() {
        if target.border(edge).is_none() {
            return Err(missing(&format!("{} border", edge.as_ref()), address));
        }
    }
    Ok(())
}

/// Host writes that turn `before` into `after`. Merges go first so property
/// writes land on the final cell layout.
fn area_commands(
    sheet: &str,
    range: CellRange,
    selection: &CaptureSelection,
    before: &FormatAreaState,
    after: &FormatAreaState,
) -> Result<Vec<HostCommand>> {
    let sheet = sheet.to_string();
    let mut commands = Vec::new();

    if selection.merged_areas {
        let old = before.merged_areas.clone().unwrap_or_default();
        let new = after.merged_areas.clone().unwrap_or_default();
        if old != new {
            for merge in &old {
                commands.push(HostCommand::Unmerge {
                    sheet: sheet.clone(),
                    range: CellRange::parse(merge)?,
                });
            }
            for merge in &new {
                commands.push(HostCommand::Merge {
                    sheet: sheet.clone(),
                    range: CellRange::parse(merge)?,
                });
            }
        }
    }

    if let Some(formats) = &after.number_format {
        commands.push(HostCommand::SetNumberFormat {
            sheet: sheet.clone(),
            range,
            formats: formats.clone(),
        });
    }
    if let Some(fill) = &after.fill_color {
        commands.push(HostCommand::SetFill {
            sheet: sheet.clone(),
            range,
            color: fill.clone(),
        });
    }

    let patch = FontPatch {
        color: after.font_color.clone(),
        bold: after.bold,
        italic: after.italic,
        underline: after.underline.map(|u| u.as_ref().to_string()),
        name: after.font_name.clone(),
        size: after.font_size,
    };
    if !patch.is_empty() {
        commands.push(HostCommand::SetFont {
            sheet: sheet.clone(),
            range,
            patch,
        });
    }

    if after.horizontal_alignment.is_some()
        || after.vertical_alignment.is_some()
        || after.wrap_text.is_some()
    {
        commands.push(HostCommand::SetAlignment {
            sheet: sheet.clone(),
            range,
            horizontal: after.horizontal_alignment.map(|h| h.as_ref().to_string()),
            vertical: after.vertical_alignment.map(|v| v.as_ref().to_string()),
            wrap_text: after.wrap_text,
        });
    }

    if let Some(widths) = &after.column_widths {
        for (column, width) in range.columns().zip(widths) {
            commands.push(HostCommand::SetColumnWidth {
                sheet: sheet.clone(),
                column,
                width: *width,
            });
        }
    }
    if let Some(heights) = &after.row_heights {
        for (row, height) in range.rows().zip(heights) {
            commands.push(HostCommand::SetRowHeight {
                sheet: sheet.clone(),
                row,
                height: *height,
            });
        }
    }

    for edge in selection.selected_borders() {
        if let Some(border) = after.border(edge) {
            commands.push(HostCommand::SetBorder {
                sheet: sheet.clone(),
                range,
                edge,
                border: border.to_native(),
            });
        }
    }

    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_with_borders(borders: Vec<(BorderEdge, PropertyRead<NativeBorder>)>) -> RangeFormatRead {
        RangeFormatRead {
            address: "Sheet1!A1:B2".to_string(),
            row_count: 2,
            column_count: 2,
            borders,
            ..Default::default()
        }
    }

    #[test]
    fn absent_border_drops_weight_and_color() {
        let native = NativeBorder {
            style: "None".to_string(),
            weight: Some("Thin".to_string()),
            color: Some("#000000".to_string()),
        };
        assert_eq!(BorderState::from_native(native).unwrap(), BorderState::none());
    }

    #[test]
    fn unknown_border_style_is_unsupported() {
        let selection = CaptureSelection {
            border_top: true,
            ..Default::default()
        };
        let read = read_with_borders(vec![(
            BorderEdge::EdgeTop,
            PropertyRead::Uniform(NativeBorder {
                style: "Wavy".to_string(),
                weight: None,
                color: None,
            }),
        )]);
        let reason = area_state(read, &selection).unwrap_err();
        assert!(reason.contains("unrecognized border style 'Wavy'"), "{reason}");
    }

    #[test]
    fn mixed_scalar_is_unsupported() {
        let selection = CaptureSelection {
            bold: true,
            ..Default::default()
        };
        let read = RangeFormatRead {
            bold: Some(PropertyRead::Mixed),
            ..read_with_borders(Vec::new())
        };
        let reason = area_state(read, &selection).unwrap_err();
        assert_eq!(reason, "bold is not uniform across Sheet1!A1:B2");
    }

    #[test]
    fn fill_color_serializes_tri_state() {
        let not_captured = FormatAreaState::default();
        let no_fill = FormatAreaState {
            fill_color: Some(None),
            ..Default::default()
        };
        let yellow = FormatAreaState {
            fill_color: Some(Some("#FFFF00".to_string())),
            ..Default::default()
        };

        let json = serde_json::to_value(&not_captured).unwrap();
        assert!(json.get("fill_color").is_none());
        let json = serde_json::to_value(&no_fill).unwrap();
        assert_eq!(json["fill_color"], serde_json::Value::Null);
        let back: FormatAreaState = serde_json::from_value(json).unwrap();
        assert_eq!(back.fill_color, Some(None));
        let json = serde_json::to_value(&yellow).unwrap();
        assert_eq!(json["fill_color"], "#FFFF00");
    }

    #[test]
    fn equal_merges_emit_no_merge_commands() {
        let selection = CaptureSelection {
            merged_areas: true,
            ..Default::default()
        };
        let state = FormatAreaState {
            address: "Sheet1!A1:D4".to_string(),
            row_count: 4,
            column_count: 4,
            merged_areas: Some(vec!["A1:B2".to_string()]),
            ..Default::default()
        };
        let range = CellRange::parse("A1:D4").unwrap();
        let commands = area_commands("Sheet1", range, &selection, &state, &state).unwrap();
        assert!(commands.is_empty());
    }
}
