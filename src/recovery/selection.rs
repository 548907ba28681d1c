use crate::address::CellRange;
use crate::host::FormatLoadRequest;
use crate::recovery::values::BorderEdge;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which format properties a capture includes. Each flag is independent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CaptureSelection {
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
    pub border_top: bool,
    pub border_bottom: bool,
    pub border_left: bool,
    pub border_right: bool,
    pub border_inside_horizontal: bool,
    pub border_inside_vertical: bool,
}

impl CaptureSelection {
    pub fn all() -> Self {
        Self {
            number_format: true,
            fill_color: true,
            font_color: true,
            bold: true,
            italic: true,
            underline: true,
            font_name: true,
            font_size: true,
            horizontal_alignment: true,
            vertical_alignment: true,
            wrap_text: true,
            column_width: true,
            row_height: true,
            merged_areas: true,
            border_top: true,
            border_bottom: true,
            border_left: true,
            border_right: true,
            border_inside_horizontal: true,
            border_inside_vertical: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn border(&self, edge: BorderEdge) -> bool {
        match edge {
            BorderEdge::EdgeTop => self.border_top,
            BorderEdge::EdgeBottom => self.border_bottom,
            BorderEdge::EdgeLeft => self.border_left,
            BorderEdge::EdgeRight => self.border_right,
            BorderEdge::InsideHorizontal => self.border_inside_horizontal,
            BorderEdge::InsideVertical => self.border_inside_vertical,
        }
    }

    pub fn selected_borders(&self) -> impl Iterator<Item = BorderEdge> + '_ {
        BorderEdge::ALL.into_iter().filter(|edge| self.border(*edge))
    }

    /// Flat-cost properties: one unit per area regardless of its size.
    fn scalar_count(&self) -> u64 {
        let flags = [
            self.fill_color,
            self.font_color,
            self.bold,
            self.italic,
            self.underline,
            self.font_name,
            self.font_size,
            self.horizontal_alignment,
            self.vertical_alignment,
            self.wrap_text,
            self.border_top,
            self.border_bottom,
            self.border_left,
            self.border_right,
            self.border_inside_horizontal,
            self.border_inside_vertical,
        ];
        flags.iter().filter(|flag| **flag).count() as u64
    }

    /// Additive cost of capturing this selection over one area.
    pub fn area_cost(&self, range: &CellRange) -> u64 {
        let rows = u64::from(range.row_count());
        let cols = u64::from(range.column_count());
        let mut cost = self.scalar_count();
        if self.number_format {
            cost += rows * cols;
        }
        if self.column_width {
            cost += cols;
        }
        if self.row_height {
            cost += rows;
        }
        if self.merged_areas {
            // a merge needs at least two cells
            cost += range.cell_count() / 2;
        }
        cost
    }

    pub fn estimate_cost<'a>(&self, areas: impl IntoIterator<Item = &'a CellRange>) -> u64 {
        areas.into_iter().map(|area| self.area_cost(area)).sum()
    }

    pub fn load_request(&self) -> FormatLoadRequest {
        let mut borders = [false; 6];
        for (idx, edge) in BorderEdge::ALL.iter().enumerate() {
            borders[idx] = self.border(*edge);
        }
        FormatLoadRequest {
            number_format: self.number_format,
            fill_color: self.fill_color,
            font_color: self.font_color,
            bold: self.bold,
            italic: self.italic,
            underline: self.underline,
            font_name: self.font_name,
            font_size: self.font_size,
            horizontal_alignment: self.horizontal_alignment,
            vertical_alignment: self.vertical_alignment,
            wrap_text: self.wrap_text,
            column_width: self.column_width,
            row_height: self.row_height,
            merged_areas: self.merged_areas,
            borders,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ten_by_five() -> CellRange {
        CellRange::parse("A1:E10").unwrap()
    }

    #[test]
    fn cost_contributions_are_additive() {
        let area = ten_by_five();
        let number_format = CaptureSelection {
            number_format: true,
            ..Default::default()
        };
        let column_width = CaptureSelection {
            column_width: true,
            ..Default::default()
        };
        let both = CaptureSelection {
            number_format: true,
            column_width: true,
            ..Default::default()
        };

        assert_eq!(number_format.area_cost(&area), 50);
        assert_eq!(column_width.area_cost(&area), 5);
        assert_eq!(both.area_cost(&area), 55);
    }

    #[test]
    fn scalar_properties_cost_one_unit_per_area() {
        let selection = CaptureSelection {
            fill_color: true,
            border_top: true,
            ..Default::default()
        };
        let small = CellRange::parse("A1").unwrap();
        assert_eq!(selection.area_cost(&ten_by_five()), 2);
        assert_eq!(selection.estimate_cost([&ten_by_five(), &small]), 4);
    }

    #[test]
    fn merged_area_cost_is_half_the_cells() {
        let selection = CaptureSelection {
            merged_areas: true,
            row_height: true,
            ..Default::default()
        };
        assert_eq!(selection.area_cost(&CellRange::parse("A1:C3").unwrap()), 4 + 3);
    }

    #[test]
    fn load_request_mirrors_border_flags() {
        let selection = CaptureSelection {
            border_left: true,
            border_inside_vertical: true,
            ..Default::default()
        };
        let request = selection.load_request();
        assert_eq!(request.borders, [false, false, true, false, false, true]);
        assert!(!request.fill_color);
        assert!(CaptureSelection::default().is_empty());
        assert!(!selection.is_empty());
    }
}
