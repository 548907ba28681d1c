//! Deterministic in-memory host.
//!
//! Mirrors the batching contract of a live spreadsheet host closely enough to
//! exercise coordinator and recovery logic: loads resolve and commands apply in
//! registration order on `sync()`, and `sync()` always yields to the scheduler.

use super::{
    FormatLoadRequest, HostCommand, NativeBorder, NativeComment, NativeConditionalFormat,
    NativeRuleDetails, NativeSheet, PendingRead, PropertyRead, RangeFormatRead, SheetSelector,
    WorkbookHost,
};
use crate::address::{CellRange, RangeArea, RangeRef, quote_sheet_name};
use crate::errors::TransientHostError;
use crate::recovery::values::BorderEdge;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const DEFAULT_COLUMN_WIDTH: f64 = 48.0;
pub const DEFAULT_ROW_HEIGHT: f64 = 15.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CellFormat {
    pub number_format: String,
    pub fill: Option<String>,
    pub font_color: String,
    pub bold: bool,
    pub italic: bool,
    pub underline: String,
    pub font_name: String,
    pub font_size: f64,
    pub horizontal: String,
    pub vertical: String,
    pub wrap_text: bool,
    pub top: NativeBorder,
    pub bottom: NativeBorder,
    pub left: NativeBorder,
    pub right: NativeBorder,
}

impl Default for CellFormat {
    fn default() -> Self {
        Self {
            number_format: "General".to_string(),
            fill: None,
            font_color: "#000000".to_string(),
            bold: false,
            italic: false,
            underline: "None".to_string(),
            font_name: "Calibri".to_string(),
            font_size: 11.0,
            horizontal: "General".to_string(),
            vertical: "Bottom".to_string(),
            wrap_text: false,
            top: NativeBorder::none(),
            bottom: NativeBorder::none(),
            left: NativeBorder::none(),
            right: NativeBorder::none(),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredRule {
    id: String,
    applies_to: String,
    stop_if_true: Option<bool>,
    details: NativeRuleDetails,
}

#[derive(Debug, Clone)]
struct StoredComment {
    id: String,
    cell: CellRange,
    content: String,
    resolved: bool,
    replies: Vec<String>,
}

#[derive(Debug, Clone)]
struct SheetModel {
    id: String,
    name: String,
    visibility: String,
    cells: HashMap<(u32, u32), CellFormat>,
    column_widths: HashMap<u32, f64>,
    row_heights: HashMap<u32, f64>,
    merges: Vec<CellRange>,
    /// Index 0 is the highest priority.
    rules: Vec<StoredRule>,
    comments: Vec<StoredComment>,
}

impl SheetModel {
    fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            visibility: "Visible".to_string(),
            cells: HashMap::new(),
            column_widths: HashMap::new(),
            row_heights: HashMap::new(),
            merges: Vec::new(),
            rules: Vec::new(),
            comments: Vec::new(),
        }
    }

    fn cell(&self, col: u32, row: u32) -> CellFormat {
        self.cells.get(&(col, row)).cloned().unwrap_or_default()
    }

    fn cell_mut(&mut self, col: u32, row: u32) -> &mut CellFormat {
        self.cells.entry((col, row)).or_default()
    }

    fn update_range(&mut self, range: CellRange, mut update: impl FnMut(&mut CellFormat)) {
        for row in range.rows() {
            for col in range.columns() {
                update(self.cell_mut(col, row));
            }
        }
    }

    fn scan<T: PartialEq>(
        &self,
        range: CellRange,
        mut read: impl FnMut(&CellFormat) -> T,
    ) -> PropertyRead<T> {
        let mut first: Option<T> = None;
        for row in range.rows() {
            for col in range.columns() {
                let value = read(&self.cell(col, row));
                match &first {
                    None => first = Some(value),
                    Some(existing) if *existing != value => return PropertyRead::Mixed,
                    Some(_) => {}
                }
            }
        }
        match first {
            Some(value) => PropertyRead::Uniform(value),
            None => PropertyRead::Mixed,
        }
    }

    fn read_border(&self, range: CellRange, edge: BorderEdge) -> PropertyRead<NativeBorder> {
        let (slice, side): (Option<CellRange>, fn(&CellFormat) -> NativeBorder) = match edge {
            BorderEdge::EdgeTop => (
                Some(CellRange::new(
                    range.start_col,
                    range.start_row,
                    range.end_col,
                    range.start_row,
                )),
                |c| c.top.clone(),
            ),
            BorderEdge::EdgeBottom => (
                Some(CellRange::new(
                    range.start_col,
                    range.end_row,
                    range.end_col,
                    range.end_row,
                )),
                |c| c.bottom.clone(),
            ),
            BorderEdge::EdgeLeft => (
                Some(CellRange::new(
                    range.start_col,
                    range.start_row,
                    range.start_col,
                    range.end_row,
                )),
                |c| c.left.clone(),
            ),
            BorderEdge::EdgeRight => (
                Some(CellRange::new(
                    range.end_col,
                    range.start_row,
                    range.end_col,
                    range.end_row,
                )),
                |c| c.right.clone(),
            ),
            BorderEdge::InsideHorizontal => (
                (range.row_count() > 1).then(|| {
                    CellRange::new(
                        range.start_col,
                        range.start_row,
                        range.end_col,
                        range.end_row - 1,
                    )
                }),
                |c| c.bottom.clone(),
            ),
            BorderEdge::InsideVertical => (
                (range.column_count() > 1).then(|| {
                    CellRange::new(
                        range.start_col,
                        range.start_row,
                        range.end_col - 1,
                        range.end_row,
                    )
                }),
                |c| c.right.clone(),
            ),
        };
        match slice {
            Some(slice) => self.scan(slice, side),
            None => PropertyRead::Uniform(NativeBorder::none()),
        }
    }

    fn write_border(&mut self, range: CellRange, edge: BorderEdge, border: &NativeBorder) {
        match edge {
            BorderEdge::EdgeTop => {
                for col in range.columns() {
                    self.cell_mut(col, range.start_row).top = border.clone();
                }
            }
            BorderEdge::EdgeBottom => {
                for col in range.columns() {
                    self.cell_mut(col, range.end_row).bottom = border.clone();
                }
            }
            BorderEdge::EdgeLeft => {
                for row in range.rows() {
                    self.cell_mut(range.start_col, row).left = border.clone();
                }
            }
            BorderEdge::EdgeRight => {
                for row in range.rows() {
                    self.cell_mut(range.end_col, row).right = border.clone();
                }
            }
            BorderEdge::InsideHorizontal => {
                for row in range.start_row..range.end_row {
                    for col in range.columns() {
                        self.cell_mut(col, row).bottom = border.clone();
                        self.cell_mut(col, row + 1).top = border.clone();
                    }
                }
            }
            BorderEdge::InsideVertical => {
                for col in range.start_col..range.end_col {
                    for row in range.rows() {
                        self.cell_mut(col, row).right = border.clone();
                        self.cell_mut(col + 1, row).left = border.clone();
                    }
                }
            }
        }
    }

    fn read_format(&self, range: CellRange, request: FormatLoadRequest) -> RangeFormatRead {
        let mut read = RangeFormatRead {
            address: format!("{}!{}", quote_sheet_name(&self.name), range),
            row_count: range.row_count(),
            column_count: range.column_count(),
            ..Default::default()
        };

        if request.number_format {
            read.number_format = Some(
                range
                    .rows()
                    .map(|row| {
                        range
                            .columns()
                            .map(|col| self.cell(col, row).number_format)
                            .collect()
                    })
                    .collect(),
            );
        }
        if request.fill_color {
            read.fill_color = Some(self.scan(range, |c| c.fill.clone()));
        }
        if request.font_color {
            read.font_color = Some(self.scan(range, |c| c.font_color.clone()));
        }
        if request.bold {
            read.bold = Some(self.scan(range, |c| c.bold));
        }
        if request.italic {
            read.italic = Some(self.scan(range, |c| c.italic));
        }
        if request.underline {
            read.underline = Some(self.scan(range, |c| c.underline.clone()));
        }
        if request.font_name {
            read.font_name = Some(self.scan(range, |c| c.font_name.clone()));
        }
        if request.font_size {
            read.font_size = Some(self.scan(range, |c| c.font_size));
        }
        if request.horizontal_alignment {
            read.horizontal_alignment = Some(self.scan(range, |c| c.horizontal.clone()));
        }
        if request.vertical_alignment {
            read.vertical_alignment = Some(self.scan(range, |c| c.vertical.clone()));
        }
        if request.wrap_text {
            read.wrap_text = Some(self.scan(range, |c| c.wrap_text));
        }
        if request.column_width {
            read.column_widths = Some(
                range
                    .columns()
                    .map(|col| {
                        self.column_widths
                            .get(&col)
                            .copied()
                            .unwrap_or(DEFAULT_COLUMN_WIDTH)
                    })
                    .collect(),
            );
        }
        if request.row_height {
            read.row_heights = Some(
                range
                    .rows()
                    .map(|row| {
                        self.row_heights
                            .get(&row)
                            .copied()
                            .unwrap_or(DEFAULT_ROW_HEIGHT)
                    })
                    .collect(),
            );
        }
        if request.merged_areas {
            let mut merges: Vec<CellRange> = self
                .merges
                .iter()
                .filter(|m| m.intersects(&range))
                .copied()
                .collect();
            merges.sort();
            read.merged_areas = Some(merges.iter().map(ToString::to_string).collect());
        }
        for (idx, edge) in BorderEdge::ALL.iter().enumerate() {
            if request.borders[idx] {
                read.borders.push((*edge, self.read_border(range, *edge)));
            }
        }
        read
    }

    fn rule_areas(&self, applies_to: &str) -> Vec<CellRange> {
        RangeRef::parse(applies_to)
            .map(|r| r.areas().iter().map(|a| a.range).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct WorkbookModel {
    sheets: Vec<SheetModel>,
    active: usize,
    next_id: u64,
}

impl WorkbookModel {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    fn sheet(&self, name: &str) -> Result<&SheetModel> {
        self.sheet_index(name)
            .map(|idx| &self.sheets[idx])
            .ok_or_else(|| not_found(format!("worksheet '{name}' does not exist")))
    }

    fn sheet_mut(&mut self, name: &str) -> Result<&mut SheetModel> {
        match self.sheet_index(name) {
            Some(idx) => Ok(&mut self.sheets[idx]),
            None => Err(not_found(format!("worksheet '{name}' does not exist"))),
        }
    }

    fn sheet_by_id_mut(&mut self, id: &str) -> Result<&mut SheetModel> {
        self.sheets
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| not_found(format!("worksheet id '{id}' does not exist")))
    }

    fn native_sheet(&self, idx: usize) -> NativeSheet {
        let sheet = &self.sheets[idx];
        NativeSheet {
            id: sheet.id.clone(),
            name: sheet.name.clone(),
            visibility: sheet.visibility.clone(),
            position: idx as u32,
        }
    }

    fn select(&self, selector: &SheetSelector) -> Option<NativeSheet> {
        let idx = match selector {
            SheetSelector::Id(id) => self.sheets.iter().position(|s| &s.id == id),
            SheetSelector::Name(name) => self.sheet_index(name),
            SheetSelector::Active => (self.active < self.sheets.len()).then_some(self.active),
        }?;
        Some(self.native_sheet(idx))
    }

    fn apply(&mut self, command: HostCommand) -> Result<()> {
        match command {
            HostCommand::SetNumberFormat {
                sheet,
                range,
                formats,
            } => {
                let shape_ok = formats.len() == range.row_count() as usize
                    && formats
                        .iter()
                        .all(|row| row.len() == range.column_count() as usize);
                if !shape_ok {
                    return Err(invalid_argument(format!(
                        "number format matrix does not match {range}"
                    )));
                }
                let sheet = self.sheet_mut(&sheet)?;
                for (r, row) in range.rows().enumerate() {
                    for (c, col) in range.columns().enumerate() {
                        sheet.cell_mut(col, row).number_format = formats[r][c].clone();
                    }
                }
            }
            HostCommand::SetFill {
                sheet,
                range,
                color,
            } => {
                self.sheet_mut(&sheet)?
                    .update_range(range, |c| c.fill = color.clone());
            }
            HostCommand::SetFont {
                sheet,
                range,
                patch,
            } => {
                self.sheet_mut(&sheet)?.update_range(range, |c| {
                    if let Some(color) = &patch.color {
                        c.font_color = color.clone();
                    }
                    if let Some(bold) = patch.bold {
                        c.bold = bold;
                    }
                    if let Some(italic) = patch.italic {
                        c.italic = italic;
                    }
                    if let Some(underline) = &patch.underline {
                        c.underline = underline.clone();
                    }
                    if let Some(name) = &patch.name {
                        c.font_name = name.clone();
                    }
                    if let Some(size) = patch.size {
                        c.font_size = size;
                    }
                });
            }
            HostCommand::SetAlignment {
                sheet,
                range,
                horizontal,
                vertical,
                wrap_text,
            } => {
                self.sheet_mut(&sheet)?.update_range(range, |c| {
                    if let Some(h) = &horizontal {
                        c.horizontal = h.clone();
                    }
                    if let Some(v) = &vertical {
                        c.vertical = v.clone();
                    }
                    if let Some(wrap) = wrap_text {
                        c.wrap_text = wrap;
                    }
                });
            }
            HostCommand::SetColumnWidth {
                sheet,
                column,
                width,
            } => {
                self.sheet_mut(&sheet)?.column_widths.insert(column, width);
            }
            HostCommand::SetRowHeight { sheet, row, height } => {
                self.sheet_mut(&sheet)?.row_heights.insert(row, height);
            }
            HostCommand::Merge { sheet, range } => {
                let sheet = self.sheet_mut(&sheet)?;
                sheet.merges.retain(|m| !m.intersects(&range));
                if !range.is_single_cell() {
                    sheet.merges.push(range);
                }
            }
            HostCommand::Unmerge { sheet, range } => {
                self.sheet_mut(&sheet)?
                    .merges
                    .retain(|m| !m.intersects(&range));
            }
            HostCommand::SetBorder {
                sheet,
                range,
                edge,
                border,
            } => {
                self.sheet_mut(&sheet)?.write_border(range, edge, &border);
            }
            HostCommand::ClearConditionalFormats { sheet, range } => {
                let sheet = self.sheet_mut(&sheet)?;
                let keep: Vec<StoredRule> = sheet
                    .rules
                    .iter()
                    .filter(|rule| {
                        !sheet
                            .rule_areas(&rule.applies_to)
                            .iter()
                            .any(|area| area.intersects(&range))
                    })
                    .cloned()
                    .collect();
                sheet.rules = keep;
            }
            HostCommand::AddConditionalFormat {
                sheet,
                applies_to,
                stop_if_true,
                details,
            } => {
                RangeRef::parse(&applies_to)
                    .map_err(|e| invalid_argument(format!("invalid applies-to: {e}")))?;
                let id = self.allocate_id("cf");
                self.sheet_mut(&sheet)?.rules.insert(
                    0,
                    StoredRule {
                        id,
                        applies_to,
                        stop_if_true,
                        details,
                    },
                );
            }
            HostCommand::DeleteComment { comment_id } => {
                let mut removed = false;
                for sheet in &mut self.sheets {
                    let before = sheet.comments.len();
                    sheet.comments.retain(|c| c.id != comment_id);
                    removed |= sheet.comments.len() != before;
                }
                if !removed {
                    return Err(not_found(format!("comment '{comment_id}' does not exist")));
                }
            }
            HostCommand::CreateCommentThread {
                sheet,
                cell,
                content,
                replies,
                resolved,
            } => {
                let id = self.allocate_id("comment");
                self.sheet_mut(&sheet)?.comments.push(StoredComment {
                    id,
                    cell: cell.first_cell(),
                    content,
                    resolved,
                    replies,
                });
            }
            HostCommand::RenameSheet { sheet_id, name } => {
                let clash = self
                    .sheets
                    .iter()
                    .any(|s| s.id != sheet_id && s.name.eq_ignore_ascii_case(&name));
                if clash {
                    return Err(invalid_argument(format!(
                        "a worksheet named '{name}' already exists"
                    )));
                }
                self.sheet_by_id_mut(&sheet_id)?.name = name;
            }
            HostCommand::SetSheetVisibility {
                sheet_id,
                visibility,
            } => {
                let hiding = !visibility.eq_ignore_ascii_case("Visible");
                let other_visible = self
                    .sheets
                    .iter()
                    .any(|s| s.id != sheet_id && s.visibility.eq_ignore_ascii_case("Visible"));
                if hiding && !other_visible {
                    return Err(TransientHostError::new(
                        "InvalidOperation",
                        "a workbook must keep at least one visible worksheet",
                    )
                    .into());
                }
                self.sheet_by_id_mut(&sheet_id)?.visibility = visibility;
            }
        }
        Ok(())
    }
}

type LoadFn = Box<dyn FnOnce(&WorkbookModel) -> Result<()> + Send>;

enum PendingOp {
    Load(LoadFn),
    Command(HostCommand),
}

pub struct MemoryWorkbook {
    model: Mutex<WorkbookModel>,
    pending: Mutex<Vec<PendingOp>>,
    command_log: Mutex<Vec<HostCommand>>,
    fail_next_sync: Mutex<Option<TransientHostError>>,
    sync_count: AtomicUsize,
}

impl Default for MemoryWorkbook {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self {
            model: Mutex::new(WorkbookModel::default()),
            pending: Mutex::new(Vec::new()),
            command_log: Mutex::new(Vec::new()),
            fail_next_sync: Mutex::new(None),
            sync_count: AtomicUsize::new(0),
        }
    }

    /// A workbook with the given sheets; the first one is active.
    pub fn with_sheets(names: &[&str]) -> Self {
        let workbook = Self::new();
        for name in names {
            workbook.add_sheet(name);
        }
        workbook
    }

    /// Add a worksheet and return its stable id.
    pub fn add_sheet(&self, name: &str) -> String {
        let mut model = self.model.lock();
        let id = model.allocate_id("sheet");
        model.sheets.push(SheetModel::new(id.clone(), name.to_string()));
        id
    }

    pub fn set_active_sheet(&self, name: &str) -> Result<()> {
        let mut model = self.model.lock();
        let idx = model
            .sheet_index(name)
            .ok_or_else(|| not_found(format!("worksheet '{name}' does not exist")))?;
        model.active = idx;
        Ok(())
    }

    pub fn sheet(&self, name: &str) -> Option<NativeSheet> {
        self.model
            .lock()
            .select(&SheetSelector::Name(name.to_string()))
    }

    pub fn sheet_by_id(&self, id: &str) -> Option<NativeSheet> {
        self.model.lock().select(&SheetSelector::Id(id.to_string()))
    }

    pub fn remove_sheet(&self, name: &str) -> Result<()> {
        let mut model = self.model.lock();
        let idx = model
            .sheet_index(name)
            .ok_or_else(|| not_found(format!("worksheet '{name}' does not exist")))?;
        model.sheets.remove(idx);
        model.active = 0;
        Ok(())
    }

    /// Apply a command directly, outside of any batch (fixture setup).
    pub fn apply_now(&self, command: HostCommand) -> Result<()> {
        self.model.lock().apply(command)
    }

    pub fn update_cells(
        &self,
        sheet: &str,
        range: &str,
        update: impl FnMut(&mut CellFormat),
    ) -> Result<()> {
        let range = CellRange::parse(range)?;
        self.model.lock().sheet_mut(sheet)?.update_range(range, update);
        Ok(())
    }

    pub fn cell_format(&self, sheet: &str, cell: &str) -> Result<CellFormat> {
        let range = CellRange::parse(cell)?;
        let model = self.model.lock();
        Ok(model.sheet(sheet)?.cell(range.start_col, range.start_row))
    }

    pub fn set_column_width(&self, sheet: &str, column: u32, width: f64) -> Result<()> {
        self.model
            .lock()
            .sheet_mut(sheet)?
            .column_widths
            .insert(column, width);
        Ok(())
    }

    pub fn set_row_height(&self, sheet: &str, row: u32, height: f64) -> Result<()> {
        self.model
            .lock()
            .sheet_mut(sheet)?
            .row_heights
            .insert(row, height);
        Ok(())
    }

    pub fn add_merge(&self, sheet: &str, range: &str) -> Result<()> {
        let range = CellRange::parse(range)?;
        self.apply_now(HostCommand::Merge {
            sheet: sheet.to_string(),
            range,
        })
    }

    pub fn merges(&self, sheet: &str) -> Result<Vec<String>> {
        let model = self.model.lock();
        let mut merges = model.sheet(sheet)?.merges.clone();
        merges.sort();
        Ok(merges.iter().map(ToString::to_string).collect())
    }

    /// Append a rule at the lowest priority (fixture setup keeps listing order).
    pub fn push_conditional_format(
        &self,
        sheet: &str,
        applies_to: &str,
        stop_if_true: Option<bool>,
        details: NativeRuleDetails,
    ) -> Result<String> {
        let mut model = self.model.lock();
        let id = model.allocate_id("cf");
        model.sheet_mut(sheet)?.rules.push(StoredRule {
            id: id.clone(),
            applies_to: applies_to.to_string(),
            stop_if_true,
            details,
        });
        Ok(id)
    }

    /// Every rule on the sheet, highest priority first.
    pub fn conditional_formats(
        &self,
        sheet: &str,
    ) -> Result<Vec<(NativeConditionalFormat, NativeRuleDetails)>> {
        let model = self.model.lock();
        let sheet = model.sheet(sheet)?;
        Ok(sheet
            .rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| (native_rule(idx, rule), rule.details.clone()))
            .collect())
    }

    pub fn add_comment(
        &self,
        sheet: &str,
        cell: &str,
        content: &str,
        resolved: bool,
        replies: &[&str],
    ) -> Result<String> {
        let cell = CellRange::parse(cell)?;
        let mut model = self.model.lock();
        let id = model.allocate_id("comment");
        model.sheet_mut(sheet)?.comments.push(StoredComment {
            id: id.clone(),
            cell: cell.first_cell(),
            content: content.to_string(),
            resolved,
            replies: replies.iter().map(|r| r.to_string()).collect(),
        });
        Ok(id)
    }

    pub fn comments(&self, sheet: &str) -> Result<Vec<NativeComment>> {
        let model = self.model.lock();
        let sheet = model.sheet(sheet)?;
        Ok(native_comments(sheet))
    }

    pub fn command_log(&self) -> Vec<HostCommand> {
        self.command_log.lock().clone()
    }

    pub fn clear_command_log(&self) {
        self.command_log.lock().clear();
    }

    pub fn sync_count(&self) -> usize {
        self.sync_count.load(Ordering::SeqCst)
    }

    /// Make the next `sync()` fail and drop its batch.
    pub fn fail_next_sync(&self, code: &str, message: &str) {
        *self.fail_next_sync.lock() = Some(TransientHostError::new(code, message));
    }

    fn push_load(&self, load: LoadFn) {
        self.pending.lock().push(PendingOp::Load(load));
    }
}

#[async_trait]
impl WorkbookHost for MemoryWorkbook {
    fn load_sheet(&self, selector: SheetSelector) -> PendingRead<Option<NativeSheet>> {
        let pending = PendingRead::new("sheet");
        let slot = pending.clone();
        self.push_load(Box::new(move |model| {
            slot.fulfil(model.select(&selector));
            Ok(())
        }));
        pending
    }

    fn load_range_format(
        &self,
        sheet: &str,
        range: CellRange,
        request: FormatLoadRequest,
    ) -> PendingRead<RangeFormatRead> {
        let pending = PendingRead::new("range format");
        let slot = pending.clone();
        let sheet = sheet.to_string();
        self.push_load(Box::new(move |model| {
            slot.fulfil(model.sheet(&sheet)?.read_format(range, request));
            Ok(())
        }));
        pending
    }

    fn load_conditional_formats(
        &self,
        sheet: &str,
        range: CellRange,
    ) -> PendingRead<Vec<NativeConditionalFormat>> {
        let pending = PendingRead::new("conditional formats");
        let slot = pending.clone();
        let sheet = sheet.to_string();
        self.push_load(Box::new(move |model| {
            let sheet = model.sheet(&sheet)?;
            let rules = sheet
                .rules
                .iter()
                .enumerate()
                .filter(|(_, rule)| {
                    sheet
                        .rule_areas(&rule.applies_to)
                        .iter()
                        .any(|area| area.intersects(&range))
                })
                .map(|(idx, rule)| native_rule(idx, rule))
                .collect();
            slot.fulfil(rules);
            Ok(())
        }));
        pending
    }

    fn load_conditional_format_details(
        &self,
        sheet: &str,
        rule_id: &str,
        host_kind: &'static str,
    ) -> PendingRead<NativeRuleDetails> {
        let pending = PendingRead::new("conditional format details");
        let slot = pending.clone();
        let sheet = sheet.to_string();
        let rule_id = rule_id.to_string();
        self.push_load(Box::new(move |model| {
            let rule = model
                .sheet(&sheet)?
                .rules
                .iter()
                .find(|r| r.id == rule_id)
                .ok_or_else(|| not_found(format!("conditional format '{rule_id}' not found")))?;
            if rule.details.host_kind() != host_kind {
                return Err(invalid_argument(format!(
                    "conditional format '{rule_id}' is {}, not {host_kind}",
                    rule.details.host_kind()
                )));
            }
            slot.fulfil(rule.details.clone());
            Ok(())
        }));
        pending
    }

    fn load_comments(&self, sheet: &str) -> PendingRead<Vec<NativeComment>> {
        let pending = PendingRead::new("comments");
        let slot = pending.clone();
        let sheet = sheet.to_string();
        self.push_load(Box::new(move |model| {
            slot.fulfil(native_comments(model.sheet(&sheet)?));
            Ok(())
        }));
        pending
    }

    fn queue(&self, command: HostCommand) {
        self.pending.lock().push(PendingOp::Command(command));
    }

    async fn sync(&self) -> Result<()> {
        tokio::task::yield_now().await;
        self.sync_count.fetch_add(1, Ordering::SeqCst);
        let ops = std::mem::take(&mut *self.pending.lock());
        if let Some(error) = self.fail_next_sync.lock().take() {
            return Err(error.into());
        }

        let mut model = self.model.lock();
        for op in ops {
            match op {
                PendingOp::Load(load) => load(&*model)?,
                PendingOp::Command(command) => {
                    self.command_log.lock().push(command.clone());
                    model.apply(command)?;
                }
            }
        }
        Ok(())
    }
}

fn native_rule(idx: usize, rule: &StoredRule) -> NativeConditionalFormat {
    NativeConditionalFormat {
        id: rule.id.clone(),
        kind: rule.details.host_kind().to_string(),
        applies_to: rule.applies_to.clone(),
        priority: idx as u32,
        stop_if_true: rule.stop_if_true,
    }
}

fn native_comments(sheet: &SheetModel) -> Vec<NativeComment> {
    sheet
        .comments
        .iter()
        .map(|c| NativeComment {
            id: c.id.clone(),
            anchor: RangeArea {
                sheet: Some(sheet.name.clone()),
                range: c.cell,
            }
            .to_string(),
            content: c.content.clone(),
            resolved: c.resolved,
            replies: c.replies.clone(),
        })
        .collect()
}

fn not_found(message: String) -> anyhow::Error {
    TransientHostError::new("ItemNotFound", message).into()
}

fn invalid_argument(message: String) -> anyhow::Error {
    TransientHostError::new("InvalidArgument", message).into()
}
