use crate::errors::ValidationError;
use std::cmp::Ordering;
use std::fmt;

pub const MAX_COLUMNS: u32 = 16_384;
pub const MAX_ROWS: u32 = 1_048_576;

/// A rectangular block of cells, 1-based and inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub start_col: u32,
    pub start_row: u32,
    pub end_col: u32,
    pub end_row: u32,
}

impl CellRange {
    pub fn new(start_col: u32, start_row: u32, end_col: u32, end_row: u32) -> Self {
        Self {
            start_col: start_col.min(end_col),
            start_row: start_row.min(end_row),
            end_col: start_col.max(end_col),
            end_row: start_row.max(end_row),
        }
    }

    pub fn cell(col: u32, row: u32) -> Self {
        Self::new(col, row, col, row)
    }

    /// Parse `A1`, `A1:B2` or `$A$1:$B$2` (no sheet qualifier).
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::new("range address is empty"));
        }
        let (start, end) = match trimmed.split_once(':') {
            Some((start, end)) => (start, end),
            None => (trimmed, trimmed),
        };
        let (start_col, start_row) = parse_cell(start)
            .ok_or_else(|| ValidationError::new(format!("invalid cell reference '{start}'")))?;
        let (end_col, end_row) = parse_cell(end)
            .ok_or_else(|| ValidationError::new(format!("invalid cell reference '{end}'")))?;
        Ok(Self::new(start_col, start_row, end_col, end_row))
    }

    pub fn row_count(&self) -> u32 {
        self.end_row - self.start_row + 1
    }

    pub fn column_count(&self) -> u32 {
        self.end_col - self.start_col + 1
    }

    pub fn cell_count(&self) -> u64 {
        u64::from(self.row_count()) * u64::from(self.column_count())
    }

    pub fn first_cell(&self) -> CellRange {
        CellRange::cell(self.start_col, self.start_row)
    }

    pub fn is_single_cell(&self) -> bool {
        self.start_col == self.end_col && self.start_row == self.end_row
    }

    pub fn contains(&self, col: u32, row: u32) -> bool {
        (self.start_col..=self.end_col).contains(&col)
            && (self.start_row..=self.end_row).contains(&row)
    }

    pub fn intersects(&self, other: &CellRange) -> bool {
        self.start_col <= other.end_col
            && other.start_col <= self.end_col
            && self.start_row <= other.end_row
            && other.start_row <= self.end_row
    }

    pub fn columns(&self) -> std::ops::RangeInclusive<u32> {
        self.start_col..=self.end_col
    }

    pub fn rows(&self) -> std::ops::RangeInclusive<u32> {
        self.start_row..=self.end_row
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = cell_address(self.start_col, self.start_row);
        if self.is_single_cell() {
            f.write_str(&start)
        } else {
            write!(f, "{start}:{}", cell_address(self.end_col, self.end_row))
        }
    }
}

impl Ord for CellRange {
    fn cmp(&self, other: &Self) -> Ordering {
        // Row-major ordering on the top-left corner
        (self.start_row, self.start_col, self.end_row, self.end_col).cmp(&(
            other.start_row,
            other.start_col,
            other.end_row,
            other.end_col,
        ))
    }
}

impl PartialOrd for CellRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One area of a reference, optionally qualified with a sheet name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeArea {
    pub sheet: Option<String>,
    pub range: CellRange,
}

impl RangeArea {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let (sheet, local) = split_sheet_qualifier(input.trim())?;
        Ok(Self {
            sheet,
            range: CellRange::parse(local)?,
        })
    }

    pub fn qualified(&self, sheet: &str) -> String {
        format!("{}!{}", quote_sheet_name(sheet), self.range)
    }
}

impl fmt::Display for RangeArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sheet {
            Some(sheet) => write!(f, "{}!{}", quote_sheet_name(sheet), self.range),
            None => write!(f, "{}", self.range),
        }
    }
}

/// A possibly multi-area reference such as `Sheet1!A1:B2, Sheet1!D4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRef {
    areas: Vec<RangeArea>,
}

impl RangeRef {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let areas = split_areas(input)?
            .into_iter()
            .map(RangeArea::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if areas.is_empty() {
            return Err(ValidationError::new("range address is empty").with_path("address"));
        }
        Ok(Self { areas })
    }

    pub fn areas(&self) -> &[RangeArea] {
        &self.areas
    }

    pub fn first_area(&self) -> &RangeArea {
        &self.areas[0]
    }

    /// Distinct sheet qualifiers in order of first appearance (case-insensitive).
    pub fn explicit_sheets(&self) -> Vec<String> {
        let mut sheets: Vec<String> = Vec::new();
        for area in &self.areas {
            if let Some(sheet) = &area.sheet
                && !sheets.iter().any(|s| s.eq_ignore_ascii_case(sheet))
            {
                sheets.push(sheet.clone());
            }
        }
        sheets
    }

    pub fn cell_count(&self) -> u64 {
        self.areas.iter().map(|a| a.range.cell_count()).sum()
    }
}

impl fmt::Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, area) in self.areas.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{area}")?;
        }
        Ok(())
    }
}

/// Reduce any anchor (`Sheet1!b2:c3`, `$B$2`) to its upper-cased first cell, e.g. `B2`.
pub fn normalize_first_cell(anchor: &str) -> Option<String> {
    let area = RangeArea::parse(anchor).ok()?;
    Some(area.range.first_cell().to_string())
}

pub fn column_letters(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = ((col - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        col = (col - 1) / 26;
    }
    letters.iter().rev().collect()
}

pub fn cell_address(col: u32, row: u32) -> String {
    format!("{}{}", column_letters(col), row)
}

pub fn quote_sheet_name(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

fn parse_cell(input: &str) -> Option<(u32, u32)> {
    let cleaned: String = input.trim().chars().filter(|c| *c != '$').collect();
    let split_idx = cleaned.find(|c: char| c.is_ascii_digit())?;
    let (col_str, row_str) = cleaned.split_at(split_idx);
    if col_str.is_empty() {
        return None;
    }
    let col = col_from_letters(col_str)?;
    let row = row_str.parse::<u32>().ok()?;
    if row == 0 || row > MAX_ROWS || col > MAX_COLUMNS {
        return None;
    }
    Some((col, row))
}

fn col_from_letters(s: &str) -> Option<u32> {
    let mut col: u32 = 0;
    for c in s.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        col = col
            .checked_mul(26)?
            .checked_add(c.to_ascii_uppercase() as u32 - 'A' as u32 + 1)?;
    }
    Some(col)
}

fn split_sheet_qualifier(input: &str) -> Result<(Option<String>, &str), ValidationError> {
    if let Some(rest) = input.strip_prefix('\'') {
        let mut name = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((idx, ch)) = chars.next() {
            if ch == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    chars.next();
                    name.push('\'');
                    continue;
                }
                let after = &rest[idx + 1..];
                let local = after.strip_prefix('!').ok_or_else(|| {
                    ValidationError::new(format!("expected '!' after sheet name in '{input}'"))
                })?;
                return Ok((Some(name), local));
            }
            name.push(ch);
        }
        return Err(ValidationError::new(format!(
            "unterminated sheet name in '{input}'"
        )));
    }

    match input.rsplit_once('!') {
        Some((sheet, local)) => {
            let sheet = sheet.trim();
            if sheet.is_empty() {
                return Err(ValidationError::new(format!(
                    "empty sheet name in '{input}'"
                )));
            }
            Ok((Some(sheet.to_string()), local))
        }
        None => Ok((None, input)),
    }
}

fn split_areas(input: &str) -> Result<Vec<&str>, ValidationError> {
    let mut areas = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, ch) in input.char_indices() {
        match ch {
            '\'' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                areas.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if in_quotes {
        return Err(ValidationError::new(format!(
            "unterminated sheet name in '{input}'"
        )));
    }
    areas.push(&input[start..]);
    Ok(areas
        .into_iter()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .collect())
}
