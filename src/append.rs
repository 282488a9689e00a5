//! Append engine for the master workbook
//!
//! The master is edited in place with umya-spreadsheet so that existing
//! styles, column widths and other sheets survive the round trip. Three
//! input shapes are supported:
//!
//! - mapped `MasterRow`s (matrix and ERCOT pipelines)
//! - a legacy L..AA block from an ERCOT formula sheet
//! - a header-mapped template sheet (e.g. the `IMPORT` sheet)

use crate::error::{RateSheetError, RateSheetResult};
use crate::excel::{column_letter, header_key};
use crate::types::{
    date_to_serial, parse_date_text, CellValue, MasterRow, SheetData, DATE_FORMAT, MASTER_COLUMNS, MASTER_FORMATS,
    RIGHT_ALIGNED_COLUMN, SERIAL_DATE_RANGE,
};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use umya_spreadsheet::{HorizontalAlignmentValues, Spreadsheet, Worksheet};

/// Columns scanned by `append_block` when locating the last data row
const BLOCK_SCAN_COLS: u32 = 50;

/// Source columns L..AA (0-based) copied by `append_block`
const BLOCK_FIRST_COL: usize = 11;
const BLOCK_LAST_COL: usize = 26;

/// Positions within the L..AA block that trade places (O and P)
const BLOCK_SWAP: (usize, usize) = (3, 4);

/// Outcome of one append operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppendReport {
    pub rows_appended: usize,
    pub first_row: Option<u32>,
    pub last_row: Option<u32>,
    pub first_id: Option<u64>,
    pub last_id: Option<u64>,
}

impl AppendReport {
    fn record(&mut self, row: u32, id: Option<u64>) {
        self.rows_appended += 1;
        self.first_row.get_or_insert(row);
        self.last_row = Some(row);
        if let Some(id) = id {
            self.first_id.get_or_insert(id);
            self.last_id = Some(id);
        }
    }

    /// Fold another report into a running total
    pub fn merge(&mut self, other: &AppendReport) {
        self.rows_appended += other.rows_appended;
        if self.first_row.is_none() {
            self.first_row = other.first_row;
        }
        if other.last_row.is_some() {
            self.last_row = other.last_row;
        }
        if self.first_id.is_none() {
            self.first_id = other.first_id;
        }
        if other.last_id.is_some() {
            self.last_id = other.last_id;
        }
    }
}

impl fmt::Display for AppendReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rows appended", self.rows_appended)?;
        if let (Some(first), Some(last)) = (self.first_row, self.last_row) {
            write!(f, " (rows {}..{}", first, last)?;
            if let (Some(a), Some(b)) = (self.first_id, self.last_id) {
                write!(f, ", IDs {}..{}", a, b)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// The master workbook, opened for editing
pub struct MasterTable {
    path: PathBuf,
    book: Spreadsheet,
    sheet_index: usize,
    sheet_name: String,
}

impl MasterTable {
    /// Open a master workbook and select its first visible sheet
    pub fn open<P: AsRef<Path>>(path: P) -> RateSheetResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(RateSheetError::Append(format!(
                "Master workbook not found: {}",
                path.display()
            )));
        }
        let book = umya_spreadsheet::reader::xlsx::read(&path).map_err(|e| {
            RateSheetError::Append(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let sheets = book.get_sheet_collection();
        if sheets.is_empty() {
            return Err(RateSheetError::Append(format!(
                "Master workbook has no sheets: {}",
                path.display()
            )));
        }
        let sheet_index = sheets.iter().position(is_visible).unwrap_or(0);
        let sheet_name = sheets[sheet_index].get_name().to_string();
        debug!(sheet = %sheet_name, index = sheet_index, "selected master sheet");

        Ok(Self {
            path,
            book,
            sheet_index,
            sheet_name,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    fn sheet(&self) -> RateSheetResult<&Worksheet> {
        self.book
            .get_sheet(&self.sheet_index)
            .ok_or_else(|| RateSheetError::Append(format!("Sheet '{}' vanished", self.sheet_name)))
    }

    fn sheet_mut(&mut self) -> RateSheetResult<&mut Worksheet> {
        let name = self.sheet_name.clone();
        self.book
            .get_sheet_mut(&self.sheet_index)
            .ok_or_else(|| RateSheetError::Append(format!("Sheet '{}' vanished", name)))
    }

    /// Highest used row (1-based), 0 for an empty sheet
    pub fn highest_row(&self) -> RateSheetResult<u32> {
        Ok(self.sheet()?.get_highest_row())
    }

    /// Cell value at 1-based (col, row)
    pub fn cell_value(&self, col: u32, row: u32) -> RateSheetResult<CellValue> {
        Ok(read_cell(self.sheet()?, col, row))
    }

    /// Number format code at 1-based (col, row), if the cell carries one
    pub fn number_format(&self, col: u32, row: u32) -> RateSheetResult<Option<String>> {
        Ok(self.sheet()?.get_cell((col, row)).and_then(|cell| {
            cell.get_style()
                .get_number_format()
                .map(|nf| nf.get_format_code().to_string())
        }))
    }

    /// Whether the cell at 1-based (col, row) is right-aligned
    pub fn is_right_aligned(&self, col: u32, row: u32) -> RateSheetResult<bool> {
        Ok(self
            .sheet()?
            .get_cell((col, row))
            .and_then(|cell| cell.get_style().get_alignment())
            .map(|a| matches!(a.get_horizontal(), HorizontalAlignmentValues::Right))
            .unwrap_or(false))
    }

    /// Max numeric ID in column A (rows 2..), plus one
    pub fn next_id(&self) -> RateSheetResult<u64> {
        let sheet = self.sheet()?;
        let mut max_id = 0u64;
        for row in 2..=sheet.get_highest_row() {
            if let CellValue::Number(n) = read_cell(sheet, 1, row) {
                if n.is_finite() && n > 0.0 {
                    max_id = max_id.max(n.trunc() as u64);
                }
            }
        }
        Ok(max_id + 1)
    }

    /// First row from 2 with a blank ID cell, else the row after the last
    pub fn first_blank_row(&self) -> RateSheetResult<u32> {
        let sheet = self.sheet()?;
        let highest = sheet.get_highest_row();
        for row in 2..=highest {
            if read_cell(sheet, 1, row).is_blank() {
                return Ok(row);
            }
        }
        Ok((highest + 1).max(2))
    }

    /// Last row with any value in the first `scan_cols` columns, 0 when empty
    pub fn last_data_row(&self, scan_cols: u32) -> RateSheetResult<u32> {
        let sheet = self.sheet()?;
        for row in (1..=sheet.get_highest_row()).rev() {
            if (1..=scan_cols).any(|col| !read_cell(sheet, col, row).is_blank()) {
                return Ok(row);
            }
        }
        Ok(0)
    }

    /// Master number formats on A..Q plus right alignment on F
    pub fn apply_master_formats(&mut self, row: u32) -> RateSheetResult<()> {
        let sheet = self.sheet_mut()?;
        for (idx, code) in MASTER_FORMATS.iter().enumerate() {
            let col = idx as u32 + 1;
            let style = sheet.get_cell_mut((col, row)).get_style_mut();
            style.get_number_format_mut().set_format_code(*code);
            if col == RIGHT_ALIGNED_COLUMN {
                style
                    .get_alignment_mut()
                    .set_horizontal(HorizontalAlignmentValues::Right);
            }
        }
        Ok(())
    }

    /// Write a value; dates land as serials under a date format
    fn write_value(&mut self, col: u32, row: u32, value: &CellValue) -> RateSheetResult<()> {
        let date_column = MASTER_FORMATS
            .get(col as usize - 1)
            .map(|code| code.contains("yy"))
            .unwrap_or(false);

        let cell = self.sheet_mut()?.get_cell_mut((col, row));
        match value {
            CellValue::Empty => {}
            CellValue::Number(n) => {
                cell.set_value_number(*n);
            }
            CellValue::Text(s) => {
                cell.set_value_string(s.clone());
            }
            CellValue::Bool(b) => {
                cell.set_value_bool(*b);
            }
            CellValue::Date(d) => {
                cell.set_value_number(date_to_serial(*d));
                if !date_column {
                    cell.get_style_mut()
                        .get_number_format_mut()
                        .set_format_code(DATE_FORMAT);
                }
            }
        }
        Ok(())
    }

    /// Header row for a sheet with nothing in it yet
    fn ensure_header(&mut self) -> RateSheetResult<()> {
        if self.last_data_row(MASTER_COLUMNS.len() as u32)? > 0 {
            return Ok(());
        }
        debug!(sheet = %self.sheet_name, "empty master sheet; writing header row");
        for (idx, name) in MASTER_COLUMNS.iter().enumerate() {
            self.write_value(idx as u32 + 1, 1, &CellValue::from(*name))?;
        }
        Ok(())
    }

    /// Append mapped rows at the first blank ID row, IDs continuing from `next_id`
    pub fn append_master_rows(&mut self, rows: &[MasterRow]) -> RateSheetResult<AppendReport> {
        let mut report = AppendReport::default();
        if rows.is_empty() {
            return Ok(report);
        }
        self.ensure_header()?;

        let mut next_id = self.next_id()?;
        let mut row = self.first_blank_row()?;
        for master_row in rows {
            self.apply_master_formats(row)?;
            self.write_value(1, row, &CellValue::Number(next_id as f64))?;
            for (offset, value) in master_row.to_cells().iter().enumerate() {
                self.write_value(offset as u32 + 2, row, value)?;
            }
            report.record(row, Some(next_id));
            next_id += 1;
            row += 1;
        }

        info!(sheet = %self.sheet_name, %report, "appended master rows");
        Ok(report)
    }

    /// Copy source columns L..AA into B..Q below the last data row
    ///
    /// Column A continues the numbering of the row above. Positions 3 and 4
    /// of the block trade places, and date serials or date-like text become
    /// dates.
    pub fn append_block(&mut self, source: &SheetData) -> RateSheetResult<AppendReport> {
        let blocks: Vec<Vec<CellValue>> = (0..source.len())
            .map(|row_idx| {
                (BLOCK_FIRST_COL..=BLOCK_LAST_COL)
                    .map(|col| source.cell(row_idx, col).clone())
                    .collect::<Vec<_>>()
            })
            .filter(|block| block.iter().any(|v| !v.is_blank()))
            .collect();

        let mut report = AppendReport::default();
        if blocks.is_empty() {
            warn!(sheet = %source.name, "no L..AA data to append");
            return Ok(report);
        }

        let start = self.last_data_row(BLOCK_SCAN_COLS)? + 1;
        debug!(
            start,
            first_col = %column_letter(BLOCK_FIRST_COL),
            last_col = %column_letter(BLOCK_LAST_COL),
            "appending block"
        );

        for (offset, mut block) in blocks.into_iter().enumerate() {
            let row = start + offset as u32;
            let id = if row == 1 {
                1
            } else {
                previous_index(&self.cell_value(1, row - 1)?) + 1
            };

            self.apply_master_formats(row)?;
            self.write_value(1, row, &CellValue::Number(id as f64))?;

            block.swap(BLOCK_SWAP.0, BLOCK_SWAP.1);
            for (col_offset, value) in block.into_iter().enumerate() {
                self.write_value(col_offset as u32 + 2, row, &coerce_date(value))?;
            }
            report.record(row, Some(id));
        }

        info!(sheet = %self.sheet_name, %report, "appended L..AA block");
        Ok(report)
    }

    /// Append a template sheet mapped onto the master by header name
    pub fn append_from_template(&mut self, source: &SheetData) -> RateSheetResult<AppendReport> {
        let mapping = template_mapping(&source.headers);
        let missing: Vec<&str> = MASTER_COLUMNS[1..]
            .iter()
            .filter(|h| !mapping.contains_key(**h))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(RateSheetError::Append(format!(
                "Missing expected columns in template: {}",
                missing.join(", ")
            )));
        }
        self.ensure_header()?;

        let mut report = AppendReport::default();
        let mut next_id = self.next_id()?;
        let mut row = self.first_blank_row()?;

        for row_idx in 0..source.len() {
            let values: Vec<CellValue> = MASTER_COLUMNS[1..]
                .iter()
                .map(|h| {
                    mapping
                        .get(*h)
                        .map(|col| source.cell(row_idx, *col).clone().trimmed())
                        .unwrap_or_default()
                })
                .collect();
            if values.iter().all(CellValue::is_blank) {
                continue;
            }

            self.write_value(1, row, &CellValue::Number(next_id as f64))?;
            self.apply_master_formats(row)?;
            for (offset, value) in values.iter().enumerate() {
                self.write_value(offset as u32 + 2, row, value)?;
            }
            report.record(row, Some(next_id));
            next_id += 1;
            row += 1;
        }

        if report.rows_appended == 0 {
            warn!(sheet = %source.name, "no non-empty template rows to append");
        } else {
            info!(sheet = %self.sheet_name, %report, "appended template rows");
        }
        Ok(report)
    }

    /// Save over the opened file
    pub fn save(&self) -> RateSheetResult<()> {
        self.save_as(&self.path)
    }

    /// Save to another path; the opened file stays untouched
    pub fn save_as<P: AsRef<Path>>(&self, path: P) -> RateSheetResult<()> {
        let path = path.as_ref();
        umya_spreadsheet::writer::xlsx::write(&self.book, path).map_err(|e| {
            RateSheetError::Append(format!(
                "Could not save {} (close it in Excel and retry): {}",
                path.display(),
                e
            ))
        })?;
        info!(path = %path.display(), "saved master workbook");
        Ok(())
    }
}

/// Make a sheet visible and save to `output` (or over the input)
pub fn unhide_sheet(path: &Path, sheet: &str, output: Option<&Path>) -> RateSheetResult<()> {
    let mut book = umya_spreadsheet::reader::xlsx::read(path).map_err(|e| {
        RateSheetError::Append(format!("Failed to open {}: {}", path.display(), e))
    })?;

    let worksheet = book
        .get_sheet_by_name_mut(sheet)
        .ok_or_else(|| RateSheetError::Append(format!("Sheet '{}' not found", sheet)))?;
    worksheet.set_sheet_state("visible".to_string());

    let target = output.unwrap_or(path);
    umya_spreadsheet::writer::xlsx::write(&book, target).map_err(|e| {
        RateSheetError::Append(format!("Could not save {}: {}", target.display(), e))
    })?;
    info!(sheet, path = %target.display(), "sheet unhidden");
    Ok(())
}

/// Names and visibility of every sheet in a workbook
pub fn sheet_states(path: &Path) -> RateSheetResult<Vec<(String, bool)>> {
    let book = umya_spreadsheet::reader::xlsx::read(path).map_err(|e| {
        RateSheetError::Append(format!("Failed to open {}: {}", path.display(), e))
    })?;
    Ok(book
        .get_sheet_collection()
        .iter()
        .map(|ws| (ws.get_name().to_string(), is_visible(ws)))
        .collect())
}

fn is_visible(sheet: &Worksheet) -> bool {
    !matches!(sheet.get_sheet_state(), "hidden" | "veryHidden")
}

fn read_cell(sheet: &Worksheet, col: u32, row: u32) -> CellValue {
    let Some(cell) = sheet.get_cell((col, row)) else {
        return CellValue::Empty;
    };
    if let Some(n) = cell.get_value_number() {
        return CellValue::Number(n);
    }
    let text = cell.get_value();
    if text.is_empty() {
        CellValue::Empty
    } else {
        CellValue::Text(text.to_string())
    }
}

/// Integer part of the previous row's index; anything else counts as 0
fn previous_index(value: &CellValue) -> u64 {
    match value {
        CellValue::Number(n) if n.is_finite() && *n > 0.0 => n.trunc() as u64,
        CellValue::Text(s) => s.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

/// Serials inside the date window and date-like text become dates
fn coerce_date(value: CellValue) -> CellValue {
    let date = match &value {
        CellValue::Number(n) if *n > SERIAL_DATE_RANGE.0 && *n < SERIAL_DATE_RANGE.1 => {
            value.as_date()
        }
        CellValue::Text(s) => parse_date_text(s),
        _ => None,
    };
    date.map(CellValue::Date).unwrap_or(value)
}

/// Template synonyms keyed by normalised header (lower case, spaces → `_`)
const TEMPLATE_SYNONYMS: [(&str, &str); 16] = [
    ("price_date", "Price_Date"),
    ("date", "Date"),
    ("zone", "Zone"),
    ("rep1", "REP1"),
    ("load", "Load"),
    ("term", "Term"),
    ("min_mwh", "Min_MWh"),
    ("max_mwh", "Max_MWh"),
    ("daily_no_ruc", "Daily_No_Ruc"),
    ("ruc_nodal", "RUC_Nodal"),
    ("daily", "Daily"),
    ("com_disc", "Com_Disc"),
    ("hoa_disc", "HOA_Disc"),
    ("broker_fee", "Broker_Fee"),
    ("meter_fee", "Meter_Fee"),
    ("max_meters", "Max_Meters"),
];

/// Master header → source column; first matching column wins
fn template_mapping(headers: &[String]) -> HashMap<&'static str, usize> {
    let mut mapping = HashMap::new();
    for (col, header) in headers.iter().enumerate() {
        let key = header_key(header);
        let key = key.trim_end_matches('_');
        if let Some((_, master)) = TEMPLATE_SYNONYMS.iter().find(|(k, _)| *k == key) {
            mapping.entry(*master).or_insert(col);
        }
    }
    mapping
}
