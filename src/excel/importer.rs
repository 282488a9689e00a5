//! Workbook reader: Excel (.xlsx/.xlsm) → `SheetData`

use crate::error::{RateSheetError, RateSheetResult};
use crate::types::{parse_date_text, serial_to_date, CellValue, SheetData};
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sheet preference used when none is configured
pub const DEFAULT_SHEET_PREFERENCE: &str = "matrix table";

/// Rows scanned when looking for a master-style header row
const HEADER_SCAN_ROWS: usize = 30;

/// Reader over one workbook; hidden sheets are listed and readable
pub struct WorkbookReader {
    path: PathBuf,
    workbook: Xlsx<BufReader<File>>,
}

impl WorkbookReader {
    /// Open a workbook for reading
    pub fn open<P: AsRef<Path>>(path: P) -> RateSheetResult<Self> {
        let path = path.as_ref().to_path_buf();
        let workbook: Xlsx<_> = open_workbook(&path).map_err(|e| {
            RateSheetError::Import(format!("Failed to open {}: {}", path.display(), e))
        })?;
        Ok(Self { path, workbook })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All sheet names in workbook order, hidden ones included
    pub fn sheet_names(&self) -> Vec<String> {
        self.workbook.sheet_names()
    }

    /// Sheet cells at absolute positions; index 0 is row 1 / column A
    pub fn read_grid(&mut self, sheet: &str) -> RateSheetResult<Vec<Vec<CellValue>>> {
        let range = self.workbook.worksheet_range(sheet).map_err(|e| {
            RateSheetError::Import(format!("Failed to read sheet '{}': {}", sheet, e))
        })?;
        Ok(range_to_grid(&range))
    }

    /// Read a sheet whose header is the first row of the used range
    pub fn read_sheet(&mut self, sheet: &str) -> RateSheetResult<SheetData> {
        let grid = self.read_grid(sheet)?;
        let first_used = grid
            .iter()
            .position(|row| row.iter().any(|c| !c.is_blank()))
            .unwrap_or(0);
        Ok(split_at_header(sheet, grid, first_used))
    }

    /// Read a sheet whose header row is located with `detect_header_row`
    pub fn read_sheet_detect_header(&mut self, sheet: &str) -> RateSheetResult<SheetData> {
        let grid = self.read_grid(sheet)?;
        let header_row = detect_header_row(&grid, HEADER_SCAN_ROWS);
        debug!(sheet, header_row = header_row + 1, "detected header row");
        Ok(split_at_header(sheet, grid, header_row))
    }

    /// Read every sheet in workbook order; empty sheets are skipped
    pub fn read_all(&mut self) -> RateSheetResult<Vec<SheetData>> {
        let mut sheets = Vec::new();
        for name in self.sheet_names() {
            let sheet = self.read_sheet(&name)?;
            if sheet.headers.is_empty() {
                debug!(sheet = %name, "empty sheet skipped");
                continue;
            }
            sheets.push(sheet);
        }
        Ok(sheets)
    }
}

/// Pick a sheet: exact trimmed case-insensitive name, then one containing every word
pub fn select_sheet<S: AsRef<str>>(names: &[S], preferred: &str) -> Option<String> {
    let wanted = preferred.trim().to_lowercase();
    if let Some(name) = names
        .iter()
        .find(|n| n.as_ref().trim().to_lowercase() == wanted)
    {
        return Some(name.as_ref().to_string());
    }

    let words: Vec<&str> = wanted.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    names
        .iter()
        .find(|n| {
            let lower = n.as_ref().to_lowercase();
            words.iter().all(|w| lower.contains(w))
        })
        .map(|n| n.as_ref().to_string())
}

/// First row (within `max_scan`) that looks like a master header, else 0
///
/// A header row carries `price_date`, one of `zone`/`load`, and one of
/// `daily`/`daily_no_ruc` after lower-casing and replacing spaces with `_`.
pub fn detect_header_row(rows: &[Vec<CellValue>], max_scan: usize) -> usize {
    for (idx, row) in rows.iter().take(max_scan).enumerate() {
        let labels: Vec<String> = row.iter().map(|c| header_key(&c.as_text())).collect();
        let has = |key: &str| labels.iter().any(|l| l == key);
        if has("price_date") && (has("zone") || has("load")) && (has("daily") || has("daily_no_ruc"))
        {
            return idx;
        }
    }
    0
}

/// Header label key: trimmed, lower-case, spaces replaced with `_`
pub(crate) fn header_key(label: &str) -> String {
    label.trim().to_lowercase().replace(' ', "_")
}

fn split_at_header(name: &str, mut grid: Vec<Vec<CellValue>>, header_row: usize) -> SheetData {
    if header_row >= grid.len() {
        return SheetData::new(name, Vec::new(), Vec::new());
    }
    let rows = grid.split_off(header_row + 1);
    let headers = grid
        .pop()
        .unwrap_or_default()
        .iter()
        .map(|c| c.as_text().trim().to_string())
        .collect();
    SheetData::new(name, headers, rows)
}

/// Expand a calamine range to absolute positions (the range starts at the first used cell)
fn range_to_grid(range: &Range<Data>) -> Vec<Vec<CellValue>> {
    let Some((start_row, start_col)) = range.start() else {
        return Vec::new();
    };

    let mut grid: Vec<Vec<CellValue>> = vec![Vec::new(); start_row as usize];
    for row in range.rows() {
        let mut cells = vec![CellValue::Empty; start_col as usize];
        cells.extend(row.iter().map(convert_cell));
        grid.push(cells);
    }
    grid
}

/// Convert a calamine cell to `CellValue`
fn convert_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            serial_to_date(serial)
                .map(CellValue::Date)
                .unwrap_or(CellValue::Number(serial))
        }
        Data::DateTimeIso(s) => parse_date_text(s)
            .map(CellValue::Date)
            .unwrap_or_else(|| CellValue::Text(s.clone())),
        Data::Error(_) => CellValue::Empty,
        other => CellValue::Text(other.to_string()),
    }
}
