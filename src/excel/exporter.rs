//! Workbook writers: master tables and ERCOT formula sheets

use crate::error::{RateSheetError, RateSheetResult};
use crate::types::{
    date_to_serial, BaseRow, CellValue, MasterRow, BASE_COLUMNS, DATE_FORMAT, MASTER_COLUMNS,
    MASTER_FORMATS, RIGHT_ALIGNED_COLUMN,
};
use chrono::{Datelike, NaiveDate};
use rust_xlsxwriter::{Format, FormatAlign, Formula, Workbook, Worksheet};
use std::path::Path;
use tracing::info;

/// Writes master rows to a new workbook with master column formats
pub struct MasterExporter {
    sheet_name: String,
}

impl Default for MasterExporter {
    fn default() -> Self {
        Self {
            sheet_name: "Sheet1".to_string(),
        }
    }
}

impl MasterExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet_name(sheet_name: impl Into<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
        }
    }

    /// Header row plus one row per master row
    pub fn export(&self, rows: &[MasterRow], output_path: &Path) -> RateSheetResult<()> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(&self.sheet_name)
            .map_err(|e| RateSheetError::Export(format!("Failed to set worksheet name: {}", e)))?;

        for (col_idx, name) in MASTER_COLUMNS.iter().enumerate() {
            worksheet
                .write_string(0, col_idx as u16, *name)
                .map_err(|e| RateSheetError::Export(format!("Failed to write header: {}", e)))?;
        }

        let formats = master_formats();
        for (row_idx, row) in rows.iter().enumerate() {
            let excel_row = row_idx as u32 + 1;
            for (col_idx, value) in row.to_full_cells().iter().enumerate() {
                let (format, date_format) = &formats[col_idx];
                write_cell(worksheet, excel_row, col_idx as u16, value, format, date_format)?;
            }
        }

        workbook
            .save(output_path)
            .map_err(|e| RateSheetError::Export(format!("Failed to save Excel file: {}", e)))?;

        info!(path = %output_path.display(), rows = rows.len(), "wrote master workbook");
        Ok(())
    }
}

/// Empty master workbook: header row only
pub fn create_master_template(output_path: &Path) -> RateSheetResult<()> {
    MasterExporter::new().export(&[], output_path)
}

/// Per-column (value, date) formats for master columns A..Q
///
/// Date columns (B, C) reuse their own format; elsewhere a date value
/// falls back to `DATE_FORMAT`.
fn master_formats() -> Vec<(Format, Format)> {
    MASTER_FORMATS
        .iter()
        .enumerate()
        .map(|(idx, code)| {
            let mut format = Format::new();
            if *code != "General" {
                format = format.set_num_format(*code);
            }
            if idx as u32 + 1 == RIGHT_ALIGNED_COLUMN {
                format = format.set_align(FormatAlign::Right);
            }
            let date_format = if code.contains("yy") {
                format.clone()
            } else {
                format.clone().set_num_format(DATE_FORMAT)
            };
            (format, date_format)
        })
        .collect()
}

/// Write one cell; dates become serial numbers under `date_format`
fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &CellValue,
    format: &Format,
    date_format: &Format,
) -> RateSheetResult<()> {
    let result = match value {
        CellValue::Empty => return Ok(()),
        CellValue::Number(n) => worksheet.write_number_with_format(row, col, *n, format),
        CellValue::Text(s) => worksheet.write_string_with_format(row, col, s, format),
        CellValue::Bool(b) => worksheet.write_boolean_with_format(row, col, *b, format),
        CellValue::Date(d) => {
            worksheet.write_number_with_format(row, col, date_to_serial(*d), date_format)
        }
    };
    result
        .map(|_| ())
        .map_err(|e| RateSheetError::Export(format!("Failed to write cell: {}", e)))
}

/// Derived column headers for I..AA
const FORMULA_HEADERS: [&str; 19] = [
    "I (blank)",
    "J Index",
    "K Concat",
    "L ConstDate",
    "M Start",
    "N Region",
    "O LF Norm",
    "P Supplier",
    "Q TermMonths",
    "R (skip)",
    "S",
    "T",
    "U",
    "V",
    "W",
    "X",
    "Y",
    "Z",
    "AA",
];

/// First derived column (I)
const FORMULA_START_COL: usize = 8;

/// Writes filtered ERCOT sheets (A..H) plus derived formula columns (I..AA)
pub struct ErcotFormulaExporter {
    run_date: NaiveDate,
    with_formulas: bool,
}

impl ErcotFormulaExporter {
    pub fn new(run_date: NaiveDate) -> Self {
        Self {
            run_date,
            with_formulas: true,
        }
    }

    /// Only the filtered A..H columns
    pub fn without_formulas(mut self) -> Self {
        self.with_formulas = false;
        self
    }

    /// One worksheet per (name, rows) pair, in order
    pub fn export(&self, sheets: &[(String, Vec<BaseRow>)], output_path: &Path) -> RateSheetResult<()> {
        let mut workbook = Workbook::new();
        let plain = Format::new();
        let date_format = Format::new().set_num_format(DATE_FORMAT);

        for (name, rows) in sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(name).map_err(|e| {
                RateSheetError::Export(format!("Failed to set worksheet name: {}", e))
            })?;

            for (col_idx, header) in BASE_COLUMNS.iter().enumerate() {
                worksheet
                    .write_string(0, col_idx as u16, *header)
                    .map_err(|e| RateSheetError::Export(format!("Failed to write header: {}", e)))?;
            }
            for (row_idx, row) in rows.iter().enumerate() {
                for (col_idx, value) in row.values.iter().enumerate() {
                    write_cell(
                        worksheet,
                        row_idx as u32 + 1,
                        col_idx as u16,
                        value,
                        &plain,
                        &date_format,
                    )?;
                }
            }

            if self.with_formulas && !rows.is_empty() {
                self.write_formula_columns(worksheet, rows.len())?;
            }
        }

        workbook
            .save(output_path)
            .map_err(|e| RateSheetError::Export(format!("Failed to save Excel file: {}", e)))?;

        info!(path = %output_path.display(), sheets = sheets.len(), "wrote ERCOT workbook");
        Ok(())
    }

    fn write_formula_columns(&self, worksheet: &mut Worksheet, row_count: usize) -> RateSheetResult<()> {
        for (offset, header) in FORMULA_HEADERS.iter().enumerate() {
            worksheet
                .write_string(0, (FORMULA_START_COL + offset) as u16, *header)
                .map_err(|e| RateSheetError::Export(format!("Failed to write header: {}", e)))?;
        }

        // Excel rows 2..=row_count+1
        for excel_row in 2..=(row_count as u32 + 1) {
            for (letter, formula) in self.row_formulas(excel_row) {
                let col = super::column_index(letter).unwrap_or(FORMULA_START_COL) as u16;
                let result = match formula {
                    RowFormula::Number(n) => worksheet.write_number(excel_row - 1, col, n),
                    RowFormula::Formula(f) => {
                        worksheet.write_formula(excel_row - 1, col, Formula::new(f))
                    }
                };
                result.map_err(|e| {
                    RateSheetError::Export(format!("Failed to write formula: {}", e))
                })?;
            }
        }
        Ok(())
    }

    /// Derived cells for one 1-based Excel row
    fn row_formulas(&self, r: u32) -> Vec<(&'static str, RowFormula)> {
        let index = if r == 2 {
            RowFormula::Number(1.0)
        } else {
            RowFormula::Formula(format!("=J{}+1", r - 1))
        };
        let d = self.run_date;

        vec![
            ("J", index),
            ("K", RowFormula::Formula(format!("=CONCATENATE(C{r},D{r})"))),
            (
                "L",
                RowFormula::Formula(format!("=DATE({},{},{})", d.year(), d.month(), d.day())),
            ),
            ("M", RowFormula::Formula(format!("=A{r}"))),
            (
                "N",
                RowFormula::Formula(format!(
                    "=IF(K{r}=\"CenterpointHouston LZ\",\"COAST\",\
                     IF(K{r}=\"OncorNorth LZ\",\"NORTH\",\
                     IF(K{r}=\"AEP TX CENTRALSouth LZ\",\"SOUTH\",\
                     IF(K{r}=\"AEP TX CentralWest LZ\",\"WEST\",\
                     IF(K{r}=\"TNMPHouston LZ\",\"TNMP\",\"NA\")))))"
                )),
            ),
            (
                "O",
                RowFormula::Formula(format!(
                    "=IF(E{r}=\"LO\",\"LOW\",IF(E{r}=\"MED\",\"MED\",IF(E{r}=\"HI\",\"HIGH\",\"NA\")))"
                )),
            ),
            (
                "P",
                RowFormula::Formula(format!("=IF(G{r}=\"Fixed Price\",\"APG&E\",\"NA\")")),
            ),
            (
                "Q",
                RowFormula::Formula(format!(
                    "=IF(ISNUMBER(F{r}),F{r},\
                     IF(F{r}=\"12 Months\",12,IF(F{r}=\"24 Months\",24,\
                     IF(F{r}=\"36 Months\",36,IF(F{r}=\"48 Months\",48,\
                     IF(F{r}=\"60 Months\",60,0))))))"
                )),
            ),
            ("S", RowFormula::Formula("=200".to_string())),
            ("T", RowFormula::Formula(format!("=IF(N{r}=\"\",0,H{r}*10)"))),
            ("U", RowFormula::Formula("=0".to_string())),
            ("V", RowFormula::Formula(format!("=T{r}+U{r}"))),
            ("W", RowFormula::Formula("=0".to_string())),
            ("X", RowFormula::Formula("=0".to_string())),
            ("Y", RowFormula::Formula("=0".to_string())),
            ("Z", RowFormula::Formula("=0".to_string())),
            ("AA", RowFormula::Formula("=10".to_string())),
        ]
    }
}

enum RowFormula {
    Number(f64),
    Formula(String),
}
