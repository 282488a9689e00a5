use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fmt;

//==============================================================================
// Schema Constants
//==============================================================================

/// Contract terms (months) accepted into the master table
pub const TARGET_TERMS: [u32; 5] = [12, 24, 36, 48, 60];

/// ERCOT filtered projection, in output order (A..H)
pub const BASE_COLUMNS: [&str; 8] = [
    "Start Month",
    "State",
    "Utility",
    "Congestion Zone",
    "Load Factor",
    "Term",
    "Product",
    "0-200,000",
];

/// Master table schema, in sheet order (A..Q)
pub const MASTER_COLUMNS: [&str; 17] = [
    "ID",
    "Price_Date",
    "Date",
    "Zone",
    "Load",
    "REP1",
    "Term",
    "Min_MWh",
    "Max_MWh",
    "Daily_No_Ruc",
    "RUC_Nodal",
    "Daily",
    "Com_Disc",
    "HOA_Disc",
    "Broker_Fee",
    "Meter_Fee",
    "Max_Meters",
];

/// Number formats for master columns A..Q (index 0 = column A)
pub const MASTER_FORMATS: [&str; 17] = [
    "General",
    "mm-dd-yy",
    "mm-dd-yy",
    "General",
    "General",
    "General",
    "* #,##0;* (#,##0);* -00",
    "* #,##0;* (#,##0);* -00",
    "General",
    "$#,##0.00;($#,##0.00)",
    "$#,##0.00",
    "$#,##0.00",
    "$* #,##0.00;$* (#,##0.00);$* -00",
    "$* #,##0.00;$* (#,##0.00);$* -00",
    "$#,##0.00",
    "$* #,##0.00;$* (#,##0.00);$* -00",
    "#,##0",
];

/// 1-based master column that is right-aligned (F, REP1)
pub const RIGHT_ALIGNED_COLUMN: u32 = 6;

/// Format used when a date lands outside the master's date columns
pub const DATE_FORMAT: &str = "m/dd/yyyy";

//==============================================================================
// Excel Serial Dates
//==============================================================================

fn excel_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or(NaiveDate::MIN)
}

/// Largest serial Excel can display (9999-12-31)
pub const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Convert an Excel serial number to a calendar date (time of day dropped)
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    excel_epoch().checked_add_signed(Duration::try_days(serial.floor() as i64)?)
}

/// Convert a calendar date to an Excel serial number
pub fn date_to_serial(date: NaiveDate) -> f64 {
    (date - excel_epoch()).num_days() as f64
}

/// Serial numbers in this open interval are treated as dates when coercing
pub const SERIAL_DATE_RANGE: (f64, f64) = (20000.0, 60000.0);

const TEXT_DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%m-%d-%y",
    "%m-%d-%Y",
    "%b %d %Y",
    "%B %d, %Y",
];

const TEXT_DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M"];

/// Parse a date-like string; returns None for anything unrecognised
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in TEXT_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    TEXT_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

//==============================================================================
// Cell Values
//==============================================================================

/// A single spreadsheet cell, independent of the backing library
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    Date(NaiveDate),
}

impl CellValue {
    /// Empty cells and whitespace-only text
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Display string; integral numbers print without a fraction
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    /// Numeric value, accepting currency-formatted text
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => {
                let cleaned: String = s
                    .trim()
                    .chars()
                    .filter(|c| *c != '$' && *c != ',')
                    .collect();
                cleaned.trim().parse::<f64>().ok().filter(|n| n.is_finite())
            }
            _ => None,
        }
    }

    /// Calendar date from a date cell, a serial number or date-like text
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Date(d) => Some(*d),
            CellValue::Number(n) if *n > SERIAL_DATE_RANGE.0 && *n < SERIAL_DATE_RANGE.1 => {
                serial_to_date(*n)
            }
            CellValue::Text(s) => parse_date_text(s),
            _ => None,
        }
    }

    /// Text with surrounding whitespace removed; other variants unchanged
    pub fn trimmed(self) -> Self {
        match self {
            CellValue::Text(s) => CellValue::Text(s.trim().to_string()),
            other => other,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(d: NaiveDate) -> Self {
        CellValue::Date(d)
    }
}

/// Format a number for display, removing unnecessary decimal places
pub fn format_number(n: f64) -> String {
    let rounded = (n * 1e6).round() / 1e6;
    format!("{:.6}", rounded)
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

//==============================================================================
// Sheets
//==============================================================================

/// One worksheet: header labels plus data rows, columns at absolute positions
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SheetData {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl SheetData {
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows,
        }
    }

    /// Cell at (row, col); out-of-range reads are Empty
    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a header by trimmed, case-insensitive equality
    pub fn header_index(&self, name: &str) -> Option<usize> {
        let wanted = name.trim().to_lowercase();
        self.headers
            .iter()
            .position(|h| h.trim().to_lowercase() == wanted)
    }
}

//==============================================================================
// Rows
//==============================================================================

/// Load factor band decoded from a rate descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFactor {
    Low,
    Medium,
    High,
}

impl LoadFactor {
    pub fn label(&self) -> &'static str {
        match self {
            LoadFactor::Low => "LOW",
            LoadFactor::Medium => "MED",
            LoadFactor::High => "HIGH",
        }
    }
}

impl fmt::Display for LoadFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One filtered ERCOT row in `BASE_COLUMNS` order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BaseRow {
    pub values: [CellValue; 8],
}

impl BaseRow {
    /// Value of a `BASE_COLUMNS` entry by name
    pub fn get(&self, column: &str) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        BASE_COLUMNS
            .iter()
            .position(|c| *c == column)
            .map(|i| &self.values[i])
            .unwrap_or(&EMPTY)
    }
}

/// A row in the master table schema
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MasterRow {
    pub id: Option<u64>,
    pub price_date: Option<NaiveDate>,
    pub date: Option<NaiveDate>,
    pub zone: String,
    pub load: String,
    pub rep1: String,
    pub term: Option<u32>,
    pub min_mwh: Option<f64>,
    pub max_mwh: Option<f64>,
    pub daily_no_ruc: Option<f64>,
    pub ruc_nodal: Option<f64>,
    pub daily: Option<f64>,
    pub com_disc: Option<f64>,
    pub hoa_disc: Option<f64>,
    pub broker_fee: Option<f64>,
    pub meter_fee: Option<f64>,
    pub max_meters: Option<f64>,
}

impl MasterRow {
    /// Values for columns B..Q
    pub fn to_cells(&self) -> Vec<CellValue> {
        fn text(s: &str) -> CellValue {
            if s.is_empty() {
                CellValue::Empty
            } else {
                CellValue::Text(s.to_string())
            }
        }
        fn num(n: Option<f64>) -> CellValue {
            n.map(CellValue::Number).unwrap_or_default()
        }
        fn date(d: Option<NaiveDate>) -> CellValue {
            d.map(CellValue::Date).unwrap_or_default()
        }

        vec![
            date(self.price_date),
            date(self.date),
            text(&self.zone),
            text(&self.load),
            text(&self.rep1),
            num(self.term.map(f64::from)),
            num(self.min_mwh),
            num(self.max_mwh),
            num(self.daily_no_ruc),
            num(self.ruc_nodal),
            num(self.daily),
            num(self.com_disc),
            num(self.hoa_disc),
            num(self.broker_fee),
            num(self.meter_fee),
            num(self.max_meters),
        ]
    }

    /// Values for columns A..Q
    pub fn to_full_cells(&self) -> Vec<CellValue> {
        let mut cells = Vec::with_capacity(MASTER_COLUMNS.len());
        cells.push(
            self.id
                .map(|id| CellValue::Number(id as f64))
                .unwrap_or_default(),
        );
        cells.extend(self.to_cells());
        cells
    }
}
