//! Workbook reading and writing
//!
//! - Import: rate sheets and templates (.xlsx/.xlsm) → `SheetData` via calamine
//! - Export: master tables and ERCOT formula sheets via rust_xlsxwriter
//!
//! In-place edits of an existing master live in `crate::append`.

mod exporter;
mod importer;

pub use exporter::{create_master_template, ErcotFormulaExporter, MasterExporter};
pub(crate) use importer::header_key;
pub use importer::{detect_header_row, select_sheet, WorkbookReader, DEFAULT_SHEET_PREFERENCE};

/// Convert column index to Excel column letter (0→A, 1→B, 25→Z, 26→AA, etc.)
pub fn column_letter(index: usize) -> String {
    let mut result = String::new();
    let mut num = index;

    loop {
        let remainder = num % 26;
        result.insert(0, (b'A' + remainder as u8) as char);
        if num < 26 {
            break;
        }
        num = num / 26 - 1;
    }

    result
}

/// Convert an Excel column letter to a 0-based index (A→0, AA→26)
pub fn column_index(letter: &str) -> Option<usize> {
    let letter = letter.trim();
    if letter.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for c in letter.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
    }
    Some(index - 1)
}
