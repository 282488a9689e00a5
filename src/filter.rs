//! Row filter: Fixed Price products on standard contract terms

use crate::resolver::normalize_header;
use crate::types::{BaseRow, CellValue, SheetData, BASE_COLUMNS, TARGET_TERMS};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, warn};

fn digits_regex() -> Option<&'static Regex> {
    static DIGITS: OnceLock<Option<Regex>> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"(\d+)").ok()).as_ref()
}

/// Extract a whole-month term from a cell ("24", 24.0, "24 Months")
pub fn parse_term(value: &CellValue) -> Option<u32> {
    match value {
        CellValue::Number(n) => integral(*n),
        CellValue::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(n) = s.parse::<f64>() {
                return integral(n);
            }
            digits_regex()?
                .captures(s)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
        }
        _ => None,
    }
}

fn integral(n: f64) -> Option<u32> {
    if n.is_finite() && n.fract() == 0.0 && n >= 0.0 && n <= u32::MAX as f64 {
        Some(n as u32)
    } else {
        None
    }
}

pub fn is_target_term(term: u32) -> bool {
    TARGET_TERMS.contains(&term)
}

/// Target term parsed from a cell, if any
pub fn target_term(value: &CellValue) -> Option<u32> {
    parse_term(value).filter(|t| is_target_term(*t))
}

pub fn is_fixed_price(value: &CellValue) -> bool {
    value.as_text().trim().eq_ignore_ascii_case("fixed price")
}

/// Optional ERCOT narrowing applied after the product/term filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErcotNarrowing {
    /// Utilities to keep (case-insensitive); empty keeps all
    pub utilities: Vec<String>,
    /// Exact load-factor label to keep (e.g. "0-100%")
    pub load_factor: Option<String>,
}

impl ErcotNarrowing {
    pub fn is_active(&self) -> bool {
        !self.utilities.is_empty() || self.load_factor.is_some()
    }

    fn keeps(&self, row: &BaseRow) -> bool {
        if !self.utilities.is_empty() {
            let utility = row.get("Utility").as_text().trim().to_uppercase();
            if !self
                .utilities
                .iter()
                .any(|u| u.trim().to_uppercase() == utility)
            {
                return false;
            }
        }
        if let Some(lf) = &self.load_factor {
            if row.get("Load Factor").as_text().trim() != lf.trim() {
                return false;
            }
        }
        true
    }
}

/// Filters ERCOT-style sheets down to `BASE_COLUMNS`
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    narrowing: ErcotNarrowing,
}

impl RowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_narrowing(narrowing: ErcotNarrowing) -> Self {
        Self { narrowing }
    }

    /// Keep Fixed Price rows on a target term, projected onto `BASE_COLUMNS`
    pub fn filter_sheet(&self, sheet: &SheetData) -> Vec<BaseRow> {
        let product_col = find_column(&sheet.headers, &["Product", "Products"]);
        let term_col = find_column(&sheet.headers, &["Term", "Terms"]);

        let (Some(product_col), Some(term_col)) = (product_col, term_col) else {
            warn!(sheet = %sheet.name, "no product/term columns; sheet skipped");
            return Vec::new();
        };

        let projection: Vec<Option<usize>> = BASE_COLUMNS
            .iter()
            .map(|name| sheet.header_index(name))
            .collect();

        let mut kept = Vec::new();
        for (row_idx, row) in sheet.rows.iter().enumerate() {
            if !is_fixed_price(sheet.cell(row_idx, product_col)) {
                continue;
            }
            let Some(term) = target_term(sheet.cell(row_idx, term_col)) else {
                continue;
            };

            let mut base = BaseRow::default();
            for (slot, source) in projection.iter().enumerate() {
                if let Some(col) = source {
                    base.values[slot] = row.get(*col).cloned().unwrap_or_default();
                }
            }
            base.values[5] = CellValue::Number(f64::from(term));

            if self.narrowing.keeps(&base) {
                kept.push(base);
            }
        }

        debug!(sheet = %sheet.name, kept = kept.len(), total = sheet.len(), "filtered sheet");
        kept
    }

    /// Filter every sheet and concatenate the results
    pub fn filter_workbook(&self, sheets: &[SheetData]) -> Vec<BaseRow> {
        sheets.iter().flat_map(|s| self.filter_sheet(s)).collect()
    }
}

/// Trimmed case-insensitive header equality, then containment
fn find_column(headers: &[String], names: &[&str]) -> Option<usize> {
    let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
    let wanted: Vec<String> = names.iter().map(|n| n.trim().to_lowercase()).collect();

    if let Some(pos) = lowered.iter().position(|h| wanted.contains(h)) {
        return Some(pos);
    }
    lowered.iter().position(|h| {
        !normalize_header(h).is_empty() && wanted.iter().any(|w| h.contains(w.as_str()))
    })
}
