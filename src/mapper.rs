//! Schema mapping into the 17-column master table
//!
//! Two source profiles are supported:
//! - `Matrix`: header-resolved sheets such as the Hudson "Matrix Table",
//!   where zone and load factor are encoded in one descriptor
//!   ("Houston Low Load Factor").
//! - `Positional`: fixed column letters (D term, E descriptor, H price,
//!   J start date) with "<word> zone" descriptors.
//!
//! ERCOT rows that went through the row filter map via `map_base_rows`.

use crate::filter::{is_fixed_price, target_term};
use crate::resolver::{ColumnResolver, Field, ResolvedColumns};
use crate::types::{BaseRow, CellValue, LoadFactor, MasterRow, SheetData, BASE_COLUMNS};
use chrono::{Local, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

const LOAD_FACTOR_SUFFIXES: [(&str, LoadFactor); 3] = [
    (" Low Load Factor", LoadFactor::Low),
    (" Medium Load Factor", LoadFactor::Medium),
    (" High Load Factor", LoadFactor::High),
];

/// Zone portion of a matrix descriptor ("Houston Low Load Factor" → "Houston")
pub fn parse_zone(description: &str) -> String {
    let s = description.trim();
    for (suffix, _) in LOAD_FACTOR_SUFFIXES {
        if let Some(zone) = s.strip_suffix(suffix) {
            return zone.to_string();
        }
    }
    s.to_string()
}

/// Load-factor label of a matrix descriptor; empty when absent
pub fn parse_load_factor(description: &str) -> String {
    let s = description.trim();
    LOAD_FACTOR_SUFFIXES
        .iter()
        .find(|(suffix, _)| s.contains(suffix.trim_start()))
        .map(|(_, lf)| lf.label().to_string())
        .unwrap_or_default()
}

fn zone_word_regex() -> Option<&'static Regex> {
    static ZONE_WORD: OnceLock<Option<Regex>> = OnceLock::new();
    ZONE_WORD
        .get_or_init(|| Regex::new(r"(?i)\b([A-Za-z]+)\s+zone\b").ok())
        .as_ref()
}

/// Zone from a "<word> zone" descriptor, mapped to master zone codes
pub fn parse_zone_word(text: &str) -> String {
    let word = zone_word_regex()
        .and_then(|re| re.captures(text.trim()))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase());

    match word.as_deref() {
        Some("north") => "NORTH",
        Some("west") => "WEST",
        Some("south") => "SOUTH",
        Some("houston") => "COAST",
        _ => "NA",
    }
    .to_string()
}

/// HIGH/MED/LOW by substring; NA otherwise
pub fn parse_load_word(text: &str) -> String {
    let s = text.to_lowercase();
    if s.contains("high") {
        "HIGH"
    } else if s.contains("med") {
        "MED"
    } else if s.contains("low") {
        "LOW"
    } else {
        "NA"
    }
    .to_string()
}

/// Source layout to map from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingProfile {
    #[default]
    Matrix,
    Positional,
}

/// Constants stamped onto every mapped row
#[derive(Debug, Clone, PartialEq)]
pub struct MapperOptions {
    pub price_date: NaiveDate,
    pub rep_name: String,
    pub price_multiplier: f64,
    pub min_mwh: f64,
    pub max_mwh: f64,
    pub max_meters: f64,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            price_date: Local::now().date_naive(),
            rep_name: "HUDSON".to_string(),
            price_multiplier: 1.0,
            min_mwh: 0.0,
            max_mwh: 1000.0,
            max_meters: 5.0,
        }
    }
}

// Positional layout (0-based column indices)
const POS_TERM: usize = 3; // D
const POS_DESCRIPTOR: usize = 4; // E
const POS_PRICE: usize = 7; // H
const POS_START: usize = 9; // J
const POSITIONAL_PRICE_SCALE: f64 = 1000.0;

/// Maps source sheets into master rows
#[derive(Debug, Clone, Default)]
pub struct SchemaMapper {
    options: MapperOptions,
}

impl SchemaMapper {
    pub fn new(options: MapperOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MapperOptions {
        &self.options
    }

    pub fn map(&self, sheet: &SheetData, profile: MappingProfile) -> Vec<MasterRow> {
        match profile {
            MappingProfile::Matrix => self.map_matrix(sheet),
            MappingProfile::Positional => self.map_positional(sheet),
        }
    }

    /// Row skeleton with the constant columns filled in
    fn template_row(&self) -> MasterRow {
        MasterRow {
            price_date: Some(self.options.price_date),
            rep1: self.options.rep_name.clone(),
            min_mwh: Some(self.options.min_mwh),
            max_mwh: Some(self.options.max_mwh),
            ruc_nodal: Some(0.0),
            com_disc: Some(0.0),
            hoa_disc: Some(0.0),
            broker_fee: Some(0.0),
            meter_fee: Some(0.0),
            max_meters: Some(self.options.max_meters),
            ..Default::default()
        }
    }

    /// Map a header-resolved matrix sheet
    pub fn map_matrix(&self, sheet: &SheetData) -> Vec<MasterRow> {
        let resolved = ColumnResolver::new(&sheet.headers).resolve_all(true);

        if let Some(missing) = missing_matrix_fields(&resolved) {
            warn!(sheet = %sheet.name, missing = %missing, "required columns not found; nothing mapped");
            return Vec::new();
        }

        let rows = fixed_price_rows(sheet, resolved.get(Field::Product));
        let prices = self.price_series(sheet, &rows, &resolved);

        let mut out = Vec::with_capacity(rows.len());
        for (row_idx, price) in rows.iter().copied().zip(prices) {
            let term_col = resolved.get(Field::Term).unwrap_or_default();
            let Some(term) = target_term(sheet.cell(row_idx, term_col)) else {
                continue;
            };

            let mut row = self.template_row();
            row.term = Some(term);
            row.date = resolved
                .get(Field::StartDate)
                .and_then(|c| sheet.cell(row_idx, c).as_date());

            if let Some(desc_col) = resolved.get(Field::Description) {
                let desc = sheet.cell(row_idx, desc_col).as_text();
                row.zone = parse_zone(&desc);
                row.load = parse_load_factor(&desc);
            } else {
                row.zone = resolved
                    .get(Field::Zone)
                    .map(|c| sheet.cell(row_idx, c).as_text())
                    .unwrap_or_default();
                row.load = resolved
                    .get(Field::LoadFactor)
                    .map(|c| sheet.cell(row_idx, c).as_text())
                    .unwrap_or_default();
            }

            self.set_prices(&mut row, price);
            out.push(row);
        }

        info!(sheet = %sheet.name, source_rows = sheet.len(), mapped = out.len(), "mapped matrix sheet");
        out
    }

    /// Price per kept row: primary column, or green price when the primary is all blank
    fn price_series(
        &self,
        sheet: &SheetData,
        rows: &[usize],
        resolved: &ResolvedColumns,
    ) -> Vec<Option<f64>> {
        let read = |col: Option<usize>| -> Vec<Option<f64>> {
            rows.iter()
                .map(|r| col.and_then(|c| sheet.cell(*r, c).as_number()))
                .collect()
        };

        let primary = read(resolved.get(Field::Price));
        if primary.iter().all(Option::is_none) && resolved.has(Field::GreenPrice) {
            debug!(sheet = %sheet.name, "price column empty; using green price");
            return read(resolved.get(Field::GreenPrice));
        }
        primary
    }

    fn set_prices(&self, row: &mut MasterRow, price: Option<f64>) {
        let daily_no_ruc = price.map(|p| p * self.options.price_multiplier);
        row.daily_no_ruc = daily_no_ruc;
        row.daily = daily_no_ruc.map(|p| p + row.ruc_nodal.unwrap_or_default());
    }

    /// Map by fixed column letters (D term, E descriptor, H price, J start)
    pub fn map_positional(&self, sheet: &SheetData) -> Vec<MasterRow> {
        let product_col = ColumnResolver::new(&sheet.headers).find(&["product"], false);
        let rows = fixed_price_rows(sheet, product_col);

        let mut out = Vec::with_capacity(rows.len());
        for row_idx in rows {
            let Some(term) = target_term(sheet.cell(row_idx, POS_TERM)) else {
                continue;
            };
            let descriptor = sheet.cell(row_idx, POS_DESCRIPTOR).as_text();

            let mut row = self.template_row();
            row.term = Some(term);
            row.date = sheet.cell(row_idx, POS_START).as_date();
            row.zone = parse_zone_word(&descriptor);
            row.load = parse_load_word(&descriptor);

            let base = sheet.cell(row_idx, POS_PRICE).as_number().unwrap_or(0.0);
            self.set_prices(&mut row, Some(base * POSITIONAL_PRICE_SCALE));
            out.push(row);
        }

        info!(sheet = %sheet.name, source_rows = sheet.len(), mapped = out.len(), "mapped positional sheet");
        out
    }

    /// ERCOT base rows onto master columns; unmapped columns stay empty
    pub fn map_base_rows(&self, rows: &[BaseRow]) -> Vec<MasterRow> {
        rows.iter()
            .map(|base| MasterRow {
                date: base.get("Start Month").as_date(),
                zone: base.get("Congestion Zone").as_text(),
                load: base.get("Load Factor").as_text(),
                rep1: base.get("Utility").as_text(),
                term: crate::filter::parse_term(base.get("Term")),
                ..Default::default()
            })
            .collect()
    }

    /// Matrix sheet projected onto `BASE_COLUMNS`
    pub fn to_base_rows(&self, sheet: &SheetData) -> Vec<BaseRow> {
        let resolved = ColumnResolver::new(&sheet.headers).resolve_all(true);
        if missing_matrix_fields(&resolved).is_some() {
            return Vec::new();
        }

        let rows = fixed_price_rows(sheet, resolved.get(Field::Product));
        let prices = self.price_series(sheet, &rows, &resolved);
        let text_at = |row_idx: usize, field: Field| -> String {
            resolved
                .get(field)
                .map(|c| sheet.cell(row_idx, c).as_text())
                .unwrap_or_default()
        };

        let mut out = Vec::new();
        for (row_idx, price) in rows.iter().copied().zip(prices) {
            let term_col = resolved.get(Field::Term).unwrap_or_default();
            let Some(term) = target_term(sheet.cell(row_idx, term_col)) else {
                continue;
            };

            let (zone, load) = match resolved.get(Field::Description) {
                Some(c) => {
                    let desc = sheet.cell(row_idx, c).as_text();
                    (parse_zone(&desc), parse_load_factor(&desc))
                }
                None => (text_at(row_idx, Field::Zone), text_at(row_idx, Field::LoadFactor)),
            };

            let start = resolved
                .get(Field::StartDate)
                .and_then(|c| sheet.cell(row_idx, c).as_date())
                .map(CellValue::Date)
                .unwrap_or_default();

            let mut base = BaseRow::default();
            let values = [
                start,
                CellValue::from("TX"),
                CellValue::Text(text_at(row_idx, Field::Utility)),
                CellValue::Text(zone),
                CellValue::Text(load),
                CellValue::Number(f64::from(term)),
                CellValue::from("Fixed Price"),
                price.map(CellValue::Number).unwrap_or_default(),
            ];
            debug_assert_eq!(values.len(), BASE_COLUMNS.len());
            base.values = values;
            out.push(base);
        }
        out
    }
}

/// Renumber IDs sequentially from `start`
pub fn assign_ids(rows: &mut [MasterRow], start: u64) {
    for (offset, row) in rows.iter_mut().enumerate() {
        row.id = Some(start + offset as u64);
    }
}

/// Rows passing the optional Fixed Price filter
fn fixed_price_rows(sheet: &SheetData, product_col: Option<usize>) -> Vec<usize> {
    (0..sheet.len())
        .filter(|r| product_col.map_or(true, |c| is_fixed_price(sheet.cell(*r, c))))
        .collect()
}

/// Names of missing required matrix fields, if any
fn missing_matrix_fields(resolved: &ResolvedColumns) -> Option<String> {
    let mut missing = Vec::new();
    if !resolved.has(Field::Price) && !resolved.has(Field::GreenPrice) {
        missing.push("price");
    }
    if !resolved.has(Field::Term) {
        missing.push("term");
    }
    if !resolved.has(Field::StartDate) {
        missing.push("start date");
    }
    if !resolved.has(Field::Description)
        && !resolved.has(Field::Zone)
        && !resolved.has(Field::LoadFactor)
    {
        missing.push("description or zone/load factor");
    }
    if missing.is_empty() {
        None
    } else {
        Some(missing.join(", "))
    }
}
