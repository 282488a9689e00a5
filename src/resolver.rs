//! Column resolution for source sheets with drifting header names
//!
//! Rate-sheet exports rename and reorder columns between releases
//! ("TermCode" vs "Term (months)", "MatrixDescription" vs "Description").
//! Headers and candidates are compared after normalisation, exact matches
//! first, then (optionally) by containment.

use std::collections::HashMap;
use tracing::debug;

/// Lower-case, trim, and drop everything outside `[a-z0-9]`
pub fn normalize_header(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Logical source fields the mapper looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Description,
    Price,
    GreenPrice,
    Term,
    StartDate,
    CreatedDate,
    Utility,
    Zone,
    LoadFactor,
    Product,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::Description,
        Field::Price,
        Field::GreenPrice,
        Field::Term,
        Field::StartDate,
        Field::CreatedDate,
        Field::Utility,
        Field::Zone,
        Field::LoadFactor,
        Field::Product,
    ];

    /// Header names seen for this field, most specific first
    pub fn candidates(&self) -> &'static [&'static str] {
        match self {
            Field::Description => &[
                "MatrixDescription",
                "Matrix Description",
                "Description",
                "Desc",
            ],
            Field::Price => &[
                "Price",
                "Price $",
                "Price($)",
                "Matrix Price",
                "Rate",
                "Base Price",
            ],
            Field::GreenPrice => &["GreenPrice", "Green Price"],
            Field::Term => &[
                "TermCode",
                "Term",
                "Term Months",
                "Term_Months",
                "TermLength",
                "Term (months)",
            ],
            Field::StartDate => &[
                "StartDate",
                "Start Date",
                "StartMonth",
                "Start Month",
                "Delivery Start",
                "First Delivery",
                "DeliveryStart",
            ],
            Field::CreatedDate => &[
                "CreatedDate",
                "Created Date",
                "Created",
                "Price Date",
                "PriceDate",
            ],
            Field::Utility => &["TdspCode", "TDSP", "TDSP Code", "Utility"],
            Field::Zone => &["Zone", "Congestion Zone"],
            Field::LoadFactor => &["Load Factor", "LoadFactor", "LF"],
            Field::Product => &["Product", "Products"],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Field::Description => "description",
            Field::Price => "price",
            Field::GreenPrice => "green price",
            Field::Term => "term",
            Field::StartDate => "start date",
            Field::CreatedDate => "created date",
            Field::Utility => "utility",
            Field::Zone => "zone",
            Field::LoadFactor => "load factor",
            Field::Product => "product",
        }
    }
}

/// Finds columns in one header row
pub struct ColumnResolver {
    /// Normalised header per column position
    normalized: Vec<String>,
    /// Normalised header → first column carrying it
    index: HashMap<String, usize>,
}

impl ColumnResolver {
    pub fn new<S: AsRef<str>>(headers: &[S]) -> Self {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h.as_ref())).collect();
        let mut index = HashMap::new();
        for (pos, key) in normalized.iter().enumerate() {
            if !key.is_empty() {
                index.entry(key.clone()).or_insert(pos);
            }
        }
        Self { normalized, index }
    }

    /// Column index for the first matching candidate
    pub fn find(&self, candidates: &[&str], allow_contains: bool) -> Option<usize> {
        let keys: Vec<String> = candidates
            .iter()
            .map(|c| normalize_header(c))
            .filter(|k| !k.is_empty())
            .collect();

        if let Some(pos) = keys.iter().find_map(|k| self.index.get(k).copied()) {
            return Some(pos);
        }

        if allow_contains {
            for (pos, header) in self.normalized.iter().enumerate() {
                if header.is_empty() {
                    continue;
                }
                if keys.iter().any(|k| header.contains(k.as_str())) {
                    return Some(pos);
                }
            }
        }

        None
    }

    pub fn find_field(&self, field: Field, allow_contains: bool) -> Option<usize> {
        self.find(field.candidates(), allow_contains)
    }

    /// Resolve every known field at once
    pub fn resolve_all(&self, allow_contains: bool) -> ResolvedColumns {
        let mut columns = HashMap::new();
        for field in Field::ALL {
            if let Some(pos) = self.find_field(field, allow_contains) {
                debug!(field = field.name(), column = pos, "resolved source column");
                columns.insert(field, pos);
            }
        }
        ResolvedColumns { columns }
    }
}

/// Field → column position for one sheet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedColumns {
    columns: HashMap<Field, usize>,
}

impl ResolvedColumns {
    pub fn get(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn has(&self, field: Field) -> bool {
        self.columns.contains_key(&field)
    }

    /// Fields that resolved, in `Field::ALL` order
    pub fn fields(&self) -> Vec<(Field, usize)> {
        Field::ALL
            .iter()
            .filter_map(|f| self.get(*f).map(|pos| (*f, pos)))
            .collect()
    }
}
