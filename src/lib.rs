//! Ratesheet - electricity rate-sheet ETL
//!
//! Reads supplier rate sheets, keeps Fixed Price offers on 12/24/36/48/60
//! month terms, maps them onto the 17-column master pricing table and
//! appends them with the master's own formatting and sequential IDs.
//!
//! # Example
//!
//! ```no_run
//! use ratesheet::pipeline::{process_matrix_file, ProcessOptions};
//! use std::path::Path;
//!
//! let report = process_matrix_file(
//!     Path::new("Hudson Matrix.xlsm"),
//!     Path::new("DAILY PRICING - new.xlsx"),
//!     &ProcessOptions::default(),
//! )?;
//! println!("{}", report);
//! # Ok::<(), ratesheet::error::RateSheetError>(())
//! ```

pub mod append;
pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod excel;
pub mod filter;
pub mod mapper;
pub mod pipeline;
pub mod resolver;
pub mod transfer;
pub mod types;

// Re-export commonly used types
pub use append::{AppendReport, MasterTable};
pub use config::{GraphConfig, Settings};
pub use error::{RateSheetError, RateSheetResult};
pub use filter::{ErcotNarrowing, RowFilter};
pub use mapper::{MapperOptions, MappingProfile, SchemaMapper};
pub use resolver::{ColumnResolver, Field};
pub use types::{BaseRow, CellValue, MasterRow, SheetData};
