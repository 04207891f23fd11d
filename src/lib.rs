//! # formtab
//!
//! Tabulate values from spreadsheet forms: workbooks where data sits at fixed
//! cell locations inside a human-oriented layout rather than in a table.
//!
//! ## Features
//!
//! - **Reference specs**: a single cell or range, an ordered list, or a map of
//!   field names to references, answered with a record of the same shape
//! - **Normalization**: numbers as `f64`, dates as calendar dates (or full
//!   timestamps), trimmed text, a configurable blank substitute
//! - **Error cells**: embedded as [`Value::Error`] or raised in strict mode
//! - **Three engines**: fast read-only (xlsx, xlsb, xls, ods), read/write
//!   xlsx, and conversion through a shared spreadsheet application
//! - **Form filling**: write scalars and matrices back and save
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use formtab::{RefSpec, Workbook};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let spec = RefSpec::from([("Name", "B12"), ("Age", "B15"), ("Height", "C20")]);
//!
//! for path in ["form_001.xlsx", "form_002.xlsx"] {
//!     let mut workbook = Workbook::open_fast(path)?;
//!     let record = workbook.tab_form(spec.clone())?;
//!     println!("{}: {:?}", path, record);
//!     workbook.close()?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Options
//!
//! ```rust,no_run
//! use formtab::{ExtractOptions, Workbook};
//! use formtab::normalize::DateMode;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ExtractOptions::new()
//!     .with_empty("N/A")
//!     .with_dates(DateMode::DateTime)
//!     .strict();
//!
//! let mut workbook = Workbook::open_fast("form_001.xlsx")?.with_options(options);
//! let table = workbook.tab_form("A2:I36")?;
//! assert_eq!(table.as_matrix().map(|rows| rows.len()), Some(35));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod extract;
pub mod normalize;
pub mod reference;
pub mod types;
pub mod value;
pub mod workbook;
pub mod writer;

pub use backend::{AppConfig, Engine, SpreadsheetApp};
pub use error::{Result, TabError};
pub use normalize::ExtractOptions;
pub use types::CellValue;
pub use value::{Field, Record, RefSpec, Value};
pub use workbook::Workbook;
