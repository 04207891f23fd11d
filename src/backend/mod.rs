//! Interchangeable spreadsheet engines behind one capability trait
//!
//! - [`FastBackend`]: read-only, calamine based (xlsx, xlsm, xlsb, xls, ods)
//! - [`XlsxBackend`]: read/write for xlsx, loads every sheet into memory
//! - [`ApplicationBackend`]: re-saves the file through a running spreadsheet
//!   application first, for files the other engines refuse to open
//!
//! Callers pick an engine with [`Engine`] when opening a
//! [`Workbook`](crate::workbook::Workbook).

pub mod application;
pub mod fast;
pub mod xlsx;

use crate::error::{Result, TabError};
use crate::reference::{CellCoord, CellSpan};
use crate::types::{CellValue, DateSystem};
use std::path::Path;

pub use application::{AppConfig, ApplicationBackend, SpreadsheetApp};
pub use fast::FastBackend;
pub use xlsx::XlsxBackend;

/// Which engine serves a workbook
#[derive(Debug, Clone, Copy)]
pub enum Engine<'app> {
    /// Read-only, fastest, widest format support
    Fast,
    /// Read/write, xlsx only
    ReadWrite,
    /// Conversion through a shared spreadsheet application
    Application(&'app SpreadsheetApp),
}

impl Engine<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Engine::Fast => "fast",
            Engine::ReadWrite => "read-write",
            Engine::Application(_) => "application",
        }
    }
}

/// Raw access to one open spreadsheet
///
/// Coordinates are absolute and 0-based. Cells outside the used area read as
/// [`CellValue::Empty`]. All reads apply to the sheet chosen by the last
/// successful [`set_sheet`](Backend::set_sheet).
pub trait Backend {
    /// Short engine name for logs and messages
    fn name(&self) -> &'static str;

    fn sheet_names(&self) -> Vec<String>;

    /// Select the sheet subsequent reads and writes apply to
    fn set_sheet(&mut self, name: &str) -> Result<()>;

    fn current_sheet(&self) -> Option<&str>;

    fn date_system(&self) -> DateSystem {
        DateSystem::V1900
    }

    fn read_cell(&mut self, coord: CellCoord) -> Result<CellValue>;

    /// Read a rectangular block in row-major order
    fn read_range(&mut self, span: CellSpan) -> Result<Vec<Vec<CellValue>>> {
        let mut rows = Vec::with_capacity(span.rows() as usize);
        for row in span.start.row..=span.end.row {
            let mut cells = Vec::with_capacity(span.cols() as usize);
            for col in span.start.col..=span.end.col {
                cells.push(self.read_cell(CellCoord::new(row, col))?);
            }
            rows.push(cells);
        }
        Ok(rows)
    }

    /// Bounding box of the non-empty cells on the current sheet
    fn used_extent(&mut self) -> Result<Option<CellSpan>>;

    fn write_cell(&mut self, _coord: CellCoord, _value: CellValue) -> Result<()> {
        Err(TabError::NotSupported(format!(
            "the {} engine is read-only",
            self.name()
        )))
    }

    /// Persist pending writes; `None` saves over the source file
    fn save(&mut self, _path: Option<&Path>) -> Result<()> {
        Err(TabError::NotSupported(format!(
            "the {} engine cannot save",
            self.name()
        )))
    }

    /// Release file handles and temporary resources
    fn close(&mut self) -> Result<()>;
}

/// Open `path` with the chosen engine
pub fn open<'app>(path: &Path, engine: Engine<'app>) -> Result<Box<dyn Backend + 'app>> {
    Ok(match engine {
        Engine::Fast => Box::new(FastBackend::open(path)?),
        Engine::ReadWrite => Box::new(XlsxBackend::open(path)?),
        Engine::Application(app) => Box::new(ApplicationBackend::open(app, path)?),
    })
}

/// `SheetNotFound` listing the sheets that do exist
pub(crate) fn sheet_not_found(sheet: &str, available: &[String]) -> TabError {
    TabError::SheetNotFound {
        sheet: sheet.to_string(),
        available: available.join(", "),
    }
}

pub(crate) fn no_sheet_selected() -> TabError {
    TabError::ReadError("no sheet selected".to_string())
}
