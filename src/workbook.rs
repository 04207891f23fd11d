//! The workbook handle: one open file, one selected sheet

use crate::backend::{self, Backend, Engine};
use crate::error::{Result, TabError};
use crate::extract;
use crate::normalize::ExtractOptions;
use crate::types::CellValue;
use crate::value::{Field, Record, RefSpec, Value};
use std::fmt;
use std::path::{Path, PathBuf};

/// An open spreadsheet file
///
/// The first sheet is selected on open. Extractions never modify the file;
/// writes go through [`set_cell_value`](Workbook::set_cell_value) /
/// [`fill_form`](Workbook::fill_form) and need an engine that supports them.
///
/// Call [`close`](Workbook::close) when done. A workbook that is dropped
/// instead still releases its resources, but logs a warning.
///
/// # Examples
///
/// ```no_run
/// use formtab::{RefSpec, Workbook};
///
/// let mut workbook = Workbook::open_fast("survey_017.xlsx")?;
/// let record = workbook.tab_form([("Name", "B12"), ("Age", "B15"), ("Height", "C20")])?;
/// println!("{:?}", record.get("Name"));
/// workbook.close()?;
/// # Ok::<(), formtab::TabError>(())
/// ```
pub struct Workbook<'app> {
    path: PathBuf,
    engine: &'static str,
    backend: Option<Box<dyn Backend + 'app>>,
    sheet: String,
    options: ExtractOptions,
}

impl<'app> Workbook<'app> {
    /// Open `path` with the chosen engine and select its first sheet
    pub fn open<P: AsRef<Path>>(path: P, engine: Engine<'app>) -> Result<Self> {
        let path = path.as_ref();
        let mut backend = backend::open(path, engine)?;
        let sheet = backend
            .sheet_names()
            .into_iter()
            .next()
            .ok_or_else(|| TabError::ReadError(format!("{}: workbook has no sheets", path.display())))?;
        backend.set_sheet(&sheet)?;
        log::debug!("opened {} with the {} engine", path.display(), engine.name());

        Ok(Workbook {
            path: path.to_path_buf(),
            engine: engine.name(),
            backend: Some(backend),
            sheet,
            options: ExtractOptions::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the engine serving this workbook
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.backend
            .as_ref()
            .map(|b| b.sheet_names())
            .unwrap_or_default()
    }

    /// Currently selected sheet
    pub fn sheet_name(&self) -> &str {
        &self.sheet
    }

    /// Select a sheet by name
    pub fn set_sheet(&mut self, name: &str) -> Result<()> {
        let backend = self.backend.as_deref_mut().ok_or_else(closed)?;
        backend.set_sheet(name)?;
        log::debug!("{}: selected sheet '{}'", self.path.display(), name);
        self.sheet = name.to_string();
        Ok(())
    }

    /// Select a sheet by 0-based position
    pub fn set_sheet_index(&mut self, index: usize) -> Result<()> {
        let names = self.sheet_names();
        match names.get(index) {
            Some(name) => self.set_sheet(name),
            None => Err(TabError::SheetNotFound {
                sheet: format!("#{}", index),
                available: names.join(", "),
            }),
        }
    }

    /// Options used by [`tab_form`](Workbook::tab_form) and the other readers
    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: ExtractOptions) {
        self.options = options;
    }

    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    /// Extract one record from the current sheet with the workbook options
    pub fn tab_form(&mut self, spec: impl Into<RefSpec>) -> Result<Record> {
        let backend = self.backend.as_deref_mut().ok_or_else(closed)?;
        extract::tab_form(backend, &self.sheet, &spec.into(), &self.options)
    }

    /// Like [`tab_form`](Workbook::tab_form) with one-off options
    pub fn tab_form_with(&mut self, spec: impl Into<RefSpec>, options: &ExtractOptions) -> Result<Record> {
        let backend = self.backend.as_deref_mut().ok_or_else(closed)?;
        extract::tab_form(backend, &self.sheet, &spec.into(), options)
    }

    /// Normalized value of a single reference
    pub fn range_value(&mut self, reference: &str) -> Result<Field> {
        let (backend, options) = self.selected()?;
        let system = backend.date_system();
        extract::range_value(backend, reference, system, options)
    }

    /// Raw engine values of a reference, before normalization
    pub fn raw_range_value(&mut self, reference: &str) -> Result<Field<CellValue>> {
        let (backend, _) = self.selected()?;
        extract::raw_range_value(backend, reference)
    }

    /// Values of a 1-based row, from column A to the last used column
    pub fn row_values(&mut self, row: u32) -> Result<Vec<Value>> {
        let (backend, options) = self.selected()?;
        let system = backend.date_system();
        extract::row_values(backend, row, system, options)
    }

    /// Values of a column given by its letters, from row 1 to the last used row
    pub fn col_values(&mut self, column: &str) -> Result<Vec<Value>> {
        let (backend, options) = self.selected()?;
        let system = backend.date_system();
        extract::col_values(backend, column, system, options)
    }

    /// Write a scalar or a matrix at a reference on the current sheet
    pub fn set_cell_value(&mut self, reference: &str, value: impl Into<Field<CellValue>>) -> Result<()> {
        let (backend, _) = self.selected()?;
        extract::set_cell_value(backend, reference, value.into())
    }

    /// Write several `(reference, value)` entries on the current sheet
    ///
    /// ```no_run
    /// # let mut workbook = formtab::Workbook::open_read_write("form.xlsx")?;
    /// workbook.fill_form([("A7", 68035.75), ("B7", 12.5)])?;
    /// workbook.save()?;
    /// # Ok::<(), formtab::TabError>(())
    /// ```
    pub fn fill_form<I, K, V>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Field<CellValue>>,
    {
        let (backend, _) = self.selected()?;
        extract::fill_form(backend, entries)
    }

    /// Save over the source file
    pub fn save(&mut self) -> Result<()> {
        self.backend.as_deref_mut().ok_or_else(closed)?.save(None)
    }

    /// Save to another file; the workbook keeps pointing at its source
    pub fn save_as<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.backend
            .as_deref_mut()
            .ok_or_else(closed)?
            .save(Some(path.as_ref()))
    }

    /// Release the file and any temporary resources
    pub fn close(mut self) -> Result<()> {
        match self.backend.take() {
            Some(mut backend) => {
                log::debug!("closing {}", self.path.display());
                backend.close()
            }
            None => Ok(()),
        }
    }

    /// The backend with the workbook's sheet selected
    fn selected(&mut self) -> Result<(&mut (dyn Backend + 'app), &ExtractOptions)> {
        let backend = self.backend.as_deref_mut().ok_or_else(closed)?;
        backend.set_sheet(&self.sheet)?;
        Ok((backend, &self.options))
    }
}

impl Workbook<'static> {
    /// Open with the read-only [`Engine::Fast`]
    pub fn open_fast<P: AsRef<Path>>(path: P) -> Result<Self> {
        Workbook::open(path, Engine::Fast)
    }

    /// Open with the xlsx [`Engine::ReadWrite`]
    pub fn open_read_write<P: AsRef<Path>>(path: P) -> Result<Self> {
        Workbook::open(path, Engine::ReadWrite)
    }
}

impl fmt::Display for Workbook<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.path.display(), self.sheet)
    }
}

impl fmt::Debug for Workbook<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workbook")
            .field("path", &self.path)
            .field("engine", &self.engine)
            .field("sheet", &self.sheet)
            .field("open", &self.backend.is_some())
            .finish()
    }
}

impl Drop for Workbook<'_> {
    fn drop(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            log::warn!("{} dropped without close()", self.path.display());
            if let Err(e) = backend.close() {
                log::warn!("closing {} failed: {}", self.path.display(), e);
            }
        }
    }
}

fn closed() -> TabError {
    TabError::ReadError("workbook is closed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WorkbookWriter;
    use tempfile::tempdir;

    fn fixture(path: &Path) {
        let mut writer = WorkbookWriter::new(path);
        writer.add_worksheet("Cover").unwrap();
        writer.write_row(&["Survey".into()]).unwrap();
        writer.add_worksheet("Data").unwrap();
        writer.write_row(&["Name".into(), "John Doe".into()]).unwrap();
        writer.write_row(&["Age".into(), CellValue::Int(33)]).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_sheet_selection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("two.xlsx");
        fixture(&path);

        for engine in [Engine::Fast, Engine::ReadWrite] {
            let mut workbook = Workbook::open(&path, engine).unwrap();
            assert_eq!(workbook.sheet_name(), "Cover");
            assert_eq!(workbook.tab_form("A1").unwrap(), Record::Scalar(Value::from("Survey")));

            workbook.set_sheet_index(1).unwrap();
            assert_eq!(workbook.sheet_name(), "Data");
            assert_eq!(workbook.tab_form("B2").unwrap(), Record::Scalar(Value::Number(33.0)));

            let err = workbook.set_sheet("Missing").unwrap_err();
            assert!(err.to_string().contains("Cover, Data"));
            assert_eq!(workbook.sheet_name(), "Data");
            assert!(workbook.set_sheet_index(2).is_err());

            workbook.close().unwrap();
        }
    }

    #[test]
    fn test_fast_engine_is_read_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.xlsx");
        fixture(&path);

        let mut workbook = Workbook::open_fast(&path).unwrap();
        assert_eq!(workbook.engine(), "fast");
        let err = workbook.set_cell_value("A1", "x").unwrap_err();
        assert!(matches!(err.root(), TabError::NotSupported(_)));
        assert!(matches!(workbook.save(), Err(TabError::NotSupported(_))));
    }

    #[test]
    fn test_default_options_apply() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("opts.xlsx");
        fixture(&path);

        let mut workbook = Workbook::open_read_write(&path)
            .unwrap()
            .with_options(ExtractOptions::new().with_empty("N/A"));
        workbook.set_sheet("Data").unwrap();
        assert_eq!(workbook.tab_form("Z9").unwrap(), Record::Scalar(Value::from("N/A")));

        let nan = workbook.tab_form_with("Z9", &ExtractOptions::default()).unwrap();
        assert!(nan.as_scalar().unwrap().is_nan());
    }
}
