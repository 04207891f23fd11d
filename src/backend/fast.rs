//! Read-only engine backed by calamine

use super::{no_sheet_selected, sheet_not_found, Backend};
use crate::error::{Result, TabError};
use crate::reference::{CellCoord, CellSpan};
use crate::types::CellValue;
use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Fast read-only engine
///
/// Supports XLSX, XLSM, XLSB, XLS and ODS; the format is auto-detected from the
/// file extension. The selected sheet is decoded once and cached until another
/// sheet is selected.
pub struct FastBackend {
    workbook: Sheets<BufReader<File>>,
    sheet: Option<(String, Range<Data>)>,
}

impl FastBackend {
    /// Open a workbook for reading
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use formtab::backend::{Backend, FastBackend};
    ///
    /// let mut backend = FastBackend::open("batch_0042.xlsx".as_ref()).unwrap();
    /// backend.set_sheet("Sheet1").unwrap();
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let workbook = open_workbook_auto(path)
            .map_err(|e| TabError::ReadError(format!("{}: {}", path.display(), e)))?;
        log::debug!("fast engine opened {}", path.display());

        Ok(FastBackend {
            workbook,
            sheet: None,
        })
    }

    fn range(&self) -> Result<&Range<Data>> {
        self.sheet
            .as_ref()
            .map(|(_, range)| range)
            .ok_or_else(no_sheet_selected)
    }
}

impl Backend for FastBackend {
    fn name(&self) -> &'static str {
        "fast"
    }

    fn sheet_names(&self) -> Vec<String> {
        self.workbook.sheet_names().to_vec()
    }

    fn set_sheet(&mut self, name: &str) -> Result<()> {
        if matches!(&self.sheet, Some((current, _)) if current == name) {
            return Ok(());
        }
        let names = self.sheet_names();
        if !names.iter().any(|n| n == name) {
            return Err(sheet_not_found(name, &names));
        }

        let range = self.workbook.worksheet_range(name)?;
        log::debug!("fast engine loaded sheet '{}'", name);
        self.sheet = Some((name.to_string(), range));
        Ok(())
    }

    fn current_sheet(&self) -> Option<&str> {
        self.sheet.as_ref().map(|(name, _)| name.as_str())
    }

    fn read_cell(&mut self, coord: CellCoord) -> Result<CellValue> {
        let range = self.range()?;
        Ok(range
            .get_value((coord.row, coord.col))
            .map(datatype_to_cellvalue)
            .unwrap_or(CellValue::Empty))
    }

    fn read_range(&mut self, span: CellSpan) -> Result<Vec<Vec<CellValue>>> {
        let range = self.range()?;
        Ok((span.start.row..=span.end.row)
            .map(|row| {
                (span.start.col..=span.end.col)
                    .map(|col| {
                        range
                            .get_value((row, col))
                            .map(datatype_to_cellvalue)
                            .unwrap_or(CellValue::Empty)
                    })
                    .collect()
            })
            .collect())
    }

    fn used_extent(&mut self) -> Result<Option<CellSpan>> {
        let range = self.range()?;
        Ok(match (range.start(), range.end()) {
            (Some((r0, c0)), Some((r1, c1))) => Some(CellSpan::new(
                CellCoord::new(r0, c0),
                CellCoord::new(r1, c1),
            )),
            _ => None,
        })
    }

    fn close(&mut self) -> Result<()> {
        self.sheet = None;
        Ok(())
    }
}

/// Convert calamine Data to our CellValue
fn datatype_to_cellvalue(dt: &Data) -> CellValue {
    match dt {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::String(s.clone()),
        Data::Float(f) => CellValue::Float(*f),
        Data::Int(i) => CellValue::Int(*i),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(d) if d.is_duration() => CellValue::Float(d.as_f64()),
        Data::DateTime(d) => d
            .as_datetime()
            .map(CellValue::Timestamp)
            .unwrap_or(CellValue::Float(d.as_f64())),
        Data::Error(e) => CellValue::Error(e.to_string()),
        Data::DateTimeIso(s) => parse_iso(s)
            .map(CellValue::Timestamp)
            .unwrap_or_else(|| CellValue::String(s.clone())),
        Data::DurationIso(s) => CellValue::String(s.clone()),
    }
}

/// ODS stores dates as ISO text: date only, date-time, or time only
fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    let raw = s.trim_end_matches('Z');
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(t);
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d.and_time(NaiveTime::MIN));
    }
    NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
        .ok()
        .and_then(|t| NaiveDate::from_ymd_opt(1899, 12, 30).map(|d| d.and_time(t)))
}
