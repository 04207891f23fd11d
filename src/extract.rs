//! Record assembly: resolve a [`RefSpec`] against one sheet
//!
//! These functions work on any [`Backend`]; [`Workbook`](crate::Workbook)
//! wraps them with its current sheet and default options.

use crate::backend::Backend;
use crate::error::{Result, TabError};
use crate::normalize::{normalize, ExtractOptions};
use crate::reference::{column_index, parse_reference, CellCoord, CellSpan, Reference};
use crate::types::{CellValue, DateSystem};
use crate::value::{Field, Record, RefSpec, Value};

/// Extract one record from `sheet`
///
/// The record mirrors the shape of `spec`: a single reference gives a scalar
/// (or a matrix for a range), a list gives a list and a map gives a map with
/// the same keys in the same order. `None` references yield the blank
/// substitute of `options`.
///
/// Fails without a partial record when the sheet does not exist, a reference
/// is malformed, a cell cannot be read, or a cell holds an error value in
/// strict mode.
pub fn tab_form(
    backend: &mut dyn Backend,
    sheet: &str,
    spec: &RefSpec,
    options: &ExtractOptions,
) -> Result<Record> {
    backend.set_sheet(sheet)?;
    let system = backend.date_system();

    match spec {
        RefSpec::Single(reference) => {
            Ok(match resolve(backend, reference.as_deref(), system, options)? {
                Field::Scalar(value) => Record::Scalar(value),
                Field::Matrix(rows) => Record::Matrix(rows),
            })
        }
        RefSpec::List(references) => references
            .iter()
            .map(|reference| resolve(backend, reference.as_deref(), system, options))
            .collect::<Result<Vec<_>>>()
            .map(Record::List),
        RefSpec::Map(fields) => {
            let mut record = indexmap::IndexMap::with_capacity(fields.len());
            for (name, reference) in fields {
                record.insert(
                    name.clone(),
                    resolve(backend, reference.as_deref(), system, options)?,
                );
            }
            Ok(Record::Map(record))
        }
    }
}

fn resolve(
    backend: &mut dyn Backend,
    reference: Option<&str>,
    system: DateSystem,
    options: &ExtractOptions,
) -> Result<Field> {
    match reference {
        None => Ok(Field::Scalar(options.empty.clone())),
        Some(reference) => range_value(backend, reference, system, options),
    }
}

/// Normalized value of one reference on the current sheet
pub fn range_value(
    backend: &mut dyn Backend,
    reference: &str,
    system: DateSystem,
    options: &ExtractOptions,
) -> Result<Field> {
    match raw_range_value(backend, reference)? {
        Field::Scalar(raw) => normalize(&raw, system, options)
            .map(Field::Scalar)
            .map_err(|e| e.at(reference.trim())),
        Field::Matrix(rows) => {
            let span = match parse_reference(reference)? {
                Reference::Range(span) => span,
                Reference::Cell(coord) => CellSpan::new(coord, coord),
            };
            let mut out = Vec::with_capacity(rows.len());
            for (r, row) in rows.iter().enumerate() {
                let mut values = Vec::with_capacity(row.len());
                for (c, raw) in row.iter().enumerate() {
                    let value = normalize(raw, system, options).map_err(|e| {
                        let cell = CellCoord::new(span.start.row + r as u32, span.start.col + c as u32);
                        e.at(format!("{} in {}", cell, span))
                    })?;
                    values.push(value);
                }
                out.push(values);
            }
            Ok(Field::Matrix(out))
        }
    }
}

/// Raw engine values of one reference on the current sheet, un-normalized
pub fn raw_range_value(backend: &mut dyn Backend, reference: &str) -> Result<Field<CellValue>> {
    match parse_reference(reference)? {
        Reference::Cell(coord) => backend
            .read_cell(coord)
            .map(Field::Scalar)
            .map_err(|e| e.at(reference.trim())),
        Reference::Range(span) => backend
            .read_range(span)
            .map(Field::Matrix)
            .map_err(|e| e.at(reference.trim())),
    }
}

/// Values of a 1-based row, from column A to the last used column
pub fn row_values(
    backend: &mut dyn Backend,
    row: u32,
    system: DateSystem,
    options: &ExtractOptions,
) -> Result<Vec<Value>> {
    let row = row
        .checked_sub(1)
        .ok_or_else(|| TabError::InvalidReference("row numbers start at 1".to_string()))?;
    let Some(extent) = backend.used_extent()? else {
        return Ok(Vec::new());
    };
    let span = CellSpan::new(CellCoord::new(row, 0), CellCoord::new(row, extent.end.col));
    line_values(backend, span, system, options)
}

/// Values of a lettered column, from row 1 to the last used row
pub fn col_values(
    backend: &mut dyn Backend,
    column: &str,
    system: DateSystem,
    options: &ExtractOptions,
) -> Result<Vec<Value>> {
    let col = column_index(column.trim().trim_start_matches('$')).ok_or_else(|| {
        TabError::InvalidReference(format!("'{}': not a column name", column))
    })?;
    let Some(extent) = backend.used_extent()? else {
        return Ok(Vec::new());
    };
    let span = CellSpan::new(CellCoord::new(0, col), CellCoord::new(extent.end.row, col));
    line_values(backend, span, system, options)
}

fn line_values(
    backend: &mut dyn Backend,
    span: CellSpan,
    system: DateSystem,
    options: &ExtractOptions,
) -> Result<Vec<Value>> {
    let rows = backend.read_range(span).map_err(|e| e.at(span.to_string()))?;
    span.cells()
        .zip(rows.into_iter().flatten())
        .map(|(cell, raw)| normalize(&raw, system, options).map_err(|e| e.at(cell.to_a1())))
        .collect()
}

/// Write a scalar or a row-major matrix at a reference
///
/// A scalar written to a range fills every cell of it; a matrix must match
/// the range exactly. [`CellValue::Empty`] blanks the cell.
pub fn set_cell_value(
    backend: &mut dyn Backend,
    reference: &str,
    value: Field<CellValue>,
) -> Result<()> {
    let target = parse_reference(reference)?;
    match (target, value) {
        (Reference::Cell(coord), Field::Scalar(value)) => write(backend, coord, value),
        (Reference::Cell(coord), Field::Matrix(_)) => Err(TabError::InvalidReference(format!(
            "'{}': a matrix needs a range, not the single cell {}",
            reference, coord
        ))),
        (Reference::Range(span), Field::Scalar(value)) => {
            for coord in span.cells() {
                write(backend, coord, value.clone())?;
            }
            Ok(())
        }
        (Reference::Range(span), Field::Matrix(rows)) => {
            let fits = rows.len() == span.rows() as usize
                && rows.iter().all(|row| row.len() == span.cols() as usize);
            if !fits {
                return Err(TabError::InvalidReference(format!(
                    "'{}': expected a {}x{} matrix",
                    reference,
                    span.rows(),
                    span.cols()
                )));
            }
            for (coord, value) in span.cells().zip(rows.into_iter().flatten()) {
                write(backend, coord, value)?;
            }
            Ok(())
        }
    }
}

fn write(backend: &mut dyn Backend, coord: CellCoord, value: CellValue) -> Result<()> {
    backend
        .write_cell(coord, value)
        .map_err(|e| e.at(coord.to_a1()))
}

/// Write several references at once, in order
pub fn fill_form<I, K, V>(backend: &mut dyn Backend, entries: I) -> Result<()>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<Field<CellValue>>,
{
    for (reference, value) in entries {
        set_cell_value(backend, reference.as_ref(), value.into())?;
    }
    Ok(())
}
