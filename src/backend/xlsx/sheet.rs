//! Worksheet part decoding

use super::parts::{attr, read_rich_text, read_text, reader};
use crate::error::{Result, TabError};
use crate::reference::{parse_reference, CellCoord, Reference};
use crate::types::CellValue;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;

/// Sparse cell storage, iterated in row-major order
pub(crate) type Cells = BTreeMap<CellCoord, CellValue>;

/// Lookup tables shared by every worksheet of a package
pub(crate) struct SheetContext<'a> {
    pub shared_strings: &'a [String],
    pub date_styles: &'a [bool],
}

/// Zero-based index of a row from its `r` attribute
pub(crate) fn row_index(r: &str) -> Result<u32> {
    r.trim()
        .parse::<u32>()
        .ok()
        .and_then(|r| r.checked_sub(1))
        .ok_or_else(|| TabError::ReadError(format!("invalid row number '{}'", r)))
}

/// Position of a `<c>` element, falling back to the next implicit column
pub(crate) fn cell_position(c: &BytesStart<'_>, row: u32, next_col: u32) -> Result<CellCoord> {
    match attr(c, b"r")? {
        Some(r) => match parse_reference(&r)? {
            Reference::Cell(coord) => Ok(coord),
            Reference::Range(_) => Err(TabError::ReadError(format!(
                "invalid cell reference '{}'",
                r
            ))),
        },
        None => Ok(CellCoord::new(row, next_col)),
    }
}

/// Decode the `<sheetData>` of a worksheet part
///
/// Cells without a value are skipped. Rows and cells that omit their `r`
/// attribute continue from the previous position.
pub(crate) fn parse_sheet(xml: &str, ctx: &SheetContext<'_>) -> Result<Cells> {
    let mut reader = reader(xml);
    let mut cells = Cells::new();
    let mut row = 0u32;
    let mut next_row = 0u32;
    let mut next_col = 0u32;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                row = match attr(&e, b"r")? {
                    Some(r) => row_index(&r)?,
                    None => next_row,
                };
                next_row = row + 1;
                next_col = 0;
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                let coord = cell_position(&e, row, next_col)?;
                next_col = coord.col + 1;
                let value = RawCell::read(&e, &mut reader)
                    .and_then(|raw| raw.decode(ctx))
                    .map_err(|err| err.at(coord.to_a1()))?;
                if !value.is_empty() {
                    cells.insert(coord, value);
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                next_col = cell_position(&e, row, next_col)?.col + 1;
            }
            Event::Eof => return Ok(cells),
            _ => {}
        }
    }
}

/// Undecoded content of one `<c>` element
struct RawCell {
    kind: String,
    style: Option<usize>,
    value: Option<String>,
    inline: Option<String>,
}

impl RawCell {
    /// Consume the children of `c` up to its end tag
    fn read(c: &BytesStart<'_>, reader: &mut Reader<&[u8]>) -> Result<Self> {
        let mut raw = RawCell {
            kind: attr(c, b"t")?.unwrap_or_else(|| "n".to_string()),
            style: attr(c, b"s")?.and_then(|s| s.trim().parse().ok()),
            value: None,
            inline: None,
        };
        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"v" => raw.value = Some(read_text(reader)?),
                    b"is" => raw.inline = Some(read_rich_text(reader)?),
                    // formulas and extensions
                    _ => {
                        reader.read_to_end(e.name())?;
                    }
                },
                Event::End(_) => return Ok(raw),
                Event::Eof => {
                    return Err(TabError::ReadError(
                        "unexpected end of document inside <c>".to_string(),
                    ))
                }
                _ => {}
            }
        }
    }

    fn decode(self, ctx: &SheetContext<'_>) -> Result<CellValue> {
        if self.kind == "inlineStr" {
            return Ok(self.inline.map(CellValue::String).unwrap_or(CellValue::Empty));
        }
        // `<v/>` and blank values carry nothing, whatever the type says
        let Some(raw) = self.value.filter(|v| !v.trim().is_empty()) else {
            return Ok(CellValue::Empty);
        };

        Ok(match self.kind.as_str() {
            "s" => {
                let index: usize = raw.trim().parse().map_err(|_| {
                    TabError::ReadError(format!("invalid shared string index '{}'", raw))
                })?;
                let s = ctx.shared_strings.get(index).ok_or_else(|| {
                    TabError::ReadError(format!("shared string {} out of range", index))
                })?;
                CellValue::String(s.clone())
            }
            "str" => CellValue::String(raw),
            "b" => CellValue::Bool(raw.trim() == "1" || raw.trim().eq_ignore_ascii_case("true")),
            "e" => CellValue::Error(raw),
            "d" => match parse_iso_datetime(&raw) {
                Some(t) => CellValue::Timestamp(t),
                None => CellValue::String(raw),
            },
            _ => {
                let number: f64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| TabError::ReadError(format!("invalid number '{}'", raw)))?;
                let is_date = self
                    .style
                    .and_then(|s| ctx.date_styles.get(s).copied())
                    .unwrap_or(false);
                if is_date {
                    CellValue::DateTime(number)
                } else {
                    CellValue::Float(number)
                }
            }
        })
    }
}

fn parse_iso_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}
