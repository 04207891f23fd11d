//! A1-style cell and range references
//!
//! Rows and columns are **0-indexed** once parsed: `A1` is `(row 0, col 0)`.
//! Ranges are inclusive on both ends and always normalized so that the start
//! corner is above and to the left of the end corner.

use crate::error::{Result, TabError};
use std::fmt;
use std::str::FromStr;

const SHEET_SEPARATOR: char = '!';
const ABSOLUTE_MARKER: char = '$';

/// A single cell position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    /// Row index (0-based)
    pub row: u32,
    /// Column index (0-based)
    pub col: u32,
}

impl CellCoord {
    /// Create a new coordinate
    pub const fn new(row: u32, col: u32) -> Self {
        CellCoord { row, col }
    }

    /// Get Excel-style cell reference (e.g., "A1", "B2")
    pub fn to_a1(&self) -> String {
        format!("{}{}", column_name(self.col), self.row + 1)
    }

    /// Cell reference with optional `$` markers, e.g. `$A$10` or `B$2`
    pub fn to_a1_absolute(&self, row_abs: bool, col_abs: bool) -> String {
        let mut out = String::new();
        if col_abs {
            out.push(ABSOLUTE_MARKER);
        }
        out.push_str(&column_name(self.col));
        if row_abs {
            out.push(ABSOLUTE_MARKER);
        }
        let mut buf = itoa::Buffer::new();
        out.push_str(buf.format(self.row + 1));
        out
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

impl FromStr for CellCoord {
    type Err = TabError;

    fn from_str(s: &str) -> Result<Self> {
        match parse_reference(s)? {
            Reference::Cell(coord) => Ok(coord),
            Reference::Range(_) => Err(TabError::InvalidReference(format!(
                "'{}' is a range, expected a single cell",
                s
            ))),
        }
    }
}

/// A rectangular, inclusive block of cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellSpan {
    pub start: CellCoord,
    pub end: CellCoord,
}

impl CellSpan {
    /// Construct a span from two corners given in any order
    pub fn new(a: CellCoord, b: CellCoord) -> Self {
        CellSpan {
            start: CellCoord::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellCoord::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    /// Number of rows covered
    pub fn rows(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    /// Number of columns covered
    pub fn cols(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    /// Whether `coord` lies inside the span
    pub fn contains(&self, coord: CellCoord) -> bool {
        (self.start.row..=self.end.row).contains(&coord.row)
            && (self.start.col..=self.end.col).contains(&coord.col)
    }

    /// Every coordinate in row-major order
    pub fn cells(&self) -> impl Iterator<Item = CellCoord> {
        let span = *self;
        (span.start.row..=span.end.row)
            .flat_map(move |row| (span.start.col..=span.end.col).map(move |col| CellCoord::new(row, col)))
    }
}

impl fmt::Display for CellSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// A parsed reference: one cell or a range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reference {
    Cell(CellCoord),
    Range(CellSpan),
}

impl Reference {
    /// Whether this reference names a range (even a 1x1 range like `A1:A1`)
    pub fn is_range(&self) -> bool {
        matches!(self, Reference::Range(_))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Cell(coord) => coord.fmt(f),
            Reference::Range(span) => span.fmt(f),
        }
    }
}

impl FromStr for Reference {
    type Err = TabError;

    fn from_str(s: &str) -> Result<Self> {
        parse_reference(s)
    }
}

/// Parse `"B15"` or `"A2:I36"` into a [`Reference`]
///
/// Column letters are case-insensitive and `$` absolute markers are accepted
/// and ignored. A range given in reverse order (`"C3:A1"`) is normalized.
///
/// # Examples
///
/// ```
/// use formtab::reference::{parse_reference, CellCoord, Reference};
///
/// assert_eq!(parse_reference("B15").unwrap(), Reference::Cell(CellCoord::new(14, 1)));
/// assert!(parse_reference("A2:I36").unwrap().is_range());
/// assert!(parse_reference("15B").is_err());
/// ```
pub fn parse_reference(reference: &str) -> Result<Reference> {
    let s = reference.trim();
    let mut parts = s.split(':');
    let first = parts.next().unwrap_or_default();
    let second = parts.next();
    if parts.next().is_some() {
        return Err(invalid(reference, "more than one ':'"));
    }

    let start = parse_coord(first).map_err(|why| invalid(reference, why))?;
    match second {
        None => Ok(Reference::Cell(start)),
        Some(other) => {
            let end = parse_coord(other).map_err(|why| invalid(reference, why))?;
            Ok(Reference::Range(CellSpan::new(start, end)))
        }
    }
}

fn invalid(reference: &str, why: &str) -> TabError {
    TabError::InvalidReference(format!("'{}': {}", reference, why))
}

fn parse_coord(s: &str) -> std::result::Result<CellCoord, &'static str> {
    if s.is_empty() {
        return Err("empty coordinate");
    }
    let bytes = s.as_bytes();
    let mut idx = 0;
    if bytes[idx] == b'$' {
        idx += 1;
    }

    let col_start = idx;
    while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
        idx += 1;
    }
    if idx == col_start {
        return Err("missing column letters");
    }
    let col_end = idx;

    if bytes.get(idx) == Some(&b'$') {
        idx += 1;
    }

    let row_start = idx;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx == row_start {
        return Err("missing row number");
    }
    if idx != bytes.len() {
        return Err("unexpected trailing characters");
    }

    let col = column_index(&s[col_start..col_end]).ok_or("column out of range")?;
    let row: u32 = s[row_start..idx].parse().map_err(|_| "row out of range")?;
    if row == 0 {
        return Err("rows start at 1");
    }
    Ok(CellCoord::new(row - 1, col))
}

/// Convert column letters to a 0-based index (A -> 0, Z -> 25, AA -> 26)
///
/// Returns `None` for empty input, non-letters or overflow.
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    let mut n: u32 = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let digit = (ch.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
        n = n.checked_mul(26)?.checked_add(digit)?;
    }
    Some(n - 1)
}

/// Convert a 0-based column index to letters (0 -> A, 25 -> Z, 26 -> AA)
pub fn column_name(col: u32) -> String {
    let mut letters = Vec::new();
    let mut n = col as u64 + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

fn strip_sheet(reference: &str) -> &str {
    match reference.rfind(SHEET_SEPARATOR) {
        Some(pos) => &reference[pos + 1..],
        None => reference,
    }
}

/// Whether the column part carries a `$` marker (`$C10`, `Sheet5!$C$10`)
pub fn is_col_absolute(reference: &str) -> bool {
    strip_sheet(reference).starts_with(ABSOLUTE_MARKER)
}

/// Whether the row part carries a `$` marker (`C$10`, `Sheet5!$C$10`)
pub fn is_row_absolute(reference: &str) -> bool {
    let cell = strip_sheet(reference);
    match cell.find(|c: char| c.is_ascii_digit()) {
        Some(pos) if pos > 0 => cell[..pos].ends_with(ABSOLUTE_MARKER),
        _ => false,
    }
}
