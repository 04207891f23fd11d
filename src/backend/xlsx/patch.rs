//! Saving edits back into the source package
//!
//! Only the parts an edit touches are rewritten: the edited worksheets, and
//! the workbook, styles, relationships and content types when the edits
//! require it. Every other entry is copied through byte for byte, so
//! formulas, merged ranges, styles and drawings outside the edited cells
//! survive a save.

use super::parts::{
    attr, reader, CONTENT_TYPES_PART, REL_CALC_CHAIN, WORKBOOK_PART, WORKBOOK_RELS_PART,
};
use super::sheet::{cell_position, row_index, Cells};
use crate::error::{Result, TabError};
use crate::normalize::{datetime_to_serial, serial_to_datetime};
use crate::reference::{parse_reference, CellCoord, CellSpan, Reference};
use crate::types::{CellValue, DateSystem};
use chrono::{NaiveDateTime, NaiveTime};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use s_zip::{StreamingZipReader, StreamingZipWriter};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Pending writes for one worksheet part
pub(crate) struct SheetEdits<'a> {
    pub part: &'a str,
    pub cells: &'a Cells,
}

/// Shared parts located when the package was opened
#[derive(Debug, Clone, Default)]
pub(crate) struct PackageParts {
    pub styles: Option<String>,
    pub calc_chain: Option<String>,
}

/// Changes a save made to the shared parts
#[derive(Debug, Default)]
pub(crate) struct PatchSummary {
    /// Two date styles were appended to `cellXfs`
    pub date_styles_added: bool,
    /// The calculation chain was removed
    pub calc_chain_dropped: bool,
}

/// Number formats of the cell styles appended for dates: date, then date-time
const DATE_FORMATS: [&str; 2] = ["14", "22"];

/// Write `source` with the edits applied to `target`
///
/// `target` may be `source` itself; the new package is written next to it
/// and renamed over it once complete.
pub(crate) fn patch_package(
    source: &Path,
    target: &Path,
    sheets: &[SheetEdits<'_>],
    parts: &PackageParts,
    date_styles: &[bool],
    system: DateSystem,
) -> Result<PatchSummary> {
    let entries = read_entries(source)?;
    let mut replaced: HashMap<String, String> = HashMap::new();
    let mut dropped: Vec<String> = Vec::new();
    let mut summary = PatchSummary::default();

    let edited: Vec<&SheetEdits<'_>> = sheets.iter().filter(|s| !s.cells.is_empty()).collect();
    if edited.is_empty() {
        write_entries(target, &entries, &replaced, &dropped)?;
        return Ok(summary);
    }

    let mut styler = CellStyler {
        date_styles,
        date_xf: None,
        system,
    };
    let writes_dates = edited
        .iter()
        .flat_map(|s| s.cells.values())
        .any(|v| matches!(v, CellValue::DateTime(_) | CellValue::Timestamp(_)));
    if let (true, Some(styles)) = (writes_dates, &parts.styles) {
        let (xml, first) = append_date_styles(&part_text(&entries, styles)?, date_styles.len())?;
        if first.is_some() {
            styler.date_xf = first;
            summary.date_styles_added = true;
            replaced.insert(styles.clone(), xml);
        }
    }

    let mut formulas_removed = false;
    for sheet in edited {
        let patched = patch_worksheet(&part_text(&entries, sheet.part)?, sheet.cells, &styler)
            .map_err(|e| TabError::WriteError(format!("{}: {}", sheet.part, e)))?;
        formulas_removed |= patched.formulas_removed;
        replaced.insert(sheet.part.to_string(), patched.xml);
    }

    // cached results of dependent formulas are stale now
    let workbook = request_full_calc(&part_text(&entries, WORKBOOK_PART)?)?;
    replaced.insert(WORKBOOK_PART.to_string(), workbook);

    if let (true, Some(chain)) = (formulas_removed, &parts.calc_chain) {
        log::debug!("dropping {} after overwriting formula cells", chain);
        let suffix = format!("/{}", REL_CALC_CHAIN);
        let rels = drop_elements(&part_text(&entries, WORKBOOK_RELS_PART)?, b"Relationship", |e| {
            Ok(attr(e, b"Type")?.is_some_and(|t| t.ends_with(&suffix)))
        })?;
        replaced.insert(WORKBOOK_RELS_PART.to_string(), rels);

        let part_name = format!("/{}", chain);
        let types = drop_elements(&part_text(&entries, CONTENT_TYPES_PART)?, b"Override", |e| {
            Ok(attr(e, b"PartName")?.as_deref() == Some(part_name.as_str()))
        })?;
        replaced.insert(CONTENT_TYPES_PART.to_string(), types);

        dropped.push(chain.clone());
        summary.calc_chain_dropped = true;
    }

    write_entries(target, &entries, &replaced, &dropped)?;
    Ok(summary)
}

fn read_entries(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let read_err = |e: s_zip::SZipError| TabError::ReadError(format!("{}: {}", path.display(), e));
    let mut archive = StreamingZipReader::open(path).map_err(read_err)?;
    let listing = archive.entries().to_vec();
    let mut entries = Vec::with_capacity(listing.len());
    for entry in listing.iter().filter(|e| !e.name.ends_with('/')) {
        let data = archive.read_entry(entry).map_err(read_err)?;
        entries.push((entry.name.clone(), data));
    }
    Ok(entries)
}

fn part_text(entries: &[(String, Vec<u8>)], name: &str) -> Result<String> {
    entries
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, data)| String::from_utf8_lossy(data).into_owned())
        .ok_or_else(|| TabError::WriteError(format!("package has no part {}", name)))
}

fn write_entries(
    target: &Path,
    entries: &[(String, Vec<u8>)],
    replaced: &HashMap<String, String>,
    dropped: &[String],
) -> Result<()> {
    let write_err = |e: s_zip::SZipError| TabError::WriteError(format!("{}: {}", target.display(), e));
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = tempfile::Builder::new().prefix(".formtab-").tempfile_in(dir)?;

    let mut zip = StreamingZipWriter::new(temp.path()).map_err(write_err)?;
    for (name, data) in entries {
        if dropped.contains(name) {
            continue;
        }
        let data = replaced.get(name).map(|s| s.as_bytes()).unwrap_or(data);
        zip.start_entry(name).map_err(write_err)?;
        zip.write_data(data).map_err(write_err)?;
    }
    zip.finish().map_err(write_err)?;

    temp.persist(target).map_err(|e| TabError::IoError(e.error))?;
    Ok(())
}

fn into_string(writer: Writer<Vec<u8>>) -> Result<String> {
    String::from_utf8(writer.into_inner())
        .map_err(|e| TabError::WriteError(format!("patched part is not UTF-8: {}", e)))
}

fn prefix_of(name: QName<'_>) -> Option<String> {
    name.prefix()
        .map(|p| String::from_utf8_lossy(p.into_inner()).into_owned())
}

fn qualified(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(p) => format!("{}:{}", p, local),
        None => local.to_string(),
    }
}

/// Copy of an element without the attributes named in `drop`
fn rebuild(e: &BytesStart<'_>, drop: &[&str]) -> Result<BytesStart<'static>> {
    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for a in e.attributes() {
        let a = a?;
        if !drop.iter().any(|d| a.key.as_ref() == d.as_bytes()) {
            out.push_attribute(a);
        }
    }
    Ok(out)
}

/// Remove every `local` element (with its content) accepted by `matches`
fn drop_elements(
    xml: &str,
    local: &[u8],
    mut matches: impl FnMut(&BytesStart<'_>) -> Result<bool>,
) -> Result<String> {
    let mut reader = reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    loop {
        let event = reader.read_event()?;
        let skip = match &event {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => e.local_name().as_ref() == local && matches(e)?,
            _ => false,
        };
        if !skip {
            writer.write_event(event)?;
        } else if let Event::Start(e) = &event {
            reader.read_to_end(e.name())?;
        }
    }
    into_string(writer)
}

/// Append the date and date-time cell styles to `cellXfs`
///
/// Returns the index of the first appended style, or `None` when the part
/// has no `cellXfs` to extend.
fn append_date_styles(xml: &str, existing: usize) -> Result<(String, Option<u32>)> {
    let first = u32::try_from(existing)
        .map_err(|_| TabError::WriteError("too many cell styles".to_string()))?;
    let count = (existing + DATE_FORMATS.len()).to_string();
    let mut reader = reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 256));
    let mut appended = false;

    let write_xfs = |writer: &mut Writer<Vec<u8>>, prefix: Option<&str>| -> Result<()> {
        for format in DATE_FORMATS {
            let mut xf = BytesStart::new(qualified(prefix, "xf"));
            xf.push_attribute(("numFmtId", format));
            for key in ["fontId", "fillId", "borderId", "xfId"] {
                xf.push_attribute((key, "0"));
            }
            xf.push_attribute(("applyNumberFormat", "1"));
            writer.write_event(Event::Empty(xf))?;
        }
        Ok(())
    };

    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"cellXfs" => {
                let mut tag = rebuild(e, &["count"])?;
                tag.push_attribute(("count", count.as_str()));
                if matches!(event, Event::Empty(_)) {
                    let end = tag.to_end().into_owned();
                    writer.write_event(Event::Start(tag))?;
                    write_xfs(&mut writer, prefix_of(e.name()).as_deref())?;
                    writer.write_event(Event::End(end))?;
                    appended = true;
                } else {
                    writer.write_event(Event::Start(tag))?;
                }
                continue;
            }
            Event::End(e) if e.local_name().as_ref() == b"cellXfs" => {
                write_xfs(&mut writer, prefix_of(e.name()).as_deref())?;
                appended = true;
            }
            _ => {}
        }
        writer.write_event(event)?;
    }
    Ok((into_string(writer)?, appended.then_some(first)))
}

/// Children of `<workbook>` that follow `<calcPr>`
const AFTER_CALC_PR: [&[u8]; 9] = [
    b"oleSize",
    b"customWorkbookViews",
    b"pivotCaches",
    b"smartTagPr",
    b"smartTagTypes",
    b"webPublishing",
    b"fileRecoveryPr",
    b"webPublishObjects",
    b"extLst",
];

/// Ask the application to recalculate every formula on the next load
pub(crate) fn request_full_calc(xml: &str) -> Result<String> {
    let mut reader = reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 64));
    let mut depth = 0usize;
    let mut prefix: Option<String> = None;
    let mut done = false;

    let calc_pr = |prefix: Option<&str>| {
        let mut tag = BytesStart::new(qualified(prefix, "calcPr"));
        tag.push_attribute(("fullCalcOnLoad", "1"));
        tag
    };

    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                let opens = matches!(event, Event::Start(_));
                if depth == 0 {
                    prefix = prefix_of(e.name());
                } else if depth == 1 && !done {
                    let local = e.local_name();
                    if local.as_ref() == b"calcPr" {
                        done = true;
                        let mut tag = rebuild(e, &["fullCalcOnLoad"])?;
                        tag.push_attribute(("fullCalcOnLoad", "1"));
                        writer.write_event(if opens { Event::Start(tag) } else { Event::Empty(tag) })?;
                        if opens {
                            depth += 1;
                        }
                        continue;
                    }
                    if AFTER_CALC_PR.contains(&local.as_ref()) {
                        done = true;
                        writer.write_event(Event::Empty(calc_pr(prefix.as_deref())))?;
                    }
                }
                if opens {
                    depth += 1;
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 && !done {
                    done = true;
                    writer.write_event(Event::Empty(calc_pr(prefix.as_deref())))?;
                }
            }
            _ => {}
        }
        writer.write_event(event)?;
    }
    into_string(writer)
}

/// Style decisions for rewritten cells
pub(crate) struct CellStyler<'a> {
    /// Whether each existing `cellXfs` entry is a date format
    pub date_styles: &'a [bool],
    /// Index of the appended date style; the date-time style follows it
    pub date_xf: Option<u32>,
    pub system: DateSystem,
}

enum Encoded {
    Blank,
    Value {
        kind: Option<&'static str>,
        text: String,
    },
    Inline(String),
}

fn number(value: f64) -> Encoded {
    if value.is_finite() {
        Encoded::Value {
            kind: None,
            text: value.to_string(),
        }
    } else {
        Encoded::Value {
            kind: Some("e"),
            text: "#NUM!".to_string(),
        }
    }
}

fn iso(t: NaiveDateTime) -> String {
    t.format("%Y-%m-%dT%H:%M:%S").to_string()
}

impl CellStyler<'_> {
    fn is_date_style(&self, style: u32) -> bool {
        self.date_styles.get(style as usize).copied().unwrap_or(false)
            || self.date_xf.is_some_and(|d| style == d || style == d + 1)
    }

    /// Style of a value written over a cell styled `existing`
    fn style_for(&self, value: &CellValue, existing: Option<u32>) -> Option<u32> {
        let whole_day = match value {
            CellValue::DateTime(serial) => serial.fract() == 0.0,
            CellValue::Timestamp(t) => t.time() == NaiveTime::MIN,
            _ => return existing,
        };
        if existing.is_some_and(|s| self.is_date_style(s)) {
            return existing;
        }
        match self.date_xf {
            Some(date) if whole_day => Some(date),
            Some(date) => Some(date + 1),
            None => existing,
        }
    }

    fn encode(&self, value: &CellValue, style: Option<u32>) -> Encoded {
        let dated = style.is_some_and(|s| self.is_date_style(s));
        match value {
            CellValue::Empty => Encoded::Blank,
            CellValue::String(s) => Encoded::Inline(s.clone()),
            CellValue::Int(i) => Encoded::Value {
                kind: None,
                text: itoa::Buffer::new().format(*i).to_string(),
            },
            CellValue::Float(f) => number(*f),
            CellValue::Bool(b) => Encoded::Value {
                kind: Some("b"),
                text: if *b { "1" } else { "0" }.to_string(),
            },
            CellValue::Error(code) => Encoded::Value {
                kind: Some("e"),
                text: code.clone(),
            },
            CellValue::DateTime(serial) if dated => number(*serial),
            // no date style to show a serial with: store an ISO date instead
            CellValue::DateTime(serial) => match serial_to_datetime(*serial, self.system) {
                Some(t) => Encoded::Value {
                    kind: Some("d"),
                    text: iso(t),
                },
                None => number(*serial),
            },
            CellValue::Timestamp(t) => match datetime_to_serial(*t, self.system) {
                Some(serial) if dated => number(serial),
                Some(_) => Encoded::Value {
                    kind: Some("d"),
                    text: iso(*t),
                },
                None => Encoded::Inline(iso(*t)),
            },
        }
    }
}

/// A rewritten worksheet part
pub(crate) struct PatchedSheet {
    pub xml: String,
    /// An overwritten cell held a formula
    pub formulas_removed: bool,
}

/// Column to value, for one row
type RowEdits = BTreeMap<u32, CellValue>;

/// Apply `edits` to a worksheet part, leaving every other element as it was
///
/// Edited cells keep their style unless a date needs a date format. Writing
/// [`CellValue::Empty`] over a styled cell keeps the styled, empty cell.
pub(crate) fn patch_worksheet(
    xml: &str,
    edits: &Cells,
    styler: &CellStyler<'_>,
) -> Result<PatchedSheet> {
    let mut rows: BTreeMap<u32, RowEdits> = BTreeMap::new();
    for (coord, value) in edits {
        rows.entry(coord.row)
            .or_default()
            .insert(coord.col, value.clone());
    }

    let mut patcher = SheetPatcher {
        writer: Writer::new(Vec::with_capacity(xml.len() + 256)),
        styler,
        rows,
        bounds: written_bounds(edits),
        prefix: None,
        row: None,
        in_sheet_data: false,
        saw_sheet_data: false,
        in_cell: false,
        next_row: 0,
        next_col: 0,
        formulas_removed: false,
    };

    let mut reader = reader(xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) => patcher.start(e, false, &mut reader)?,
            Event::Empty(e) => patcher.start(e, true, &mut reader)?,
            Event::End(e) => patcher.end(e)?,
            Event::Eof => break,
            other => patcher.emit(other)?,
        }
    }

    if !patcher.saw_sheet_data {
        return Err(TabError::WriteError(
            "worksheet has no <sheetData>".to_string(),
        ));
    }
    Ok(PatchedSheet {
        formulas_removed: patcher.formulas_removed,
        xml: into_string(patcher.writer)?,
    })
}

fn written_bounds(edits: &Cells) -> Option<CellSpan> {
    edits
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(coord, _)| CellSpan::new(*coord, *coord))
        .reduce(union)
}

fn union(a: CellSpan, b: CellSpan) -> CellSpan {
    CellSpan::new(
        CellCoord::new(a.start.row.min(b.start.row), a.start.col.min(b.start.col)),
        CellCoord::new(a.end.row.max(b.end.row), a.end.col.max(b.end.col)),
    )
}

struct SheetPatcher<'s> {
    writer: Writer<Vec<u8>>,
    styler: &'s CellStyler<'s>,
    /// Edits of rows not reached yet
    rows: BTreeMap<u32, RowEdits>,
    bounds: Option<CellSpan>,
    /// Namespace prefix of `<sheetData>`, reused for inserted elements
    prefix: Option<String>,
    /// Row being patched and its edits not written yet
    row: Option<(u32, RowEdits)>,
    in_sheet_data: bool,
    saw_sheet_data: bool,
    in_cell: bool,
    next_row: u32,
    next_col: u32,
    formulas_removed: bool,
}

impl SheetPatcher<'_> {
    fn emit(&mut self, event: Event<'_>) -> Result<()> {
        self.writer.write_event(event)?;
        Ok(())
    }

    fn open(&mut self, e: BytesStart<'_>, empty: bool) -> Result<()> {
        self.emit(if empty { Event::Empty(e) } else { Event::Start(e) })
    }

    fn tag(&self, local: &str) -> String {
        qualified(self.prefix.as_deref(), local)
    }

    fn start(&mut self, e: BytesStart<'_>, empty: bool, reader: &mut Reader<&[u8]>) -> Result<()> {
        match e.local_name().as_ref() {
            b"dimension" => {
                let tag = self.widen_dimension(&e)?;
                self.open(tag, empty)
            }
            b"sheetData" => {
                self.saw_sheet_data = true;
                self.prefix = prefix_of(e.name());
                if !empty {
                    self.in_sheet_data = true;
                    return self.open(e, false);
                }
                if self.rows.is_empty() {
                    return self.open(e, true);
                }
                let end = e.to_end().into_owned();
                self.open(e, false)?;
                self.flush_rows(u32::MAX)?;
                self.emit(Event::End(end))
            }
            b"row" if self.in_sheet_data => self.start_row(e, empty),
            b"c" if self.row.is_some() && !self.in_cell => self.start_cell(e, empty, reader),
            _ => {
                if self.row.is_some() && !self.in_cell {
                    // cells precede any other child of a row
                    self.flush_cells(u32::MAX)?;
                }
                self.open(e, empty)
            }
        }
    }

    fn end(&mut self, e: BytesEnd<'_>) -> Result<()> {
        match e.local_name().as_ref() {
            b"c" => self.in_cell = false,
            b"row" if self.in_sheet_data => {
                self.flush_cells(u32::MAX)?;
                self.row = None;
            }
            b"sheetData" => {
                self.flush_rows(u32::MAX)?;
                self.in_sheet_data = false;
            }
            _ => {}
        }
        self.emit(Event::End(e))
    }

    fn start_row(&mut self, e: BytesStart<'_>, empty: bool) -> Result<()> {
        let r = attr(&e, b"r")?;
        let index = match &r {
            Some(r) => row_index(r)?,
            None => self.next_row,
        };
        self.next_row = index + 1;
        self.next_col = 0;
        self.flush_rows(index)?;

        let number = (index + 1).to_string();
        let Some(cells) = self.rows.remove(&index) else {
            if r.is_some() {
                return self.open(e, empty);
            }
            // an inserted row would shift the implicit numbering
            let mut tag = rebuild(&e, &[])?;
            tag.push_attribute(("r", number.as_str()));
            return self.open(tag, empty);
        };

        let mut tag = rebuild(&e, &["spans"])?;
        if r.is_none() {
            tag.push_attribute(("r", number.as_str()));
        }
        if empty {
            let end = tag.to_end().into_owned();
            self.open(tag, false)?;
            for (col, value) in cells {
                self.write_cell(CellCoord::new(index, col), &value, None)?;
            }
            return self.emit(Event::End(end));
        }
        self.open(tag, false)?;
        self.row = Some((index, cells));
        Ok(())
    }

    fn start_cell(&mut self, e: BytesStart<'_>, empty: bool, reader: &mut Reader<&[u8]>) -> Result<()> {
        let Some(row) = self.row.as_ref().map(|(row, _)| *row) else {
            return self.open(e, empty);
        };
        let coord = cell_position(&e, row, self.next_col)?;
        self.next_col = coord.col + 1;
        self.flush_cells(coord.col)?;

        let edit = self
            .row
            .as_mut()
            .and_then(|(_, cells)| cells.remove(&coord.col));
        match edit {
            Some(value) => {
                if !empty && skip_cell(reader)? {
                    self.formulas_removed = true;
                }
                let style = attr(&e, b"s")?.and_then(|s| s.trim().parse().ok());
                self.write_cell(coord, &value, style)
            }
            None => {
                self.in_cell = !empty;
                if attr(&e, b"r")?.is_some() {
                    return self.open(e, empty);
                }
                let mut tag = rebuild(&e, &[])?;
                tag.push_attribute(("r", coord.to_a1().as_str()));
                self.open(tag, empty)
            }
        }
    }

    /// Write the pending rows that come before row `before`
    fn flush_rows(&mut self, before: u32) -> Result<()> {
        while let Some(entry) = self.rows.first_entry() {
            if *entry.key() >= before {
                break;
            }
            let (index, cells) = entry.remove_entry();
            self.write_new_row(index, cells)?;
        }
        Ok(())
    }

    /// Write the current row's pending cells left of column `before`
    fn flush_cells(&mut self, before: u32) -> Result<()> {
        let Some((row, cells)) = self.row.as_mut() else {
            return Ok(());
        };
        let row = *row;
        let mut due = cells.split_off(&before);
        std::mem::swap(cells, &mut due);
        for (col, value) in due {
            self.write_cell(CellCoord::new(row, col), &value, None)?;
        }
        Ok(())
    }

    fn write_new_row(&mut self, index: u32, cells: RowEdits) -> Result<()> {
        if cells.values().all(CellValue::is_empty) {
            return Ok(());
        }
        let name = self.tag("row");
        let mut row = BytesStart::new(name.clone());
        row.push_attribute(("r", (index + 1).to_string().as_str()));
        self.emit(Event::Start(row))?;
        for (col, value) in cells {
            self.write_cell(CellCoord::new(index, col), &value, None)?;
        }
        self.emit(Event::End(BytesEnd::new(name)))
    }

    fn write_cell(&mut self, coord: CellCoord, value: &CellValue, existing: Option<u32>) -> Result<()> {
        let style = self.styler.style_for(value, existing);
        let encoded = self.styler.encode(value, style);
        if matches!(encoded, Encoded::Blank) && style.is_none() {
            return Ok(());
        }

        let name = self.tag("c");
        let mut c = BytesStart::new(name.clone());
        c.push_attribute(("r", coord.to_a1().as_str()));
        if let Some(s) = style {
            c.push_attribute(("s", itoa::Buffer::new().format(s)));
        }
        match encoded {
            Encoded::Blank => return self.emit(Event::Empty(c)),
            Encoded::Value { kind, text } => {
                if let Some(t) = kind {
                    c.push_attribute(("t", t));
                }
                self.emit(Event::Start(c))?;
                self.text_element("v", &text, false)?;
            }
            Encoded::Inline(text) => {
                c.push_attribute(("t", "inlineStr"));
                self.emit(Event::Start(c))?;
                let is = self.tag("is");
                self.emit(Event::Start(BytesStart::new(is.clone())))?;
                self.text_element("t", &text, needs_space_preserve(&text))?;
                self.emit(Event::End(BytesEnd::new(is)))?;
            }
        }
        self.emit(Event::End(BytesEnd::new(name)))
    }

    fn text_element(&mut self, local: &str, text: &str, preserve: bool) -> Result<()> {
        let name = self.tag(local);
        let mut start = BytesStart::new(name.clone());
        if preserve {
            start.push_attribute(("xml:space", "preserve"));
        }
        self.emit(Event::Start(start))?;
        self.emit(Event::Text(BytesText::new(text)))?;
        self.emit(Event::End(BytesEnd::new(name)))
    }

    fn widen_dimension(&self, e: &BytesStart<'_>) -> Result<BytesStart<'static>> {
        let Some(bounds) = self.bounds else {
            return Ok(e.clone().into_owned());
        };
        let current = attr(e, b"ref")?
            .and_then(|r| parse_reference(&r).ok())
            .map(|r| match r {
                Reference::Cell(c) => CellSpan::new(c, c),
                Reference::Range(span) => span,
            });
        let span = current.map_or(bounds, |c| union(c, bounds));
        let text = if span.start == span.end {
            span.start.to_a1()
        } else {
            span.to_string()
        };
        let mut tag = rebuild(e, &["ref"])?;
        tag.push_attribute(("ref", text.as_str()));
        Ok(tag)
    }
}

/// Consume the children of a `<c>` up to its end tag; true if it held a formula
fn skip_cell(reader: &mut Reader<&[u8]>) -> Result<bool> {
    let mut depth = 0usize;
    let mut formula = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                formula |= e.local_name().as_ref() == b"f";
                depth += 1;
            }
            Event::Empty(e) => formula |= e.local_name().as_ref() == b"f",
            Event::End(_) if depth == 0 => return Ok(formula),
            Event::End(_) => depth -= 1,
            Event::Eof => {
                return Err(TabError::ReadError(
                    "unexpected end of document inside <c>".to_string(),
                ))
            }
            _ => {}
        }
    }
}

fn needs_space_preserve(s: &str) -> bool {
    s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace) || s.contains('\n')
}
