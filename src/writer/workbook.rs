//! Workbook writer producing a complete xlsx package

use super::shared_strings::SharedStrings;
use super::xml_writer::XmlWriter;
use crate::error::{Result, TabError};
use crate::normalize::datetime_to_serial;
use crate::reference::{CellCoord, CellSpan};
use crate::types::{CellValue, DateSystem};
use chrono::{NaiveTime, Utc};
use s_zip::StreamingZipWriter;
use std::path::{Path, PathBuf};

/// `cellXfs` index of the short date style (numFmtId 14)
const STYLE_DATE: i64 = 1;
/// `cellXfs` index of the date-time style (numFmtId 22)
const STYLE_DATETIME: i64 = 2;

const MAX_SHEET_NAME_LEN: usize = 31;

struct SheetPart {
    name: String,
    xml: Vec<u8>,
}

struct SheetBuffer {
    name: String,
    rows: XmlWriter<Vec<u8>>,
    last: Option<CellCoord>,
    open_row: Option<u32>,
    next_row: u32,
    extent: Option<CellSpan>,
}

/// Writer for xlsx workbooks with typed cells
///
/// Cells are written sheet by sheet in row-major order. Dates are stored as
/// serials with a date number format so every reader recognizes them again.
/// Nothing touches the disk until [`close`](WorkbookWriter::close).
///
/// # Examples
///
/// ```no_run
/// use formtab::writer::WorkbookWriter;
/// use formtab::types::CellValue;
///
/// let mut workbook = WorkbookWriter::new("form.xlsx");
/// workbook.add_worksheet("Sheet1")?;
/// workbook.write_row(&["Name".into(), "John Doe".into()])?;
/// workbook.write_row(&["Age".into(), CellValue::Int(33)])?;
/// workbook.close()?;
/// # Ok::<(), formtab::TabError>(())
/// ```
pub struct WorkbookWriter {
    path: PathBuf,
    date_system: DateSystem,
    shared_strings: SharedStrings,
    sheets: Vec<SheetPart>,
    current: Option<SheetBuffer>,
}

impl WorkbookWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        WorkbookWriter {
            path: path.as_ref().to_path_buf(),
            date_system: DateSystem::V1900,
            shared_strings: SharedStrings::new(),
            sheets: Vec::new(),
            current: None,
        }
    }

    /// Date system recorded in the workbook and used to encode dates
    pub fn set_date_system(&mut self, system: DateSystem) {
        self.date_system = system;
    }

    /// Start a new worksheet; the previous one is finished
    pub fn add_worksheet(&mut self, name: &str) -> Result<()> {
        validate_sheet_name(name)?;
        let taken = self
            .sheets
            .iter()
            .map(|s| s.name.as_str())
            .chain(self.current.as_ref().map(|s| s.name.as_str()))
            .any(|existing| existing.eq_ignore_ascii_case(name));
        if taken {
            return Err(TabError::WriteError(format!(
                "duplicate sheet name '{}'",
                name
            )));
        }

        self.finish_current_worksheet()?;
        self.current = Some(SheetBuffer {
            name: name.to_string(),
            rows: XmlWriter::new(Vec::new()),
            last: None,
            open_row: None,
            next_row: 0,
            extent: None,
        });
        Ok(())
    }

    /// Write values into the next row, starting at column A
    pub fn write_row(&mut self, values: &[CellValue]) -> Result<()> {
        let row = self.sheet()?.next_row;
        for (col, value) in values.iter().enumerate() {
            self.write_cell(CellCoord::new(row, col as u32), value)?;
        }
        self.sheet()?.next_row = row + 1;
        Ok(())
    }

    /// Write one cell; cells must arrive in row-major order
    ///
    /// Empty values are skipped.
    pub fn write_cell(&mut self, coord: CellCoord, value: &CellValue) -> Result<()> {
        let system = self.date_system;
        let sheet = self
            .current
            .as_mut()
            .ok_or_else(|| TabError::WriteError("no active worksheet".to_string()))?;

        if sheet.last.is_some_and(|last| coord <= last) {
            return Err(TabError::WriteError(format!(
                "cell {} written out of order",
                coord
            )));
        }
        if matches!(value, CellValue::Empty) {
            return Ok(());
        }

        if sheet.open_row != Some(coord.row) {
            if sheet.open_row.is_some() {
                sheet.rows.end_element("row")?;
            }
            sheet.rows.start_element("row")?;
            sheet.rows.attribute_int("r", coord.row as i64 + 1)?;
            sheet.rows.close_start_tag()?;
            sheet.open_row = Some(coord.row);
        }

        write_cell_xml(&mut sheet.rows, &mut self.shared_strings, system, coord, value)?;

        sheet.last = Some(coord);
        sheet.next_row = sheet.next_row.max(coord.row + 1);
        sheet.extent = Some(match sheet.extent {
            None => CellSpan::new(coord, coord),
            Some(span) => CellSpan::new(
                CellCoord::new(span.start.row.min(coord.row), span.start.col.min(coord.col)),
                CellCoord::new(span.end.row.max(coord.row), span.end.col.max(coord.col)),
            ),
        });
        Ok(())
    }

    fn sheet(&mut self) -> Result<&mut SheetBuffer> {
        self.current
            .as_mut()
            .ok_or_else(|| TabError::WriteError("no active worksheet".to_string()))
    }

    fn finish_current_worksheet(&mut self) -> Result<()> {
        let Some(mut sheet) = self.current.take() else {
            return Ok(());
        };
        if sheet.open_row.is_some() {
            sheet.rows.end_element("row")?;
        }
        let rows = sheet.rows.into_inner()?;

        let mut xml = XmlWriter::new(Vec::with_capacity(rows.len() + 512));
        xml.write_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n")?;
        xml.start_element("worksheet")?;
        xml.attribute(
            "xmlns",
            "http://schemas.openxmlformats.org/spreadsheetml/2006/main",
        )?;
        xml.attribute(
            "xmlns:r",
            "http://schemas.openxmlformats.org/officeDocument/2006/relationships",
        )?;
        xml.close_start_tag()?;

        xml.start_element("dimension")?;
        match sheet.extent {
            Some(span) if span.start == span.end => xml.attribute("ref", &span.start.to_a1())?,
            Some(span) => xml.attribute("ref", &span.to_string())?,
            None => xml.attribute("ref", "A1")?,
        }
        xml.close_empty_tag()?;

        xml.start_element("sheetData")?;
        xml.close_start_tag()?;
        xml.write_raw(&rows)?;
        xml.end_element("sheetData")?;
        xml.end_element("worksheet")?;

        self.sheets.push(SheetPart {
            name: sheet.name,
            xml: xml.into_inner()?,
        });
        Ok(())
    }

    /// Assemble the package and write it to disk
    pub fn close(mut self) -> Result<()> {
        self.finish_current_worksheet()?;
        if self.sheets.is_empty() {
            self.add_worksheet("Sheet1")?;
            self.finish_current_worksheet()?;
        }

        let content_types = self.content_types_xml()?;
        let workbook = self.workbook_xml()?;
        let workbook_rels = self.workbook_rels_xml()?;
        let mut strings = XmlWriter::new(Vec::new());
        self.shared_strings.write_xml(&mut strings)?;
        let strings = strings.into_inner()?;

        let mut zip = StreamingZipWriter::new(&self.path)
            .map_err(|e| TabError::WriteError(format!("{}: {}", self.path.display(), e)))?;
        let mut put = |name: &str, data: &[u8]| -> Result<()> {
            zip.start_entry(name)
                .map_err(|e| TabError::WriteError(format!("{}: {}", name, e)))?;
            zip.write_data(data)
                .map_err(|e| TabError::WriteError(format!("{}: {}", name, e)))?;
            Ok(())
        };

        put("[Content_Types].xml", &content_types)?;
        put("_rels/.rels", ROOT_RELS.as_bytes())?;
        put("docProps/core.xml", core_props_xml().as_bytes())?;
        put("docProps/app.xml", APP_PROPS.as_bytes())?;
        put("xl/workbook.xml", &workbook)?;
        put("xl/_rels/workbook.xml.rels", &workbook_rels)?;
        put("xl/styles.xml", STYLES.as_bytes())?;
        put("xl/sharedStrings.xml", &strings)?;
        for (i, sheet) in self.sheets.iter().enumerate() {
            put(&format!("xl/worksheets/sheet{}.xml", i + 1), &sheet.xml)?;
        }

        zip.finish()
            .map_err(|e| TabError::WriteError(format!("{}: {}", self.path.display(), e)))?;
        log::debug!(
            "wrote {} ({} sheets, {} shared strings)",
            self.path.display(),
            self.sheets.len(),
            self.shared_strings.count()
        );
        Ok(())
    }

    fn content_types_xml(&self) -> Result<Vec<u8>> {
        let mut xml = XmlWriter::new(Vec::new());
        xml.write_str(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
"#,
        )?;
        for i in 1..=self.sheets.len() {
            xml.start_element("Override")?;
            xml.attribute("PartName", &format!("/xl/worksheets/sheet{}.xml", i))?;
            xml.attribute(
                "ContentType",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml",
            )?;
            xml.close_empty_tag()?;
            xml.write_str("\n")?;
        }
        xml.write_str(
            r#"<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>
<Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>
<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>
<Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/>
</Types>"#,
        )?;
        xml.into_inner()
    }

    fn workbook_xml(&self) -> Result<Vec<u8>> {
        let mut xml = XmlWriter::new(Vec::new());
        xml.write_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n")?;
        xml.start_element("workbook")?;
        xml.attribute(
            "xmlns",
            "http://schemas.openxmlformats.org/spreadsheetml/2006/main",
        )?;
        xml.attribute(
            "xmlns:r",
            "http://schemas.openxmlformats.org/officeDocument/2006/relationships",
        )?;
        xml.close_start_tag()?;

        if self.date_system == DateSystem::V1904 {
            xml.start_element("workbookPr")?;
            xml.attribute("date1904", "1")?;
            xml.close_empty_tag()?;
        }

        xml.start_element("sheets")?;
        xml.close_start_tag()?;
        for (i, sheet) in self.sheets.iter().enumerate() {
            let sheet_id = i + 1;
            xml.start_element("sheet")?;
            xml.attribute("name", &sheet.name)?;
            xml.attribute_int("sheetId", sheet_id as i64)?;
            xml.attribute("r:id", &format!("rId{}", sheet_id))?;
            xml.close_empty_tag()?;
        }
        xml.end_element("sheets")?;
        xml.end_element("workbook")?;
        xml.into_inner()
    }

    fn workbook_rels_xml(&self) -> Result<Vec<u8>> {
        let mut xml = XmlWriter::new(Vec::new());
        xml.write_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n")?;
        xml.start_element("Relationships")?;
        xml.attribute(
            "xmlns",
            "http://schemas.openxmlformats.org/package/2006/relationships",
        )?;
        xml.close_start_tag()?;

        let count = self.sheets.len();
        for rid in 1..=count {
            xml.start_element("Relationship")?;
            xml.attribute("Id", &format!("rId{}", rid))?;
            xml.attribute(
                "Type",
                "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet",
            )?;
            xml.attribute("Target", &format!("worksheets/sheet{}.xml", rid))?;
            xml.close_empty_tag()?;
        }

        xml.start_element("Relationship")?;
        xml.attribute("Id", &format!("rId{}", count + 1))?;
        xml.attribute(
            "Type",
            "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles",
        )?;
        xml.attribute("Target", "styles.xml")?;
        xml.close_empty_tag()?;

        xml.start_element("Relationship")?;
        xml.attribute("Id", &format!("rId{}", count + 2))?;
        xml.attribute(
            "Type",
            "http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings",
        )?;
        xml.attribute("Target", "sharedStrings.xml")?;
        xml.close_empty_tag()?;

        xml.end_element("Relationships")?;
        xml.into_inner()
    }
}

fn write_cell_xml(
    xml: &mut XmlWriter<Vec<u8>>,
    strings: &mut SharedStrings,
    system: DateSystem,
    coord: CellCoord,
    value: &CellValue,
) -> Result<()> {
    let mut buf = itoa::Buffer::new();
    xml.start_element("c")?;
    xml.attribute("r", &coord.to_a1())?;

    match value {
        CellValue::Empty => {}
        CellValue::String(s) => {
            let index = strings.add_string(s);
            xml.attribute("t", "s")?;
            xml.close_start_tag()?;
            xml.write_raw(b"<v>")?;
            xml.write_str(buf.format(index))?;
            xml.write_raw(b"</v>")?;
        }
        CellValue::Int(i) => {
            xml.close_start_tag()?;
            xml.write_raw(b"<v>")?;
            xml.write_str(buf.format(*i))?;
            xml.write_raw(b"</v>")?;
        }
        CellValue::Float(f) => write_number(xml, *f, None)?,
        CellValue::Bool(b) => {
            xml.attribute("t", "b")?;
            xml.close_start_tag()?;
            xml.write_raw(if *b { b"<v>1</v>" } else { b"<v>0</v>" })?;
        }
        CellValue::DateTime(serial) => {
            let style = if serial.fract() == 0.0 { STYLE_DATE } else { STYLE_DATETIME };
            write_number(xml, *serial, Some(style))?;
        }
        CellValue::Timestamp(t) => match datetime_to_serial(*t, system) {
            Some(serial) => {
                let style = if t.time() == NaiveTime::MIN { STYLE_DATE } else { STYLE_DATETIME };
                write_number(xml, serial, Some(style))?;
            }
            None => {
                // before the epoch: keep it readable as text
                let index = strings.add_string(&t.format("%Y-%m-%dT%H:%M:%S").to_string());
                xml.attribute("t", "s")?;
                xml.close_start_tag()?;
                xml.write_raw(b"<v>")?;
                xml.write_str(buf.format(index))?;
                xml.write_raw(b"</v>")?;
            }
        },
        CellValue::Error(code) => {
            xml.attribute("t", "e")?;
            xml.close_start_tag()?;
            xml.text_element("v", code)?;
        }
    }

    xml.end_element("c")
}

fn write_number(xml: &mut XmlWriter<Vec<u8>>, value: f64, style: Option<i64>) -> Result<()> {
    if let Some(style) = style {
        xml.attribute_int("s", style)?;
    }
    if !value.is_finite() {
        // no numeric representation; store the error Excel itself would show
        xml.attribute("t", "e")?;
        xml.close_start_tag()?;
        return xml.text_element("v", "#NUM!");
    }
    xml.close_start_tag()?;
    xml.write_raw(b"<v>")?;
    xml.write_str(&value.to_string())?;
    xml.write_raw(b"</v>")
}

fn validate_sheet_name(name: &str) -> Result<()> {
    const FORBIDDEN: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];
    if name.trim().is_empty() {
        return Err(TabError::WriteError("sheet name is empty".to_string()));
    }
    if name.chars().count() > MAX_SHEET_NAME_LEN {
        return Err(TabError::WriteError(format!(
            "sheet name '{}' is longer than {} characters",
            name, MAX_SHEET_NAME_LEN
        )));
    }
    if name.contains(FORBIDDEN) {
        return Err(TabError::WriteError(format!(
            "sheet name '{}' contains one of []:*?/\\",
            name
        )));
    }
    Ok(())
}

fn core_props_xml() -> String {
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<dc:creator>formtab</dc:creator>
<cp:lastModifiedBy>formtab</cp:lastModifiedBy>
<dcterms:created xsi:type="dcterms:W3CDTF">{now}</dcterms:created>
<dcterms:modified xsi:type="dcterms:W3CDTF">{now}</dcterms:modified>
</cp:coreProperties>"#
    )
}

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>
<Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties" Target="docProps/app.xml"/>
</Relationships>"#;

const APP_PROPS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties">
<Application>formtab</Application>
<DocSecurity>0</DocSecurity>
<ScaleCrop>false</ScaleCrop>
<LinksUpToDate>false</LinksUpToDate>
<SharedDoc>false</SharedDoc>
<HyperlinksChanged>false</HyperlinksChanged>
<AppVersion>1.0</AppVersion>
</Properties>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<fonts count="1">
<font><sz val="11"/><name val="Calibri"/></font>
</fonts>
<fills count="2">
<fill><patternFill patternType="none"/></fill>
<fill><patternFill patternType="gray125"/></fill>
</fills>
<borders count="1">
<border><left/><right/><top/><bottom/><diagonal/></border>
</borders>
<cellStyleXfs count="1">
<xf numFmtId="0" fontId="0" fillId="0" borderId="0"/>
</cellStyleXfs>
<cellXfs count="3">
<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>
<xf numFmtId="14" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>
<xf numFmtId="22" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>
</cellXfs>
</styleSheet>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn cell_xml(value: &CellValue) -> String {
        let mut xml = XmlWriter::new(Vec::new());
        let mut strings = SharedStrings::new();
        write_cell_xml(&mut xml, &mut strings, DateSystem::V1900, CellCoord::new(1, 2), value).unwrap();
        String::from_utf8(xml.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn test_cell_encoding() {
        assert_eq!(cell_xml(&CellValue::Int(33)), "<c r=\"C2\"><v>33</v></c>");
        assert_eq!(cell_xml(&CellValue::Float(1.5)), "<c r=\"C2\"><v>1.5</v></c>");
        assert_eq!(cell_xml(&"Age".into()), "<c r=\"C2\" t=\"s\"><v>0</v></c>");
        assert_eq!(cell_xml(&CellValue::Bool(true)), "<c r=\"C2\" t=\"b\"><v>1</v></c>");
        assert_eq!(
            cell_xml(&CellValue::Error("#DIV/0!".to_string())),
            "<c r=\"C2\" t=\"e\"><v>#DIV/0!</v></c>"
        );
        assert_eq!(cell_xml(&CellValue::Float(f64::NAN)), "<c r=\"C2\" t=\"e\"><v>#NUM!</v></c>");
    }

    #[test]
    fn test_dates_get_date_styles() {
        let date = NaiveDate::from_ymd_opt(2017, 1, 1).unwrap();
        assert_eq!(cell_xml(&date.into()), "<c r=\"C2\" s=\"1\"><v>42736</v></c>");
        let noon = date.and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(cell_xml(&noon.into()), "<c r=\"C2\" s=\"2\"><v>42736.5</v></c>");
    }

    #[test]
    fn test_dates_without_serial_become_text() {
        let eve = NaiveDate::from_ymd_opt(1899, 12, 31).unwrap();
        let mut xml = XmlWriter::new(Vec::new());
        let mut strings = SharedStrings::new();
        write_cell_xml(&mut xml, &mut strings, DateSystem::V1900, CellCoord::new(0, 0), &eve.into()).unwrap();
        let xml = String::from_utf8(xml.into_inner().unwrap()).unwrap();
        assert_eq!(xml, "<c r=\"A1\" t=\"s\"><v>0</v></c>");
        assert_eq!(strings.add_string("1899-12-31T00:00:00"), 0);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut workbook = WorkbookWriter::new("unused.xlsx");
        assert!(workbook.write_row(&[CellValue::Int(1)]).is_err());

        workbook.add_worksheet("Sheet1").unwrap();
        workbook.write_cell(CellCoord::new(3, 1), &CellValue::Int(1)).unwrap();
        assert!(workbook.write_cell(CellCoord::new(3, 0), &CellValue::Int(2)).is_err());
        assert!(workbook.write_cell(CellCoord::new(2, 5), &CellValue::Int(2)).is_err());
        workbook.write_cell(CellCoord::new(4, 0), &CellValue::Int(2)).unwrap();
    }

    #[test]
    fn test_sheet_names_validated() {
        let mut workbook = WorkbookWriter::new("unused.xlsx");
        workbook.add_worksheet("Data").unwrap();
        assert!(workbook.add_worksheet("data").is_err());
        assert!(workbook.add_worksheet("a/b").is_err());
        assert!(workbook.add_worksheet("").is_err());
        assert!(workbook.add_worksheet(&"x".repeat(32)).is_err());
    }

    #[test]
    fn test_close_writes_package() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.xlsx");

        let mut workbook = WorkbookWriter::new(&path);
        workbook.add_worksheet("Form")?;
        workbook.write_row(&["Name".into(), "John Doe".into()])?;
        workbook.add_worksheet("Other")?;
        workbook.close()?;

        assert!(path.exists());
        assert!(std::fs::metadata(&path)?.len() > 0);
        Ok(())
    }
}
