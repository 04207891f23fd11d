//! Parsing of the SpreadsheetML package parts
//!
//! Elements and attributes are matched on their local name, so documents
//! written with a namespace prefix (`<x:sheet>`) read like unprefixed ones.

use crate::error::{Result, TabError};
use crate::types::DateSystem;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

pub(crate) const WORKBOOK_PART: &str = "xl/workbook.xml";
pub(crate) const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
pub(crate) const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

pub(crate) const REL_STYLES: &str = "styles";
pub(crate) const REL_SHARED_STRINGS: &str = "sharedStrings";
pub(crate) const REL_CALC_CHAIN: &str = "calcChain";

/// Event reader over a whole part, keeping whitespace in text
pub(crate) fn reader(xml: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);
    reader
}

/// Unescaped value of the attribute with this local name
pub(crate) fn attr(e: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a?;
        if a.key.local_name().as_ref() == local {
            return Ok(Some(
                a.decode_and_unescape_value(&Reader::from_str(""))?
                    .into_owned(),
            ));
        }
    }
    Ok(None)
}

fn unexpected_eof(what: &str) -> TabError {
    TabError::ReadError(format!("unexpected end of document inside <{}>", what))
}

/// Text content up to the end of the element just started
pub(crate) fn read_text(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut text = String::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event()? {
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
            Event::Start(_) => depth += 1,
            Event::End(_) if depth == 0 => return Ok(text),
            Event::End(_) => depth -= 1,
            Event::Eof => return Err(unexpected_eof("v")),
            _ => {}
        }
    }
}

/// Visible text of a string item (`<si>` or `<is>`) just started
///
/// Runs are concatenated; phonetic hints (`<rPh>`) are skipped.
pub(crate) fn read_rich_text(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut text = String::new();
    let mut depth = 0usize;
    let mut in_t = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"rPh" => {
                    reader.read_to_end(e.name())?;
                }
                b"t" => {
                    in_t = true;
                    depth += 1;
                }
                _ => depth += 1,
            },
            Event::Text(t) if in_t => text.push_str(&t.unescape()?),
            Event::CData(c) if in_t => text.push_str(&String::from_utf8_lossy(&c)),
            Event::End(_) if depth == 0 => return Ok(text),
            Event::End(e) => {
                depth -= 1;
                if e.local_name().as_ref() == b"t" {
                    in_t = false;
                }
            }
            Event::Eof => return Err(unexpected_eof("si")),
            _ => {}
        }
    }
}

/// Sheet entry of `xl/workbook.xml`
#[derive(Debug, Clone)]
pub(crate) struct SheetEntry {
    pub name: String,
    pub rel_id: String,
}

/// What `xl/workbook.xml` says about the workbook
#[derive(Debug, Clone)]
pub(crate) struct WorkbookInfo {
    pub sheets: Vec<SheetEntry>,
    pub date_system: DateSystem,
}

pub(crate) fn parse_workbook(xml: &str) -> Result<WorkbookInfo> {
    let mut reader = reader(xml);
    let mut info = WorkbookInfo {
        sheets: Vec::new(),
        date_system: DateSystem::default(),
    };
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"workbookPr" => {
                    if matches!(attr(&e, b"date1904")?.as_deref(), Some("1" | "true")) {
                        info.date_system = DateSystem::V1904;
                    }
                }
                b"sheet" => {
                    if let (Some(name), Some(rel_id)) = (attr(&e, b"name")?, attr(&e, b"id")?) {
                        info.sheets.push(SheetEntry { name, rel_id });
                    }
                }
                _ => {}
            },
            Event::Eof => return Ok(info),
            _ => {}
        }
    }
}

/// One internal relationship of the workbook part
#[derive(Debug, Clone)]
pub(crate) struct Relationship {
    pub id: String,
    /// Last segment of the relationship type (`worksheet`, `styles`, ...)
    pub kind: String,
    /// Package path of the target part
    pub target: String,
}

/// Relationships of `xl/_rels/workbook.xml.rels`; external targets are skipped
pub(crate) fn parse_relationships(xml: &str) -> Result<Vec<Relationship>> {
    let mut reader = reader(xml);
    let mut rels = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if attr(&e, b"TargetMode")?.as_deref() == Some("External") {
                    continue;
                }
                let (Some(id), Some(kind), Some(target)) =
                    (attr(&e, b"Id")?, attr(&e, b"Type")?, attr(&e, b"Target")?)
                else {
                    continue;
                };
                rels.push(Relationship {
                    id,
                    kind: kind.rsplit('/').next().unwrap_or_default().to_string(),
                    target: resolve_target(&target),
                });
            }
            Event::Eof => return Ok(rels),
            _ => {}
        }
    }
}

/// Relationship id to target part
pub(crate) fn targets_by_id(rels: &[Relationship]) -> HashMap<&str, &str> {
    rels.iter()
        .map(|r| (r.id.as_str(), r.target.as_str()))
        .collect()
}

/// Target of the first relationship of this kind
pub(crate) fn target_of<'r>(rels: &'r [Relationship], kind: &str) -> Option<&'r str> {
    rels.iter()
        .find(|r| r.kind == kind)
        .map(|r| r.target.as_str())
}

/// Targets are relative to `xl/` unless they start with `/`
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => {
            let mut parts: Vec<&str> = vec!["xl"];
            for segment in target.split('/') {
                match segment {
                    "" | "." => {}
                    ".." => {
                        parts.pop();
                    }
                    s => parts.push(s),
                }
            }
            parts.join("/")
        }
    }
}

pub(crate) fn parse_shared_strings(xml: &str) -> Result<Vec<String>> {
    let mut reader = reader(xml);
    let mut strings = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"si" => {
                strings.push(read_rich_text(&mut reader)?);
            }
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Eof => return Ok(strings),
            _ => {}
        }
    }
}

/// For each `cellXfs` entry, whether its number format displays a date
pub(crate) fn parse_date_styles(xml: &str) -> Result<Vec<bool>> {
    let mut reader = reader(xml);
    let mut custom: HashMap<u32, bool> = HashMap::new();
    let mut formats: Vec<u32> = Vec::new();
    let mut in_num_fmts = false;
    let mut in_cell_xfs = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"numFmts" => in_num_fmts = true,
                b"cellXfs" => in_cell_xfs = true,
                b"numFmt" if in_num_fmts => insert_num_fmt(&e, &mut custom)?,
                b"xf" if in_cell_xfs => formats.push(num_fmt_id(&e)?),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"numFmt" if in_num_fmts => insert_num_fmt(&e, &mut custom)?,
                b"xf" if in_cell_xfs => formats.push(num_fmt_id(&e)?),
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"numFmts" => in_num_fmts = false,
                b"cellXfs" => in_cell_xfs = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(formats
        .into_iter()
        .map(|id| match custom.get(&id) {
            Some(&is_date) => is_date,
            None if id >= FIRST_CUSTOM_FORMAT => {
                log::warn!("style references undefined number format {}", id);
                false
            }
            None => is_builtin_date_format(id),
        })
        .collect())
}

fn num_fmt_id(e: &BytesStart<'_>) -> Result<u32> {
    Ok(attr(e, b"numFmtId")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

fn insert_num_fmt(e: &BytesStart<'_>, custom: &mut HashMap<u32, bool>) -> Result<()> {
    if let Some(code) = attr(e, b"formatCode")? {
        custom.insert(num_fmt_id(e)?, is_date_format_code(&code));
    }
    Ok(())
}

/// Ids below this are built-in formats
const FIRST_CUSTOM_FORMAT: u32 = 164;

/// Built-in number formats that display dates or times
///
/// 46 (`[h]:mm:ss`) is an elapsed duration and stays numeric.
fn is_builtin_date_format(id: u32) -> bool {
    matches!(id, 14..=22 | 27..=36 | 45 | 47 | 50..=58 | 71..=81)
}

/// Whether a custom format code displays a date or time
pub(crate) fn is_date_format_code(code: &str) -> bool {
    // only the first section matters for positive values
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut escaped = false;
    let mut bracket = String::new();
    for c in code.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => {}
            '\\' | '_' | '*' => escaped = true,
            '[' => {
                in_brackets = true;
                bracket.clear();
            }
            ']' if in_brackets => {
                in_brackets = false;
                // [h], [mm], [ss] are elapsed durations
                let lower = bracket.to_ascii_lowercase();
                if !lower.is_empty() && lower.chars().all(|c| matches!(c, 'h' | 'm' | 's')) {
                    return false;
                }
            }
            _ if in_brackets => bracket.push(c),
            ';' => return false,
            'y' | 'Y' | 'm' | 'M' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' => return true,
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workbook_sheets_and_date_system() {
        let xml = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><workbookPr date1904="1"/><sheets><sheet name="A &amp; B" sheetId="1" r:id="rId1"/><sheet name="Two" sheetId="2" r:id="rId5"/></sheets></workbook>"#;
        let info = parse_workbook(xml).unwrap();
        assert_eq!(info.date_system, DateSystem::V1904);
        assert_eq!(info.sheets.len(), 2);
        assert_eq!(info.sheets[0].name, "A & B");
        assert_eq!(info.sheets[1].rel_id, "rId5");
    }

    #[test]
    fn test_prefixed_workbook() {
        let xml = r#"<?xml version="1.0"?>
<x:workbook xmlns:x="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <x:sheets><x:sheet name="Form" sheetId="1" r:id="rId1"/><x:sheet name="Notes" sheetId="2" r:id="rId2"/></x:sheets>
</x:workbook>"#;
        let info = parse_workbook(xml).unwrap();
        let names: Vec<_> = info.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Form", "Notes"]);
        assert_eq!(info.date_system, DateSystem::V1900);
    }

    #[test]
    fn test_markup_characters_in_attribute_values() {
        let xml = r#"<workbook><sheets><sheet name="a>b" sheetId="1" r:id="rId1"/><sheet name="c/>d" sheetId="2" r:id="rId2"/></sheets></workbook>"#;
        let info = parse_workbook(xml).unwrap();
        let names: Vec<_> = info.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a>b", "c/>d"]);
    }

    #[test]
    fn test_relationships() {
        let xml = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
<Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/other.xml"/>
<Relationship Id="rId6" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
<Relationship Id="rId7" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com" TargetMode="External"/>
</Relationships>"#;
        let rels = parse_relationships(xml).unwrap();
        assert_eq!(rels.len(), 3);
        let targets = targets_by_id(&rels);
        assert_eq!(targets["rId1"], "xl/worksheets/sheet1.xml");
        assert_eq!(targets["rId5"], "xl/worksheets/other.xml");
        assert_eq!(target_of(&rels, REL_STYLES), Some("xl/styles.xml"));
        assert_eq!(target_of(&rels, REL_CALC_CHAIN), None);
        assert_eq!(resolve_target("../xl/worksheets/s.xml"), "xl/worksheets/s.xml");
    }

    #[test]
    fn test_shared_strings_rich_text() {
        let xml = r#"<sst count="4" uniqueCount="4"><si><t>plain &amp; simple</t></si><si><r><rPr><b/></rPr><t>Na</t></r><r><t xml:space="preserve">me </t></r><rPh sb="0" eb="1"><t>x</t></rPh></si><si/><si><t><![CDATA[a<b]]></t></si></sst>"#;
        let strings = parse_shared_strings(xml).unwrap();
        assert_eq!(strings, vec!["plain & simple", "Name ", "", "a<b"]);
    }

    #[test]
    fn test_date_styles() {
        let xml = r#"<styleSheet><numFmts count="2"><numFmt numFmtId="164" formatCode="dd/mm/yyyy"/><numFmt numFmtId="165" formatCode="&quot;days&quot; 0.00"/></numFmts>
<cellStyleXfs count="1"><xf numFmtId="14"/></cellStyleXfs>
<cellXfs count="5"><xf numFmtId="0"/><xf numFmtId="14" applyNumberFormat="1"><alignment horizontal="left"/></xf><xf numFmtId="164"/><xf numFmtId="165"/><xf numFmtId="46"/></cellXfs>
<dxfs count="1"><dxf><numFmt numFmtId="166" formatCode="yyyy"/></dxf></dxfs></styleSheet>"#;
        assert_eq!(parse_date_styles(xml).unwrap(), vec![false, true, true, false, false]);
    }

    #[test]
    fn test_format_codes() {
        assert!(is_date_format_code("yyyy-mm-dd"));
        assert!(is_date_format_code("[$-409]mmmm d, yyyy"));
        assert!(is_date_format_code("h:mm AM/PM"));
        assert!(!is_date_format_code("0.00"));
        assert!(!is_date_format_code("#,##0 \"days\""));
        assert!(!is_date_format_code("[h]:mm:ss"));
        assert!(!is_date_format_code("[Red]0.00"));
        assert!(!is_date_format_code("General"));
    }

    #[test]
    fn test_malformed_part() {
        assert!(matches!(
            parse_workbook("<workbook><sheets></workbook>"),
            Err(TabError::ReadError(_))
        ));
    }
}
