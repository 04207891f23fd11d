//! Read/write engine for xlsx packages
//!
//! Every worksheet is decoded into sparse in-memory storage when the file is
//! opened, and writes update that storage. [`save`](super::Backend::save)
//! patches the source package: only the edited cells are rewritten, so
//! formulas, merged ranges, styles and charts elsewhere are kept.

mod parts;
mod patch;
mod sheet;

use super::{no_sheet_selected, sheet_not_found, Backend};
use crate::error::{Result, TabError};
use crate::reference::{CellCoord, CellSpan};
use crate::types::{CellValue, DateSystem};
use parts::{
    parse_date_styles, parse_relationships, parse_shared_strings, parse_workbook, target_of,
    targets_by_id, REL_CALC_CHAIN, REL_SHARED_STRINGS, REL_STYLES, WORKBOOK_PART,
    WORKBOOK_RELS_PART,
};
use patch::{patch_package, PackageParts, SheetEdits};
use s_zip::StreamingZipReader;
use sheet::{parse_sheet, Cells, SheetContext};
use std::path::{Path, PathBuf};

struct Worksheet {
    name: String,
    /// Package path of the worksheet part
    part: String,
    cells: Cells,
    /// Writes not yet saved to the source file
    edits: Cells,
}

/// In-memory read/write xlsx engine
pub struct XlsxBackend {
    path: PathBuf,
    date_system: DateSystem,
    sheets: Vec<Worksheet>,
    parts: PackageParts,
    date_styles: Vec<bool>,
    current: Option<usize>,
    dirty: bool,
}

impl XlsxBackend {
    /// Load every worksheet of an xlsx/xlsm package
    pub fn open(path: &Path) -> Result<Self> {
        let read_err = |e: String| TabError::ReadError(format!("{}: {}", path.display(), e));

        let mut archive = StreamingZipReader::open(path).map_err(|e| read_err(e.to_string()))?;
        let mut read_part = |name: &str| -> Option<String> {
            let bytes = archive.read_entry_by_name(name).ok()?;
            Some(String::from_utf8_lossy(&bytes).into_owned())
        };

        let workbook = read_part(WORKBOOK_PART).ok_or_else(|| {
            read_err(format!("missing {}, not an xlsx package", WORKBOOK_PART))
        })?;
        let rels = read_part(WORKBOOK_RELS_PART)
            .ok_or_else(|| read_err(format!("missing {}", WORKBOOK_RELS_PART)))?;
        let info = parse_workbook(&workbook).map_err(|e| read_err(format!("{}: {}", WORKBOOK_PART, e)))?;
        let rels = parse_relationships(&rels)
            .map_err(|e| read_err(format!("{}: {}", WORKBOOK_RELS_PART, e)))?;

        let parts = PackageParts {
            styles: target_of(&rels, REL_STYLES).map(str::to_string),
            calc_chain: target_of(&rels, REL_CALC_CHAIN).map(str::to_string),
        };
        // both parts are optional in the package format
        let shared_strings = match target_of(&rels, REL_SHARED_STRINGS).and_then(&mut read_part) {
            Some(xml) => parse_shared_strings(&xml).map_err(|e| read_err(format!("shared strings: {}", e)))?,
            None => Vec::new(),
        };
        let date_styles = match parts.styles.as_deref().and_then(&mut read_part) {
            Some(xml) => parse_date_styles(&xml).map_err(|e| read_err(format!("styles: {}", e)))?,
            None => Vec::new(),
        };

        let targets = targets_by_id(&rels);
        let ctx = SheetContext {
            shared_strings: &shared_strings,
            date_styles: &date_styles,
        };

        let mut sheets = Vec::with_capacity(info.sheets.len());
        for entry in info.sheets {
            let target = targets.get(entry.rel_id.as_str()).ok_or_else(|| {
                read_err(format!("sheet '{}' has no relationship {}", entry.name, entry.rel_id))
            })?;
            let xml = read_part(target)
                .ok_or_else(|| read_err(format!("missing worksheet part {}", target)))?;
            let cells = parse_sheet(&xml, &ctx)
                .map_err(|e| read_err(format!("sheet '{}': {}", entry.name, e)))?;
            sheets.push(Worksheet {
                name: entry.name,
                part: target.to_string(),
                cells,
                edits: Cells::new(),
            });
        }

        log::debug!(
            "read-write engine loaded {} ({} sheets, {} shared strings)",
            path.display(),
            sheets.len(),
            shared_strings.len()
        );

        Ok(XlsxBackend {
            path: path.to_path_buf(),
            date_system: info.date_system,
            sheets,
            parts,
            date_styles,
            current: None,
            dirty: false,
        })
    }

    /// Source file the workbook was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether there are writes not yet saved
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn sheet(&self) -> Result<&Worksheet> {
        self.current
            .and_then(|i| self.sheets.get(i))
            .ok_or_else(no_sheet_selected)
    }
}

impl Backend for XlsxBackend {
    fn name(&self) -> &'static str {
        "read-write"
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    fn set_sheet(&mut self, name: &str) -> Result<()> {
        match self.sheets.iter().position(|s| s.name == name) {
            Some(index) => {
                self.current = Some(index);
                Ok(())
            }
            None => Err(sheet_not_found(name, &self.sheet_names())),
        }
    }

    fn current_sheet(&self) -> Option<&str> {
        self.current
            .and_then(|i| self.sheets.get(i))
            .map(|s| s.name.as_str())
    }

    fn date_system(&self) -> DateSystem {
        self.date_system
    }

    fn read_cell(&mut self, coord: CellCoord) -> Result<CellValue> {
        Ok(self
            .sheet()?
            .cells
            .get(&coord)
            .cloned()
            .unwrap_or(CellValue::Empty))
    }

    fn used_extent(&mut self) -> Result<Option<CellSpan>> {
        let cells = &self.sheet()?.cells;
        let mut coords = cells.keys();
        let Some(first) = coords.next() else {
            return Ok(None);
        };
        let (mut top, mut left, mut bottom, mut right) = (first.row, first.col, first.row, first.col);
        for coord in coords {
            top = top.min(coord.row);
            left = left.min(coord.col);
            bottom = bottom.max(coord.row);
            right = right.max(coord.col);
        }
        Ok(Some(CellSpan::new(
            CellCoord::new(top, left),
            CellCoord::new(bottom, right),
        )))
    }

    fn write_cell(&mut self, coord: CellCoord, value: CellValue) -> Result<()> {
        let index = self.current.ok_or_else(no_sheet_selected)?;
        let sheet = &mut self.sheets[index];
        if value.is_empty() {
            sheet.cells.remove(&coord);
        } else {
            sheet.cells.insert(coord, value.clone());
        }
        sheet.edits.insert(coord, value);
        self.dirty = true;
        Ok(())
    }

    fn save(&mut self, path: Option<&Path>) -> Result<()> {
        let in_place = path.is_none() || path == Some(self.path.as_path());
        if in_place && !self.dirty {
            return Ok(());
        }
        let target = path.unwrap_or(self.path.as_path()).to_path_buf();
        let edits: Vec<SheetEdits<'_>> = self
            .sheets
            .iter()
            .map(|s| SheetEdits {
                part: &s.part,
                cells: &s.edits,
            })
            .collect();
        let summary = patch_package(
            &self.path,
            &target,
            &edits,
            &self.parts,
            &self.date_styles,
            self.date_system,
        )?;
        log::info!("saved {}", target.display());

        if in_place {
            // the source now holds the edits and any shared-part changes
            if summary.date_styles_added {
                self.date_styles.extend([true, true]);
            }
            if summary.calc_chain_dropped {
                self.parts.calc_chain = None;
            }
            for sheet in &mut self.sheets {
                sheet.edits.clear();
            }
            self.dirty = false;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.dirty {
            log::warn!(
                "closing {} with unsaved changes",
                self.path.display()
            );
        }
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WorkbookWriter;
    use crate::{Record, Value, Workbook};
    use s_zip::StreamingZipWriter;
    use tempfile::tempdir;

    const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
    const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

    fn write_package(path: &Path, parts: &[(&str, String)]) {
        let mut zip = StreamingZipWriter::new(path).unwrap();
        for (name, xml) in parts {
            zip.start_entry(name).unwrap();
            zip.write_data(xml.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn part(path: &Path, name: &str) -> Option<String> {
        let mut archive = StreamingZipReader::open(path).unwrap();
        archive
            .read_entry_by_name(name)
            .ok()
            .map(|bytes| String::from_utf8(bytes).unwrap())
    }

    /// One sheet with a formula, a styled cell, a merged range and a calculation chain
    fn calc_fixture(dir: &Path) -> PathBuf {
        let path = dir.join("calc.xlsx");
        let types = [
            ("/xl/workbook.xml", "sheet.main"),
            ("/xl/worksheets/sheet1.xml", "worksheet"),
            ("/xl/styles.xml", "styles"),
            ("/xl/calcChain.xml", "calcChain"),
        ]
        .iter()
        .map(|(name, kind)| {
            format!(
                r#"<Override PartName="{}" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.{}+xml"/>"#,
                name, kind
            )
        })
        .collect::<String>();
        write_package(
            &path,
            &[
                (
                    "[Content_Types].xml",
                    format!(
                        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>{}</Types>"#,
                        types
                    ),
                ),
                (
                    "_rels/.rels",
                    format!(
                        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#,
                        REL_NS
                    ),
                ),
                (
                    "xl/workbook.xml",
                    format!(
                        r#"<workbook xmlns="{}" xmlns:r="{}"><sheets><sheet name="Calc" sheetId="1" r:id="rId1"/></sheets><calcPr calcId="191029"/></workbook>"#,
                        MAIN_NS, REL_NS
                    ),
                ),
                (
                    "xl/_rels/workbook.xml.rels",
                    format!(
                        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{0}/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="{0}/styles" Target="styles.xml"/><Relationship Id="rId3" Type="{0}/calcChain" Target="calcChain.xml"/></Relationships>"#,
                        REL_NS
                    ),
                ),
                (
                    "xl/styles.xml",
                    format!(
                        r#"<styleSheet xmlns="{}"><fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="11"/><name val="Calibri"/></font></fonts><fills count="1"><fill><patternFill patternType="none"/></fill></fills><borders count="1"><border/></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/></cellXfs></styleSheet>"#,
                        MAIN_NS
                    ),
                ),
                (
                    "xl/worksheets/sheet1.xml",
                    format!(
                        r#"<worksheet xmlns="{}"><dimension ref="A1:C3"/><sheetData><row r="1" spans="1:3"><c r="A1"><v>1</v></c><c r="B1" s="1"><v>2</v></c><c r="C1"><f>A1+B1</f><v>3</v></c></row><row r="3"><c r="A3" t="inlineStr"><is><t>merged</t></is></c></row></sheetData><mergeCells count="1"><mergeCell ref="A3:B3"/></mergeCells></worksheet>"#,
                        MAIN_NS
                    ),
                ),
                (
                    "xl/calcChain.xml",
                    format!(r#"<calcChain xmlns="{}"><c r="C1" i="1"/></calcChain>"#, MAIN_NS),
                ),
            ],
        );
        path
    }

    fn fixture(dir: &Path) -> PathBuf {
        let path = dir.join("form.xlsx");
        let mut writer = WorkbookWriter::new(&path);
        writer.add_worksheet("Sheet1").unwrap();
        writer.write_row(&["Name".into(), "John Doe".into()]).unwrap();
        writer.write_row(&["Age".into(), CellValue::Int(33)]).unwrap();
        writer.add_worksheet("Other").unwrap();
        writer.close().unwrap();
        path
    }

    #[test]
    fn test_open_and_read() {
        let dir = tempdir().unwrap();
        let mut backend = XlsxBackend::open(&fixture(dir.path())).unwrap();

        assert_eq!(backend.sheet_names(), vec!["Sheet1", "Other"]);
        assert!(backend.read_cell(CellCoord::new(0, 0)).is_err());

        backend.set_sheet("Sheet1").unwrap();
        assert_eq!(
            backend.read_cell(CellCoord::new(0, 1)).unwrap(),
            CellValue::String("John Doe".to_string())
        );
        assert_eq!(backend.read_cell(CellCoord::new(1, 1)).unwrap(), CellValue::Float(33.0));
        assert_eq!(backend.read_cell(CellCoord::new(50, 50)).unwrap(), CellValue::Empty);
        assert_eq!(
            backend.used_extent().unwrap(),
            Some(CellSpan::new(CellCoord::new(0, 0), CellCoord::new(1, 1)))
        );

        assert!(matches!(
            backend.set_sheet("Missing"),
            Err(TabError::SheetNotFound { .. })
        ));
    }

    #[test]
    fn test_write_and_save_roundtrip() {
        let dir = tempdir().unwrap();
        let source = fixture(dir.path());
        let mut backend = XlsxBackend::open(&source).unwrap();
        backend.set_sheet("Other").unwrap();
        backend.write_cell(CellCoord::new(2, 3), CellValue::Bool(true)).unwrap();
        assert!(backend.is_dirty());

        let copy = dir.path().join("copy.xlsx");
        backend.save(Some(&copy)).unwrap();
        assert!(backend.is_dirty());
        backend.save(None).unwrap();
        assert!(!backend.is_dirty());

        for path in [&source, &copy] {
            let mut reopened = XlsxBackend::open(path).unwrap();
            reopened.set_sheet("Other").unwrap();
            assert_eq!(reopened.read_cell(CellCoord::new(2, 3)).unwrap(), CellValue::Bool(true));
            reopened.set_sheet("Sheet1").unwrap();
            assert_eq!(reopened.read_cell(CellCoord::new(1, 1)).unwrap(), CellValue::Float(33.0));
        }
    }

    #[test]
    fn test_not_a_package() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.xlsx");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(matches!(XlsxBackend::open(&path), Err(TabError::ReadError(_))));
    }

    #[test]
    fn test_save_keeps_formulas_and_merges() {
        let dir = tempdir().unwrap();
        let path = calc_fixture(dir.path());

        let mut workbook = Workbook::open_read_write(&path).unwrap();
        workbook.fill_form([("A1", 5), ("B2", 7)]).unwrap();
        workbook.save().unwrap();
        workbook.close().unwrap();

        let sheet = part(&path, "xl/worksheets/sheet1.xml").unwrap();
        assert!(sheet.contains("<f>A1+B1</f>"), "{}", sheet);
        assert!(sheet.contains(r#"<mergeCell ref="A3:B3"/>"#));
        assert!(sheet.contains(r#"<c r="A1"><v>5</v></c><c r="B1" s="1"><v>2</v></c>"#));
        assert!(sheet.contains(r#"<row r="2"><c r="B2"><v>7</v></c></row>"#));
        assert!(part(&path, "xl/calcChain.xml").is_some());
        let workbook_xml = part(&path, "xl/workbook.xml").unwrap();
        assert!(workbook_xml.contains(r#"<calcPr calcId="191029" fullCalcOnLoad="1"/>"#));

        let mut reopened = XlsxBackend::open(&path).unwrap();
        reopened.set_sheet("Calc").unwrap();
        assert_eq!(reopened.read_cell(CellCoord::new(0, 0)).unwrap(), CellValue::Float(5.0));
        assert_eq!(reopened.read_cell(CellCoord::new(0, 2)).unwrap(), CellValue::Float(3.0));
        assert_eq!(
            reopened.read_cell(CellCoord::new(2, 0)).unwrap(),
            CellValue::String("merged".to_string())
        );

        let mut fast = Workbook::open_fast(&path).unwrap();
        assert_eq!(fast.tab_form("B2").unwrap(), Record::Scalar(Value::Number(7.0)));
        fast.close().unwrap();
    }

    #[test]
    fn test_overwriting_a_formula_drops_the_calc_chain() {
        let dir = tempdir().unwrap();
        let source = calc_fixture(dir.path());
        let copy = dir.path().join("copy.xlsx");

        let mut backend = XlsxBackend::open(&source).unwrap();
        backend.set_sheet("Calc").unwrap();
        backend.write_cell(CellCoord::new(0, 2), "total".into()).unwrap();
        backend.save(Some(&copy)).unwrap();

        let sheet = part(&copy, "xl/worksheets/sheet1.xml").unwrap();
        assert!(!sheet.contains("<f>"));
        assert!(part(&copy, "xl/calcChain.xml").is_none());
        assert!(!part(&copy, "xl/_rels/workbook.xml.rels").unwrap().contains("calcChain"));
        assert!(!part(&copy, "[Content_Types].xml").unwrap().contains("calcChain"));
        assert!(part(&source, "xl/calcChain.xml").is_some());

        backend.save(None).unwrap();
        assert!(part(&source, "xl/calcChain.xml").is_none());
        assert!(backend.parts.calc_chain.is_none());

        let mut reopened = XlsxBackend::open(&copy).unwrap();
        reopened.set_sheet("Calc").unwrap();
        assert_eq!(
            reopened.read_cell(CellCoord::new(0, 2)).unwrap(),
            CellValue::String("total".to_string())
        );
    }

    #[test]
    fn test_dates_get_a_date_style() {
        let dir = tempdir().unwrap();
        let path = calc_fixture(dir.path());
        let noon = chrono::NaiveDate::from_ymd_opt(2017, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();

        let mut backend = XlsxBackend::open(&path).unwrap();
        backend.set_sheet("Calc").unwrap();
        backend.write_cell(CellCoord::new(1, 0), CellValue::DateTime(42736.0)).unwrap();
        backend.write_cell(CellCoord::new(0, 1), CellValue::Timestamp(noon)).unwrap();
        backend.save(None).unwrap();
        assert_eq!(backend.date_styles, vec![false, false, true, true]);

        let styles = part(&path, "xl/styles.xml").unwrap();
        assert!(styles.contains(r#"<cellXfs count="4">"#));

        let mut reopened = XlsxBackend::open(&path).unwrap();
        reopened.set_sheet("Calc").unwrap();
        assert_eq!(reopened.read_cell(CellCoord::new(1, 0)).unwrap(), CellValue::DateTime(42736.0));
        assert_eq!(reopened.read_cell(CellCoord::new(0, 1)).unwrap(), CellValue::DateTime(42736.5));
    }

    #[test]
    fn test_prefixed_package() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefixed.xlsx");
        let sheet = |text: &str| {
            format!(
                r#"<x:worksheet xmlns:x="{}"><x:sheetData><x:row r="1"><x:c r="A1" t="s"><x:v>{}</x:v></x:c></x:row></x:sheetData></x:worksheet>"#,
                MAIN_NS, text
            )
        };
        write_package(
            &path,
            &[
                (
                    "xl/workbook.xml",
                    format!(
                        r#"<x:workbook xmlns:x="{}" xmlns:r="{}"><x:sheets><x:sheet name="a>b" sheetId="1" r:id="rId1"/><x:sheet name="Second" sheetId="2" r:id="rId2"/></x:sheets></x:workbook>"#,
                        MAIN_NS, REL_NS
                    ),
                ),
                (
                    "xl/_rels/workbook.xml.rels",
                    format!(
                        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{0}/worksheet" Target="worksheets/a.xml"/><Relationship Id="rId2" Type="{0}/worksheet" Target="worksheets/b.xml"/><Relationship Id="rId3" Type="{0}/sharedStrings" Target="strings.xml"/></Relationships>"#,
                        REL_NS
                    ),
                ),
                (
                    "xl/strings.xml",
                    format!(r#"<x:sst xmlns:x="{}"><x:si><x:t>first</x:t></x:si><x:si><x:t>second</x:t></x:si></x:sst>"#, MAIN_NS),
                ),
                ("xl/worksheets/a.xml", sheet("0")),
                ("xl/worksheets/b.xml", sheet("1")),
            ],
        );

        let mut backend = XlsxBackend::open(&path).unwrap();
        assert_eq!(backend.sheet_names(), vec!["a>b", "Second"]);
        backend.set_sheet("Second").unwrap();
        assert_eq!(
            backend.read_cell(CellCoord::new(0, 0)).unwrap(),
            CellValue::String("second".to_string())
        );

        backend.write_cell(CellCoord::new(1, 1), CellValue::Int(2)).unwrap();
        backend.save(None).unwrap();
        assert!(part(&path, "xl/worksheets/b.xml")
            .unwrap()
            .contains(r#"<x:row r="2"><x:c r="B2"><x:v>2</x:v></x:c></x:row>"#));
        assert!(part(&path, "xl/workbook.xml")
            .unwrap()
            .contains(r#"<x:calcPr fullCalcOnLoad="1"/></x:workbook>"#));
    }
}
