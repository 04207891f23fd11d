//! Integration tests for formtab
//!
//! Fixtures are written with the crate's own writer and read back through
//! both file engines.

use chrono::NaiveDate;
use formtab::backend::Engine;
use formtab::normalize::DateMode;
use formtab::reference::CellCoord;
use formtab::types::DateSystem;
use formtab::writer::WorkbookWriter;
use formtab::{CellValue, ExtractOptions, Field, Record, RefSpec, TabError, Value, Workbook};
use tempfile::NamedTempFile;

fn xlsx_file() -> NamedTempFile {
    tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap()
}

fn put(writer: &mut WorkbookWriter, reference: &str, value: CellValue) {
    writer.write_cell(reference.parse().unwrap(), &value).unwrap();
}

/// One survey form: a person block, a dated header and a 35x9 table
fn survey_form() -> NamedTempFile {
    let temp = xlsx_file();
    let mut writer = WorkbookWriter::new(temp.path());

    writer.add_worksheet("Form").unwrap();
    put(&mut writer, "A1", "Survey".into());
    put(&mut writer, "C1", NaiveDate::from_ymd_opt(2017, 1, 1).unwrap().into());
    for row in 1..36u32 {
        for col in 0..9u32 {
            let value = if col == 0 {
                CellValue::String(format!("Item {}", row))
            } else {
                CellValue::Int((row * 10 + col) as i64)
            };
            writer.write_cell(CellCoord::new(row, col), &value).unwrap();
        }
    }
    put(&mut writer, "A38", "  padded text  ".into());
    put(&mut writer, "B38", "   ".into());
    put(&mut writer, "C38", CellValue::Bool(true));
    put(&mut writer, "D38", CellValue::Error("#DIV/0!".to_string()));
    put(&mut writer, "A40", "Person".into());
    put(&mut writer, "B40", "John Doe".into());
    put(&mut writer, "B42", CellValue::Int(33));
    put(&mut writer, "C44", CellValue::Float(168.0));
    put(&mut writer, "D45", CellValue::Float(2.5));
    put(&mut writer, "E45", "Blue".into());

    writer.add_worksheet("Notes").unwrap();
    writer.write_row(&["free text".into()]).unwrap();
    writer.close().unwrap();
    temp
}

fn engines() -> [Engine<'static>; 2] {
    [Engine::Fast, Engine::ReadWrite]
}

#[test]
fn test_named_fields() {
    let form = survey_form();
    for engine in engines() {
        let mut workbook = Workbook::open(form.path(), engine).unwrap();
        let record = workbook
            .tab_form([("Name", "B40"), ("Age", "B42"), ("Height", "C44")])
            .unwrap();

        let names: Vec<_> = record.as_map().unwrap().keys().cloned().collect();
        assert_eq!(names, vec!["Name", "Age", "Height"], "{}", engine.name());
        assert_eq!(record.get("Name"), Some(&Field::Scalar(Value::from("John Doe"))));
        assert_eq!(record.get("Age"), Some(&Field::Scalar(Value::Number(33.0))));
        assert_eq!(record.get("Height"), Some(&Field::Scalar(Value::Number(168.0))));
        workbook.close().unwrap();
    }
}

#[test]
fn test_list_with_placeholder() {
    let form = survey_form();
    for engine in engines() {
        let mut workbook = Workbook::open(form.path(), engine).unwrap();
        let spec = RefSpec::from([Some("A40"), Some("B42"), Some("C44"), Some("D45"), None, Some("E45")]);
        let record = workbook.tab_form(spec).unwrap();

        let list = record.as_list().unwrap();
        assert_eq!(list.len(), 6);
        assert!(list[4].as_scalar().unwrap().is_nan());
        assert_eq!(list[5], Field::Scalar(Value::from("Blue")));
        workbook.close().unwrap();
    }
}

#[test]
fn test_range_shape() {
    let form = survey_form();
    for engine in engines() {
        let mut workbook = Workbook::open(form.path(), engine).unwrap();
        let record = workbook.tab_form("A2:I36").unwrap();

        let rows = record.as_matrix().unwrap();
        assert_eq!(rows.len(), 35);
        assert!(rows.iter().all(|row| row.len() == 9));
        assert_eq!(rows[0][0], Value::from("Item 1"));
        assert_eq!(rows[34][8], Value::Number(358.0));

        // reversed corners give the same block
        assert_eq!(workbook.tab_form("I36:A2").unwrap(), record);
        workbook.close().unwrap();
    }
}

#[test]
fn test_dates() {
    let form = survey_form();
    let day = NaiveDate::from_ymd_opt(2017, 1, 1).unwrap();
    for engine in engines() {
        let mut workbook = Workbook::open(form.path(), engine).unwrap();
        assert_eq!(workbook.tab_form("C1").unwrap(), Record::Scalar(Value::Date(day)));

        let options = ExtractOptions::new().with_dates(DateMode::DateTime);
        let record = workbook.tab_form_with("C1", &options).unwrap();
        assert_eq!(record, Record::Scalar(Value::DateTime(day.and_hms_opt(0, 0, 0).unwrap())));
        workbook.close().unwrap();
    }
}

#[test]
fn test_date_system_1904() {
    let temp = xlsx_file();
    let mut writer = WorkbookWriter::new(temp.path());
    writer.set_date_system(DateSystem::V1904);
    writer.add_worksheet("Sheet1").unwrap();
    writer
        .write_row(&[NaiveDate::from_ymd_opt(2017, 1, 1).unwrap().into()])
        .unwrap();
    writer.close().unwrap();

    for engine in engines() {
        let mut workbook = Workbook::open(temp.path(), engine).unwrap();
        let record = workbook.tab_form("A1").unwrap();
        assert_eq!(
            record,
            Record::Scalar(Value::Date(NaiveDate::from_ymd_opt(2017, 1, 1).unwrap())),
            "{}",
            engine.name()
        );
        workbook.close().unwrap();
    }
}

#[test]
fn test_blank_substitute_and_text() {
    let form = survey_form();
    for engine in engines() {
        let mut workbook = Workbook::open(form.path(), engine).unwrap();
        let options = ExtractOptions::new().with_empty("N/A");
        let record = workbook
            .tab_form_with(["A38", "B38", "C38", "Z100"], &options)
            .unwrap();
        let list = record.as_list().unwrap();
        assert_eq!(list[0], Field::Scalar(Value::from("padded text")));
        assert_eq!(list[1], Field::Scalar(Value::from("N/A")));
        assert_eq!(list[2], Field::Scalar(Value::Bool(true)));
        assert_eq!(list[3], Field::Scalar(Value::from("N/A")));
        workbook.close().unwrap();
    }
}

#[test]
fn test_error_cells() {
    let form = survey_form();
    for engine in engines() {
        let mut workbook = Workbook::open(form.path(), engine).unwrap();
        let lenient = workbook.tab_form("D38").unwrap();
        assert_eq!(lenient, Record::Scalar(Value::Error("#DIV/0!".to_string())));

        let err = workbook
            .tab_form_with([("Flag", "C38"), ("Ratio", "D38")], &ExtractOptions::new().strict())
            .unwrap_err();
        assert!(matches!(&err, TabError::AtCell { cell, .. } if cell == "D38"));
        assert!(matches!(err.root(), TabError::CellError { code } if code == "#DIV/0!"));

        let raw = workbook.raw_range_value("D38").unwrap();
        assert_eq!(raw, Field::Scalar(CellValue::Error("#DIV/0!".to_string())));
        workbook.close().unwrap();
    }
}

#[test]
fn test_missing_sheet_lists_available() {
    let form = survey_form();
    for engine in engines() {
        let mut workbook = Workbook::open(form.path(), engine).unwrap();
        match workbook.set_sheet("Summary") {
            Err(TabError::SheetNotFound { sheet, available }) => {
                assert_eq!(sheet, "Summary");
                assert_eq!(available, "Form, Notes");
            }
            other => panic!("expected SheetNotFound, got {:?}", other),
        }
        workbook.set_sheet("Notes").unwrap();
        assert_eq!(workbook.tab_form("A1").unwrap(), Record::Scalar(Value::from("free text")));
        workbook.close().unwrap();
    }
}

#[test]
fn test_invalid_reference() {
    let form = survey_form();
    let mut workbook = Workbook::open_fast(form.path()).unwrap();
    for bad in ["", "15B", "A0", "A1:B2:C3", "Form!A1"] {
        let err = workbook.tab_form(bad).unwrap_err();
        assert!(matches!(err, TabError::InvalidReference(_)), "{bad}: {err}");
    }
    workbook.close().unwrap();
}

#[test]
fn test_row_and_column_values() {
    let form = survey_form();
    for engine in engines() {
        let mut workbook = Workbook::open(form.path(), engine).unwrap();
        let row = workbook.row_values(2).unwrap();
        assert_eq!(row.len(), 9);
        assert_eq!(row[1], Value::Number(11.0));

        let col = workbook.col_values("B").unwrap();
        assert_eq!(col.len(), 45);
        assert_eq!(col[39], Value::from("John Doe"));
        workbook.close().unwrap();
    }
}

#[test]
fn test_fill_save_reopen() {
    let form = survey_form();
    let copy = xlsx_file();

    {
        let mut workbook = Workbook::open_read_write(form.path()).unwrap();
        workbook
            .fill_form([("B40", "Jane Roe"), ("E45", "Green")])
            .unwrap();
        workbook.set_cell_value("B42", 41).unwrap();
        workbook
            .set_cell_value(
                "G40:H41",
                vec![
                    vec![CellValue::Float(1.5), CellValue::Bool(false)],
                    vec![CellValue::Empty, "x".into()],
                ],
            )
            .unwrap();
        workbook.set_cell_value("C44", CellValue::Empty).unwrap();
        workbook.save_as(copy.path()).unwrap();
        workbook.close().unwrap();
    }

    // the source is untouched
    let mut original = Workbook::open_fast(form.path()).unwrap();
    assert_eq!(original.tab_form("B40").unwrap(), Record::Scalar(Value::from("John Doe")));
    original.close().unwrap();

    for engine in engines() {
        let mut workbook = Workbook::open(copy.path(), engine).unwrap();
        let record = workbook
            .tab_form([("Name", "B40"), ("Age", "B42"), ("Height", "C44"), ("Colour", "E45")])
            .unwrap();
        assert_eq!(record.get("Name"), Some(&Field::Scalar(Value::from("Jane Roe"))));
        assert_eq!(record.get("Age"), Some(&Field::Scalar(Value::Number(41.0))));
        assert!(record.get("Height").unwrap().as_scalar().unwrap().is_nan());
        assert_eq!(record.get("Colour"), Some(&Field::Scalar(Value::from("Green"))));

        let block = workbook.tab_form("G40:H41").unwrap();
        let rows = block.as_matrix().unwrap();
        assert_eq!(rows[0], vec![Value::Number(1.5), Value::Bool(false)]);
        assert!(rows[1][0].is_nan());

        // dates keep their format through a save
        assert_eq!(
            workbook.tab_form("C1").unwrap(),
            Record::Scalar(Value::Date(NaiveDate::from_ymd_opt(2017, 1, 1).unwrap()))
        );
        workbook.close().unwrap();
    }
}

#[test]
fn test_open_missing_file() {
    for engine in engines() {
        let err = Workbook::open("/nonexistent/dir/form.xlsx", engine).unwrap_err();
        assert!(matches!(err, TabError::ReadError(_)), "{}: {err}", engine.name());
    }
}
