//! Demo: tabulate a batch of survey forms into one table
//!
//! Writes three small forms, then pulls the same named fields out of each.
//! Pass `--app` to read them through a spreadsheet application instead of
//! the built-in engine (needs `soffice`, or set FORMTAB_SOFFICE).

use chrono::NaiveDate;
use formtab::types::CellValue;
use formtab::writer::WorkbookWriter;
use formtab::{AppConfig, Engine, ExtractOptions, Record, RefSpec, SpreadsheetApp, Workbook};
use std::path::{Path, PathBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Tabulating Forms Demo ===\n");

    let dir = tempfile::tempdir()?;
    let people = [
        ("John Doe", 33, 168.0, Some((2017, 1, 1))),
        ("Ann Lee", 41, 172.5, Some((2017, 3, 14))),
        ("Raj Patel", 29, 180.0, None),
    ];
    let mut files = Vec::new();
    for (i, person) in people.iter().enumerate() {
        let path = dir.path().join(format!("form_{:03}.xlsx", i + 1));
        write_form(&path, person)?;
        files.push(path);
    }
    println!("1. Wrote {} forms to {}", files.len(), dir.path().display());

    let spec = RefSpec::from([
        ("Name", "B3"),
        ("Age", "B4"),
        ("Height", "B5"),
        ("Visited", "D3"),
    ]);
    let options = ExtractOptions::new().with_empty("N/A");

    let use_app = std::env::args().any(|a| a == "--app");
    let rows = if use_app {
        println!("2. Reading through the spreadsheet application");
        let app = SpreadsheetApp::launch(AppConfig::from_env())?;
        println!("   {}", app.version());
        let rows = tabulate(&files, &spec, &options, Engine::Application(&app))?;
        app.quit()?;
        rows
    } else {
        println!("2. Reading with the fast engine");
        tabulate(&files, &spec, &options, Engine::Fast)?
    };

    println!("\n{:<12} {:<10} {:>5} {:>7} {:>12}", "File", "Name", "Age", "Height", "Visited");
    for (file, record) in &rows {
        let field = |name: &str| {
            record
                .get(name)
                .and_then(|f| f.as_scalar())
                .map(|v| v.to_string())
                .unwrap_or_default()
        };
        println!(
            "{:<12} {:<10} {:>5} {:>7} {:>12}",
            file,
            field("Name"),
            field("Age"),
            field("Height"),
            field("Visited")
        );
    }

    println!("\n=== COMPLETED ===");
    Ok(())
}

fn tabulate(
    files: &[PathBuf],
    spec: &RefSpec,
    options: &ExtractOptions,
    engine: Engine<'_>,
) -> Result<Vec<(String, Record)>, Box<dyn std::error::Error>> {
    let mut rows = Vec::with_capacity(files.len());
    for path in files {
        let mut workbook = Workbook::open(path, engine)?;
        let record = workbook.tab_form_with(spec.clone(), options)?;
        workbook.close()?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        rows.push((name, record));
    }
    Ok(rows)
}

fn write_form(
    path: &Path,
    (name, age, height, visited): &(&str, i64, f64, Option<(i32, u32, u32)>),
) -> formtab::Result<()> {
    let visited = visited.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d));

    let mut workbook = WorkbookWriter::new(path);
    workbook.add_worksheet("Survey")?;
    workbook.write_row(&["Personal details".into()])?;
    workbook.write_row(&[])?;
    workbook.write_row(&["Name".into(), (*name).into(), "Visited".into(), visited.into()])?;
    workbook.write_row(&["Age".into(), CellValue::Int(*age)])?;
    workbook.write_row(&["Height (cm)".into(), CellValue::Float(*height)])?;
    workbook.close()
}
