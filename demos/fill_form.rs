//! Demo: fill in a blank form and read it back

use formtab::types::CellValue;
use formtab::writer::WorkbookWriter;
use formtab::Workbook;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Fill Form Demo ===\n");

    let dir = tempfile::tempdir()?;
    let template = dir.path().join("order_template.xlsx");
    let filled = dir.path().join("order_0001.xlsx");

    let mut writer = WorkbookWriter::new(&template);
    writer.add_worksheet("Order")?;
    writer.write_row(&["Amount".into(), CellValue::Empty, "Colour".into(), "In stock".into()])?;
    writer.close()?;
    println!("1. Created template {}", template.display());

    let mut workbook = Workbook::open_read_write(&template)?;
    workbook.fill_form([
        ("A7", CellValue::from(68035.75)),
        ("C7", CellValue::from("Red")),
        ("D7", CellValue::from(true)),
    ])?;
    workbook.set_cell_value(
        "A9:C10",
        vec![
            vec![CellValue::Int(1), CellValue::Int(2), CellValue::Int(3)],
            vec![CellValue::Int(4), CellValue::Empty, CellValue::Int(6)],
        ],
    )?;
    workbook.save_as(&filled)?;
    workbook.close()?;
    println!("2. Saved filled form to {}", filled.display());

    let mut workbook = Workbook::open_fast(&filled)?;
    println!("3. Row 7: {:?}", workbook.row_values(7)?);
    println!("   A9:C10: {:?}", workbook.tab_form("A9:C10")?);
    workbook.close()?;

    println!("\n=== COMPLETED ===");
    Ok(())
}
