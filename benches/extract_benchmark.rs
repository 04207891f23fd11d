use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use formtab::backend::Engine;
use formtab::reference::{parse_reference, CellCoord};
use formtab::types::CellValue;
use formtab::writer::WorkbookWriter;
use formtab::{RefSpec, Workbook};
use tempfile::NamedTempFile;

/// Form with a `rows` x 10 table under a small header block
fn build_form(rows: u32) -> NamedTempFile {
    let temp = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
    let mut writer = WorkbookWriter::new(temp.path());
    writer.add_worksheet("Form").unwrap();
    writer.write_row(&["Name".into(), "John Doe".into()]).unwrap();
    writer.write_row(&["Age".into(), CellValue::Int(33)]).unwrap();
    for row in 0..rows {
        for col in 0..10u32 {
            let value = CellValue::Float((row * 10 + col) as f64 * 0.5);
            writer.write_cell(CellCoord::new(row + 3, col), &value).unwrap();
        }
    }
    writer.close().unwrap();
    temp
}

fn benchmark_parse(c: &mut Criterion) {
    let refs = ["B15", "$AA$100", "A2:I36", "XFD1048576", "c3:a1"];
    c.bench_function("parse_reference", |b| {
        b.iter(|| {
            for r in refs {
                black_box(parse_reference(black_box(r)).unwrap());
            }
        })
    });
}

fn benchmark_tab_form(c: &mut Criterion) {
    let mut group = c.benchmark_group("tab_form");
    group.sample_size(10);

    for rows in [100u32, 1000, 5000] {
        let form = build_form(rows);
        let last = format!("J{}", rows + 3);
        let spec = RefSpec::from([("Name", "B1"), ("Age", "B2"), ("Last", last.as_str())]);
        let table = RefSpec::from(format!("A4:{}", last));

        for (label, engine) in [("fast", Engine::Fast), ("read-write", Engine::ReadWrite)] {
            group.bench_with_input(BenchmarkId::new(format!("{label}/fields"), rows), &rows, |b, _| {
                b.iter(|| {
                    let mut workbook = Workbook::open(form.path(), engine).unwrap();
                    black_box(workbook.tab_form(spec.clone()).unwrap());
                    workbook.close().unwrap();
                });
            });

            group.bench_with_input(BenchmarkId::new(format!("{label}/table"), rows), &rows, |b, _| {
                let mut workbook = Workbook::open(form.path(), engine).unwrap();
                b.iter(|| black_box(workbook.tab_form(table.clone()).unwrap()));
                workbook.close().unwrap();
            });
        }
    }

    group.finish();
}

criterion_group!(benches, benchmark_parse, benchmark_tab_form);
criterion_main!(benches);
