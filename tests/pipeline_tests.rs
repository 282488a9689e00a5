//! End-to-end pipeline tests: workbooks in, master workbook out

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use ratesheet::append::MasterTable;
use ratesheet::excel::{create_master_template, WorkbookReader};
use ratesheet::filter::ErcotNarrowing;
use ratesheet::mapper::{MapperOptions, MappingProfile};
use ratesheet::pipeline::{
    append_template_file, export_filtered, export_transformed, process_ercot,
    process_matrix_file, process_path, ProcessOptions,
};
use ratesheet::types::{CellValue, MASTER_COLUMNS};
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook, Worksheet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ═══════════════════════════════════════════════════════════════════════════
// FIXTURES
// ═══════════════════════════════════════════════════════════════════════════

fn price_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, 27).unwrap()
}

fn options(dir: &TempDir) -> ProcessOptions {
    ProcessOptions {
        mapper: MapperOptions {
            price_date: price_date(),
            ..Default::default()
        },
        backup_dir: Some(dir.path().join("backups")),
        ..Default::default()
    }
}

fn write_date(ws: &mut Worksheet, row: u32, col: u16, y: u16, m: u8, d: u8) {
    let format = Format::new().set_num_format("yyyy-mm-dd");
    let date = ExcelDateTime::from_ymd(y, m, d).unwrap();
    ws.write_datetime_with_format(row, col, &date, &format).unwrap();
}

/// Matrix rate sheet with a decoy first sheet
fn write_matrix(path: &Path) {
    let mut workbook = Workbook::new();
    let notes = workbook.add_worksheet().set_name("Notes").unwrap();
    notes.write_string(0, 0, "Prices valid for 24 hours").unwrap();

    let ws = workbook.add_worksheet().set_name("matrix table").unwrap();
    let headers = ["MatrixDescription", "Product", "TermCode", "StartDate", "Price", "TdspCode"];
    for (col, h) in headers.iter().enumerate() {
        ws.write_string(0, col as u16, *h).unwrap();
    }
    let rows = [
        ("NORTH Low Load Factor", "Fixed Price", 12.0, 0.0712),
        ("HOUSTON High Load Factor", "Fixed Price", 24.0, 0.0680),
        ("NORTH Low Load Factor", "Index", 12.0, 0.0500),
        ("WEST Medium Load Factor", "Fixed Price", 18.0, 0.0650),
    ];
    for (i, (desc, product, term, price)) in rows.iter().enumerate() {
        let r = i as u32 + 1;
        ws.write_string(r, 0, *desc).unwrap();
        ws.write_string(r, 1, *product).unwrap();
        ws.write_number(r, 2, *term).unwrap();
        write_date(ws, r, 3, 2025, 9, 1);
        ws.write_number(r, 4, *price).unwrap();
        ws.write_string(r, 5, "ONCOR").unwrap();
    }
    workbook.save(path).unwrap();
}

/// ERCOT workbook with two utility sheets
fn write_ercot(path: &Path) {
    let mut workbook = Workbook::new();
    let headers = [
        "Start Month",
        "State",
        "Utility",
        "Congestion Zone",
        "Load Factor",
        "Term",
        "Product",
        "0-200,000",
        "Broker",
    ];
    let sheets = [
        (
            "ONCOR",
            vec![
                ("ONCOR", "NORTH", "0-100%", "12", "Fixed Price", 0.071),
                ("ONCOR", "NORTH", "0-100%", "18", "Fixed Price", 0.069),
                ("ONCOR", "NORTH", "0-100%", "24", "Index", 0.050),
            ],
        ),
        (
            "CPL",
            vec![
                ("CPL", "SOUTH", "0-100%", "36 Months", "Fixed Price", 0.074),
                ("CPL", "SOUTH", "HIGH", "60", "fixed price", 0.066),
            ],
        ),
    ];

    for (name, rows) in sheets {
        let ws = workbook.add_worksheet().set_name(name).unwrap();
        for (col, h) in headers.iter().enumerate() {
            ws.write_string(0, col as u16, *h).unwrap();
        }
        for (i, (utility, zone, lf, term, product, price)) in rows.iter().enumerate() {
            let r = i as u32 + 1;
            write_date(ws, r, 0, 2025, 10, 1);
            ws.write_string(r, 1, "TX").unwrap();
            ws.write_string(r, 2, *utility).unwrap();
            ws.write_string(r, 3, *zone).unwrap();
            ws.write_string(r, 4, *lf).unwrap();
            ws.write_string(r, 5, *term).unwrap();
            ws.write_string(r, 6, *product).unwrap();
            ws.write_number(r, 7, *price).unwrap();
            ws.write_string(r, 8, "ACME").unwrap();
        }
    }
    workbook.save(path).unwrap();
}

/// Positional rate sheet split over two sheets, none named like a matrix
fn write_positional(path: &Path) {
    let mut workbook = Workbook::new();
    let sheets = [
        (
            "North",
            vec![("12 Months", "Oncor North Zone High", 0.0712), ("6 Months", "Oncor North Zone Low", 0.0650)],
        ),
        ("Coast", vec![("36 Months", "CNP Houston Zone Low", 0.0680)]),
    ];
    for (name, rows) in sheets {
        let ws = workbook.add_worksheet().set_name(name).unwrap();
        for col in 0..10u16 {
            ws.write_string(0, col, format!("Col{}", col)).unwrap();
        }
        for (i, (term, descriptor, price)) in rows.iter().enumerate() {
            let r = i as u32 + 1;
            ws.write_string(r, 3, *term).unwrap();
            ws.write_string(r, 4, *descriptor).unwrap();
            ws.write_number(r, 7, *price).unwrap();
            write_date(ws, r, 9, 2025, 12, 1);
        }
    }
    workbook.save(path).unwrap();
}

/// Master with a header row and `ids.len()` existing rows
fn write_master(dir: &TempDir, ids: &[f64]) -> PathBuf {
    let path = dir.path().join("DAILY PRICING - new.xlsx");
    let mut workbook = Workbook::new();
    let ws = workbook.add_worksheet().set_name("Pricing").unwrap();
    for (col, name) in MASTER_COLUMNS.iter().enumerate() {
        ws.write_string(0, col as u16, *name).unwrap();
    }
    for (i, id) in ids.iter().enumerate() {
        ws.write_number(i as u32 + 1, 0, *id).unwrap();
        ws.write_string(i as u32 + 1, 3, "NORTH").unwrap();
    }
    workbook.save(&path).unwrap();
    path
}

fn text(master: &MasterTable, col: u32, row: u32) -> String {
    master.cell_value(col, row).unwrap().as_text()
}

fn number(master: &MasterTable, col: u32, row: u32) -> f64 {
    master.cell_value(col, row).unwrap().as_number().unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// MATRIX PIPELINE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_process_matrix_file_appends_after_existing_rows() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("Hudson Matrix.xlsx");
    write_matrix(&src);
    let master_path = write_master(&dir, &[1.0, 2.0, 3.0]);

    let report = process_matrix_file(&src, &master_path, &options(&dir)).unwrap();
    assert_eq!(report.rows_appended, 2);
    assert_eq!(report.first_row, Some(5));
    assert_eq!(report.first_id, Some(4));
    assert_eq!(report.last_id, Some(5));

    let master = MasterTable::open(&master_path).unwrap();
    assert_eq!(master.sheet_name(), "Pricing");
    assert_eq!(number(&master, 1, 5), 4.0);
    assert_eq!(text(&master, 4, 5), "NORTH");
    assert_eq!(text(&master, 5, 5), "LOW");
    assert_eq!(text(&master, 6, 5), "HUDSON");
    assert_eq!(number(&master, 7, 5), 12.0);
    assert_eq!(number(&master, 10, 5), 0.0712);
    assert_eq!(number(&master, 12, 5), 0.0712);

    assert_eq!(text(&master, 4, 6), "HOUSTON");
    assert_eq!(text(&master, 5, 6), "HIGH");
    assert_eq!(number(&master, 7, 6), 24.0);

    // Dates land as serials under a date format
    let price_serial = number(&master, 2, 5);
    assert_eq!(
        CellValue::Number(price_serial).as_date(),
        Some(price_date())
    );
    let format = master.number_format(2, 5).unwrap().unwrap();
    assert!(format.contains("yy"));
    assert!(master.is_right_aligned(6, 5).unwrap());

    assert!(master.cell_value(1, 7).unwrap().is_blank());
}

#[test]
fn test_process_matrix_file_backs_up_master() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("matrix.xlsx");
    write_matrix(&src);
    let master_path = write_master(&dir, &[1.0]);

    process_matrix_file(&src, &master_path, &options(&dir)).unwrap();

    let backups: Vec<_> = fs::read_dir(dir.path().join("backups"))
        .unwrap()
        .filter_map(Result::ok)
        .collect();
    assert_eq!(backups.len(), 1);
    let name = backups[0].file_name().to_string_lossy().into_owned();
    assert!(name.starts_with("DAILY PRICING - new_backup_"));
}

#[test]
fn test_process_matrix_file_save_as_leaves_master_alone() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("matrix.xlsx");
    write_matrix(&src);
    let master_path = write_master(&dir, &[1.0]);
    let before = fs::read(&master_path).unwrap();
    let out = dir.path().join("updated.xlsx");

    let opts = ProcessOptions {
        backup: false,
        output: Some(out.clone()),
        ..options(&dir)
    };
    let report = process_matrix_file(&src, &master_path, &opts).unwrap();
    assert_eq!(report.rows_appended, 2);
    assert_eq!(fs::read(&master_path).unwrap(), before);
    assert_eq!(MasterTable::open(&out).unwrap().next_id().unwrap(), 4);
    assert!(!dir.path().join("backups").exists());
}

#[test]
fn test_process_matrix_file_missing_sheet() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("matrix.xlsx");
    write_matrix(&src);
    let master_path = write_master(&dir, &[]);

    let opts = ProcessOptions {
        sheet_preference: "offers".to_string(),
        ..options(&dir)
    };
    let err = process_matrix_file(&src, &master_path, &opts).unwrap_err();
    assert!(err.to_string().contains("offers"));
}

#[test]
fn test_process_matrix_file_missing_master() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("matrix.xlsx");
    write_matrix(&src);

    let result = process_matrix_file(&src, &dir.path().join("nope.xlsx"), &options(&dir));
    assert!(result.is_err());
}

#[test]
fn test_process_path_folder_continues_ids() {
    let dir = TempDir::new().unwrap();
    let feeds = dir.path().join("feeds");
    fs::create_dir_all(&feeds).unwrap();
    for name in ["a", "b"] {
        let tmp = feeds.join(format!("{}.xlsx", name));
        write_matrix(&tmp);
        fs::rename(&tmp, feeds.join(format!("{}.xlsm", name))).unwrap();
    }
    let master_path = write_master(&dir, &[1.0]);

    let outcomes = process_path(&feeds, &master_path, &options(&dir)).unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.result.is_ok()));

    let master = MasterTable::open(&master_path).unwrap();
    assert_eq!(master.next_id().unwrap(), 6);
    assert_eq!(master.first_blank_row().unwrap(), 7);

    // One backup for the whole run
    let backups = fs::read_dir(dir.path().join("backups")).unwrap().count();
    assert_eq!(backups, 1);
}

#[test]
fn test_process_path_folder_with_glob_characters() {
    let dir = TempDir::new().unwrap();
    let feeds = dir.path().join("Rates [Aug]");
    fs::create_dir_all(&feeds).unwrap();
    let tmp = feeds.join("a.xlsx");
    write_matrix(&tmp);
    fs::rename(&tmp, feeds.join("a.xlsm")).unwrap();
    let master_path = write_master(&dir, &[1.0]);

    let outcomes = process_path(&feeds, &master_path, &options(&dir)).unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].path.ends_with("Rates [Aug]/a.xlsm"));
    assert_eq!(MasterTable::open(&master_path).unwrap().next_id().unwrap(), 4);
}

#[test]
fn test_process_path_output_same_as_master() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("matrix.xlsx");
    write_matrix(&src);
    let master_path = write_master(&dir, &[1.0]);

    let opts = ProcessOptions {
        output: Some(master_path.clone()),
        ..options(&dir)
    };
    let outcomes = process_path(&src, &master_path, &opts).unwrap();
    assert!(outcomes[0].result.is_ok());

    let master = MasterTable::open(&master_path).unwrap();
    assert_eq!(number(&master, 1, 2), 1.0);
    assert_eq!(text(&master, 4, 2), "NORTH");
    assert_eq!(master.next_id().unwrap(), 4);
}

// ═══════════════════════════════════════════════════════════════════════════
// POSITIONAL PROFILE
// ═══════════════════════════════════════════════════════════════════════════

fn positional(dir: &TempDir) -> ProcessOptions {
    ProcessOptions {
        profile: MappingProfile::Positional,
        ..options(dir)
    }
}

#[test]
fn test_positional_profile_reads_every_sheet() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("positional.xlsx");
    write_positional(&src);
    let master_path = write_master(&dir, &[1.0]);

    let report = process_matrix_file(&src, &master_path, &positional(&dir)).unwrap();
    assert_eq!(report.rows_appended, 2);
    assert_eq!(report.first_id, Some(2));

    let master = MasterTable::open(&master_path).unwrap();
    assert_eq!(text(&master, 4, 3), "NORTH");
    assert_eq!(text(&master, 5, 3), "HIGH");
    assert_eq!(number(&master, 7, 3), 12.0);
    assert!((number(&master, 10, 3) - 71.2).abs() < 1e-9);

    assert_eq!(text(&master, 4, 4), "COAST");
    assert_eq!(text(&master, 5, 4), "LOW");
    assert_eq!(number(&master, 7, 4), 36.0);
    assert_eq!(
        CellValue::Number(number(&master, 3, 4)).as_date(),
        NaiveDate::from_ymd_opt(2025, 12, 1)
    );
}

#[test]
fn test_export_transformed_positional_every_sheet() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("positional.xlsx");
    write_positional(&src);
    let out = dir.path().join("mapped.xlsx");

    let rows = export_transformed(&src, &out, None, &positional(&dir)).unwrap();
    assert_eq!(rows, 2);

    let sheet = WorkbookReader::open(&out)
        .unwrap()
        .read_sheet("Sheet1")
        .unwrap();
    assert_eq!(sheet.cell(0, 3).as_text(), "NORTH");
    assert_eq!(sheet.cell(1, 3).as_text(), "COAST");
    assert_eq!(sheet.cell(1, 0).as_number(), Some(2.0));
}

// ═══════════════════════════════════════════════════════════════════════════
// ERCOT PIPELINE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_process_ercot_keeps_fixed_price_target_terms() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("ercot.xlsx");
    write_ercot(&src);
    let master_path = write_master(&dir, &[]);

    let report = process_ercot(&src, &master_path, &options(&dir)).unwrap();
    assert_eq!(report.rows_appended, 3);

    let master = MasterTable::open(&master_path).unwrap();
    assert_eq!(number(&master, 1, 2), 1.0);
    assert_eq!(text(&master, 4, 2), "NORTH");
    assert_eq!(text(&master, 6, 2), "ONCOR");
    assert_eq!(number(&master, 7, 2), 12.0);
    assert_eq!(number(&master, 7, 3), 36.0);
    assert_eq!(number(&master, 7, 4), 60.0);
    assert_eq!(text(&master, 5, 4), "HIGH");
}

#[test]
fn test_process_ercot_with_narrowing() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("ercot.xlsx");
    write_ercot(&src);
    let master_path = write_master(&dir, &[]);

    let opts = ProcessOptions {
        narrowing: ErcotNarrowing {
            utilities: vec!["cpl".into()],
            load_factor: Some("0-100%".into()),
        },
        ..options(&dir)
    };
    let report = process_ercot(&src, &master_path, &opts).unwrap();
    assert_eq!(report.rows_appended, 1);

    let master = MasterTable::open(&master_path).unwrap();
    assert_eq!(text(&master, 6, 2), "CPL");
    assert_eq!(number(&master, 7, 2), 36.0);
}

#[test]
fn test_export_filtered_writes_base_columns() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("ercot.xlsx");
    write_ercot(&src);
    let out = dir.path().join("filtered.xlsx");

    let total = export_filtered(&src, &out, &ErcotNarrowing::default(), price_date(), false).unwrap();
    assert_eq!(total, 3);

    let mut reader = WorkbookReader::open(&out).unwrap();
    assert_eq!(reader.sheet_names(), vec!["ONCOR", "CPL"]);
    let oncor = reader.read_sheet("ONCOR").unwrap();
    assert_eq!(oncor.headers.len(), 8);
    assert_eq!(oncor.headers[0], "Start Month");
    assert_eq!(oncor.headers[7], "0-200,000");
    assert_eq!(oncor.len(), 1);
    assert_eq!(oncor.cell(0, 5).as_number(), Some(12.0));

    let cpl = reader.read_sheet("CPL").unwrap();
    assert_eq!(cpl.len(), 2);
    assert_eq!(cpl.cell(0, 5).as_number(), Some(36.0));
}

#[test]
fn test_export_filtered_with_formula_columns() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("ercot.xlsx");
    write_ercot(&src);
    let out = dir.path().join("filtered.xlsx");

    export_filtered(&src, &out, &ErcotNarrowing::default(), price_date(), true).unwrap();

    let mut reader = WorkbookReader::open(&out).unwrap();
    let grid = reader.read_grid("CPL").unwrap();
    assert!(grid[0].len() > 8);
    assert!(grid[0].iter().any(|c| c.as_text() == "J Index"));
}

// ═══════════════════════════════════════════════════════════════════════════
// EXPORT AND TEMPLATE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_export_transformed_continues_master_ids() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("matrix.xlsx");
    write_matrix(&src);
    let master_path = write_master(&dir, &[10.0, 11.0]);
    let out = dir.path().join("mapped.xlsx");

    let rows = export_transformed(&src, &out, Some(&master_path), &options(&dir)).unwrap();
    assert_eq!(rows, 2);

    let sheet = WorkbookReader::open(&out)
        .unwrap()
        .read_sheet("Sheet1")
        .unwrap();
    let headers: Vec<&str> = sheet.headers.iter().map(String::as_str).collect();
    assert_eq!(headers, MASTER_COLUMNS.to_vec());
    assert_eq!(sheet.cell(0, 0).as_number(), Some(12.0));
    assert_eq!(sheet.cell(1, 0).as_number(), Some(13.0));
    assert_eq!(sheet.cell(1, 3).as_text(), "HOUSTON");
}

#[test]
fn test_export_transformed_without_master_starts_at_one() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("matrix.xlsx");
    write_matrix(&src);
    let out = dir.path().join("mapped.xlsx");

    export_transformed(&src, &out, None, &options(&dir)).unwrap();
    let sheet = WorkbookReader::open(&out)
        .unwrap()
        .read_sheet("Sheet1")
        .unwrap();
    assert_eq!(sheet.cell(0, 0).as_number(), Some(1.0));
}

#[test]
fn test_append_template_into_fresh_master() {
    let dir = TempDir::new().unwrap();
    let master_path = dir.path().join("master.xlsx");
    create_master_template(&master_path).unwrap();

    let template = dir.path().join("template.xlsx");
    let mut workbook = Workbook::new();
    let ws = workbook.add_worksheet().set_name("IMPORT").unwrap();
    ws.write_string(0, 0, "Paste rows below").unwrap();
    let headers = [
        "Price Date", "Date", "Zone", "REP1", "Load", "Term", "Min MWh", "Max MWh",
        "Daily No Ruc", "RUC Nodal", "Daily", "Com Disc", "HOA Disc", "Broker Fee",
        "Meter Fee", "Max Meters",
    ];
    for (col, h) in headers.iter().enumerate() {
        ws.write_string(2, col as u16, *h).unwrap();
    }
    write_date(ws, 3, 0, 2025, 8, 27);
    write_date(ws, 3, 1, 2025, 9, 1);
    ws.write_string(3, 2, " NORTH ").unwrap();
    ws.write_string(3, 3, "HUDSON").unwrap();
    ws.write_string(3, 4, "LOW").unwrap();
    ws.write_number(3, 5, 12.0).unwrap();
    ws.write_number(3, 10, 0.0712).unwrap();
    workbook.save(&template).unwrap();

    let opts = ProcessOptions {
        backup: false,
        ..options(&dir)
    };
    let report = append_template_file(&template, "IMPORT", &master_path, &opts).unwrap();
    assert_eq!(report.rows_appended, 1);

    let master = MasterTable::open(&master_path).unwrap();
    assert_eq!(text(&master, 1, 1), "ID");
    assert_eq!(number(&master, 1, 2), 1.0);
    assert_eq!(text(&master, 4, 2), "NORTH");
    assert_eq!(text(&master, 5, 2), "LOW");
    assert_eq!(text(&master, 6, 2), "HUDSON");
    assert_eq!(number(&master, 12, 2), 0.0712);
}

#[test]
fn test_append_template_unknown_sheet() {
    let dir = TempDir::new().unwrap();
    let master_path = write_master(&dir, &[]);
    let template = dir.path().join("template.xlsx");
    write_matrix(&template);

    let err = append_template_file(&template, "IMPORT", &master_path, &options(&dir)).unwrap_err();
    assert!(err.to_string().contains("IMPORT"));
}
