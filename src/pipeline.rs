//! End-to-end runs: read a source, map it, back up and append to the master

use crate::append::{AppendReport, MasterTable};
use crate::backup::backup_before_edit;
use crate::config::Settings;
use crate::error::{RateSheetError, RateSheetResult};
use crate::excel::{select_sheet, ErcotFormulaExporter, MasterExporter, WorkbookReader};
use crate::filter::{ErcotNarrowing, RowFilter};
use crate::mapper::{assign_ids, MapperOptions, MappingProfile, SchemaMapper};
use crate::transfer::{ensure_master, FileStore, RemotePath};
use crate::types::{BaseRow, MasterRow, SheetData};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Knobs shared by every pipeline run
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub sheet_preference: String,
    pub profile: MappingProfile,
    pub mapper: MapperOptions,
    pub narrowing: ErcotNarrowing,
    /// Back up the master before editing it
    pub backup: bool,
    pub backup_dir: Option<PathBuf>,
    /// Save the updated master here instead of in place
    pub output: Option<PathBuf>,
}

impl ProcessOptions {
    pub fn from_settings(settings: &Settings, price_date: Option<NaiveDate>) -> Self {
        Self {
            sheet_preference: settings.matrix_sheet.clone(),
            profile: settings.profile,
            mapper: settings.mapper_options(price_date),
            narrowing: settings.ercot.clone(),
            backup: true,
            backup_dir: settings.backup_dir.clone(),
            output: None,
        }
    }
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), None)
    }
}

/// Outcome of one file in a directory run
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: RateSheetResult<AppendReport>,
}

/// Read the preferred sheet of a workbook
pub fn read_preferred_sheet(src: &Path, preference: &str) -> RateSheetResult<SheetData> {
    let mut reader = WorkbookReader::open(src)?;
    let names = reader.sheet_names();
    let sheet = select_sheet(&names, preference).ok_or_else(|| {
        RateSheetError::Import(format!(
            "No sheet matching '{}' in {} (sheets: {})",
            preference,
            src.display(),
            names.join(", ")
        ))
    })?;
    info!(src = %src.display(), sheet = %sheet, "reading source sheet");
    reader.read_sheet(&sheet)
}

/// Back up (optionally), open, append, save
fn append_and_save<F>(master: &Path, options: &ProcessOptions, append: F) -> RateSheetResult<AppendReport>
where
    F: FnOnce(&mut MasterTable) -> RateSheetResult<AppendReport>,
{
    let mut table = MasterTable::open(master)?;
    if options.backup {
        backup_before_edit(master, options.backup_dir.as_deref());
    }

    let report = append(&mut table)?;
    if report.rows_appended == 0 {
        return Ok(report);
    }
    match &options.output {
        Some(out) => table.save_as(out)?,
        None => table.save()?,
    }
    Ok(report)
}

/// Master rows mapped from one source workbook
///
/// `Matrix` reads the preferred sheet; `Positional` reads every sheet and
/// concatenates the rows in sheet order.
pub fn map_source(src: &Path, options: &ProcessOptions) -> RateSheetResult<Vec<MasterRow>> {
    let mapper = SchemaMapper::new(options.mapper.clone());
    match options.profile {
        MappingProfile::Matrix => {
            let sheet = read_preferred_sheet(src, &options.sheet_preference)?;
            Ok(mapper.map_matrix(&sheet))
        }
        MappingProfile::Positional => {
            let sheets = WorkbookReader::open(src)?.read_all()?;
            info!(src = %src.display(), sheets = sheets.len(), "reading every source sheet");
            Ok(sheets.iter().flat_map(|sheet| mapper.map_positional(sheet)).collect())
        }
    }
}

/// Map one rate sheet and append it to the master
pub fn process_matrix_file(src: &Path, master: &Path, options: &ProcessOptions) -> RateSheetResult<AppendReport> {
    let rows = map_source(src, options)?;
    if rows.is_empty() {
        warn!(src = %src.display(), "no rows mapped; master left untouched");
        return Ok(AppendReport::default());
    }
    append_and_save(master, options, |table| table.append_master_rows(&rows))
}

/// Source workbooks under `path`: the file itself, or `.xlsm` files in a folder
pub fn discover_sources(path: &Path) -> RateSheetResult<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(RateSheetError::Validation(format!(
            "Path not found: {}",
            path.display()
        )));
    }

    let dir = glob::Pattern::escape(&path.to_string_lossy());
    let top = glob_sorted(&format!("{}/*.xlsm", dir))?;
    if !top.is_empty() {
        return Ok(top);
    }
    glob_sorted(&format!("{}/**/*.xlsm", dir))
}

fn glob_sorted(pattern: &str) -> RateSheetResult<Vec<PathBuf>> {
    let mut found: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| RateSheetError::Validation(format!("Bad search pattern: {}", e)))?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    found.sort();
    Ok(found)
}

/// Both paths name the same existing file
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Process one `.xlsm` file or every `.xlsm` file of a folder
///
/// The master is backed up once; a failing file is logged and the run
/// continues with the next one.
pub fn process_path(path: &Path, master: &Path, options: &ProcessOptions) -> RateSheetResult<Vec<FileOutcome>> {
    let sources = discover_sources(path)?;
    if sources.is_empty() {
        return Err(RateSheetError::Validation(format!(
            "No .xlsm files found under {}",
            path.display()
        )));
    }

    if options.backup {
        backup_before_edit(master, options.backup_dir.as_deref());
    }

    // Every file appends to the same workbook
    let target = match &options.output {
        Some(out) if !same_file(master, out) => {
            fs::copy(master, out)?;
            out.clone()
        }
        _ => master.to_path_buf(),
    };
    let per_file = ProcessOptions {
        backup: false,
        output: None,
        ..options.clone()
    };

    let mut outcomes = Vec::with_capacity(sources.len());
    for src in sources {
        let result = process_matrix_file(&src, &target, &per_file);
        match &result {
            Ok(report) => info!(src = %src.display(), %report, "processed"),
            Err(e) => error!(src = %src.display(), error = %e, "processing failed"),
        }
        outcomes.push(FileOutcome { path: src, result });
    }
    Ok(outcomes)
}

/// Filter every sheet of an ERCOT workbook, keeping sheet names
pub fn filter_ercot_workbook(src: &Path, narrowing: &ErcotNarrowing) -> RateSheetResult<Vec<(String, Vec<BaseRow>)>> {
    let sheets = WorkbookReader::open(src)?.read_all()?;
    let filter = RowFilter::with_narrowing(narrowing.clone());
    Ok(sheets
        .iter()
        .map(|sheet| (sheet.name.clone(), filter.filter_sheet(sheet)))
        .collect())
}

/// Filter an ERCOT workbook and append the mapped rows to the master
pub fn process_ercot(src: &Path, master: &Path, options: &ProcessOptions) -> RateSheetResult<AppendReport> {
    let filtered: Vec<BaseRow> = filter_ercot_workbook(src, &options.narrowing)?
        .into_iter()
        .flat_map(|(_, rows)| rows)
        .collect();
    info!(src = %src.display(), rows = filtered.len(), "filtered ERCOT workbook");

    let rows = SchemaMapper::new(options.mapper.clone()).map_base_rows(&filtered);
    if rows.is_empty() {
        warn!(src = %src.display(), "no Fixed Price rows on target terms; master left untouched");
        return Ok(AppendReport::default());
    }
    append_and_save(master, options, |table| table.append_master_rows(&rows))
}

/// Write filtered ERCOT sheets (plus derived formula columns) to a new workbook
pub fn export_filtered(
    src: &Path,
    out: &Path,
    narrowing: &ErcotNarrowing,
    run_date: NaiveDate,
    with_formulas: bool,
) -> RateSheetResult<usize> {
    let sheets = filter_ercot_workbook(src, narrowing)?;
    let total = sheets.iter().map(|(_, rows)| rows.len()).sum();

    let exporter = ErcotFormulaExporter::new(run_date);
    let exporter = if with_formulas {
        exporter
    } else {
        exporter.without_formulas()
    };
    exporter.export(&sheets, out)?;
    Ok(total)
}

/// Copy columns L..AA of the first sheet of `src` into the master
pub fn append_block_file(src: &Path, master: &Path, options: &ProcessOptions) -> RateSheetResult<AppendReport> {
    let mut reader = WorkbookReader::open(src)?;
    let first = reader
        .sheet_names()
        .into_iter()
        .next()
        .ok_or_else(|| RateSheetError::Import(format!("No sheets in {}", src.display())))?;
    let sheet = reader.read_sheet(&first)?;
    append_and_save(master, options, |table| table.append_block(&sheet))
}

/// Append a template sheet (header row detected) into the master
pub fn append_template_file(
    template: &Path,
    sheet_name: &str,
    master: &Path,
    options: &ProcessOptions,
) -> RateSheetResult<AppendReport> {
    let mut reader = WorkbookReader::open(template)?;
    let names = reader.sheet_names();
    if !names.iter().any(|n| n == sheet_name) {
        return Err(RateSheetError::Import(format!(
            "Sheet '{}' not found in template {}",
            sheet_name,
            template.display()
        )));
    }
    let sheet = reader.read_sheet_detect_header(sheet_name)?;
    append_and_save(master, options, |table| table.append_from_template(&sheet))
}

/// Map a source workbook into a new master-shaped workbook
///
/// IDs continue from `master` when given, else start at 1.
pub fn export_transformed(
    src: &Path,
    out: &Path,
    master: Option<&Path>,
    options: &ProcessOptions,
) -> RateSheetResult<usize> {
    let mut rows = map_source(src, options)?;

    let start = match master {
        Some(m) => MasterTable::open(m)?.next_id()?,
        None => 1,
    };
    assign_ids(&mut rows, start);
    MasterExporter::new().export(&rows, out)?;
    Ok(rows.len())
}

/// What to fetch and where the master lives remotely
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub file_name: String,
    pub source_folder: String,
    pub master_remote: RemotePath,
    pub download_dir: PathBuf,
}

/// Make sure the master exists locally, download a rate sheet and append it
///
/// `.xlsm` files go through the matrix pipeline, anything else through the
/// ERCOT pipeline.
pub async fn fetch_and_process(
    store: &dyn FileStore,
    request: &FetchRequest,
    master: &Path,
    options: &ProcessOptions,
) -> RateSheetResult<AppendReport> {
    ensure_master(store, master, &request.master_remote).await?;

    let remote = RemotePath::new(request.source_folder.clone(), request.file_name.clone());
    let local = request.download_dir.join(&request.file_name);
    store.download(&remote, &local).await?;

    let is_matrix = local
        .extension()
        .map(|e| e.eq_ignore_ascii_case("xlsm"))
        .unwrap_or(false);
    if is_matrix {
        process_matrix_file(&local, master, options)
    } else {
        process_ercot(&local, master, options)
    }
}
