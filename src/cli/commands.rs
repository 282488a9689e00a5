use crate::append::{sheet_states, unhide_sheet, AppendReport};
use crate::backup::{create_backup, list_backups};
use crate::config::{GraphConfig, Settings};
use crate::error::{RateSheetError, RateSheetResult};
use crate::excel::{create_master_template, select_sheet, WorkbookReader};
use crate::filter::ErcotNarrowing;
use crate::mapper::MappingProfile;
use crate::pipeline::{self, FetchRequest, ProcessOptions};
use crate::resolver::ColumnResolver;
use crate::transfer::{refresh_master, FileStore, GraphStore, LocalStore, RemotePath};
use chrono::{Local, NaiveDate};
use colored::Colorize;
use std::path::{Path, PathBuf};

/// Flags shared by every command that edits the master
#[derive(Debug, Clone, Default)]
pub struct MasterArgs {
    pub master: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub no_backup: bool,
}

impl MasterArgs {
    fn master_path(&self, settings: &Settings) -> PathBuf {
        self.master
            .clone()
            .unwrap_or_else(|| settings.master_path.clone())
    }

    fn options(&self, settings: &Settings, price_date: Option<NaiveDate>) -> ProcessOptions {
        ProcessOptions {
            backup: !self.no_backup,
            output: self.output.clone(),
            ..ProcessOptions::from_settings(settings, price_date)
        }
    }
}

pub fn parse_profile(value: &str) -> RateSheetResult<MappingProfile> {
    match value.trim().to_lowercase().as_str() {
        "matrix" => Ok(MappingProfile::Matrix),
        "positional" => Ok(MappingProfile::Positional),
        other => Err(RateSheetError::Validation(format!(
            "Unknown profile '{}' (expected matrix or positional)",
            other
        ))),
    }
}

fn print_report(report: &AppendReport, master: &Path, output: Option<&Path>) {
    if report.rows_appended == 0 {
        println!("{}", "⚠️  Nothing appended".yellow());
        return;
    }
    let target = output.unwrap_or(master);
    println!("{} {}", "✅".green(), report.to_string().bold().green());
    println!("   Saved: {}", target.display());
}

/// Map a matrix rate sheet (or a folder of them) into the master
pub fn process(
    settings: &Settings,
    path: PathBuf,
    args: MasterArgs,
    sheet: Option<String>,
    profile: Option<String>,
    price_date: Option<NaiveDate>,
) -> RateSheetResult<()> {
    let master = args.master_path(settings);
    let mut options = args.options(settings, price_date);
    if let Some(sheet) = sheet {
        options.sheet_preference = sheet;
    }
    if let Some(profile) = profile {
        options.profile = parse_profile(&profile)?;
    }

    println!("{}", "⚡ Processing rate sheets".bold().green());
    println!("   Source: {}", path.display());
    println!("   Master: {}\n", master.display());

    let outcomes = pipeline::process_path(&path, &master, &options)?;
    let mut total = AppendReport::default();
    let mut failures = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => {
                println!("   📄 {}: {}", outcome.path.display(), report);
                total.merge(report);
            }
            Err(e) => {
                failures += 1;
                println!("   {} {}: {}", "❌".red(), outcome.path.display(), e.to_string().red());
            }
        }
    }
    println!();
    print_report(&total, &master, options.output.as_deref());

    if failures > 0 {
        return Err(RateSheetError::Validation(format!(
            "{} of {} files failed",
            failures,
            outcomes.len()
        )));
    }
    Ok(())
}

/// Filter an ERCOT workbook and append it to the master
pub fn append_ercot(
    settings: &Settings,
    source: PathBuf,
    args: MasterArgs,
    narrowing: Option<ErcotNarrowing>,
    price_date: Option<NaiveDate>,
) -> RateSheetResult<()> {
    let master = args.master_path(settings);
    let mut options = args.options(settings, price_date);
    if let Some(narrowing) = narrowing {
        options.narrowing = narrowing;
    }

    println!("{}", "⚡ Appending ERCOT rates".bold().green());
    println!("   Source: {}", source.display());
    println!("   Master: {}\n", master.display());

    let report = pipeline::process_ercot(&source, &master, &options)?;
    print_report(&report, &master, options.output.as_deref());
    Ok(())
}

/// Copy the L..AA block of a source workbook into the master
pub fn append_block(settings: &Settings, source: PathBuf, args: MasterArgs) -> RateSheetResult<()> {
    let master = args.master_path(settings);
    let options = args.options(settings, None);

    println!("{}", "⚡ Appending rate block".bold().green());
    println!("   Source: {}", source.display());
    println!("   Master: {}\n", master.display());

    let report = pipeline::append_block_file(&source, &master, &options)?;
    print_report(&report, &master, options.output.as_deref());
    Ok(())
}

/// Append an import template's rows into the master by header name
pub fn append_template(
    settings: &Settings,
    template: PathBuf,
    sheet: Option<String>,
    args: MasterArgs,
) -> RateSheetResult<()> {
    let master = args.master_path(settings);
    let options = args.options(settings, None);
    let sheet = sheet.unwrap_or_else(|| settings.template_sheet.clone());

    println!("{}", "⚡ Appending template".bold().green());
    println!("   Template: {} [{}]", template.display(), sheet.cyan());
    println!("   Master:   {}\n", master.display());

    let report = pipeline::append_template_file(&template, &sheet, &master, &options)?;
    print_report(&report, &master, options.output.as_deref());
    Ok(())
}

/// Write the Fixed Price target-term rows of an ERCOT workbook to a new file
pub fn filter(
    settings: &Settings,
    source: PathBuf,
    output: PathBuf,
    narrowing: Option<ErcotNarrowing>,
    run_date: Option<NaiveDate>,
    no_formulas: bool,
) -> RateSheetResult<()> {
    let narrowing = narrowing.unwrap_or_else(|| settings.ercot.clone());
    let run_date = run_date.unwrap_or_else(|| Local::now().date_naive());

    println!("{}", "🔎 Filtering ERCOT workbook".bold().green());
    println!("   Source: {}", source.display());
    if narrowing.is_active() {
        println!(
            "   Utilities: {}  Load factor: {}",
            narrowing.utilities.join(", ").cyan(),
            narrowing.load_factor.as_deref().unwrap_or("any").cyan()
        );
    }

    let rows = pipeline::export_filtered(&source, &output, &narrowing, run_date, !no_formulas)?;
    println!("\n{} {}", "✅".green(), format!("{} rows kept", rows).bold().green());
    println!("   Saved: {}", output.display());
    Ok(())
}

/// Map a source sheet into a standalone master-shaped workbook
pub fn export(
    settings: &Settings,
    source: PathBuf,
    output: PathBuf,
    master: Option<PathBuf>,
    profile: Option<String>,
    price_date: Option<NaiveDate>,
) -> RateSheetResult<()> {
    let mut options = ProcessOptions::from_settings(settings, price_date);
    if let Some(profile) = profile {
        options.profile = parse_profile(&profile)?;
    }

    println!("{}", "📤 Exporting mapped rows".bold().green());
    println!("   Source: {}", source.display());

    let rows = pipeline::export_transformed(&source, &output, master.as_deref(), &options)?;
    println!("\n{} {}", "✅".green(), format!("{} rows written", rows).bold().green());
    println!("   Saved: {}", output.display());
    Ok(())
}

/// Create an empty master workbook with the header row and column formats
pub fn init_master(output: PathBuf, force: bool) -> RateSheetResult<()> {
    if output.exists() && !force {
        return Err(RateSheetError::Validation(format!(
            "{} already exists (use --force to overwrite)",
            output.display()
        )));
    }
    create_master_template(&output)?;
    println!("{} Master template created: {}", "✅".green(), output.display());
    Ok(())
}

/// Back up the master, or list existing backups
pub fn backup(settings: &Settings, master: Option<PathBuf>, list: bool) -> RateSheetResult<()> {
    let master = master.unwrap_or_else(|| settings.master_path.clone());
    let dir = settings.backup_dir.as_deref();

    if list {
        let backups = list_backups(&master, dir)?;
        if backups.is_empty() {
            println!("{}", "No backups found".yellow());
        }
        for path in backups {
            println!("   {}", path.display());
        }
        return Ok(());
    }

    let path = create_backup(&master, dir)?;
    println!("{} Backup created: {}", "✅".green(), path.display());
    Ok(())
}

/// Make a sheet visible, or list sheet visibility when no sheet is given
pub fn unhide(file: PathBuf, sheet: Option<String>, output: Option<PathBuf>) -> RateSheetResult<()> {
    let Some(sheet) = sheet else {
        println!("{}", format!("📑 Sheets in {}", file.display()).bold().cyan());
        for (name, visible) in sheet_states(&file)? {
            let state = if visible { "visible".green() } else { "hidden".yellow() };
            println!("   {} ({})", name, state);
        }
        return Ok(());
    };

    unhide_sheet(&file, &sheet, output.as_deref())?;
    let target = output.as_deref().unwrap_or(&file);
    println!("{} '{}' is visible in {}", "✅".green(), sheet, target.display());
    Ok(())
}

/// Show sheets, header rows and resolved columns of a workbook
pub fn inspect(settings: &Settings, file: PathBuf) -> RateSheetResult<()> {
    let mut reader = WorkbookReader::open(&file)?;
    let names = reader.sheet_names();
    let preferred = select_sheet(&names, &settings.matrix_sheet);

    println!("{}", format!("🔍 {}", file.display()).bold().green());
    for name in &names {
        let sheet = reader.read_sheet(name)?;
        let marker = if preferred.as_deref() == Some(name.as_str()) {
            " ★".yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "\n   📊 {}{} ({} rows, {} columns)",
            name.bright_blue().bold(),
            marker,
            sheet.len(),
            sheet.headers.len()
        );

        let resolved = ColumnResolver::new(&sheet.headers).resolve_all(true);
        for (field, index) in resolved.fields() {
            println!(
                "      {} → {}",
                field.name().cyan(),
                sheet.headers.get(index).map(String::as_str).unwrap_or("")
            );
        }
    }
    Ok(())
}

/// Where transfer commands read and write
#[derive(Debug, Clone, Default)]
pub struct StoreArgs {
    /// Use a local directory instead of the Graph drive
    pub store_dir: Option<PathBuf>,
}

struct Remote {
    store: Box<dyn FileStore>,
    graph: Option<GraphConfig>,
}

impl Remote {
    fn open(args: &StoreArgs) -> RateSheetResult<Self> {
        match &args.store_dir {
            Some(dir) => Ok(Self {
                store: Box::new(LocalStore::new(dir)),
                graph: None,
            }),
            None => {
                let config = GraphConfig::from_env()?;
                Ok(Self {
                    store: Box::new(GraphStore::new(config.clone())),
                    graph: Some(config),
                })
            }
        }
    }

    fn upload_folder(&self, settings: &Settings, folder: Option<String>) -> RateSheetResult<String> {
        folder
            .or_else(|| settings.remote.upload_folder.clone())
            .or_else(|| self.graph.as_ref().and_then(|g| g.upload_folder.clone()))
            .ok_or_else(|| {
                RateSheetError::Config(
                    "No upload folder: pass --folder, set remote.upload_folder or SHAREPOINT_UPLOAD_FOLDER"
                        .to_string(),
                )
            })
    }

    fn master_remote(&self, settings: &Settings) -> RemotePath {
        let name = match &self.graph {
            Some(graph) => graph.master_file_name.clone(),
            None => file_name(&settings.master_path),
        };
        RemotePath::new(settings.remote.master_folder.clone(), name)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub async fn download(
    settings: &Settings,
    store: StoreArgs,
    name: String,
    folder: Option<String>,
    dest: Option<PathBuf>,
) -> RateSheetResult<()> {
    let remote = Remote::open(&store)?;
    let remote_path = RemotePath::new(remote.upload_folder(settings, folder)?, name.clone());
    let dest = dest.unwrap_or_else(|| PathBuf::from(&name));

    remote.store.download(&remote_path, &dest).await?;
    println!("{} Downloaded {} → {}", "✅".green(), remote_path, dest.display());
    Ok(())
}

pub async fn upload(
    settings: &Settings,
    store: StoreArgs,
    file: PathBuf,
    folder: Option<String>,
    name: Option<String>,
) -> RateSheetResult<()> {
    let remote = Remote::open(&store)?;
    let name = name.unwrap_or_else(|| file_name(&file));
    let remote_path = RemotePath::new(remote.upload_folder(settings, folder)?, name);

    remote.store.upload(&file, &remote_path).await?;
    println!("{} Uploaded {} → {}", "✅".green(), file.display(), remote_path);
    Ok(())
}

/// Download a rate sheet, make sure the master is local, and append
pub async fn fetch(
    settings: &Settings,
    store: StoreArgs,
    name: String,
    folder: Option<String>,
    args: MasterArgs,
    price_date: Option<NaiveDate>,
) -> RateSheetResult<()> {
    let remote = Remote::open(&store)?;
    let master = args.master_path(settings);
    let options = args.options(settings, price_date);

    let download_dir = master
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("downloads");
    let request = FetchRequest {
        file_name: name,
        source_folder: remote.upload_folder(settings, folder)?,
        master_remote: remote.master_remote(settings),
        download_dir,
    };

    println!("{}", "⚡ Fetching rate sheet".bold().green());
    println!("   Remote: /{}", request.source_folder.trim_matches('/'));
    println!("   File:   {}", request.file_name);
    println!("   Master: {}\n", master.display());

    let report = pipeline::fetch_and_process(remote.store.as_ref(), &request, &master, &options).await?;
    print_report(&report, &master, options.output.as_deref());
    Ok(())
}

/// Move the local master aside and download a fresh copy
pub async fn refresh(settings: &Settings, store: StoreArgs, dir: Option<PathBuf>) -> RateSheetResult<()> {
    let remote = Remote::open(&store)?;
    let dir = dir.unwrap_or_else(|| {
        settings
            .master_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });

    let local = refresh_master(remote.store.as_ref(), &dir, &remote.master_remote(settings)).await?;
    println!("{} Master refreshed: {}", "✅".green(), local.display());
    Ok(())
}
