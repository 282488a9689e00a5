use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use ratesheet::cli::{self, MasterArgs, StoreArgs};
use ratesheet::config::Settings;
use ratesheet::filter::ErcotNarrowing;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ratesheet")]
#[command(about = "Rate-sheet ETL: filter, map and append supplier pricing into the master table")]
#[command(long_about = "Ratesheet - electricity rate-sheet ETL

Keeps Fixed Price offers on 12/24/36/48/60 month terms, maps them onto the
17-column master pricing table and appends them with the master's own
number formats and sequential IDs. The master is backed up before every edit.

COMMANDS:
  process          - Map a matrix rate sheet (or a folder of .xlsm files) into the master
  append-ercot     - Filter an ERCOT workbook and append it to the master
  append-block     - Copy the L..AA block of a workbook into the master
  append-template  - Append an import template by header name
  filter           - Write filtered ERCOT rows (plus formula columns) to a new file
  export           - Write mapped rows to a standalone master-shaped file
  init-master      - Create an empty master with headers and formats
  backup           - Back up the master or list backups
  unhide           - Make a hidden sheet visible (or list sheet visibility)
  inspect          - Show sheets and the columns each resolves to
  download/upload  - Move files to and from the drive
  fetch            - Download a rate sheet and append it
  refresh-master   - Replace the local master with the drive copy

EXAMPLES:
  ratesheet process \"Hudson Matrix.xlsm\" --master \"DAILY PRICING - new.xlsx\"
  ratesheet append-ercot ercot.xlsx --utility ONCOR --load-factor 0-100%
  ratesheet filter ercot.xlsx filtered.xlsx --run-date 2025-08-27
  ratesheet fetch \"Hudson Matrix.xlsm\"")]
#[command(version)]
struct Cli {
    /// Settings file (YAML)
    #[arg(short, long, global = true, env = "RATESHEET_CONFIG")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct MasterOpts {
    /// Master workbook (defaults to master_path from settings)
    #[arg(short, long)]
    master: Option<PathBuf>,

    /// Save the updated master here instead of in place
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip the backup taken before editing
    #[arg(long)]
    no_backup: bool,
}

impl From<MasterOpts> for MasterArgs {
    fn from(opts: MasterOpts) -> Self {
        Self {
            master: opts.master,
            output: opts.output,
            no_backup: opts.no_backup,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct NarrowingOpts {
    /// Keep only these utilities (repeatable)
    #[arg(long = "utility")]
    utilities: Vec<String>,

    /// Keep only this load-factor label (e.g. 0-100%)
    #[arg(long)]
    load_factor: Option<String>,
}

impl NarrowingOpts {
    fn into_narrowing(self) -> Option<ErcotNarrowing> {
        if self.utilities.is_empty() && self.load_factor.is_none() {
            return None;
        }
        Some(ErcotNarrowing {
            utilities: self.utilities,
            load_factor: self.load_factor,
        })
    }
}

#[derive(Args, Debug, Clone)]
struct StoreOpts {
    /// Use a local directory as the drive instead of Microsoft Graph
    #[arg(long, env = "RATESHEET_STORE_DIR")]
    store_dir: Option<PathBuf>,
}

impl From<StoreOpts> for StoreArgs {
    fn from(opts: StoreOpts) -> Self {
        Self {
            store_dir: opts.store_dir,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    #[command(long_about = "Map a matrix rate sheet into the master.

PATH may be a single workbook or a folder; for a folder every top-level
.xlsm file is processed (falling back to a recursive search).

The sheet is picked by name: an exact match of --sheet (default
\"matrix table\"), otherwise the first sheet whose name contains it.")]
    /// Map a matrix rate sheet (or folder of them) into the master
    Process {
        /// Rate sheet file or folder
        path: PathBuf,

        #[command(flatten)]
        master: MasterOpts,

        /// Preferred source sheet name
        #[arg(long)]
        sheet: Option<String>,

        /// Mapping profile: matrix or positional
        #[arg(long)]
        profile: Option<String>,

        /// Price date stamped on every row (YYYY-MM-DD, default today)
        #[arg(long)]
        price_date: Option<NaiveDate>,
    },

    /// Filter an ERCOT workbook and append it to the master
    AppendErcot {
        source: PathBuf,

        #[command(flatten)]
        master: MasterOpts,

        #[command(flatten)]
        narrowing: NarrowingOpts,

        /// Price date stamped on every row (YYYY-MM-DD, default today)
        #[arg(long)]
        price_date: Option<NaiveDate>,
    },

    /// Copy columns L..AA of a workbook into the master
    AppendBlock {
        source: PathBuf,

        #[command(flatten)]
        master: MasterOpts,
    },

    /// Append an import template into the master by header name
    AppendTemplate {
        template: PathBuf,

        /// Template sheet (default IMPORT)
        #[arg(long)]
        sheet: Option<String>,

        #[command(flatten)]
        master: MasterOpts,
    },

    /// Write the Fixed Price target-term rows of an ERCOT workbook to a new file
    Filter {
        source: PathBuf,
        output: PathBuf,

        #[command(flatten)]
        narrowing: NarrowingOpts,

        /// Date used by the derived formula columns (YYYY-MM-DD, default today)
        #[arg(long)]
        run_date: Option<NaiveDate>,

        /// Only write the eight base columns
        #[arg(long)]
        no_formulas: bool,
    },

    /// Map a source sheet into a standalone master-shaped workbook
    Export {
        source: PathBuf,
        output: PathBuf,

        /// Continue IDs from this master
        #[arg(short, long)]
        master: Option<PathBuf>,

        /// Mapping profile: matrix or positional
        #[arg(long)]
        profile: Option<String>,

        /// Price date stamped on every row (YYYY-MM-DD, default today)
        #[arg(long)]
        price_date: Option<NaiveDate>,
    },

    /// Create an empty master workbook with headers and column formats
    InitMaster {
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Back up the master workbook
    Backup {
        #[arg(short, long)]
        master: Option<PathBuf>,

        /// List existing backups instead
        #[arg(long)]
        list: bool,
    },

    /// Make a hidden sheet visible; without SHEET, list sheet visibility
    Unhide {
        file: PathBuf,
        sheet: Option<String>,

        /// Save here instead of in place
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show sheets and resolved columns of a workbook
    Inspect { file: PathBuf },

    /// Download a file from the upload folder
    Download {
        name: String,

        #[arg(long)]
        folder: Option<String>,

        /// Local destination (default: NAME in the current directory)
        #[arg(short, long)]
        dest: Option<PathBuf>,

        #[command(flatten)]
        store: StoreOpts,
    },

    /// Upload a file to the upload folder
    Upload {
        file: PathBuf,

        #[arg(long)]
        folder: Option<String>,

        /// Remote file name (default: the local file name)
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        store: StoreOpts,
    },

    /// Download a rate sheet and append it to the master
    Fetch {
        name: String,

        #[arg(long)]
        folder: Option<String>,

        #[command(flatten)]
        master: MasterOpts,

        #[command(flatten)]
        store: StoreOpts,

        #[arg(long)]
        price_date: Option<NaiveDate>,
    },

    /// Move the local master aside and download a fresh copy
    RefreshMaster {
        /// Folder for the master (default: master_path's folder)
        #[arg(long)]
        dir: Option<PathBuf>,

        #[command(flatten)]
        store: StoreOpts,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "ratesheet=info",
        1 => "ratesheet=debug",
        _ => "ratesheet=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Process {
            path,
            master,
            sheet,
            profile,
            price_date,
        } => cli::process(&settings, path, master.into(), sheet, profile, price_date)?,

        Commands::AppendErcot {
            source,
            master,
            narrowing,
            price_date,
        } => cli::append_ercot(
            &settings,
            source,
            master.into(),
            narrowing.into_narrowing(),
            price_date,
        )?,

        Commands::AppendBlock { source, master } => {
            cli::append_block(&settings, source, master.into())?
        }

        Commands::AppendTemplate {
            template,
            sheet,
            master,
        } => cli::append_template(&settings, template, sheet, master.into())?,

        Commands::Filter {
            source,
            output,
            narrowing,
            run_date,
            no_formulas,
        } => cli::filter(
            &settings,
            source,
            output,
            narrowing.into_narrowing(),
            run_date,
            no_formulas,
        )?,

        Commands::Export {
            source,
            output,
            master,
            profile,
            price_date,
        } => cli::export(&settings, source, output, master, profile, price_date)?,

        Commands::InitMaster { output, force } => cli::init_master(output, force)?,

        Commands::Backup { master, list } => cli::backup(&settings, master, list)?,

        Commands::Unhide {
            file,
            sheet,
            output,
        } => cli::unhide(file, sheet, output)?,

        Commands::Inspect { file } => cli::inspect(&settings, file)?,

        Commands::Download {
            name,
            folder,
            dest,
            store,
        } => cli::download(&settings, store.into(), name, folder, dest).await?,

        Commands::Upload {
            file,
            folder,
            name,
            store,
        } => cli::upload(&settings, store.into(), file, folder, name).await?,

        Commands::Fetch {
            name,
            folder,
            master,
            store,
            price_date,
        } => {
            cli::fetch(&settings, store.into(), name, folder, master.into(), price_date).await?
        }

        Commands::RefreshMaster { dir, store } => {
            cli::refresh(&settings, store.into(), dir).await?
        }
    }

    Ok(())
}
