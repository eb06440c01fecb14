use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use crime_stats_etl::config::{ConfigLoader, ResolvedConfig};
use crime_stats_etl::error::{ErrorKind, EtlError};
use crime_stats_etl::fetch::ClearPolicy;
use crime_stats_etl::output::JsonOutput;
use crime_stats_etl::pipeline::{ExecutionMode, Pipeline};
use crime_stats_etl::warehouse::{FileWarehouse, RelationalStore};

#[derive(Parser)]
#[command(name = "crime-etl")]
#[command(about = "Fetch CSO crime statistics, stage them and load cleaned tables")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run fetch and transform for the registered datasets")]
    Run(RunArgs),
    #[command(about = "List registered datasets")]
    Datasets(ConfigArgs),
    #[command(about = "Print a stored table")]
    Show(ShowArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    data_dir: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Staging key to run; repeat for several. Defaults to every dataset.
    #[arg(long = "dataset", value_name = "KEY")]
    datasets: Vec<String>,

    #[arg(long)]
    parallel: bool,

    #[arg(long, value_enum)]
    clear_policy: Option<ClearPolicy>,
}

#[derive(Args)]
struct ShowArgs {
    table: String,

    #[command(flatten)]
    config: ConfigArgs,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(3),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<EtlError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &EtlError) -> u8 {
    match error.kind() {
        ErrorKind::Config => 2,
        _ => 1,
    }
}

/// Returns whether every dataset run succeeded.
fn run() -> miette::Result<bool> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_pipeline(args),
        Commands::Datasets(args) => {
            let resolved = load_config(&args)?;
            JsonOutput::print_datasets(&resolved.registry).into_diagnostic()?;
            Ok(true)
        }
        Commands::Show(args) => {
            let resolved = load_config(&args.config)?;
            let warehouse = FileWarehouse::open(resolved.tables_dir())?;
            let frame = warehouse.read_table(&args.table)?;
            JsonOutput::print_table(&args.table, &frame).into_diagnostic()?;
            warehouse.close()?;
            Ok(true)
        }
    }
}

fn load_config(args: &ConfigArgs) -> Result<ResolvedConfig, EtlError> {
    let mut resolved = ConfigLoader::resolve(args.config.as_deref())?;
    if let Some(dir) = &args.data_dir {
        resolved.data_dir = dir.clone();
    }
    Ok(resolved)
}

fn run_pipeline(args: RunArgs) -> miette::Result<bool> {
    let mut resolved = load_config(&args.config)?;
    if let Some(policy) = args.clear_policy {
        resolved.clear_policy = policy;
    }
    if args.parallel {
        resolved.execution = ExecutionMode::Parallel;
    }
    let registry = if args.datasets.is_empty() {
        resolved.registry.clone()
    } else {
        resolved.registry.select(&args.datasets)?
    };

    let pipeline = Pipeline::open(&resolved)?;
    let reports = pipeline.run_all(&registry, resolved.execution);
    pipeline.close()?;

    JsonOutput::print_runs(&reports).into_diagnostic()?;
    Ok(reports.iter().all(|report| report.succeeded()))
}
