mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::error::CliError;

/// Ingests FFIEC Call Report bulk files into canonical records.
#[derive(Parser, Debug)]
#[command(name = "fire-bulk")]
#[command(about = "Resumable FFIEC bulk-data ingestion", long_about = None)]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, env = "FIRE_BULK_CONFIG")]
    config: Option<PathBuf>,

    /// Ledger database (overrides the configured path)
    #[arg(long, env = "FIRE_BULK_DB")]
    db: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover bulk files in a directory and record them in the ledger
    Scan {
        dir: PathBuf,
    },

    /// Convert one quarter's schedule files into canonical records
    Process {
        dir: PathBuf,

        /// Quarter to process, e.g. 2023-Q4
        #[arg(short, long)]
        quarter: String,

        /// Only process files that are pending or failed
        #[arg(long)]
        resume: bool,

        /// Reset failed files to pending before selecting
        #[arg(long)]
        retry_failed: bool,

        /// Keep only rows for this institution (IDRSSD)
        #[arg(long)]
        rssd: Option<String>,

        /// Write canonical records to this file as JSON lines
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop starting new files after this many seconds
        #[arg(long)]
        time_budget: Option<u64>,

        /// Stream progress events to stderr as JSON lines
        #[arg(long)]
        events: bool,
    },

    /// Show ledger counts
    Status {
        #[arg(short, long)]
        quarter: Option<String>,
    },

    /// List failed files with their errors
    Failed {
        #[arg(short, long)]
        quarter: Option<String>,
    },

    /// List quarters present in the ledger
    Quarters,

    /// Delete completed records older than the retention window
    Cleanup {
        #[arg(long)]
        days: Option<u32>,
    },
}

fn init_logging(format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let layer = match format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };
    let subscriber = tracing_subscriber::registry().with(filter).with(layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn run(args: Args) -> Result<ExitCode, CliError> {
    let ctx = commands::Context::open(args.config.as_deref(), args.db.as_deref())?;

    match args.command {
        Command::Scan { dir } => commands::scan(&ctx, &dir),
        Command::Process {
            dir,
            quarter,
            resume,
            retry_failed,
            rssd,
            output,
            time_budget,
            events,
        } => commands::process(
            &ctx,
            commands::ProcessArgs {
                dir,
                quarter,
                resume,
                retry_failed,
                rssd,
                output,
                time_budget,
                events,
            },
        ),
        Command::Status { quarter } => commands::status(&ctx, quarter.as_deref()),
        Command::Failed { quarter } => commands::failed(&ctx, quarter.as_deref()),
        Command::Quarters => commands::quarters(&ctx),
        Command::Cleanup { days } => commands::cleanup(&ctx, days),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
