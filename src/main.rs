use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use keeper::commands;

#[derive(Parser)]
#[command(name = "keeper", version, about = "Keep processes running from a TOML ecosystem file")]
struct Cli {
    /// Log output format (filter with RUST_LOG)
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise every directive in FILE until SIGINT/SIGTERM (SIGHUP reloads)
    Start {
        /// Ecosystem file
        file: PathBuf,
        /// Only start the directive with this name
        #[arg(long)]
        only: Option<String>,
    },
    /// Validate FILE and print the resolved directives
    Check {
        /// Ecosystem file
        file: PathBuf,
        /// Print directives and warnings as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the last lines of a directive's log
    Logs {
        /// Ecosystem file
        file: PathBuf,
        /// Directive name
        #[arg(long)]
        name: String,
        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
        /// Show the error log instead of the output log
        #[arg(long)]
        err: bool,
        /// Instance index
        #[arg(long, default_value_t = 0)]
        instance: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        Commands::Start { file, only } => commands::start::execute(&file, only.as_deref()).await,
        Commands::Check { file, json } => commands::check::execute(&file, json),
        Commands::Logs {
            file,
            name,
            lines,
            err,
            instance,
        } => commands::logs::execute(&file, &name, lines, err, instance),
    }
}

fn init_logging(format: LogFormat) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}
