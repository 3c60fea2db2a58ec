//! AutoQA CLI - Main Entry Point
//!
//! Runs generated test specs against a web application in one browser
//! session, or checks a spec queue without launching a browser.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod output;

use commands::{check, run};

/// AutoQA - autonomous web application tester
#[derive(Parser)]
#[command(name = "autoqa")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "AUTOQA_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a spec queue against a target application
    Run(run::RunArgs),

    /// Show which specs would run and which would be pre-filtered
    Check(check::CheckArgs),

    /// Show version information
    Version,
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Run(args) => {
            let config = commands::load_config(cli.config.as_deref())?;
            let show_progress = !cli.verbose && !cli.log_json && matches!(cli.format, output::OutputFormat::Table);
            let passed = run::execute(args, config, cli.format, show_progress).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Check(args) => {
            let config = commands::load_config(cli.config.as_deref())?;
            check::execute(args, config, cli.format)?;
        }
        Commands::Version => {
            println!("AutoQA CLI v{}", autoqa_common::VERSION);
        }
    }

    Ok(())
}
