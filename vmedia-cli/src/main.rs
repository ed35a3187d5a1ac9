mod commands;
mod output;
mod utils;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vmedia_core::{Config, VmediaError};

#[derive(Parser, Debug)]
#[command(name = "vmedia")]
#[command(about = "vmedia - Swap and eject removable media on virtual machine drives", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    #[arg(short, long, global = true, help = "Verbose output")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Quiet output")]
    quiet: bool,

    #[arg(
        long,
        global = true,
        help = "Output format",
        value_enum,
        default_value = "table"
    )]
    format: output::OutputFormat,

    #[arg(
        long,
        global = true,
        env = "VMEDIA_CONFIG",
        help = "Path to the configuration file (default: ~/.vmedia/config.yaml)"
    )]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .with_writer(std::io::stderr)
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::config_path()?,
    };
    let config = Config::load_from(&config_path)?;

    match commands::execute(cli.command, config, config_path, cli.format).await {
        Ok(_) => Ok(()),
        Err(e) => {
            if let Some(message) = error_message(&e) {
                eprintln!("{message}");
            }
            std::process::exit(1);
        }
    }
}

/// Text printed for a failed command. Media failures were already shown as a
/// notice by the command itself.
fn error_message(error: &VmediaError) -> Option<String> {
    match error {
        VmediaError::Media(_) => None,
        other => Some(format!("Error: {other}")),
    }
}
