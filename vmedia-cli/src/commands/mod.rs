mod boot;
mod change;
mod config;
mod drives;
mod eject;
mod history;

use clap::Subcommand;
use std::path::PathBuf;
use vmedia_core::{Config, Result};

use crate::output::OutputFormat;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the drive menu of a VM
    Drives {
        /// Name of the VM
        vm: String,

        /// Include drives that are hidden from the menu
        #[arg(short, long)]
        all: bool,
    },

    /// Insert new media into a removable drive
    Change {
        /// Name of the VM
        vm: String,

        /// Drive identifier
        drive: String,

        /// Path or file:// URL of the backing image
        location: String,
    },

    /// Eject the media of a removable drive
    Eject {
        /// Name of the VM
        vm: String,

        /// Drive identifier
        drive: String,
    },

    /// Show media changes recorded for a VM
    History {
        /// Name of the VM
        vm: String,

        /// Number of lines to show from the end
        #[arg(short, long)]
        tail: Option<usize>,
    },

    /// Show the bindings attached when a VM boots
    Boot {
        /// Name of the VM
        vm: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn execute(
    command: Command,
    config: Config,
    config_path: PathBuf,
    format: OutputFormat,
) -> Result<()> {
    match command {
        Command::Drives { vm, all } => drives::execute(vm, all, config, format).await,
        Command::Change {
            vm,
            drive,
            location,
        } => change::execute(vm, drive, location, config, format).await,
        Command::Eject { vm, drive } => eject::execute(vm, drive, config, format).await,
        Command::History { vm, tail } => history::execute(vm, tail, config, format).await,
        Command::Boot { vm } => boot::execute(vm, config, format).await,
        Command::Config { action } => config::execute(action, config, config_path, format).await,
    }
}
