use crate::output::{OutputFormat, OutputFormatter, print_info};
use crate::utils::open_manager;
use colored::*;
use serde::Serialize;
use tabled::Tabled;
use vmedia_core::{Config, DisplayDescriptor, MediaManager, Result};

#[derive(Tabled, Serialize)]
struct DriveRow {
    #[tabled(rename = "DRIVE")]
    drive: String,
    #[tabled(rename = "LABEL")]
    label: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

impl From<&DisplayDescriptor> for DriveRow {
    fn from(descriptor: &DisplayDescriptor) -> Self {
        let status = match (descriptor.is_external, descriptor.has_media()) {
            (true, true) => "loaded".green().to_string(),
            (true, false) => "empty".yellow().to_string(),
            (false, _) => "fixed".dimmed().to_string(),
        };

        Self {
            drive: descriptor.drive_id.clone(),
            label: descriptor.label(),
            status,
        }
    }
}

#[derive(Serialize)]
struct DriveEntry {
    #[serde(flatten)]
    descriptor: DisplayDescriptor,
    label: String,
}

pub async fn execute(vm: String, all: bool, config: Config, format: OutputFormat) -> Result<()> {
    let manager = open_manager(&config, &vm).await?;

    let descriptors: Vec<DisplayDescriptor> = if all {
        manager.drives().iter().map(|d| d.descriptor()).collect()
    } else {
        manager.menu()
    };

    match format {
        OutputFormat::Table => {
            if descriptors.is_empty() {
                print_info(&format!("VM '{vm}' has no removable drives"));
                return Ok(());
            }
            let rows: Vec<DriveRow> = descriptors.iter().map(DriveRow::from).collect();
            println!("{}", format.format_table(rows));
        }
        _ => {
            let entries: Vec<DriveEntry> = descriptors
                .into_iter()
                .map(|descriptor| DriveEntry {
                    label: descriptor.label(),
                    descriptor,
                })
                .collect();
            println!("{}", format.format(entries));
        }
    }

    Ok(())
}
