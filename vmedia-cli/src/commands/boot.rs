use crate::output::{OutputFormat, OutputFormatter};
use crate::utils::open_manager;
use serde::Serialize;
use tabled::Tabled;
use vmedia_core::{Config, Result};

#[derive(Tabled, Serialize)]
struct BootBinding {
    #[tabled(rename = "DRIVE")]
    drive: String,
    #[tabled(rename = "MEDIA")]
    #[tabled(display_with = "display_media")]
    media: Option<String>,
}

fn display_media(media: &Option<String>) -> String {
    media.clone().unwrap_or_else(|| "-".to_string())
}

pub async fn execute(vm: String, config: Config, format: OutputFormat) -> Result<()> {
    let manager = open_manager(&config, &vm).await?;

    let bindings: Vec<BootBinding> = manager
        .boot_bindings()
        .into_iter()
        .map(|(drive, media)| BootBinding {
            drive,
            media: media.map(|m| m.to_string()),
        })
        .collect();

    println!("{}", format.format_table(bindings));
    Ok(())
}
