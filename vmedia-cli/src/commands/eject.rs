use crate::output::{OutputFormat, OutputFormatter, print_notice, print_progress, print_success};
use crate::utils::open_manager;
use vmedia_core::{Config, MediaManager, Notice, Result, VmediaError};

pub async fn execute(vm: String, drive: String, config: Config, format: OutputFormat) -> Result<()> {
    let manager = open_manager(&config, &vm).await?;

    print_progress(&format!("Ejecting media of {drive} on '{vm}'"));

    match manager.eject(&drive).await {
        Ok(_) => {
            let descriptor = manager.current_label(&drive)?;
            match format {
                OutputFormat::Table => print_success(&descriptor.label()),
                _ => println!("{}", format.format(&descriptor)),
            }
            Ok(())
        }
        Err(VmediaError::Media(e)) => {
            print_notice(&Notice::from(&e));
            Err(e.into())
        }
        Err(e) => Err(e),
    }
}
