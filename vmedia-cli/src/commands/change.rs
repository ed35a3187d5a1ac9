use crate::output::{OutputFormat, OutputFormatter, print_notice, print_progress, print_success};
use crate::utils::{open_manager, resolve_location};
use vmedia_core::{Config, MediaManager, Notice, Result, VmediaError};

pub async fn execute(
    vm: String,
    drive: String,
    location: String,
    config: Config,
    format: OutputFormat,
) -> Result<()> {
    let location = resolve_location(&location)?;
    let manager = open_manager(&config, &vm).await?;

    print_progress(&format!("Changing media of {drive} on '{vm}' to {location}"));
    if !manager.power_state().is_live() {
        print_progress("VM is not running, media will be attached at boot");
    }

    match manager.spawn_swap(&drive, location).wait().await {
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
