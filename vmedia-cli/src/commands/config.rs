use crate::commands::ConfigAction;
use crate::output::{OutputFormat, OutputFormatter, print_info, print_success};
use std::path::PathBuf;
use vmedia_core::{
    BackendConfig, Config, Drive, DriveInterface, ImageType, Result, VmConfig, VmPowerState,
    VmediaError,
};

pub async fn execute(
    action: ConfigAction,
    config: Config,
    config_path: PathBuf,
    format: OutputFormat,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print_info(&format!("Configuration from {}", config_path.display()));
            match format {
                OutputFormat::Json => println!("{}", format.format(&config)),
                _ => println!("{}", OutputFormat::Yaml.format(&config)),
            }
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                return Err(VmediaError::ConfigError(format!(
                    "{} already exists, use --force to overwrite",
                    config_path.display()
                )));
            }

            sample_config().save_to(&config_path)?;
            print_success(&format!("Wrote {}", config_path.display()));
        }
    }

    Ok(())
}

fn sample_config() -> Config {
    let mut config = Config::default();
    config.vms.push(VmConfig {
        name: "example".to_string(),
        power: VmPowerState::Stopped,
        backend: BackendConfig::None,
        drives: vec![
            Drive::new("cd0", ImageType::Cd, DriveInterface::Usb).removable(),
            Drive::new("disk0", ImageType::Disk, DriveInterface::VirtIo)
                .with_media("/var/lib/vmedia/example/disk0.qcow2"),
        ],
    });
    config
}
