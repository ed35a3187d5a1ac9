use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use vmedia_core::{Config, DriveMediaManager, MediaJournal, MediaLocation, Result, VmediaError};
use vmedia_storage::LocalMediaProbe;

/// Build the media manager of a configured VM with its persisted bindings
/// restored.
pub async fn open_manager(config: &Config, vm_name: &str) -> Result<DriveMediaManager> {
    let vm = config.vm(vm_name)?;
    let state_file = config.defaults.state_dir()?.join(format!("{vm_name}.json"));

    let journal = MediaJournal::for_vm(vm_name);
    journal.init().await?;

    debug!(
        "Opening VM {} with {} backend, state in {:?}",
        vm_name,
        vmedia_platform::backend_name(&vm.backend),
        state_file
    );

    let manager = DriveMediaManager::from_config(
        vm,
        vmedia_platform::device_for(vm),
        Arc::new(LocalMediaProbe::new()),
    )
    .settings(config.defaults.settings())
    .state_file(state_file)
    .journal(journal)
    .build()?;

    manager.load_state().await?;
    Ok(manager)
}

/// Turn a command-line argument into a media location. Relative paths are
/// made absolute against the working directory; URLs are kept as given.
pub fn resolve_location(location: &str) -> Result<MediaLocation> {
    if location.contains("://") {
        return Ok(MediaLocation::new(location));
    }

    let path = Path::new(location);
    if path.as_os_str().is_empty() {
        return Err(VmediaError::ConfigError(
            "Media location cannot be empty".to_string(),
        ));
    }

    Ok(MediaLocation::from(std::path::absolute(path)?))
}
