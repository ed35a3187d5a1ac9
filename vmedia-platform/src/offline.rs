use async_trait::async_trait;
use vmedia_core::{Drive, MediaDevice, MediaInfo, Result, VmediaError};

/// Stand-in for VMs without a reachable device endpoint. Changes made while
/// such a VM is powered off never reach it; a live change is refused.
pub struct OfflineDevice {
    vm_name: String,
}

impl OfflineDevice {
    pub fn new(vm_name: &str) -> Self {
        Self {
            vm_name: vm_name.to_string(),
        }
    }

    fn unavailable(&self, drive: &Drive) -> VmediaError {
        VmediaError::PlatformError {
            platform: self.name().to_string(),
            message: format!(
                "VM {} has no device endpoint for drive {}",
                self.vm_name, drive.id
            ),
            recoverable: false,
        }
    }
}

#[async_trait]
impl MediaDevice for OfflineDevice {
    async fn change_medium(&self, drive: &Drive, _media: &MediaInfo) -> Result<()> {
        Err(self.unavailable(drive))
    }

    async fn eject(&self, drive: &Drive) -> Result<()> {
        Err(self.unavailable(drive))
    }

    fn name(&self) -> &str {
        "offline"
    }
}
