mod firecracker;
mod offline;
pub mod qmp;


use std::sync::Arc;
use vmedia_core::{BackendConfig, MediaDevice, VmConfig};

pub use firecracker::{FirecrackerApiClient, FirecrackerDevice};
pub use offline::OfflineDevice;
pub use qmp::{QmpConnection, QmpDevice};

/// Device backend for a configured VM.
pub fn device_for(vm: &VmConfig) -> Arc<dyn MediaDevice> {
    match &vm.backend {
        BackendConfig::Qmp { socket } => Arc::new(QmpDevice::new(socket.clone())),
        BackendConfig::Firecracker { socket } => Arc::new(FirecrackerDevice::new(socket.clone())),
        BackendConfig::None => Arc::new(OfflineDevice::new(&vm.name)),
    }
}

pub fn backend_name(backend: &BackendConfig) -> &'static str {
    match backend {
        BackendConfig::Qmp { .. } => "qmp",
        BackendConfig::Firecracker { .. } => "firecracker",
        BackendConfig::None => "offline",
    }
}
