use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// What kind of image a drive is configured to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    None,
    Disk,
    Cd,
    Bios,
    LinuxKernel,
    LinuxInitrd,
    LinuxDtb,
}

impl ImageType {
    pub fn pretty_value(&self) -> &'static str {
        match self {
            ImageType::None => "None",
            ImageType::Disk => "Disk Image",
            ImageType::Cd => "CD/DVD (ISO) Image",
            ImageType::Bios => "BIOS",
            ImageType::LinuxKernel => "Linux Kernel",
            ImageType::LinuxInitrd => "Linux RAM Disk",
            ImageType::LinuxDtb => "Linux Device Tree Binary",
        }
    }
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pretty_value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveInterface {
    None,
    Ide,
    Scsi,
    Sd,
    Mtd,
    Floppy,
    #[serde(rename = "pflash")]
    PFlash,
    #[serde(rename = "virtio")]
    VirtIo,
    Nvme,
    Usb,
}

impl DriveInterface {
    pub fn pretty_value(&self) -> &'static str {
        match self {
            DriveInterface::None => "None",
            DriveInterface::Ide => "IDE",
            DriveInterface::Scsi => "SCSI",
            DriveInterface::Sd => "SD Card",
            DriveInterface::Mtd => "MTD (NAND/NOR)",
            DriveInterface::Floppy => "Floppy",
            DriveInterface::PFlash => "PC System Flash",
            DriveInterface::VirtIo => "VirtIO",
            DriveInterface::Nvme => "NVMe",
            DriveInterface::Usb => "USB",
        }
    }
}

impl std::fmt::Display for DriveInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pretty_value())
    }
}

/// Locator of a backing-media resource: a filesystem path or a `file://` URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaLocation(String);

impl MediaLocation {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last non-empty path component, ignoring trailing separators.
    pub fn file_name(&self) -> Option<&str> {
        let path = self.0.strip_prefix("file://").unwrap_or(&self.0);
        path.trim_end_matches('/')
            .rsplit('/')
            .find(|part| !part.is_empty())
    }

    /// Local path for plain paths and `file://` URLs. Other schemes have none.
    pub fn to_path(&self) -> Option<PathBuf> {
        if let Some(path) = self.0.strip_prefix("file://") {
            return (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if self.0.is_empty() || self.0.contains("://") {
            return None;
        }
        Some(PathBuf::from(&self.0))
    }
}

impl std::fmt::Display for MediaLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MediaLocation {
    fn from(location: &str) -> Self {
        Self::new(location)
    }
}

impl From<String> for MediaLocation {
    fn from(location: String) -> Self {
        Self(location)
    }
}

impl From<PathBuf> for MediaLocation {
    fn from(path: PathBuf) -> Self {
        Self(path.to_string_lossy().to_string())
    }
}

/// One storage slot attached to a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drive {
    pub id: String,
    pub image_type: ImageType,
    pub interface: DriveInterface,
    #[serde(default, rename = "removable")]
    pub is_external: bool,
    #[serde(default, rename = "image", skip_serializing_if = "Option::is_none")]
    pub bound_media: Option<MediaLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaState {
    Empty,
    Bound(MediaLocation),
}

impl Drive {
    pub fn new(id: &str, image_type: ImageType, interface: DriveInterface) -> Self {
        Self {
            id: id.to_string(),
            image_type,
            interface,
            is_external: false,
            bound_media: None,
        }
    }

    pub fn removable(mut self) -> Self {
        self.is_external = true;
        self
    }

    pub fn with_media(mut self, location: impl Into<MediaLocation>) -> Self {
        self.bound_media = Some(location.into());
        self
    }

    pub fn state(&self) -> MediaState {
        match &self.bound_media {
            Some(location) => MediaState::Bound(location.clone()),
            None => MediaState::Empty,
        }
    }

    pub fn descriptor(&self) -> DisplayDescriptor {
        DisplayDescriptor {
            drive_id: self.id.clone(),
            image_type: self.image_type,
            interface: self.interface,
            is_external: self.is_external,
            media_name: self
                .bound_media
                .as_ref()
                .and_then(|m| m.file_name())
                .map(str::to_string),
            enabled: self.is_external,
        }
    }

    /// Whether the drive shows up in the drive menu at all.
    pub fn is_listed(&self) -> bool {
        self.is_external || matches!(self.image_type, ImageType::Disk | ImageType::Cd)
    }
}

/// What the presentation layer needs to draw one drive entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayDescriptor {
    pub drive_id: String,
    pub image_type: ImageType,
    pub interface: DriveInterface,
    pub is_external: bool,
    pub media_name: Option<String>,
    pub enabled: bool,
}

impl DisplayDescriptor {
    pub const NO_MEDIA: &'static str = "none";

    pub fn has_media(&self) -> bool {
        self.media_name.is_some()
    }

    pub fn label(&self) -> String {
        format!(
            "{} ({}): {}",
            self.image_type,
            self.interface,
            self.media_name.as_deref().unwrap_or(Self::NO_MEDIA)
        )
    }
}

/// Published snapshot of a VM's drives. `version` increases on every commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveTable {
    pub vm_name: String,
    pub version: u64,
    pub drives: Vec<Drive>,
}

impl DriveTable {
    pub fn get(&self, drive_id: &str) -> Option<&Drive> {
        self.drives.iter().find(|d| d.id == drive_id)
    }
}

pub type DriveSnapshot = Arc<DriveTable>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmPowerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
    Error,
}

impl VmPowerState {
    /// Whether a live device handle exists to receive media changes.
    pub fn is_live(&self) -> bool {
        matches!(self, VmPowerState::Running | VmPowerState::Paused)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Raw,
    Iso,
    Qcow2,
    Vmdk,
    Vhd,
    Vhdx,
}

impl MediaFormat {
    /// Driver name understood by QEMU.
    pub fn driver(&self) -> &'static str {
        match self {
            MediaFormat::Raw | MediaFormat::Iso => "raw",
            MediaFormat::Qcow2 => "qcow2",
            MediaFormat::Vmdk => "vmdk",
            MediaFormat::Vhd => "vpc",
            MediaFormat::Vhdx => "vhdx",
        }
    }
}

/// Result of probing a backing-media location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub location: MediaLocation,
    pub path: PathBuf,
    pub format: MediaFormat,
    pub size_bytes: u64,
    pub read_only: bool,
}
