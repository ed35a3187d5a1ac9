use std::time::Duration;
use thiserror::Error;

/// Recoverable failure of a media mutation. Drive state is left as it was
/// before the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Drive {drive_id} is not removable; its media cannot be changed")]
    NotExternal { drive_id: String },

    #[error("Cannot read backing media {location}: {reason}")]
    UnreadableResource { location: String, reason: String },

    #[error("Device for drive {drive_id} rejected the change: {reason}")]
    DeviceRejected { drive_id: String, reason: String },

    #[error("Drive {drive_id} already has a media change in progress")]
    Busy { drive_id: String },

    #[error("Drive {drive_id} did not respond within {timeout:?}")]
    Timeout { drive_id: String, timeout: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaErrorKind {
    NotExternal,
    UnreadableResource,
    DeviceRejected,
    Busy,
    Timeout,
}

impl MediaError {
    pub fn kind(&self) -> MediaErrorKind {
        match self {
            MediaError::NotExternal { .. } => MediaErrorKind::NotExternal,
            MediaError::UnreadableResource { .. } => MediaErrorKind::UnreadableResource,
            MediaError::DeviceRejected { .. } => MediaErrorKind::DeviceRejected,
            MediaError::Busy { .. } => MediaErrorKind::Busy,
            MediaError::Timeout { .. } => MediaErrorKind::Timeout,
        }
    }
}

impl std::fmt::Display for MediaErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaErrorKind::NotExternal => write!(f, "not_external"),
            MediaErrorKind::UnreadableResource => write!(f, "unreadable_resource"),
            MediaErrorKind::DeviceRejected => write!(f, "device_rejected"),
            MediaErrorKind::Busy => write!(f, "busy"),
            MediaErrorKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// A dismissible message for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Notice {
    pub kind: MediaErrorKind,
    pub message: String,
}

impl From<&MediaError> for Notice {
    fn from(error: &MediaError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum VmediaError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("Unknown drive {drive_id} on VM {vm_name}")]
    UnknownDrive { vm_name: String, drive_id: String },

    #[error("Unknown VM: {0}")]
    UnknownVm(String),

    #[error("Platform error on {platform}: {message}")]
    PlatformError {
        platform: String,
        message: String,
        recoverable: bool,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VmediaError>;

impl VmediaError {
    /// The media error carried by this error, if any.
    pub fn media(&self) -> Option<&MediaError> {
        match self {
            VmediaError::Media(e) => Some(e),
            _ => None,
        }
    }
}
