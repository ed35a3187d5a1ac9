use async_trait::async_trait;
use std::fs::Metadata;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;
use vmedia_core::{MediaError, MediaFormat, MediaInfo, MediaLocation, MediaProbe, Result};

/// ISO 9660 primary volume descriptor identifier sits at sector 16, byte 1.
const ISO9660_MAGIC_OFFSET: usize = 0x8001;
const ISO9660_MAGIC: &[u8] = b"CD001";
const QCOW2_MAGIC: &[u8] = b"QFI\xfb";
const VMDK_MAGIC: &[u8] = b"KDMV";
const VHDX_MAGIC: &[u8] = b"vhdxfile";
const VHD_FOOTER_MAGIC: &[u8] = b"conectix";

const HEADER_LEN: u64 = (ISO9660_MAGIC_OFFSET + ISO9660_MAGIC.len()) as u64;

/// Probes backing media on the local filesystem.
pub struct LocalMediaProbe {
    allow_block_devices: bool,
}

impl LocalMediaProbe {
    pub fn new() -> Self {
        Self {
            allow_block_devices: true,
        }
    }

    pub fn files_only() -> Self {
        Self {
            allow_block_devices: false,
        }
    }

    fn is_acceptable(&self, metadata: &Metadata) -> bool {
        metadata.is_file() || (self.allow_block_devices && is_block_device(metadata))
    }
}

impl Default for LocalMediaProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaProbe for LocalMediaProbe {
    async fn probe(&self, location: &MediaLocation) -> Result<MediaInfo> {
        let path = location.to_path().ok_or_else(|| {
            unreadable(location, "only local paths and file:// URLs are supported")
        })?;

        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| unreadable(location, e.to_string()))?;

        if metadata.is_dir() {
            return Err(unreadable(location, "is a directory"));
        }
        if !self.is_acceptable(&metadata) {
            return Err(unreadable(location, "not a regular file"));
        }
        if metadata.is_file() && metadata.len() == 0 {
            return Err(unreadable(location, "file is empty"));
        }

        let file = fs::File::open(&path)
            .await
            .map_err(|e| unreadable(location, e.to_string()))?;
        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        file.take(HEADER_LEN)
            .read_to_end(&mut header)
            .await
            .map_err(|e| unreadable(location, e.to_string()))?;

        let format = detect_format(&header, &path);
        debug!("Probed {:?}: {:?}, {} bytes", path, format, metadata.len());

        Ok(MediaInfo {
            location: location.clone(),
            path,
            format,
            size_bytes: metadata.len(),
            read_only: metadata.permissions().readonly(),
        })
    }
}

/// Detect an image format from its leading bytes, falling back to the file
/// extension and finally to raw.
pub fn detect_format(header: &[u8], path: &Path) -> MediaFormat {
    if header.starts_with(QCOW2_MAGIC) {
        return MediaFormat::Qcow2;
    }
    if header.starts_with(VMDK_MAGIC) {
        return MediaFormat::Vmdk;
    }
    if header.starts_with(VHDX_MAGIC) {
        return MediaFormat::Vhdx;
    }
    // Dynamic VHDs carry a copy of the footer at offset 0.
    if header.starts_with(VHD_FOOTER_MAGIC) {
        return MediaFormat::Vhd;
    }
    if header.get(ISO9660_MAGIC_OFFSET..ISO9660_MAGIC_OFFSET + ISO9660_MAGIC.len())
        == Some(ISO9660_MAGIC)
    {
        return MediaFormat::Iso;
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("iso") | Some("cdr") => MediaFormat::Iso,
        Some("qcow2") => MediaFormat::Qcow2,
        Some("vmdk") => MediaFormat::Vmdk,
        Some("vhd") => MediaFormat::Vhd,
        Some("vhdx") => MediaFormat::Vhdx,
        _ => MediaFormat::Raw,
    }
}

fn unreadable(location: &MediaLocation, reason: impl Into<String>) -> vmedia_core::VmediaError {
    MediaError::UnreadableResource {
        location: location.to_string(),
        reason: reason.into(),
    }
    .into()
}

#[cfg(unix)]
fn is_block_device(metadata: &Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.file_type().is_block_device()
}

#[cfg(not(unix))]
fn is_block_device(_metadata: &Metadata) -> bool {
    false
}
