use crate::Result;
use crate::events::{MediaEvent, MediaEventType};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Append-only, per-VM record of media changes.
pub struct MediaJournal {
    vm_name: String,
    log_file: PathBuf,
}

impl MediaJournal {
    pub fn new(vm_name: String, log_file: PathBuf) -> Self {
        Self { vm_name, log_file }
    }

    pub fn for_vm(vm_name: &str) -> Self {
        Self::new(vm_name.to_string(), default_log_file(vm_name))
    }

    pub fn path(&self) -> &Path {
        &self.log_file
    }

    pub async fn init(&self) -> Result<()> {
        if let Some(parent) = self.log_file.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    pub async fn record(&self, event: &MediaEvent) -> Result<()> {
        let level = match event.event_type {
            MediaEventType::Changed | MediaEventType::Ejected => LogLevel::Info,
            MediaEventType::Failed => LogLevel::Warn,
        };

        let message = match (&event.event_type, &event.location, &event.notice) {
            (MediaEventType::Failed, _, Some(notice)) => {
                format!("{} failed ({}): {}", event.drive_id, notice.kind, notice.message)
            }
            (MediaEventType::Changed, Some(location), _) => {
                format!("{} <- {} (v{})", event.drive_id, location, event.version)
            }
            _ => format!("{} ejected (v{})", event.drive_id, event.version),
        };

        let entry = format!(
            "{} [{}] [{}] {}\n",
            event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            level.as_str(),
            self.vm_name,
            message
        );

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .await?;

        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// The last `tail` lines, or every line when `tail` is `None`.
    pub async fn read(&self, tail: Option<usize>) -> Result<Vec<String>> {
        if !fs::try_exists(&self.log_file).await? {
            return Ok(vec![]);
        }

        let content = fs::read_to_string(&self.log_file).await?;
        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        let start = match tail {
            Some(n) => lines.len().saturating_sub(n),
            None => 0,
        };
        Ok(lines[start..].to_vec())
    }
}

pub fn default_log_file(vm_name: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vmedia")
        .join("logs")
        .join(format!("{vm_name}.log"))
}

#[derive(Clone, Copy)]
enum LogLevel {
    Info,
    Warn,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
        }
    }
}
