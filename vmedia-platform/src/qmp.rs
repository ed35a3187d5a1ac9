use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;
use vmedia_core::{Drive, MediaDevice, MediaError, MediaInfo, Result, VmediaError};

#[derive(Debug, Serialize)]
struct QmpCommand<'a> {
    execute: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct QmpErrorBody {
    class: String,
    desc: String,
}

#[derive(Debug, Deserialize)]
struct QmpMessage {
    #[serde(rename = "QMP")]
    greeting: Option<Value>,
    #[serde(rename = "return")]
    ret: Option<Value>,
    error: Option<QmpErrorBody>,
    event: Option<String>,
}

/// A negotiated QMP session over a unix socket.
pub struct QmpConnection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl QmpConnection {
    /// Connect, read the greeting and leave capabilities negotiation mode.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| qmp_error(format!("Failed to connect to {socket_path:?}: {e}")))?;
        let (reader, writer) = stream.into_split();
        let mut connection = Self {
            lines: BufReader::new(reader).lines(),
            writer,
        };

        let greeting = connection.next_message().await?;
        if greeting.greeting.is_none() {
            return Err(qmp_error("Expected QMP greeting".to_string()));
        }

        connection.execute("qmp_capabilities", None).await?;
        Ok(connection)
    }

    /// Run one command and return its `return` payload. Asynchronous events
    /// received while waiting are skipped.
    pub async fn execute(&mut self, command: &str, arguments: Option<Value>) -> Result<Value> {
        let request = serde_json::to_string(&QmpCommand {
            execute: command,
            arguments,
        })?;
        debug!("QMP -> {}", request);

        self.writer.write_all(request.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        loop {
            let message = self.next_message().await?;
            if let Some(event) = message.event {
                debug!("QMP event while waiting for {}: {}", command, event);
                continue;
            }
            if let Some(error) = message.error {
                return Err(qmp_error(format!(
                    "{command} failed ({}): {}",
                    error.class, error.desc
                )));
            }
            if let Some(ret) = message.ret {
                return Ok(ret);
            }
        }
    }

    async fn next_message(&mut self) -> Result<QmpMessage> {
        let line = self
            .lines
            .next_line()
            .await?
            .ok_or_else(|| qmp_error("Connection closed by QEMU".to_string()))?;
        debug!("QMP <- {}", line);
        Ok(serde_json::from_str(&line)?)
    }
}

/// Removable drives of a QEMU guest reached through its QMP socket.
pub struct QmpDevice {
    socket_path: PathBuf,
}

impl QmpDevice {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    async fn run(&self, drive: &Drive, command: &str, arguments: Value) -> Result<()> {
        let mut connection = QmpConnection::connect(&self.socket_path).await?;
        match connection.execute(command, Some(arguments)).await {
            Ok(_) => Ok(()),
            Err(VmediaError::PlatformError { message, .. }) => Err(MediaError::DeviceRejected {
                drive_id: drive.id.clone(),
                reason: message,
            }
            .into()),
            Err(e) => Err(e),
        }
    }
}

pub fn change_medium_arguments(drive: &Drive, media: &MediaInfo) -> Value {
    let mut arguments = json!({
        "id": drive.id,
        "filename": media.path.to_string_lossy(),
        "format": media.format.driver(),
    });
    if media.read_only {
        arguments["read-only-mode"] = json!("read-only");
    }
    arguments
}

pub fn eject_arguments(drive: &Drive) -> Value {
    json!({ "id": drive.id, "force": true })
}

#[async_trait]
impl MediaDevice for QmpDevice {
    async fn change_medium(&self, drive: &Drive, media: &MediaInfo) -> Result<()> {
        self.run(
            drive,
            "blockdev-change-medium",
            change_medium_arguments(drive, media),
        )
        .await
    }

    async fn eject(&self, drive: &Drive) -> Result<()> {
        self.run(drive, "eject", eject_arguments(drive)).await
    }

    fn name(&self) -> &str {
        "qmp"
    }
}

fn qmp_error(message: String) -> VmediaError {
    VmediaError::PlatformError {
        platform: "qmp".to_string(),
        message,
        recoverable: true,
    }
}
