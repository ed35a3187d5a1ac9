use async_trait::async_trait;
use http_body_util::BodyExt;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tracing::{debug, error};
use vmedia_core::{Drive, MediaDevice, MediaError, MediaFormat, MediaInfo, Result, VmediaError};

type UnixClient = Client<UnixConnector, String>;

#[derive(Clone)]
struct UnixConnector {
    socket_path: PathBuf,
}

impl tower::Service<hyper::Uri> for UnixConnector {
    type Response = TokioIo<UnixStream>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = std::pin::Pin<
        Box<
            dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>>
                + Send,
        >,
    >;

    fn poll_ready(
        &mut self,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: hyper::Uri) -> Self::Future {
        let socket_path = self.socket_path.clone();
        Box::pin(async move {
            let stream = UnixStream::connect(&socket_path)
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            Ok(TokioIo::new(stream))
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiFault {
    fault_message: String,
}

/// Outcome of a Firecracker API call that reached the VMM.
#[derive(Debug)]
enum ApiResponse {
    Ok,
    Fault { status: StatusCode, message: String },
}

pub struct FirecrackerApiClient {
    socket_path: PathBuf,
    client: UnixClient,
}

impl FirecrackerApiClient {
    pub fn new(socket_path: PathBuf) -> Self {
        let connector = UnixConnector {
            socket_path: socket_path.clone(),
        };

        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build(connector);

        Self {
            socket_path,
            client,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn make_request<T: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &T,
    ) -> Result<ApiResponse> {
        let uri = format!("http://localhost{path}")
            .parse::<hyper::Uri>()
            .map_err(|e| platform_error(format!("Invalid URI: {e}"), false))?;

        let json = serde_json::to_string(body)?;
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(json)
            .map_err(|e| platform_error(format!("Failed to build request: {e}"), false))?;

        debug!(
            "Making Firecracker API request: {} {}",
            request.method(),
            request.uri()
        );

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| platform_error(format!("Request failed: {e}"), true))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| platform_error(format!("Failed to read response body: {e}"), false))?
            .to_bytes();

        if status.is_success() {
            return Ok(ApiResponse::Ok);
        }

        let message = serde_json::from_slice::<ApiFault>(&body)
            .map(|fault| fault.fault_message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).to_string());
        error!("Firecracker API error: {} - {}", status, message);

        Ok(ApiResponse::Fault { status, message })
    }

    /// Point an attached block device at a new host file.
    pub async fn patch_drive(&self, drive_id: &str, path: &Path) -> Result<()> {
        #[derive(Serialize)]
        struct PartialDrive {
            drive_id: String,
            path_on_host: String,
        }

        let drive = PartialDrive {
            drive_id: drive_id.to_string(),
            path_on_host: path.to_string_lossy().to_string(),
        };

        debug!("Patching drive {}: {:?}", drive_id, path);

        match self
            .make_request(Method::PATCH, &format!("/drives/{drive_id}"), &drive)
            .await?
        {
            ApiResponse::Ok => Ok(()),
            ApiResponse::Fault { status, message } => Err(MediaError::DeviceRejected {
                drive_id: drive_id.to_string(),
                reason: format!("API error {status}: {message}"),
            }
            .into()),
        }
    }
}

/// Block devices of a running Firecracker microVM.
///
/// Firecracker rescans a drive after its backing file is patched, but it has
/// no notion of an empty drive, so ejecting is refused.
pub struct FirecrackerDevice {
    client: FirecrackerApiClient,
}

impl FirecrackerDevice {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            client: FirecrackerApiClient::new(socket_path),
        }
    }
}

#[async_trait]
impl MediaDevice for FirecrackerDevice {
    async fn change_medium(&self, drive: &Drive, media: &MediaInfo) -> Result<()> {
        if !matches!(media.format, MediaFormat::Raw | MediaFormat::Iso) {
            return Err(MediaError::DeviceRejected {
                drive_id: drive.id.clone(),
                reason: format!("Firecracker only supports raw images, got {:?}", media.format),
            }
            .into());
        }

        self.client.patch_drive(&drive.id, &media.path).await
    }

    async fn eject(&self, drive: &Drive) -> Result<()> {
        Err(MediaError::DeviceRejected {
            drive_id: drive.id.clone(),
            reason: "Firecracker drives cannot be left without backing media".to_string(),
        }
        .into())
    }

    fn name(&self) -> &str {
        "firecracker"
    }
}

fn platform_error(message: String, recoverable: bool) -> VmediaError {
    VmediaError::PlatformError {
        platform: "firecracker".to_string(),
        message,
        recoverable,
    }
}
