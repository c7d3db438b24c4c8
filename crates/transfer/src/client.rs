//! HTTP upload client.
//!
//! Async client using `reqwest` with Basic authentication and rustls.

use std::error::Error as StdError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Body, Certificate, Identity, StatusCode};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::DEFAULT_TIMEOUT;
use crate::error::UploadError;

/// Name of the multipart field carrying the file.
pub const FORM_FIELD: &str = "file";

/// Content type of the file part.
const PART_CONTENT_TYPE: &str = "application/octet-stream";

/// Connection settings for [`UploadClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Full endpoint URL, e.g. `https://host:14080/upload`.
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Extra PEM root certificate to trust in addition to the bundled roots.
    pub ca_file: Option<PathBuf>,
    /// PEM client certificate, used together with `client_key`.
    pub client_cert: Option<PathBuf>,
    /// PEM private key for `client_cert`.
    pub client_key: Option<PathBuf>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Creates a config with no extra TLS material and the default timeout.
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            ca_file: None,
            client_cert: None,
            client_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Outcome of an accepted upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    /// Local path that was sent.
    pub path: PathBuf,
    /// Attachment name used in the form.
    pub file_name: String,
    /// Bytes sent in the file part.
    pub bytes: u64,
    /// Status returned by the server (always 200).
    pub status: StatusCode,
}

/// Uploads files to a single endpoint.
pub struct UploadClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl UploadClient {
    /// Builds the underlying HTTP client.
    ///
    /// Certificate validation is never disabled; `ca_file` only adds trust.
    pub fn new(config: ClientConfig) -> Result<Self, UploadError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);

        if let Some(ca_file) = &config.ca_file {
            let pem = read_pem(ca_file)?;
            let cert = Certificate::from_pem(&pem).map_err(UploadError::Client)?;
            builder = builder.add_root_certificate(cert);
        }

        match (&config.client_cert, &config.client_key) {
            (Some(cert_file), Some(key_file)) => {
                let mut pem = read_pem(cert_file)?;
                pem.push(b'\n');
                pem.extend(read_pem(key_file)?);
                let identity = Identity::from_pem(&pem).map_err(UploadError::Client)?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => {
                return Err(UploadError::Config(
                    "client certificate and key must be configured together".into(),
                ));
            }
        }

        let http = builder.build().map_err(UploadError::Client)?;
        Ok(Self { http, config })
    }

    /// Returns the endpoint this client posts to.
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Uploads one file.
    ///
    /// Fails fast with [`UploadError::FileGone`] if the file vanished before
    /// the request could be built. The file body is streamed, not buffered.
    pub async fn upload(&self, path: &Path) -> Result<UploadReceipt, UploadError> {
        info!(path = %path.display(), "starting file transfer");

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::InvalidPath(path.to_path_buf()))?;

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| gone_or_io(path, e))?;
        let bytes = file
            .metadata()
            .await
            .map_err(|e| gone_or_io(path, e))?
            .len();

        let body = Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, bytes)
            .file_name(file_name.clone())
            .mime_str(PART_CONTENT_TYPE)
            .map_err(UploadError::Client)?;
        let form = Form::new().part(FORM_FIELD, part);

        let resp = self
            .http
            .post(&self.config.endpoint)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .multipart(form)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = match resp.text().await {
                Ok(body) => body,
                Err(e) => {
                    debug!(%status, error = %e, "could not read rejection body");
                    String::new()
                }
            };
            return Err(UploadError::ServerRejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            endpoint = %self.config.endpoint,
            %status,
            file = %file_name,
            bytes,
            "upload accepted"
        );

        Ok(UploadReceipt {
            path: path.to_path_buf(),
            file_name,
            bytes,
            status,
        })
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, UploadError> {
    std::fs::read(path)
        .map_err(|e| UploadError::Config(format!("failed to read {}: {e}", path.display())))
}

fn gone_or_io(path: &Path, err: std::io::Error) -> UploadError {
    if err.kind() == ErrorKind::NotFound {
        UploadError::FileGone(path.to_path_buf())
    } else {
        UploadError::Io(err)
    }
}

/// Splits request failures into TLS and plain transport errors.
fn classify(err: reqwest::Error) -> UploadError {
    if is_tls_failure(&err) {
        UploadError::Tls(error_chain(&err))
    } else {
        debug!(timeout = err.is_timeout(), connect = err.is_connect(), "request failed");
        UploadError::Transport(err)
    }
}

/// Looks for a rustls error anywhere in the source chain.
///
/// tokio-rustls reports handshake failures as an `io::Error` wrapping the
/// `rustls::Error`, and `io::Error::source` skips the wrapped error, so the
/// payload of every `io::Error` is inspected too.
fn is_tls_failure(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<rustls::Error>() {
            return true;
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.get_ref().is_some_and(|inner| inner.is::<rustls::Error>()) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        parts.push(e.to_string());
        current = e.source();
    }
    parts.join(": ")
}
