//! In-process HTTP receiver for upload tests.
//!
//! An axum server on an ephemeral localhost port that decodes each
//! multipart upload, records it and answers with a scripted status.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Path served by [`TestReceiver`].
pub const UPLOAD_PATH: &str = "/upload";

/// A request captured by [`TestReceiver`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Header names are lowercased.
    pub headers: Vec<(String, String)>,
    /// Decoded multipart fields, in body order.
    pub parts: Vec<FormPart>,
}

/// One decoded multipart field.
#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub file_name: Option<String>,
    pub data: Vec<u8>,
}

/// A file field returned by [`RecordedRequest::form_file`].
#[derive(Debug, Clone, PartialEq)]
pub struct FormFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl RecordedRequest {
    /// Returns the first value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Decodes `Authorization: Basic` credentials.
    pub fn basic_auth(&self) -> Option<(String, String)> {
        let encoded = self.header("authorization")?.strip_prefix("Basic ")?;
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, pass) = decoded.split_once(':')?;
        Some((user.to_string(), pass.to_string()))
    }

    /// Returns the first field named `field` that carries a file name.
    pub fn form_file(&self, field: &str) -> Option<FormFile> {
        self.parts
            .iter()
            .find(|p| p.name == field && p.file_name.is_some())
            .map(|p| FormFile {
                file_name: p.file_name.clone().unwrap_or_default(),
                data: p.data.clone(),
            })
    }
}

struct ReceiverState {
    status: StatusCode,
    requests: Vec<RecordedRequest>,
}

type SharedState = Arc<Mutex<ReceiverState>>;

/// Upload endpoint bound to an ephemeral localhost port.
pub struct TestReceiver {
    addr: SocketAddr,
    state: SharedState,
    task: JoinHandle<()>,
}

impl TestReceiver {
    /// Starts listening; every upload is answered with `status`.
    pub async fn start(status: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state: SharedState = Arc::new(Mutex::new(ReceiverState {
            status: to_status(status),
            requests: Vec::new(),
        }));

        let app = Router::new()
            .route(UPLOAD_PATH, post(record))
            .layer(DefaultBodyLimit::disable())
            .with_state(Arc::clone(&state));

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { addr, state, task })
    }

    /// Upload URL served by this receiver.
    pub fn url(&self) -> String {
        format!("http://{}{UPLOAD_PATH}", self.addr)
    }

    /// Changes the status returned to subsequent uploads.
    pub fn set_status(&self, status: u16) {
        self.lock().status = to_status(status);
    }

    /// Returns all uploads received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ReceiverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TestReceiver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn to_status(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn record(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let mut parts = Vec::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().unwrap_or_default().to_string();
                let file_name = field.file_name().map(str::to_string);
                match field.bytes().await {
                    Ok(data) => parts.push(FormPart {
                        name,
                        file_name,
                        data: data.to_vec(),
                    }),
                    Err(e) => return e.into_response(),
                }
            }
            Ok(None) => break,
            Err(e) => return e.into_response(),
        }
    }

    let headers = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect();

    // Record and read the status under one lock.
    let status = {
        let mut s = state.lock().unwrap_or_else(PoisonError::into_inner);
        s.requests.push(RecordedRequest {
            method: method.to_string(),
            path: uri.path().to_string(),
            headers,
            parts,
        });
        s.status
    };

    let body = if status == StatusCode::OK { "ok" } else { "rejected" };
    (status, body).into_response()
}
