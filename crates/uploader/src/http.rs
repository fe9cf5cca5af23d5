//! HTTP upload server client.
//!
//! Async client using `reqwest` against the four upload routes.

use std::time::Duration;

use chunklift_protocol::{CheckExistingRequest, CheckExistingResponse, ErrorResponse, MergeRequest};
use reqwest::multipart::{Form, Part};

use crate::error::ServerError;
use crate::server::{ChunkUpload, DirectUpload, ServerFuture, UploadServer};

const CHECK_ROUTE: &str = "/upload/check";
const CHUNK_ROUTE: &str = "/upload/chunk";
const MERGE_ROUTE: &str = "/upload/merge";
const DIRECT_ROUTE: &str = "/upload/direct";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// [`UploadServer`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpUploadServer {
    http: reqwest::Client,
    base_url: String,
}

impl HttpUploadServer {
    /// Creates a client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ServerError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Wraps an existing `reqwest` client.
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    /// Sends a request and fails on non-2xx.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ServerError> {
        let resp = req.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServerError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        Ok(resp)
    }
}

/// Extracts the message of an [`ErrorResponse`] body, falling back to the
/// raw text.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) if err.details.is_empty() => err.message,
        Ok(err) => format!("{} ({})", err.message, err.details),
        Err(_) if body.trim().is_empty() => "empty response body".into(),
        Err(_) => body.trim().to_string(),
    }
}

impl UploadServer for HttpUploadServer {
    fn check_existing(
        &self,
        req: CheckExistingRequest,
    ) -> ServerFuture<'_, CheckExistingResponse> {
        Box::pin(async move {
            let resp = self
                .send(self.http.post(self.endpoint(CHECK_ROUTE)).json(&req))
                .await?;
            let body = resp.bytes().await?;
            Ok(serde_json::from_slice(&body)?)
        })
    }

    fn upload_chunk(&self, chunk: ChunkUpload) -> ServerFuture<'_, ()> {
        Box::pin(async move {
            let meta = serde_json::to_string(&chunk.header)?;
            let form = Form::new()
                .part("meta", Part::text(meta).mime_str("application/json")?)
                .part(
                    "chunk",
                    Part::bytes(chunk.payload).file_name(chunk.header.chunk_hash.clone()),
                );
            self.send(self.http.post(self.endpoint(CHUNK_ROUTE)).multipart(form))
                .await?;
            Ok(())
        })
    }

    fn merge_chunks(&self, req: MergeRequest) -> ServerFuture<'_, ()> {
        Box::pin(async move {
            self.send(self.http.post(self.endpoint(MERGE_ROUTE)).json(&req))
                .await?;
            Ok(())
        })
    }

    fn upload_direct(&self, upload: DirectUpload) -> ServerFuture<'_, ()> {
        Box::pin(async move {
            let form = Form::new().part(
                "file",
                Part::bytes(upload.payload).file_name(upload.file_name),
            );
            self.send(self.http.post(self.endpoint(DIRECT_ROUTE)).multipart(form))
                .await?;
            Ok(())
        })
    }
}
