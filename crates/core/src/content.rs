//! Content-addressed storage for upload payloads.

use std::{fmt, future::Future, path::Path, time::Duration};

use reqwest::{
    Client, StatusCode,
    multipart::{Form, Part},
};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::ContentArgs;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("content store returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("invalid content store URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid content identifier {0:?}")]
    InvalidIdentifier(String),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("refusing to upload an empty payload")]
    EmptyPayload,
    #[error("failed to read upload source {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("content store rejected the payload: {0}")]
    Store(#[from] StoreError),
}

/// Identifier returned by the content store for a stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Result<Self, StoreError> {
        let id = id.into();
        if id.is_empty() || id.contains('/') || id.chars().any(char::is_whitespace) {
            return Err(StoreError::InvalidIdentifier(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `{gateway}/ipfs/{id}`
    pub fn gateway_url(&self, gateway: &Url) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "{}/ipfs/{}",
            gateway.as_str().trim_end_matches('/'),
            self.0
        ))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait ContentStore: Send + Sync + 'static {
    fn add(&self, bytes: Vec<u8>) -> impl Future<Output = Result<ContentId, StoreError>> + Send;
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// Client for the IPFS HTTP API (`/api/v0/add`).
#[derive(Debug, Clone)]
pub struct IpfsStore {
    client: Client,
    api: Url,
}

impl IpfsStore {
    pub fn new(api: Url, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, api })
    }

    pub fn from_args(args: &ContentArgs) -> Result<Self, StoreError> {
        Self::new(args.api_url.clone(), Duration::from_secs(args.timeout_secs))
    }
}

impl ContentStore for IpfsStore {
    async fn add(&self, bytes: Vec<u8>) -> Result<ContentId, StoreError> {
        let endpoint = self.api.join("api/v0/add")?;
        let size = bytes.len();
        let form = Form::new().part("file", Part::bytes(bytes).file_name("payload"));

        let response = self
            .client
            .post(endpoint)
            .query(&[("pin", "true")])
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body: AddResponse = response.json().await?;
        let id = ContentId::new(body.hash)?;
        tracing::debug!(%id, size, "payload stored");
        Ok(id)
    }
}

/// A fully buffered payload plus the metadata recorded alongside it on-chain.
/// Consumed by a single upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    pub bytes: Vec<u8>,
    pub metadata: String,
}

impl PendingUpload {
    pub fn new(bytes: impl Into<Vec<u8>>, metadata: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            metadata: metadata.into(),
        }
    }

    pub async fn from_file(
        path: impl AsRef<Path>,
        metadata: impl Into<String>,
    ) -> Result<Self, UploadError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::new(bytes, metadata))
    }
}

pub struct ContentUploader<S> {
    store: S,
}

impl<S: ContentStore> ContentUploader<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Stores `bytes` and returns the identifier. Failures are not retried.
    pub async fn upload(&self, bytes: Vec<u8>) -> Result<ContentId, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::EmptyPayload);
        }

        let size = bytes.len();
        match self.store.add(bytes).await {
            Ok(id) => {
                tracing::info!(%id, size, "upload complete");
                Ok(id)
            }
            Err(err) => {
                tracing::error!(size, %err, "upload failed");
                Err(err.into())
            }
        }
    }
}
