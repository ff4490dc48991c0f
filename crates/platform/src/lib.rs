//! Clients for the hosted backend platform: its auth provider and object storage.

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

pub mod auth;
pub mod storage;

pub use auth::{AuthClient, AuthUser, Session, SignupOutcome, SignupRequest};
pub use storage::{ObjectStorageClient, StoredObject};

/// Errors produced by the platform clients.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl PlatformError {
    /// Status code returned by the platform, when the request reached it.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, PlatformError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(PlatformError::Status { status, body });
    }
    Ok(response)
}

async fn parse_json<T>(response: Response) -> Result<T, PlatformError>
where
    T: DeserializeOwned,
{
    let response = ensure_success(response).await?;
    Ok(response.json().await?)
}
