use reqwest::{Client, Method};
use url::Url;

use crate::{ensure_success, PlatformError};

/// Client for a single public bucket of the hosted object storage.
#[derive(Clone)]
pub struct ObjectStorageClient {
    http: Client,
    base_url: Url,
    service_key: String,
    bucket: String,
}

/// Location of an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    pub public_url: Url,
}

impl ObjectStorageClient {
    pub fn new(
        service_key: impl Into<String>,
        bucket: impl Into<String>,
        base_url: Url,
        http: Client,
    ) -> Self {
        Self {
            http,
            base_url,
            service_key: service_key.into(),
            bucket: bucket.into(),
        }
    }

    /// Uploads `bytes` to `path` inside the bucket, replacing any existing object.
    pub async fn upload(
        &self,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredObject, PlatformError> {
        let url = self
            .base_url
            .join(&format!("storage/v1/object/{}/{path}", self.bucket))?;
        let response = self
            .authorized_request(Method::POST, url)
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;
        ensure_success(response).await?;

        Ok(StoredObject {
            path: path.to_string(),
            public_url: self.public_url(path)?,
        })
    }

    /// Removes an object; missing objects are not an error.
    pub async fn remove(&self, path: &str) -> Result<(), PlatformError> {
        let url = self
            .base_url
            .join(&format!("storage/v1/object/{}/{path}", self.bucket))?;
        let response = self.authorized_request(Method::DELETE, url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    pub fn public_url(&self, path: &str) -> Result<Url, PlatformError> {
        Ok(self
            .base_url
            .join(&format!("storage/v1/object/public/{}/{path}", self.bucket))?)
    }

    fn authorized_request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }
}
