use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://blob.example.net";

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    CannotBeBase(String),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

/// Account name and shared key used to sign every request.
#[derive(Clone)]
pub struct Credentials {
    pub account: String,
    pub key: String,
}

impl Credentials {
    pub fn new(account: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct BlobStoreClient {
    http: Client,
    base_url: Url,
    credentials: Credentials,
}

impl BlobStoreClient {
    pub fn new(credentials: Credentials) -> Result<Self, BlobStoreError> {
        Self::with_base_url(DEFAULT_BASE_URL, credentials)
    }

    pub fn with_base_url(base_url: &str, credentials: Credentials) -> Result<Self, BlobStoreError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            credentials,
        })
    }

    pub fn account(&self) -> &str {
        &self.credentials.account
    }

    /// Fetches one page of the container listing, starting after `marker`.
    pub async fn list_objects(
        &self,
        container: &str,
        marker: Option<&str>,
        limit: Option<u32>,
    ) -> Result<ObjectPage, BlobStoreError> {
        let mut url = self.container_url(container)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.to_string());
            }
            if let Some(marker) = marker.filter(|m| !m.is_empty()) {
                query.append_pair("marker", marker);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Starts a streaming download of one object. The caller drains the body.
    pub async fn download_object(
        &self,
        container: &str,
        name: &str,
    ) -> Result<reqwest::Response, BlobStoreError> {
        let url = self.object_url(container, name)?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(BlobStoreError::Api { status, body })
        }
    }

    fn auth_header_value(&self) -> String {
        format!(
            "SharedKey {}:{}",
            self.credentials.account, self.credentials.key
        )
    }

    fn container_url(&self, container: &str) -> Result<Url, BlobStoreError> {
        let mut url = self.base_url.join("/v1/containers/")?;
        url.path_segments_mut()
            .map_err(|_| BlobStoreError::CannotBeBase(self.base_url.to_string()))?
            .pop_if_empty()
            .push(container)
            .push("objects");
        Ok(url)
    }

    fn object_url(&self, container: &str, name: &str) -> Result<Url, BlobStoreError> {
        let mut url = self.container_url(container)?;
        url.path_segments_mut()
            .map_err(|_| BlobStoreError::CannotBeBase(self.base_url.to_string()))?
            .extend(name.split('/'));
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BlobStoreError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(BlobStoreError::Api { status, body })
        }
    }
}

impl BlobStoreError {
    /// The object disappeared between listing and fetch.
    pub fn is_not_found(&self) -> bool {
        match self {
            BlobStoreError::Api { status, .. } => {
                matches!(*status, StatusCode::NOT_FOUND | StatusCode::GONE)
            }
            BlobStoreError::Request(err) => err.status() == Some(StatusCode::NOT_FOUND),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
    /// Lowercase hex MD5 of the object content.
    pub md5: String,
    /// RFC 3339 timestamp.
    pub last_modified: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ObjectPage {
    #[serde(default)]
    pub objects: Vec<ObjectInfo>,
    #[serde(default)]
    pub next_marker: Option<String>,
}
