use std::sync::Arc;

use anyhow::{Context, Result};
use loader_cache::Abandoned;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::config::Api;
use crate::models::StoryList;

/// Errors fetching a resource from the API.
///
/// This is cloned to every caller waiting on the same item, so the underlying errors are kept as
/// their messages only.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The request could not be sent, or timed out.
    #[error("request failed: {0}")]
    Request(String),
    /// The server responded with an error status.
    #[error("server responded with status {0}")]
    Status(u16),
    /// The API has no item with this id.
    #[error("not found")]
    NotFound,
    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The fetch went away without producing a result.
    #[error(transparent)]
    Abandoned(#[from] Abandoned),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// A client for the Hacker News API.
#[derive(Clone, Debug)]
pub struct HnClient {
    client: reqwest::Client,
    base_url: Arc<Url>,
}

impl HnClient {
    pub fn new(config: &Api) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("hnloader/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: Arc::new(config.base_url.clone()),
        })
    }

    fn url(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|err| FetchError::Request(format!("invalid URL for {path}: {err}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = self.url(path)?;
        tracing::trace!(%url, "Fetching");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response.json().await?)
    }

    /// Fetches the item with the given `id`.
    ///
    /// The API answers `null` for ids it does not know, which is reported as
    /// [`FetchError::NotFound`].
    pub async fn item<T: DeserializeOwned>(&self, id: u32) -> Result<T, FetchError> {
        let item: Option<T> = self.get_json(&format!("item/{id}.json")).await?;
        item.ok_or(FetchError::NotFound)
    }

    /// Fetches the ids of the stories on `list`, in ranked order.
    pub async fn story_ids(&self, list: StoryList) -> Result<Vec<u32>, FetchError> {
        self.get_json(list.path()).await
    }
}
