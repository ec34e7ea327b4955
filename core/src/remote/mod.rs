//! Remote metadata: the page-listing endpoint and per-layout scraping.
//!
//! Image listing failure is fatal to the user-visible action and surfaces as
//! a typed [`RemoteError`]; metadata scraping never fails, it degrades to a
//! placeholder instead.

mod sources;

pub use sources::{DetailPageSource, MetadataSource, SearchPageSource, source_for};

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::types::{ArtworkId, ImagePage};

/// Production base URL of the host site.
pub const DEFAULT_BASE_URL: &str = "https://www.pixiv.net";

/// Errors from the page-listing endpoint.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP error! status: {0}")]
    Status(u16),
    #[error("{0}")]
    Server(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct PagesEnvelope {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    body: Vec<PageEntry>,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    urls: PageUrls,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Deserialize)]
struct PageUrls {
    original: String,
}

/// Client for the site's private AJAX endpoint. Authenticated by referer, not
/// by credentials.
#[derive(Debug, Clone)]
pub struct RemoteMetadataClient {
    client: Client,
    base_url: String,
}

impl RemoteMetadataClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Points the client at a different origin (tests use a local mock).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self { client, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Referer value the endpoint expects: the artwork's own detail page.
    pub fn referer_for(&self, id: &ArtworkId) -> String {
        format!("{}/artworks/{id}", self.base_url)
    }

    /// Lists every page of the artwork with its original-resolution URL.
    pub async fn list_pages(&self, id: &ArtworkId) -> Result<Vec<ImagePage>, RemoteError> {
        let url = format!("{}/ajax/illust/{id}/pages", self.base_url);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::REFERER, self.referer_for(id))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(target: "remote", %id, status = status.as_u16(), "page listing failed");
            return Err(RemoteError::Status(status.as_u16()));
        }

        let envelope: PagesEnvelope = response.json().await?;
        if envelope.error {
            let message =
                envelope.message.unwrap_or_else(|| "API returned an error".to_string());
            tracing::warn!(target: "remote", %id, %message, "page listing rejected");
            return Err(RemoteError::Server(message));
        }

        tracing::debug!(target: "remote", %id, pages = envelope.body.len(), "page listing ok");
        Ok(envelope
            .body
            .into_iter()
            .map(|entry| ImagePage {
                original: entry.urls.original,
                width: entry.width,
                height: entry.height,
            })
            .collect())
    }
}

impl Default for RemoteMetadataClient {
    fn default() -> Self {
        Self::new()
    }
}
