//! Shared data structures exchanged between the core pipeline, the shell, and tests.

use serde::{Deserialize, Serialize};

/// Identifier for one artwork on the host site.
///
/// Opaque numeric string extracted from URLs and markup attributes; never
/// validated against a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtworkId(String);

impl ArtworkId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classification of the current page path. Recomputed on every navigation,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageContext {
    Search,
    Detail,
    Unknown,
}

/// Best-effort metadata for one artwork, scraped from the rendered markup.
///
/// Fields fall back to placeholder values when the scrape misses; see
/// [`ArtworkInfo::placeholder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtworkInfo {
    pub id: ArtworkId,
    pub title: String,
    pub user_name: String,
    pub page_count: u32,
}

impl ArtworkInfo {
    /// The value a scrape miss degrades to. Metadata loss is non-fatal.
    pub fn placeholder(id: &ArtworkId) -> Self {
        Self {
            id: id.clone(),
            title: format!("作品 {id}"),
            user_name: "Unknown User".to_string(),
            page_count: 1,
        }
    }
}

/// One page of a (possibly multi-page) artwork, as returned by the metadata
/// endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePage {
    /// Original-resolution image URL.
    pub original: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// Destination naming scheme for downloaded files.
///
/// Unknown values on the wire or on disk fall back to `title_page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilenameFormat {
    #[default]
    TitlePage,
    IdPage,
    AuthorTitlePage,
    AuthorIdPage,
    #[serde(other, skip_serializing)]
    Unrecognized,
}

impl FilenameFormat {
    /// Collapses the unrecognized variant onto the default scheme.
    pub fn effective(self) -> Self {
        match self {
            FilenameFormat::Unrecognized => FilenameFormat::TitlePage,
            other => other,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "title_page" => Some(FilenameFormat::TitlePage),
            "id_page" => Some(FilenameFormat::IdPage),
            "author_title_page" => Some(FilenameFormat::AuthorTitlePage),
            "author_id_page" => Some(FilenameFormat::AuthorIdPage),
            _ => None,
        }
    }
}

/// User preferences. One blob, persisted under a single storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub filename_format: FilenameFormat,
}
