//! Typed message bus between the unprivileged pipeline and the privileged
//! dispatcher.
//!
//! Request/response only: every request gets at most one response. The
//! dispatcher side lives in the shell; the pipeline talks through the
//! [`Dispatch`] seam so tests can substitute a recording double.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{ArtworkId, FilenameFormat, Settings};

/// Where a bus message originated. The dispatcher only honours messages from
/// the content side; everything else is dropped unanswered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Content,
    Internal,
}

/// Shallow patch applied to the persisted settings.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub filename_format: Option<FilenameFormat>,
}

impl SettingsPatch {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(format) = self.filename_format {
            settings.filename_format = format.effective();
        }
    }
}

/// Requests the pipeline may send over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusRequest {
    DownloadImage {
        url: String,
        filename: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        artwork_id: Option<ArtworkId>,
    },
    GetSettings,
    UpdateSettings(SettingsPatch),
    FetchImage {
        url: String,
        referer: String,
    },
}

/// Responses, one per request.
#[derive(Debug, Clone, PartialEq)]
pub enum BusResponse {
    /// DownloadImage / UpdateSettings acknowledged.
    Done,
    /// GetSettings.
    Settings(Settings),
    /// FetchImage: a `data:<mime>;base64,...` URL.
    DataUrl(String),
}

/// Seam the pipeline uses to reach the privileged relay.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Sends one request and waits for its single response. `Err` carries a
    /// human-readable message suitable for the alert path.
    async fn send(&self, request: BusRequest) -> Result<BusResponse, String>;
}
