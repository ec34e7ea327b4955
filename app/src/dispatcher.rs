//! Privileged relay: the one place that performs referer-spoofed fetches and
//! writes files.
//!
//! A single task consumes request envelopes off an mpsc channel and answers
//! each over its oneshot reply slot, one response per request. Envelopes from
//! any origin other than [`Origin::Content`] are dropped unanswered. Settings
//! changes are persisted and republished on a watch channel so readers pick
//! them up on their next look.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use percent_encoding::percent_decode_str;
use tokio::sync::{mpsc, oneshot, watch};

use pixgrab_core::Result;
use pixgrab_core::bus::{BusRequest, BusResponse, Dispatch, Origin};
use pixgrab_core::remote::DEFAULT_BASE_URL;
use pixgrab_core::settings::SettingsStore;
use pixgrab_core::types::{ArtworkId, Settings};

/// Fixed desktop browser identity sent with every privileged fetch. The image
/// host rejects requests that do not look like a page view.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36";

const CHANNEL_CAPACITY: usize = 32;

struct Envelope {
    origin: Origin,
    request: BusRequest,
    reply: oneshot::Sender<std::result::Result<BusResponse, String>>,
}

/// The relay task's state. Constructed once, then moved into the task.
pub struct Dispatcher {
    client: reqwest::Client,
    store: SettingsStore,
    settings: Settings,
    download_dir: PathBuf,
    publish: watch::Sender<Settings>,
}

impl Dispatcher {
    /// Starts the relay task and returns a handle bound to the content
    /// origin. Settings load failure keeps defaults; the user never sees it.
    pub fn spawn(store: SettingsStore, download_dir: PathBuf) -> Result<DispatcherHandle> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("building the relay HTTP client")?;

        let settings = store.load();
        let (publish, settings_rx) = watch::channel(settings);
        let (tx, mut rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);

        let mut dispatcher = Dispatcher { client, store, settings, download_dir, publish };
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if envelope.origin != Origin::Content {
                    tracing::warn!(
                        target: "dispatcher",
                        origin = ?envelope.origin,
                        "dropping request from unexpected origin"
                    );
                    continue;
                }
                let response = dispatcher.handle(envelope.request).await;
                let _ = envelope.reply.send(response);
            }
            tracing::debug!(target: "dispatcher", "relay task stopped");
        });

        Ok(DispatcherHandle { tx, origin: Origin::Content, settings: settings_rx })
    }

    async fn handle(&mut self, request: BusRequest) -> std::result::Result<BusResponse, String> {
        match request {
            BusRequest::DownloadImage { url, filename, artwork_id } => {
                self.download_image(&url, &filename, artwork_id.as_ref()).await?;
                Ok(BusResponse::Done)
            }
            BusRequest::GetSettings => Ok(BusResponse::Settings(self.settings)),
            BusRequest::UpdateSettings(patch) => {
                patch.apply(&mut self.settings);
                self.store
                    .save(&self.settings)
                    .map_err(|error| format!("failed to save settings: {error}"))?;
                let _ = self.publish.send(self.settings);
                tracing::debug!(target: "dispatcher", settings = ?self.settings, "settings updated");
                Ok(BusResponse::Done)
            }
            BusRequest::FetchImage { url, referer } => {
                let data_url = self.fetch_as_data_url(&url, &referer).await?;
                Ok(BusResponse::DataUrl(data_url))
            }
        }
    }

    async fn download_image(
        &self,
        url: &str,
        filename: &str,
        artwork_id: Option<&ArtworkId>,
    ) -> std::result::Result<(), String> {
        let relative = decoded_relative_path(filename)?;

        let mut request = self.client.get(url);
        if let Some(id) = artwork_id {
            request = request
                .header(reqwest::header::REFERER, format!("{DEFAULT_BASE_URL}/artworks/{id}"));
        }

        let response = request.send().await.map_err(|error| error.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }
        let bytes = response.bytes().await.map_err(|error| error.to_string())?;

        let target = uniquify(&self.download_dir.join(&relative));
        save_atomically(&target, &bytes).map_err(|error| error.to_string())?;

        tracing::info!(
            target: "dispatcher",
            url,
            path = %target.display(),
            size = bytes.len(),
            "image saved"
        );
        Ok(())
    }

    async fn fetch_as_data_url(
        &self,
        url: &str,
        referer: &str,
    ) -> std::result::Result<String, String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::REFERER, referer)
            .send()
            .await
            .map_err(|error| error.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await.map_err(|error| error.to_string())?;
        Ok(format!("data:{mime};base64,{}", BASE64.encode(&bytes)))
    }
}

/// Percent-decodes the generated filename and rejects anything that would
/// escape the download root.
fn decoded_relative_path(filename: &str) -> std::result::Result<PathBuf, String> {
    let decoded = percent_decode_str(filename).decode_utf8_lossy().into_owned();
    let path = PathBuf::from(&decoded);

    let safe = !decoded.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if !safe {
        return Err(format!("refusing unsafe download path: {decoded:?}"));
    }
    Ok(path)
}

/// Conflict policy "uniquify": on collision, append ` (1)`, ` (2)` and so on
/// before the extension until the name is free.
fn uniquify(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let extension = path.extension().and_then(|e| e.to_str());

    let mut counter = 1u32;
    loop {
        let name = match extension {
            Some(ext) => format!("{stem} ({counter}).{ext}"),
            None => format!("{stem} ({counter})"),
        };
        let candidate = path.with_file_name(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Writes through a sibling temp file so a crash never leaves a truncated
/// image behind.
fn save_atomically(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| anyhow::anyhow!("download path {} has no parent", target.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("creating download directory at {}", parent.display()))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.persist(target).map_err(|err| err.error)?;
    Ok(())
}

/// Cloneable client side of the relay. Implements the bus seam for the core
/// pipeline; `with_origin` exists so tests can impersonate other senders.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Envelope>,
    origin: Origin,
    settings: watch::Receiver<Settings>,
}

impl DispatcherHandle {
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Latest published settings; may lag a concurrent update until the next
    /// read.
    pub fn settings(&self) -> Settings {
        *self.settings.borrow()
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("origin", &self.origin)
            .field("request", &self.request)
            .finish()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("download_dir", &self.download_dir)
            .field("settings", &self.settings)
            .finish()
    }
}

#[async_trait]
impl Dispatch for DispatcherHandle {
    async fn send(&self, request: BusRequest) -> std::result::Result<BusResponse, String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope { origin: self.origin, request, reply: reply_tx };
        self.tx
            .send(envelope)
            .await
            .map_err(|_| "dispatcher is not running".to_string())?;
        reply_rx
            .await
            .map_err(|_| "request dropped by the dispatcher".to_string())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixgrab_core::bus::SettingsPatch;
    use pixgrab_core::types::FilenameFormat;
    use wiremock::matchers::{header, headers, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_dispatcher(dir: &Path) -> DispatcherHandle {
        let store = SettingsStore::new(dir.join("settings.json"));
        Dispatcher::spawn(store, dir.join("downloads")).expect("dispatcher spawns")
    }

    #[tokio::test]
    async fn download_saves_bytes_and_sends_the_referer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img-original/55_p0.png"))
            .and(header("referer", "https://www.pixiv.net/artworks/55"))
            // wiremock's `header` matcher splits request values on commas, so
            // the comma inside "(KHTML, like Gecko)" can never match it;
            // `headers` with the same split expresses the same exact value.
            .and(headers("user-agent", USER_AGENT.split(',').map(str::trim).collect()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let handle = test_dispatcher(dir.path());

        let response = handle
            .send(BusRequest::DownloadImage {
                url: format!("{}/img-original/55_p0.png", server.uri()),
                filename: "title_1.png".to_string(),
                artwork_id: Some(ArtworkId::new("55")),
            })
            .await
            .expect("download succeeds");
        assert_eq!(response, BusResponse::Done);

        let saved = std::fs::read(dir.path().join("downloads/title_1.png")).unwrap();
        assert_eq!(saved, b"png-bytes");
    }

    #[tokio::test]
    async fn collision_uniquifies_instead_of_overwriting() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"second".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        std::fs::write(downloads.join("a_1.png"), b"first").unwrap();

        let handle = test_dispatcher(dir.path());
        handle
            .send(BusRequest::DownloadImage {
                url: format!("{}/a.png", server.uri()),
                filename: "a_1.png".to_string(),
                artwork_id: None,
            })
            .await
            .expect("download succeeds");

        assert_eq!(std::fs::read(downloads.join("a_1.png")).unwrap(), b"first");
        assert_eq!(std::fs::read(downloads.join("a_1 (1).png")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn percent_encoded_filenames_decode_before_saving() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let handle = test_dispatcher(dir.path());
        handle
            .send(BusRequest::DownloadImage {
                url: format!("{}/a.png", server.uri()),
                // "空と 海_1.png" as the naming pipeline emits it.
                filename: "%E7%A9%BA%E3%81%A8%20%E6%B5%B7_1.png".to_string(),
                artwork_id: None,
            })
            .await
            .expect("download succeeds");

        assert!(dir.path().join("downloads/空と 海_1.png").exists());
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let handle = test_dispatcher(dir.path());

        let err = handle
            .send(BusRequest::DownloadImage {
                url: "https://example.invalid/a.png".to_string(),
                filename: "../outside.png".to_string(),
                artwork_id: None,
            })
            .await
            .unwrap_err();
        assert!(err.contains("unsafe download path"), "got {err}");
    }

    #[tokio::test]
    async fn non_2xx_download_reports_the_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let handle = test_dispatcher(dir.path());
        let err = handle
            .send(BusRequest::DownloadImage {
                url: format!("{}/a.png", server.uri()),
                filename: "a.png".to_string(),
                artwork_id: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, "HTTP 403");
    }

    #[tokio::test]
    async fn settings_update_persists_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let handle = test_dispatcher(dir.path());

        let patch = SettingsPatch { filename_format: Some(FilenameFormat::AuthorIdPage) };
        handle.send(BusRequest::UpdateSettings(patch)).await.expect("update succeeds");

        let response = handle.send(BusRequest::GetSettings).await.expect("get succeeds");
        assert_eq!(
            response,
            BusResponse::Settings(Settings { filename_format: FilenameFormat::AuthorIdPage })
        );
        assert_eq!(handle.settings().filename_format, FilenameFormat::AuthorIdPage);

        // A fresh store sees the persisted value.
        let store = SettingsStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load().filename_format, FilenameFormat::AuthorIdPage);
    }

    #[tokio::test]
    async fn non_content_origins_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let handle = test_dispatcher(dir.path()).with_origin(Origin::Internal);

        let err = handle.send(BusRequest::GetSettings).await.unwrap_err();
        assert_eq!(err, "request dropped by the dispatcher");
    }

    #[tokio::test]
    async fn fetch_image_returns_a_data_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("referer", "https://www.pixiv.net/artworks/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![1u8, 2, 3]),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let handle = test_dispatcher(dir.path());
        let response = handle
            .send(BusRequest::FetchImage {
                url: format!("{}/a.png", server.uri()),
                referer: "https://www.pixiv.net/artworks/1".to_string(),
            })
            .await
            .expect("fetch succeeds");

        assert_eq!(response, BusResponse::DataUrl("data:image/png;base64,AQID".to_string()));
    }
}
