//! Panel (modal) orchestration: metadata fetch, rendering snapshots, and
//! download dispatch.
//!
//! Phase machine: `Closed -> Loading -> (Open | Error)`, back to `Closed` on
//! explicit close. Every transition rebuilds the view snapshot from scratch;
//! there is no incremental diffing. Downloads go through the [`Dispatch`]
//! seam; a failing single download surfaces through the alert hook and is
//! never retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use scraper::Html;

use crate::bus::{BusRequest, Dispatch};
use crate::naming::{self, FilenameGenerator};
use crate::remote::{RemoteMetadataClient, source_for};
use crate::types::{ArtworkId, ArtworkInfo, ImagePage, PageContext};

/// Fixed pause between consecutive bulk dispatches. Rate-limit avoidance,
/// not error recovery.
pub const BULK_DISPATCH_DELAY: Duration = Duration::from_millis(500);

/// Panel lifecycle phase.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PanelPhase {
    #[default]
    Closed,
    Loading,
    Open,
    Error(String),
}

/// Immutable render snapshot, rebuilt on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelView {
    pub phase: PanelPhase,
    pub artwork: Option<ArtworkInfo>,
    pub images: Vec<ImagePage>,
    /// Generated default filename (no extension) per image, same order as
    /// `images`.
    pub default_names: Vec<String>,
}

/// Outcome of a bulk download pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkReport {
    pub dispatched: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Cooperative cancellation checked between bulk iterations. Never aborts an
/// in-flight request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct PanelState {
    phase: PanelPhase,
    artwork: Option<ArtworkInfo>,
    images: Vec<ImagePage>,
}

/// Orchestrates one tab's panel. Constructed with its collaborators injected;
/// nothing here is process-global.
pub struct PanelController<D: Dispatch + ?Sized> {
    dispatcher: Arc<D>,
    remote: RemoteMetadataClient,
    naming: FilenameGenerator,
    state: PanelState,
    cancel: CancelToken,
    alert: Box<dyn Fn(&str) + Send + Sync>,
}

impl<D: Dispatch + ?Sized> PanelController<D> {
    pub fn new(
        dispatcher: Arc<D>,
        remote: RemoteMetadataClient,
        naming: FilenameGenerator,
    ) -> Self {
        Self {
            dispatcher,
            remote,
            naming,
            state: PanelState::default(),
            cancel: CancelToken::default(),
            alert: Box::new(|message| {
                tracing::error!(target: "panel", message, "download alert");
            }),
        }
    }

    /// Replaces the blocking-alert hook (the shell wires a real prompt here).
    pub fn with_alert_hook(mut self, alert: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.alert = Box::new(alert);
        self
    }

    /// Pulls the current settings from the dispatcher. Failure keeps the
    /// current naming scheme.
    pub async fn refresh_settings(&mut self) {
        match self.dispatcher.send(BusRequest::GetSettings).await {
            Ok(crate::bus::BusResponse::Settings(settings)) => {
                self.naming.set_format(settings.filename_format);
            }
            Ok(other) => {
                tracing::warn!(target: "panel", ?other, "unexpected settings response");
            }
            Err(error) => {
                tracing::warn!(target: "panel", error, "failed to load settings");
            }
        }
    }

    /// Token that cancels the remainder of a bulk pass. Re-armed on each
    /// open.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Opens the panel for one artwork: lists its pages over the wire and
    /// scrapes its metadata from the rendered document.
    pub fn open<'a>(
        &'a mut self,
        id: &'a ArtworkId,
        doc: &Html,
        context: PageContext,
    ) -> impl std::future::Future<Output = PanelView> + Send + 'a {
        // The scrape is synchronous over the already-parsed document; do it
        // before suspending so the returned future does not capture the
        // non-Send document.
        let info = source_for(context).artwork_info(doc, id);
        async move {
            self.state = PanelState { phase: PanelPhase::Loading, artwork: None, images: vec![] };
            self.cancel = CancelToken::default();
            tracing::debug!(target: "panel", %id, "panel loading");

            match self.remote.list_pages(id).await {
                Ok(images) => {
                    self.state = PanelState {
                        phase: PanelPhase::Open,
                        artwork: Some(info),
                        images,
                    };
                }
                Err(error) => {
                    tracing::warn!(target: "panel", %id, %error, "panel open failed");
                    self.state = PanelState {
                        phase: PanelPhase::Error(error.to_string()),
                        artwork: Some(info),
                        images: vec![],
                    };
                }
            }

            self.view()
        }
    }

    /// Explicit close (close button, backdrop, Escape). Cancels the remainder
    /// of any bulk pass and resets all transient state.
    pub fn close(&mut self) -> PanelView {
        self.cancel.cancel();
        self.state = PanelState::default();
        self.view()
    }

    /// Rebuilds the render snapshot from the current state.
    pub fn view(&self) -> PanelView {
        let default_names = match &self.state.artwork {
            Some(artwork) => (0..self.state.images.len())
                .map(|i| {
                    self.naming.generate(&artwork.title, &artwork.user_name, &artwork.id, i)
                })
                .collect(),
            None => Vec::new(),
        };
        PanelView {
            phase: self.state.phase.clone(),
            artwork: self.state.artwork.clone(),
            images: self.state.images.clone(),
            default_names,
        }
    }

    /// Downloads one page. A non-empty custom name takes precedence over the
    /// generated default; the extension always comes from the source URL.
    pub async fn download_page(
        &self,
        page_index: usize,
        custom_name: Option<&str>,
    ) -> Result<(), String> {
        let (Some(artwork), Some(page)) =
            (&self.state.artwork, self.state.images.get(page_index))
        else {
            return Err("panel is not open".to_string());
        };

        let name = match custom_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(custom) => naming::sanitize(custom),
            None => self.naming.generate(
                &artwork.title,
                &artwork.user_name,
                &artwork.id,
                page_index,
            ),
        };

        self.dispatch_download(&page.original, &name, &artwork.id).await
    }

    /// Downloads every page strictly sequentially, one dispatch per image in
    /// index order, pausing [`BULK_DISPATCH_DELAY`] between dispatches. A
    /// failing image is reported and the loop continues; cancellation is
    /// honoured between iterations only.
    pub async fn download_all(&self) -> BulkReport {
        let Some(artwork) = &self.state.artwork else {
            return BulkReport::default();
        };
        if self.state.images.is_empty() {
            return BulkReport::default();
        }

        let folder =
            self.naming.generate_folder(&artwork.title, &artwork.user_name, &artwork.id);

        let mut report = BulkReport::default();
        for (index, page) in self.state.images.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::debug!(target: "panel", index, "bulk download cancelled");
                report.cancelled = true;
                break;
            }
            if index > 0 {
                tokio::time::sleep(BULK_DISPATCH_DELAY).await;
            }

            let name = format!("{folder}/{}", index + 1);
            report.dispatched += 1;
            if self.dispatch_download(&page.original, &name, &artwork.id).await.is_err() {
                report.failed += 1;
            }
        }

        tracing::debug!(
            target: "panel",
            dispatched = report.dispatched,
            failed = report.failed,
            cancelled = report.cancelled,
            "bulk download done"
        );
        report
    }

    async fn dispatch_download(
        &self,
        url: &str,
        name: &str,
        artwork_id: &ArtworkId,
    ) -> Result<(), String> {
        let filename = naming::ensure_file_extension(name, url);
        let request = BusRequest::DownloadImage {
            url: url.to_string(),
            filename,
            artwork_id: Some(artwork_id.clone()),
        };
        match self.dispatcher.send(request).await {
            Ok(_) => Ok(()),
            Err(error) => {
                (self.alert)(&error);
                Err(error)
            }
        }
    }
}

impl<D: Dispatch + ?Sized> std::fmt::Debug for PanelController<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelController")
            .field("phase", &self.state.phase)
            .field("images", &self.state.images.len())
            .finish()
    }
}
