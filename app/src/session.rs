//! Session driver: the shell-side counterpart of the page pipeline.
//!
//! Fetches a page over HTTP, classifies it, scans the markup the way the
//! in-page pipeline would, and drives the panel controller to download one or
//! all images of an artwork.

use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use reqwest::Url;
use scraper::Html;

use pixgrab_core::Result;
use pixgrab_core::naming::FilenameGenerator;
use pixgrab_core::page;
use pixgrab_core::panel::{PanelController, PanelPhase};
use pixgrab_core::remote::{RemoteMetadataClient, source_for};
use pixgrab_core::scan::{ContentView, Control};
use pixgrab_core::types::{FilenameFormat, PageContext};

use crate::dispatcher::{DispatcherHandle, USER_AGENT};

/// Which images of the opened artwork to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// One page, zero-based.
    Page(usize),
    All,
}

#[derive(Debug)]
pub struct Session {
    dispatcher: Arc<DispatcherHandle>,
    http: reqwest::Client,
}

impl Session {
    pub fn new(dispatcher: Arc<DispatcherHandle>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("building the page-fetch HTTP client")?;
        Ok(Self { dispatcher, http })
    }

    async fn fetch_document(&self, url: &Url) -> Result<String> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("fetching {url} failed: HTTP {}", status.as_u16());
        }
        let html = response.text().await?;
        tracing::debug!(target: "session", %url, bytes = html.len(), "page fetched");
        Ok(html)
    }

    /// Scans a page and prints the controls the pipeline would inject.
    pub async fn scan(&self, raw_url: &str) -> Result<()> {
        let url = Url::parse(raw_url).with_context(|| format!("invalid URL {raw_url:?}"))?;
        let context = page::detect(url.path());
        let html = self.fetch_document(&url).await?;

        let doc = Html::parse_document(&html);
        let mut view = ContentView::default();
        let plan = match context {
            PageContext::Detail => view.plan_detail_buttons(&doc),
            PageContext::Search | PageContext::Unknown => view.plan_card_buttons(&doc),
        };

        println!("{context:?} page, {} control(s)", plan.controls.len());
        for control in &plan.controls {
            match control {
                Control::CardDownload { artwork_id } => {
                    let info = source_for(context).artwork_info(&doc, artwork_id);
                    println!(
                        "  card {artwork_id}: {} by {} ({} page(s))",
                        info.title, info.user_name, info.page_count
                    );
                }
                Control::DetailDownload { artwork_id, page_index, url } => {
                    println!("  image {artwork_id} p{page_index}: {url}");
                }
            }
        }
        Ok(())
    }

    /// Downloads from an artwork detail page.
    pub async fn download(
        &self,
        raw_url: &str,
        selection: Selection,
        custom_name: Option<&str>,
    ) -> Result<()> {
        let url = Url::parse(raw_url).with_context(|| format!("invalid URL {raw_url:?}"))?;
        let context = page::detect(url.path());
        let id = page::artwork_id_from_href(url.path())
            .ok_or_else(|| anyhow!("{raw_url} is not an artwork page"))?;

        let html = self.fetch_document(&url).await?;

        let mut panel = PanelController::new(
            Arc::clone(&self.dispatcher),
            RemoteMetadataClient::new(),
            FilenameGenerator::new(FilenameFormat::default()),
        );
        panel.refresh_settings().await;

        let doc = Html::parse_document(&html);
        let view = panel.open(&id, &doc, context).await;

        match &view.phase {
            PanelPhase::Open => {}
            PanelPhase::Error(message) => bail!("failed to open artwork {id}: {message}"),
            other => bail!("unexpected panel state {other:?}"),
        }

        let Some(artwork) = &view.artwork else {
            bail!("panel opened without artwork metadata");
        };
        println!(
            "{} by {} ({} image(s))",
            artwork.title,
            artwork.user_name,
            view.images.len()
        );

        match selection {
            Selection::Page(index) => {
                if index >= view.images.len() {
                    bail!(
                        "page {} out of range, artwork has {} image(s)",
                        index + 1,
                        view.images.len()
                    );
                }
                panel
                    .download_page(index, custom_name)
                    .await
                    .map_err(|message| anyhow!(message))?;
                println!("downloaded page {}", index + 1);
            }
            Selection::All => {
                let report = panel.download_all().await;
                println!(
                    "dispatched {} download(s), {} failed",
                    report.dispatched, report.failed
                );
                if report.failed > 0 {
                    bail!("{} download(s) failed", report.failed);
                }
            }
        }
        Ok(())
    }
}
