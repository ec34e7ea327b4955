//! Per-layout artwork metadata scraping.
//!
//! The site renders artwork metadata client-side and has no stable public
//! API for it, so each page layout gets its own scraping source behind the
//! [`MetadataSource`] capability trait. Sources always return a typed value:
//! a miss degrades to [`ArtworkInfo::placeholder`], never to an error.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::types::{ArtworkId, ArtworkInfo, PageContext};

fn sel(cache: &'static OnceLock<Selector>, css: &'static str) -> &'static Selector {
    cache.get_or_init(|| Selector::parse(css).expect("static selector"))
}

fn page_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)ページ目").expect("page label pattern"))
}

/// Capability: extract one artwork's metadata from a rendered document.
pub trait MetadataSource: Send + Sync {
    fn page_context(&self) -> PageContext;
    fn artwork_info(&self, doc: &Html, id: &ArtworkId) -> ArtworkInfo;
}

/// Picks the scraping source for a page classification. Unknown pages use the
/// search layout, which tolerates missing structure best.
pub fn source_for(context: PageContext) -> Box<dyn MetadataSource> {
    match context {
        PageContext::Detail => Box::new(DetailPageSource),
        PageContext::Search | PageContext::Unknown => Box::new(SearchPageSource),
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Search/listing layout: metadata lives on the artwork card around the
/// tracking-tagged anchor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchPageSource;

impl SearchPageSource {
    /// The card is a fixed number of levels above the tracking anchor.
    fn card_for<'a>(doc: &'a Html, id: &ArtworkId) -> Option<ElementRef<'a>> {
        static ANCHOR: OnceLock<Selector> = OnceLock::new();
        let anchor_sel = sel(&ANCHOR, "a[data-gtm-value]");
        let anchor = doc
            .select(anchor_sel)
            .find(|el| el.value().attr("data-gtm-value") == Some(id.as_str()))?;

        let mut card = anchor;
        for _ in 0..3 {
            card = card.parent().and_then(ElementRef::wrap)?;
        }
        Some(card)
    }

    fn title(card: ElementRef<'_>) -> Option<String> {
        static TITLE: OnceLock<Selector> = OnceLock::new();
        let links: Vec<ElementRef<'_>> =
            card.select(sel(&TITLE, r#"a[href*="/artworks/"]"#)).collect();
        // The first artwork anchor wraps the thumbnail; the second carries
        // the visible title text.
        let link = links.get(1)?;
        let text = element_text(*link);
        (!text.is_empty()).then_some(text)
    }

    fn user_name(card: ElementRef<'_>) -> Option<String> {
        static USER: OnceLock<Selector> = OnceLock::new();
        static DIV: OnceLock<Selector> = OnceLock::new();
        let link = card.select(sel(&USER, r#"a[href*="/users/"]"#)).next()?;
        let name = link
            .select(sel(&DIV, "div"))
            .next()
            .and_then(|div| div.value().attr("title").map(|t| t.trim().to_string()))?;
        (!name.is_empty()).then_some(name)
    }

    fn page_count(card: ElementRef<'_>) -> Option<u32> {
        static LABEL: OnceLock<Selector> = OnceLock::new();
        let labelled: Vec<ElementRef<'_>> =
            card.select(sel(&LABEL, r#"[aria-label*="ページ目"]"#)).collect();
        let last = labelled.last()?;
        let label = last.value().attr("aria-label")?;
        page_label_re().captures(label)?.get(1)?.as_str().parse().ok()
    }
}

impl MetadataSource for SearchPageSource {
    fn page_context(&self) -> PageContext {
        PageContext::Search
    }

    fn artwork_info(&self, doc: &Html, id: &ArtworkId) -> ArtworkInfo {
        let Some(card) = Self::card_for(doc, id) else {
            tracing::warn!(target: "remote::scrape", %id, "card not found, using placeholder");
            return ArtworkInfo::placeholder(id);
        };

        let placeholder = ArtworkInfo::placeholder(id);
        ArtworkInfo {
            id: id.clone(),
            title: Self::title(card).unwrap_or(placeholder.title),
            user_name: Self::user_name(card).unwrap_or(placeholder.user_name),
            page_count: Self::page_count(card).unwrap_or(1),
        }
    }
}

/// Detail layout: the heading and the attributed user/page markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetailPageSource;

impl MetadataSource for DetailPageSource {
    fn page_context(&self) -> PageContext {
        PageContext::Detail
    }

    fn artwork_info(&self, doc: &Html, id: &ArtworkId) -> ArtworkInfo {
        static H1: OnceLock<Selector> = OnceLock::new();
        static USER: OnceLock<Selector> = OnceLock::new();
        static PAGES: OnceLock<Selector> = OnceLock::new();

        let title = doc
            .select(sel(&H1, "h1"))
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty());
        let user_name = doc
            .select(sel(&USER, "[data-user-name]"))
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty());
        let marked_pages = doc.select(sel(&PAGES, "[data-page-count]")).count() as u32;

        if title.is_none() && user_name.is_none() {
            tracing::warn!(target: "remote::scrape", %id, "detail scrape missed, using placeholder");
        }

        let placeholder = ArtworkInfo::placeholder(id);
        ArtworkInfo {
            id: id.clone(),
            title: title.unwrap_or(placeholder.title),
            user_name: user_name.unwrap_or(placeholder.user_name),
            page_count: marked_pages.max(1),
        }
    }
}
