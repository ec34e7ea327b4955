//! Ranked finder strategies.
//!
//! Each strategy is a pure lookup over a parsed document. Strategies carry a
//! name so a scan can log which one produced hits; when the site's markup
//! shifts, a replacement strategy slots in ahead of the stale one and the
//! stale one stays as a fallback.

use std::sync::OnceLock;

use scraper::{ElementRef, Html, Selector};

fn selector(cache: &'static OnceLock<Selector>, css: &'static str) -> &'static Selector {
    cache.get_or_init(|| Selector::parse(css).expect("static selector"))
}

/// A pure lookup `&Html -> Vec<ElementRef>`.
pub trait FinderStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn find<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>>;
}

/// Strategies for locating artwork-card anchors on listing pages.
#[derive(Debug, Clone, Copy)]
pub enum CardStrategy {
    /// Anchors whose href points at an artwork detail path.
    ArtworkHref,
    /// Anchors tagged with the site's tracking attribute; the attribute value
    /// is the artwork id.
    GtmValue,
}

impl FinderStrategy for CardStrategy {
    fn name(&self) -> &'static str {
        match self {
            CardStrategy::ArtworkHref => "card:artwork-href",
            CardStrategy::GtmValue => "card:gtm-value",
        }
    }

    fn find<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        match self {
            CardStrategy::ArtworkHref => {
                static SEL: OnceLock<Selector> = OnceLock::new();
                doc.select(selector(&SEL, r#"a[href*="/artworks/"]"#)).collect()
            }
            CardStrategy::GtmValue => {
                static SEL: OnceLock<Selector> = OnceLock::new();
                doc.select(selector(&SEL, r#"a[data-gtm-value]"#))
                    .filter(|el| {
                        el.value()
                            .attr("data-gtm-value")
                            .is_some_and(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
                    })
                    .collect()
            }
        }
    }
}

/// Strategies for locating detail-page image containers.
#[derive(Debug, Clone, Copy)]
pub enum ContainerStrategy {
    /// Parents of sized master-resolution `img` elements, walked up to the
    /// nearest known container class when present.
    MasterImage,
    /// Parents of anchors that already link to the original image. Works
    /// after the expand control has revealed all pages.
    OriginalLink,
}

impl ContainerStrategy {
    fn container_for<'a>(start: ElementRef<'a>) -> ElementRef<'a> {
        for ancestor in start.ancestors() {
            let Some(el) = ElementRef::wrap(ancestor) else { continue };
            if el.value().classes().any(|c| c == "sc-19z11m8-0") {
                return el;
            }
        }
        // No recognisable container class: use the direct parent.
        start
            .parent()
            .and_then(ElementRef::wrap)
            .unwrap_or(start)
    }
}

impl FinderStrategy for ContainerStrategy {
    fn name(&self) -> &'static str {
        match self {
            ContainerStrategy::MasterImage => "container:master-image",
            ContainerStrategy::OriginalLink => "container:original-link",
        }
    }

    fn find<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        match self {
            ContainerStrategy::MasterImage => {
                static SEL: OnceLock<Selector> = OnceLock::new();
                doc.select(selector(&SEL, r#"img[src*="img-master"][width][height]"#))
                    .map(Self::container_for)
                    .collect()
            }
            ContainerStrategy::OriginalLink => {
                static SEL: OnceLock<Selector> = OnceLock::new();
                doc.select(selector(&SEL, r#"a[href*="img-original"][target="_blank"]"#))
                    .map(Self::container_for)
                    .collect()
            }
        }
    }
}

/// Anchor to the original-resolution image inside one container.
pub(crate) fn original_link_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector(&SEL, r#"a[href*="img-original"][target="_blank"]"#)
}

/// Marker the site puts on its preview rail; containers holding it are
/// thumbnails of the page itself and must not be counted.
pub(crate) fn preview_marker_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector(&SEL, r#"[aria-label="プレビュー"]"#)
}
