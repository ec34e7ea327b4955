//! Page classification and identifier extraction.
//!
//! Everything here is a pure function over strings. Extraction failures are
//! reported as `None` (with a warning) and short-circuit the caller; nothing
//! in this module panics on hostile input.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::{ArtworkId, PageContext};

fn detail_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/artworks/\d+$").expect("detail path pattern"))
}

fn tag_listing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/tags/.*/artworks").expect("tag listing pattern"))
}

fn tag_root_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/tags/[^/]+$").expect("tag root pattern"))
}

fn image_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(\d+)_p\d+\.").expect("image url pattern"))
}

fn page_index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_p(\d+)\.").expect("page index pattern"))
}

fn artwork_href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/artworks/(\d+)").expect("artwork href pattern"))
}

/// Classifies a path into search / detail / unknown.
///
/// The detail pattern is checked before the tag-listing patterns; ties break
/// in favour of `Detail`.
pub fn detect(pathname: &str) -> PageContext {
    if detail_path_re().is_match(pathname) {
        PageContext::Detail
    } else if tag_listing_re().is_match(pathname) || tag_root_re().is_match(pathname) {
        PageContext::Search
    } else {
        PageContext::Unknown
    }
}

/// Extracts the artwork id from an original/master image URL
/// (`.../<id>_p<n>.<ext>`).
pub fn artwork_id_from_image_url(url: &str) -> Option<ArtworkId> {
    match image_url_re().captures(url) {
        Some(caps) => Some(ArtworkId::new(&caps[1])),
        None => {
            tracing::warn!(target: "page::parse", url, "no artwork id in image url");
            None
        }
    }
}

/// Extracts the zero-based page index from an image URL (`_p<n>.`).
pub fn page_index_from_image_url(url: &str) -> Option<usize> {
    match page_index_re().captures(url) {
        Some(caps) => caps[1].parse().ok(),
        None => {
            tracing::warn!(target: "page::parse", url, "no page index in image url");
            None
        }
    }
}

/// Extracts the artwork id from an `/artworks/<id>` href.
pub fn artwork_id_from_href(href: &str) -> Option<ArtworkId> {
    artwork_href_re().captures(href).map(|caps| ArtworkId::new(&caps[1]))
}
