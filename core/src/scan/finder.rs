//! Card and container lookup over a parsed document.

use std::collections::HashSet;

use scraper::{ElementRef, Html};

use crate::page;
use crate::scan::strategy::{
    CardStrategy, ContainerStrategy, FinderStrategy, original_link_selector,
    preview_marker_selector,
};
use crate::scan::{CardHit, DetailImageHit};

/// Runs ranked finder strategies and converts raw element hits into typed
/// ones. Selector sets going stale yields empty results, never an error.
#[derive(Debug)]
pub struct DomElementFinder {
    card_strategies: Vec<CardStrategy>,
    container_strategies: Vec<ContainerStrategy>,
}

impl Default for DomElementFinder {
    fn default() -> Self {
        Self {
            card_strategies: vec![CardStrategy::ArtworkHref, CardStrategy::GtmValue],
            container_strategies: vec![
                ContainerStrategy::MasterImage,
                ContainerStrategy::OriginalLink,
            ],
        }
    }
}

impl DomElementFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the ranked card strategies (highest priority first).
    pub fn with_card_strategies(mut self, strategies: Vec<CardStrategy>) -> Self {
        self.card_strategies = strategies;
        self
    }

    /// Artwork cards on a listing page, in document order. Cards whose anchor
    /// does not yield an artwork id are skipped.
    pub fn find_artwork_cards(&self, doc: &Html) -> Vec<CardHit> {
        for strategy in &self.card_strategies {
            let hits: Vec<CardHit> = strategy
                .find(doc)
                .into_iter()
                .filter_map(card_hit)
                .collect();
            if !hits.is_empty() {
                tracing::debug!(
                    target: "scan::finder",
                    strategy = strategy.name(),
                    count = hits.len(),
                    "card scan"
                );
                return hits;
            }
        }
        tracing::debug!(target: "scan::finder", "card scan found nothing");
        Vec::new()
    }

    /// Image containers on a detail page with their original-resolution
    /// links resolved. Duplicates collapse onto one container; containers
    /// inside the preview rail are excluded.
    pub fn find_detail_image_containers(&self, doc: &Html) -> Vec<DetailImageHit> {
        for strategy in &self.container_strategies {
            let containers = strategy.find(doc);
            if containers.is_empty() {
                continue;
            }

            let mut seen = HashSet::new();
            let mut hits = Vec::new();
            for container in containers {
                if !seen.insert(container.id()) {
                    continue;
                }
                if container.select(preview_marker_selector()).next().is_some() {
                    continue;
                }
                if let Some(hit) = detail_hit(container) {
                    hits.push(hit);
                }
            }

            if !hits.is_empty() {
                tracing::debug!(
                    target: "scan::finder",
                    strategy = strategy.name(),
                    count = hits.len(),
                    "detail scan"
                );
                return hits;
            }
        }
        tracing::debug!(target: "scan::finder", "detail scan found nothing");
        Vec::new()
    }
}

fn card_hit(element: ElementRef<'_>) -> Option<CardHit> {
    let href = element.value().attr("href").unwrap_or_default().to_string();
    let artwork_id = page::artwork_id_from_href(&href).or_else(|| {
        element
            .value()
            .attr("data-gtm-value")
            .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
            .map(crate::types::ArtworkId::new)
    })?;
    Some(CardHit { artwork_id, href })
}

fn detail_hit(container: ElementRef<'_>) -> Option<DetailImageHit> {
    let link = container.select(original_link_selector()).next()?;
    let url = link.value().attr("href")?.to_string();
    let artwork_id = page::artwork_id_from_image_url(&url)?;
    let page_index = page::page_index_from_image_url(&url)?;
    Some(DetailImageHit { artwork_id, page_index, url })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArtworkId;

    fn listing_doc() -> Html {
        Html::parse_document(
            r#"<ul>
                 <li><a href="/en/artworks/111">first</a></li>
                 <li><a href="/en/artworks/222">second</a></li>
                 <li><a href="/users/9">not a card</a></li>
               </ul>"#,
        )
    }

    #[test]
    fn finds_cards_in_document_order() {
        let finder = DomElementFinder::new();
        let hits = finder.find_artwork_cards(&listing_doc());
        let ids: Vec<&str> = hits.iter().map(|h| h.artwork_id.as_str()).collect();
        assert_eq!(ids, vec!["111", "222"]);
    }

    #[test]
    fn no_matching_selector_returns_empty() {
        let finder = DomElementFinder::new();
        let doc = Html::parse_document("<main><p>nothing to see</p></main>");
        assert!(finder.find_artwork_cards(&doc).is_empty());
        assert!(finder.find_detail_image_containers(&doc).is_empty());
    }

    #[test]
    fn falls_back_to_lower_ranked_strategy() {
        let finder = DomElementFinder::new();
        let doc = Html::parse_document(
            r##"<div><a data-gtm-value="333" href="#">card</a></div>"##,
        );
        let hits = finder.find_artwork_cards(&doc);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].artwork_id, ArtworkId::new("333"));
    }

    #[test]
    fn detail_containers_resolve_original_links() {
        let doc = Html::parse_document(
            r#"<div class="sc-19z11m8-0">
                 <img src="https://i.x/img-master/777_p0_master1200.jpg" width="1" height="1">
                 <a href="https://i.x/img-original/777_p0.png" target="_blank">orig</a>
               </div>"#,
        );
        let hits = DomElementFinder::new().find_detail_image_containers(&doc);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].artwork_id, ArtworkId::new("777"));
        assert_eq!(hits[0].page_index, 0);
        assert_eq!(hits[0].url, "https://i.x/img-original/777_p0.png");
    }

    #[test]
    fn preview_rail_containers_are_excluded() {
        let doc = Html::parse_document(
            r#"<main>
                 <div class="sc-19z11m8-0">
                   <img src="https://i.x/img-master/777_p0_master1200.jpg" width="1" height="1">
                   <a href="https://i.x/img-original/777_p0.png" target="_blank">orig</a>
                 </div>
                 <div class="sc-19z11m8-0">
                   <button aria-label="プレビュー"></button>
                   <img src="https://i.x/img-master/777_p1_master1200.jpg" width="1" height="1">
                   <a href="https://i.x/img-original/777_p1.png" target="_blank">orig</a>
                 </div>
               </main>"#,
        );
        let hits = DomElementFinder::new().find_detail_image_containers(&doc);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].page_index, 0);
    }

    #[test]
    fn duplicate_containers_collapse() {
        // Two master images sharing one container produce one hit.
        let doc = Html::parse_document(
            r#"<div class="sc-19z11m8-0">
                 <img src="https://i.x/img-master/5_p0_master1200.jpg" width="1" height="1">
                 <img src="https://i.x/img-master/5_p0_square1200.jpg" width="1" height="1">
                 <a href="https://i.x/img-original/5_p0.png" target="_blank">orig</a>
               </div>"#,
        );
        let hits = DomElementFinder::new().find_detail_image_containers(&doc);
        assert_eq!(hits.len(), 1);
    }
}
