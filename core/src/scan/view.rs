//! Injection planning: which download controls a scan should add.
//!
//! The browser original appended button elements and tagged processed cards
//! with a marker class. Here the parsed document is immutable, so the view
//! produces typed control descriptors instead and keeps its own processed
//! set; re-scanning the same document is a no-op for anything already
//! planned.

use std::collections::HashSet;

use scraper::Html;

use crate::scan::DomElementFinder;
use crate::types::ArtworkId;

/// One interactive control to place on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Listing-page card button: opens the panel for the artwork.
    CardDownload { artwork_id: ArtworkId },
    /// Detail-page per-image button: downloads one resolved original.
    DetailDownload { artwork_id: ArtworkId, page_index: usize, url: String },
}

/// Result of one scan pass. Controls appear in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionPlan {
    pub controls: Vec<Control>,
}

impl InjectionPlan {
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

/// Stateful scanning view. Owns the processed set that makes re-scans
/// idempotent.
#[derive(Debug, Default)]
pub struct ContentView {
    finder: DomElementFinder,
    processed_cards: HashSet<ArtworkId>,
    processed_pages: HashSet<(ArtworkId, usize)>,
}

impl ContentView {
    pub fn new(finder: DomElementFinder) -> Self {
        Self { finder, processed_cards: HashSet::new(), processed_pages: HashSet::new() }
    }

    /// Plans card download buttons for a listing page. Cards already planned
    /// in an earlier pass are skipped.
    pub fn plan_card_buttons(&mut self, doc: &Html) -> InjectionPlan {
        let mut plan = InjectionPlan::default();
        for hit in self.finder.find_artwork_cards(doc) {
            if !self.processed_cards.insert(hit.artwork_id.clone()) {
                continue;
            }
            plan.controls.push(Control::CardDownload { artwork_id: hit.artwork_id });
        }
        plan
    }

    /// Plans per-image download buttons for a detail page.
    pub fn plan_detail_buttons(&mut self, doc: &Html) -> InjectionPlan {
        let mut plan = InjectionPlan::default();
        for hit in self.finder.find_detail_image_containers(doc) {
            let key = (hit.artwork_id.clone(), hit.page_index);
            if !self.processed_pages.insert(key) {
                continue;
            }
            plan.controls.push(Control::DetailDownload {
                artwork_id: hit.artwork_id,
                page_index: hit.page_index,
                url: hit.url,
            });
        }
        plan
    }

    /// Forgets everything planned so far (navigation reset / removeAll).
    pub fn clear(&mut self) {
        self.processed_cards.clear();
        self.processed_pages.clear();
    }
}
