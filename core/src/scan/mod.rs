//! Markup scanning: locating artwork cards and detail-page image containers.
//!
//! The host site's class names are generated and churn between deployments,
//! so nothing here assumes a single selector works. Each lookup is a ranked
//! list of strategies tried in order until one yields hits; all of them going
//! stale degrades to an empty scan, never an error.

mod finder;
mod strategy;
mod view;

pub use finder::DomElementFinder;
pub use strategy::{CardStrategy, ContainerStrategy, FinderStrategy};
pub use view::{ContentView, Control, InjectionPlan};

use crate::types::ArtworkId;

/// One artwork card located on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardHit {
    pub artwork_id: ArtworkId,
    pub href: String,
}

/// One original-resolution image located inside a detail-page container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailImageHit {
    pub artwork_id: ArtworkId,
    /// Zero-based page index taken from the `_p<N>.` filename component.
    pub page_index: usize,
    pub url: String,
}
