//! Core library for the pixgrab artwork downloader.
//!
//! Holds the whole page-adaptation pipeline: page classification, markup
//! scanning, observation, metadata resolution, naming, and panel
//! orchestration. Privileged operations (referer-spoofed fetches, file
//! saving) live behind the [`bus::Dispatch`] seam and are implemented by the
//! shell.

#![deny(missing_debug_implementations)]

pub mod bus;
pub mod log;
pub mod naming;
pub mod observe;
pub mod page;
pub mod panel;
pub mod remote;
pub mod scan;
pub mod settings;
pub mod types;

pub type Result<T> = std::result::Result<T, anyhow::Error>;

pub use types::{
    ArtworkId, ArtworkInfo, FilenameFormat, ImagePage, PageContext, Settings,
};

/// Returns the version of the core crate for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
