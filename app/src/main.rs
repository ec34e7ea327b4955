mod dispatcher;
mod session;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use pixgrab_core::bus::{BusRequest, BusResponse, Dispatch, SettingsPatch};
use pixgrab_core::settings::SettingsStore;
use pixgrab_core::types::FilenameFormat;

use crate::dispatcher::Dispatcher;
use crate::session::{Selection, Session};

#[derive(Debug, Parser)]
#[command(name = "pixgrab", version, about = "Download original-resolution pixiv artwork")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download images from an artwork page
    Download {
        /// Artwork page URL
        url: String,
        /// Download every image of the artwork
        #[arg(long)]
        all: bool,
        /// Image to download, one-based
        #[arg(long, default_value_t = 1, conflicts_with = "all")]
        page: usize,
        /// Filename override (extension comes from the source URL)
        #[arg(long, conflicts_with = "all")]
        name: Option<String>,
        /// Download directory (defaults to the platform downloads folder)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Fetch a page and list the download controls it would get
    Scan {
        /// Search listing or artwork page URL
        url: String,
    },
    /// Inspect or change the persisted preferences
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsAction {
    /// Print the current settings as JSON
    Show,
    /// Change the filename scheme (title_page, id_page, author_title_page,
    /// author_id_page)
    SetFormat { format: String },
}

#[tokio::main]
async fn main() -> pixgrab_core::Result<()> {
    let cli = Cli::parse();

    let mut log_config = pixgrab_core::log::LogConfig::default();
    if cfg!(debug_assertions) {
        log_config.console_level = pixgrab_core::log::LogLevel::DEBUG;
    }
    if let Err(err) = pixgrab_core::log::init(log_config) {
        eprintln!("failed to initialise logging: {err:#}");
    }

    let download_dir = match &cli.command {
        Command::Download { out: Some(dir), .. } => dir.clone(),
        _ => default_download_dir()?,
    };

    let store = SettingsStore::open_default()?;
    let handle = Dispatcher::spawn(store, download_dir)?;

    match cli.command {
        Command::Download { url, all, page, name, .. } => {
            let selection = if all {
                Selection::All
            } else {
                if page == 0 {
                    bail!("--page is one-based");
                }
                Selection::Page(page - 1)
            };
            let session = Session::new(Arc::new(handle))?;
            session.download(&url, selection, name.as_deref()).await
        }
        Command::Scan { url } => {
            let session = Session::new(Arc::new(handle))?;
            session.scan(&url).await
        }
        Command::Settings { action } => match action {
            SettingsAction::Show => {
                let response = handle
                    .send(BusRequest::GetSettings)
                    .await
                    .map_err(|message| anyhow::anyhow!(message))?;
                let BusResponse::Settings(settings) = response else {
                    bail!("unexpected settings response");
                };
                println!("{}", serde_json::to_string_pretty(&settings)?);
                Ok(())
            }
            SettingsAction::SetFormat { format } => {
                let Some(parsed) = FilenameFormat::parse(&format) else {
                    bail!(
                        "unknown format {format:?}; expected title_page, id_page, \
                         author_title_page or author_id_page"
                    );
                };
                let patch = SettingsPatch { filename_format: Some(parsed) };
                handle
                    .send(BusRequest::UpdateSettings(patch))
                    .await
                    .map_err(|message| anyhow::anyhow!(message))?;
                println!("filename format set to {format}");
                Ok(())
            }
        },
    }
}

fn default_download_dir() -> pixgrab_core::Result<PathBuf> {
    if let Some(dirs) = directories::UserDirs::new() {
        if let Some(downloads) = dirs.download_dir() {
            return Ok(downloads.to_path_buf());
        }
    }
    std::env::current_dir().context("resolving the current directory")
}
