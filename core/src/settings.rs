//! Persistent storage for the user-preferences blob.
//!
//! One JSON object under a single file in the platform data directory,
//! written atomically. Load failures of any kind keep the defaults; the user
//! never sees a settings error.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::anyhow;
use directories::ProjectDirs;
use tempfile::NamedTempFile;

use crate::Result;
use crate::types::Settings;

const APP_QUALIFIER: &str = "net";
const APP_ORGANISATION: &str = "Pixgrab";
const APP_NAME: &str = "pixgrab";

/// File-backed settings store. Instance-based so tests can point it at a
/// temporary path.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under the platform data directory.
    pub fn open_default() -> Result<Self> {
        let dir = ProjectDirs::from(APP_QUALIFIER, APP_ORGANISATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("state"))
            .ok_or_else(|| anyhow!("unable to resolve application data directory"))?;
        Ok(Self::new(dir.join("settings.json")))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Loads the persisted settings. A missing file, unreadable file, or
    /// unparsable blob all degrade to defaults with a warning.
    pub fn load(&self) -> Settings {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<Settings>(&bytes) {
                Ok(mut settings) => {
                    settings.filename_format = settings.filename_format.effective();
                    settings
                }
                Err(error) => {
                    tracing::warn!(
                        target: "settings",
                        %error,
                        path = %self.path.display(),
                        "settings blob unparsable, using defaults"
                    );
                    Settings::default()
                }
            },
            Err(error) if error.kind() == io::ErrorKind::NotFound => Settings::default(),
            Err(error) => {
                tracing::warn!(
                    target: "settings",
                    %error,
                    path = %self.path.display(),
                    "settings unreadable, using defaults"
                );
                Settings::default()
            }
        }
    }

    /// Persists atomically: write to a sibling temp file, then rename over
    /// the target.
    pub fn save(&self, settings: &Settings) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| anyhow!("settings path {} has no parent", self.path.display()))?;
        fs::create_dir_all(parent)?;

        let data = serde_json::to_vec_pretty(settings)?;
        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(&data)?;
        temp.flush()?;

        match temp.persist(&self.path) {
            Ok(_) => Ok(()),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                // Windows rename-over semantics: clear the target first.
                if let Err(remove_err) = fs::remove_file(&self.path) {
                    if remove_err.kind() != io::ErrorKind::NotFound {
                        return Err(remove_err.into());
                    }
                }
                err.file.persist(&self.path).map(|_| ()).map_err(|e| e.error.into())
            }
            Err(err) => Err(err.error.into()),
        }
    }
}
