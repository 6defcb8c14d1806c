//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\media-studio\
//!   macOS:   ~/Library/Application Support/media-studio/
//!   Linux:   ~/.config/media-studio/
//!
//! Data dir (models, history, temp):
//!   Windows: %LOCALAPPDATA%\media-studio\
//!   macOS:   ~/Library/Application Support/media-studio/
//!   Linux:   ~/.local/share/media-studio/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Root of the per-feature model directories.
    pub models_dir: PathBuf,
    /// Generated artifacts and their metadata.
    pub history_dir: PathBuf,
    /// Scratch space for in-progress outputs.
    pub temp_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "media-studio";

    /// Resolves all paths using the `dirs` crate, falling back to the current
    /// directory when the platform provides none.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            models_dir: data_dir.join("Models"),
            history_dir: data_dir.join("History"),
            temp_dir: data_dir.join("Temp"),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
