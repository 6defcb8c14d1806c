//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::{default_models, ModelCatalog, ModelDescriptor};

use super::AppPaths;

// ---------------------------------------------------------------------------
// DirectoriesConfig
// ---------------------------------------------------------------------------

/// Where models, generated artifacts and scratch files live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoriesConfig {
    pub models: PathBuf,
    pub history: PathBuf,
    pub temp: PathBuf,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        let paths = AppPaths::new();
        Self {
            models: paths.models_dir,
            history: paths.history_dir,
            temp: paths.temp_dir,
        }
    }
}

// ---------------------------------------------------------------------------
// HistoryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of most-recent items loaded at startup.
    pub max_items: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_items: 500 }
    }
}

// ---------------------------------------------------------------------------
// DevicesConfig
// ---------------------------------------------------------------------------

/// A GPU adapter exposed to the device resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuConfig {
    /// Adapter index.
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicesConfig {
    /// Default to the first GPU instead of the CPU.
    pub prefer_gpu: bool,
    /// Inference threads; `None` picks from the CPU count.
    pub threads: Option<i32>,
    pub gpus: Vec<GpuConfig>,
}

// ---------------------------------------------------------------------------
// TranscribeConfig
// ---------------------------------------------------------------------------

/// Defaults applied to transcription requests built by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeConfig {
    /// ISO-639-1 language code, or `"auto"`.
    pub language: String,
    pub beams: u32,
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            language: "en".into(),
            beams: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use media_studio::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// config.initialize().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub directories: DirectoriesConfig,
    pub history: HistoryConfig,
    pub devices: DevicesConfig,
    pub transcribe: TranscribeConfig,
    /// Model catalog.  Unknown `family` tags fail the whole load.
    pub models: Vec<ModelDescriptor>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            directories: DirectoriesConfig::default(),
            history: HistoryConfig::default(),
            devices: DevicesConfig::default(),
            transcribe: TranscribeConfig::default(),
            models: default_models(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("invalid settings file {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create the model, history and temp directories (including one
    /// sub-directory per feature under the models directory).
    pub fn initialize(&self) -> Result<()> {
        for kind in crate::catalog::FeatureKind::ALL {
            let dir = self.directories.models.join(kind.directory_name());
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        for dir in [&self.directories.history, &self.directories.temp] {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }

    /// Build a catalog from the configured models and scan the models
    /// directory for their files.
    pub fn catalog(&self) -> ModelCatalog {
        let mut catalog = ModelCatalog::new(self.models.clone());
        catalog.scan(&self.directories.models);
        catalog
    }

    /// Write catalog changes (such as a new default) back into the config.
    pub fn update_models(&mut self, catalog: &ModelCatalog) {
        self.models = catalog.models().to_vec();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
