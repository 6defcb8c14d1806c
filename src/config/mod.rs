//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for directories,
//! history, devices and transcription defaults, `AppPaths` for cross-platform
//! data directories, and TOML persistence via `AppConfig::load` /
//! `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, DevicesConfig, DirectoriesConfig, GpuConfig, HistoryConfig, TranscribeConfig,
};
