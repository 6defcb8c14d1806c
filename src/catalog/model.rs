//! Model descriptors and the in-memory model catalog.
//!
//! Descriptors come from the `[[models]]` tables in `settings.toml` (or the
//! built-in [`default_models`] list on first run).  [`ModelCatalog::scan`]
//! resolves each descriptor's directory as
//! `<models dir>/<feature dir>/<model id>` and marks it valid once every
//! declared file is present.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::DeviceKind;

use super::family::{FeatureKind, PipelineFamily};

// ---------------------------------------------------------------------------
// ModelDescriptor
// ---------------------------------------------------------------------------

/// Metadata for one loadable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique identifier, also the folder name under the feature directory.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Which pipeline implementation loads this model.
    pub family: PipelineFamily,
    /// Family-specific variant string (e.g. a Whisper size such as `"base"`).
    #[serde(default)]
    pub variant: Option<String>,
    /// Device kinds the model can run on.
    #[serde(default = "default_supported_devices")]
    pub supported_devices: Vec<DeviceKind>,
    /// Files, relative to the model directory, that must exist for the model
    /// to be usable.
    #[serde(default)]
    pub files: Vec<String>,
    /// Speaker presets (speech synthesis models only).
    #[serde(default)]
    pub voices: Vec<String>,
    /// Marked as the preferred model for its feature.
    #[serde(default)]
    pub is_default: bool,

    /// Resolved model directory. Set by [`ModelDescriptor::initialize`].
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(skip)]
    valid: bool,
}

fn default_supported_devices() -> Vec<DeviceKind> {
    vec![DeviceKind::Cpu, DeviceKind::Gpu]
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, family: PipelineFamily) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            family,
            variant: None,
            supported_devices: default_supported_devices(),
            files: Vec::new(),
            voices: Vec::new(),
            is_default: false,
            path: PathBuf::new(),
            valid: false,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_voices<I, S>(mut self, voices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.voices = voices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_devices(mut self, devices: Vec<DeviceKind>) -> Self {
        self.supported_devices = devices;
        self
    }

    /// Set the model path directly and flag the model valid, bypassing the
    /// on-disk check.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self.valid = true;
        self
    }

    pub fn feature(&self) -> FeatureKind {
        self.family.feature()
    }

    /// Resolve the model directory under `models_dir` and re-check its files.
    ///
    /// Returns the new validity.
    pub fn initialize(&mut self, models_dir: &Path) -> bool {
        self.path = models_dir
            .join(self.feature().directory_name())
            .join(&self.id);
        self.valid = self.path.is_dir() && self.files.iter().all(|f| self.path.join(f).is_file());
        self.valid
    }

    /// `true` once every required file has been found on disk.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn supports(&self, kind: DeviceKind) -> bool {
        self.supported_devices.contains(&kind)
    }
}

// ---------------------------------------------------------------------------
// ModelCatalog
// ---------------------------------------------------------------------------

/// All known models across every feature.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    /// Re-initialize every descriptor against `models_dir`.
    ///
    /// Returns the number of valid models.
    pub fn scan(&mut self, models_dir: &Path) -> usize {
        let mut valid = 0;
        for model in &mut self.models {
            if model.initialize(models_dir) {
                valid += 1;
            } else {
                log::debug!(
                    "catalog: {} not available at {}",
                    model.id,
                    model.path.display()
                );
            }
        }
        log::info!(
            "catalog: {valid}/{} models available in {}",
            self.models.len(),
            models_dir.display()
        );
        valid
    }

    /// Re-check a single model, e.g. after its download completed.
    ///
    /// Returns `None` when `id` is unknown.
    pub fn refresh(&mut self, id: &str, models_dir: &Path) -> Option<bool> {
        let model = self.models.iter_mut().find(|m| m.id == id)?;
        let valid = model.initialize(models_dir);
        log::info!("catalog: refreshed {id} (valid = {valid})");
        Some(valid)
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn into_models(self) -> Vec<ModelDescriptor> {
        self.models
    }

    pub fn for_feature(&self, feature: FeatureKind) -> Vec<&ModelDescriptor> {
        self.models
            .iter()
            .filter(|m| m.feature() == feature)
            .collect()
    }

    /// Models of `feature` that can run on `device`.
    pub fn for_device(&self, feature: FeatureKind, device: DeviceKind) -> Vec<&ModelDescriptor> {
        self.models
            .iter()
            .filter(|m| m.feature() == feature && m.supports(device))
            .collect()
    }

    pub fn find(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// The preferred valid model for `feature`: the one marked default if it is
    /// valid, otherwise the first valid one.
    pub fn default_for(&self, feature: FeatureKind) -> Option<&ModelDescriptor> {
        let mut valid = self
            .models
            .iter()
            .filter(|m| m.feature() == feature && m.is_valid());
        let first = valid.clone().next();
        valid.find(|m| m.is_default).or(first)
    }

    /// Mark `id` as the default of its feature, clearing the flag on the
    /// other models of that feature only.
    pub fn set_default(&mut self, id: &str) -> bool {
        let Some(feature) = self.find(id).map(ModelDescriptor::feature) else {
            return false;
        };
        for model in self.models.iter_mut().filter(|m| m.feature() == feature) {
            model.is_default = model.id == id;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Built-in catalog
// ---------------------------------------------------------------------------

fn whisper(variant: &str, name: &str) -> ModelDescriptor {
    ModelDescriptor::new(format!("whisper-{variant}"), name, PipelineFamily::Whisper)
        .with_variant(variant)
        .with_files([format!("ggml-{variant}.bin")])
}

/// Catalog written to `settings.toml` on first run.
pub fn default_models() -> Vec<ModelDescriptor> {
    let mut models = vec![
        ModelDescriptor::new("sd15", "Stable Diffusion 1.5", PipelineFamily::StableDiffusion)
            .with_files([
                "text_encoder/model.onnx",
                "unet/model.onnx",
                "vae_decoder/model.onnx",
            ]),
        ModelDescriptor::new("sdxl", "Stable Diffusion XL", PipelineFamily::StableDiffusionXl)
            .with_devices(vec![DeviceKind::Gpu])
            .with_files([
                "text_encoder/model.onnx",
                "text_encoder_2/model.onnx",
                "unet/model.onnx",
                "vae_decoder/model.onnx",
            ]),
        ModelDescriptor::new("lcm-dreamshaper", "LCM Dreamshaper", PipelineFamily::LatentConsistency)
            .with_files(["unet/model.onnx", "vae_decoder/model.onnx"]),
        ModelDescriptor::new("nitro-e", "Nitro-E", PipelineFamily::Nitro)
            .with_files(["transformer/model.onnx", "vae_decoder/model.onnx"]),
        ModelDescriptor::new("controlnet-canny", "Canny", PipelineFamily::ControlNet)
            .with_files(["model.onnx"]),
        ModelDescriptor::new("supertonic", "Supertonic", PipelineFamily::Supertonic)
            .with_files(["duration_predictor.onnx", "text_encoder.onnx", "vocoder.onnx"])
            .with_voices(["F1", "F2", "M1", "M2"]),
        whisper("tiny", "Whisper Tiny"),
        whisper("base", "Whisper Base"),
        whisper("small", "Whisper Small"),
        whisper("medium", "Whisper Medium"),
        whisper("large-v3", "Whisper Large v3"),
    ];
    for model in &mut models {
        model.is_default = matches!(model.id.as_str(), "sd15" | "supertonic" | "whisper-base");
    }
    models
}
