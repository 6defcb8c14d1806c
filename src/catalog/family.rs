//! Pipeline families and the feature each one belongs to.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// FeatureKind
// ---------------------------------------------------------------------------

/// Application feature a model is loaded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Text/image → image generation.
    Diffusion,
    /// Conditioning adapters attached to a diffusion pipeline.
    Control,
    /// Text → speech.
    Narrate,
    /// Speech → text.
    Transcribe,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 4] = [
        FeatureKind::Diffusion,
        FeatureKind::Control,
        FeatureKind::Narrate,
        FeatureKind::Transcribe,
    ];

    /// Sub-directory of the models directory holding this feature's models.
    pub fn directory_name(&self) -> &'static str {
        match self {
            FeatureKind::Diffusion => "Diffusion",
            FeatureKind::Control => "Control",
            FeatureKind::Narrate => "Narrate",
            FeatureKind::Transcribe => "Transcribe",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directory_name())
    }
}

// ---------------------------------------------------------------------------
// PipelineFamily
// ---------------------------------------------------------------------------

/// Closed set of pipeline implementations the factories know how to build.
///
/// Deserialising an unknown tag fails, so a catalog entry naming a family that
/// does not exist is rejected when the settings file is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineFamily {
    Flux,
    LatentConsistency,
    StableCascade,
    StableDiffusion,
    StableDiffusion2,
    StableDiffusion3,
    StableDiffusionXl,
    Nitro,
    ControlNet,
    Supertonic,
    Whisper,
}

impl PipelineFamily {
    pub const ALL: [PipelineFamily; 11] = [
        PipelineFamily::Flux,
        PipelineFamily::LatentConsistency,
        PipelineFamily::StableCascade,
        PipelineFamily::StableDiffusion,
        PipelineFamily::StableDiffusion2,
        PipelineFamily::StableDiffusion3,
        PipelineFamily::StableDiffusionXl,
        PipelineFamily::Nitro,
        PipelineFamily::ControlNet,
        PipelineFamily::Supertonic,
        PipelineFamily::Whisper,
    ];

    /// The feature whose coordinator can load this family.
    pub fn feature(&self) -> FeatureKind {
        match self {
            PipelineFamily::Flux
            | PipelineFamily::LatentConsistency
            | PipelineFamily::StableCascade
            | PipelineFamily::StableDiffusion
            | PipelineFamily::StableDiffusion2
            | PipelineFamily::StableDiffusion3
            | PipelineFamily::StableDiffusionXl
            | PipelineFamily::Nitro => FeatureKind::Diffusion,
            PipelineFamily::ControlNet => FeatureKind::Control,
            PipelineFamily::Supertonic => FeatureKind::Narrate,
            PipelineFamily::Whisper => FeatureKind::Transcribe,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PipelineFamily::Flux => "Flux",
            PipelineFamily::LatentConsistency => "Latent Consistency",
            PipelineFamily::StableCascade => "Stable Cascade",
            PipelineFamily::StableDiffusion => "Stable Diffusion",
            PipelineFamily::StableDiffusion2 => "Stable Diffusion 2",
            PipelineFamily::StableDiffusion3 => "Stable Diffusion 3",
            PipelineFamily::StableDiffusionXl => "Stable Diffusion XL",
            PipelineFamily::Nitro => "Nitro",
            PipelineFamily::ControlNet => "ControlNet",
            PipelineFamily::Supertonic => "Supertonic",
            PipelineFamily::Whisper => "Whisper",
        }
    }
}

impl fmt::Display for PipelineFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
