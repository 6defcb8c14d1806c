//! Text-to-speech request/option types.

use std::sync::Arc;

use crate::catalog::{FeatureKind, PipelineFamily};
use crate::pipeline::PipelineError;
use crate::tensor::AudioTensor;

use super::{unsupported, Feature, NoAuxiliary};

/// A narration request.
#[derive(Debug, Clone)]
pub struct NarrateRequest {
    pub text: String,
    /// Voice preset; `None` uses the pipeline's default voice.
    pub voice: Option<String>,
    /// Denoising steps for the flow-matching decoder.
    pub steps: u32,
    /// Playback speed multiplier.
    pub speed: f32,
    /// Silence inserted between sentences, in seconds.
    pub silence_duration: f32,
    pub seed: Option<u64>,
}

impl Default for NarrateRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            voice: None,
            steps: 5,
            speed: 1.0,
            silence_duration: 0.3,
            seed: None,
        }
    }
}

impl NarrateRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NarrateOptions {
    pub text: String,
    pub voice: String,
    pub steps: u32,
    pub speed: f32,
    pub silence_duration: f32,
    pub seed: Option<u64>,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
}

#[derive(Debug)]
pub struct Narrate;

impl Feature for Narrate {
    const NAME: &'static str = "narrate";
    const KIND: FeatureKind = FeatureKind::Narrate;
    const AUXILIARY: Option<FeatureKind> = None;

    type Request = NarrateRequest;
    type Options = NarrateOptions;
    type Output = AudioTensor;
    type Auxiliary = NoAuxiliary;

    fn family_defaults(family: PipelineFamily) -> Result<NarrateOptions, PipelineError> {
        match family {
            PipelineFamily::Supertonic => Ok(NarrateOptions {
                text: String::new(),
                voice: "F1".into(),
                steps: 5,
                speed: 1.0,
                silence_duration: 0.3,
                seed: None,
                sample_rate: 44_100,
            }),
            PipelineFamily::Flux
            | PipelineFamily::LatentConsistency
            | PipelineFamily::StableCascade
            | PipelineFamily::StableDiffusion
            | PipelineFamily::StableDiffusion2
            | PipelineFamily::StableDiffusion3
            | PipelineFamily::StableDiffusionXl
            | PipelineFamily::Nitro
            | PipelineFamily::ControlNet
            | PipelineFamily::Whisper => Err(unsupported::<Self>(family)),
        }
    }

    fn prepare(
        request: NarrateRequest,
        defaults: &NarrateOptions,
        _auxiliary: Option<&Arc<NoAuxiliary>>,
    ) -> Result<NarrateOptions, PipelineError> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(PipelineError::InvalidInput("nothing to narrate".into()));
        }
        if request.steps == 0 {
            return Err(PipelineError::InvalidInput("steps must be at least 1".into()));
        }
        if !(request.speed.is_finite() && request.speed > 0.0) {
            return Err(PipelineError::InvalidInput(format!(
                "speed {} must be positive",
                request.speed
            )));
        }

        let voice = request
            .voice
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| defaults.voice.clone());

        Ok(NarrateOptions {
            text: text.to_string(),
            voice,
            steps: request.steps,
            speed: request.speed,
            silence_duration: request.silence_duration.max(0.0),
            seed: request.seed.or(defaults.seed),
            sample_rate: defaults.sample_rate,
        })
    }
}
