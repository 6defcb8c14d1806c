//! Speech transcription: request, Whisper option set and result types.
//!
//! [`TranscribeRequest`] carries audio at any rate and channel count;
//! [`Transcribe::prepare`] converts it to the 16 kHz mono buffer Whisper
//! consumes and folds the request's decoding settings into
//! [`TranscribeOptions`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio::to_mono_16k;
use crate::catalog::{FeatureKind, PipelineFamily};
use crate::device::optimal_threads;
use crate::pipeline::{FamilyFactory, PipelineError, PipelineFactory, WhisperBackend};
use crate::tensor::AudioTensor;

use super::{unsupported, Feature, NoAuxiliary};

// ---------------------------------------------------------------------------
// SamplingStrategy
// ---------------------------------------------------------------------------

/// Mirrors `whisper_rs::SamplingStrategy` but is owned and `Clone`.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingStrategy {
    /// Greedy (single-pass) decoding.
    Greedy {
        /// Number of candidates evaluated per step.
        best_of: i32,
    },
    /// Beam-search decoding.
    BeamSearch {
        beam_size: i32,
        /// Beam-search patience factor (≥1.0 = standard beam search).
        patience: f32,
    },
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        Self::Greedy { best_of: 1 }
    }
}

impl SamplingStrategy {
    /// `0` or `1` beams decode greedily; more use beam search.
    pub fn from_beams(beams: u32) -> Self {
        match beams {
            0 | 1 => Self::Greedy { best_of: 1 },
            n => Self::BeamSearch {
                beam_size: n.min(i32::MAX as u32) as i32,
                patience: 1.0,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Request / options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscribeTask {
    /// Emit text in the spoken language.
    #[default]
    Transcribe,
    /// Emit English text.
    Translate,
}

#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub audio: AudioTensor,
    /// ISO-639-1 language code, or `"auto"` for detection.
    pub language: String,
    pub task: TranscribeTask,
    /// Initial prompt that biases vocabulary and style.
    pub prompt: Option<String>,
    pub beams: u32,
    pub temperature: f32,
}

impl TranscribeRequest {
    pub fn new(audio: AudioTensor) -> Self {
        Self {
            audio,
            language: "en".into(),
            task: TranscribeTask::Transcribe,
            prompt: None,
            beams: 1,
            temperature: 0.0,
        }
    }
}

/// Everything a single Whisper inference run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeOptions {
    /// 16 kHz mono PCM.
    pub audio: Vec<f32>,
    pub language: String,
    pub task: TranscribeTask,
    pub prompt: Option<String>,
    pub strategy: SamplingStrategy,
    pub temperature: f32,
    /// CPU threads handed to Whisper.
    pub n_threads: i32,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            audio: Vec::new(),
            language: "auto".into(),
            task: TranscribeTask::Transcribe,
            prompt: None,
            strategy: SamplingStrategy::default(),
            temperature: 0.0,
            n_threads: optimal_threads(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// The output of a successful transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Full transcript, trimmed.
    pub text: String,
    /// Individual time-aligned segments produced by Whisper.
    pub segments: Vec<Segment>,
    /// Wall-clock inference time in milliseconds.
    pub duration_ms: u128,
}

/// A single time-aligned text chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    /// Milliseconds from the start of the audio.
    pub start_ms: u64,
    pub end_ms: u64,
}

// ---------------------------------------------------------------------------
// Feature impl
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Transcribe;

impl Transcribe {
    /// Factory backed by the built-in whisper.cpp pipeline.
    pub fn factory() -> Arc<dyn PipelineFactory<Transcribe>> {
        Arc::new(FamilyFactory::new(Arc::new(WhisperBackend)))
    }
}

impl Feature for Transcribe {
    const NAME: &'static str = "transcribe";
    const KIND: FeatureKind = FeatureKind::Transcribe;
    const AUXILIARY: Option<FeatureKind> = None;

    type Request = TranscribeRequest;
    type Options = TranscribeOptions;
    type Output = TranscriptionResult;
    type Auxiliary = NoAuxiliary;

    fn family_defaults(family: PipelineFamily) -> Result<TranscribeOptions, PipelineError> {
        match family {
            PipelineFamily::Whisper => Ok(TranscribeOptions::default()),
            PipelineFamily::Flux
            | PipelineFamily::LatentConsistency
            | PipelineFamily::StableCascade
            | PipelineFamily::StableDiffusion
            | PipelineFamily::StableDiffusion2
            | PipelineFamily::StableDiffusion3
            | PipelineFamily::StableDiffusionXl
            | PipelineFamily::Nitro
            | PipelineFamily::ControlNet
            | PipelineFamily::Supertonic => Err(unsupported::<Self>(family)),
        }
    }

    fn prepare(
        request: TranscribeRequest,
        defaults: &TranscribeOptions,
        _auxiliary: Option<&Arc<NoAuxiliary>>,
    ) -> Result<TranscribeOptions, PipelineError> {
        if request.audio.samples.is_empty() || request.audio.channels == 0 {
            return Err(PipelineError::InvalidInput("no audio samples".into()));
        }
        if request.audio.sample_rate == 0 {
            return Err(PipelineError::InvalidInput("sample rate is zero".into()));
        }

        let language = match request.language.trim() {
            "" => defaults.language.clone(),
            lang => lang.to_ascii_lowercase(),
        };

        Ok(TranscribeOptions {
            audio: to_mono_16k(&request.audio),
            language,
            task: request.task,
            prompt: request.prompt.filter(|p| !p.trim().is_empty()),
            strategy: SamplingStrategy::from_beams(request.beams),
            temperature: request.temperature.max(0.0),
            n_threads: defaults.n_threads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(rate: u32, channels: u16, frames: usize) -> TranscribeRequest {
        TranscribeRequest::new(AudioTensor::new(
            rate,
            channels,
            vec![0.1; frames * channels as usize],
        ))
    }

    #[test]
    fn beams_map_to_strategy() {
        assert_eq!(SamplingStrategy::from_beams(0), SamplingStrategy::Greedy { best_of: 1 });
        assert_eq!(SamplingStrategy::from_beams(1), SamplingStrategy::Greedy { best_of: 1 });
        assert_eq!(
            SamplingStrategy::from_beams(5),
            SamplingStrategy::BeamSearch {
                beam_size: 5,
                patience: 1.0
            }
        );
    }

    #[test]
    fn request_defaults() {
        let r = request(16_000, 1, 10);
        assert_eq!(r.language, "en");
        assert_eq!(r.task, TranscribeTask::Transcribe);
        assert_eq!(r.beams, 1);
    }

    #[test]
    fn only_whisper_is_supported() {
        for family in PipelineFamily::ALL {
            assert_eq!(
                Transcribe::family_defaults(family).is_ok(),
                family == PipelineFamily::Whisper
            );
        }
    }

    #[test]
    fn prepare_converts_audio_to_16k_mono() {
        let defaults = TranscribeOptions {
            n_threads: 3,
            ..TranscribeOptions::default()
        };
        let mut r = request(48_000, 2, 48_000);
        r.language = "TH".into();
        r.task = TranscribeTask::Translate;
        r.beams = 4;

        let options = Transcribe::prepare(r, &defaults, None).unwrap();
        assert_eq!(options.audio.len(), 16_000);
        assert_eq!(options.language, "th");
        assert_eq!(options.task, TranscribeTask::Translate);
        assert_eq!(options.n_threads, 3);
        assert!(matches!(options.strategy, SamplingStrategy::BeamSearch { beam_size: 4, .. }));
    }

    #[test]
    fn prepare_empty_language_uses_default() {
        let mut r = request(16_000, 1, 100);
        r.language = " ".into();
        r.prompt = Some("".into());
        let options = Transcribe::prepare(r, &TranscribeOptions::default(), None).unwrap();
        assert_eq!(options.language, "auto");
        assert!(options.prompt.is_none());
    }

    #[test]
    fn prepare_rejects_empty_audio() {
        let err = Transcribe::prepare(request(16_000, 1, 0), &TranscribeOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }
}
