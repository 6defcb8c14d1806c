//! Whisper transcription pipeline backed by `whisper-rs`.
//!
//! [`WhisperBackend`] builds a [`WhisperPipeline`] from a blueprint;
//! [`WhisperPipeline::load`] creates the `WhisperContext` from
//! `<model dir>/ggml-<variant>.bin`.  A fresh `WhisperState` is created for
//! every run so the loaded context is only ever read.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use whisper_rs::{FullParams, WhisperContext, WhisperContextParameters};

use crate::device::ExecutionProvider;
use crate::features::{
    SamplingStrategy, Segment, Transcribe, TranscribeOptions, TranscribeTask, TranscriptionResult,
};

use super::{check_cancelled, Blueprint, DynPipeline, InferenceBackend, Pipeline, PipelineError, Progress, Resource};

/// Minimum audio length: 0.5 s × 16 000 Hz.
const MIN_AUDIO_SAMPLES: usize = 8_000;

// ---------------------------------------------------------------------------
// WhisperType
// ---------------------------------------------------------------------------

/// Whisper model size, parsed from a descriptor's variant string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WhisperType {
    Tiny,
    Base,
    Small,
    Medium,
    LargeV3,
}

impl WhisperType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhisperType::Tiny => "tiny",
            WhisperType::Base => "base",
            WhisperType::Small => "small",
            WhisperType::Medium => "medium",
            WhisperType::LargeV3 => "large-v3",
        }
    }

    /// GGML weight file name inside the model directory.
    pub fn file_name(&self) -> String {
        format!("ggml-{}.bin", self.as_str())
    }
}

impl FromStr for WhisperType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tiny" => Ok(WhisperType::Tiny),
            "base" => Ok(WhisperType::Base),
            "small" => Ok(WhisperType::Small),
            "medium" => Ok(WhisperType::Medium),
            "large-v3" | "largev3" | "large" => Ok(WhisperType::LargeV3),
            other => Err(PipelineError::InvalidVariant(format!("whisper '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// WhisperPipeline
// ---------------------------------------------------------------------------

pub struct WhisperPipeline {
    model_file: PathBuf,
    variant: WhisperType,
    provider: ExecutionProvider,
    defaults: TranscribeOptions,
    ctx: Option<WhisperContext>,
}

impl std::fmt::Debug for WhisperPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperPipeline")
            .field("model_file", &self.model_file)
            .field("variant", &self.variant)
            .field("loaded", &self.ctx.is_some())
            .finish_non_exhaustive()
    }
}

// SAFETY: WhisperContext is Send+Sync as declared by whisper-rs; the model
// weights are read-only after loading.
unsafe impl Send for WhisperPipeline {}
unsafe impl Sync for WhisperPipeline {}

impl WhisperPipeline {
    /// Build an unloaded pipeline for `variant` inside `model_dir`.
    pub fn new(
        model_dir: &Path,
        variant: WhisperType,
        provider: ExecutionProvider,
        defaults: TranscribeOptions,
    ) -> Self {
        Self {
            model_file: model_dir.join(variant.file_name()),
            variant,
            provider,
            defaults: TranscribeOptions {
                n_threads: provider.threads,
                ..defaults
            },
            ctx: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.ctx.is_some()
    }

    fn build_params<'a>(options: &'a TranscribeOptions, cancel: &CancellationToken) -> FullParams<'a, 'a> {
        use whisper_rs::SamplingStrategy as WS;
        let ws = match options.strategy {
            SamplingStrategy::Greedy { best_of } => WS::Greedy { best_of },
            SamplingStrategy::BeamSearch { beam_size, patience } => {
                WS::BeamSearch { beam_size, patience }
            }
        };

        let mut fp = FullParams::new(ws);
        let lang = match options.language.as_str() {
            "auto" => None,
            lang => Some(lang),
        };
        fp.set_language(lang);
        fp.set_translate(options.task == TranscribeTask::Translate);
        if let Some(prompt) = options.prompt.as_deref() {
            fp.set_initial_prompt(prompt);
        }
        fp.set_temperature(options.temperature);
        fp.set_n_threads(options.n_threads);
        fp.set_print_progress(false);
        fp.set_print_realtime(false);

        fp.set_abort_callback_safe::<_, Box<dyn FnMut() -> bool>>(Some(abort_callback(cancel)));
        fp
    }
}

/// Abort hook polled by whisper.cpp between compute graphs.
///
/// The whisper-rs trampoline reads its user data as `F`, so `F` must be the
/// boxed trait object itself rather than the bare closure.
fn abort_callback(cancel: &CancellationToken) -> Box<dyn FnMut() -> bool> {
    let token = cancel.clone();
    Box::new(move || token.is_cancelled())
}

impl Resource for WhisperPipeline {
    fn unload(&mut self) -> Result<(), PipelineError> {
        if self.ctx.take().is_some() {
            log::info!("whisper: released {}", self.model_file.display());
        }
        Ok(())
    }
}

impl Pipeline for WhisperPipeline {
    type Options = TranscribeOptions;
    type Output = TranscriptionResult;

    fn load(&mut self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        check_cancelled(cancel)?;

        let path = self.model_file.as_path();
        if !path.exists() {
            return Err(PipelineError::ModelNotFound(path.display().to_string()));
        }
        let path_str = path.to_str().ok_or_else(|| {
            PipelineError::ModelNotFound(format!(
                "model path contains non-UTF-8 characters: {}",
                path.display()
            ))
        })?;

        let mut ctx_params = WhisperContextParameters::default();
        ctx_params.use_gpu(self.provider.use_gpu());

        let started = Instant::now();
        let ctx = WhisperContext::new_with_params(path_str, ctx_params)
            .map_err(|e| PipelineError::ContextInit(e.to_string()))?;

        // Dropping `ctx` here frees the weights if we were cancelled mid-load.
        check_cancelled(cancel)?;

        log::info!(
            "whisper: loaded {} ({}) in {} ms",
            path.display(),
            self.variant.as_str(),
            started.elapsed().as_millis()
        );
        self.ctx = Some(ctx);
        Ok(())
    }

    fn default_options(&self) -> TranscribeOptions {
        self.defaults.clone()
    }

    fn run(
        &self,
        options: TranscribeOptions,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionResult, PipelineError> {
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| PipelineError::Inference("whisper context not loaded".into()))?;

        if options.audio.len() < MIN_AUDIO_SAMPLES {
            return Err(PipelineError::InvalidInput(
                "audio too short, minimum 0.5 s".into(),
            ));
        }

        progress.report_with(0, 0, "decoding");
        let mut state = ctx
            .create_state()
            .map_err(|e| PipelineError::ContextInit(e.to_string()))?;

        check_cancelled(cancel)?;
        let wall_start = Instant::now();
        let fp = Self::build_params(&options, cancel);
        if let Err(e) = state.full(fp, &options.audio) {
            // An aborted decode surfaces as a generic failure code.
            check_cancelled(cancel)?;
            return Err(PipelineError::Inference(e.to_string()));
        }
        check_cancelled(cancel)?;

        let n_segments = state
            .full_n_segments()
            .map_err(|e| PipelineError::Inference(e.to_string()))?;
        let total = n_segments.max(0) as u32;

        let mut text = String::new();
        let mut segments = Vec::with_capacity(total as usize);
        for i in 0..n_segments {
            check_cancelled(cancel)?;
            let seg_text = state
                .full_get_segment_text(i)
                .map_err(|e| PipelineError::Inference(format!("segment {i}: {e}")))?;

            // Timestamps are in centiseconds.
            let t0 = state.full_get_segment_t0(i).unwrap_or(0).max(0) as u64 * 10;
            let t1 = state.full_get_segment_t1(i).unwrap_or(0).max(0) as u64 * 10;

            text.push_str(&seg_text);
            segments.push(Segment {
                text: seg_text.trim().to_string(),
                start_ms: t0,
                end_ms: t1,
            });
            progress.report(i as u32 + 1, total);
        }

        Ok(TranscriptionResult {
            text: text.trim().to_string(),
            segments,
            duration_ms: wall_start.elapsed().as_millis(),
        })
    }
}

// ---------------------------------------------------------------------------
// WhisperBackend
// ---------------------------------------------------------------------------

/// Builds [`WhisperPipeline`]s for the transcription factory.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhisperBackend;

impl InferenceBackend<Transcribe> for WhisperBackend {
    fn build(&self, blueprint: Blueprint<TranscribeOptions>) -> Result<DynPipeline<Transcribe>, PipelineError> {
        let variant: WhisperType = blueprint
            .variant
            .as_deref()
            .ok_or_else(|| PipelineError::InvalidVariant(format!("{} has no variant", blueprint.model_id)))?
            .parse()?;
        Ok(Box::new(WhisperPipeline::new(
            &blueprint.path,
            variant,
            blueprint.provider,
            blueprint.defaults,
        )))
    }
}
