//! Pipeline capability traits, construction and progress reporting.
//!
//! # Overview
//!
//! ```text
//! ModelDescriptor + ExecutionProvider
//!        │
//!        ▼
//! ┌────────────────────┐  family_defaults()  ┌──────────────────┐
//! │  FamilyFactory<F>  │────────────────────▶│ Feature (closed  │
//! │  - validity check  │                     │ match on family) │
//! │  - device check    │◀────────────────────└──────────────────┘
//! └─────────┬──────────┘      Blueprint
//!           ▼
//! ┌────────────────────┐
//! │ InferenceBackend<F>│──▶ Box<dyn Pipeline>  (Whisper, diffusion, …)
//! └────────────────────┘
//! ```
//!
//! A [`Pipeline`] is the heavy, exclusively-owned compute resource.  It is
//! built cheaply by a [`PipelineFactory`], then [`Pipeline::load`]ed on a
//! blocking worker, then [`Pipeline::run`] any number of times, and finally
//! [`Resource::unload`]ed exactly once.  Long-running methods take a
//! [`CancellationToken`] that they poll between steps.

pub mod factory;
pub mod whisper;

#[cfg(test)]
pub mod mock;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::device::DeviceKind;
use crate::features::Feature;

pub use factory::{Blueprint, FamilyFactory, InferenceBackend, PipelineFactory};
pub use whisper::{WhisperBackend, WhisperPipeline, WhisperType};

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Errors raised while building, loading, running or releasing a pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// The model directory or a required weight file is missing.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The model's family is not handled by this feature's factory.
    #[error("{family} models cannot be loaded by the {feature} pipeline")]
    UnsupportedFamily {
        family: crate::catalog::PipelineFamily,
        feature: &'static str,
    },

    /// The model does not declare support for the selected device.
    #[error("Model {model} does not support {device} execution")]
    UnsupportedDevice { model: String, device: DeviceKind },

    /// The descriptor's variant string is not recognised by the family.
    #[error("Invalid model variant: {0}")]
    InvalidVariant(String),

    /// The inference runtime failed to initialise.
    #[error("Pipeline initialisation failed: {0}")]
    ContextInit(String),

    /// Inference itself failed.
    #[error("Inference error: {0}")]
    Inference(String),

    /// The request could not be turned into pipeline options.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The cancellation token fired at a safe point.
    #[error("Operation cancelled")]
    Cancelled,

    /// Releasing native resources failed.
    #[error("Failed to release pipeline: {0}")]
    Release(String),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

/// Returns `Err(PipelineError::Cancelled)` once `token` has fired.
///
/// Pipelines call this at their safe points.
pub fn check_cancelled(token: &CancellationToken) -> Result<(), PipelineError> {
    if token.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// A single progress notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    /// Completed steps.
    pub step: u32,
    /// Total steps, `0` when unknown.
    pub total: u32,
    pub message: Option<String>,
}

/// Progress sink handed to [`Pipeline::run`].
///
/// Backed by a `watch` channel so observers only ever see the latest update
/// and a slow observer never blocks inference.
#[derive(Debug, Clone)]
pub struct Progress {
    tx: Arc<watch::Sender<ProgressUpdate>>,
}

impl Progress {
    pub fn new(tx: Arc<watch::Sender<ProgressUpdate>>) -> Self {
        Self { tx }
    }

    /// A sink with no observers.
    pub fn detached() -> Self {
        let (tx, _rx) = watch::channel(ProgressUpdate::default());
        Self::new(Arc::new(tx))
    }

    pub fn report(&self, step: u32, total: u32) {
        self.tx.send_replace(ProgressUpdate {
            step,
            total,
            message: None,
        });
    }

    pub fn report_with(&self, step: u32, total: u32, message: impl Into<String>) {
        self.tx.send_replace(ProgressUpdate {
            step,
            total,
            message: Some(message.into()),
        });
    }

    pub fn reset(&self) {
        self.tx.send_replace(ProgressUpdate::default());
    }
}

// ---------------------------------------------------------------------------
// Resource / Pipeline traits
// ---------------------------------------------------------------------------

/// A native resource that must be released exactly once.
pub trait Resource: Send + Sync {
    /// Release weights and execution contexts.
    fn unload(&mut self) -> Result<(), PipelineError>;
}

/// A loadable, runnable inference pipeline.
///
/// `load` and `run` block; callers move them onto `spawn_blocking`.
pub trait Pipeline: Resource {
    /// Native option set consumed by [`run`](Pipeline::run).
    type Options;
    /// Value produced by a successful run.
    type Output;

    /// Read weights and create execution contexts.
    fn load(&mut self, cancel: &CancellationToken) -> Result<(), PipelineError>;

    /// Baseline options for this pipeline, merged with each request.
    fn default_options(&self) -> Self::Options;

    fn run(
        &self,
        options: Self::Options,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<Self::Output, PipelineError>;
}

/// The boxed pipeline a feature's coordinator holds.
pub type DynPipeline<F> =
    Box<dyn Pipeline<Options = <F as Feature>::Options, Output = <F as Feature>::Output>>;

// Compile-time assertion: the transcription pipeline can be boxed.
const _: fn() = || {
    fn _assert_object_safe(_: DynPipeline<crate::features::Transcribe>) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_cancelled_follows_token() {
        let token = CancellationToken::new();
        assert!(check_cancelled(&token).is_ok());
        token.cancel();
        assert_eq!(check_cancelled(&token), Err(PipelineError::Cancelled));
    }

    #[test]
    fn progress_publishes_latest_update() {
        let (tx, rx) = watch::channel(ProgressUpdate::default());
        let progress = Progress::new(Arc::new(tx));
        progress.report(1, 4);
        progress.report_with(2, 4, "denoising");
        assert_eq!(
            *rx.borrow(),
            ProgressUpdate {
                step: 2,
                total: 4,
                message: Some("denoising".into())
            }
        );
        progress.reset();
        assert_eq!(*rx.borrow(), ProgressUpdate::default());
    }

    #[test]
    fn detached_progress_does_not_panic() {
        Progress::detached().report(1, 1);
    }

    #[test]
    fn error_display_names_family_and_feature() {
        let e = PipelineError::UnsupportedFamily {
            family: crate::catalog::PipelineFamily::Whisper,
            feature: "diffusion",
        };
        assert!(e.to_string().contains("Whisper"));
        assert!(e.to_string().contains("diffusion"));
    }
}
