//! Per-feature specializations of the generic coordinator.
//!
//! A [`Feature`] ties together the request a caller submits, the native
//! option set its pipelines consume, the result they produce, and the closed
//! per-family baseline table used when a pipeline is built.
//!
//! | Feature        | Families                        | Output                |
//! |----------------|---------------------------------|-----------------------|
//! | [`Diffusion`]  | Stable Diffusion, Flux, …       | `ImageTensor`         |
//! | [`Narrate`]    | Supertonic                      | `AudioTensor`         |
//! | [`Transcribe`] | Whisper                         | `TranscriptionResult` |

pub mod diffusion;
pub mod narrate;
pub mod transcribe;

use std::sync::Arc;

use crate::catalog::{FeatureKind, PipelineFamily};
use crate::pipeline::{PipelineError, Resource};

pub use diffusion::{ControlNet, Diffusion, GenerateOptions, ImageGenerateRequest, SchedulerType};
pub use narrate::{Narrate, NarrateOptions, NarrateRequest};
pub use transcribe::{
    SamplingStrategy, Segment, Transcribe, TranscribeOptions, TranscribeRequest, TranscribeTask,
    TranscriptionResult,
};

// ---------------------------------------------------------------------------
// Feature
// ---------------------------------------------------------------------------

/// Type-level description of one application feature.
pub trait Feature: Send + Sync + Sized + 'static {
    /// Lower-case name used in logs and errors.
    const NAME: &'static str;
    /// Catalog feature whose models this feature loads.
    const KIND: FeatureKind;
    /// Catalog feature of the optional auxiliary model, if any.
    const AUXILIARY: Option<FeatureKind>;

    type Request: Send + 'static;
    type Options: Clone + Send + Sync + 'static;
    type Output: Send + 'static;
    type Auxiliary: Resource + 'static;

    /// Baseline options for `family`, or `UnsupportedFamily` when the family
    /// belongs to another feature.
    fn family_defaults(family: PipelineFamily) -> Result<Self::Options, PipelineError>;

    /// Merge `request` over the loaded pipeline's `defaults`, attaching any
    /// auxiliary resource fixed at load time.
    fn prepare(
        request: Self::Request,
        defaults: &Self::Options,
        auxiliary: Option<&Arc<Self::Auxiliary>>,
    ) -> Result<Self::Options, PipelineError>;
}

pub(crate) fn unsupported<F: Feature>(family: PipelineFamily) -> PipelineError {
    PipelineError::UnsupportedFamily {
        family,
        feature: F::NAME,
    }
}

// ---------------------------------------------------------------------------
// NoAuxiliary
// ---------------------------------------------------------------------------

/// Auxiliary type for features that never attach one.  Uninhabited.
#[derive(Debug)]
pub enum NoAuxiliary {}

impl Resource for NoAuxiliary {
    fn unload(&mut self) -> Result<(), PipelineError> {
        match *self {}
    }
}
