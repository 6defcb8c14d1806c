//! Pipeline construction.
//!
//! [`PipelineFactory`] is the seam the coordinator talks to.  The production
//! implementation, [`FamilyFactory`], validates the descriptor, resolves the
//! family's baseline options through the feature's closed family match and
//! hands a [`Blueprint`] to an [`InferenceBackend`] that owns the kernels.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::catalog::{ModelDescriptor, PipelineFamily};
use crate::device::ExecutionProvider;
use crate::features::Feature;

use super::{DynPipeline, PipelineError};

// ---------------------------------------------------------------------------
// Blueprint
// ---------------------------------------------------------------------------

/// Everything a backend needs to build one pipeline.
#[derive(Debug, Clone)]
pub struct Blueprint<O> {
    pub model_id: String,
    pub family: PipelineFamily,
    /// Model directory.
    pub path: PathBuf,
    pub variant: Option<String>,
    pub provider: ExecutionProvider,
    /// Baseline options for the family.
    pub defaults: O,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Builds pipelines and auxiliary resources for one feature.
pub trait PipelineFactory<F: Feature>: Send + Sync {
    /// Construct (but do not load) the pipeline for `model`.
    fn create(
        &self,
        model: &ModelDescriptor,
        provider: &ExecutionProvider,
    ) -> Result<DynPipeline<F>, PipelineError>;

    /// Construct and load an auxiliary resource, such as a ControlNet.
    fn create_auxiliary(
        &self,
        model: &ModelDescriptor,
        provider: &ExecutionProvider,
        cancel: &CancellationToken,
    ) -> Result<F::Auxiliary, PipelineError>;
}

/// Kernel provider for a feature.
pub trait InferenceBackend<F: Feature>: Send + Sync {
    fn build(&self, blueprint: Blueprint<F::Options>) -> Result<DynPipeline<F>, PipelineError>;

    fn build_auxiliary(
        &self,
        blueprint: Blueprint<()>,
        _cancel: &CancellationToken,
    ) -> Result<F::Auxiliary, PipelineError> {
        Err(PipelineError::UnsupportedFamily {
            family: blueprint.family,
            feature: F::NAME,
        })
    }
}

// ---------------------------------------------------------------------------
// FamilyFactory
// ---------------------------------------------------------------------------

/// Validating factory over an [`InferenceBackend`].
pub struct FamilyFactory<F: Feature> {
    backend: Arc<dyn InferenceBackend<F>>,
}

impl<F: Feature> FamilyFactory<F> {
    pub fn new(backend: Arc<dyn InferenceBackend<F>>) -> Self {
        Self { backend }
    }

    fn check(model: &ModelDescriptor, provider: &ExecutionProvider) -> Result<(), PipelineError> {
        if !model.is_valid() {
            return Err(PipelineError::ModelNotFound(format!(
                "{} ({})",
                model.id,
                model.path.display()
            )));
        }
        if !model.supports(provider.kind) {
            return Err(PipelineError::UnsupportedDevice {
                model: model.id.clone(),
                device: provider.kind,
            });
        }
        Ok(())
    }

    fn blueprint<O>(model: &ModelDescriptor, provider: &ExecutionProvider, defaults: O) -> Blueprint<O> {
        Blueprint {
            model_id: model.id.clone(),
            family: model.family,
            path: model.path.clone(),
            variant: model.variant.clone(),
            provider: *provider,
            defaults,
        }
    }
}

impl<F: Feature> PipelineFactory<F> for FamilyFactory<F> {
    fn create(
        &self,
        model: &ModelDescriptor,
        provider: &ExecutionProvider,
    ) -> Result<DynPipeline<F>, PipelineError> {
        let defaults = F::family_defaults(model.family)?;
        Self::check(model, provider)?;
        log::info!(
            "factory: building {} pipeline for {} on {}",
            model.family,
            model.id,
            provider.kind
        );
        self.backend.build(Self::blueprint(model, provider, defaults))
    }

    fn create_auxiliary(
        &self,
        model: &ModelDescriptor,
        provider: &ExecutionProvider,
        cancel: &CancellationToken,
    ) -> Result<F::Auxiliary, PipelineError> {
        if !accepts_auxiliary::<F>(model) {
            return Err(PipelineError::UnsupportedFamily {
                family: model.family,
                feature: F::NAME,
            });
        }
        Self::check(model, provider)?;
        log::info!("factory: building {} auxiliary {}", F::NAME, model.id);
        self.backend
            .build_auxiliary(Self::blueprint(model, provider, ()), cancel)
    }
}

impl<F: Feature> std::fmt::Debug for FamilyFactory<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FamilyFactory")
            .field("feature", &F::NAME)
            .finish_non_exhaustive()
    }
}

/// Returns `true` when `model` can be handed to `F`'s factory.
pub fn accepts<F: Feature>(model: &ModelDescriptor) -> bool {
    model.feature() == F::KIND
}

/// Returns `true` when `model` can be attached as `F`'s auxiliary.
pub fn accepts_auxiliary<F: Feature>(model: &ModelDescriptor) -> bool {
    F::AUXILIARY == Some(model.feature())
}
