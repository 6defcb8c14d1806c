//! Test doubles: a scriptable pipeline backend with live-handle counters.
//!
//! [`MockScript`] is shared between the test body and every pipeline or
//! auxiliary the backend builds.  Each `load` / `run` call pops the next
//! [`Step`] from its queue (defaulting to [`Step::Succeed`]) and every
//! constructed object bumps the live counter until it is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::catalog::{FeatureKind, ModelDescriptor, PipelineFamily};
use crate::features::{unsupported, ControlNet, Diffusion, Feature, GenerateOptions};
use crate::tensor::ImageTensor;

use super::{
    check_cancelled, Blueprint, DynPipeline, FamilyFactory, InferenceBackend, Pipeline,
    PipelineError, Progress, Resource,
};

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

/// What the next scripted call does.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed,
    Fail(PipelineError),
    /// Block until the token fires, then return `Cancelled`.
    WaitForCancel,
    /// Fire the token from inside the call, then succeed.
    Cancel,
}

#[derive(Debug, Default)]
pub struct MockScript {
    load: Mutex<VecDeque<Step>>,
    run: Mutex<VecDeque<Step>>,
    aux: Mutex<VecDeque<Step>>,
    fail_release: AtomicBool,
    live: AtomicUsize,
    peak: AtomicUsize,
    aux_live: AtomicUsize,
    created: AtomicUsize,
    released: AtomicUsize,
    runs: AtomicUsize,
}

impl MockScript {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_load(&self, step: Step) {
        self.load.lock().unwrap().push_back(step);
    }

    pub fn push_run(&self, step: Step) {
        self.run.lock().unwrap().push_back(step);
    }

    pub fn push_aux(&self, step: Step) {
        self.aux.lock().unwrap().push_back(step);
    }

    pub fn fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    /// Pipelines currently alive.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of pipelines ever alive at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn aux_live(&self) -> usize {
        self.aux_live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn next(queue: &Mutex<VecDeque<Step>>) -> Step {
        queue.lock().unwrap().pop_front().unwrap_or(Step::Succeed)
    }

    fn play(step: Step, cancel: &CancellationToken) -> Result<(), PipelineError> {
        match step {
            Step::Succeed => check_cancelled(cancel),
            Step::Fail(e) => Err(e),
            Step::WaitForCancel => {
                let deadline = Instant::now() + Duration::from_secs(5);
                while Instant::now() < deadline {
                    check_cancelled(cancel)?;
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(PipelineError::Inference("mock: never cancelled".into()))
            }
            Step::Cancel => {
                cancel.cancel();
                Ok(())
            }
        }
    }

    fn release(&self) -> Result<(), PipelineError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(PipelineError::Release("mock release failure".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Echo feature
// ---------------------------------------------------------------------------

/// Minimal feature used to drive the coordinator in tests.
#[derive(Debug)]
pub struct Echo;

#[derive(Debug, Clone)]
pub struct EchoRequest {
    pub text: String,
}

impl EchoRequest {
    pub fn new(text: &str) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EchoOptions {
    pub prefix: String,
    pub text: String,
    pub aux: Option<Arc<MockAux>>,
}

impl Feature for Echo {
    const NAME: &'static str = "echo";
    const KIND: FeatureKind = FeatureKind::Transcribe;
    const AUXILIARY: Option<FeatureKind> = Some(FeatureKind::Control);

    type Request = EchoRequest;
    type Options = EchoOptions;
    type Output = String;
    type Auxiliary = MockAux;

    fn family_defaults(family: PipelineFamily) -> Result<EchoOptions, PipelineError> {
        match family {
            PipelineFamily::Whisper => Ok(EchoOptions::default()),
            other => Err(unsupported::<Echo>(other)),
        }
    }

    fn prepare(
        request: EchoRequest,
        defaults: &EchoOptions,
        auxiliary: Option<&Arc<MockAux>>,
    ) -> Result<EchoOptions, PipelineError> {
        if request.text.is_empty() {
            return Err(PipelineError::InvalidInput("empty text".into()));
        }
        Ok(EchoOptions {
            prefix: defaults.prefix.clone(),
            text: request.text,
            aux: auxiliary.cloned(),
        })
    }
}

// ---------------------------------------------------------------------------
// MockPipeline / MockAux
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MockPipeline {
    script: Arc<MockScript>,
    defaults: EchoOptions,
    loaded: bool,
}

impl MockPipeline {
    fn new(script: Arc<MockScript>, blueprint: Blueprint<EchoOptions>) -> Self {
        let live = script.live.fetch_add(1, Ordering::SeqCst) + 1;
        script.peak.fetch_max(live, Ordering::SeqCst);
        script.created.fetch_add(1, Ordering::SeqCst);
        Self {
            script,
            defaults: EchoOptions {
                prefix: blueprint.model_id,
                ..blueprint.defaults
            },
            loaded: false,
        }
    }
}

impl Drop for MockPipeline {
    fn drop(&mut self) {
        self.script.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Resource for MockPipeline {
    fn unload(&mut self) -> Result<(), PipelineError> {
        self.loaded = false;
        self.script.release()
    }
}

impl Pipeline for MockPipeline {
    type Options = EchoOptions;
    type Output = String;

    fn load(&mut self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        MockScript::play(MockScript::next(&self.script.load), cancel)?;
        self.loaded = true;
        Ok(())
    }

    fn default_options(&self) -> EchoOptions {
        self.defaults.clone()
    }

    fn run(
        &self,
        options: EchoOptions,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        assert!(self.loaded, "run called on an unloaded mock pipeline");
        progress.report(0, 1);
        MockScript::play(MockScript::next(&self.script.run), cancel)?;
        self.script.runs.fetch_add(1, Ordering::SeqCst);
        progress.report(1, 1);
        let suffix = options.aux.as_ref().map(|a| format!("+{}", a.id)).unwrap_or_default();
        Ok(format!("{}:{}{}", options.prefix, options.text, suffix))
    }
}

#[derive(Debug)]
pub struct MockAux {
    pub id: String,
    script: Arc<MockScript>,
}

impl Drop for MockAux {
    fn drop(&mut self) {
        self.script.aux_live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Resource for MockAux {
    fn unload(&mut self) -> Result<(), PipelineError> {
        self.script.release()
    }
}

// ---------------------------------------------------------------------------
// Backend + helpers
// ---------------------------------------------------------------------------

pub struct MockBackend {
    script: Arc<MockScript>,
}

impl InferenceBackend<Echo> for MockBackend {
    fn build(&self, blueprint: Blueprint<EchoOptions>) -> Result<DynPipeline<Echo>, PipelineError> {
        Ok(Box::new(MockPipeline::new(self.script.clone(), blueprint)))
    }

    fn build_auxiliary(
        &self,
        blueprint: Blueprint<()>,
        cancel: &CancellationToken,
    ) -> Result<MockAux, PipelineError> {
        MockScript::play(MockScript::next(&self.script.aux), cancel)?;
        self.script.aux_live.fetch_add(1, Ordering::SeqCst);
        Ok(MockAux {
            id: blueprint.model_id,
            script: self.script.clone(),
        })
    }
}

pub fn echo_factory(script: &Arc<MockScript>) -> Arc<FamilyFactory<Echo>> {
    Arc::new(FamilyFactory::new(Arc::new(MockBackend {
        script: script.clone(),
    })))
}

/// A valid Whisper-family descriptor with a fake path.
pub fn echo_model(id: &str) -> ModelDescriptor {
    ModelDescriptor::new(id, id, PipelineFamily::Whisper).with_path(format!("/models/{id}"))
}

/// A valid ControlNet descriptor with a fake path.
pub fn control_model(id: &str) -> ModelDescriptor {
    ModelDescriptor::new(id, id, PipelineFamily::ControlNet).with_path(format!("/models/{id}"))
}

// ---------------------------------------------------------------------------
// Diffusion
// ---------------------------------------------------------------------------

/// What a [`DiffusionBackend`] pipeline saw.
#[derive(Debug, Default)]
pub struct DiffusionTrace {
    /// ControlNet id attached to each run, in order.
    pub runs: Mutex<Vec<Option<String>>>,
    /// Controlnet strength of the last run.
    pub control_net_strength: Mutex<Option<f32>>,
    /// At pipeline release: whether the last run's ControlNet was already gone.
    pub control_net_released_first: Mutex<Option<bool>>,
}

/// Diffusion backend whose pipelines return blank images and record what
/// they were handed.
pub struct DiffusionBackend {
    pub script: Arc<MockScript>,
    pub trace: Arc<DiffusionTrace>,
}

struct MockDiffusionPipeline {
    script: Arc<MockScript>,
    trace: Arc<DiffusionTrace>,
    defaults: GenerateOptions,
    last_control_net: Mutex<Option<Weak<ControlNet>>>,
}

impl Drop for MockDiffusionPipeline {
    fn drop(&mut self) {
        self.script.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Resource for MockDiffusionPipeline {
    fn unload(&mut self) -> Result<(), PipelineError> {
        let weak = self.last_control_net.lock().unwrap().take();
        if let Some(weak) = weak {
            *self.trace.control_net_released_first.lock().unwrap() = Some(weak.upgrade().is_none());
        }
        self.script.release()
    }
}

impl Pipeline for MockDiffusionPipeline {
    type Options = GenerateOptions;
    type Output = ImageTensor;

    fn load(&mut self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        MockScript::play(MockScript::next(&self.script.load), cancel)
    }

    fn default_options(&self) -> GenerateOptions {
        self.defaults.clone()
    }

    fn run(
        &self,
        options: GenerateOptions,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<ImageTensor, PipelineError> {
        MockScript::play(MockScript::next(&self.script.run), cancel)?;
        progress.report(options.steps, options.steps);
        self.trace
            .runs
            .lock()
            .unwrap()
            .push(options.control_net.as_ref().map(|c| c.id.clone()));
        *self.trace.control_net_strength.lock().unwrap() = Some(options.control_net_strength);
        *self.last_control_net.lock().unwrap() = options.control_net.as_ref().map(Arc::downgrade);
        Ok(ImageTensor::zeros(options.width, options.height, 3))
    }
}

impl InferenceBackend<Diffusion> for DiffusionBackend {
    fn build(&self, blueprint: Blueprint<GenerateOptions>) -> Result<DynPipeline<Diffusion>, PipelineError> {
        let live = self.script.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.peak.fetch_max(live, Ordering::SeqCst);
        self.script.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDiffusionPipeline {
            script: self.script.clone(),
            trace: self.trace.clone(),
            defaults: blueprint.defaults,
            last_control_net: Mutex::new(None),
        }))
    }

    fn build_auxiliary(
        &self,
        blueprint: Blueprint<()>,
        cancel: &CancellationToken,
    ) -> Result<ControlNet, PipelineError> {
        MockScript::play(MockScript::next(&self.script.aux), cancel)?;
        Ok(ControlNet::new(blueprint.model_id, blueprint.path, blueprint.provider))
    }
}

pub fn diffusion_factory(
    script: &Arc<MockScript>,
    trace: &Arc<DiffusionTrace>,
) -> Arc<FamilyFactory<Diffusion>> {
    Arc::new(FamilyFactory::new(Arc::new(DiffusionBackend {
        script: script.clone(),
        trace: trace.clone(),
    })))
}

/// A valid Stable Diffusion descriptor with a fake path.
pub fn diffusion_model(id: &str) -> ModelDescriptor {
    ModelDescriptor::new(id, id, PipelineFamily::StableDiffusion).with_path(format!("/models/{id}"))
}
