//! The generic load / execute / cancel / unload state machine.
//!
//! # Locking
//!
//! - `state` (std `Mutex`) guards the active scope and the loaded handle.
//!   It is held only for short, non-async critical sections; do not hold the
//!   lock across `.await`.
//! - `gate` (tokio `Mutex`) serialises the heavy part of every operation so
//!   a new load never starts constructing before the previous handle has been
//!   released.  The owned gate guard travels into each blocking worker and
//!   only comes back when the worker returns, so a caller that drops its
//!   future cannot let the next operation overlap a worker still running.
//!
//! Every load and execute call owns a [`ScopeGuard`].  When dropped on any
//! exit path it cancels the call's token, clears the active scope (if it is
//! still this call's) and republishes the flags before the gate is handed to
//! the next operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{watch, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::device::{DeviceError, DeviceResolver, ExecutionProvider};
use crate::features::Feature;
use crate::pipeline::{
    check_cancelled, DynPipeline, PipelineError, PipelineFactory, Progress, ProgressUpdate, Resource,
};

use super::selection::PipelineSelection;
use super::state::{ActiveScope, CoordinatorFlags, ScopeKind};

// ---------------------------------------------------------------------------
// CoordinatorError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The call's scope was cancelled, either explicitly or by a superseding
    /// load or an unload.
    #[error("Operation cancelled")]
    Cancelled,

    /// `execute` was called with no pipeline loaded.
    #[error("No pipeline is loaded")]
    NotLoaded,

    /// `execute` was called while another operation was in flight.
    #[error("Another operation is already in progress")]
    Busy,

    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Construction failed; the coordinator is unloaded.
    #[error("Load failed: {0}")]
    Load(PipelineError),

    /// Inference failed; the pipeline stays loaded.
    #[error("Execution failed: {0}")]
    Execute(PipelineError),

    /// Releasing the previous handle failed; flags are already reset.
    #[error("Release failed: {0}")]
    Release(PipelineError),

    /// A blocking worker panicked.
    #[error("Background task failed: {0}")]
    Join(String),
}

impl CoordinatorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoordinatorError::Cancelled)
    }
}

impl From<tokio::task::JoinError> for CoordinatorError {
    fn from(e: tokio::task::JoinError) -> Self {
        CoordinatorError::Join(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// A constructed, loaded pipeline plus everything fixed at load time.
struct LoadedPipeline<F: Feature> {
    selection: PipelineSelection,
    pipeline: Arc<DynPipeline<F>>,
    defaults: F::Options,
    auxiliary: Option<Arc<F::Auxiliary>>,
}

/// A freshly constructed pipeline not yet stored in the coordinator.
///
/// Released on drop unless taken, so a worker whose caller has gone away
/// still unloads what it built.
struct PendingHandle<F: Feature>(Option<LoadedPipeline<F>>);

impl<F: Feature> PendingHandle<F> {
    fn take(mut self) -> Option<LoadedPipeline<F>> {
        self.0.take()
    }

    fn release(self) -> Result<(), PipelineError> {
        self.take().map_or(Ok(()), release)
    }
}

impl<F: Feature> Drop for PendingHandle<F> {
    fn drop(&mut self) {
        if let Some(loaded) = self.0.take() {
            log::warn!(
                "{}: releasing orphaned pipeline {}",
                F::NAME,
                loaded.selection.model.id
            );
            if let Err(e) = release(loaded) {
                log::warn!("{}: releasing orphaned pipeline failed: {e}", F::NAME);
            }
        }
    }
}

struct CoordinatorState<F: Feature> {
    active: Option<ActiveScope>,
    loaded: Option<LoadedPipeline<F>>,
}

impl<F: Feature> CoordinatorState<F> {
    fn flags(&self) -> CoordinatorFlags {
        CoordinatorFlags::derive(self.loaded.is_some(), self.active.as_ref().map(|s| s.kind))
    }
}

// ---------------------------------------------------------------------------
// ScopeGuard
// ---------------------------------------------------------------------------

/// Ends a call's scope on drop, whatever the exit path.
struct ScopeGuard<'a, F: Feature> {
    coordinator: &'a Coordinator<F>,
    id: u64,
    token: CancellationToken,
    gate: Option<OwnedMutexGuard<()>>,
}

impl<F: Feature> ScopeGuard<'_, F> {
    async fn enter(&mut self) {
        self.gate = Some(self.coordinator.gate.clone().lock_owned().await);
    }

    /// Run `work` on a blocking worker that keeps the gate until it returns,
    /// even if this call is dropped in the meantime.
    async fn run_blocking<T, W>(&mut self, work: W) -> Result<T, CoordinatorError>
    where
        W: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let gate = self.gate.take();
        // The output drops before the gate if nobody collects it.
        let (output, gate) = tokio::task::spawn_blocking(move || (work(), gate)).await?;
        self.gate = gate;
        Ok(output)
    }
}

impl<F: Feature> Drop for ScopeGuard<'_, F> {
    fn drop(&mut self) {
        // Stops any worker this call left behind.
        self.token.cancel();
        let mut state = self.coordinator.lock_state();
        if state.active.as_ref().is_some_and(|s| s.id == self.id) {
            state.active = None;
        }
        self.coordinator.publish(&state);
        // `gate` drops after this body, once the flags are final.
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Lifecycle coordinator for one feature slot.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use media_studio::catalog::{ModelDescriptor, PipelineFamily};
/// use media_studio::coordinator::{Coordinator, PipelineSelection};
/// use media_studio::device::{Device, DeviceResolver};
/// use media_studio::features::{Transcribe, TranscribeRequest};
/// use media_studio::tensor::AudioTensor;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let coordinator = Coordinator::<Transcribe>::new(
///     Transcribe::factory(),
///     Arc::new(DeviceResolver::default()),
/// );
/// let mut model = ModelDescriptor::new("whisper-base", "Whisper Base", PipelineFamily::Whisper)
///     .with_variant("base")
///     .with_files(["ggml-base.bin"]);
/// model.initialize(std::path::Path::new("models"));
///
/// coordinator.load(PipelineSelection::new(Device::cpu(), model)).await?;
/// let audio = AudioTensor::new(16_000, 1, vec![0.0; 16_000]);
/// let result = coordinator.execute(TranscribeRequest::new(audio)).await?;
/// println!("{}", result.text);
/// coordinator.unload().await?;
/// # Ok(())
/// # }
/// ```
pub struct Coordinator<F: Feature> {
    factory: Arc<dyn PipelineFactory<F>>,
    devices: Arc<DeviceResolver>,
    state: Mutex<CoordinatorState<F>>,
    gate: Arc<tokio::sync::Mutex<()>>,
    flags: watch::Sender<CoordinatorFlags>,
    progress: Arc<watch::Sender<ProgressUpdate>>,
    next_scope: AtomicU64,
}

impl<F: Feature> Coordinator<F> {
    pub fn new(factory: Arc<dyn PipelineFactory<F>>, devices: Arc<DeviceResolver>) -> Self {
        let (flags, _) = watch::channel(CoordinatorFlags::default());
        let (progress, _) = watch::channel(ProgressUpdate::default());
        Self {
            factory,
            devices,
            state: Mutex::new(CoordinatorState {
                active: None,
                loaded: None,
            }),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            flags,
            progress: Arc::new(progress),
            next_scope: AtomicU64::new(1),
        }
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// Current flag snapshot.
    pub fn flags(&self) -> CoordinatorFlags {
        *self.flags.borrow()
    }

    /// Receiver notified on every flag change.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorFlags> {
        self.flags.subscribe()
    }

    /// Receiver for the running operation's progress.
    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressUpdate> {
        self.progress.subscribe()
    }

    /// The selection currently loaded, if any.
    pub fn selection(&self) -> Option<PipelineSelection> {
        self.lock_state().loaded.as_ref().map(|l| l.selection.clone())
    }

    // -----------------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------------

    /// Swap in the pipeline described by `selection`.
    ///
    /// Supersedes (cancels) any in-flight load or execute, releases the
    /// currently held pipeline, then constructs and loads the new one on a
    /// blocking worker.
    pub async fn load(&self, selection: PipelineSelection) -> Result<(), CoordinatorError> {
        let mut scope = {
            let mut state = self.lock_state();
            if let Some(superseded) = state.active.take() {
                log::debug!("{}: load supersedes {:?} scope {}", F::NAME, superseded.kind, superseded.id);
                superseded.token.cancel();
            }
            self.begin(&mut state, ScopeKind::Load)
        };
        let token = scope.token.clone();
        log::info!(
            "{}: loading {} on {}",
            F::NAME,
            selection.model.id,
            selection.device
        );

        scope.enter().await;

        // Taken only once the gate is held: a load superseded while waiting
        // leaves the handle for its successor.
        let previous = {
            let mut state = self.lock_state();
            if token.is_cancelled() {
                return Err(CoordinatorError::Cancelled);
            }
            state.loaded.take()
        };
        if let Some(previous) = previous {
            if let Err(e) = scope.run_blocking(move || release(previous)).await? {
                log::warn!("{}: releasing previous pipeline failed: {e}", F::NAME);
            }
        }

        check_cancelled(&token).map_err(|_| CoordinatorError::Cancelled)?;
        let provider = self.devices.resolve(&selection.device)?;

        let factory = self.factory.clone();
        let worker_token = token.clone();
        let built = scope
            .run_blocking(move || {
                construct(factory.as_ref(), selection, &provider, &worker_token)
                    .map(|loaded| PendingHandle(Some(loaded)))
            })
            .await?;

        let pending = match built {
            Ok(pending) => pending,
            Err(e) if e.is_cancelled() => {
                log::info!("{}: load cancelled", F::NAME);
                return Err(CoordinatorError::Cancelled);
            }
            Err(e) => {
                log::error!("{}: load failed: {e}", F::NAME);
                return Err(CoordinatorError::Load(e));
            }
        };

        // Store only if this call is still current; the check and the store
        // share the lock that `cancel` and superseding loads take.
        let rejected = {
            let mut state = self.lock_state();
            if token.is_cancelled() {
                Some(pending)
            } else {
                if let Some(loaded) = pending.take() {
                    log::info!("{}: loaded {}", F::NAME, loaded.selection.model.id);
                    state.loaded = Some(loaded);
                }
                None
            }
        };

        match rejected {
            Some(pending) => {
                log::info!("{}: load cancelled after construction", F::NAME);
                if let Err(e) = scope.run_blocking(move || pending.release()).await? {
                    log::warn!("{}: releasing cancelled pipeline failed: {e}", F::NAME);
                }
                Err(CoordinatorError::Cancelled)
            }
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Execute
    // -----------------------------------------------------------------------

    /// Run `request` against the loaded pipeline.
    ///
    /// Rejected with [`CoordinatorError::NotLoaded`] or
    /// [`CoordinatorError::Busy`] without touching any flag.  Cancellation and
    /// inference failures leave the pipeline loaded.
    pub async fn execute(&self, request: F::Request) -> Result<F::Output, CoordinatorError> {
        let mut scope = {
            let mut state = self.lock_state();
            if state.flags().is_busy() {
                return Err(CoordinatorError::Busy);
            }
            if state.loaded.is_none() {
                return Err(CoordinatorError::NotLoaded);
            }
            self.begin(&mut state, ScopeKind::Execute)
        };
        let token = scope.token.clone();

        scope.enter().await;

        let (pipeline, defaults, auxiliary) = {
            let state = self.lock_state();
            if token.is_cancelled() {
                return Err(CoordinatorError::Cancelled);
            }
            let Some(loaded) = state.loaded.as_ref() else {
                return Err(CoordinatorError::NotLoaded);
            };
            (
                loaded.pipeline.clone(),
                loaded.defaults.clone(),
                loaded.auxiliary.clone(),
            )
        };

        let progress = Progress::new(self.progress.clone());
        let worker_token = token.clone();
        // The worker's clones of the handle drop before it gives the gate back.
        let result = scope
            .run_blocking(move || {
                check_cancelled(&worker_token)?;
                let options = F::prepare(request, &defaults, auxiliary.as_ref())?;
                pipeline.run(options, &progress, &worker_token)
            })
            .await?;

        match result {
            Ok(_) if token.is_cancelled() => {
                log::info!("{}: execution cancelled after completion", F::NAME);
                Err(CoordinatorError::Cancelled)
            }
            Ok(output) => Ok(output),
            Err(e) if e.is_cancelled() => {
                log::info!("{}: execution cancelled", F::NAME);
                Err(CoordinatorError::Cancelled)
            }
            Err(e) => {
                log::warn!("{}: execution failed: {e}", F::NAME);
                Err(CoordinatorError::Execute(e))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Cancel / Unload
    // -----------------------------------------------------------------------

    /// Request cancellation of whichever scope is active right now.
    ///
    /// Returns `false` when nothing was running.
    pub fn cancel(&self) -> bool {
        let state = self.lock_state();
        match &state.active {
            Some(scope) if !scope.token.is_cancelled() => {
                log::info!("{}: cancelling {:?} scope {}", F::NAME, scope.kind, scope.id);
                scope.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel any active scope, then release the held pipeline.
    ///
    /// Idempotent.  A release failure is returned after the flags have
    /// already reached their unloaded state.
    pub async fn unload(&self) -> Result<(), CoordinatorError> {
        {
            let state = self.lock_state();
            if let Some(scope) = &state.active {
                scope.token.cancel();
            }
        }

        let gate = self.gate.clone().lock_owned().await;

        let loaded = {
            let mut state = self.lock_state();
            let loaded = state.loaded.take();
            self.publish(&state);
            loaded
        };
        self.progress.send_replace(ProgressUpdate::default());

        let Some(loaded) = loaded else {
            return Ok(());
        };
        log::info!("{}: unloading {}", F::NAME, loaded.selection.model.id);
        let released = tokio::task::spawn_blocking(move || {
            let result = release(loaded);
            drop(gate);
            result
        })
        .await?;
        released.map_err(|e| {
            log::error!("{}: unload failed: {e}", F::NAME);
            CoordinatorError::Release(e)
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState<F>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &CoordinatorState<F>) {
        let next = state.flags();
        self.flags.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Install a fresh scope of `kind`, publish the resulting flags and
    /// return the guard that ends it.
    ///
    /// The guard locks `state` when dropped, so callers must let go of
    /// `state` first.
    fn begin(&self, state: &mut CoordinatorState<F>, kind: ScopeKind) -> ScopeGuard<'_, F> {
        let id = self.next_scope.fetch_add(1, Ordering::Relaxed);
        let scope = ActiveScope::new(id, kind);
        let token = scope.token.clone();
        state.active = Some(scope);
        self.publish(state);
        self.progress.send_replace(ProgressUpdate::default());
        ScopeGuard {
            coordinator: self,
            id,
            token,
            gate: None,
        }
    }
}

impl<F: Feature> std::fmt::Debug for Coordinator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("feature", &F::NAME)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Blocking workers
// ---------------------------------------------------------------------------

/// Build and load the pipeline (and auxiliary) for `selection`.
///
/// Anything partially constructed is released before an error is returned.
/// Cancellation that lands after the last step is handled by the caller.
fn construct<F: Feature>(
    factory: &dyn PipelineFactory<F>,
    selection: PipelineSelection,
    provider: &ExecutionProvider,
    cancel: &CancellationToken,
) -> Result<LoadedPipeline<F>, PipelineError> {
    let mut pipeline = factory.create(&selection.model, provider)?;

    if let Err(e) = pipeline.load(cancel) {
        discard(pipeline.as_mut());
        return Err(e);
    }
    let defaults = pipeline.default_options();

    let auxiliary = match &selection.auxiliary {
        Some(model) => match factory.create_auxiliary(model, provider, cancel) {
            Ok(aux) => Some(aux),
            Err(e) => {
                discard(pipeline.as_mut());
                return Err(e);
            }
        },
        None => None,
    };

    Ok(LoadedPipeline {
        selection,
        pipeline: Arc::new(pipeline),
        defaults,
        auxiliary: auxiliary.map(Arc::new),
    })
}

fn discard<R: Resource + ?Sized>(resource: &mut R) {
    if let Err(e) = resource.unload() {
        log::warn!("coordinator: releasing partially loaded resource failed: {e}");
    }
}

/// Release the auxiliary then the pipeline, reporting the first failure.
fn release<F: Feature>(loaded: LoadedPipeline<F>) -> Result<(), PipelineError> {
    let LoadedPipeline {
        pipeline, auxiliary, ..
    } = loaded;
    let mut first_error = None;

    if let Some(aux) = auxiliary {
        let result = match Arc::try_unwrap(aux) {
            Ok(mut aux) => aux.unload(),
            Err(_) => Err(PipelineError::Release("auxiliary still in use".into())),
        };
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }

    let result = match Arc::try_unwrap(pipeline) {
        Ok(mut pipeline) => pipeline.unload(),
        Err(_) => Err(PipelineError::Release("pipeline still in use".into())),
    };
    if let Err(e) = result {
        first_error.get_or_insert(e);
    }

    first_error.map_or(Ok(()), Err)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
