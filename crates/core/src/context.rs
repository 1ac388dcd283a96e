//! Context lifecycle: creation, model loading, destruction, and the handle table.
//!
//! An [`EngineContext`] is the single owner of one engine instance. Dropping it
//! releases every engine resource. [`ContextRegistry`] hands out opaque handles
//! for boundary callers; ids are never reused, so a destroyed handle can never
//! alias a newer context.

use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::{model_dir_c_string, EngineBackend, InferenceEngine};
use crate::error::{BridgeError, BridgeResult};
use crate::frame::{FrameView, FrameViewMut};

/// Lifecycle state of a live context. Destroyed contexts no longer exist, so
/// there is no variant for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Configured,
    ModelLoaded,
}

/// One configured engine instance and the model bound to it.
pub struct EngineContext {
    pub(crate) engine: Box<dyn InferenceEngine>,
    config: EngineConfig,
    state: ContextState,
    model_dir: Option<PathBuf>,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("model_dir", &self.model_dir)
            .finish_non_exhaustive()
    }
}

impl EngineContext {
    /// Ask `backend` for an engine bound to `config`. Thread count and device
    /// index are forwarded untouched; the engine decides whether they are usable.
    pub fn create(backend: &dyn EngineBackend, config: EngineConfig) -> BridgeResult<Self> {
        let engine = backend.create(&config).ok_or_else(|| {
            warn!(
                backend = backend.name(),
                gpu_id = config.gpu_id,
                "Inference engine refused configuration"
            );
            BridgeError::CreateFailed
        })?;

        debug!(
            backend = backend.name(),
            accelerator = ?config.accelerator(),
            tta = config.tta_mode,
            tta_temporal = config.tta_temporal_mode,
            uhd = config.uhd_mode,
            num_threads = config.num_threads,
            rife_v2 = config.rife_v2,
            rife_v4 = config.rife_v4,
            padding = config.padding,
            "Engine context created"
        );

        Ok(Self::from_engine(engine, config))
    }

    /// Wrap an already constructed engine.
    pub fn from_engine(engine: Box<dyn InferenceEngine>, config: EngineConfig) -> Self {
        Self {
            engine,
            config,
            state: ContextState::Configured,
            model_dir: None,
        }
    }

    /// Bind the model in `model_dir`. The engine's status is returned as
    /// [`BridgeError::Engine`] on failure, and the context falls back to
    /// `Configured`.
    pub fn load(&mut self, model_dir: &Path) -> BridgeResult<()> {
        if model_dir.as_os_str().is_empty() {
            return Err(BridgeError::InvalidPath("model directory is empty".to_string()));
        }
        model_dir_c_string(model_dir)?;

        let started = Instant::now();
        let status = self.engine.load(model_dir);
        if !status.is_success() {
            self.state = ContextState::Configured;
            self.model_dir = None;
            warn!(
                model_dir = %model_dir.display(),
                status = status.code(),
                "Model load failed"
            );
            return Err(BridgeError::Engine {
                status: status.code(),
            });
        }

        self.state = ContextState::ModelLoaded;
        self.model_dir = Some(model_dir.to_path_buf());
        info!(
            model_dir = %model_dir.display(),
            elapsed_ms = format!("{:.1}", started.elapsed().as_secs_f64() * 1000.0),
            "Model loaded"
        );
        Ok(())
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_model_loaded(&self) -> bool {
        self.state == ContextState::ModelLoaded
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn model_dir(&self) -> Option<&Path> {
        self.model_dir.as_deref()
    }
}

/// Opaque, never-zero context id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(NonZeroU64);

impl ContextHandle {
    /// `None` for the reserved invalid value 0.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn as_raw(self) -> u64 {
        self.0.get()
    }
}

/// Handle table for boundary callers.
///
/// Each context sits behind its own mutex, which serializes calls on one
/// handle. Destroying a handle while a call is running removes it from the
/// table immediately; the engine is released when that call returns.
pub struct ContextRegistry {
    backend: Arc<dyn EngineBackend>,
    contexts: DashMap<u64, Arc<Mutex<EngineContext>>>,
    next_id: AtomicU64,
}

impl ContextRegistry {
    pub fn new(backend: Arc<dyn EngineBackend>) -> Self {
        Self {
            backend,
            contexts: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn backend(&self) -> &Arc<dyn EngineBackend> {
        &self.backend
    }

    /// Create a context; `None` means the engine could not be constructed.
    pub fn create(&self, config: EngineConfig) -> Option<ContextHandle> {
        let context = EngineContext::create(self.backend.as_ref(), config).ok()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = ContextHandle::from_raw(id)?;
        self.contexts.insert(id, Arc::new(Mutex::new(context)));
        info!(handle = id, live = self.contexts.len(), "Context created");
        Some(handle)
    }

    pub fn load(&self, handle: ContextHandle, model_dir: &Path) -> BridgeResult<()> {
        let context = self.lookup(handle)?;
        let mut guard = lock_context(&context);
        guard.load(model_dir)
    }

    pub fn interpolate(
        &self,
        handle: ContextHandle,
        frame0: &FrameView<'_>,
        frame1: &FrameView<'_>,
        timestep: f32,
        out: &mut FrameViewMut<'_>,
    ) -> BridgeResult<()> {
        let context = self.lookup(handle)?;
        let mut guard = lock_context(&context);
        guard.interpolate(frame0, frame1, timestep, out)
    }

    /// Run `f` with exclusive access to the context behind `handle`.
    pub fn with_context<T>(
        &self,
        handle: ContextHandle,
        f: impl FnOnce(&mut EngineContext) -> T,
    ) -> BridgeResult<T> {
        let context = self.lookup(handle)?;
        let mut guard = lock_context(&context);
        Ok(f(&mut guard))
    }

    /// Release the context. Returns `false` when the handle was unknown or
    /// already destroyed, in which case nothing happens.
    pub fn destroy(&self, handle: ContextHandle) -> bool {
        match self.contexts.remove(&handle.as_raw()) {
            Some((id, context)) => {
                drop(context);
                info!(handle = id, live = self.contexts.len(), "Context destroyed");
                true
            }
            None => {
                debug!(handle = handle.as_raw(), "Destroy on unknown handle ignored");
                false
            }
        }
    }

    pub fn is_live(&self, handle: ContextHandle) -> bool {
        self.contexts.contains_key(&handle.as_raw())
    }

    pub fn live_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Accelerator count, independent of any context.
    pub fn gpu_count(&self) -> i32 {
        self.backend.gpu_count().max(0)
    }

    fn lookup(&self, handle: ContextHandle) -> BridgeResult<Arc<Mutex<EngineContext>>> {
        self.contexts
            .get(&handle.as_raw())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(BridgeError::InvalidHandle)
    }
}

fn lock_context(context: &Mutex<EngineContext>) -> MutexGuard<'_, EngineContext> {
    context
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
