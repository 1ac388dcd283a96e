//! Owned, fixed-geometry interpolator for Rust callers.
//!
//! Wraps a single [`EngineContext`] for frames of one size in packed BGR order
//! and returns freshly allocated output frames.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{BridgeConfig, EngineConfig};
use crate::context::EngineContext;
use crate::engine::EngineBackend;
use crate::error::{BridgeError, BridgeResult};
use crate::frame::{swap_red_blue, timesteps_for_multiplier, FrameShape, FrameView, FrameViewMut};

const BGR_CHANNELS: u32 = 3;

pub struct Interpolator {
    context: EngineContext,
    shape: FrameShape,
}

impl Interpolator {
    pub fn new(
        backend: &dyn EngineBackend,
        config: EngineConfig,
        width: u32,
        height: u32,
    ) -> BridgeResult<Self> {
        let shape = FrameShape::new(width, height, BGR_CHANNELS);
        shape.element_count()?;
        let context = EngineContext::create(backend, config)?;
        Ok(Self { context, shape })
    }

    /// Create from a loaded config file, loading its model when one is set.
    /// Relative model paths resolve against `config_dir`.
    pub fn from_config(
        backend: &dyn EngineBackend,
        config: &BridgeConfig,
        config_dir: &Path,
        width: u32,
        height: u32,
    ) -> BridgeResult<Self> {
        let mut interpolator = Self::new(backend, config.engine.clone(), width, height)?;
        if let Some(model_dir) = config.resolve_model_dir(config_dir) {
            interpolator.load_model(&model_dir)?;
        }
        Ok(interpolator)
    }

    /// Load the model after making the path absolute and checking it exists.
    pub fn load_model(&mut self, model_dir: &Path) -> BridgeResult<()> {
        let absolute = absolute_model_dir(model_dir)?;
        self.context.load(&absolute)?;
        info!(
            model_dir = %absolute.display(),
            width = self.shape.width,
            height = self.shape.height,
            "Interpolator ready"
        );
        Ok(())
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Interpolate two packed BGR frames of this interpolator's size.
    ///
    /// `timestep == 0.0` and `timestep == 1.0` return a copy of the matching
    /// input without running the engine.
    pub fn interpolate_bgr(
        &mut self,
        frame0: &[u8],
        frame1: &[u8],
        timestep: f32,
    ) -> BridgeResult<Vec<u8>> {
        if timestep == 0.0 {
            return Ok(frame0.to_vec());
        }
        if timestep == 1.0 {
            return Ok(frame1.to_vec());
        }

        let expected = self.shape.element_count()?;
        if frame0.len() != expected || frame1.len() != expected {
            return Err(BridgeError::InvalidFrame(format!(
                "expected {expected} bytes, got {} and {}",
                frame0.len(),
                frame1.len()
            )));
        }

        let mut out = vec![0u8; expected];
        self.interpolate_into(frame0, frame1, timestep, &mut out)?;
        Ok(out)
    }

    /// Same as [`interpolate_bgr`](Self::interpolate_bgr) for packed RGB input and output.
    pub fn interpolate_rgb(
        &mut self,
        frame0: &[u8],
        frame1: &[u8],
        timestep: f32,
    ) -> BridgeResult<Vec<u8>> {
        let mut bgr0 = frame0.to_vec();
        let mut bgr1 = frame1.to_vec();
        swap_red_blue(&mut bgr0, BGR_CHANNELS as usize);
        swap_red_blue(&mut bgr1, BGR_CHANNELS as usize);

        let mut out = self.interpolate_bgr(&bgr0, &bgr1, timestep)?;
        swap_red_blue(&mut out, BGR_CHANNELS as usize);
        Ok(out)
    }

    /// Write into a caller-owned buffer without allocating.
    pub fn interpolate_into(
        &mut self,
        frame0: &[u8],
        frame1: &[u8],
        timestep: f32,
        out: &mut [u8],
    ) -> BridgeResult<()> {
        let view0 = FrameView::new(frame0, self.shape)?;
        let view1 = FrameView::new(frame1, self.shape)?;
        let mut out_view = FrameViewMut::new(out, self.shape)?;
        self.context.interpolate(&view0, &view1, timestep, &mut out_view)
    }

    /// Intermediate frames between one pair for an N× frame-rate multiplier.
    pub fn interpolate_sequence(
        &mut self,
        frame0: &[u8],
        frame1: &[u8],
        multiplier: u32,
    ) -> BridgeResult<Vec<Vec<u8>>> {
        let steps = timesteps_for_multiplier(multiplier);
        debug!(multiplier, timesteps = steps.len(), "Interpolating frame sequence");
        steps
            .into_iter()
            .map(|t| self.interpolate_bgr(frame0, frame1, t))
            .collect()
    }
}

fn absolute_model_dir(model_dir: &Path) -> BridgeResult<PathBuf> {
    if model_dir.as_os_str().is_empty() {
        return Err(BridgeError::InvalidPath("model directory is empty".to_string()));
    }
    if !model_dir.exists() {
        return Err(BridgeError::ModelDirNotFound(model_dir.to_path_buf()));
    }
    model_dir
        .canonicalize()
        .map_err(|e| BridgeError::InvalidPath(format!("{}: {e}", model_dir.display())))
}
