//! Frame interpolation gateway: the per-call contract on a loaded context.

use std::time::Instant;

use tracing::{debug, warn};

use crate::context::EngineContext;
use crate::error::{BridgeError, BridgeResult};
use crate::frame::{FrameView, FrameViewMut};

impl EngineContext {
    /// Synthesize the frame at `timestep` between `frame0` (t = 0) and
    /// `frame1` (t = 1), writing it into `out`.
    ///
    /// All three buffers must share one shape. `timestep` is forwarded as-is,
    /// including values outside `[0, 1]`. Nothing is allocated or retained past
    /// the call.
    pub fn interpolate(
        &mut self,
        frame0: &FrameView<'_>,
        frame1: &FrameView<'_>,
        timestep: f32,
        out: &mut FrameViewMut<'_>,
    ) -> BridgeResult<()> {
        if !self.is_model_loaded() {
            return Err(BridgeError::ModelNotLoaded);
        }

        let shape = frame0.shape();
        shape.ensure_same(&frame1.shape())?;
        shape.ensure_same(&out.shape())?;

        let started = Instant::now();
        let status = self.engine.process(frame0, frame1, timestep, out);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        if !status.is_success() {
            warn!(
                status = status.code(),
                %shape,
                timestep,
                "Frame interpolation failed"
            );
            return Err(BridgeError::Engine {
                status: status.code(),
            });
        }

        debug!(
            %shape,
            timestep,
            elapsed_ms = format!("{elapsed_ms:.1}"),
            "RIFE pair interpolated"
        );
        Ok(())
    }
}
