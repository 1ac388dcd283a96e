//! Seam between the boundary layer and the inference engine.
//!
//! The engine owns the network, the device bindings and all tensor math. This
//! layer only hands it well-formed requests and reads back an integer status.

use std::ffi::CString;
use std::fmt;
use std::path::Path;

use crate::config::EngineConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::frame::{FrameView, FrameViewMut};

/// Raw status reported by the engine. `0` is success; everything else is
/// engine-defined and never interpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineStatus(pub i32);

impl EngineStatus {
    pub const OK: EngineStatus = EngineStatus(0);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    pub fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One configured engine instance with its own device state.
///
/// Implementations are not required to be internally synchronized; callers
/// guarantee at most one in-flight call per instance.
pub trait InferenceEngine: Send {
    fn load(&mut self, model_dir: &Path) -> EngineStatus;

    fn process(
        &mut self,
        frame0: &FrameView<'_>,
        frame1: &FrameView<'_>,
        timestep: f32,
        out: &mut FrameViewMut<'_>,
    ) -> EngineStatus;
}

/// Factory for engine instances plus the device query that needs no instance.
pub trait EngineBackend: Send + Sync {
    fn name(&self) -> &str;

    /// `None` when the engine refuses the configuration or runs out of resources.
    fn create(&self, config: &EngineConfig) -> Option<Box<dyn InferenceEngine>>;

    fn gpu_count(&self) -> i32;
}

/// Model directory as the NUL-terminated string native engines take.
///
/// Unix paths are passed as their raw bytes, whether or not they are UTF-8.
/// Elsewhere the path must be valid UTF-8. Interior NUL bytes are rejected.
pub fn model_dir_c_string(model_dir: &Path) -> BridgeResult<CString> {
    #[cfg(unix)]
    let bytes = {
        use std::os::unix::ffi::OsStrExt;
        model_dir.as_os_str().as_bytes().to_vec()
    };
    #[cfg(not(unix))]
    let bytes = model_dir
        .to_str()
        .ok_or_else(|| {
            BridgeError::InvalidPath(format!("{} is not valid UTF-8", model_dir.display()))
        })?
        .as_bytes()
        .to_vec();

    CString::new(bytes).map_err(|_| {
        BridgeError::InvalidPath(format!("{} contains a NUL byte", model_dir.display()))
    })
}
