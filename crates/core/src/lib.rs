//! Safe Rust boundary over the RIFE ncnn-vulkan frame interpolation engine.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod interpolator;
pub mod logging;
pub mod ncnn;

pub use config::{BridgeConfig, EngineConfig};
pub use context::{ContextHandle, ContextRegistry, ContextState, EngineContext};
pub use engine::{EngineBackend, EngineStatus, InferenceEngine};
pub use error::{BridgeError, BridgeResult};
pub use frame::{FrameShape, FrameView, FrameViewMut};
pub use interpolator::Interpolator;
