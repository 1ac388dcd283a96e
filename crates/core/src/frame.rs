//! Borrowed pixel buffers passed to the engine for a single call.
//!
//! Buffers are contiguous, row-major, with `channels` interleaved bytes per pixel.
//! Nothing here owns pixel memory; views live exactly as long as the borrow they wrap.

use std::fmt;

use crate::error::{BridgeError, BridgeResult};

/// Declared geometry of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl FrameShape {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Packed BGR, the layout the engine expects by default.
    pub fn bgr(width: u32, height: u32) -> Self {
        Self::new(width, height, 3)
    }

    /// Build from the signed integers used at the C boundary.
    pub fn from_raw(width: i32, height: i32, channels: i32) -> BridgeResult<Self> {
        if width <= 0 || height <= 0 || channels <= 0 {
            return Err(BridgeError::InvalidFrame(format!(
                "dimensions must be positive, got {width}x{height}x{channels}"
            )));
        }
        let shape = Self::new(width as u32, height as u32, channels as u32);
        shape.element_count()?;
        Ok(shape)
    }

    /// `width * height * channels`, rejecting empty shapes and overflow.
    pub fn element_count(&self) -> BridgeResult<usize> {
        if self.width == 0 || self.height == 0 || self.channels == 0 {
            return Err(BridgeError::InvalidFrame(format!("empty frame shape {self}")));
        }
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|n| n.checked_mul(self.channels as usize))
            .filter(|n| *n <= isize::MAX as usize)
            .ok_or_else(|| BridgeError::InvalidFrame(format!("frame shape {self} overflows")))
    }

    pub(crate) fn ensure_same(&self, other: &FrameShape) -> BridgeResult<()> {
        if self != other {
            return Err(BridgeError::ShapeMismatch {
                left: self.to_string(),
                right: other.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// Read-only input frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    data: &'a [u8],
    shape: FrameShape,
}

impl<'a> FrameView<'a> {
    pub fn new(data: &'a [u8], shape: FrameShape) -> BridgeResult<Self> {
        check_len(data.len(), &shape)?;
        Ok(Self { data, shape })
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }
}

/// Caller-allocated output frame; written in place, never resized.
#[derive(Debug)]
pub struct FrameViewMut<'a> {
    data: &'a mut [u8],
    shape: FrameShape,
}

impl<'a> FrameViewMut<'a> {
    pub fn new(data: &'a mut [u8], shape: FrameShape) -> BridgeResult<Self> {
        check_len(data.len(), &shape)?;
        Ok(Self { data, shape })
    }

    pub fn data(&self) -> &[u8] {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }
}

fn check_len(len: usize, shape: &FrameShape) -> BridgeResult<()> {
    let expected = shape.element_count()?;
    if len != expected {
        return Err(BridgeError::InvalidFrame(format!(
            "buffer holds {len} bytes, shape {shape} needs {expected}"
        )));
    }
    Ok(())
}

/// Swap the first and third channel of every pixel in place (RGB <-> BGR).
///
/// Buffers with fewer than three channels are left untouched.
pub fn swap_red_blue(data: &mut [u8], channels: usize) {
    if channels < 3 {
        return;
    }
    for pixel in data.chunks_exact_mut(channels) {
        pixel.swap(0, 2);
    }
}

/// Timesteps of the intermediate frames for an N× frame-rate multiplier.
///
/// 2× → `[0.5]`; 4× → `[0.25, 0.5, 0.75]`.
pub fn timesteps_for_multiplier(multiplier: u32) -> Vec<f32> {
    let n = multiplier as usize;
    (1..n).map(|i| i as f32 / n as f32).collect()
}
