pub mod config;
pub mod cpu;
pub mod frame;

use ndarray::{Array, IxDyn};

pub use config::{DEFAULT_INPUT_SIZE, Normalization, ResizePolicy};
pub use cpu::CpuPreProcessor;
pub use frame::{Frame, PixelFormat};

/// Geometry of the frame-to-input mapping, used to express boxes predicted in
/// normalized input space in normalized frame space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTransform {
    /// Side of the square model input, in pixels
    pub input_size: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Horizontal scale from frame pixels to input pixels
    pub scale_x: f32,
    /// Vertical scale from frame pixels to input pixels
    pub scale_y: f32,
    /// Padding on the left edge of the input, in input pixels
    pub offset_x: f32,
    /// Padding on the top edge of the input, in input pixels
    pub offset_y: f32,
}

impl FrameTransform {
    /// Identity mapping, as produced by [`ResizePolicy::Stretch`].
    pub fn stretch(input_size: u32, frame_width: u32, frame_height: u32) -> Self {
        Self {
            input_size,
            frame_width,
            frame_height,
            scale_x: input_size as f32 / frame_width as f32,
            scale_y: input_size as f32 / frame_height as f32,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    /// Map a normalized input-space point to a normalized frame-space point.
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        let size = self.input_size as f32;
        let fx = (x * size - self.offset_x) / self.scale_x / self.frame_width as f32;
        let fy = (y * size - self.offset_y) / self.scale_y / self.frame_height as f32;
        (fx, fy)
    }

    /// True when normalized input coordinates already equal frame coordinates.
    pub fn is_identity(&self) -> bool {
        let size = self.input_size as f32;
        self.offset_x == 0.0
            && self.offset_y == 0.0
            && (self.scale_x * self.frame_width as f32 - size).abs() < 1e-3
            && (self.scale_y * self.frame_height as f32 - size).abs() < 1e-3
    }
}

/// Result of preprocessing including transformation parameters
#[derive(Debug)]
pub struct PreprocessResult {
    /// NCHW tensor `[1, 3, size, size]`
    pub tensor: Array<f32, IxDyn>,
    pub transform: FrameTransform,
}

/// Trait for image preprocessing implementations
pub trait Preprocess {
    /// Convert a raw frame into the fixed-size square tensor the model expects.
    fn preprocess(&mut self, frame: &Frame) -> anyhow::Result<PreprocessResult>;

    /// Side of the square input this preprocessor targets
    fn input_size(&self) -> u32;
}
