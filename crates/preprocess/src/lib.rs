pub mod config;
pub mod cpu;
pub mod decode;

use ndarray::{Array, IxDyn};

pub use config::{DEFAULT_INPUT_SIZE, Normalization, PreprocessConfig, ResizeMode, TensorLayout};
pub use cpu::CpuPreProcessor;
pub use decode::decode_image;

/// Trait for image preprocessing implementations
pub trait Preprocess {
    /// Turn an RGB image into a model input batch of size 1
    ///
    /// # Arguments
    /// * `pixels` - RGB pixel data in HWC format
    /// * `width` - Image width
    /// * `height` - Image height
    fn preprocess(&self, pixels: &[u8], width: u32, height: u32)
    -> anyhow::Result<Array<f32, IxDyn>>;

    /// Shape of the tensors produced by [`Preprocess::preprocess`]
    fn input_shape(&self) -> Vec<usize>;
}
