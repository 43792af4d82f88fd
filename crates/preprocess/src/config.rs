use std::{fmt, str::FromStr};

/// Resolution of the residue classifier the service ships with.
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (180, 180);

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How `u8` channel values are mapped to the float range a model was trained on.
///
/// This cannot be read back from a model file. A mismatch does not fail, it
/// just degrades predictions, so every deployment has to state its convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    /// `[0, 1]`: `v / 255`
    #[default]
    Unit,
    /// `[-1, 1]`: `v / 127.5 - 1`
    Symmetric,
    /// `(v / 255 - mean) / std` with the ImageNet statistics
    ImageNet,
}

impl Normalization {
    #[inline]
    pub fn apply(&self, value: u8, channel: usize) -> f32 {
        let v = value as f32;
        match self {
            Normalization::Unit => v / 255.0,
            Normalization::Symmetric => v / 127.5 - 1.0,
            Normalization::ImageNet => (v / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Normalization::Unit => "unit",
            Normalization::Symmetric => "symmetric",
            Normalization::ImageNet => "imagenet",
        }
    }
}

impl FromStr for Normalization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unit" | "0_1" | "[0,1]" => Ok(Self::Unit),
            "symmetric" | "-1_1" | "[-1,1]" => Ok(Self::Symmetric),
            "imagenet" => Ok(Self::ImageNet),
            other => Err(format!(
                "{} is not a supported normalization. Use `unit`, `symmetric` or `imagenet`.",
                other
            )),
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory layout of the input batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// `[1, H, W, 3]`, what Keras/TensorFlow exports expect
    #[default]
    Nhwc,
    /// `[1, 3, H, W]`, what PyTorch exports expect
    Nchw,
}

impl TensorLayout {
    pub fn shape(&self, width: u32, height: u32) -> [usize; 4] {
        let (w, h) = (width as usize, height as usize);
        match self {
            TensorLayout::Nhwc => [1, h, w, 3],
            TensorLayout::Nchw => [1, 3, h, w],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TensorLayout::Nhwc => "nhwc",
            TensorLayout::Nchw => "nchw",
        }
    }
}

impl FromStr for TensorLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nhwc" => Ok(Self::Nhwc),
            "nchw" => Ok(Self::Nchw),
            other => Err(format!(
                "{} is not a supported tensor layout. Use `nhwc` or `nchw`.",
                other
            )),
        }
    }
}

impl fmt::Display for TensorLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an image whose aspect ratio differs from the model input is brought
/// to the model resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
    /// Resample the whole image, distorting its aspect ratio
    #[default]
    Stretch,
    /// Keep the largest centered region with the target aspect ratio, then resample
    CenterCrop,
}

impl ResizeMode {
    /// Source region `(left, top, width, height)` that is resampled for a
    /// `width`x`height` image.
    pub fn source_region(
        &self,
        width: u32,
        height: u32,
        target: (u32, u32),
    ) -> (f64, f64, f64, f64) {
        let (w, h) = (width as f64, height as f64);
        match self {
            ResizeMode::Stretch => (0.0, 0.0, w, h),
            ResizeMode::CenterCrop => {
                let target_aspect = target.0 as f64 / target.1 as f64;
                if w / h > target_aspect {
                    let crop_width = h * target_aspect;
                    ((w - crop_width) / 2.0, 0.0, crop_width, h)
                } else {
                    let crop_height = w / target_aspect;
                    (0.0, (h - crop_height) / 2.0, w, crop_height)
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResizeMode::Stretch => "stretch",
            ResizeMode::CenterCrop => "center_crop",
        }
    }
}

impl FromStr for ResizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stretch" => Ok(Self::Stretch),
            "center_crop" | "center-crop" | "fit" => Ok(Self::CenterCrop),
            other => Err(format!(
                "{} is not a supported resize mode. Use `stretch` or `center_crop`.",
                other
            )),
        }
    }
}

impl fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessConfig {
    /// Target (width, height); bound to the model artifact, not interchangeable
    pub input_size: (u32, u32),
    pub resize: ResizeMode,
    pub normalization: Normalization,
    pub layout: TensorLayout,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            resize: ResizeMode::default(),
            normalization: Normalization::default(),
            layout: TensorLayout::default(),
        }
    }
}
