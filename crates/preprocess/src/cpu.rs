use crate::{Preprocess, PreprocessConfig, ResizeMode};
use common::span;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use image::DynamicImage;
use ndarray::{Array, IxDyn};

/// Stateless CPU preprocessor: optional center crop, Lanczos3 resize to the
/// model resolution, per-channel normalization and batch-of-one layout.
///
/// Holds no scratch buffers so a single instance can be shared between
/// concurrent requests.
#[derive(Debug, Clone, Default)]
pub struct CpuPreProcessor {
    config: PreprocessConfig,
}

impl CpuPreProcessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Preprocess a decoded image of any color type; alpha is dropped.
    pub fn preprocess_image(&self, image: &DynamicImage) -> anyhow::Result<Array<f32, IxDyn>> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        self.preprocess(rgb.as_raw(), width, height)
    }

    fn resize(&self, pixels: &[u8], width: u32, height: u32) -> anyhow::Result<Image<'static>> {
        let _s = span!("resize");

        let (target_width, target_height) = self.config.input_size;
        let src = ImageRef::new(width, height, pixels, PixelType::U8x3)?;
        let mut resized = Image::new(target_width, target_height, PixelType::U8x3);

        let mut options =
            ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Lanczos3));
        if self.config.resize == ResizeMode::CenterCrop {
            let (left, top, crop_width, crop_height) =
                self.config
                    .resize
                    .source_region(width, height, self.config.input_size);
            options = options.crop(left, top, crop_width, crop_height);
        }

        Resizer::new().resize(&src, &mut resized, &options)?;

        Ok(resized)
    }

    fn normalize(&self, image: &Image) -> anyhow::Result<Array<f32, IxDyn>> {
        let _s = span!("normalize");

        let width = image.width();
        let height = image.height();
        let spatial = (width * height) as usize;
        let normalization = self.config.normalization;

        let mut output = vec![0.0f32; 3 * spatial];

        for (i, px) in image.buffer().chunks_exact(3).enumerate() {
            for (c, &value) in px.iter().enumerate() {
                let idx = match self.config.layout {
                    crate::TensorLayout::Nhwc => i * 3 + c,
                    crate::TensorLayout::Nchw => c * spatial + i,
                };
                output[idx] = normalization.apply(value, c);
            }
        }

        Ok(Array::from_shape_vec(
            IxDyn(&self.config.layout.shape(width, height)),
            output,
        )?)
    }
}

impl Preprocess for CpuPreProcessor {
    fn preprocess(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> anyhow::Result<Array<f32, IxDyn>> {
        let _s = span!("preprocess_image");

        tracing::trace!(
            width,
            height,
            pixel_bytes = pixels.len(),
            "Preprocessing image dimensions"
        );

        if width == 0 || height == 0 {
            anyhow::bail!("Cannot resize an empty image ({}x{})", width, height);
        }

        let expected_size = width as usize * height as usize * 3;
        if pixels.len() != expected_size {
            anyhow::bail!(
                "Buffer size mismatch: expected {}, got {} bytes",
                expected_size,
                pixels.len()
            );
        }

        let resized = self.resize(pixels, width, height)?;
        self.normalize(&resized)
    }

    fn input_shape(&self) -> Vec<usize> {
        let (width, height) = self.config.input_size;
        self.config.layout.shape(width, height).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Normalization, TensorLayout};
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn preprocessor(
        input_size: (u32, u32),
        normalization: Normalization,
        layout: TensorLayout,
    ) -> CpuPreProcessor {
        CpuPreProcessor::new(PreprocessConfig {
            input_size,
            resize: ResizeMode::Stretch,
            normalization,
            layout,
        })
    }

    /// 448x224 image: red in x < 112, green in 112 <= x < 336, blue beyond.
    fn banded_image() -> RgbImage {
        RgbImage::from_fn(448, 224, |x, _| match x {
            0..112 => Rgb([255, 0, 0]),
            112..336 => Rgb([0, 255, 0]),
            _ => Rgb([0, 0, 255]),
        })
    }

    #[test]
    fn test_any_input_size_yields_model_resolution() {
        let preprocessor = CpuPreProcessor::default();

        for (width, height) in [(1, 1), (2, 2), (37, 501), (640, 480), (180, 180), (1920, 1080)] {
            let pixels = vec![128u8; (width * height * 3) as usize];
            let output = preprocessor.preprocess(&pixels, width, height).unwrap();
            assert_eq!(
                output.shape(),
                &[1, 180, 180, 3],
                "{}x{} should resize to 180x180",
                width,
                height
            );
        }
    }

    #[test]
    fn test_nchw_shape_for_224_model() {
        let preprocessor = preprocessor((224, 224), Normalization::Symmetric, TensorLayout::Nchw);
        let pixels = vec![0u8; 300 * 200 * 3];

        let output = preprocessor.preprocess(&pixels, 300, 200).unwrap();

        assert_eq!(output.shape(), &[1, 3, 224, 224]);
        assert_eq!(preprocessor.input_shape(), vec![1, 3, 224, 224]);
    }

    #[test]
    fn test_center_crop_discards_outer_columns() {
        let image = banded_image();
        let preprocessor = CpuPreProcessor::new(PreprocessConfig {
            input_size: (224, 224),
            resize: ResizeMode::CenterCrop,
            normalization: Normalization::Unit,
            layout: TensorLayout::Nhwc,
        });

        let output = preprocessor.preprocess(image.as_raw(), 448, 224).unwrap();

        assert_eq!(output.shape(), &[1, 224, 224, 3]);
        for y in [0, 100, 223] {
            for x in [0, 1, 112, 222, 223] {
                assert!(output[[0, y, x, 0]].abs() < 2e-2, "red leaked at ({}, {})", x, y);
                assert!((output[[0, y, x, 1]] - 1.0).abs() < 2e-2, "not green at ({}, {})", x, y);
                assert!(output[[0, y, x, 2]].abs() < 2e-2, "blue leaked at ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_stretch_keeps_outer_columns() {
        let image = banded_image();

        let output = preprocessor((224, 224), Normalization::Unit, TensorLayout::Nhwc)
            .preprocess(image.as_raw(), 448, 224)
            .unwrap();

        assert!((output[[0, 10, 0, 0]] - 1.0).abs() < 2e-2);
        assert!(output[[0, 10, 0, 1]].abs() < 2e-2);
        assert!((output[[0, 10, 223, 2]] - 1.0).abs() < 2e-2);
    }

    #[test]
    fn test_buffer_size_mismatch_detection() {
        let pixels = vec![0u8; 200]; // Wrong size for 10x10

        let result = CpuPreProcessor::default().preprocess(&pixels, 10, 10);

        assert!(result.is_err(), "Size mismatch should return error");
        assert!(
            result.unwrap_err().to_string().contains("mismatch"),
            "Error should mention mismatch"
        );
    }

    #[test]
    fn test_empty_image_is_rejected() {
        assert!(CpuPreProcessor::default().preprocess(&[], 0, 0).is_err());
        assert!(CpuPreProcessor::default().preprocess(&[], 0, 12).is_err());
    }

    #[test]
    fn test_unit_and_symmetric_ranges() {
        let black = RgbImage::from_pixel(50, 40, Rgb([0, 0, 0]));
        let white = RgbImage::from_pixel(50, 40, Rgb([255, 255, 255]));

        let unit = preprocessor((16, 16), Normalization::Unit, TensorLayout::Nhwc);
        let symmetric = preprocessor((16, 16), Normalization::Symmetric, TensorLayout::Nhwc);

        let cases = [
            (&unit, &black, 0.0),
            (&unit, &white, 1.0),
            (&symmetric, &black, -1.0),
            (&symmetric, &white, 1.0),
        ];

        for (preprocessor, image, expected) in cases {
            let output = preprocessor
                .preprocess(image.as_raw(), image.width(), image.height())
                .unwrap();
            assert!(
                output.iter().all(|v| (v - expected).abs() < 2e-2),
                "every value should be {}",
                expected
            );
        }
    }

    #[test]
    fn test_channel_placement_per_layout() {
        // Uniform image so the resize cannot mix channels
        let image = RgbImage::from_pixel(9, 5, Rgb([255, 0, 51]));

        let nhwc = preprocessor((4, 3), Normalization::Unit, TensorLayout::Nhwc)
            .preprocess(image.as_raw(), 9, 5)
            .unwrap();
        let nchw = preprocessor((4, 3), Normalization::Unit, TensorLayout::Nchw)
            .preprocess(image.as_raw(), 9, 5)
            .unwrap();

        assert_eq!(nhwc.shape(), &[1, 3, 4, 3]);
        assert_eq!(nchw.shape(), &[1, 3, 3, 4]);

        for (y, x) in [(0, 0), (2, 3), (1, 2)] {
            assert!((nhwc[[0, y, x, 0]] - 1.0).abs() < 1e-2);
            assert!(nhwc[[0, y, x, 1]].abs() < 1e-2);
            assert!((nhwc[[0, y, x, 2]] - 0.2).abs() < 1e-2);

            assert!((nchw[[0, 0, y, x]] - 1.0).abs() < 1e-2);
            assert!(nchw[[0, 1, y, x]].abs() < 1e-2);
            assert!((nchw[[0, 2, y, x]] - 0.2).abs() < 1e-2);
        }
    }

    #[test]
    fn test_alpha_channel_is_dropped() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 3, Rgba([255, 255, 255, 0])));

        let output = CpuPreProcessor::default().preprocess_image(&image).unwrap();

        assert_eq!(output.shape(), &[1, 180, 180, 3]);
        assert!(output.iter().all(|v| (v - 1.0).abs() < 2e-2));
    }

    #[test]
    fn test_preprocessing_is_deterministic() {
        let mut pixels = vec![0u8; 33 * 21 * 3];
        for (i, p) in pixels.iter_mut().enumerate() {
            *p = (i * 7 % 256) as u8;
        }

        let preprocessor = CpuPreProcessor::default();
        let a = preprocessor.preprocess(&pixels, 33, 21).unwrap();
        let b = preprocessor.preprocess(&pixels, 33, 21).unwrap();

        assert_eq!(a, b);
    }
}
