use image::DynamicImage;

/// Decode an encoded image (PNG, JPEG, WebP, BMP, GIF) from memory.
pub fn decode_image(bytes: &[u8]) -> anyhow::Result<DynamicImage> {
    if bytes.is_empty() {
        anyhow::bail!("empty image payload");
    }

    let format = image::guess_format(bytes)
        .map_err(|e| anyhow::anyhow!("unrecognized image format: {}", e))?;

    tracing::trace!(format = ?format, bytes = bytes.len(), "Decoding image");

    let image = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| anyhow::anyhow!("failed to decode {:?} image: {}", format, e))?;

    if image.width() == 0 || image.height() == 0 {
        anyhow::bail!("image has no pixels ({}x{})", image.width(), image.height());
    }

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn decodes_png_and_jpeg() {
        let image = RgbImage::from_pixel(7, 3, image::Rgb([10, 20, 30]));

        for format in [ImageFormat::Png, ImageFormat::Jpeg] {
            let decoded = decode_image(&encode(&image, format)).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (7, 3));
        }
    }

    #[test]
    fn rejects_empty_and_garbage_payloads() {
        assert!(decode_image(&[]).is_err());
        assert!(decode_image(b"definitely not an image").is_err());
    }

    #[test]
    fn rejects_truncated_png() {
        let image = RgbImage::from_pixel(16, 16, image::Rgb([1, 2, 3]));
        let bytes = encode(&image, ImageFormat::Png);
        assert!(decode_image(&bytes[..bytes.len() / 2]).is_err());
    }
}
