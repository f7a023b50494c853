use crate::error::CaptionResult;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, GenericImageView};

#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub width: u32,
    pub height: u32,
    /// `data:image/jpeg;base64,...`
    pub data_url: String,
}

/// Shrink an image so its longest side is at most `max_size`, keeping the aspect ratio,
/// and re-encode it as a JPEG data URL. Smaller images are never scaled up.
pub fn prepare_remote_image(bytes: &[u8], max_size: u32, quality: u8) -> CaptionResult<PreparedImage> {
    let image = image::load_from_memory(bytes)?;
    let (width, height) = image.dimensions();

    let image = if width.max(height) > max_size {
        image.resize(max_size, max_size, FilterType::Lanczos3)
    } else {
        image
    };

    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(&rgb)?;

    tracing::debug!(
        "prepared remote image {}x{} -> {}x{}, {} bytes",
        width,
        height,
        rgb.width(),
        rgb.height(),
        buffer.len()
    );

    Ok(PreparedImage {
        width: rgb.width(),
        height: rgb.height(),
        data_url: format!("data:image/jpeg;base64,{}", STANDARD.encode(&buffer)),
    })
}

#[cfg(test)]
pub(crate) fn encode_test_png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_downscales_longest_side() {
        let prepared = prepare_remote_image(&encode_test_png(800, 400), 384, 85).unwrap();
        assert_eq!((prepared.width, prepared.height), (384, 192));
        assert!(prepared.data_url.starts_with("data:image/jpeg;base64,"));

        let prepared = prepare_remote_image(&encode_test_png(300, 900), 384, 85).unwrap();
        assert_eq!((prepared.width, prepared.height), (128, 384));
    }

    #[test]
    fn test_never_upscales() {
        let prepared = prepare_remote_image(&encode_test_png(100, 50), 384, 85).unwrap();
        assert_eq!((prepared.width, prepared.height), (100, 50));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(prepare_remote_image(b"not an image", 384, 85).is_err());
    }
}
