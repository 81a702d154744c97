use base64::{Engine as _, engine::general_purpose};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageResult};

// Same default quality PIL uses when saving JPEG.
const JPEG_QUALITY: u8 = 75;

/// Decodes an upload, sniffing the format from its content.
pub fn decode(bytes: &[u8]) -> ImageResult<DynamicImage> {
    image::load_from_memory(bytes)
}

/// Re-encodes the image as a baseline JPEG and returns it base64 encoded.
/// Alpha is dropped since JPEG cannot carry it.
pub fn to_base64_jpeg(image: &DynamicImage) -> ImageResult<String> {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut jpeg = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY))?;
    Ok(general_purpose::STANDARD.encode(&jpeg))
}
