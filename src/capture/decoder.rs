use std::path::Path;

use image::{ImageFormat, RgbaImage};

use crate::error::{Error, Result};

/// Read and decode an image file into tightly packed RGBA.
///
/// Both a missing file and an undecodable one make the source unavailable.
pub fn decode_file(path: &Path) -> Result<RgbaImage> {
    let image = image::open(path).map_err(|source| Error::SourceUnavailable {
        path: path.to_owned(),
        source,
    })?;
    Ok(image.into_rgba8())
}

/// Decode a JPEG bitstream into tightly packed RGBA.
pub fn decode_jpeg(data: &[u8]) -> Result<RgbaImage, image::ImageError> {
    let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
    Ok(image.into_rgba8())
}
