//! JPEG thumbnails for image attachments.

use std::io::Cursor;

use image::ImageFormat;

pub const DEFAULT_SIZE: u32 = 320;
pub const MAX_SIZE: u32 = 1024;

/// Decode `bytes` and re-encode as a JPEG whose longest side is `size`,
/// preserving aspect ratio. Never upscales.
pub fn render(bytes: &[u8], size: u32) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let size = size.clamp(1, MAX_SIZE);
    let thumb = if img.width() > size || img.height() > size {
        img.thumbnail(size, size)
    } else {
        img
    };

    let mut out = Cursor::new(Vec::new());
    thumb.to_rgb8().write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}
