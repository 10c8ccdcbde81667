//! Alpha compositing of matted frames over a replacement background.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage, RgbaImage};

use crate::error::{MediaError, MediaResult};

/// Load the background image from disk.
pub fn load_background(path: impl AsRef<Path>) -> MediaResult<DynamicImage> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    image::open(path).map_err(|e| {
        MediaError::InvalidImage(format!(
            "Could not load background image {}: {}",
            path.display(),
            e
        ))
    })
}

/// Resize the background to the frame size (bilinear), dropping any alpha.
pub fn fit_background(background: &DynamicImage, width: u32, height: u32) -> RgbImage {
    if background.width() == width && background.height() == height {
        return background.to_rgb8();
    }
    background
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8()
}

/// Convert a matting result to RGBA; images without alpha become fully opaque.
pub fn ensure_alpha(image: DynamicImage) -> RgbaImage {
    match image {
        DynamicImage::ImageRgba8(rgba) => rgba,
        other => other.to_rgba8(),
    }
}

/// Blend `foreground` over `background`:
/// `out = round(fg * a + bg * (1 - a))` per channel, with `a = alpha / 255`.
pub fn composite_frame(foreground: &RgbaImage, background: &RgbImage) -> MediaResult<RgbImage> {
    if foreground.dimensions() != background.dimensions() {
        return Err(MediaError::DimensionMismatch {
            expected: background.dimensions(),
            actual: foreground.dimensions(),
        });
    }

    let (width, height) = background.dimensions();
    let mut out = RgbImage::new(width, height);

    for ((dst, fg), bg) in out
        .pixels_mut()
        .zip(foreground.pixels())
        .zip(background.pixels())
    {
        let a = fg.0[3] as f32 / 255.0;
        for c in 0..3 {
            dst.0[c] = blend_channel(fg.0[c], bg.0[c], a);
        }
    }

    Ok(out)
}

#[inline]
fn blend_channel(fg: u8, bg: u8, a: f32) -> u8 {
    (fg as f32 * a + bg as f32 * (1.0 - a)).round().clamp(0.0, 255.0) as u8
}
