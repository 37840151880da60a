//! Image decoding and preprocessing for the vision tower.
//!
//! Decoding delegates to the `image` crate; preprocessing resizes with
//! bilinear interpolation and normalizes per channel, reproducing the
//! reference recipe bit-for-bit (same rounding and clamping).

use std::path::Path;

use thiserror::Error;

/// An 8-bit RGB image, row-major, three bytes per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageU8 {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Pixel bytes, `3 * width * height` long.
    pub data: Vec<u8>,
}

/// A normalized float image, laid out like [ImageU8].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageF32 {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Channel values, `3 * width * height` long.
    pub data: Vec<f32>,
}

/// An image file could not be decoded.
#[derive(Debug, Error)]
#[error("could not decode image: {0}")]
pub struct DecodeError(#[from] ::image::ImageError);

/// Decodes an image file into 8-bit RGB.
pub fn decode_image(path: &Path) -> Result<ImageU8, DecodeError> {
    let image = ::image::open(path)?.into_rgb8();
    let (width, height) = image.dimensions();
    Ok(ImageU8 {
        width: width as usize,
        height: height as usize,
        data: image.into_raw(),
    })
}

/// Resizes `image` to `target_size × target_size` with bilinear
/// interpolation, preserving aspect ratio, then normalizes each channel as
/// `(value / 255 - mean[c]) / std[c]`.
///
/// The output buffer always holds `3 * target_size²` values. The scaled
/// region is written packed at the scaled width; for non-square sources the
/// rest of the buffer keeps its zero fill, so callers must not assume full
/// coverage.
pub fn preprocess(image: &ImageU8, target_size: usize, mean: [f32; 3], std: [f32; 3]) -> ImageF32 {
    let nx = image.width;
    let ny = image.height;

    let mut result = ImageF32 {
        width: target_size,
        height: target_size,
        data: vec![0.0; 3 * target_size * target_size],
    };

    let scale = nx.max(ny) as f32 / target_size as f32;

    let scaled_width = (nx as f32 / scale + 0.5) as usize;
    let scaled_height = (ny as f32 / scale + 0.5) as usize;

    for y in 0..scaled_height {
        for x in 0..scaled_width {
            for c in 0..3 {
                // Bilinear interpolation at the source coordinate, with
                // neighbor indices clamped at the image border.
                let sx = (x as f32 + 0.5) * scale - 0.5;
                let sy = (y as f32 + 0.5) * scale - 0.5;

                let x0 = (sx.floor() as isize).max(0) as usize;
                let y0 = (sy.floor() as isize).max(0) as usize;

                let x1 = (x0 + 1).min(nx - 1);
                let y1 = (y0 + 1).min(ny - 1);

                let dx = sx - x0 as f32;
                let dy = sy - y0 as f32;

                let v00 = f32::from(image.data[3 * (y0 * nx + x0) + c]);
                let v01 = f32::from(image.data[3 * (y0 * nx + x1) + c]);
                let v10 = f32::from(image.data[3 * (y1 * nx + x0) + c]);
                let v11 = f32::from(image.data[3 * (y1 * nx + x1) + c]);

                let v0 = v00 * (1.0 - dx) + v01 * dx;
                let v1 = v10 * (1.0 - dx) + v11 * dx;
                let v = v0 * (1.0 - dy) + v1 * dy;

                let quantized = v.round().clamp(0.0, 255.0);

                let i = 3 * (y * scaled_width + x) + c;
                result.data[i] = (quantized / 255.0 - mean[c]) / std[c];
            }
        }
    }

    result
}
