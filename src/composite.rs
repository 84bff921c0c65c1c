use std::path::Path;

use image::{codecs::png::PngEncoder, imageops, ExtendedColorType, ImageEncoder, Rgb, RgbImage};

use crate::errors::{Result, VideoSegError};
use crate::traits::Segmentation;

/// Converts a person confidence in `0.0..=1.0` to an 8-bit intensity.
pub fn confidence_to_intensity(confidence: f32) -> u8 {
    (confidence * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Packs a part label into a byte; `-1` (no person) becomes `255`.
pub const fn part_label_to_byte(label: i32) -> u8 {
    label as u8
}

/// Renders a segmentation as an RGB image of (intensity, part label, 0).
pub fn mask_image(segmentation: &Segmentation) -> Result<RgbImage> {
    segmentation.ensure_consistent()?;
    let (width, height) = segmentation.dimensions();

    Ok(RgbImage::from_fn(width, height, |x, y| {
        let (row, col) = (y as usize, x as usize);
        Rgb([
            confidence_to_intensity(segmentation.confidence[[row, col]]),
            part_label_to_byte(segmentation.part_labels[[row, col]]),
            0,
        ])
    }))
}

/// Stacks the frame above its mask; the result is as wide as the frame and twice as tall.
pub fn compose(frame: &RgbImage, segmentation: &Segmentation) -> Result<RgbImage> {
    if frame.dimensions() != segmentation.dimensions() {
        let (width, height) = segmentation.dimensions();
        return Err(VideoSegError::inference(
            "composite",
            None,
            format!(
                "segmentation is {width}x{height} but the frame is {}x{}",
                frame.width(),
                frame.height()
            ),
        ));
    }

    let mask = mask_image(segmentation)?;
    let (width, height) = frame.dimensions();
    let mut canvas = RgbImage::new(width, height * 2);
    imageops::replace(&mut canvas, frame, 0, 0);
    imageops::replace(&mut canvas, &mask, 0, i64::from(height));
    Ok(canvas)
}

/// Encodes an RGB image as PNG in memory.
pub fn encode_png(image: &RgbImage, path: &Path) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| VideoSegError::Encode {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(buffer)
}
