use std::path::Path;

use image::RgbImage;
use ndarray::Array2;

use crate::errors::{Result, VideoSegError};
use crate::model::InternalResolution;

/// Per-pixel output of a person segmentation model for one frame.
///
/// Both maps are indexed `[row, column]` and share the frame's dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    /// Confidence in `0.0..=1.0` that a pixel belongs to a person.
    pub confidence: Array2<f32>,
    /// Body part id per pixel, `-1` where no person was found.
    pub part_labels: Array2<i32>,
}

impl Segmentation {
    /// `(width, height)` of the maps.
    pub fn dimensions(&self) -> (u32, u32) {
        let (rows, cols) = self.confidence.dim();
        (cols as u32, rows as u32)
    }

    pub(crate) fn ensure_consistent(&self) -> Result<()> {
        if self.confidence.dim() != self.part_labels.dim() {
            return Err(VideoSegError::inference(
                "segmentation shape check",
                None,
                format!(
                    "confidence map is {:?} but part label map is {:?}",
                    self.confidence.dim(),
                    self.part_labels.dim()
                ),
            ));
        }
        Ok(())
    }
}

/// Person part segmentation capability.
///
/// Implementations are loaded once and shared read-only by every batch of a run.
pub trait SegmentationModel: Send + Sync {
    /// Segments a single decoded frame.
    fn segment(&self, image: &RgbImage, resolution: InternalResolution) -> Result<Segmentation>;

    /// Segments a whole batch in one call; results are in input order.
    fn segment_batch(
        &self,
        images: &[RgbImage],
        resolution: InternalResolution,
    ) -> Result<Vec<Segmentation>> {
        images
            .iter()
            .map(|image| self.segment(image, resolution))
            .collect()
    }
}

/// Video ⇄ numbered frame conversion, delegated to an external program.
pub trait Transcoder: Send + Sync {
    /// Writes `frames_folder/%09d.png` starting at `000000001.png`.
    fn video_to_frames(&self, video_path: &Path, frames_folder: &Path) -> Result<()>;

    /// Muxes `frames_folder/%09d.png` into `output_path` at the frame rate of `reference_video`.
    fn frames_to_video(
        &self,
        reference_video: &Path,
        frames_folder: &Path,
        output_path: &Path,
    ) -> Result<()>;
}
