use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use ndarray::Array2;
use parking_lot::Mutex;

use crate::errors::{Result, VideoSegError};
use crate::frame_store::{frame_file_name, list_frames};
use crate::model::InternalResolution;
use crate::traits::{Segmentation, SegmentationModel, Transcoder};

/// Deterministic stand-in for BodyPix used by tests.
///
/// Confidence is the red channel scaled to `0.0..=1.0` and the part label is the green
/// channel modulo 24, so results can be predicted from the input frame.
#[derive(Debug, Default)]
pub struct MockSegmentationModel {
    batch_sizes: Mutex<Vec<usize>>,
    fail_on_batch: Option<usize>,
}

impl MockSegmentationModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the `batch`-th call to `segment_batch` (zero based).
    pub fn failing_on_batch(batch: usize) -> Self {
        Self {
            fail_on_batch: Some(batch),
            ..Self::default()
        }
    }

    /// Sizes of the batches seen so far, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn segment(&self, image: &RgbImage, _resolution: InternalResolution) -> Result<Segmentation> {
        let (width, height) = image.dimensions();
        let shape = (height as usize, width as usize);

        Ok(Segmentation {
            confidence: Array2::from_shape_fn(shape, |(y, x)| {
                f32::from(image.get_pixel(x as u32, y as u32)[0]) / 255.0
            }),
            part_labels: Array2::from_shape_fn(shape, |(y, x)| {
                i32::from(image.get_pixel(x as u32, y as u32)[1] % 24)
            }),
        })
    }

    fn segment_batch(
        &self,
        images: &[RgbImage],
        resolution: InternalResolution,
    ) -> Result<Vec<Segmentation>> {
        let call = {
            let mut sizes = self.batch_sizes.lock();
            sizes.push(images.len());
            sizes.len() - 1
        };

        if self.fail_on_batch == Some(call) {
            return Err(VideoSegError::inference(
                "mock batch inference",
                None,
                format!("batch {call} failed on purpose"),
            ));
        }

        images
            .iter()
            .map(|image| self.segment(image, resolution))
            .collect()
    }
}

/// Transcoder stand-in that fabricates frames and records what it was asked to do.
#[derive(Debug)]
pub struct MockTranscoder {
    frame_count: u64,
    frame_size: (u32, u32),
    muxed: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl MockTranscoder {
    pub const fn new(frame_count: u64, frame_size: (u32, u32)) -> Self {
        Self {
            frame_count,
            frame_size,
            muxed: Mutex::new(Vec::new()),
        }
    }

    /// `(frames folder, output path)` pairs passed to `frames_to_video`.
    pub fn muxed(&self) -> Vec<(PathBuf, PathBuf)> {
        self.muxed.lock().clone()
    }
}

impl Transcoder for MockTranscoder {
    fn video_to_frames(&self, video_path: &Path, frames_folder: &Path) -> Result<()> {
        if !video_path.is_file() {
            return Err(VideoSegError::ExternalProcess {
                command: format!("mock-ffmpeg -i {}", video_path.display()),
                code: Some(1),
                stderr: "No such file or directory".to_string(),
            });
        }
        fs::create_dir_all(frames_folder)
            .map_err(|e| VideoSegError::file_system(frames_folder, "create frames folder", e))?;

        let (width, height) = self.frame_size;
        for index in 1..=self.frame_count {
            let shade = (index * 10 % 256) as u8;
            let path = frames_folder.join(frame_file_name(index));
            RgbImage::from_pixel(width, height, Rgb([shade, shade / 2, 0]))
                .save(&path)
                .map_err(|e| VideoSegError::Encode { path, source: e })?;
        }
        Ok(())
    }

    fn frames_to_video(
        &self,
        reference_video: &Path,
        frames_folder: &Path,
        output_path: &Path,
    ) -> Result<()> {
        let frames = list_frames(frames_folder)?;
        let contents = format!(
            "reference={}\nframes={}\n",
            reference_video.display(),
            frames.len()
        );
        fs::write(output_path, contents)
            .map_err(|e| VideoSegError::file_system(output_path, "write video", e))?;

        self.muxed
            .lock()
            .push((frames_folder.to_path_buf(), output_path.to_path_buf()));
        Ok(())
    }
}
