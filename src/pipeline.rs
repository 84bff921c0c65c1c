use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::batch::{batch_count, partition_frames};
use crate::composite::{compose, encode_png};
use crate::errors::{Result, VideoSegError};
use crate::frame_store::{list_frames, Frame};
use crate::model::InternalResolution;
use crate::traits::SegmentationModel;

/// Drives frames of a folder through load → infer → composite → save, one batch at a time.
///
/// Within a batch, decoding and encoding run on the rayon pool; the next batch only
/// starts once every file of the current one is written, so at most one batch of
/// decoded frames and encoded PNGs is held in memory.
pub struct BatchPipeline<M: SegmentationModel> {
    model: M,
    show_progress: bool,
}

impl<M: SegmentationModel> BatchPipeline<M> {
    pub const fn new(model: M) -> Self {
        Self {
            model,
            show_progress: false,
        }
    }

    pub const fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub const fn model(&self) -> &M {
        &self.model
    }

    /// Segments every frame of `source` into `destination`, returning the number of frames written.
    pub fn run(
        &self,
        source: &Path,
        destination: &Path,
        resolution: InternalResolution,
        batch_size: usize,
    ) -> Result<usize> {
        let start = Instant::now();
        tracing::info!(batch_size, %resolution, "segmenting frames");

        let frames = list_frames(source)?;
        let batches = partition_frames(&frames, batch_size)?;

        fs::create_dir_all(destination).map_err(|e| {
            VideoSegError::file_system(destination, "create destination folder", e)
        })?;

        if frames.is_empty() {
            tracing::info!(source = %source.display(), "no frames to segment");
            return Ok(0);
        }

        let progress = self.progress_bar(frames.len());
        let total_batches = batch_count(frames.len(), batch_size).unwrap_or_default();

        for (number, batch) in batches.enumerate() {
            let batch_start = Instant::now();
            tracing::debug!(
                batch = number + 1,
                total_batches,
                frames = ?batch.iter().map(|f| f.file_name.as_str()).collect::<Vec<_>>(),
                "estimating batch frames"
            );

            self.process_batch(batch, destination, resolution)
                .inspect_err(|e| {
                    tracing::error!(batch = number + 1, error = %e, "batch failed");
                })?;

            progress.inc(batch.len() as u64);
            tracing::info!(
                batch = number + 1,
                total_batches,
                elapsed_ms = batch_start.elapsed().as_millis() as u64,
                "batch completed"
            );
        }

        progress.finish();
        tracing::info!(
            frames = frames.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "time to complete frames"
        );
        Ok(frames.len())
    }

    fn process_batch(
        &self,
        batch: &[Frame],
        destination: &Path,
        resolution: InternalResolution,
    ) -> Result<()> {
        let load_start = Instant::now();
        let images = batch
            .par_iter()
            .map(decode_frame)
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(
            elapsed_ms = load_start.elapsed().as_millis() as u64,
            "time to load frames"
        );

        let inference_start = Instant::now();
        let segmentations = self.model.segment_batch(&images, resolution)?;
        if segmentations.len() != images.len() {
            return Err(VideoSegError::inference(
                "batch inference",
                batch.first().map(|f| f.index),
                format!(
                    "model returned {} segmentations for {} frames",
                    segmentations.len(),
                    images.len()
                ),
            ));
        }
        tracing::info!(
            elapsed_ms = inference_start.elapsed().as_millis() as u64,
            "time to perform inference"
        );

        // encode everything before the first write so a bad frame leaves no partial batch
        let save_start = Instant::now();
        let encoded = batch
            .par_iter()
            .zip(images.par_iter())
            .zip(segmentations.par_iter())
            .map(|((frame, image), segmentation)| {
                let path = destination.join(frame.output_file_name());
                let composite =
                    compose(image, segmentation).map_err(|e| at_frame(e, frame.index))?;
                let bytes = encode_png(&composite, &path)?;
                Ok((path, bytes))
            })
            .collect::<Result<Vec<(PathBuf, Vec<u8>)>>>()?;
        drop(images);
        drop(segmentations);

        encoded.par_iter().try_for_each(|(path, bytes)| {
            fs::write(path, bytes)
                .map_err(|e| VideoSegError::file_system(path, "write composite", e))
        })?;

        tracing::info!(
            elapsed_ms = save_start.elapsed().as_millis() as u64,
            "time to save frames"
        );
        tracing::info!(
            "processed images {}",
            batch
                .iter()
                .map(Frame::output_file_name)
                .collect::<Vec<_>>()
                .join(",")
        );
        Ok(())
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(len as u64);
        progress.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );
        progress
    }
}

fn decode_frame(frame: &Frame) -> Result<RgbImage> {
    image::open(&frame.full_path)
        .map(|image| image.into_rgb8())
        .map_err(|e| VideoSegError::ImageDecode {
            path: frame.full_path.clone(),
            source: e,
        })
}

fn at_frame(err: VideoSegError, index: u64) -> VideoSegError {
    match err {
        VideoSegError::Inference {
            operation,
            frame: None,
            source,
        } => VideoSegError::Inference {
            operation,
            frame: Some(index),
            source,
        },
        other => other,
    }
}
