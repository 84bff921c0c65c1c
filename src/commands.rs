use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{MediaLayout, SegmentRequest};
use crate::errors::{Result, VideoSegError};
use crate::pipeline::BatchPipeline;
use crate::traits::{SegmentationModel, Transcoder};

/// Segments `<destination>/<video>/frames` into `<destination>/<video>/segmentations`.
pub fn segment_frames<M: SegmentationModel>(
    layout: &MediaLayout,
    request: &SegmentRequest,
    pipeline: &BatchPipeline<M>,
) -> Result<usize> {
    let frames = layout.video_frames(&request.video)?;
    let segmentations = layout.video_segmentations(&request.video)?;

    tracing::info!(
        frames = %frames.display(),
        destination = %segmentations.display(),
        "segmenting frames"
    );
    pipeline.run(
        &frames,
        &segmentations,
        request.internal_resolution,
        request.batch_size,
    )
}

/// Runs the whole video flow and returns the path of the result video.
///
/// The scratch frame and segmentation folders are cleared before extraction.
pub fn segment_video<M, T>(
    layout: &MediaLayout,
    request: &SegmentRequest,
    pipeline: &BatchPipeline<M>,
    transcoder: &T,
) -> Result<PathBuf>
where
    M: SegmentationModel,
    T: Transcoder + ?Sized,
{
    let source_video = layout.source_video(&request.video)?;
    let results_video = layout.results_video(&request.video)?;
    let scratch_video = layout.scratch_video();
    let frames = layout.scratch_frames();
    let segmentations = layout.scratch_segmentations();
    let scratch_results = layout.scratch_results_video();

    create_dir(&layout.processing_dir, "create processing folder")?;
    for folder in [&frames, &segmentations] {
        clear_dir(folder)?;
    }

    tracing::info!(
        from = %source_video.display(),
        to = %scratch_video.display(),
        "copying video"
    );
    copy_file(&source_video, &scratch_video)?;

    tracing::info!(
        video = %scratch_video.display(),
        frames = %frames.display(),
        "converting video to frames"
    );
    transcoder.video_to_frames(&scratch_video, &frames)?;

    tracing::info!(
        frames = %frames.display(),
        destination = %segmentations.display(),
        "segmenting frames"
    );
    pipeline.run(
        &frames,
        &segmentations,
        request.internal_resolution,
        request.batch_size,
    )?;

    tracing::info!(
        frames = %segmentations.display(),
        video = %scratch_results.display(),
        "converting frames to video"
    );
    transcoder.frames_to_video(&source_video, &segmentations, &scratch_results)?;

    if let Some(parent) = results_video.parent() {
        create_dir(parent, "create destination folder")?;
    }
    tracing::info!(
        from = %scratch_results.display(),
        to = %results_video.display(),
        "copying video"
    );
    copy_file(&scratch_results, &results_video)?;

    Ok(results_video)
}

fn create_dir(path: &Path, operation: &str) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| VideoSegError::file_system(path, operation, e))
}

fn clear_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VideoSegError::file_system(path, "clear scratch folder", e)),
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| VideoSegError::file_system(from, format!("copy to {}", to.display()), e))
}
