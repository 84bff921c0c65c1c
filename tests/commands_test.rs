use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use video_body_seg::{
    commands,
    mocks::{MockSegmentationModel, MockTranscoder},
    BatchPipeline, InternalResolution, MediaLayout, SegmentRequest, Transcoder, VideoSegError,
};

fn layout(temp_dir: &TempDir) -> MediaLayout {
    MediaLayout {
        source_dir: Some(temp_dir.path().join("source")),
        destination_dir: Some(temp_dir.path().join("destination")),
        processing_dir: temp_dir.path().join("processing"),
    }
}

fn request(batch_size: usize) -> SegmentRequest {
    SegmentRequest {
        video: "dance".to_string(),
        internal_resolution: InternalResolution::MEDIUM,
        batch_size,
    }
}

#[test]
fn test_segment_video_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let layout = layout(&temp_dir);
    fs::create_dir_all(temp_dir.path().join("source"))?;
    fs::write(temp_dir.path().join("source/dance.mp4"), b"mp4")?;

    // leftovers from a longer earlier video must not end up in the result
    fs::create_dir_all(layout.scratch_segmentations())?;
    fs::write(layout.scratch_segmentations().join("000000099.png"), b"stale")?;

    let pipeline = BatchPipeline::new(MockSegmentationModel::new());
    let transcoder = MockTranscoder::new(7, (6, 4));
    let results = commands::segment_video(&layout, &request(3), &pipeline, &transcoder)?;

    assert_eq!(results, temp_dir.path().join("destination/danceresults.mp4"));
    let contents = fs::read_to_string(&results)?;
    assert!(contents.contains("frames=7"));
    assert!(contents.contains("dance.mp4"));

    assert_eq!(pipeline.model().batch_sizes(), vec![3, 3, 1]);
    assert_eq!(
        transcoder.muxed(),
        vec![(layout.scratch_segmentations(), layout.scratch_results_video())]
    );
    assert!(layout.scratch_video().is_file());
    Ok(())
}

#[test]
fn test_segment_video_missing_source_fails_before_transcoding() {
    let temp_dir = TempDir::new().unwrap();
    let layout = layout(&temp_dir);

    let pipeline = BatchPipeline::new(MockSegmentationModel::new());
    let transcoder = MockTranscoder::new(3, (4, 4));
    let err = commands::segment_video(&layout, &request(10), &pipeline, &transcoder).unwrap_err();

    assert!(matches!(err, VideoSegError::FileSystem { .. }));
    assert!(pipeline.model().batch_sizes().is_empty());
    assert!(transcoder.muxed().is_empty());
}

#[test]
fn test_segment_video_requires_source_root() {
    let temp_dir = TempDir::new().unwrap();
    let layout = MediaLayout {
        source_dir: None,
        ..layout(&temp_dir)
    };

    let pipeline = BatchPipeline::new(MockSegmentationModel::new());
    let transcoder = MockTranscoder::new(1, (2, 2));
    let err = commands::segment_video(&layout, &request(10), &pipeline, &transcoder).unwrap_err();
    assert!(matches!(err, VideoSegError::Configuration { .. }));
}

#[test]
fn test_segment_frames_uses_destination_tree() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let layout = layout(&temp_dir);
    let frames: PathBuf = layout.video_frames("dance")?;
    fs::create_dir_all(&frames)?;
    fs::write(temp_dir.path().join("clip.mp4"), b"mp4")?;
    MockTranscoder::new(4, (5, 5)).video_to_frames(&temp_dir.path().join("clip.mp4"), &frames)?;

    let pipeline = BatchPipeline::new(MockSegmentationModel::new());
    let count = commands::segment_frames(&layout, &request(10), &pipeline)?;

    assert_eq!(count, 4);
    let segmentations = layout.video_segmentations("dance")?;
    for index in 1..=4 {
        assert!(segmentations.join(video_body_seg::frame_file_name(index)).is_file());
    }
    Ok(())
}
