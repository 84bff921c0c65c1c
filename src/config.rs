use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::thread;

use clap::builder::{BoolishValueParser, RangedU64ValueParser};
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::errors::{Result, VideoSegError};
use crate::model::{Acceleration, Architecture, InternalResolution, ModelConfig};

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub environment: EnvironmentArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Extract frames from a source video, segment them and mux the results into a new video
    SegmentVideo(SegmentArgs),
    /// Segment an already extracted frame folder under the destination directory
    SegmentFrames(SegmentArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SegmentArgs {
    /// Name of the video, without the `.mp4` extension
    #[arg(short, long)]
    pub video: String,

    /// low, medium, high, full or a fraction of the frame size (0.1 to 2.0)
    #[arg(short, long, alias = "internalResolution")]
    pub internal_resolution: InternalResolution,

    #[arg(
        short,
        long,
        alias = "batchSize",
        default_value_t = DEFAULT_BATCH_SIZE,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub batch_size: usize,
}

/// Roots and runtime switches, each overridable through the environment.
#[derive(Args, Debug, Clone)]
pub struct EnvironmentArgs {
    #[arg(long, env = "SOURCE_MEDIA_FOLDER", global = true)]
    pub source_dir: Option<PathBuf>,

    #[arg(long, env = "DESTINATION_FOLDER", global = true)]
    pub destination_dir: Option<PathBuf>,

    /// Local scratch area for intermediate videos and frames
    #[arg(long, env = "PROCESSING_FOLDER", default_value = "processing", global = true)]
    pub processing_dir: PathBuf,

    #[arg(
        long,
        env = "GPU",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub gpu: bool,

    #[arg(long, default_value_t = 0, global = true)]
    pub device_id: i32,

    /// Worker threads for decoding and encoding frames
    #[arg(long, global = true)]
    pub num_threads: Option<NonZeroUsize>,
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Explicit path to a BodyPix ONNX model
    #[arg(long, env = "BODYPIX_MODEL", global = true)]
    pub model: Option<PathBuf>,

    /// Folder holding `bodypix_<arch>_q<bytes>_s<stride>.onnx` models
    #[arg(long, env = "MODEL_FOLDER", default_value = "models", global = true)]
    pub model_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = Architecture::ResNet50, global = true)]
    pub architecture: Architecture,

    #[arg(long, default_value_t = 4, global = true)]
    pub quant_bytes: u8,

    #[arg(long, default_value_t = 16, global = true)]
    pub output_stride: u32,
}

/// Everything the commands need, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub layout: MediaLayout,
    pub model_path: PathBuf,
    pub model: ModelConfig,
    pub acceleration: Acceleration,
    pub num_threads: usize,
}

impl Settings {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let model = ModelConfig {
            architecture: cli.model.architecture,
            quant_bytes: cli.model.quant_bytes,
            output_stride: cli.model.output_stride,
        };
        model.validate()?;

        let model_path = cli
            .model
            .model
            .clone()
            .unwrap_or_else(|| model.model_path_in(&cli.model.model_dir));

        let num_threads = cli
            .environment
            .num_threads
            .or_else(|| thread::available_parallelism().ok())
            .map_or(1, NonZeroUsize::get);

        Ok(Self {
            layout: MediaLayout {
                source_dir: cli.environment.source_dir.clone(),
                destination_dir: cli.environment.destination_dir.clone(),
                processing_dir: cli.environment.processing_dir.clone(),
            },
            model_path,
            model,
            acceleration: Acceleration {
                gpu: cli.environment.gpu,
                device_id: cli.environment.device_id,
            },
            num_threads,
        })
    }
}

/// One segmentation job as requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRequest {
    pub video: String,
    pub internal_resolution: InternalResolution,
    pub batch_size: usize,
}

impl TryFrom<&SegmentArgs> for SegmentRequest {
    type Error = VideoSegError;

    fn try_from(args: &SegmentArgs) -> Result<Self> {
        let video = args.video.trim();
        if video.is_empty() || video.contains(['/', '\\']) || video == "." || video == ".." {
            return Err(VideoSegError::validation(
                "video",
                format!("`{}` is not a plain video name", args.video),
            ));
        }
        if args.batch_size == 0 {
            return Err(VideoSegError::validation(
                "batch size",
                "must be a positive integer",
            ));
        }

        Ok(Self {
            video: video.to_string(),
            internal_resolution: args.internal_resolution,
            batch_size: args.batch_size,
        })
    }
}

impl Command {
    pub fn args(&self) -> &SegmentArgs {
        match self {
            Self::SegmentVideo(args) | Self::SegmentFrames(args) => args,
        }
    }

    /// Fails early when a root this command needs is not configured.
    pub fn check_layout(&self, layout: &MediaLayout) -> Result<()> {
        layout.destination_dir()?;
        if let Self::SegmentVideo(_) = self {
            layout.source_dir()?;
        }
        Ok(())
    }
}

/// Where videos and frames live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLayout {
    pub source_dir: Option<PathBuf>,
    pub destination_dir: Option<PathBuf>,
    pub processing_dir: PathBuf,
}

impl MediaLayout {
    pub fn source_dir(&self) -> Result<&Path> {
        self.source_dir
            .as_deref()
            .ok_or_else(|| missing_root("source", "SOURCE_MEDIA_FOLDER"))
    }

    pub fn destination_dir(&self) -> Result<&Path> {
        self.destination_dir
            .as_deref()
            .ok_or_else(|| missing_root("destination", "DESTINATION_FOLDER"))
    }

    /// `<source>/<video>.mp4`
    pub fn source_video(&self, video: &str) -> Result<PathBuf> {
        Ok(self.source_dir()?.join(format!("{video}.mp4")))
    }

    /// `<destination>/<video>results.mp4`
    pub fn results_video(&self, video: &str) -> Result<PathBuf> {
        Ok(self.destination_dir()?.join(format!("{video}results.mp4")))
    }

    pub fn scratch_video(&self) -> PathBuf {
        self.processing_dir.join("source.mp4")
    }

    pub fn scratch_frames(&self) -> PathBuf {
        self.processing_dir.join("frames")
    }

    pub fn scratch_segmentations(&self) -> PathBuf {
        self.processing_dir.join("segmentations")
    }

    pub fn scratch_results_video(&self) -> PathBuf {
        self.processing_dir.join("results.mp4")
    }

    /// `<destination>/<video>/frames`
    pub fn video_frames(&self, video: &str) -> Result<PathBuf> {
        Ok(self.destination_dir()?.join(video).join("frames"))
    }

    /// `<destination>/<video>/segmentations`
    pub fn video_segmentations(&self, video: &str) -> Result<PathBuf> {
        Ok(self.destination_dir()?.join(video).join("segmentations"))
    }
}

fn missing_root(name: &str, variable: &str) -> VideoSegError {
    VideoSegError::Configuration {
        message: format!("{name} directory is not set; pass --{name}-dir or set {variable}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("video-body-seg").chain(args.iter().copied()))
    }

    #[test]
    fn test_segment_video_defaults() {
        let cli = parse(&["segment-video", "-v", "dance", "-i", "0.5"]).unwrap();
        let Command::SegmentVideo(args) = &cli.command else {
            panic!("expected segment-video");
        };
        assert_eq!(args.video, "dance");
        assert_eq!(args.internal_resolution, InternalResolution::MEDIUM);
        assert_eq!(args.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(cli.model.architecture, Architecture::ResNet50);
    }

    #[test]
    fn test_camel_case_aliases() {
        let cli = parse(&[
            "segment-frames",
            "--video",
            "dance",
            "--internalResolution",
            "full",
            "--batchSize",
            "4",
        ])
        .unwrap();
        let args = cli.command.args();
        assert_eq!(args.internal_resolution, InternalResolution::FULL);
        assert_eq!(args.batch_size, 4);
    }

    #[test]
    fn test_rejects_missing_and_invalid_arguments() {
        assert!(parse(&["segment-video", "-i", "0.5"]).is_err());
        assert!(parse(&["segment-video", "-v", "dance"]).is_err());
        assert!(parse(&["segment-video", "-v", "dance", "-i", "0.5", "-b", "0"]).is_err());
        assert!(parse(&["segment-video", "-v", "dance", "-i", "zero"]).is_err());
    }

    #[test]
    fn test_boolish_gpu_flag() {
        let cli = parse(&["--gpu", "True", "segment-frames", "-v", "a", "-i", "0.25"]).unwrap();
        assert!(cli.environment.gpu);
        let cli = parse(&["segment-frames", "-v", "a", "-i", "0.25", "--gpu", "no"]).unwrap();
        assert!(!cli.environment.gpu);
    }

    #[test]
    fn test_settings_resolve_model_path() -> Result<()> {
        let mut cli = parse(&[
            "--model-dir",
            "/opt/models",
            "--architecture",
            "mobilenet-v1",
            "--quant-bytes",
            "2",
            "--output-stride",
            "8",
            "--num-threads",
            "3",
            "segment-frames",
            "-v",
            "a",
            "-i",
            "0.25",
        ])
        .unwrap();
        cli.model.model = None;
        let settings = Settings::from_cli(&cli)?;
        assert_eq!(
            settings.model_path,
            Path::new("/opt/models/bodypix_mobilenetv1_q2_s8.onnx")
        );
        assert_eq!(settings.num_threads, 3);

        cli.model.model = Some(PathBuf::from("/tmp/custom.onnx"));
        let settings = Settings::from_cli(&cli)?;
        assert_eq!(settings.model_path, Path::new("/tmp/custom.onnx"));
        Ok(())
    }

    #[test]
    fn test_settings_reject_invalid_model_config() {
        let cli = parse(&["--output-stride", "8", "segment-frames", "-v", "a", "-i", "0.25"]).unwrap();
        assert!(matches!(
            Settings::from_cli(&cli),
            Err(VideoSegError::Configuration { .. })
        ));
    }

    #[test]
    fn test_segment_request_validation() {
        let args = SegmentArgs {
            video: "../escape".to_string(),
            internal_resolution: InternalResolution::FULL,
            batch_size: 10,
        };
        assert!(SegmentRequest::try_from(&args).is_err());

        let args = SegmentArgs {
            video: "dance".to_string(),
            ..args
        };
        let request = SegmentRequest::try_from(&args).unwrap();
        assert_eq!(request.video, "dance");
    }

    #[test]
    fn test_media_layout_paths() -> Result<()> {
        let layout = MediaLayout {
            source_dir: Some(PathBuf::from("/media/in")),
            destination_dir: Some(PathBuf::from("/media/out")),
            processing_dir: PathBuf::from("/scratch"),
        };
        assert_eq!(layout.source_video("dance")?, Path::new("/media/in/dance.mp4"));
        assert_eq!(
            layout.results_video("dance")?,
            Path::new("/media/out/danceresults.mp4")
        );
        assert_eq!(layout.scratch_frames(), Path::new("/scratch/frames"));
        assert_eq!(
            layout.video_segmentations("dance")?,
            Path::new("/media/out/dance/segmentations")
        );
        Ok(())
    }

    #[test]
    fn test_missing_roots_are_configuration_errors() {
        let layout = MediaLayout {
            source_dir: None,
            destination_dir: Some(PathBuf::from("/media/out")),
            processing_dir: PathBuf::from("/scratch"),
        };
        let video = Command::SegmentVideo(SegmentArgs {
            video: "dance".to_string(),
            internal_resolution: InternalResolution::FULL,
            batch_size: 10,
        });
        assert!(matches!(
            video.check_layout(&layout),
            Err(VideoSegError::Configuration { .. })
        ));

        let frames = Command::SegmentFrames(video.args().clone());
        assert!(frames.check_layout(&layout).is_ok());
    }
}
