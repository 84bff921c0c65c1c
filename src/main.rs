use anyhow::{ensure, Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing_subscriber::EnvFilter;

use video_body_seg::{
    commands, BatchPipeline, BodyPixModel, Cli, Command, Ffmpeg, SegmentRequest, Settings,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let settings = Settings::from_cli(&cli)?;
    let request = SegmentRequest::try_from(cli.command.args())?;
    cli.command.check_layout(&settings.layout)?;

    ensure!(
        settings.model_path.exists(),
        "Model path does not exist: {}",
        settings.model_path.display()
    );

    ThreadPoolBuilder::new()
        .num_threads(settings.num_threads)
        .build_global()?;

    tracing::info!(batch_size = request.batch_size, "loading bodypix...");
    let model = BodyPixModel::new(&settings.model_path, settings.model, settings.acceleration)
        .context("Failed to load segmentation model")?;
    let pipeline = BatchPipeline::new(model).with_progress(true);

    match &cli.command {
        Command::SegmentVideo(_) => {
            let results = commands::segment_video(
                &settings.layout,
                &request,
                &pipeline,
                &Ffmpeg::default(),
            )
            .with_context(|| format!("Failed to segment video `{}`", request.video))?;
            tracing::info!(results = %results.display(), "segmented video");
        }
        Command::SegmentFrames(_) => {
            let count = commands::segment_frames(&settings.layout, &request, &pipeline)
                .with_context(|| format!("Failed to segment frames of `{}`", request.video))?;
            tracing::info!(frames = count, "segmented frames");
        }
    }

    Ok(())
}
