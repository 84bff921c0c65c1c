pub mod batch;
pub mod commands;
pub mod composite;
pub mod config;
pub mod errors;
pub mod frame_store;
pub mod model;
pub mod pipeline;
pub mod traits;
pub mod transcoder;

pub mod mocks;

pub use config::{Cli, Command, MediaLayout, SegmentRequest, Settings};
pub use errors::{Result, VideoSegError};
pub use frame_store::{frame_file_name, list_frames, Frame};
pub use model::{BodyPixModel, InternalResolution, ModelConfig};
pub use pipeline::BatchPipeline;
pub use traits::*;
pub use transcoder::Ffmpeg;
