use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for the video segmentation pipeline.
///
/// Each variant carries the path, command or frame it concerns so that a failed run
/// can be diagnosed and rerun without extra logging at the call site.
#[derive(Error, Debug)]
pub enum VideoSegError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("External process error: `{command}` exited with {}: {stderr}", describe_exit(.code))]
    ExternalProcess {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Image decode error: failed to decode {path:?}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Inference error: {operation} failed{}", describe_frame(.frame))]
    Inference {
        operation: String,
        frame: Option<u64>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Encode error: failed to encode {path:?}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

pub type Result<T> = std::result::Result<T, VideoSegError>;

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code".to_string(),
    }
}

fn describe_frame(frame: &Option<u64>) -> String {
    match frame {
        Some(index) => format!(" (frame {index})"),
        None => String::new(),
    }
}

impl VideoSegError {
    pub(crate) fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    pub(crate) fn inference(
        operation: impl Into<String>,
        frame: Option<u64>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Inference {
            operation: operation.into(),
            frame,
            source: source.into(),
        }
    }

    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Convert ONNX Runtime errors to inference errors.
///
/// Session construction and execution are the only places ort errors surface, and both
/// belong to the model, so they share one category.
impl From<ort::Error> for VideoSegError {
    fn from(err: ort::Error) -> Self {
        Self::inference("ort operation", None, err)
    }
}

/// Shape errors occur while reshaping model outputs, so they are inference errors too.
impl From<ndarray::ShapeError> for VideoSegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::inference("tensor shape conversion", None, err)
    }
}
