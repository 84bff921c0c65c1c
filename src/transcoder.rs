use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::str::FromStr;

use crate::errors::{Result, VideoSegError};
use crate::traits::Transcoder;

/// ffmpeg image sequence pattern shared by extraction and muxing.
pub const FRAME_PATTERN: &str = "%09d.png";

/// A video frame rate as reported by ffprobe, e.g. `30000/1001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub fn as_f64(self) -> f64 {
        f64::from(self.numerator) / f64::from(self.denominator)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for FrameRate {
    type Err = VideoSegError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || VideoSegError::validation("frame rate", format!("`{s}` is not a frame rate"));
        let s = s.trim();

        let (numerator, denominator) = match s.split_once('/') {
            Some((n, d)) => (n.trim().parse::<u32>(), d.trim().parse::<u32>()),
            None => (s.parse::<u32>(), Ok(1)),
        };
        match (numerator, denominator) {
            (Ok(numerator), Ok(denominator)) if numerator > 0 && denominator > 0 => Ok(Self {
                numerator,
                denominator,
            }),
            _ => Err(invalid()),
        }
    }
}

/// Transcoder backed by the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::with_binaries("ffmpeg", "ffprobe")
    }
}

impl Ffmpeg {
    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn ffmpeg_command(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "warning", "-y"]);
        cmd
    }

    pub fn extract_command(&self, video_path: &Path, frames_folder: &Path) -> Command {
        let mut cmd = self.ffmpeg_command();
        cmd.arg("-i")
            .arg(video_path)
            .arg(frames_folder.join(FRAME_PATTERN));
        cmd
    }

    pub fn probe_command(&self, video_path: &Path) -> Command {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=r_frame_rate",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(video_path);
        cmd
    }

    pub fn mux_command(&self, rate: FrameRate, frames_folder: &Path, output_path: &Path) -> Command {
        let mut cmd = self.ffmpeg_command();
        cmd.arg("-r")
            .arg(rate.to_string())
            .args(["-f", "image2", "-i"])
            .arg(frames_folder.join(FRAME_PATTERN))
            .arg(output_path);
        cmd
    }

    /// Reads the frame rate of the first video stream.
    pub fn probe_frame_rate(&self, video_path: &Path) -> Result<FrameRate> {
        let output = run(self.probe_command(video_path))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
        line.parse()
    }
}

impl Transcoder for Ffmpeg {
    fn video_to_frames(&self, video_path: &Path, frames_folder: &Path) -> Result<()> {
        tracing::info!(
            video = %video_path.display(),
            frames = %frames_folder.display(),
            "turning video into frames"
        );
        fs::create_dir_all(frames_folder)
            .map_err(|e| VideoSegError::file_system(frames_folder, "create frames folder", e))?;

        run(self.extract_command(video_path, frames_folder))?;
        Ok(())
    }

    fn frames_to_video(
        &self,
        reference_video: &Path,
        frames_folder: &Path,
        output_path: &Path,
    ) -> Result<()> {
        let rate = self.probe_frame_rate(reference_video)?;
        tracing::info!(
            %rate,
            fps = rate.as_f64(),
            frames = %frames_folder.display(),
            output = %output_path.display(),
            "turning frames into video"
        );

        run(self.mux_command(rate, frames_folder, output_path))?;
        Ok(())
    }
}

/// Renders a command line for logs and error messages.
pub fn command_line(cmd: &Command) -> String {
    std::iter::once(cmd.get_program().to_os_string())
        .chain(cmd.get_args().map(|a| a.to_os_string()))
        .map(|part: OsString| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn run(mut cmd: Command) -> Result<Output> {
    let command = command_line(&cmd);
    tracing::debug!(%command, "running external command");

    let output = cmd.output().map_err(|e| VideoSegError::ExternalProcess {
        command: command.clone(),
        code: None,
        stderr: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(VideoSegError::ExternalProcess {
            command,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}
