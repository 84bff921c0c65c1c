use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::errors::{Result, VideoSegError};

/// Width of the zero padded frame index used by both ffmpeg (`%09d`) and the output files.
pub const FRAME_INDEX_WIDTH: usize = 9;

/// One still image of a video, addressed by the numeric prefix of its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub file_name: String,
    pub full_path: PathBuf,
    pub index: u64,
}

impl Frame {
    /// Name of the composite written for this frame, e.g. `000000042.png`.
    pub fn output_file_name(&self) -> String {
        frame_file_name(self.index)
    }
}

/// Formats a frame index the way ffmpeg's `%09d.png` pattern does.
///
/// Indices with more than nine digits widen the field instead of failing, which is
/// also what ffmpeg does when it reads such a sequence back.
pub fn frame_file_name(index: u64) -> String {
    format!("{index:0width$}.png", width = FRAME_INDEX_WIDTH)
}

/// Parses the index from the text before the first `.` of a frame file name.
pub fn parse_frame_index(file_name: &str) -> Result<u64> {
    let prefix = file_name.split('.').next().unwrap_or_default();

    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VideoSegError::validation(
            "frame file name",
            format!("`{file_name}` does not start with a numeric frame index"),
        ));
    }

    prefix.parse::<u64>().map_err(|e| {
        VideoSegError::validation(
            "frame file name",
            format!("`{file_name}` has an out of range frame index: {e}"),
        )
    })
}

/// Lists the frames of `folder` in ascending index order.
///
/// Only regular files directly inside the folder are considered, symlinks resolved to
/// their targets; hidden entries are skipped. Two files resolving to the same index are rejected since their outputs
/// would overwrite each other.
pub fn list_frames(folder: &Path) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();

    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(folder).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
            VideoSegError::file_system(path, "list frames", source)
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(file_name) = entry.file_name().to_str() else {
            return Err(VideoSegError::validation(
                "frame file name",
                format!("{:?} is not valid UTF-8", entry.file_name()),
            ));
        };
        if file_name.starts_with('.') {
            continue;
        }

        frames.push(Frame {
            index: parse_frame_index(file_name)?,
            file_name: file_name.to_string(),
            full_path: entry.into_path(),
        });
    }

    frames.sort_by(compare_frames);

    if let Some(pair) = frames.windows(2).find(|pair| pair[0].index == pair[1].index) {
        return Err(VideoSegError::validation(
            "frame index",
            format!(
                "{} is shared by `{}` and `{}`",
                pair[0].index, pair[0].file_name, pair[1].file_name
            ),
        ));
    }

    Ok(frames)
}

fn compare_frames(a: &Frame, b: &Frame) -> Ordering {
    a.index
        .cmp(&b.index)
        .then_with(|| a.file_name.cmp(&b.file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_frame_file_name_is_zero_padded() {
        assert_eq!(frame_file_name(1), "000000001.png");
        assert_eq!(frame_file_name(42), "000000042.png");
        assert_eq!(frame_file_name(123_456_789), "123456789.png");
    }

    #[test]
    fn test_frame_file_name_widens_past_nine_digits() {
        assert_eq!(frame_file_name(1_000_000_000), "1000000000.png");
    }

    #[test]
    fn test_parse_frame_index() -> Result<()> {
        assert_eq!(parse_frame_index("000000042.png")?, 42);
        assert_eq!(parse_frame_index("7")?, 7);
        assert_eq!(parse_frame_index("000000003.result.png")?, 3);
        Ok(())
    }

    #[test]
    fn test_parse_frame_index_rejects_malformed_names() {
        for name in ["frame1.png", ".png", "12a.png", "-1.png", ""] {
            assert!(
                matches!(
                    parse_frame_index(name),
                    Err(VideoSegError::Validation { .. })
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_list_frames_sorts_numerically() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        for name in ["10.png", "2.png", "1.png", "000000003.png", "100.png"] {
            touch(temp_dir.path(), name);
        }

        let frames = list_frames(temp_dir.path())?;
        let indices: Vec<_> = frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 10, 100]);
        assert_eq!(frames[2].file_name, "000000003.png");
        assert_eq!(frames[2].full_path, temp_dir.path().join("000000003.png"));
        Ok(())
    }

    #[test]
    fn test_list_frames_skips_hidden_files_and_directories() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "000000001.png");
        touch(temp_dir.path(), ".DS_Store");
        fs::create_dir(temp_dir.path().join("nested")).unwrap();
        touch(&temp_dir.path().join("nested"), "000000002.png");

        let frames = list_frames(temp_dir.path())?;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].index, 1);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_list_frames_follows_symlinked_frames() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let frames_dir = temp_dir.path().join("frames");
        fs::create_dir(&frames_dir).unwrap();
        touch(&frames_dir, "000000001.png");
        touch(temp_dir.path(), "elsewhere.png");
        std::os::unix::fs::symlink(
            temp_dir.path().join("elsewhere.png"),
            frames_dir.join("000000002.png"),
        )
        .unwrap();

        let frames = list_frames(&frames_dir)?;
        let names: Vec<_> = frames.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["000000001.png", "000000002.png"]);
        assert_eq!(frames[1].full_path, frames_dir.join("000000002.png"));
        Ok(())
    }

    #[test]
    fn test_list_frames_rejects_duplicate_indices() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "1.png");
        touch(temp_dir.path(), "001.png");

        let err = list_frames(temp_dir.path()).unwrap_err();
        assert!(matches!(err, VideoSegError::Validation { .. }));
        assert!(err.to_string().contains("001.png"));
    }

    #[test]
    fn test_list_frames_missing_folder() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");

        assert!(matches!(
            list_frames(&missing),
            Err(VideoSegError::FileSystem { .. })
        ));
    }

    #[test]
    fn test_list_frames_empty_folder() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_frames(temp_dir.path())?.is_empty());
        Ok(())
    }
}
