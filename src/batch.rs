use std::slice::Chunks;

use crate::errors::{Result, VideoSegError};

/// Number of frames per batch when none is given on the command line.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Splits ordered frames into consecutive batches of `batch_size`; only the last may be shorter.
///
/// Batches borrow from `frames`, so partitioning never copies or reorders anything.
pub fn partition_frames<T>(frames: &[T], batch_size: usize) -> Result<Chunks<'_, T>> {
    if batch_size == 0 {
        return Err(VideoSegError::validation(
            "batch size",
            "must be a positive integer",
        ));
    }
    Ok(frames.chunks(batch_size))
}

/// Number of batches `len` frames produce, `None` for a zero batch size.
pub const fn batch_count(len: usize, batch_size: usize) -> Option<usize> {
    if batch_size == 0 {
        return None;
    }
    Some(len.div_ceil(batch_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_with_remainder() -> Result<()> {
        let frames: Vec<u32> = (0..25).collect();
        let sizes: Vec<_> = partition_frames(&frames, 10)?.map(<[u32]>::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        Ok(())
    }

    #[test]
    fn test_partition_exact_multiple() -> Result<()> {
        let frames: Vec<u32> = (0..30).collect();
        let sizes: Vec<_> = partition_frames(&frames, 10)?.map(<[u32]>::len).collect();
        assert_eq!(sizes, vec![10, 10, 10]);
        Ok(())
    }

    #[test]
    fn test_partition_preserves_order_and_count() -> Result<()> {
        for len in 0..40usize {
            for batch_size in 1..12usize {
                let frames: Vec<usize> = (0..len).collect();
                let batches: Vec<_> = partition_frames(&frames, batch_size)?.collect();

                assert_eq!(Some(batches.len()), batch_count(len, batch_size));
                assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= batch_size));
                let rejoined: Vec<usize> = batches.concat();
                assert_eq!(rejoined, frames);
            }
        }
        Ok(())
    }

    #[test]
    fn test_partition_empty_input_yields_no_batches() -> Result<()> {
        let frames: Vec<u32> = Vec::new();
        assert_eq!(partition_frames(&frames, 10)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_partition_rejects_zero_batch_size() {
        let frames = [1, 2, 3];
        assert!(matches!(
            partition_frames(&frames, 0),
            Err(VideoSegError::Validation { .. })
        ));
        assert_eq!(batch_count(frames.len(), 0), None);
        assert_eq!(batch_count(0, 0), None);
    }
}
