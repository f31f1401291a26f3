//! Splits a unit count into contiguous, fixed-size ranges.

use crate::{Error, PartitionRange, Result};

/// Lazily yields [`PartitionRange`]s covering `[0, total)`.
///
/// Every range has length `batch_size` except possibly the last, which is
/// truncated. The iterator is cheap to clone, so a partitioning can be
/// restarted by cloning it before consumption.
#[derive(Clone, Debug)]
pub struct Partitions {
    next: u64,
    total: u64,
    batch_size: u64,
}

impl Partitions {
    /// Builds the partitioning of `total` units into ranges of `batch_size`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `batch_size` is zero.
    pub fn new(total: u64, batch_size: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::invalid_argument("batch size must be greater than 0"));
        }
        Ok(Self {
            next: 0,
            total,
            batch_size,
        })
    }

    /// Number of ranges this partitioning yields in total.
    pub const fn count_ranges(total: u64, batch_size: u64) -> u64 {
        total.div_ceil(batch_size)
    }
}

impl Iterator for Partitions {
    type Item = PartitionRange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let start = self.next;
        let end = start.saturating_add(self.batch_size).min(self.total);
        self.next = end;
        Some(PartitionRange::new(start, end))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = Self::count_ranges(self.total - self.next, self.batch_size);
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl core::iter::FusedIterator for Partitions {}

/// Splits a slice into sub-slices of at most `chunk_size` records.
///
/// Used on the consume side, where the processing batch size may differ from
/// the size of the group the channel delivered.
pub fn chunk_slice<T>(items: &[T], chunk_size: usize) -> impl Iterator<Item = &[T]> {
    items.chunks(chunk_size.max(1))
}
