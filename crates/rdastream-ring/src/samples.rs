use std::sync::atomic::{fence, AtomicU32, Ordering};

use crate::region::RegionHeader;

/// A contiguous range of samples returned by [`RingBuffer::get`].
///
/// [`RingBuffer::get`]: crate::RingBuffer::get
#[derive(Debug)]
pub enum Samples<'a> {
    /// Zero-copy view into the ring; the range did not cross the physical end.
    View(SampleView<'a>),
    /// Linearized copy of a range that wrapped around the physical end.
    Copied(SampleBlock),
}

/// Borrowed slots of a non-wrapping range.
///
/// Values are read lazily, so the writer may overwrite them while the view is
/// held. Check [`SampleView::is_intact`] after reading.
pub struct SampleView<'a> {
    pub(crate) slots: &'a [AtomicU32],
    pub(crate) header: &'a RegionHeader,
    pub(crate) channels: usize,
    pub(crate) first_index: u64,
}

/// Owned, row-major copy of a range.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    pub(crate) data: Vec<f32>,
    pub(crate) channels: usize,
    pub(crate) first_index: u64,
}

impl SampleView<'_> {
    pub fn rows(&self) -> usize {
        self.slots.len() / self.channels
    }

    pub fn value(&self, row: usize, channel: usize) -> Option<f32> {
        if channel >= self.channels {
            return None;
        }
        self.slots
            .get(row * self.channels + channel)
            .map(|slot| f32::from_bits(slot.load(Ordering::Relaxed)))
    }

    /// True while none of the viewed rows has been claimed for overwriting.
    pub fn is_intact(&self) -> bool {
        fence(Ordering::Acquire);
        let claimed = self.header.claimed.load(Ordering::Relaxed);
        self.first_index >= claimed.saturating_sub(self.header.capacity)
    }

    fn to_vec(&self) -> Vec<f32> {
        self.slots
            .iter()
            .map(|slot| f32::from_bits(slot.load(Ordering::Relaxed)))
            .collect()
    }
}

impl std::fmt::Debug for SampleView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleView")
            .field("first_index", &self.first_index)
            .field("rows", &self.rows())
            .field("channels", &self.channels)
            .finish()
    }
}

impl SampleBlock {
    /// Consume the block, returning its row-major samples.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

impl Samples<'_> {
    /// Number of rows (sample points) in the range.
    pub fn rows(&self) -> usize {
        match self {
            Samples::View(view) => view.rows(),
            Samples::Copied(block) => block.data.len() / block.channels,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Samples::View(view) => view.channels,
            Samples::Copied(block) => block.channels,
        }
    }

    /// Stream index of the first row.
    pub fn first_index(&self) -> u64 {
        match self {
            Samples::View(view) => view.first_index,
            Samples::Copied(block) => block.first_index,
        }
    }

    /// Stream index one past the last row.
    pub fn end_index(&self) -> u64 {
        self.first_index() + self.rows() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    pub fn is_zero_copy(&self) -> bool {
        matches!(self, Samples::View(_))
    }

    pub fn value(&self, row: usize, channel: usize) -> Option<f32> {
        match self {
            Samples::View(view) => view.value(row, channel),
            Samples::Copied(block) => {
                if channel >= block.channels {
                    return None;
                }
                block.data.get(row * block.channels + channel).copied()
            }
        }
    }

    /// All channels of one row.
    pub fn row(&self, row: usize) -> Option<Vec<f32>> {
        if row >= self.rows() {
            return None;
        }
        match self {
            Samples::View(view) => {
                let start = row * view.channels;
                Some(
                    view.slots[start..start + view.channels]
                        .iter()
                        .map(|slot| f32::from_bits(slot.load(Ordering::Relaxed)))
                        .collect(),
                )
            }
            Samples::Copied(block) => {
                let start = row * block.channels;
                Some(block.data[start..start + block.channels].to_vec())
            }
        }
    }

    /// Row-major copy of every sample.
    pub fn to_vec(&self) -> Vec<f32> {
        match self {
            Samples::View(view) => view.to_vec(),
            Samples::Copied(block) => block.as_slice().to_vec(),
        }
    }

    /// Mean of each channel over the range. Empty ranges yield NaN.
    pub fn channel_means(&self) -> Vec<f64> {
        let channels = self.channels();
        let rows = self.rows();
        let mut sums = vec![0f64; channels];
        for (idx, value) in self.to_vec().into_iter().enumerate() {
            sums[idx % channels] += f64::from(value);
        }
        sums.into_iter().map(|sum| sum / rows as f64).collect()
    }

    /// Whether the range is still fully held by the ring.
    ///
    /// Copies were validated when they were taken and are always intact.
    pub fn is_intact(&self) -> bool {
        match self {
            Samples::View(view) => view.is_intact(),
            Samples::Copied(_) => true,
        }
    }
}
