use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{BufferError, Result};
use crate::region::{Layout, RegionHandle, SampleFormat, SharedRegion};
use crate::samples::{SampleBlock, SampleView, Samples};

/// Fixed-capacity circular sample buffer.
///
/// One writer appends rows with [`put`](RingBuffer::put); any number of
/// readers fetch ranges with [`get`](RingBuffer::get) without locking.
/// Rows are addressed by their stream index: the first row ever written is
/// index 0. Once more than `capacity` rows have been written, the oldest are
/// silently overwritten.
///
/// # Write discipline
///
/// The writer works in pockets of at most `pocket_size` rows. For each pocket
/// it first raises `claimed`, then writes the slots, then publishes
/// `total_written`. Readers validate against `total_written` before reading
/// and against `claimed` after, so a range that overlaps a pocket being
/// written is reported as [`BufferError::Retired`] instead of being returned
/// torn.
///
/// A block whose row count is not a multiple of the pocket size ends in a
/// short pocket. That pocket is published like any other when `put`
/// returns, so visibility follows `put` calls rather than pocket
/// boundaries, and a block is never held back waiting for rows that may
/// not arrive.
///
/// Only one ring attached to a region may call `put`.
#[derive(Debug, Default)]
pub struct RingBuffer {
    region: Option<RegionHandle>,
}

impl RingBuffer {
    /// An uninitialized ring. Every read fails with `NotInitialized` until
    /// [`initialize`](Self::initialize) or [`attach`](Self::attach).
    pub fn new() -> Self {
        Self { region: None }
    }

    /// Allocate the backing region.
    pub fn initialize(
        &mut self,
        channels: usize,
        capacity: usize,
        pocket_size: usize,
        format: SampleFormat,
    ) -> Result<()> {
        if self.region.is_some() {
            return Err(BufferError::AlreadyInitialized);
        }
        let layout = Layout {
            channels,
            capacity,
            pocket: pocket_size,
            format,
        };
        let region = SharedRegion::allocate(layout)?;
        debug!(channels, capacity, pocket_size, "sample region allocated");
        self.region = Some(RegionHandle {
            region: Arc::new(region),
        });
        Ok(())
    }

    /// Bind to a region allocated by another ring, without allocating.
    pub fn attach(handle: RegionHandle) -> Result<Self> {
        handle.region.layout()?;
        Ok(Self {
            region: Some(handle),
        })
    }

    /// Descriptor for attaching further rings to this region.
    pub fn handle(&self) -> Result<RegionHandle> {
        self.region.clone().ok_or(BufferError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.region.is_some()
    }

    /// Channels per row, or 0 when uninitialized.
    pub fn channels(&self) -> usize {
        self.region.as_ref().map_or(0, RegionHandle::channels)
    }

    /// Capacity in rows, or 0 when uninitialized.
    pub fn capacity(&self) -> usize {
        self.region.as_ref().map_or(0, RegionHandle::capacity)
    }

    /// Pocket size in rows, or 0 when uninitialized.
    pub fn pocket_size(&self) -> usize {
        self.region
            .as_ref()
            .map_or(0, |h| h.region.header().pocket as usize)
    }

    /// Rows published so far.
    pub fn total_written(&self) -> u64 {
        self.region.as_ref().map_or(0, |h| {
            h.region.header().total_written.load(Ordering::Acquire)
        })
    }

    /// Physical row the next write lands on.
    pub fn write_cursor(&self) -> usize {
        match self.capacity() {
            0 => 0,
            capacity => (self.total_written() % capacity as u64) as usize,
        }
    }

    /// Stream index of the oldest row still held.
    pub fn oldest_available(&self) -> u64 {
        self.total_written()
            .saturating_sub(self.capacity() as u64)
    }

    /// Append a row-major block of `rows × channels` samples.
    ///
    /// Returns the new `total_written`. Never blocks; rows older than
    /// `capacity` are overwritten. Blocks longer than the ring are accepted
    /// and only their last `capacity` rows survive.
    pub fn put(&self, block: &[f32]) -> Result<u64> {
        let handle = self.region.as_ref().ok_or(BufferError::NotInitialized)?;
        let region = &handle.region;
        let header = region.header();
        let slots = region.slots();
        let channels = header.channels as usize;
        let capacity = header.capacity;
        let pocket = header.pocket as usize;

        if block.len() % channels != 0 {
            return Err(BufferError::InvalidLayout(format!(
                "block of {} samples is not a multiple of {channels} channels",
                block.len()
            )));
        }

        // Single writer: nobody else moves the counters.
        let mut total = header.total_written.load(Ordering::Relaxed);
        for pocket_rows in block.chunks(pocket * channels) {
            let rows = (pocket_rows.len() / channels) as u64;

            header.claimed.store(total + rows, Ordering::Relaxed);
            fence(Ordering::Release);

            for (offset, row) in pocket_rows.chunks_exact(channels).enumerate() {
                let physical = ((total + offset as u64) % capacity) as usize;
                let base = physical * channels;
                for (slot, value) in slots[base..base + channels].iter().zip(row) {
                    slot.store(value.to_bits(), Ordering::Relaxed);
                }
            }

            total += rows;
            header.total_written.store(total, Ordering::Release);
        }
        Ok(total)
    }

    /// Samples for stream indices `[start, end)`.
    ///
    /// Non-wrapping ranges come back as a zero-copy [`Samples::View`];
    /// ranges that cross the physical end are copied into a
    /// [`Samples::Copied`] block.
    pub fn get(&self, start: u64, end: u64) -> Result<Samples<'_>> {
        let handle = self.region.as_ref().ok_or(BufferError::NotInitialized)?;
        let region = &handle.region;
        let header = region.header();
        let channels = header.channels as usize;
        let capacity = header.capacity;

        if start > end {
            return Err(BufferError::InvalidRange { start, end });
        }
        let total = header.total_written.load(Ordering::Acquire);
        if end > total {
            return Err(BufferError::NotYetAvailable {
                end,
                available: total,
            });
        }
        let oldest = total.saturating_sub(capacity);
        if start < oldest {
            return Err(BufferError::Retired { start, oldest });
        }

        // end - start <= capacity from here on.
        let rows = (end - start) as usize;
        let first = (start % capacity) as usize;
        let slots = region.slots();

        if first + rows <= capacity as usize {
            let view = SampleView {
                slots: &slots[first * channels..(first + rows) * channels],
                header,
                channels,
                first_index: start,
            };
            if !view.is_intact() {
                return Err(retired_by_claim(header, start));
            }
            return Ok(Samples::View(view));
        }

        let mut data = Vec::with_capacity(rows * channels);
        let tail = &slots[first * channels..];
        let head = &slots[..(first + rows - capacity as usize) * channels];
        data.extend(
            tail.iter()
                .chain(head)
                .map(|slot| f32::from_bits(slot.load(Ordering::Relaxed))),
        );

        fence(Ordering::Acquire);
        let claimed = header.claimed.load(Ordering::Relaxed);
        if start < claimed.saturating_sub(capacity) {
            return Err(retired_by_claim(header, start));
        }

        Ok(Samples::Copied(SampleBlock {
            data,
            channels,
            first_index: start,
        }))
    }
}

fn retired_by_claim(header: &crate::region::RegionHeader, start: u64) -> BufferError {
    let claimed = header.claimed.load(Ordering::Relaxed);
    BufferError::Retired {
        start,
        oldest: claimed.saturating_sub(header.capacity),
    }
}
