#![allow(unsafe_code)]
//! Shared sample region: one anonymous memory map holding a fixed header and
//! the sample slots.
//!
//! Layout:
//! ```text
//! ┌──────────────────────────────┬───────────────────────────────────────────┐
//! │ RegionHeader (64B, repr(C))  │ capacity × channels slots (AtomicU32 each) │
//! └──────────────────────────────┴───────────────────────────────────────────┘
//! ```
//! Slots hold `f32` bit patterns. Row `i` of the stream lives at physical row
//! `i % capacity`.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64};
use std::sync::Arc;

use memmap2::{MmapMut, MmapOptions};

use crate::error::{BufferError, Result};

/// Magic number written at the start of every region.
pub(crate) const MAGIC: u64 = 0x5244_4153_414D_0001;

/// Size of the region header in bytes (one cache line).
pub(crate) const REGION_HEADER_SIZE: usize = 64;

const SLOT_SIZE: usize = std::mem::size_of::<AtomicU32>();

/// Element type stored in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// IEEE-754 single precision, the only format RDA data frames carry.
    Float32,
}

impl SampleFormat {
    pub(crate) fn to_raw(self) -> u32 {
        match self {
            SampleFormat::Float32 => 1,
        }
    }

    pub(crate) fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(SampleFormat::Float32),
            _ => None,
        }
    }
}

/// Header at the start of the region.
///
/// Layout (64 bytes total):
/// - magic: u64
/// - channels: u32
/// - sample_format: u32
/// - capacity: u64 (rows)
/// - pocket: u64 (rows)
/// - claimed: AtomicU64 (rows the writer has started writing)
/// - total_written: AtomicU64 (rows published to readers)
/// - _reserved: [u8; 16]
#[repr(C)]
pub(crate) struct RegionHeader {
    pub(crate) magic: u64,
    pub(crate) channels: u32,
    pub(crate) sample_format: u32,
    pub(crate) capacity: u64,
    pub(crate) pocket: u64,
    pub(crate) claimed: AtomicU64,
    pub(crate) total_written: AtomicU64,
    _reserved: [u8; 16],
}

const _: () = assert!(
    std::mem::size_of::<RegionHeader>() == REGION_HEADER_SIZE,
    "RegionHeader size must equal REGION_HEADER_SIZE"
);

/// Shape of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    pub(crate) channels: usize,
    pub(crate) capacity: usize,
    pub(crate) pocket: usize,
    pub(crate) format: SampleFormat,
}

impl Layout {
    pub(crate) fn validate(&self) -> Result<usize> {
        if self.channels == 0 || self.channels > u32::MAX as usize {
            return Err(BufferError::InvalidLayout(format!(
                "channel count {} out of range",
                self.channels
            )));
        }
        if self.capacity == 0 {
            return Err(BufferError::InvalidLayout("capacity must be non-zero".into()));
        }
        if self.pocket == 0 || self.pocket > self.capacity {
            return Err(BufferError::InvalidLayout(format!(
                "pocket size {} must be within 1..={}",
                self.pocket, self.capacity
            )));
        }
        self.capacity
            .checked_mul(self.channels)
            .filter(|slots| slots.checked_mul(SLOT_SIZE).is_some())
            .ok_or_else(|| {
                BufferError::InvalidLayout(format!(
                    "{} rows × {} channels does not fit in memory",
                    self.capacity, self.channels
                ))
            })
    }
}

/// Memory-mapped storage shared by every handle to one ring.
pub(crate) struct SharedRegion {
    /// Keeps the mapping alive; all access goes through the raw pointers.
    _mmap: MmapMut,
    /// SAFETY: points to the start of `_mmap`, valid as long as it exists.
    header: *mut RegionHeader,
    /// SAFETY: points `REGION_HEADER_SIZE` bytes into `_mmap`, followed by
    /// `slot_count` slots.
    slots: *mut AtomicU32,
    slot_count: usize,
}

// SAFETY: the region is only touched through atomics once `allocate` returns;
// the non-atomic header fields are never written again.
unsafe impl Send for SharedRegion {}

// SAFETY: see above. Concurrent readers and the single writer synchronize
// through `claimed` and `total_written`.
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Map and initialize a zeroed region.
    pub(crate) fn allocate(layout: Layout) -> Result<Self> {
        let slot_count = layout.validate()?;
        let total_size = REGION_HEADER_SIZE + slot_count * SLOT_SIZE;

        let mut mmap = MmapOptions::new()
            .len(total_size)
            .map_anon()
            .map_err(BufferError::Allocation)?;
        debug_assert!(mmap.len() >= total_size, "mmap shorter than requested size");

        let base = mmap.as_mut_ptr();
        let header = base as *mut RegionHeader;
        // SAFETY: the mapping is page aligned and at least REGION_HEADER_SIZE
        // bytes long; nothing else can observe it yet.
        unsafe {
            header.write(RegionHeader {
                magic: MAGIC,
                channels: layout.channels as u32,
                sample_format: layout.format.to_raw(),
                capacity: layout.capacity as u64,
                pocket: layout.pocket as u64,
                claimed: AtomicU64::new(0),
                total_written: AtomicU64::new(0),
                _reserved: [0; 16],
            });
        }
        // SAFETY: total_size covers the header plus every slot. Anonymous maps
        // are zero filled, which is a valid AtomicU32 (0.0f32).
        let slots = unsafe { base.add(REGION_HEADER_SIZE) } as *mut AtomicU32;

        Ok(Self {
            _mmap: mmap,
            header,
            slots,
            slot_count,
        })
    }

    pub(crate) fn header(&self) -> &RegionHeader {
        // SAFETY: initialized in `allocate`, lives as long as `self`.
        unsafe { &*self.header }
    }

    pub(crate) fn slots(&self) -> &[AtomicU32] {
        // SAFETY: `slots` points at `slot_count` initialized atomics inside the
        // mapping owned by `self`.
        unsafe { std::slice::from_raw_parts(self.slots, self.slot_count) }
    }

    pub(crate) fn layout(&self) -> Result<Layout> {
        let header = self.header();
        if header.magic != MAGIC {
            return Err(BufferError::BadRegion);
        }
        let format = SampleFormat::from_raw(header.sample_format).ok_or(BufferError::BadRegion)?;
        Ok(Layout {
            channels: header.channels as usize,
            capacity: header.capacity as usize,
            pocket: header.pocket as usize,
            format,
        })
    }
}

/// Cloneable descriptor of an allocated sample region.
///
/// The ring that called `initialize` owns the allocation; every handle keeps
/// the storage valid, so a ring attached through a handle stays usable even
/// if the original ring is dropped first.
#[derive(Clone)]
pub struct RegionHandle {
    pub(crate) region: Arc<SharedRegion>,
}

impl RegionHandle {
    /// Channels per row.
    pub fn channels(&self) -> usize {
        self.region.header().channels as usize
    }

    /// Capacity in rows.
    pub fn capacity(&self) -> usize {
        self.region.header().capacity as usize
    }

    /// Whether both handles refer to the same region.
    pub fn same_region(&self, other: &RegionHandle) -> bool {
        Arc::ptr_eq(&self.region, &other.region)
    }
}

impl fmt::Debug for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionHandle")
            .field("channels", &self.channels())
            .field("capacity", &self.capacity())
            .field("region", &format!("{:p}", self.region.header))
            .finish()
    }
}
