//! Fixed-capacity sample ring shared between the streaming worker and its
//! readers.
//!
//! The ring stores rows of `f32` samples (one value per channel) in a single
//! anonymous memory map. A [`RegionHandle`] lets another thread attach to the
//! same storage without copying; the worker writes through one ring while the
//! client reads through another.

pub mod error;
pub mod region;
pub mod ring;
pub mod samples;

pub use error::{BufferError, Result};
pub use region::{RegionHandle, SampleFormat};
pub use ring::RingBuffer;
pub use samples::{SampleBlock, SampleView, Samples};
