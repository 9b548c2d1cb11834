//! Connected byte streams for RDA clients.
//!
//! The RDA producer is reached over TCP; Unix domain sockets are supported on
//! unix for local relays and tests. Everything else builds on top of the
//! [`RdaStream`] type provided here.

pub mod error;
pub mod stream;

pub use error::{Result, TransportError};
pub use stream::RdaStream;
