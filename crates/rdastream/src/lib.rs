//! Streaming client for RDA (Remote Data Access) biosignal servers.
//!
//! An RDA server pushes a Start message describing the recording followed
//! by blocks of float samples. rdastream keeps a background worker draining
//! that socket into a shared ring buffer so that analysis code can read
//! recent windows without ever stalling the network side.
//!
//! # Crate Structure
//!
//! - [`transport`]: connected byte streams (TCP, Unix sockets)
//! - [`frame`]: RDA wire codec, blocking reader/writer and an optional async codec
//! - [`ring`]: shared sample ring with pocketed publication
//! - [`client`]: streaming worker, control channel and the client facade

/// Re-export transport types.
pub mod transport {
    pub use rdastream_transport::*;
}

/// Re-export frame codec types.
pub mod frame {
    pub use rdastream_frame::*;
}

/// Re-export ring buffer types.
pub mod ring {
    pub use rdastream_ring::*;
}

/// Re-export client types.
pub mod client {
    pub use rdastream_client::*;
}

pub use rdastream_client::{ClientConfig, ClientError, RdaClient};
