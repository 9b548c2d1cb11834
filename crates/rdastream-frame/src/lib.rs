//! Wire codec for the RDA (Remote Data Access) streaming protocol.
//!
//! Every RDA frame starts with a fixed 24-byte header:
//! - A 16-byte protocol GUID used as a signature
//! - A 4-byte little-endian total frame size (header included)
//! - A 4-byte little-endian message type
//!
//! Start and Data frames carry a fixed body followed by a variable region
//! whose length is only known once the fixed body has been decoded. The
//! [`MessageReader`] performs those staged reads; callers always get complete
//! messages.

pub mod codec;
pub mod error;
pub mod header;
pub mod message;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::RdaCodec;
pub use codec::{
    decode_message, encode_data, encode_header, encode_start, encode_stop, CodecConfig,
    DATA_FIXED_SIZE, DEFAULT_MAX_FRAME_SIZE, START_FIXED_SIZE,
};
pub use error::{ProtocolError, Result};
pub use header::{validate_signature, MessageHeader, MessageKind, HEADER_SIZE, RDA_GUID};
pub use message::{DataMessage, Message, StartMessage};
pub use reader::MessageReader;
pub use writer::MessageWriter;
