use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_message, encode_data, encode_start, encode_stop, CodecConfig};
use crate::error::ProtocolError;
use crate::header::MessageHeader;
use crate::message::Message;

/// `tokio_util` codec for RDA frames.
///
/// Data frames need the session's channel count. The codec learns it from
/// the first Start frame it decodes, or it can be seeded with
/// [`RdaCodec::with_channels`] when resuming a session mid-stream.
#[derive(Debug, Clone, Default)]
pub struct RdaCodec {
    config: CodecConfig,
    channels: Option<usize>,
}

impl RdaCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self {
            config,
            channels: None,
        }
    }

    /// Seed the channel count for a resumed session.
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Channel count of the current session, once known.
    pub fn channels(&self) -> Option<usize> {
        self.channels
    }
}

impl Decoder for RdaCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let decoded = decode_message(src, self.channels, self.config.max_frame_size)?;
        if let Some(Message::Start(start)) = &decoded {
            self.channels = Some(start.channels());
        }
        Ok(decoded)
    }
}

impl Encoder<&Message> for RdaCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Start(start) => encode_start(start, dst),
            Message::Data(data) => encode_data(data, dst),
            Message::Stop => {
                encode_stop(dst);
                Ok(())
            }
            Message::Unknown { kind, len } => {
                let size = crate::header::HEADER_SIZE + len;
                let size = u32::try_from(size).map_err(|_| ProtocolError::FrameTooLarge {
                    size,
                    max: u32::MAX as usize,
                })?;
                MessageHeader::new(*kind, size).put(dst);
                dst.resize(dst.len() + len, 0);
                Ok(())
            }
        }
    }
}
