use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::error::{ProtocolError, Result};
use crate::header::{MessageHeader, MessageKind, HEADER_SIZE};
use crate::message::{DataMessage, Message, StartMessage};

/// Start frame fixed portion: header + channel count (4) + sampling interval (8).
pub const START_FIXED_SIZE: usize = HEADER_SIZE + 4 + 8;

/// Data frame fixed portion: header + block number (4) + point count (4).
pub const DATA_FIXED_SIZE: usize = HEADER_SIZE + 4 + 4;

/// Default maximum frame size: 64 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const RESOLUTION_SIZE: usize = std::mem::size_of::<f64>();
const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Maximum declared frame size in bytes. Default: 64 MiB.
    pub max_frame_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Reject frames whose declared size exceeds `max` before allocating for them.
pub(crate) fn check_frame_size(header: &MessageHeader, max: usize) -> Result<()> {
    let size = header.size as usize;
    if size > max {
        return Err(ProtocolError::FrameTooLarge { size, max });
    }
    Ok(())
}

/// Decoded fixed body of a Start frame: `(channels, sampling_interval)`.
pub(crate) fn parse_start_fixed(fixed: &[u8]) -> Result<(usize, f64)> {
    let mut fixed = fixed;
    let channels = fixed.get_i32_le();
    if channels < 0 {
        return Err(ProtocolError::NegativeField {
            field: "channel count",
            value: channels,
        });
    }
    let interval = fixed.get_f64_le();
    Ok((channels as usize, interval))
}

/// Length of the variable region (resolutions + names) of a Start frame.
///
/// The names region is `size − START_FIXED_SIZE − channels × 8`.
pub(crate) fn start_variable_len(header: &MessageHeader, channels: usize) -> Result<usize> {
    let minimum = channels
        .checked_mul(RESOLUTION_SIZE)
        .and_then(|res| res.checked_add(START_FIXED_SIZE))
        .ok_or(ProtocolError::InvalidSize {
            size: header.size as usize,
            minimum: usize::MAX,
        })?;
    let size = header.size as usize;
    if size < minimum {
        return Err(ProtocolError::InvalidSize { size, minimum });
    }
    Ok(size - START_FIXED_SIZE)
}

/// Assemble a Start message from its fixed fields and variable region.
pub(crate) fn build_start(channels: usize, sampling_interval: f64, variable: &[u8]) -> StartMessage {
    let (mut resolutions_raw, names_raw) = variable.split_at(channels * RESOLUTION_SIZE);
    let mut resolutions = Vec::with_capacity(channels);
    for _ in 0..channels {
        resolutions.push(resolutions_raw.get_f64_le());
    }
    StartMessage {
        sampling_interval,
        resolutions,
        channel_names: StartMessage::parse_names(names_raw),
    }
}

/// Decoded fixed body of a Data frame: `(block_number, points)`.
pub(crate) fn parse_data_fixed(fixed: &[u8]) -> Result<(u32, u32)> {
    let mut fixed = fixed;
    let block = fixed.get_u32_le();
    let points = fixed.get_i32_le();
    if points < 0 {
        return Err(ProtocolError::NegativeField {
            field: "point count",
            value: points,
        });
    }
    Ok((block, points as u32))
}

/// Lengths of the float region and markers region of a Data frame.
///
/// `markers = size − DATA_FIXED_SIZE − channels × points × 4`.
pub(crate) fn data_variable_lens(
    header: &MessageHeader,
    channels: usize,
    points: u32,
) -> Result<(usize, usize)> {
    let size = header.size as usize;
    let float_len = channels
        .checked_mul(points as usize)
        .and_then(|n| n.checked_mul(SAMPLE_SIZE))
        .ok_or(ProtocolError::InvalidSize {
            size,
            minimum: usize::MAX,
        })?;
    let minimum = DATA_FIXED_SIZE.saturating_add(float_len);
    if size < minimum {
        return Err(ProtocolError::InvalidSize { size, minimum });
    }
    Ok((float_len, size - minimum))
}

/// Assemble a Data message from its fixed fields and variable region.
pub(crate) fn build_data(
    block_number: u32,
    points: u32,
    channels: usize,
    float_len: usize,
    variable: Bytes,
) -> DataMessage {
    let mut floats = variable.slice(..float_len);
    let markers = variable.slice(float_len..);
    let mut samples = Vec::with_capacity(float_len / SAMPLE_SIZE);
    while floats.has_remaining() {
        samples.push(floats.get_f32_le());
    }
    DataMessage {
        block_number,
        points,
        channels,
        samples,
        markers,
    }
}

fn frame_size(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
        size: len,
        max: u32::MAX as usize,
    })
}

/// Encode a bare header into `dst`.
pub fn encode_header(header: &MessageHeader, dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE);
    header.put(dst);
}

/// Encode a Start frame.
///
/// Wire format:
/// ```text
/// ┌────────────┬────────────┬──────────────┬──────────────────┬───────────────────┐
/// │ Header     │ nChannels  │ interval     │ resolutions      │ names             │
/// │ (24B)      │ (i32 LE)   │ (f64 LE)     │ (nChannels × f64)│ (null-separated)  │
/// └────────────┴────────────┴──────────────┴──────────────────┴───────────────────┘
/// ```
pub fn encode_start(msg: &StartMessage, dst: &mut BytesMut) -> Result<()> {
    let names = msg.names_region();
    let total = START_FIXED_SIZE + msg.resolutions.len() * RESOLUTION_SIZE + names.len();
    let size = frame_size(total)?;
    let channels = i32::try_from(msg.resolutions.len()).map_err(|_| ProtocolError::FrameTooLarge {
        size: total,
        max: u32::MAX as usize,
    })?;

    dst.reserve(total);
    MessageHeader::new(MessageKind::Start, size).put(dst);
    dst.put_i32_le(channels);
    dst.put_f64_le(msg.sampling_interval);
    for resolution in &msg.resolutions {
        dst.put_f64_le(*resolution);
    }
    dst.put_slice(&names);
    Ok(())
}

/// Encode a Data frame.
///
/// Wire format:
/// ```text
/// ┌────────────┬────────────┬────────────┬──────────────────────────┬──────────┐
/// │ Header     │ block      │ nPoints    │ samples                  │ markers  │
/// │ (24B)      │ (u32 LE)   │ (i32 LE)   │ (nPoints × nChannels f32)│ (rest)   │
/// └────────────┴────────────┴────────────┴──────────────────────────┴──────────┘
/// ```
pub fn encode_data(msg: &DataMessage, dst: &mut BytesMut) -> Result<()> {
    let expected = msg.points as usize * msg.channels;
    let total = DATA_FIXED_SIZE + msg.float_region_len() + msg.markers.len();
    if msg.samples.len() != expected {
        return Err(ProtocolError::InvalidSize {
            size: total,
            minimum: DATA_FIXED_SIZE + expected * SAMPLE_SIZE + msg.markers.len(),
        });
    }
    let size = frame_size(total)?;
    let points = i32::try_from(msg.points).map_err(|_| ProtocolError::NegativeField {
        field: "point count",
        value: msg.points as i32,
    })?;

    dst.reserve(total);
    MessageHeader::new(MessageKind::Data, size).put(dst);
    dst.put_u32_le(msg.block_number);
    dst.put_i32_le(points);
    for sample in &msg.samples {
        dst.put_f32_le(*sample);
    }
    dst.put_slice(&msg.markers);
    Ok(())
}

/// Encode a Stop frame (header only).
pub fn encode_stop(dst: &mut BytesMut) {
    encode_header(
        &MessageHeader::new(MessageKind::Stop, HEADER_SIZE as u32),
        dst,
    );
}

/// Decode one message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. `channels` is the
/// channel count of the current session and is required for Data frames.
pub fn decode_message(
    src: &mut BytesMut,
    channels: Option<usize>,
    max_frame_size: usize,
) -> Result<Option<Message>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&src[..HEADER_SIZE]);
    let header = MessageHeader::from_bytes(&raw);
    let body_len = header.body_len()?;
    check_frame_size(&header, max_frame_size)?;

    if src.len() < header.size as usize {
        return Ok(None); // Need more data
    }

    if let Some(err) = header.signature_error() {
        warn!(error = %err, kind = %header.kind, "frame with unknown signature");
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len).freeze();

    let message = match header.kind {
        MessageKind::Start => {
            let fixed_len = START_FIXED_SIZE - HEADER_SIZE;
            start_variable_len(&header, 0)?;
            let (channels, interval) = parse_start_fixed(&body[..fixed_len])?;
            start_variable_len(&header, channels)?;
            Message::Start(build_start(channels, interval, &body[fixed_len..]))
        }
        MessageKind::Data => {
            let channels = channels.ok_or(ProtocolError::MissingChannelCount)?;
            let fixed_len = DATA_FIXED_SIZE - HEADER_SIZE;
            if body_len < fixed_len {
                return Err(ProtocolError::InvalidSize {
                    size: header.size as usize,
                    minimum: DATA_FIXED_SIZE,
                });
            }
            let (block, points) = parse_data_fixed(&body[..fixed_len])?;
            let (float_len, _) = data_variable_lens(&header, channels, points)?;
            Message::Data(build_data(
                block,
                points,
                channels,
                float_len,
                body.slice(fixed_len..),
            ))
        }
        MessageKind::Stop => Message::Stop,
        kind => Message::Unknown {
            kind,
            len: body_len,
        },
    };

    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_start(names: &[&str]) -> StartMessage {
        StartMessage {
            sampling_interval: 1000.0,
            resolutions: vec![0.1; 3],
            channel_names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    fn sample_data(markers: &'static [u8]) -> DataMessage {
        DataMessage {
            block_number: 42,
            points: 2,
            channels: 3,
            samples: vec![0.5, -1.0, 2.25, 3.0, 4.5, -6.0],
            markers: Bytes::from_static(markers),
        }
    }

    #[test]
    fn start_round_trip() {
        let msg = sample_start(&["Fp1", "Fp2", "Cz"]);
        let mut buf = BytesMut::new();
        encode_start(&msg, &mut buf).unwrap();
        assert_eq!(buf.len(), START_FIXED_SIZE + 3 * 8 + 12);

        let decoded = decode_message(&mut buf, None, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, Message::Start(msg));
        assert!(buf.is_empty());
    }

    #[test]
    fn start_with_empty_names_region() {
        let msg = sample_start(&[]);
        let mut buf = BytesMut::new();
        encode_start(&msg, &mut buf).unwrap();
        assert_eq!(buf.len(), START_FIXED_SIZE + 3 * 8);

        let decoded = decode_message(&mut buf, None, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, Message::Start(msg));
    }

    #[test]
    fn data_round_trip_with_and_without_markers() {
        for markers in [&b""[..], &b"\x01\x00\x00\x00marker"[..]] {
            let msg = sample_data(markers);
            let mut buf = BytesMut::new();
            encode_data(&msg, &mut buf).unwrap();
            assert_eq!(buf.len(), DATA_FIXED_SIZE + 6 * 4 + markers.len());

            let decoded = decode_message(&mut buf, Some(3), DEFAULT_MAX_FRAME_SIZE)
                .unwrap()
                .unwrap();
            assert_eq!(decoded, Message::Data(msg));
        }
    }

    #[test]
    fn data_requires_channel_count() {
        let mut buf = BytesMut::new();
        encode_data(&sample_data(b""), &mut buf).unwrap();
        let err = decode_message(&mut buf, None, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingChannelCount));
    }

    #[test]
    fn data_with_mismatched_sample_count_rejected() {
        let mut msg = sample_data(b"");
        msg.samples.pop();
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_data(&msg, &mut buf),
            Err(ProtocolError::InvalidSize { .. })
        ));
    }

    #[test]
    fn data_float_region_larger_than_frame_rejected() {
        let mut buf = BytesMut::new();
        encode_data(&sample_data(b""), &mut buf).unwrap();
        // Decoding with more channels than encoded makes the float region overflow.
        let err = decode_message(&mut buf, Some(8), DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSize { .. }));
    }

    #[test]
    fn incomplete_frame_waits_for_more() {
        let mut full = BytesMut::new();
        encode_start(&sample_start(&["A"]), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..HEADER_SIZE - 1]);
        assert!(decode_message(&mut partial, None, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .is_none());

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(decode_message(&mut partial, None, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .is_none());
        assert_eq!(partial.len(), full.len() - 1);
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut buf = BytesMut::new();
        encode_header(&MessageHeader::new(MessageKind::Data, 4096), &mut buf);
        let err = decode_message(&mut buf, Some(1), 1024).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { size: 4096, max: 1024 }));
    }

    #[test]
    fn stop_and_unknown_frames() {
        let mut buf = BytesMut::new();
        encode_stop(&mut buf);
        encode_header(
            &MessageHeader::new(MessageKind::Undocumented, HEADER_SIZE as u32 + 5),
            &mut buf,
        );
        buf.put_slice(b"12345");

        let stop = decode_message(&mut buf, None, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(stop, Message::Stop);

        let unknown = decode_message(&mut buf, None, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(
            unknown,
            Message::Unknown {
                kind: MessageKind::Undocumented,
                len: 5
            }
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn negative_channel_count_rejected() {
        let mut buf = BytesMut::new();
        encode_header(
            &MessageHeader::new(MessageKind::Start, START_FIXED_SIZE as u32),
            &mut buf,
        );
        buf.put_i32_le(-2);
        buf.put_f64_le(1000.0);
        let err = decode_message(&mut buf, None, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, ProtocolError::NegativeField { value: -2, .. }));
    }
}
