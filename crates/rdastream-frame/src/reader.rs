use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::debug;

use crate::codec::{
    build_data, build_start, check_frame_size, data_variable_lens, parse_data_fixed,
    parse_start_fixed, start_variable_len, CodecConfig, DATA_FIXED_SIZE, START_FIXED_SIZE,
};
use crate::error::{ProtocolError, Result};
use crate::header::{MessageHeader, MessageKind, HEADER_SIZE};
use crate::message::{DataMessage, Message, StartMessage};

const SKIP_CHUNK_SIZE: usize = 8 * 1024;

/// Reads RDA messages from any `Read` stream.
///
/// Reads are staged: header, fixed body, then the variable region whose
/// length depends on the fixed body. The reader never consumes bytes past the
/// end of the current frame, so the stream can be handed to another owner
/// between frames.
///
/// A read timeout before the first header byte is returned to the caller.
/// Timeouts inside a frame are retried until the optional stall check
/// returns true, which aborts the frame with [`ProtocolError::Stalled`].
pub struct MessageReader<T> {
    inner: T,
    config: CodecConfig,
    stall_check: Option<StallCheck>,
}

type StallCheck = Box<dyn FnMut() -> bool + Send>;

/// How a section is allowed to end early.
#[derive(Clone, Copy)]
enum Section {
    /// First bytes of a frame; a timeout before any byte arrives is reported.
    Header,
    /// Fixed body; EOF is a short read.
    Fixed,
    /// Variable region; EOF truncates the frame.
    Variable,
}

impl<T: Read> MessageReader<T> {
    /// Create a new message reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, CodecConfig::default())
    }

    /// Create a new message reader with explicit configuration.
    pub fn with_config(inner: T, config: CodecConfig) -> Self {
        Self {
            inner,
            config,
            stall_check: None,
        }
    }

    /// Install a check consulted whenever a read times out inside a frame.
    ///
    /// Returning true gives up on the frame.
    pub fn set_stall_check<F>(&mut self, check: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.stall_check = Some(Box::new(check));
    }

    /// Builder form of [`MessageReader::set_stall_check`].
    pub fn with_stall_check<F>(mut self, check: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.set_stall_check(check);
        self
    }

    /// Read the next frame header (blocking).
    ///
    /// A closed or short stream yields [`ProtocolError::ShortRead`]. The
    /// signature is not checked here.
    pub fn read_header(&mut self) -> Result<MessageHeader> {
        let mut raw = [0u8; HEADER_SIZE];
        self.fill(&mut raw, Section::Header)?;
        Ok(MessageHeader::from_bytes(&raw))
    }

    /// Read the body of a Start frame whose header was already consumed.
    pub fn read_start(&mut self, header: &MessageHeader) -> Result<StartMessage> {
        check_frame_size(header, self.config.max_frame_size)?;
        start_variable_len(header, 0)?;

        let mut fixed = [0u8; START_FIXED_SIZE - HEADER_SIZE];
        self.fill(&mut fixed, Section::Fixed)?;
        let (channels, interval) = parse_start_fixed(&fixed)?;

        let variable_len = start_variable_len(header, channels)?;
        let mut variable = vec![0u8; variable_len];
        self.fill(&mut variable, Section::Variable)?;

        Ok(build_start(channels, interval, &variable))
    }

    /// Read the body of a Data frame whose header was already consumed.
    ///
    /// `channels` comes from the session's Start message; Data frames do not
    /// carry it.
    pub fn read_data(&mut self, header: &MessageHeader, channels: usize) -> Result<DataMessage> {
        check_frame_size(header, self.config.max_frame_size)?;
        if (header.size as usize) < DATA_FIXED_SIZE {
            return Err(ProtocolError::InvalidSize {
                size: header.size as usize,
                minimum: DATA_FIXED_SIZE,
            });
        }

        let mut fixed = [0u8; DATA_FIXED_SIZE - HEADER_SIZE];
        self.fill(&mut fixed, Section::Fixed)?;
        let (block, points) = parse_data_fixed(&fixed)?;

        let (float_len, markers_len) = data_variable_lens(header, channels, points)?;
        let mut variable = BytesMut::zeroed(float_len + markers_len);
        self.fill(&mut variable, Section::Variable)?;

        Ok(build_data(block, points, channels, float_len, variable.freeze()))
    }

    /// Discard the body of a frame whose header was already consumed.
    ///
    /// Returns the number of bytes skipped.
    pub fn skip_body(&mut self, header: &MessageHeader) -> Result<usize> {
        let total = header.body_len()?;
        let mut scratch = [0u8; SKIP_CHUNK_SIZE];
        let mut remaining = total;
        while remaining > 0 {
            let chunk = remaining.min(SKIP_CHUNK_SIZE);
            self.fill(&mut scratch[..chunk], Section::Variable)
                .map_err(|err| match err {
                    ProtocolError::Truncated { received, .. } => ProtocolError::Truncated {
                        expected: total,
                        received: total - remaining + received,
                    },
                    ProtocolError::Stalled { received, .. } => ProtocolError::Stalled {
                        expected: total,
                        received: total - remaining + received,
                    },
                    other => other,
                })?;
            remaining -= chunk;
        }
        Ok(total)
    }

    /// Read the body of any frame and return it as a tagged [`Message`].
    ///
    /// Bodies of frames other than Start, Data and Stop are discarded.
    pub fn read_message(
        &mut self,
        header: &MessageHeader,
        channels: Option<usize>,
    ) -> Result<Message> {
        match header.kind {
            MessageKind::Start => Ok(Message::Start(self.read_start(header)?)),
            MessageKind::Data => {
                let channels = channels.ok_or(ProtocolError::MissingChannelCount)?;
                Ok(Message::Data(self.read_data(header, channels)?))
            }
            MessageKind::Stop => {
                self.skip_body(header)?;
                Ok(Message::Stop)
            }
            kind => {
                let len = self.skip_body(header)?;
                debug!(%kind, len, "discarded frame body");
                Ok(Message::Unknown { kind, len })
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    fn fill(&mut self, buf: &mut [u8], section: Section) -> Result<()> {
        let expected = buf.len();
        let mut filled = 0usize;
        while filled < expected {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(match section {
                        Section::Header | Section::Fixed => ProtocolError::ShortRead {
                            expected,
                            received: filled,
                        },
                        Section::Variable => ProtocolError::Truncated {
                            expected,
                            received: filled,
                        },
                    });
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    // Still on a frame boundary: let the caller decide.
                    if filled == 0 && matches!(section, Section::Header) {
                        return Err(ProtocolError::Io(err));
                    }
                    if let Some(check) = self.stall_check.as_mut() {
                        if check() {
                            return Err(ProtocolError::Stalled {
                                expected,
                                received: filled,
                            });
                        }
                    }
                    continue;
                }
                Err(err) => return Err(ProtocolError::Io(err)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;
    use crate::codec::{encode_data, encode_header, encode_start, encode_stop};
    use crate::header::RDA_GUID;

    fn start_msg() -> StartMessage {
        StartMessage {
            sampling_interval: 2000.0,
            resolutions: vec![0.1, 0.2],
            channel_names: vec!["C3".into(), "C4".into()],
        }
    }

    fn data_msg(block: u32, markers: &'static [u8]) -> DataMessage {
        DataMessage {
            block_number: block,
            points: 3,
            channels: 2,
            samples: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            markers: Bytes::from_static(markers),
        }
    }

    fn session_bytes() -> Vec<u8> {
        let mut wire = BytesMut::new();
        encode_start(&start_msg(), &mut wire).unwrap();
        encode_data(&data_msg(1, b""), &mut wire).unwrap();
        encode_data(&data_msg(2, b"mk"), &mut wire).unwrap();
        encode_stop(&mut wire);
        wire.to_vec()
    }

    #[test]
    fn read_full_session() {
        let mut reader = MessageReader::new(Cursor::new(session_bytes()));

        let header = reader.read_header().unwrap();
        assert_eq!(header.kind, MessageKind::Start);
        assert_eq!(reader.read_start(&header).unwrap(), start_msg());

        let header = reader.read_header().unwrap();
        assert_eq!(reader.read_data(&header, 2).unwrap(), data_msg(1, b""));

        let header = reader.read_header().unwrap();
        let data = reader.read_data(&header, 2).unwrap();
        assert_eq!(data, data_msg(2, b"mk"));
        assert_eq!(data.markers.as_ref(), b"mk");

        let header = reader.read_header().unwrap();
        assert_eq!(reader.read_message(&header, Some(2)).unwrap(), Message::Stop);

        let err = reader.read_header().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ShortRead {
                expected: HEADER_SIZE,
                received: 0
            }
        ));
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: session_bytes(),
            pos: 0,
        };
        let mut reader = MessageReader::new(byte_reader);

        let header = reader.read_header().unwrap();
        assert_eq!(reader.read_start(&header).unwrap(), start_msg());
        let header = reader.read_header().unwrap();
        assert_eq!(reader.read_data(&header, 2).unwrap(), data_msg(1, b""));
    }

    #[test]
    fn short_fixed_portion_is_hard_error() {
        let mut wire = BytesMut::new();
        encode_start(&start_msg(), &mut wire).unwrap();
        wire.truncate(HEADER_SIZE + 6);

        let mut reader = MessageReader::new(Cursor::new(wire.to_vec()));
        let header = reader.read_header().unwrap();
        let err = reader.read_start(&header).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ShortRead {
                expected: 12,
                received: 6
            }
        ));
    }

    #[test]
    fn truncated_variable_region() {
        let mut wire = BytesMut::new();
        encode_data(&data_msg(7, b"markers"), &mut wire).unwrap();
        wire.truncate(wire.len() - 3);

        let mut reader = MessageReader::new(Cursor::new(wire.to_vec()));
        let header = reader.read_header().unwrap();
        let err = reader.read_data(&header, 2).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    #[test]
    fn wrong_signature_still_decodes() {
        let mut wire = BytesMut::new();
        encode_start(&start_msg(), &mut wire).unwrap();
        wire[0] = !RDA_GUID[0];

        let mut reader = MessageReader::new(Cursor::new(wire.to_vec()));
        let header = reader.read_header().unwrap();
        assert!(!header.has_valid_signature());
        assert_eq!(reader.read_start(&header).unwrap(), start_msg());
    }

    #[test]
    fn unknown_frames_are_skipped_exactly() {
        let mut wire = BytesMut::new();
        encode_header(
            &MessageHeader::new(MessageKind::Undocumented, (HEADER_SIZE + 20_000) as u32),
            &mut wire,
        );
        wire.put_bytes(0xEE, 20_000);
        encode_header(&MessageHeader::new(MessageKind::Other(99), HEADER_SIZE as u32), &mut wire);
        encode_data(&data_msg(3, b""), &mut wire).unwrap();

        let mut reader = MessageReader::new(Cursor::new(wire.to_vec()));

        let header = reader.read_header().unwrap();
        assert_eq!(
            reader.read_message(&header, Some(2)).unwrap(),
            Message::Unknown {
                kind: MessageKind::Undocumented,
                len: 20_000
            }
        );
        let header = reader.read_header().unwrap();
        assert_eq!(
            reader.read_message(&header, Some(2)).unwrap(),
            Message::Unknown {
                kind: MessageKind::Other(99),
                len: 0
            }
        );
        let header = reader.read_header().unwrap();
        assert_eq!(
            reader.read_message(&header, Some(2)).unwrap(),
            Message::Data(data_msg(3, b""))
        );
    }

    #[test]
    fn truncated_skip_reports_progress() {
        let mut wire = BytesMut::new();
        encode_header(
            &MessageHeader::new(MessageKind::Other(5), (HEADER_SIZE + 100) as u32),
            &mut wire,
        );
        wire.put_bytes(0, 40);

        let mut reader = MessageReader::new(Cursor::new(wire.to_vec()));
        let header = reader.read_header().unwrap();
        let err = reader.skip_body(&header).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                expected: 100,
                received: 40
            }
        ));
    }

    #[test]
    fn oversized_frame_rejected_before_body() {
        let mut wire = BytesMut::new();
        encode_data(&data_msg(1, b""), &mut wire).unwrap();
        let cfg = CodecConfig { max_frame_size: 16 };
        let mut reader = MessageReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let header = reader.read_header().unwrap();
        let err = reader.read_data(&header, 2).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { max: 16, .. }));
    }

    #[test]
    fn data_without_channel_count_rejected() {
        let mut wire = BytesMut::new();
        encode_data(&data_msg(1, b""), &mut wire).unwrap();
        let mut reader = MessageReader::new(Cursor::new(wire.to_vec()));
        let header = reader.read_header().unwrap();
        assert!(matches!(
            reader.read_message(&header, None),
            Err(ProtocolError::MissingChannelCount)
        ));
    }

    #[test]
    fn timeout_on_frame_boundary_is_reported() {
        let reader = TimeoutThenData {
            timeouts_left: 1,
            bytes: session_bytes(),
            pos: 0,
        };
        let mut reader = MessageReader::new(reader);
        let err = reader.read_header().unwrap_err();
        assert!(err.is_timeout());

        let header = reader.read_header().unwrap();
        assert_eq!(reader.read_start(&header).unwrap(), start_msg());
    }

    #[test]
    fn timeout_inside_frame_is_retried() {
        let mut inner = TimeoutThenData {
            timeouts_left: 0,
            bytes: session_bytes(),
            pos: 0,
        };
        let mut head = [0u8; 10];
        inner.read_exact(&mut head).unwrap();
        inner.timeouts_left = 3;

        // Re-assemble the stream: the first 10 bytes were already read above.
        let mut reader = MessageReader::new(std::io::Cursor::new(head.to_vec()).chain(inner));
        let header = reader.read_header().unwrap();
        assert_eq!(reader.read_start(&header).unwrap(), start_msg());
    }

    #[test]
    fn stall_check_aborts_partial_header() {
        let mut inner = TimeoutThenData {
            timeouts_left: 0,
            bytes: session_bytes(),
            pos: 0,
        };
        let mut head = [0u8; 10];
        inner.read_exact(&mut head).unwrap();
        inner.timeouts_left = u8::MAX;

        let mut checks = 0;
        let mut reader = MessageReader::new(Cursor::new(head.to_vec()).chain(inner))
            .with_stall_check(move || {
                checks += 1;
                checks == 3
            });
        let err = reader.read_header().unwrap_err();
        assert!(!err.is_timeout());
        assert!(matches!(
            err,
            ProtocolError::Stalled {
                expected: HEADER_SIZE,
                received: 10
            }
        ));
    }

    #[test]
    fn stall_check_is_not_consulted_on_frame_boundary() {
        let reader = TimeoutThenData {
            timeouts_left: 1,
            bytes: session_bytes(),
            pos: 0,
        };
        let mut reader = MessageReader::new(reader).with_stall_check(|| true);
        assert!(reader.read_header().unwrap_err().is_timeout());
        let header = reader.read_header().unwrap();
        assert_eq!(reader.read_start(&header).unwrap(), start_msg());
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            state: 0,
            bytes: session_bytes(),
            pos: 0,
        };
        let mut reader = MessageReader::new(reader);
        let header = reader.read_header().unwrap();
        assert_eq!(header.kind, MessageKind::Start);
    }

    #[test]
    #[cfg(unix)]
    fn reader_stops_at_frame_boundary() {
        let (mut left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut wire = BytesMut::new();
        encode_data(&data_msg(1, b""), &mut wire).unwrap();
        encode_data(&data_msg(2, b""), &mut wire).unwrap();
        std::io::Write::write_all(&mut left, &wire).unwrap();

        let dup = right.try_clone().unwrap();
        let mut first = MessageReader::new(right);
        let header = first.read_header().unwrap();
        assert_eq!(first.read_data(&header, 2).unwrap().block_number, 1);

        // A second owner of the same socket picks up exactly at the next frame.
        let mut second = MessageReader::new(dup);
        let header = second.read_header().unwrap();
        assert_eq!(second.read_data(&header, 2).unwrap().block_number, 2);
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct TimeoutThenData {
        timeouts_left: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for TimeoutThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.timeouts_left > 0 {
                self.timeouts_left -= 1;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct InterruptedThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
