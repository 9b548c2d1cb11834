use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_data, encode_start, encode_stop, CodecConfig};
use crate::error::{ProtocolError, Result};
use crate::header::MessageHeader;
use crate::message::{DataMessage, StartMessage};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete RDA frames to any `Write` stream.
///
/// The client never writes to the server; this is the producer side, used by
/// the mock server and by tests.
pub struct MessageWriter<T> {
    inner: T,
    buf: BytesMut,
    config: CodecConfig,
}

impl<T: Write> MessageWriter<T> {
    /// Create a new message writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, CodecConfig::default())
    }

    /// Create a new message writer with explicit configuration.
    pub fn with_config(inner: T, config: CodecConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a Start frame (blocking).
    pub fn write_start(&mut self, msg: &StartMessage) -> Result<()> {
        self.buf.clear();
        encode_start(msg, &mut self.buf)?;
        self.send_buffered()
    }

    /// Write a Data frame (blocking).
    pub fn write_data(&mut self, msg: &DataMessage) -> Result<()> {
        self.buf.clear();
        encode_data(msg, &mut self.buf)?;
        self.send_buffered()
    }

    /// Write a Stop frame (blocking).
    pub fn write_stop(&mut self) -> Result<()> {
        self.buf.clear();
        encode_stop(&mut self.buf);
        self.send_buffered()
    }

    /// Write an arbitrary header followed by an opaque body.
    ///
    /// The header is written as given, so callers can produce frames with
    /// foreign signatures or sizes.
    pub fn write_raw(&mut self, header: &MessageHeader, body: &[u8]) -> Result<()> {
        self.buf.clear();
        header.put(&mut self.buf);
        self.buf.extend_from_slice(body);
        self.send_buffered()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(ProtocolError::Io(err)),
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

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    fn send_buffered(&mut self) -> Result<()> {
        if self.buf.len() > self.config.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: self.buf.len(),
                max: self.config.max_frame_size,
            });
        }

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(ProtocolError::Io(ErrorKind::WriteZero.into())),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(ProtocolError::Io(err)),
            }
        }

        self.flush()
    }
}
