use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};

/// A connected stream to an RDA producer. Implements `Read` and `Write`.
///
/// On every platform this can wrap a TCP stream. On unix it can also wrap a
/// Unix domain socket stream.
pub struct RdaStream {
    inner: RdaStreamInner,
}

enum RdaStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for RdaStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            RdaStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            RdaStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for RdaStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            RdaStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            RdaStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            RdaStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            RdaStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl RdaStream {
    /// Connect to an RDA server over TCP (blocking).
    ///
    /// `TCP_NODELAY` is enabled on the resulting stream; every address the
    /// input resolves to is tried in order.
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let label = format!("{addr:?}");
        let stream = TcpStream::connect(&addr).map_err(|source| TransportError::Connect {
            addr: label.clone(),
            source,
        })?;
        stream.set_nodelay(true)?;
        debug!(addr = %label, "connected to rda server");
        Ok(Self::from_tcp(stream))
    }

    /// Connect over TCP, giving up on each resolved address after `timeout`.
    pub fn connect_timeout(addr: impl ToSocketAddrs + std::fmt::Debug, timeout: Duration) -> Result<Self> {
        let label = format!("{addr:?}");
        let addrs = addr.to_socket_addrs().map_err(|source| TransportError::Connect {
            addr: label.clone(),
            source,
        })?;

        let mut last_err = None;
        for candidate in addrs {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(addr = %candidate, "connected to rda server");
                    return Ok(Self::from_tcp(stream));
                }
                Err(err) => last_err = Some(err),
            }
        }

        match last_err {
            Some(source) => Err(TransportError::Connect {
                addr: label,
                source,
            }),
            None => Err(TransportError::Resolve(label)),
        }
    }

    /// Connect to a Unix domain socket relay (blocking).
    #[cfg(unix)]
    pub fn connect_unix(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = std::os::unix::net::UnixStream::connect(path).map_err(|source| {
            TransportError::Connect {
                addr: path.display().to_string(),
                source,
            }
        })?;
        debug!(?path, "connected to unix domain socket");
        Ok(Self::from_unix(stream))
    }

    /// Wrap an already connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: RdaStreamInner::Tcp(stream),
        }
    }

    /// Wrap an already connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: RdaStreamInner::Unix(stream),
        }
    }

    /// Set read timeout on the underlying stream.
    ///
    /// The timeout is a property of the socket, so it applies to every
    /// duplicate obtained through [`RdaStream::try_clone`].
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            RdaStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            RdaStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            RdaStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            RdaStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    ///
    /// Both handles refer to the same connection; bytes consumed through one
    /// are gone for the other.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            RdaStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
            #[cfg(unix)]
            RdaStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
        }
    }

    /// Shut down both directions of the connection.
    ///
    /// Unlike dropping one handle, this is observed by every duplicate.
    pub fn shutdown(&self) -> Result<()> {
        let res = match &self.inner {
            RdaStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            RdaStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match res {
            Ok(()) => Ok(()),
            // Already closed by the peer.
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Human-readable peer address for diagnostics.
    pub fn peer_label(&self) -> String {
        match &self.inner {
            RdaStreamInner::Tcp(stream) => stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "tcp:<unknown>".to_string()),
            #[cfg(unix)]
            RdaStreamInner::Unix(stream) => stream
                .peer_addr()
                .ok()
                .and_then(|addr| addr.as_pathname().map(|p| p.display().to_string()))
                .unwrap_or_else(|| "unix:<unnamed>".to_string()),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            RdaStreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            RdaStreamInner::Unix(_) => "unix-domain-socket",
        }
    }
}

impl std::fmt::Debug for RdaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdaStream")
            .field("type", &self.transport_name())
            .field("peer", &self.peer_label())
            .finish()
    }
}
