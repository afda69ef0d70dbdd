use std::io::{Read, Write};

use crate::error::Result;

/// A connected byte stream handed out by a connection provider.
///
/// Ordered, reliable, bidirectional. On Unix this wraps a Unix domain
/// socket stream (including the socket pairs [`crate::MemNet`] creates).
pub struct NetStream {
    inner: NetStreamInner,
}

enum NetStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for NetStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            NetStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for NetStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            NetStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            NetStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl NetStream {
    /// Wrap a Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: NetStreamInner::Unix(stream),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    ///
    /// Clones share the underlying socket, so one side can read while the
    /// other writes.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            NetStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
        }
    }

    /// Shut down both directions of the stream.
    ///
    /// Readers on any clone observe end-of-stream; writers fail.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            NetStreamInner::Unix(stream) => {
                stream.shutdown(std::net::Shutdown::Both)?;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for NetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            NetStreamInner::Unix(_) => f.debug_struct("NetStream").field("type", &"unix").finish(),
        }
    }
}
