use std::io;
use std::time::Duration;

use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};

use crate::protocol::AdbError;

/// Read size of a single [`ShellSession::read`] call.
const READ_CHUNK: usize = 1024;

/// An interactive adb connection, handed out after a `shell:<cmd>` handshake.
///
/// The session keeps the device-attached socket open (TCP keep-alive set)
/// and drives its own reactor on the calling thread, so it stays usable
/// after the owning [`Client`](crate::Client) is stopped. The socket is
/// closed when the session is dropped.
pub struct ShellSession {
    // Declared before the runtime so the socket deregisters first on drop.
    stream: Option<TcpStream>,
    runtime: Runtime,
}

impl ShellSession {
    /// Adopt a socket salvaged from a completed shell handshake.
    pub(crate) fn new(stream: TcpStream) -> Result<Self, AdbError> {
        let std_stream = stream.into_std()?;
        SockRef::from(&std_stream).set_keepalive(true)?;

        let runtime = Builder::new_current_thread().enable_all().build()?;
        let stream = {
            let _guard = runtime.enter();
            TcpStream::from_std(std_stream)?
        };

        Ok(Self {
            stream: Some(stream),
            runtime,
        })
    }

    /// Write data to the session, draining the whole buffer.
    ///
    /// Typically used to feed stdin of the shell command; the data should
    /// end with a newline.
    pub fn write(&mut self, data: &[u8]) -> Result<(), AdbError> {
        let stream = self.stream.as_mut().ok_or_else(session_closed)?;
        self.runtime.block_on(stream.write_all(data))?;
        Ok(())
    }

    /// Read up to 1024 bytes, blocking until the device writes something.
    ///
    /// Returns an empty buffer once the session is closed, locally or by
    /// the device.
    pub fn read(&mut self) -> Result<Vec<u8>, AdbError> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(Vec::new()),
        };

        let mut buf = [0u8; READ_CHUNK];
        let read = self.runtime.block_on(stream.read(&mut buf))?;
        Ok(buf[..read].to_vec())
    }

    /// Read up to 1024 bytes, giving up after `timeout`.
    ///
    /// The read races the deadline and the loser is cancelled. An elapsed
    /// deadline and EOF both yield an empty buffer; other I/O errors are
    /// surfaced.
    pub fn read_timeout(&mut self, timeout: Duration) -> Result<Vec<u8>, AdbError> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(Vec::new()),
        };

        let mut buf = [0u8; READ_CHUNK];
        match self
            .runtime
            .block_on(tokio::time::timeout(timeout, stream.read(&mut buf)))
        {
            Err(_elapsed) => Ok(Vec::new()),
            Ok(Ok(read)) => Ok(buf[..read].to_vec()),
            Ok(Err(err)) => Err(err.into()),
        }
    }

    /// Close the session's socket. Further reads return an empty buffer.
    pub fn close(&mut self) {
        self.stream = None;
    }
}

fn session_closed() -> AdbError {
    AdbError::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "shell session is closed",
    ))
}
