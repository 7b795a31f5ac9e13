use std::io;
use std::path::Path;

use log::{debug, trace};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::{self, AdbError};
use crate::sync::{self, SyncCommand, MAX_CHUNK};

/// Acknowledgement at the end of a sync exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SyncAck {
    Okay,
    Fail(String),
}

/// One adb connection and the state of the request currently running on it.
///
/// Each method is one step of an operation; an operation is a plain sequence
/// of awaits, so at most one I/O call is outstanding per transport and a
/// failed step aborts the rest of the chain before it touches the socket.
/// Every logical operation opens a fresh transport; dropping it closes the
/// connection.
pub(crate) struct HostTransport {
    stream: TcpStream,
    /// Working buffer for streamed reads and file chunks.
    buf: Box<[u8]>,
}

impl HostTransport {
    /// Open a connection to the adb server on `127.0.0.1:<port>`.
    pub async fn connect(port: u16) -> Result<Self, AdbError> {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .map_err(|err| match err.kind() {
                io::ErrorKind::ConnectionRefused => AdbError::ServerUnavailable,
                _ => AdbError::Io(err),
            })?;

        Ok(Self {
            stream,
            buf: vec![0u8; MAX_CHUNK].into_boxed_slice(),
        })
    }

    /// Send a host request and check the 4-byte status reply.
    ///
    /// On `FAIL` the bounded reason that follows is decoded and returned as
    /// [`AdbError::ServerFail`].
    pub async fn host_request(&mut self, request: &str) -> Result<(), AdbError> {
        debug!("host request: {:?}", request);
        let frame = protocol::encode_host_request(request)?;
        self.stream.write_all(&frame).await?;
        self.host_status().await
    }

    async fn host_status(&mut self) -> Result<(), AdbError> {
        let mut status = [0u8; 4];
        self.stream
            .read_exact(&mut status)
            .await
            .map_err(map_eof("status header"))?;

        match &status {
            b"OKAY" => Ok(()),
            b"FAIL" => {
                let reason = self.host_message().await?;
                debug!("server FAIL: {:?}", reason);
                Err(AdbError::ServerFail(reason))
            }
            other => Err(AdbError::Protocol(format!(
                "unexpected status: {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// Read one bounded reply: a 4-hex-digit length then exactly that many bytes.
    pub async fn host_message(&mut self) -> Result<String, AdbError> {
        let mut header = [0u8; 4];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(map_eof("length header"))?;

        let length = protocol::decode_host_length(&header)?;
        let mut body = vec![0u8; length];
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(map_eof("bounded reply"))?;

        trace!("bounded reply of {} bytes", length);
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Read a streamed reply until the server closes the connection.
    ///
    /// EOF is the terminator, not an error. The raw bytes are returned
    /// because exec output may be binary.
    pub async fn host_data(&mut self) -> Result<Vec<u8>, AdbError> {
        let mut data = Vec::new();
        loop {
            let read = self.stream.read(&mut self.buf).await?;
            if read == 0 {
                trace!("streamed reply of {} bytes", data.len());
                return Ok(data);
            }
            data.extend_from_slice(&self.buf[..read]);
        }
    }

    /// Switch the connection to the device transport.
    ///
    /// An empty serial selects the unique attached device; with several
    /// devices online the server answers `FAIL`, which is surfaced.
    pub async fn switch_transport(&mut self, serial: &str) -> Result<(), AdbError> {
        if serial.is_empty() {
            self.host_request("host:transport-any").await
        } else {
            self.host_request(&format!("host:transport:{}", serial)).await
        }
    }

    /// Emit one sync request: the 8-byte header plus an optional body.
    pub async fn sync_request(
        &mut self,
        id: SyncCommand,
        length: u32,
        body: Option<&[u8]>,
    ) -> Result<(), AdbError> {
        let header = sync::encode_request(id, length);
        self.stream.write_all(&header).await?;

        if let Some(body) = body {
            self.stream.write_all(&body[..length as usize]).await?;
        }
        Ok(())
    }

    /// Read the sync acknowledgement, decoding the reason on `FAIL`.
    pub async fn sync_response(&mut self) -> Result<SyncAck, AdbError> {
        let mut id = [0u8; 4];
        self.stream
            .read_exact(&mut id)
            .await
            .map_err(map_eof("sync response"))?;

        match SyncCommand::from_bytes(id) {
            Some(SyncCommand::Okay) => Ok(SyncAck::Okay),
            Some(SyncCommand::Fail) => {
                let mut length = [0u8; 4];
                self.stream
                    .read_exact(&mut length)
                    .await
                    .map_err(map_eof("sync failure length"))?;

                let mut reason = vec![0u8; u32::from_le_bytes(length) as usize];
                self.stream
                    .read_exact(&mut reason)
                    .await
                    .map_err(map_eof("sync failure reason"))?;

                Ok(SyncAck::Fail(String::from_utf8_lossy(&reason).into_owned()))
            }
            _ => Err(AdbError::Protocol(format!(
                "unexpected sync id: {:?}",
                String::from_utf8_lossy(&id)
            ))),
        }
    }

    /// Stream a local file as DATA frames until EOF.
    pub async fn sync_send_file(&mut self, path: &Path) -> Result<(), AdbError> {
        let mut file = File::open(path).await?;

        loop {
            let read = file.read(&mut self.buf).await?;
            if read == 0 {
                return Ok(());
            }

            trace!("DATA chunk of {} bytes", read);
            let header = sync::encode_request(SyncCommand::Data, read as u32);
            self.stream.write_all(&header).await?;
            self.stream.write_all(&self.buf[..read]).await?;
        }
    }

    /// Salvage the socket for an interactive session.
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

/// `read_exact` reports a closed peer as `UnexpectedEof`; mid-frame that is
/// a protocol violation, not an I/O failure.
fn map_eof(what: &'static str) -> impl Fn(io::Error) -> AdbError {
    move |err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            AdbError::short_read(what)
        } else {
            AdbError::Io(err)
        }
    }
}
