use std::io;

use thiserror::Error;

/// Default TCP port of the local adb server.
pub const DEFAULT_PORT: u16 = 5037;

/// Largest body a host request may carry (the length prefix is 4 hex digits).
pub const MAX_HOST_PAYLOAD: usize = 0xffff;

/// Encode an ADB host request: a 4-hex-digit length prefix followed by the body.
///
/// `host:version` becomes `000chost:version`. Bodies longer than
/// [`MAX_HOST_PAYLOAD`] cannot be framed and are rejected.
pub fn encode_host_request(body: &str) -> Result<Vec<u8>, AdbError> {
    let length = u16::try_from(body.len())
        .map_err(|_| AdbError::Protocol(format!("host request too long: {} bytes", body.len())))?;

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(format!("{:04x}", length).as_bytes());
    frame.extend_from_slice(body.as_bytes());
    Ok(frame)
}

/// Decode the 4-hex-digit length prefix of a bounded host reply.
pub fn decode_host_length(header: &[u8; 4]) -> Result<usize, AdbError> {
    let digits = std::str::from_utf8(header)
        .map_err(|_| AdbError::Protocol(format!("non-ASCII length header: {:02x?}", header)))?;

    usize::from_str_radix(digits, 16)
        .map_err(|_| AdbError::Protocol(format!("non-hex length header: {:?}", digits)))
}

/// ADB client errors.
#[derive(Error, Debug)]
pub enum AdbError {
    /// The adb server could not be reached on the loopback port.
    #[error("adb server is unavailable")]
    ServerUnavailable,

    /// SEND/DATA/DONE completed but the final sync response was not `OKAY`.
    #[error("adb push was not acknowledged: {0}")]
    PushUnacknowledged(String),

    /// The deadline elapsed; outstanding socket I/O was cancelled.
    #[error("operation timed out")]
    TimedOut,

    /// Unexpected header, non-hex length or short read on the wire.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Read/write/connect failure other than the above.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server answered `FAIL` with a human-readable reason.
    #[error("adb server reported failure: {0}")]
    ServerFail(String),
}

impl AdbError {
    /// Short read where a frame header was expected.
    pub(crate) fn short_read(what: &str) -> AdbError {
        AdbError::Protocol(format!("short read on {}", what))
    }
}
