use crate::protocol::AdbError;

/// Largest body of a single DATA frame.
pub const MAX_CHUNK: usize = 64_000;

/// Sync protocol request/response ids (file push).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyncCommand {
    /// Open a destination file on the device
    Send = 0x444e4553, // "SEND"
    /// File data chunk
    Data = 0x41544144, // "DATA"
    /// End of file, carries the mtime
    Done = 0x454e4f44, // "DONE"
    /// Success
    Okay = 0x59414b4f, // "OKAY"
    /// Failure, carries a reason
    Fail = 0x4c494146, // "FAIL"
}

impl SyncCommand {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x444e4553 => Some(SyncCommand::Send),
            0x41544144 => Some(SyncCommand::Data),
            0x454e4f44 => Some(SyncCommand::Done),
            0x59414b4f => Some(SyncCommand::Okay),
            0x4c494146 => Some(SyncCommand::Fail),
            _ => None,
        }
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        Self::from_u32(u32::from_le_bytes(bytes))
    }

    pub fn as_bytes(&self) -> [u8; 4] {
        (*self as u32).to_le_bytes()
    }
}

/// Encode a sync request header: 4 ASCII id bytes + little-endian u32 length.
///
/// For SEND and DATA the length counts the body that follows; for DONE it
/// carries the file mtime in seconds since the epoch.
pub fn encode_request(id: SyncCommand, length: u32) -> [u8; 8] {
    let mut header = [0u8; 8];
    header[0..4].copy_from_slice(&id.as_bytes());
    header[4..8].copy_from_slice(&length.to_le_bytes());
    header
}

/// Decode a sync header into its id and length.
///
/// Unknown ids are surfaced verbatim so the caller can see what the server
/// actually sent.
pub fn decode_header(header: &[u8; 8]) -> Result<(SyncCommand, u32), AdbError> {
    let id = [header[0], header[1], header[2], header[3]];
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    let command = SyncCommand::from_bytes(id).ok_or_else(|| {
        AdbError::Protocol(format!(
            "unknown sync id: {:?}",
            String::from_utf8_lossy(&id)
        ))
    })?;

    Ok((command, length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_command_conversion() {
        assert_eq!(SyncCommand::from_u32(0x444e4553), Some(SyncCommand::Send));
        assert_eq!(SyncCommand::from_u32(0x41544144), Some(SyncCommand::Data));
        assert_eq!(SyncCommand::from_u32(0x454e4f44), Some(SyncCommand::Done));
        assert_eq!(SyncCommand::from_u32(0x59414b4f), Some(SyncCommand::Okay));
        assert_eq!(SyncCommand::from_u32(0x4c494146), Some(SyncCommand::Fail));
        assert_eq!(SyncCommand::from_u32(0xdeadbeef), None);
    }

    #[test]
    fn test_sync_command_as_bytes() {
        assert_eq!(&SyncCommand::Send.as_bytes(), b"SEND");
        assert_eq!(&SyncCommand::Data.as_bytes(), b"DATA");
        assert_eq!(&SyncCommand::Done.as_bytes(), b"DONE");
        assert_eq!(&SyncCommand::Okay.as_bytes(), b"OKAY");
        assert_eq!(&SyncCommand::Fail.as_bytes(), b"FAIL");
    }

    #[test]
    fn test_encode_request() {
        let header = encode_request(SyncCommand::Data, 3);
        assert_eq!(&header[0..4], b"DATA");
        assert_eq!(&header[4..8], &[0x03, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_header_round_trip() {
        for id in [SyncCommand::Send, SyncCommand::Data, SyncCommand::Done] {
            for length in [0u32, 1, MAX_CHUNK as u32, u32::MAX] {
                let header = encode_request(id, length);
                assert_eq!(decode_header(&header).unwrap(), (id, length));
            }
        }
    }

    #[test]
    fn test_decode_unknown_id() {
        let mut header = [0u8; 8];
        header[0..4].copy_from_slice(b"LIST");
        let err = decode_header(&header).unwrap_err();
        assert!(err.to_string().contains("LIST"));
    }
}
