// Integration tests for the host frame codec

use adb_host::protocol::{
    decode_host_length, encode_host_request, AdbError, DEFAULT_PORT, MAX_HOST_PAYLOAD,
};

#[test]
fn test_default_port() {
    assert_eq!(DEFAULT_PORT, 5037);
}

#[test]
fn test_encode_host_version_example() {
    // The canonical example from the protocol docs.
    assert_eq!(encode_host_request("host:version").unwrap(), b"000chost:version");
}

#[test]
fn test_host_framing_round_trip() {
    for length in [0usize, 1, 0xc, 0xff, 0x1000, MAX_HOST_PAYLOAD] {
        let body = "b".repeat(length);
        let frame = encode_host_request(&body).unwrap();

        assert_eq!(frame.len(), 4 + length);
        let header: [u8; 4] = frame[0..4].try_into().unwrap();
        assert_eq!(decode_host_length(&header).unwrap(), length);
        assert_eq!(&frame[4..], body.as_bytes());
    }
}

#[test]
fn test_oversized_body_is_a_programmer_error() {
    let body = "b".repeat(MAX_HOST_PAYLOAD + 1);
    assert!(matches!(
        encode_host_request(&body),
        Err(AdbError::Protocol(_))
    ));
}

#[test]
fn test_decode_length_accepts_both_cases() {
    assert_eq!(decode_host_length(b"00ff").unwrap(), 255);
    assert_eq!(decode_host_length(b"00FF").unwrap(), 255);
}

#[test]
fn test_decode_length_rejects_garbage() {
    for header in [b"12g4", b"OKAY", b"\xff\xff\xff\xff", b"    "] {
        assert!(matches!(
            decode_host_length(header),
            Err(AdbError::Protocol(_))
        ));
    }
}

#[test]
fn test_error_display() {
    assert_eq!(
        AdbError::ServerUnavailable.to_string(),
        "adb server is unavailable"
    );
    assert_eq!(AdbError::TimedOut.to_string(), "operation timed out");

    let fail = AdbError::ServerFail("more than one device".to_string());
    assert!(fail.to_string().ends_with("more than one device"));
}
