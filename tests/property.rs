//! Property-based tests for the frame codec and incremental decoding.

use proptest::prelude::*;
use wsengine::Limits;
use wsengine::connection::{FrameAccumulator, MessageFragmenter, TextFragmenter};
use wsengine::protocol::frame::length_encoding;
use wsengine::protocol::{Frame, HandshakeRequest, MessageAssembler, OpCode, apply_mask};

fn data_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        Just(OpCode::Text),
        Just(OpCode::Binary),
        Just(OpCode::Continuation),
    ]
}

fn control_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![Just(OpCode::Close), Just(OpCode::Ping), Just(OpCode::Pong)]
}

fn encode(frame: &Frame, mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut buf = vec![0u8; frame.wire_size(mask.is_some())];
    let written = frame.write(&mut buf, mask).unwrap();
    assert_eq!(written, buf.len());
    buf
}

/// Header bytes the RFC requires for a payload of `len` bytes.
fn shortest_header(len: usize, masked: bool) -> usize {
    let base = match len {
        0..=125 => 2,
        126..=65535 => 4,
        _ => 10,
    };
    base + if masked { 4 } else { 0 }
}

proptest! {
    // =========================================================================
    // decode(encode(f)) == f, with and without a mask
    // =========================================================================
    #[test]
    fn test_roundtrip(
        fin in any::<bool>(),
        rsv1 in any::<bool>(),
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..1000),
        mask in prop::option::of(any::<[u8; 4]>())
    ) {
        let mut frame = Frame::new(fin, opcode, payload);
        frame.rsv1 = rsv1;
        let bytes = encode(&frame, mask);

        let (parsed, consumed) = Frame::parse(&bytes).unwrap();
        prop_assert_eq!(consumed, bytes.len());
        prop_assert_eq!(parsed.fin, fin);
        prop_assert_eq!(parsed.rsv1, rsv1);
        prop_assert_eq!(parsed.opcode, opcode);
        prop_assert_eq!(parsed.mask, mask);
        prop_assert_eq!(parsed.payload(), frame.payload());
    }

    // =========================================================================
    // The length field always uses the shortest form
    // =========================================================================
    #[test]
    fn test_shortest_length_encoding(
        len in prop_oneof![0usize..=130, 65530usize..=65540, 65536usize..70000],
        masked in any::<bool>()
    ) {
        let frame = Frame::binary(vec![0u8; len]);
        prop_assert_eq!(frame.wire_size(masked), shortest_header(len, masked) + len);
    }

    // =========================================================================
    // XOR masking is its own inverse
    // =========================================================================
    #[test]
    fn test_mask_involution(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        mask in any::<[u8; 4]>()
    ) {
        let mut masked = data.clone();
        apply_mask(&mut masked, mask);
        apply_mask(&mut masked, mask);
        prop_assert_eq!(data, masked);
    }

    // =========================================================================
    // Control frames: <= 125 bytes valid, > 125 rejected
    // =========================================================================
    #[test]
    fn test_control_frame_payload_limit(
        opcode in control_opcode_strategy(),
        len in 0usize..300
    ) {
        let frame = Frame::new(true, opcode, vec![0u8; len]);
        prop_assert_eq!(frame.validate().is_ok(), len <= 125);
    }

    // =========================================================================
    // Truncated input never yields a frame
    // =========================================================================
    #[test]
    fn test_truncated_frame_is_incomplete(
        payload in prop::collection::vec(any::<u8>(), 1..500),
        cut in 1usize..50
    ) {
        let bytes = encode(&Frame::binary(payload), None);
        let len = bytes.len().saturating_sub(cut).max(1);
        prop_assume!(len < bytes.len());
        prop_assert!(Frame::parse(&bytes[..len]).is_err());
    }

    // =========================================================================
    // Splitting the input at any point delivers exactly one frame
    // =========================================================================
    #[test]
    fn test_split_at_any_boundary(
        payload in prop::collection::vec(any::<u8>(), 0..400),
        mask in any::<[u8; 4]>(),
        split in any::<prop::sample::Index>()
    ) {
        let bytes = encode(&Frame::binary(payload.clone()), Some(mask));
        let at = split.index(bytes.len() + 1);

        let mut acc = FrameAccumulator::new(Limits::default());
        let mut frames = Vec::new();
        for chunk in [&bytes[..at], &bytes[at..]] {
            let mut offset = 0;
            while offset < chunk.len() {
                let (used, frame) = acc.push(&chunk[offset..]).unwrap();
                offset += used;
                frames.extend(frame);
            }
        }

        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(frames[0].payload(), &payload[..]);
        prop_assert!(acc.is_idle());
    }

    // =========================================================================
    // Fragments reassemble to the original message
    // =========================================================================
    #[test]
    fn test_fragment_then_reassemble(
        payload in prop::collection::vec(any::<u8>(), 0..3000),
        size in 1usize..700
    ) {
        let frames: Vec<_> = MessageFragmenter::new(&payload, OpCode::Binary, size).collect();
        prop_assert_eq!(frames.len(), payload.len().div_ceil(size).max(1));

        let mut assembler = MessageAssembler::new();
        let mut messages = Vec::new();
        for frame in frames {
            prop_assert!(frame.payload().len() <= size);
            messages.extend(assembler.push(frame).unwrap());
        }
        prop_assert_eq!(messages.len(), 1);
        prop_assert_eq!(messages[0].as_binary(), Some(&payload[..]));
    }

    #[test]
    fn test_text_fragments_fit_byte_limit(
        text in "\\PC{0,400}",
        max in 3usize..120
    ) {
        let mut rebuilt = String::new();
        for frame in TextFragmenter::new(&text, max / 3) {
            prop_assert!(frame.payload().len() <= max);
            rebuilt.push_str(std::str::from_utf8(frame.payload()).unwrap());
        }
        prop_assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_handshake_parse_no_panic(data in prop::collection::vec(any::<u8>(), 0..2000)) {
        let _ = HandshakeRequest::parse(&data);
    }

    #[test]
    fn test_handshake_valid_variations(
        path in "/[a-z]{1,20}",
        host in "[a-z]{3,10}\\.[a-z]{2,4}"
    ) {
        let request = format!(
            "GET {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n"
        );
        let parsed = HandshakeRequest::parse(request.as_bytes());
        prop_assert!(parsed.is_ok(), "valid request should parse: {:?}", parsed);
        prop_assert_eq!(parsed.unwrap().path, path);
    }
}

#[test]
fn test_length_encoding_thresholds() {
    assert_eq!(length_encoding(0), (0, 0));
    assert_eq!(length_encoding(125), (125, 0));
    assert_eq!(length_encoding(126), (126, 2));
    assert_eq!(length_encoding(65535), (126, 2));
    assert_eq!(length_encoding(65536), (127, 8));
}

#[test]
fn test_length_field_bytes() {
    let bytes = encode(&Frame::binary(vec![0u8; 65535]), None);
    assert_eq!(&bytes[1..4], &[126, 0xFF, 0xFF]);

    let bytes = encode(&Frame::binary(vec![0u8; 65536]), None);
    assert_eq!(bytes[1], 127);
    assert_eq!(&bytes[2..10], &65536u64.to_be_bytes());
}
