use crate::transport::frame::{frame_payload, FrameParser, FRAME_HEADER_SIZE};

#[test]
fn test_frame_layout() {
    let framed = frame_payload(&[0xAA, 0xBB, 0xCC, 0xDD]);

    assert_eq!(framed.len(), FRAME_HEADER_SIZE + 4);
    assert_eq!(&framed[0..4], &[0x04, 0x00, 0x00, 0x00]);
    assert_eq!(&framed[4..8], b"VT01");
    assert_eq!(&framed[8..], &[0xAA, 0xBB, 0xCC, 0xDD]);
}

#[test]
fn test_round_trip() {
    let payload = b"arbitrary payload bytes".to_vec();
    let framed = frame_payload(&payload);

    let mut parser = FrameParser::new();
    parser.push(&framed);

    assert_eq!(parser.next_payload().unwrap(), Some(payload));
    assert!(parser.next_payload().unwrap().is_none());
}

#[test]
fn test_empty_payload() {
    let mut parser = FrameParser::new();
    parser.push(&frame_payload(&[]));

    assert_eq!(parser.next_payload().unwrap(), Some(vec![]));
    assert!(parser.next_payload().unwrap().is_none());
}

// a stream delivering one byte at a time must still produce exactly
// one payload, and only once the last byte is in
#[test]
fn test_byte_at_a_time() {
    let framed = frame_payload(&[0xAA, 0xBB, 0xCC, 0xDD]);
    let mut parser = FrameParser::new();

    let mut payloads = Vec::new();
    for (index, byte) in framed.iter().enumerate() {
        parser.push(&[*byte]);
        while let Some(payload) = parser.next_payload().unwrap() {
            assert_eq!(index, framed.len() - 1);
            payloads.push(payload);
        }
    }

    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0], vec![0xAA, 0xBB, 0xCC, 0xDD]);
}

#[test]
fn test_two_frames_in_one_chunk() {
    let mut chunk = frame_payload(b"first");
    chunk.extend_from_slice(&frame_payload(b"second"));

    let mut parser = FrameParser::new();
    parser.push(&chunk);

    assert_eq!(parser.next_payload().unwrap(), Some(b"first".to_vec()));
    assert_eq!(parser.next_payload().unwrap(), Some(b"second".to_vec()));
    assert!(parser.next_payload().unwrap().is_none());
}

#[test]
fn test_bad_magic() {
    let mut parser = FrameParser::new();
    parser.push(&[0x00, 0x00, 0x00, 0x00]);
    parser.push(b"XX01");

    let result = parser.next_payload();
    assert!(result.is_err());
    assert_eq!(result.unwrap_err().to_string(), "Bad magic");
}

#[test]
fn test_payload_split_across_chunks() {
    let framed = frame_payload(b"split right down the middle");
    let (left, right) = framed.split_at(framed.len() / 2);

    let mut parser = FrameParser::new();
    parser.push(left);
    assert!(parser.next_payload().unwrap().is_none());

    parser.push(right);
    assert_eq!(parser.next_payload().unwrap(), Some(b"split right down the middle".to_vec()));
}
