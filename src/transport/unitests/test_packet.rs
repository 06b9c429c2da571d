use crate::transport::udp::packet::{
    PacketHeader,
    PacketType,
    HEADER_SIZE,
    MAX_PAYLOAD,
    PACKET_MAGIC,
};

fn sample_header() -> PacketHeader {
    PacketHeader {
        pkt_type: PacketType::Data,
        payload_len: 5,
        source_conn_id: 512,
        dest_conn_id: 768,
        seq: 7,
        ack: 3,
        packets_in_msg: 1,
        msg_start_seq: 7,
        msg_size: 5,
    }
}

#[test]
fn test_wire_layout() {
    let buf = sample_header().serialize();

    assert_eq!(buf.len(), HEADER_SIZE);
    assert_eq!(&buf[0..4], PACKET_MAGIC);
    assert_eq!(&buf[4..6], &[0x05, 0x00]);                      // payload_len
    assert_eq!(buf[6], 6);                                      // Data
    assert_eq!(buf[7], 0);                                      // flags
    assert_eq!(&buf[8..12], &512u32.to_le_bytes());
    assert_eq!(&buf[12..16], &768u32.to_le_bytes());
    assert_eq!(&buf[16..20], &7u32.to_le_bytes());
    assert_eq!(&buf[20..24], &3u32.to_le_bytes());
    assert_eq!(&buf[24..28], &1u32.to_le_bytes());
    assert_eq!(&buf[28..32], &7u32.to_le_bytes());
    assert_eq!(&buf[32..36], &5u32.to_le_bytes());
}

#[test]
fn test_round_trip() {
    let buf = sample_header().serialize();
    let parsed = PacketHeader::parse(&buf).unwrap();

    assert!(parsed.pkt_type == PacketType::Data);
    assert_eq!(parsed.payload_len, 5);
    assert_eq!(parsed.source_conn_id, 512);
    assert_eq!(parsed.dest_conn_id, 768);
    assert_eq!(parsed.seq, 7);
    assert_eq!(parsed.ack, 3);
    assert_eq!(parsed.packets_in_msg, 1);
    assert_eq!(parsed.msg_start_seq, 7);
    assert_eq!(parsed.msg_size, 5);
}

#[test]
fn test_truncated() {
    let buf = sample_header().serialize();
    assert!(PacketHeader::parse(&buf[..HEADER_SIZE - 1]).is_err());
    assert!(PacketHeader::parse(&[]).is_err());
}

#[test]
fn test_bad_magic() {
    let mut buf = sample_header().serialize();
    buf[0] = b'X';
    assert!(PacketHeader::parse(&buf).is_err());
}

#[test]
fn test_packet_types() {
    for value in 1u8..=7 {
        let pkt_type = PacketType::from(value).unwrap();
        assert_eq!(pkt_type.value(), value);
    }

    assert!(PacketType::from(0).is_err());
    assert!(PacketType::from(8).is_err());
    assert!(PacketType::from(255).is_err());
}

#[test]
fn test_constants() {
    assert_eq!(HEADER_SIZE, 36);
    assert_eq!(MAX_PAYLOAD, 1244);
    assert_eq!(PACKET_MAGIC, b"VS01");
}
