use std::fmt;

use crate::{
    Error,
    error::Result,
};

pub(crate) const PACKET_MAGIC: &[u8; 4] = b"VS01";
pub(crate) const HEADER_SIZE: usize = 36;
pub(crate) const MAX_PAYLOAD: usize = 1244;

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum PacketType {
    ChallengeReq = 1,
    Challenge = 2,
    Connect = 3,
    Accept = 4,
    Disconnect = 5,
    Data = 6,
    Datagram = 7,
}

impl PacketType {
    pub(crate) fn from(input: u8) -> Result<PacketType> {
        match input {
            1 => Ok(PacketType::ChallengeReq),
            2 => Ok(PacketType::Challenge),
            3 => Ok(PacketType::Connect),
            4 => Ok(PacketType::Accept),
            5 => Ok(PacketType::Disconnect),
            6 => Ok(PacketType::Data),
            7 => Ok(PacketType::Datagram),
            _ => Err(Error::Protocol(format!("Invalid packet type: {}", input))),
        }
    }

    pub(crate) fn value(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PacketType::ChallengeReq => "CHALLENGE REQ",
            PacketType::Challenge => "CHALLENGE",
            PacketType::Connect => "CONNECT",
            PacketType::Accept => "ACCEPT",
            PacketType::Disconnect => "DISCONNECT",
            PacketType::Data => "DATA",
            PacketType::Datagram => "DATAGRAM",
        })
    }
}

#[derive(Clone, Copy)]
pub(crate) struct PacketHeader {
    pub(crate) pkt_type: PacketType,
    pub(crate) payload_len: u16,
    pub(crate) source_conn_id: u32,
    pub(crate) dest_conn_id: u32,
    pub(crate) seq: u32,
    pub(crate) ack: u32,
    pub(crate) packets_in_msg: u32,
    pub(crate) msg_start_seq: u32,
    pub(crate) msg_size: u32,
}

impl PacketHeader {
    pub(crate) fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(PACKET_MAGIC);
        buf[4..6].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[6] = self.pkt_type.value();
        buf[7] = 0;     // flags, always zero
        buf[8..12].copy_from_slice(&self.source_conn_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.dest_conn_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.seq.to_le_bytes());
        buf[20..24].copy_from_slice(&self.ack.to_le_bytes());
        buf[24..28].copy_from_slice(&self.packets_in_msg.to_le_bytes());
        buf[28..32].copy_from_slice(&self.msg_start_seq.to_le_bytes());
        buf[32..36].copy_from_slice(&self.msg_size.to_le_bytes());
        buf
    }

    pub(crate) fn parse(data: &[u8]) -> Result<PacketHeader> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Protocol(format!("Truncated packet: {} bytes", data.len())));
        }
        if &data[0..4] != PACKET_MAGIC {
            return Err(Error::Protocol(format!("Bad magic")));
        }

        Ok(PacketHeader {
            payload_len: u16::from_le_bytes(data[4..6].try_into().unwrap()),
            pkt_type: PacketType::from(data[6])?,
            source_conn_id: u32::from_le_bytes(data[8..12].try_into().unwrap()),
            dest_conn_id: u32::from_le_bytes(data[12..16].try_into().unwrap()),
            seq: u32::from_le_bytes(data[16..20].try_into().unwrap()),
            ack: u32::from_le_bytes(data[20..24].try_into().unwrap()),
            packets_in_msg: u32::from_le_bytes(data[24..28].try_into().unwrap()),
            msg_start_seq: u32::from_le_bytes(data[28..32].try_into().unwrap()),
            msg_size: u32::from_le_bytes(data[32..36].try_into().unwrap()),
        })
    }
}
