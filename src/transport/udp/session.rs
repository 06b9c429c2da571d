use std::cmp;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, warn};
use rbtree::RBTree;
use tokio::time::Instant;

use crate::{
    Error,
    error::Result,
    SessionKey,
};
use crate::core::constants;
use super::packet::{
    self,
    PacketHeader,
    PacketType,
    MAX_PAYLOAD,
};

static NEXT_CONN_ID: AtomicU32 = AtomicU32::new(constants::CONN_ID_INIT);

fn next_conn_id() -> u32 {
    NEXT_CONN_ID.fetch_add(constants::CONN_ID_STEP, Ordering::Relaxed)
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Disconnected = 0,
    ChallengeReqSent,
    ConnectSent,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnState::Disconnected => "Disconnected",
            ConnState::ChallengeReqSent => "ChallengeReqSent",
            ConnState::ConnectSent => "ConnectSent",
            ConnState::Connected => "Connected",
            ConnState::Disconnecting => "Disconnecting",
        })
    }
}

pub(crate) enum SessionEvent {
    Connected(u32),
    Message(Vec<u8>),
    EncryptionError(Error),
    Fatal(Error),
    Closed,
}

struct OutPacket {
    pkt_type: PacketType,
    packets_in_msg: u32,
    msg_start_seq: u32,
    msg_size: u32,
    payload: Vec<u8>,
    first_sent: Option<Instant>,
    last_sent: Option<Instant>,
}

struct InPacket {
    pkt_type: PacketType,
    packets_in_msg: u32,
    msg_start_seq: u32,
    msg_size: u32,
    payload: Vec<u8>,
}

// The reliable-datagram protocol core. Pure state machine: datagrams
// and timer ticks go in, wire packets and session events come out, the
// socket loop around it does the actual I/O.
pub(crate) struct UdpSession {
    state: ConnState,

    local_conn_id: u32,
    remote_conn_id: u32,

    out_seq: u32,
    out_seq_sent: u32,
    out_seq_acked: u32,
    in_seq: u32,
    in_seq_acked: u32,
    in_seq_handled: u32,

    out_packets: RBTree<u32, OutPacket>,
    in_packets: RBTree<u32, InPacket>,

    session_key: Option<SessionKey>,
    server_load: u32,

    outgoing: Vec<Vec<u8>>,
    events: Vec<SessionEvent>,

    ack_due: Option<Instant>,
    flush_at: Option<Instant>,
    disconnect_deadline: Option<Instant>,
}

impl UdpSession {
    pub(crate) fn new() -> Self {
        Self {
            state: ConnState::Disconnected,

            local_conn_id: next_conn_id(),
            remote_conn_id: 0,

            out_seq: 1,
            out_seq_sent: 0,
            out_seq_acked: 0,
            in_seq: 0,
            in_seq_acked: 0,
            in_seq_handled: 0,

            out_packets: RBTree::new(),
            in_packets: RBTree::new(),

            session_key: None,
            server_load: 0,

            outgoing: Vec::new(),
            events: Vec::new(),

            ack_due: None,
            flush_at: None,
            disconnect_deadline: None,
        }
    }

    pub(crate) fn state(&self) -> ConnState {
        self.state
    }

    pub(crate) fn local_conn_id(&self) -> u32 {
        self.local_conn_id
    }

    pub(crate) fn set_session_key(&mut self, key: Option<SessionKey>) {
        self.session_key = key;
    }

    pub(crate) fn take_outgoing(&mut self) -> Vec<Vec<u8>> {
        mem::take(&mut self.outgoing)
    }

    pub(crate) fn take_events(&mut self) -> Vec<SessionEvent> {
        mem::take(&mut self.events)
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        if self.state != ConnState::Disconnected {
            return Err(Error::State(format!(
                "Cannot start a connection in state {}", self.state
            )));
        }

        self.state = ConnState::ChallengeReqSent;
        self.emit_raw(PacketType::ChallengeReq, &[]);
        Ok(())
    }

    pub(crate) fn send_message(&mut self, pkt_type: PacketType, payload: &[u8], now: Instant) -> Result<()> {
        let body = match (pkt_type, self.session_key.as_ref()) {
            (PacketType::Data, Some(key)) => key.encrypt(payload)?,
            _ => payload.to_vec(),
        };

        let packets_in_msg = cmp::max(1, (body.len() + MAX_PAYLOAD - 1) / MAX_PAYLOAD) as u32;
        let msg_start_seq = self.out_seq;
        let msg_size = body.len() as u32;

        for index in 0..packets_in_msg as usize {
            let seq = self.out_seq;
            self.out_seq += 1;

            let from = index * MAX_PAYLOAD;
            let to = cmp::min(from + MAX_PAYLOAD, body.len());
            self.out_packets.insert(seq, OutPacket {
                pkt_type,
                packets_in_msg,
                msg_start_seq,
                msg_size,
                payload: body[from..to].to_vec(),
                first_sent: None,
                last_sent: None,
            });
        }

        self.flush_outgoing(now);
        Ok(())
    }

    pub(crate) fn end(&mut self, now: Instant) -> Result<()> {
        match self.state {
            ConnState::Connected => {
                self.state = ConnState::Disconnecting;
                self.disconnect_deadline = Some(now + constants::DISCONNECT_TIMEOUT);
                self.send_message(PacketType::Disconnect, &[], now)
            },
            ConnState::ChallengeReqSent | ConnState::ConnectSent => {
                // nothing worth flushing yet
                self.destroy();
                Ok(())
            },
            state => Err(Error::State(format!(
                "Cannot end a connection in state {}", state
            ))),
        }
    }

    pub(crate) fn destroy(&mut self) {
        self.state = ConnState::Disconnected;
        self.out_packets = RBTree::new();
        self.in_packets = RBTree::new();
        self.ack_due = None;
        self.flush_at = None;
        self.disconnect_deadline = None;
        self.events.push(SessionEvent::Closed);
    }

    pub(crate) fn on_datagram(&mut self, data: &[u8], now: Instant) {
        let header = match PacketHeader::parse(data) {
            Ok(v) => v,
            Err(e) => {
                debug!("Dropping malformed datagram: {} ({})",
                    e, hex::encode(&data[..cmp::min(data.len(), 16)]));
                return;
            }
        };

        if header.payload_len as usize > MAX_PAYLOAD ||
            data.len() - packet::HEADER_SIZE != header.payload_len as usize {
            debug!("Dropping datagram with inconsistent payload length {} (got {} bytes)",
                header.payload_len, data.len() - packet::HEADER_SIZE);
            return;
        }
        let payload = &data[packet::HEADER_SIZE..];

        // the peer's connection id is learned from its first packet and
        // pinned from then on
        if self.remote_conn_id == 0 && header.source_conn_id != 0 {
            self.remote_conn_id = header.source_conn_id;
        } else if header.source_conn_id != self.remote_conn_id {
            debug!("Dropping datagram from connection {} (expected {})",
                header.source_conn_id, self.remote_conn_id);
            return;
        }

        if header.dest_conn_id != self.local_conn_id {
            debug!("Dropping datagram addressed to connection {} (we are {})",
                header.dest_conn_id, self.local_conn_id);
            return;
        }

        if header.ack > self.out_seq_acked {
            self.out_seq_acked = header.ack;
            self.flush_outgoing(now);
            self.flush_incoming(now);
        }

        if self.state == ConnState::Disconnected {
            return;
        }

        if header.seq > 0 && header.seq <= self.in_seq {
            // already received, the peer apparently missed our ack
            self.queue_ack(now);
            return;
        }

        if header.pkt_type == PacketType::Datagram {
            return;
        }

        if header.packets_in_msg == 0 {
            debug!("Dropping {} packet with an empty message span", header.pkt_type);
            return;
        }

        self.in_packets.replace_or_insert(header.seq, InPacket {
            pkt_type: header.pkt_type,
            packets_in_msg: header.packets_in_msg,
            msg_start_seq: header.msg_start_seq,
            msg_size: header.msg_size,
            payload: payload.to_vec(),
        });
        self.flush_incoming(now);

        // long messages get an eager ack on every second piece so the
        // sender's window keeps moving
        if header.packets_in_msg > 3 &&
            (header.seq.wrapping_sub(header.msg_start_seq) + 1) % 2 == 0 {
            self.emit_raw(PacketType::Datagram, &[]);
        }
    }

    pub(crate) fn tick(&mut self, now: Instant) {
        if let Some(due) = self.ack_due {
            if now >= due {
                self.ack_due = None;
                if self.in_seq_acked < self.in_seq {
                    self.emit_raw(PacketType::Datagram, &[]);
                }
            }
        }

        if let Some(deadline) = self.disconnect_deadline {
            if now >= deadline && self.state == ConnState::Disconnecting {
                debug!("Gave up waiting for the disconnect ack, tearing the connection down");
                self.destroy();
                return;
            }
        }

        let flush_due = self.flush_at.map_or(false, |at| now >= at);
        if flush_due {
            self.flush_at = Some(now + constants::FLUSH_INTERVAL);
        }
        let resend_due = self.earliest_out_deadline().map_or(false, |at| now >= at);
        if flush_due || resend_due {
            self.flush_outgoing(now);
        }
    }

    // The earliest instant at which any timer wants a tick, so the
    // socket loop can sleep for exactly that long.
    pub(crate) fn next_timeout(&self) -> Option<Instant> {
        let mut next = earlier(self.ack_due, self.flush_at);
        next = earlier(next, self.disconnect_deadline);
        earlier(next, self.earliest_out_deadline())
    }

    fn earliest_out_deadline(&self) -> Option<Instant> {
        let mut next: Option<Instant> = None;
        for (_, entry) in self.out_packets.iter() {
            let first = match entry.first_sent {
                Some(v) => v,
                None => continue,
            };
            let last = entry.last_sent.unwrap_or(first);
            let due = cmp::min(
                first + constants::ACK_TIMEOUT,
                last + constants::RESEND_DELAY,
            );
            next = earlier(next, Some(due));
        }
        next
    }

    fn queue_ack(&mut self, now: Instant) {
        if self.ack_due.is_none() {
            self.ack_due = Some(now + constants::DEFERRED_ACK_DELAY);
        }
    }

    fn flush_outgoing(&mut self, now: Instant) {
        // entries at or below the ack watermark are done
        let acked: Vec<u32> = self.out_packets.keys()
            .filter(|&&seq| seq <= self.out_seq_acked)
            .cloned()
            .collect();
        for seq in acked {
            self.out_packets.remove(&seq);
        }

        let mut to_send: Vec<u32> = Vec::new();
        let mut timed_out = false;
        let mut sent_mark = self.out_seq_sent;

        for (seq, entry) in self.out_packets.iter() {
            match entry.first_sent {
                None => {
                    if sent_mark >= self.out_seq_acked + constants::AHEAD_COUNT {
                        break;      // window full
                    }
                    to_send.push(*seq);
                    sent_mark = cmp::max(sent_mark, *seq);
                },
                Some(first) => {
                    if now.duration_since(first) >= constants::ACK_TIMEOUT {
                        timed_out = true;
                        break;
                    }
                    let last = entry.last_sent.unwrap_or(first);
                    if now.duration_since(last) >= constants::RESEND_DELAY {
                        to_send.push(*seq);
                    }
                },
            }
        }

        if timed_out {
            self.fail(Error::Network(format!("Connection timed out")));
            return;
        }

        for seq in to_send {
            self.transmit(seq, now);
        }
    }

    fn transmit(&mut self, seq: u32, now: Instant) {
        let local_conn_id = self.local_conn_id;
        let remote_conn_id = self.remote_conn_id;
        let in_seq = self.in_seq;

        let (header, payload) = {
            let entry = match self.out_packets.get_mut(&seq) {
                Some(v) => v,
                None => return,
            };

            if entry.first_sent.is_none() {
                entry.first_sent = Some(now);
            }
            entry.last_sent = Some(now);

            let header = PacketHeader {
                pkt_type: entry.pkt_type,
                payload_len: entry.payload.len() as u16,
                source_conn_id: local_conn_id,
                dest_conn_id: remote_conn_id,
                seq,
                ack: in_seq,
                packets_in_msg: entry.packets_in_msg,
                msg_start_seq: entry.msg_start_seq,
                msg_size: entry.msg_size,
            };
            (header, entry.payload.clone())
        };

        self.out_seq_sent = cmp::max(self.out_seq_sent, seq);
        self.push_wire(&header, &payload);
    }

    // seq-less packets: the initial challenge request and pure-ack datagrams
    fn emit_raw(&mut self, pkt_type: PacketType, payload: &[u8]) {
        let header = PacketHeader {
            pkt_type,
            payload_len: payload.len() as u16,
            source_conn_id: self.local_conn_id,
            dest_conn_id: self.remote_conn_id,
            seq: 0,
            ack: self.in_seq,
            packets_in_msg: 0,
            msg_start_seq: 0,
            msg_size: 0,
        };
        self.push_wire(&header, payload);
    }

    fn push_wire(&mut self, header: &PacketHeader, payload: &[u8]) {
        // every packet carries the latest ack, so a pending deferred one
        // just rides along
        self.in_seq_acked = self.in_seq;
        self.ack_due = None;

        let mut wire = Vec::with_capacity(packet::HEADER_SIZE + payload.len());
        wire.extend_from_slice(&header.serialize());
        wire.extend_from_slice(payload);
        self.outgoing.push(wire);
    }

    fn flush_incoming(&mut self, now: Instant) {
        let mut grew = false;
        while self.in_packets.contains_key(&(self.in_seq + 1)) {
            self.in_seq += 1;
            grew = true;
        }
        if grew {
            self.queue_ack(now);
        }

        loop {
            let (head_seq, msg_start_seq, packets_in_msg) = match self.in_packets.iter().next() {
                Some((seq, entry)) => (*seq, entry.msg_start_seq, entry.packets_in_msg),
                None => break,
            };

            if head_seq <= self.in_seq_handled {
                self.in_packets.remove(&head_seq);
                continue;
            }

            // messages dispatch strictly in order; an incomplete head
            // blocks everything behind it
            if head_seq != msg_start_seq {
                break;
            }
            let end_seq = match msg_start_seq.checked_add(packets_in_msg - 1) {
                Some(v) => v,
                None => {
                    warn!("Discarding message at seq {}: span of {} packets overflows",
                        msg_start_seq, packets_in_msg);
                    self.in_packets.remove(&head_seq);
                    continue;
                }
            };
            let complete = (msg_start_seq..=end_seq)
                .all(|seq| self.in_packets.contains_key(&seq));
            if !complete {
                break;
            }

            let mut parts = Vec::with_capacity(packets_in_msg as usize);
            for seq in msg_start_seq..=end_seq {
                parts.push(self.in_packets.remove(&seq).unwrap());
            }
            self.in_seq_handled = end_seq;

            let pkt_type = parts[0].pkt_type;
            let msg_size = parts[0].msg_size;
            let consistent = parts.iter().all(|part| {
                part.pkt_type == pkt_type &&
                part.msg_size == msg_size &&
                part.msg_start_seq == msg_start_seq &&
                part.packets_in_msg == packets_in_msg
            });
            if !consistent {
                warn!("Discarding message at seq {}: fragments disagree on header fields", msg_start_seq);
                continue;
            }

            let mut body = Vec::with_capacity(msg_size as usize);
            for part in &parts {
                body.extend_from_slice(&part.payload);
            }
            if body.len() != msg_size as usize {
                warn!("Discarding message at seq {}: reassembled {} bytes, expected {}",
                    msg_start_seq, body.len(), msg_size);
                continue;
            }

            self.handle_message(pkt_type, body, now);
        }

        if self.state == ConnState::Disconnecting && self.out_seq_acked >= self.out_seq_sent {
            self.destroy();
        }
    }

    fn handle_message(&mut self, pkt_type: PacketType, payload: Vec<u8>, now: Instant) {
        match (pkt_type, self.state) {
            (PacketType::Challenge, ConnState::ChallengeReqSent) => {
                if payload.len() < 8 {
                    warn!("Challenge message too short: {} bytes", payload.len());
                    return;
                }
                let challenge = u32::from_le_bytes(payload[0..4].try_into().unwrap());
                self.server_load = u32::from_le_bytes(payload[4..8].try_into().unwrap());
                debug!("Got challenge {:#x}, server load {}", challenge, self.server_load);

                let response = (challenge ^ constants::CHALLENGE_MASK).to_le_bytes();
                self.state = ConnState::ConnectSent;
                _ = self.send_message(PacketType::Connect, &response, now);
            },
            (PacketType::Accept, ConnState::ConnectSent) => {
                debug!("Connection {} accepted", self.local_conn_id);
                self.state = ConnState::Connected;
                self.flush_at = Some(now + constants::FLUSH_INTERVAL);
                self.events.push(SessionEvent::Connected(self.server_load));
            },
            (PacketType::Data, ConnState::Connected) => {
                let body = match self.session_key.as_ref() {
                    Some(key) => match key.decrypt(&payload) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("Inbound payload failed to decrypt: {}", e);
                            self.events.push(SessionEvent::EncryptionError(e));
                            return;
                        }
                    },
                    None => payload,
                };
                self.events.push(SessionEvent::Message(body));
            },
            (PacketType::Datagram, _) => {},
            (PacketType::Disconnect, ConnState::Connected) |
            (PacketType::Disconnect, ConnState::Disconnecting) => {
                debug!("Connection {} closed by the peer", self.local_conn_id);
                self.emit_raw(PacketType::Datagram, &[]);
                self.destroy();
            },
            (pkt_type, state) => {
                warn!("Ignoring {} message in state {}", pkt_type, state);
            },
        }
    }

    fn fail(&mut self, err: Error) {
        warn!("UDP connection {} failed in state {}: {}", self.local_conn_id, self.state, err);
        self.events.push(SessionEvent::Fatal(err));
        self.destroy();
    }
}

fn earlier(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(x), Some(y)) => Some(cmp::min(x, y)),
        (x, None) => x,
        (None, y) => y,
    }
}

#[cfg(test)]
impl UdpSession {
    pub(crate) fn out_seq(&self) -> u32 {
        self.out_seq
    }

    pub(crate) fn out_seq_sent(&self) -> u32 {
        self.out_seq_sent
    }

    pub(crate) fn out_seq_acked(&self) -> u32 {
        self.out_seq_acked
    }

    pub(crate) fn in_seq(&self) -> u32 {
        self.in_seq
    }

    pub(crate) fn queued_packets(&self) -> usize {
        self.out_packets.len()
    }

    pub(crate) fn unacked_in_flight(&self) -> usize {
        self.out_packets.iter()
            .filter(|(seq, entry)| entry.first_sent.is_some() && **seq > self.out_seq_acked)
            .count()
    }
}
