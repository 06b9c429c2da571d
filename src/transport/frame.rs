use crate::{
    Error,
    error::Result,
};

pub(crate) const FRAME_MAGIC: &[u8; 4] = b"VT01";
pub(crate) const FRAME_HEADER_SIZE: usize = 8;

pub(crate) fn frame_payload(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(FRAME_MAGIC);
    framed.extend_from_slice(payload);
    framed
}

enum ParseState {
    AwaitingHeader,
    AwaitingBody(usize),
}

// Incremental parser over an arbitrarily-chunked byte stream. Feed it
// whatever the socket produced, then pull complete payloads out.
pub(crate) struct FrameParser {
    buffer: Vec<u8>,
    state: ParseState,
}

impl FrameParser {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Vec::new(),
            state: ParseState::AwaitingHeader,
        }
    }

    pub(crate) fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub(crate) fn next_payload(&mut self) -> Result<Option<Vec<u8>>> {
        if let ParseState::AwaitingHeader = self.state {
            if self.buffer.len() < FRAME_HEADER_SIZE {
                return Ok(None);
            }

            let len = u32::from_le_bytes(self.buffer[0..4].try_into().unwrap()) as usize;
            if &self.buffer[4..FRAME_HEADER_SIZE] != FRAME_MAGIC {
                return Err(Error::Protocol(format!("Bad magic")));
            }

            self.buffer.drain(0..FRAME_HEADER_SIZE);
            self.state = ParseState::AwaitingBody(len);
        }

        if let ParseState::AwaitingBody(len) = self.state {
            if self.buffer.len() < len {
                return Ok(None);
            }

            let payload = self.buffer.drain(0..len).collect();
            self.state = ParseState::AwaitingHeader;
            return Ok(Some(payload));
        }

        Ok(None)
    }
}
