pub(crate) mod frame;
pub(crate) mod tcp;
pub(crate) mod udp;
pub(crate) mod ws;

#[cfg(test)]
mod unitests;

use std::fmt;

use tokio::time::Duration;

use crate::{
    ConnectOptions,
    Error,
    error::Result,
    Protocol,
    SessionKey,
};
use tcp::TcpTransport;
use udp::UdpTransport;
use ws::WsTransport;

#[derive(Debug)]
pub enum TransportEvent {
    Connected(Option<u32>),
    Packet(Vec<u8>),
    Error(Error),
    EncryptionError(Error),
    Timeout,
    Close,
    End,
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportEvent::Connected(_) => "connected",
            TransportEvent::Packet(_) => "packet",
            TransportEvent::Error(_) => "error",
            TransportEvent::EncryptionError(_) => "encryptionError",
            TransportEvent::Timeout => "timeout",
            TransportEvent::Close => "close",
            TransportEvent::End => "end",
        })
    }
}

// The three transports answer the same surface, so the connection owns
// exactly one of these.
pub(crate) enum Transport {
    Tcp(TcpTransport),
    Udp(UdpTransport),
    Ws(WsTransport),
}

impl Transport {
    pub(crate) async fn open(opts: &ConnectOptions) -> Result<Transport> {
        match opts.protocol() {
            Protocol::Tcp => Ok(Transport::Tcp(TcpTransport::connect(opts).await?)),
            Protocol::Udp => Ok(Transport::Udp(UdpTransport::connect(opts).await?)),
            Protocol::WebSocket => Ok(Transport::Ws(WsTransport::connect(opts).await?)),
        }
    }

    pub(crate) async fn recv(&mut self) -> Option<TransportEvent> {
        match self {
            Transport::Tcp(v) => v.recv().await,
            Transport::Udp(v) => v.recv().await,
            Transport::Ws(v) => v.recv().await,
        }
    }

    pub(crate) async fn send(&mut self, payload: &[u8]) -> Result<()> {
        match self {
            Transport::Tcp(v) => v.send(payload).await,
            Transport::Udp(v) => v.send(payload).await,
            Transport::Ws(v) => v.send(payload).await,
        }
    }

    pub(crate) async fn end(&mut self) -> Result<()> {
        match self {
            Transport::Tcp(v) => v.end().await,
            Transport::Udp(v) => v.end().await,
            Transport::Ws(v) => v.end().await,
        }
    }

    pub(crate) fn destroy(&mut self) {
        match self {
            Transport::Tcp(v) => v.destroy(),
            Transport::Udp(v) => v.destroy(),
            Transport::Ws(v) => v.destroy(),
        }
    }

    pub(crate) fn set_timeout(&mut self, timeout: Option<Duration>) {
        match self {
            Transport::Tcp(v) => v.set_timeout(timeout),
            Transport::Udp(v) => v.set_timeout(timeout),
            Transport::Ws(v) => v.set_timeout(timeout),
        }
    }

    // only the UDP transport holds the key itself, the others leave
    // payload crypto to the connection above
    pub(crate) fn set_session_key(&mut self, key: Option<SessionKey>) {
        if let Transport::Udp(v) = self {
            v.set_session_key(key);
        }
    }

    pub(crate) fn remote_address(&self) -> String {
        match self {
            Transport::Tcp(v) => v.remote_address(),
            Transport::Udp(v) => v.remote_address(),
            Transport::Ws(v) => v.remote_address(),
        }
    }
}
