pub(crate) mod packet;
pub(crate) mod session;

use std::collections::LinkedList;
use std::net::SocketAddr;

use log::{debug, warn};
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{sleep_until, Duration, Instant};

use crate::{
    ConnectOptions,
    Error,
    error::Result,
    SessionKey,
};
use super::TransportEvent;
use packet::PacketType;
use session::{ConnState, SessionEvent, UdpSession};

enum Wake {
    Datagram(usize, SocketAddr),
    Timer,
    Failed(Error),
}

// Socket loop around the protocol core: receives datagrams, feeds the
// session, puts its wire output on the socket and surfaces its events.
pub(crate) struct UdpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
    session: UdpSession,
    rcvbuf: Vec<u8>,
    pending: LinkedList<TransportEvent>,
    inactivity: Option<Duration>,
    last_activity: Instant,
    finished: bool,
}

impl UdpTransport {
    pub(crate) async fn connect(opts: &ConnectOptions) -> Result<Self> {
        let remote = lookup_host(opts.endpoint()).await?
            .next()
            .ok_or_else(|| Error::Network(format!("Cannot resolve {}", opts.endpoint())))?;

        let bind_addr = opts.local_bind().unwrap_or_else(|| match remote {
            SocketAddr::V4(_) => String::from("0.0.0.0:0"),
            SocketAddr::V6(_) => String::from("[::]:0"),
        });
        let socket = UdpSocket::bind(&bind_addr).await?;

        let mut session = UdpSession::new();
        session.start()?;
        debug!("UDP connection {} to {} started", session.local_conn_id(), remote);

        let mut transport = Self {
            socket,
            remote,
            session,
            rcvbuf: vec![0u8; 2048],
            pending: LinkedList::new(),
            inactivity: None,
            last_activity: Instant::now(),
            finished: false,
        };
        transport.flush_wire().await?;
        Ok(transport)
    }

    pub(crate) async fn recv(&mut self) -> Option<TransportEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }

            let idle_at = self.inactivity.map(|timeout| self.last_activity + timeout);
            let wake_at = match (self.session.next_timeout(), idle_at) {
                (Some(a), Some(b)) => Some(std::cmp::min(a, b)),
                (a, None) => a,
                (None, b) => b,
            };

            let wake = tokio::select! {
                result = self.socket.recv_from(&mut self.rcvbuf) => match result {
                    Ok((len, addr)) => Wake::Datagram(len, addr),
                    Err(e) => Wake::Failed(Error::from(e)),
                },
                _ = sleep_until(wake_at.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))),
                    if wake_at.is_some() => Wake::Timer,
            };

            match wake {
                Wake::Datagram(len, addr) => {
                    if addr != self.remote {
                        debug!("Dropping datagram from unexpected endpoint {}", addr);
                    } else {
                        let now = Instant::now();
                        self.last_activity = now;
                        self.session.on_datagram(&self.rcvbuf[..len], now);
                    }
                },
                Wake::Timer => {
                    let now = Instant::now();
                    if let Some(at) = idle_at {
                        if now >= at {
                            self.pending.push_back(TransportEvent::Timeout);
                            self.last_activity = now;
                        }
                    }
                    self.session.tick(now);
                },
                Wake::Failed(e) => {
                    warn!("UDP socket error on connection {}: {}",
                        self.session.local_conn_id(), e);
                    self.pending.push_back(TransportEvent::Error(e));
                    self.session.destroy();
                },
            }

            if let Err(e) = self.flush_wire().await {
                warn!("UDP send failed on connection {}: {}",
                    self.session.local_conn_id(), e);
                self.pending.push_back(TransportEvent::Error(e));
                self.session.destroy();
            }
            self.translate_events();
        }
    }

    pub(crate) async fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.session.state() != ConnState::Connected {
            return Err(Error::State(format!(
                "Cannot send while the connection is {}", self.session.state()
            )));
        }

        self.session.send_message(PacketType::Data, payload, Instant::now())?;
        self.flush_wire().await?;
        self.translate_events();
        Ok(())
    }

    pub(crate) async fn end(&mut self) -> Result<()> {
        self.session.end(Instant::now())?;
        self.flush_wire().await?;
        self.translate_events();
        Ok(())
    }

    pub(crate) fn destroy(&mut self) {
        self.session.destroy();
        self.session.take_outgoing();       // severed, nothing more goes out
        self.translate_events();
    }

    pub(crate) fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.inactivity = timeout;
        self.last_activity = Instant::now();
    }

    pub(crate) fn set_session_key(&mut self, key: Option<SessionKey>) {
        self.session.set_session_key(key);
    }

    pub(crate) fn remote_address(&self) -> String {
        self.remote.to_string()
    }

    async fn flush_wire(&mut self) -> Result<()> {
        for wire in self.session.take_outgoing() {
            self.socket.send_to(&wire, self.remote).await?;
        }
        Ok(())
    }

    fn translate_events(&mut self) {
        for event in self.session.take_events() {
            match event {
                SessionEvent::Connected(load) => {
                    self.pending.push_back(TransportEvent::Connected(Some(load)));
                },
                SessionEvent::Message(body) => {
                    self.pending.push_back(TransportEvent::Packet(body));
                },
                SessionEvent::EncryptionError(e) => {
                    self.pending.push_back(TransportEvent::EncryptionError(e));
                },
                SessionEvent::Fatal(e) => {
                    self.pending.push_back(TransportEvent::Error(e));
                },
                SessionEvent::Closed => {
                    self.pending.push_back(TransportEvent::Close);
                    self.pending.push_back(TransportEvent::End);
                    self.finished = true;
                },
            }
        }
    }
}
