use std::collections::LinkedList;
use std::net::SocketAddr;

use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::{sleep_until, Duration, Instant};

use crate::{
    ConnectOptions,
    Error,
    error::Result,
};
use crate::core::proxy;
use super::frame::{self, FrameParser};
use super::TransportEvent;

enum Wake {
    Read(usize),
    Idle,
    Failed(Error),
}

pub(crate) struct TcpTransport {
    stream: TcpStream,
    remote: SocketAddr,
    parser: FrameParser,
    rcvbuf: Vec<u8>,
    pending: LinkedList<TransportEvent>,
    inactivity: Option<Duration>,
    last_activity: Instant,
    finished: bool,
}

impl TcpTransport {
    pub(crate) async fn connect(opts: &ConnectOptions) -> Result<Self> {
        let stream = match opts.http_proxy() {
            Some(proxy_url) => {
                proxy::tunnel(proxy_url, opts.host(), opts.port(), opts.proxy_timeout()).await?
            },
            None => {
                let remote = lookup_host(opts.endpoint()).await?
                    .next()
                    .ok_or_else(|| Error::Network(format!("Cannot resolve {}", opts.endpoint())))?;

                match opts.local_bind() {
                    Some(local) => {
                        let socket = match remote {
                            SocketAddr::V4(_) => TcpSocket::new_v4()?,
                            SocketAddr::V6(_) => TcpSocket::new_v6()?,
                        };
                        socket.bind(local.parse()?)?;
                        socket.connect(remote).await?
                    },
                    None => TcpStream::connect(remote).await?,
                }
            },
        };

        let remote = stream.peer_addr()?;
        debug!("TCP connection to {} established", remote);

        let mut pending = LinkedList::new();
        pending.push_back(TransportEvent::Connected(None));

        Ok(Self {
            stream,
            remote,
            parser: FrameParser::new(),
            rcvbuf: vec![0u8; 8192],
            pending,
            inactivity: None,
            last_activity: Instant::now(),
            finished: false,
        })
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

            let wake = tokio::select! {
                result = self.stream.read(&mut self.rcvbuf) => match result {
                    Ok(len) => Wake::Read(len),
                    Err(e) => Wake::Failed(Error::from(e)),
                },
                _ = sleep_until(idle_at.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))),
                    if idle_at.is_some() => Wake::Idle,
            };

            match wake {
                Wake::Read(0) => {
                    debug!("TCP connection to {} closed by the peer", self.remote);
                    self.pending.push_back(TransportEvent::Close);
                    self.pending.push_back(TransportEvent::End);
                    self.finished = true;
                },
                Wake::Read(len) => {
                    self.last_activity = Instant::now();
                    self.parser.push(&self.rcvbuf[..len]);
                    loop {
                        match self.parser.next_payload() {
                            Ok(Some(payload)) => {
                                self.pending.push_back(TransportEvent::Packet(payload));
                            },
                            Ok(None) => break,
                            Err(e) => {
                                warn!("TCP stream from {} is corrupt: {}", self.remote, e);
                                self.fail(e);
                                break;
                            },
                        }
                    }
                },
                Wake::Idle => {
                    self.pending.push_back(TransportEvent::Timeout);
                    self.last_activity = Instant::now();
                },
                Wake::Failed(e) => self.fail(e),
            }
        }
    }

    pub(crate) async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let framed = frame::frame_payload(payload);
        self.stream.write_all(&framed).await?;
        Ok(())
    }

    pub(crate) async fn end(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub(crate) fn destroy(&mut self) {
        // RST on drop instead of a clean FIN
        _ = self.stream.set_linger(Some(Duration::from_secs(0)));
        self.pending.push_back(TransportEvent::Close);
        self.pending.push_back(TransportEvent::End);
        self.finished = true;
    }

    pub(crate) fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.inactivity = timeout;
        self.last_activity = Instant::now();
    }

    pub(crate) fn remote_address(&self) -> String {
        self.remote.to_string()
    }

    fn fail(&mut self, err: Error) {
        self.pending.push_back(TransportEvent::Error(err));
        self.pending.push_back(TransportEvent::Close);
        self.pending.push_back(TransportEvent::End);
        self.finished = true;
    }
}
