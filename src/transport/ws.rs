use std::collections::LinkedList;
use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::{interval_at, sleep_until, Duration, Instant, Interval};
use tokio_tungstenite::{
    client_async_tls,
    connect_async,
    tungstenite::Message,
    MaybeTlsStream,
    WebSocketStream,
};

use crate::{
    ConnectOptions,
    Error,
    error::Result,
};
use crate::core::{constants, proxy};
use super::TransportEvent;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Wake {
    Incoming(Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Ping,
    Idle,
}

// One binary WebSocket message per payload; the WS layer does the
// framing that the TCP transport prefixes by hand.
pub(crate) struct WsTransport {
    stream: WsStream,
    remote: String,
    ping: Interval,
    pending: LinkedList<TransportEvent>,
    inactivity: Option<Duration>,
    last_activity: Instant,
    finished: bool,
}

impl WsTransport {
    pub(crate) async fn connect(opts: &ConnectOptions) -> Result<Self> {
        let url = format!("wss://{}:{}/cmsocket/", opts.host(), opts.port());

        let (stream, _) = match (opts.http_proxy(), opts.local_bind()) {
            (Some(proxy_url), _) => {
                let tcp = proxy::tunnel(proxy_url, opts.host(), opts.port(), opts.proxy_timeout()).await?;
                client_async_tls(url.as_str(), tcp).await?
            },
            (None, Some(local)) => {
                let remote = lookup_host(opts.endpoint()).await?
                    .next()
                    .ok_or_else(|| Error::Network(format!("Cannot resolve {}", opts.endpoint())))?;
                let socket = match remote {
                    SocketAddr::V4(_) => TcpSocket::new_v4()?,
                    SocketAddr::V6(_) => TcpSocket::new_v6()?,
                };
                socket.bind(local.parse()?)?;
                let tcp = socket.connect(remote).await?;
                client_async_tls(url.as_str(), tcp).await?
            },
            (None, None) => connect_async(url.as_str()).await?,
        };
        debug!("WebSocket connection to {} established", url);

        let mut pending = LinkedList::new();
        pending.push_back(TransportEvent::Connected(None));

        Ok(Self {
            stream,
            remote: opts.endpoint(),
            ping: interval_at(
                Instant::now() + constants::WS_PING_INTERVAL,
                constants::WS_PING_INTERVAL,
            ),
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
                msg = self.stream.next() => Wake::Incoming(msg),
                _ = self.ping.tick() => Wake::Ping,
                _ = sleep_until(idle_at.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))),
                    if idle_at.is_some() => Wake::Idle,
            };

            match wake {
                Wake::Incoming(Some(Ok(Message::Binary(data)))) => {
                    self.last_activity = Instant::now();
                    self.pending.push_back(TransportEvent::Packet(data));
                },
                Wake::Incoming(Some(Ok(Message::Close(_)))) => {
                    debug!("WebSocket connection to {} closed by the peer", self.remote);
                    self.pending.push_back(TransportEvent::Close);
                    self.pending.push_back(TransportEvent::End);
                    self.finished = true;
                },
                Wake::Incoming(Some(Ok(msg))) => {
                    debug!("Dropping non-binary WebSocket message of {} bytes", msg.len());
                    self.last_activity = Instant::now();
                },
                Wake::Incoming(Some(Err(e))) => {
                    warn!("WebSocket connection to {} failed: {}", self.remote, e);
                    self.fail(Error::from(e));
                },
                Wake::Incoming(None) => {
                    self.pending.push_back(TransportEvent::Close);
                    self.pending.push_back(TransportEvent::End);
                    self.finished = true;
                },
                Wake::Ping => {
                    if let Err(e) = self.stream.send(Message::Ping(Vec::new())).await {
                        self.fail(Error::from(e));
                    }
                },
                Wake::Idle => {
                    self.pending.push_back(TransportEvent::Timeout);
                    self.last_activity = Instant::now();
                },
            }
        }
    }

    pub(crate) async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.stream.send(Message::Binary(payload.to_vec())).await?;
        Ok(())
    }

    pub(crate) async fn end(&mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }

    pub(crate) fn destroy(&mut self) {
        // no abortive close in the WS layer, dropping the stream severs it
        self.pending.push_back(TransportEvent::Close);
        self.pending.push_back(TransportEvent::End);
        self.finished = true;
    }

    pub(crate) fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.inactivity = timeout;
        self.last_activity = Instant::now();
    }

    pub(crate) fn remote_address(&self) -> String {
        self.remote.clone()
    }

    fn fail(&mut self, err: Error) {
        self.pending.push_back(TransportEvent::Error(err));
        self.pending.push_back(TransportEvent::Close);
        self.pending.push_back(TransportEvent::End);
        self.finished = true;
    }
}
