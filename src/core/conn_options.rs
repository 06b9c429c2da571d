use std::fmt;
use std::time::Duration;
use url::Url;

use crate::core::constants;

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Tcp = 1,
    Udp = 2,
    WebSocket = 3,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::WebSocket => "websocket",
        })
    }
}

#[derive(Clone)]
pub struct ConnectOptions {
    host: String,
    port: u16,
    protocol: Protocol,

    local_address: Option<String>,
    local_port: Option<u16>,

    http_proxy: Option<Url>,
    proxy_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            protocol: Protocol::Tcp,

            local_address: None,
            local_port: None,

            http_proxy: None,
            proxy_timeout: constants::DEFAULT_PROXY_TIMEOUT,
        }
    }

    pub fn with_server(mut self, host: &str, port: u16) -> Self {
        self.host = host.to_string();
        self.port = port;
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_local_address(mut self, addr: Option<&str>) -> Self {
        self.local_address = addr.map(|v| v.to_string());
        self
    }

    pub fn with_local_port(mut self, port: Option<u16>) -> Self {
        self.local_port = port;
        self
    }

    pub fn with_http_proxy(mut self, proxy: Option<Url>) -> Self {
        self.http_proxy = proxy;
        self
    }

    pub fn with_proxy_timeout(mut self, timeout: Duration) -> Self {
        self.proxy_timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn local_address(&self) -> Option<&str> {
        self.local_address.as_deref()
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    pub fn http_proxy(&self) -> Option<&Url> {
        self.http_proxy.as_ref()
    }

    pub fn proxy_timeout(&self) -> Duration {
        self.proxy_timeout
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    // "addr:port" to bind the outgoing socket to, when either half was given
    pub(crate) fn local_bind(&self) -> Option<String> {
        if self.local_address.is_none() && self.local_port.is_none() {
            return None;
        }
        let addr = self.local_address.as_deref().unwrap_or("0.0.0.0");
        let port = self.local_port.unwrap_or(0);
        Some(format!("{}:{}", addr, port))
    }
}
