use std::cmp;

use log::{debug, info, warn};
use tokio::time::{sleep, Duration};

use crate::{
    ConnectOptions,
    Error,
    error::Result,
    Protocol,
    SessionKey,
};
use crate::transport::{Transport, TransportEvent};

// The uniform CM connection: picks a transport by protocol, applies the
// session cipher around it, and retries dropped connects until the
// encryption handshake has completed. The logon protocol above it only
// ever sees connect / packet / error / close.
pub struct CmConnection {
    opts: ConnectOptions,
    transport: Option<Transport>,

    session_key: Option<SessionKey>,
    use_hmac: bool,

    auto_retry: bool,
    connect_failures: i32,

    connected: bool,
    logged_on: bool,
}

impl CmConnection {
    pub fn new(opts: ConnectOptions) -> Self {
        Self {
            opts,
            transport: None,

            session_key: None,
            use_hmac: false,

            auto_retry: true,
            connect_failures: 0,

            connected: false,
            logged_on: false,
        }
    }

    pub fn set_use_hmac(&mut self, enabled: bool) {
        self.use_hmac = enabled;
    }

    pub fn use_hmac(&self) -> bool {
        self.use_hmac
    }

    // true once the encryption handshake has completed
    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn logged_on(&self) -> bool {
        self.logged_on
    }

    pub fn set_logged_on(&mut self, logged_on: bool) {
        self.logged_on = logged_on;
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    pub fn remote_address(&self) -> Option<String> {
        self.transport.as_ref().map(|t| t.remote_address())
    }

    pub fn set_server(&mut self, host: &str, port: u16) {
        self.opts = self.opts.clone().with_server(host, port);
    }

    // store the local binding for the next connect
    pub fn bind(&mut self, local_address: Option<&str>, local_port: Option<u16>) {
        self.opts = self.opts.clone()
            .with_local_address(local_address)
            .with_local_port(local_port);
    }

    pub async fn connect(&mut self, auto_retry: bool) -> Result<()> {
        if self.transport.is_some() {
            return Err(Error::State(format!(
                "Already connected to {}", self.opts.endpoint()
            )));
        }

        self.auto_retry = auto_retry;
        self.connect_failures = 0;

        info!("Connecting to {} over {}", self.opts.endpoint(), self.opts.protocol());
        self.transport = Some(Transport::open(&self.opts).await?);
        Ok(())
    }

    pub async fn recv(&mut self) -> Option<TransportEvent> {
        loop {
            let transport = self.transport.as_mut()?;

            match transport.recv().await {
                Some(TransportEvent::Error(e)) if self.auto_retry && !self.connected => {
                    warn!("Connection to {} dropped before the encryption handshake completed: {}",
                        self.opts.endpoint(), e);
                    self.transport = None;
                    self.reconnect().await;
                },
                Some(TransportEvent::Packet(data)) => {
                    match self.decrypt_inbound(data) {
                        Ok(body) => return Some(TransportEvent::Packet(body)),
                        Err(e) => return Some(TransportEvent::EncryptionError(e)),
                    }
                },
                Some(TransportEvent::Connected(load)) => {
                    self.connect_failures = 0;
                    return Some(TransportEvent::Connected(load));
                },
                Some(TransportEvent::End) => {
                    self.transport = None;
                    self.reset();
                    return Some(TransportEvent::End);
                },
                Some(event) => return Some(event),
                None => {
                    self.transport = None;
                    self.reset();
                    return None;
                },
            }
        }
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let body = match (self.opts.protocol(), self.session_key.as_ref()) {
            // the UDP transport runs the cipher itself
            (Protocol::Udp, _) | (_, None) => payload.to_vec(),
            (_, Some(key)) => key.encrypt(payload)?,
        };

        match self.transport.as_mut() {
            Some(transport) => transport.send(&body).await,
            None => Err(Error::State(format!(
                "Not connected to {}", self.opts.endpoint()
            ))),
        }
    }

    // Installed exactly once per connection, by the encryption handshake
    // handler above this layer. From here on every payload is ciphered.
    pub fn set_session_key(&mut self, key: &[u8]) -> Result<()> {
        if self.session_key.is_some() {
            return Err(Error::State(format!("Session key is already installed")));
        }
        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::State(format!(
                "Cannot install a session key while disconnected"
            )));
        };

        let key = SessionKey::new(key)?.with_hmac_iv(self.use_hmac);
        transport.set_session_key(Some(key.clone()));
        self.session_key = Some(key);
        self.connected = true;

        info!("Encryption handshake with {} completed", self.opts.endpoint());
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::State(format!(
                "Not connected to {}", self.opts.endpoint()
            )));
        };

        // a requested disconnect is final
        self.auto_retry = false;
        transport.end().await
    }

    pub fn destroy(&mut self) {
        self.auto_retry = false;
        if let Some(transport) = self.transport.as_mut() {
            transport.destroy();
        }
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        if let Some(transport) = self.transport.as_mut() {
            transport.set_timeout(timeout);
        }
    }

    fn decrypt_inbound(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        if self.opts.protocol() == Protocol::Udp {
            return Ok(data);
        }
        match self.session_key.as_ref() {
            Some(key) => key.decrypt(&data),
            None => Ok(data),
        }
    }

    async fn reconnect(&mut self) {
        loop {
            self.connect_failures += 1;
            let shift = cmp::min(self.connect_failures, 6) as u32;
            let delay = Duration::from_millis((1u64 << shift) * 250);

            debug!("Reconnect attempt {} to {} in {:?}",
                self.connect_failures, self.opts.endpoint(), delay);
            sleep(delay).await;

            match Transport::open(&self.opts).await {
                Ok(transport) => {
                    self.transport = Some(transport);
                    return;
                },
                Err(e) => {
                    warn!("Reconnect to {} failed: {}", self.opts.endpoint(), e);
                },
            }
        }
    }

    fn reset(&mut self) {
        self.session_key = None;
        self.connected = false;
        self.logged_on = false;
    }
}
