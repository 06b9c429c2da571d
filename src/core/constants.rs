use std::time::Duration;

// Sliding window of unacked outbound packets allowed on the wire
pub(crate) const AHEAD_COUNT: u32 = 5;

// Retransmit an unacked packet after this long
pub(crate) const RESEND_DELAY: Duration = Duration::from_secs(3);

// A packet unacked for this long means the connection is dead
pub(crate) const ACK_TIMEOUT: Duration = Duration::from_secs(15);

// How long a received seq may go unannounced before a pure-ack goes out
pub(crate) const DEFERRED_ACK_DELAY: Duration = Duration::from_millis(10);

// Periodic outgoing-queue sweep while connected
pub(crate) const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

// Give up waiting for the final ack of a graceful disconnect
pub(crate) const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// Obfuscation mask applied to the server challenge, fixed by the CM servers
pub(crate) const CHALLENGE_MASK: u32 = 0xA426DF2B;

pub(crate) const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);

// First local connection id; every new connection steps the counter by 256
pub(crate) const CONN_ID_INIT: u32 = 512;
pub(crate) const CONN_ID_STEP: u32 = 256;
