pub mod core;
pub mod transport;
pub mod connection;

pub use {
    core::error,
    core::error::Error,
    core::conn_options::ConnectOptions,
    core::conn_options::Protocol,
    core::session_key::SessionKey,
    transport::TransportEvent,
    connection::CmConnection,
};

use rand::RngCore;

pub(crate) fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
