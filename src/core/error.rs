use std::fmt;
use std::io;
use std::net;
use std::result;

use tokio_tungstenite::tungstenite;

#[derive(Debug)]
pub enum Error {
    Argument(String),
    Io(String),
    Network(String),
    State(String),
    Protocol(String),
    Crypto(String),
    Timeout(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Argument(msg)    => write!(f, "{}", msg),
            Error::Io(msg)          => write!(f, "{}", msg),
            Error::Network(msg)     => write!(f, "{}", msg),
            Error::State(msg)       => write!(f, "{}", msg),
            Error::Protocol(msg)    => write!(f, "{}", msg),
            Error::Crypto(msg)      => write!(f, "{}", msg),
            Error::Timeout(msg)     => write!(f, "{}", msg),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(format!("IO error: {}", err))
    }
}

impl From<net::AddrParseError> for Error {
    fn from(err: net::AddrParseError) -> Self {
        Error::Network(format!("Network error: {}", err))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Argument(format!("URL error: {}", err))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Error::Network(format!("WebSocket error: {}", err))
    }
}

pub type Result<T> = result::Result<T, Error>;
