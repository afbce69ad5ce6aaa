use std::fmt;

/// Errors produced anywhere in the redirector.
///
/// Connection-scoped variants are always handled at the point they're
/// returned (logged, connection torn down) and never escape a connection
/// task. Only the config/startup variants reach `main`.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Config(String),
    AddressResolutionFailed(String),
    PoolExhausted,
    OriginalDestinationLookupFailed,
    RelayConnectFailed(String),
    HandshakeFailed(String),
    PeerReset(String),
    SocketSetupFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "config error: {}", msg),
            Error::AddressResolutionFailed(msg) => {
                write!(f, "relay address resolution failed: {}", msg)
            }
            Error::PoolExhausted => write!(f, "connection pool exhausted"),
            Error::OriginalDestinationLookupFailed => {
                write!(f, "original destination lookup failed")
            }
            Error::RelayConnectFailed(msg) => write!(f, "connect to relay failed: {}", msg),
            Error::HandshakeFailed(msg) => write!(f, "handshake failed: {}", msg),
            Error::PeerReset(msg) => write!(f, "peer reset: {}", msg),
            Error::SocketSetupFailed(msg) => write!(f, "socket setup failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
