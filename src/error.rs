use std::io;

/// The error kinds the core distinguishes.
///
/// Endpoint lifetime operations (`open`, `bind`, `connect`) never leak a
/// partially-initialized object on any of these; data-path errors on a bound
/// endpoint are logged and drop only the offending frame unless noted
/// otherwise on the variant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A bad URI, unknown scheme, oversized name, or a nil required field.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An unknown descriptor, port name, or loopback name.
    #[error("not found: {0}")]
    NotFound(String),

    /// A descriptor is busy (already bound) or a name is already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Two endpoint kinds refuse to bind to each other.
    #[error("incompatible endpoint kinds: {0}")]
    Incompatible(String),

    /// A descriptor table is full, or an allocation failed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An underlying kernel or socket call failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A framed message was truncated, or a kind-specific payload was
    /// malformed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Terminal for a client session: the peer closed the connection.
    #[error("peer closed")]
    PeerClosed,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Error {
        Error::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Error {
        Error::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Error {
        Error::Conflict(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Error {
        Error::Protocol(msg.into())
    }
}
