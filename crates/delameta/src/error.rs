use std::io;

/// Central error type for the toolkit: a numeric code paired with a
/// human-readable message.
///
/// Positive codes are OS `errno` values. Negative codes are reserved:
/// `-1` for configuration/usage errors, and the two well-known transport
/// conditions below.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    pub code: i32,
    pub message: String,
}

pub const CODE_USAGE: i32 = -1;
pub const CODE_CONNECTION_CLOSED: i32 = -2;
pub const CODE_TRANSFER_TIMEOUT: i32 = -3;

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Configuration or usage error (invalid mode, unknown scheme, ...).
    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(CODE_USAGE, message)
    }

    /// The peer closed the connection (or EOF on a plain fd).
    pub fn connection_closed() -> Self {
        Self::new(CODE_CONNECTION_CLOSED, "Connection closed")
    }

    /// A read did not complete within the descriptor's timeout.
    pub fn transfer_timeout() -> Self {
        Self::new(CODE_TRANSFER_TIMEOUT, "Transfer timeout")
    }

    pub fn is_connection_closed(&self) -> bool {
        self.code == CODE_CONNECTION_CLOSED
    }

    pub fn is_transfer_timeout(&self) -> bool {
        self.code == CODE_TRANSFER_TIMEOUT
    }

    /// Wrap the current `errno` as `{errno, strerror}`.
    pub fn last_os_error() -> Self {
        io::Error::last_os_error().into()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::new(e.raw_os_error().unwrap_or(CODE_USAGE), e.to_string())
    }
}
