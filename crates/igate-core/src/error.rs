//! Network error types

use igate_proto::FrameError;
use std::time::Duration;
use thiserror::Error;

/// APRS-IS relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    /// TCP connection could not be opened
    #[error("Unable to connect to APRS-IS server {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A network operation did not finish within the session timeout
    #[error("APRS-IS {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Server explicitly refused the credentials
    #[error("APRS-IS login failed: {0}")]
    LoginRejected(String),

    /// No `# logresp` line arrived
    #[error("APRS-IS login response not received")]
    LoginResponseMissing,

    /// Server hung up before answering the login
    #[error("APRS-IS server closed connection during login")]
    ClosedDuringLogin,

    /// Reading from the server failed
    #[error("Error reading APRS-IS response: {0}")]
    Read(#[source] std::io::Error),

    /// Writing a packet failed
    #[error("Failed to send packet to APRS-IS: {0}")]
    Send(#[source] std::io::Error),

    /// Operation needs an established session
    #[error("APRS-IS connection not established")]
    NotConnected,
}

impl RelayError {
    /// True when the server rejected our credentials
    ///
    /// Retrying with the same callsign/passcode will keep failing, so this is
    /// reported to the operator differently from transient errors.
    pub fn is_login_rejection(&self) -> bool {
        matches!(self, RelayError::LoginRejected(_))
    }
}

/// TNC connection errors
#[derive(Error, Debug)]
pub enum TncError {
    /// TCP connection could not be opened
    #[error("Unable to connect to KISS server at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect attempt timed out
    #[error("Timed out connecting to KISS server at {0}")]
    ConnectTimeout(String),

    /// Remote side closed the stream
    #[error("KISS connection closed by remote host")]
    Closed,

    /// A frame could not be extracted
    #[error("KISS framing error: {0}")]
    Frame(#[from] FrameError),

    /// I/O error on an open connection
    #[error("Socket error on KISS connection: {0}")]
    Io(#[from] std::io::Error),

    /// Operation needs an open connection
    #[error("KISS connection not established")]
    NotConnected,
}

/// Invalid backoff parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackoffError {
    /// Base delay must be positive
    #[error("base_delay must be positive")]
    ZeroBaseDelay,

    /// Max delay must not be below the base delay
    #[error("max_delay ({max:?}) must be >= base_delay ({base:?})")]
    MaxBelowBase { base: Duration, max: Duration },

    /// Multiplier must be a finite number >= 1.0
    #[error("multiplier must be >= 1.0, got {0}")]
    InvalidMultiplier(f64),
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
