//! Gateway error types

use thiserror::Error;

/// Gateway-level errors
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TNC connection error
    #[error("TNC error: {0}")]
    Tnc(#[from] igate_core::TncError),

    /// APRS-IS error
    #[error("APRS-IS error: {0}")]
    Relay(#[from] igate_core::RelayError),

    /// Invalid backoff settings
    #[error("Backoff error: {0}")]
    Backoff(#[from] igate_core::BackoffError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
