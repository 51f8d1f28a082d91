//! iGate Core - Networking layer for the APRS iGate
//!
//! This crate provides the two network edges of the gateway: the KISS
//! connection to the local TNC and the APRS-IS client, plus the reconnect
//! backoff shared by the forwarding loop.

pub mod aprsis;
pub mod backoff;
pub mod error;
pub mod kiss_client;

pub use aprsis::{classify_login_response, LoginStatus, RelayClient, RelayConfig, RelayState};
pub use backoff::Backoff;
pub use error::{BackoffError, RelayError, Result, TncError};
pub use kiss_client::{KissConnection, TncInterface};

/// Re-exports
pub use igate_proto;
