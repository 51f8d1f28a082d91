//! APRS iGate Library
//!
//! Forwards APRS packets heard by a KISS TNC to the APRS-IS network

pub mod config;
pub mod error;
pub mod forwarder;
pub mod normalize;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use forwarder::{FrameOutcome, Forwarder, ForwarderConfig, ForwardingCounters};
