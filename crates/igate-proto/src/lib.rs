//! iGate Protocol Definitions
//!
//! This crate holds the two wire formats the gateway understands on its radio
//! side: KISS framing of the TNC byte stream, and AX.25 UI frames carried in
//! the KISS data frames. Nothing in here performs I/O.

pub mod ax25;
pub mod error;
pub mod kiss;

pub use ax25::{decode, Address, DecodedPacket, MAX_DIGIPEATERS};
pub use error::{DecodeError, FrameError, ProtocolError, Result};
pub use kiss::{encode_frame, escape, unescape, FrameExtractor, FrameType, RawFrame};
