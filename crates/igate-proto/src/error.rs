//! Protocol error types

use thiserror::Error;

/// KISS framing errors
///
/// Each of these is fatal to the offending frame only. The frame's bytes have
/// already been consumed when the error is returned, so the next call resumes
/// at the following sentinel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame body was non-empty but had no room for a header byte
    #[error("KISS frame too short to contain a header")]
    TooShort,

    /// Escape byte was the last byte of the frame body
    #[error("Truncated KISS escape sequence")]
    TruncatedEscape,

    /// Escape byte followed by something other than a substitute byte
    #[error("Invalid KISS escape byte: {0:#04x}")]
    InvalidEscape(u8),

    /// Header carried a frame type nibble that KISS does not define
    #[error("Unknown KISS frame type: {0:#x}")]
    UnknownFrameType(u8),

    /// No closing sentinel arrived before the buffer limit
    #[error("KISS buffer overflow: {size} bytes without a closing sentinel (max: {max})")]
    Overflow { size: usize, max: usize },
}

/// AX.25 decode errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is below the minimum UI frame size
    #[error("AX.25 frame too short: {len} bytes")]
    TooShort { len: usize },

    /// Address chain ran off the end of the payload
    #[error("AX.25 address extension bit not found")]
    ExtensionBitNotFound,

    /// Fewer than destination + source
    #[error("AX.25 frame missing source/destination addresses (found {count})")]
    MissingAddresses { count: usize },

    /// More digipeaters than the protocol allows
    #[error("AX.25 frame has too many digipeaters: {count} (max: 8)")]
    TooManyDigipeaters { count: usize },

    /// Address chain ended without room for control and PID
    #[error("AX.25 frame missing control/PID fields")]
    MissingControl,

    /// Anything other than a UI frame with no layer 3
    #[error("Unsupported AX.25 frame type control={control:#04x} pid={pid:#04x}")]
    UnsupportedFrameType { control: u8, pid: u8 },
}

/// Protocol-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// KISS framing error
    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    /// AX.25 decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
