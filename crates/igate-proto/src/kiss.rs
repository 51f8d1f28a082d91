//! KISS framing
//!
//! Frame format:
//! ```text
//! [ 0xC0 ][ 1 byte: (frame_type << 4) | channel ][ N bytes: escaped payload ][ 0xC0 ]
//! ```
//!
//! Inside a frame `0xC0` is sent as `0xDB 0xDC` and `0xDB` as `0xDB 0xDD`.

use crate::FrameError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Frame delimiter
pub const FEND: u8 = 0xC0;

/// Escape byte
pub const FESC: u8 = 0xDB;

/// Substitute for an escaped `FEND`
pub const TFEND: u8 = 0xDC;

/// Substitute for an escaped `FESC`
pub const TFESC: u8 = 0xDD;

/// Maximum bytes buffered while waiting for a closing sentinel (64 KB)
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// KISS frame type (high nibble of the header byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Data frame carrying an AX.25 payload
    Data = 0x00,

    /// Transmitter keyup delay
    TxDelay = 0x01,

    /// CSMA persistence
    Persistence = 0x02,

    /// CSMA slot interval
    SlotTime = 0x03,

    /// Time to hold the transmitter after the frame
    TxTail = 0x04,

    /// Full duplex on/off
    FullDuplex = 0x05,

    /// Device-specific configuration
    SetHardware = 0x06,

    /// Leave KISS mode
    Return = 0x0F,
}

impl FrameType {
    /// Convert from the header's high nibble
    pub fn from_nibble(value: u8) -> Result<Self, FrameError> {
        match value {
            0x00 => Ok(FrameType::Data),
            0x01 => Ok(FrameType::TxDelay),
            0x02 => Ok(FrameType::Persistence),
            0x03 => Ok(FrameType::SlotTime),
            0x04 => Ok(FrameType::TxTail),
            0x05 => Ok(FrameType::FullDuplex),
            0x06 => Ok(FrameType::SetHardware),
            0x0F => Ok(FrameType::Return),
            other => Err(FrameError::UnknownFrameType(other)),
        }
    }
}

/// A single frame pulled off the TNC stream, payload already unescaped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// TNC sub-channel (low nibble of the header, 0..=15)
    pub channel: u8,

    /// Frame type
    pub frame_type: FrameType,

    /// Unescaped payload
    pub payload: Bytes,
}

impl RawFrame {
    /// Split a header byte into (channel, frame type)
    pub fn parse_header(header: u8) -> Result<(u8, FrameType), FrameError> {
        let channel = header & 0x0F;
        let frame_type = FrameType::from_nibble(header >> 4)?;
        Ok((channel, frame_type))
    }
}

/// Incremental frame extractor
///
/// Owns the bytes read from one TNC connection. Reads are appended with
/// [`FrameExtractor::feed`] and frames are pulled one at a time with
/// [`FrameExtractor::try_extract`].
#[derive(Debug, Default)]
pub struct FrameExtractor {
    buf: BytesMut,
}

impl FrameExtractor {
    /// Create an empty extractor
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append bytes from a socket read
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Try to extract one frame
    ///
    /// Returns `Ok(None)` when no complete frame is buffered yet, and also for
    /// an empty frame (two adjacent sentinels). In the latter case the bytes
    /// were consumed, so callers should retry before reading more.
    pub fn try_extract(&mut self) -> Result<Option<RawFrame>, FrameError> {
        // Anything before the first sentinel is line noise
        let start = match self.buf.iter().position(|&b| b == FEND) {
            Some(start) => start,
            None => {
                self.buf.clear();
                return Ok(None);
            }
        };
        self.buf.advance(start);

        let end = match self.buf[1..].iter().position(|&b| b == FEND) {
            Some(offset) => offset + 1,
            None => {
                if self.buf.len() > MAX_BUFFER_SIZE {
                    let size = self.buf.len();
                    self.buf.clear();
                    return Err(FrameError::Overflow {
                        size,
                        max: MAX_BUFFER_SIZE,
                    });
                }
                return Ok(None);
            }
        };

        // Consume opening sentinel, body and closing sentinel
        let frame = self.buf.split_to(end + 1);
        let body = &frame[1..end];
        if body.is_empty() {
            return Ok(None);
        }

        let body = unescape(body)?;
        if body.is_empty() {
            return Err(FrameError::TooShort);
        }

        let (channel, frame_type) = RawFrame::parse_header(body[0])?;
        let payload = Bytes::copy_from_slice(&body[1..]);

        Ok(Some(RawFrame {
            channel,
            frame_type,
            payload,
        }))
    }
}

/// Escape a payload for transmission inside a KISS frame
pub fn escape(payload: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(payload.len() + 8);
    for &byte in payload {
        match byte {
            FEND => escaped.extend_from_slice(&[FESC, TFEND]),
            FESC => escaped.extend_from_slice(&[FESC, TFESC]),
            _ => escaped.push(byte),
        }
    }
    escaped
}

/// Reverse KISS escaping
pub fn unescape(body: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut decoded = Vec::with_capacity(body.len());
    let mut bytes = body.iter().copied();

    while let Some(byte) = bytes.next() {
        if byte != FESC {
            decoded.push(byte);
            continue;
        }
        match bytes.next() {
            Some(TFEND) => decoded.push(FEND),
            Some(TFESC) => decoded.push(FESC),
            Some(other) => return Err(FrameError::InvalidEscape(other)),
            None => return Err(FrameError::TruncatedEscape),
        }
    }

    Ok(decoded)
}

/// Build a complete KISS frame
pub fn encode_frame(channel: u8, frame_type: FrameType, payload: &[u8]) -> Vec<u8> {
    let header = ((frame_type as u8) << 4) | (channel & 0x0F);
    let escaped = escape(&[&[header][..], payload].concat());

    let mut frame = BytesMut::with_capacity(escaped.len() + 2);
    frame.put_u8(FEND);
    frame.put_slice(&escaped);
    frame.put_u8(FEND);

    frame.to_vec()
}
