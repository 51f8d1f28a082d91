//! AX.25 UI frame decoding
//!
//! Only the unnumbered information frame used by APRS is understood. The
//! decoded packet renders to the TNC2 text form used on APRS-IS:
//!
//! ```text
//! SRC[-SSID]>DEST[-SSID][,DIGI[-SSID][*]]...:INFO
//! ```

use crate::DecodeError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Length of one address record on the wire
pub const ADDRESS_LEN: usize = 7;

/// Callsign bytes within an address record
pub const CALLSIGN_LEN: usize = 6;

/// Smallest frame that can hold two addresses, control and PID
pub const MIN_FRAME_LEN: usize = 16;

/// Protocol maximum for the digipeater path
pub const MAX_DIGIPEATERS: usize = 8;

/// Unnumbered information control field
pub const CONTROL_UI: u8 = 0x03;

/// "No layer 3" protocol identifier
pub const PID_NO_LAYER3: u8 = 0xF0;

const SSID_EXTENSION_BIT: u8 = 0x01;
const SSID_REPEATED_BIT: u8 = 0x80;
const SSID_RESERVED_BITS: u8 = 0x60;

/// A station address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Callsign, uppercase, no padding
    pub callsign: String,

    /// Secondary station identifier (0..=15)
    pub ssid: u8,

    /// Set by a digipeater once it has relayed the frame
    pub repeated: bool,
}

impl Address {
    /// Create an address that has not been repeated
    pub fn new(callsign: &str, ssid: u8) -> Self {
        Self {
            callsign: callsign.trim().to_ascii_uppercase(),
            ssid: ssid & 0x0F,
            repeated: false,
        }
    }

    /// Mark the address as already repeated
    pub fn with_repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    /// Render in TNC2 form, with the `*` marker when requested and repeated
    pub fn to_tnc2(&self, mark_repeated: bool) -> String {
        let mut text = self.callsign.clone();
        if self.ssid > 0 {
            text.push_str(&format!("-{}", self.ssid));
        }
        if mark_repeated && self.repeated {
            text.push('*');
        }
        text
    }

    /// Decode one 7-byte address record
    ///
    /// Returns the address and whether the extension bit (last address) was set.
    fn decode(record: &[u8]) -> (Self, bool) {
        let callsign: String = record[..CALLSIGN_LEN]
            .iter()
            .map(|byte| (byte >> 1) & 0x7F)
            .filter(|&value| value != 0)
            .map(char::from)
            .collect();

        let ssid_byte = record[CALLSIGN_LEN];
        let address = Self {
            callsign: callsign.trim().to_ascii_uppercase(),
            ssid: (ssid_byte >> 1) & 0x0F,
            repeated: ssid_byte & SSID_REPEATED_BIT != 0,
        };

        (address, ssid_byte & SSID_EXTENSION_BIT != 0)
    }

    /// Encode as a 7-byte address record
    fn encode(&self, last: bool, buf: &mut BytesMut) {
        let padded = format!("{:<width$}", self.callsign, width = CALLSIGN_LEN);
        for byte in padded.bytes().take(CALLSIGN_LEN) {
            buf.put_u8(byte << 1);
        }

        let mut ssid_byte = SSID_RESERVED_BITS | ((self.ssid & 0x0F) << 1);
        if self.repeated {
            ssid_byte |= SSID_REPEATED_BIT;
        }
        if last {
            ssid_byte |= SSID_EXTENSION_BIT;
        }
        buf.put_u8(ssid_byte);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_tnc2(false))
    }
}

/// A decoded UI frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    /// Destination (first on the wire)
    pub destination: Address,

    /// Source (second on the wire)
    pub source: Address,

    /// Digipeater path in transmission order
    pub digipeaters: Vec<Address>,

    /// Information field, cut at the first CR or LF
    pub info: Bytes,
}

impl DecodedPacket {
    /// Render to TNC2 text
    ///
    /// Info bytes that are not valid UTF-8 are replaced with U+FFFD.
    pub fn to_tnc2(&self) -> String {
        let mut text = format!(
            "{}>{}",
            self.source.to_tnc2(false),
            self.destination.to_tnc2(false)
        );
        for digi in &self.digipeaters {
            text.push(',');
            text.push_str(&digi.to_tnc2(true));
        }
        text.push(':');
        text.push_str(&String::from_utf8_lossy(&self.info));
        text
    }

    /// Encode as an AX.25 UI frame
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(
            ADDRESS_LEN * (2 + self.digipeaters.len()) + 2 + self.info.len(),
        );

        self.destination.encode(false, &mut buf);
        self.source.encode(self.digipeaters.is_empty(), &mut buf);
        for (index, digi) in self.digipeaters.iter().enumerate() {
            digi.encode(index + 1 == self.digipeaters.len(), &mut buf);
        }

        buf.put_u8(CONTROL_UI);
        buf.put_u8(PID_NO_LAYER3);
        buf.put_slice(&self.info);

        buf.to_vec()
    }
}

impl fmt::Display for DecodedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_tnc2())
    }
}

/// Decode a KISS data payload into a packet
pub fn decode(payload: &[u8]) -> Result<DecodedPacket, DecodeError> {
    if payload.len() < MIN_FRAME_LEN {
        return Err(DecodeError::TooShort { len: payload.len() });
    }

    let (mut addresses, offset) = parse_addresses(payload)?;
    if addresses.len() < 2 {
        return Err(DecodeError::MissingAddresses {
            count: addresses.len(),
        });
    }
    if addresses.len() > 2 + MAX_DIGIPEATERS {
        return Err(DecodeError::TooManyDigipeaters {
            count: addresses.len() - 2,
        });
    }

    if offset + 2 > payload.len() {
        return Err(DecodeError::MissingControl);
    }
    let control = payload[offset];
    let pid = payload[offset + 1];
    if control != CONTROL_UI || pid != PID_NO_LAYER3 {
        return Err(DecodeError::UnsupportedFrameType { control, pid });
    }

    let info = &payload[offset + 2..];
    let info = match info.iter().position(|&b| b == b'\r' || b == b'\n') {
        Some(end) => &info[..end],
        None => info,
    };

    let digipeaters = addresses.split_off(2);
    let source = addresses.pop().ok_or(DecodeError::MissingAddresses { count: 0 })?;
    let destination = addresses.pop().ok_or(DecodeError::MissingAddresses { count: 0 })?;

    Ok(DecodedPacket {
        destination,
        source,
        digipeaters,
        info: Bytes::copy_from_slice(info),
    })
}

/// Walk the address chain until the extension bit
///
/// Returns the addresses and the offset of the control byte.
fn parse_addresses(payload: &[u8]) -> Result<(Vec<Address>, usize), DecodeError> {
    let mut addresses = Vec::new();

    for (index, record) in payload.chunks_exact(ADDRESS_LEN).enumerate() {
        let (address, last) = Address::decode(record);
        addresses.push(address);
        if last {
            return Ok((addresses, (index + 1) * ADDRESS_LEN));
        }
    }

    Err(DecodeError::ExtensionBitNotFound)
}
