//! Handshake header decoding.
//!
//! The first binary frame of a session starts with:
//!
//! ```text
//! version(1) | id(16) | addon_len(1) | command(1) | addon(N) | port(2, BE) | atyp(1) | addr | payload...
//! ```
//!
//! Anything after the address is tunneled payload.

use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
};

use crate::auth::{IDENTIFIER_LEN, Identifier};
use crate::error::HeaderError;

/// version + identifier + addon length
pub const MIN_HEADER_LEN: usize = 1 + IDENTIFIER_LEN + 1;

const ADDON_LEN_OFFSET: usize = 1 + IDENTIFIER_LEN;
// addon length byte plus the command byte
const ADDON_START: usize = ADDON_LEN_OFFSET + 2;

pub const ADDRESS_TYPE_IPV4: u8 = 1;
pub const ADDRESS_TYPE_DOMAIN: u8 = 2;
pub const ADDRESS_TYPE_IPV6: u8 = 3;

pub const STATUS_OK: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Ipv4,
    Domain,
    Ipv6,
}

impl AddressType {
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Ipv4 => ADDRESS_TYPE_IPV4,
            Self::Domain => ADDRESS_TYPE_DOMAIN,
            Self::Ipv6 => ADDRESS_TYPE_IPV6,
        }
    }
}

impl TryFrom<u8> for AddressType {
    type Error = HeaderError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            ADDRESS_TYPE_IPV4 => Ok(Self::Ipv4),
            ADDRESS_TYPE_DOMAIN => Ok(Self::Domain),
            ADDRESS_TYPE_IPV6 => Ok(Self::Ipv6),
            other => Err(HeaderError::UnknownAddressType(other)),
        }
    }
}

/// Where the tunnel should connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub host: String,
    pub port: u16,
    pub atyp: AddressType,
}

impl TargetDescriptor {
    /// Host/port pair accepted by `TcpStream::connect`.
    #[must_use]
    pub fn dial_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.atyp {
            AddressType::Ipv6 => write!(f, "[{}]:{}", self.host, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    pub version: u8,
    pub command: u8,
    pub target: TargetDescriptor,
    /// Offset in the frame where tunneled payload begins.
    pub payload_offset: usize,
}

impl ParsedHeader {
    /// Bytes to send back once the target is connected.
    #[must_use]
    pub const fn ack(&self) -> [u8; 2] {
        [self.version, STATUS_OK]
    }

    /// The payload that arrived in the same frame as the header.
    #[must_use]
    pub fn payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        frame.get(self.payload_offset..).unwrap_or_default()
    }
}

fn require(frame: &[u8], needed: usize) -> Result<(), HeaderError> {
    if frame.len() < needed {
        return Err(HeaderError::FrameTooShort {
            needed,
            actual: frame.len(),
        });
    }
    Ok(())
}

/// End of a `len`-byte field starting at `start`, checked against the frame.
fn field_end(frame: &[u8], start: usize, len: usize) -> Result<usize, HeaderError> {
    let end = start
        .checked_add(len)
        .ok_or(HeaderError::FrameTooShort {
            needed: usize::MAX,
            actual: frame.len(),
        })?;
    require(frame, end)?;
    Ok(end)
}

/// Decodes the address that follows an address-type tag.
///
/// `cursor` points at the first address byte. Returns the host string, the
/// decoded address type and the cursor positioned just past the address.
pub fn decode_address(
    frame: &[u8],
    cursor: usize,
    tag: u8,
) -> Result<(String, AddressType, usize), HeaderError> {
    let atyp = AddressType::try_from(tag)?;
    match atyp {
        AddressType::Ipv4 => {
            let end = field_end(frame, cursor, 4)?;
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&frame[cursor..end]);
            Ok((Ipv4Addr::from(octets).to_string(), atyp, end))
        }
        AddressType::Domain => {
            let start = field_end(frame, cursor, 1)?;
            let len = usize::from(frame[cursor]);
            let end = field_end(frame, start, len)?;
            let host = std::str::from_utf8(&frame[start..end])
                .map_err(|_| HeaderError::InvalidDomain)?;
            Ok((host.to_string(), atyp, end))
        }
        AddressType::Ipv6 => {
            let end = field_end(frame, cursor, 16)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&frame[cursor..end]);
            Ok((Ipv6Addr::from(octets).to_string(), atyp, end))
        }
    }
}

/// Parses and authenticates the handshake header at the start of `frame`.
///
/// Performs no I/O.
pub fn parse_header(frame: &[u8], identifier: &Identifier) -> Result<ParsedHeader, HeaderError> {
    require(frame, MIN_HEADER_LEN)?;

    let version = frame[0];
    if !identifier.matches(&frame[1..=IDENTIFIER_LEN]) {
        return Err(HeaderError::AuthenticationFailed);
    }

    let addon_len = usize::from(frame[ADDON_LEN_OFFSET]);
    let mut cursor = ADDON_START + addon_len;
    // port + address type
    require(frame, cursor + 3)?;
    // The command byte is always present once the check above passes.
    let command = frame[ADDON_LEN_OFFSET + 1];

    let port = u16::from_be_bytes([frame[cursor], frame[cursor + 1]]);
    cursor += 2;
    let tag = frame[cursor];
    cursor += 1;

    let (host, atyp, cursor) = decode_address(frame, cursor, tag)?;

    Ok(ParsedHeader {
        version,
        command,
        target: TargetDescriptor { host, port, atyp },
        payload_offset: cursor,
    })
}
