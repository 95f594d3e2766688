//! Global identifier and its text form used in the handshake line.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard alphabet, `=`-padded on output, padding optional on input.
const GID_TEXT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Length of an encoded GID: five full 3-byte groups plus one padded group.
pub const GID_TEXT_LEN: usize = 24;

/// An 128-bit identifier used to identify a port on a network adapter, a port
/// on a router, or a multicast group.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Gid([u8; 16]);

impl Gid {
    /// Get the raw bytes of this GID.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Encode this GID as 24 characters of `=`-padded base64.
    pub fn to_base64(&self) -> String {
        GID_TEXT.encode(self.0)
    }

    /// Decode a GID from base64 text. Padding is optional; any character
    /// outside the base64 alphabet is rejected.
    pub fn from_base64(text: &str) -> Result<Self, GidParseError> {
        let raw = GID_TEXT.decode(text)?;
        let raw = <[u8; 16]>::try_from(raw.as_slice()).map_err(|_| GidParseError::Length(raw.len()))?;
        Ok(Self(raw))
    }
}

/// GID text decoding error type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GidParseError {
    /// The text is not valid base64.
    #[error("invalid base64 in GID text")]
    Base64(#[from] base64::DecodeError),

    /// The text decoded to a byte string that is not 16 bytes long.
    #[error("GID must be 16 bytes, decoded {0}")]
    Length(usize),
}

impl FromStr for Gid {
    type Err = GidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl fmt::Debug for Gid {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gid = Ipv6Addr::from(*self);
        f.debug_tuple("Gid").field(&gid.to_string()).finish()
    }
}

impl fmt::Display for Gid {
    /// Colon-separated hex bytes, the way verbose verbs tools print GIDs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl From<[u8; 16]> for Gid {
    #[inline]
    fn from(raw: [u8; 16]) -> Self {
        Self(raw)
    }
}

impl From<Gid> for [u8; 16] {
    #[inline]
    fn from(gid: Gid) -> Self {
        gid.0
    }
}

impl From<Ipv6Addr> for Gid {
    #[inline]
    fn from(addr: Ipv6Addr) -> Self {
        Self(addr.octets())
    }
}

impl From<Gid> for Ipv6Addr {
    #[inline]
    fn from(gid: Gid) -> Self {
        Ipv6Addr::from(gid.0)
    }
}

impl Serialize for Gid {
    #[inline]
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        <[u8; 16] as Serialize>::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Gid {
    #[inline]
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <[u8; 16] as Deserialize<'de>>::deserialize(deserializer).map(Self::from)
    }
}
