//! Binary message formats.
//!
//! Request layout (SET and GET):
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 1    | opcode                                  |
//! | 1      | 1    | key length (1..=255)                    |
//! | 2      | 4    | payload length, big-endian              |
//! | 6      | 1    | sentinel: last byte of key ++ payload   |
//! | 7      | ..   | key, then payload                       |
//!
//! STOP is the opcode byte alone.
//!
//! GET response layout: payload length (4 bytes, big-endian), the payload's
//! last byte (0 if there is no payload), then the payload. A SET response is
//! a single status byte.

use thiserror::Error;

pub const OFF_OPCODE: usize = 0;
pub const OFF_KEY_LEN: usize = 1;
pub const OFF_PAYLOAD_LEN: usize = 2;
pub const OFF_SENTINEL: usize = 6;
pub const OFF_BODY: usize = 7;

/// Length of a SET/GET request header.
pub const HEADER_LEN: usize = OFF_BODY;

/// Length of an encoded STOP request.
pub const STOP_LEN: usize = 1;

pub const OFF_RESP_LEN: usize = 0;
pub const OFF_RESP_SENTINEL: usize = 4;
pub const OFF_RESP_PAYLOAD: usize = 5;

/// Length of a GET response header.
pub const RESPONSE_HEADER_LEN: usize = OFF_RESP_PAYLOAD;

/// SET status: the item was stored.
pub const STATUS_STORED: u8 = 0;
/// SET status: the store could not allocate the item.
pub const STATUS_NOT_STORED: u8 = 1;

pub const MAX_KEY_LEN: usize = u8::MAX as usize;

/// Request opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Set = 0x01,
    Get = 0x02,
    Stop = 0x03,
}

impl TryFrom<u8> for Opcode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Opcode::Set),
            0x02 => Ok(Opcode::Get),
            0x03 => Ok(Opcode::Stop),
            op => Err(CodecError::UnknownOpcode(op)),
        }
    }
}

/// Codec error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("key must not be empty")]
    EmptyKey,

    #[error("key of {0} bytes exceeds the 255-byte limit")]
    KeyTooLong(usize),

    #[error("payload of {0} bytes does not fit a 32-bit length")]
    PayloadTooLong(usize),

    #[error("message needs {need} bytes, buffer has {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("sentinel {expected:#04x} does not match last body byte {found:#04x}")]
    SentinelMismatch { expected: u8, found: u8 },
}

fn check_key(key: &[u8]) -> Result<(), CodecError> {
    match key.len() {
        0 => Err(CodecError::EmptyKey),
        n if n > MAX_KEY_LEN => Err(CodecError::KeyTooLong(n)),
        _ => Ok(()),
    }
}

fn check_payload(payload: &[u8]) -> Result<u32, CodecError> {
    u32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLong(payload.len()))
}

fn need(have: usize, need: usize) -> Result<(), CodecError> {
    if have < need {
        Err(CodecError::BufferTooSmall { need, have })
    } else {
        Ok(())
    }
}

/// The fixed-size head of a SET or GET request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub opcode: Opcode,
    pub key_len: u8,
    pub payload_len: u32,
    pub sentinel: u8,
}

impl RequestHeader {
    /// Parse the first [`HEADER_LEN`] bytes of a request.
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        need(bytes.len(), HEADER_LEN)?;
        let opcode = Opcode::try_from(bytes[OFF_OPCODE])?;
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[OFF_PAYLOAD_LEN..OFF_SENTINEL]);
        Ok(Self {
            opcode,
            key_len: bytes[OFF_KEY_LEN],
            payload_len: u32::from_be_bytes(len),
            sentinel: bytes[OFF_SENTINEL],
        })
    }

    /// Length of key ++ payload.
    #[inline]
    pub fn body_len(&self) -> usize {
        self.key_len as usize + self.payload_len as usize
    }

    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.body_len()
    }

    /// Offset of the byte that must equal the sentinel once the whole
    /// message has landed.
    #[inline]
    pub fn last_body_offset(&self) -> Option<usize> {
        (self.body_len() > 0).then(|| self.encoded_len() - 1)
    }
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Set { key: Vec<u8>, payload: Vec<u8> },
    Get { key: Vec<u8> },
    Stop,
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Set { .. } => Opcode::Set,
            Request::Get { .. } => Opcode::Get,
            Request::Stop => Opcode::Stop,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Request::Set { key, payload } => HEADER_LEN + key.len() + payload.len(),
            Request::Get { key } => HEADER_LEN + key.len(),
            Request::Stop => STOP_LEN,
        }
    }

    /// Encode into the front of `out`, returning the encoded length.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, CodecError> {
        let (key, payload): (&[u8], &[u8]) = match self {
            Request::Set { key, payload } => (key, payload),
            Request::Get { key } => (key, &[]),
            Request::Stop => {
                need(out.len(), STOP_LEN)?;
                out[OFF_OPCODE] = Opcode::Stop as u8;
                return Ok(STOP_LEN);
            }
        };
        check_key(key)?;
        let payload_len = check_payload(payload)?;
        let len = self.encoded_len();
        need(out.len(), len)?;

        let sentinel = payload.last().or(key.last()).copied().unwrap_or(0);
        out[OFF_OPCODE] = self.opcode() as u8;
        out[OFF_KEY_LEN] = key.len() as u8;
        out[OFF_PAYLOAD_LEN..OFF_SENTINEL].copy_from_slice(&payload_len.to_be_bytes());
        out[OFF_SENTINEL] = sentinel;
        out[OFF_BODY..OFF_BODY + key.len()].copy_from_slice(key);
        out[OFF_BODY + key.len()..len].copy_from_slice(payload);
        Ok(len)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![0; self.encoded_len()];
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Decode a complete request, verifying the sentinel.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        need(bytes.len(), STOP_LEN)?;
        if Opcode::try_from(bytes[OFF_OPCODE])? == Opcode::Stop {
            return Ok(Request::Stop);
        }

        let header = RequestHeader::parse(bytes)?;
        need(bytes.len(), header.encoded_len())?;
        let key_end = OFF_BODY + header.key_len as usize;
        let key = bytes[OFF_BODY..key_end].to_vec();
        check_key(&key)?;
        if let Some(last) = header.last_body_offset() {
            if bytes[last] != header.sentinel {
                return Err(CodecError::SentinelMismatch {
                    expected: header.sentinel,
                    found: bytes[last],
                });
            }
        }

        Ok(match header.opcode {
            Opcode::Set => Request::Set {
                key,
                payload: bytes[key_end..header.encoded_len()].to_vec(),
            },
            _ => Request::Get { key },
        })
    }
}

/// The fixed-size head of a GET response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub payload_len: u32,
    pub sentinel: u8,
}

impl ResponseHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        need(bytes.len(), RESPONSE_HEADER_LEN)?;
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[OFF_RESP_LEN..OFF_RESP_SENTINEL]);
        Ok(Self {
            payload_len: u32::from_be_bytes(len),
            sentinel: bytes[OFF_RESP_SENTINEL],
        })
    }

    #[inline]
    pub fn encoded_len(&self) -> usize {
        RESPONSE_HEADER_LEN + self.payload_len as usize
    }

    #[inline]
    pub fn last_payload_offset(&self) -> Option<usize> {
        (self.payload_len > 0).then(|| self.encoded_len() - 1)
    }
}

/// A GET result. An absent item and an empty one encode identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponse {
    pub payload: Option<Vec<u8>>,
}

impl GetResponse {
    pub fn encoded_len(&self) -> usize {
        RESPONSE_HEADER_LEN + self.payload.as_ref().map_or(0, Vec::len)
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, CodecError> {
        encode_get_response(self.payload.as_deref(), out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let header = ResponseHeader::parse(bytes)?;
        need(bytes.len(), header.encoded_len())?;
        let Some(last) = header.last_payload_offset() else {
            return Ok(Self { payload: None });
        };
        if bytes[last] != header.sentinel {
            return Err(CodecError::SentinelMismatch {
                expected: header.sentinel,
                found: bytes[last],
            });
        }
        Ok(Self {
            payload: Some(bytes[OFF_RESP_PAYLOAD..header.encoded_len()].to_vec()),
        })
    }
}

/// Encode a GET response for `payload` without taking ownership of it.
pub fn encode_get_response(payload: Option<&[u8]>, out: &mut [u8]) -> Result<usize, CodecError> {
    let payload = payload.unwrap_or_default();
    let payload_len = check_payload(payload)?;
    let len = RESPONSE_HEADER_LEN + payload.len();
    need(out.len(), len)?;
    out[OFF_RESP_LEN..OFF_RESP_SENTINEL].copy_from_slice(&payload_len.to_be_bytes());
    out[OFF_RESP_SENTINEL] = payload.last().copied().unwrap_or(0);
    out[OFF_RESP_PAYLOAD..len].copy_from_slice(payload);
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn set_layout() {
        let req = Request::Set {
            key: b"k01".to_vec(),
            payload: b"xyzA".to_vec(),
        };
        let bytes = req.to_bytes().unwrap();
        assert_eq!(
            bytes,
            [&[0x01u8, 3, 0, 0, 0, 4, b'A'][..], &b"k01"[..], &b"xyzA"[..]].concat()
        );
        assert_eq!(Request::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn get_sentinel_is_last_key_byte() {
        let bytes = Request::Get { key: b"key9".to_vec() }.to_bytes().unwrap();
        assert_eq!(&bytes[..HEADER_LEN], &[0x02, 4, 0, 0, 0, 0, b'9']);
    }

    #[test]
    fn empty_set_payload_falls_back_to_key() {
        let bytes = Request::Set {
            key: b"ab".to_vec(),
            payload: Vec::new(),
        }
        .to_bytes()
        .unwrap();
        assert_eq!(bytes[OFF_SENTINEL], b'b');
        let header = RequestHeader::parse(&bytes).unwrap();
        assert_eq!(header.last_body_offset(), Some(8));
    }

    #[test]
    fn stop_is_one_byte() {
        assert_eq!(Request::Stop.to_bytes().unwrap(), vec![0x03]);
        assert_eq!(Request::decode(&[0x03, 0xff, 0xff]).unwrap(), Request::Stop);
    }

    #[test]
    fn rejects_bad_keys_and_opcodes() {
        let mut out = [0u8; 600];
        assert_eq!(
            Request::Get { key: Vec::new() }.encode(&mut out),
            Err(CodecError::EmptyKey)
        );
        assert_eq!(
            Request::Get { key: vec![0; 256] }.encode(&mut out),
            Err(CodecError::KeyTooLong(256))
        );
        assert_eq!(Request::decode(&[0x09; 8]), Err(CodecError::UnknownOpcode(0x09)));
        assert_eq!(
            Request::Get { key: vec![1; 10] }.encode(&mut out[..12]),
            Err(CodecError::BufferTooSmall { need: 17, have: 12 })
        );
    }

    #[test]
    fn decode_detects_torn_tail() {
        let mut bytes = Request::Set {
            key: b"k".to_vec(),
            payload: vec![7; 32],
        }
        .to_bytes()
        .unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 0;
        assert_eq!(
            Request::decode(&bytes),
            Err(CodecError::SentinelMismatch {
                expected: 7,
                found: 0
            })
        );
    }

    #[test]
    fn get_response_layout() {
        let resp = GetResponse {
            payload: Some(b"hello".to_vec()),
        };
        let mut out = [0u8; 16];
        let len = resp.encode(&mut out).unwrap();
        assert_eq!(&out[..len], &[0, 0, 0, 5, b'o', b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(GetResponse::decode(&out[..len]).unwrap(), resp);

        let len = GetResponse { payload: None }.encode(&mut out).unwrap();
        assert_eq!(&out[..len], &[0, 0, 0, 0, 0]);
        assert_eq!(GetResponse::decode(&out[..len]).unwrap().payload, None);
    }

    fn request() -> impl Strategy<Value = Request> {
        let key = prop::collection::vec(any::<u8>(), 1..=255);
        let payload = prop::collection::vec(any::<u8>(), 0..2048);
        prop_oneof![
            (key.clone(), payload).prop_map(|(key, payload)| Request::Set { key, payload }),
            key.prop_map(|key| Request::Get { key }),
            Just(Request::Stop),
        ]
    }

    proptest! {
        #[test]
        fn sentinel_duplicates_last_body_byte(req in request()) {
            let bytes = req.to_bytes().unwrap();
            prop_assert_eq!(bytes.len(), req.encoded_len());
            prop_assert_eq!(Request::decode(&bytes).unwrap(), req.clone());
            match req {
                Request::Set { key, payload } => {
                    let expected = *payload.last().unwrap_or(&key[key.len() - 1]);
                    prop_assert_eq!(bytes[OFF_SENTINEL], expected);
                    prop_assert_eq!(bytes[bytes.len() - 1], expected);
                }
                Request::Get { key } => {
                    prop_assert_eq!(bytes[OFF_SENTINEL], key[key.len() - 1]);
                }
                Request::Stop => {
                    prop_assert_eq!(bytes.len(), STOP_LEN);
                }
            }
        }
    }
}
