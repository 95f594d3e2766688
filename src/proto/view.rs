//! Typed, bounds-checked views of messages inside a [`RegionBuf`].

use super::codec::*;
use super::poll::{await_change, await_landing, PollBudget};
use super::ProtoError;
use crate::rdma::buf::RegionBuf;

fn fits(buf: &RegionBuf, len: usize) -> Result<(), CodecError> {
    if len > buf.len() {
        Err(CodecError::BufferTooSmall {
            need: len,
            have: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// A request at the front of a buffer.
#[derive(Debug, Clone, Copy)]
pub struct RequestView<'a> {
    buf: &'a RegionBuf,
}

impl<'a> RequestView<'a> {
    pub fn new(buf: &'a RegionBuf) -> Self {
        Self { buf }
    }

    /// Current content of the opcode slot.
    pub fn opcode_byte(&self) -> Result<u8, ProtoError> {
        Ok(self.buf.load(OFF_OPCODE)?)
    }

    /// Parse the header. Only meaningful once the opcode slot is armed.
    pub fn header(&self) -> Result<RequestHeader, ProtoError> {
        let mut raw = [0u8; HEADER_LEN];
        self.buf.read(0, &mut raw)?;
        let header = RequestHeader::parse(&raw)?;
        if header.key_len == 0 {
            return Err(CodecError::EmptyKey.into());
        }
        fits(self.buf, header.encoded_len())?;
        Ok(header)
    }

    pub fn key(&self, header: &RequestHeader) -> Result<Vec<u8>, ProtoError> {
        Ok(self.buf.to_vec(OFF_BODY, header.key_len as usize)?)
    }

    pub fn payload(&self, header: &RequestHeader) -> Result<Vec<u8>, ProtoError> {
        let off = OFF_BODY + header.key_len as usize;
        Ok(self.buf.to_vec(off, header.payload_len as usize)?)
    }

    /// Reset the opcode slot so the next arrival can be told apart.
    pub fn rearm(&self, empty: u8) -> Result<(), ProtoError> {
        Ok(self.buf.store(OFF_OPCODE, empty)?)
    }

    /// Wait for the next request to land completely and decode it.
    ///
    /// `arrival` bounds the wait for the opcode slot to leave `empty`;
    /// `landing` bounds the wait for the last body byte to match the
    /// sentinel. The slot is left armed; see [`rearm`](Self::rearm).
    pub fn receive(
        &self,
        empty: u8,
        arrival: PollBudget,
        landing: PollBudget,
        mut relax: impl FnMut(),
    ) -> Result<Request, ProtoError> {
        let opcode = await_change(self.buf, OFF_OPCODE, empty, arrival, &mut relax)?;
        if Opcode::try_from(opcode)? == Opcode::Stop {
            return Ok(Request::Stop);
        }

        let header = self.header()?;
        if let Some(last) = header.last_body_offset() {
            await_landing(self.buf, OFF_SENTINEL, last, landing, &mut relax)?;
        }
        let key = self.key(&header)?;
        Ok(match header.opcode {
            Opcode::Set => Request::Set {
                key,
                payload: self.payload(&header)?,
            },
            _ => Request::Get { key },
        })
    }

    /// Encode `req` at the front of the buffer, returning its length.
    pub fn put(&self, req: &Request) -> Result<usize, ProtoError> {
        fits(self.buf, req.encoded_len())?;
        let bytes = req.to_bytes()?;
        self.buf.write(0, &bytes)?;
        Ok(bytes.len())
    }
}

/// A response at the front of a buffer.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    buf: &'a RegionBuf,
}

impl<'a> ResponseView<'a> {
    pub fn new(buf: &'a RegionBuf) -> Self {
        Self { buf }
    }

    pub fn header(&self) -> Result<ResponseHeader, ProtoError> {
        let mut raw = [0u8; RESPONSE_HEADER_LEN];
        self.buf.read(0, &mut raw)?;
        let header = ResponseHeader::parse(&raw)?;
        fits(self.buf, header.encoded_len())?;
        Ok(header)
    }

    pub fn payload(&self, header: &ResponseHeader) -> Result<Vec<u8>, ProtoError> {
        Ok(self
            .buf
            .to_vec(OFF_RESP_PAYLOAD, header.payload_len as usize)?)
    }

    pub fn rearm(&self, empty: u8) -> Result<(), ProtoError> {
        Ok(self.buf.store(0, empty)?)
    }

    /// Wait for a SET status byte.
    pub fn receive_status(&self, empty: u8, arrival: PollBudget, relax: impl FnMut()) -> Result<u8, ProtoError> {
        Ok(await_change(self.buf, 0, empty, arrival, relax)?)
    }

    /// Wait for a GET response to land completely and decode it.
    pub fn receive_get(
        &self,
        empty: u8,
        arrival: PollBudget,
        landing: PollBudget,
        mut relax: impl FnMut(),
    ) -> Result<Option<Vec<u8>>, ProtoError> {
        await_change(self.buf, 0, empty, arrival, &mut relax)?;
        let header = self.header()?;
        let Some(last) = header.last_payload_offset() else {
            return Ok(None);
        };
        await_landing(self.buf, OFF_RESP_SENTINEL, last, landing, &mut relax)?;
        Ok(Some(self.payload(&header)?))
    }

    pub fn put_status(&self, status: u8) -> Result<usize, ProtoError> {
        self.buf.store(0, status)?;
        Ok(1)
    }

    pub fn put_get(&self, payload: Option<&[u8]>) -> Result<usize, ProtoError> {
        let len = RESPONSE_HEADER_LEN + payload.map_or(0, <[u8]>::len);
        fits(self.buf, len)?;
        let mut bytes = vec![0; len];
        encode_get_response(payload, &mut bytes)?;
        self.buf.write(0, &bytes)?;
        Ok(len)
    }
}
