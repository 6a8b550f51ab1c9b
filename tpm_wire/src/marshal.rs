// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Explicit marshalling machinery replacing the reflective walk a companion
//! TPM library would perform over tagged struct fields.
//!
//! The rules are the TCG canonical ones: big-endian scalars, `u16`
//! length-prefixed TPM2B buffers, `u32`-counted lists, unions resolved by a
//! leading discriminator, and optional fields gated by a zero `u16` sentinel.

use crate::types::AlgId;
use crate::types::CommandCode;
use crate::types::TpmCap;
use crate::types::TpmHandle;
use crate::types::TpmPt;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// Errors produced while walking a wire buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// The buffer ended before the field did.
    #[error("buffer truncated: needed {needed} more bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the current field required.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },
    /// A capability union selector this crate does not model.
    #[error("unsupported capability selector {0:#010x}")]
    UnsupportedCapability(u32),
    /// The command's parameter layout is not decodable by this crate.
    #[error("command parameter layout is not supported")]
    UnsupportedParameters,
}

/// Cursor over a raw frame that tracks how many bytes have been consumed.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Makes a reader over `buf`, positioned at its first byte.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consumes and returns the next `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Consumes one byte.
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Consumes a big-endian u16.
    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Consumes a big-endian u32.
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Returns the next big-endian u16 without consuming it.
    pub fn peek_u16(&self) -> Result<u16, WireError> {
        if self.remaining() < 2 {
            return Err(WireError::Truncated {
                needed: 2,
                remaining: self.remaining(),
            });
        }
        Ok(u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]))
    }

    /// Consumes a zerocopy wire struct off the front of the buffer.
    pub fn read_struct<T: FromBytes + KnownLayout + Immutable + Unaligned>(
        &mut self,
    ) -> Result<T, WireError> {
        let (v, _) = T::read_from_prefix(&self.buf[self.pos..]).map_err(|_| {
            WireError::Truncated {
                needed: size_of::<T>(),
                remaining: self.remaining(),
            }
        })?;
        self.pos += size_of::<T>();
        Ok(v)
    }
}

/// One field in a marshalling plan.
pub trait Marshal: Sized {
    /// Appends the wire form to `out`.
    fn marshal(&self, out: &mut Vec<u8>);

    /// Decodes the wire form from the front of `r`.
    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError>;
}

impl Marshal for u8 {
    fn marshal(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        r.read_u8()
    }
}

impl Marshal for u16 {
    fn marshal(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        r.read_u16()
    }
}

impl Marshal for u32 {
    fn marshal(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        r.read_u32()
    }
}

impl Marshal for TpmHandle {
    fn marshal(&self, out: &mut Vec<u8>) {
        self.0.marshal(out);
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self(r.read_u32()?))
    }
}

impl Marshal for AlgId {
    fn marshal(&self, out: &mut Vec<u8>) {
        self.0.marshal(out);
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self(r.read_u16()?))
    }
}

impl Marshal for TpmCap {
    fn marshal(&self, out: &mut Vec<u8>) {
        self.0.marshal(out);
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self(r.read_u32()?))
    }
}

impl Marshal for TpmPt {
    fn marshal(&self, out: &mut Vec<u8>) {
        self.0.marshal(out);
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self(r.read_u32()?))
    }
}

impl Marshal for CommandCode {
    fn marshal(&self, out: &mut Vec<u8>) {
        self.0.get().marshal(out);
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self::new(r.read_u32()?))
    }
}

/// TPM2B-class buffer: a `u16` size prefix followed by that many payload
/// bytes. Used for every sized blob the proxy does not look inside
/// (TPM2B_PUBLIC, TPM2B_PRIVATE, TPM2B_DIGEST, ...).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tpm2bBuffer {
    /// Payload bytes; the size prefix is derived on marshal.
    pub buffer: Vec<u8>,
}

impl Tpm2bBuffer {
    /// Wire size including the length prefix.
    pub fn payload_size(&self) -> usize {
        2 + self.buffer.len()
    }
}

impl Marshal for Tpm2bBuffer {
    fn marshal(&self, out: &mut Vec<u8>) {
        (self.buffer.len() as u16).marshal(out);
        out.extend_from_slice(&self.buffer);
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let size = r.read_u16()? as usize;
        Ok(Self {
            buffer: r.read_bytes(size)?.to_vec(),
        })
    }
}

/// Decodes an optional field: a zero `u16` where the field's length prefix
/// would sit means the field is absent, and only the sentinel is consumed.
pub fn unmarshal_optional<T: Marshal>(r: &mut Reader<'_>) -> Result<Option<T>, WireError> {
    if r.peek_u16()? == 0 {
        r.read_bytes(2)?;
        return Ok(None);
    }
    T::unmarshal(r).map(Some)
}

/// Re-emits an optional field, writing the zero sentinel when absent.
pub fn marshal_optional<T: Marshal>(v: &Option<T>, out: &mut Vec<u8>) {
    match v {
        Some(v) => v.marshal(out),
        None => 0u16.marshal(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_tracks_offsets() {
        let buf = [0x80u8, 0x01, 0x00, 0x00, 0x00, 0x16];
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_u16().unwrap(), 0x8001);
        assert_eq!(r.consumed(), 2);
        assert_eq!(r.read_u32().unwrap(), 0x16);
        assert_eq!(r.remaining(), 0);
        assert_eq!(
            r.read_u8(),
            Err(WireError::Truncated {
                needed: 1,
                remaining: 0
            })
        );
    }

    #[test]
    fn tpm2b_roundtrip() {
        let b = Tpm2bBuffer {
            buffer: b"sealed".to_vec(),
        };
        let mut out = Vec::new();
        b.marshal(&mut out);
        assert_eq!(out[..2], [0x00, 0x06]);
        assert_eq!(out.len(), b.payload_size());

        let mut r = Reader::new(&out);
        assert_eq!(Tpm2bBuffer::unmarshal(&mut r).unwrap(), b);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn tpm2b_truncated_payload() {
        // Prefix says four bytes, only two follow.
        let mut r = Reader::new(&[0x00, 0x04, 0xaa, 0xbb]);
        assert!(matches!(
            Tpm2bBuffer::unmarshal(&mut r),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn optional_sentinel() {
        let mut r = Reader::new(&[0x00, 0x00, 0x00, 0x02, 0xca, 0xfe]);
        assert_eq!(unmarshal_optional::<Tpm2bBuffer>(&mut r).unwrap(), None);
        assert_eq!(r.consumed(), 2);
        let present = unmarshal_optional::<Tpm2bBuffer>(&mut r).unwrap().unwrap();
        assert_eq!(present.buffer, [0xca, 0xfe]);

        let mut out = Vec::new();
        marshal_optional::<Tpm2bBuffer>(&None, &mut out);
        marshal_optional(&Some(present), &mut out);
        assert_eq!(out, [0x00, 0x00, 0x00, 0x02, 0xca, 0xfe]);
    }
}
