// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! TPM 2.0 command/response envelope constants and header layouts.
//!
//! Values follow TCG TPM 2.0 Library Part 2 (Structures). Only the subset the
//! proxy dissects is declared here; unknown codes still flow through the relay
//! untouched.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::big_endian::U16 as u16_be;
use zerocopy::big_endian::U32 as u32_be;

/// Size in bytes of the fixed TPM 2.0 command/response header.
pub const HEADER_SIZE: usize = 10;

/// Largest command or response frame exchanged with a TPM in one call for
/// typical profiles.
pub const MAX_FRAME_SIZE: usize = 4096;

/// TPMI_ST_COMMAND_TAG: discriminates session-bearing from session-less
/// frames.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct SessionTag(pub u16_be);

impl SessionTag {
    /// TPM_ST_NO_SESSIONS
    pub const NO_SESSIONS: Self = Self(u16_be::new(0x8001));
    /// TPM_ST_SESSIONS
    pub const SESSIONS: Self = Self(u16_be::new(0x8002));

    /// Whether a frame with this tag carries an authorization area. Any tag
    /// other than TPM_ST_SESSIONS means no sessions.
    pub fn has_sessions(&self) -> bool {
        *self == Self::SESSIONS
    }
}

/// TPM_CC command codes understood by the proxy's dissectors.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct CommandCode(pub u32_be);

#[expect(missing_docs)] // Self-describing TPM_CC names.
impl CommandCode {
    pub const CREATE_PRIMARY: Self = Self::new(0x0000_0131);
    pub const STARTUP: Self = Self::new(0x0000_0144);
    pub const NV_READ: Self = Self::new(0x0000_014e);
    pub const CREATE: Self = Self::new(0x0000_0153);
    pub const UNSEAL: Self = Self::new(0x0000_015e);
    pub const NV_READ_PUBLIC: Self = Self::new(0x0000_0169);
    pub const READ_PUBLIC: Self = Self::new(0x0000_0173);
    pub const GET_CAPABILITY: Self = Self::new(0x0000_017a);
    pub const PCR_READ: Self = Self::new(0x0000_017e);

    /// Makes a command code from a host-order TPM_CC value.
    pub const fn new(cc: u32) -> Self {
        Self(u32_be::new(cc))
    }
}

/// TPM_RC response code.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct ResponseCode(pub u32_be);

impl ResponseCode {
    /// TPM_RC_SUCCESS
    pub const SUCCESS: Self = Self(u32_be::new(0));

    /// Whether the response reports success.
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

/// TPM_HANDLE: a 4-byte object, session, or hierarchy reference.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TpmHandle(pub u32);

impl TpmHandle {
    /// TPM_RS_PW, the password authorization session handle.
    pub const RS_PW: Self = Self(0x4000_0009);
    /// TPM_RH_OWNER
    pub const RH_OWNER: Self = Self(0x4000_0001);
    /// TPM_RH_ENDORSEMENT
    pub const RH_ENDORSEMENT: Self = Self(0x4000_000b);
}

/// TPM_ALG_ID algorithm identifier.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AlgId(pub u16);

#[expect(missing_docs)] // Self-describing TPM_ALG names.
impl AlgId {
    pub const RSA: Self = Self(0x0001);
    pub const SHA1: Self = Self(0x0004);
    pub const SHA256: Self = Self(0x000b);
    pub const NULL: Self = Self(0x0010);
    pub const ECC: Self = Self(0x0023);
}

/// TPM_CAP capability selector.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TpmCap(pub u32);

#[expect(missing_docs)] // Self-describing TPM_CAP names.
impl TpmCap {
    pub const ALGS: Self = Self(0);
    pub const HANDLES: Self = Self(1);
    pub const COMMANDS: Self = Self(2);
    pub const PCRS: Self = Self(5);
    pub const TPM_PROPERTIES: Self = Self(6);
}

/// TPM_PT property tag.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TpmPt(pub u32);

impl TpmPt {
    /// Base of the fixed property group (PT_FIXED).
    pub const FIXED_BASE: Self = Self(0x100);
    /// TPM_PT_FAMILY_INDICATOR
    pub const FAMILY_INDICATOR: Self = Self(0x100);
    /// TPM_PT_MANUFACTURER
    pub const MANUFACTURER: Self = Self(0x105);
}

/// Fixed 10-byte header at the front of every TPM command frame.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct CmdHeader {
    /// TPM_ST session tag.
    pub tag: SessionTag,
    /// Total frame size in bytes, header included.
    pub size: u32_be,
    /// TPM_CC command code.
    pub command_code: CommandCode,
}

/// Fixed 10-byte header at the front of every TPM response frame.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct RspHeader {
    /// TPM_ST session tag, mirroring the request's.
    pub tag: SessionTag,
    /// Total frame size in bytes, header included.
    pub size: u32_be,
    /// TPM_RC response code.
    pub response_code: ResponseCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        assert_eq!(size_of::<CmdHeader>(), HEADER_SIZE);
        assert_eq!(size_of::<RspHeader>(), HEADER_SIZE);
    }

    #[test]
    fn session_tags() {
        assert!(SessionTag::SESSIONS.has_sessions());
        assert!(!SessionTag::NO_SESSIONS.has_sessions());
        assert!(!SessionTag(zerocopy::big_endian::U16::new(0x8021)).has_sessions());
    }
}
