// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Composite TPM 2.0 structures appearing in the parameter areas the proxy
//! dissects.

use crate::marshal::Marshal;
use crate::marshal::Reader;
use crate::marshal::Tpm2bBuffer;
use crate::marshal::WireError;
use crate::types::AlgId;
use crate::types::CommandCode;
use crate::types::TpmCap;
use crate::types::TpmHandle;
use crate::types::TpmPt;

/// TPMS_TAGGED_PROPERTY: one property/value pair in a capability report.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TpmsTaggedProperty {
    /// TPM_PT property tag.
    pub property: TpmPt,
    /// Property value.
    pub value: u32,
}

impl Marshal for TpmsTaggedProperty {
    fn marshal(&self, out: &mut Vec<u8>) {
        self.property.marshal(out);
        self.value.marshal(out);
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            property: TpmPt::unmarshal(r)?,
            value: u32::unmarshal(r)?,
        })
    }
}

/// TPML_TAGGED_TPM_PROPERTY: `u32`-counted list of tagged properties.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TpmlTaggedTpmProperty {
    /// Reported properties in wire order.
    pub properties: Vec<TpmsTaggedProperty>,
}

impl Marshal for TpmlTaggedTpmProperty {
    fn marshal(&self, out: &mut Vec<u8>) {
        (self.properties.len() as u32).marshal(out);
        for p in &self.properties {
            p.marshal(out);
        }
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let count = r.read_u32()?;
        let mut properties = Vec::new();
        for _ in 0..count {
            properties.push(TpmsTaggedProperty::unmarshal(r)?);
        }
        Ok(Self { properties })
    }
}

/// TPMS_ALG_PROPERTY: one algorithm and its attribute word.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TpmsAlgProperty {
    /// TPM_ALG_ID.
    pub alg: AlgId,
    /// TPMA_ALGORITHM attribute bits, left undecoded.
    pub alg_properties: u32,
}

impl Marshal for TpmsAlgProperty {
    fn marshal(&self, out: &mut Vec<u8>) {
        self.alg.marshal(out);
        self.alg_properties.marshal(out);
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            alg: AlgId::unmarshal(r)?,
            alg_properties: u32::unmarshal(r)?,
        })
    }
}

/// TPML_ALG_PROPERTY.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TpmlAlgProperty {
    /// Reported algorithms in wire order.
    pub algs: Vec<TpmsAlgProperty>,
}

impl Marshal for TpmlAlgProperty {
    fn marshal(&self, out: &mut Vec<u8>) {
        (self.algs.len() as u32).marshal(out);
        for a in &self.algs {
            a.marshal(out);
        }
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let count = r.read_u32()?;
        let mut algs = Vec::new();
        for _ in 0..count {
            algs.push(TpmsAlgProperty::unmarshal(r)?);
        }
        Ok(Self { algs })
    }
}

/// TPML_HANDLE.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TpmlHandle {
    /// Reported handles in wire order.
    pub handle: Vec<TpmHandle>,
}

impl Marshal for TpmlHandle {
    fn marshal(&self, out: &mut Vec<u8>) {
        (self.handle.len() as u32).marshal(out);
        for h in &self.handle {
            h.marshal(out);
        }
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let count = r.read_u32()?;
        let mut handle = Vec::new();
        for _ in 0..count {
            handle.push(TpmHandle::unmarshal(r)?);
        }
        Ok(Self { handle })
    }
}

/// TPML_CC: list of command codes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TpmlCc {
    /// Reported command codes in wire order.
    pub command_codes: Vec<CommandCode>,
}

impl Marshal for TpmlCc {
    fn marshal(&self, out: &mut Vec<u8>) {
        (self.command_codes.len() as u32).marshal(out);
        for cc in &self.command_codes {
            cc.marshal(out);
        }
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let count = r.read_u32()?;
        let mut command_codes = Vec::new();
        for _ in 0..count {
            command_codes.push(CommandCode::unmarshal(r)?);
        }
        Ok(Self { command_codes })
    }
}

/// TPMS_PCR_SELECTION: hash algorithm plus a `u8`-sized PCR bitmap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TpmsPcrSelection {
    /// Hash algorithm the selection applies to.
    pub hash: AlgId,
    /// PCR select bitmap bytes.
    pub pcr_select: Vec<u8>,
}

impl Marshal for TpmsPcrSelection {
    fn marshal(&self, out: &mut Vec<u8>) {
        self.hash.marshal(out);
        (self.pcr_select.len() as u8).marshal(out);
        out.extend_from_slice(&self.pcr_select);
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let hash = AlgId::unmarshal(r)?;
        let size = r.read_u8()? as usize;
        Ok(Self {
            hash,
            pcr_select: r.read_bytes(size)?.to_vec(),
        })
    }
}

/// TPML_PCR_SELECTION.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TpmlPcrSelection {
    /// Selections in wire order.
    pub pcr_selections: Vec<TpmsPcrSelection>,
}

impl Marshal for TpmlPcrSelection {
    fn marshal(&self, out: &mut Vec<u8>) {
        (self.pcr_selections.len() as u32).marshal(out);
        for s in &self.pcr_selections {
            s.marshal(out);
        }
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let count = r.read_u32()?;
        let mut pcr_selections = Vec::new();
        for _ in 0..count {
            pcr_selections.push(TpmsPcrSelection::unmarshal(r)?);
        }
        Ok(Self { pcr_selections })
    }
}

/// TPMT_TK_CREATION: creation ticket returned by object-creation commands.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TpmtTkCreation {
    /// TPM_ST_CREATION structure tag.
    pub tag: u16,
    /// Hierarchy the ticket belongs to.
    pub hierarchy: TpmHandle,
    /// HMAC digest over the creation data.
    pub digest: Tpm2bBuffer,
}

impl Marshal for TpmtTkCreation {
    fn marshal(&self, out: &mut Vec<u8>) {
        self.tag.marshal(out);
        self.hierarchy.marshal(out);
        self.digest.marshal(out);
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            tag: u16::unmarshal(r)?,
            hierarchy: TpmHandle::unmarshal(r)?,
            digest: Tpm2bBuffer::unmarshal(r)?,
        })
    }
}

/// TPMS_CAPABILITY_DATA: a TPM_CAP discriminator followed by the matching
/// union arm. Selectors outside the modeled set fail to decode; the relay
/// still forwards such frames untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TpmsCapabilityData {
    /// TPM_CAP_ALGS
    Algorithms(TpmlAlgProperty),
    /// TPM_CAP_HANDLES
    Handles(TpmlHandle),
    /// TPM_CAP_COMMANDS
    Commands(TpmlCc),
    /// TPM_CAP_PCRS
    Pcrs(TpmlPcrSelection),
    /// TPM_CAP_TPM_PROPERTIES
    TpmProperties(TpmlTaggedTpmProperty),
}

impl TpmsCapabilityData {
    /// The TPM_CAP selector for this union arm.
    pub fn capability(&self) -> TpmCap {
        match self {
            Self::Algorithms(_) => TpmCap::ALGS,
            Self::Handles(_) => TpmCap::HANDLES,
            Self::Commands(_) => TpmCap::COMMANDS,
            Self::Pcrs(_) => TpmCap::PCRS,
            Self::TpmProperties(_) => TpmCap::TPM_PROPERTIES,
        }
    }
}

impl Default for TpmsCapabilityData {
    fn default() -> Self {
        Self::TpmProperties(TpmlTaggedTpmProperty::default())
    }
}

impl Marshal for TpmsCapabilityData {
    fn marshal(&self, out: &mut Vec<u8>) {
        self.capability().marshal(out);
        match self {
            Self::Algorithms(v) => v.marshal(out),
            Self::Handles(v) => v.marshal(out),
            Self::Commands(v) => v.marshal(out),
            Self::Pcrs(v) => v.marshal(out),
            Self::TpmProperties(v) => v.marshal(out),
        }
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let capability = TpmCap::unmarshal(r)?;
        match capability {
            TpmCap::ALGS => Ok(Self::Algorithms(TpmlAlgProperty::unmarshal(r)?)),
            TpmCap::HANDLES => Ok(Self::Handles(TpmlHandle::unmarshal(r)?)),
            TpmCap::COMMANDS => Ok(Self::Commands(TpmlCc::unmarshal(r)?)),
            TpmCap::PCRS => Ok(Self::Pcrs(TpmlPcrSelection::unmarshal(r)?)),
            TpmCap::TPM_PROPERTIES => {
                Ok(Self::TpmProperties(TpmlTaggedTpmProperty::unmarshal(r)?))
            }
            other => Err(WireError::UnsupportedCapability(other.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_union_roundtrip() {
        let data = TpmsCapabilityData::TpmProperties(TpmlTaggedTpmProperty {
            properties: vec![TpmsTaggedProperty {
                property: TpmPt::MANUFACTURER,
                value: 0x4942_4d00,
            }],
        });
        let mut out = Vec::new();
        data.marshal(&mut out);
        assert_eq!(
            out,
            [0, 0, 0, 6, 0, 0, 0, 1, 0, 0, 0x01, 0x05, 0x49, 0x42, 0x4d, 0x00]
        );

        let mut r = Reader::new(&out);
        assert_eq!(TpmsCapabilityData::unmarshal(&mut r).unwrap(), data);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn capability_union_unknown_selector() {
        // TPM_CAP_ECC_CURVES is not modeled.
        let mut r = Reader::new(&[0, 0, 0, 8, 0, 0, 0, 0]);
        assert_eq!(
            TpmsCapabilityData::unmarshal(&mut r),
            Err(WireError::UnsupportedCapability(8))
        );
    }

    #[test]
    fn pcr_selection_roundtrip() {
        let sel = TpmlPcrSelection {
            pcr_selections: vec![TpmsPcrSelection {
                hash: AlgId::SHA256,
                pcr_select: vec![0x01, 0x00, 0x04],
            }],
        };
        let mut out = Vec::new();
        sel.marshal(&mut out);
        let mut r = Reader::new(&out);
        assert_eq!(TpmlPcrSelection::unmarshal(&mut r).unwrap(), sel);
    }
}
