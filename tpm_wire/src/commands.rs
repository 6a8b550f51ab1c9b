// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command and response records with their wire plans.
//!
//! Where a companion TPM library would reflect over struct tags (`handle`,
//! `optional`, marshalled-by-reflection membership), each record here states
//! its plan explicitly: which fields come from the handle area and how the
//! parameter area decodes, both in declaration order.

use crate::marshal::Marshal;
use crate::marshal::Reader;
use crate::marshal::Tpm2bBuffer;
use crate::marshal::WireError;
use crate::structures::TpmlPcrSelection;
use crate::structures::TpmsCapabilityData;
use crate::structures::TpmtTkCreation;
use crate::types::CommandCode;
use crate::types::TpmCap;
use crate::types::TpmHandle;

/// Wire plan for a TPM command body.
pub trait CommandPlan: Default {
    /// TPM_CC this plan decodes.
    const COMMAND_CODE: CommandCode;

    /// Consumes the handle area: one 4-byte handle per handle field, in
    /// declaration order.
    fn unmarshal_handles(&mut self, r: &mut Reader<'_>) -> Result<(), WireError>;

    /// Consumes the parameter area fields in declaration order.
    fn unmarshal_parameters(&mut self, r: &mut Reader<'_>) -> Result<(), WireError>;

    /// Re-emits the parameter area, the inverse of `unmarshal_parameters`.
    fn marshal_parameters(&self, out: &mut Vec<u8>);
}

/// Wire plan for a TPM response body.
pub trait ResponsePlan: Default {
    /// Consumes the response handle area.
    fn unmarshal_handles(&mut self, r: &mut Reader<'_>) -> Result<(), WireError>;

    /// Decodes the response parameter slab.
    fn unmarshal_parameters(&mut self, r: &mut Reader<'_>) -> Result<(), WireError>;

    /// Re-emits the parameter area, the inverse of `unmarshal_parameters`.
    fn marshal_parameters(&self, out: &mut Vec<u8>);
}

/// TPM2_GetCapability command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetCapability {
    /// TPM_CAP group selector.
    pub capability: TpmCap,
    /// First property of interest within the group.
    pub property: u32,
    /// Maximum number of values to return.
    pub property_count: u32,
}

impl CommandPlan for GetCapability {
    const COMMAND_CODE: CommandCode = CommandCode::GET_CAPABILITY;

    fn unmarshal_handles(&mut self, _r: &mut Reader<'_>) -> Result<(), WireError> {
        Ok(())
    }

    fn unmarshal_parameters(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.capability = TpmCap::unmarshal(r)?;
        self.property = u32::unmarshal(r)?;
        self.property_count = u32::unmarshal(r)?;
        Ok(())
    }

    fn marshal_parameters(&self, out: &mut Vec<u8>) {
        self.capability.marshal(out);
        self.property.marshal(out);
        self.property_count.marshal(out);
    }
}

/// TPM2_GetCapability response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetCapabilityResponse {
    /// TPMI_YES_NO: whether further properties remain past this report.
    pub more_data: u8,
    /// The reported capability group.
    pub capability_data: TpmsCapabilityData,
}

impl ResponsePlan for GetCapabilityResponse {
    fn unmarshal_handles(&mut self, _r: &mut Reader<'_>) -> Result<(), WireError> {
        Ok(())
    }

    fn unmarshal_parameters(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.more_data = u8::unmarshal(r)?;
        self.capability_data = TpmsCapabilityData::unmarshal(r)?;
        Ok(())
    }

    fn marshal_parameters(&self, out: &mut Vec<u8>) {
        self.more_data.marshal(out);
        self.capability_data.marshal(out);
    }
}

/// TPM2_Unseal command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Unseal {
    /// Handle of the sealed data object.
    pub item_handle: TpmHandle,
}

impl CommandPlan for Unseal {
    const COMMAND_CODE: CommandCode = CommandCode::UNSEAL;

    fn unmarshal_handles(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.item_handle = TpmHandle::unmarshal(r)?;
        Ok(())
    }

    fn unmarshal_parameters(&mut self, _r: &mut Reader<'_>) -> Result<(), WireError> {
        Ok(())
    }

    fn marshal_parameters(&self, _out: &mut Vec<u8>) {}
}

/// TPM2_Unseal response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnsealResponse {
    /// The unsealed sensitive data.
    pub out_data: Tpm2bBuffer,
}

impl ResponsePlan for UnsealResponse {
    fn unmarshal_handles(&mut self, _r: &mut Reader<'_>) -> Result<(), WireError> {
        Ok(())
    }

    fn unmarshal_parameters(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.out_data = Tpm2bBuffer::unmarshal(r)?;
        Ok(())
    }

    fn marshal_parameters(&self, out: &mut Vec<u8>) {
        self.out_data.marshal(out);
    }
}

/// TPM2_CreatePrimary command. The creation template blobs are kept as sized
/// buffers; the proxy has no reason to look inside them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreatePrimary {
    /// Hierarchy to create the object under.
    pub primary_handle: TpmHandle,
    /// TPM2B_SENSITIVE_CREATE.
    pub in_sensitive: Tpm2bBuffer,
    /// TPM2B_PUBLIC template.
    pub in_public: Tpm2bBuffer,
    /// TPM2B_DATA outside info.
    pub outside_info: Tpm2bBuffer,
    /// PCRs to bind into the creation data.
    pub creation_pcr: TpmlPcrSelection,
}

impl CommandPlan for CreatePrimary {
    const COMMAND_CODE: CommandCode = CommandCode::CREATE_PRIMARY;

    fn unmarshal_handles(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.primary_handle = TpmHandle::unmarshal(r)?;
        Ok(())
    }

    fn unmarshal_parameters(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.in_sensitive = Tpm2bBuffer::unmarshal(r)?;
        self.in_public = Tpm2bBuffer::unmarshal(r)?;
        self.outside_info = Tpm2bBuffer::unmarshal(r)?;
        self.creation_pcr = TpmlPcrSelection::unmarshal(r)?;
        Ok(())
    }

    fn marshal_parameters(&self, out: &mut Vec<u8>) {
        self.in_sensitive.marshal(out);
        self.in_public.marshal(out);
        self.outside_info.marshal(out);
        self.creation_pcr.marshal(out);
    }
}

/// TPM2_CreatePrimary response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreatePrimaryResponse {
    /// Handle of the created object.
    pub object_handle: TpmHandle,
    /// TPM2B_PUBLIC of the created object.
    pub out_public: Tpm2bBuffer,
    /// TPM2B_CREATION_DATA.
    pub creation_data: Tpm2bBuffer,
    /// Digest of the creation data.
    pub creation_hash: Tpm2bBuffer,
    /// Creation ticket.
    pub creation_ticket: TpmtTkCreation,
    /// Name of the created object.
    pub name: Tpm2bBuffer,
}

impl ResponsePlan for CreatePrimaryResponse {
    fn unmarshal_handles(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.object_handle = TpmHandle::unmarshal(r)?;
        Ok(())
    }

    fn unmarshal_parameters(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.out_public = Tpm2bBuffer::unmarshal(r)?;
        self.creation_data = Tpm2bBuffer::unmarshal(r)?;
        self.creation_hash = Tpm2bBuffer::unmarshal(r)?;
        self.creation_ticket = TpmtTkCreation::unmarshal(r)?;
        self.name = Tpm2bBuffer::unmarshal(r)?;
        Ok(())
    }

    fn marshal_parameters(&self, out: &mut Vec<u8>) {
        self.out_public.marshal(out);
        self.creation_data.marshal(out);
        self.creation_hash.marshal(out);
        self.creation_ticket.marshal(out);
        self.name.marshal(out);
    }
}

/// TPM2_Create command. Only the handle area is decodable: the parameter
/// layout nests algorithm-dependent unions this crate does not model, so the
/// parameter plan reports an unsupported layout and the parser degrades to a
/// partial parse.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Create {
    /// Parent object for the new object.
    pub parent_handle: TpmHandle,
}

impl CommandPlan for Create {
    const COMMAND_CODE: CommandCode = CommandCode::CREATE;

    fn unmarshal_handles(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.parent_handle = TpmHandle::unmarshal(r)?;
        Ok(())
    }

    fn unmarshal_parameters(&mut self, _r: &mut Reader<'_>) -> Result<(), WireError> {
        Err(WireError::UnsupportedParameters)
    }

    fn marshal_parameters(&self, _out: &mut Vec<u8>) {}
}

/// TPM2_Create response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateResponse {
    /// TPM2B_PRIVATE of the created object.
    pub out_private: Tpm2bBuffer,
    /// TPM2B_PUBLIC of the created object.
    pub out_public: Tpm2bBuffer,
    /// TPM2B_CREATION_DATA.
    pub creation_data: Tpm2bBuffer,
    /// Digest of the creation data.
    pub creation_hash: Tpm2bBuffer,
    /// Creation ticket.
    pub creation_ticket: TpmtTkCreation,
}

impl ResponsePlan for CreateResponse {
    fn unmarshal_handles(&mut self, _r: &mut Reader<'_>) -> Result<(), WireError> {
        Ok(())
    }

    fn unmarshal_parameters(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.out_private = Tpm2bBuffer::unmarshal(r)?;
        self.out_public = Tpm2bBuffer::unmarshal(r)?;
        self.creation_data = Tpm2bBuffer::unmarshal(r)?;
        self.creation_hash = Tpm2bBuffer::unmarshal(r)?;
        self.creation_ticket = TpmtTkCreation::unmarshal(r)?;
        Ok(())
    }

    fn marshal_parameters(&self, out: &mut Vec<u8>) {
        self.out_private.marshal(out);
        self.out_public.marshal(out);
        self.creation_data.marshal(out);
        self.creation_hash.marshal(out);
        self.creation_ticket.marshal(out);
    }
}

/// TPM2_NV_ReadPublic command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NvReadPublic {
    /// NV index to report on.
    pub nv_index: TpmHandle,
}

impl CommandPlan for NvReadPublic {
    const COMMAND_CODE: CommandCode = CommandCode::NV_READ_PUBLIC;

    fn unmarshal_handles(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.nv_index = TpmHandle::unmarshal(r)?;
        Ok(())
    }

    fn unmarshal_parameters(&mut self, _r: &mut Reader<'_>) -> Result<(), WireError> {
        Ok(())
    }

    fn marshal_parameters(&self, _out: &mut Vec<u8>) {}
}

/// TPM2_NV_ReadPublic response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NvReadPublicResponse {
    /// TPM2B_NV_PUBLIC of the index.
    pub nv_public: Tpm2bBuffer,
    /// Name of the index.
    pub nv_name: Tpm2bBuffer,
}

impl ResponsePlan for NvReadPublicResponse {
    fn unmarshal_handles(&mut self, _r: &mut Reader<'_>) -> Result<(), WireError> {
        Ok(())
    }

    fn unmarshal_parameters(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.nv_public = Tpm2bBuffer::unmarshal(r)?;
        self.nv_name = Tpm2bBuffer::unmarshal(r)?;
        Ok(())
    }

    fn marshal_parameters(&self, out: &mut Vec<u8>) {
        self.nv_public.marshal(out);
        self.nv_name.marshal(out);
    }
}

/// TPM2_NV_Read command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NvRead {
    /// Authorization handle for the read.
    pub auth_handle: TpmHandle,
    /// NV index to read.
    pub nv_index: TpmHandle,
    /// Number of bytes to read.
    pub size: u16,
    /// Starting offset within the index data.
    pub offset: u16,
}

impl CommandPlan for NvRead {
    const COMMAND_CODE: CommandCode = CommandCode::NV_READ;

    fn unmarshal_handles(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.auth_handle = TpmHandle::unmarshal(r)?;
        self.nv_index = TpmHandle::unmarshal(r)?;
        Ok(())
    }

    fn unmarshal_parameters(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.size = u16::unmarshal(r)?;
        self.offset = u16::unmarshal(r)?;
        Ok(())
    }

    fn marshal_parameters(&self, out: &mut Vec<u8>) {
        self.size.marshal(out);
        self.offset.marshal(out);
    }
}

/// TPM2_NV_Read response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NvReadResponse {
    /// Data read from the index.
    pub data: Tpm2bBuffer,
}

impl ResponsePlan for NvReadResponse {
    fn unmarshal_handles(&mut self, _r: &mut Reader<'_>) -> Result<(), WireError> {
        Ok(())
    }

    fn unmarshal_parameters(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.data = Tpm2bBuffer::unmarshal(r)?;
        Ok(())
    }

    fn marshal_parameters(&self, out: &mut Vec<u8>) {
        self.data.marshal(out);
    }
}
