// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Interceptor that rewrites the TPM manufacturer a consumer sees.

use tpm_relay::intercept::Interceptor;
use tpm_relay::intercept::Request;
use tpm_wire::commands::GetCapability;
use tpm_wire::commands::GetCapabilityResponse;
use tpm_wire::commands::ResponsePlan;
use tpm_wire::parse::RoughParser;
use tpm_wire::structures::TpmsCapabilityData;
use tpm_wire::types::CommandCode;
use tpm_wire::types::TpmPt;

/// Replacement TPM_PT_MANUFACTURER value ("XYZ\0").
const SPOOFED_MANUFACTURER: u32 = 0x5859_5a00;

/// Rewrites the TPM_PT_MANUFACTURER property in GetCapability property
/// reports, re-emitting the frame from the recorded parameter offset so
/// every other byte stays identical. Frames that fail to parse are forwarded
/// untouched.
pub struct ManufacturerTamper;

impl Interceptor for ManufacturerTamper {
    fn handle_response(&self, request: &Request, response: &[u8]) -> Vec<u8> {
        let Some(hdr) = request.hdr else {
            return response.to_vec();
        };
        if hdr.command_code != CommandCode::GET_CAPABILITY {
            return response.to_vec();
        }

        let mut p =
            RoughParser::<'_, GetCapability, GetCapabilityResponse>::new(&request.raw, response);
        if p.parse().is_err() {
            return response.to_vec();
        }
        let TpmsCapabilityData::TpmProperties(props) = &mut p.rsp.capability_data else {
            return response.to_vec();
        };

        let mut tampered = false;
        for prop in &mut props.properties {
            if prop.property == TpmPt::MANUFACTURER {
                tracing::info!(
                    "manufacturer tampered: {:#010x} to {:#010x}",
                    prop.value,
                    SPOOFED_MANUFACTURER
                );
                prop.value = SPOOFED_MANUFACTURER;
                tampered = true;
            }
        }
        if !tampered {
            return response.to_vec();
        }

        let mut rebuilt = response[..p.rsp_parameter_offset].to_vec();
        p.rsp.marshal_parameters(&mut rebuilt);
        rebuilt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpm_wire::marshal::Reader;
    use tpm_wire::types::CmdHeader;

    #[test]
    fn tamper_touches_only_the_manufacturer_value() {
        let raw_req = hex::decode("8001000000160000017a00000006000001000000007f").unwrap();
        let raw_rsp = hex::decode(concat!(
            "80010000002b00000000",
            "00",               // more data
            "00000006",         // TPM_CAP_TPM_PROPERTIES
            "00000003",         // three properties
            "0000010049424d00", // family
            "0000010549424d00", // manufacturer "IBM\0"
            "0000010600000001", // vendor string
        ))
        .unwrap();

        let hdr: CmdHeader = Reader::new(&raw_req).read_struct().unwrap();
        let request = Request {
            hdr: Some(hdr),
            raw: raw_req,
        };

        let rewritten = ManufacturerTamper.handle_response(&request, &raw_rsp);
        assert_eq!(rewritten.len(), raw_rsp.len());
        let diff: Vec<usize> = (0..raw_rsp.len())
            .filter(|&i| rewritten[i] != raw_rsp[i])
            .collect();
        assert_eq!(diff, vec![31, 32, 33, 34]);
        assert_eq!(&rewritten[31..35], &[0x58, 0x59, 0x5a, 0x00]);
    }

    #[test]
    fn unparseable_response_passes_through() {
        let raw_req = hex::decode("8001000000160000017a00000006000001000000007f").unwrap();
        let hdr: CmdHeader = Reader::new(&raw_req).read_struct().unwrap();
        let request = Request {
            hdr: Some(hdr),
            raw: raw_req,
        };

        // Truncated capability report.
        let raw_rsp = hex::decode("80010000000f000000000000000006").unwrap();
        assert_eq!(
            ManufacturerTamper.handle_response(&request, &raw_rsp),
            raw_rsp
        );
    }
}
