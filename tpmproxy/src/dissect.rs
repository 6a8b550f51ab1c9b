// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Interceptor that rough-parses interesting turns and logs what it finds.

use tpm_relay::intercept::Interceptor;
use tpm_relay::intercept::Request;
use tpm_wire::commands::Create;
use tpm_wire::commands::CreatePrimary;
use tpm_wire::commands::CreatePrimaryResponse;
use tpm_wire::commands::CreateResponse;
use tpm_wire::commands::NvRead;
use tpm_wire::commands::NvReadPublic;
use tpm_wire::commands::NvReadPublicResponse;
use tpm_wire::commands::NvReadResponse;
use tpm_wire::commands::Unseal;
use tpm_wire::commands::UnsealResponse;
use tpm_wire::parse::RoughParser;
use tpm_wire::types::CommandCode;

/// Logs decoded command/response pairs for the commands the wire crate
/// models. Everything else, and every turn that fails to parse, passes
/// through silently; the proxy never withholds a frame.
pub struct Dissector;

impl Interceptor for Dissector {
    fn handle_response(&self, request: &Request, response: &[u8]) -> Vec<u8> {
        let Some(hdr) = request.hdr else {
            return response.to_vec();
        };

        match hdr.command_code {
            cc if cc == CommandCode::UNSEAL => {
                let mut p = RoughParser::<'_, Unseal, UnsealResponse>::new(&request.raw, response);
                if p.parse().is_ok() {
                    tracing::info!(
                        "unseal item={:#010x} out_data={}",
                        p.cmd.item_handle.0,
                        hex::encode(&p.rsp.out_data.buffer)
                    );
                }
            }
            cc if cc == CommandCode::CREATE_PRIMARY => {
                let mut p = RoughParser::<'_, CreatePrimary, CreatePrimaryResponse>::new(
                    &request.raw,
                    response,
                );
                if p.parse().is_ok() {
                    tracing::info!(
                        "create_primary hierarchy={:#010x} object={:#010x} name={}",
                        p.cmd.primary_handle.0,
                        p.rsp.object_handle.0,
                        hex::encode(&p.rsp.name.buffer)
                    );
                }
            }
            cc if cc == CommandCode::CREATE => {
                // Command parameters are not decodable; the response is.
                let mut p = RoughParser::<'_, Create, CreateResponse>::new(&request.raw, response);
                if p.parse().is_ok() {
                    tracing::info!(
                        "create parent={:#010x} out_public={}",
                        p.cmd.parent_handle.0,
                        hex::encode(&p.rsp.out_public.buffer)
                    );
                }
            }
            cc if cc == CommandCode::NV_READ_PUBLIC => {
                let mut p = RoughParser::<'_, NvReadPublic, NvReadPublicResponse>::new(
                    &request.raw,
                    response,
                );
                if p.parse().is_ok() {
                    tracing::info!(
                        "nv_read_public index={:#010x} name={}",
                        p.cmd.nv_index.0,
                        hex::encode(&p.rsp.nv_name.buffer)
                    );
                }
            }
            cc if cc == CommandCode::NV_READ => {
                let mut p = RoughParser::<'_, NvRead, NvReadResponse>::new(&request.raw, response);
                if p.parse().is_ok() {
                    tracing::info!(
                        "nv_read index={:#010x} offset={} data={}",
                        p.cmd.nv_index.0,
                        p.cmd.offset,
                        hex::encode(&p.rsp.data.buffer)
                    );
                }
            }
            _ => {}
        }

        response.to_vec()
    }
}
