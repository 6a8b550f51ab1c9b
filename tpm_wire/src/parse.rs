// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Rough parsing of a captured TPM command/response turn.
//!
//! "Rough" because fidelity beats completeness: the parser records where each
//! frame's parameter area begins before attempting to decode it, so a caller
//! can always rebuild a frame from the untouched prefix plus a re-marshal of
//! whatever fields it mutated, even when the parameter decode only partially
//! succeeded.

use crate::commands::CommandPlan;
use crate::commands::ResponsePlan;
use crate::marshal::Reader;
use crate::marshal::WireError;
use crate::types::CmdHeader;
use crate::types::RspHeader;
use thiserror::Error;

/// Hard parsing failures. Anything in the header or handle area invalidates
/// the whole turn; the caller should forward the original frame unchanged.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Request header could not be decoded.
    #[error("request header: {0}")]
    RequestHeader(#[source] WireError),
    /// Request handle area could not be decoded.
    #[error("request handle area: {0}")]
    RequestHandles(#[source] WireError),
    /// Request authorization area could not be decoded.
    #[error("request authorization area: {0}")]
    RequestAuthArea(#[source] WireError),
    /// Response header could not be decoded.
    #[error("response header: {0}")]
    ResponseHeader(#[source] WireError),
    /// The TPM reported an error; parsing stops after the response header,
    /// which stays available for inspection.
    #[error("TPM response code {0:#010x}")]
    ResponseCode(u32),
    /// Response handle area could not be decoded.
    #[error("response handle area: {0}")]
    ResponseHandles(#[source] WireError),
    /// Response parameter area could not be decoded.
    #[error("response parameter area: {0}")]
    ResponseParameters(#[source] WireError),
}

/// Decomposes one raw request and its raw response into header, handles,
/// authorization area, and parameters, populating `cmd` and `rsp` along the
/// way.
///
/// After a successful [`parse`](Self::parse),
/// `raw_request[..cmd_parameter_offset]` is byte-identical to what a faithful
/// re-marshal of the header, handle area, and authorization area would
/// produce, and likewise for the response prefix. Nothing is normalized or
/// canonicalized.
pub struct RoughParser<'a, C, R> {
    /// Raw command frame as captured from the TPM consumer.
    pub raw_request: &'a [u8],
    /// Raw response frame as captured from the TPM provider.
    pub raw_response: &'a [u8],
    /// Command value populated by `parse`.
    pub cmd: C,
    /// Response value populated by `parse`.
    pub rsp: R,
    /// Decoded command header.
    pub cmd_hdr: Option<CmdHeader>,
    /// Decoded response header.
    pub rsp_hdr: Option<RspHeader>,
    /// Byte offset in `raw_request` where the parameter area begins.
    pub cmd_parameter_offset: usize,
    /// Byte offset in `raw_response` where the parameter area begins. In the
    /// sessions case this is the offset of the 4-byte parameter-size prefix.
    pub rsp_parameter_offset: usize,
    /// Soft failure from the command parameter area. The offsets and header
    /// stay valid; `cmd` may be partially populated.
    pub cmd_parameter_error: Option<WireError>,
}

impl<'a, C: CommandPlan, R: ResponsePlan> RoughParser<'a, C, R> {
    /// Makes a parser over a captured request/response pair with empty
    /// command and response values.
    pub fn new(raw_request: &'a [u8], raw_response: &'a [u8]) -> Self {
        Self {
            raw_request,
            raw_response,
            cmd: C::default(),
            rsp: R::default(),
            cmd_hdr: None,
            rsp_hdr: None,
            cmd_parameter_offset: 0,
            rsp_parameter_offset: 0,
            cmd_parameter_error: None,
        }
    }

    /// Parses both frames, recording parameter offsets and populating the
    /// command and response values.
    pub fn parse(&mut self) -> Result<(), ParseError> {
        let mut req = Reader::new(self.raw_request);
        let hdr: CmdHeader = req.read_struct().map_err(ParseError::RequestHeader)?;
        let has_sessions = hdr.tag.has_sessions();
        self.cmd_hdr = Some(hdr);

        self.cmd
            .unmarshal_handles(&mut req)
            .map_err(ParseError::RequestHandles)?;

        if has_sessions {
            let auth_size = req.read_u32().map_err(ParseError::RequestAuthArea)? as usize;
            // Session contents are opaque to the proxy; only the span matters.
            req.read_bytes(auth_size)
                .map_err(ParseError::RequestAuthArea)?;
        }

        self.cmd_parameter_offset = req.consumed();
        if req.remaining() > 0 {
            // Not every command's parameter layout is decodable; the offsets
            // and header stay valid regardless.
            if let Err(err) = self.cmd.unmarshal_parameters(&mut req) {
                self.cmd_parameter_error = Some(err);
            }
        }

        let mut rsp = Reader::new(self.raw_response);
        let rsp_hdr: RspHeader = rsp.read_struct().map_err(ParseError::ResponseHeader)?;
        let response_code = rsp_hdr.response_code;
        self.rsp_hdr = Some(rsp_hdr);
        if !response_code.is_success() {
            return Err(ParseError::ResponseCode(response_code.0.get()));
        }

        self.rsp
            .unmarshal_handles(&mut rsp)
            .map_err(ParseError::ResponseHandles)?;
        self.rsp_parameter_offset = rsp.consumed();

        // With sessions the parameter area carries its own size prefix and is
        // followed by session responses, which are never parsed here. Without
        // sessions the parameters run to the end of the frame.
        let slab = if has_sessions {
            let size = rsp.read_u32().map_err(ParseError::ResponseParameters)? as usize;
            rsp.read_bytes(size).map_err(ParseError::ResponseParameters)?
        } else {
            rsp.read_bytes(rsp.remaining())
                .map_err(ParseError::ResponseParameters)?
        };
        self.rsp
            .unmarshal_parameters(&mut Reader::new(slab))
            .map_err(ParseError::ResponseParameters)?;

        Ok(())
    }
}
