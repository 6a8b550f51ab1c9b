// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The domain-level view of a turn handed to user code.

use tpm_wire::types::CmdHeader;

/// A TPM command as seen by an interceptor: the decoded header, when the
/// frame was long enough to carry one, and the raw command bytes.
///
/// Valid for a single request/response turn; the relay does not keep
/// requests alive across turns.
#[derive(Clone, Debug, Default)]
pub struct Request {
    /// Decoded command header. Absent when the frame was shorter than the
    /// header and was forwarded opaquely.
    pub hdr: Option<CmdHeader>,
    /// The raw command frame.
    pub raw: Vec<u8>,
}

/// Per-turn observation and rewrite hooks.
///
/// A single instance may be attached to several concurrent exchanges, so
/// implementations receive `&self` and must be reentrancy-safe. The default
/// methods are the documented no-op: the input frame is forwarded unchanged.
/// A returned buffer of any length becomes the authoritative frame for its
/// direction.
pub trait Interceptor: Send + Sync {
    /// Returns the command frame to forward to the TPM.
    fn handle_request(&self, request: &Request) -> Vec<u8> {
        request.raw.clone()
    }

    /// Returns the response frame to hand back to the consumer.
    fn handle_response(&self, request: &Request, response: &[u8]) -> Vec<u8> {
        let _ = request;
        response.to_vec()
    }
}
