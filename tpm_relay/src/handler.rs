// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-turn request/response mutation hooks.

use crate::intercept::Interceptor;
use crate::intercept::Request;
use std::sync::Arc;
use tpm_wire::marshal::Reader;
use tpm_wire::types::CmdHeader;
use tpm_wire::types::HEADER_SIZE;

/// Handles one request/response turn. The request hook runs before the frame
/// is forwarded to the TPM, the response hook before the reply returns to
/// the consumer; each returns the authoritative frame for its direction.
pub trait RequestResponseHandler {
    /// Inspects or rewrites one request.
    fn handle_request(&mut self, request: &[u8]) -> Vec<u8>;

    /// Inspects or rewrites one response.
    fn handle_response(&mut self, response: &[u8]) -> Vec<u8>;
}

/// Creates a fresh handler for every turn.
pub trait HandlerFactory: Send + Sync {
    /// Makes the handler for the next turn.
    fn new_handler(&self) -> Box<dyn RequestResponseHandler>;
}

impl<T: HandlerFactory + ?Sized> HandlerFactory for Box<T> {
    fn new_handler(&self) -> Box<dyn RequestResponseHandler> {
        (**self).new_handler()
    }
}

/// Handler passing both directions through unchanged.
pub struct NopHandler;

impl RequestResponseHandler for NopHandler {
    fn handle_request(&mut self, request: &[u8]) -> Vec<u8> {
        request.to_vec()
    }

    fn handle_response(&mut self, response: &[u8]) -> Vec<u8> {
        response.to_vec()
    }
}

/// Factory for [`NopHandler`].
pub struct NopHandlerFactory;

impl HandlerFactory for NopHandlerFactory {
    fn new_handler(&self) -> Box<dyn RequestResponseHandler> {
        Box::new(NopHandler)
    }
}

/// Header-aware handler delegating each turn to an [`Interceptor`].
///
/// Requests shorter than the TPM header are forwarded opaquely without
/// consulting the interceptor's request hook; the response hook still runs,
/// seeing a [`Request`] with no header.
pub struct TpmHandler {
    interceptor: Arc<dyn Interceptor>,
    request: Request,
}

impl RequestResponseHandler for TpmHandler {
    fn handle_request(&mut self, request: &[u8]) -> Vec<u8> {
        self.request.raw = request.to_vec();
        if request.len() < HEADER_SIZE {
            return request.to_vec();
        }

        let hdr: CmdHeader = match Reader::new(request).read_struct() {
            Ok(hdr) => hdr,
            Err(_) => return request.to_vec(),
        };
        self.request.hdr = Some(hdr);

        self.interceptor.handle_request(&self.request)
    }

    fn handle_response(&mut self, response: &[u8]) -> Vec<u8> {
        self.interceptor.handle_response(&self.request, response)
    }
}

/// Factory for [`TpmHandler`], sharing one interceptor across all turns.
pub struct TpmHandlerFactory {
    interceptor: Arc<dyn Interceptor>,
}

impl TpmHandlerFactory {
    /// Makes a factory handing every turn to `interceptor`.
    pub fn new(interceptor: Arc<dyn Interceptor>) -> Self {
        Self { interceptor }
    }
}

impl HandlerFactory for TpmHandlerFactory {
    fn new_handler(&self) -> Box<dyn RequestResponseHandler> {
        Box::new(TpmHandler {
            interceptor: self.interceptor.clone(),
            request: Request::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tpm_wire::types::CommandCode;

    #[derive(Default)]
    struct Probe {
        request_headers: Mutex<Vec<Option<CmdHeader>>>,
    }

    impl Interceptor for Probe {
        fn handle_response(&self, request: &Request, response: &[u8]) -> Vec<u8> {
            self.request_headers.lock().unwrap().push(request.hdr);
            response.to_vec()
        }
    }

    #[test]
    fn short_request_is_forwarded_opaque() {
        let probe = Arc::new(Probe::default());
        let factory = TpmHandlerFactory::new(probe.clone());
        let mut handler = factory.new_handler();

        let short = [0x80u8, 0x01, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00];
        assert_eq!(handler.handle_request(&short), short);
        handler.handle_response(&[0u8; 10]);

        assert_eq!(probe.request_headers.lock().unwrap().as_slice(), &[None]);
    }

    #[test]
    fn full_request_exposes_header() {
        let probe = Arc::new(Probe::default());
        let factory = TpmHandlerFactory::new(probe.clone());
        let mut handler = factory.new_handler();

        let request = hex::decode("8001000000160000017a00000006000001000000007f").unwrap();
        assert_eq!(handler.handle_request(&request), request);
        handler.handle_response(&[0u8; 10]);

        let headers = probe.request_headers.lock().unwrap();
        let hdr = headers[0].unwrap();
        assert_eq!(hdr.command_code, CommandCode::GET_CAPABILITY);
        assert_eq!(hdr.size.get(), 0x16);
    }
}
