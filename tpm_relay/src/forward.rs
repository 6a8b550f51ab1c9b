// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Byte-stream endpoints to the backing TPM.

use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::path::PathBuf;

/// A duplex byte stream to the upstream TPM, physical device or software TPM.
///
/// One blocking `read` yields one full TPM frame and one `write` transmits
/// one; the endpoints on both ends preserve message boundaries per call, so
/// the forwarder itself performs no buffering or framing. The underlying
/// stream closes when the forwarder is dropped.
pub trait Forwarder: Read + Write + Send {}

impl<T: Read + Write + Send> Forwarder for T {}

/// Creates one forwarder per accepted proxy connection.
pub trait ForwarderFactory: Send + Sync {
    /// Opens a fresh connection to the upstream TPM.
    fn new_forwarder(&self) -> io::Result<Box<dyn Forwarder>>;
}

/// Factory dialing a TCP endpoint, such as a software TPM's data or control
/// port.
pub struct TcpForwarderFactory {
    addr: String,
}

impl TcpForwarderFactory {
    /// Makes a factory that dials `addr` ("host:port").
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl ForwarderFactory for TcpForwarderFactory {
    fn new_forwarder(&self) -> io::Result<Box<dyn Forwarder>> {
        Ok(Box::new(TcpStream::connect(&self.addr)?))
    }
}

/// Factory opening a TPM character device such as `/dev/tpmrm0`.
pub struct DevForwarderFactory {
    path: PathBuf,
}

impl DevForwarderFactory {
    /// Makes a factory for the device at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ForwarderFactory for DevForwarderFactory {
    fn new_forwarder(&self) -> io::Result<Box<dyn Forwarder>> {
        // The resource-manager device hands back exactly one response frame
        // per blocking read. The fd must stay in blocking mode and out of
        // any async reactor.
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        Ok(Box::new(file))
    }
}
