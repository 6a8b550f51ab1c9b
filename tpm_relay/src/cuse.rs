// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Minimal character-device-in-userspace session over `/dev/cuse`.
//!
//! Only what a TPM relay device needs is implemented: the CUSE_INIT
//! handshake that names and registers the device, and a single-threaded
//! request loop servicing open/read/write. The device implementation rides
//! along as session user data rather than process-global state, so several
//! sessions can coexist in one process.

use std::fs;
use std::io;
use std::io::Read;
use std::io::Write;
use thiserror::Error;
use tpm_wire::types::MAX_FRAME_SIZE;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

/// Largest read or write the exported device advertises to the kernel.
pub const MAX_TRANSFER: u32 = MAX_FRAME_SIZE as u32;

// One full write plus headers fits comfortably.
const REQUEST_BUFFER_SIZE: usize = MAX_TRANSFER as usize + 4096;

/// Character-device operations a CUSE session services. Errors are returned
/// as positive errno values and reach the calling process unchanged.
pub trait CuseDevice {
    /// Services `open(2)` on the exported device.
    fn open(&mut self, flags: u32) -> Result<(), i32>;

    /// Services `read(2)`: up to `size` bytes.
    fn read(&mut self, size: u32, offset: u64) -> Result<Vec<u8>, i32>;

    /// Services `write(2)`: returns the number of bytes consumed.
    fn write(&mut self, buf: &[u8], offset: u64) -> Result<u32, i32>;
}

/// CUSE session failures.
#[derive(Debug, Error)]
pub enum CuseError {
    /// I/O on `/dev/cuse` failed.
    #[error("cuse transport: {0}")]
    Io(#[from] io::Error),
    /// The kernel negotiated a FUSE major version this session cannot speak.
    #[error("kernel speaks unsupported fuse major version {0}")]
    ProtocolVersion(u32),
    /// A kernel request was shorter than its opcode requires.
    #[error("malformed request for opcode {opcode} ({len} bytes)")]
    MalformedRequest {
        /// FUSE opcode of the offending request.
        opcode: u32,
        /// Total request length received.
        len: usize,
    },
}

/// A registered CUSE device being serviced by this process.
pub struct CuseSession<D> {
    dev: fs::File,
    dev_name: String,
    device: D,
}

impl<D: CuseDevice> CuseSession<D> {
    /// Opens `/dev/cuse` to register a device named `dev_name` backed by
    /// `device`. Requires root.
    pub fn new(dev_name: impl Into<String>, device: D) -> io::Result<Self> {
        let dev = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/cuse")?;
        Ok(Self {
            dev,
            dev_name: dev_name.into(),
            device,
        })
    }

    /// Services device requests in the foreground until the kernel tears the
    /// session down.
    pub fn run(mut self) -> Result<(), CuseError> {
        let mut buf = vec![0u8; REQUEST_BUFFER_SIZE];
        loop {
            let n = match self.dev.read(&mut buf) {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                // The session was unregistered out from under us.
                Err(err) if err.raw_os_error() == Some(libc::ENODEV) => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            let outcome = dispatch(&self.dev_name, &mut self.device, &buf[..n])?;
            if let Some(reply) = outcome.reply {
                // The kernel requires each reply in a single write.
                self.dev.write_all(&reply)?;
            }
            if outcome.exit {
                return Ok(());
            }
        }
    }
}

/// What one request produced: at most one reply frame, and whether the
/// session should end.
pub(crate) struct DispatchOutcome {
    pub(crate) reply: Option<Vec<u8>>,
    pub(crate) exit: bool,
}

impl DispatchOutcome {
    fn reply(frame: Vec<u8>) -> Self {
        Self {
            reply: Some(frame),
            exit: false,
        }
    }
}

/// Handles one kernel request, producing the reply frame to write back.
pub(crate) fn dispatch<D: CuseDevice>(
    dev_name: &str,
    device: &mut D,
    frame: &[u8],
) -> Result<DispatchOutcome, CuseError> {
    let (hdr, body) =
        protocol::InHeader::read_from_prefix(frame).map_err(|_| CuseError::MalformedRequest {
            opcode: 0,
            len: frame.len(),
        })?;
    let malformed = CuseError::MalformedRequest {
        opcode: hdr.opcode,
        len: frame.len(),
    };

    let outcome = match hdr.opcode {
        protocol::CUSE_INIT => {
            let (init, _) =
                protocol::CuseInitIn::read_from_prefix(body).map_err(|_| malformed)?;
            if init.major != protocol::FUSE_KERNEL_VERSION {
                return Err(CuseError::ProtocolVersion(init.major));
            }
            tracing::info!(
                "registering cuse device {dev_name} (kernel fuse {}.{})",
                init.major,
                init.minor
            );
            let out = protocol::CuseInitOut {
                major: protocol::FUSE_KERNEL_VERSION,
                minor: protocol::FUSE_KERNEL_MINOR_VERSION,
                unused: 0,
                flags: 0,
                max_read: MAX_TRANSFER,
                max_write: MAX_TRANSFER,
                // Dynamic major/minor allocation.
                dev_major: 0,
                dev_minor: 0,
                spare: [0; 10],
            };
            let mut payload = out.as_bytes().to_vec();
            payload.extend_from_slice(b"DEVNAME=");
            payload.extend_from_slice(dev_name.as_bytes());
            payload.push(0);
            DispatchOutcome::reply(reply_frame(hdr.unique, &payload))
        }
        protocol::FUSE_OPEN => {
            let flags = protocol::FuseOpenIn::read_from_prefix(body)
                .map(|(open_in, _)| open_in.flags)
                .unwrap_or(0);
            match device.open(flags) {
                Ok(()) => {
                    let out = protocol::FuseOpenOut {
                        fh: 0,
                        open_flags: 0,
                        padding: 0,
                    };
                    DispatchOutcome::reply(reply_frame(hdr.unique, out.as_bytes()))
                }
                Err(errno) => DispatchOutcome::reply(error_frame(hdr.unique, errno)),
            }
        }
        protocol::FUSE_READ => {
            let (read_in, _) =
                protocol::FuseReadIn::read_from_prefix(body).map_err(|_| malformed)?;
            match device.read(read_in.size, read_in.offset) {
                Ok(data) => DispatchOutcome::reply(reply_frame(hdr.unique, &data)),
                Err(errno) => DispatchOutcome::reply(error_frame(hdr.unique, errno)),
            }
        }
        protocol::FUSE_WRITE => {
            let (write_in, data) =
                protocol::FuseWriteIn::read_from_prefix(body).map_err(|_| malformed)?;
            let size = write_in.size as usize;
            if data.len() < size {
                return Err(CuseError::MalformedRequest {
                    opcode: hdr.opcode,
                    len: frame.len(),
                });
            }
            match device.write(&data[..size], write_in.offset) {
                Ok(written) => {
                    let out = protocol::FuseWriteOut {
                        size: written,
                        padding: 0,
                    };
                    DispatchOutcome::reply(reply_frame(hdr.unique, out.as_bytes()))
                }
                Err(errno) => DispatchOutcome::reply(error_frame(hdr.unique, errno)),
            }
        }
        protocol::FUSE_FLUSH | protocol::FUSE_RELEASE => {
            DispatchOutcome::reply(reply_frame(hdr.unique, &[]))
        }
        // Interrupts get no reply; the interrupted operation completes on
        // its own.
        protocol::FUSE_INTERRUPT => DispatchOutcome {
            reply: None,
            exit: false,
        },
        protocol::FUSE_DESTROY => DispatchOutcome {
            reply: Some(reply_frame(hdr.unique, &[])),
            exit: true,
        },
        other => {
            tracing::debug!("unhandled cuse opcode {other}");
            DispatchOutcome::reply(error_frame(hdr.unique, libc::ENOSYS))
        }
    };
    Ok(outcome)
}

fn reply_frame(unique: u64, payload: &[u8]) -> Vec<u8> {
    let hdr = protocol::OutHeader {
        len: (size_of::<protocol::OutHeader>() + payload.len()) as u32,
        error: 0,
        unique,
    };
    let mut frame = hdr.as_bytes().to_vec();
    frame.extend_from_slice(payload);
    frame
}

fn error_frame(unique: u64, errno: i32) -> Vec<u8> {
    let hdr = protocol::OutHeader {
        len: size_of::<protocol::OutHeader>() as u32,
        error: -errno,
        unique,
    };
    hdr.as_bytes().to_vec()
}

/// Subset of the FUSE/CUSE kernel ABI (linux/fuse.h). Native endianness.
pub(crate) mod protocol {
    use zerocopy::FromBytes;
    use zerocopy::Immutable;
    use zerocopy::IntoBytes;
    use zerocopy::KnownLayout;

    pub(crate) const FUSE_KERNEL_VERSION: u32 = 7;
    pub(crate) const FUSE_KERNEL_MINOR_VERSION: u32 = 31;

    pub(crate) const FUSE_OPEN: u32 = 14;
    pub(crate) const FUSE_READ: u32 = 15;
    pub(crate) const FUSE_WRITE: u32 = 16;
    pub(crate) const FUSE_RELEASE: u32 = 18;
    pub(crate) const FUSE_FLUSH: u32 = 25;
    pub(crate) const FUSE_INTERRUPT: u32 = 36;
    pub(crate) const FUSE_DESTROY: u32 = 38;
    pub(crate) const CUSE_INIT: u32 = 4096;

    #[repr(C)]
    #[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
    pub(crate) struct InHeader {
        pub len: u32,
        pub opcode: u32,
        pub unique: u64,
        pub nodeid: u64,
        pub uid: u32,
        pub gid: u32,
        pub pid: u32,
        pub padding: u32,
    }

    #[repr(C)]
    #[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
    pub(crate) struct OutHeader {
        pub len: u32,
        pub error: i32,
        pub unique: u64,
    }

    #[repr(C)]
    #[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
    pub(crate) struct CuseInitIn {
        pub major: u32,
        pub minor: u32,
        pub unused: u32,
        pub flags: u32,
    }

    #[repr(C)]
    #[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
    pub(crate) struct CuseInitOut {
        pub major: u32,
        pub minor: u32,
        pub unused: u32,
        pub flags: u32,
        pub max_read: u32,
        pub max_write: u32,
        pub dev_major: u32,
        pub dev_minor: u32,
        pub spare: [u32; 10],
    }

    #[repr(C)]
    #[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
    pub(crate) struct FuseOpenIn {
        pub flags: u32,
        pub open_flags: u32,
    }

    #[repr(C)]
    #[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
    pub(crate) struct FuseOpenOut {
        pub fh: u64,
        pub open_flags: u32,
        pub padding: u32,
    }

    #[repr(C)]
    #[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
    pub(crate) struct FuseReadIn {
        pub fh: u64,
        pub offset: u64,
        pub size: u32,
        pub read_flags: u32,
        pub lock_owner: u64,
        pub flags: u32,
        pub padding: u32,
    }

    #[repr(C)]
    #[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
    pub(crate) struct FuseWriteIn {
        pub fh: u64,
        pub offset: u64,
        pub size: u32,
        pub write_flags: u32,
        pub lock_owner: u64,
        pub flags: u32,
        pub padding: u32,
    }

    #[repr(C)]
    #[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
    pub(crate) struct FuseWriteOut {
        pub size: u32,
        pub padding: u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDevice;

    impl CuseDevice for NullDevice {
        fn open(&mut self, _flags: u32) -> Result<(), i32> {
            Ok(())
        }

        fn read(&mut self, _size: u32, _offset: u64) -> Result<Vec<u8>, i32> {
            Ok(Vec::new())
        }

        fn write(&mut self, buf: &[u8], _offset: u64) -> Result<u32, i32> {
            Ok(buf.len() as u32)
        }
    }

    fn request(opcode: u32, unique: u64, body: &[u8]) -> Vec<u8> {
        let hdr = protocol::InHeader {
            len: (size_of::<protocol::InHeader>() + body.len()) as u32,
            opcode,
            unique,
            nodeid: 0,
            uid: 0,
            gid: 0,
            pid: 0,
            padding: 0,
        };
        let mut frame = hdr.as_bytes().to_vec();
        frame.extend_from_slice(body);
        frame
    }

    #[test]
    fn init_registers_device_name() {
        let init = protocol::CuseInitIn {
            major: 7,
            minor: 37,
            unused: 0,
            flags: 0,
        };
        let frame = request(protocol::CUSE_INIT, 1, init.as_bytes());
        let outcome = dispatch("ctpm0", &mut NullDevice, &frame).unwrap();
        let reply = outcome.reply.unwrap();
        assert!(!outcome.exit);

        let (hdr, body) = protocol::OutHeader::read_from_prefix(&reply).unwrap();
        assert_eq!(hdr.error, 0);
        assert_eq!(hdr.unique, 1);
        assert_eq!(hdr.len as usize, reply.len());
        let (out, dev_info) = protocol::CuseInitOut::read_from_prefix(body).unwrap();
        assert_eq!(out.major, 7);
        assert_eq!(out.max_write, MAX_TRANSFER);
        assert_eq!(dev_info, b"DEVNAME=ctpm0\0");
    }

    #[test]
    fn init_rejects_wrong_major() {
        let init = protocol::CuseInitIn {
            major: 8,
            minor: 0,
            unused: 0,
            flags: 0,
        };
        let frame = request(protocol::CUSE_INIT, 1, init.as_bytes());
        assert!(matches!(
            dispatch("ctpm0", &mut NullDevice, &frame),
            Err(CuseError::ProtocolVersion(8))
        ));
    }

    #[test]
    fn open_is_accepted() {
        let open_in = protocol::FuseOpenIn {
            flags: libc::O_RDWR as u32,
            open_flags: 0,
        };
        let frame = request(protocol::FUSE_OPEN, 2, open_in.as_bytes());
        let outcome = dispatch("ctpm0", &mut NullDevice, &frame).unwrap();
        let reply = outcome.reply.unwrap();
        let (hdr, _) = protocol::OutHeader::read_from_prefix(&reply).unwrap();
        assert_eq!(hdr.error, 0);
    }

    #[test]
    fn interrupt_gets_no_reply() {
        let frame = request(protocol::FUSE_INTERRUPT, 3, &[0u8; 8]);
        let outcome = dispatch("ctpm0", &mut NullDevice, &frame).unwrap();
        assert!(outcome.reply.is_none());
        assert!(!outcome.exit);
    }

    #[test]
    fn unknown_opcode_is_enosys() {
        let frame = request(9999, 4, &[]);
        let outcome = dispatch("ctpm0", &mut NullDevice, &frame).unwrap();
        let reply = outcome.reply.unwrap();
        let (hdr, _) = protocol::OutHeader::read_from_prefix(&reply).unwrap();
        assert_eq!(hdr.error, -libc::ENOSYS);
    }

    #[test]
    fn destroy_ends_the_session() {
        let frame = request(protocol::FUSE_DESTROY, 5, &[]);
        let outcome = dispatch("ctpm0", &mut NullDevice, &frame).unwrap();
        assert!(outcome.exit);
    }
}
