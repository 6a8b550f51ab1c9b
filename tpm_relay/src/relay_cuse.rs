// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! CUSE relayer: re-exports the upstream TPM as a local character device.

use crate::cuse::CuseDevice;
use crate::cuse::CuseError;
use crate::cuse::CuseSession;
use crate::forward::Forwarder;

/// Services an exported character device's file operations from an owned
/// upstream forwarder.
///
/// The forwarder travels with the session as user data; consumers of the
/// exported device see one TPM response frame per read, exactly as the
/// upstream produces them.
pub struct CuseRelayer {
    forwarder: Box<dyn Forwarder>,
}

impl CuseRelayer {
    /// Makes a relayer that forwards device I/O to `forwarder`.
    pub fn new(forwarder: Box<dyn Forwarder>) -> Self {
        Self { forwarder }
    }

    /// Exports the device as `/dev/<dev_name>` and services it in the
    /// foreground until the kernel tears the session down. Requires root.
    pub fn relay(self, dev_name: &str) -> Result<(), CuseError> {
        CuseSession::new(dev_name, self)?.run()
    }
}

impl CuseDevice for CuseRelayer {
    fn open(&mut self, _flags: u32) -> Result<(), i32> {
        // Accept unconditionally; the upstream connection is already up.
        Ok(())
    }

    fn read(&mut self, size: u32, _offset: u64) -> Result<Vec<u8>, i32> {
        if size == 0 {
            return Err(libc::EINVAL);
        }
        let mut buf = vec![0u8; size as usize];
        let n = self.forwarder.read(&mut buf).map_err(|err| {
            tracing::error!("upstream read failed: {err}");
            libc::EIO
        })?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write(&mut self, buf: &[u8], _offset: u64) -> Result<u32, i32> {
        if buf.is_empty() {
            return Err(libc::EINVAL);
        }
        self.forwarder.write_all(buf).map_err(|err| {
            tracing::error!("upstream write failed: {err}");
            libc::EIO
        })?;
        Ok(buf.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::io::Read;
    use std::io::Write;

    /// In-memory upstream answering the last written frame, reversed.
    #[derive(Default)]
    struct LoopbackTpm {
        last: Vec<u8>,
    }

    impl Read for LoopbackTpm {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut frame = std::mem::take(&mut self.last);
            frame.reverse();
            buf[..frame.len()].copy_from_slice(&frame);
            Ok(frame.len())
        }
    }

    impl Write for LoopbackTpm {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.last = buf.to_vec();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Upstream whose reads and writes always fail.
    struct DeadTpm;

    impl Read for DeadTpm {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("gone"))
        }
    }

    impl Write for DeadTpm {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut relayer = CuseRelayer::new(Box::new(LoopbackTpm::default()));
        assert_eq!(relayer.open(0), Ok(()));
        assert_eq!(relayer.write(b"frame", 0), Ok(5));
        assert_eq!(relayer.read(64, 0), Ok(b"emarf".to_vec()));
    }

    #[test]
    fn zero_sized_ops_are_einval() {
        let mut relayer = CuseRelayer::new(Box::new(LoopbackTpm::default()));
        assert_eq!(relayer.read(0, 0), Err(libc::EINVAL));
        assert_eq!(relayer.write(&[], 0), Err(libc::EINVAL));
    }

    #[test]
    fn upstream_failure_is_eio() {
        let mut relayer = CuseRelayer::new(Box::new(DeadTpm));
        assert_eq!(relayer.read(16, 0), Err(libc::EIO));
        assert_eq!(relayer.write(b"frame", 0), Err(libc::EIO));
    }
}
