// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Passing file descriptors over unix stream sockets.
//!
//! QEMU's `unix io` TPM chardev backend hands the proxy its data-plane
//! socket as an SCM_RIGHTS control message on the control socket; these
//! helpers implement that handshake (and its sending half, used by tests and
//! embedders driving the relay from the QEMU side).

use std::io;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;

// Room for one cmsghdr carrying a single fd, with alignment slack.
const CMSG_BUF_SIZE: usize = 32;

/// Receives one file descriptor passed as SCM_RIGHTS ancillary data,
/// discarding the accompanying byte payload.
pub fn recv_fd(stream: &UnixStream) -> io::Result<OwnedFd> {
    let mut data = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: data.as_mut_ptr().cast(),
        iov_len: data.len(),
    };
    let mut cmsg_buf = [0u8; CMSG_BUF_SIZE];
    // SAFETY: msghdr is plain old data; an all-zero value is valid.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast();
    msg.msg_controllen = cmsg_buf.len() as _;

    // SAFETY: msg points at buffers that outlive the call.
    let n = unsafe { libc::recvmsg(stream.as_raw_fd(), &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed before passing an fd",
        ));
    }

    // SAFETY: msg was populated by recvmsg above.
    let cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
    if cmsg.is_null() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "no ancillary data on control socket",
        ));
    }
    // SAFETY: cmsg is non-null and points into the control buffer.
    let (level, typ, len) = unsafe { ((*cmsg).cmsg_level, (*cmsg).cmsg_type, (*cmsg).cmsg_len) };
    // SAFETY: CMSG_LEN is a pure size computation.
    if level != libc::SOL_SOCKET
        || typ != libc::SCM_RIGHTS
        || (len as usize) < unsafe { libc::CMSG_LEN(size_of::<libc::c_int>() as u32) } as usize
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "control message does not carry an fd",
        ));
    }

    // SAFETY: the checks above guarantee at least one fd in the payload.
    let fd = unsafe { std::ptr::read_unaligned(libc::CMSG_DATA(cmsg).cast::<libc::c_int>()) };
    // SAFETY: the kernel just installed this fd into our table; we are its
    // sole owner.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Sends `fd` as SCM_RIGHTS ancillary data with a single-byte payload.
pub fn send_fd(stream: &UnixStream, fd: BorrowedFd<'_>) -> io::Result<()> {
    let mut data = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: data.as_mut_ptr().cast(),
        iov_len: data.len(),
    };
    let mut cmsg_buf = [0u8; CMSG_BUF_SIZE];
    // SAFETY: msghdr is plain old data; an all-zero value is valid.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast();
    // SAFETY: CMSG_SPACE is a pure size computation.
    msg.msg_controllen = unsafe { libc::CMSG_SPACE(size_of::<libc::c_int>() as u32) } as _;

    // SAFETY: the control buffer is large enough for one fd-bearing
    // cmsghdr, so CMSG_FIRSTHDR returns a valid pointer into it.
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(size_of::<libc::c_int>() as u32) as _;
        std::ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<libc::c_int>(), fd.as_raw_fd());
    }

    // SAFETY: msg points at buffers that outlive the call.
    let n = unsafe { libc::sendmsg(stream.as_raw_fd(), &msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::io::Write;
    use std::os::fd::AsFd;

    #[test]
    fn fd_round_trip() {
        let (tx, rx) = UnixStream::pair().unwrap();
        let (passed, mut kept) = UnixStream::pair().unwrap();

        send_fd(&tx, passed.as_fd()).unwrap();
        let received = recv_fd(&rx).unwrap();

        // The received fd aliases `passed`: bytes written through it arrive
        // on the kept end.
        let mut received = std::fs::File::from(received);
        received.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        kept.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn plain_bytes_are_rejected() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        tx.write_all(&[0u8]).unwrap();
        let err = recv_fd(&rx).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
