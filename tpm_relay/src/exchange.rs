// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The half-duplex request/response turn engine.

use crate::handler::HandlerFactory;
use std::io;
use std::io::Read;
use std::io::Write;
use tpm_wire::types::MAX_FRAME_SIZE;

/// Size of the per-direction frame buffers. Large enough to carry an entire
/// TPM 2.0 command or response for typical profiles in one read.
pub const FRAME_BUFFER_SIZE: usize = MAX_FRAME_SIZE;

/// Drives one request/response turn at a time between a source stream (the
/// TPM consumer) and a destination stream (the forwarder to the TPM),
/// handing each turn to a fresh handler.
///
/// Turns are strictly sequential: request *n*'s full round trip completes
/// before request *n+1* is read. The frame buffers are reused across turns;
/// no buffer outlives a turn.
pub struct Exchanger<S, D, F> {
    /// Consumer-facing stream.
    pub src: S,
    /// Stream to the TPM provider.
    pub dst: D,
    /// Factory producing one handler per turn.
    pub handler_factory: F,
}

impl<S, D, F> Exchanger<S, D, F>
where
    S: Read + Write,
    D: Read + Write,
    F: HandlerFactory,
{
    /// Runs turns until either side closes. An end of stream or a benign
    /// peer-close error ends the exchange with `Ok(())`; any other I/O error
    /// surfaces.
    pub fn exchange(&mut self) -> io::Result<()> {
        let mut req_buf = vec![0u8; FRAME_BUFFER_SIZE];
        let mut rsp_buf = vec![0u8; FRAME_BUFFER_SIZE];
        loop {
            let mut handler = self.handler_factory.new_handler();

            let request_len = match self.src.read(&mut req_buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(err) => return filter_closed(err),
            };
            let request = handler.handle_request(&req_buf[..request_len]);
            tracing::trace!(len = request.len(), "request");
            if let Err(err) = self.dst.write_all(&request) {
                return filter_closed(err);
            }

            let response_len = match self.dst.read(&mut rsp_buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(err) => return filter_closed(err),
            };
            let response = handler.handle_response(&rsp_buf[..response_len]);
            tracing::trace!(len = response.len(), "response");
            if let Err(err) = self.src.write_all(&response) {
                return filter_closed(err);
            }
        }
    }
}

/// Treats peer-close errors as a clean exit; everything else is a real
/// transport failure.
fn filter_closed(err: io::Error) -> io::Result<()> {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected => Ok(()),
        _ => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NopHandlerFactory;
    use std::net::TcpListener;
    use std::net::TcpStream;
    use std::sync::mpsc;
    use std::thread;

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    /// Upstream that reverses each frame it receives.
    fn spawn_reversing_tpm(mut conn: TcpStream) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut buf = [0u8; 64];
            loop {
                let n = match conn.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let mut reply = buf[..n].to_vec();
                reply.reverse();
                if conn.write_all(&reply).is_err() {
                    break;
                }
            }
        })
    }

    #[test]
    fn turns_round_trip_and_src_close_is_benign() {
        let (mut client, src) = tcp_pair();
        let (dst, upstream) = tcp_pair();
        let tpm = spawn_reversing_tpm(upstream);

        let exchanger = thread::spawn(move || {
            let mut ex = Exchanger {
                src,
                dst,
                handler_factory: NopHandlerFactory,
            };
            ex.exchange()
        });

        for msg in [&b"one"[..], b"two", b"three"] {
            client.write_all(msg).unwrap();
            let mut buf = vec![0u8; msg.len()];
            client.read_exact(&mut buf).unwrap();
            let mut expected = msg.to_vec();
            expected.reverse();
            assert_eq!(buf, expected);
        }

        drop(client);
        assert!(exchanger.join().unwrap().is_ok());
        tpm.join().unwrap();
    }

    #[test]
    fn src_close_mid_turn_is_benign() {
        let (mut client, src) = tcp_pair();
        let (dst, mut upstream) = tcp_pair();

        let exchanger = thread::spawn(move || {
            let mut ex = Exchanger {
                src,
                dst,
                handler_factory: NopHandlerFactory,
            };
            ex.exchange()
        });

        // Forward a request, then close the consumer before the TPM replies.
        client.write_all(b"request").unwrap();
        let mut buf = [0u8; 7];
        upstream.read_exact(&mut buf).unwrap();
        drop(client);
        upstream.write_all(b"belated").unwrap();

        assert!(exchanger.join().unwrap().is_ok());
    }

    #[test]
    fn turns_never_interleave() {
        let (mut client, src) = tcp_pair();
        let (dst, mut upstream) = tcp_pair();

        let exchanger = thread::spawn(move || {
            let mut ex = Exchanger {
                src,
                dst,
                handler_factory: NopHandlerFactory,
            };
            ex.exchange()
        });

        let (got_first_tx, got_first_rx) = mpsc::channel();
        let tpm = thread::spawn(move || {
            let mut buf = [0u8; 16];
            // First request arrives alone even though a second is queued
            // behind it on src: the exchanger must not read ahead before
            // finishing the turn.
            let n = upstream.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"first");
            got_first_tx.send(()).unwrap();
            thread::sleep(std::time::Duration::from_millis(50));
            upstream.write_all(b"FIRST").unwrap();

            let n = upstream.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"second");
            upstream.write_all(b"SECOND").unwrap();
        });

        client.write_all(b"first").unwrap();
        got_first_rx.recv().unwrap();
        // Queue the second request while the first turn is still in flight.
        client.write_all(b"second").unwrap();

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"FIRST");
        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"SECOND");

        drop(client);
        tpm.join().unwrap();
        assert!(exchanger.join().unwrap().is_ok());
    }
}
