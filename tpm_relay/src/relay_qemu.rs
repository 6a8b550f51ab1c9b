// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! QEMU control-socket relayer.
//!
//! QEMU's `unix io` TPM chardev backend connects to a unix domain socket and
//! passes its data-plane socket in the first message's ancillary data. This
//! relayer accepts that connection, bridges the received fd to the software
//! TPM's data endpoint through the TPM handler, and bridges the control
//! socket itself to the software TPM's control endpoint verbatim (the
//! control protocol is not TPM 2.0).

use crate::exchange::Exchanger;
use crate::fd::recv_fd;
use crate::forward::ForwarderFactory;
use crate::handler::NopHandlerFactory;
use crate::intercept::Interceptor;
use crate::relay_tcp::ACCEPT_POLL_INTERVAL;
use crate::relay_tcp::handler_factory_for;
use crate::terminate::TerminateSignal;
use std::fs;
use std::io;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

/// Relayer for the QEMU software-TPM socket pair.
pub struct QemuCtrlRelayer {
    ctrl_sock_path: PathBuf,
    forwarder_factory: Arc<dyn ForwarderFactory>,
    ctrl_forwarder_factory: Arc<dyn ForwarderFactory>,
    terminate_on_close: bool,
    interceptor: Option<Arc<dyn Interceptor>>,
    terminate: TerminateSignal,
}

impl QemuCtrlRelayer {
    /// Makes a relayer listening at `ctrl_sock_path`. `forwarder_factory`
    /// reaches the software TPM's data endpoint, `ctrl_forwarder_factory`
    /// its control endpoint. With `terminate_on_close` set, either lane
    /// closing ends [`relay`](Self::relay).
    pub fn new(
        ctrl_sock_path: impl Into<PathBuf>,
        forwarder_factory: Arc<dyn ForwarderFactory>,
        ctrl_forwarder_factory: Arc<dyn ForwarderFactory>,
        terminate_on_close: bool,
        interceptor: Option<Arc<dyn Interceptor>>,
    ) -> Self {
        Self {
            ctrl_sock_path: ctrl_sock_path.into(),
            forwarder_factory,
            ctrl_forwarder_factory,
            terminate_on_close,
            interceptor,
            terminate: TerminateSignal::new(),
        }
    }

    /// The relayer's termination signal; firing it stops
    /// [`relay`](Self::relay).
    pub fn terminate_signal(&self) -> TerminateSignal {
        self.terminate.clone()
    }

    /// Binds the control socket and serves QEMU connections until the
    /// termination signal fires.
    pub fn relay(&self) -> io::Result<()> {
        // Replace any stale socket file left by a previous run.
        match fs::remove_file(&self.ctrl_sock_path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        let listener = UnixListener::bind(&self.ctrl_sock_path)?;
        // QEMU may run as a different user.
        fs::set_permissions(&self.ctrl_sock_path, fs::Permissions::from_mode(0o666))?;
        listener.set_nonblocking(true)?;
        tracing::info!(
            "qemu ctrl relay listening on {}",
            self.ctrl_sock_path.display()
        );

        loop {
            if self.terminate.is_fired() {
                return Ok(());
            }
            match listener.accept() {
                Ok((conn, _)) => {
                    tracing::info!("qemu connected");
                    if let Err(err) = self.handle_conn(conn) {
                        tracing::error!("qemu connection setup failed: {err}");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => {
                    self.terminate.fire();
                    return Err(err);
                }
            }
        }
    }

    fn handle_conn(&self, mut ctrl_conn: UnixStream) -> io::Result<()> {
        ctrl_conn.set_nonblocking(false)?;

        // The first control message carries the data-plane fd; acknowledge
        // it with four zero bytes.
        let data_fd = recv_fd(&ctrl_conn)?;
        ctrl_conn.write_all(&[0, 0, 0, 0])?;

        let data_forwarder = self.forwarder_factory.new_forwarder()?;
        let ctrl_forwarder = self.ctrl_forwarder_factory.new_forwarder()?;

        let data_stream = fs::File::from(data_fd);
        let handler_factory = handler_factory_for(self.interceptor.as_ref());
        let terminate = self.terminate.clone();
        let terminate_on_close = self.terminate_on_close;
        thread::spawn(move || {
            let mut ex = Exchanger {
                src: data_stream,
                dst: data_forwarder,
                handler_factory,
            };
            if let Err(err) = ex.exchange() {
                tracing::error!("data exchange failed: {err}");
            }
            if terminate_on_close {
                terminate.fire();
            }
        });

        let terminate = self.terminate.clone();
        thread::spawn(move || {
            let mut ex = Exchanger {
                src: ctrl_conn,
                dst: ctrl_forwarder,
                handler_factory: NopHandlerFactory,
            };
            if let Err(err) = ex.exchange() {
                tracing::error!("ctrl exchange failed: {err}");
            }
            if terminate_on_close {
                terminate.fire();
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd::send_fd;
    use crate::forward::TcpForwarderFactory;
    use std::io::Read;
    use std::net::TcpListener;
    use std::os::fd::AsFd;
    use std::time::Duration;
    use std::time::Instant;

    /// TCP stand-in for a swtpm endpoint that transforms each frame with
    /// `f` and echoes it back.
    fn spawn_endpoint(f: fn(&mut Vec<u8>)) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            while let Ok((mut conn, _)) = listener.accept() {
                thread::spawn(move || {
                    let mut buf = [0u8; 64];
                    loop {
                        let n = match conn.read(&mut buf) {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        };
                        let mut reply = buf[..n].to_vec();
                        f(&mut reply);
                        if conn.write_all(&reply).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    fn connect_when_bound(path: &std::path::Path) -> UnixStream {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match UnixStream::connect(path) {
                Ok(conn) => return conn,
                Err(_) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(10))
                }
                Err(err) => panic!("relay socket never came up: {err}"),
            }
        }
    }

    #[test]
    fn dual_lane_relay_and_termination() {
        let data_addr = spawn_endpoint(|frame| frame.reverse());
        let ctrl_addr = spawn_endpoint(|frame| frame.iter_mut().for_each(|b| *b ^= 0xff));

        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("qemu_swtpm_fwd.sock");
        let relayer = QemuCtrlRelayer::new(
            &sock_path,
            Arc::new(TcpForwarderFactory::new(data_addr.to_string())),
            Arc::new(TcpForwarderFactory::new(ctrl_addr.to_string())),
            true,
            None,
        );
        let relay = thread::spawn(move || relayer.relay());

        let mut ctrl_conn = connect_when_bound(&sock_path);

        // Hand over the data-plane fd and collect the 4-byte acknowledgment.
        let (mut data_local, data_remote) = UnixStream::pair().unwrap();
        send_fd(&ctrl_conn, data_remote.as_fd()).unwrap();
        drop(data_remote);
        let mut ack = [0xaau8; 4];
        ctrl_conn.read_exact(&mut ack).unwrap();
        assert_eq!(ack, [0, 0, 0, 0]);

        // Data lane reaches the data endpoint.
        data_local.write_all(b"abc").unwrap();
        let mut buf = [0u8; 3];
        data_local.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"cba");

        // Control lane reaches the control endpoint.
        ctrl_conn.write_all(&[0x00, 0x0f]).unwrap();
        let mut buf = [0u8; 2];
        ctrl_conn.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xff, 0xf0]);

        // Closing one lane terminates the whole relay.
        drop(data_local);
        assert!(relay.join().unwrap().is_ok());
    }
}
