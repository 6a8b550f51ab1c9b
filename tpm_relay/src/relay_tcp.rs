// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! TCP relayer: accepts TPM consumers on a listening socket and bridges each
//! to a fresh forwarder. Also useful for turning non-network TPM traffic
//! into network traffic so it can be captured.

use crate::exchange::Exchanger;
use crate::forward::ForwarderFactory;
use crate::handler::HandlerFactory;
use crate::handler::NopHandlerFactory;
use crate::handler::TpmHandlerFactory;
use crate::intercept::Interceptor;
use crate::terminate::TerminateSignal;
use std::io;
use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How often accept loops check the termination signal.
pub(crate) const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Picks the handler factory for a data lane: header-aware when an
/// interceptor is attached, identity otherwise.
pub(crate) fn handler_factory_for(
    interceptor: Option<&Arc<dyn Interceptor>>,
) -> Box<dyn HandlerFactory> {
    match interceptor {
        Some(interceptor) => Box::new(TpmHandlerFactory::new(interceptor.clone())),
        None => Box::new(NopHandlerFactory),
    }
}

/// Accepts TPM consumers on a TCP listener, pairing each connection with a
/// fresh forwarder and a spawned exchange thread.
pub struct TcpRelayer {
    addr: String,
    forwarder_factory: Arc<dyn ForwarderFactory>,
    terminate_on_close: bool,
    interceptor: Option<Arc<dyn Interceptor>>,
    terminate: TerminateSignal,
}

impl TcpRelayer {
    /// Makes a relayer listening at `addr`. With `terminate_on_close` set,
    /// the first completed exchange also ends [`relay`](Self::relay).
    pub fn new(
        addr: impl Into<String>,
        forwarder_factory: Arc<dyn ForwarderFactory>,
        terminate_on_close: bool,
        interceptor: Option<Arc<dyn Interceptor>>,
    ) -> Self {
        Self {
            addr: addr.into(),
            forwarder_factory,
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

    /// Accepts and serves connections until the termination signal fires.
    /// Failing to bind the listener is fatal and surfaces immediately.
    pub fn relay(&self) -> io::Result<()> {
        let listener = TcpListener::bind(&self.addr)?;
        tracing::info!("tcp relay listening on {}", self.addr);
        self.run(listener)
    }

    fn run(&self, listener: TcpListener) -> io::Result<()> {
        listener.set_nonblocking(true)?;
        loop {
            if self.terminate.is_fired() {
                return Ok(());
            }
            match listener.accept() {
                Ok((conn, peer)) => {
                    tracing::info!("tpm consumer connected from {peer}");
                    if let Err(err) = self.handle_conn(conn) {
                        tracing::error!("connection setup failed: {err}");
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

    fn handle_conn(&self, conn: TcpStream) -> io::Result<()> {
        // The accepted socket must not inherit the listener's non-blocking
        // mode on any platform.
        conn.set_nonblocking(false)?;
        let forwarder = self.forwarder_factory.new_forwarder()?;
        let handler_factory = handler_factory_for(self.interceptor.as_ref());
        let terminate = self.terminate.clone();
        let terminate_on_close = self.terminate_on_close;
        thread::spawn(move || {
            let mut ex = Exchanger {
                src: conn,
                dst: forwarder,
                handler_factory,
            };
            if let Err(err) = ex.exchange() {
                tracing::error!("exchange failed: {err}");
            }
            if terminate_on_close {
                terminate.fire();
            }
        });
        Ok(())
    }
}
