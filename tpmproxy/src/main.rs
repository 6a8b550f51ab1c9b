// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Man-in-the-middle proxy for TPM 2.0 transports.
//!
//! Interposes between a TPM consumer (QEMU, a userspace client, the kernel's
//! device node) and a TPM provider (a character device or a software TPM over
//! TCP), with optional per-turn dissection or tampering.

mod dissect;
mod tamper;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tpm_relay::forward::DevForwarderFactory;
use tpm_relay::forward::TcpForwarderFactory;
use tpm_relay::intercept::Interceptor;
use tpm_relay::relay_cuse::CuseRelayer;
use tpm_relay::relay_qemu::QemuCtrlRelayer;
use tpm_relay::relay_tcp::TcpRelayer;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "tpmproxy", about = "Man-in-the-middle proxy for TPM 2.0 transports.")]
struct Args {
    /// Enable verbose logging (trace level).
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Forward a QEMU swtpm socket pair without touching the traffic.
    QemuForward(QemuArgs),
    /// Forward QEMU swtpm traffic, logging decoded commands and responses.
    QemuDissect(QemuArgs),
    /// Forward QEMU swtpm traffic, rewriting the reported TPM manufacturer.
    QemuTamper(QemuArgs),
    /// Re-export a local TPM character device as a CUSE device, routed
    /// through an internal TCP relay so the traffic can be captured.
    CusePassthrough(CuseArgs),
}

#[derive(clap::Args)]
struct QemuArgs {
    /// Forwarding unix socket file QEMU connects to.
    #[arg(long, default_value = "/tmp/qemu_swtpm_fwd.sock")]
    fwd_sock: PathBuf,

    /// swtpm data endpoint.
    #[arg(long, default_value = "127.0.0.1:2321")]
    swtpm: String,

    /// swtpm control endpoint.
    #[arg(long, default_value = "127.0.0.1:2322")]
    swtpm_ctrl: String,

    /// Stop the relay when either lane closes.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    terminate_on_close: bool,
}

#[derive(clap::Args)]
struct CuseArgs {
    /// CUSE device name to export.
    #[arg(long, default_value = "ctpm0")]
    name: String,

    /// Pass-through TPM device path.
    #[arg(long, default_value = "/dev/tpmrm0")]
    tpm: String,

    /// Internal relay address (for packet capture).
    #[arg(long, default_value = "127.0.0.1:2321")]
    relay_addr: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::TRACE
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    match args.mode {
        Mode::QemuForward(qemu) => run_qemu(qemu, None),
        Mode::QemuDissect(qemu) => run_qemu(qemu, Some(Arc::new(dissect::Dissector))),
        Mode::QemuTamper(qemu) => run_qemu(qemu, Some(Arc::new(tamper::ManufacturerTamper))),
        Mode::CusePassthrough(cuse) => run_cuse(cuse),
    }
}

fn run_qemu(args: QemuArgs, interceptor: Option<Arc<dyn Interceptor>>) -> anyhow::Result<()> {
    let relayer = QemuCtrlRelayer::new(
        &args.fwd_sock,
        Arc::new(TcpForwarderFactory::new(args.swtpm.as_str())),
        Arc::new(TcpForwarderFactory::new(args.swtpm_ctrl.as_str())),
        args.terminate_on_close,
        interceptor,
    );
    relayer.relay().context("qemu ctrl relay failed")?;
    Ok(())
}

fn run_cuse(args: CuseArgs) -> anyhow::Result<()> {
    // The TPM device sits behind an internal TCP relay so a packet capture
    // on the relay address sees every turn.
    let relayer = TcpRelayer::new(
        args.relay_addr.as_str(),
        Arc::new(DevForwarderFactory::new(args.tpm.as_str())),
        false,
        Some(Arc::new(dissect::Dissector)),
    );
    let relay_addr = args.relay_addr.clone();
    thread::spawn(move || {
        if let Err(err) = relayer.relay() {
            tracing::error!("tcp relay failed: {err}");
        }
    });

    // Give the relay a moment to bind before dialing it.
    thread::sleep(Duration::from_millis(100));
    let upstream = TcpStream::connect(&relay_addr)
        .with_context(|| format!("dialing internal relay at {relay_addr}"))?;

    CuseRelayer::new(Box::new(upstream))
        .relay(&args.name)
        .context("cuse relay failed")?;
    Ok(())
}
