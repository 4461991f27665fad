// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ren-host-probe - exercise the device layer from the command line
//!
//! Each subcommand drives one port kind through a [`Host`] the same way an
//! interpreter would: open, issue requests, `wait` for events, close.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ren_host::request::FilePayload;
use ren_host::{
    halt, Command, DeviceId, DnsPort, Host, HostConfig, Modes, NetPort, Outcome, Payload,
    PortError,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Device layer probe
#[derive(Parser, Debug)]
#[command(name = "ren-host-probe")]
#[command(version)]
#[command(about = "Drive ren-host ports from the command line")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Seconds to wait for each step
    #[arg(short, long, default_value = "5", global = true)]
    timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Accept TCP connections and echo what they send
    Echo {
        /// Port to listen on
        #[arg(short, long, default_value = "7777")]
        port: u16,

        /// Stop after this many connections (0 = until Ctrl-C)
        #[arg(short = 'n', long, default_value = "0")]
        count: usize,
    },
    /// Send a line over TCP and print the reply
    Send {
        /// Target, e.g. tcp://127.0.0.1:7777
        url: String,

        /// Text to send
        message: String,
    },
    /// Receive UDP datagrams, or send one with --to
    Udp {
        /// Local port to bind when receiving
        #[arg(short, long, default_value = "9999")]
        port: u16,

        /// Destination url (udp://host:port) to send to instead
        #[arg(long)]
        to: Option<String>,

        /// Payload to send
        #[arg(short, long, default_value = "ping")]
        message: String,
    },
    /// Resolve a name, or an IPv4 address back to a name
    Dns {
        /// Host name or dotted IPv4 address
        target: String,
    },
    /// Print a file through the FILE device
    Cat {
        path: PathBuf,

        /// Byte offset to start from
        #[arg(long, default_value = "0")]
        offset: u64,

        /// Read chunk size
        #[arg(long, default_value = "4096")]
        chunk: usize,
    },
}

/// Upper bound for waits that normally end on an event or Ctrl-C.
const IDLE: Duration = Duration::from_secs(24 * 60 * 60);

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        if matches!(e.downcast_ref::<PortError>(), Some(PortError::Halted)) {
            info!("interrupted");
            return;
        }
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let mut host = Host::new(HostConfig::from_env()).context("starting host")?;
    host.install_interrupt_handler()
        .context("installing Ctrl-C handler")?;
    let timeout = Duration::from_secs(args.timeout);

    match &args.mode {
        Mode::Echo { port, count } => run_echo(&mut host, *port, *count, timeout),
        Mode::Send { url, message } => run_send(&mut host, url, message, timeout),
        Mode::Udp { port, to, message } => match to {
            Some(url) => run_udp_send(&mut host, url, message),
            None => run_udp_recv(&mut host, *port),
        },
        Mode::Dns { target } => run_dns(&mut host, target, timeout),
        Mode::Cat {
            path,
            offset,
            chunk,
        } => run_cat(&mut host, path, *offset, *chunk),
    }
}

fn run_echo(host: &mut Host, port: u16, count: usize, timeout: Duration) -> Result<()> {
    let mut server = NetPort::open(host, &format!("tcp://:{}", port))?;
    info!("listening on port {}", port);
    let mut served = 0;

    while count == 0 || served < count {
        if !host.wait_for(&mut server, IDLE, |s| s.accepted_count() > 0)? {
            continue;
        }
        let Some(mut conn) = server.pick(host, 1)? else {
            continue;
        };
        info!("connection from {}", conn.url());
        loop {
            conn.read(host)?;
            let ready = host.wait_for(&mut conn, timeout, |c| {
                !c.data().is_empty() || c.peer_closed()
            })?;
            if !ready || conn.peer_closed() {
                break;
            }
            let bytes = conn.take_data();
            debug!("echoing {} bytes", bytes.len());
            conn.write(host, &bytes)?;
            host.wait_for(&mut conn, timeout, |c| !c.is_writing())?;
        }
        conn.close(host)?;
        served += 1;
    }
    server.close(host)?;
    Ok(())
}

fn run_send(host: &mut Host, url: &str, message: &str, timeout: Duration) -> Result<()> {
    let mut port = NetPort::open(host, url)?;
    port.write(host, message.as_bytes())?;
    port.read(host)?;
    let want = message.len();
    let ok = host.wait_for(&mut port, timeout, |p| {
        p.data().len() >= want || p.peer_closed()
    })?;
    if !ok {
        bail!("no reply from {} within {:?}", url, timeout);
    }
    println!("{}", String::from_utf8_lossy(port.data()));
    port.close(host)?;
    Ok(())
}

fn run_udp_recv(host: &mut Host, port: u16) -> Result<()> {
    let mut socket = NetPort::open(host, &format!("udp://:{}", port))?;
    info!("receiving on udp port {}", port);
    while !halt::halt_requested() {
        socket.read(host)?;
        if host.wait_for(&mut socket, IDLE, |s| !s.data().is_empty())? {
            let info = socket.query(host)?;
            let data = socket.take_data();
            println!("{} bytes from {}: {:?}", data.len(), info.remote, data);
        }
    }
    socket.close(host)?;
    Ok(())
}

fn run_udp_send(host: &mut Host, url: &str, message: &str) -> Result<()> {
    let mut socket = NetPort::open(host, url)?;
    socket.write(host, message.as_bytes())?;
    host.wait_for(&mut socket, Duration::from_secs(1), |s| !s.is_writing())?;
    socket.close(host)?;
    Ok(())
}

fn run_dns(host: &mut Host, target: &str, timeout: Duration) -> Result<()> {
    let answer = DnsPort::resolve(host, &format!("dns://{}", target), timeout)?;
    println!("{}", answer);
    Ok(())
}

fn run_cat(host: &mut Host, path: &Path, offset: u64, chunk: usize) -> Result<()> {
    let id = host.alloc_request(
        DeviceId::File,
        Payload::File(FilePayload::new(path)),
        Modes::READ,
    );
    if host.do_command(id, Command::Open) != Outcome::Done {
        let code = host.request(id).and_then(|r| r.error);
        host.free_request(id);
        bail!("cannot open {}: {:?}", path.display(), code);
    }
    if let Some(req) = host.request_mut(id) {
        if let Some(file) = req.payload.file_mut() {
            file.index = offset;
        }
        req.modes.insert(Modes::SEEK);
        req.length = chunk.max(1);
    }

    let mut out = std::io::stdout().lock();
    loop {
        if let Some(req) = host.request_mut(id) {
            req.data.clear();
        }
        if host.do_command(id, Command::Read) != Outcome::Done {
            let code = host.request(id).and_then(|r| r.error);
            host.free_request(id);
            bail!("read failed: {:?}", code);
        }
        let Some(req) = host.request(id) else {
            break;
        };
        if req.actual == 0 {
            break;
        }
        out.write_all(&req.data)?;
    }
    out.flush()?;
    host.do_command(id, Command::Close);
    host.free_request(id);
    Ok(())
}
