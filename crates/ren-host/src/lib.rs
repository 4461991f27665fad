// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # ren-host - device request layer for an interpreter runtime
//!
//! Every piece of I/O an interpreter performs (console, files, sockets,
//! DNS, clipboard, serial lines, OS signals) is expressed as a *request*
//! executed by a *device*. Requests either complete synchronously or pend
//! on their device's queue; a single-threaded `wait` loop polls pending
//! requests and the device layer reports state changes as *events*.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use ren_host::{Host, HostConfig, NetPort, Result};
//!
//! fn main() -> Result<()> {
//!     let mut host = Host::new(HostConfig::from_env())?;
//!     let mut port = NetPort::open(&mut host, "tcp://127.0.0.1:7777")?;
//!     port.write(&mut host, b"hello")?;
//!     port.read(&mut host)?;
//!     host.wait_for(&mut port, Duration::from_secs(5), |p| !p.data().is_empty())?;
//!     println!("{:?}", port.data());
//!     port.close(&mut host)
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        Port actors                                  |
//! |   NetPort (tcp:// udp://) | DnsPort (dns://) | interpreter ports    |
//! +---------------------------------------------------------------------+
//! |                        Host                                         |
//! |   do_command | pending queues | event queue | wait scheduler        |
//! +---------------------------------------------------------------------+
//! |                        Devices                                      |
//! |   STDIO | FILE | EVENT | NET | DNS | CLIPBOARD | SERIAL | SIGNAL    |
//! +---------------------------------------------------------------------+
//! |                        OS                                           |
//! |   mio poll + waker | socket2 | resolver threads | termios | signals |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Host`] | Device registry, dispatcher and scheduler |
//! | [`Request`] | One in-flight operation against a device |
//! | [`Event`] | State change reported by a device |
//! | [`NetPort`] | TCP/UDP port actor |
//! | [`DnsPort`] | DNS lookup port actor |
//! | [`HostConfig`] | Tunables, overridable from the environment |

/// Host configuration and environment overrides.
pub mod config;
/// Device drivers and the command-table dispatch machinery.
pub mod device;
/// Device error taxonomy and port errors.
pub mod error;
/// Events and the bounded event queue.
pub mod event;
/// Process-wide HALT flag and interrupt handler.
pub mod halt;
/// The host: registry, dispatcher and `wait` scheduler.
pub mod host;
/// Port actors (net, dns) and port URLs.
pub mod port;
/// Child process reaping.
pub mod reap;
/// Requests, commands, flags and device payloads.
pub mod request;

pub use config::HostConfig;
pub use device::stdio::{LineEvent, LineSource, ScriptedLines};
pub use device::{DeviceFlags, DeviceId, Driver};
pub use error::{DeviceError, PortError, Result};
pub use event::{Event, EventFlags, EventQueue, EventType, Eventee};
pub use host::{Host, WaitOutcome};
pub use port::dns::{DnsAnswer, DnsPort};
pub use port::net::{NetInfo, NetPort};
pub use port::{PortActor, PortId, PortUrl, Scheme};
pub use request::{
    Command, Modes, NetModify, NetState, Outcome, Payload, ReqFlags, ReqId, Request,
};
