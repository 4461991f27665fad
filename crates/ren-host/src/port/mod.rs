// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Port actors: the translation layer between language-level ports and
//! device requests.
//!
//! An actor owns at most one request (its state) plus a port-data buffer.
//! It issues commands through [`Host::do_command`] and folds the device
//! events addressed to its request back in through [`PortActor::update`].
//!
//! URL forms:
//!
//! | url | meaning |
//! |---|---|
//! | `tcp://host:port` | TCP client |
//! | `tcp://:port` | TCP listener |
//! | `udp://host:port` | UDP peer |
//! | `udp://:port` | UDP socket bound to `port` |
//! | `dns://name` | forward lookup |
//! | `dns://a.b.c.d` | reverse lookup |

pub mod dns;
pub mod net;

use std::fmt;
use std::str::FromStr;

use crate::error::{PortError, Result};
use crate::event::{Event, Eventee};
use crate::host::Host;

/// Identity of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A port's actor, as seen by the event dispatch loop.
pub trait PortActor {
    fn id(&self) -> PortId;

    /// Whether an event with this eventee belongs to this port.
    fn owns(&self, eventee: &Eventee) -> bool;

    /// Fold a device event into the port state.
    fn update(&mut self, host: &mut Host, event: &Event) -> Result<()>;

    /// Catch up on requests that finished without a delivered event, e.g.
    /// when the event queue was full. Runs before queued events are handed
    /// to [`PortActor::update`].
    fn refresh(&mut self, _host: &mut Host) -> Result<()> {
        Ok(())
    }
}

/// URL scheme of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    Udp,
    Dns,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Tcp => "tcp",
            Scheme::Udp => "udp",
            Scheme::Dns => "dns",
        })
    }
}

/// Parsed port URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortUrl {
    pub scheme: Scheme,
    /// Host part; `None` for the listen forms (`tcp://:port`)
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl PortUrl {
    pub fn parse(url: &str) -> Result<Self> {
        url.parse()
    }

    /// `tcp://:port` / `udp://:port`
    pub fn is_listen(&self) -> bool {
        self.host.is_none() && self.scheme != Scheme::Dns
    }
}

impl FromStr for PortUrl {
    type Err = PortError;

    fn from_str(url: &str) -> Result<Self> {
        let invalid = || PortError::InvalidUrl(url.to_string());
        let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "tcp" => Scheme::Tcp,
            "udp" => Scheme::Udp,
            "dns" => Scheme::Dns,
            _ => return Err(invalid()),
        };
        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid())?;
                (host, Some(port))
            }
            None => (authority, None),
        };
        let host = (!host.is_empty()).then(|| host.to_string());

        match scheme {
            Scheme::Dns if host.is_none() => return Err(invalid()),
            Scheme::Tcp | Scheme::Udp if port.is_none() => return Err(invalid()),
            _ => {}
        }
        Ok(Self { scheme, host, port })
    }
}

impl fmt::Display for PortUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host.as_deref().unwrap_or(""))?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}
