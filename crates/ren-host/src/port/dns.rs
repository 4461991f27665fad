// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DNS port actor: one lookup per port.
//!
//! `dns://name` resolves forward to an IPv4 address; `dns://a.b.c.d`
//! resolves the address back to a name. The answer is taken with
//! [`DnsPort::pick`], which also closes the port.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::device::DeviceId;
use crate::error::{DeviceError, PortError, Result};
use crate::event::{Event, EventType, Eventee};
use crate::host::Host;
use crate::request::{Command, Modes, NetPayload, Outcome, Payload, ReqId};

use super::{PortActor, PortId, PortUrl, Scheme};

/// Result of a lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DnsAnswer {
    /// Forward lookup result
    Address(Ipv4Addr),
    /// Reverse lookup result
    Name(String),
    /// The resolver had no answer
    NotFound,
}

impl fmt::Display for DnsAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsAnswer::Address(ip) => write!(f, "{}", ip),
            DnsAnswer::Name(name) => f.write_str(name),
            DnsAnswer::NotFound => f.write_str("none"),
        }
    }
}

/// Actor for `dns://` ports.
#[derive(Debug)]
pub struct DnsPort {
    id: PortId,
    url: PortUrl,
    req: Option<ReqId>,
    reverse: bool,
    answer: Option<DnsAnswer>,
}

impl DnsPort {
    /// Open a lookup port from a `dns://` URL.
    pub fn open(host: &mut Host, url: &str) -> Result<Self> {
        let url = PortUrl::parse(url)?;
        if url.scheme != Scheme::Dns {
            return Err(PortError::InvalidUrl(url.to_string()));
        }
        let target = url.host.clone().unwrap_or_default();

        let mut net = NetPayload::default();
        let mut modes = Modes::empty();
        let reverse = match target.parse::<Ipv4Addr>() {
            Ok(ip) => {
                net.remote_ip = ip;
                modes |= Modes::REVERSE;
                true
            }
            Err(_) => {
                net.host_name = Some(target);
                false
            }
        };

        let id = host.next_port_id();
        let req = host.alloc_request(DeviceId::Dns, Payload::Net(net), modes);
        let mut port = Self {
            id,
            url,
            req: Some(req),
            reverse,
            answer: None,
        };
        if let Err(e) = port.command(host, Command::Open) {
            port.close(host);
            return Err(e);
        }
        Ok(port)
    }

    /// Open, resolve and close in one call.
    pub fn resolve(host: &mut Host, url: &str, timeout: Duration) -> Result<DnsAnswer> {
        let mut port = Self::open(host, url)?;
        let result = port.lookup(host, timeout);
        port.close(host);
        result
    }

    fn lookup(&mut self, host: &mut Host, timeout: Duration) -> Result<DnsAnswer> {
        self.read(host)?;
        if !host.wait_for(self, timeout, |p| p.is_complete())? {
            return Err(PortError::Device {
                device: DeviceId::Dns,
                port: self.id,
                code: DeviceError::ReadError,
                os_error: None,
            });
        }
        Ok(self.pick(host).unwrap_or(DnsAnswer::NotFound))
    }

    pub fn url(&self) -> &PortUrl {
        &self.url
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    pub fn is_open(&self) -> bool {
        self.req.is_some()
    }

    /// The answer has arrived.
    pub fn is_complete(&self) -> bool {
        self.answer.is_some()
    }

    /// Start the lookup. Completes immediately when the resolver runs inline.
    pub fn read(&mut self, host: &mut Host) -> Result<()> {
        if self.answer.is_some() {
            return Ok(());
        }
        if self.command(host, Command::Read)? == Outcome::Done {
            if let Some(id) = self.req {
                host.events_mut().retract(id, EventType::Read);
            }
            self.collect(host);
        }
        Ok(())
    }

    /// Take the answer and close the port; `None` while still resolving.
    pub fn pick(&mut self, host: &mut Host) -> Option<DnsAnswer> {
        let answer = self.answer.take()?;
        self.close(host);
        Some(answer)
    }

    /// Cancel any outstanding lookup and release the request. Idempotent.
    pub fn close(&mut self, host: &mut Host) {
        let Some(id) = self.req.take() else {
            return;
        };
        host.do_command(id, Command::Close);
        host.free_request(id);
        log::debug!("[DNS] port {} closed", self.id);
    }

    fn collect(&mut self, host: &Host) {
        let Some(req) = self.req.and_then(|id| host.request(id)) else {
            return;
        };
        let info = req.payload.net().and_then(|n| n.host_info.as_ref());
        let answer = match info {
            Some(info) if self.reverse => match &info.name {
                Some(name) => DnsAnswer::Name(name.clone()),
                None => DnsAnswer::NotFound,
            },
            Some(info) => match info.addrs.first() {
                Some(ip) => DnsAnswer::Address(*ip),
                None => DnsAnswer::NotFound,
            },
            None => DnsAnswer::NotFound,
        };
        log::debug!("[DNS] {} -> {}", self.url, answer);
        self.answer = Some(answer);
    }

    fn command(&mut self, host: &mut Host, command: Command) -> Result<Outcome> {
        let id = self.req.ok_or(PortError::NotOpen(self.id))?;
        match host.do_command(id, command) {
            Outcome::Error => {
                host.events_mut().retract(id, EventType::Error);
                Err(self.device_error(host, id))
            }
            outcome => Ok(outcome),
        }
    }

    fn device_error(&self, host: &Host, id: ReqId) -> PortError {
        let (code, os_error) = host
            .request(id)
            .map(|r| (r.error.unwrap_or(DeviceError::ReadError), r.os_error))
            .unwrap_or((DeviceError::NotOpen, None));
        PortError::Device {
            device: DeviceId::Dns,
            port: self.id,
            code,
            os_error,
        }
    }
}

impl PortActor for DnsPort {
    fn id(&self) -> PortId {
        self.id
    }

    fn owns(&self, eventee: &Eventee) -> bool {
        match eventee {
            Eventee::Request(id) => self.req == Some(*id),
            Eventee::Port(port) => *port == self.id,
        }
    }

    fn refresh(&mut self, host: &mut Host) -> Result<()> {
        if self.answer.is_some() {
            return Ok(());
        }
        let Some(id) = self.req else {
            return Ok(());
        };
        let Some(req) = host.request(id) else {
            return Ok(());
        };
        if req.command != Command::Read || req.is_pending() {
            return Ok(());
        }
        let failed = req.error.is_some();
        while host.events_mut().retract(id, EventType::Read) {}
        if failed {
            while host.events_mut().retract(id, EventType::Error) {}
            return Err(self.device_error(host, id));
        }
        self.collect(host);
        Ok(())
    }

    fn update(&mut self, host: &mut Host, event: &Event) -> Result<()> {
        match event.kind {
            EventType::Read if self.answer.is_none() => self.collect(host),
            EventType::Error => {
                let id = self.req.ok_or(PortError::NotOpen(self.id))?;
                return Err(self.device_error(host, id));
            }
            _ => {}
        }
        Ok(())
    }
}
