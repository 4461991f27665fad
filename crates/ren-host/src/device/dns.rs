// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DNS device: forward and reverse IPv4 resolution.
//!
//! # Architecture
//!
//! ```text
//!  READ ──> ResolverPool::submit ──> ren-dns-0..N (blocking resolver)
//!                                         │
//!  POLL <── ResolverPool::ticket <────────┘ + Waker::wake()
//! ```
//!
//! With `dns_workers == 0` the resolver runs inline and READ completes in the
//! calling frame. Otherwise READ parks a ticket in the request's requestee and
//! returns PEND; the custom poll op matches completions back to requests,
//! fills the result, sets DONE and posts READ. A request still unresolved
//! after its timeout (default 4000 ms) fails with READ_ERROR.
//!
//! A name that does not resolve is not an error: the READ completes with
//! `host_info == None` and `actual == 0`.

use std::sync::Arc;

use mio::Waker;

use super::resolver::{resolve, Query, ResolverPool, Ticket};
use super::{CommandTable, DeviceCtx, Driver, PollCtx};
use crate::error::DeviceError;
use crate::event::EventType;
use crate::request::{Command, HostInfo, Modes, NetState, Outcome, ReqFlags, Request, Requestee};

/// The DNS device.
pub struct DnsDriver {
    pool: ResolverPool,
}

impl DnsDriver {
    /// Resolver device; completions wake `waker` when given.
    pub fn new(waker: Option<Arc<Waker>>) -> Self {
        Self {
            pool: ResolverPool::new("ren-dns", waker),
        }
    }

    /// Lookups submitted and not yet matched or cancelled.
    pub fn inflight(&self) -> usize {
        self.pool.inflight()
    }

    fn init(&mut self, _req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
        self.pool.start(ctx.config().dns_workers);
        Outcome::Done
    }

    fn quit(&mut self, _req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        self.pool.stop();
        Outcome::Done
    }

    fn open(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let Some(net) = req.payload.net_mut() else {
            return req.fail(DeviceError::NoHandle);
        };
        net.host_info = None;
        net.state = NetState::OPEN;
        Outcome::Done
    }

    fn close(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        self.cancel(req);
        if let Some(net) = req.payload.net_mut() {
            net.host_info = None;
            net.state = NetState::empty();
        }
        Outcome::Done
    }

    /// Drop the request's ticket; the worker's answer is discarded.
    fn cancel(&mut self, req: &mut Request) {
        if let Requestee::Id(ticket) = req.requestee {
            log::debug!("[DNS] ticket {} cancelled", ticket);
            self.pool.cancel(ticket);
            req.requestee = Requestee::None;
        }
    }

    fn read(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
        if let Requestee::Id(ticket) = req.requestee {
            if self.pool.is_inflight(ticket) {
                return Outcome::Pend;
            }
        }
        let Some(net) = req.payload.net_mut() else {
            return req.fail(DeviceError::NoHandle);
        };
        if !net.state.contains(NetState::OPEN) {
            return req.fail(DeviceError::NotOpen);
        }
        let query = if req.modes.contains(Modes::REVERSE) {
            Query::Reverse(net.remote_ip)
        } else {
            match net.host_name.clone() {
                Some(name) if !name.is_empty() => Query::Forward(name),
                _ => return req.fail(DeviceError::InvalidSpec),
            }
        };
        net.host_info = None;
        req.flags.remove(ReqFlags::DONE);

        if let Some(ticket) = self.pool.submit(query.clone()) {
            req.requestee = Requestee::Id(ticket);
            return Outcome::Pend;
        }
        let result = resolve(&query);
        finish(req, result);
        ctx.signal(req, EventType::Read);
        Outcome::Done
    }

    fn poll(&mut self, ctx: &mut PollCtx<'_>) -> bool {
        self.pool.collect();
        let default_timeout = ctx.config().dns_timeout;
        let mut changed = false;
        for id in ctx.pending() {
            let mut failed = false;
            let mut completed = false;
            {
                let Some((req, mut dctx)) = ctx.split(id) else {
                    continue;
                };
                let Requestee::Id(ticket) = req.requestee else {
                    continue;
                };
                match self.pool.ticket(ticket) {
                    Ticket::Ready(result) => {
                        req.requestee = Requestee::None;
                        finish(req, result);
                        dctx.signal(req, EventType::Read);
                        completed = true;
                    }
                    Ticket::Waiting(started) => {
                        let limit = req.timeout.unwrap_or(default_timeout);
                        if started.elapsed() >= limit {
                            log::debug!("[DNS] ticket {} timed out after {:?}", ticket, limit);
                            self.pool.cancel(ticket);
                            req.requestee = Requestee::None;
                            failed = true;
                        }
                    }
                    Ticket::Unknown => {
                        req.requestee = Requestee::None;
                        failed = true;
                    }
                }
            }
            if completed {
                ctx.complete(id);
                changed = true;
            } else if failed {
                ctx.fail(id, DeviceError::ReadError, None);
                changed = true;
            }
        }
        changed
    }
}

/// Store a resolver result in the request: set DONE, fill `host_info`, and
/// append the answer (4 octets forward, name text reverse) to `data`.
fn finish(req: &mut Request, result: Option<HostInfo>) {
    req.flags.insert(ReqFlags::DONE);
    req.actual = 0;
    let reverse = req.modes.contains(Modes::REVERSE);
    let Some(net) = req.payload.net_mut() else {
        return;
    };
    let answer: Vec<u8> = match &result {
        Some(info) if reverse => info.name.clone().unwrap_or_default().into_bytes(),
        Some(info) => match info.addrs.first() {
            Some(ip) => {
                net.remote_ip = *ip;
                ip.octets().to_vec()
            }
            None => Vec::new(),
        },
        None => Vec::new(),
    };
    net.host_info = result;
    req.data.extend_from_slice(&answer);
    req.actual = answer.len();
    req.length = req.length.max(req.actual);
}

impl Driver for DnsDriver {
    const NAME: &'static str = "dns";

    fn table() -> CommandTable<Self> {
        CommandTable::new()
            .with(Command::Init, Self::init)
            .with(Command::Quit, Self::quit)
            .with(Command::Open, Self::open)
            .with(Command::Close, Self::close)
            .with(Command::Read, Self::read)
            .with_poll(Self::poll)
            .with_cancel(Self::cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::device::{DeviceId, PendingQueue};
    use crate::event::EventQueue;
    use crate::device::resolver::reverse_lookup;
    use crate::device::net::resolve_v4;
    use crate::request::{NetPayload, Payload, RequestArena};
    use std::net::Ipv4Addr;
    use std::thread;
    use std::time::{Duration, Instant};

    fn dns_req(host: Option<&str>, reverse: Option<Ipv4Addr>) -> Request {
        let mut net = NetPayload::default();
        net.host_name = host.map(str::to_string);
        let mut modes = Modes::empty();
        if let Some(ip) = reverse {
            net.remote_ip = ip;
            modes |= Modes::REVERSE;
        }
        let mut req = Request::new(DeviceId::Dns)
            .with_payload(Payload::Net(net))
            .with_modes(modes);
        req.command = Command::Read;
        req
    }

    #[test]
    fn test_inline_forward_lookup() {
        let mut driver = DnsDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default().with_dns_workers(0);
        let mut ctx = DeviceCtx::new(&mut events, &config);

        assert_eq!(driver.init(&mut Request::new(DeviceId::Dns), &mut ctx), Outcome::Done);
        let mut req = dns_req(Some("localhost"), None);
        assert_eq!(driver.open(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(driver.read(&mut req, &mut ctx), Outcome::Done);
        assert!(req.is_done());
        assert_eq!(req.data, vec![127, 0, 0, 1]);
        assert_eq!(req.actual, 4);
        drop(ctx);
        assert_eq!(events.pop().map(|e| e.kind), Some(EventType::Read));
    }

    #[test]
    fn test_unknown_name_is_blank_not_error() {
        let mut driver = DnsDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default().with_dns_workers(0);
        let mut ctx = DeviceCtx::new(&mut events, &config);

        let mut req = dns_req(Some("no-such-host.invalid"), None);
        assert_eq!(driver.open(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(driver.read(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(req.actual, 0);
        assert!(req.payload.net().unwrap().host_info.is_none());
        assert!(req.error.is_none());
    }

    #[test]
    fn test_read_requires_open_and_name() {
        let mut driver = DnsDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default().with_dns_workers(0);
        let mut ctx = DeviceCtx::new(&mut events, &config);

        let mut req = dns_req(Some("localhost"), None);
        assert_eq!(driver.read(&mut req, &mut ctx), Outcome::Error);
        assert_eq!(req.error, Some(DeviceError::NotOpen));

        let mut req = dns_req(None, None);
        assert_eq!(driver.open(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(driver.read(&mut req, &mut ctx), Outcome::Error);
        assert_eq!(req.error, Some(DeviceError::InvalidSpec));
    }

    #[test]
    fn test_worker_pool_completes_through_poll() {
        let mut driver = DnsDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default().with_dns_workers(1);
        let mut arena = RequestArena::new();
        let mut queue = PendingQueue::new();

        {
            let mut ctx = DeviceCtx::new(&mut events, &config);
            assert_eq!(driver.init(&mut Request::new(DeviceId::Dns), &mut ctx), Outcome::Done);
        }
        let id = arena.insert(dns_req(Some("localhost"), None));
        {
            let req = arena.get_mut(id).unwrap();
            let mut ctx = DeviceCtx::new(&mut events, &config);
            assert_eq!(driver.open(req, &mut ctx), Outcome::Done);
            assert_eq!(driver.read(req, &mut ctx), Outcome::Pend);
            queue.attach(req);
        }
        assert_eq!(driver.inflight(), 1);

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let mut pctx = PollCtx::new(&mut queue, &mut arena, &mut events, &config);
            if driver.poll(&mut pctx) {
                break;
            }
            assert!(Instant::now() < deadline, "lookup never completed");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(queue.is_empty());
        let req = arena.get(id).unwrap();
        assert!(req.is_done());
        assert_eq!(req.data, vec![127, 0, 0, 1]);
        assert_eq!(events.pop().map(|e| e.kind), Some(EventType::Read));
        assert_eq!(driver.inflight(), 0);

        let mut ctx = DeviceCtx::new(&mut events, &config);
        assert_eq!(driver.quit(&mut Request::new(DeviceId::Dns), &mut ctx), Outcome::Done);
    }

    #[test]
    fn test_close_cancels_inflight() {
        let mut driver = DnsDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default().with_dns_workers(1);
        let mut ctx = DeviceCtx::new(&mut events, &config);
        driver.init(&mut Request::new(DeviceId::Dns), &mut ctx);

        let mut req = dns_req(Some("localhost"), None);
        driver.open(&mut req, &mut ctx);
        assert_eq!(driver.read(&mut req, &mut ctx), Outcome::Pend);
        assert_eq!(driver.close(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(driver.inflight(), 0);
        assert!(!req.requestee.is_some());
    }

    #[test]
    fn test_cancel_releases_ticket() {
        let mut driver = DnsDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default().with_dns_workers(1);
        let mut ctx = DeviceCtx::new(&mut events, &config);
        driver.init(&mut Request::new(DeviceId::Dns), &mut ctx);

        let mut req = dns_req(Some("localhost"), None);
        driver.open(&mut req, &mut ctx);
        assert_eq!(driver.read(&mut req, &mut ctx), Outcome::Pend);
        assert_eq!(driver.inflight(), 1);
        driver.cancel(&mut req);
        assert_eq!(driver.inflight(), 0);
        assert!(!req.requestee.is_some());

        // A fresh READ submits a new lookup instead of waiting on the old one.
        assert_eq!(driver.read(&mut req, &mut ctx), Outcome::Pend);
        assert_eq!(driver.inflight(), 1);
        driver.quit(&mut Request::new(DeviceId::Dns), &mut ctx);
        assert_eq!(driver.inflight(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_reverse_localhost_round_trips() {
        if let Some(name) = reverse_lookup(Ipv4Addr::LOCALHOST) {
            let addrs = resolve_v4(&name).unwrap_or_default();
            assert!(addrs.contains(&Ipv4Addr::LOCALHOST), "{} -> {:?}", name, addrs);
        }
    }
}
