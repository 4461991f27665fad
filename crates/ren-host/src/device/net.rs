// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! NET device: non-blocking TCP and UDP sockets.
//!
//! # State machine
//!
//! ```text
//!   OPEN ──CONNECT──> ATTEMPT ──(poll: peer_addr ok)──> CONNECT ──> READ/WRITE
//!     │                  └──(poll: take_error / timeout)──> ERROR event
//!     │
//!     └──CONNECT + LISTEN (tcp)──> BIND|LISTEN ──(poll: accept)──> ACCEPT event
//!     └──CONNECT (udp)──────────> BIND|CONNECT
//! ```
//!
//! Sockets are created with `socket2` and converted to `mio` types once they
//! are connected, listening or bound. Every converted handle is registered
//! with the EVENT device's poll registry so readiness ends the scheduler's
//! sleep. Registration is edge-triggered; the custom poll op retries every
//! pending request on each cycle, so a missed edge only costs one sleep.
//!
//! LOOKUP of a literal IPv4 address completes inline. Names go to a
//! [`ResolverPool`] and the request PENDs until the poll op picks up the
//! answer and posts OPEN (address known, ready to CONNECT).

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::sync::Arc;
use std::time::Instant;

use mio::{Interest, Registry, Token, Waker};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use super::resolver::{Query, ResolverPool, Ticket};
use super::{CommandTable, DeviceCtx, Driver, PollCtx};
use crate::error::DeviceError;
use crate::event::EventType;
use crate::request::{
    AcceptedSocket, Command, HostInfo, Modes, NetModify, NetState, Outcome, ReqFlags, Request,
    Requestee,
};

// ============================================================================
// Helpers
// ============================================================================

/// IPv4 view of a socket address (IPv6 peers map to the unspecified address).
pub(crate) fn v4(addr: SocketAddr) -> SocketAddrV4 {
    match addr {
        SocketAddr::V4(a) => a,
        SocketAddr::V6(a) => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, a.port()),
    }
}

fn would_block(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(unix)]
fn connect_in_progress(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EINPROGRESS) || would_block(e)
}

#[cfg(not(unix))]
fn connect_in_progress(e: &io::Error) -> bool {
    would_block(e)
}

/// IPv4 addresses `host` resolves to (a literal address resolves to itself).
pub(crate) fn resolve_v4(host: &str) -> io::Result<Vec<Ipv4Addr>> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(vec![ip]);
    }
    let addrs: Vec<Ipv4Addr> = (host, 0)
        .to_socket_addrs()?
        .filter_map(|a| match a {
            SocketAddr::V4(a) => Some(*a.ip()),
            SocketAddr::V6(_) => None,
        })
        .collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no IPv4 address for {}", host),
        ));
    }
    Ok(addrs)
}

/// Apply a socket option change; `None` when the handle does not support it.
fn apply_modify(handle: &Requestee, change: NetModify) -> Option<io::Result<()>> {
    let result = match (handle, change) {
        (Requestee::Datagram(d), NetModify::JoinMulticast { group, interface }) => {
            d.join_multicast_v4(&group, &interface)
        }
        (Requestee::Datagram(d), NetModify::LeaveMulticast { group, interface }) => {
            d.leave_multicast_v4(&group, &interface)
        }
        (Requestee::Datagram(d), NetModify::SetTtl(ttl)) => d.set_ttl(ttl),
        (Requestee::Datagram(d), NetModify::SetMulticastTtl(ttl)) => d.set_multicast_ttl_v4(ttl),
        (Requestee::Datagram(d), NetModify::SetBroadcast(on)) => d.set_broadcast(on),
        (Requestee::Stream(s), NetModify::SetTtl(ttl)) => s.set_ttl(ttl),
        (Requestee::Socket(s), NetModify::JoinMulticast { group, interface }) => {
            s.join_multicast_v4(&group, &interface)
        }
        (Requestee::Socket(s), NetModify::LeaveMulticast { group, interface }) => {
            s.leave_multicast_v4(&group, &interface)
        }
        (Requestee::Socket(s), NetModify::SetTtl(ttl)) => s.set_ttl(ttl),
        (Requestee::Socket(s), NetModify::SetMulticastTtl(ttl)) => s.set_multicast_ttl_v4(ttl),
        (Requestee::Socket(s), NetModify::SetBroadcast(on)) => s.set_broadcast(on),
        _ => return None,
    };
    Some(result)
}

/// What a poll step decided for one pending request.
enum Step {
    Keep { changed: bool },
    Complete,
    Fail(DeviceError, Option<i32>),
}

// ============================================================================
// Driver
// ============================================================================

/// The NET device.
pub struct NetDriver {
    registry: Option<Registry>,
    next_token: usize,
    resolver: ResolverPool,
}

impl NetDriver {
    /// Net device registering its sockets with `registry` (if any).
    pub fn new(registry: Option<Registry>) -> Self {
        Self {
            registry,
            next_token: 1,
            resolver: ResolverPool::new("ren-lookup", None),
        }
    }

    /// Builder: wake `waker` when a background LOOKUP finishes.
    pub fn with_waker(mut self, waker: Arc<Waker>) -> Self {
        self.resolver.set_waker(waker);
        self
    }

    /// LOOKUPs handed to the resolver and not yet answered.
    pub fn lookups_inflight(&self) -> usize {
        self.resolver.inflight()
    }

    fn register<S: mio::event::Source + ?Sized>(&mut self, source: &mut S) {
        if self.registry.is_none() {
            return;
        }
        let token = Token(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);
        if self.next_token == usize::MAX {
            self.next_token = 1;
        }
        if let Some(registry) = &self.registry {
            if let Err(e) =
                registry.register(source, token, Interest::READABLE | Interest::WRITABLE)
            {
                log::debug!("[NET] register failed: {}", e);
            }
        }
    }

    fn deregister<S: mio::event::Source + ?Sized>(&self, source: &mut S) {
        if let Some(registry) = &self.registry {
            let _ = registry.deregister(source);
        }
    }

    fn init(&mut self, _req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
        log::debug!("[NET] init");
        self.resolver.start(ctx.config().dns_workers);
        Outcome::Done
    }

    fn quit(&mut self, _req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        self.resolver.stop();
        Outcome::Done
    }

    fn open(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        if req.requestee.is_some() {
            return Outcome::Done;
        }
        let udp = req.modes.contains(Modes::UDP);
        let socket = if udp {
            Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        } else {
            Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        };
        let socket = match socket.and_then(|s| {
            s.set_nonblocking(true)?;
            if udp {
                s.set_broadcast(true)?;
                s.set_reuse_address(true)?;
            }
            Ok(s)
        }) {
            Ok(s) => s,
            Err(e) => {
                log::debug!("[NET] socket allocation failed: {}", e);
                return req.fail_io(DeviceError::CannotOpen, &e);
            }
        };
        let Some(net) = req.payload.net_mut() else {
            return req.fail(DeviceError::NoHandle);
        };
        net.state = NetState::OPEN;
        req.requestee = Requestee::Socket(socket);
        Outcome::Done
    }

    fn close(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        self.cancel(req);
        match std::mem::take(&mut req.requestee) {
            Requestee::Stream(mut stream) => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
                self.deregister(&mut stream);
            }
            Requestee::Listener(mut listener) => self.deregister(&mut listener),
            Requestee::Datagram(mut socket) => self.deregister(&mut socket),
            _ => {}
        }
        if let Some(net) = req.payload.net_mut() {
            for mut accepted in net.accepted.drain(..) {
                self.deregister(&mut accepted.stream);
            }
            net.state = NetState::empty();
            net.attempt_started = None;
        }
        req.modes.remove(Modes::LISTENING);
        Outcome::Done
    }

    /// Drop a pending LOOKUP's ticket.
    fn cancel(&mut self, req: &mut Request) {
        if let Some(ticket) = req.payload.net_mut().and_then(|n| n.lookup_ticket.take()) {
            log::debug!("[NET] lookup ticket {} cancelled", ticket);
            self.resolver.cancel(ticket);
        }
    }

    fn lookup(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let Some(net) = req.payload.net_mut() else {
            return req.fail(DeviceError::NoHandle);
        };
        if let Some(ticket) = net.lookup_ticket {
            if self.resolver.is_inflight(ticket) {
                return Outcome::Pend;
            }
            net.lookup_ticket = None;
        }
        let Some(host) = net.host_name.clone() else {
            return req.fail(DeviceError::InvalidSpec);
        };
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            net.remote_ip = ip;
            net.host_info = Some(HostInfo {
                name: None,
                addrs: vec![ip],
            });
            return Outcome::Done;
        }
        if let Some(ticket) = self.resolver.submit(Query::Forward(host.clone())) {
            net.lookup_ticket = Some(ticket);
            return Outcome::Pend;
        }
        // No resolver workers configured: resolve on this thread.
        match resolve_v4(&host) {
            Ok(addrs) => {
                net.remote_ip = addrs[0];
                net.host_info = Some(HostInfo { name: None, addrs });
                Outcome::Done
            }
            Err(e) => {
                log::debug!("[NET] lookup {} failed: {}", host, e);
                req.fail_io(DeviceError::CannotOpen, &e)
            }
        }
    }

    fn connect(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
        let state = req.payload.net().map(|n| n.state).unwrap_or_default();
        if state.contains(NetState::CONNECT) {
            return Outcome::Done;
        }
        if state.intersects(NetState::ATTEMPT | NetState::LISTEN) {
            return Outcome::Pend;
        }
        let Requestee::Socket(_) = &req.requestee else {
            return req.fail(DeviceError::NotOpen);
        };
        let Requestee::Socket(socket) = std::mem::take(&mut req.requestee) else {
            return req.fail(DeviceError::NotOpen);
        };
        if req.modes.contains(Modes::UDP) {
            self.bind_udp(req, socket, ctx)
        } else if req.modes.contains(Modes::LISTEN) {
            self.listen_tcp(req, socket, ctx)
        } else {
            self.connect_tcp(req, socket, ctx)
        }
    }

    fn listen_tcp(
        &mut self,
        req: &mut Request,
        socket: Socket,
        ctx: &mut DeviceCtx<'_>,
    ) -> Outcome {
        let Some(net) = req.payload.net_mut() else {
            return req.fail(DeviceError::NoHandle);
        };
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, net.local_port);
        let bound = socket
            .set_reuse_address(true)
            .and_then(|_| socket.bind(&SockAddr::from(addr)))
            .and_then(|_| socket.listen(ctx.config().listen_backlog));
        if let Err(e) = bound {
            log::debug!("[NET] listen on {} failed: {}", addr, e);
            req.requestee = Requestee::Socket(socket);
            return req.fail_io(DeviceError::NoConnect, &e);
        }
        let mut listener = mio::net::TcpListener::from_std(socket.into());
        self.register(&mut listener);
        if let Ok(local) = listener.local_addr() {
            let local = v4(local);
            net.local_ip = *local.ip();
            net.local_port = local.port();
        }
        net.state |= NetState::BIND | NetState::LISTEN;
        log::debug!("[NET] listening on port {}", net.local_port);
        req.modes.insert(Modes::LISTENING);
        req.requestee = Requestee::Listener(listener);
        Outcome::Pend
    }

    fn connect_tcp(
        &mut self,
        req: &mut Request,
        socket: Socket,
        ctx: &mut DeviceCtx<'_>,
    ) -> Outcome {
        let Some(net) = req.payload.net_mut() else {
            return req.fail(DeviceError::NoHandle);
        };
        let remote = net.remote_addr();
        if remote.ip().is_unspecified() || remote.port() == 0 {
            req.requestee = Requestee::Socket(socket);
            return req.fail(DeviceError::InvalidSpec);
        }
        let pending = match socket.connect(&SockAddr::from(remote)) {
            Ok(()) => false,
            Err(e) if connect_in_progress(&e) => true,
            Err(e) => {
                log::debug!("[NET] connect to {} failed: {}", remote, e);
                req.requestee = Requestee::Socket(socket);
                return req.fail_io(DeviceError::NoConnect, &e);
            }
        };
        let mut stream = mio::net::TcpStream::from_std(socket.into());
        self.register(&mut stream);
        if let Ok(local) = stream.local_addr() {
            let local = v4(local);
            net.local_ip = *local.ip();
            net.local_port = local.port();
        }
        req.requestee = Requestee::Stream(stream);
        if pending {
            net.state |= NetState::ATTEMPT;
            net.attempt_started = Some(Instant::now());
            return Outcome::Pend;
        }
        net.state |= NetState::CONNECT;
        log::debug!("[NET] connected to {}", remote);
        ctx.signal(req, EventType::Connect);
        Outcome::Done
    }

    fn bind_udp(&mut self, req: &mut Request, socket: Socket, ctx: &mut DeviceCtx<'_>) -> Outcome {
        let listen = req.modes.contains(Modes::LISTEN);
        let Some(net) = req.payload.net_mut() else {
            return req.fail(DeviceError::NoHandle);
        };
        let port = if listen { net.local_port } else { 0 };
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        if let Err(e) = socket.bind(&SockAddr::from(addr)) {
            log::debug!("[NET] udp bind {} failed: {}", addr, e);
            req.requestee = Requestee::Socket(socket);
            return req.fail_io(DeviceError::NoConnect, &e);
        }
        let mut udp = mio::net::UdpSocket::from_std(socket.into());
        self.register(&mut udp);
        if let Ok(local) = udp.local_addr() {
            let local = v4(local);
            net.local_ip = *local.ip();
            net.local_port = local.port();
        }
        net.state |= NetState::BIND | NetState::CONNECT;
        req.requestee = Requestee::Datagram(udp);
        ctx.signal(req, EventType::Connect);
        Outcome::Done
    }

    fn read(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
        req.actual = 0;
        if req.length == 0 {
            return Outcome::Done;
        }
        let start = req.data.len();
        match &mut req.requestee {
            Requestee::Stream(stream) => {
                let connected = req
                    .payload
                    .net()
                    .is_some_and(|n| n.state.contains(NetState::CONNECT));
                if !connected {
                    return req.fail(DeviceError::NotConnected);
                }
                req.data.resize(start + req.length, 0);
                let result = stream.read(&mut req.data[start..]);
                self.finish_tcp_read(req, start, result, ctx)
            }
            Requestee::Datagram(socket) => {
                req.data.resize(start + req.length, 0);
                match socket.recv_from(&mut req.data[start..]) {
                    Ok((n, from)) => {
                        req.data.truncate(start + n);
                        req.actual = n;
                        if let Some(net) = req.payload.net_mut() {
                            let from = v4(from);
                            net.remote_ip = *from.ip();
                            net.remote_port = from.port();
                            net.state.remove(NetState::RECEIVE);
                        }
                        ctx.signal(req, EventType::Read);
                        Outcome::Done
                    }
                    Err(e) => {
                        req.data.truncate(start);
                        self.read_error(req, e)
                    }
                }
            }
            Requestee::Socket(_) | Requestee::Listener(_) => req.fail(DeviceError::NotConnected),
            _ => req.fail(DeviceError::NotOpen),
        }
    }

    fn finish_tcp_read(
        &mut self,
        req: &mut Request,
        start: usize,
        result: io::Result<usize>,
        ctx: &mut DeviceCtx<'_>,
    ) -> Outcome {
        match result {
            Ok(0) => {
                req.data.truncate(start);
                if let Some(net) = req.payload.net_mut() {
                    net.state.remove(NetState::CONNECT | NetState::RECEIVE);
                }
                log::debug!("[NET] peer closed {}", req.id());
                ctx.signal(req, EventType::Close);
                Outcome::Done
            }
            Ok(n) => {
                req.data.truncate(start + n);
                req.actual = n;
                if let Some(net) = req.payload.net_mut() {
                    net.state.remove(NetState::RECEIVE);
                }
                ctx.signal(req, EventType::Read);
                Outcome::Done
            }
            Err(e) => {
                req.data.truncate(start);
                self.read_error(req, e)
            }
        }
    }

    fn read_error(&mut self, req: &mut Request, e: io::Error) -> Outcome {
        if would_block(&e) {
            if let Some(net) = req.payload.net_mut() {
                net.state.insert(NetState::RECEIVE);
            }
            return Outcome::Pend;
        }
        log::debug!("[NET] read failed on {}: {}", req.id(), e);
        req.fail_io(DeviceError::ReadError, &e)
    }

    fn write(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
        let end = req.length.min(req.data.len());
        if end == 0 || req.actual >= end {
            req.actual = req.actual.min(end);
            return Outcome::Done;
        }
        let result = match &mut req.requestee {
            Requestee::Stream(stream) => {
                let connected = req
                    .payload
                    .net()
                    .is_some_and(|n| n.state.contains(NetState::CONNECT));
                if !connected {
                    return req.fail(DeviceError::NotConnected);
                }
                stream.write(&req.data[req.actual..end])
            }
            Requestee::Datagram(socket) => {
                let Some(remote) = req.payload.net().map(|n| n.remote_addr()) else {
                    return req.fail(DeviceError::NoHandle);
                };
                if remote.port() == 0 {
                    return req.fail(DeviceError::NotConnected);
                }
                socket.send_to(&req.data[req.actual..end], SocketAddr::V4(remote))
            }
            Requestee::Socket(_) | Requestee::Listener(_) => {
                return req.fail(DeviceError::NotConnected)
            }
            _ => return req.fail(DeviceError::NotOpen),
        };
        match result {
            Ok(n) => {
                req.actual += n;
                if req.actual < end {
                    if n > 0 {
                        req.flags.insert(ReqFlags::ACTIVE);
                    }
                    if let Some(net) = req.payload.net_mut() {
                        net.state.insert(NetState::SEND);
                    }
                    return Outcome::Pend;
                }
                if let Some(net) = req.payload.net_mut() {
                    net.state.remove(NetState::SEND);
                }
                ctx.signal(req, EventType::Wrote);
                Outcome::Done
            }
            Err(e) if would_block(&e) => {
                if let Some(net) = req.payload.net_mut() {
                    net.state.insert(NetState::SEND);
                }
                Outcome::Pend
            }
            Err(e) => {
                log::debug!("[NET] write failed on {}: {}", req.id(), e);
                req.fail_io(DeviceError::WriteError, &e)
            }
        }
    }

    /// Refresh local/remote endpoints from the OS.
    fn query(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let (local, remote) = match &req.requestee {
            Requestee::Stream(s) => (s.local_addr().ok(), s.peer_addr().ok()),
            Requestee::Listener(l) => (l.local_addr().ok(), None),
            Requestee::Datagram(d) => (d.local_addr().ok(), None),
            Requestee::Socket(s) => (s.local_addr().ok().and_then(|a| a.as_socket()), None),
            _ => return req.fail(DeviceError::NotOpen),
        };
        let Some(net) = req.payload.net_mut() else {
            return req.fail(DeviceError::NoHandle);
        };
        if let Some(local) = local.map(v4) {
            net.local_ip = *local.ip();
            net.local_port = local.port();
        }
        if let Some(remote) = remote.map(v4) {
            net.remote_ip = *remote.ip();
            net.remote_port = remote.port();
        }
        Outcome::Done
    }

    fn modify(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let Some(change) = req.payload.net_mut().and_then(|n| n.modify.take()) else {
            return req.fail(DeviceError::NoModes);
        };
        if !req.requestee.is_some() {
            return req.fail(DeviceError::NotOpen);
        }
        match apply_modify(&req.requestee, change) {
            Some(Ok(())) => {
                log::debug!("[NET] applied {:?}", change);
                Outcome::Done
            }
            Some(Err(e)) => req.fail_io(DeviceError::NoModes, &e),
            None => req.fail(DeviceError::NoModes),
        }
    }

    // ------------------------------------------------------------------------
    // Poll
    // ------------------------------------------------------------------------

    fn poll(&mut self, ctx: &mut PollCtx<'_>) -> bool {
        self.resolver.collect();
        let lookup_timeout = ctx.config().dns_timeout;
        let mut changed = false;
        for id in ctx.pending() {
            let step = {
                let Some((req, mut dctx)) = ctx.split(id) else {
                    continue;
                };
                let state = req.payload.net().map(|n| n.state).unwrap_or_default();
                if req.command == Command::Lookup {
                    self.check_lookup(req, lookup_timeout, &mut dctx)
                } else if state.contains(NetState::LISTEN) {
                    self.accept_all(req, &mut dctx)
                } else if state.contains(NetState::ATTEMPT) {
                    self.check_connect(req, &mut dctx)
                } else {
                    req.flags.remove(ReqFlags::ACTIVE);
                    let outcome = match req.command {
                        Command::Read => self.read(req, &mut dctx),
                        Command::Write => self.write(req, &mut dctx),
                        _ => Outcome::Pend,
                    };
                    match outcome {
                        Outcome::Done => Step::Complete,
                        Outcome::Pend => Step::Keep {
                            changed: req.flags.contains(ReqFlags::ACTIVE),
                        },
                        Outcome::Error => Step::Fail(
                            req.error.unwrap_or(DeviceError::ReadError),
                            req.os_error,
                        ),
                    }
                }
            };
            match step {
                Step::Keep { changed: c } => changed |= c,
                Step::Complete => {
                    ctx.complete(id);
                    changed = true;
                }
                Step::Fail(code, os_error) => {
                    ctx.fail(id, code, os_error);
                    changed = true;
                }
            }
        }
        changed
    }

    fn accept_all(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Step {
        let mut accepted = Vec::new();
        if let Requestee::Listener(listener) = &req.requestee {
            loop {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        let local = stream
                            .local_addr()
                            .map(v4)
                            .unwrap_or_else(|_| SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
                        accepted.push(AcceptedSocket {
                            stream,
                            local,
                            remote: v4(peer),
                        });
                    }
                    Err(e) if would_block(&e) => break,
                    Err(e) => {
                        log::debug!("[NET] accept failed: {}", e);
                        break;
                    }
                }
            }
        }
        if accepted.is_empty() {
            return Step::Keep { changed: false };
        }
        for socket in &mut accepted {
            self.register(&mut socket.stream);
            log::debug!("[NET] accepted {}", socket.remote);
        }
        let count = accepted.len();
        if let Some(net) = req.payload.net_mut() {
            net.accepted.extend(accepted);
            net.state.insert(NetState::ACCEPT);
        }
        for _ in 0..count {
            ctx.signal(req, EventType::Accept);
        }
        Step::Keep { changed: true }
    }

    fn check_lookup(
        &mut self,
        req: &mut Request,
        default_timeout: std::time::Duration,
        ctx: &mut DeviceCtx<'_>,
    ) -> Step {
        let limit = req.timeout.unwrap_or(default_timeout);
        let Some(net) = req.payload.net_mut() else {
            return Step::Fail(DeviceError::NoHandle, None);
        };
        let Some(ticket) = net.lookup_ticket else {
            return Step::Fail(DeviceError::CannotOpen, None);
        };
        match self.resolver.ticket(ticket) {
            Ticket::Ready(Some(info)) if !info.addrs.is_empty() => {
                net.lookup_ticket = None;
                net.remote_ip = info.addrs[0];
                log::debug!("[NET] {:?} resolved to {}", info.name, net.remote_ip);
                net.host_info = Some(info);
                ctx.signal(req, EventType::Open);
                Step::Complete
            }
            Ticket::Ready(_) => {
                net.lookup_ticket = None;
                log::debug!("[NET] lookup {:?} found nothing", net.host_name);
                Step::Fail(DeviceError::CannotOpen, None)
            }
            Ticket::Waiting(started) => {
                if started.elapsed() < limit {
                    return Step::Keep { changed: false };
                }
                log::debug!("[NET] lookup ticket {} timed out after {:?}", ticket, limit);
                self.resolver.cancel(ticket);
                net.lookup_ticket = None;
                Step::Fail(DeviceError::CannotOpen, None)
            }
            Ticket::Unknown => {
                net.lookup_ticket = None;
                Step::Fail(DeviceError::CannotOpen, None)
            }
        }
    }

    fn check_connect(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Step {
        let Requestee::Stream(stream) = &req.requestee else {
            return Step::Fail(DeviceError::NotOpen, None);
        };
        match stream.take_error() {
            Ok(Some(e)) | Err(e) => {
                log::debug!("[NET] connect failed: {}", e);
                return Step::Fail(DeviceError::NoConnect, e.raw_os_error());
            }
            Ok(None) => {}
        }
        match stream.peer_addr() {
            Ok(peer) => {
                if let Some(net) = req.payload.net_mut() {
                    net.state.remove(NetState::ATTEMPT);
                    net.state.insert(NetState::CONNECT);
                    net.attempt_started = None;
                }
                log::debug!("[NET] connected to {}", peer);
                ctx.signal(req, EventType::Connect);
                Step::Complete
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected || would_block(&e) => {
                let expired = match (req.timeout, req.payload.net().and_then(|n| n.attempt_started))
                {
                    (Some(limit), Some(started)) => started.elapsed() >= limit,
                    _ => false,
                };
                if expired {
                    log::debug!("[NET] connect timed out");
                    Step::Fail(DeviceError::NoConnect, None)
                } else {
                    Step::Keep { changed: false }
                }
            }
            Err(e) => Step::Fail(DeviceError::NoConnect, e.raw_os_error()),
        }
    }
}

impl Driver for NetDriver {
    const NAME: &'static str = "net";

    fn table() -> CommandTable<Self> {
        CommandTable::new()
            .with(Command::Init, Self::init)
            .with(Command::Quit, Self::quit)
            .with(Command::Open, Self::open)
            .with(Command::Close, Self::close)
            .with(Command::Read, Self::read)
            .with(Command::Write, Self::write)
            .with(Command::Connect, Self::connect)
            .with(Command::Query, Self::query)
            .with(Command::Modify, Self::modify)
            .with(Command::Lookup, Self::lookup)
            .with_poll(Self::poll)
            .with_cancel(Self::cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::device::DeviceId;
    use crate::event::EventQueue;
    use crate::request::{NetPayload, Payload};

    fn net_req(modes: Modes) -> Request {
        Request::new(DeviceId::Net)
            .with_payload(Payload::Net(NetPayload::default()))
            .with_modes(modes)
    }

    #[test]
    fn test_v4_mapping() {
        let a: SocketAddr = "127.0.0.1:80".parse().unwrap();
        assert_eq!(v4(a), "127.0.0.1:80".parse::<SocketAddrV4>().unwrap());
        let b: SocketAddr = "[::1]:81".parse().unwrap();
        assert_eq!(v4(b).port(), 81);
        assert!(v4(b).ip().is_unspecified());
    }

    #[test]
    fn test_resolve_literal_and_localhost() {
        assert_eq!(
            resolve_v4("10.1.2.3").unwrap(),
            vec![Ipv4Addr::new(10, 1, 2, 3)]
        );
        assert!(resolve_v4("localhost")
            .unwrap()
            .contains(&Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_open_close_reopen_listener() {
        let mut driver = NetDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default();
        let mut ctx = DeviceCtx::new(&mut events, &config);

        let mut req = net_req(Modes::LISTEN);
        assert_eq!(driver.open(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(driver.connect(&mut req, &mut ctx), Outcome::Pend);
        assert!(req.modes.contains(Modes::LISTENING));
        let port = req.payload.net().unwrap().local_port;
        assert_ne!(port, 0);

        assert_eq!(driver.close(&mut req, &mut ctx), Outcome::Done);
        assert!(!req.requestee.is_some());
        assert!(req.payload.net().unwrap().state.is_empty());

        assert_eq!(driver.open(&mut req, &mut ctx), Outcome::Done);
        req.payload.net_mut().unwrap().local_port = port;
        assert_eq!(driver.connect(&mut req, &mut ctx), Outcome::Pend);
        assert_eq!(driver.close(&mut req, &mut ctx), Outcome::Done);
    }

    #[test]
    fn test_zero_length_read_and_empty_write() {
        let mut driver = NetDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default();
        let mut ctx = DeviceCtx::new(&mut events, &config);

        let mut req = net_req(Modes::empty());
        assert_eq!(driver.read(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(req.actual, 0);
        assert_eq!(driver.write(&mut req, &mut ctx), Outcome::Done);
        drop(ctx);
        assert!(events.is_empty());
    }

    #[test]
    fn test_read_requires_connection() {
        let mut driver = NetDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default();
        let mut ctx = DeviceCtx::new(&mut events, &config);

        let mut req = net_req(Modes::empty());
        req.length = 16;
        assert_eq!(driver.read(&mut req, &mut ctx), Outcome::Error);
        assert_eq!(req.error, Some(DeviceError::NotOpen));

        assert_eq!(driver.open(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(driver.read(&mut req, &mut ctx), Outcome::Error);
        assert_eq!(req.error, Some(DeviceError::NotConnected));
    }

    #[test]
    fn test_connect_without_remote_is_invalid() {
        let mut driver = NetDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default();
        let mut ctx = DeviceCtx::new(&mut events, &config);

        let mut req = net_req(Modes::empty());
        assert_eq!(driver.open(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(driver.connect(&mut req, &mut ctx), Outcome::Error);
        assert_eq!(req.error, Some(DeviceError::InvalidSpec));
        // The socket stays allocated for a retry.
        assert!(matches!(req.requestee, Requestee::Socket(_)));
    }

    #[test]
    fn test_udp_modify_ttl() {
        let mut driver = NetDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default();
        let mut ctx = DeviceCtx::new(&mut events, &config);

        let mut req = net_req(Modes::UDP);
        assert_eq!(driver.open(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(driver.connect(&mut req, &mut ctx), Outcome::Done);
        req.payload.net_mut().unwrap().modify = Some(NetModify::SetTtl(7));
        assert_eq!(driver.modify(&mut req, &mut ctx), Outcome::Done);
        if let Requestee::Datagram(d) = &req.requestee {
            assert_eq!(d.ttl().unwrap(), 7);
        } else {
            panic!("expected a bound datagram socket");
        }
        assert_eq!(driver.modify(&mut req, &mut ctx), Outcome::Error);
        assert_eq!(req.error, Some(DeviceError::NoModes));
    }

    fn lookup_req(host: &str) -> Request {
        let mut req = net_req(Modes::empty());
        req.payload.net_mut().unwrap().host_name = Some(host.to_string());
        req.command = Command::Lookup;
        req
    }

    #[test]
    fn test_literal_lookup_is_inline() {
        let mut driver = NetDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default().with_dns_workers(1);
        let mut ctx = DeviceCtx::new(&mut events, &config);
        driver.init(&mut Request::new(DeviceId::Net), &mut ctx);

        let mut req = lookup_req("10.0.0.7");
        assert_eq!(driver.lookup(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(req.payload.net().unwrap().remote_ip, Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(driver.lookups_inflight(), 0);
        driver.quit(&mut Request::new(DeviceId::Net), &mut ctx);
    }

    #[test]
    fn test_name_lookup_pends_until_poll() {
        use crate::device::PendingQueue;
        use crate::request::RequestArena;
        use std::time::Duration;

        let mut driver = NetDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default().with_dns_workers(1);
        let mut arena = RequestArena::new();
        let mut queue = PendingQueue::new();
        {
            let mut ctx = DeviceCtx::new(&mut events, &config);
            driver.init(&mut Request::new(DeviceId::Net), &mut ctx);
        }

        let id = arena.insert(lookup_req("localhost"));
        {
            let req = arena.get_mut(id).unwrap();
            let mut ctx = DeviceCtx::new(&mut events, &config);
            assert_eq!(driver.lookup(req, &mut ctx), Outcome::Pend);
            queue.attach(req);
        }
        assert_eq!(driver.lookups_inflight(), 1);

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let mut pctx = PollCtx::new(&mut queue, &mut arena, &mut events, &config);
            if driver.poll(&mut pctx) {
                break;
            }
            assert!(Instant::now() < deadline, "lookup never completed");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(queue.is_empty());
        let req = arena.get(id).unwrap();
        assert!(!req.is_pending());
        let net = req.payload.net().unwrap();
        assert_eq!(net.remote_ip, Ipv4Addr::LOCALHOST);
        assert_eq!(net.lookup_ticket, None);
        assert_eq!(events.pop().map(|e| e.kind), Some(EventType::Open));
        assert_eq!(driver.lookups_inflight(), 0);

        let mut ctx = DeviceCtx::new(&mut events, &config);
        driver.quit(&mut Request::new(DeviceId::Net), &mut ctx);
    }

    #[test]
    fn test_close_drops_lookup_ticket() {
        let mut driver = NetDriver::new(None);
        let mut events = EventQueue::new(8);
        let config = HostConfig::default().with_dns_workers(1);
        let mut ctx = DeviceCtx::new(&mut events, &config);
        driver.init(&mut Request::new(DeviceId::Net), &mut ctx);

        let mut req = lookup_req("localhost");
        assert_eq!(driver.open(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(driver.lookup(&mut req, &mut ctx), Outcome::Pend);
        assert_eq!(driver.lookups_inflight(), 1);
        assert_eq!(driver.close(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(driver.lookups_inflight(), 0);
        assert_eq!(req.payload.net().unwrap().lookup_ticket, None);
        driver.quit(&mut Request::new(DeviceId::Net), &mut ctx);
    }
}
