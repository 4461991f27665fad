// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP/UDP port actor.
//!
//! The actor keeps one NET request alive for the life of the port. Reads
//! lend the port-data buffer to the request (READ appends at its tail) and
//! take it back on completion; writes swap the buffer out for the outgoing
//! bytes and reissue a pending read once the WROTE arrives.
//!
//! ```text
//!   open ──OPEN──> [LOOKUP] ──CONNECT──┬─ DONE ─> connected
//!                     │                └─ PEND ─> listening / connecting
//!                     │ PEND: OPEN event             │ CONNECT event
//!                     └──> CONNECT                   v
//!   read  ──READ (buffer lent)──> READ event  ──> buffer reclaimed
//!   write ──WRITE (bytes lent)──> WROTE event ──> queued write / read
//! ```
//!
//! Events can be lost when the host queue is full. Before each dispatch the
//! actor compares its flags against the request itself and finishes any
//! transfer whose request is no longer pending.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::device::DeviceId;
use crate::error::{DeviceError, PortError, Result};
use crate::event::{Event, EventType, Eventee};
use crate::host::Host;
use crate::request::{
    Command, Modes, NetModify, NetPayload, NetState, Outcome, Payload, ReqId, Requestee,
};

use super::{PortActor, PortId, PortUrl, Scheme};

/// Snapshot of a net port's endpoints and state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetInfo {
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
    pub state: NetState,
}

/// Actor for `tcp://` and `udp://` ports.
#[derive(Debug)]
pub struct NetPort {
    id: PortId,
    url: PortUrl,
    req: Option<ReqId>,
    /// Port data accumulated by reads
    buffer: Vec<u8>,
    /// `buffer` currently lives in the request's data
    lent: bool,
    /// A read was asked for and has not produced data yet
    want_read: bool,
    /// A WRITE is outstanding
    writing: bool,
    /// A LOOKUP is pending; CONNECT follows its OPEN event
    resolving: bool,
    /// Bytes to send once connected or once the current write completes
    pending_write: Vec<u8>,
    connected: bool,
    peer_closed: bool,
    /// ACCEPT events not yet picked
    accepts: usize,
    buf_size: usize,
}

impl NetPort {
    /// Open a port from a `tcp://` or `udp://` URL.
    pub fn open(host: &mut Host, url: &str) -> Result<Self> {
        Self::open_url(host, PortUrl::parse(url)?)
    }

    pub fn open_url(host: &mut Host, url: PortUrl) -> Result<Self> {
        let udp = match url.scheme {
            Scheme::Tcp => false,
            Scheme::Udp => true,
            Scheme::Dns => return Err(PortError::InvalidUrl(url.to_string())),
        };
        let listen = url.is_listen();
        let mut modes = Modes::empty();
        if udp {
            modes |= Modes::UDP;
        }
        if listen {
            modes |= Modes::LISTEN;
        }

        let mut net = NetPayload::default();
        let port = url.port.unwrap_or(0);
        if listen {
            net.local_port = port;
        } else {
            net.remote_port = port;
            if let Some(name) = &url.host {
                match name.parse::<Ipv4Addr>() {
                    Ok(ip) => net.remote_ip = ip,
                    Err(_) => net.host_name = Some(name.clone()),
                }
            }
        }
        let needs_lookup = net.host_name.is_some();

        let id = host.next_port_id();
        let req = host.alloc_request(DeviceId::Net, Payload::Net(net), modes);
        let mut port = Self {
            id,
            url,
            req: Some(req),
            buffer: Vec::new(),
            lent: false,
            want_read: false,
            writing: false,
            resolving: false,
            pending_write: Vec::new(),
            connected: false,
            peer_closed: false,
            accepts: 0,
            buf_size: host.config().net_buf_size.max(2),
        };

        match port.establish(host, needs_lookup) {
            Ok(()) => {
                log::debug!("[NET] port {} open on {}", port.id, port.url);
                Ok(port)
            }
            Err(e) => {
                let _ = port.close(host);
                Err(e)
            }
        }
    }

    fn establish(&mut self, host: &mut Host, needs_lookup: bool) -> Result<()> {
        self.command(host, Command::Open)?;
        if needs_lookup && self.command(host, Command::Lookup)? == Outcome::Pend {
            self.resolving = true;
            return Ok(());
        }
        self.connect(host)
    }

    fn connect(&mut self, host: &mut Host) -> Result<()> {
        if self.command(host, Command::Connect)? == Outcome::Done {
            self.connected = true;
            self.after_write(host)?;
        }
        Ok(())
    }

    /// The name lookup finished; move on to CONNECT.
    fn resolved(&mut self, host: &mut Host) -> Result<()> {
        self.resolving = false;
        let id = self.live()?;
        while host.events_mut().retract(id, EventType::Open) {}
        log::debug!("[NET] port {} resolved {}", self.id, self.url);
        self.connect(host)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn url(&self) -> &PortUrl {
        &self.url
    }

    pub fn request_id(&self) -> Option<ReqId> {
        self.req
    }

    pub fn is_open(&self) -> bool {
        self.req.is_some()
    }

    /// Connected (TCP) or bound (UDP).
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// TCP listener waiting for connections.
    pub fn is_listening(&self) -> bool {
        self.req.is_some() && self.url.scheme == Scheme::Tcp && self.url.is_listen()
    }

    /// The remote side closed a TCP stream.
    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Connections accepted and not yet picked.
    pub fn accepted_count(&self) -> usize {
        self.accepts
    }

    /// The host name is still being resolved.
    pub fn is_resolving(&self) -> bool {
        self.resolving
    }

    /// A read is outstanding.
    pub fn is_reading(&self) -> bool {
        self.want_read
    }

    /// A write (or queued output) has not been fully sent.
    pub fn is_writing(&self) -> bool {
        self.writing || !self.pending_write.is_empty()
    }

    /// Port data received so far.
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Take the received data, leaving the port buffer empty.
    pub fn take_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    /// Ask for more data; it is appended to [`NetPort::data`] when it arrives.
    pub fn read(&mut self, host: &mut Host) -> Result<()> {
        self.live()?;
        if self.is_listening() {
            return Err(self.fault(DeviceError::NotConnected));
        }
        self.catch_up(host)?;
        self.want_read = true;
        if self.lent || self.writing || !self.connected {
            // Issued on CONNECT / WROTE, or already in flight.
            return Ok(());
        }
        self.issue_read(host)
    }

    /// Send `bytes`; queued until the port is connected.
    pub fn write(&mut self, host: &mut Host, bytes: &[u8]) -> Result<()> {
        self.live()?;
        if bytes.is_empty() {
            return Ok(());
        }
        if self.is_listening() || self.peer_closed {
            return Err(self.fault(DeviceError::NotConnected));
        }
        self.catch_up(host)?;
        if !self.connected || self.writing {
            self.pending_write.extend_from_slice(bytes);
            return Ok(());
        }
        self.issue_write(host, bytes.to_vec())
    }

    fn issue_read(&mut self, host: &mut Host) -> Result<()> {
        let id = self.live()?;
        let half = self.buf_size / 2;
        self.buffer.reserve(half);
        let room = (self.buffer.capacity() - self.buffer.len()).max(half);
        let req = host.request_mut(id).ok_or(PortError::NoRequest(self.id))?;
        req.data = std::mem::take(&mut self.buffer);
        req.length = room;
        req.actual = 0;
        self.lent = true;

        match self.command(host, Command::Read) {
            Ok(Outcome::Done) => {
                // Completed inline; a queued READ would be mistaken for a later read.
                host.events_mut().retract(id, EventType::Read);
                self.reclaim(host);
                self.want_read = false;
                self.sync_state(host);
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => {
                self.reclaim(host);
                self.want_read = false;
                Err(e)
            }
        }
    }

    fn issue_write(&mut self, host: &mut Host, bytes: Vec<u8>) -> Result<()> {
        let id = self.live()?;
        // A pending read is superseded; it is reissued after the write.
        self.reclaim(host);
        let req = host.request_mut(id).ok_or(PortError::NoRequest(self.id))?;
        req.length = bytes.len();
        req.data = bytes;
        req.actual = 0;
        self.writing = true;

        match self.command(host, Command::Write) {
            Ok(Outcome::Done) => {
                host.events_mut().retract(id, EventType::Wrote);
                self.writing = false;
                self.after_write(host)
            }
            Ok(_) => Ok(()),
            Err(e) => {
                self.writing = false;
                Err(e)
            }
        }
    }

    fn after_write(&mut self, host: &mut Host) -> Result<()> {
        if !self.pending_write.is_empty() {
            let queued = std::mem::take(&mut self.pending_write);
            return self.issue_write(host, queued);
        }
        if self.want_read && !self.lent {
            return self.issue_read(host);
        }
        Ok(())
    }

    /// Take the lent buffer back from the request.
    fn reclaim(&mut self, host: &mut Host) {
        if !self.lent {
            return;
        }
        self.lent = false;
        if let Some(req) = self.req.and_then(|id| host.request_mut(id)) {
            self.buffer = std::mem::take(&mut req.data);
        }
    }

    /// Finish whatever the request completed without a delivered event.
    fn catch_up(&mut self, host: &mut Host) -> Result<()> {
        let Some(id) = self.req else {
            return Ok(());
        };
        let Some(req) = host.request(id) else {
            return Ok(());
        };
        if self.is_listening() {
            let waiting = req.payload.net().map_or(0, |n| n.accepted.len());
            if waiting != self.accepts {
                while host.events_mut().retract(id, EventType::Accept) {}
                self.accepts = waiting;
            }
            return Ok(());
        }
        let connecting = !self.connected && !self.peer_closed;
        if req.is_pending() || !(self.resolving || self.lent || self.writing || connecting) {
            return Ok(());
        }

        if req.error.is_some() {
            while host.events_mut().retract(id, EventType::Error) {}
            self.reclaim(host);
            self.resolving = false;
            self.writing = false;
            self.want_read = false;
            return Err(self.device_error(host, id));
        }
        if self.resolving {
            return self.resolved(host);
        }
        if self.lent {
            while host.events_mut().retract(id, EventType::Read) {}
            while host.events_mut().retract(id, EventType::Close) {}
            self.reclaim(host);
            self.want_read = false;
            self.sync_state(host);
        } else if self.writing {
            while host.events_mut().retract(id, EventType::Wrote) {}
            self.writing = false;
            self.after_write(host)?;
        } else if self.state(host).contains(NetState::CONNECT) {
            while host.events_mut().retract(id, EventType::Connect) {}
            log::debug!("[NET] port {} connected", self.id);
            self.connected = true;
            self.after_write(host)?;
        }
        Ok(())
    }

    /// The request has an operation outstanding on the device queue.
    fn in_flight(&self, host: &Host) -> bool {
        self.req
            .and_then(|id| host.request(id))
            .is_some_and(|r| r.is_pending())
    }

    /// Mirror a peer close recorded by the device.
    fn sync_state(&mut self, host: &Host) {
        if self.url.scheme == Scheme::Udp {
            return;
        }
        if self.connected && !self.state(host).contains(NetState::CONNECT) {
            self.connected = false;
            self.peer_closed = true;
        }
    }

    // ========================================================================
    // Listener
    // ========================================================================

    /// Take the `index`-th (1-based) accepted connection as a new port.
    pub fn pick(&mut self, host: &mut Host, index: usize) -> Result<Option<NetPort>> {
        let id = self.live()?;
        if !self.is_listening() || index == 0 {
            return Ok(None);
        }
        let req = host.request_mut(id).ok_or(PortError::NoRequest(self.id))?;
        let Some(net) = req.payload.net_mut() else {
            return Ok(None);
        };
        let Some(socket) = net.accepted.remove(index - 1) else {
            return Ok(None);
        };
        if net.accepted.is_empty() {
            net.state.remove(NetState::ACCEPT);
        }
        self.accepts = self.accepts.saturating_sub(1).min(net.accepted.len());

        let payload = NetPayload {
            local_ip: *socket.local.ip(),
            local_port: socket.local.port(),
            remote_ip: *socket.remote.ip(),
            remote_port: socket.remote.port(),
            state: NetState::OPEN | NetState::CONNECT,
            ..Default::default()
        };
        let child = host.alloc_request(DeviceId::Net, Payload::Net(payload), Modes::empty());
        if let Some(req) = host.request_mut(child) {
            req.requestee = Requestee::Stream(socket.stream);
        }
        let port = NetPort {
            id: host.next_port_id(),
            url: PortUrl {
                scheme: Scheme::Tcp,
                host: Some(socket.remote.ip().to_string()),
                port: Some(socket.remote.port()),
            },
            req: Some(child),
            buffer: Vec::new(),
            lent: false,
            want_read: false,
            writing: false,
            resolving: false,
            pending_write: Vec::new(),
            connected: true,
            peer_closed: false,
            accepts: 0,
            buf_size: self.buf_size,
        };
        log::debug!("[NET] port {} picked {} as port {}", self.id, socket.remote, port.id);
        Ok(Some(port))
    }

    // ========================================================================
    // Side commands
    // ========================================================================

    /// Refresh and return the port's endpoints.
    pub fn query(&mut self, host: &mut Host) -> Result<NetInfo> {
        self.side_command(host, Command::Query)?;
        let id = self.live()?;
        let net = host
            .request(id)
            .and_then(|r| r.payload.net())
            .ok_or(PortError::NoRequest(self.id))?;
        Ok(NetInfo {
            local: net.local_addr(),
            remote: net.remote_addr(),
            state: net.state,
        })
    }

    /// Join or leave an IPv4 multicast group (UDP).
    pub fn set_multicast(
        &mut self,
        host: &mut Host,
        group: Ipv4Addr,
        interface: Ipv4Addr,
        join: bool,
    ) -> Result<()> {
        let change = if join {
            NetModify::JoinMulticast { group, interface }
        } else {
            NetModify::LeaveMulticast { group, interface }
        };
        self.modify(host, change)
    }

    /// Set the unicast TTL.
    pub fn set_ttl(&mut self, host: &mut Host, ttl: u32) -> Result<()> {
        self.modify(host, NetModify::SetTtl(ttl))
    }

    /// Apply a socket option change.
    pub fn modify(&mut self, host: &mut Host, change: NetModify) -> Result<()> {
        let id = self.live()?;
        if let Some(net) = host.request_mut(id).and_then(|r| r.payload.net_mut()) {
            net.modify = Some(change);
        }
        self.side_command(host, Command::Modify)
    }

    /// Run a one-shot command on the port's request, then resume whatever
    /// transfer or wait it displaced.
    fn side_command(&mut self, host: &mut Host, command: Command) -> Result<()> {
        let id = self.live()?;
        self.reclaim(host);
        if self.writing {
            self.writing = false;
            if let Some(req) = host.request(id) {
                let mut unsent = req.unsent().to_vec();
                unsent.append(&mut self.pending_write);
                self.pending_write = unsent;
            }
        }

        let result = self.command(host, command).map(|_| ());

        let state = self.state(host);
        if self.resolving {
            // The side command took the LOOKUP off the queue; it picks up
            // the same resolver ticket.
            if self.command(host, Command::Lookup)? == Outcome::Done {
                self.resolved(host)?;
            }
        } else if state.intersects(NetState::ATTEMPT | NetState::LISTEN)
            && !state.contains(NetState::CONNECT)
        {
            self.command(host, Command::Connect)?;
        } else if self.connected {
            self.after_write(host)?;
        }
        result
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Close the socket and release the request. Idempotent.
    pub fn close(&mut self, host: &mut Host) -> Result<()> {
        let Some(id) = self.req else {
            return Ok(());
        };
        self.reclaim(host);
        let failure = match host.do_command(id, Command::Close) {
            Outcome::Error => {
                host.events_mut().retract(id, EventType::Error);
                Some(self.device_error(host, id))
            }
            _ => None,
        };
        host.free_request(id);
        self.req = None;
        self.connected = false;
        self.resolving = false;
        self.want_read = false;
        self.writing = false;
        self.pending_write.clear();
        self.accepts = 0;
        log::debug!("[NET] port {} closed", self.id);
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn live(&self) -> Result<ReqId> {
        self.req.ok_or(PortError::NotOpen(self.id))
    }

    fn state(&self, host: &Host) -> NetState {
        self.req
            .and_then(|id| host.request(id))
            .and_then(|r| r.payload.net())
            .map(|n| n.state)
            .unwrap_or_default()
    }

    /// Run `command`; a failure is returned directly instead of as an event.
    fn command(&mut self, host: &mut Host, command: Command) -> Result<Outcome> {
        let id = self.live()?;
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
            .map(|r| (r.error.unwrap_or(DeviceError::NotOpen), r.os_error))
            .unwrap_or((DeviceError::NotOpen, None));
        PortError::Device {
            device: DeviceId::Net,
            port: self.id,
            code,
            os_error,
        }
    }

    fn fault(&self, code: DeviceError) -> PortError {
        PortError::Device {
            device: DeviceId::Net,
            port: self.id,
            code,
            os_error: None,
        }
    }
}

impl PortActor for NetPort {
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
        self.catch_up(host)
    }

    fn update(&mut self, host: &mut Host, event: &Event) -> Result<()> {
        match event.kind {
            EventType::Open => {
                if self.resolving && !self.in_flight(host) {
                    self.resolved(host)?;
                }
            }
            EventType::Read => {
                // Stale when a newer READ is already back on the queue.
                if !self.in_flight(host) {
                    self.reclaim(host);
                    self.want_read = false;
                }
            }
            EventType::Wrote => {
                if self.writing && !self.in_flight(host) {
                    self.writing = false;
                    self.after_write(host)?;
                }
            }
            EventType::Connect => {
                if !self.connected {
                    log::debug!("[NET] port {} connected", self.id);
                }
                self.connected = true;
                if !self.writing {
                    self.after_write(host)?;
                }
            }
            EventType::Accept => {
                self.accepts = self
                    .req
                    .and_then(|id| host.request(id))
                    .and_then(|r| r.payload.net())
                    .map_or(self.accepts + 1, |n| n.accepted.len());
            }
            EventType::Close => {
                self.reclaim(host);
                self.connected = false;
                self.peer_closed = true;
                self.want_read = false;
            }
            EventType::Error => {
                self.reclaim(host);
                self.writing = false;
                self.want_read = false;
                let id = self.live()?;
                return Err(self.device_error(host, id));
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::device::net::NetDriver;
    use std::time::Duration;

    fn net_host() -> Host {
        let mut host = Host::empty(HostConfig::default());
        host.register(DeviceId::Net, NetDriver::new(None));
        host
    }

    #[test]
    fn test_rejects_dns_url() {
        let mut host = net_host();
        assert!(matches!(
            NetPort::open(&mut host, "dns://localhost"),
            Err(PortError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_connect_refused_frees_request() {
        let mut host = net_host();
        // Grab a free port, then close it so nothing listens there.
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = spare.local_addr().unwrap().port();
        drop(spare);

        let url = format!("tcp://127.0.0.1:{}", port);
        match NetPort::open(&mut host, &url) {
            Err(PortError::Device { code, .. }) => assert_eq!(code, DeviceError::NoConnect),
            Err(other) => panic!("unexpected error {}", other),
            Ok(mut client) => {
                // Non-blocking connect: the refusal arrives as an ERROR event.
                let result =
                    host.wait_for(&mut client, Duration::from_secs(5), |c| c.is_connected());
                assert!(matches!(
                    result,
                    Err(PortError::Device {
                        code: DeviceError::NoConnect,
                        ..
                    })
                ));
                client.close(&mut host).unwrap();
            }
        }
        assert!(host.events().is_empty());
    }

    #[test]
    fn test_write_queued_until_connected() {
        let mut host = net_host();
        let server = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = server.local_addr().unwrap().port();

        let mut client = NetPort::open(&mut host, &format!("tcp://127.0.0.1:{}", port)).unwrap();
        client.write(&mut host, b"ping").unwrap();
        let (mut peer, _) = server.accept().unwrap();

        let sent = host
            .wait_for(&mut client, Duration::from_secs(5), |c| {
                c.is_connected() && !c.is_writing()
            })
            .unwrap();
        assert!(sent);

        let mut got = [0u8; 4];
        std::io::Read::read_exact(&mut peer, &mut got).unwrap();
        assert_eq!(&got, b"ping");
        client.close(&mut host).unwrap();
        assert!(!client.is_open());
        client.close(&mut host).unwrap();
    }

    #[test]
    fn test_listener_cannot_read_or_write() {
        let mut host = net_host();
        let mut listener = NetPort::open(&mut host, "tcp://:0").unwrap();
        assert!(listener.is_listening());
        assert!(listener.read(&mut host).is_err());
        assert!(listener.write(&mut host, b"x").is_err());
        assert!(listener.pick(&mut host, 1).unwrap().is_none());

        let info = listener.query(&mut host).unwrap();
        assert_ne!(info.local.port(), 0);
        assert!(info.state.contains(NetState::LISTEN));
        // Query must not have dropped the listener from the poll set.
        let id = listener.request_id().unwrap();
        assert!(host.request(id).unwrap().is_pending());
        listener.close(&mut host).unwrap();
    }

    #[test]
    fn test_connect_and_wrote_events_lost_to_full_queue() {
        let mut host = Host::empty(HostConfig::default().with_event_queue_capacity(1));
        host.register(DeviceId::Net, NetDriver::new(None));
        let filler = host.next_port_id();
        assert!(host.post_port_event(filler, EventType::Port));

        let server = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = server.local_addr().unwrap().port();
        let mut client = NetPort::open(&mut host, &format!("tcp://127.0.0.1:{}", port)).unwrap();
        client.write(&mut host, b"ping").unwrap();
        let (mut peer, _) = server.accept().unwrap();

        let sent = host
            .wait_for(&mut client, Duration::from_secs(5), |c| {
                c.is_connected() && !c.is_writing()
            })
            .unwrap();
        assert!(sent);
        let mut got = [0u8; 4];
        std::io::Read::read_exact(&mut peer, &mut got).unwrap();
        assert_eq!(&got, b"ping");
        assert_eq!(host.events().len(), 1);
        client.close(&mut host).unwrap();
    }

    #[test]
    fn test_stale_read_event_keeps_new_read() {
        let mut host = net_host();
        let mut rx = NetPort::open(&mut host, "udp://:0").unwrap();
        let id = rx.request_id().unwrap();
        rx.read(&mut host).unwrap();

        // A READ event whose read was already replaced by a newer one.
        let stale = Event::device(host.request(id).unwrap(), EventType::Read);
        rx.update(&mut host, &stale).unwrap();
        assert!(rx.is_reading());
        assert!(host.request(id).unwrap().is_pending());
        rx.close(&mut host).unwrap();
    }

    #[test]
    fn test_close_reports_device_error() {
        let mut host = net_host();
        let mut port = NetPort::open(&mut host, "udp://:0").unwrap();
        assert!(host.unregister(DeviceId::Net));
        assert!(matches!(
            port.close(&mut host),
            Err(PortError::Device {
                code: DeviceError::NoDevice,
                ..
            })
        ));
        assert!(!port.is_open());
        assert!(port.close(&mut host).is_ok());
    }

    #[test]
    fn test_closed_port_reports_not_open() {
        let mut host = net_host();
        let mut port = NetPort::open(&mut host, "udp://:0").unwrap();
        port.close(&mut host).unwrap();
        assert!(matches!(port.read(&mut host), Err(PortError::NotOpen(_))));
        assert!(matches!(
            port.write(&mut host, b"x"),
            Err(PortError::NotOpen(_))
        ));
    }
}
