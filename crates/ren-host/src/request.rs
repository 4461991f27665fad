// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The request record: the unit of I/O between a port actor and a device.
//!
//! A [`Request`] carries a common header (device, command, flags, modes,
//! transfer sizes, error) plus a [`Payload`] variant per device kind. Requests
//! live in a [`RequestArena`] owned by the host; ports and device queues refer
//! to them by [`ReqId`].
//!
//! # Buffer convention
//!
//! `data` is the transfer buffer:
//!
//! - READ appends at most `length` bytes to the tail of `data` and records the
//!   count in `actual`.
//! - WRITE sends `data[actual..length]`, advancing `actual` on progress.

use std::collections::VecDeque;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

use bitflags::bitflags;

use crate::device::DeviceId;
use crate::error::DeviceError;

// ============================================================================
// Command and result codes
// ============================================================================

/// Device command codes (stable ordinals).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Initialize the device
    Init = 0,
    /// Tear the device down
    Quit = 1,
    /// Open a handle
    Open = 2,
    /// Close a handle
    Close = 3,
    /// Read into the request buffer
    Read = 4,
    /// Write from the request buffer
    Write = 5,
    /// Device poll (custom poll ops only)
    Poll = 6,
    /// Connect or listen
    Connect = 7,
    /// Query handle state
    Query = 8,
    /// Modify handle options
    Modify = 9,
    /// Create a target
    Create = 10,
    /// Delete a target
    Delete = 11,
    /// Rename a target
    Rename = 12,
    /// Resolve a name
    Lookup = 13,
}

impl Command {
    /// Size of every command table.
    pub const COUNT: usize = 14;

    /// All commands in ordinal order.
    pub const ALL: [Command; Command::COUNT] = [
        Command::Init,
        Command::Quit,
        Command::Open,
        Command::Close,
        Command::Read,
        Command::Write,
        Command::Poll,
        Command::Connect,
        Command::Query,
        Command::Modify,
        Command::Create,
        Command::Delete,
        Command::Rename,
        Command::Lookup,
    ];

    /// Table index of this command.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Command at a table index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Result of a device op.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Completed (0)
    Done,
    /// Queued, completion reported later (+1)
    Pend,
    /// Failed; `Request::error` holds the code (-1)
    Error,
}

impl Outcome {
    /// Wire value: DONE 0, PEND +1, ERROR -1.
    pub fn code(self) -> i32 {
        match self {
            Outcome::Done => 0,
            Outcome::Pend => 1,
            Outcome::Error => -1,
        }
    }

    /// Classify a raw op return value by sign.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Outcome::Done,
            c if c > 0 => Outcome::Pend,
            _ => Outcome::Error,
        }
    }
}

bitflags! {
    /// Request state flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ReqFlags: u32 {
        /// Linked in a device's pending queue
        const PENDING = 1 << 0;
        /// Made progress during the last poll
        const ACTIVE = 1 << 1;
        /// Completed by the device
        const DONE = 1 << 2;
        /// Heap request owned by a port (errors are also posted as events)
        const ALLOC = 1 << 3;
        /// Flush output after write
        const FLUSH = 1 << 4;
        /// Wide-character text hint
        const WIDE = 1 << 5;
    }
}

bitflags! {
    /// Request modes: open modes plus port-kind specific bits.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Modes: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const APPEND = 1 << 2;
        const SEEK = 1 << 3;
        const NEW = 1 << 4;
        const READONLY = 1 << 5;
        const TRUNCATE = 1 << 6;
        const RESEEK = 1 << 7;
        const DIR = 1 << 8;
        /// Discard stdio output
        const NULL = 1 << 9;
        /// Datagram socket
        const UDP = 1 << 10;
        /// Server socket (accepts or binds a known port)
        const LISTEN = 1 << 11;
        /// Reverse DNS lookup
        const REVERSE = 1 << 12;
        const CONNECT = 1 << 13;
        const BIND = 1 << 14;
        /// Listener is accepting
        const LISTENING = 1 << 15;
    }
}

bitflags! {
    /// Net request state machine bits.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NetState: u32 {
        /// Socket allocated
        const OPEN = 1 << 0;
        /// Connect in progress
        const ATTEMPT = 1 << 1;
        /// Connected (TCP) or bound (UDP)
        const CONNECT = 1 << 2;
        /// Bound to a local port
        const BIND = 1 << 3;
        /// Listening for connections
        const LISTEN = 1 << 4;
        /// Write in progress
        const SEND = 1 << 5;
        /// Read in progress
        const RECEIVE = 1 << 6;
        /// Accept queue non-empty
        const ACCEPT = 1 << 7;
    }
}

// ============================================================================
// Request ids and arena
// ============================================================================

/// Handle to a request in the host's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReqId {
    index: u32,
    generation: u32,
}

impl ReqId {
    /// Id of requests that never enter the arena (INIT/QUIT calls).
    pub const TRANSIENT: ReqId = ReqId {
        index: u32::MAX,
        generation: 0,
    };

    /// Slot index (stable while the request lives).
    pub fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Display for ReqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Generational slot arena of requests.
#[derive(Debug, Default)]
pub struct RequestArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    request: Option<Request>,
}

impl RequestArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a request; its `id` is assigned here.
    pub fn insert(&mut self, mut request: Request) -> ReqId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        let id = ReqId {
            index,
            generation: slot.generation,
        };
        request.id = id;
        slot.request = Some(request);
        id
    }

    /// Borrow a live request.
    pub fn get(&self, id: ReqId) -> Option<&Request> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.request.as_ref())
    }

    /// Mutably borrow a live request.
    pub fn get_mut(&mut self, id: ReqId) -> Option<&mut Request> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.request.as_mut())
    }

    /// Remove a request, freeing its slot.
    pub fn remove(&mut self, id: ReqId) -> Option<Request> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let request = slot.request.take()?;
        self.free.push(id.index);
        Some(request)
    }

    /// Whether `id` names a live request.
    pub fn contains(&self, id: ReqId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live requests.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.request.is_some()).count()
    }

    /// Whether no request is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over live requests.
    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.slots.iter().filter_map(|s| s.request.as_ref())
    }
}

// ============================================================================
// OS handles
// ============================================================================

/// The OS-side object a request operates on.
#[derive(Debug, Default)]
pub enum Requestee {
    /// Nothing allocated
    #[default]
    None,
    /// Integer id (resolver ticket, stdio channel)
    Id(u64),
    /// Open file (also serial lines)
    File(std::fs::File),
    /// Directory enumeration cursor
    Dir(std::fs::ReadDir),
    /// Unconnected socket allocated by OPEN
    Socket(socket2::Socket),
    /// Connected or connecting TCP stream
    Stream(mio::net::TcpStream),
    /// Listening TCP socket
    Listener(mio::net::TcpListener),
    /// Bound UDP socket
    Datagram(mio::net::UdpSocket),
}

impl Requestee {
    /// Whether an OS handle is held.
    pub fn is_some(&self) -> bool {
        !matches!(self, Requestee::None)
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Device-specific request payload.
#[derive(Debug, Default)]
pub enum Payload {
    /// Devices without extra fields (stdio, clipboard, event)
    #[default]
    None,
    /// File device
    File(FilePayload),
    /// Net and DNS devices
    Net(NetPayload),
    /// Serial device
    Serial(SerialPayload),
    /// Signal device
    Signal(SignalPayload),
}

macro_rules! payload_accessors {
    ($variant:ident, $ty:ty, $get:ident, $get_mut:ident) => {
        /// Borrow the payload if it is this variant.
        pub fn $get(&self) -> Option<&$ty> {
            match self {
                Payload::$variant(p) => Some(p),
                _ => None,
            }
        }

        /// Mutably borrow the payload if it is this variant.
        pub fn $get_mut(&mut self) -> Option<&mut $ty> {
            match self {
                Payload::$variant(p) => Some(p),
                _ => None,
            }
        }
    };
}

impl Payload {
    payload_accessors!(File, FilePayload, file, file_mut);
    payload_accessors!(Net, NetPayload, net, net_mut);
    payload_accessors!(Serial, SerialPayload, serial, serial_mut);
    payload_accessors!(Signal, SignalPayload, signal, signal_mut);
}

/// File device fields.
#[derive(Debug, Default)]
pub struct FilePayload {
    /// Target path
    pub path: PathBuf,
    /// Byte offset used by SEEK/RESEEK; advanced by transfers
    pub index: u64,
    /// Modification time (filled by OPEN/QUERY)
    pub time: Option<SystemTime>,
    /// Size in bytes (filled by OPEN/QUERY/WRITE)
    pub size: Option<u64>,
    /// Destination of RENAME
    pub new_path: Option<PathBuf>,
    /// Last directory entry returned by a directory READ
    pub entry: Option<DirEntryInfo>,
}

impl FilePayload {
    /// Payload for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// One directory entry produced by a directory READ.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// File name (no directory part)
    pub name: String,
    /// Entry is itself a directory
    pub is_dir: bool,
}

/// Resolver result scratch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostInfo {
    /// Canonical name (reverse lookups)
    pub name: Option<String>,
    /// IPv4 addresses (forward lookups)
    pub addrs: Vec<Ipv4Addr>,
}

/// Socket accepted by a listener, waiting for PICK.
#[derive(Debug)]
pub struct AcceptedSocket {
    /// The connected stream (already registered for readiness)
    pub stream: mio::net::TcpStream,
    /// Local endpoint
    pub local: SocketAddrV4,
    /// Peer endpoint
    pub remote: SocketAddrV4,
}

/// Typed socket option changes carried by a net MODIFY.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetModify {
    /// Join an IPv4 multicast group on an interface
    JoinMulticast {
        /// Group address
        group: Ipv4Addr,
        /// Interface address (`0.0.0.0` = any)
        interface: Ipv4Addr,
    },
    /// Leave an IPv4 multicast group
    LeaveMulticast {
        /// Group address
        group: Ipv4Addr,
        /// Interface address
        interface: Ipv4Addr,
    },
    /// Unicast TTL
    SetTtl(u32),
    /// Multicast TTL
    SetMulticastTtl(u32),
    /// SO_BROADCAST
    SetBroadcast(bool),
}

/// Net and DNS device fields.
#[derive(Debug)]
pub struct NetPayload {
    pub local_ip: Ipv4Addr,
    pub local_port: u16,
    pub remote_ip: Ipv4Addr,
    pub remote_port: u16,
    /// Host name to resolve (LOOKUP, forward DNS)
    pub host_name: Option<String>,
    /// Resolver result (DNS READ, LOOKUP)
    pub host_info: Option<HostInfo>,
    /// Connect/listen/transfer state machine
    pub state: NetState,
    /// Sockets accepted by a listener
    pub accepted: VecDeque<AcceptedSocket>,
    /// Option change applied by MODIFY
    pub modify: Option<NetModify>,
    /// When the current connect attempt started
    pub attempt_started: Option<Instant>,
    /// Resolver ticket of a pending LOOKUP
    pub lookup_ticket: Option<u64>,
}

impl Default for NetPayload {
    fn default() -> Self {
        Self {
            local_ip: Ipv4Addr::UNSPECIFIED,
            local_port: 0,
            remote_ip: Ipv4Addr::UNSPECIFIED,
            remote_port: 0,
            host_name: None,
            host_info: None,
            state: NetState::empty(),
            accepted: VecDeque::new(),
            modify: None,
            attempt_started: None,
            lookup_ticket: None,
        }
    }
}

impl NetPayload {
    /// Remote endpoint.
    pub fn remote_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.remote_ip, self.remote_port)
    }

    /// Local endpoint.
    pub fn local_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.local_ip, self.local_port)
    }
}

/// Serial parity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial flow control.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlowControl {
    #[default]
    None,
    Hardware,
    Software,
}

/// Serial device fields.
#[derive(Debug)]
pub struct SerialPayload {
    pub path: PathBuf,
    pub baud: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow: FlowControl,
    /// Line attributes before OPEN, restored by CLOSE
    pub prior_attr: Option<crate::device::serial::SavedAttr>,
}

impl SerialPayload {
    /// 8N1 line at `baud`, no flow control.
    pub fn new(path: impl Into<PathBuf>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            flow: FlowControl::None,
            prior_attr: None,
        }
    }
}

/// Signal device fields.
#[derive(Debug, Default)]
pub struct SignalPayload {
    /// Signals the request listens for
    pub mask: Vec<i32>,
    /// Previous dispositions, restored by CLOSE
    pub restore_mask: Vec<(i32, usize)>,
}

// ============================================================================
// Request
// ============================================================================

/// A single in-flight operation against a device.
#[derive(Debug)]
pub struct Request {
    pub(crate) id: ReqId,
    /// Target device
    pub device: DeviceId,
    /// Last command issued (re-run by the generic poller)
    pub command: Command,
    pub flags: ReqFlags,
    pub modes: Modes,
    /// Requested transfer size
    pub length: usize,
    /// Bytes actually transferred
    pub actual: usize,
    /// Set when the request failed
    pub error: Option<DeviceError>,
    /// Raw OS error behind `error`, if any
    pub os_error: Option<i32>,
    /// Per-request deadline hint
    pub timeout: Option<Duration>,
    /// Transfer buffer
    pub data: Vec<u8>,
    /// OS handle
    pub requestee: Requestee,
    pub payload: Payload,
}

impl Request {
    /// Blank request for `device`.
    pub fn new(device: DeviceId) -> Self {
        Self {
            id: ReqId::TRANSIENT,
            device,
            command: Command::Init,
            flags: ReqFlags::empty(),
            modes: Modes::empty(),
            length: 0,
            actual: 0,
            error: None,
            os_error: None,
            timeout: None,
            data: Vec::new(),
            requestee: Requestee::None,
            payload: Payload::None,
        }
    }

    /// Builder: attach a payload
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Builder: set modes
    pub fn with_modes(mut self, modes: Modes) -> Self {
        self.modes = modes;
        self
    }

    /// Arena id (TRANSIENT until inserted).
    pub fn id(&self) -> ReqId {
        self.id
    }

    /// Record a failure and return [`Outcome::Error`].
    pub fn fail(&mut self, code: DeviceError) -> Outcome {
        self.error = Some(code);
        Outcome::Error
    }

    /// Record a failure with its OS cause.
    pub fn fail_io(&mut self, code: DeviceError, err: &std::io::Error) -> Outcome {
        self.os_error = err.raw_os_error();
        self.fail(code)
    }

    /// Whether the request is linked in a pending queue.
    pub fn is_pending(&self) -> bool {
        self.flags.contains(ReqFlags::PENDING)
    }

    /// Whether the device marked the request complete.
    pub fn is_done(&self) -> bool {
        self.flags.contains(ReqFlags::DONE)
    }

    /// Prepare `data` for a READ of up to `length` bytes appended at the tail.
    ///
    /// Returns the offset where new bytes start; the caller truncates back
    /// to `offset + n` once the OS reports `n` bytes.
    pub(crate) fn read_window(&mut self) -> usize {
        let start = self.data.len();
        self.data.resize(start + self.length, 0);
        start
    }

    /// Pending part of a WRITE.
    pub(crate) fn unsent(&self) -> &[u8] {
        let end = self.length.min(self.data.len());
        let start = self.actual.min(end);
        &self.data[start..end]
    }
}
