// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Devices: table-driven drivers with per-device pending queues.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                      DeviceEntry                             |
//! |  +-------------------------+  +--------------------------+  |
//! |  | Bound<D: Driver>        |  | PendingQueue             |  |
//! |  |  CommandTable<D>        |  |  [ReqId, ReqId, ...]     |  |
//! |  |   [Init] -> D::init     |  |  attach: tail append     |  |
//! |  |   [Open] -> D::open     |  |  detach: first match     |  |
//! |  |   [Read] -> D::read     |  +--------------------------+  |
//! |  |   ...                   |                                |
//! |  |  poll  -> D::poll (opt) |  custom poll, else re-driver  |
//! |  +-------------------------+                                |
//! +-------------------------------------------------------------+
//! ```
//!
//! A driver lists its ops in a [`CommandTable`]; a missing slot means the
//! command is unsupported (`NO_COMMAND`). Drivers without a custom poll op
//! get the generic re-driver, which re-runs each pending request's last
//! command until it stops returning PEND. An optional cancel hook lets a
//! driver drop per-request state (resolver tickets) when the host aborts or
//! frees a request.

pub mod clipboard;
pub mod dns;
pub mod event;
pub mod file;
pub mod net;
pub(crate) mod resolver;
pub mod serial;
pub mod signal;
pub mod stdio;

use std::fmt;

use bitflags::bitflags;

use crate::config::HostConfig;
use crate::error::DeviceError;
use crate::event::{EventQueue, EventType};
use crate::request::{Command, Outcome, ReqFlags, ReqId, Request, RequestArena};

// ============================================================================
// Device ids and flags
// ============================================================================

/// Registry slots (stable ordinals, also the polling order).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DeviceId {
    Stdio = 0,
    /// Reserved, never registered by default
    Console = 1,
    File = 2,
    Event = 3,
    Net = 4,
    Dns = 5,
    Clipboard = 6,
    Serial = 7,
    Signal = 8,
}

impl DeviceId {
    /// Registry capacity.
    pub const COUNT: usize = 9;

    /// All ids in registry order.
    pub const ALL: [DeviceId; DeviceId::COUNT] = [
        DeviceId::Stdio,
        DeviceId::Console,
        DeviceId::File,
        DeviceId::Event,
        DeviceId::Net,
        DeviceId::Dns,
        DeviceId::Clipboard,
        DeviceId::Serial,
        DeviceId::Signal,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Lowercase device name.
    pub fn name(self) -> &'static str {
        match self {
            DeviceId::Stdio => "stdio",
            DeviceId::Console => "console",
            DeviceId::File => "file",
            DeviceId::Event => "event",
            DeviceId::Net => "net",
            DeviceId::Dns => "dns",
            DeviceId::Clipboard => "clipboard",
            DeviceId::Serial => "serial",
            DeviceId::Signal => "signal",
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Device flags word.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DeviceFlags: u32 {
        /// INIT has run successfully
        const INIT = 1 << 0;
        /// Poll even when nothing is pending
        const AUTO_POLL = 1 << 1;
        /// Device cannot work without its INIT op; initialized eagerly
        const MUST_INIT = 1 << 2;
    }
}

// ============================================================================
// Op contexts
// ============================================================================

/// What a command op may touch besides its request.
pub struct DeviceCtx<'a> {
    events: &'a mut EventQueue,
    config: &'a HostConfig,
}

impl<'a> DeviceCtx<'a> {
    pub(crate) fn new(events: &'a mut EventQueue, config: &'a HostConfig) -> Self {
        Self { events, config }
    }

    /// Wake the owner of `req` (Signal_Device). Returns `false` if the queue
    /// dropped the event; callers proceed either way.
    pub fn signal(&mut self, req: &Request, kind: EventType) -> bool {
        self.events.post_device(req, kind)
    }

    pub fn config(&self) -> &HostConfig {
        self.config
    }
}

/// What a custom poll op may touch: its own queue and the requests in it.
pub struct PollCtx<'a> {
    queue: &'a mut PendingQueue,
    requests: &'a mut RequestArena,
    events: &'a mut EventQueue,
    config: &'a HostConfig,
}

impl<'a> PollCtx<'a> {
    pub(crate) fn new(
        queue: &'a mut PendingQueue,
        requests: &'a mut RequestArena,
        events: &'a mut EventQueue,
        config: &'a HostConfig,
    ) -> Self {
        Self {
            queue,
            requests,
            events,
            config,
        }
    }

    /// Snapshot of the pending queue, oldest first.
    pub fn pending(&self) -> Vec<ReqId> {
        self.queue.ids().to_vec()
    }

    /// A pending request together with an op context.
    ///
    /// Stale ids (request freed while queued) are unlinked and yield `None`.
    pub fn split(&mut self, id: ReqId) -> Option<(&mut Request, DeviceCtx<'_>)> {
        match self.requests.get_mut(id) {
            Some(req) => Some((req, DeviceCtx::new(self.events, self.config))),
            None => {
                self.queue.unlink(id);
                None
            }
        }
    }

    /// Unlink a request from the queue (it completed or failed).
    pub fn complete(&mut self, id: ReqId) {
        match self.requests.get_mut(id) {
            Some(req) => {
                self.queue.detach(req);
            }
            None => self.queue.unlink(id),
        }
    }

    /// Record an asynchronous failure: set the code, post ERROR, unlink.
    pub fn fail(&mut self, id: ReqId, code: DeviceError, os_error: Option<i32>) {
        if let Some(req) = self.requests.get_mut(id) {
            req.error = Some(code);
            req.os_error = os_error;
            self.events.post_device(req, EventType::Error);
            self.queue.detach(req);
        } else {
            self.queue.unlink(id);
        }
    }

    pub fn config(&self) -> &HostConfig {
        self.config
    }
}

// ============================================================================
// Command tables and drivers
// ============================================================================

/// Signature of a command op.
pub type CommandFn<D> = fn(&mut D, &mut Request, &mut DeviceCtx<'_>) -> Outcome;

/// Signature of a custom poll op; returns whether anything changed.
pub type PollFn<D> = fn(&mut D, &mut PollCtx<'_>) -> bool;

/// Signature of a cancel hook.
pub type CancelFn<D> = fn(&mut D, &mut Request);

/// Fixed-size command table of a driver.
pub struct CommandTable<D> {
    ops: [Option<CommandFn<D>>; Command::COUNT],
    poll: Option<PollFn<D>>,
    cancel: Option<CancelFn<D>>,
}

impl<D> CommandTable<D> {
    /// Table with every slot empty.
    pub fn new() -> Self {
        Self {
            ops: [None; Command::COUNT],
            poll: None,
            cancel: None,
        }
    }

    /// Builder: install an op for `command`
    pub fn with(mut self, command: Command, op: CommandFn<D>) -> Self {
        self.ops[command.index()] = Some(op);
        self
    }

    /// Builder: install a custom poll op
    pub fn with_poll(mut self, poll: PollFn<D>) -> Self {
        self.poll = Some(poll);
        self
    }

    /// Builder: install a hook run when a request is aborted or freed
    pub fn with_cancel(mut self, cancel: CancelFn<D>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn get(&self, command: Command) -> Option<CommandFn<D>> {
        self.ops[command.index()]
    }

    pub fn supports(&self, command: Command) -> bool {
        self.ops[command.index()].is_some()
    }
}

impl<D> Default for CommandTable<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// A device implementation.
pub trait Driver: Sized + 'static {
    /// Device name for logs.
    const NAME: &'static str;

    /// Static flags (MUST_INIT, AUTO_POLL).
    const FLAGS: DeviceFlags = DeviceFlags::empty();

    /// The driver's command table.
    fn table() -> CommandTable<Self>;
}

/// Object-safe view of a driver bound to its table.
pub trait AnyDriver {
    fn name(&self) -> &'static str;
    fn static_flags(&self) -> DeviceFlags;
    fn supports(&self, command: Command) -> bool;
    fn has_custom_poll(&self) -> bool;

    /// Run the op for `command`; `None` when the slot is empty.
    fn invoke(
        &mut self,
        command: Command,
        req: &mut Request,
        ctx: &mut DeviceCtx<'_>,
    ) -> Option<Outcome>;

    /// Run the custom poll op; `None` when the driver has none.
    fn custom_poll(&mut self, ctx: &mut PollCtx<'_>) -> Option<bool>;

    /// Run the cancel hook, if any.
    fn cancel(&mut self, req: &mut Request);
}

struct Bound<D> {
    driver: D,
    table: CommandTable<D>,
}

impl<D: Driver> AnyDriver for Bound<D> {
    fn name(&self) -> &'static str {
        D::NAME
    }

    fn static_flags(&self) -> DeviceFlags {
        D::FLAGS
    }

    fn supports(&self, command: Command) -> bool {
        self.table.supports(command)
    }

    fn has_custom_poll(&self) -> bool {
        self.table.poll.is_some()
    }

    fn invoke(
        &mut self,
        command: Command,
        req: &mut Request,
        ctx: &mut DeviceCtx<'_>,
    ) -> Option<Outcome> {
        let op = self.table.get(command)?;
        Some(op(&mut self.driver, req, ctx))
    }

    fn custom_poll(&mut self, ctx: &mut PollCtx<'_>) -> Option<bool> {
        let poll = self.table.poll?;
        Some(poll(&mut self.driver, ctx))
    }

    fn cancel(&mut self, req: &mut Request) {
        if let Some(cancel) = self.table.cancel {
            cancel(&mut self.driver, req);
        }
    }
}

// ============================================================================
// Pending queue
// ============================================================================

/// Requests waiting on a device, oldest first.
#[derive(Debug, Default)]
pub struct PendingQueue {
    ids: Vec<ReqId>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `req` at the tail; no-op if already linked. Returns whether it
    /// was newly linked.
    pub fn attach(&mut self, req: &mut Request) -> bool {
        if self.ids.contains(&req.id()) {
            return false;
        }
        self.ids.push(req.id());
        req.flags.insert(ReqFlags::PENDING);
        true
    }

    /// Unlink `req`; no-op if not linked. Returns whether it was linked.
    pub fn detach(&mut self, req: &mut Request) -> bool {
        match self.ids.iter().position(|id| *id == req.id()) {
            Some(pos) => {
                self.ids.remove(pos);
                req.flags.remove(ReqFlags::PENDING);
                true
            }
            None => false,
        }
    }

    /// Drop an id whose request no longer exists.
    pub(crate) fn unlink(&mut self, id: ReqId) {
        self.ids.retain(|queued| *queued != id);
    }

    pub fn contains(&self, id: ReqId) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> &[ReqId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

// ============================================================================
// Registry entry
// ============================================================================

/// A registered device: driver, runtime flags and pending queue.
pub struct DeviceEntry {
    driver: Box<dyn AnyDriver>,
    flags: DeviceFlags,
    queue: PendingQueue,
}

impl DeviceEntry {
    /// Bind `driver` to its command table.
    pub fn new<D: Driver>(driver: D) -> Self {
        Self {
            flags: D::FLAGS,
            driver: Box::new(Bound {
                driver,
                table: D::table(),
            }),
            queue: PendingQueue::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.driver.name()
    }

    pub fn flags(&self) -> DeviceFlags {
        self.flags
    }

    pub fn is_initialized(&self) -> bool {
        self.flags.contains(DeviceFlags::INIT)
    }

    pub fn supports(&self, command: Command) -> bool {
        self.driver.supports(command)
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub(crate) fn queue_mut(&mut self) -> &mut PendingQueue {
        &mut self.queue
    }

    pub(crate) fn invoke(
        &mut self,
        command: Command,
        req: &mut Request,
        ctx: &mut DeviceCtx<'_>,
    ) -> Option<Outcome> {
        self.driver.invoke(command, req, ctx)
    }

    /// Unlink `req` and let the driver drop what it keeps for it.
    pub(crate) fn cancel(&mut self, req: &mut Request) -> bool {
        self.driver.cancel(req);
        self.queue.detach(req)
    }

    /// Requests still linked when the entry is torn down; they are unlinked
    /// and returned so the host can fail them.
    pub(crate) fn take_pending(&mut self) -> Vec<ReqId> {
        std::mem::take(&mut self.queue).ids
    }

    /// Run INIT if it has not run yet.
    pub(crate) fn ensure_init(
        &mut self,
        id: DeviceId,
        events: &mut EventQueue,
        config: &HostConfig,
    ) -> Result<(), DeviceError> {
        if self.is_initialized() {
            return Ok(());
        }
        if !self.driver.supports(Command::Init) {
            if self.flags.contains(DeviceFlags::MUST_INIT) {
                return Err(DeviceError::NoInit);
            }
            self.flags.insert(DeviceFlags::INIT);
            return Ok(());
        }
        let mut req = Request::new(id);
        req.command = Command::Init;
        let mut ctx = DeviceCtx::new(events, config);
        match self.driver.invoke(Command::Init, &mut req, &mut ctx) {
            Some(Outcome::Error) | None => {
                log::debug!(
                    "[DEV] {} init failed: {:?}",
                    self.name(),
                    req.error.unwrap_or(DeviceError::NoInit)
                );
                Err(DeviceError::NoInit)
            }
            Some(_) => {
                log::debug!("[DEV] {} initialized", self.name());
                self.flags.insert(DeviceFlags::INIT);
                Ok(())
            }
        }
    }

    /// Run QUIT if INIT ran.
    pub(crate) fn quit(&mut self, id: DeviceId, events: &mut EventQueue, config: &HostConfig) {
        if !self.is_initialized() {
            return;
        }
        if self.driver.supports(Command::Quit) {
            let mut req = Request::new(id);
            req.command = Command::Quit;
            let mut ctx = DeviceCtx::new(events, config);
            let _ = self.driver.invoke(Command::Quit, &mut req, &mut ctx);
        }
        self.flags.remove(DeviceFlags::INIT);
        log::debug!("[DEV] {} shut down", self.name());
    }

    /// Poll this device. Returns whether any request changed state.
    pub(crate) fn poll(
        &mut self,
        requests: &mut RequestArena,
        events: &mut EventQueue,
        config: &HostConfig,
    ) -> bool {
        if self.queue.is_empty() && !self.flags.contains(DeviceFlags::AUTO_POLL) {
            return false;
        }
        if self.driver.has_custom_poll() {
            let mut ctx = PollCtx::new(&mut self.queue, requests, events, config);
            return self.driver.custom_poll(&mut ctx).unwrap_or(false);
        }
        self.redrive(requests, events, config)
    }

    /// Generic poll: re-run each pending request's last command.
    fn redrive(
        &mut self,
        requests: &mut RequestArena,
        events: &mut EventQueue,
        config: &HostConfig,
    ) -> bool {
        let mut changed = false;
        for id in self.queue.ids().to_vec() {
            let Some(req) = requests.get_mut(id) else {
                self.queue.unlink(id);
                continue;
            };
            req.flags.remove(ReqFlags::ACTIVE);
            let command = req.command;
            let mut ctx = DeviceCtx::new(events, config);
            let outcome = self
                .driver
                .invoke(command, req, &mut ctx)
                .unwrap_or_else(|| req.fail(DeviceError::NoCommand));
            match outcome {
                Outcome::Done => {
                    self.queue.detach(req);
                    changed = true;
                }
                Outcome::Error => {
                    // The issuing frame is gone; the port learns through the event.
                    events.post_device(req, EventType::Error);
                    self.queue.detach(req);
                    changed = true;
                }
                Outcome::Pend => {
                    if req.flags.contains(ReqFlags::ACTIVE) {
                        changed = true;
                    }
                }
            }
        }
        changed
    }
}

impl fmt::Debug for DeviceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEntry")
            .field("name", &self.name())
            .field("flags", &self.flags)
            .field("pending", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventQueue;

    struct Echo;

    impl Echo {
        fn open(&mut self, _req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
            Outcome::Done
        }

        fn read(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
            if req.timeout.is_some() {
                return Outcome::Pend;
            }
            req.actual = req.length;
            ctx.signal(req, EventType::Read);
            Outcome::Done
        }
    }

    impl Driver for Echo {
        const NAME: &'static str = "echo";

        fn table() -> CommandTable<Self> {
            CommandTable::new()
                .with(Command::Open, Self::open)
                .with(Command::Read, Self::read)
        }
    }

    #[test]
    fn test_table_slots() {
        let entry = DeviceEntry::new(Echo);
        assert!(entry.supports(Command::Open));
        assert!(entry.supports(Command::Read));
        assert!(!entry.supports(Command::Write));
        assert!(!entry.supports(Command::Init));
        assert_eq!(entry.name(), "echo");
    }

    #[test]
    fn test_attach_detach_idempotent() {
        let mut arena = RequestArena::new();
        let id = arena.insert(Request::new(DeviceId::File));
        let mut queue = PendingQueue::new();
        let req = arena.get_mut(id).unwrap();

        assert!(queue.attach(req));
        assert!(!queue.attach(req));
        assert_eq!(queue.len(), 1);
        assert!(req.is_pending());

        assert!(queue.detach(req));
        assert!(!queue.detach(req));
        assert!(queue.is_empty());
        assert!(!req.is_pending());
    }

    #[test]
    fn test_init_without_op_marks_initialized() {
        let mut entry = DeviceEntry::new(Echo);
        let mut events = EventQueue::new(4);
        let config = HostConfig::default();
        assert!(entry
            .ensure_init(DeviceId::File, &mut events, &config)
            .is_ok());
        assert!(entry.is_initialized());
    }

    #[test]
    fn test_device_names_follow_registry_order() {
        let names: Vec<_> = DeviceId::ALL.iter().map(|d| d.name()).collect();
        assert_eq!(
            names,
            vec![
                "stdio",
                "console",
                "file",
                "event",
                "net",
                "dns",
                "clipboard",
                "serial",
                "signal"
            ]
        );
        assert_eq!(DeviceId::from_index(4), Some(DeviceId::Net));
        assert_eq!(DeviceId::from_index(9), None);
    }
}
