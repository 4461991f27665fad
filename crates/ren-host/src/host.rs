// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The host: device registry, dispatcher, request arena, event queue and the
//! `wait` scheduler, all driven from a single thread.
//!
//! # Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                            Host                                |
//! |                                                                |
//! |  PortActor ──do_command(id, cmd)──> DeviceEntry[device]        |
//! |      ^                                 │ DONE  -> detach       |
//! |      │                                 │ PEND  -> attach       |
//! |      │                                 │ ERROR -> detach (+ERROR|
//! |      │                                 │          event if ALLOC)|
//! |      │                                 v                       |
//! |  wait_for ◄── EventQueue ◄── device ops / poll ops             |
//! |      │                                                         |
//! |      └── wait(millis) : reap -> poll_all -> EVENT QUERY sleep  |
//! +---------------------------------------------------------------+
//! ```
//!
//! Devices are polled in registry order: STDIO, FILE, EVENT, NET, DNS,
//! CLIPBOARD, SERIAL, SIGNAL.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mio::Waker;

use crate::config::HostConfig;
use crate::device::clipboard::ClipboardDriver;
use crate::device::dns::DnsDriver;
use crate::device::event::EventDriver;
use crate::device::file::FileDriver;
use crate::device::net::NetDriver;
use crate::device::serial::SerialDriver;
use crate::device::signal::SignalDriver;
use crate::device::stdio::{LineSource, StdinLines, StdioDriver};
use crate::device::{DeviceCtx, DeviceEntry, DeviceFlags, DeviceId, Driver};
use crate::error::{DeviceError, PortError, Result};
use crate::event::{Event, EventQueue, EventType};
use crate::halt;
use crate::port::{PortActor, PortId};
use crate::reap;
use crate::request::{Command, Modes, Outcome, Payload, ReqFlags, ReqId, Request, RequestArena};

/// Result of one scheduler step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A device reported a state change; drain the event queue.
    EventReady,
    /// The time budget was already spent.
    TimedOut,
    /// Slept on the EVENT device until woken or the budget ran out.
    TimerFired,
}

/// Device registry plus everything the dispatcher needs.
pub struct Host {
    config: HostConfig,
    devices: Vec<Option<DeviceEntry>>,
    requests: RequestArena,
    events: EventQueue,
    waker: Option<Arc<Waker>>,
    next_port: u64,
    shut_down: bool,
}

impl Host {
    /// Host with the standard registry, reading console input from stdin.
    pub fn new(config: HostConfig) -> std::io::Result<Self> {
        Self::with_line_source(config, Box::new(StdinLines::new()))
    }

    /// Host with the standard registry and a custom console line source.
    pub fn with_line_source(
        config: HostConfig,
        mut source: Box<dyn LineSource>,
    ) -> std::io::Result<Self> {
        let event = EventDriver::new()?;
        let registry = || match event.registry() {
            Ok(registry) => Some(registry),
            Err(e) => {
                log::warn!(
                    "[DEV] cannot clone poll registry, handles will not wake waits: {}",
                    e
                );
                None
            }
        };
        let net_registry = registry();
        let serial = registry().map_or_else(SerialDriver::new, SerialDriver::with_registry);
        let waker = event.waker();
        source.set_waker(Arc::clone(&waker));

        let mut host = Self::empty(config);
        host.waker = Some(Arc::clone(&waker));
        host.register(DeviceId::Stdio, StdioDriver::new(source));
        host.register(DeviceId::File, FileDriver::new());
        host.register(DeviceId::Event, event);
        host.register(
            DeviceId::Net,
            NetDriver::new(net_registry).with_waker(Arc::clone(&waker)),
        );
        host.register(DeviceId::Dns, DnsDriver::new(Some(waker)));
        host.register(DeviceId::Clipboard, ClipboardDriver::new());
        host.register(DeviceId::Serial, serial);
        host.register(DeviceId::Signal, SignalDriver::new());
        log::debug!("[DEV] host ready ({} devices)", host.device_count());
        Ok(host)
    }

    /// Host with an empty registry.
    pub fn empty(config: HostConfig) -> Self {
        Self {
            events: EventQueue::new(config.event_queue_capacity),
            config,
            devices: (0..DeviceId::COUNT).map(|_| None).collect(),
            requests: RequestArena::new(),
            waker: None,
            next_port: 1,
            shut_down: false,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Install `driver` in slot `id`, replacing (and shutting down) any
    /// previous device. MUST_INIT devices are initialized immediately.
    ///
    /// Requests still pending on a replaced device fail with `NO_DEVICE`.
    pub fn register<D: Driver>(&mut self, id: DeviceId, driver: D) {
        if let Some(old) = self.devices[id.index()].take() {
            self.retire(id, old);
        }
        let mut entry = DeviceEntry::new(driver);
        if entry.flags().contains(DeviceFlags::MUST_INIT) {
            if let Err(code) = entry.ensure_init(id, &mut self.events, &self.config) {
                log::warn!("[DEV] {} failed to initialize: {}", id, code);
            }
        }
        self.devices[id.index()] = Some(entry);
        self.shut_down = false;
    }

    /// Remove the device in slot `id` after running its QUIT. Requests
    /// still pending on it fail with `NO_DEVICE`.
    pub fn unregister(&mut self, id: DeviceId) -> bool {
        match self.devices[id.index()].take() {
            Some(entry) => {
                self.retire(id, entry);
                true
            }
            None => false,
        }
    }

    fn retire(&mut self, id: DeviceId, mut entry: DeviceEntry) {
        let orphans = entry.take_pending();
        entry.quit(id, &mut self.events, &self.config);
        for rid in orphans {
            let Some(req) = self.requests.get_mut(rid) else {
                continue;
            };
            req.flags.remove(ReqFlags::PENDING);
            req.error = Some(DeviceError::NoDevice);
            req.os_error = None;
            if req.flags.contains(ReqFlags::ALLOC) {
                self.events.post_device(req, EventType::Error);
            }
            log::debug!("[DEV] {} removed under pending request {}", id, rid);
        }
    }

    pub fn device(&self, id: DeviceId) -> Option<&DeviceEntry> {
        self.devices[id.index()].as_ref()
    }

    /// Number of registered devices.
    pub fn device_count(&self) -> usize {
        self.devices.iter().filter(|d| d.is_some()).count()
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Allocate a port-owned request (ALLOC set).
    pub fn alloc_request(&mut self, device: DeviceId, payload: Payload, modes: Modes) -> ReqId {
        let mut req = Request::new(device).with_payload(payload).with_modes(modes);
        req.flags.insert(ReqFlags::ALLOC);
        self.requests.insert(req)
    }

    pub fn request(&self, id: ReqId) -> Option<&Request> {
        self.requests.get(id)
    }

    pub fn request_mut(&mut self, id: ReqId) -> Option<&mut Request> {
        self.requests.get_mut(id)
    }

    /// Release a request: unlink it from its device and drop its events.
    pub fn free_request(&mut self, id: ReqId) -> Option<Request> {
        self.abort(id);
        self.events.purge_request(id);
        self.requests.remove(id)
    }

    // ========================================================================
    // Dispatcher
    // ========================================================================

    /// Dispatch `command` without a request (INIT/QUIT style).
    pub fn call(
        &mut self,
        device: DeviceId,
        command: Command,
    ) -> std::result::Result<Outcome, DeviceError> {
        let Some(entry) = self.devices[device.index()].as_mut() else {
            return Err(DeviceError::NoDevice);
        };
        match command {
            Command::Init => {
                entry.ensure_init(device, &mut self.events, &self.config)?;
                return Ok(Outcome::Done);
            }
            Command::Quit => {
                entry.quit(device, &mut self.events, &self.config);
                return Ok(Outcome::Done);
            }
            _ => {}
        }
        if !entry.supports(command) {
            return Err(DeviceError::NoCommand);
        }
        entry.ensure_init(device, &mut self.events, &self.config)?;
        let mut req = Request::new(device);
        req.command = command;
        let mut ctx = DeviceCtx::new(&mut self.events, &self.config);
        match entry.invoke(command, &mut req, &mut ctx) {
            Some(Outcome::Error) => Err(req.error.unwrap_or(DeviceError::NoCommand)),
            Some(outcome) => Ok(outcome),
            None => Err(DeviceError::NoCommand),
        }
    }

    /// Execute `command` on request `id` (the `do` operation).
    ///
    /// PEND links the request in its device's pending queue; DONE and ERROR
    /// unlink it. A failed port-owned request also gets an ERROR event.
    pub fn do_command(&mut self, id: ReqId, command: Command) -> Outcome {
        let Some(req) = self.requests.get_mut(id) else {
            log::debug!("[DEV] do {:?} on stale request {}", command, id);
            return Outcome::Error;
        };
        req.error = None;
        req.os_error = None;
        let device = req.device;
        let Some(entry) = self.devices[device.index()].as_mut() else {
            return req.fail(DeviceError::NoDevice);
        };
        if !entry.supports(command) {
            return req.fail(DeviceError::NoCommand);
        }
        if let Err(code) = entry.ensure_init(device, &mut self.events, &self.config) {
            return req.fail(code);
        }

        req.command = command;
        let mut ctx = DeviceCtx::new(&mut self.events, &self.config);
        let outcome = entry
            .invoke(command, req, &mut ctx)
            .unwrap_or_else(|| req.fail(DeviceError::NoCommand));
        match outcome {
            Outcome::Pend => {
                entry.queue_mut().attach(req);
            }
            Outcome::Done => {
                entry.queue_mut().detach(req);
            }
            Outcome::Error => {
                entry.queue_mut().detach(req);
                log::debug!(
                    "[DEV] {} {:?} on {} failed: {:?}",
                    device,
                    command,
                    id,
                    req.error
                );
                if req.flags.contains(ReqFlags::ALLOC) {
                    self.events.post_device(req, EventType::Error);
                }
            }
        }
        outcome
    }

    /// Link a request in its device's pending queue (idempotent).
    pub fn attach(&mut self, id: ReqId) -> bool {
        let Some(req) = self.requests.get_mut(id) else {
            return false;
        };
        match self.devices[req.device.index()].as_mut() {
            Some(entry) => entry.queue_mut().attach(req),
            None => false,
        }
    }

    /// Unlink a request from its device's pending queue (idempotent).
    pub fn detach(&mut self, id: ReqId) -> bool {
        let Some(req) = self.requests.get_mut(id) else {
            return false;
        };
        match self.devices[req.device.index()].as_mut() {
            Some(entry) => entry.queue_mut().detach(req),
            None => false,
        }
    }

    /// Cancel a request: unlink it and let its device drop any background
    /// work (resolver tickets). In-flight OS calls are not preempted.
    pub fn abort(&mut self, id: ReqId) -> bool {
        let Some(req) = self.requests.get_mut(id) else {
            return false;
        };
        match self.devices[req.device.index()].as_mut() {
            Some(entry) => entry.cancel(req),
            None => false,
        }
    }

    // ========================================================================
    // Scheduler
    // ========================================================================

    /// Poll every device in registry order; returns how many changed.
    pub fn poll_all(&mut self) -> usize {
        let mut changed = 0;
        for entry in self.devices.iter_mut().flatten() {
            if entry.poll(&mut self.requests, &mut self.events, &self.config) {
                changed += 1;
            }
        }
        changed
    }

    /// One scheduler step: reap children, poll devices, then sleep on the
    /// EVENT device for what remains of `millis`.
    ///
    /// A remaining budget below `resolution` counts as timed out.
    pub fn wait(&mut self, millis: u64, resolution: Duration) -> WaitOutcome {
        let start = Instant::now();
        if self.config.reap_children {
            reap::reap_children();
        }
        if self.poll_all() > 0 {
            return WaitOutcome::EventReady;
        }
        let budget = Duration::from_millis(millis);
        let elapsed = start.elapsed();
        if elapsed >= budget || budget - elapsed < resolution {
            return WaitOutcome::TimedOut;
        }
        let remaining = budget - elapsed;
        self.sleep(remaining);
        WaitOutcome::TimerFired
    }

    fn sleep(&mut self, remaining: Duration) {
        let millis = remaining.as_millis().max(1);
        let Some(entry) = self.devices[DeviceId::Event.index()].as_mut() else {
            thread::sleep(remaining);
            return;
        };
        let mut req = Request::new(DeviceId::Event);
        req.command = Command::Query;
        req.length = usize::try_from(millis).unwrap_or(usize::MAX);
        let mut ctx = DeviceCtx::new(&mut self.events, &self.config);
        match entry.invoke(Command::Query, &mut req, &mut ctx) {
            Some(Outcome::Error) | None => {
                log::debug!("[WAIT] event query failed: {:?}", req.error);
                thread::sleep(remaining);
            }
            Some(_) => {}
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    /// Remove the oldest queued event.
    pub fn take_event(&mut self) -> Option<Event> {
        self.events.pop()
    }

    /// Remove every queued event.
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain()
    }

    /// Post a port-model event (PORT, TIME, ...) for `port`.
    pub fn post_port_event(&mut self, port: PortId, kind: EventType) -> bool {
        self.events.post(Event::port(port, kind))
    }

    /// Drive `actor` until `until` holds, `timeout` passes or a HALT arrives.
    ///
    /// Events owned by `actor` are folded in through [`PortActor::update`];
    /// others are put back at the front of the queue in their original order.
    /// Returns `Ok(false)` on timeout.
    pub fn wait_for<A, F>(
        &mut self,
        actor: &mut A,
        timeout: Duration,
        mut until: F,
    ) -> Result<bool>
    where
        A: PortActor + ?Sized,
        F: FnMut(&A) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.dispatch_to(actor)?;
            if until(&*actor) {
                return Ok(true);
            }
            if halt::halt_requested() {
                return Err(PortError::Halted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let remaining = deadline - now;
            let millis = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX);
            let resolution = self.config.wait_resolution;
            self.wait(millis, resolution);
        }
    }

    /// Hand every queued event owned by `actor` to it; returns how many.
    pub fn dispatch_to<A: PortActor + ?Sized>(&mut self, actor: &mut A) -> Result<usize> {
        actor.refresh(self)?;
        let queued = self.events.drain();
        let mut others = Vec::new();
        let mut handled = 0;
        let mut failure = None;
        for event in queued {
            if failure.is_none() && actor.owns(&event.eventee) {
                handled += 1;
                if let Err(e) = actor.update(self, &event) {
                    failure = Some(e);
                }
            } else {
                others.push(event);
            }
        }
        self.events.requeue_front(others);
        match failure {
            Some(e) => Err(e),
            None => Ok(handled),
        }
    }

    // ========================================================================
    // Process integration
    // ========================================================================

    /// Waker that ends the EVENT device's current sleep.
    pub fn waker(&self) -> Option<Arc<Waker>> {
        self.waker.clone()
    }

    /// Route Ctrl-C to a HALT request that also wakes `wait`.
    pub fn install_interrupt_handler(&self) -> Result<()> {
        let Some(waker) = self.waker() else {
            return Err(PortError::Io(std::io::Error::other("no EVENT device")));
        };
        halt::install_interrupt_handler(waker)
            .map_err(|e| PortError::Io(std::io::Error::other(e.to_string())))
    }

    /// Fresh port identity.
    pub fn next_port_id(&mut self) -> PortId {
        let id = PortId(self.next_port);
        self.next_port += 1;
        id
    }

    /// Run QUIT on every initialized device, in reverse registry order.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        for index in (0..self.devices.len()).rev() {
            let Some(id) = DeviceId::from_index(index) else {
                continue;
            };
            if let Some(entry) = self.devices[index].as_mut() {
                entry.quit(id, &mut self.events, &self.config);
            }
        }
        self.shut_down = true;
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CommandTable, DeviceCtx};
    use crate::event::Eventee;

    /// Completes READ after `ticks` re-drives; WRITE always fails.
    struct Countdown {
        ticks: usize,
    }

    impl Countdown {
        fn read(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
            if self.ticks > 0 {
                self.ticks -= 1;
                return Outcome::Pend;
            }
            req.actual = req.length;
            ctx.signal(req, EventType::Read);
            Outcome::Done
        }

        fn write(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
            req.fail(DeviceError::BadWrite)
        }
    }

    impl Driver for Countdown {
        const NAME: &'static str = "countdown";

        fn table() -> CommandTable<Self> {
            CommandTable::new()
                .with(Command::Read, Self::read)
                .with(Command::Write, Self::write)
        }
    }

    struct NeedsInit;

    impl Driver for NeedsInit {
        const NAME: &'static str = "needs-init";
        const FLAGS: DeviceFlags = DeviceFlags::MUST_INIT;

        fn table() -> CommandTable<Self> {
            CommandTable::new()
        }
    }

    fn host_with_countdown(ticks: usize) -> Host {
        let mut host = Host::empty(HostConfig::default().with_reap_children(false));
        host.register(DeviceId::File, Countdown { ticks });
        host
    }

    #[test]
    fn test_pend_attaches_and_redrive_completes() {
        let mut host = host_with_countdown(2);
        let id = host.alloc_request(DeviceId::File, Payload::None, Modes::empty());
        host.request_mut(id).unwrap().length = 3;

        assert_eq!(host.do_command(id, Command::Read), Outcome::Pend);
        assert!(host.request(id).unwrap().is_pending());
        assert_eq!(host.device(DeviceId::File).unwrap().queue().len(), 1);

        assert_eq!(host.poll_all(), 0);
        assert!(host.request(id).unwrap().is_pending());
        assert_eq!(host.poll_all(), 1);
        let req = host.request(id).unwrap();
        assert!(!req.is_pending());
        assert_eq!(req.actual, 3);
        assert_eq!(req.command, Command::Read);
        assert_eq!(host.take_event().map(|e| e.kind), Some(EventType::Read));
    }

    #[test]
    fn test_bad_calls_post_no_event() {
        let mut host = host_with_countdown(0);
        let id = host.alloc_request(DeviceId::Net, Payload::None, Modes::empty());
        assert_eq!(host.do_command(id, Command::Read), Outcome::Error);
        assert_eq!(host.request(id).unwrap().error, Some(DeviceError::NoDevice));

        let id = host.alloc_request(DeviceId::File, Payload::None, Modes::empty());
        assert_eq!(host.do_command(id, Command::Rename), Outcome::Error);
        assert_eq!(host.request(id).unwrap().error, Some(DeviceError::NoCommand));
        assert!(host.events().is_empty());

        assert_eq!(host.call(DeviceId::Dns, Command::Init), Err(DeviceError::NoDevice));
        assert_eq!(host.call(DeviceId::File, Command::Query), Err(DeviceError::NoCommand));
    }

    #[test]
    fn test_op_failure_on_alloc_request_posts_error() {
        let mut host = host_with_countdown(0);
        let id = host.alloc_request(DeviceId::File, Payload::None, Modes::empty());
        assert_eq!(host.do_command(id, Command::Write), Outcome::Error);
        let ev = host.take_event().unwrap();
        assert_eq!(ev.kind, EventType::Error);
        assert_eq!(ev.eventee, Eventee::Request(id));
        assert_eq!(host.request(id).unwrap().error, Some(DeviceError::BadWrite));
    }

    #[test]
    fn test_must_init_without_init_op() {
        let mut host = Host::empty(HostConfig::default());
        host.register(DeviceId::Clipboard, NeedsInit);
        assert!(!host.device(DeviceId::Clipboard).unwrap().is_initialized());
        assert_eq!(
            host.call(DeviceId::Clipboard, Command::Init),
            Err(DeviceError::NoInit)
        );
    }

    #[test]
    fn test_abort_and_free_unlink() {
        let mut host = host_with_countdown(100);
        let id = host.alloc_request(DeviceId::File, Payload::None, Modes::empty());
        assert_eq!(host.do_command(id, Command::Read), Outcome::Pend);
        assert!(host.abort(id));
        assert!(!host.abort(id));
        assert!(!host.request(id).unwrap().is_pending());

        assert_eq!(host.do_command(id, Command::Read), Outcome::Pend);
        assert!(host.free_request(id).is_some());
        assert!(host.device(DeviceId::File).unwrap().queue().is_empty());
        assert_eq!(host.do_command(id, Command::Read), Outcome::Error);
    }

    /// Pends every READ; counts cancelled requests.
    struct Parked {
        cancelled: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Parked {
        fn read(&mut self, _req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
            Outcome::Pend
        }

        fn cancel(&mut self, _req: &mut Request) {
            self.cancelled
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl Driver for Parked {
        const NAME: &'static str = "parked";

        fn table() -> CommandTable<Self> {
            CommandTable::new()
                .with(Command::Read, Self::read)
                .with_cancel(Self::cancel)
        }
    }

    #[test]
    fn test_free_runs_cancel_hook() {
        let cancelled = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut host = Host::empty(HostConfig::default());
        host.register(
            DeviceId::Dns,
            Parked {
                cancelled: Arc::clone(&cancelled),
            },
        );
        let id = host.alloc_request(DeviceId::Dns, Payload::None, Modes::empty());
        assert_eq!(host.do_command(id, Command::Read), Outcome::Pend);
        assert!(host.free_request(id).is_some());
        assert_eq!(cancelled.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(host.device(DeviceId::Dns).unwrap().queue().is_empty());
    }

    #[test]
    fn test_replacing_device_fails_its_pending_requests() {
        let mut host = host_with_countdown(100);
        let id = host.alloc_request(DeviceId::File, Payload::None, Modes::empty());
        assert_eq!(host.do_command(id, Command::Read), Outcome::Pend);

        host.register(DeviceId::File, Countdown { ticks: 0 });
        let req = host.request(id).unwrap();
        assert!(!req.is_pending());
        assert_eq!(req.error, Some(DeviceError::NoDevice));
        assert!(host.device(DeviceId::File).unwrap().queue().is_empty());
        let ev = host.take_event().unwrap();
        assert_eq!((ev.kind, ev.eventee), (EventType::Error, Eventee::Request(id)));

        // The same holds when the slot is emptied.
        let mut host = host_with_countdown(100);
        let id = host.alloc_request(DeviceId::File, Payload::None, Modes::empty());
        assert_eq!(host.do_command(id, Command::Read), Outcome::Pend);
        assert!(host.unregister(DeviceId::File));
        assert!(!host.request(id).unwrap().is_pending());
        assert_eq!(host.request(id).unwrap().error, Some(DeviceError::NoDevice));
    }

    #[test]
    fn test_wait_zero_does_not_sleep() {
        let mut host = Host::new(HostConfig::default().with_reap_children(false)).unwrap();
        let start = Instant::now();
        assert_eq!(host.wait(0, Duration::from_millis(1)), WaitOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_wait_sleeps_on_event_device() {
        let mut host = Host::new(HostConfig::default().with_reap_children(false)).unwrap();
        let start = Instant::now();
        assert_eq!(host.wait(40, Duration::from_millis(1)), WaitOutcome::TimerFired);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_standard_registry_and_shutdown() {
        let mut host = Host::new(HostConfig::default()).unwrap();
        assert_eq!(host.device_count(), 8);
        assert!(host.device(DeviceId::Console).is_none());
        assert!(host.device(DeviceId::Event).unwrap().is_initialized());
        assert_eq!(host.call(DeviceId::Net, Command::Init), Ok(Outcome::Done));
        host.shutdown();
        assert!(!host.device(DeviceId::Net).unwrap().is_initialized());
        assert!(!host.device(DeviceId::Event).unwrap().is_initialized());
    }

    #[test]
    fn test_port_ids_are_unique() {
        let mut host = Host::empty(HostConfig::default());
        let a = host.next_port_id();
        let b = host.next_port_id();
        assert_ne!(a, b);
        assert!(host.post_port_event(a, EventType::Port));
        assert_eq!(host.take_event().map(|e| e.eventee), Some(Eventee::Port(a)));
    }
}
