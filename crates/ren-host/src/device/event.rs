// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! EVENT device: the scheduler's sleep primitive.
//!
//! QUERY blocks on a `mio::Poll` for at most `length` milliseconds. Every
//! socket the net device opens is registered with a clone of this poll's
//! registry, so socket readiness ends the sleep early; the resolver workers
//! and the interrupt handler end it through the shared [`Waker`].

use std::io;
use std::sync::Arc;
use std::time::Duration;

use mio::{Events, Poll, Registry, Token, Waker};

use super::{CommandTable, DeviceCtx, DeviceFlags, Driver};
use crate::error::DeviceError;
use crate::request::{Command, Outcome, Request};

/// Token reserved for the waker.
pub const WAKE_TOKEN: Token = Token(usize::MAX);

/// Maximum readiness events gathered per sleep
const MAX_EVENTS: usize = 128;

/// The EVENT device.
pub struct EventDriver {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
}

impl EventDriver {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            waker,
        })
    }

    /// Registry handle for devices whose handles should end the sleep.
    pub fn registry(&self) -> io::Result<Registry> {
        self.poll.registry().try_clone()
    }

    /// Waker ending the current (or next) sleep from any thread.
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    fn init(&mut self, _req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        Outcome::Done
    }

    fn quit(&mut self, _req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        self.events.clear();
        Outcome::Done
    }

    /// Sleep up to `req.length` ms; `actual` = readiness events seen.
    fn query(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let timeout = Duration::from_millis(req.length as u64);
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {
                req.actual = self.events.iter().count();
                Outcome::Done
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                req.actual = 0;
                Outcome::Done
            }
            Err(e) => {
                log::debug!("[WAIT] poll error: {}", e);
                req.fail_io(DeviceError::BadRead, &e)
            }
        }
    }
}

impl Driver for EventDriver {
    const NAME: &'static str = "event";
    const FLAGS: DeviceFlags = DeviceFlags::MUST_INIT;

    fn table() -> CommandTable<Self> {
        CommandTable::new()
            .with(Command::Init, Self::init)
            .with(Command::Quit, Self::quit)
            .with(Command::Query, Self::query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::device::DeviceId;
    use crate::event::EventQueue;
    use std::time::Instant;

    #[test]
    fn test_query_sleeps_bounded() {
        let mut driver = EventDriver::new().unwrap();
        let mut events = EventQueue::new(4);
        let config = HostConfig::default();
        let mut ctx = DeviceCtx::new(&mut events, &config);
        let mut req = Request::new(DeviceId::Event);
        req.length = 30;

        let start = Instant::now();
        assert_eq!(driver.query(&mut req, &mut ctx), Outcome::Done);
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_waker_ends_sleep_early() {
        let mut driver = EventDriver::new().unwrap();
        let waker = driver.waker();
        let mut events = EventQueue::new(4);
        let config = HostConfig::default();
        let mut ctx = DeviceCtx::new(&mut events, &config);
        let mut req = Request::new(DeviceId::Event);
        req.length = 10_000;

        waker.wake().unwrap();
        let start = Instant::now();
        assert_eq!(driver.query(&mut req, &mut ctx), Outcome::Done);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(req.actual, 1);
    }
}
