// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CLIPBOARD device: a process-local text clipboard.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{CommandTable, DeviceCtx, Driver};
use crate::error::DeviceError;
use crate::event::EventType;
use crate::request::{Command, Outcome, Request};

/// Shared clipboard contents.
pub type ClipboardStore = Arc<Mutex<Option<String>>>;

/// The CLIPBOARD device.
#[derive(Debug, Default)]
pub struct ClipboardDriver {
    store: ClipboardStore,
}

impl ClipboardDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device backed by an existing store (shared with the embedder).
    pub fn with_store(store: ClipboardStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> ClipboardStore {
        Arc::clone(&self.store)
    }

    fn open(&mut self, _req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        Outcome::Done
    }

    fn close(&mut self, _req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        Outcome::Done
    }

    /// Copies the whole clipboard text; an empty clipboard reads as 0 bytes.
    fn read(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
        let text = self.store.lock().clone().unwrap_or_default();
        req.data.extend_from_slice(text.as_bytes());
        req.actual = text.len();
        req.length = req.length.max(req.actual);
        ctx.signal(req, EventType::Read);
        Outcome::Done
    }

    fn write(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
        let len = req.length.min(req.data.len());
        let text = match std::str::from_utf8(&req.data[..len]) {
            Ok(text) => text.to_string(),
            Err(_) => return req.fail(DeviceError::BadWrite),
        };
        *self.store.lock() = Some(text);
        req.actual = len;
        ctx.signal(req, EventType::Wrote);
        Outcome::Done
    }
}

impl Driver for ClipboardDriver {
    const NAME: &'static str = "clipboard";

    fn table() -> CommandTable<Self> {
        CommandTable::new()
            .with(Command::Open, Self::open)
            .with(Command::Close, Self::close)
            .with(Command::Read, Self::read)
            .with(Command::Write, Self::write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::device::DeviceId;
    use crate::event::EventQueue;

    #[test]
    fn test_write_then_read() {
        let mut driver = ClipboardDriver::new();
        let mut events = EventQueue::new(4);
        let config = HostConfig::default();
        let mut ctx = DeviceCtx::new(&mut events, &config);

        let mut req = Request::new(DeviceId::Clipboard);
        req.data = "clip ✓".as_bytes().to_vec();
        req.length = req.data.len();
        assert_eq!(driver.write(&mut req, &mut ctx), Outcome::Done);

        let mut req = Request::new(DeviceId::Clipboard);
        assert_eq!(driver.read(&mut req, &mut ctx), Outcome::Done);
        assert_eq!(req.data, "clip ✓".as_bytes());
        assert!(req.actual <= req.length);

        let kinds: Vec<_> = events.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventType::Wrote, EventType::Read]);
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut driver = ClipboardDriver::new();
        let mut events = EventQueue::new(4);
        let config = HostConfig::default();
        let mut ctx = DeviceCtx::new(&mut events, &config);

        let mut req = Request::new(DeviceId::Clipboard);
        req.data = vec![0xff, 0xfe];
        req.length = 2;
        assert_eq!(driver.write(&mut req, &mut ctx), Outcome::Error);
        assert_eq!(req.error, Some(DeviceError::BadWrite));
        assert!(driver.store().lock().is_none());
    }
}
