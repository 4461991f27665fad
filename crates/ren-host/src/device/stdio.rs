// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! STDIO device: line-mode console input and UTF-8 output.
//!
//! Input comes from a [`LineSource`] collaborator (the line editor, or a
//! plain stdin reader). A READ surfaces exactly one of three outcomes:
//!
//! | source event | data | actual |
//! |---|---|---|
//! | completed line | line bytes ending in `\n` | >= 1 |
//! | cancel key | `[0x1B]` | 1 |
//! | interrupt / end of input | empty | 0 |
//!
//! When no line is ready the READ returns PEND and the generic re-driver
//! retries it on every poll, so the device never blocks the host thread.
//! Sources wake the host's [`Waker`] when input arrives, which ends the
//! scheduler's sleep so the retry happens at once.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, TryRecvError};
use mio::Waker;
use parking_lot::Mutex;

use super::{CommandTable, DeviceCtx, Driver};
use crate::error::DeviceError;
use crate::event::EventType;
use crate::halt;
use crate::request::{Command, Modes, Outcome, Request};

/// Escape byte returned for a cancelled line.
pub const CANCEL_BYTE: u8 = 0x1B;

/// What the line editor produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineEvent {
    /// A completed line (with or without its trailing newline)
    Line(String),
    /// Cancellation key (ESC)
    Cancel,
    /// Process-level interrupt or end of input
    Interrupt,
}

/// Source of console input lines.
pub trait LineSource: Send {
    /// Next input event, or `None` if nothing is ready yet. Must not block.
    fn poll_line(&mut self) -> Option<LineEvent>;

    /// Waker to call whenever a new event becomes ready.
    fn set_waker(&mut self, _waker: Arc<Waker>) {}
}

/// Reads stdin on a background thread so the device never blocks.
pub struct StdinLines {
    rx: Option<Receiver<LineEvent>>,
    waker: Option<Arc<Waker>>,
}

impl StdinLines {
    pub fn new() -> Self {
        Self {
            rx: None,
            waker: None,
        }
    }

    fn start(&mut self) -> io::Result<&Receiver<LineEvent>> {
        if self.rx.is_none() {
            let (tx, rx) = channel::unbounded();
            let waker = self.waker.clone();
            thread::Builder::new()
                .name("ren-stdin".to_string())
                .spawn(move || {
                    let stdin = io::stdin();
                    let mut lock = stdin.lock();
                    loop {
                        let mut line = String::new();
                        let event = match lock.read_line(&mut line) {
                            Ok(0) | Err(_) => LineEvent::Interrupt,
                            Ok(_) => LineEvent::Line(line),
                        };
                        let eof = event == LineEvent::Interrupt;
                        if tx.send(event).is_err() {
                            break;
                        }
                        if let Some(waker) = &waker {
                            let _ = waker.wake();
                        }
                        if eof {
                            break;
                        }
                    }
                })?;
            self.rx = Some(rx);
        }
        self.rx
            .as_ref()
            .ok_or_else(|| io::Error::other("stdin reader missing"))
    }
}

impl Default for StdinLines {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSource for StdinLines {
    fn poll_line(&mut self) -> Option<LineEvent> {
        if halt::halt_requested() {
            return Some(LineEvent::Interrupt);
        }
        let rx = match self.start() {
            Ok(rx) => rx,
            Err(e) => {
                log::warn!("[STDIO] cannot start stdin reader: {}", e);
                return Some(LineEvent::Interrupt);
            }
        };
        match rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(LineEvent::Interrupt),
        }
    }

    fn set_waker(&mut self, waker: Arc<Waker>) {
        self.waker = Some(waker);
    }
}

/// Scripted input, shared between the device and whoever feeds it.
#[derive(Clone, Default)]
pub struct ScriptedLines {
    queue: Arc<Mutex<VecDeque<LineEvent>>>,
    waker: Arc<Mutex<Option<Arc<Waker>>>>,
}

impl ScriptedLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an input event and wake the host.
    pub fn push(&self, event: LineEvent) {
        self.queue.lock().push_back(event);
        if let Some(waker) = self.waker.lock().as_ref() {
            let _ = waker.wake();
        }
    }

    /// Queue a line of text.
    pub fn push_line(&self, line: &str) {
        self.push(LineEvent::Line(line.to_string()));
    }
}

impl LineSource for ScriptedLines {
    fn poll_line(&mut self) -> Option<LineEvent> {
        self.queue.lock().pop_front()
    }

    fn set_waker(&mut self, waker: Arc<Waker>) {
        *self.waker.lock() = Some(waker);
    }
}

/// The STDIO device.
pub struct StdioDriver {
    source: Box<dyn LineSource>,
    output: Box<dyn Write + Send>,
    /// Tail of a line longer than the last READ's buffer
    carry: Vec<u8>,
    null: bool,
}

impl StdioDriver {
    /// Console device over `source`, writing to stdout.
    pub fn new(source: Box<dyn LineSource>) -> Self {
        Self::with_output(source, Box::new(io::stdout()))
    }

    /// Console device writing to `output`.
    pub fn with_output(source: Box<dyn LineSource>, output: Box<dyn Write + Send>) -> Self {
        Self {
            source,
            output,
            carry: Vec::new(),
            null: false,
        }
    }

    fn init(&mut self, _req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
        self.null = ctx.config().stdio_null;
        Outcome::Done
    }

    fn quit(&mut self, _req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let _ = self.output.flush();
        Outcome::Done
    }

    fn open(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        if self.null {
            req.modes.insert(Modes::NULL);
        }
        Outcome::Done
    }

    fn close(&mut self, _req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let _ = self.output.flush();
        Outcome::Done
    }

    fn write(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let len = req.length.min(req.data.len());
        if req.modes.contains(Modes::NULL) || self.null {
            req.actual = len;
            return Outcome::Done;
        }
        if let Err(e) = self.output.write_all(&req.data[..len]) {
            return req.fail_io(DeviceError::BadWrite, &e);
        }
        if let Err(e) = self.output.flush() {
            return req.fail_io(DeviceError::BadWrite, &e);
        }
        req.actual = len;
        Outcome::Done
    }

    fn read(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
        if req.length < 2 {
            return req.fail(DeviceError::BadRead);
        }
        if self.carry.is_empty() {
            match self.source.poll_line() {
                None => return Outcome::Pend,
                Some(LineEvent::Cancel) => {
                    req.data.push(CANCEL_BYTE);
                    req.actual = 1;
                    ctx.signal(req, EventType::Read);
                    return Outcome::Done;
                }
                Some(LineEvent::Interrupt) => {
                    log::debug!("[STDIO] input interrupted");
                    req.actual = 0;
                    ctx.signal(req, EventType::Read);
                    return Outcome::Done;
                }
                Some(LineEvent::Line(mut line)) => {
                    if !line.ends_with('\n') {
                        line.push('\n');
                    }
                    self.carry = line.into_bytes();
                }
            }
        }
        let n = self.carry.len().min(req.length);
        req.data.extend(self.carry.drain(..n));
        req.actual = n;
        ctx.signal(req, EventType::Read);
        Outcome::Done
    }
}

impl Driver for StdioDriver {
    const NAME: &'static str = "stdio";

    fn table() -> CommandTable<Self> {
        CommandTable::new()
            .with(Command::Init, Self::init)
            .with(Command::Quit, Self::quit)
            .with(Command::Open, Self::open)
            .with(Command::Close, Self::close)
            .with(Command::Read, Self::read)
            .with(Command::Write, Self::write)
    }
}
