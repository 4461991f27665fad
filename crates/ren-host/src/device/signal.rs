// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SIGNAL device: POSIX signals surfaced as readable bytes.
//!
//! The handler only sets a bit in a process-wide atomic mask. READ takes the
//! bits the request listens for and returns one byte per signal number; with
//! nothing pending it returns PEND and the generic re-driver retries. A
//! delivered signal also interrupts the EVENT device sleep, so the retry
//! happens on the next wait cycle.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{CommandTable, DeviceCtx, Driver};
use crate::error::DeviceError;
use crate::event::EventType;
use crate::request::{Command, Outcome, Request};

/// Signals raised but not yet read, one bit per signal number.
static PENDING_SIGNALS: AtomicU64 = AtomicU64::new(0);

#[cfg(unix)]
extern "C" fn record_signal(sig: libc::c_int) {
    if (1..64).contains(&sig) {
        PENDING_SIGNALS.fetch_or(1u64 << sig, Ordering::SeqCst);
    }
}

fn mask_bits(mask: &[i32]) -> u64 {
    mask.iter()
        .filter(|s| (1..64).contains(*s))
        .fold(0, |bits, s| bits | (1u64 << *s))
}

/// The SIGNAL device.
#[derive(Debug, Default)]
pub struct SignalDriver;

impl SignalDriver {
    pub fn new() -> Self {
        Self
    }

    #[cfg(unix)]
    fn open(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let Some(signal) = req.payload.signal_mut() else {
            return req.fail(DeviceError::NoHandle);
        };
        if signal.mask.is_empty() || signal.mask.iter().any(|s| !(1..64).contains(s)) {
            return req.fail(DeviceError::NoModes);
        }
        let handler = record_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        let mut installed = Vec::with_capacity(signal.mask.len());
        for &sig in &signal.mask {
            // SAFETY: record_signal only touches an atomic, which is async-signal-safe.
            let prior = unsafe { libc::signal(sig, handler) };
            if prior == libc::SIG_ERR {
                let e = std::io::Error::last_os_error();
                for (sig, prior) in installed.drain(..) {
                    // SAFETY: prior is a disposition returned by libc::signal.
                    unsafe { libc::signal(sig, prior) };
                }
                log::debug!("[SIGNAL] cannot install handler for {}: {}", sig, e);
                return req.fail_io(DeviceError::OpenFail, &e);
            }
            installed.push((sig, prior));
        }
        log::debug!("[SIGNAL] listening for {:?}", signal.mask);
        signal.restore_mask = installed;
        Outcome::Done
    }

    #[cfg(not(unix))]
    fn open(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        req.fail(DeviceError::OpenFail)
    }

    fn close(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        if let Some(signal) = req.payload.signal_mut() {
            #[cfg(unix)]
            for (sig, prior) in signal.restore_mask.drain(..) {
                // SAFETY: prior is a disposition returned by libc::signal.
                unsafe { libc::signal(sig, prior) };
            }
            PENDING_SIGNALS.fetch_and(!mask_bits(&signal.mask), Ordering::SeqCst);
        }
        Outcome::Done
    }

    fn read(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
        req.actual = 0;
        if req.length == 0 {
            return Outcome::Done;
        }
        let Some(signal) = req.payload.signal() else {
            return req.fail(DeviceError::NoHandle);
        };
        let bits = mask_bits(&signal.mask);
        let taken = PENDING_SIGNALS.fetch_and(!bits, Ordering::SeqCst) & bits;
        if taken == 0 {
            return Outcome::Pend;
        }
        let numbers: Vec<u8> = (1..64u8).filter(|s| taken & (1u64 << s) != 0).collect();
        let n = numbers.len().min(req.length);
        req.data.extend_from_slice(&numbers[..n]);
        req.actual = n;
        ctx.signal(req, EventType::Read);
        Outcome::Done
    }
}

impl Driver for SignalDriver {
    const NAME: &'static str = "signal";

    fn table() -> CommandTable<Self> {
        CommandTable::new()
            .with(Command::Open, Self::open)
            .with(Command::Close, Self::close)
            .with(Command::Read, Self::read)
    }
}
