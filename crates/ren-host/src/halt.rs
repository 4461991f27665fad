// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide HALT request.
//!
//! The interrupt handler only sets an atomic flag (and wakes the scheduler's
//! sleep). The interpreter checks [`halt_requested`] at safe points; nothing
//! in the device layer unwinds because of it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::Waker;

static HALT: AtomicBool = AtomicBool::new(false);

/// Ask the interpreter to halt at its next safe point.
pub fn request_halt() {
    HALT.store(true, Ordering::SeqCst);
}

/// Whether a halt is pending.
pub fn halt_requested() -> bool {
    HALT.load(Ordering::SeqCst)
}

/// Acknowledge a pending halt; returns whether one was pending.
pub fn clear_halt() -> bool {
    HALT.swap(false, Ordering::SeqCst)
}

/// Route SIGINT / Ctrl-C to [`request_halt`], waking `waker` so a sleeping
/// `wait` returns promptly.
///
/// Can only be installed once per process; a second call returns the
/// `ctrlc` error.
pub fn install_interrupt_handler(waker: Arc<Waker>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        request_halt();
        let _ = waker.wake();
    })?;
    log::debug!("[SIGNAL] interrupt handler installed");
    Ok(())
}
