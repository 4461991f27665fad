// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SERIAL device: raw serial lines through termios.
//!
//! OPEN puts the line in raw non-blocking mode with the payload's baud,
//! character size, parity, stop bits and flow control, remembering the prior
//! attributes so CLOSE can restore them. READ and WRITE never block; a
//! would-block result returns PEND and the generic re-driver retries.
//! Open lines are registered with the EVENT device's poll registry so input
//! ends the scheduler's sleep.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Read, Write};

use mio::{Registry, Token};

use super::{CommandTable, DeviceCtx, Driver};
use crate::error::DeviceError;
use crate::event::EventType;
use crate::request::{Command, Modes, Outcome, Request, Requestee};

/// Line attributes saved by OPEN.
#[derive(Clone)]
pub struct SavedAttr {
    #[cfg(unix)]
    termios: libc::termios,
}

impl fmt::Debug for SavedAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SavedAttr").finish_non_exhaustive()
    }
}

/// Tokens for serial lines, clear of the NET device's range.
const SERIAL_TOKEN_BASE: usize = usize::MAX / 2;

/// The SERIAL device.
#[derive(Debug, Default)]
pub struct SerialDriver {
    registry: Option<Registry>,
    next_token: usize,
}

impl SerialDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serial device whose lines wake polls on `registry`.
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry: Some(registry),
            next_token: 0,
        }
    }

    #[cfg(unix)]
    fn register(&mut self, handle: &std::fs::File) {
        use mio::unix::SourceFd;
        use std::os::unix::io::AsRawFd;

        let Some(registry) = &self.registry else {
            return;
        };
        let token = Token(SERIAL_TOKEN_BASE + self.next_token);
        self.next_token = (self.next_token + 1) % SERIAL_TOKEN_BASE;
        let fd = handle.as_raw_fd();
        if let Err(e) = registry.register(
            &mut SourceFd(&fd),
            token,
            mio::Interest::READABLE | mio::Interest::WRITABLE,
        ) {
            log::debug!("[SERIAL] register failed: {}", e);
        }
    }

    #[cfg(unix)]
    fn deregister(&self, handle: &std::fs::File) {
        use mio::unix::SourceFd;
        use std::os::unix::io::AsRawFd;

        if let Some(registry) = &self.registry {
            let _ = registry.deregister(&mut SourceFd(&handle.as_raw_fd()));
        }
    }

    #[cfg(not(unix))]
    fn register(&mut self, _handle: &std::fs::File) {}

    #[cfg(not(unix))]
    fn deregister(&self, _handle: &std::fs::File) {}

    #[cfg(unix)]
    fn open(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        let Some(serial) = req.payload.serial_mut() else {
            return req.fail(DeviceError::NoHandle);
        };
        let Some(speed) = baud_constant(serial.baud) else {
            log::debug!("[SERIAL] unsupported baud rate {}", serial.baud);
            return req.fail(DeviceError::NoModes);
        };

        let handle = match OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(&serial.path)
        {
            Ok(handle) => handle,
            Err(e) => {
                log::debug!("[SERIAL] open {} failed: {}", serial.path.display(), e);
                return req.fail_io(DeviceError::OpenFail, &e);
            }
        };
        let fd = handle.as_raw_fd();

        // SAFETY: termios is plain old data; tcgetattr fully initializes it on success.
        let mut prior: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: fd is a valid open descriptor owned by `handle`.
        if unsafe { libc::tcgetattr(fd, &mut prior) } != 0 {
            let e = io::Error::last_os_error();
            return req.fail_io(DeviceError::OpenFail, &e);
        }

        let mut attr = prior;
        // SAFETY: attr is a valid termios value.
        unsafe { libc::cfmakeraw(&mut attr) };
        attr.c_cflag |= libc::CLOCAL | libc::CREAD;
        attr.c_cflag &= !libc::CSIZE;
        attr.c_cflag |= match serial.data_bits {
            5 => libc::CS5,
            6 => libc::CS6,
            7 => libc::CS7,
            _ => libc::CS8,
        };
        if serial.stop_bits == 2 {
            attr.c_cflag |= libc::CSTOPB;
        } else {
            attr.c_cflag &= !libc::CSTOPB;
        }
        match serial.parity {
            crate::request::Parity::None => attr.c_cflag &= !(libc::PARENB | libc::PARODD),
            crate::request::Parity::Even => {
                attr.c_cflag |= libc::PARENB;
                attr.c_cflag &= !libc::PARODD;
            }
            crate::request::Parity::Odd => attr.c_cflag |= libc::PARENB | libc::PARODD,
        }
        attr.c_iflag &= !(libc::IXON | libc::IXOFF);
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            attr.c_cflag &= !libc::CRTSCTS;
        }
        match serial.flow {
            crate::request::FlowControl::None => {}
            crate::request::FlowControl::Software => attr.c_iflag |= libc::IXON | libc::IXOFF,
            crate::request::FlowControl::Hardware => {
                #[cfg(any(target_os = "linux", target_os = "macos"))]
                {
                    attr.c_cflag |= libc::CRTSCTS;
                }
            }
        }

        // SAFETY: attr is valid; fd is open.
        let rc = unsafe {
            libc::cfsetispeed(&mut attr, speed);
            libc::cfsetospeed(&mut attr, speed);
            libc::tcsetattr(fd, libc::TCSANOW, &attr)
        };
        if rc != 0 {
            let e = io::Error::last_os_error();
            return req.fail_io(DeviceError::OpenFail, &e);
        }

        log::debug!(
            "[SERIAL] open {} at {} baud",
            serial.path.display(),
            serial.baud
        );
        serial.prior_attr = Some(SavedAttr { termios: prior });
        self.register(&handle);
        req.requestee = Requestee::File(handle);
        Outcome::Done
    }

    #[cfg(not(unix))]
    fn open(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        req.fail(DeviceError::OpenFail)
    }

    fn close(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let prior = req.payload.serial_mut().and_then(|s| s.prior_attr.take());
        if let Requestee::File(handle) = &req.requestee {
            self.deregister(handle);
            if let Some(prior) = prior {
                restore(handle, &prior);
            }
        }
        req.requestee = Requestee::None;
        Outcome::Done
    }

    fn read(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
        if req.length == 0 {
            req.actual = 0;
            return Outcome::Done;
        }
        let Requestee::File(handle) = &mut req.requestee else {
            return req.fail(DeviceError::NotOpen);
        };
        let start = req.data.len();
        req.data.resize(start + req.length, 0);
        let result = handle.read(&mut req.data[start..]);
        match result {
            Ok(n) => {
                req.data.truncate(start + n);
                req.actual = n;
                ctx.signal(req, EventType::Read);
                Outcome::Done
            }
            Err(e) => {
                req.data.truncate(start);
                if is_retry(&e) {
                    Outcome::Pend
                } else {
                    req.fail_io(DeviceError::ReadError, &e)
                }
            }
        }
    }

    fn write(&mut self, req: &mut Request, ctx: &mut DeviceCtx<'_>) -> Outcome {
        let end = req.length.min(req.data.len());
        if req.actual >= end {
            return Outcome::Done;
        }
        let Requestee::File(handle) = &mut req.requestee else {
            return req.fail(DeviceError::NotOpen);
        };
        match handle.write(&req.data[req.actual..end]) {
            Ok(n) => {
                req.actual += n;
                if req.actual < end {
                    req.flags.insert(crate::request::ReqFlags::ACTIVE);
                    return Outcome::Pend;
                }
                if req.modes.contains(Modes::WRITE) {
                    let _ = handle.flush();
                }
                ctx.signal(req, EventType::Wrote);
                Outcome::Done
            }
            Err(e) if is_retry(&e) => Outcome::Pend,
            Err(e) => req.fail_io(DeviceError::WriteError, &e),
        }
    }
}

fn is_retry(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(unix)]
fn restore(handle: &std::fs::File, prior: &SavedAttr) {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor is open and prior came from tcgetattr on it.
    if unsafe { libc::tcsetattr(handle.as_raw_fd(), libc::TCSANOW, &prior.termios) } != 0 {
        log::debug!(
            "[SERIAL] restoring line attributes failed: {}",
            io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn restore(_handle: &std::fs::File, _prior: &SavedAttr) {}

/// termios speed constant for a baud rate.
#[cfg(unix)]
fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        50 => libc::B50,
        75 => libc::B75,
        110 => libc::B110,
        134 => libc::B134,
        150 => libc::B150,
        200 => libc::B200,
        300 => libc::B300,
        600 => libc::B600,
        1200 => libc::B1200,
        1800 => libc::B1800,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        _ => return None,
    };
    Some(speed)
}

impl Driver for SerialDriver {
    const NAME: &'static str = "serial";

    fn table() -> CommandTable<Self> {
        CommandTable::new()
            .with(Command::Open, Self::open)
            .with(Command::Close, Self::close)
            .with(Command::Read, Self::read)
            .with(Command::Write, Self::write)
    }
}
