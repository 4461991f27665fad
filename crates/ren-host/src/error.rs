// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the device layer and the port actors.
//!
//! Two levels:
//!
//! - [`DeviceError`] - stable-ordinal codes stored in a request when a device
//!   op (or the dispatcher) fails. Ports observe these as integers.
//! - [`PortError`] - what a port actor hands back to its caller: the device,
//!   the port reference and the OS error code, or a URL/state problem.

use std::io;

use thiserror::Error;

use crate::device::DeviceId;
use crate::port::PortId;

/// Device-level error codes.
///
/// The ordinals are part of the external contract and never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[repr(i32)]
pub enum DeviceError {
    /// Device id does not name a registered device.
    #[error("no such device")]
    NoDevice = 0,
    /// Device requires initialization but has no INIT op (or INIT failed).
    #[error("device not initialized")]
    NoInit = 1,
    /// Device has no op for the requested command.
    #[error("command not supported by device")]
    NoCommand = 2,
    /// Request carries no usable OS handle.
    #[error("no handle")]
    NoHandle = 3,
    /// Request modes are invalid for the command.
    #[error("invalid modes")]
    NoModes = 4,
    /// OS open failed.
    #[error("open failed")]
    OpenFail = 5,
    /// Seek to an invalid position.
    #[error("bad seek")]
    BadSeek = 6,
    /// Handle cannot seek.
    #[error("seek not supported")]
    NoSeek = 7,
    /// Read failed.
    #[error("read failed")]
    BadRead = 8,
    /// Write failed.
    #[error("write failed")]
    BadWrite = 9,
    /// No space left on the target volume.
    #[error("disk full")]
    DiskFull = 10,
    /// Connect failed or was refused.
    #[error("cannot connect")]
    NoConnect = 11,
    /// Operation needs a connected socket.
    #[error("not connected")]
    NotConnected = 12,
    /// Port target (host, port, path) is malformed.
    #[error("invalid port spec")]
    InvalidSpec = 13,
    /// Socket or resolver could not be allocated.
    #[error("cannot open")]
    CannotOpen = 14,
    /// Network or resolver read failed.
    #[error("read error")]
    ReadError = 15,
    /// Network write failed.
    #[error("write error")]
    WriteError = 16,
    /// Operation needs an open port.
    #[error("port not open")]
    NotOpen = 17,
}

impl DeviceError {
    /// All codes in ordinal order.
    pub const ALL: [DeviceError; 18] = [
        DeviceError::NoDevice,
        DeviceError::NoInit,
        DeviceError::NoCommand,
        DeviceError::NoHandle,
        DeviceError::NoModes,
        DeviceError::OpenFail,
        DeviceError::BadSeek,
        DeviceError::NoSeek,
        DeviceError::BadRead,
        DeviceError::BadWrite,
        DeviceError::DiskFull,
        DeviceError::NoConnect,
        DeviceError::NotConnected,
        DeviceError::InvalidSpec,
        DeviceError::CannotOpen,
        DeviceError::ReadError,
        DeviceError::WriteError,
        DeviceError::NotOpen,
    ];

    /// Integer code surfaced to ports.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Inverse of [`DeviceError::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Pick the closest code for an I/O failure on a write path.
    pub(crate) fn for_write(err: &io::Error, fallback: DeviceError) -> DeviceError {
        #[cfg(unix)]
        if err.raw_os_error() == Some(libc::ENOSPC) {
            return DeviceError::DiskFull;
        }
        let _ = err;
        fallback
    }
}

/// Errors returned by port actors.
#[derive(Debug, Error)]
pub enum PortError {
    /// A device command failed (synchronously or through an ERROR event).
    #[error("{device} device error on port {port}: {code}{}", os_suffix(.os_error))]
    Device {
        /// Device that executed the command
        device: DeviceId,
        /// Port whose request failed
        port: PortId,
        /// Taxonomy code
        code: DeviceError,
        /// Raw OS error, when one was reported
        os_error: Option<i32>,
    },

    /// URL could not be parsed into a port target.
    #[error("invalid port url: {0}")]
    InvalidUrl(String),

    /// Operation requires an open port.
    #[error("port {0} is not open")]
    NotOpen(PortId),

    /// Request slot vanished from the host (port used after close).
    #[error("port {0} has no request")]
    NoRequest(PortId),

    /// A HALT was requested while waiting.
    #[error("halted")]
    Halted,

    /// Host construction or teardown failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn os_suffix(os_error: &Option<i32>) -> String {
    match os_error {
        Some(code) => format!(" (os error {})", code),
        None => String::new(),
    }
}

/// Result alias for port actor operations.
pub type Result<T> = std::result::Result<T, PortError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable_ordinals() {
        assert_eq!(DeviceError::NoDevice.code(), 0);
        assert_eq!(DeviceError::NoCommand.code(), 2);
        assert_eq!(DeviceError::NoConnect.code(), 11);
        assert_eq!(DeviceError::NotOpen.code(), 17);
        for (i, code) in DeviceError::ALL.iter().enumerate() {
            assert_eq!(code.code() as usize, i);
            assert_eq!(DeviceError::from_code(i as i32), Some(*code));
        }
        assert_eq!(DeviceError::from_code(-1), None);
        assert_eq!(DeviceError::from_code(18), None);
    }

    #[test]
    fn test_port_error_display_carries_os_code() {
        let err = PortError::Device {
            device: DeviceId::Net,
            port: PortId(3),
            code: DeviceError::NoConnect,
            os_error: Some(111),
        };
        let text = err.to_string();
        assert!(text.contains("net"));
        assert!(text.contains("cannot connect"));
        assert!(text.contains("os error 111"));
    }
}
