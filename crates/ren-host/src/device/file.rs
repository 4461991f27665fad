// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FILE device: synchronous file and directory access.
//!
//! Every op completes (DONE or ERROR) in the calling frame; nothing is ever
//! queued, so the device needs no poll op and posts no events.
//!
//! Seek policy for READ and WRITE:
//!
//! - `SEEK` or `RESEEK`: seek to `file.index` first, then clear `RESEEK`.
//! - `APPEND` (WRITE only): seek to the end, then clear `APPEND`.
//! - `TRUNCATE` (WRITE only): cut the file at the position reached by the seek.
//!
//! A READ on a directory handle returns the next entry name (`/`-suffixed for
//! subdirectories) and `actual == 0` once the listing is exhausted.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};

use super::{CommandTable, DeviceCtx, Driver};
use crate::error::DeviceError;
use crate::request::{Command, DirEntryInfo, FilePayload, Modes, Outcome, Request, Requestee};

/// The FILE device.
#[derive(Debug, Default)]
pub struct FileDriver;

impl FileDriver {
    pub fn new() -> Self {
        Self
    }

    fn open(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let Some(file) = req.payload.file() else {
            return req.fail(DeviceError::NoHandle);
        };
        let path = file.path.clone();

        let is_dir = req.modes.contains(Modes::DIR) || path.is_dir();
        if is_dir {
            return match fs::read_dir(&path) {
                Ok(iter) => {
                    log::debug!("[FILE] open dir {}", path.display());
                    req.modes.insert(Modes::DIR);
                    req.requestee = Requestee::Dir(iter);
                    Outcome::Done
                }
                Err(e) => {
                    log::debug!("[FILE] open dir {} failed: {}", path.display(), e);
                    req.fail_io(DeviceError::OpenFail, &e)
                }
            };
        }

        let modes = req.modes;
        let write = modes.intersects(Modes::WRITE | Modes::APPEND | Modes::NEW)
            && !modes.contains(Modes::READONLY);
        let read = modes.contains(Modes::READ) || !write;
        if modes.contains(Modes::READONLY) && modes.intersects(Modes::NEW | Modes::TRUNCATE) {
            return req.fail(DeviceError::NoModes);
        }

        let mut options = OpenOptions::new();
        options.read(read).write(write);
        if modes.contains(Modes::NEW) {
            options.create(true).truncate(true);
        }
        match options.open(&path) {
            Ok(handle) => {
                log::debug!("[FILE] open {} (modes {:?})", path.display(), modes);
                if let Some(file) = req.payload.file_mut() {
                    stat_into(file, &handle);
                }
                req.requestee = Requestee::File(handle);
                Outcome::Done
            }
            Err(e) => {
                log::debug!("[FILE] open {} failed: {}", path.display(), e);
                req.fail_io(DeviceError::OpenFail, &e)
            }
        }
    }

    fn close(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        if let Requestee::File(handle) = &mut req.requestee {
            let _ = handle.flush();
        }
        req.requestee = Requestee::None;
        req.modes.remove(Modes::DIR);
        Outcome::Done
    }

    fn read(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        req.actual = 0;
        if matches!(req.requestee, Requestee::Dir(_)) {
            return self.read_dir_entry(req);
        }
        if req.length == 0 {
            return Outcome::Done;
        }
        let Requestee::File(handle) = &mut req.requestee else {
            return req.fail(DeviceError::NoHandle);
        };
        let Some(file) = req.payload.file_mut() else {
            return req.fail(DeviceError::NoHandle);
        };

        if req.modes.intersects(Modes::SEEK | Modes::RESEEK) {
            if let Err(e) = handle.seek(SeekFrom::Start(file.index)) {
                return req.fail_io(DeviceError::BadSeek, &e);
            }
            req.modes.remove(Modes::RESEEK);
        }

        let start = req.data.len();
        req.data.resize(start + req.length, 0);
        let mut filled = 0;
        let result = loop {
            if filled == req.length {
                break Ok(());
            }
            match handle.read(&mut req.data[start + filled..]) {
                Ok(0) => break Ok(()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        req.data.truncate(start + filled);
        if let Err(e) = result {
            return req.fail_io(DeviceError::BadRead, &e);
        }
        file.index += filled as u64;
        req.actual = filled;
        Outcome::Done
    }

    fn read_dir_entry(&mut self, req: &mut Request) -> Outcome {
        let Requestee::Dir(iter) = &mut req.requestee else {
            return req.fail(DeviceError::NoHandle);
        };
        let next = iter.next();
        let entry = match next {
            None => None,
            Some(Ok(entry)) => {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                Some(DirEntryInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    is_dir,
                })
            }
            Some(Err(e)) => return req.fail_io(DeviceError::BadRead, &e),
        };
        if let Some(info) = &entry {
            req.data.extend_from_slice(info.name.as_bytes());
            if info.is_dir {
                req.data.push(b'/');
            }
            req.actual = info.name.len() + usize::from(info.is_dir);
            req.length = req.length.max(req.actual);
        }
        if let Some(file) = req.payload.file_mut() {
            file.entry = entry;
            file.index += 1;
        }
        Outcome::Done
    }

    fn write(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        req.actual = 0;
        let Requestee::File(handle) = &mut req.requestee else {
            return req.fail(DeviceError::NoHandle);
        };
        let Some(file) = req.payload.file_mut() else {
            return req.fail(DeviceError::NoHandle);
        };

        let seeked = if req.modes.contains(Modes::APPEND) {
            req.modes.remove(Modes::APPEND);
            handle.seek(SeekFrom::End(0))
        } else if req.modes.intersects(Modes::SEEK | Modes::RESEEK) {
            req.modes.remove(Modes::RESEEK);
            handle.seek(SeekFrom::Start(file.index))
        } else {
            handle.stream_position()
        };
        let position = match seeked {
            Ok(pos) => pos,
            Err(e) => return req.fail_io(DeviceError::BadSeek, &e),
        };
        if req.modes.contains(Modes::TRUNCATE) {
            if let Err(e) = handle.set_len(position) {
                return req.fail_io(DeviceError::for_write(&e, DeviceError::BadWrite), &e);
            }
        }

        let len = req.length.min(req.data.len());
        if let Err(e) = handle.write_all(&req.data[..len]) {
            return req.fail_io(DeviceError::for_write(&e, DeviceError::BadWrite), &e);
        }
        file.index = position + len as u64;
        stat_into(file, handle);
        req.actual = len;
        Outcome::Done
    }

    fn query(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let Some(file) = req.payload.file_mut() else {
            return req.fail(DeviceError::NoHandle);
        };
        match fs::metadata(&file.path) {
            Ok(meta) => {
                file.size = Some(meta.len());
                file.time = meta.modified().ok();
                if meta.is_dir() {
                    req.modes.insert(Modes::DIR);
                } else {
                    req.modes.remove(Modes::DIR);
                }
                Outcome::Done
            }
            Err(e) => req.fail_io(DeviceError::CannotOpen, &e),
        }
    }

    fn create(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let Some(file) = req.payload.file() else {
            return req.fail(DeviceError::NoHandle);
        };
        let result = if req.modes.contains(Modes::DIR) {
            fs::create_dir(&file.path)
        } else {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&file.path)
                .map(drop)
        };
        match result {
            Ok(()) => Outcome::Done,
            Err(e) => {
                log::debug!("[FILE] create {} failed: {}", file.path.display(), e);
                req.fail_io(DeviceError::for_write(&e, DeviceError::NoModes), &e)
            }
        }
    }

    fn delete(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let Some(file) = req.payload.file() else {
            return req.fail(DeviceError::NoHandle);
        };
        let result = if req.modes.contains(Modes::DIR) || file.path.is_dir() {
            fs::remove_dir(&file.path)
        } else {
            fs::remove_file(&file.path)
        };
        match result {
            Ok(()) => Outcome::Done,
            Err(e) => req.fail_io(DeviceError::NoHandle, &e),
        }
    }

    fn rename(&mut self, req: &mut Request, _ctx: &mut DeviceCtx<'_>) -> Outcome {
        let Some(file) = req.payload.file() else {
            return req.fail(DeviceError::NoHandle);
        };
        let Some(target) = file.new_path.clone() else {
            return req.fail(DeviceError::NoModes);
        };
        match fs::rename(&file.path, &target) {
            Ok(()) => {
                if let Some(file) = req.payload.file_mut() {
                    file.path = target;
                    file.new_path = None;
                }
                Outcome::Done
            }
            Err(e) => req.fail_io(DeviceError::NoHandle, &e),
        }
    }
}

fn stat_into(file: &mut FilePayload, handle: &File) {
    if let Ok(meta) = handle.metadata() {
        file.size = Some(meta.len());
        file.time = meta.modified().ok();
    }
}

impl Driver for FileDriver {
    const NAME: &'static str = "file";

    fn table() -> CommandTable<Self> {
        CommandTable::new()
            .with(Command::Open, Self::open)
            .with(Command::Close, Self::close)
            .with(Command::Read, Self::read)
            .with(Command::Write, Self::write)
            .with(Command::Query, Self::query)
            .with(Command::Create, Self::create)
            .with(Command::Delete, Self::delete)
            .with(Command::Rename, Self::rename)
    }
}
