// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global event queue: the only wakeup path from devices to ports.
//!
//! Devices post DEVICE-model events referencing the request that changed
//! ([`EventQueue::post_device`]); the interpreter side drains the queue and
//! hands each event to the port that owns the eventee. The queue is bounded:
//! a post on a full queue is dropped and reported as `false`.

use std::collections::VecDeque;

use bitflags::bitflags;

use crate::port::PortId;
use crate::request::{ReqId, Request};

/// Event types (stable ordinals).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventType {
    Open = 0,
    Close = 1,
    Read = 2,
    Wrote = 3,
    Connect = 4,
    Accept = 5,
    Error = 6,
    Port = 7,
    Time = 8,
}

/// Who generated the event and how to interpret the eventee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventModel {
    /// Device completion; eventee is a request
    Device,
    /// Port-level notification; eventee is a port
    Port,
    Object,
    Gui,
    Callback,
}

bitflags! {
    /// Event flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EventFlags: u8 {
        /// Event was copied out of the queue
        const COPIED = 1 << 0;
        /// `data` holds packed x/y coordinates
        const HAS_XY = 1 << 1;
        /// Coalesced repeat
        const DOUBLE = 1 << 2;
    }
}

/// Target of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Eventee {
    Request(ReqId),
    Port(PortId),
}

/// One queued event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventType,
    pub flags: EventFlags,
    pub model: EventModel,
    /// Model-specific word (bytes transferred for device events)
    pub data: u32,
    pub eventee: Eventee,
}

impl Event {
    /// Device-model event for `req`.
    pub fn device(req: &Request, kind: EventType) -> Self {
        Self {
            kind,
            flags: EventFlags::empty(),
            model: EventModel::Device,
            data: u32::try_from(req.actual).unwrap_or(u32::MAX),
            eventee: Eventee::Request(req.id()),
        }
    }

    /// Port-model event for `port`.
    pub fn port(port: PortId, kind: EventType) -> Self {
        Self {
            kind,
            flags: EventFlags::empty(),
            model: EventModel::Port,
            data: 0,
            eventee: Eventee::Port(port),
        }
    }

    /// Request this event refers to, if any.
    pub fn request(&self) -> Option<ReqId> {
        match self.eventee {
            Eventee::Request(id) => Some(id),
            Eventee::Port(_) => None,
        }
    }
}

/// Bounded, insertion-ordered event queue.
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<Event>,
    capacity: usize,
    dropped: u64,
}

impl EventQueue {
    /// Queue holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Append an event; `false` when the queue is full.
    pub fn post(&mut self, event: Event) -> bool {
        if self.events.len() >= self.capacity {
            self.dropped += 1;
            log::warn!(
                "[EVENT] queue full ({}), dropping {:?} for {:?}",
                self.capacity,
                event.kind,
                event.eventee
            );
            return false;
        }
        self.events.push_back(event);
        true
    }

    /// Post a device event waking the owner of `req`.
    pub fn post_device(&mut self, req: &Request, kind: EventType) -> bool {
        self.post(Event::device(req, kind))
    }

    /// Most recent queued event of this model and type, for in-place coalescing.
    pub fn find(&mut self, model: EventModel, kind: EventType) -> Option<&mut Event> {
        self.events
            .iter_mut()
            .rev()
            .find(|e| e.model == model && e.kind == kind)
    }

    /// Remove the oldest event.
    pub fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Remove all events in order.
    pub fn drain(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    /// Put events back at the front, keeping their relative order.
    ///
    /// Used by waiters that pulled events they do not own; the capacity
    /// bound is not applied since these were already admitted once.
    pub fn requeue_front(&mut self, events: Vec<Event>) {
        for event in events.into_iter().rev() {
            self.events.push_front(event);
        }
    }

    /// Remove the newest `kind` event addressed to `id`.
    ///
    /// Used when a failure was already reported to the caller synchronously.
    pub fn retract(&mut self, id: ReqId, kind: EventType) -> bool {
        let found = self
            .events
            .iter()
            .rposition(|e| e.kind == kind && e.eventee == Eventee::Request(id));
        match found {
            Some(pos) => self.events.remove(pos).is_some(),
            None => false,
        }
    }

    /// Drop every event addressed to `id`.
    pub fn purge_request(&mut self, id: ReqId) {
        self.events.retain(|e| e.eventee != Eventee::Request(id));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    /// Posts rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }
}
