// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking name resolution behind a crossbeam worker pool.
//!
//! ```text
//!  submit ──> Job{ticket, query} ──(crossbeam)──> <name>-0..N (getaddrinfo / getnameinfo)
//!                                                     │
//!  collect <── Completion{ticket, result} <─(crossbeam)┘ + Waker::wake()
//! ```
//!
//! Used by the DNS device (READ) and the NET device (LOOKUP). A device keeps
//! the ticket in its request and asks [`ResolverPool::ticket`] from its poll
//! op. With no workers [`ResolverPool::submit`] returns `None` and the caller
//! resolves inline.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use mio::Waker;

use super::net::resolve_v4;
use crate::request::HostInfo;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Query {
    Forward(String),
    Reverse(Ipv4Addr),
}

struct Job {
    ticket: u64,
    query: Query,
}

struct Completion {
    ticket: u64,
    result: Option<HostInfo>,
}

/// Where a submitted lookup stands.
#[derive(Debug)]
pub(crate) enum Ticket {
    /// Answered; `None` when the name does not resolve
    Ready(Option<HostInfo>),
    /// Still with a worker, submitted at the given instant
    Waiting(Instant),
    /// Never submitted, cancelled or already taken
    Unknown,
}

/// Run `query` on the calling thread.
pub(crate) fn resolve(query: &Query) -> Option<HostInfo> {
    match query {
        Query::Forward(name) => match resolve_v4(name) {
            Ok(addrs) => Some(HostInfo {
                name: Some(name.clone()),
                addrs,
            }),
            Err(e) => {
                log::debug!("[DNS] {} not found: {}", name, e);
                None
            }
        },
        Query::Reverse(ip) => reverse_lookup(*ip).map(|name| HostInfo {
            name: Some(name),
            addrs: vec![*ip],
        }),
    }
}

/// Canonical name of `ip`, or `None` when it has none.
#[cfg(unix)]
pub(crate) fn reverse_lookup(ip: Ipv4Addr) -> Option<String> {
    use std::ffi::CStr;
    use std::net::SocketAddrV4;

    const HOST_LEN: usize = 1025;
    let addr = socket2::SockAddr::from(SocketAddrV4::new(ip, 0));
    let mut host = [0 as libc::c_char; HOST_LEN];
    // SAFETY: addr points to a valid sockaddr of addr.len() bytes; host is a
    // writable buffer of HOST_LEN bytes; no service buffer is requested.
    let rc = unsafe {
        libc::getnameinfo(
            addr.as_ptr(),
            addr.len(),
            host.as_mut_ptr(),
            HOST_LEN as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };
    if rc != 0 {
        log::debug!("[DNS] no name for {} (getnameinfo {})", ip, rc);
        return None;
    }
    // SAFETY: getnameinfo NUL-terminates host on success.
    let name = unsafe { CStr::from_ptr(host.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
pub(crate) fn reverse_lookup(_ip: Ipv4Addr) -> Option<String> {
    None
}

/// Worker threads plus the bookkeeping of submitted tickets.
pub(crate) struct ResolverPool {
    name: &'static str,
    waker: Option<Arc<Waker>>,
    jobs: Option<Sender<Job>>,
    completions: Option<Receiver<Completion>>,
    workers: Vec<JoinHandle<()>>,
    /// Ticket -> when the lookup was submitted
    inflight: HashMap<u64, Instant>,
    /// Completions received but not yet taken
    results: HashMap<u64, Option<HostInfo>>,
    next_ticket: u64,
}

impl ResolverPool {
    /// Idle pool; threads are named `<name>-N` once started.
    pub(crate) fn new(name: &'static str, waker: Option<Arc<Waker>>) -> Self {
        Self {
            name,
            waker,
            jobs: None,
            completions: None,
            workers: Vec::new(),
            inflight: HashMap::new(),
            results: HashMap::new(),
            next_ticket: 1,
        }
    }

    pub(crate) fn set_waker(&mut self, waker: Arc<Waker>) {
        self.waker = Some(waker);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.jobs.is_some()
    }

    /// Spawn `count` workers unless already running. Returns how many run.
    pub(crate) fn start(&mut self, count: usize) -> usize {
        if count == 0 || self.is_running() {
            return self.workers.len();
        }
        let (job_tx, job_rx) = channel::unbounded::<Job>();
        let (done_tx, done_rx) = channel::unbounded::<Completion>();
        for i in 0..count {
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            let waker = self.waker.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.name, i))
                .spawn(move || {
                    for job in jobs.iter() {
                        let result = resolve(&job.query);
                        if done
                            .send(Completion {
                                ticket: job.ticket,
                                result,
                            })
                            .is_err()
                        {
                            break;
                        }
                        if let Some(waker) = &waker {
                            let _ = waker.wake();
                        }
                    }
                });
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(e) => {
                    log::warn!("[DNS] cannot spawn {} worker: {}", self.name, e);
                    break;
                }
            }
        }
        if self.workers.is_empty() {
            log::warn!("[DNS] no {} workers, resolving inline", self.name);
            return 0;
        }
        log::debug!("[DNS] {} {} workers started", self.workers.len(), self.name);
        self.jobs = Some(job_tx);
        self.completions = Some(done_rx);
        self.workers.len()
    }

    /// Close the job channel, join the workers and forget every ticket.
    pub(crate) fn stop(&mut self) {
        self.jobs = None;
        self.completions = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.inflight.clear();
        self.results.clear();
    }

    /// Hand `query` to a worker. `None` when no pool is running.
    pub(crate) fn submit(&mut self, query: Query) -> Option<u64> {
        let jobs = self.jobs.as_ref()?;
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        match jobs.send(Job {
            ticket,
            query: query.clone(),
        }) {
            Ok(()) => {
                log::debug!("[DNS] {:?} queued as ticket {}", query, ticket);
                self.inflight.insert(ticket, Instant::now());
                Some(ticket)
            }
            Err(_) => {
                log::warn!("[DNS] {} pool gone, resolving inline", self.name);
                None
            }
        }
    }

    /// Move finished lookups out of the completion channel.
    pub(crate) fn collect(&mut self) {
        let Some(completions) = &self.completions else {
            return;
        };
        for done in completions.try_iter() {
            // Cancelled tickets are discarded here.
            if self.inflight.contains_key(&done.ticket) {
                self.results.insert(done.ticket, done.result);
            }
        }
    }

    /// State of `ticket`; a ready answer is taken and the ticket forgotten.
    pub(crate) fn ticket(&mut self, ticket: u64) -> Ticket {
        if let Some(result) = self.results.remove(&ticket) {
            self.inflight.remove(&ticket);
            return Ticket::Ready(result);
        }
        match self.inflight.get(&ticket) {
            Some(started) => Ticket::Waiting(*started),
            None => Ticket::Unknown,
        }
    }

    /// Whether `ticket` is still owed an answer.
    pub(crate) fn is_inflight(&self, ticket: u64) -> bool {
        self.inflight.contains_key(&ticket)
    }

    /// Forget `ticket`; a late answer is dropped by [`ResolverPool::collect`].
    pub(crate) fn cancel(&mut self, ticket: u64) {
        self.inflight.remove(&ticket);
        self.results.remove(&ticket);
    }

    /// Lookups submitted and not yet taken or cancelled.
    pub(crate) fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Answers held for tickets nobody has taken yet.
    pub(crate) fn held(&self) -> usize {
        self.results.len()
    }
}

impl Drop for ResolverPool {
    fn drop(&mut self) {
        self.jobs = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
