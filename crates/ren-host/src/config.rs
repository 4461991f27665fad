// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host configuration.
//!
//! - **Level 1 (Static)**: compile-time defaults (buffer sizes, DNS timeout).
//! - **Level 2 (Dynamic)**: [`HostConfig`], built with `with_*` setters or
//!   read from `REN_HOST_*` environment variables via [`HostConfig::from_env`].
//!
//! # Example
//!
//! ```
//! use ren_host::config::HostConfig;
//! use std::time::Duration;
//!
//! let config = HostConfig::default()
//!     .with_dns_workers(0)
//!     .with_dns_timeout(Duration::from_millis(1500));
//! assert_eq!(config.dns_workers, 0);
//! ```

use std::time::Duration;

/// Network read accumulation unit. Actors keep at least half of this free
/// at the tail of their port buffer before each READ.
pub const NET_BUF_SIZE: usize = 32 * 1024;

/// Default deadline for a DNS resolution.
pub const DNS_TIMEOUT: Duration = Duration::from_millis(4000);

/// Default bound of the global event queue.
pub const EVENT_QUEUE_CAPACITY: usize = 512;

/// Default number of resolver worker threads.
pub const DNS_WORKERS: usize = 2;

/// Default TCP listen backlog.
pub const LISTEN_BACKLOG: i32 = 128;

/// Default scheduler resolution (sleeps shorter than this are skipped).
pub const WAIT_RESOLUTION: Duration = Duration::from_millis(1);

/// Runtime configuration of a [`crate::Host`].
#[derive(Clone, Debug)]
pub struct HostConfig {
    /// Maximum queued events; posts beyond this are dropped.
    pub event_queue_capacity: usize,

    /// Port read buffer growth unit (see [`NET_BUF_SIZE`]).
    pub net_buf_size: usize,

    /// DNS resolution deadline applied to requests without their own timeout.
    pub dns_timeout: Duration,

    /// Resolver worker threads (0 = resolve synchronously inside READ).
    pub dns_workers: usize,

    /// Backlog passed to `listen(2)`.
    pub listen_backlog: i32,

    /// Floor below which `wait` returns instead of sleeping.
    pub wait_resolution: Duration,

    /// Reap terminated child processes on every wait.
    pub reap_children: bool,

    /// Discard STDIO output (the `NULL` mode for all stdio requests).
    pub stdio_null: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: EVENT_QUEUE_CAPACITY,
            net_buf_size: NET_BUF_SIZE,
            dns_timeout: DNS_TIMEOUT,
            dns_workers: DNS_WORKERS,
            listen_backlog: LISTEN_BACKLOG,
            wait_resolution: WAIT_RESOLUTION,
            reap_children: true,
            stdio_null: false,
        }
    }
}

impl HostConfig {
    /// Defaults overridden by `REN_HOST_*` environment variables.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `REN_HOST_EVENT_QUEUE` | `event_queue_capacity` |
    /// | `REN_HOST_NET_BUF` | `net_buf_size` |
    /// | `REN_HOST_DNS_TIMEOUT_MS` | `dns_timeout` |
    /// | `REN_HOST_DNS_WORKERS` | `dns_workers` |
    /// | `REN_HOST_REAP_CHILDREN` | `reap_children` (`0` disables) |
    /// | `REN_HOST_STDIO_NULL` | `stdio_null` (`1` enables) |
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse::<usize>("REN_HOST_EVENT_QUEUE") {
            config.event_queue_capacity = v;
        }
        if let Some(v) = env_parse::<usize>("REN_HOST_NET_BUF") {
            config.net_buf_size = v.max(2);
        }
        if let Some(v) = env_parse::<u64>("REN_HOST_DNS_TIMEOUT_MS") {
            config.dns_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<usize>("REN_HOST_DNS_WORKERS") {
            config.dns_workers = v;
        }
        if let Ok(v) = std::env::var("REN_HOST_REAP_CHILDREN") {
            config.reap_children = v != "0";
        }
        if let Ok(v) = std::env::var("REN_HOST_STDIO_NULL") {
            config.stdio_null = v == "1";
        }
        config
    }

    /// Builder: set the event queue bound
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Builder: set the net buffer growth unit
    pub fn with_net_buf_size(mut self, size: usize) -> Self {
        self.net_buf_size = size.max(2);
        self
    }

    /// Builder: set the DNS deadline
    pub fn with_dns_timeout(mut self, timeout: Duration) -> Self {
        self.dns_timeout = timeout;
        self
    }

    /// Builder: set resolver worker count
    pub fn with_dns_workers(mut self, workers: usize) -> Self {
        self.dns_workers = workers;
        self
    }

    /// Builder: set listen backlog
    pub fn with_listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    /// Builder: set wait resolution
    pub fn with_wait_resolution(mut self, resolution: Duration) -> Self {
        self.wait_resolution = resolution;
        self
    }

    /// Builder: enable/disable child reaping
    pub fn with_reap_children(mut self, reap: bool) -> Self {
        self.reap_children = reap;
        self
    }

    /// Builder: discard stdio output
    pub fn with_stdio_null(mut self, null: bool) -> Self {
        self.stdio_null = null;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("[CONFIG] ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}
