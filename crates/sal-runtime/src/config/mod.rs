//! Socket layer configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Environment variables (runtime)
//! 2. The file named by `SAL_CONFIG_RS` (compile-time)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use sal_runtime::config::SalConfig;
//!
//! let config = SalConfig::from_env()
//!     .num_sockets(32)
//!     .recv_poll(Duration::from_millis(5));
//! ```

pub mod defaults;

use std::time::Duration;

use sal_core::env::{env_get, env_get_bool};
use sal_core::{FdLayout, FD_SETSIZE};

/// Socket layer configuration with builder pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalConfig {
    /// Capacity of the socket table
    pub num_sockets: usize,
    /// Capacity of the event table
    pub num_events: usize,
    /// First socket descriptor
    pub socket_base: i32,
    /// Largest payload `send` accepts
    pub max_payload: usize,
    /// Sleep between empty polls in `recv`
    pub recv_poll: Duration,
    /// Longest host name accepted by name resolution
    pub dns_max_name_len: usize,
    /// Reuse one wake semaphore per thread instead of one per select call
    pub sem_per_thread: bool,
}

impl Default for SalConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SalConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SAL_NUM_SOCKETS` - Socket table capacity
    /// - `SAL_NUM_EVENTS` - Event table capacity
    /// - `SAL_SOCKET_BASE` - First socket descriptor
    /// - `SAL_MAX_PAYLOAD` - Largest send payload in bytes
    /// - `SAL_RECV_POLL_MS` - recv poll quantum in milliseconds
    /// - `SAL_DNS_MAX_NAME_LEN` - Longest resolvable host name
    /// - `SAL_SEM_PER_THREAD` - Per-thread wake semaphore (0/1)
    pub fn from_env() -> Self {
        Self {
            num_sockets: env_get("NUM_SOCKETS", defaults::NUM_SOCKETS),
            num_events: env_get("NUM_EVENTS", defaults::NUM_EVENTS),
            socket_base: env_get("SOCKET_BASE", defaults::SOCKET_BASE),
            max_payload: env_get("MAX_PAYLOAD", defaults::MAX_PAYLOAD),
            recv_poll: Duration::from_millis(env_get("RECV_POLL_MS", defaults::RECV_POLL_MS)),
            dns_max_name_len: env_get("DNS_MAX_NAME_LEN", defaults::DNS_MAX_NAME_LEN),
            sem_per_thread: env_get_bool("SEM_PER_THREAD", defaults::SEM_PER_THREAD),
        }
    }

    /// Create config with compile-time defaults only (no env override)
    pub fn new() -> Self {
        Self {
            num_sockets: defaults::NUM_SOCKETS,
            num_events: defaults::NUM_EVENTS,
            socket_base: defaults::SOCKET_BASE,
            max_payload: defaults::MAX_PAYLOAD,
            recv_poll: Duration::from_millis(defaults::RECV_POLL_MS),
            dns_max_name_len: defaults::DNS_MAX_NAME_LEN,
            sem_per_thread: defaults::SEM_PER_THREAD,
        }
    }

    // Builder methods

    pub fn num_sockets(mut self, n: usize) -> Self {
        self.num_sockets = n;
        self
    }

    pub fn num_events(mut self, n: usize) -> Self {
        self.num_events = n;
        self
    }

    pub fn socket_base(mut self, base: i32) -> Self {
        self.socket_base = base;
        self
    }

    pub fn max_payload(mut self, bytes: usize) -> Self {
        self.max_payload = bytes;
        self
    }

    pub fn recv_poll(mut self, d: Duration) -> Self {
        self.recv_poll = d;
        self
    }

    pub fn dns_max_name_len(mut self, len: usize) -> Self {
        self.dns_max_name_len = len;
        self
    }

    pub fn sem_per_thread(mut self, enable: bool) -> Self {
        self.sem_per_thread = enable;
        self
    }

    /// Descriptor layout implied by this config
    pub fn layout(&self) -> FdLayout {
        FdLayout::new(self.socket_base, self.num_sockets, self.num_events)
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_sockets == 0 {
            return Err(ConfigError::InvalidValue("num_sockets must be > 0"));
        }
        if self.num_events == 0 {
            return Err(ConfigError::InvalidValue("num_events must be > 0"));
        }
        if self.socket_base < 0 {
            return Err(ConfigError::InvalidValue("socket_base must be >= 0"));
        }
        if self.max_payload == 0 {
            return Err(ConfigError::InvalidValue("max_payload must be > 0"));
        }
        let end = self.socket_base as usize + self.num_sockets + self.num_events;
        if end > FD_SETSIZE {
            return Err(ConfigError::InvalidValue(
                "socket_base + num_sockets + num_events must be <= FD_SETSIZE",
            ));
        }
        if self.dns_max_name_len == 0 {
            return Err(ConfigError::InvalidValue("dns_max_name_len must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        let layout = self.layout();
        eprintln!("SAL Configuration:");
        eprintln!("  num_sockets:       {}", self.num_sockets);
        eprintln!("  num_events:        {}", self.num_events);
        eprintln!("  socket fds:        [{}, {})", layout.socket_base, layout.event_base());
        eprintln!("  event fds:         [{}, {})", layout.event_base(), layout.end());
        eprintln!("  max_payload:       {}", self.max_payload);
        eprintln!("  recv_poll:         {:?}", self.recv_poll);
        eprintln!("  dns_max_name_len:  {}", self.dns_max_name_len);
        eprintln!("  sem_per_thread:    {}", self.sem_per_thread);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
