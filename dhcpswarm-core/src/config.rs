//! Immutable run configuration
//!
//! The whole simulator is driven by one [`SimConfig`] value built up front
//! (normally from the CLI) and passed by reference. Nothing reads ambient
//! global state.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::ProtocolVariant;

/// Which protocol family (or mix) a run exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    V4,
    V6,
    /// Alternate v4/v6 identities by session index
    Dual,
}

impl RunMode {
    /// The protocol variant assigned to the session at `index`
    pub fn variant_for(&self, index: usize) -> ProtocolVariant {
        match self {
            RunMode::V4 => ProtocolVariant::V4,
            RunMode::V6 => ProtocolVariant::V6,
            RunMode::Dual => {
                if index % 2 == 0 {
                    ProtocolVariant::V4
                } else {
                    ProtocolVariant::V6
                }
            }
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::V4 => write!(f, "v4"),
            RunMode::V6 => write!(f, "v6"),
            RunMode::Dual => write!(f, "dual"),
        }
    }
}

/// Per-phase retransmission policy
///
/// Attempt `n` waits `base * 2^n`, clamped to `cap`, for a matching reply
/// before retransmitting; after `max_attempts` windows the phase fails.
/// `max_restarts` bounds how many times a NAKed exchange may start over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
    pub max_restarts: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32, max_restarts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            max_restarts,
        }
    }

    /// The reply-wait window for a zero-based attempt number
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // RFC 2131-flavored retransmission timing
        Self {
            base: Duration::from_secs(4),
            cap: Duration::from_secs(64),
            max_attempts: 4,
            max_restarts: 3,
        }
    }
}

/// Immutable configuration for one simulator run
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Protocol family mix
    pub mode: RunMode,
    /// Network interface the raw channel binds to
    pub interface: String,
    /// Total number of simulated clients
    pub total_clients: usize,
    /// Hard ceiling on simultaneously active sessions
    pub max_concurrent: usize,
    /// How long a bound session holds its lease before self-releasing
    pub hold: Duration,
    /// Expected DHCPv4 server address (readiness logging, RELEASE fallback)
    pub server_v4: Option<Ipv4Addr>,
    /// Budget for the server readiness probe; `None` skips the probe
    pub server_wait: Option<Duration>,
    /// Retransmission policy shared by every session
    pub retry: RetryPolicy,
    /// Upper bound on the shutdown release pass
    pub grace: Duration,
}

impl SimConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_clients(mut self, total: usize) -> Self {
        self.total_clients = total;
        self
    }

    pub fn with_concurrency(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn with_server_v4(mut self, server: Ipv4Addr) -> Self {
        self.server_v4 = Some(server);
        self
    }

    pub fn with_server_wait(mut self, budget: Option<Duration>) -> Self {
        self.server_wait = budget;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Reject configurations the orchestrator cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.interface.is_empty() {
            return Err(Error::invalid_parameter("interface", "must not be empty"));
        }
        if self.total_clients == 0 {
            return Err(Error::invalid_parameter(
                "total_clients",
                "must be at least 1",
            ));
        }
        if self.max_concurrent == 0 {
            return Err(Error::invalid_parameter(
                "max_concurrent",
                "must be at least 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::invalid_parameter(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if self.retry.base.is_zero() {
            return Err(Error::invalid_parameter(
                "retry.base",
                "must be positive",
            ));
        }
        if self.retry.cap < self.retry.base {
            return Err(Error::invalid_parameter(
                "retry.cap",
                "must not be below retry.base",
            ));
        }
        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::V4,
            interface: "eth0".to_string(),
            total_clients: 50,
            max_concurrent: 10,
            hold: Duration::from_secs(30),
            server_v4: None,
            server_wait: Some(Duration::from_secs(30)),
            retry: RetryPolicy::default(),
            grace: Duration::from_secs(5),
        }
    }
}
