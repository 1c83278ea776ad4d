//! Startup configuration for a membership node.
//!
//! All timeouts are expressed in protocol periods (ticks). A node never
//! discovers these values at runtime; every participant of one deployment is
//! expected to run with the same settings.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;

use crate::address::NodeAddress;

// Protocol constants
const SUSPICION_TIMEOUT: u64 = 5;
const REMOVAL_TIMEOUT: u64 = 20;
const GOSSIP_FANOUT: usize = 3; // Number of members to gossip to per round
const PROTOCOL_PERIOD_MS: u64 = 1000;
const DEFAULT_PORT: u16 = 7946;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("suspicion timeout ({suspicion}) must be lower than removal timeout ({removal})")]
    SuspicionNotBelowRemoval { suspicion: u64, removal: u64 },
    #[error("suspicion timeout must be at least one tick")]
    ZeroSuspicionTimeout,
    #[error("gossip fanout must be at least 1")]
    ZeroFanout,
    #[error("protocol period must be at least 1ms")]
    ZeroProtocolPeriod,
    #[error("invalid join retry settings: {0}")]
    JoinRetry(&'static str),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Bounded retry of the join handshake with exponential backoff.
///
/// Delays are counted in ticks. Without this section a joining node sends a
/// single request and waits for a reply indefinitely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinRetryConfig {
    /// Total number of join requests sent before giving up
    pub max_attempts: u32,
    /// Delay before the first resend
    pub initial_backoff: u64,
    /// Upper bound on the delay between two requests
    pub max_backoff: u64,
    /// Multiplier applied to the delay after each unanswered request
    pub multiplier: u64,
}

impl Default for JoinRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: 2,
            max_backoff: 16,
            multiplier: 2,
        }
    }
}

impl JoinRetryConfig {
    /// Ticks to wait after the given (1-based) attempt before sending the next one.
    pub fn backoff(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

// MembershipConfig holds configuration for the membership protocol
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    pub introducer: SocketAddrV4,
    pub suspicion_timeout: u64,
    pub removal_timeout: u64,
    pub fanout: usize,
    pub protocol_period_ms: u64,
    pub rng_seed: Option<u64>,
    pub join_retry: Option<JoinRetryConfig>,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            introducer: SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT),
            suspicion_timeout: SUSPICION_TIMEOUT,
            removal_timeout: REMOVAL_TIMEOUT,
            fanout: GOSSIP_FANOUT,
            protocol_period_ms: PROTOCOL_PERIOD_MS,
            rng_seed: None,
            join_retry: None,
        }
    }
}

impl MembershipConfig {
    pub fn with_introducer(mut self, introducer: NodeAddress) -> Self {
        self.introducer = introducer.socket_addr();
        self
    }

    pub fn introducer_address(&self) -> NodeAddress {
        NodeAddress::from(self.introducer)
    }

    /// Load a JSON config file. Missing fields fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.suspicion_timeout == 0 {
            return Err(ConfigError::ZeroSuspicionTimeout);
        }
        if self.suspicion_timeout >= self.removal_timeout {
            return Err(ConfigError::SuspicionNotBelowRemoval {
                suspicion: self.suspicion_timeout,
                removal: self.removal_timeout,
            });
        }
        if self.fanout == 0 {
            return Err(ConfigError::ZeroFanout);
        }
        if self.protocol_period_ms == 0 {
            return Err(ConfigError::ZeroProtocolPeriod);
        }
        if let Some(retry) = &self.join_retry {
            if retry.max_attempts == 0 {
                return Err(ConfigError::JoinRetry("max_attempts must be at least 1"));
            }
            if retry.initial_backoff == 0 {
                return Err(ConfigError::JoinRetry("initial_backoff must be at least 1 tick"));
            }
            if retry.multiplier == 0 {
                return Err(ConfigError::JoinRetry("multiplier must be at least 1"));
            }
            if retry.max_backoff < retry.initial_backoff {
                return Err(ConfigError::JoinRetry("max_backoff is below initial_backoff"));
            }
        }
        Ok(())
    }
}
