//! Watcher Configuration
//!
//! Immutable settings assembled once at startup and handed to the
//! connection manager, the notifier and the watcher loop.

use std::time::Duration;

use thiserror::Error;

use crate::decoder::TRYTES_TOPIC;
use crate::filter::WatchSet;
use crate::notifier::DEFAULT_NOTIFY_TIMEOUT;

/// Default feed endpoint
pub const DEFAULT_NODE_URI: &str = "tcp://example.com:5556";

/// Default timeout for a single dial attempt
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between reconnect attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub const DEFAULT_TX_EXPLORER_URI: &str = "https://explorer.iota.org/mainnet/transaction";
pub const DEFAULT_BUNDLE_EXPLORER_URI: &str = "https://explorer.iota.org/mainnet/bundle";
pub const DEFAULT_ADDRESS_EXPLORER_URI: &str = "https://explorer.iota.org/mainnet/address";

/// Errors raised while building or validating configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("Feed URI cannot be empty")]
    EmptyFeedUri,

    #[error("Dial timeout must be greater than zero")]
    ZeroDialTimeout,

    #[error("No addresses to watch")]
    EmptyWatchSet,
}

/// Upstream feed settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// Pub/sub endpoint, e.g. `tcp://host:5556`
    pub uri: String,
    /// Topic to subscribe to
    pub topic: String,
    /// Bound on a single dial attempt
    pub dial_timeout: Duration,
    /// Fixed pause between reconnect attempts
    pub retry_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_NODE_URI.to_string(),
            topic: TRYTES_TOPIC.to_string(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl FeedConfig {
    /// Create a feed config for the given endpoint
    pub fn with_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }
}

/// Match filter settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    pub watch_set: WatchSet,
    /// Only notify on transactions that move value
    pub only_value: bool,
    /// Log every decoded transaction
    pub observe_all: bool,
}

/// Explorer base URIs used to build notification links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerConfig {
    pub tx_base_uri: String,
    pub bundle_base_uri: String,
    pub address_base_uri: String,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            tx_base_uri: DEFAULT_TX_EXPLORER_URI.to_string(),
            bundle_base_uri: DEFAULT_BUNDLE_EXPLORER_URI.to_string(),
            address_base_uri: DEFAULT_ADDRESS_EXPLORER_URI.to_string(),
        }
    }
}

/// Notification sink settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Webhook endpoint; empty disables delivery
    pub webhook_uri: String,
    /// Bound on a single delivery request
    pub timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            webhook_uri: String::new(),
            timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }
}

/// Complete watcher configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherConfig {
    pub feed: FeedConfig,
    pub filter: FilterConfig,
    pub explorer: ExplorerConfig,
    pub sink: SinkConfig,
}

impl WatcherConfig {
    /// Reject configurations the watcher cannot start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.uri.trim().is_empty() {
            return Err(ConfigError::EmptyFeedUri);
        }
        if self.feed.dial_timeout.is_zero() {
            return Err(ConfigError::ZeroDialTimeout);
        }
        if self.filter.watch_set.is_empty() {
            return Err(ConfigError::EmptyWatchSet);
        }
        Ok(())
    }
}

/// Parse a duration such as `500ms`, `5s`, `2m` or `1h`
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let trimmed = input.trim();
    let invalid = || ConfigError::InvalidDuration(input.to_string());

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let amount: u64 = number.parse().map_err(|_| invalid())?;

    let seconds = match unit {
        "ms" => return Ok(Duration::from_millis(amount)),
        "" | "s" => Some(amount),
        "m" => amount.checked_mul(60),
        "h" => amount.checked_mul(3600),
        _ => return Err(invalid()),
    };
    seconds.map(Duration::from_secs).ok_or_else(invalid)
}
