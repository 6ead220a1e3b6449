//! TxnScope Address Watcher Library
//!
//! This crate provides components for consuming a ledger node's transaction
//! feed, filtering for watched addresses, and notifying a webhook sink.

pub mod config;
pub mod connection;
pub mod decoder;
pub mod filter;
pub mod notifier;
pub mod shutdown;
pub mod trytes;
pub mod watcher;
pub mod zmtp;

// Re-export commonly used types
pub use config::{ConfigError, WatcherConfig};
pub use connection::{ConnectionManager, ConnectionState, FeedError, FeedSocket, Frame, ZmqFeedSocket};
pub use decoder::{decode_frame, DecodeError, TransactionRecord};
pub use filter::{should_notify, WatchSet};
pub use notifier::{Notify, NotifyError, WebhookNotifier};
pub use watcher::{Watcher, WatcherStats};
