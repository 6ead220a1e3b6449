//! Address Filtering
//!
//! Decides whether a decoded transaction touches a watched address and
//! should trigger a notification.

use std::collections::HashSet;

use crate::decoder::TransactionRecord;

/// Immutable set of watched addresses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSet {
    addresses: HashSet<String>,
}

impl WatchSet {
    /// Build a watch set from individual addresses
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses
                .into_iter()
                .map(Into::into)
                .filter(|a: &String| !a.is_empty())
                .collect(),
        }
    }

    /// Parse a comma-separated address list
    ///
    /// Entries are trimmed; empty entries are skipped and duplicates collapse.
    pub fn from_csv(list: &str) -> Self {
        Self::new(list.split(',').map(str::trim))
    }

    /// Check whether an address is watched
    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.addresses.iter().map(String::as_str)
    }
}

/// Decide whether a transaction should be notified
///
/// # Arguments
/// * `record` - The decoded transaction
/// * `watch_set` - Addresses of interest
/// * `only_value` - Ignore transactions that move no value
///
/// # Returns
/// `true` if the transaction touches a watched address and passes the value gate
pub fn should_notify(record: &TransactionRecord, watch_set: &WatchSet, only_value: bool) -> bool {
    if only_value && record.value == 0 {
        return false;
    }
    watch_set.contains(&record.address)
}
