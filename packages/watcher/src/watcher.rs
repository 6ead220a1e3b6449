//! Watcher Loop
//!
//! Drives the feed connection under a shutdown signal: receive, decode,
//! filter and notify. Nothing that happens to a single frame ends the
//! loop; only shutdown does.
//!
//! Notification delivery is awaited inline, so a slow webhook delays the
//! next frame by at most the sink timeout.

use tracing::{error, info, warn};

use crate::config::FilterConfig;
use crate::connection::{ConnectionManager, FeedError, FeedSocket, Frame, RetryPause, TokioPause};
use crate::decoder::decode_frame;
use crate::filter::should_notify;
use crate::notifier::Notify;
use crate::shutdown::Shutdown;

/// Counters collected over one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub frames_received: u64,
    pub decode_failures: u64,
    pub recv_errors: u64,
    pub reconnects: u64,
    pub matched: u64,
    pub notifications_sent: u64,
    pub notification_failures: u64,
}

/// What happened to a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Frame could not be decoded
    Malformed,
    /// Decoded but not of interest
    Unmatched,
    /// Matched and delivered
    Notified,
    /// Matched but delivery failed
    NotifyFailed,
}

/// Address watcher: connection + filter + notifier
pub struct Watcher<S, N, P = TokioPause> {
    connection: ConnectionManager<S, P>,
    notifier: N,
    filter: FilterConfig,
    stats: WatcherStats,
}

impl<S, N, P> Watcher<S, N, P>
where
    S: FeedSocket,
    N: Notify,
    P: RetryPause,
{
    pub fn new(connection: ConnectionManager<S, P>, notifier: N, filter: FilterConfig) -> Self {
        Self {
            connection,
            notifier,
            filter,
            stats: WatcherStats::default(),
        }
    }

    pub fn stats(&self) -> WatcherStats {
        self.stats
    }

    pub fn connection(&self) -> &ConnectionManager<S, P> {
        &self.connection
    }

    /// Consume the feed until shutdown, then release the socket
    ///
    /// A connection that is not yet subscribed goes through the reconnect
    /// protocol first.
    pub async fn run(mut self, mut shutdown: Shutdown) -> WatcherStats {
        info!(
            "Address watcher started ({} addresses, only value: {})",
            self.filter.watch_set.len(),
            self.filter.only_value
        );

        self.consume(&mut shutdown).await;
        self.connection.close().await;

        info!("Address watcher shutdown: {:?}", self.stats);
        self.stats
    }

    async fn consume(&mut self, shutdown: &mut Shutdown) {
        while !shutdown.is_cancelled() {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.connection.receive() => received,
            };

            match received {
                Ok(frame) => {
                    self.stats.frames_received += 1;
                    self.process_frame(&frame).await;
                }
                Err(FeedError::StreamClosed) | Err(FeedError::NotConnected) => {
                    warn!("The remote server closed the connection");
                    // Only shutdown ends a reconnect cycle early
                    let Ok(attempts) = self.connection.reconnect(shutdown).await else {
                        break;
                    };
                    self.stats.reconnects += 1;
                    info!("Successfully reconnected after {} attempt(s)", attempts);
                }
                Err(e) => {
                    self.stats.recv_errors += 1;
                    warn!("Could not receive message: {}", e);
                }
            }
        }
    }

    /// Decode, filter and, on a match, notify for one frame
    pub async fn process_frame(&mut self, frame: &Frame) -> FrameOutcome {
        let record = match decode_frame(frame.as_bytes()) {
            Ok(record) => record,
            Err(e) => {
                self.stats.decode_failures += 1;
                warn!("Unable to parse transaction from feed: {}", e);
                return FrameOutcome::Malformed;
            }
        };

        if self.filter.observe_all {
            info!("{} {}", record.hash, record.address);
        }

        if !should_notify(&record, &self.filter.watch_set, self.filter.only_value) {
            return FrameOutcome::Unmatched;
        }

        self.stats.matched += 1;
        info!("Seen tx {} on monitored address {}", record.hash, record.address);

        match self.notifier.notify(&record).await {
            Ok(()) => {
                self.stats.notifications_sent += 1;
                FrameOutcome::Notified
            }
            Err(e) => {
                self.stats.notification_failures += 1;
                error!(reason = e.reason(), "Could not send webhook payload: {}", e);
                FrameOutcome::NotifyFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MockFeedSocket;
    use crate::filter::WatchSet;
    use crate::notifier::{MockNotify, NotifyError};
    use crate::trytes::{self, i64_to_trytes, pad_trytes, TRANSACTION_TRYTES_LEN};
    use crate::{config::FeedConfig, shutdown};

    fn watched() -> String {
        pad_trytes("ADDRXYZ", 81)
    }

    fn frame(address: &str, value: i64) -> Frame {
        let mut body = "9".repeat(TRANSACTION_TRYTES_LEN);
        body.replace_range(trytes::ADDRESS.offset..trytes::ADDRESS.end(), &pad_trytes(address, 81));
        body.replace_range(
            trytes::VALUE.offset..trytes::VALUE.end(),
            &i64_to_trytes(value, trytes::VALUE.len).unwrap(),
        );
        Frame::new(format!("trytes {} HASH999", body))
    }

    fn filter(only_value: bool) -> FilterConfig {
        FilterConfig {
            watch_set: WatchSet::new([watched()]),
            only_value,
            observe_all: true,
        }
    }

    fn watcher(notifier: MockNotify, only_value: bool) -> Watcher<MockFeedSocket, MockNotify> {
        let connection = ConnectionManager::new(MockFeedSocket::new(), FeedConfig::default());
        Watcher::new(connection, notifier, filter(only_value))
    }

    fn status_error() -> NotifyError {
        NotifyError::Status {
            status: 500,
            body: "invalid_payload".to_string(),
        }
    }

    // ==================== process_frame tests ====================

    #[tokio::test]
    async fn test_matched_zero_value_is_notified() {
        let mut notifier = MockNotify::new();
        notifier
            .expect_notify()
            .withf(|record| record.hash == "HASH999" && record.value == 0)
            .times(1)
            .returning(|_| Ok(()));

        let mut watcher = watcher(notifier, false);
        let outcome = watcher.process_frame(&frame("ADDRXYZ", 0)).await;

        assert_eq!(outcome, FrameOutcome::Notified);
        assert_eq!(watcher.stats().matched, 1);
        assert_eq!(watcher.stats().notifications_sent, 1);
    }

    #[tokio::test]
    async fn test_only_value_suppresses_zero_value() {
        let mut notifier = MockNotify::new();
        notifier.expect_notify().never();

        let mut watcher = watcher(notifier, true);
        let outcome = watcher.process_frame(&frame("ADDRXYZ", 0)).await;

        assert_eq!(outcome, FrameOutcome::Unmatched);
        assert_eq!(watcher.stats().matched, 0);
    }

    #[tokio::test]
    async fn test_only_value_passes_value_transfer() {
        let mut notifier = MockNotify::new();
        notifier.expect_notify().times(1).returning(|_| Ok(()));

        let mut watcher = watcher(notifier, true);
        assert_eq!(watcher.process_frame(&frame("ADDRXYZ", 25)).await, FrameOutcome::Notified);
    }

    #[tokio::test]
    async fn test_unwatched_address_is_not_notified() {
        let mut notifier = MockNotify::new();
        notifier.expect_notify().never();

        let mut watcher = watcher(notifier, false);
        assert_eq!(watcher.process_frame(&frame("OTHER", 25)).await, FrameOutcome::Unmatched);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let mut notifier = MockNotify::new();
        notifier.expect_notify().never();

        let mut watcher = watcher(notifier, false);
        let outcome = watcher.process_frame(&Frame::new("trytes ONLYONEFIELD")).await;

        assert_eq!(outcome, FrameOutcome::Malformed);
        assert_eq!(watcher.stats().decode_failures, 1);
    }

    #[tokio::test]
    async fn test_notify_failure_does_not_block_next_frame() {
        let mut notifier = MockNotify::new();
        let mut calls = 0;
        notifier.expect_notify().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(status_error())
            } else {
                Ok(())
            }
        });

        let mut watcher = watcher(notifier, false);
        assert_eq!(watcher.process_frame(&frame("ADDRXYZ", 1)).await, FrameOutcome::NotifyFailed);
        assert_eq!(watcher.process_frame(&frame("ADDRXYZ", 2)).await, FrameOutcome::Notified);

        let stats = watcher.stats();
        assert_eq!(stats.notification_failures, 1);
        assert_eq!(stats.notifications_sent, 1);
    }

    // ==================== run tests ====================

    #[tokio::test]
    async fn test_run_exits_immediately_when_cancelled() {
        let mut socket = MockFeedSocket::new();
        socket.expect_recv().never();
        socket.expect_close().times(1).returning(|| ());

        let connection = ConnectionManager::new(socket, FeedConfig::default());
        let watcher = Watcher::new(connection, MockNotify::new(), filter(false));

        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();

        let stats = watcher.run(shutdown).await;
        assert_eq!(stats, WatcherStats::default());
    }
}
