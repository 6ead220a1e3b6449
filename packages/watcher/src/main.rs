//! TxnScope Address Watcher
//!
//! Subscribes to a node's `trytes` feed, logs transactions touching the
//! watched addresses and posts a Slack-style message for each of them.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};

use txnscope_watcher::config::{
    parse_duration, ExplorerConfig, FeedConfig, FilterConfig, SinkConfig, WatcherConfig,
    DEFAULT_ADDRESS_EXPLORER_URI, DEFAULT_BUNDLE_EXPLORER_URI, DEFAULT_NODE_URI, DEFAULT_TX_EXPLORER_URI,
};
use txnscope_watcher::decoder::TRYTES_TOPIC;
use txnscope_watcher::shutdown::{self, ShutdownTrigger};
use txnscope_watcher::{ConnectionManager, WatchSet, Watcher, WebhookNotifier, ZmqFeedSocket};

/// Watch a transaction feed for activity on a set of addresses
#[derive(Parser, Debug)]
#[command(name = "txnscope-watcher")]
struct Args {
    /// The URI of the node's pub/sub feed
    #[arg(long, env = "WATCHER_NODE", default_value = DEFAULT_NODE_URI)]
    node: String,

    /// Timeout for a single dial to the feed
    #[arg(long, env = "WATCHER_DIAL_TIMEOUT", default_value = "5s", value_parser = parse_duration_arg)]
    dial_timeout: Duration,

    /// Interval between redials after the feed closes the connection
    #[arg(long, env = "WATCHER_CONN_RETRY_INTERVAL", default_value = "5s", value_parser = parse_duration_arg)]
    conn_retry_interval: Duration,

    /// Addresses to watch (comma separated, 81 tryte addresses)
    #[arg(long, env = "WATCHER_ADDRS")]
    addrs: String,

    /// Webhook receiving the notifications; empty disables delivery
    #[arg(long, env = "WATCHER_SLACK_WEBHOOK_URI", default_value = "")]
    slack_webhook_uri: String,

    /// Only notify on transactions that move value
    #[arg(long, env = "WATCHER_ONLY_VALUE")]
    only_value: bool,

    /// Log every decoded transaction
    #[arg(long, env = "WATCHER_LOG_ANY_SEEN_TX")]
    log_any_seen_tx: bool,

    #[arg(long, env = "WATCHER_EXPLORER_TXS_URI", default_value = DEFAULT_TX_EXPLORER_URI)]
    explorer_txs_uri: String,

    #[arg(long, env = "WATCHER_EXPLORER_BUNDLE_URI", default_value = DEFAULT_BUNDLE_EXPLORER_URI)]
    explorer_bundle_uri: String,

    #[arg(long, env = "WATCHER_EXPLORER_ADDRS_URI", default_value = DEFAULT_ADDRESS_EXPLORER_URI)]
    explorer_addrs_uri: String,

    /// Timeout for a single webhook request
    #[arg(long, env = "WATCHER_NOTIFY_TIMEOUT", default_value = "10s", value_parser = parse_duration_arg)]
    notify_timeout: Duration,
}

impl Args {
    fn into_config(self) -> WatcherConfig {
        WatcherConfig {
            feed: FeedConfig {
                uri: self.node,
                topic: TRYTES_TOPIC.to_string(),
                dial_timeout: self.dial_timeout,
                retry_interval: self.conn_retry_interval,
            },
            filter: FilterConfig {
                watch_set: WatchSet::from_csv(&self.addrs),
                only_value: self.only_value,
                observe_all: self.log_any_seen_tx,
            },
            explorer: ExplorerConfig {
                tx_base_uri: self.explorer_txs_uri,
                bundle_base_uri: self.explorer_bundle_uri,
                address_base_uri: self.explorer_addrs_uri,
            },
            sink: SinkConfig {
                webhook_uri: self.slack_webhook_uri,
                timeout: self.notify_timeout,
            },
        }
    }
}

fn parse_duration_arg(input: &str) -> Result<Duration, String> {
    parse_duration(input).map_err(|e| e.to_string())
}

/// Fire the trigger on SIGINT or SIGTERM
async fn listen_for_signals(trigger: ShutdownTrigger) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Could not install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received SIGINT");
    }

    trigger.trigger();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = Args::parse().into_config();
    config.validate().context("Invalid configuration")?;

    info!("Watching {} address(es)", config.filter.watch_set.len());
    for address in config.filter.watch_set.iter() {
        info!("  {}", address);
    }

    let notifier = WebhookNotifier::new(&config.sink, config.explorer.clone())
        .context("Could not build webhook client")?;

    let mut connection = ConnectionManager::new(ZmqFeedSocket::new(), config.feed.clone());
    if let Err(e) = connection.connect().await {
        connection.close().await;
        return Err(e).context(format!("Could not connect to {}", config.feed.uri));
    }

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(listen_for_signals(trigger));

    let watcher = Watcher::new(connection, notifier, config.filter);
    let stats = watcher.run(shutdown).await;

    info!(
        "Processed {} frames ({} matched, {} notified, {} failed, {} reconnects)",
        stats.frames_received,
        stats.matched,
        stats.notifications_sent,
        stats.notification_failures,
        stats.reconnects
    );

    Ok(())
}
