//! Feed Connection Module
//!
//! Owns the subscription socket to the transaction feed. Dials the
//! pub/sub endpoint, subscribes to the topic, receives frames and, when
//! the remote end closes the stream, keeps redialing at a fixed interval
//! until the subscription is re-established.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::shutdown::Shutdown;
use crate::zmtp::SubStream;

/// Errors that can occur on the feed connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Dial to {uri} failed: {reason}")]
    Dial { uri: String, reason: String },

    #[error("Dial to {uri} timed out after {timeout:?}")]
    DialTimeout { uri: String, timeout: Duration },

    #[error("Subscription to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Socket is not connected")]
    NotConnected,

    #[error("Remote end closed the stream")]
    StreamClosed,

    #[error("Receive failed: {0}")]
    Recv(String),

    #[error("Shutdown requested")]
    Cancelled,
}

/// Lifecycle of the feed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Closing,
}

/// One message as delivered by the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
}

impl Frame {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Frame {
    /// Join the parts of a multipart message with a single space
    ///
    /// A publisher that sends the topic as its own part yields the same
    /// `trytes <body> <hash>` text as one that sends a single part.
    pub fn from_parts(parts: Vec<Vec<u8>>) -> Self {
        let mut parts = parts.into_iter();
        let mut data = parts.next().unwrap_or_default();
        for part in parts {
            data.push(b' ');
            data.extend_from_slice(&part);
        }
        Self { data }
    }
}

/// Transport seam under the connection manager
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedSocket: Send {
    /// Open a connection to the endpoint, replacing any previous one
    async fn dial(&mut self, uri: &str) -> Result<(), FeedError>;

    /// Register interest in a topic on the current connection
    async fn subscribe(&mut self, topic: &str) -> Result<(), FeedError>;

    /// Wait for the next frame
    async fn recv(&mut self) -> Result<Frame, FeedError>;

    /// Release the connection
    async fn close(&mut self);
}

/// Pause between reconnect attempts
#[async_trait]
pub trait RetryPause: Send + Sync {
    async fn pause(&self, interval: Duration);
}

/// Real-time pause backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPause;

#[async_trait]
impl RetryPause for TokioPause {
    async fn pause(&self, interval: Duration) {
        sleep(interval).await;
    }
}

/// ZeroMQ subscriber over TCP; a fresh connection is opened on every dial
///
/// Topic filtering is applied on receipt as well as at the publisher.
#[derive(Default)]
pub struct ZmqFeedSocket {
    stream: Option<SubStream>,
    topics: Vec<String>,
}

impl ZmqFeedSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn matches_topic(&self, parts: &[Vec<u8>]) -> bool {
        parts.first().map_or(false, |first| {
            self.topics.iter().any(|topic| first.starts_with(topic.as_bytes()))
        })
    }

    async fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Feed connection was already gone: {}", e);
            }
        }
        self.topics.clear();
    }
}

#[async_trait]
impl FeedSocket for ZmqFeedSocket {
    async fn dial(&mut self, uri: &str) -> Result<(), FeedError> {
        self.release().await;

        let stream = SubStream::connect(uri).await.map_err(|e| FeedError::Dial {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        self.stream = Some(stream);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), FeedError> {
        let stream = self.stream.as_mut().ok_or(FeedError::NotConnected)?;
        stream.subscribe(topic).await.map_err(|e| FeedError::Subscribe {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        self.topics.push(topic.to_string());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Frame, FeedError> {
        loop {
            let stream = self.stream.as_mut().ok_or(FeedError::NotConnected)?;
            match stream.recv().await {
                Ok(parts) if self.matches_topic(&parts) => return Ok(Frame::from_parts(parts)),
                Ok(_) => debug!("Dropping message outside subscribed topics"),
                Err(e) if e.ends_stream() => {
                    debug!("Feed stream ended: {}", e);
                    self.stream = None;
                    return Err(FeedError::StreamClosed);
                }
                Err(e) => return Err(FeedError::Recv(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        self.release().await;
    }
}

/// Feed connection manager with reconnection support
pub struct ConnectionManager<S, P = TokioPause> {
    socket: S,
    pause: P,
    config: FeedConfig,
    state: ConnectionState,
}

impl<S: FeedSocket> ConnectionManager<S, TokioPause> {
    /// Create a connection manager that pauses in real time
    pub fn new(socket: S, config: FeedConfig) -> Self {
        Self::with_pause(socket, config, TokioPause)
    }
}

impl<S: FeedSocket, P: RetryPause> ConnectionManager<S, P> {
    /// Create a connection manager with a custom retry pause
    pub fn with_pause(socket: S, config: FeedConfig, pause: P) -> Self {
        Self {
            socket,
            pause,
            config,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Single dial attempt bounded by the configured timeout
    pub async fn dial(&mut self) -> Result<(), FeedError> {
        self.state = ConnectionState::Connecting;

        let dial_timeout = self.config.dial_timeout;
        let result = match timeout(dial_timeout, self.socket.dial(&self.config.uri)).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::DialTimeout {
                uri: self.config.uri.clone(),
                timeout: dial_timeout,
            }),
        };

        if result.is_err() {
            self.state = ConnectionState::Disconnected;
        }
        result
    }

    /// Register the configured topic on a freshly dialed connection
    pub async fn subscribe(&mut self) -> Result<(), FeedError> {
        if self.state != ConnectionState::Connecting {
            return Err(FeedError::NotConnected);
        }

        self.socket.subscribe(&self.config.topic).await?;
        self.state = ConnectionState::Subscribed;
        Ok(())
    }

    /// Initial dial and subscribe, without retrying
    pub async fn connect(&mut self) -> Result<(), FeedError> {
        info!("Dialing feed socket {}", self.config.uri);
        self.dial().await?;

        info!("Subscribing to '{}' topic", self.config.topic);
        self.subscribe().await
    }

    /// Wait for the next frame
    ///
    /// `StreamClosed` leaves the manager `Disconnected`; any other error
    /// leaves the connection in place.
    pub async fn receive(&mut self) -> Result<Frame, FeedError> {
        if self.state != ConnectionState::Subscribed {
            return Err(FeedError::NotConnected);
        }

        match self.socket.recv().await {
            Err(FeedError::StreamClosed) => {
                self.state = ConnectionState::Disconnected;
                Err(FeedError::StreamClosed)
            }
            other => other,
        }
    }

    /// Redial and resubscribe until both succeed
    ///
    /// Each failure of either step restarts from dial after the retry
    /// interval. There is no attempt cap.
    ///
    /// # Returns
    /// The number of attempts it took, or `Cancelled` if shutdown fired first
    pub async fn reconnect(&mut self, shutdown: &mut Shutdown) -> Result<u32, FeedError> {
        let interval = self.config.retry_interval;
        let mut attempts = 0u32;

        loop {
            if shutdown.is_cancelled() {
                return Err(FeedError::Cancelled);
            }

            attempts += 1;
            info!("Trying to reconnect (attempt {})", attempts);

            let result = match self.dial().await {
                Ok(()) => self.subscribe().await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => return Ok(attempts),
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}...retrying in {:?}", attempts, e, interval);
                    tokio::select! {
                        _ = self.pause.pause(interval) => {}
                        _ = shutdown.cancelled() => return Err(FeedError::Cancelled),
                    }
                }
            }
        }
    }

    /// Release the socket; safe to call more than once
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closing {
            return;
        }
        debug!("Closing feed socket");
        self.socket.close().await;
        self.state = ConnectionState::Closing;
    }
}
