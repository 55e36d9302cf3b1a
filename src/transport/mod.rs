//! Message transport between the master and its workers
//!
//! Channels are named queues with at-least-once, unordered delivery: a
//! received message stays invisible for a visibility timeout and is
//! redelivered unless deleted. Two implementations are provided:
//!
//! - [`MemoryTransport`]: in-process, for tests and single-process runs
//! - [`SqliteTransport`]: a shared SQLite file for multi-process runs

mod memory;
mod protocol;
mod sqlite;

pub use memory::MemoryTransport;
pub use protocol::{
    chunk_url_batches, decode_url_batch, encode_url_batch, worker_channel_name, ControlMessage,
    DONE, MASTER_ANNOUNCE, MASTER_RECEIVE, TODO, WHITELIST,
};
pub use sqlite::SqliteTransport;

use crate::{Result, SwarmError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors raised by a transport backend
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Transport closed")]
    Closed,
}

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Opaque token used to acknowledge a received message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

/// A message taken from a channel
#[derive(Debug, Clone)]
pub struct Message {
    pub handle: ReceiptHandle,
    pub body: String,
    /// How many times this message has been handed out, this time included
    pub receive_count: u32,
}

/// Queue transport shared by master and workers
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, channel: &str, body: &str) -> TransportResult<()>;

    /// Takes up to one batch of visible messages; may return an empty batch
    async fn receive(&self, channel: &str) -> TransportResult<Vec<Message>>;

    /// Acknowledges messages so they are never redelivered
    async fn delete(&self, channel: &str, handles: &[ReceiptHandle]) -> TransportResult<()>;

    /// Drops every message on a channel
    async fn purge(&self, channel: &str) -> TransportResult<()>;
}

/// Polls one channel, turning repeated transport failures into a fatal error
///
/// A failed receive is logged and retried after the idle backoff. Once
/// `max_failures` receives fail in a row the poller returns
/// [`SwarmError::TransportUnavailable`] and cancels `shutdown`.
pub struct ChannelPoller {
    transport: Arc<dyn Transport>,
    channel: String,
    max_failures: u32,
    consecutive_failures: u32,
    idle: Duration,
    shutdown: CancellationToken,
}

impl ChannelPoller {
    pub fn new(
        transport: Arc<dyn Transport>,
        channel: impl Into<String>,
        max_failures: u32,
        idle: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            channel: channel.into(),
            max_failures,
            consecutive_failures: 0,
            idle,
            shutdown,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next non-empty batch
    ///
    /// Returns `Ok(None)` once shutdown is requested.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Message>>> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(None);
            }

            match self.transport.receive(&self.channel).await {
                Ok(batch) => {
                    self.consecutive_failures = 0;
                    if !batch.is_empty() {
                        return Ok(Some(batch));
                    }
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    tracing::warn!(
                        channel = %self.channel,
                        failures = self.consecutive_failures,
                        "Receive failed: {}",
                        e
                    );
                    if self.consecutive_failures >= self.max_failures {
                        tracing::error!(channel = %self.channel, "Message transport unreachable, giving up");
                        self.shutdown.cancel();
                        return Err(SwarmError::TransportUnavailable {
                            channel: self.channel.clone(),
                            failures: self.consecutive_failures,
                        });
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.idle) => {}
            }
        }
    }

    /// Acknowledges a batch, logging rather than failing on error
    pub async fn ack(&self, messages: &[Message]) {
        if messages.is_empty() {
            return;
        }
        let handles: Vec<ReceiptHandle> = messages.iter().map(|m| m.handle.clone()).collect();
        if let Err(e) = self.transport.delete(&self.channel, &handles).await {
            tracing::warn!(channel = %self.channel, "Failed to acknowledge {} messages: {}", handles.len(), e);
        }
    }
}
