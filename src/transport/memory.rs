use crate::transport::{Message, ReceiptHandle, Transport, TransportResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct StoredMessage {
    body: String,
    visible_at: Instant,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct Channel {
    next_id: u64,
    messages: BTreeMap<u64, StoredMessage>,
}

/// In-process transport with visibility-timeout redelivery
#[derive(Debug)]
pub struct MemoryTransport {
    channels: Mutex<HashMap<String, Channel>>,
    visibility_timeout: Duration,
    batch_size: usize,
}

impl MemoryTransport {
    pub fn new(visibility_timeout: Duration, batch_size: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            visibility_timeout,
            batch_size: batch_size.max(1),
        }
    }

    /// Messages on `channel` not yet deleted, visible or not
    pub fn len(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map(|c| c.messages.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, channel: &str) -> bool {
        self.len(channel) == 0
    }

    /// Bodies on `channel` in send order, without receiving them
    pub fn peek(&self, channel: &str) -> Vec<String> {
        self.channels
            .lock()
            .get(channel)
            .map(|c| c.messages.values().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, channel: &str, body: &str) -> TransportResult<()> {
        let mut channels = self.channels.lock();
        let channel = channels.entry(channel.to_string()).or_default();
        let id = channel.next_id;
        channel.next_id += 1;
        channel.messages.insert(
            id,
            StoredMessage {
                body: body.to_string(),
                visible_at: Instant::now(),
                receive_count: 0,
            },
        );
        Ok(())
    }

    async fn receive(&self, channel: &str) -> TransportResult<Vec<Message>> {
        let now = Instant::now();
        let mut channels = self.channels.lock();
        let Some(channel) = channels.get_mut(channel) else {
            return Ok(Vec::new());
        };

        let mut batch = Vec::new();
        for (id, message) in channel.messages.iter_mut() {
            if batch.len() >= self.batch_size {
                break;
            }
            if message.visible_at > now {
                continue;
            }
            message.visible_at = now + self.visibility_timeout;
            message.receive_count += 1;
            batch.push(Message {
                handle: ReceiptHandle(id.to_string()),
                body: message.body.clone(),
                receive_count: message.receive_count,
            });
        }
        Ok(batch)
    }

    async fn delete(&self, channel: &str, handles: &[ReceiptHandle]) -> TransportResult<()> {
        let mut channels = self.channels.lock();
        if let Some(channel) = channels.get_mut(channel) {
            for handle in handles {
                if let Ok(id) = handle.0.parse::<u64>() {
                    channel.messages.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn purge(&self, channel: &str) -> TransportResult<()> {
        if let Some(channel) = self.channels.lock().get_mut(channel) {
            channel.messages.clear();
        }
        Ok(())
    }
}
