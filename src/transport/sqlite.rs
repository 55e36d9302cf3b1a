//! SQLite-backed transport
//!
//! Master and workers open the same database file; each channel is a set of
//! rows in one `messages` table.

use crate::transport::{Message, ReceiptHandle, Transport, TransportResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, TransactionBehavior};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel TEXT NOT NULL,
    body TEXT NOT NULL,
    visible_at INTEGER NOT NULL,
    receive_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel, visible_at);
"#;

/// Transport over a shared SQLite database file
pub struct SqliteTransport {
    conn: Mutex<Connection>,
    visibility_timeout: Duration,
    batch_size: usize,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl SqliteTransport {
    pub fn new(path: &Path, visibility_timeout: Duration, batch_size: usize) -> TransportResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
            visibility_timeout,
            batch_size: batch_size.max(1),
        })
    }

    pub fn open_in_memory(visibility_timeout: Duration, batch_size: usize) -> TransportResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            visibility_timeout,
            batch_size: batch_size.max(1),
        })
    }
}

#[async_trait]
impl Transport for SqliteTransport {
    async fn send(&self, channel: &str, body: &str) -> TransportResult<()> {
        self.conn.lock().execute(
            "INSERT INTO messages (channel, body, visible_at) VALUES (?1, ?2, ?3)",
            params![channel, body, now_millis()],
        )?;
        Ok(())
    }

    async fn receive(&self, channel: &str) -> TransportResult<Vec<Message>> {
        let now = now_millis();
        let hidden_until = now + self.visibility_timeout.as_millis() as i64;

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let batch = {
            let mut stmt = tx.prepare(
                "SELECT id, body, receive_count FROM messages
                 WHERE channel = ?1 AND visible_at <= ?2
                 ORDER BY id LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![channel, now, self.batch_size as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut messages = Vec::with_capacity(batch.len());
        for (id, body, count) in batch {
            tx.execute(
                "UPDATE messages SET visible_at = ?1, receive_count = receive_count + 1 WHERE id = ?2",
                params![hidden_until, id],
            )?;
            messages.push(Message {
                handle: ReceiptHandle(id.to_string()),
                body,
                receive_count: count + 1,
            });
        }
        tx.commit()?;

        Ok(messages)
    }

    async fn delete(&self, channel: &str, handles: &[ReceiptHandle]) -> TransportResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for handle in handles {
            if let Ok(id) = handle.0.parse::<i64>() {
                tx.execute(
                    "DELETE FROM messages WHERE id = ?1 AND channel = ?2",
                    params![id, channel],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn purge(&self, channel: &str) -> TransportResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM messages WHERE channel = ?1", params![channel])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_messages_cross_connections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let master = SqliteTransport::new(&path, Duration::from_secs(30), 10).unwrap();
        let worker = SqliteTransport::new(&path, Duration::from_secs(30), 10).unwrap();

        worker.send("master-receive", "qnode:worker-1").await.unwrap();

        let batch = master.receive("master-receive").await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "qnode:worker-1");
        assert_eq!(batch[0].receive_count, 1);

        // Hidden from every connection while in flight
        assert!(worker.receive("master-receive").await.unwrap().is_empty());

        master
            .delete("master-receive", &[batch[0].handle.clone()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_redelivery_after_timeout() {
        let transport = SqliteTransport::open_in_memory(Duration::from_millis(20), 10).unwrap();
        transport.send("done", "http://example.com/").await.unwrap();

        assert_eq!(transport.receive("done").await.unwrap().len(), 1);
        tokio::time::sleep(Duration::from_millis(40)).await;

        let again = transport.receive("done").await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].receive_count, 2);
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let transport = SqliteTransport::open_in_memory(Duration::from_secs(30), 10).unwrap();
        transport.send("todo", "a").await.unwrap();
        transport.send("done", "b").await.unwrap();

        transport.purge("todo").await.unwrap();
        assert!(transport.receive("todo").await.unwrap().is_empty());
        assert_eq!(transport.receive("done").await.unwrap()[0].body, "b");
    }

    #[tokio::test]
    async fn test_batch_limit_preserves_order() {
        let transport = SqliteTransport::open_in_memory(Duration::from_secs(30), 2).unwrap();
        for body in ["1", "2", "3"] {
            transport.send("todo", body).await.unwrap();
        }
        let first: Vec<String> = transport
            .receive("todo")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(first, vec!["1", "2"]);
        assert_eq!(transport.receive("todo").await.unwrap()[0].body, "3");
    }
}
