//! SQLite-backed work queue
//!
//! Messages live in a single table partitioned by topic. Delivery is
//! at-least-once: a received message stays in the table, marked in-flight,
//! until it is acknowledged. A negatively acknowledged message becomes
//! available again after the configured retry delay.

use crate::bus::traits::{BusError, BusResult, Delivery, Publisher, Subscriber};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const QUEUE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic TEXT NOT NULL,
    payload TEXT NOT NULL,
    in_flight INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    available_at INTEGER NOT NULL,
    published_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_ready ON messages(topic, in_flight, available_at, id);
"#;

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Queue holding every topic of the crawl
pub struct SqliteQueue {
    conn: Mutex<Connection>,
    retry_delay: Duration,
}

impl SqliteQueue {
    /// Opens (or creates) a queue database
    ///
    /// Messages left in-flight by a previous process are released, since
    /// nobody is left to acknowledge them.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `retry_delay` - How long a rejected message waits before redelivery
    pub fn new(path: &Path, retry_delay: Duration) -> BusResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        conn.execute_batch(QUEUE_SCHEMA_SQL)?;

        let released = conn.execute(
            "UPDATE messages SET in_flight = 0 WHERE in_flight = 1",
            [],
        )?;
        if released > 0 {
            tracing::info!("Released {} in-flight messages from a previous run", released);
        }

        Ok(Self {
            conn: Mutex::new(conn),
            retry_delay,
        })
    }

    /// Creates an in-memory queue
    pub fn open_in_memory(retry_delay: Duration) -> BusResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(QUEUE_SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retry_delay,
        })
    }

    fn lock(&self) -> BusResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BusError::Queue("connection lock poisoned".to_string()))
    }

    /// Returns a handle bound to one topic
    pub fn topic(self: &Arc<Self>, name: &str) -> Topic {
        Topic {
            queue: Arc::clone(self),
            name: name.to_string(),
        }
    }

    /// Appends a message to a topic
    pub fn enqueue(&self, topic: &str, payload: &str) -> BusResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO messages (topic, payload, available_at, published_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![topic, payload, now_millis(), Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Claims the oldest available message of a topic
    pub fn claim(&self, topic: &str) -> BusResult<Option<Delivery>> {
        let conn = self.lock()?;

        let next: Option<(i64, String, u32)> = conn
            .query_row(
                "SELECT id, payload, attempts FROM messages
                 WHERE topic = ?1 AND in_flight = 0 AND available_at <= ?2
                 ORDER BY available_at, id LIMIT 1",
                params![topic, now_millis()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((id, payload, attempts)) = next else {
            return Ok(None);
        };

        conn.execute(
            "UPDATE messages SET in_flight = 1, attempts = attempts + 1 WHERE id = ?1",
            params![id],
        )?;

        Ok(Some(Delivery {
            id,
            payload,
            attempts: attempts + 1,
        }))
    }

    /// Removes an acknowledged message
    pub fn complete(&self, id: i64) -> BusResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Makes a rejected message available again after the retry delay
    pub fn release(&self, id: i64) -> BusResult<()> {
        let available_at = now_millis() + self.retry_delay.as_millis() as i64;
        let conn = self.lock()?;
        conn.execute(
            "UPDATE messages SET in_flight = 0, available_at = ?1 WHERE id = ?2 AND in_flight = 1",
            params![available_at, id],
        )?;
        Ok(())
    }

    /// Counts queued messages (available and in-flight) per topic
    pub fn pending_counts(&self) -> BusResult<Vec<(String, u64)>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT topic, COUNT(*) FROM messages GROUP BY topic ORDER BY topic")?;

        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(counts)
    }
}

/// A queue handle bound to a single topic
#[derive(Clone)]
pub struct Topic {
    queue: Arc<SqliteQueue>,
    name: String,
}

#[async_trait]
impl Publisher for Topic {
    async fn publish(&self, payload: String) -> BusResult<i64> {
        self.queue
            .enqueue(&self.name, &payload)
            .map_err(|e| BusError::Publish {
                topic: self.name.clone(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Subscriber for Topic {
    async fn receive(&self) -> BusResult<Option<Delivery>> {
        self.queue.claim(&self.name)
    }

    async fn ack(&self, id: i64) -> BusResult<()> {
        self.queue.complete(id)
    }

    async fn nack(&self, id: i64) -> BusResult<()> {
        self.queue.release(id)
    }
}
