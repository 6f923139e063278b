//! FIFO job queues shared by the workers.
//!
//! Two named lists flow through here: `crawl_queue` (URL strings, polled
//! non-blocking by the crawler) and `indexing_queue` (decimal document
//! ids, blocking-popped by the indexer). There is no acknowledgement
//! protocol: once popped, the consumer owns the item and its durability
//! lives in the metadata store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("blocking pop returned no value")]
    Empty,

    #[error("queue push rejected")]
    PushRejected,
}

/// Capability the workers need from the queue service.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a value at the tail.
    async fn push_tail(&self, queue: &str, value: &str) -> Result<(), QueueError>;

    /// Pop the head, returning `None` when the queue is empty.
    async fn pop_head_nowait(&self, queue: &str) -> Result<Option<String>, QueueError>;

    /// Pop the head, waiting until a value appears.
    async fn pop_head_blocking(&self, queue: &str) -> Result<String, QueueError>;

    /// Current number of values in the queue.
    async fn length(&self, queue: &str) -> Result<usize, QueueError>;
}

/// Redis-list implementation used in production.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    /// Connect to the queue service. Connection failure here is fatal to
    /// the worker; there is no retry.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn push_tail(&self, queue: &str, value: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(queue, value).await?;
        Ok(())
    }

    async fn pop_head_nowait(&self, queue: &str) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.lpop(queue, None).await?;
        Ok(value)
    }

    async fn pop_head_blocking(&self, queue: &str) -> Result<String, QueueError> {
        let mut conn = self.conn.clone();
        // BLPOP with timeout 0 blocks until a value arrives.
        let reply: Option<(String, String)> = conn.blpop(queue, 0.0).await?;
        let (_key, value) = reply.ok_or(QueueError::Empty)?;
        Ok(value)
    }

    async fn length(&self, queue: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let n: usize = conn.llen(queue).await?;
        Ok(n)
    }
}

/// In-memory queue used by the worker tests.
///
/// Clones share the same underlying queues, so a test can keep a handle
/// while the worker owns another. `fail_next_pushes` makes the next N
/// pushes fail, which is how the enqueue-retry path gets exercised.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<MemoryQueueInner>,
}

#[derive(Default)]
struct MemoryQueueInner {
    queues: parking_lot::Mutex<HashMap<String, VecDeque<String>>>,
    notify: tokio::sync::Notify,
    failing_pushes: AtomicU32,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` pushes fail with `PushRejected`.
    pub fn fail_next_pushes(&self, n: u32) {
        self.inner.failing_pushes.store(n, Ordering::SeqCst);
    }

    fn try_pop(&self, queue: &str) -> Option<String> {
        self.inner
            .queues
            .lock()
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn push_tail(&self, queue: &str, value: &str) -> Result<(), QueueError> {
        let failing = &self.inner.failing_pushes;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(QueueError::PushRejected);
        }

        self.inner
            .queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(value.to_string());
        self.inner.notify.notify_one();
        Ok(())
    }

    async fn pop_head_nowait(&self, queue: &str) -> Result<Option<String>, QueueError> {
        Ok(self.try_pop(queue))
    }

    async fn pop_head_blocking(&self, queue: &str) -> Result<String, QueueError> {
        loop {
            if let Some(value) = self.try_pop(queue) {
                return Ok(value);
            }
            self.inner.notify.notified().await;
        }
    }

    async fn length(&self, queue: &str) -> Result<usize, QueueError> {
        Ok(self
            .inner
            .queues
            .lock()
            .get(queue)
            .map_or(0, VecDeque::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_queue_fifo_order() {
        let queue = MemoryQueue::new();
        queue.push_tail("q", "one").await.unwrap();
        queue.push_tail("q", "two").await.unwrap();

        assert_eq!(queue.length("q").await.unwrap(), 2);
        assert_eq!(queue.pop_head_nowait("q").await.unwrap().as_deref(), Some("one"));
        assert_eq!(queue.pop_head_nowait("q").await.unwrap().as_deref(), Some("two"));
        assert_eq!(queue.pop_head_nowait("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_queue_blocking_pop_wakes_on_push() {
        let queue = MemoryQueue::new();
        let consumer = queue.clone();
        let handle = tokio::spawn(async move { consumer.pop_head_blocking("q").await });

        tokio::task::yield_now().await;
        queue.push_tail("q", "value").await.unwrap();

        let popped = handle.await.unwrap().unwrap();
        assert_eq!(popped, "value");
    }

    #[tokio::test]
    async fn test_memory_queue_push_failure_injection() {
        let queue = MemoryQueue::new();
        queue.fail_next_pushes(2);

        assert!(queue.push_tail("q", "a").await.is_err());
        assert!(queue.push_tail("q", "b").await.is_err());
        assert!(queue.push_tail("q", "c").await.is_ok());
        assert_eq!(queue.length("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_queues_are_independent() {
        let queue = MemoryQueue::new();
        queue.push_tail("crawl_queue", "url").await.unwrap();

        assert_eq!(queue.length("indexing_queue").await.unwrap(), 0);
        assert_eq!(
            queue.pop_head_nowait("indexing_queue").await.unwrap(),
            None
        );
    }

    // Exercises the Redis adapter when a local server is reachable.
    #[tokio::test]
    async fn test_redis_queue_round_trip() {
        let queue = match RedisQueue::connect("redis://127.0.0.1:6379").await {
            Ok(q) => q,
            Err(_) => {
                println!("Redis not available, skipping test");
                return;
            }
        };

        let name = format!("crawldex:test:{}", uuid::Uuid::new_v4());
        queue.push_tail(&name, "1").await.unwrap();
        queue.push_tail(&name, "2").await.unwrap();

        assert_eq!(queue.length(&name).await.unwrap(), 2);
        assert_eq!(queue.pop_head_blocking(&name).await.unwrap(), "1");
        assert_eq!(queue.pop_head_nowait(&name).await.unwrap().as_deref(), Some("2"));
        assert_eq!(queue.pop_head_nowait(&name).await.unwrap(), None);
    }
}
