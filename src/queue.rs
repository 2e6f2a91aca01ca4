/// Ordered buffer of child stderr lines awaiting classification.
///
/// The output collector is the only producer; the command channel is the only
/// consumer at any instant. Pops block until a line arrives or the queue is
/// closed, drains never block. Past `limit` lines the oldest are dropped, so
/// a long idle session cannot grow the queue without bound.
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    lines: VecDeque<String>,
    closed: bool,
}

/// Lines kept while no command is reading them.
pub const MAX_QUEUED_LINES: usize = 4096;

#[derive(Debug)]
pub struct ResponseQueue {
    inner: Mutex<Inner>,
    available: Notify,
    limit: usize,
}

impl Default for ResponseQueue {
    fn default() -> Self {
        Self::with_limit(MAX_QUEUED_LINES)
    }
}

impl ResponseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: Notify::new(),
            limit: limit.max(1),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a line. Lines pushed after `close()` are dropped; at the limit
    /// the oldest line makes room.
    pub fn push(&self, line: String) {
        {
            let mut inner = self.inner();
            if inner.closed {
                return;
            }
            if inner.lines.len() >= self.limit {
                inner.lines.pop_front();
            }
            inner.lines.push_back(line);
        }
        self.available.notify_one();
    }

    /// Mark the end of the stream. Queued lines stay poppable.
    pub fn close(&self) {
        self.inner().closed = true;
        self.available.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner().closed
    }

    /// Discard every queued line, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner();
        let dropped = inner.lines.len();
        inner.lines.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn try_pop(&self) -> Option<String> {
        self.inner().lines.pop_front()
    }

    /// Wait for the next line. Returns `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<String> {
        loop {
            {
                let mut inner = self.inner();
                if let Some(line) = inner.lines.pop_front() {
                    return Some(line);
                }
                if inner.closed {
                    return None;
                }
            }
            self.available.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = ResponseQueue::new();
        queue.push("one".to_string());
        queue.push("two".to_string());
        queue.push("three".to_string());
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop().as_deref(), Some("one"));
        assert_eq!(queue.try_pop().as_deref(), Some("two"));
        assert_eq!(queue.try_pop().as_deref(), Some("three"));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_clear_reports_dropped_count() {
        let queue = ResponseQueue::new();
        queue.push("stale".to_string());
        queue.push("stale".to_string());
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn test_limit_drops_oldest_lines() {
        let queue = ResponseQueue::with_limit(3);
        for n in 0..10 {
            queue.push(format!("line {n}"));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop().as_deref(), Some("line 7"));
        assert_eq!(queue.try_pop().as_deref(), Some("line 8"));
        assert_eq!(queue.try_pop().as_deref(), Some("line 9"));
        assert_eq!(ResponseQueue::new().limit, MAX_QUEUED_LINES);
    }

    #[test]
    fn test_push_after_close_is_dropped() {
        let queue = ResponseQueue::new();
        queue.push("kept".to_string());
        queue.close();
        queue.push("late".to_string());
        assert!(queue.is_closed());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_pop_waits_for_producer() {
        let queue = Arc::new(ResponseQueue::new());
        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            producer.push("late arrival".to_string());
        });

        let line = tokio::time::timeout(Duration::from_secs(2), queue.pop())
            .await
            .unwrap();
        assert_eq!(line.as_deref(), Some("late arrival"));
    }

    #[tokio::test]
    async fn test_pop_drains_before_reporting_close() {
        let queue = ResponseQueue::new();
        queue.push("last words".to_string());
        queue.close();
        assert_eq!(queue.pop().await.as_deref(), Some("last words"));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_pop() {
        let queue = Arc::new(ResponseQueue::new());
        let closer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });

        let line = tokio::time::timeout(Duration::from_secs(2), queue.pop())
            .await
            .unwrap();
        assert!(line.is_none());
    }
}
