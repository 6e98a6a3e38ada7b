//! In-process work queues, one per [`WorkKind`].

use super::work_item::{WorkItem, WorkKind};
use crate::server::metrics;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue {queue} does not accept {item} items")]
    WrongKind { queue: WorkKind, item: WorkKind },

    #[error("queue {0} is closed")]
    Closed(WorkKind),
}

/// Unbounded FIFO shared by one scanner and a pool of workers.
#[derive(Clone)]
pub struct WorkQueue {
    kind: WorkKind,
    sender: mpsc::UnboundedSender<WorkItem>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    depth: Arc<AtomicUsize>,
}

impl WorkQueue {
    pub fn new(kind: WorkKind) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            kind,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn kind(&self) -> WorkKind {
        self.kind
    }

    /// Never blocks.
    pub fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        if item.kind != self.kind {
            return Err(QueueError::WrongKind {
                queue: self.kind,
                item: item.kind,
            });
        }
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(item).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed(self.kind));
        }
        metrics::set_queue_depth(self.kind.as_str(), self.depth());
        Ok(())
    }

    /// Enqueues every item, stopping at the first rejected one.
    pub fn enqueue_all(&self, items: Vec<WorkItem>) -> Result<usize, QueueError> {
        let count = items.len();
        for item in items {
            self.enqueue(item)?;
        }
        metrics::record_items_enqueued(self.kind.as_str(), count);
        Ok(count)
    }

    /// Waits for the next item. Returns `None` once every sender is gone.
    pub async fn dequeue(&self) -> Option<WorkItem> {
        let item = self.receiver.lock().await.recv().await;
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            metrics::set_queue_depth(self.kind.as_str(), self.depth());
        }
        item
    }

    pub fn try_dequeue(&self) -> Option<WorkItem> {
        let mut receiver = self.receiver.try_lock().ok()?;
        let item = receiver.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        metrics::set_queue_depth(self.kind.as_str(), self.depth());
        Some(item)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub kind: WorkKind,
    pub depth: usize,
}

/// The full set of queues, passed by value to scanners and pools.
#[derive(Clone)]
pub struct WorkQueues {
    queues: Arc<HashMap<WorkKind, WorkQueue>>,
}

impl WorkQueues {
    pub fn new() -> Self {
        let queues = WorkKind::ALL
            .into_iter()
            .map(|kind| (kind, WorkQueue::new(kind)))
            .collect();
        Self {
            queues: Arc::new(queues),
        }
    }

    pub fn get(&self, kind: WorkKind) -> &WorkQueue {
        // Every kind is populated in `new`.
        &self.queues[&kind]
    }

    pub fn depths(&self) -> Vec<QueueDepth> {
        WorkKind::ALL
            .into_iter()
            .map(|kind| QueueDepth {
                kind,
                depth: self.get(kind).depth(),
            })
            .collect()
    }
}

impl Default for WorkQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_store::{ContentRef, ContentType};

    fn item(kind: WorkKind, id: &str) -> WorkItem {
        WorkItem {
            kind,
            target: ContentRef::new(ContentType::Post, id),
            author_id: None,
            title: None,
            content: "text".into(),
            enqueued_at: 0,
        }
    }

    #[tokio::test]
    async fn test_fifo_and_depth() {
        let queue = WorkQueue::new(WorkKind::ModeratePost);
        queue
            .enqueue_all(vec![
                item(WorkKind::ModeratePost, "a"),
                item(WorkKind::ModeratePost, "b"),
            ])
            .unwrap();
        assert_eq!(queue.depth(), 2);

        assert_eq!(queue.dequeue().await.unwrap().target.content_id, "a");
        assert_eq!(queue.dequeue().await.unwrap().target.content_id, "b");
        assert_eq!(queue.depth(), 0);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let queue = WorkQueue::new(WorkKind::EmbedSkill);
        let err = queue.enqueue(item(WorkKind::TagContent, "a")).unwrap_err();
        assert_eq!(
            err,
            QueueError::WrongKind {
                queue: WorkKind::EmbedSkill,
                item: WorkKind::TagContent
            }
        );
        assert_eq!(queue.depth(), 0);
    }

    #[test]
    fn test_duplicates_are_accepted() {
        let queues = WorkQueues::new();
        let queue = queues.get(WorkKind::ModeratePost);
        queue.enqueue(item(WorkKind::ModeratePost, "a")).unwrap();
        queue.enqueue(item(WorkKind::ModeratePost, "a")).unwrap();

        let depths = queues.depths();
        assert_eq!(depths.len(), 6);
        assert_eq!(
            depths
                .iter()
                .find(|d| d.kind == WorkKind::ModeratePost)
                .unwrap()
                .depth,
            2
        );
    }
}
