//! Per-agent priority mailboxes.
//!
//! Three FIFO classes with absolute priority: direct messages before channel
//! messages before delegated work. A later-arriving DM still dequeues before
//! an earlier-arriving work item.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Priority class of a mailbox item, most urgent first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MailboxKind {
    Dm,
    Channel,
    Work,
}

impl MailboxKind {
    /// Dequeue scan order.
    pub const ORDER: [MailboxKind; 3] = [MailboxKind::Dm, MailboxKind::Channel, MailboxKind::Work];

    fn index(self) -> usize {
        match self {
            MailboxKind::Dm => 0,
            MailboxKind::Channel => 1,
            MailboxKind::Work => 2,
        }
    }
}

/// A dequeued value tagged with its priority class.
#[derive(Debug, Clone)]
pub struct MailboxItem<T> {
    pub value: T,
    pub kind: MailboxKind,
}

struct MailboxState<T> {
    queues: [VecDeque<T>; 3],
    waiters: VecDeque<oneshot::Sender<MailboxItem<T>>>,
}

/// Inbound event queue for a single agent.
///
/// `enqueue` never blocks. `next` suspends until an item is available; a
/// waiting consumer receives new items by direct handoff, FIFO over waiters,
/// so each item reaches exactly one consumer.
pub struct Mailbox<T> {
    inner: Mutex<MailboxState<T>>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MailboxState {
                queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Add an item, handing it straight to the longest-waiting consumer when
    /// one is blocked in [`next`](Self::next).
    pub fn enqueue(&self, value: T, kind: MailboxKind) {
        let mut state = self.inner.lock().unwrap();
        let mut value = value;
        // A waiter whose future was dropped is skipped, not counted.
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(MailboxItem { value, kind }) {
                Ok(()) => return,
                Err(returned) => value = returned.value,
            }
        }
        state.queues[kind.index()].push_back(value);
    }

    /// Dequeue the next item in priority-then-FIFO order, suspending while
    /// the mailbox is empty.
    pub async fn next(&self) -> MailboxItem<T> {
        let rx = {
            let mut state = self.inner.lock().unwrap();
            for kind in MailboxKind::ORDER {
                if let Some(value) = state.queues[kind.index()].pop_front() {
                    return MailboxItem { value, kind };
                }
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        // The sender lives in self, which outlives this await.
        rx.await.expect("mailbox dropped its waiter")
    }

    /// Items currently queued across all classes (waiting consumers excluded).
    pub fn len(&self) -> usize {
        let state = self.inner.lock().unwrap();
        state.queues.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_enqueue_and_next_single_item() {
        let mailbox = Mailbox::new();
        mailbox.enqueue("hello", MailboxKind::Channel);
        let item = mailbox.next().await;
        assert_eq!(item.value, "hello");
        assert_eq!(item.kind, MailboxKind::Channel);
    }

    #[tokio::test]
    async fn test_next_resolves_after_enqueue() {
        let mailbox = Arc::new(Mailbox::new());
        let consumer = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move { mailbox.next().await })
        };
        tokio::task::yield_now().await;
        mailbox.enqueue("late", MailboxKind::Dm);
        let item = consumer.await.unwrap();
        assert_eq!(item.value, "late");
        assert_eq!(item.kind, MailboxKind::Dm);
    }

    #[tokio::test]
    async fn test_priority_order_is_absolute() {
        let mailbox = Mailbox::new();
        mailbox.enqueue("work-item", MailboxKind::Work);
        mailbox.enqueue("channel-msg", MailboxKind::Channel);
        mailbox.enqueue("dm-msg", MailboxKind::Dm);

        assert_eq!(mailbox.next().await.kind, MailboxKind::Dm);
        assert_eq!(mailbox.next().await.kind, MailboxKind::Channel);
        assert_eq!(mailbox.next().await.kind, MailboxKind::Work);
    }

    #[tokio::test]
    async fn test_fifo_within_a_class() {
        let mailbox = Mailbox::new();
        mailbox.enqueue("first", MailboxKind::Channel);
        mailbox.enqueue("second", MailboxKind::Channel);
        assert_eq!(mailbox.next().await.value, "first");
        assert_eq!(mailbox.next().await.value, "second");
    }

    #[tokio::test]
    async fn test_concurrent_consumers_get_distinct_items() {
        let mailbox = Arc::new(Mailbox::new());
        let c1 = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move { mailbox.next().await })
        };
        let c2 = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move { mailbox.next().await })
        };
        tokio::task::yield_now().await;

        mailbox.enqueue("a", MailboxKind::Work);
        mailbox.enqueue("b", MailboxKind::Work);

        let (a, b) = (c1.await.unwrap(), c2.await.unwrap());
        let mut got = vec![a.value, b.value];
        got.sort();
        assert_eq!(got, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_skipped() {
        let mailbox = Arc::new(Mailbox::new());
        // Register a waiter, then drop it before anything arrives.
        {
            let pending = mailbox.next();
            tokio::select! {
                biased;
                _ = tokio::time::sleep(Duration::from_millis(1)) => {}
                _ = pending => panic!("nothing was enqueued"),
            }
        }
        mailbox.enqueue("survivor", MailboxKind::Dm);
        let item = tokio::time::timeout(Duration::from_secs(1), mailbox.next())
            .await
            .unwrap();
        assert_eq!(item.value, "survivor");
    }

    #[tokio::test]
    async fn test_len_counts_queued_items() {
        let mailbox = Mailbox::new();
        assert!(mailbox.is_empty());
        mailbox.enqueue(1, MailboxKind::Work);
        mailbox.enqueue(2, MailboxKind::Dm);
        assert_eq!(mailbox.len(), 2);
        mailbox.next().await;
        assert_eq!(mailbox.len(), 1);
    }
}
