//! Work queues for team-level task delegation.
//!
//! Two consumption models, both needed:
//! - [`WorkQueue`]: claim/release task board. Non-blocking pull, inspectable
//!   blocked state, suited to supervising processes.
//! - [`AsyncWorkQueue`]: blocking priority queue. A free agent awaits `pull`
//!   and gets the next item the moment it is pushed.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Work item lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    /// Waiting for a consumer.
    Queued,
    /// Exclusively held by one agent.
    Claimed,
    /// Parked with a reason; not eligible for pull until released.
    Blocked,
}

/// A delegated, trackable unit of work. Lower priority = more urgent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique id (ULID).
    pub id: String,
    /// Name of the queue holding this item.
    pub queue: String,
    pub title: String,
    pub description: String,
    pub priority: i64,
    pub status: WorkItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    /// Creation timestamp (unix ms).
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Claim/release work queue: a task board for delegated work.
pub struct WorkQueue {
    name: String,
    /// Insertion order is the final tie-break for equal (priority, created_at).
    items: Mutex<Vec<WorkItem>>,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a queued item.
    pub fn push(
        &self,
        title: &str,
        description: &str,
        priority: i64,
        metadata: Option<serde_json::Value>,
    ) -> WorkItem {
        let item = WorkItem {
            id: ulid::Ulid::new().to_string(),
            queue: self.name.clone(),
            title: title.to_string(),
            description: description.to_string(),
            priority,
            status: WorkItemStatus::Queued,
            claimed_by: None,
            blocked_reason: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            metadata,
        };
        tracing::debug!("Work item {} pushed to {}", item.id, self.name);
        self.items.lock().unwrap().push(item.clone());
        item
    }

    /// Claim the next queued item by `(priority asc, created_at asc)`, or
    /// `None` when nothing is queued. Absence is not an error.
    pub fn pull(&self, agent_id: &str) -> Option<WorkItem> {
        let mut items = self.items.lock().unwrap();
        let best = items
            .iter_mut()
            .filter(|i| i.status == WorkItemStatus::Queued)
            .min_by_key(|i| (i.priority, i.created_at))?;
        best.status = WorkItemStatus::Claimed;
        best.claimed_by = Some(agent_id.to_string());
        tracing::debug!("Work item {} claimed by {}", best.id, agent_id);
        Some(best.clone())
    }

    /// Remove an item permanently.
    pub fn complete(&self, item_id: &str) -> Result<()> {
        let mut items = self.items.lock().unwrap();
        let pos = self.position(&items, item_id)?;
        items.remove(pos);
        tracing::debug!("Work item {} completed in {}", item_id, self.name);
        Ok(())
    }

    /// Park an item with a reason, clearing the claim.
    pub fn block(&self, item_id: &str, reason: &str) -> Result<()> {
        let mut items = self.items.lock().unwrap();
        let pos = self.position(&items, item_id)?;
        let item = &mut items[pos];
        item.status = WorkItemStatus::Blocked;
        item.blocked_reason = Some(reason.to_string());
        item.claimed_by = None;
        tracing::debug!("Work item {} blocked: {}", item_id, reason);
        Ok(())
    }

    /// Return an item to the queued pool, clearing claim and block state.
    pub fn release(&self, item_id: &str) -> Result<()> {
        let mut items = self.items.lock().unwrap();
        let pos = self.position(&items, item_id)?;
        let item = &mut items[pos];
        item.status = WorkItemStatus::Queued;
        item.claimed_by = None;
        item.blocked_reason = None;
        tracing::debug!("Work item {} released in {}", item_id, self.name);
        Ok(())
    }

    pub fn get(&self, item_id: &str) -> Option<WorkItem> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == item_id)
            .cloned()
    }

    /// All items, optionally filtered by status, in insertion order.
    pub fn list(&self, status: Option<WorkItemStatus>) -> Vec<WorkItem> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| status.map_or(true, |s| i.status == s))
            .cloned()
            .collect()
    }

    /// Items currently claimed by the given agent.
    pub fn get_by_agent(&self, agent_id: &str) -> Vec<WorkItem> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.claimed_by.as_deref() == Some(agent_id))
            .cloned()
            .collect()
    }

    fn position(&self, items: &[WorkItem], item_id: &str) -> Result<usize> {
        items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or_else(|| Error::WorkItemNotFound {
                queue: self.name.clone(),
                id: item_id.to_string(),
            })
    }
}

/// Name -> queue registry with get-or-create semantics.
#[derive(Default)]
pub struct WorkQueueManager {
    queues: Mutex<HashMap<String, Arc<WorkQueue>>>,
}

impl WorkQueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, name: &str) -> Arc<WorkQueue> {
        let mut queues = self.queues.lock().unwrap();
        Arc::clone(queues.entry(name.to_string()).or_insert_with(|| {
            tracing::info!("Work queue created: {}", name);
            Arc::new(WorkQueue::new(name))
        }))
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkQueue>> {
        self.queues.lock().unwrap().get(name).cloned()
    }

    /// All queue names, sorted.
    pub fn list(&self) -> Vec<String> {
        let queues = self.queues.lock().unwrap();
        let mut names: Vec<String> = queues.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Delegable payload for subscription-style consumption. No claim lifecycle;
/// a pulled job is gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub title: String,
    pub description: String,
    pub priority: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

struct AsyncState {
    /// Sorted by priority asc; stable for ties (insertion order).
    items: Vec<Job>,
    waiters: VecDeque<oneshot::Sender<Job>>,
}

/// Blocking priority queue: `pull` suspends until a job is available and
/// every pushed job reaches exactly one puller.
pub struct AsyncWorkQueue {
    name: String,
    inner: Mutex<AsyncState>,
}

impl AsyncWorkQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(AsyncState {
                items: Vec::new(),
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert in priority order, or hand the job straight to the
    /// longest-waiting `pull` caller.
    pub fn push(&self, job: Job) {
        let mut state = self.inner.lock().unwrap();
        let mut job = job;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(job) {
                Ok(()) => return,
                Err(returned) => job = returned,
            }
        }
        let at = state.items.partition_point(|j| j.priority <= job.priority);
        state.items.insert(at, job);
    }

    /// Take the highest-priority job, suspending while the queue is empty.
    pub async fn pull(&self) -> Job {
        let rx = {
            let mut state = self.inner.lock().unwrap();
            if !state.items.is_empty() {
                return state.items.remove(0);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        // The sender lives in self, which outlives this await.
        rx.await.expect("work queue dropped its waiter")
    }

    /// Jobs currently queued (waiting consumers excluded).
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }
}

/// Registry of blocking queues, mirroring [`WorkQueueManager`].
#[derive(Default)]
pub struct AsyncQueueManager {
    queues: Mutex<HashMap<String, Arc<AsyncWorkQueue>>>,
}

impl AsyncQueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, name: &str) -> Arc<AsyncWorkQueue> {
        let mut queues = self.queues.lock().unwrap();
        Arc::clone(
            queues
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AsyncWorkQueue::new(name))),
        )
    }

    pub fn get(&self, name: &str) -> Option<Arc<AsyncWorkQueue>> {
        self.queues.lock().unwrap().get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let queues = self.queues.lock().unwrap();
        let mut names: Vec<String> = queues.keys().cloned().collect();
        names.sort();
        names
    }
}
