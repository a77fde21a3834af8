//! Agent scheduling loop: sequential, single-flight event processing.
//!
//! Each agent drains its mailbox one item at a time and dispatches to the
//! reasoning cycle. Conversation state inside the reasoner is not thread-safe,
//! so the loop never overlaps two events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::core::channel::{normalize_channel_name, ChannelManager, Message};
use crate::core::queue::{WorkItem, WorkQueueManager};
use crate::error::{Error, Result};
use crate::org::RoleConfig;
use crate::protocol::{Mailbox, MailboxKind};

/// Reply sentinel: a reasoner returns exactly this string to decline to act.
pub const NO_ACTION: &str = "NO_ACTION";

/// The external reasoning/tool-execution cycle (the model call lives behind
/// this seam and is not implemented here).
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Produce a reply for the given context, or [`NO_ACTION`].
    async fn respond(&self, input: &str) -> Result<String>;
}

/// A message addressed directly to one agent, outside any channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessage {
    /// Unique id (ULID).
    pub id: String,
    /// Sender agent id (or an external actor id).
    pub from: String,
    pub content: String,
    /// Creation timestamp (unix ms).
    pub timestamp: i64,
}

impl DirectMessage {
    pub fn new(from: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            from: from.into(),
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// An inbound event in an agent's mailbox.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Direct(DirectMessage),
    Channel(Message),
    Work(WorkItem),
}

impl AgentEvent {
    /// Mailbox priority class this event belongs to.
    pub fn kind(&self) -> MailboxKind {
        match self {
            AgentEvent::Direct(_) => MailboxKind::Dm,
            AgentEvent::Channel(_) => MailboxKind::Channel,
            AgentEvent::Work(_) => MailboxKind::Work,
        }
    }
}

/// Collaborators an agent is built from.
pub struct AgentContext {
    pub agent_id: String,
    pub role: RoleConfig,
    pub reasoner: Arc<dyn Reasoner>,
    pub channels: Arc<ChannelManager>,
    pub work_queues: Arc<WorkQueueManager>,
}

/// A single organization member's consumption loop.
pub struct Agent {
    id: String,
    role: RoleConfig,
    mailbox: Arc<Mailbox<AgentEvent>>,
    channels: Arc<ChannelManager>,
    work_queues: Arc<WorkQueueManager>,
    reasoner: Arc<dyn Reasoner>,
    running: AtomicBool,
    stop: Notify,
}

impl Agent {
    pub fn new(context: AgentContext) -> Self {
        Self {
            id: context.agent_id,
            role: context.role,
            mailbox: Arc::new(Mailbox::new()),
            channels: context.channels,
            work_queues: context.work_queues,
            reasoner: context.reasoner,
            running: AtomicBool::new(false),
            stop: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> &RoleConfig {
        &self.role
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Handle to this agent's mailbox for external producers.
    pub fn mailbox(&self) -> Arc<Mailbox<AgentEvent>> {
        Arc::clone(&self.mailbox)
    }

    /// Enqueue an event under its priority class.
    pub fn deliver(&self, event: AgentEvent) {
        let kind = event.kind();
        self.mailbox.enqueue(event, kind);
    }

    pub fn deliver_direct(&self, dm: DirectMessage) {
        self.deliver(AgentEvent::Direct(dm));
    }

    pub fn deliver_work(&self, item: WorkItem) {
        self.deliver(AgentEvent::Work(item));
    }

    /// Subscribe this agent's mailbox to its role's channels, or to every
    /// existing channel when the role declares none. Unknown channels are
    /// skipped.
    pub fn subscribe_channels(&self) -> Result<()> {
        let names = if self.role.channels.is_empty() {
            self.channels.list()
        } else {
            self.role
                .channels
                .iter()
                .filter_map(|name| normalize_channel_name(name).ok())
                .collect()
        };

        for name in &names {
            let mailbox = Arc::clone(&self.mailbox);
            let result = self.channels.subscribe(
                name,
                &self.id,
                Arc::new(move |msg: &Message| {
                    mailbox.enqueue(AgentEvent::Channel(msg.clone()), MailboxKind::Channel);
                    Ok(())
                }),
            );
            match result {
                Ok(()) => {}
                Err(Error::ChannelNotFound(_)) => {
                    tracing::debug!("Agent {}: channel #{} does not exist yet", self.id, name);
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!("Agent {} subscribed to {} channels", self.id, names.len());
        Ok(())
    }

    /// Claim the next item from a claim/release queue into this agent's own
    /// mailbox. Returns whether anything was claimed.
    pub fn pull_work(&self, queue_name: &str) -> Result<bool> {
        let queue = self
            .work_queues
            .get(queue_name)
            .ok_or_else(|| Error::QueueNotFound(queue_name.to_string()))?;
        match queue.pull(&self.id) {
            Some(item) => {
                self.deliver_work(item);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drain the mailbox until [`stop`](Self::stop). One event at a time; a
    /// failure is logged and the loop moves on to the next item.
    pub async fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Agent {} started ({})", self.id, self.role.title);

        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let item = tokio::select! {
                _ = self.stop.notified() => break,
                item = self.mailbox.next() => item,
            };
            if let Err(e) = self.handle_event(item.value).await {
                tracing::error!("Agent {}: error handling event: {}", self.id, e);
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Agent {} stopped", self.id);
    }

    /// Cooperative stop: checked between loop iterations, never cancels the
    /// in-flight event.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop.notify_one();
    }

    async fn handle_event(&self, event: AgentEvent) -> Result<()> {
        match event {
            AgentEvent::Channel(msg) => self.handle_channel_message(msg).await,
            AgentEvent::Work(item) => self.handle_work_item(item).await,
            AgentEvent::Direct(dm) => self.handle_direct_message(dm).await,
        }
    }

    /// Claim, reason over the full thread, reply into the thread unless the
    /// reasoner declines, then complete. A reasoner failure is contained: the
    /// message still completes so the channel does not wedge.
    async fn handle_channel_message(&self, msg: Message) -> Result<()> {
        tracing::info!(
            "Agent {} handling message {} from {} on #{}",
            self.id,
            msg.id,
            msg.from,
            msg.channel
        );
        self.channels.claim(&msg.id, &self.id)?;

        let root_id = msg.root_id().to_string();
        let thread = self.channels.get_thread(&msg.channel, &root_id)?;
        let thread_text = thread
            .iter()
            .map(|m| format!("[{}]: {}", m.from, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let input = format!(
            "[Channel: #{}] [Thread ID: {}]\n{}",
            msg.channel, root_id, thread_text
        );

        match self.reasoner.respond(&input).await {
            Ok(reply) if reply.trim() != NO_ACTION => {
                self.channels
                    .post(&msg.channel, &self.id, reply.trim(), Some(&root_id))?;
                tracing::debug!("Agent {}: reply posted to #{}", self.id, msg.channel);
            }
            Ok(_) => {
                tracing::debug!("Agent {}: NO_ACTION on {}", self.id, msg.id);
            }
            Err(e) => {
                tracing::warn!("Agent {}: reasoner failed on {}: {}", self.id, msg.id, e);
            }
        }

        self.channels.complete(&msg.id)
    }

    /// Reason over a claimed work item and reflect the outcome back into the
    /// queue: complete on success, block with the error text on failure.
    async fn handle_work_item(&self, item: WorkItem) -> Result<()> {
        tracing::info!(
            "Agent {} working item {} ({}) from queue {}",
            self.id,
            item.id,
            item.title,
            item.queue
        );
        let input = format!(
            "[Work item: {}] [Queue: {}]\n{}\n\n{}",
            item.title, item.queue, item.title, item.description
        );

        let queue = self
            .work_queues
            .get(&item.queue)
            .ok_or_else(|| Error::QueueNotFound(item.queue.clone()))?;

        match self.reasoner.respond(&input).await {
            Ok(_) => {
                queue.complete(&item.id)?;
                tracing::debug!("Agent {}: work item {} done", self.id, item.id);
            }
            Err(e) => {
                queue.block(&item.id, &e.to_string())?;
                tracing::warn!("Agent {}: work item {} blocked: {}", self.id, item.id, e);
            }
        }
        Ok(())
    }

    /// Reason over a direct message. Outbound replies travel through the
    /// reasoner's own tool layer; here the reply is only logged.
    async fn handle_direct_message(&self, dm: DirectMessage) -> Result<()> {
        tracing::info!("Agent {} handling DM {} from {}", self.id, dm.id, dm.from);
        let input = format!("[Direct message from {}]\n{}", dm.from, dm.content);

        match self.reasoner.respond(&input).await {
            Ok(reply) if reply.trim() != NO_ACTION => {
                tracing::info!("Agent {} replied to DM from {}: {}", self.id, dm.from, reply.trim());
            }
            Ok(_) => {
                tracing::debug!("Agent {}: NO_ACTION on DM {}", self.id, dm.id);
            }
            Err(e) => {
                tracing::warn!("Agent {}: reasoner failed on DM {}: {}", self.id, dm.id, e);
            }
        }
        Ok(())
    }
}
