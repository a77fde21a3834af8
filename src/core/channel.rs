//! Channels: append-only message logs with single-recipient delivery.
//!
//! A `Channel` owns its message log, subscriber registry, and thread
//! ownership bookkeeping. `ChannelManager` is the registry of channels and
//! runs the delivery algorithm: sticky thread owner first, then the
//! pluggable routing policy.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::core::routing::RoutingPolicy;
use crate::error::{Error, Result};

/// Per-subscriber delivery function. Must enqueue and return; a slow
/// delivery function stalls every channel.
pub type DeliveryFn = Arc<dyn Fn(&Message) -> Result<()> + Send + Sync>;

/// Message lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Posted, not yet claimed by any agent.
    Pending,
    /// Claimed by an agent and being worked.
    Active,
    /// Handled. Terminal.
    Done,
}

/// A message posted to a channel. Immutable after creation except for
/// `status` and `claimed_by`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id (ULID).
    pub id: String,
    /// Channel this message was posted to (normalized name).
    pub channel: String,
    /// Sender agent id.
    pub from: String,
    /// Message content.
    pub content: String,
    /// Creation timestamp (unix ms).
    pub timestamp: i64,
    /// Root message id this replies to. Absent on thread roots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Lifecycle status.
    pub status: MessageStatus,
    /// Agent currently holding the claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
}

impl Message {
    fn new(channel: &str, from: &str, content: &str, thread_id: Option<&str>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            channel: channel.to_string(),
            from: from.to_string(),
            content: content.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            thread_id: thread_id.map(str::to_string),
            status: MessageStatus::Pending,
            claimed_by: None,
        }
    }

    /// Root id of the thread this message belongs to.
    pub fn root_id(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.id)
    }

    /// Whether this message anchors a thread.
    pub fn is_root(&self) -> bool {
        self.thread_id.is_none()
    }
}

struct Subscriber {
    agent_id: String,
    deliver: DeliveryFn,
}

/// Read-only channel overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub name: String,
    pub subscribers: Vec<String>,
    pub message_count: usize,
    pub latest_message: Option<Message>,
}

/// A named, append-only message log with a subscriber registry.
pub struct Channel {
    name: String,
    messages: Vec<Message>,
    subscribers: Vec<Subscriber>,
    /// Thread root id -> owning agent id. Set on claim, cleared on release.
    thread_owners: HashMap<String, String>,
    /// Allow-list for dynamic channels. `None` means open.
    members: Option<HashSet<String>>,
}

impl Channel {
    /// Create an open channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Vec::new(),
            subscribers: Vec::new(),
            thread_owners: HashMap::new(),
            members: None,
        }
    }

    /// Create a dynamic channel restricted to the given members.
    pub fn with_members(name: impl Into<String>, members: HashSet<String>) -> Self {
        Self {
            members: Some(members),
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_member(&self, agent_id: &str) -> Result<()> {
        match &self.members {
            Some(members) if !members.contains(agent_id) => Err(Error::NotAMember {
                channel: self.name.clone(),
                agent: agent_id.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Add an agent to a dynamic channel's member list. No-op on open channels.
    pub fn invite(&mut self, agent_id: &str) {
        if let Some(members) = &mut self.members {
            members.insert(agent_id.to_string());
        }
    }

    /// Append a message to the log. Does not deliver; see [`ChannelManager::post`].
    pub fn post(&mut self, from: &str, content: &str, thread_id: Option<&str>) -> Result<Message> {
        self.check_member(from)?;
        let msg = Message::new(&self.name, from, content, thread_id);
        self.messages.push(msg.clone());
        Ok(msg)
    }

    /// Register a delivery function for an agent. Re-subscribing replaces the
    /// previous registration in place (last one wins).
    pub fn subscribe(&mut self, agent_id: &str, deliver: DeliveryFn) -> Result<()> {
        self.check_member(agent_id)?;
        if let Some(existing) = self.subscribers.iter_mut().find(|s| s.agent_id == agent_id) {
            existing.deliver = deliver;
        } else {
            self.subscribers.push(Subscriber {
                agent_id: agent_id.to_string(),
                deliver,
            });
        }
        Ok(())
    }

    pub fn unsubscribe(&mut self, agent_id: &str) {
        self.subscribers.retain(|s| s.agent_id != agent_id);
    }

    /// Subscriber ids in registration order.
    pub fn subscriber_ids(&self) -> Vec<String> {
        self.subscribers.iter().map(|s| s.agent_id.clone()).collect()
    }

    pub fn is_subscribed(&self, agent_id: &str) -> bool {
        self.subscribers.iter().any(|s| s.agent_id == agent_id)
    }

    fn delivery_fn(&self, agent_id: &str) -> Option<DeliveryFn> {
        self.subscribers
            .iter()
            .find(|s| s.agent_id == agent_id)
            .map(|s| Arc::clone(&s.deliver))
    }

    fn find_mut(&mut self, message_id: &str) -> Result<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| Error::MessageNotFound(message_id.to_string()))
    }

    pub fn contains_message(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }

    /// Pending -> Active. Claiming a thread root registers thread ownership.
    pub fn claim(&mut self, message_id: &str, agent_id: &str) -> Result<()> {
        let msg = self.find_mut(message_id)?;
        msg.status = MessageStatus::Active;
        msg.claimed_by = Some(agent_id.to_string());
        if msg.is_root() {
            let root_id = msg.id.clone();
            self.thread_owners.insert(root_id, agent_id.to_string());
        }
        Ok(())
    }

    /// Active -> Done. Terminal; clears the claim.
    pub fn complete(&mut self, message_id: &str) -> Result<()> {
        let msg = self.find_mut(message_id)?;
        msg.status = MessageStatus::Done;
        msg.claimed_by = None;
        Ok(())
    }

    /// Back to Pending. Clears the claim and, for roots, thread ownership.
    /// Returns the reset message so the caller can re-run delivery.
    pub fn release(&mut self, message_id: &str) -> Result<Message> {
        let msg = self.find_mut(message_id)?;
        msg.status = MessageStatus::Pending;
        msg.claimed_by = None;
        let msg = msg.clone();
        if msg.is_root() {
            self.thread_owners.remove(&msg.id);
        }
        Ok(msg)
    }

    pub fn thread_owner(&self, root_id: &str) -> Option<&str> {
        self.thread_owners.get(root_id).map(String::as_str)
    }

    /// Root message + all replies, ordered by timestamp.
    pub fn get_thread(&self, root_id: &str) -> Vec<Message> {
        let mut thread: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.id == root_id || m.thread_id.as_deref() == Some(root_id))
            .cloned()
            .collect();
        thread.sort_by_key(|m| m.timestamp);
        thread
    }

    /// First pending message not posted by this agent.
    pub fn next_pending(&self, exclude_agent_id: &str) -> Option<Message> {
        self.messages
            .iter()
            .find(|m| m.status == MessageStatus::Pending && m.from != exclude_agent_id)
            .cloned()
    }

    /// Most recent messages, oldest first. No limit returns the full log.
    pub fn history(&self, limit: Option<usize>) -> Vec<Message> {
        match limit {
            Some(n) => {
                let start = self.messages.len().saturating_sub(n);
                self.messages[start..].to_vec()
            }
            None => self.messages.clone(),
        }
    }

    /// Message id -> claimant, for every currently claimed message.
    pub fn triaged_by(&self) -> HashMap<String, String> {
        self.messages
            .iter()
            .filter_map(|m| m.claimed_by.clone().map(|by| (m.id.clone(), by)))
            .collect()
    }

    pub fn summary(&self) -> ChannelSummary {
        ChannelSummary {
            name: self.name.clone(),
            subscribers: self.subscriber_ids(),
            message_count: self.messages.len(),
            latest_message: self.messages.last().cloned(),
        }
    }
}

/// Registry of channels plus the delivery algorithm.
pub struct ChannelManager {
    channels: Mutex<HashMap<String, Channel>>,
    router: Mutex<Arc<dyn RoutingPolicy>>,
}

impl ChannelManager {
    pub fn new(router: Arc<dyn RoutingPolicy>) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            router: Mutex::new(router),
        }
    }

    /// Swap the routing policy (e.g. after an org reload).
    pub fn set_router(&self, router: Arc<dyn RoutingPolicy>) {
        *self.router.lock().unwrap() = router;
    }

    /// Create an open channel. Idempotent; returns the normalized name.
    pub fn create(&self, name: &str) -> Result<String> {
        let key = normalize_channel_name(name)?;
        let mut channels = self.channels.lock().unwrap();
        if !channels.contains_key(&key) {
            channels.insert(key.clone(), Channel::new(key.clone()));
            tracing::info!("Channel created: #{}", key);
        }
        Ok(key)
    }

    /// Create a dynamic channel restricted to the given members. Idempotent;
    /// an existing channel keeps its current membership.
    pub fn create_dynamic(&self, name: &str, members: HashSet<String>) -> Result<String> {
        let key = normalize_channel_name(name)?;
        let mut channels = self.channels.lock().unwrap();
        if !channels.contains_key(&key) {
            channels.insert(key.clone(), Channel::with_members(key.clone(), members));
            tracing::info!("Dynamic channel created: #{}", key);
        }
        Ok(key)
    }

    /// Add an agent to a dynamic channel's member list.
    pub fn invite(&self, name: &str, agent_id: &str) -> Result<()> {
        self.with_channel_mut(name, |ch| {
            ch.invite(agent_id);
            Ok(())
        })
    }

    /// Append a message and run delivery.
    pub fn post(
        &self,
        channel: &str,
        from: &str,
        content: &str,
        thread_id: Option<&str>,
    ) -> Result<Message> {
        let key = normalize_channel_name(channel)?;
        let msg = {
            let mut channels = self.channels.lock().unwrap();
            let ch = channels
                .get_mut(&key)
                .ok_or_else(|| Error::ChannelNotFound(channel.to_string()))?;
            ch.post(from, content, thread_id)?
        };
        tracing::debug!("Message {} posted to #{} by {}", msg.id, key, from);
        self.deliver(&key, &msg);
        Ok(msg)
    }

    /// Register a delivery function for an agent on a channel.
    pub fn subscribe(&self, channel: &str, agent_id: &str, deliver: DeliveryFn) -> Result<()> {
        self.with_channel_mut(channel, |ch| ch.subscribe(agent_id, deliver))
    }

    pub fn unsubscribe(&self, channel: &str, agent_id: &str) -> Result<()> {
        self.with_channel_mut(channel, |ch| {
            ch.unsubscribe(agent_id);
            Ok(())
        })
    }

    /// Claim a message anywhere in the registry by id.
    pub fn claim(&self, message_id: &str, agent_id: &str) -> Result<()> {
        let mut channels = self.channels.lock().unwrap();
        let ch = Self::channel_of_mut(&mut channels, message_id)?;
        ch.claim(message_id, agent_id)?;
        tracing::debug!("Message {} claimed by {}", message_id, agent_id);
        Ok(())
    }

    /// Mark a message done.
    pub fn complete(&self, message_id: &str) -> Result<()> {
        let mut channels = self.channels.lock().unwrap();
        let ch = Self::channel_of_mut(&mut channels, message_id)?;
        ch.complete(message_id)?;
        tracing::debug!("Message {} completed", message_id);
        Ok(())
    }

    /// Reset a message to pending and re-run delivery so another subscriber
    /// can pick it up.
    pub fn release(&self, message_id: &str) -> Result<()> {
        let (key, msg) = {
            let mut channels = self.channels.lock().unwrap();
            let ch = Self::channel_of_mut(&mut channels, message_id)?;
            let msg = ch.release(message_id)?;
            (ch.name().to_string(), msg)
        };
        tracing::debug!("Message {} released back to #{}", message_id, key);
        self.deliver(&key, &msg);
        Ok(())
    }

    pub fn history(&self, channel: &str, limit: Option<usize>) -> Result<Vec<Message>> {
        self.with_channel(channel, |ch| Ok(ch.history(limit)))
    }

    pub fn get_thread(&self, channel: &str, root_id: &str) -> Result<Vec<Message>> {
        self.with_channel(channel, |ch| Ok(ch.get_thread(root_id)))
    }

    /// First pending message in a channel not authored by the given agent.
    pub fn next_pending(&self, channel: &str, exclude_agent_id: &str) -> Result<Option<Message>> {
        self.with_channel(channel, |ch| Ok(ch.next_pending(exclude_agent_id)))
    }

    pub fn summary(&self, channel: &str) -> Result<ChannelSummary> {
        self.with_channel(channel, |ch| Ok(ch.summary()))
    }

    /// Message id -> claimant projection for a channel.
    pub fn triaged_by(&self, channel: &str) -> Result<HashMap<String, String>> {
        self.with_channel(channel, |ch| Ok(ch.triaged_by()))
    }

    pub fn thread_owner(&self, channel: &str, root_id: &str) -> Result<Option<String>> {
        self.with_channel(channel, |ch| Ok(ch.thread_owner(root_id).map(str::to_string)))
    }

    /// All channel names, sorted.
    pub fn list(&self) -> Vec<String> {
        let channels = self.channels.lock().unwrap();
        let mut names: Vec<String> = channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Channels the agent is subscribed to, sorted.
    pub fn channels_for_agent(&self, agent_id: &str) -> Vec<String> {
        let channels = self.channels.lock().unwrap();
        let mut names: Vec<String> = channels
            .values()
            .filter(|ch| ch.is_subscribed(agent_id))
            .map(|ch| ch.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn exists(&self, channel: &str) -> bool {
        match normalize_channel_name(channel) {
            Ok(key) => self.channels.lock().unwrap().contains_key(&key),
            Err(_) => false,
        }
    }

    /// Delivery algorithm: sticky thread owner if still subscribed, otherwise
    /// the routing policy. The sender never receives its own message, and
    /// delivery functions run after every internal lock is released.
    fn deliver(&self, key: &str, msg: &Message) {
        let (thread, subscriber_ids, sticky) = {
            let channels = self.channels.lock().unwrap();
            let Some(ch) = channels.get(key) else {
                return;
            };
            let sticky = msg
                .thread_id
                .as_deref()
                .and_then(|root| ch.thread_owner(root))
                .filter(|owner| ch.is_subscribed(owner))
                .map(str::to_string);
            (ch.get_thread(msg.root_id()), ch.subscriber_ids(), sticky)
        };

        let mut recipients = match sticky {
            Some(owner) => vec![owner],
            None => {
                let router = Arc::clone(&self.router.lock().unwrap());
                router.select(msg, &thread, &subscriber_ids)
            }
        };
        recipients.retain(|r| r != &msg.from);

        if recipients.is_empty() {
            tracing::debug!("Message {} on #{}: no recipient", msg.id, key);
            return;
        }

        let deliveries: Vec<(String, DeliveryFn)> = {
            let channels = self.channels.lock().unwrap();
            let Some(ch) = channels.get(key) else {
                return;
            };
            recipients
                .iter()
                .filter_map(|id| ch.delivery_fn(id).map(|f| (id.clone(), f)))
                .collect()
        };

        for (agent_id, deliver) in deliveries {
            if let Err(e) = deliver(msg) {
                // One subscriber's failure must not block the others.
                tracing::warn!("Delivery of {} to {} failed: {}", msg.id, agent_id, e);
            } else {
                tracing::debug!("Message {} delivered to {}", msg.id, agent_id);
            }
        }
    }

    fn with_channel<R>(&self, name: &str, f: impl FnOnce(&Channel) -> Result<R>) -> Result<R> {
        let key = normalize_channel_name(name)?;
        let channels = self.channels.lock().unwrap();
        let ch = channels
            .get(&key)
            .ok_or_else(|| Error::ChannelNotFound(name.to_string()))?;
        f(ch)
    }

    fn with_channel_mut<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Channel) -> Result<R>,
    ) -> Result<R> {
        let key = normalize_channel_name(name)?;
        let mut channels = self.channels.lock().unwrap();
        let ch = channels
            .get_mut(&key)
            .ok_or_else(|| Error::ChannelNotFound(name.to_string()))?;
        f(ch)
    }

    fn channel_of_mut<'a>(
        channels: &'a mut HashMap<String, Channel>,
        message_id: &str,
    ) -> Result<&'a mut Channel> {
        channels
            .values_mut()
            .find(|ch| ch.contains_message(message_id))
            .ok_or_else(|| Error::MessageNotFound(message_id.to_string()))
    }
}

/// Strip a leading `#` and surrounding whitespace so "#engineering" and
/// "engineering" resolve to the same channel. Rejects names that are empty
/// after normalization. Idempotent.
pub fn normalize_channel_name(name: &str) -> Result<String> {
    let normalized = name.trim().trim_start_matches('#').trim();
    if normalized.is_empty() {
        return Err(Error::InvalidChannelName(name.to_string()));
    }
    Ok(normalized.to_string())
}
