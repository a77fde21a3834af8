//! tinycorp library root.

pub mod agent;
pub mod core;
pub mod error;
pub mod logging;
pub mod org;
pub mod protocol;

pub use agent::{Agent, AgentContext, AgentEvent, DirectMessage, Reasoner, NO_ACTION};
pub use core::{
    is_relevant, normalize_channel_name, AsyncQueueManager, AsyncWorkQueue, Channel,
    ChannelManager, ChannelSummary, DeliveryFn, Job, Message, MessageRouter, MessageStatus,
    RoutingPolicy, WorkItem, WorkItemStatus, WorkQueue, WorkQueueManager,
};
pub use error::{Error, Result};
pub use org::{ChannelConfig, Org, OrgDirectory, OrgMember, RoleConfig};
pub use protocol::{Mailbox, MailboxItem, MailboxKind};
