//! Core routing substrate: channels, recipient selection, work queues.

pub mod channel;
pub mod queue;
pub mod relevance;
pub mod routing;

pub use channel::{
    normalize_channel_name, Channel, ChannelManager, ChannelSummary, DeliveryFn, Message,
    MessageStatus,
};
pub use queue::{
    AsyncQueueManager, AsyncWorkQueue, Job, WorkItem, WorkItemStatus, WorkQueue, WorkQueueManager,
};
pub use relevance::is_relevant;
pub use routing::{MessageRouter, RoutingPolicy};
