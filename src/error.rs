//! Error types for tinycorp.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid channel name: {0:?}")]
    InvalidChannelName(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Agent {agent} is not a member of channel {channel}")]
    NotAMember { channel: String, agent: String },

    #[error("Work item {id} not found in queue {queue}")]
    WorkItemNotFound { queue: String, id: String },

    #[error("Work queue not found: {0}")]
    QueueNotFound(String),

    #[error("Reasoner error: {0}")]
    Reasoner(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
