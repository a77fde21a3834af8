//! Agent-side communication primitives.

pub mod mailbox;

pub use mailbox::{Mailbox, MailboxItem, MailboxKind};
