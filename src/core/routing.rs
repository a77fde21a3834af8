//! Recipient selection for channel messages.
//!
//! The routing policy is a pure function from (message, thread, subscribers)
//! to at most one recipient. Absence of a match is a normal outcome: the
//! message stays in the log for `history`/`get_thread` readers.

use std::sync::Arc;

use crate::core::channel::Message;
use crate::core::relevance::is_relevant;
use crate::org::OrgDirectory;

/// Pluggable recipient-selection policy.
///
/// `thread` is the full thread of the message (root plus replies, the message
/// itself included); the caller supplies it so the policy needs no channel
/// access and stays side-effect free. Implementations must not call back into
/// the `ChannelManager`.
pub trait RoutingPolicy: Send + Sync {
    fn select(&self, msg: &Message, thread: &[Message], subscribers: &[String]) -> Vec<String>;
}

impl<F> RoutingPolicy for F
where
    F: Fn(&Message, &[Message], &[String]) -> Vec<String> + Send + Sync,
{
    fn select(&self, msg: &Message, thread: &[Message], subscribers: &[String]) -> Vec<String> {
        self(msg, thread, subscribers)
    }
}

/// Role-driven router: thread continuity first, then role relevance.
pub struct MessageRouter {
    org: Arc<dyn OrgDirectory>,
}

impl MessageRouter {
    pub fn new(org: Arc<dyn OrgDirectory>) -> Self {
        Self { org }
    }
}

impl RoutingPolicy for MessageRouter {
    /// Selection order, short-circuiting at the first hit:
    /// 1. the agent that claimed the thread root, if still subscribed;
    /// 2. the first subscribed agent already participating in the thread;
    /// 3. the relevance filter, tie-broken by the channel's primary handler
    ///    role, then by subscriber order.
    fn select(&self, msg: &Message, thread: &[Message], subscribers: &[String]) -> Vec<String> {
        let root_id = msg.root_id();

        // Triage continuity
        let triaged = thread
            .iter()
            .find(|m| m.id == root_id)
            .and_then(|m| m.claimed_by.as_deref());
        if let Some(agent) = triaged {
            if subscribers.iter().any(|s| s == agent) {
                return vec![agent.to_string()];
            }
        }

        // Thread continuity: an agent already in the conversation keeps it
        let prior_author = thread
            .iter()
            .filter(|m| m.id != msg.id)
            .find(|m| subscribers.iter().any(|s| *s == m.from));
        if let Some(m) = prior_author {
            return vec![m.from.clone()];
        }

        // Role relevance
        let direct_reports = |id: &str| self.org.direct_reports(id);
        let exclusive = |ch: &str| self.org.exclusive_channel_role(ch);
        let relevant: Vec<&String> = subscribers
            .iter()
            .filter(|id| {
                self.org
                    .role(id)
                    .map(|role| is_relevant(msg, id, &role, &direct_reports, &exclusive))
                    .unwrap_or(false)
            })
            .collect();
        if relevant.is_empty() {
            return Vec::new();
        }

        // Prefer the channel's primary handler role when one is declared
        if let Some(primary) = self.org.primary_handler_role(&msg.channel) {
            let preferred = relevant
                .iter()
                .find(|id| self.org.role(id).is_some_and(|r| r.id == primary));
            if let Some(id) = preferred {
                return vec![(*id).clone()];
            }
        }

        vec![relevant[0].clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channel::{Message, MessageStatus};
    use crate::org::{ChannelConfig, Org, OrgMember, RoleConfig};

    fn message(id: &str, from: &str, channel: &str, content: &str, thread_id: Option<&str>) -> Message {
        Message {
            id: id.into(),
            channel: channel.into(),
            from: from.into(),
            content: content.into(),
            timestamp: 0,
            thread_id: thread_id.map(str::to_string),
            status: MessageStatus::Pending,
            claimed_by: None,
        }
    }

    fn eng_org() -> Arc<Org> {
        let mut org = Org::new();
        org.add_role(RoleConfig::new("swe").with_reports_to("eng-director"));
        org.add_role(
            RoleConfig::new("eng-director")
                .with_reports_to("ceo")
                .with_direct_reports(),
        );
        for line in [
            "- eng-director (reports_to: ceo)",
            "- swe-1 (role: swe, reports_to: eng-director)",
            "- swe-2 (role: swe, reports_to: eng-director)",
        ] {
            org.parse_members(line);
        }
        Arc::new(org)
    }

    fn subs(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_relevant_recipient_is_empty() {
        let router = MessageRouter::new(eng_org());
        let msg = message("m1", "swe-2", "eng", "generic status update", None);
        let thread = vec![msg.clone()];
        assert!(router.select(&msg, &thread, &subs(&["swe-1"])).is_empty());
    }

    #[test]
    fn test_mention_selects_agent() {
        let router = MessageRouter::new(eng_org());
        let msg = message("m1", "swe-2", "eng", "hey swe-1 can you help", None);
        let thread = vec![msg.clone()];
        assert_eq!(router.select(&msg, &thread, &subs(&["swe-1"])), vec!["swe-1"]);
    }

    #[test]
    fn test_triage_continuity_wins() {
        let router = MessageRouter::new(eng_org());
        let mut root = message("root", "user", "eng", "hey swe-1", None);
        root.status = MessageStatus::Active;
        root.claimed_by = Some("swe-2".into());
        let reply = message("m2", "user", "eng", "hey swe-1 again", Some("root"));
        let thread = vec![root, reply.clone()];

        // swe-2 claimed the root, so the mention of swe-1 is overridden.
        assert_eq!(
            router.select(&reply, &thread, &subs(&["swe-1", "swe-2"])),
            vec!["swe-2"]
        );
    }

    #[test]
    fn test_triage_ignored_when_claimant_unsubscribed() {
        let router = MessageRouter::new(eng_org());
        let mut root = message("root", "user", "eng", "hey swe-1", None);
        root.claimed_by = Some("gone".into());
        let reply = message("m2", "user", "eng", "hey swe-1 again", Some("root"));
        let thread = vec![root, reply.clone()];

        assert_eq!(
            router.select(&reply, &thread, &subs(&["swe-1"])),
            vec!["swe-1"]
        );
    }

    #[test]
    fn test_thread_continuity_fallback() {
        let router = MessageRouter::new(eng_org());
        let root = message("root", "user", "eng", "anyone?", None);
        let first_reply = message("m2", "swe-2", "eng", "looking", Some("root"));
        let new_reply = message("m3", "user", "eng", "thanks", Some("root"));
        let thread = vec![root, first_reply, new_reply.clone()];

        // swe-2 already replied in the thread and keeps the conversation.
        assert_eq!(
            router.select(&new_reply, &thread, &subs(&["swe-1", "swe-2"])),
            vec!["swe-2"]
        );
    }

    #[test]
    fn test_manager_message_routes_to_report() {
        let router = MessageRouter::new(eng_org());
        let msg = message("m1", "eng-director", "eng", "please pick this up", None);
        let thread = vec![msg.clone()];
        assert_eq!(
            router.select(&msg, &thread, &subs(&["swe-1", "swe-2"])),
            vec!["swe-1"]
        );
    }

    #[test]
    fn test_primary_handler_tie_break() {
        let mut org = Org::new();
        org.add_role(RoleConfig::new("swe").with_reports_to("eng-director"));
        org.add_role(RoleConfig::new("qa").with_reports_to("eng-director"));
        org.add_member(OrgMember {
            id: "swe-1".into(),
            role: "swe".into(),
            reports_to: "eng-director".into(),
        });
        org.add_member(OrgMember {
            id: "qa-1".into(),
            role: "qa".into(),
            reports_to: "eng-director".into(),
        });
        org.add_channel(ChannelConfig {
            name: "quality".into(),
            purpose: "bug triage".into(),
            primary_handler_role: Some("qa".into()),
        });
        let router = MessageRouter::new(Arc::new(org));

        // Both are mentioned; the channel's primary handler role wins.
        let msg = message("m1", "user", "quality", "swe-1 qa-1: flaky test", None);
        let thread = vec![msg.clone()];
        assert_eq!(
            router.select(&msg, &thread, &subs(&["swe-1", "qa-1"])),
            vec!["qa-1"]
        );
    }

    #[test]
    fn test_first_relevant_in_subscriber_order() {
        let router = MessageRouter::new(eng_org());
        // Both swe-1 and swe-2 are mentioned; subscriber order decides.
        let msg = message("m1", "user", "eng", "swe-1 swe-2: ship it", None);
        let thread = vec![msg.clone()];
        assert_eq!(
            router.select(&msg, &thread, &subs(&["swe-2", "swe-1"])),
            vec!["swe-2"]
        );
    }
}
