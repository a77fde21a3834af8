//! Role-relevance predicate for channel messages.

use crate::core::channel::Message;
use crate::org::RoleConfig;

/// Should this agent handle this message? Driven entirely by role data.
///
/// Rules, in order:
/// - an agent never matches its own message;
/// - a channel exclusively handled by another role excludes the candidate;
/// - match on the role's declared sources or exclusive channels;
/// - match on a content mention of the agent id or role id (case-insensitive,
///   with or without a leading `@`);
/// - match when the sender is the candidate's manager;
/// - match when the candidate receives from direct reports and the sender is one.
///
/// Total function: no match is a normal outcome, not an error.
pub fn is_relevant(
    msg: &Message,
    agent_id: &str,
    role: &RoleConfig,
    direct_reports: &dyn Fn(&str) -> Vec<String>,
    exclusive_channel_role: &dyn Fn(&str) -> Option<String>,
) -> bool {
    if msg.from == agent_id {
        return false;
    }

    if let Some(exclusive) = exclusive_channel_role(&msg.channel) {
        if exclusive != role.id {
            return false;
        }
    }

    if role.handles_sources.iter().any(|s| s == &msg.from) {
        return true;
    }
    if role.handles_channels.iter().any(|c| c == &msg.channel) {
        return true;
    }

    let content = msg.content.to_lowercase();
    if mentions(&content, agent_id) || mentions(&content, &role.id) {
        return true;
    }

    if msg.from == role.reports_to {
        return true;
    }
    if role.receives_from_direct_reports && direct_reports(agent_id).contains(&msg.from) {
        return true;
    }

    false
}

/// True when lowercased content contains the id, bare or as `@id`.
fn mentions(content: &str, id: &str) -> bool {
    let id = id.to_lowercase();
    !id.is_empty() && content.contains(&id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channel::{Message, MessageStatus};
    use crate::org::RoleConfig;

    fn msg(from: &str, channel: &str, content: &str) -> Message {
        Message {
            id: "m1".into(),
            channel: channel.into(),
            from: from.into(),
            content: content.into(),
            timestamp: 0,
            thread_id: None,
            status: MessageStatus::Pending,
            claimed_by: None,
        }
    }

    fn swe_role() -> RoleConfig {
        RoleConfig::new("swe").with_reports_to("eng-director")
    }

    fn director_role() -> RoleConfig {
        RoleConfig::new("eng-director")
            .with_reports_to("ceo")
            .with_direct_reports()
    }

    fn ceo_role() -> RoleConfig {
        RoleConfig::new("ceo")
            .with_sources(vec!["board".into()])
            .with_exclusive_channels(vec!["company".into()])
            .with_direct_reports()
    }

    fn no_reports(_: &str) -> Vec<String> {
        Vec::new()
    }

    fn no_exclusive(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_ignores_own_messages() {
        let m = msg("swe-1", "general", "hello");
        assert!(!is_relevant(&m, "swe-1", &swe_role(), &no_reports, &no_exclusive));
    }

    #[test]
    fn test_board_message_goes_to_ceo_only() {
        let m = msg("board", "general", "quarterly update");
        assert!(is_relevant(&m, "ceo", &ceo_role(), &no_reports, &no_exclusive));
        assert!(!is_relevant(&m, "swe-1", &swe_role(), &no_reports, &no_exclusive));
    }

    #[test]
    fn test_exclusive_channel_blocks_other_roles() {
        let m = msg("eng-director", "company", "all hands");
        let exclusive = |ch: &str| (ch == "company").then(|| "ceo".to_string());
        assert!(is_relevant(&m, "ceo", &ceo_role(), &no_reports, &exclusive));
        // Blocked even though the sender is swe-1's manager
        assert!(!is_relevant(&m, "swe-1", &swe_role(), &no_reports, &exclusive));
    }

    #[test]
    fn test_direct_mention_triggers_response() {
        let m = msg("someone", "general", "hey swe-1 can you help");
        assert!(is_relevant(&m, "swe-1", &swe_role(), &no_reports, &no_exclusive));

        let m = msg("someone", "general", "ping @swe-1 please");
        assert!(is_relevant(&m, "swe-1", &swe_role(), &no_reports, &no_exclusive));
    }

    #[test]
    fn test_role_mention_is_case_insensitive() {
        let m = msg("someone", "general", "any SWE around?");
        assert!(is_relevant(&m, "swe-1", &swe_role(), &no_reports, &no_exclusive));
    }

    #[test]
    fn test_manager_message_reaches_direct_report() {
        let m = msg("eng-director", "engineering", "status?");
        assert!(is_relevant(&m, "swe-1", &swe_role(), &no_reports, &no_exclusive));
    }

    #[test]
    fn test_director_receives_from_direct_report() {
        let m = msg("swe-1", "engineering", "deploy done");
        let reports = |_: &str| vec!["swe-1".to_string()];
        assert!(is_relevant(&m, "eng-director", &director_role(), &reports, &no_exclusive));
    }

    #[test]
    fn test_direct_reports_flag_off_blocks_reports() {
        let m = msg("swe-1", "engineering", "deploy done");
        let mut role = director_role();
        role.receives_from_direct_reports = false;
        let reports = |_: &str| vec!["swe-1".to_string()];
        assert!(!is_relevant(&m, "eng-director", &role, &reports, &no_exclusive));
    }

    #[test]
    fn test_unrelated_message_not_relevant() {
        let m = msg("other-agent", "general", "random talk");
        assert!(!is_relevant(&m, "swe-1", &swe_role(), &no_reports, &no_exclusive));
    }

    #[test]
    fn test_custom_sources_on_ic_role() {
        let support = RoleConfig::new("support").with_sources(vec!["customer-portal".into()]);
        let m = msg("customer-portal", "general", "ticket #42");
        assert!(is_relevant(&m, "support-1", &support, &no_reports, &no_exclusive));
        assert!(!is_relevant(&m, "swe-1", &swe_role(), &no_reports, &no_exclusive));
    }
}
