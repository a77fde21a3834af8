//! Organization directory: roles, reporting lines, and channel policies.
//!
//! The routing core treats role data as opaque input; this module is the
//! seam that supplies it. How the data gets here (markdown configs, an HTTP
//! admin surface) is the embedding process's concern.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A single member of the organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrgMember {
    /// Agent id (e.g. "swe-1").
    pub id: String,
    /// Role id this member holds (e.g. "swe").
    pub role: String,
    /// Agent id of the member's manager.
    pub reports_to: String,
}

/// Role capability descriptor consumed by the relevance predicate.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoleConfig {
    /// Role id (e.g. "swe", "eng-director").
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Role id of the manager position.
    pub reports_to: String,
    /// Senders this role always handles (e.g. the CEO handles "board").
    pub handles_sources: Vec<String>,
    /// Channels this role handles exclusively.
    pub handles_channels: Vec<String>,
    /// Whether messages from direct reports are relevant to this role.
    pub receives_from_direct_reports: bool,
    /// Channels this role subscribes to. Empty means all channels.
    pub channels: Vec<String>,
}

impl RoleConfig {
    /// Create a role with the given id; title defaults to the id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            ..Self::default()
        }
    }

    /// Set the manager role id.
    pub fn with_reports_to(mut self, manager: impl Into<String>) -> Self {
        self.reports_to = manager.into();
        self
    }

    /// Declare senders this role always handles.
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.handles_sources = sources;
        self
    }

    /// Declare channels this role handles exclusively.
    pub fn with_exclusive_channels(mut self, channels: Vec<String>) -> Self {
        self.handles_channels = channels;
        self
    }

    /// Mark the role as receiving messages from its direct reports.
    pub fn with_direct_reports(mut self) -> Self {
        self.receives_from_direct_reports = true;
        self
    }

    /// Restrict the role's subscriptions to the given channels.
    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }
}

/// Per-channel routing policy supplied by org configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    pub name: String,
    pub purpose: String,
    /// Role preferred by the router's tie-break for this channel.
    pub primary_handler_role: Option<String>,
}

/// Lookups the message router needs. Implemented by [`Org`]; kept as a
/// trait so routing stays decoupled from how org data is stored.
pub trait OrgDirectory: Send + Sync {
    /// Resolve an agent id to its role descriptor.
    fn role(&self, agent_id: &str) -> Option<RoleConfig>;

    /// Agent ids reporting directly to the given manager.
    fn direct_reports(&self, manager_id: &str) -> Vec<String>;

    /// Role id that exclusively handles this channel, if any.
    fn exclusive_channel_role(&self, channel: &str) -> Option<String>;

    /// Preferred handler role for this channel, if configured.
    fn primary_handler_role(&self, channel: &str) -> Option<String>;
}

/// In-memory organization directory.
#[derive(Debug, Default)]
pub struct Org {
    members: HashMap<String, OrgMember>,
    roles: HashMap<String, RoleConfig>,
    channels: HashMap<String, ChannelConfig>,
}

impl Org {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role descriptor.
    pub fn add_role(&mut self, role: RoleConfig) {
        self.roles.insert(role.id.clone(), role);
    }

    /// Register an org member.
    pub fn add_member(&mut self, member: OrgMember) {
        self.members.insert(member.id.clone(), member);
    }

    /// Register a channel config.
    pub fn add_channel(&mut self, config: ChannelConfig) {
        self.channels.insert(config.name.clone(), config);
    }

    /// Parse member lines of the form `- swe-1 (role: swe, reports_to: eng-director)`
    /// and register each member. The role defaults to the id and reports_to to
    /// empty when the parenthesized part is absent. Returns how many members
    /// were added.
    pub fn parse_members(&mut self, text: &str) -> usize {
        let mut added = 0;
        for line in text.lines() {
            if let Some(member) = parse_member_line(line) {
                self.add_member(member);
                added += 1;
            }
        }
        tracing::info!("Organization loaded: {} members", added);
        added
    }

    pub fn member(&self, id: &str) -> Option<&OrgMember> {
        self.members.get(id)
    }

    pub fn members(&self) -> impl Iterator<Item = &OrgMember> {
        self.members.values()
    }

    /// The member's manager, if present in the org.
    pub fn manager_of(&self, member_id: &str) -> Option<&OrgMember> {
        let member = self.members.get(member_id)?;
        self.members.get(&member.reports_to)
    }
}

impl OrgDirectory for Org {
    fn role(&self, agent_id: &str) -> Option<RoleConfig> {
        let member = self.members.get(agent_id)?;
        self.roles.get(&member.role).cloned()
    }

    fn direct_reports(&self, manager_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .members
            .values()
            .filter(|m| m.reports_to == manager_id)
            .map(|m| m.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn exclusive_channel_role(&self, channel: &str) -> Option<String> {
        for member in self.members.values() {
            if let Some(role) = self.roles.get(&member.role) {
                if role.handles_channels.iter().any(|c| c == channel) {
                    return Some(role.id.clone());
                }
            }
        }
        None
    }

    fn primary_handler_role(&self, channel: &str) -> Option<String> {
        self.channels.get(channel)?.primary_handler_role.clone()
    }
}

/// Parse a single org member line, e.g.:
///   `- swe-1 (role: swe, reports_to: eng-director)`
///   `- ceo (reports_to: board)`
fn parse_member_line(line: &str) -> Option<OrgMember> {
    let re = Regex::new(r"^-\s+([^\s(]+)\s*(?:\(([^)]*)\))?\s*$").ok()?;
    let caps = re.captures(line.trim())?;

    let id = caps.get(1)?.as_str().to_string();
    let mut role = id.clone();
    let mut reports_to = String::new();

    if let Some(inner) = caps.get(2) {
        for part in inner.as_str().split(',') {
            let Some((key, value)) = part.split_once(':') else {
                continue;
            };
            match key.trim() {
                "role" => role = value.trim().to_string(),
                "reports_to" => reports_to = value.trim().to_string(),
                _ => {}
            }
        }
    }

    Some(OrgMember {
        id,
        role,
        reports_to,
    })
}
