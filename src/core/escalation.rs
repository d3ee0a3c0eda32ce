//! Escalation records: the persisted audit trail of conditions that need a human.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::story::StoryId;

/// Default recipient of escalations raised by the manager.
pub const HUMAN: &str = "human";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscalationId(pub Uuid);

impl EscalationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for EscalationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EscalationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Escalation {
    pub id: EscalationId,
    pub story_id: Option<StoryId>,
    /// Session name of the agent that raised the condition.
    pub from_agent: String,
    pub to_agent: String,
    pub reason: String,
    /// Suggested operator action, specific to the detected state.
    #[serde(default)]
    pub action_hint: Option<String>,
    pub status: EscalationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution: Option<String>,
}

impl Escalation {
    pub fn new(from_agent: &str, story_id: Option<StoryId>, reason: &str) -> Self {
        Self {
            id: EscalationId::new(),
            story_id,
            from_agent: from_agent.to_string(),
            to_agent: HUMAN.to_string(),
            reason: reason.to_string(),
            action_hint: None,
            status: EscalationStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.action_hint = hint;
        self
    }

    /// Pending or acknowledged.
    pub fn is_active(&self) -> bool {
        self.status != EscalationStatus::Resolved
    }

    pub fn acknowledge(&mut self) {
        if self.status == EscalationStatus::Pending {
            self.status = EscalationStatus::Acknowledged;
        }
    }

    pub fn resolve(&mut self, resolution: &str, at: DateTime<Utc>) {
        self.status = EscalationStatus::Resolved;
        self.resolved_at = Some(at);
        self.resolution = Some(resolution.to_string());
    }
}
