//! Story data model.
//!
//! Stories are the schedulable units of backlog work. Each story carries a
//! complexity score used for tier routing, a forward-only status, and the
//! ids of the stories it depends on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::agent::AgentId;
use crate::{Error, Result};

/// Smallest and largest accepted complexity scores.
pub const MIN_COMPLEXITY: u8 = 1;
pub const MAX_COMPLEXITY: u8 = 13;

/// Backlog identifier such as `PAY-12`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoryId(pub String);

impl StoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Story status. Declaration order is the progression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Draft,
    Estimated,
    Planned,
    InProgress,
    Review,
    Qa,
    QaFailed,
    PrSubmitted,
    Merged,
}

impl Default for StoryStatus {
    fn default() -> Self {
        Self::Planned
    }
}

impl StoryStatus {
    pub const ALL: [StoryStatus; 9] = [
        StoryStatus::Draft,
        StoryStatus::Estimated,
        StoryStatus::Planned,
        StoryStatus::InProgress,
        StoryStatus::Review,
        StoryStatus::Qa,
        StoryStatus::QaFailed,
        StoryStatus::PrSubmitted,
        StoryStatus::Merged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Draft => "draft",
            StoryStatus::Estimated => "estimated",
            StoryStatus::Planned => "planned",
            StoryStatus::InProgress => "in_progress",
            StoryStatus::Review => "review",
            StoryStatus::Qa => "qa",
            StoryStatus::QaFailed => "qa_failed",
            StoryStatus::PrSubmitted => "pr_submitted",
            StoryStatus::Merged => "merged",
        }
    }

    /// Whether a story in this status unblocks the stories depending on it.
    ///
    /// `InProgress` counts so dependent work can be pipelined.
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, StoryStatus::Merged | StoryStatus::InProgress)
    }

    pub fn can_advance_to(&self, next: StoryStatus) -> bool {
        next >= *self
    }
}

impl std::fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StoryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StoryStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown story status: {}", s)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Story {
    pub id: StoryId,
    pub team: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub complexity_score: u8,
    #[serde(default)]
    pub status: StoryStatus,
    #[serde(default)]
    pub assigned_agent_id: Option<AgentId>,
    #[serde(default)]
    pub branch_name: Option<String>,
    /// Stories that must be satisfied before this one is scheduled.
    #[serde(default)]
    pub depends_on: Vec<StoryId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Story {
    /// Create a planned, unassigned story with complexity 1.
    pub fn new(id: impl Into<String>, team: &str, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: StoryId::new(id),
            team: team.to_string(),
            title: title.to_string(),
            description: String::new(),
            complexity_score: MIN_COMPLEXITY,
            status: StoryStatus::Planned,
            assigned_agent_id: None,
            branch_name: None,
            depends_on: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_complexity(mut self, score: u8) -> Self {
        self.complexity_score = score;
        self
    }

    pub fn with_status(mut self, status: StoryStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        let id = StoryId::new(id);
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_COMPLEXITY..=MAX_COMPLEXITY).contains(&self.complexity_score) {
            return Err(Error::Validation(format!(
                "story {} complexity {} outside {}..={}",
                self.id, self.complexity_score, MIN_COMPLEXITY, MAX_COMPLEXITY
            )));
        }
        if self.depends_on.contains(&self.id) {
            return Err(Error::Validation(format!(
                "story {} depends on itself",
                self.id
            )));
        }
        Ok(())
    }

    /// Move the story forward. Moving to the current status is a no-op.
    pub fn advance(&mut self, next: StoryStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(Error::InvalidStoryTransition {
                from: self.status,
                to: next,
            });
        }
        if self.status != next {
            self.status = next;
            self.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Planned and nobody holds it.
    pub fn is_assignable(&self) -> bool {
        self.status == StoryStatus::Planned && self.assigned_agent_id.is_none()
    }

    /// Hand the story to an agent and start it.
    pub fn start(&mut self, agent: &AgentId) -> Result<()> {
        self.advance(StoryStatus::InProgress)?;
        self.assigned_agent_id = Some(agent.clone());
        if self.branch_name.is_none() {
            self.branch_name = Some(self.default_branch());
        }
        Ok(())
    }

    pub fn default_branch(&self) -> String {
        format!("story/{}", self.id.as_str().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_order_is_progression() {
        assert!(StoryStatus::Draft < StoryStatus::Planned);
        assert!(StoryStatus::InProgress < StoryStatus::Review);
        assert!(StoryStatus::PrSubmitted < StoryStatus::Merged);
    }

    #[test]
    fn test_status_roundtrip_str() {
        for status in StoryStatus::ALL {
            assert_eq!(status.as_str().parse::<StoryStatus>().unwrap(), status);
        }
        assert!("done".parse::<StoryStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&StoryStatus::PrSubmitted).unwrap();
        assert_eq!(json, "\"pr_submitted\"");
    }

    #[test]
    fn test_satisfies_dependency() {
        assert!(StoryStatus::Merged.satisfies_dependency());
        assert!(StoryStatus::InProgress.satisfies_dependency());
        assert!(!StoryStatus::Planned.satisfies_dependency());
        assert!(!StoryStatus::Review.satisfies_dependency());
        assert!(!StoryStatus::QaFailed.satisfies_dependency());
    }

    #[test]
    fn test_advance_forward_only() {
        let mut story = Story::new("S-1", "core", "Login");
        story.advance(StoryStatus::InProgress).unwrap();
        story.advance(StoryStatus::InProgress).unwrap();
        let err = story.advance(StoryStatus::Planned).unwrap_err();
        assert!(matches!(err, Error::InvalidStoryTransition { .. }));
        assert_eq!(story.status, StoryStatus::InProgress);
    }

    #[test]
    fn test_start_assigns_branch() {
        let mut story = Story::new("PAY-7", "payments", "Refunds");
        story.start(&AgentId::new("junior-1")).unwrap();
        assert_eq!(story.status, StoryStatus::InProgress);
        assert_eq!(story.assigned_agent_id, Some(AgentId::new("junior-1")));
        assert_eq!(story.branch_name.as_deref(), Some("story/pay-7"));
        assert!(!story.is_assignable());
    }

    #[test]
    fn test_validate_complexity_bounds() {
        assert!(Story::new("S", "t", "x").with_complexity(13).validate().is_ok());
        assert!(Story::new("S", "t", "x").with_complexity(0).validate().is_err());
        assert!(Story::new("S", "t", "x").with_complexity(14).validate().is_err());
    }

    #[test]
    fn test_validate_self_dependency() {
        let story = Story::new("S", "t", "x").depends_on("S");
        assert!(story.validate().is_err());
    }

    #[test]
    fn test_depends_on_dedupes() {
        let story = Story::new("B", "t", "x").depends_on("A").depends_on("A");
        assert_eq!(story.depends_on, vec![StoryId::from("A")]);
    }
}
