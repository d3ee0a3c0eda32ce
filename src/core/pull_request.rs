use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::story::StoryId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    Queued,
    Reviewing,
    Merged,
    Rejected,
}

impl PrStatus {
    /// Still occupying a merge-queue slot.
    pub fn is_pending(&self) -> bool {
        matches!(self, PrStatus::Queued | PrStatus::Reviewing)
    }
}

/// A submitted branch waiting in a team's merge queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequest {
    pub id: String,
    pub story_id: StoryId,
    pub team: String,
    pub branch: String,
    pub status: PrStatus,
    pub created_at: DateTime<Utc>,
}

impl PullRequest {
    pub fn new(id: &str, story_id: StoryId, team: &str, branch: &str) -> Self {
        Self {
            id: id.to_string(),
            story_id,
            team: team.to_string(),
            branch: branch.to_string(),
            status: PrStatus::Queued,
            created_at: Utc::now(),
        }
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn with_status(mut self, status: PrStatus) -> Self {
        self.status = status;
        self
    }
}
