//! Persistence collaborator for stories, agents, escalations and pull requests.
//!
//! The manager never holds the store across an await point. Every unit of
//! work goes through [`Database::scoped`], which takes the lock, opens a
//! scope on the backing store, runs synchronous logic, commits and releases.

mod json;
mod memory;

pub use json::JsonStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::{
    Agent, AgentId, Escalation, EscalationId, PullRequest, Story, StoryId, StoryStatus,
};
use crate::{Error, Result};

pub const SNAPSHOT_VERSION: u32 = 1;

/// CRUD over the persisted vocabularies.
pub trait Store: Send {
    /// Open a unit of work. File-backed stores reload here.
    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    /// Persist everything written since `begin`.
    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Discard everything written since `begin`.
    fn rollback(&mut self) {}

    fn stories(&self) -> Result<Vec<Story>>;
    fn story(&self, id: &StoryId) -> Result<Option<Story>>;
    fn upsert_story(&mut self, story: Story) -> Result<()>;

    fn agents(&self) -> Result<Vec<Agent>>;
    fn agent(&self, id: &AgentId) -> Result<Option<Agent>>;
    fn upsert_agent(&mut self, agent: Agent) -> Result<()>;

    fn escalations(&self) -> Result<Vec<Escalation>>;
    fn insert_escalation(&mut self, escalation: Escalation) -> Result<()>;
    fn update_escalation(&mut self, escalation: Escalation) -> Result<()>;

    fn pull_requests(&self) -> Result<Vec<PullRequest>>;
    fn upsert_pull_request(&mut self, pr: PullRequest) -> Result<()>;

    fn agent_by_session(&self, session: &str) -> Result<Option<Agent>> {
        Ok(self
            .agents()?
            .into_iter()
            .find(|a| a.tmux_session == session))
    }

    fn stories_with_status(&self, status: StoryStatus) -> Result<Vec<Story>> {
        Ok(self
            .stories()?
            .into_iter()
            .filter(|s| s.status == status)
            .collect())
    }

    /// Pending or acknowledged escalations raised from `session`.
    fn active_escalations_for(&self, session: &str) -> Result<Vec<Escalation>> {
        Ok(self
            .escalations()?
            .into_iter()
            .filter(|e| e.from_agent == session && e.is_active())
            .collect())
    }

    /// Whether `session` raised an escalation at or after `since`.
    fn has_escalation_since(&self, session: &str, since: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .escalations()?
            .iter()
            .any(|e| e.from_agent == session && e.created_at >= since))
    }

    fn escalation(&self, id: &EscalationId) -> Result<Option<Escalation>> {
        Ok(self.escalations()?.into_iter().find(|e| &e.id == id))
    }

    fn pull_requests_for_story(&self, story: &StoryId) -> Result<Vec<PullRequest>> {
        Ok(self
            .pull_requests()?
            .into_iter()
            .filter(|pr| &pr.story_id == story)
            .collect())
    }
}

/// Serializable image of the whole store, shared by the memory and JSON stores.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub stories: Vec<Story>,
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub escalations: Vec<Escalation>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequest>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            ..Default::default()
        }
    }

    fn upsert_story(&mut self, story: Story) -> Result<()> {
        story.validate()?;
        match self.stories.iter_mut().find(|s| s.id == story.id) {
            Some(existing) => *existing = story,
            None => self.stories.push(story),
        }
        Ok(())
    }

    fn upsert_agent(&mut self, agent: Agent) {
        match self.agents.iter_mut().find(|a| a.id == agent.id) {
            Some(existing) => *existing = agent,
            None => self.agents.push(agent),
        }
    }

    fn insert_escalation(&mut self, escalation: Escalation) -> Result<()> {
        if self.escalations.iter().any(|e| e.id == escalation.id) {
            return Err(Error::Validation(format!(
                "escalation {} already exists",
                escalation.id
            )));
        }
        self.escalations.push(escalation);
        Ok(())
    }

    fn update_escalation(&mut self, escalation: Escalation) -> Result<()> {
        let existing = self
            .escalations
            .iter_mut()
            .find(|e| e.id == escalation.id)
            .ok_or_else(|| Error::EscalationNotFound(escalation.id.to_string()))?;
        *existing = escalation;
        Ok(())
    }

    fn upsert_pull_request(&mut self, pr: PullRequest) {
        match self.pull_requests.iter_mut().find(|p| p.id == pr.id) {
            Some(existing) => *existing = pr,
            None => self.pull_requests.push(pr),
        }
    }
}

/// Cloneable handle to a store behind a short-lived lock.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Mutex<Box<dyn Store>>>,
}

impl Database {
    pub fn new(store: impl Store + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Run `f` as one unit of work: lock, begin, run, commit (or roll back), release.
    pub fn scoped<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Store) -> Result<T>,
    {
        let mut guard = self.inner.lock();
        guard.begin()?;
        match f(guard.as_mut()) {
            Ok(value) => {
                guard.commit()?;
                Ok(value)
            }
            Err(err) => {
                guard.rollback();
                Err(err)
            }
        }
    }

    /// Read-only convenience over [`Database::scoped`].
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Store) -> Result<T>,
    {
        self.scoped(|store| f(store))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
