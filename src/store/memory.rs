use crate::core::{Agent, AgentId, Escalation, PullRequest, Story, StoryId};
use crate::store::{Snapshot, Store};
use crate::Result;

/// Process-local store. Rollback restores the image taken at `begin`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Snapshot,
    checkpoint: Option<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Snapshot::new(),
            checkpoint: None,
        }
    }

    pub fn from_snapshot(data: Snapshot) -> Self {
        Self {
            data,
            checkpoint: None,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.data
    }
}

impl Store for MemoryStore {
    fn begin(&mut self) -> Result<()> {
        self.checkpoint = Some(self.data.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.checkpoint = None;
        Ok(())
    }

    fn rollback(&mut self) {
        if let Some(checkpoint) = self.checkpoint.take() {
            self.data = checkpoint;
        }
    }

    fn stories(&self) -> Result<Vec<Story>> {
        Ok(self.data.stories.clone())
    }

    fn story(&self, id: &StoryId) -> Result<Option<Story>> {
        Ok(self.data.stories.iter().find(|s| &s.id == id).cloned())
    }

    fn upsert_story(&mut self, story: Story) -> Result<()> {
        self.data.upsert_story(story)
    }

    fn agents(&self) -> Result<Vec<Agent>> {
        Ok(self.data.agents.clone())
    }

    fn agent(&self, id: &AgentId) -> Result<Option<Agent>> {
        Ok(self.data.agents.iter().find(|a| &a.id == id).cloned())
    }

    fn upsert_agent(&mut self, agent: Agent) -> Result<()> {
        self.data.upsert_agent(agent);
        Ok(())
    }

    fn escalations(&self) -> Result<Vec<Escalation>> {
        Ok(self.data.escalations.clone())
    }

    fn insert_escalation(&mut self, escalation: Escalation) -> Result<()> {
        self.data.insert_escalation(escalation)
    }

    fn update_escalation(&mut self, escalation: Escalation) -> Result<()> {
        self.data.update_escalation(escalation)
    }

    fn pull_requests(&self) -> Result<Vec<PullRequest>> {
        Ok(self.data.pull_requests.clone())
    }

    fn upsert_pull_request(&mut self, pr: PullRequest) -> Result<()> {
        self.data.upsert_pull_request(pr);
        Ok(())
    }
}
