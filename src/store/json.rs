//! JSON-file store.
//!
//! Each unit of work reloads the file so writes from another manager process
//! are observed, and commits with temp-file + rename after backing up the
//! previous image to `<file>.json.bak`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::Config;
use crate::core::{Agent, AgentId, Escalation, PullRequest, Story, StoryId};
use crate::store::{Snapshot, Store, SNAPSHOT_VERSION};
use crate::{Error, Result};

#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    data: Snapshot,
    dirty: bool,
}

impl JsonStore {
    /// Open the store at `path`, creating an empty image if the file is missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = Self::load(&path)?;
        Ok(Self {
            path,
            data,
            dirty: false,
        })
    }

    /// Open the default store at `~/.hive/hive.json`.
    pub fn open_default() -> Result<Self> {
        Self::open(Config::store_path()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<Snapshot> {
        if !path.exists() {
            debug!(path = %path.display(), "store file not found, starting empty");
            return Ok(Snapshot::new());
        }
        let contents = fs::read_to_string(path)?;
        let data: Snapshot = serde_json::from_str(&contents)?;
        if data.version > SNAPSHOT_VERSION {
            return Err(Error::Validation(format!(
                "store version {} is newer than supported {}",
                data.version, SNAPSHOT_VERSION
            )));
        }
        Ok(data)
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        if self.path.exists() {
            let backup = self.path.with_extension("json.bak");
            if let Err(e) = fs::copy(&self.path, &backup) {
                warn!(error = %e, "could not back up store file");
            }
        }
        let temp = self.path.with_extension("json.tmp");
        let mut image = self.data.clone();
        image.version = SNAPSHOT_VERSION;
        fs::write(&temp, serde_json::to_string_pretty(&image)?)?;
        fs::rename(&temp, &self.path)?;
        debug!(path = %self.path.display(), "store saved");
        Ok(())
    }

    fn touch(&mut self) {
        self.dirty = true;
    }
}

impl Store for JsonStore {
    fn begin(&mut self) -> Result<()> {
        self.data = Self::load(&self.path)?;
        self.dirty = false;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.dirty {
            self.save()?;
            self.dirty = false;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        match Self::load(&self.path) {
            Ok(data) => self.data = data,
            Err(e) => warn!(error = %e, "rollback reload failed"),
        }
        self.dirty = false;
    }

    fn stories(&self) -> Result<Vec<Story>> {
        Ok(self.data.stories.clone())
    }

    fn story(&self, id: &StoryId) -> Result<Option<Story>> {
        Ok(self.data.stories.iter().find(|s| &s.id == id).cloned())
    }

    fn upsert_story(&mut self, story: Story) -> Result<()> {
        self.data.upsert_story(story)?;
        self.touch();
        Ok(())
    }

    fn agents(&self) -> Result<Vec<Agent>> {
        Ok(self.data.agents.clone())
    }

    fn agent(&self, id: &AgentId) -> Result<Option<Agent>> {
        Ok(self.data.agents.iter().find(|a| &a.id == id).cloned())
    }

    fn upsert_agent(&mut self, agent: Agent) -> Result<()> {
        self.data.upsert_agent(agent);
        self.touch();
        Ok(())
    }

    fn escalations(&self) -> Result<Vec<Escalation>> {
        Ok(self.data.escalations.clone())
    }

    fn insert_escalation(&mut self, escalation: Escalation) -> Result<()> {
        self.data.insert_escalation(escalation)?;
        self.touch();
        Ok(())
    }

    fn update_escalation(&mut self, escalation: Escalation) -> Result<()> {
        self.data.update_escalation(escalation)?;
        self.touch();
        Ok(())
    }

    fn pull_requests(&self) -> Result<Vec<PullRequest>> {
        Ok(self.data.pull_requests.clone())
    }

    fn upsert_pull_request(&mut self, pr: PullRequest) -> Result<()> {
        self.data.upsert_pull_request(pr);
        self.touch();
        Ok(())
    }
}
