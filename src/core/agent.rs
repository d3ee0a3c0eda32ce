//! Agent data model: one AI CLI process living in one tmux session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::story::StoryId;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role tier. Routing only ever targets junior, intermediate or senior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTier {
    TechLead,
    Senior,
    Intermediate,
    Junior,
    Qa,
}

impl AgentTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentTier::TechLead => "tech_lead",
            AgentTier::Senior => "senior",
            AgentTier::Intermediate => "intermediate",
            AgentTier::Junior => "junior",
            AgentTier::Qa => "qa",
        }
    }
}

impl std::fmt::Display for AgentTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Blocked,
    Terminated,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Blocked => "blocked",
            AgentStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// The AI CLI running inside a session. Selects the indicator table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CliTool {
    Claude,
    Codex,
    Gemini,
}

impl Default for CliTool {
    fn default() -> Self {
        Self::Claude
    }
}

impl CliTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            CliTool::Claude => "claude",
            CliTool::Codex => "codex",
            CliTool::Gemini => "gemini",
        }
    }

    /// Guess the tool from an agent command line such as `/usr/bin/codex --full-auto`.
    pub fn from_command(cmd: &str) -> Self {
        let binary = cmd.split_whitespace().next().unwrap_or("");
        if binary.contains("codex") {
            CliTool::Codex
        } else if binary.contains("gemini") {
            CliTool::Gemini
        } else {
            CliTool::Claude
        }
    }
}

impl std::fmt::Display for CliTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CliTool {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(CliTool::Claude),
            "codex" => Ok(CliTool::Codex),
            "gemini" => Ok(CliTool::Gemini),
            other => Err(Error::Validation(format!("unknown cli tool: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: AgentId,
    pub tier: AgentTier,
    pub team: String,
    #[serde(default)]
    pub cli: CliTool,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub current_story_id: Option<StoryId>,
    pub tmux_session: String,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(id: impl Into<String>, tier: AgentTier, team: &str, tmux_session: &str) -> Self {
        Self {
            id: AgentId::new(id),
            tier,
            team: team.to_string(),
            cli: CliTool::Claude,
            status: AgentStatus::Idle,
            current_story_id: None,
            tmux_session: tmux_session.to_string(),
            last_seen: None,
        }
    }

    pub fn with_cli(mut self, cli: CliTool) -> Self {
        self.cli = cli;
        self
    }

    pub fn is_available(&self) -> bool {
        self.status == AgentStatus::Idle && self.current_story_id.is_none()
    }

    pub fn is_live(&self) -> bool {
        self.status != AgentStatus::Terminated
    }

    /// Give the agent its single story.
    pub fn assign(&mut self, story: &StoryId) -> Result<()> {
        if let Some(current) = &self.current_story_id {
            if current != story {
                return Err(Error::Validation(format!(
                    "agent {} already holds story {}",
                    self.id, current
                )));
            }
        }
        self.current_story_id = Some(story.clone());
        self.status = AgentStatus::Working;
        Ok(())
    }

    pub fn release(&mut self) {
        self.current_story_id = None;
        if self.status != AgentStatus::Terminated {
            self.status = AgentStatus::Idle;
        }
    }

    pub fn heartbeat(&mut self, at: DateTime<Utc>) {
        self.last_seen = Some(at);
    }

    pub fn terminate(&mut self) {
        self.status = AgentStatus::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_agent_is_available() {
        let agent = Agent::new("junior-1", AgentTier::Junior, "core", "hive-junior-core-1");
        assert!(agent.is_available());
        assert!(agent.is_live());
        assert_eq!(agent.cli, CliTool::Claude);
    }

    #[test]
    fn test_assign_single_story() {
        let mut agent = Agent::new("a", AgentTier::Senior, "core", "s");
        agent.assign(&StoryId::from("S-1")).unwrap();
        assert_eq!(agent.status, AgentStatus::Working);
        assert!(agent.assign(&StoryId::from("S-1")).is_ok());
        assert!(agent.assign(&StoryId::from("S-2")).is_err());
        agent.release();
        assert!(agent.is_available());
    }

    #[test]
    fn test_release_keeps_terminated() {
        let mut agent = Agent::new("a", AgentTier::Senior, "core", "s");
        agent.assign(&StoryId::from("S-1")).unwrap();
        agent.terminate();
        agent.release();
        assert_eq!(agent.status, AgentStatus::Terminated);
        assert!(agent.current_story_id.is_none());
    }

    #[test]
    fn test_cli_from_command() {
        assert_eq!(CliTool::from_command("claude --dangerously-skip-permissions"), CliTool::Claude);
        assert_eq!(CliTool::from_command("/opt/bin/codex --full-auto"), CliTool::Codex);
        assert_eq!(CliTool::from_command("gemini -y"), CliTool::Gemini);
        assert_eq!("Codex".parse::<CliTool>().unwrap(), CliTool::Codex);
        assert!("aider".parse::<CliTool>().is_err());
    }

    #[test]
    fn test_tier_serialization() {
        let json = serde_json::to_string(&AgentTier::TechLead).unwrap();
        assert_eq!(json, "\"tech_lead\"");
    }
}
