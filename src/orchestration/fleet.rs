//! Spawning new agents for the scaling check.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::{ManagerConfig, SchedulerConfig};
use crate::core::{Agent, AgentTier, CliTool};
use crate::tmux::Tmux;
use crate::util::blocking_with_timeout;
use crate::{Error, Result};

/// Upper bound on session-name probing for one tier and team.
const MAX_SESSION_INDEX: usize = 256;

#[async_trait]
pub trait Fleet: Send + Sync {
    /// Start an agent process and return its (idle, unregistered) record.
    async fn spawn_agent(&self, tier: AgentTier, team: &str) -> Result<Agent>;
}

/// Agents as tmux sessions running the configured CLI.
#[derive(Debug, Clone)]
pub struct TmuxFleet {
    prefix: String,
    command: Vec<String>,
    cwd: Option<String>,
    timeout: Duration,
}

impl TmuxFleet {
    pub fn new(prefix: &str, command: &str, timeout: Duration) -> Self {
        Self {
            prefix: prefix.to_string(),
            command: command.split_whitespace().map(String::from).collect(),
            cwd: None,
            timeout,
        }
    }

    pub fn from_config(manager: &ManagerConfig, scheduler: &SchedulerConfig) -> Self {
        Self::new(
            &manager.session_prefix,
            &scheduler.agent_command,
            manager.send_timeout(),
        )
    }

    pub fn with_cwd(mut self, cwd: &str) -> Self {
        self.cwd = Some(cwd.to_string());
        self
    }

    pub fn cli(&self) -> CliTool {
        CliTool::from_command(&self.command.join(" "))
    }
}

#[async_trait]
impl Fleet for TmuxFleet {
    async fn spawn_agent(&self, tier: AgentTier, team: &str) -> Result<Agent> {
        if self.command.is_empty() {
            return Err(Error::Fleet("agent_command is empty".to_string()));
        }
        let prefix = self.prefix.clone();
        let command = self.command.clone();
        let cwd = self.cwd.clone();
        let team_name = team.to_string();
        let tier_name = tier.as_str();

        let session = blocking_with_timeout(self.timeout, move || {
            let name = (1..=MAX_SESSION_INDEX)
                .map(|n| Tmux::session_name(&prefix, tier_name, &team_name, n))
                .find(|name| !Tmux::session_exists(name))
                .ok_or_else(|| {
                    Error::Fleet(format!("no free session name for {} {}", tier_name, team_name))
                })?;
            Tmux::create_session(&name, cwd.as_deref(), &command)?;
            Ok(name)
        })
        .await?;

        info!(session = %session, tier = %tier, team, "spawned agent");
        Ok(Agent::new(session.clone(), tier, team, &session).with_cli(self.cli()))
    }
}
