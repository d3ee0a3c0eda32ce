//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scripted terminal sessions that record what the manager sends
//! - A counting completion judge with a canned reply
//! - A fleet that registers agents without starting processes
//! - Seeded stores and common screens

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use hive::config::Config;
use hive::core::{Agent, AgentTier, Story};
use hive::orchestration::{CompletionJudge, Fleet, Manager, SessionIo};
use hive::store::Database;
use hive::{Error, Result};

pub const IDLE: &str = "⏺ Updated the handler.\n\n│ > │\n  ? for shortcuts";

pub const WORKING: &str = "⏺ Running cargo test\n\n✻ Pondering… (12s · esc to interrupt)\n│ > │";

pub const QUESTION: &str =
    "⏺ There are two ways to do this.\n  Should I keep the legacy endpoint for old clients?\n\n│ > │";

pub const INTERRUPTED: &str = "⏺ Editing src/api.rs\n  ⎿  Interrupted by user\n\n│ > │";

pub const RATE_LIMITED: &str = "⏺ Running tests\n  ⎿  API Error: 429 rate_limit_error\n\n│ > │";

pub const FINISHED: &str = "⏺ Implementation complete.

**Testing:**
All 12 tests passing.

Next steps:
1. Submit the PR
2. Request review

│ > │
  ? for shortcuts";

/// Terminal sessions driven by the test.
#[derive(Default)]
pub struct ScriptedSessions {
    screens: Mutex<HashMap<String, String>>,
    failing_capture: Mutex<HashSet<String>>,
    failing_send: Mutex<HashSet<String>>,
    echoing: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(String, String)>>,
    typed: Mutex<Vec<(String, String)>>,
    killed: Mutex<Vec<String>>,
}

impl ScriptedSessions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn show(&self, session: &str, screen: &str) {
        self.screens
            .lock()
            .insert(session.to_string(), screen.to_string());
    }

    pub fn fail_capture(&self, session: &str) {
        self.failing_capture.lock().insert(session.to_string());
    }

    pub fn fail_send(&self, session: &str) {
        self.failing_send.lock().insert(session.to_string());
    }

    pub fn heal_send(&self, session: &str) {
        self.failing_send.lock().remove(session);
    }

    /// Make text sent or typed into `session` appear on its screen.
    pub fn echo(&self, session: &str) {
        self.echoing.lock().insert(session.to_string());
    }

    fn show_input(&self, session: &str, text: &str) {
        if !self.echoing.lock().contains(session) {
            return;
        }
        if let Some(screen) = self.screens.lock().get_mut(session) {
            screen.push('\n');
            screen.push_str(text);
        }
    }

    /// Text sent to `session`, oldest first.
    pub fn sent_to(&self, session: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(s, _)| s == session)
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Text typed into `session` without submitting, oldest first.
    pub fn typed_into(&self, session: &str) -> Vec<String> {
        self.typed
            .lock()
            .iter()
            .filter(|(s, _)| s == session)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().clone()
    }
}

#[async_trait]
impl SessionIo for ScriptedSessions {
    async fn capture(&self, session: &str, _lines: u16) -> Result<String> {
        if self.failing_capture.lock().contains(session) {
            return Err(Error::Tmux(format!("can't find pane: {}", session)));
        }
        Ok(self.screens.lock().get(session).cloned().unwrap_or_default())
    }

    async fn send_text(&self, session: &str, text: &str) -> Result<()> {
        if self.failing_send.lock().contains(session) {
            return Err(Error::Tmux(format!("send to {} failed", session)));
        }
        self.sent.lock().push((session.to_string(), text.to_string()));
        self.show_input(session, text);
        Ok(())
    }

    async fn type_text(&self, session: &str, text: &str) -> Result<()> {
        if self.failing_send.lock().contains(session) {
            return Err(Error::Tmux(format!("type into {} failed", session)));
        }
        self.typed.lock().push((session.to_string(), text.to_string()));
        self.show_input(session, text);
        Ok(())
    }

    async fn send_key(&self, session: &str, key: &str) -> Result<()> {
        self.send_text(session, &format!("<{}>", key)).await
    }

    async fn kill(&self, session: &str) -> Result<()> {
        self.killed.lock().push(session.to_string());
        self.screens.lock().remove(session);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut live: Vec<String> = self.screens.lock().keys().cloned().collect();
        live.sort();
        Ok(live)
    }
}

/// Judge with a fixed reply that counts its calls.
pub struct CountingJudge {
    reply: std::result::Result<String, String>,
    calls: AtomicUsize,
}

impl CountingJudge {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            reply: Err("credentials missing".to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionJudge for CountingJudge {
    async fn judge(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone().map_err(Error::ClassifierUnavailable)
    }
}

/// Fleet that hands back agents without starting anything.
#[derive(Default)]
pub struct RecordingFleet {
    spawned: Mutex<Vec<String>>,
}

impl RecordingFleet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().clone()
    }
}

#[async_trait]
impl Fleet for RecordingFleet {
    async fn spawn_agent(&self, tier: AgentTier, team: &str) -> Result<Agent> {
        let mut spawned = self.spawned.lock();
        let session = format!("hive-{}-{}-{}", tier.as_str(), team, spawned.len() + 1);
        spawned.push(session.clone());
        Ok(Agent::new(session.clone(), tier, team, &session))
    }
}

/// Config with every cooldown at zero so consecutive ticks act immediately.
pub fn eager_config() -> Config {
    let mut config = Config::default();
    config.escalation.recovery_cooldown_secs = 0;
    config.escalation.rate_limit_base_secs = 0;
    config.manager.nudge_cooldown_secs = 0;
    config.manager.stuck_nudge_after_secs = 0;
    config
}

pub fn manager_with(
    config: Config,
    io: Arc<ScriptedSessions>,
    judge: Option<Arc<CountingJudge>>,
) -> Manager {
    let judge = judge.map(|j| j as Arc<dyn CompletionJudge>);
    Manager::new(config, io, judge).expect("manager")
}

/// An agent at `session` already working on `story`.
pub fn working_pair(
    db: &Database,
    session: &str,
    tier: AgentTier,
    story: Story,
) -> (Agent, Story) {
    let mut story = story;
    let mut agent = Agent::new(session, tier, &story.team, session);
    story.start(&agent.id).expect("start story");
    agent.assign(&story.id).expect("assign agent");
    db.scoped(|store| {
        store.upsert_story(story.clone())?;
        store.upsert_agent(agent.clone())
    })
    .expect("seed pair");
    (agent, story)
}

pub fn idle_agent(db: &Database, session: &str, tier: AgentTier, team: &str) -> Agent {
    let agent = Agent::new(session, tier, team, session);
    db.scoped(|store| store.upsert_agent(agent.clone()))
        .expect("seed agent");
    agent
}

pub fn seed_stories(db: &Database, stories: Vec<Story>) {
    db.scoped(|store| {
        for story in stories {
            store.upsert_story(story)?;
        }
        Ok(())
    })
    .expect("seed stories");
}
