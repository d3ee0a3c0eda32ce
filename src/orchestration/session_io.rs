//! Terminal collaborator seen by the control loop.
//!
//! The loop talks to sessions only through [`SessionIo`], so tests can script
//! screens and record what was sent. [`TmuxSessions`] is the real
//! implementation; every call runs on the blocking pool under a timeout.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::ManagerConfig;
use crate::tmux::Tmux;
use crate::util::blocking_with_timeout;
use crate::Result;

#[async_trait]
pub trait SessionIo: Send + Sync {
    /// Last `lines` lines of the session's screen.
    async fn capture(&self, session: &str, lines: u16) -> Result<String>;
    /// Type `text` and submit it.
    async fn send_text(&self, session: &str, text: &str) -> Result<()>;
    /// Type `text` into the input line and leave it unsubmitted.
    async fn type_text(&self, session: &str, text: &str) -> Result<()>;
    /// Send one named key such as `Enter` or `Escape`.
    async fn send_key(&self, session: &str, key: &str) -> Result<()>;
    async fn kill(&self, session: &str) -> Result<()>;
    /// Names of live agent sessions.
    async fn list(&self) -> Result<Vec<String>>;
}

/// Something the loop decided to do to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    SendText(String),
    /// Left in the input line for whoever attaches next.
    TypeText(String),
    SendKey(String),
    Kill,
}

impl SessionAction {
    pub async fn apply(&self, io: &dyn SessionIo, session: &str) -> Result<()> {
        match self {
            SessionAction::SendText(text) => io.send_text(session, text).await,
            SessionAction::TypeText(text) => io.type_text(session, text).await,
            SessionAction::SendKey(key) => io.send_key(session, key).await,
            SessionAction::Kill => io.kill(session).await,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            SessionAction::SendText(_) => "send text",
            SessionAction::TypeText(_) => "type text",
            SessionAction::SendKey(_) => "send key",
            SessionAction::Kill => "kill",
        }
    }
}

/// [`SessionIo`] over the tmux binary.
#[derive(Debug, Clone)]
pub struct TmuxSessions {
    prefix: String,
    capture_timeout: Duration,
    send_timeout: Duration,
}

impl TmuxSessions {
    pub fn new(prefix: &str, capture_timeout: Duration, send_timeout: Duration) -> Self {
        Self {
            prefix: prefix.to_string(),
            capture_timeout,
            send_timeout,
        }
    }

    pub fn from_config(config: &ManagerConfig) -> Self {
        Self::new(
            &config.session_prefix,
            config.capture_timeout(),
            config.send_timeout(),
        )
    }
}

#[async_trait]
impl SessionIo for TmuxSessions {
    async fn capture(&self, session: &str, lines: u16) -> Result<String> {
        let name = session.to_string();
        blocking_with_timeout(self.capture_timeout, move || {
            Tmux::capture_pane_tail(&name, lines)
        })
        .await
    }

    async fn send_text(&self, session: &str, text: &str) -> Result<()> {
        let name = session.to_string();
        let text = text.to_string();
        blocking_with_timeout(self.send_timeout, move || Tmux::send_keys_enter(&name, &text)).await
    }

    async fn type_text(&self, session: &str, text: &str) -> Result<()> {
        let name = session.to_string();
        let text = text.to_string();
        blocking_with_timeout(self.send_timeout, move || Tmux::type_literal(&name, &text)).await
    }

    async fn send_key(&self, session: &str, key: &str) -> Result<()> {
        let name = session.to_string();
        let key = key.to_string();
        blocking_with_timeout(self.send_timeout, move || Tmux::send_keys(&name, &key)).await
    }

    async fn kill(&self, session: &str) -> Result<()> {
        let name = session.to_string();
        let result = blocking_with_timeout(self.send_timeout, move || Tmux::kill_session(&name)).await;
        match &result {
            Ok(()) => debug!(session, "session killed"),
            Err(e) => warn!(session, error = %e, "kill failed"),
        }
        result
    }

    async fn list(&self) -> Result<Vec<String>> {
        let prefix = self.prefix.clone();
        blocking_with_timeout(self.capture_timeout, move || Tmux::list_hive_sessions(&prefix)).await
    }
}
