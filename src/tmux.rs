use std::process::Command;

use tracing::{debug, trace, warn};

use crate::{Error, Result};

/// Thin wrapper over the `tmux` binary. Every agent runs in its own session.
pub struct Tmux;

impl Tmux {
    pub fn create_session(name: &str, cwd: Option<&str>, cmd: &[String]) -> Result<()> {
        if cmd.is_empty() {
            return Err(Error::Validation("Command cannot be empty".to_string()));
        }

        let cmd_str = cmd
            .iter()
            .map(|s| shell_escape(s))
            .collect::<Vec<_>>()
            .join(" ");
        debug!(session = name, cmd = %cmd_str, "tmux new-session");
        let mut args = vec!["new-session", "-d", "-s", name];
        if let Some(dir) = cwd {
            args.extend(["-c", dir]);
        }
        args.push(&cmd_str);
        let output = Command::new("tmux").args(&args).output()?;

        if !output.status.success() {
            let err = format!(
                "Failed to create session '{}': {}",
                name,
                String::from_utf8_lossy(&output.stderr)
            );
            warn!(session = name, "tmux create_session failed");
            return Err(Error::Tmux(err));
        }
        Ok(())
    }

    pub fn kill_session(name: &str) -> Result<()> {
        debug!(session = name, "tmux kill-session");
        let output = Command::new("tmux")
            .args(["kill-session", "-t", name])
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("session not found") && !stderr.contains("can't find session") {
                return Err(Error::Tmux(format!(
                    "Failed to kill session '{}': {}",
                    name, stderr
                )));
            }
            debug!(session = name, "session already gone");
        }
        Ok(())
    }

    /// Capture only the last N lines of a pane, without escape sequences.
    pub fn capture_pane_tail(name: &str, lines: u16) -> Result<String> {
        // -S -N starts N lines above the visible bottom
        let start = format!("-{}", lines);
        let output = Command::new("tmux")
            .args(["capture-pane", "-t", name, "-p", "-J", "-S", &start])
            .output()?;
        if !output.status.success() {
            return Err(Error::Tmux(format!(
                "Failed to capture pane tail '{}': {}",
                name,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let content = String::from_utf8_lossy(&output.stdout).to_string();
        trace!(session = name, bytes = content.len(), "captured pane");
        Ok(content)
    }

    pub fn session_exists(name: &str) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", name])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Type `keys` literally without pressing Enter.
    pub fn send_keys(name: &str, keys: &str) -> Result<()> {
        debug!(session = name, keys, "tmux send-keys");
        let output = Command::new("tmux")
            .args(["send-keys", "-t", name, keys])
            .output()?;
        check_send(name, &output)
    }

    /// Type `text` literally into the input line without submitting it.
    pub fn type_literal(name: &str, text: &str) -> Result<()> {
        debug!(session = name, len = text.len(), "tmux send-keys -l");
        // -l keeps words like "Enter" or "C-c" inside the text literal
        let output = Command::new("tmux")
            .args(["send-keys", "-t", name, "-l", text])
            .output()?;
        check_send(name, &output)
    }

    /// Type `text` literally, then submit it with Enter.
    pub fn send_keys_enter(name: &str, text: &str) -> Result<()> {
        Self::type_literal(name, text)?;
        let output = Command::new("tmux")
            .args(["send-keys", "-t", name, "Enter"])
            .output()?;
        check_send(name, &output)
    }

    pub fn list_sessions() -> Result<Vec<String>> {
        let output = Command::new("tmux")
            .args(["list-sessions", "-F", "#{session_name}"])
            .output()?;
        if !output.status.success() {
            // No server running means no sessions
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(String::from)
            .collect())
    }

    pub fn list_hive_sessions(prefix: &str) -> Result<Vec<String>> {
        let sessions: Vec<String> = Self::list_sessions()?
            .into_iter()
            .filter(|s| s.starts_with(prefix))
            .collect();
        trace!(count = sessions.len(), "listed hive sessions");
        Ok(sessions)
    }

    pub fn is_available() -> bool {
        Command::new("tmux")
            .arg("-V")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// `<prefix><tier>-<team>-<n>`, sanitized for tmux targets.
    pub fn session_name(prefix: &str, tier: &str, team: &str, n: usize) -> String {
        format!(
            "{}{}-{}-{}",
            prefix,
            sanitize_session_name(tier),
            sanitize_session_name(team),
            n
        )
    }
}

fn check_send(name: &str, output: &std::process::Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(Error::Tmux(format!(
        "Failed to send keys to '{}': {}",
        name,
        String::from_utf8_lossy(&output.stderr)
    )))
}

fn shell_escape(s: &str) -> String {
    if s.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '/')
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

fn sanitize_session_name(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("claude"), "claude");
        assert_eq!(shell_escape("/usr/bin/codex"), "/usr/bin/codex");
        assert_eq!(shell_escape("it's"), "'it'\"'\"'s'");
    }

    #[test]
    fn test_sanitize_session_name() {
        assert_eq!(sanitize_session_name("team alpha"), "team_alpha");
        assert_eq!(sanitize_session_name("a.b:c"), "a_b_c");
    }

    #[test]
    fn test_session_name() {
        assert_eq!(
            Tmux::session_name("hive-", "senior", "payments", 2),
            "hive-senior-payments-2"
        );
    }

    #[test]
    fn test_create_session_rejects_empty_command() {
        assert!(matches!(
            Tmux::create_session("x", None, &[]),
            Err(Error::Validation(_))
        ));
    }
}
