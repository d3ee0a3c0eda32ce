//! External completion judge.
//!
//! The judge is any collaborator that takes a structured prompt and answers
//! with JSON `{done, confidence, reason}`. [`ClaudeJudge`] runs an AI CLI in
//! headless mode (`-p` with `--output-format json`) and unwraps the CLI's
//! result envelope; [`parse_judge_reply`] then pulls the verdict out of the
//! model's text, which may be wrapped in prose or code fences.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::CompletionConfig;
use crate::{Error, Result};

/// Raw verdict returned by a judge.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeVerdict {
    pub done: bool,
    pub confidence: f32,
    pub reason: String,
}

/// Pluggable text classifier used for completion candidates.
#[async_trait]
pub trait CompletionJudge: Send + Sync {
    /// Send `prompt` and return the reply text.
    async fn judge(&self, prompt: &str) -> Result<String>;
}

/// Internal struct for the CLI's JSON envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    subtype: Option<String>,
    #[serde(default)]
    is_error: bool,
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    done: bool,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    reason: Option<String>,
}

/// Headless AI CLI judge.
#[derive(Debug, Clone)]
pub struct ClaudeJudge {
    command: String,
    timeout: Duration,
}

impl ClaudeJudge {
    pub fn new(command: &str, timeout: Duration) -> Self {
        Self {
            command: command.to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &CompletionConfig) -> Self {
        Self::new(&config.classifier_command, config.classifier_timeout())
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Unwrap the CLI envelope into the model's text.
    pub fn parse_envelope(stdout: &str) -> Result<String> {
        let env: Envelope = serde_json::from_str(stdout.trim())?;
        if env.is_error || env.subtype.as_deref().is_some_and(|s| s != "success") {
            let message = env
                .error
                .or(env.result)
                .unwrap_or_else(|| "classifier reported an error".to_string());
            return Err(Error::ClassifierUnavailable(message));
        }
        env.result
            .ok_or_else(|| Error::ClassifierUnavailable("empty classifier result".to_string()))
    }
}

#[async_trait]
impl CompletionJudge for ClaudeJudge {
    async fn judge(&self, prompt: &str) -> Result<String> {
        let binary = which::which(&self.command)
            .map_err(|_| Error::ClassifierBinaryNotFound(self.command.clone()))?;
        debug!(binary = %binary.display(), "invoking completion judge");

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&binary)
                .arg("-p")
                .arg(prompt)
                .arg("--output-format")
                .arg("json")
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::Timeout(self.timeout))?
        .map_err(|e| Error::ClassifierUnavailable(format!("spawn failed: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        trace!(bytes = stdout.len(), "judge replied");
        match Self::parse_envelope(&stdout) {
            Ok(text) => Ok(text),
            Err(_) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(Error::ClassifierUnavailable(if stderr.trim().is_empty() {
                    format!(
                        "judge exited with code {}",
                        output.status.code().unwrap_or(-1)
                    )
                } else {
                    stderr.trim().to_string()
                }))
            }
            Err(e) => Err(e),
        }
    }
}

/// Prompt asking the judge whether `output` is finished work.
pub fn build_judge_prompt(story: Option<&str>, output: &str) -> String {
    let story_line = story
        .map(|s| format!("The agent is working on story {}.\n", s))
        .unwrap_or_default();
    format!(
        "You review terminal output from an AI coding agent.\n{}\
Decide whether the output shows the work is finished and ready to submit as a pull request.\n\
Answer with a single JSON object and nothing else:\n\
{{\"done\": true|false, \"confidence\": 0.0-1.0, \"reason\": \"one sentence\"}}\n\n\
--- OUTPUT ---\n{}\n--- END ---",
        story_line, output
    )
}

/// Extract the first JSON object from `reply` and read the verdict from it.
pub fn parse_judge_reply(reply: &str) -> Result<JudgeVerdict> {
    let object = first_json_object(reply)
        .ok_or_else(|| Error::Validation("no JSON object in judge reply".to_string()))?;
    let raw: RawVerdict = serde_json::from_str(object)?;
    Ok(JudgeVerdict {
        done: raw.done,
        confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        reason: raw.reason.unwrap_or_default(),
    })
}

/// Balanced `{...}` span, skipping braces inside string literals.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
