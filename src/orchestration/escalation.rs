//! Recovery and escalation decisions for one session per tick.
//!
//! The controller runs synchronously inside a [`Database::scoped`] unit of
//! work: it reads and writes escalation rows, updates the session's
//! [`AgentStateTracking`] and returns the [`SessionAction`]s the caller
//! should perform once the store lock is released. Attempt counters and
//! timestamps advance when an action is decided, not when it is delivered,
//! so a failing send cannot turn into a tight retry loop.
//!
//! Order of precedence on each check:
//!
//! 1. rate limited: exponential backoff, then a "sleep and resume" message
//! 2. interrupted: `continue`, then a full recovery prompt, then kill
//! 3. needs a human: one escalation per lookback window, with an action hint
//! 4. a recognized non-waiting state: auto-resolve the session's active
//!    escalations. A fresh unknown screen does not count as resuming.
//!
//! [`Database::scoped`]: crate::store::Database::scoped
//! [`AgentStateTracking`]: crate::orchestration::AgentStateTracking

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::EscalationConfig;
use crate::core::{Escalation, Story};
use crate::orchestration::detection::{is_interrupted, is_rate_limited, AgentState, Classification};
use crate::orchestration::hints::action_hint;
use crate::orchestration::session_io::SessionAction;
use crate::orchestration::tracking::SessionStore;
use crate::store::Store;
use crate::util::tail_lines;
use crate::Result;

/// Rate-limit and interruption signatures are only looked for this close to
/// the bottom of the screen, so an old 429 in scrollback does not re-trigger.
pub const SIGNATURE_WINDOW_LINES: usize = 15;

/// Minimal token sent on the first interruption.
pub const CONTINUE: &str = "continue";

/// What the controller saw on one session.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub session: &'a str,
    pub text: &'a str,
    pub classification: &'a Classification,
    pub story: Option<&'a Story>,
}

/// Outcome of one check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EscalationStep {
    pub actions: Vec<SessionAction>,
    /// A rate-limit or interruption condition is in effect, acted on or not.
    pub recovering: bool,
    pub rate_limit_backoff: bool,
    pub interruption_recovery: bool,
    pub killed: bool,
    pub escalations_created: usize,
    pub escalations_resolved: usize,
}

#[derive(Debug, Clone)]
pub struct EscalationController {
    config: EscalationConfig,
}

impl EscalationController {
    pub fn new(config: EscalationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// `min(max, base * 2^attempts)`.
    pub fn rate_limit_backoff(&self, attempts: u32) -> Duration {
        let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
        let secs = self
            .config
            .rate_limit_base_secs
            .saturating_mul(factor)
            .min(self.config.rate_limit_max_secs);
        Duration::from_secs(secs)
    }

    pub fn rate_limit_message(&self, wait: Duration, story: Option<&Story>) -> String {
        format!(
            "You hit an API rate limit. Sleep {} seconds (run `sleep {}`), then resume {} and submit with `{}` when it is done.",
            wait.as_secs(),
            wait.as_secs(),
            story_phrase(story),
            self.submit_command(story)
        )
    }

    pub fn recovery_prompt(&self, story: Option<&Story>) -> String {
        format!(
            "Your previous turn was interrupted. Pick up {} where you left off, finish the remaining work, run the tests, and submit with `{}`.",
            story_phrase(story),
            self.submit_command(story)
        )
    }

    fn submit_command(&self, story: Option<&Story>) -> String {
        match story {
            Some(s) => format!("{} --story {}", self.config.submit_command, s.id),
            None => self.config.submit_command.clone(),
        }
    }

    /// Decide what to do about `obs`.
    pub fn evaluate(
        &self,
        store: &mut dyn Store,
        sessions: &mut SessionStore,
        obs: &Observation<'_>,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Result<EscalationStep> {
        let mut step = EscalationStep::default();
        let state = obs.classification.state();
        let recent = tail_lines(obs.text, SIGNATURE_WINDOW_LINES);
        let rate_limited =
            !state.is_busy() && (state == AgentState::RateLimited || is_rate_limited(&recent));
        let interrupted =
            !state.is_busy() && (state == AgentState::Interrupted || is_interrupted(&recent));

        let tracking = sessions.entry(obs.session, now);
        if !rate_limited && tracking.rate_limit_attempts > 0 {
            debug!(session = obs.session, "rate limit cleared, backoff reset");
            tracking.rate_limit_attempts = 0;
        }
        if !interrupted && tracking.interruption_attempts > 0 {
            debug!(session = obs.session, "interruption cleared, attempts reset");
            tracking.interruption_attempts = 0;
        }

        if rate_limited {
            step.recovering = true;
            let backoff = self.rate_limit_backoff(tracking.rate_limit_attempts);
            if let Some(last) = tracking.last_escalation_nudge {
                if now.saturating_duration_since(last) < backoff {
                    debug!(session = obs.session, backoff_secs = backoff.as_secs(), "rate limit backoff pending");
                    return Ok(step);
                }
            }
            info!(
                session = obs.session,
                attempt = tracking.rate_limit_attempts,
                wait_secs = backoff.as_secs(),
                "rate limited, instructing agent to back off"
            );
            step.actions
                .push(SessionAction::SendText(self.rate_limit_message(backoff, obs.story)));
            tracking.rate_limit_attempts += 1;
            tracking.last_escalation_nudge = Some(now);
            step.rate_limit_backoff = true;
            return Ok(step);
        }

        if interrupted {
            step.recovering = true;
            if let Some(last) = tracking.last_escalation_nudge {
                if now.saturating_duration_since(last) < self.config.recovery_cooldown() {
                    debug!(session = obs.session, "interruption recovery cooling down");
                    return Ok(step);
                }
            }
            let attempt = tracking.interruption_attempts;
            tracking.last_escalation_nudge = Some(now);
            if attempt >= self.config.interruption_cap {
                warn!(session = obs.session, attempt, "interruption cap reached, killing session");
                tracking.interruption_attempts = 0;
                step.actions.push(SessionAction::Kill);
                step.killed = true;

                if let Some(mut agent) = store.agent_by_session(obs.session)? {
                    agent.terminate();
                    store.upsert_agent(agent)?;
                }
                let reason = format!(
                    "session killed after {} interruption recoveries",
                    self.config.interruption_cap
                );
                store.insert_escalation(Escalation::new(
                    obs.session,
                    obs.story.map(|s| s.id.clone()),
                    &reason,
                ))?;
                step.escalations_created += 1;
                return Ok(step);
            }

            let text = if attempt == 0 {
                CONTINUE.to_string()
            } else {
                self.recovery_prompt(obs.story)
            };
            info!(session = obs.session, attempt, "interruption recovery");
            step.actions.push(SessionAction::SendText(text));
            tracking.interruption_attempts += 1;
            step.interruption_recovery = true;
            return Ok(step);
        }

        if obs.classification.needs_human() {
            if sessions.is_escalated(obs.session, now, self.config.lookback_window()) {
                return Ok(step);
            }
            let since = now_utc - self.config.lookback();
            if store.has_escalation_since(obs.session, since)? {
                debug!(session = obs.session, "recent escalation exists, not duplicating");
                sessions.mark_escalated(obs.session, now);
                return Ok(step);
            }

            let reason = format!("{}: {}", state, obs.classification.reason());
            let escalation = Escalation::new(obs.session, obs.story.map(|s| s.id.clone()), &reason)
                .with_hint(action_hint(state, obs.text));
            info!(
                session = obs.session,
                escalation = %escalation.id.short(),
                state = %state,
                "escalated to human"
            );
            store.insert_escalation(escalation)?;
            sessions.mark_escalated(obs.session, now);
            step.escalations_created += 1;
            if accepts_free_text(state) {
                // left unsubmitted so the agent's turn does not restart
                step.actions.push(SessionAction::TypeText(format!(
                    "[hive] A human has been notified ({}); replace this line with the answer.",
                    state
                )));
            }
            return Ok(step);
        }

        let resumed = matches!(obs.classification, Classification::Classified { .. })
            && !obs.classification.is_waiting();
        if resumed {
            for mut escalation in store.active_escalations_for(obs.session)? {
                escalation.resolve("session resumed", now_utc);
                info!(
                    session = obs.session,
                    escalation = %escalation.id.short(),
                    "escalation auto-resolved"
                );
                store.update_escalation(escalation)?;
                step.escalations_resolved += 1;
            }
            sessions.clear_escalated(obs.session);
        }
        Ok(step)
    }
}

/// Menus would treat typed text as a selection, and an unrecognized screen
/// may not have an input line at all.
fn accepts_free_text(state: AgentState) -> bool {
    matches!(state, AgentState::AskingQuestion | AgentState::UserDeclined)
}

fn story_phrase(story: Option<&Story>) -> String {
    match story {
        Some(s) => format!("story {} ({})", s.id, s.title),
        None => "your current task".to_string(),
    }
}
