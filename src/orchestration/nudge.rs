//! Stuck-story nudges.
//!
//! A working agent that has sat at an idle prompt for too long gets a short
//! reminder about its story, at most once per cooldown. After
//! `max_stuck_nudges` reminders on the same story the nudger escalates
//! instead of nudging again.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::{EscalationConfig, ManagerConfig};
use crate::core::{Agent, AgentStatus, Escalation, Story};
use crate::orchestration::detection::{AgentState, Classification};
use crate::orchestration::tracking::SessionStore;
use crate::store::Store;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NudgeDecision {
    None,
    Nudge(String),
    Escalated,
}

#[derive(Debug, Clone)]
pub struct StuckNudger {
    idle_after: Duration,
    cooldown: Duration,
    max_nudges: u32,
    lookback: chrono::Duration,
    lookback_window: Duration,
    submit_command: String,
}

impl StuckNudger {
    pub fn new(manager: &ManagerConfig, escalation: &EscalationConfig) -> Self {
        Self {
            idle_after: Duration::from_secs(manager.stuck_nudge_after_secs),
            cooldown: Duration::from_secs(manager.nudge_cooldown_secs),
            max_nudges: manager.max_stuck_nudges,
            lookback: escalation.lookback(),
            lookback_window: escalation.lookback_window(),
            submit_command: escalation.submit_command.clone(),
        }
    }

    pub fn message(&self, story: &Story) -> String {
        format!(
            "[hive] You have been idle on story {} ({}). Continue the implementation; once it is finished and the tests pass, submit with `{} --story {}`.",
            story.id, story.title, self.submit_command, story.id
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &self,
        store: &mut dyn Store,
        sessions: &mut SessionStore,
        session: &str,
        classification: &Classification,
        agent: Option<&Agent>,
        story: Option<&Story>,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Result<NudgeDecision> {
        let (Some(agent), Some(story)) = (agent, story) else {
            return Ok(NudgeDecision::None);
        };
        let state = classification.state();
        if agent.status != AgentStatus::Working
            || !matches!(state, AgentState::Idle | AgentState::Error)
        {
            return Ok(NudgeDecision::None);
        }

        let tracking = sessions.entry(session, now);
        tracking.follow_story(Some(&story.id));
        if tracking.time_in_state(now) < self.idle_after {
            return Ok(NudgeDecision::None);
        }
        if let Some(last) = tracking.last_nudge {
            if now.saturating_duration_since(last) < self.cooldown {
                return Ok(NudgeDecision::None);
            }
        }

        if tracking.story_stuck_nudge_count >= self.max_nudges {
            tracking.last_nudge = Some(now);
            if sessions.is_escalated(session, now, self.lookback_window)
                || store.has_escalation_since(session, now_utc - self.lookback)?
            {
                debug!(session, story = %story.id, "stuck story already escalated");
                return Ok(NudgeDecision::None);
            }
            let reason = format!(
                "stuck: idle on story {} after {} nudges",
                story.id, self.max_nudges
            );
            store.insert_escalation(
                Escalation::new(session, Some(story.id.clone()), &reason).with_hint(Some(
                    "Attach to the session and check why the agent stopped".to_string(),
                )),
            )?;
            sessions.mark_escalated(session, now);
            info!(session, story = %story.id, "stuck story escalated");
            return Ok(NudgeDecision::Escalated);
        }

        tracking.story_stuck_nudge_count += 1;
        tracking.last_nudge = Some(now);
        info!(
            session,
            story = %story.id,
            nudge = tracking.story_stuck_nudge_count,
            "nudging idle agent"
        );
        Ok(NudgeDecision::Nudge(self.message(story)))
    }
}
