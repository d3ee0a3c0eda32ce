//! Process-local, per-session bookkeeping.
//!
//! One [`SessionStore`] belongs to one manager loop. Nothing here is
//! persisted; losing it on restart only restarts backoff and cooldowns.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::core::StoryId;
use crate::orchestration::detection::AgentState;

/// Everything remembered about one session between ticks.
#[derive(Debug, Clone)]
pub struct AgentStateTracking {
    pub last_state: AgentState,
    pub last_state_change: Instant,
    pub last_nudge: Option<Instant>,
    /// Stuck nudges sent for `nudged_story`.
    pub story_stuck_nudge_count: u32,
    pub nudged_story: Option<StoryId>,
    /// Last recovery message (rate limit or interruption).
    pub last_escalation_nudge: Option<Instant>,
    pub interruption_attempts: u32,
    pub rate_limit_attempts: u32,
    pub last_completion_nudge: Option<Instant>,
    pub last_fingerprint: Option<String>,
    pub last_output_change: Instant,
}

impl AgentStateTracking {
    pub fn new(now: Instant) -> Self {
        Self {
            last_state: AgentState::Unknown,
            last_state_change: now,
            last_nudge: None,
            story_stuck_nudge_count: 0,
            nudged_story: None,
            last_escalation_nudge: None,
            interruption_attempts: 0,
            rate_limit_attempts: 0,
            last_completion_nudge: None,
            last_fingerprint: None,
            last_output_change: now,
        }
    }

    /// How long the session has been in its current state.
    pub fn time_in_state(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_state_change)
    }

    /// Reset the stuck-nudge counter when the session moves to another story.
    pub fn follow_story(&mut self, story: Option<&StoryId>) {
        if self.nudged_story.as_ref() != story {
            self.nudged_story = story.cloned();
            self.story_stuck_nudge_count = 0;
            self.last_nudge = None;
        }
    }
}

/// Session-keyed tracking plus the in-memory escalated set.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, AgentStateTracking>,
    /// When each session was last escalated.
    escalated: HashMap<String, Instant>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracking for `session`, created on first observation.
    pub fn entry(&mut self, session: &str, now: Instant) -> &mut AgentStateTracking {
        self.sessions
            .entry(session.to_string())
            .or_insert_with(|| AgentStateTracking::new(now))
    }

    pub fn get(&self, session: &str) -> Option<&AgentStateTracking> {
        self.sessions.get(session)
    }

    /// Record the screen fingerprint; returns how long the output has been unchanged.
    pub fn observe_output(&mut self, session: &str, fingerprint: &str, now: Instant) -> Duration {
        let t = self.entry(session, now);
        if t.last_fingerprint.as_deref() != Some(fingerprint) {
            t.last_fingerprint = Some(fingerprint.to_string());
            t.last_output_change = now;
        }
        now.saturating_duration_since(t.last_output_change)
    }

    /// Record the classified state; returns true when it changed.
    pub fn record_state(&mut self, session: &str, state: AgentState, now: Instant) -> bool {
        let t = self.entry(session, now);
        if t.last_state != state {
            t.last_state = state;
            t.last_state_change = now;
            true
        } else {
            false
        }
    }

    /// True when `session` was escalated less than `window` before `now`.
    pub fn is_escalated(&self, session: &str, now: Instant, window: Duration) -> bool {
        self.escalated
            .get(session)
            .is_some_and(|&at| now.saturating_duration_since(at) < window)
    }

    pub fn mark_escalated(&mut self, session: &str, now: Instant) {
        self.escalated.insert(session.to_string(), now);
    }

    pub fn clear_escalated(&mut self, session: &str) {
        self.escalated.remove(session);
    }

    /// Drop everything known about `session`.
    pub fn forget(&mut self, session: &str) {
        self.sessions.remove(session);
        self.escalated.remove(session);
    }

    /// Keep only sessions that are still live.
    pub fn retain_live(&mut self, live: &[String]) {
        let live: HashSet<&str> = live.iter().map(String::as_str).collect();
        self.sessions.retain(|s, _| live.contains(s.as_str()));
        self.escalated.retain(|s, _| live.contains(s.as_str()));
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
