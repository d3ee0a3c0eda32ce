//! Terminal-state detection for agent sessions.
//!
//! A [`StateDetector`] turns the tail of a captured tmux pane into a
//! [`Classification`]. Each CLI tool supplies an ordered table of
//! [`StateIndicator`]s through the [`ToolProfile`] trait; the detector scans
//! the table in descending priority (declaration order breaks ties) and the
//! first matching pattern wins.
//!
//! Detection never fails. Output that matches nothing is itself a result
//! ([`Classification::Unknown`]), and an unknown screen that has not changed
//! for longer than the stuck timeout is reported as stuck so the manager
//! escalates instead of treating the session as quietly idle.
//!
//! ## Example
//!
//! ```
//! use hive::core::CliTool;
//! use hive::orchestration::{classify_state, AgentState};
//!
//! let c = classify_state("Allow command?\n› 1. Yes\n  2. No", CliTool::Codex);
//! assert_eq!(c.state(), AgentState::PermissionRequired);
//! assert!(c.needs_human());
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

use crate::config::{DetectionConfig, IndicatorSpec};
use crate::core::CliTool;
use crate::orchestration::indicators;
use crate::util::tail_lines;
use crate::Result;

/// Lines of a capture the detector looks at by default.
pub const DEFAULT_WINDOW_LINES: usize = 50;

/// Default stuck timeout for unknown screens.
pub const DEFAULT_STUCK_TIMEOUT: Duration = Duration::from_secs(120);

/// Confidence reported for unclassified screens.
pub const UNKNOWN_CONFIDENCE: f32 = 0.1;

/// HTTP-429 style rate-limit signature, shared by every tool.
pub static RATE_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(api error:?\s*429|\b429\b[^\n]{0,40}(too many requests|rate.?limit)|rate_limit_error|too many requests|usage limit reached|rate limit(ed)? (exceeded|reached)|quota exceeded|resource_exhausted)",
    )
    .unwrap()
});

/// "Conversation interrupted" signature, independent of rate limiting.
pub static INTERRUPTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(conversation interrupted|interrupted by user|request interrupted|request cancelled)")
        .unwrap()
});

/// Classified agent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Thinking,
    Working,
    Idle,
    AskingQuestion,
    AwaitingSelection,
    PlanApproval,
    PermissionRequired,
    UserDeclined,
    RateLimited,
    Interrupted,
    Error,
    Unknown,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Thinking => "thinking",
            AgentState::Working => "working",
            AgentState::Idle => "idle",
            AgentState::AskingQuestion => "asking_question",
            AgentState::AwaitingSelection => "awaiting_selection",
            AgentState::PlanApproval => "plan_approval",
            AgentState::PermissionRequired => "permission_required",
            AgentState::UserDeclined => "user_declined",
            AgentState::RateLimited => "rate_limited",
            AgentState::Interrupted => "interrupted",
            AgentState::Error => "error",
            AgentState::Unknown => "unknown",
        }
    }

    /// States a human has to resolve.
    pub fn needs_human(&self) -> bool {
        matches!(
            self,
            AgentState::AskingQuestion
                | AgentState::AwaitingSelection
                | AgentState::PlanApproval
                | AgentState::PermissionRequired
                | AgentState::UserDeclined
        )
    }

    /// The session is sitting at a prompt rather than producing output.
    pub fn is_waiting(&self) -> bool {
        self.needs_human()
            || matches!(
                self,
                AgentState::Idle
                    | AgentState::RateLimited
                    | AgentState::Interrupted
                    | AgentState::Error
            )
    }

    /// Actively producing output.
    pub fn is_busy(&self) -> bool {
        matches!(self, AgentState::Thinking | AgentState::Working)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How competing matches are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Highest priority indicator with any matching pattern wins.
    #[default]
    FirstMatch,
    /// Every indicator is evaluated; highest (priority, confidence) wins.
    BestScore,
}

/// One row of an indicator table.
#[derive(Debug, Clone)]
pub struct StateIndicator {
    pub state: AgentState,
    pub patterns: Vec<Regex>,
    pub priority: u8,
    pub confidence: f32,
    /// Restrict matching to the last N lines of the window.
    pub tail: Option<usize>,
}

impl StateIndicator {
    pub fn new(state: AgentState, priority: u8, confidence: f32, patterns: Vec<Regex>) -> Self {
        Self {
            state,
            patterns,
            priority,
            confidence,
            tail: None,
        }
    }

    pub fn within_last(mut self, lines: usize) -> Self {
        self.tail = Some(lines);
        self
    }

    pub fn from_spec(spec: &IndicatorSpec) -> Result<Self> {
        Ok(Self::new(
            spec.state,
            spec.priority,
            spec.confidence.clamp(0.0, 1.0),
            vec![Regex::new(&spec.pattern)?],
        ))
    }

    /// The first pattern matching `window`, if any.
    fn matching_pattern(&self, window: &str) -> Option<&Regex> {
        let scoped;
        let text = match self.tail {
            Some(n) => {
                scoped = tail_lines(window, n);
                scoped.as_str()
            }
            None => window,
        };
        self.patterns.iter().find(|re| re.is_match(text))
    }
}

/// Per-tool indicator table behind one interface.
pub trait ToolProfile: Send + Sync {
    fn tool(&self) -> CliTool;
    fn indicators(&self) -> &[StateIndicator];
}

/// Result of classifying a screen.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Classified {
        state: AgentState,
        confidence: f32,
        reason: String,
    },
    Unknown {
        /// Nothing recognizable for longer than the stuck timeout.
        stuck: bool,
        reason: String,
    },
}

impl Classification {
    pub fn state(&self) -> AgentState {
        match self {
            Classification::Classified { state, .. } => *state,
            Classification::Unknown { .. } => AgentState::Unknown,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            Classification::Classified { confidence, .. } => *confidence,
            Classification::Unknown { .. } => UNKNOWN_CONFIDENCE,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Classification::Classified { reason, .. } | Classification::Unknown { reason, .. } => {
                reason
            }
        }
    }

    pub fn is_stuck(&self) -> bool {
        matches!(self, Classification::Unknown { stuck: true, .. })
    }

    pub fn is_waiting(&self) -> bool {
        match self {
            Classification::Classified { state, .. } => state.is_waiting(),
            Classification::Unknown { stuck, .. } => *stuck,
        }
    }

    pub fn needs_human(&self) -> bool {
        match self {
            Classification::Classified { state, .. } => state.needs_human(),
            Classification::Unknown { stuck, .. } => *stuck,
        }
    }
}

/// Pattern-table classifier for one CLI tool.
#[derive(Debug, Clone)]
pub struct StateDetector {
    tool: CliTool,
    /// Sorted by descending priority; ties keep declaration order.
    indicators: Vec<StateIndicator>,
    strategy: MatchStrategy,
    stuck_timeout: Duration,
    window_lines: usize,
}

impl StateDetector {
    pub fn new(profile: &dyn ToolProfile) -> Self {
        let mut detector = Self {
            tool: profile.tool(),
            indicators: profile.indicators().to_vec(),
            strategy: MatchStrategy::FirstMatch,
            stuck_timeout: DEFAULT_STUCK_TIMEOUT,
            window_lines: DEFAULT_WINDOW_LINES,
        };
        detector.sort();
        detector
    }

    pub fn for_tool(tool: CliTool) -> Self {
        Self::new(indicators::profile_for(tool))
    }

    /// Detector for `tool` tuned by configuration: strategy, stuck timeout and
    /// any extra indicators that apply to the tool.
    pub fn from_config(tool: CliTool, config: &DetectionConfig) -> Result<Self> {
        let mut detector = Self::for_tool(tool)
            .with_strategy(config.strategy)
            .with_stuck_timeout(config.stuck_timeout());
        for spec in &config.extra_indicators {
            if spec.tools.is_empty() || spec.tools.contains(&tool) {
                detector.push_indicator(StateIndicator::from_spec(spec)?);
            }
        }
        Ok(detector)
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_stuck_timeout(mut self, timeout: Duration) -> Self {
        self.stuck_timeout = timeout;
        self
    }

    pub fn with_window_lines(mut self, lines: usize) -> Self {
        self.window_lines = lines.max(1);
        self
    }

    /// Add an indicator after the built-in rows of the same priority.
    pub fn push_indicator(&mut self, indicator: StateIndicator) {
        self.indicators.push(indicator);
        self.sort();
    }

    pub fn tool(&self) -> CliTool {
        self.tool
    }

    pub fn indicators(&self) -> &[StateIndicator] {
        &self.indicators
    }

    fn sort(&mut self) {
        // stable: equal priorities keep declaration order
        self.indicators.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Classify without stuck tracking.
    pub fn detect(&self, text: &str) -> Classification {
        self.detect_with_elapsed(text, None)
    }

    /// Classify `text`; `since_change` is how long the caller has seen the same state.
    pub fn detect_with_elapsed(&self, text: &str, since_change: Option<Duration>) -> Classification {
        let window = tail_lines(text, self.window_lines);
        if window.trim().is_empty() {
            return self.unknown("empty capture", since_change);
        }

        let found = match self.strategy {
            MatchStrategy::FirstMatch => self
                .indicators
                .iter()
                .find_map(|ind| ind.matching_pattern(&window).map(|re| (ind, re))),
            MatchStrategy::BestScore => self
                .indicators
                .iter()
                .filter_map(|ind| ind.matching_pattern(&window).map(|re| (ind, re)))
                .fold(None, |best: Option<(&StateIndicator, &Regex)>, cand| match best {
                    Some(b)
                        if (b.0.priority, b.0.confidence) >= (cand.0.priority, cand.0.confidence) =>
                    {
                        Some(b)
                    }
                    _ => Some(cand),
                }),
        };

        match found {
            Some((indicator, pattern)) => Classification::Classified {
                state: indicator.state,
                confidence: indicator.confidence,
                reason: format!(
                    "{} matched /{}/ ({})",
                    indicator.state,
                    pattern.as_str(),
                    self.tool
                ),
            },
            None => self.unknown("no indicator matched", since_change),
        }
    }

    fn unknown(&self, why: &str, since_change: Option<Duration>) -> Classification {
        match since_change {
            Some(elapsed) if elapsed > self.stuck_timeout => Classification::Unknown {
                stuck: true,
                reason: format!(
                    "{} for {}s (stuck timeout {}s)",
                    why,
                    elapsed.as_secs(),
                    self.stuck_timeout.as_secs()
                ),
            },
            _ => Classification::Unknown {
                stuck: false,
                reason: why.to_string(),
            },
        }
    }
}

/// Classify `text` with the built-in table for `tool`.
pub fn classify_state(text: &str, tool: CliTool) -> Classification {
    StateDetector::for_tool(tool).detect(text)
}

/// Whether the capture carries the rate-limit signature.
pub fn is_rate_limited(text: &str) -> bool {
    RATE_LIMIT_RE.is_match(text)
}

/// Whether the capture carries the interruption signature.
pub fn is_interrupted(text: &str) -> bool {
    INTERRUPTED_RE.is_match(text)
}
