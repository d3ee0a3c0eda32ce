//! Built-in indicator tables for the supported CLI tools.
//!
//! Phrasing drifts between tool versions, so every row is a heuristic.
//! Extra rows can be appended through `[detection].extra_indicators`.

use regex::Regex;
use std::sync::LazyLock;

use crate::core::CliTool;
use crate::orchestration::detection::{AgentState, StateIndicator, ToolProfile};

fn row(state: AgentState, priority: u8, confidence: f32, patterns: &[&str]) -> StateIndicator {
    StateIndicator::new(
        state,
        priority,
        confidence,
        patterns.iter().map(|p| Regex::new(p).unwrap()).collect(),
    )
}

const RATE_LIMIT: &str = r"(?i)(api error:?\s*429|too many requests|rate_limit_error|usage limit reached|rate limit(ed)? (exceeded|reached)|quota exceeded|resource_exhausted)";

const QUESTION: &[&str] = &[
    r"(?i)\b(would you like me to|should i|do you want me to|shall i|which (option|approach) (would you|do you))\b[^\n]*\?",
    r"(?m)^[^\n>│|]{8,}\?\s*$",
];

const YES_NO: &str = r"(?i)(\(y/n\)|\[y/n\]|\(yes/no\))";

/// Claude Code.
pub struct ClaudeProfile;

static CLAUDE: LazyLock<Vec<StateIndicator>> = LazyLock::new(|| {
    vec![
        row(AgentState::RateLimited, 100, 0.95, &[RATE_LIMIT]).within_last(12),
        row(
            AgentState::Interrupted,
            95,
            0.9,
            &[r"(?i)interrupted by user", r"(?i)request interrupted"],
        )
        .within_last(10),
        row(
            AgentState::PlanApproval,
            92,
            0.9,
            &[
                r"(?i)ready to code\?",
                r"(?i)yes, and auto-accept edits",
                r"(?i)no, keep planning",
            ],
        )
        .within_last(20),
        row(
            AgentState::PermissionRequired,
            90,
            0.9,
            &[
                r"(?i)do you want to (make this edit|create|proceed|run|allow|overwrite|fetch)",
                r"(?i)yes, and don't ask again",
                r"(?i)allow (this|the) (command|tool)",
                YES_NO,
            ],
        )
        .within_last(15),
        row(
            AgentState::UserDeclined,
            85,
            0.85,
            &[
                r"(?i)user rejected",
                r"(?i)the user doesn't want to proceed",
                r"(?i)user declined",
            ],
        )
        .within_last(12),
        row(
            AgentState::AwaitingSelection,
            80,
            0.8,
            &[
                r"(?m)^\s*❯\s*\d+\.\s",
                r"(?i)enter to (select|confirm)",
                r"(?i)↑/↓ to (navigate|select)",
            ],
        )
        .within_last(12),
        row(
            AgentState::Thinking,
            76,
            0.85,
            &[r"(?im)^\s*\S\s+(thinking|pondering|cogitating|reasoning|ruminating|contemplating|deliberating|mulling)…"],
        )
        .within_last(8),
        row(AgentState::Working, 75, 0.8, &[r"(?i)esc to interrupt"]).within_last(8),
        row(AgentState::AskingQuestion, 60, 0.6, QUESTION).within_last(10),
        row(
            AgentState::Error,
            50,
            0.7,
            &[r"(?i)api error: (5\d\d|overloaded)", r"(?i)\boverloaded_error\b"],
        )
        .within_last(10),
        row(
            AgentState::Idle,
            40,
            0.7,
            &[r"(?m)^\s*[│|]?\s*>\s*[│|]?\s*$", r"(?i)\? for shortcuts"],
        )
        .within_last(6),
    ]
});

impl ToolProfile for ClaudeProfile {
    fn tool(&self) -> CliTool {
        CliTool::Claude
    }

    fn indicators(&self) -> &[StateIndicator] {
        &CLAUDE
    }
}

/// OpenAI Codex CLI.
pub struct CodexProfile;

static CODEX: LazyLock<Vec<StateIndicator>> = LazyLock::new(|| {
    vec![
        row(
            AgentState::RateLimited,
            100,
            0.95,
            &[RATE_LIMIT, r"(?i)stream error:[^\n]*429"],
        )
        .within_last(12),
        row(
            AgentState::Interrupted,
            95,
            0.9,
            &[
                r"(?i)conversation interrupted",
                r"(?i)tell the model what to do differently",
            ],
        )
        .within_last(10),
        row(
            AgentState::PermissionRequired,
            90,
            0.9,
            &[
                r"(?i)allow command\?",
                r"(?i)would you like to run the following command\?",
                r"(?i)would you like to make the following edits\?",
                r"(?i)don't ask again for",
                r"(?i)approve this (command|patch|edit)",
                YES_NO,
            ],
        )
        .within_last(15),
        row(
            AgentState::UserDeclined,
            85,
            0.85,
            &[
                r"(?i)\b(you|user) (declined|denied|rejected)\b",
                r"(?i)command was (declined|denied|rejected)",
            ],
        )
        .within_last(12),
        row(
            AgentState::AwaitingSelection,
            80,
            0.8,
            &[r"(?m)^\s*[›>▌]\s*\d+\.\s", r"(?i)press enter to confirm"],
        )
        .within_last(12),
        row(
            AgentState::Thinking,
            76,
            0.8,
            &[r"(?i)\bthinking\s*\(\d+s"],
        )
        .within_last(8),
        row(
            AgentState::Working,
            75,
            0.8,
            &[r"(?i)\bworking\s*\(\d+s", r"(?i)esc to interrupt"],
        )
        .within_last(8),
        row(AgentState::AskingQuestion, 60, 0.6, QUESTION).within_last(10),
        row(
            AgentState::Error,
            50,
            0.7,
            &[r"(?i)stream error:", r"(?i)error: (5\d\d|internal server error)"],
        )
        .within_last(10),
        row(
            AgentState::Idle,
            40,
            0.7,
            &[r"(?m)^\s*[›▌>]\s*$", r"(?i)⏎ send", r"(?i)ctrl\+j newline"],
        )
        .within_last(6),
    ]
});

impl ToolProfile for CodexProfile {
    fn tool(&self) -> CliTool {
        CliTool::Codex
    }

    fn indicators(&self) -> &[StateIndicator] {
        &CODEX
    }
}

/// Google Gemini CLI.
pub struct GeminiProfile;

static GEMINI: LazyLock<Vec<StateIndicator>> = LazyLock::new(|| {
    vec![
        row(AgentState::RateLimited, 100, 0.95, &[RATE_LIMIT]).within_last(12),
        row(
            AgentState::Interrupted,
            95,
            0.9,
            &[r"(?i)request cancelled", r"(?i)conversation interrupted"],
        )
        .within_last(10),
        row(
            AgentState::PermissionRequired,
            90,
            0.9,
            &[
                r"(?i)allow execution",
                r"(?i)waiting for user confirmation",
                r"(?i)apply this change\?",
                r"(?i)yes, allow (once|always)",
                YES_NO,
            ],
        )
        .within_last(15),
        row(
            AgentState::UserDeclined,
            85,
            0.85,
            &[r"(?i)\b(cancelled|declined|rejected) by (the )?user\b"],
        )
        .within_last(12),
        row(
            AgentState::AwaitingSelection,
            80,
            0.8,
            &[r"(?m)^\s*●\s*\d+\.\s"],
        )
        .within_last(12),
        row(AgentState::Working, 75, 0.8, &[r"(?i)\(esc to cancel"]).within_last(8),
        row(AgentState::AskingQuestion, 60, 0.6, QUESTION).within_last(10),
        row(AgentState::Idle, 40, 0.7, &[r"(?i)type your message"]).within_last(6),
    ]
});

impl ToolProfile for GeminiProfile {
    fn tool(&self) -> CliTool {
        CliTool::Gemini
    }

    fn indicators(&self) -> &[StateIndicator] {
        &GEMINI
    }
}

pub fn profile_for(tool: CliTool) -> &'static dyn ToolProfile {
    match tool {
        CliTool::Claude => &ClaudeProfile,
        CliTool::Codex => &CodexProfile,
        CliTool::Gemini => &GeminiProfile,
    }
}
