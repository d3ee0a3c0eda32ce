//! Operator hints attached to escalations.

use regex::Regex;
use std::sync::LazyLock;

use crate::orchestration::detection::AgentState;
use crate::util::tail_lines;

/// Codex "2. Yes, and don't ask again for `cargo test`" menu rows.
static DONT_ASK_AGAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^\s*[›>▌❯]?\s*(\d+)\.\s*(yes,? and don't ask again for\s*`([^`]+)`[^\n]*)").unwrap()
});

/// Claude "2. Yes, and don't ask again this session" rows.
static SESSION_ALLOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^\s*[›>▌❯]?\s*(\d+)\.\s*(yes,? and don't ask again[^\n`]*)$").unwrap()
});

static YES_NO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\(y/n\)|\[y/n\]|\(yes/no\))").unwrap());

static MENU_ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[›>▌❯●]?\s*(\d+\.\s+[^\n]+?)\s*$").unwrap());

static QUESTION_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[⏺•✦]?\s*([^\n>│|]{8,}\?)\s*$").unwrap());

/// Recommend what the operator should do for a session in `state`.
///
/// Returns `None` for states that do not need a human.
pub fn action_hint(state: AgentState, text: &str) -> Option<String> {
    let screen = tail_lines(text, 20);
    match state {
        AgentState::PermissionRequired => Some(permission_hint(&screen)),
        AgentState::PlanApproval => Some(
            "Review the proposed plan; approve with option 1 to let the agent start, or choose 'No, keep planning' with feedback"
                .to_string(),
        ),
        AgentState::AwaitingSelection => {
            let options: Vec<&str> = MENU_ROW_RE
                .captures_iter(&screen)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .take(4)
                .collect();
            if options.is_empty() {
                Some("A selection menu is open; pick an option with the arrow keys and Enter".to_string())
            } else {
                Some(format!(
                    "A selection menu is open; pick one of: {}",
                    options.join(" | ")
                ))
            }
        }
        AgentState::AskingQuestion => {
            let question = QUESTION_LINE_RE
                .captures_iter(&screen)
                .filter_map(|c| c.get(1).map(|m| m.as_str().trim()))
                .last();
            Some(match question {
                Some(q) => format!("Answer the agent's question: \"{}\"", q),
                None => "The agent asked a question; reply in the session".to_string(),
            })
        }
        AgentState::UserDeclined => Some(
            "The last action was declined; tell the agent how to proceed or reassign the story"
                .to_string(),
        ),
        AgentState::Unknown => Some(
            "No recognizable activity past the stuck timeout; attach to the session and check on it"
                .to_string(),
        ),
        _ => None,
    }
}

fn permission_hint(screen: &str) -> String {
    if let Some(c) = DONT_ASK_AGAIN_RE.captures(screen) {
        return format!(
            "Select option {} (\"{}\") so `{}` commands stop prompting",
            &c[1],
            c[2].trim(),
            &c[3]
        );
    }
    if let Some(c) = SESSION_ALLOW_RE.captures(screen) {
        return format!(
            "Select option {} (\"{}\") if the action is expected",
            &c[1],
            c[2].trim()
        );
    }
    if YES_NO_RE.is_match(screen) {
        return "Approve with 'y' then Enter if the action is expected".to_string();
    }
    "Approve the pending action (option 1 / Enter) if it is expected, otherwise decline with guidance"
        .to_string()
}
