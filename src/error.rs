use thiserror::Error;

use crate::core::StoryStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Tmux error: {0}")]
    Tmux(String),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("Classifier binary not found: {0}")]
    ClassifierBinaryNotFound(String),

    #[error("Invalid story transition from {from} to {to}")]
    InvalidStoryTransition { from: StoryStatus, to: StoryStatus },

    #[error("Story not found: {0}")]
    StoryNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Escalation not found: {0}")]
    EscalationNotFound(String),

    #[error("Fleet error: {0}")]
    Fleet(String),
}

impl Error {
    /// Whether the failure came from an unreachable collaborator rather than
    /// from bad data.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ClassifierUnavailable(_)
                | Error::ClassifierBinaryNotFound(_)
                | Error::TaskJoin(_)
                | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
