//! Core domain models for the hive manager.
//!
//! Stories, agents, escalations and pull requests as persisted by the store,
//! plus the dependency graph used to order stories.

pub mod agent;
pub mod dag;
pub mod escalation;
pub mod pull_request;
pub mod story;

pub use agent::{Agent, AgentId, AgentStatus, AgentTier, CliTool};
pub use dag::{topological_sort, StoryGraph, TopoSort};
pub use escalation::{Escalation, EscalationId, EscalationStatus, HUMAN};
pub use pull_request::{PrStatus, PullRequest};
pub use story::{Story, StoryId, StoryStatus, MAX_COMPLEXITY, MIN_COMPLEXITY};
