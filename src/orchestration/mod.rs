//! The manager control loop.
//!
//! Leaf-first: [`StateDetector`] classifies captured screens,
//! [`CompletionClassifier`] judges whether output is finished work,
//! [`DependencyScheduler`] hands stories to agents, and
//! [`EscalationController`] recovers or escalates stuck sessions.
//! [`Manager`] ties them together once per tick.

pub mod completion;
pub mod detection;
pub mod escalation;
pub mod fleet;
pub mod hints;
pub mod indicators;
pub mod judge;
pub mod manager;
pub mod merge_queue;
pub mod nudge;
pub mod scheduler;
pub mod session_io;
pub mod tracking;

pub use completion::{CompletionAssessment, CompletionClassifier, HeuristicScan};
pub use detection::{
    classify_state, AgentState, Classification, MatchStrategy, StateDetector, StateIndicator,
    ToolProfile,
};
pub use escalation::{EscalationController, EscalationStep, Observation};
pub use fleet::{Fleet, TmuxFleet};
pub use hints::action_hint;
pub use judge::{parse_judge_reply, ClaudeJudge, CompletionJudge, JudgeVerdict};
pub use manager::{kickoff_message, CycleReport, Manager};
pub use merge_queue::{queue_position, saturated_teams};
pub use nudge::{NudgeDecision, StuckNudger};
pub use scheduler::{
    are_dependencies_satisfied, route_tier, Assignment, AssignmentReport, DependencyScheduler,
    ReadySet, SpawnRequest,
};
pub use session_io::{SessionAction, SessionIo, TmuxSessions};
pub use tracking::{AgentStateTracking, SessionStore};
