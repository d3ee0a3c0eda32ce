//! The manager check cycle.
//!
//! One tick walks every live session in turn: capture the screen, classify
//! it, judge completion, then decide escalation, nudges and follow-through in
//! a single short unit of work against the store. Decided actions are sent
//! only after the store is released. After the sessions, orphaned stories are
//! reassigned and the auto-assignment cycle runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::core::{Agent, CliTool, Story, StoryStatus};
use crate::orchestration::completion::{CompletionAssessment, CompletionClassifier};
use crate::orchestration::detection::{Classification, StateDetector};
use crate::orchestration::escalation::{EscalationController, EscalationStep, Observation};
use crate::orchestration::fleet::Fleet;
use crate::orchestration::judge::CompletionJudge;
use crate::orchestration::nudge::{NudgeDecision, StuckNudger};
use crate::orchestration::scheduler::{Assignment, DependencyScheduler};
use crate::orchestration::session_io::{SessionAction, SessionIo};
use crate::orchestration::tracking::SessionStore;
use crate::store::{Database, Store};
use crate::util::{fingerprint, with_timeout};
use crate::Result;

/// Aggregated counters for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub sessions_checked: usize,
    pub nudged: usize,
    pub escalations_created: usize,
    pub escalations_resolved: usize,
    pub auto_progressed: usize,
    pub planned_auto_assigned: usize,
    pub assignment_errors: usize,
    pub duplicates_prevented: usize,
    pub agents_spawned: usize,
    pub orphans_reassigned: usize,
    pub rate_limit_backoffs: usize,
    pub interruption_recoveries: usize,
    pub sessions_killed: usize,
    pub completion_nudges: usize,
    pub capture_failures: usize,
    pub errors: Vec<String>,
}

/// What the store-side decisions produced for one session.
#[derive(Debug, Default)]
struct SessionOutcome {
    step: EscalationStep,
    nudged: bool,
    stuck_escalated: bool,
    auto_progressed: bool,
    completion_nudged: bool,
    actions: Vec<SessionAction>,
}

enum FollowThrough {
    None,
    Progressed,
    Remind(String),
}

pub struct Manager {
    config: Config,
    io: Arc<dyn SessionIo>,
    fleet: Option<Arc<dyn Fleet>>,
    completion: CompletionClassifier,
    escalation: EscalationController,
    nudger: StuckNudger,
    scheduler: DependencyScheduler,
    sessions: SessionStore,
    detectors: HashMap<CliTool, StateDetector>,
    default_tool: CliTool,
}

impl Manager {
    pub fn new(
        config: Config,
        io: Arc<dyn SessionIo>,
        judge: Option<Arc<dyn CompletionJudge>>,
    ) -> Result<Self> {
        let mut detectors = HashMap::new();
        for tool in [CliTool::Claude, CliTool::Codex, CliTool::Gemini] {
            detectors.insert(tool, StateDetector::from_config(tool, &config.detection)?);
        }
        Ok(Self {
            completion: CompletionClassifier::new(config.completion.clone(), judge),
            escalation: EscalationController::new(config.escalation.clone()),
            nudger: StuckNudger::new(&config.manager, &config.escalation),
            scheduler: DependencyScheduler::new(config.scheduler.clone()),
            default_tool: CliTool::from_command(&config.scheduler.agent_command),
            sessions: SessionStore::new(),
            fleet: None,
            detectors,
            io,
            config,
        })
    }

    pub fn with_fleet(mut self, fleet: Arc<dyn Fleet>) -> Self {
        self.fleet = Some(fleet);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn completion(&self) -> &CompletionClassifier {
        &self.completion
    }

    pub fn scheduler(&self) -> &DependencyScheduler {
        &self.scheduler
    }

    /// Classify `text` with the configured detector for `tool`.
    pub fn classify(&self, text: &str, tool: CliTool, since_change: Option<Duration>) -> Classification {
        match self.detectors.get(&tool) {
            Some(detector) => detector.detect_with_elapsed(text, since_change),
            None => StateDetector::for_tool(tool).detect_with_elapsed(text, since_change),
        }
    }

    /// Run ticks until `cancel` fires. Cancellation is observed between ticks.
    pub async fn run(&mut self, db: &Database, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.manager.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.config.manager.interval_secs, "manager started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("manager stopping");
                    break;
                }
                _ = interval.tick() => {}
            }
            let report = self.tick(db).await;
            log_report(&report);
        }
    }

    /// List live sessions and run one check cycle over them.
    pub async fn tick(&mut self, db: &Database) -> CycleReport {
        let listed = with_timeout(self.config.manager.capture_timeout(), self.io.list()).await;
        match listed {
            Ok(live) => self.run_check_cycle(&live, db).await,
            Err(e) => {
                // without a session list we cannot tell dead agents from live ones
                warn!(error = %e, "listing sessions failed, skipping tick");
                CycleReport {
                    errors: vec![format!("list sessions: {}", e)],
                    ..CycleReport::default()
                }
            }
        }
    }

    /// One check cycle over `live` sessions.
    pub async fn run_check_cycle(&mut self, live: &[String], db: &Database) -> CycleReport {
        let mut report = CycleReport::default();

        self.sessions.retain_live(live);
        match db.scoped(|store| terminate_lost_agents(store, live)) {
            Ok(0) => {}
            Ok(n) => info!(count = n, "agents without a live session terminated"),
            Err(e) => report.errors.push(format!("terminate lost agents: {}", e)),
        }

        for session in live {
            self.check_session(session, db, &mut report).await;
        }

        match db.scoped(|store| self.scheduler.reassign_orphans(store)) {
            Ok(moved) => {
                report.orphans_reassigned = moved.len();
                self.kickoff(&moved, &mut report).await;
            }
            Err(e) => report.errors.push(format!("orphan reassignment: {}", e)),
        }

        let fleet = self.fleet.clone();
        let assignment = self.scheduler.run_auto_assignment(db, fleet.as_deref()).await;
        report.planned_auto_assigned = assignment.assigned.len();
        report.duplicates_prevented = assignment.duplicates_prevented;
        report.agents_spawned = assignment.agents_spawned;
        report.assignment_errors = assignment.errors.len();
        report.errors.extend(assignment.errors.iter().cloned());
        self.kickoff(&assignment.assigned, &mut report).await;

        report
    }

    async fn check_session(&mut self, session: &str, db: &Database, report: &mut CycleReport) {
        let now = Instant::now();
        let capture = with_timeout(
            self.config.manager.capture_timeout(),
            self.io.capture(session, self.config.manager.capture_lines),
        )
        .await;
        let text = match capture {
            Ok(text) => text,
            Err(e) => {
                warn!(session, error = %e, "capture failed");
                report.capture_failures += 1;
                report.errors.push(format!("{}: capture: {}", session, e));
                return;
            }
        };
        report.sessions_checked += 1;

        let (agent, story) = match db.read(|store| load_assignment(store, session)) {
            Ok(found) => found,
            Err(e) => {
                report.errors.push(format!("{}: load: {}", session, e));
                return;
            }
        };

        let tool = agent.as_ref().map_or(self.default_tool, |a| a.cli);
        let unchanged = self.sessions.observe_output(session, &fingerprint(&text), now);
        let classification = self.classify(&text, tool, Some(unchanged));
        if self.sessions.record_state(session, classification.state(), now) {
            debug!(session, state = %classification.state(), "state changed");
        }
        trace!(session, reason = classification.reason(), "classified");

        let assessment = match &story {
            Some(story) if classification.is_waiting() && !classification.needs_human() => Some(
                self.completion
                    .classify(session, Some(&story.id), &text)
                    .await,
            ),
            _ => None,
        };

        let now_utc = Utc::now();
        let outcome = db.scoped(|store| {
            self.decide(store, session, &text, &classification, assessment.as_ref(), now, now_utc)
        });
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session, error = %e, "check failed");
                report.errors.push(format!("{}: {}", session, e));
                return;
            }
        };

        let step = &outcome.step;
        report.escalations_created += step.escalations_created + usize::from(outcome.stuck_escalated);
        report.escalations_resolved += step.escalations_resolved;
        report.rate_limit_backoffs += usize::from(step.rate_limit_backoff);
        report.interruption_recoveries += usize::from(step.interruption_recovery);
        report.sessions_killed += usize::from(step.killed);
        report.nudged += usize::from(outcome.nudged);
        report.auto_progressed += usize::from(outcome.auto_progressed);
        report.completion_nudges += usize::from(outcome.completion_nudged);

        self.execute(session, &outcome.actions, report).await;
        if step.killed {
            self.sessions.forget(session);
        }
    }

    /// Store-side decisions for one session, run inside one unit of work.
    #[allow(clippy::too_many_arguments)]
    fn decide(
        &mut self,
        store: &mut dyn Store,
        session: &str,
        text: &str,
        classification: &Classification,
        assessment: Option<&CompletionAssessment>,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Result<SessionOutcome> {
        let mut outcome = SessionOutcome::default();
        let (agent, story) = load_assignment(store, session)?;
        let agent = match agent {
            Some(mut agent) => {
                agent.heartbeat(now_utc);
                store.upsert_agent(agent.clone())?;
                Some(agent)
            }
            None => None,
        };

        let obs = Observation {
            session,
            text,
            classification,
            story: story.as_ref(),
        };
        let step = self
            .escalation
            .evaluate(store, &mut self.sessions, &obs, now, now_utc)?;
        outcome.actions.extend(step.actions.iter().cloned());
        let busy_recovering = step.recovering || step.killed;
        outcome.step = step;
        if busy_recovering {
            return Ok(outcome);
        }

        if let (Some(agent), Some(story)) = (&agent, &story) {
            let done = assessment.is_some_and(|a| a.done);
            match self.follow_through(store, session, agent, story, done, now)? {
                FollowThrough::Progressed => {
                    outcome.auto_progressed = true;
                    return Ok(outcome);
                }
                FollowThrough::Remind(text) => {
                    outcome.completion_nudged = true;
                    outcome.actions.push(SessionAction::SendText(text));
                    return Ok(outcome);
                }
                FollowThrough::None if done => return Ok(outcome),
                FollowThrough::None => {}
            }
        }

        match self.nudger.evaluate(
            store,
            &mut self.sessions,
            session,
            classification,
            agent.as_ref(),
            story.as_ref(),
            now,
            now_utc,
        )? {
            NudgeDecision::Nudge(text) => {
                outcome.nudged = true;
                outcome.actions.push(SessionAction::SendText(text));
            }
            NudgeDecision::Escalated => outcome.stuck_escalated = true,
            NudgeDecision::None => {}
        }
        Ok(outcome)
    }

    /// Move a story with a pending PR to `pr_submitted`, or remind a finished
    /// agent to submit.
    fn follow_through(
        &mut self,
        store: &mut dyn Store,
        session: &str,
        agent: &Agent,
        story: &Story,
        done: bool,
        now: Instant,
    ) -> Result<FollowThrough> {
        if story.status != StoryStatus::InProgress {
            return Ok(FollowThrough::None);
        }
        let queued = store
            .pull_requests_for_story(&story.id)?
            .iter()
            .any(|pr| pr.status.is_pending());
        if queued {
            let mut story = story.clone();
            story.advance(StoryStatus::PrSubmitted)?;
            store.upsert_story(story.clone())?;
            let mut agent = agent.clone();
            agent.release();
            store.upsert_agent(agent)?;
            self.sessions.entry(session, now).follow_story(None);
            info!(session, story = %story.id, "pull request queued, story progressed");
            return Ok(FollowThrough::Progressed);
        }
        if !done {
            return Ok(FollowThrough::None);
        }

        let cooldown = Duration::from_secs(self.config.manager.nudge_cooldown_secs);
        let tracking = self.sessions.entry(session, now);
        if let Some(last) = tracking.last_completion_nudge {
            if now.saturating_duration_since(last) < cooldown {
                return Ok(FollowThrough::None);
            }
        }
        tracking.last_completion_nudge = Some(now);
        info!(session, story = %story.id, "work looks finished, reminding agent to submit");
        Ok(FollowThrough::Remind(format!(
            "[hive] Story {} looks finished. If the tests pass, submit it now with `{} --story {}`.",
            story.id, self.config.escalation.submit_command, story.id
        )))
    }

    async fn execute(&self, session: &str, actions: &[SessionAction], report: &mut CycleReport) {
        for action in actions {
            let sent = with_timeout(
                self.config.manager.send_timeout(),
                action.apply(self.io.as_ref(), session),
            )
            .await;
            if let Err(e) = sent {
                warn!(session, action = action.describe(), error = %e, "action failed");
                report
                    .errors
                    .push(format!("{}: {} failed: {}", session, action.describe(), e));
            }
        }
    }

    async fn kickoff(&self, assignments: &[Assignment], report: &mut CycleReport) {
        for assignment in assignments {
            let text = kickoff_message(&assignment.story, &self.config.escalation.submit_command);
            self.execute(&assignment.session, &[SessionAction::SendText(text)], report)
                .await;
        }
    }
}

/// The first message an agent receives for a story.
pub fn kickoff_message(story: &Story, submit_command: &str) -> String {
    let branch = story
        .branch_name
        .clone()
        .unwrap_or_else(|| story.default_branch());
    let mut text = format!("[hive] You are assigned story {}: {}.", story.id, story.title);
    if !story.description.trim().is_empty() {
        text.push(' ');
        text.push_str(story.description.trim());
    }
    text.push_str(&format!(
        " Work on branch `{}`. When it is finished and the tests pass, submit with `{} --story {}`.",
        branch, submit_command, story.id
    ));
    text
}

fn load_assignment(store: &dyn Store, session: &str) -> Result<(Option<Agent>, Option<Story>)> {
    let agent = store.agent_by_session(session)?;
    let story = match agent.as_ref().and_then(|a| a.current_story_id.as_ref()) {
        Some(id) => store.story(id)?,
        None => None,
    };
    Ok((agent, story))
}

fn terminate_lost_agents(store: &mut dyn Store, live: &[String]) -> Result<usize> {
    let mut terminated = 0;
    for mut agent in store.agents()? {
        if agent.is_live() && !live.contains(&agent.tmux_session) {
            debug!(agent = %agent.id, session = %agent.tmux_session, "session gone");
            agent.terminate();
            store.upsert_agent(agent)?;
            terminated += 1;
        }
    }
    Ok(terminated)
}

fn log_report(report: &CycleReport) {
    info!(
        sessions = report.sessions_checked,
        nudged = report.nudged,
        escalated = report.escalations_created,
        resolved = report.escalations_resolved,
        progressed = report.auto_progressed,
        assigned = report.planned_auto_assigned,
        spawned = report.agents_spawned,
        errors = report.errors.len(),
        "check cycle complete"
    );
    for error in &report.errors {
        debug!(error = %error, "cycle error");
    }
}
