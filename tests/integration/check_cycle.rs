//! Manager check cycle integration tests.
//!
//! These tests drive whole ticks against scripted sessions and an in-memory
//! store, and check the aggregated counters, the persisted rows and the
//! text that reached each session.

use std::time::Duration;

use hive::config::Config;
use hive::core::{AgentTier, EscalationStatus, PullRequest, Story, StoryId, StoryStatus};
use hive::store::Database;

use super::fixtures::*;

const SESSION: &str = "hive-junior-core-1";

fn story() -> Story {
    Story::new("S-1", "core", "Add retries").with_complexity(2)
}

// ========== Partial failure ==========

/// Test: One failing capture does not halt the tick
/// Given two live sessions where one cannot be captured
/// When a tick runs
/// Then the other session is still checked
#[tokio::test]
async fn test_capture_failure_does_not_halt_tick() {
    let io = ScriptedSessions::new();
    io.show("hive-junior-core-1", IDLE);
    io.show("hive-junior-core-2", IDLE);
    io.fail_capture("hive-junior-core-1");
    let db = Database::in_memory();

    let mut mgr = manager_with(Config::default(), io.clone(), None);
    let report = mgr.tick(&db).await;

    assert_eq!(report.capture_failures, 1);
    assert_eq!(report.sessions_checked, 1);
    assert!(report.errors.iter().any(|e| e.contains("capture")));
}

/// Test: A failed send still advances the attempt counter
/// Given an interrupted session whose sends fail
/// When two ticks run and the second send succeeds
/// Then the second message is the full recovery prompt, not "continue"
#[tokio::test]
async fn test_send_failure_still_advances_attempts() {
    let io = ScriptedSessions::new();
    let db = Database::in_memory();
    working_pair(&db, SESSION, AgentTier::Junior, story());
    io.show(SESSION, INTERRUPTED);
    io.fail_send(SESSION);

    let mut mgr = manager_with(eager_config(), io.clone(), None);
    let first = mgr.tick(&db).await;
    assert_eq!(first.interruption_recoveries, 1);
    assert!(first.errors.iter().any(|e| e.contains("send text failed")));
    assert!(io.sent_to(SESSION).is_empty());

    io.heal_send(SESSION);
    mgr.tick(&db).await;
    let sent = io.sent_to(SESSION);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("interrupted"));
}

// ========== Escalation ==========

/// Test: Human escalation is deduplicated across ticks
/// Given a session asking an open question
/// When two ticks run
/// Then exactly one escalation row exists and one reminder was typed, unsubmitted
#[tokio::test]
async fn test_question_escalated_once() {
    let io = ScriptedSessions::new();
    let db = Database::in_memory();
    working_pair(&db, SESSION, AgentTier::Junior, story());
    io.show(SESSION, QUESTION);

    let mut mgr = manager_with(Config::default(), io.clone(), None);
    let first = mgr.tick(&db).await;
    let second = mgr.tick(&db).await;

    assert_eq!(first.escalations_created, 1);
    assert_eq!(second.escalations_created, 0);

    let rows = db.read(|s| s.escalations()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].from_agent, SESSION);
    assert_eq!(rows[0].story_id, Some(StoryId::from("S-1")));
    assert!(rows[0].action_hint.is_some());

    assert!(io.sent_to(SESSION).is_empty());
    let typed = io.typed_into(SESSION);
    assert_eq!(typed.len(), 1);
    assert!(typed[0].contains("human has been notified"));
}

/// Test: The reminder typed into a question does not resolve its escalation
/// Given a questioning session that echoes typed text onto its screen
/// When ticks run after the escalation
/// Then the escalation stays active
#[tokio::test]
async fn test_question_reminder_does_not_resolve_escalation() {
    let io = ScriptedSessions::new();
    let db = Database::in_memory();
    working_pair(&db, SESSION, AgentTier::Junior, story());
    io.show(SESSION, QUESTION);
    io.echo(SESSION);

    let mut mgr = manager_with(Config::default(), io.clone(), None);
    assert_eq!(mgr.tick(&db).await.escalations_created, 1);
    for _ in 0..2 {
        let report = mgr.tick(&db).await;
        assert_eq!(report.escalations_resolved, 0);
        assert_eq!(report.escalations_created, 0);
    }
    let rows = db.read(|s| s.escalations()).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_active());
}

/// Test: A stuck session stays escalated until it shows recognizable work
/// Given a session with unrecognized output that echoes anything sent to it
/// When it is escalated as stuck and later prints more unrecognized output
/// Then nothing is typed into it and the escalation resolves only once it is working
#[tokio::test]
async fn test_stuck_escalation_held_until_work_resumes() {
    let io = ScriptedSessions::new();
    let db = Database::in_memory();
    working_pair(&db, SESSION, AgentTier::Junior, story());
    io.show(SESSION, "compiling foo v0.1.0\nlinking");
    io.echo(SESSION);

    let mut config = Config::default();
    config.detection.stuck_timeout_secs = 0;
    let mut mgr = manager_with(config, io.clone(), None);

    let mut created = 0;
    for _ in 0..5 {
        created += mgr.tick(&db).await.escalations_created;
        if created > 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(created, 1);

    for _ in 0..2 {
        std::thread::sleep(Duration::from_millis(5));
        let report = mgr.tick(&db).await;
        assert_eq!(report.escalations_resolved, 0);
        assert_eq!(report.escalations_created, 0);
    }
    assert!(io.sent_to(SESSION).is_empty());
    assert!(io.typed_into(SESSION).is_empty());

    io.show(SESSION, "linking\nstill linking");
    assert_eq!(mgr.tick(&db).await.escalations_resolved, 0);
    let rows = db.read(|s| s.escalations()).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_active());
    assert!(rows[0].reason.starts_with("unknown"));

    io.show(SESSION, WORKING);
    assert_eq!(mgr.tick(&db).await.escalations_resolved, 1);
}

/// Test: Escalations auto-resolve when the session resumes
/// Given an escalated session
/// When the agent starts working again
/// Then its active escalation is resolved
#[tokio::test]
async fn test_escalation_resolved_when_session_resumes() {
    let io = ScriptedSessions::new();
    let db = Database::in_memory();
    working_pair(&db, SESSION, AgentTier::Junior, story());
    io.show(SESSION, QUESTION);

    let mut mgr = manager_with(Config::default(), io.clone(), None);
    mgr.tick(&db).await;

    io.show(SESSION, WORKING);
    let report = mgr.tick(&db).await;
    assert_eq!(report.escalations_resolved, 1);

    let rows = db.read(|s| s.escalations()).unwrap();
    assert_eq!(rows[0].status, EscalationStatus::Resolved);
    assert!(rows[0].resolved_at.is_some());
}

/// Test: Interruption recovery escalates to a kill at the cap
/// Given a session that stays interrupted
/// When four ticks run with no cooldown
/// Then "continue", two recovery prompts, then a kill
#[tokio::test]
async fn test_interruption_recovery_then_kill() {
    let io = ScriptedSessions::new();
    let db = Database::in_memory();
    working_pair(&db, SESSION, AgentTier::Junior, story());
    io.show(SESSION, INTERRUPTED);

    let mut mgr = manager_with(eager_config(), io.clone(), None);
    for _ in 0..3 {
        let report = mgr.tick(&db).await;
        assert_eq!(report.interruption_recoveries, 1);
    }
    let sent = io.sent_to(SESSION);
    assert_eq!(sent[0], "continue");
    assert!(sent[1].contains("hive pr submit --story S-1"));
    assert!(sent[2].contains("story S-1"));

    let report = mgr.tick(&db).await;
    assert_eq!(report.sessions_killed, 1);
    assert_eq!(report.escalations_created, 1);
    assert_eq!(io.killed(), vec![SESSION.to_string()]);

    let agent = db.read(|s| s.agent_by_session(SESSION)).unwrap().unwrap();
    assert!(!agent.is_live());
    let rows = db.read(|s| s.escalations()).unwrap();
    assert!(rows[0].reason.contains("interruption"));
    assert!(mgr.sessions().get(SESSION).is_none());
}

/// Test: Rate limit backoff waits between instructions
/// Given a rate-limited session and the default 90s base
/// When two ticks run back to back
/// Then only the first sends a sleep instruction
#[tokio::test]
async fn test_rate_limit_backoff_waits() {
    let io = ScriptedSessions::new();
    let db = Database::in_memory();
    working_pair(&db, SESSION, AgentTier::Junior, story());
    io.show(SESSION, RATE_LIMITED);

    let mut mgr = manager_with(Config::default(), io.clone(), None);
    let first = mgr.tick(&db).await;
    let second = mgr.tick(&db).await;

    assert_eq!(first.rate_limit_backoffs, 1);
    assert_eq!(second.rate_limit_backoffs, 0);
    assert_eq!(second.nudged, 0);
    let sent = io.sent_to(SESSION);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Sleep 90 seconds"));
}

// ========== Stuck nudges ==========

/// Test: Idle working agents are nudged, then escalated
/// Given a working agent sitting at an idle prompt
/// When ticks run with no thresholds
/// Then two nudges are sent and the third tick escalates once
#[tokio::test]
async fn test_stuck_agent_nudged_then_escalated() {
    let io = ScriptedSessions::new();
    let db = Database::in_memory();
    working_pair(&db, SESSION, AgentTier::Junior, story());
    io.show(SESSION, IDLE);

    let mut config = eager_config();
    config.manager.max_stuck_nudges = 2;
    let mut mgr = manager_with(config, io.clone(), None);

    assert_eq!(mgr.tick(&db).await.nudged, 1);
    assert_eq!(mgr.tick(&db).await.nudged, 1);
    let third = mgr.tick(&db).await;
    assert_eq!(third.nudged, 0);
    assert_eq!(third.escalations_created, 1);
    let fourth = mgr.tick(&db).await;
    assert_eq!(fourth.escalations_created, 0);

    assert_eq!(io.sent_to(SESSION).len(), 2);
    let rows = db.read(|s| s.escalations()).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].reason.starts_with("stuck"));
}

// ========== Completion follow-through ==========

/// Test: Finished work gets one submit reminder and one judge call
/// Given a session showing a finished summary and a judge that agrees
/// When two ticks run
/// Then one reminder is sent and the judge was called once
#[tokio::test]
async fn test_finished_work_reminded_and_judged_once() {
    let io = ScriptedSessions::new();
    let db = Database::in_memory();
    working_pair(&db, SESSION, AgentTier::Junior, story());
    io.show(SESSION, FINISHED);
    let judge = CountingJudge::replying(r#"{"done": true, "confidence": 0.9, "reason": "work finished"}"#);

    let mut mgr = manager_with(Config::default(), io.clone(), Some(judge.clone()));
    let first = mgr.tick(&db).await;
    let second = mgr.tick(&db).await;

    assert_eq!(first.completion_nudges, 1);
    assert_eq!(second.completion_nudges, 0);
    assert_eq!(judge.calls(), 1);
    let sent = io.sent_to(SESSION);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("hive pr submit --story S-1"));
}

/// Test: A queued PR progresses the story and frees the agent
/// Given a working agent whose story has a queued PR, and another planned story
/// When a tick runs
/// Then the story moves to pr_submitted and the agent is kicked off on the next story
#[tokio::test]
async fn test_queued_pr_progresses_and_reassigns() {
    let io = ScriptedSessions::new();
    let db = Database::in_memory();
    working_pair(&db, SESSION, AgentTier::Junior, story());
    seed_stories(&db, vec![Story::new("S-2", "core", "Add metrics").with_complexity(1)]);
    db.scoped(|s| {
        s.upsert_pull_request(PullRequest::new(
            "pr-1",
            StoryId::from("S-1"),
            "core",
            "story/s-1",
        ))
    })
    .unwrap();
    io.show(SESSION, IDLE);

    let mut mgr = manager_with(Config::default(), io.clone(), None);
    let report = mgr.tick(&db).await;

    assert_eq!(report.auto_progressed, 1);
    assert_eq!(report.planned_auto_assigned, 1);
    let s1 = db.read(|s| s.story(&StoryId::from("S-1"))).unwrap().unwrap();
    assert_eq!(s1.status, StoryStatus::PrSubmitted);
    let s2 = db.read(|s| s.story(&StoryId::from("S-2"))).unwrap().unwrap();
    assert_eq!(s2.status, StoryStatus::InProgress);
    assert!(io
        .sent_to(SESSION)
        .iter()
        .any(|t| t.contains("You are assigned story S-2")));
}

// ========== Lost sessions ==========

/// Test: A story whose session vanished is handed to a live agent
/// Given a working agent without a live session and an idle agent of the same tier
/// When a tick runs
/// Then the old agent is terminated and the story is reassigned
#[tokio::test]
async fn test_lost_session_story_reassigned() {
    let io = ScriptedSessions::new();
    let db = Database::in_memory();
    working_pair(&db, SESSION, AgentTier::Junior, story());
    idle_agent(&db, "hive-junior-core-2", AgentTier::Junior, "core");
    io.show("hive-junior-core-2", IDLE);

    let mut mgr = manager_with(Config::default(), io.clone(), None);
    let report = mgr.tick(&db).await;

    assert_eq!(report.orphans_reassigned, 1);
    let old = db.read(|s| s.agent_by_session(SESSION)).unwrap().unwrap();
    assert!(!old.is_live());
    let story = db.read(|s| s.story(&StoryId::from("S-1"))).unwrap().unwrap();
    assert_eq!(story.status, StoryStatus::InProgress);
    assert_eq!(story.assigned_agent_id.unwrap().as_str(), "hive-junior-core-2");
    assert_eq!(io.sent_to("hive-junior-core-2").len(), 1);
}
