//! Auto-assignment integration tests.
//!
//! These tests run the scheduler's assignment cycle against seeded stores:
//! dependency ordering, cycles, capacity, merge-queue saturation, scaling
//! through a fleet, and persistence across a reopened JSON store.

use std::sync::Arc;

use tempfile::TempDir;

use hive::config::{Config, SchedulerConfig};
use hive::core::{topological_sort, AgentTier, PullRequest, Story, StoryId, StoryStatus, TopoSort};
use hive::orchestration::{DependencyScheduler, Fleet};
use hive::store::{Database, JsonStore};

use super::fixtures::*;

fn status_of(db: &Database, id: &str) -> StoryStatus {
    db.read(|s| s.story(&StoryId::from(id)))
        .unwrap()
        .unwrap()
        .status
}

// ========== Ordering ==========

/// Test: Topological order respects in-set dependencies
/// Given C depends on B and B depends on A, supplied out of order
/// When the set is sorted
/// Then A comes before B and B before C
#[test]
fn test_chain_is_ordered() {
    let stories = vec![
        Story::new("C", "core", "c").depends_on("B"),
        Story::new("A", "core", "a").depends_on("OUTSIDE"),
        Story::new("B", "core", "b").depends_on("A"),
    ];
    let TopoSort::Order(order) = topological_sort(&stories) else {
        panic!("expected an order");
    };
    let pos = |id: &str| order.iter().position(|s| s.as_str() == id).unwrap();
    assert!(pos("A") < pos("B"));
    assert!(pos("B") < pos("C"));
    assert_eq!(order.len(), 3);
}

/// Test: A cycle yields no order whatever the input order
#[test]
fn test_cycle_has_no_order_in_any_input_order() {
    let a = Story::new("A", "core", "a").depends_on("C");
    let b = Story::new("B", "core", "b").depends_on("A");
    let c = Story::new("C", "core", "c").depends_on("B");
    for stories in [
        vec![a.clone(), b.clone(), c.clone()],
        vec![c.clone(), b.clone(), a.clone()],
        vec![b.clone(), a.clone(), c.clone()],
    ] {
        assert!(topological_sort(&stories).is_cycle());
    }
}

// ========== Assignment cycle ==========

/// Test: Dependent stories are pipelined over ticks
/// Given B depending on A and two idle juniors
/// When two assignment cycles run
/// Then A starts first and B starts once A is in progress
#[tokio::test]
async fn test_dependent_story_waits_one_cycle() {
    let db = Database::in_memory();
    seed_stories(
        &db,
        vec![
            Story::new("A", "core", "a").with_complexity(2),
            Story::new("B", "core", "b").with_complexity(2).depends_on("A"),
        ],
    );
    idle_agent(&db, "hive-junior-core-1", AgentTier::Junior, "core");
    idle_agent(&db, "hive-junior-core-2", AgentTier::Junior, "core");
    let scheduler = DependencyScheduler::new(SchedulerConfig::default());

    let first = scheduler.run_auto_assignment(&db, None).await;
    assert_eq!(first.assigned.len(), 1);
    assert_eq!(first.assigned[0].story.id.as_str(), "A");
    assert_eq!(status_of(&db, "B"), StoryStatus::Planned);

    let second = scheduler.run_auto_assignment(&db, None).await;
    assert_eq!(second.assigned.len(), 1);
    assert_eq!(status_of(&db, "B"), StoryStatus::InProgress);
}

/// Test: A cycle holds the whole candidate set
/// Given A and B depending on each other plus an unrelated C
/// When an assignment cycle runs
/// Then nothing is assigned, including C
#[tokio::test]
async fn test_cycle_holds_scheduling() {
    let db = Database::in_memory();
    seed_stories(
        &db,
        vec![
            Story::new("A", "core", "a").depends_on("B"),
            Story::new("B", "core", "b").depends_on("A"),
            Story::new("C", "core", "c"),
        ],
    );
    idle_agent(&db, "hive-junior-core-1", AgentTier::Junior, "core");

    let report = DependencyScheduler::new(SchedulerConfig::default())
        .run_auto_assignment(&db, None)
        .await;
    assert!(report.held_for_cycle.is_some());
    assert!(report.assigned.is_empty());
    assert_eq!(status_of(&db, "C"), StoryStatus::Planned);
}

/// Test: Nothing planned skips the cycle entirely
#[tokio::test]
async fn test_nothing_planned_skips_scaling() {
    let db = Database::in_memory();
    seed_stories(&db, vec![Story::new("A", "core", "a").with_status(StoryStatus::Merged)]);
    let fleet = RecordingFleet::new();

    let report = DependencyScheduler::new(SchedulerConfig::default())
        .run_auto_assignment(&db, Some(fleet.as_ref() as &dyn Fleet))
        .await;
    assert!(report.skipped);
    assert!(fleet.spawned().is_empty());
}

/// Test: A saturated merge queue holds only its own team
/// Given team core at its PR limit and team web empty
/// When an assignment cycle runs
/// Then only the web story is assigned
#[tokio::test]
async fn test_saturated_team_held() {
    let db = Database::in_memory();
    seed_stories(
        &db,
        vec![
            Story::new("CORE-1", "core", "core work"),
            Story::new("WEB-1", "web", "web work"),
        ],
    );
    idle_agent(&db, "hive-junior-core-1", AgentTier::Junior, "core");
    idle_agent(&db, "hive-junior-web-1", AgentTier::Junior, "web");
    db.scoped(|s| {
        s.upsert_pull_request(PullRequest::new("pr-1", StoryId::from("OLD"), "core", "story/old"))
    })
    .unwrap();

    let mut config = SchedulerConfig::default();
    config.max_queued_prs_per_team = 1;
    let report = DependencyScheduler::new(config).run_auto_assignment(&db, None).await;

    assert_eq!(report.saturated_teams, vec!["core".to_string()]);
    assert_eq!(report.assigned.len(), 1);
    assert_eq!(status_of(&db, "WEB-1"), StoryStatus::InProgress);
    assert_eq!(status_of(&db, "CORE-1"), StoryStatus::Planned);
}

// ========== Scaling ==========

/// Test: Demand without agents spawns and assigns in one tick
/// Given two junior stories and no agents
/// When the manager ticks with a fleet
/// Then two agents are spawned, registered, assigned and kicked off
#[tokio::test]
async fn test_scaling_spawns_then_assigns() {
    let io = ScriptedSessions::new();
    let db = Database::in_memory();
    seed_stories(
        &db,
        vec![
            Story::new("W-1", "web", "one").with_complexity(2),
            Story::new("W-2", "web", "two").with_complexity(3),
        ],
    );
    let fleet = RecordingFleet::new();

    let mut mgr = manager_with(Config::default(), io.clone(), None)
        .with_fleet(fleet.clone() as Arc<dyn Fleet>);
    let report = mgr.run_check_cycle(&[], &db).await;

    assert_eq!(report.agents_spawned, 2);
    assert_eq!(report.planned_auto_assigned, 2);
    assert_eq!(fleet.spawned().len(), 2);
    for session in fleet.spawned() {
        assert_eq!(io.sent_to(&session).len(), 1);
    }
    let agents = db.read(|s| s.agents()).unwrap();
    assert!(agents.iter().all(|a| a.tier == AgentTier::Junior && a.current_story_id.is_some()));
}

/// Test: Scaling respects the per-tier bound
#[tokio::test]
async fn test_scaling_bounded_per_tier() {
    let db = Database::in_memory();
    seed_stories(
        &db,
        (1..=5)
            .map(|i| Story::new(format!("W-{}", i), "web", "w").with_complexity(1))
            .collect(),
    );
    let fleet = RecordingFleet::new();
    let mut config = SchedulerConfig::default();
    config.max_agents_per_tier = 2;

    let report = DependencyScheduler::new(config)
        .run_auto_assignment(&db, Some(fleet.as_ref() as &dyn Fleet))
        .await;
    assert_eq!(report.agents_spawned, 2);
    assert_eq!(report.assigned.len(), 2);
}

// ========== Persistence ==========

/// Test: Assignments survive reopening the JSON store
#[tokio::test]
async fn test_json_store_keeps_assignments() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hive.json");
    let db = Database::new(JsonStore::open(&path).unwrap());
    seed_stories(&db, vec![Story::new("A", "core", "a").with_complexity(9)]);
    idle_agent(&db, "hive-senior-core-1", AgentTier::Senior, "core");

    let report = DependencyScheduler::new(SchedulerConfig::default())
        .run_auto_assignment(&db, None)
        .await;
    assert_eq!(report.assigned.len(), 1);
    drop(db);

    let reopened = Database::new(JsonStore::open(&path).unwrap());
    assert_eq!(status_of(&reopened, "A"), StoryStatus::InProgress);
    let agent = reopened
        .read(|s| s.agent_by_session("hive-senior-core-1"))
        .unwrap()
        .unwrap();
    assert_eq!(agent.current_story_id, Some(StoryId::from("A")));
}
