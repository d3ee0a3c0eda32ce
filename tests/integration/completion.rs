//! Completion classifier integration tests.
//!
//! These tests run the classifier against a counting judge to check the
//! fingerprint cache, the override rule and the fallback when the judge
//! cannot be reached.

use std::sync::Arc;

use hive::config::CompletionConfig;
use hive::core::StoryId;
use hive::orchestration::{CompletionClassifier, CompletionJudge};

use super::fixtures::*;

fn classifier(judge: &Arc<CountingJudge>) -> CompletionClassifier {
    CompletionClassifier::new(
        CompletionConfig::default(),
        Some(judge.clone() as Arc<dyn CompletionJudge>),
    )
}

// ========== Cache ==========

/// Test: Identical output is judged at most once
/// Given the same (session, story, output) classified twice
/// When the second call runs
/// Then it is served from the cache
#[tokio::test]
async fn test_identical_output_judged_once() {
    let judge = CountingJudge::replying(r#"{"done": true, "confidence": 0.92, "reason": "finished"}"#);
    let c = classifier(&judge);
    let story = StoryId::from("S-1");

    let first = c.classify("hive-junior-core-1", Some(&story), FINISHED).await;
    let second = c.classify("hive-junior-core-1", Some(&story), FINISHED).await;
    assert_eq!(first, second);
    assert!(first.done && first.used_ai);
    assert_eq!(judge.calls(), 1);

    c.classify("hive-junior-core-2", Some(&story), FINISHED).await;
    assert_eq!(judge.calls(), 2);

    c.clear_cache();
    c.classify("hive-junior-core-1", Some(&story), FINISHED).await;
    assert_eq!(judge.calls(), 3);
}

/// Test: Output without completion signals never reaches the judge
#[tokio::test]
async fn test_non_candidate_not_judged() {
    let judge = CountingJudge::replying(r#"{"done": true}"#);
    let c = classifier(&judge);
    let verdict = c.classify("hive-junior-core-1", None, IDLE).await;
    assert!(!verdict.done);
    assert!(!verdict.used_ai);
    assert_eq!(judge.calls(), 0);
}

// ========== Override rule ==========

/// Test: A "not done" verdict describing a finished summary is overridden
#[tokio::test]
async fn test_summary_reason_overridden() {
    let judge = CountingJudge::replying(
        r#"{"done": false, "confidence": 0.6, "reason": "This is a summary of the completed work: tests pass and next steps are listed."}"#,
    );
    let verdict = classifier(&judge).classify("hive-s-1", None, FINISHED).await;
    assert!(verdict.done);
    assert!(verdict.confidence >= 0.84);
    assert!(verdict.reason.contains("overridden"));
}

/// Test: A reason denying finality is never overridden
#[tokio::test]
async fn test_denial_never_overridden() {
    let judge = CountingJudge::replying(
        r#"{"done": false, "confidence": 0.7, "reason": "Summary of the completed work, but tests are still failing."}"#,
    );
    let verdict = classifier(&judge).classify("hive-s-1", None, FINISHED).await;
    assert!(!verdict.done);
    assert!(!verdict.reason.contains("overridden"));
}

// ========== Fallback ==========

/// Test: An unreachable judge falls back to the heuristic
#[tokio::test]
async fn test_unavailable_judge_falls_back() {
    let judge = CountingJudge::unavailable();
    let verdict = classifier(&judge).classify("hive-s-1", None, FINISHED).await;
    assert!(verdict.done);
    assert!(!verdict.used_ai);
    assert!(verdict.reason.contains("classifier unavailable"));
}

/// Test: A blocked heuristic is never promoted in fallback
#[tokio::test]
async fn test_blocked_output_stays_not_done_in_fallback() {
    let judge = CountingJudge::unavailable();
    let blocked = format!("{}\nBuild failed: missing credentials for the registry.", FINISHED);
    let verdict = classifier(&judge).classify("hive-s-1", None, &blocked).await;
    assert!(!verdict.done);
    assert!(!verdict.used_ai);
}
