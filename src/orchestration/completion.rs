//! Completion classification: is a session's latest output finished work?
//!
//! Two stages. A cheap pre-filter counts structural completion signals (a
//! testing section, a numbered next-steps list, PR submission, passing tests)
//! and blocked markers without calling anything external. Output with enough
//! signals is a *candidate* and goes to the [`CompletionJudge`].
//!
//! Judge verdicts are cached per (session, story, fingerprint) and never
//! expire; an unchanged screen is judged at most once. When the judge is
//! unreachable the heuristic verdict is used and cached only until
//! `unavailable_retry` elapses.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::CompletionConfig;
use crate::core::StoryId;
use crate::orchestration::judge::{build_judge_prompt, parse_judge_reply, CompletionJudge};
use crate::util::{fingerprint, with_timeout};

/// Verdict on one output snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionAssessment {
    pub done: bool,
    pub confidence: f32,
    pub reason: String,
    pub used_ai: bool,
}

struct Signal {
    name: &'static str,
    re: Regex,
}

fn signal(name: &'static str, pattern: &str) -> Signal {
    Signal {
        name,
        re: Regex::new(pattern).unwrap(),
    }
}

static COMPLETION_SIGNALS: LazyLock<Vec<Signal>> = LazyLock::new(|| {
    vec![
        signal(
            "testing section",
            r"(?im)^\s*(#+\s*)?(\*\*)?(testing|tests|test results)(\*\*)?\s*:",
        ),
        signal(
            "numbered next steps",
            r"(?is)next steps\s*:?\s*(\*\*)?\s*\n\s*1[.)]\s+\S",
        ),
        signal(
            "pr submission",
            r"(?i)(\b(pr|pull request) (submitted|created|opened)|submit(ted|ting)? (a |the )?(pr|pull request)|hive pr submit|ready (for|to) (review|submit|merge))",
        ),
        signal(
            "implementation complete",
            r"(?i)(implementation (is )?(complete|finished|done)|successfully implemented|all (acceptance criteria|tasks) (are )?(met|done|complete)|story (is )?complete)",
        ),
        signal(
            "tests passing",
            r"(?i)(all (\d+ )?tests? pass(ed|ing)?|tests? (are )?(now )?passing|test result: ok|\b\d+ passed[;,]? 0 failed)",
        ),
    ]
});

static BLOCKED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(blocked (on|by)|cannot proceed|can't proceed|unable to (continue|proceed|complete)|waiting (on|for) (clarification|approval|access|credentials)|need(s)? (your )?(input|clarification|help)|tests? (are )?(still )?failing|\b[1-9]\d* failed|build failed|compilation (error|failed))",
    )
    .unwrap()
});

/// Post-work summary phrasing inside a judge's own reason.
static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(summar(y|izes|izing) (of )?(the )?(completed|finished|implemented)? ?(work|changes|implementation)|implementation (is )?(complete|completed|finished)|completed (the )?implementation|work (is )?(complete|completed|finished))",
    )
    .unwrap()
});

static TEST_STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(tests? (pass|passing|passed|status|results?)|testing (section|status))").unwrap()
});

static NEXT_STEPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)next steps").unwrap());

/// Explicit denial of finality; never overridden.
static DENIAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(not (yet )?(done|finished|complete|completed|ready)|incomplete|unfinished|still (needs|has|working|in progress|pending|failing)|remaining (work|tasks|items)|work in progress|\bwip\b|has not been|hasn't been|blocked|failing)",
    )
    .unwrap()
});

/// Result of the pre-filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeuristicScan {
    pub signals: Vec<&'static str>,
    pub blocked: Option<String>,
}

impl HeuristicScan {
    pub fn scan(text: &str) -> Self {
        let signals = COMPLETION_SIGNALS
            .iter()
            .filter(|s| s.re.is_match(text))
            .map(|s| s.name)
            .collect();
        let blocked = BLOCKED_RE.find(text).map(|m| m.as_str().to_string());
        Self { signals, blocked }
    }

    pub fn is_candidate(&self, min_signals: usize) -> bool {
        self.signals.len() >= min_signals.max(1)
    }

    /// The verdict used without a judge.
    pub fn verdict(&self, min_signals: usize) -> (bool, f32, String) {
        if let Some(marker) = &self.blocked {
            return (false, 0.7, format!("reads as blocked (\"{}\")", marker));
        }
        if self.is_candidate(min_signals) {
            let confidence = (0.5 + 0.05 * self.signals.len() as f32).min(0.75);
            (
                true,
                confidence,
                format!("completion signals: {}", self.signals.join(", ")),
            )
        } else if self.signals.is_empty() {
            (false, 0.8, "no completion signals".to_string())
        } else {
            (
                false,
                0.6,
                format!("too few completion signals: {}", self.signals.join(", ")),
            )
        }
    }
}

/// Whether a judge's "not done" reason actually describes a finished summary.
pub fn reason_describes_finished_work(reason: &str) -> bool {
    !DENIAL_RE.is_match(reason)
        && SUMMARY_RE.is_match(reason)
        && (TEST_STATUS_RE.is_match(reason) || NEXT_STEPS_RE.is_match(reason))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    session: String,
    story: Option<StoryId>,
    fingerprint: String,
}

struct CacheEntry {
    assessment: CompletionAssessment,
    /// Fallback verdicts are retried after this instant.
    retry_at: Option<Instant>,
}

#[derive(Default)]
struct CompletionCache {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
}

impl CompletionCache {
    fn get(&self, key: &CacheKey, now: Instant) -> Option<CompletionAssessment> {
        let entry = self.entries.get(key)?;
        match entry.retry_at {
            Some(at) if now >= at => None,
            _ => Some(entry.assessment.clone()),
        }
    }

    fn insert(&mut self, key: CacheKey, entry: CacheEntry, capacity: usize) {
        if self.entries.insert(key.clone(), entry).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > capacity.max(1) {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Heuristic + judge completion classifier with a fingerprint cache.
pub struct CompletionClassifier {
    config: CompletionConfig,
    judge: Option<Arc<dyn CompletionJudge>>,
    cache: Mutex<CompletionCache>,
}

impl CompletionClassifier {
    pub fn new(config: CompletionConfig, judge: Option<Arc<dyn CompletionJudge>>) -> Self {
        Self {
            config,
            judge,
            cache: Mutex::new(CompletionCache::default()),
        }
    }

    /// Classifier that never calls out.
    pub fn heuristic_only(config: CompletionConfig) -> Self {
        Self::new(config, None)
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    /// Drop every cached verdict.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().entries.len()
    }

    /// Judge whether `output` from `session` is finished work on `story`.
    pub async fn classify(
        &self,
        session: &str,
        story: Option<&StoryId>,
        output: &str,
    ) -> CompletionAssessment {
        let key = CacheKey {
            session: session.to_string(),
            story: story.cloned(),
            fingerprint: fingerprint(output.trim()),
        };
        if let Some(hit) = self.cache.lock().get(&key, Instant::now()) {
            debug!(session, "completion cache hit");
            return hit;
        }

        let scan = HeuristicScan::scan(output);
        let (assessment, retry_at) = self.assess(session, story, output, &scan).await;
        self.cache.lock().insert(
            key,
            CacheEntry {
                assessment: assessment.clone(),
                retry_at,
            },
            self.config.cache_capacity,
        );
        assessment
    }

    async fn assess(
        &self,
        session: &str,
        story: Option<&StoryId>,
        output: &str,
        scan: &HeuristicScan,
    ) -> (CompletionAssessment, Option<Instant>) {
        let min = self.config.min_heuristic_signals;
        let (h_done, h_conf, h_reason) = scan.verdict(min);

        if !scan.is_candidate(min) {
            return (
                CompletionAssessment {
                    done: false,
                    confidence: h_conf,
                    reason: h_reason,
                    used_ai: false,
                },
                None,
            );
        }

        let judge = match (&self.judge, self.config.ai_enabled) {
            (Some(judge), true) => judge,
            _ => {
                return (
                    CompletionAssessment {
                        done: h_done,
                        confidence: h_conf,
                        reason: format!("heuristic only: {}", h_reason),
                        used_ai: false,
                    },
                    None,
                )
            }
        };

        let prompt = build_judge_prompt(story.map(|s| s.as_str()), output);
        let reply = with_timeout(self.config.classifier_timeout(), judge.judge(&prompt)).await;
        let verdict = reply.and_then(|text| parse_judge_reply(&text));

        match verdict {
            Ok(v) => {
                if !v.done && reason_describes_finished_work(&v.reason) {
                    let confidence = v.confidence.max(self.config.override_floor);
                    info!(session, confidence, "judge verdict overridden to done");
                    return (
                        CompletionAssessment {
                            done: true,
                            confidence,
                            reason: format!(
                                "{} (overridden: reason describes a finished work summary)",
                                v.reason
                            ),
                            used_ai: true,
                        },
                        None,
                    );
                }
                (
                    CompletionAssessment {
                        done: v.done,
                        confidence: v.confidence,
                        reason: v.reason,
                        used_ai: true,
                    },
                    None,
                )
            }
            Err(e) => {
                warn!(session, error = %e, "completion judge unavailable, using heuristic");
                // a blocked heuristic stays not-done
                (
                    CompletionAssessment {
                        done: h_done && scan.blocked.is_none(),
                        confidence: h_conf,
                        reason: format!("classifier unavailable ({}); {}", e, h_reason),
                        used_ai: false,
                    },
                    Some(Instant::now() + self.config.unavailable_retry()),
                )
            }
        }
    }
}

impl std::fmt::Debug for CompletionClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClassifier")
            .field("config", &self.config)
            .field("has_judge", &self.judge.is_some())
            .finish_non_exhaustive()
    }
}
