//! Per-team merge queue over pending pull requests.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::PullRequest;

/// Queued and reviewing PRs of `team`, oldest first.
pub fn team_queue<'a>(prs: &'a [PullRequest], team: &str) -> Vec<&'a PullRequest> {
    let mut queue: Vec<&PullRequest> = prs
        .iter()
        .filter(|pr| pr.team == team && pr.status.is_pending())
        .collect();
    queue.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    queue
}

/// 1-indexed position of `pr_id` in its team's queue, or -1 when it is not
/// queued or reviewing.
pub fn queue_position(prs: &[PullRequest], pr_id: &str) -> i64 {
    let Some(pr) = prs.iter().find(|p| p.id == pr_id) else {
        return -1;
    };
    if !pr.status.is_pending() {
        return -1;
    }
    team_queue(prs, &pr.team)
        .iter()
        .position(|p| p.id == pr_id)
        .map(|i| i as i64 + 1)
        .unwrap_or(-1)
}

/// Pending PR count per team.
pub fn queue_depths(prs: &[PullRequest]) -> BTreeMap<String, usize> {
    let mut depths = BTreeMap::new();
    for pr in prs.iter().filter(|pr| pr.status.is_pending()) {
        *depths.entry(pr.team.clone()).or_insert(0) += 1;
    }
    depths
}

/// Teams whose queue has reached `max_queued`.
pub fn saturated_teams(prs: &[PullRequest], max_queued: usize) -> BTreeSet<String> {
    queue_depths(prs)
        .into_iter()
        .filter(|(_, depth)| *depth >= max_queued)
        .map(|(team, _)| team)
        .collect()
}
