//! Dependency-aware scheduling of backlog stories onto agents.
//!
//! Each auto-assignment cycle works on the planned, unassigned stories:
//!
//! 1. If there are none, the cycle is skipped entirely.
//! 2. The candidate set is ordered topologically. A cycle inside the set
//!    holds scheduling for the whole set; existing assignments are untouched.
//! 3. Scaling check: teams whose ready demand exceeds their idle agents get
//!    new agents from the [`Fleet`], bounded per tier.
//! 4. Merge-queue check: saturated teams receive no new work this tick.
//! 5. Ready stories are routed to a tier by complexity and handed to an idle
//!    agent of that tier and team. Seniors are bounded by `senior_capacity`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::{
    topological_sort, Agent, AgentTier, Story, StoryId, StoryStatus, TopoSort,
};
use crate::orchestration::fleet::Fleet;
use crate::orchestration::merge_queue::saturated_teams;
use crate::store::{Database, Store};
use crate::Result;

/// True iff every dependency exists and is merged or in progress.
pub fn are_dependencies_satisfied(story: &Story, stories: &[Story]) -> bool {
    story.depends_on.iter().all(|dep| {
        stories
            .iter()
            .find(|s| &s.id == dep)
            .is_some_and(|s| s.status.satisfies_dependency())
    })
}

/// Tier for a complexity score. Never returns tech lead or QA.
pub fn route_tier(complexity: u8, config: &SchedulerConfig) -> AgentTier {
    if complexity <= config.junior_max_complexity {
        AgentTier::Junior
    } else if complexity <= config.intermediate_max_complexity {
        AgentTier::Intermediate
    } else {
        AgentTier::Senior
    }
}

/// Agents to start for one team and tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub team: String,
    pub tier: AgentTier,
    pub count: usize,
}

/// A story just handed to an agent session.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub session: String,
    pub story: Story,
}

/// Candidate stories after ordering.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadySet {
    /// Ready stories in dependency order.
    Ready(Vec<Story>),
    /// The candidate set contains a cycle through this story.
    Held(StoryId),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentReport {
    /// No planned, unassigned stories existed.
    pub skipped: bool,
    pub held_for_cycle: Option<StoryId>,
    pub saturated_teams: Vec<String>,
    pub agents_spawned: usize,
    pub assigned: Vec<Assignment>,
    pub duplicates_prevented: usize,
    pub capacity_skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DependencyScheduler {
    config: SchedulerConfig,
}

impl DependencyScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn route(&self, story: &Story) -> AgentTier {
        route_tier(story.complexity_score, &self.config)
    }

    /// Planned, unassigned stories ordered by dependencies, filtered to the ready ones.
    pub fn ready_set(&self, stories: &[Story]) -> ReadySet {
        let candidates: Vec<Story> = stories.iter().filter(|s| s.is_assignable()).cloned().collect();
        match topological_sort(&candidates) {
            TopoSort::Cycle(id) => ReadySet::Held(id),
            TopoSort::Order(order) => ReadySet::Ready(
                order
                    .iter()
                    .filter_map(|id| candidates.iter().find(|s| &s.id == id))
                    .filter(|s| are_dependencies_satisfied(s, stories))
                    .cloned()
                    .collect(),
            ),
        }
    }

    fn busy_seniors(agents: &[Agent]) -> usize {
        agents
            .iter()
            .filter(|a| a.tier == AgentTier::Senior && a.is_live() && a.current_story_id.is_some())
            .count()
    }

    /// Agents the fleet should start so ready demand can be served.
    pub fn scaling_needs(&self, store: &dyn Store) -> Result<Vec<SpawnRequest>> {
        let stories = store.stories()?;
        let ReadySet::Ready(ready) = self.ready_set(&stories) else {
            return Ok(Vec::new());
        };
        let agents = store.agents()?;
        let saturated = saturated_teams(&store.pull_requests()?, self.config.max_queued_prs_per_team);

        let mut demand: BTreeMap<(String, &'static str), (AgentTier, usize)> = BTreeMap::new();
        for story in ready.iter().filter(|s| !saturated.contains(&s.team)) {
            let tier = self.route(story);
            demand
                .entry((story.team.clone(), tier.as_str()))
                .or_insert((tier, 0))
                .1 += 1;
        }

        let mut senior_room = self
            .config
            .senior_capacity
            .saturating_sub(Self::busy_seniors(&agents));
        let mut needs = Vec::new();
        for ((team, _), (tier, mut wanted)) in demand {
            if tier == AgentTier::Senior {
                wanted = wanted.min(senior_room);
            }
            let of_kind = agents
                .iter()
                .filter(|a| a.team == team && a.tier == tier && a.is_live());
            let total = of_kind.clone().count();
            let idle = of_kind.filter(|a| a.is_available()).count();
            if tier == AgentTier::Senior {
                senior_room = senior_room.saturating_sub(wanted);
            }
            if wanted <= idle {
                continue;
            }
            let count = (wanted - idle).min(self.config.max_agents_per_tier.saturating_sub(total));
            if count > 0 {
                needs.push(SpawnRequest { team, tier, count });
            }
        }
        Ok(needs)
    }

    /// Assign ready stories to idle agents inside one unit of work.
    pub fn assign_ready(&self, store: &mut dyn Store) -> Result<AssignmentReport> {
        let mut report = AssignmentReport::default();
        let stories = store.stories()?;
        if !stories.iter().any(|s| s.is_assignable()) {
            report.skipped = true;
            return Ok(report);
        }

        let saturated: BTreeSet<String> =
            saturated_teams(&store.pull_requests()?, self.config.max_queued_prs_per_team);
        for team in &saturated {
            info!(team = %team, "merge queue saturated, holding new assignments");
        }
        report.saturated_teams = saturated.iter().cloned().collect();

        let ready = match self.ready_set(&stories) {
            ReadySet::Held(id) => {
                warn!(story = %id, "dependency cycle among planned stories, holding scheduling");
                report.held_for_cycle = Some(id);
                return Ok(report);
            }
            ReadySet::Ready(ready) => ready,
        };

        let mut agents = store.agents()?;
        let mut busy_seniors = Self::busy_seniors(&agents);

        for story in ready {
            if saturated.contains(&story.team) {
                continue;
            }
            let Some(mut current) = store.story(&story.id)? else {
                continue;
            };
            if !current.is_assignable() {
                report.duplicates_prevented += 1;
                continue;
            }
            if let Some(holder) = agents
                .iter()
                .find(|a| a.is_live() && a.current_story_id.as_ref() == Some(&story.id))
            {
                // agent row already claims the story; repair the story row instead
                debug!(story = %story.id, agent = %holder.id, "story already held, not reassigning");
                report.duplicates_prevented += 1;
                let holder_id = holder.id.clone();
                if let Err(e) = current.start(&holder_id).and_then(|_| store.upsert_story(current)) {
                    report.errors.push(format!("{}: {}", story.id, e));
                }
                continue;
            }

            let tier = self.route(&story);
            if tier == AgentTier::Senior && busy_seniors >= self.config.senior_capacity {
                debug!(story = %story.id, "senior capacity reached");
                report.capacity_skipped += 1;
                continue;
            }
            let Some(idx) = agents
                .iter()
                .position(|a| a.team == story.team && a.tier == tier && a.is_available())
            else {
                debug!(story = %story.id, tier = %tier, "no idle agent");
                continue;
            };

            let mut agent = agents[idx].clone();
            match apply_assignment(store, &mut current, &mut agent) {
                Ok(()) => {
                    info!(story = %story.id, agent = %agent.id, tier = %tier, "story assigned");
                    report.assigned.push(Assignment {
                        session: agent.tmux_session.clone(),
                        story: current,
                    });
                    agents[idx] = agent;
                    if tier == AgentTier::Senior {
                        busy_seniors += 1;
                    }
                }
                Err(e) => {
                    warn!(story = %story.id, error = %e, "assignment failed");
                    report.errors.push(format!("{}: {}", story.id, e));
                }
            }
        }
        Ok(report)
    }

    /// Hand in-progress stories whose agent is gone to an idle agent of the routed tier.
    pub fn reassign_orphans(&self, store: &mut dyn Store) -> Result<Vec<Assignment>> {
        let stories = store.stories_with_status(StoryStatus::InProgress)?;
        let mut agents = store.agents()?;
        let mut busy_seniors = Self::busy_seniors(&agents);
        let mut reassigned = Vec::new();

        for mut story in stories {
            let previous = story
                .assigned_agent_id
                .as_ref()
                .and_then(|id| agents.iter().position(|a| &a.id == id));
            if previous.is_some_and(|i| agents[i].is_live()) {
                continue;
            }
            let tier = self.route(&story);
            if tier == AgentTier::Senior && busy_seniors >= self.config.senior_capacity {
                continue;
            }
            let Some(idx) = agents
                .iter()
                .position(|a| a.team == story.team && a.tier == tier && a.is_available())
            else {
                continue;
            };

            let mut agent = agents[idx].clone();
            agent.assign(&story.id)?;
            story.assigned_agent_id = Some(agent.id.clone());
            story.updated_at = Utc::now();
            store.upsert_story(story.clone())?;
            store.upsert_agent(agent.clone())?;
            if let Some(i) = previous.filter(|&i| agents[i].current_story_id.as_ref() == Some(&story.id)) {
                let mut old = agents[i].clone();
                old.release();
                store.upsert_agent(old.clone())?;
                agents[i] = old;
            }
            info!(story = %story.id, agent = %agent.id, "orphaned story reassigned");
            reassigned.push(Assignment {
                session: agent.tmux_session.clone(),
                story,
            });
            agents[idx] = agent;
            if tier == AgentTier::Senior {
                busy_seniors += 1;
            }
        }
        Ok(reassigned)
    }

    /// One auto-assignment cycle: skip check, scaling, merge queue, assignment.
    ///
    /// Spawning runs between two short units of work so the store is never
    /// locked while a session starts.
    pub async fn run_auto_assignment(
        &self,
        db: &Database,
        fleet: Option<&dyn Fleet>,
    ) -> AssignmentReport {
        let mut report = AssignmentReport::default();
        let needs = db.read(|store| {
            if !store.stories()?.iter().any(|s| s.is_assignable()) {
                return Ok(None);
            }
            self.scaling_needs(store).map(Some)
        });
        let needs = match needs {
            Ok(Some(needs)) => needs,
            Ok(None) => {
                report.skipped = true;
                return report;
            }
            Err(e) => {
                report.errors.push(format!("scaling check: {}", e));
                Vec::new()
            }
        };

        let mut spawned = 0;
        let mut spawn_errors = Vec::new();
        if let Some(fleet) = fleet {
            for request in &needs {
                for _ in 0..request.count {
                    let agent = match fleet.spawn_agent(request.tier, &request.team).await {
                        Ok(agent) => agent,
                        Err(e) => {
                            warn!(team = %request.team, tier = %request.tier, error = %e, "spawn failed");
                            spawn_errors.push(format!("spawn {} {}: {}", request.tier, request.team, e));
                            break;
                        }
                    };
                    match db.scoped(|store| store.upsert_agent(agent)) {
                        Ok(()) => spawned += 1,
                        Err(e) => spawn_errors.push(format!("register agent: {}", e)),
                    }
                }
            }
        } else if !needs.is_empty() {
            debug!(requests = needs.len(), "scaling needed but no fleet configured");
        }

        match db.scoped(|store| self.assign_ready(store)) {
            Ok(assigned) => {
                let mut errors = std::mem::take(&mut report.errors);
                errors.extend(spawn_errors);
                errors.extend(assigned.errors.iter().cloned());
                report = AssignmentReport {
                    agents_spawned: spawned,
                    errors,
                    ..assigned
                };
            }
            Err(e) => {
                report.agents_spawned = spawned;
                report.errors.extend(spawn_errors);
                report.errors.push(format!("assignment: {}", e));
            }
        }
        report
    }
}

fn apply_assignment(store: &mut dyn Store, story: &mut Story, agent: &mut Agent) -> Result<()> {
    story.start(&agent.id)?;
    agent.assign(&story.id)?;
    store.upsert_story(story.clone())?;
    store.upsert_agent(agent.clone())
}
