//! Story dependency graph.
//!
//! The graph is always built from a candidate subset of the backlog. Edges
//! pointing at stories outside the subset are dropped: those dependencies are
//! treated as already satisfied for ordering purposes (satisfaction proper is
//! checked separately against persisted status).

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::core::story::{Story, StoryId};

/// Outcome of ordering a candidate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopoSort {
    /// Every story appears after all of its in-set dependencies.
    Order(Vec<StoryId>),
    /// The set contains a cycle through this story; hold scheduling for the set.
    Cycle(StoryId),
}

impl TopoSort {
    pub fn order(&self) -> Option<&[StoryId]> {
        match self {
            TopoSort::Order(order) => Some(order),
            TopoSort::Cycle(_) => None,
        }
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, TopoSort::Cycle(_))
    }
}

/// Dependency graph over a candidate story set.
///
/// An edge `a -> b` means `b` depends on `a`.
pub struct StoryGraph {
    graph: DiGraph<StoryId, ()>,
    index: HashMap<StoryId, NodeIndex>,
}

impl StoryGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Build the graph restricted to `stories`. Duplicate ids collapse to one node.
    pub fn from_stories<'a, I>(stories: I) -> Self
    where
        I: IntoIterator<Item = &'a Story>,
    {
        let stories: Vec<&Story> = stories.into_iter().collect();
        let mut graph = Self::new();
        for story in &stories {
            graph.add_story(&story.id);
        }
        for story in &stories {
            for dep in &story.depends_on {
                graph.add_dependency(dep, &story.id);
            }
        }
        graph
    }

    pub fn add_story(&mut self, id: &StoryId) -> NodeIndex {
        if let Some(&index) = self.index.get(id) {
            return index;
        }
        let index = self.graph.add_node(id.clone());
        self.index.insert(id.clone(), index);
        index
    }

    /// Record that `dependent` depends on `dependency`.
    ///
    /// Returns `false` (and records nothing) when either end is outside the set.
    pub fn add_dependency(&mut self, dependency: &StoryId, dependent: &StoryId) -> bool {
        match (self.index.get(dependency), self.index.get(dependent)) {
            (Some(&from), Some(&to)) => {
                if self.graph.find_edge(from, to).is_none() {
                    self.graph.add_edge(from, to, ());
                }
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, id: &StoryId) -> bool {
        self.index.contains_key(id)
    }

    pub fn story_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// In-set dependencies of a story.
    pub fn dependencies(&self, id: &StoryId) -> Vec<&StoryId> {
        self.neighbors(id, petgraph::Direction::Incoming)
    }

    /// In-set stories that depend on this one.
    pub fn dependents(&self, id: &StoryId) -> Vec<&StoryId> {
        self.neighbors(id, petgraph::Direction::Outgoing)
    }

    fn neighbors(&self, id: &StoryId, dir: petgraph::Direction) -> Vec<&StoryId> {
        match self.index.get(id) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, dir)
                .filter_map(|n| self.graph.node_weight(n))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Topological order of the set, or the cycle that prevents one.
    pub fn topological_order(&self) -> TopoSort {
        match toposort(&self.graph, None) {
            Ok(sorted) => TopoSort::Order(
                sorted
                    .into_iter()
                    .filter_map(|index| self.graph.node_weight(index).cloned())
                    .collect(),
            ),
            Err(cycle) => TopoSort::Cycle(
                self.graph
                    .node_weight(cycle.node_id())
                    .cloned()
                    .unwrap_or_else(|| StoryId::new("unknown")),
            ),
        }
    }
}

impl Default for StoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StoryGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryGraph")
            .field("stories", &self.story_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

/// Order `stories` so that every story follows its in-set dependencies.
pub fn topological_sort(stories: &[Story]) -> TopoSort {
    StoryGraph::from_stories(stories).topological_order()
}
