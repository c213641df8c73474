//! Resource dependency graph
//!
//! Actions can only depend on actions already in the graph, so a graph
//! built through `add` is acyclic by construction. `topological_order` still
//! checks for cycles and reports the stuck actions before anything runs.
//!
//! Ordering uses Kahn's algorithm with a min-heap on insertion index: when
//! several actions are ready, the one added first runs first.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use super::action::{Action, ActionId};
use super::PlanError;

#[derive(Debug, Clone)]
struct Node {
    action: Action,
    requires: Vec<usize>,
}

/// Actions for one scope (the system or one identity) and their edges.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    scope: String,
    nodes: Vec<Node>,
    index: HashMap<ActionId, usize>,
}

impl ResourceGraph {
    pub fn new(scope: &str) -> Self {
        Self {
            scope: scope.to_string(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &ActionId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &ActionId) -> Option<&Action> {
        self.index.get(id).map(|&i| &self.nodes[i].action)
    }

    /// Actions in insertion order.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.nodes.iter().map(|n| &n.action)
    }

    /// Add an action that runs after every id in `requires`.
    pub fn add(&mut self, action: Action, requires: &[ActionId]) -> Result<ActionId, PlanError> {
        if self.index.contains_key(&action.id) {
            return Err(PlanError::DuplicateAction(action.id.to_string()));
        }

        let mut deps = Vec::with_capacity(requires.len());
        for dep in requires {
            let &idx = self
                .index
                .get(dep)
                .ok_or_else(|| PlanError::UnknownDependency(dep.to_string()))?;
            if !deps.contains(&idx) {
                deps.push(idx);
            }
        }

        let id = action.id.clone();
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(Node {
            action,
            requires: deps,
        });
        Ok(id)
    }

    /// Direct dependencies of `id`.
    pub fn dependencies(&self, id: &ActionId) -> Vec<&ActionId> {
        self.index
            .get(id)
            .map(|&i| {
                self.nodes[i]
                    .requires
                    .iter()
                    .map(|&d| &self.nodes[d].action.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stable topological order.
    pub fn topological_order(&self) -> Result<Vec<&Action>, PlanError> {
        let n = self.nodes.len();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut in_degree: Vec<usize> = vec![0; n];

        for (idx, node) in self.nodes.iter().enumerate() {
            for &dep in &node.requires {
                dependents[dep].push(idx);
                in_degree[idx] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(idx, _)| Reverse(idx))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &next in &dependents[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != n {
            let stuck = in_degree
                .iter()
                .enumerate()
                .filter(|(_, &degree)| degree > 0)
                .map(|(idx, _)| self.nodes[idx].action.id.to_string())
                .collect();
            return Err(PlanError::Cycle(stuck));
        }

        Ok(order.into_iter().map(|idx| &self.nodes[idx].action).collect())
    }
}
