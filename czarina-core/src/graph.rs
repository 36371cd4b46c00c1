//! Dependency graph over the worker set
//!
//! The graph is built once from the configured workers and is read-only
//! afterwards. Construction rejects duplicate ids, unknown dependencies and
//! cycles, so every `DependencyGraph` value is a valid DAG.
//!
//! Edges point from a worker to the workers it depends on. Waves are computed
//! by Kahn layering with ids sorted lexicographically inside each wave.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use tracing::debug;

use crate::worker::Worker;
use crate::{Error, Result};

/// Edge in visualization form: `from` must complete before `to` may start
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// Read-only dependency view over the worker set
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Declared worker order
    order: Vec<String>,
    /// worker -> workers it waits for
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// worker -> workers waiting for it
    dependents: BTreeMap<String, BTreeSet<String>>,
}

/// Serializable snapshot of the graph for `deps graph`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphSnapshot {
    pub nodes: Vec<String>,
    pub edges: Vec<Edge>,
    pub waves: Vec<Vec<String>>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Build and validate the graph
    pub fn build(workers: &[Worker]) -> Result<Self> {
        let mut order = Vec::with_capacity(workers.len());
        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for worker in workers {
            if dependencies.contains_key(&worker.id) {
                return Err(Error::DuplicateWorker {
                    id: worker.id.clone(),
                });
            }
            order.push(worker.id.clone());
            dependencies.insert(worker.id.clone(), worker.dependencies.clone());
        }

        let mut dependents: BTreeMap<String, BTreeSet<String>> = order
            .iter()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();

        for worker in workers {
            for dependency in &worker.dependencies {
                match dependents.get_mut(dependency) {
                    Some(waiting) => {
                        waiting.insert(worker.id.clone());
                    }
                    None => {
                        return Err(Error::UnknownDependency {
                            worker: worker.id.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                }
            }
        }

        let graph = Self {
            order,
            dependencies,
            dependents,
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(Error::CycleDetected { cycle });
        }

        debug!(
            workers = graph.order.len(),
            edges = graph.edge_count(),
            "Built dependency graph"
        );
        Ok(graph)
    }

    /// Depth-first search for a cycle; returns the ids in cycle order
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks: BTreeMap<&str, Mark> = self
            .dependencies
            .keys()
            .map(|id| (id.as_str(), Mark::Unvisited))
            .collect();
        let mut stack: Vec<&str> = Vec::new();

        for id in self.dependencies.keys() {
            if marks[id.as_str()] == Mark::Unvisited {
                if let Some(cycle) = self.visit(id, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        id: &'a str,
        marks: &mut BTreeMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(id, Mark::InProgress);
        stack.push(id);

        for dependency in &self.dependencies[id] {
            match marks[dependency.as_str()] {
                Mark::InProgress => {
                    let start = stack
                        .iter()
                        .position(|entry| *entry == dependency.as_str())
                        .unwrap_or(0);
                    return Some(stack[start..].iter().map(|s| s.to_string()).collect());
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.visit(dependency, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks.insert(id, Mark::Done);
        None
    }

    /// Topological layering; each wave can run in parallel
    pub fn waves(&self) -> Vec<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();

        let mut current: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut waves = Vec::new();
        while !current.is_empty() {
            let mut next = BTreeSet::new();
            for id in &current {
                for dependent in &self.dependents[*id] {
                    if let Some(degree) = remaining.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(dependent.as_str());
                        }
                    }
                }
            }
            waves.push(current.iter().map(|id| id.to_string()).collect());
            current = next;
        }
        waves
    }

    /// Wave index per worker
    pub fn levels(&self) -> BTreeMap<String, usize> {
        self.waves()
            .into_iter()
            .enumerate()
            .flat_map(|(level, wave)| wave.into_iter().map(move |id| (id, level)))
            .collect()
    }

    /// True iff every dependency of `worker_id` is in `completed`
    ///
    /// Unknown workers can never start.
    pub fn can_start(&self, worker_id: &str, completed: &BTreeSet<String>) -> bool {
        self.dependencies
            .get(worker_id)
            .map(|deps| deps.iter().all(|dep| completed.contains(dep)))
            .unwrap_or(false)
    }

    /// Dependencies of `worker_id` not yet in `completed`, sorted
    pub fn unmet_dependencies(
        &self,
        worker_id: &str,
        completed: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let deps = self
            .dependencies
            .get(worker_id)
            .ok_or_else(|| Error::unknown_worker(worker_id))?;
        Ok(deps
            .iter()
            .filter(|dep| !completed.contains(*dep))
            .cloned()
            .collect())
    }

    pub fn dependencies_of(&self, worker_id: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(worker_id)
    }

    pub fn dependents_of(&self, worker_id: &str) -> Option<&BTreeSet<String>> {
        self.dependents.get(worker_id)
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.dependencies.contains_key(worker_id)
    }

    /// Worker ids in declared order
    pub fn worker_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn edge_count(&self) -> usize {
        self.dependencies.values().map(BTreeSet::len).sum()
    }

    /// Edge list, dependency first
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .dependencies
            .iter()
            .flat_map(|(worker, deps)| {
                deps.iter().map(move |dep| Edge {
                    from: dep.clone(),
                    to: worker.clone(),
                })
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.order.clone(),
            edges: self.edges(),
            waves: self.waves(),
        }
    }

    /// Graphviz rendering with one rank per wave
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph czarina {\n    rankdir=LR;\n");
        for (level, wave) in self.waves().iter().enumerate() {
            let _ = write!(dot, "    subgraph wave_{} {{ rank=same;", level);
            for id in wave {
                let _ = write!(dot, " \"{}\";", id);
            }
            dot.push_str(" }\n");
        }
        for edge in self.edges() {
            let _ = writeln!(dot, "    \"{}\" -> \"{}\";", edge.from, edge.to);
        }
        dot.push_str("}\n");
        dot
    }
}
