//! Dependency graph of one submission.
//!
//! Design:
//! - Forward edges: task -> tasks it depends on (waits for)
//! - Reverse edges: task -> tasks that depend on it (waiting tasks)
//! - Invariant: edges and reverse_edges are always updated together
//! - Node and edge order is insertion order, so everything derived from the
//!   graph (dependents lists, topological order) is deterministic
//!
//! Cycle detection is Kahn's algorithm: O(V + E), and when it stalls every
//! unprocessed node still has an unprocessed dependency, which is enough to
//! walk out one concrete cycle.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::TaskId;

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: Vec<TaskId>,
    known: HashSet<TaskId>,

    /// Forward edges: task -> tasks it depends on
    edges: HashMap<TaskId, Vec<TaskId>>,

    /// Reverse edges: task -> tasks waiting for it
    reverse_edges: HashMap<TaskId, Vec<TaskId>>,

    pairs: HashSet<(TaskId, TaskId)>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Returns `false` if it was already present.
    pub fn add_node(&mut self, task: TaskId) -> bool {
        if !self.known.insert(task) {
            return false;
        }
        self.nodes.push(task);
        true
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.known.contains(&task)
    }

    /// `task` depends on `depends_on`. Repeated edges are ignored.
    ///
    /// Example: add_dependency(task_b, task_a) means "B waits for A"
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        if !self.pairs.insert((task, depends_on)) {
            return;
        }
        self.edges.entry(task).or_default().push(depends_on);
        self.reverse_edges.entry(depends_on).or_default().push(task);
    }

    pub fn nodes(&self) -> &[TaskId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dependencies_of(&self, task: TaskId) -> &[TaskId] {
        self.edges.get(&task).map(Vec::as_slice).unwrap_or_default()
    }

    /// Tasks waiting for `task`.
    pub fn dependents_of(&self, task: TaskId) -> &[TaskId] {
        self.reverse_edges
            .get(&task)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Tasks with no dependencies, in insertion order.
    pub fn roots(&self) -> Vec<TaskId> {
        self.nodes
            .iter()
            .copied()
            .filter(|id| self.dependencies_of(*id).is_empty())
            .collect()
    }

    /// Every node, dependencies before dependents.
    ///
    /// On a cycle returns `Err(path)` where each element depends on the next
    /// and the first node is repeated at the end, e.g. `[a, b, a]`.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, Vec<TaskId>> {
        let mut remaining: HashMap<TaskId, usize> = self
            .nodes
            .iter()
            .map(|id| (*id, self.dependencies_of(*id).len()))
            .collect();

        let mut queue: VecDeque<TaskId> = self.roots().into_iter().collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_front() {
            remaining.remove(&id);
            order.push(id);
            for waiting in self.dependents_of(id) {
                if let Some(count) = remaining.get_mut(waiting) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(*waiting);
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            return Ok(order);
        }
        Err(self.extract_cycle(&remaining))
    }

    /// Walk dependencies inside the stalled set until a node repeats.
    fn extract_cycle(&self, stalled: &HashMap<TaskId, usize>) -> Vec<TaskId> {
        let Some(start) = self.nodes.iter().find(|id| stalled.contains_key(id)) else {
            return Vec::new();
        };

        let mut path = vec![*start];
        let mut position: HashMap<TaskId, usize> = HashMap::from([(*start, 0)]);
        let mut current = *start;
        loop {
            let Some(next) = self
                .dependencies_of(current)
                .iter()
                .find(|dep| stalled.contains_key(dep))
            else {
                return path;
            };
            if let Some(&at) = position.get(next) {
                let mut cycle = path.split_off(at);
                cycle.push(*next);
                return cycle;
            }
            position.insert(*next, path.len());
            path.push(*next);
            current = *next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u128) -> Vec<TaskId> {
        (1..=n).map(TaskId::from_u128).collect()
    }

    fn graph(nodes: &[TaskId], edges: &[(usize, usize)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for id in nodes {
            graph.add_node(*id);
        }
        for (task, depends_on) in edges {
            graph.add_dependency(nodes[*task], nodes[*depends_on]);
        }
        graph
    }

    #[test]
    fn add_dependency_keeps_both_directions() {
        let t = ids(2);
        let graph = graph(&t, &[(1, 0)]);

        assert_eq!(graph.dependencies_of(t[1]), &[t[0]]);
        assert_eq!(graph.dependents_of(t[0]), &[t[1]]);
        assert!(graph.dependencies_of(t[0]).is_empty());
        assert_eq!(graph.roots(), vec![t[0]]);
    }

    #[test]
    fn duplicate_edges_and_nodes_are_ignored() {
        let t = ids(2);
        let mut graph = graph(&t, &[(1, 0), (1, 0)]);
        assert!(!graph.add_node(t[0]));
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.dependencies_of(t[1]).len(), 1);
        assert_eq!(graph.dependents_of(t[0]).len(), 1);
    }

    #[test]
    fn diamond_orders_dependencies_first() {
        // d -> {b, c} -> a
        let t = ids(4);
        let graph = graph(&t, &[(1, 0), (2, 0), (3, 1), (3, 2)]);
        let order = graph.topological_order().unwrap();

        let pos = |id: TaskId| order.iter().position(|x| *x == id).unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], t[0]);
        assert!(pos(t[1]) < pos(t[3]));
        assert!(pos(t[2]) < pos(t[3]));
    }

    #[test]
    fn independent_nodes_keep_insertion_order() {
        let t = ids(3);
        let graph = graph(&t, &[]);
        assert_eq!(graph.topological_order().unwrap(), t);
    }

    #[test]
    fn two_node_cycle_is_reported() {
        let t = ids(2);
        let graph = graph(&t, &[(0, 1), (1, 0)]);
        let cycle = graph.topological_order().unwrap_err();
        assert_eq!(cycle, vec![t[0], t[1], t[0]]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let t = ids(1);
        let graph = graph(&t, &[(0, 0)]);
        assert_eq!(graph.topological_order().unwrap_err(), vec![t[0], t[0]]);
    }

    #[test]
    fn cycle_behind_a_valid_prefix() {
        // a is fine; b -> c -> d -> b hangs off a; e waits on the cycle
        let t = ids(5);
        let graph = graph(&t, &[(1, 0), (1, 3), (2, 1), (3, 2), (4, 3)]);
        let cycle = graph.topological_order().unwrap_err();

        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        for pair in cycle.windows(2) {
            assert!(graph.dependencies_of(pair[0]).contains(&pair[1]));
        }
        assert!(!cycle.contains(&t[0]));
        assert!(!cycle.contains(&t[4]));
    }
}
