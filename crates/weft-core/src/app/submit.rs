//! Graph submission.
//!
//! Validation runs entirely before the first store call. Persistence is a
//! single transaction guarded on the absence of every key it writes, so a
//! graph is either fully visible (records, edges, seeded ready queue) or not
//! visible at all.

use std::collections::HashMap;

use tracing::{debug, info};

use super::dag::DependencyGraph;
use super::scheduler::Scheduler;
use crate::domain::{GraphId, GraphLimits, GraphRecord, GraphSpec, Result, TaskRecord, WeftError};
use crate::ports::StoreOp;
use crate::ports::clock::to_score;

/// Check a graph against `limits` and build its dependency graph.
///
/// Order of checks: emptiness, size, payloads, duplicate ids, edge
/// references, acyclicity.
pub fn validate_graph(spec: &GraphSpec, limits: &GraphLimits) -> Result<DependencyGraph> {
    if spec.tasks.is_empty() {
        return Err(WeftError::EmptyGraph);
    }
    if spec.tasks.len() > limits.max_tasks {
        return Err(WeftError::GraphTooLarge {
            count: spec.tasks.len(),
            limit: limits.max_tasks,
        });
    }

    let mut graph = DependencyGraph::new();
    for task in &spec.tasks {
        if task.payload.len() > limits.max_payload_bytes {
            return Err(WeftError::PayloadTooLarge {
                task: task.id,
                size: task.payload.len(),
                limit: limits.max_payload_bytes,
            });
        }
        if !graph.add_node(task.id) {
            return Err(WeftError::DuplicateTask(task.id));
        }
    }

    for edge in &spec.edges {
        let missing = [edge.task, edge.depends_on]
            .into_iter()
            .find(|id| !graph.contains(*id));
        if let Some(missing) = missing {
            return Err(WeftError::InvalidReference {
                task: edge.task,
                depends_on: edge.depends_on,
                missing,
            });
        }
        graph.add_dependency(edge.task, edge.depends_on);
    }

    graph
        .topological_order()
        .map_err(|cycle| WeftError::CyclicGraph { cycle })?;
    Ok(graph)
}

impl Scheduler {
    /// Validate and persist a graph. Tasks without dependencies are ready
    /// immediately.
    pub async fn submit_graph(&self, spec: GraphSpec) -> Result<GraphId> {
        let graph = validate_graph(&spec, &self.limits)?;
        let now = self.now();
        let graph_id = self.ids.graph_id();

        let record = GraphRecord {
            id: graph_id,
            name: spec.name.clone(),
            task_ids: graph.nodes().to_vec(),
            created_at: now,
        };
        let graph_key = self.keys.graph(graph_id);

        let mut ops = Vec::with_capacity(spec.tasks.len() * 3 + 2);
        ops.push(StoreOp::expect(graph_key.clone(), None));
        ops.push(StoreOp::put(graph_key, Self::encode(&record)?));

        let mut task_keys = HashMap::with_capacity(spec.tasks.len());
        let mut ready = Vec::new();
        for task in spec.tasks {
            let mut record = TaskRecord::new(
                task.id,
                graph_id,
                task.payload,
                graph.dependencies_of(task.id).to_vec(),
                task.max_retries,
                task.tags,
                now,
            )?;
            record.dependents = graph.dependents_of(task.id).to_vec();

            let key = self.keys.task(task.id);
            ops.push(StoreOp::expect(key.clone(), None));
            ops.push(StoreOp::put(key.clone(), Self::encode(&record)?));
            task_keys.insert(task.id, key);
            if record.unsatisfied == 0 {
                ready.push(task.id);
            }
        }
        for id in &ready {
            ops.push(StoreOp::push_sorted(
                self.keys.ready(),
                id.to_string(),
                to_score(now),
            ));
        }

        if !self.store.transaction(ops).await? {
            // Something already exists under one of our keys. Find which.
            for id in graph.nodes() {
                let Some(key) = task_keys.get(id) else {
                    continue;
                };
                if self.store.get(key).await?.is_some() {
                    return Err(WeftError::TaskAlreadyExists(*id));
                }
            }
            debug!(graph = %graph_id, "graph id collided with an existing graph");
            return Err(self.contention("submit_graph", self.keys.graph(graph_id)));
        }

        info!(
            graph = %graph_id,
            name = %record.name,
            tasks = graph.len(),
            ready = ready.len(),
            "graph submitted"
        );
        Ok(graph_id)
    }
}
