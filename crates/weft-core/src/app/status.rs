//! Read-side queries: task records and aggregated graph status.

use super::scheduler::Scheduler;
use crate::domain::{
    GraphId, GraphRecord, GraphState, GraphStatus, Result, StatusCounts, TaskId, TaskRecord,
    TaskStatus, WeftError,
};

impl Scheduler {
    pub async fn get_task(&self, task: TaskId) -> Result<TaskRecord> {
        Ok(self.load_required(task).await?.record)
    }

    pub async fn get_task_status(&self, task: TaskId) -> Result<TaskStatus> {
        Ok(self.get_task(task).await?.status)
    }

    pub async fn get_graph(&self, graph: GraphId) -> Result<GraphRecord> {
        let raw = self
            .store
            .get(&self.keys.graph(graph))
            .await?
            .ok_or(WeftError::GraphNotFound(graph))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Every task of `graph`, in submission order.
    pub async fn list_graph_tasks(&self, graph: GraphId) -> Result<Vec<TaskRecord>> {
        let record = self.get_graph(graph).await?;
        let mut tasks = Vec::with_capacity(record.task_ids.len());
        for id in record.task_ids {
            tasks.push(self.get_task(id).await?);
        }
        Ok(tasks)
    }

    /// Counts per status and the derived graph state. Not a snapshot: tasks
    /// are read one after another while workers keep moving them.
    pub async fn get_graph_status(&self, graph: GraphId) -> Result<GraphStatus> {
        let record = self.get_graph(graph).await?;
        let mut counts = StatusCounts::default();
        let mut statuses = Vec::with_capacity(record.task_ids.len());
        for id in &record.task_ids {
            let status = self.get_task_status(*id).await?;
            counts.record(status);
            statuses.push(status);
        }
        Ok(GraphStatus {
            graph_id: record.id,
            name: record.name,
            state: GraphState::from_statuses(statuses),
            counts,
            created_at: record.created_at,
        })
    }
}
