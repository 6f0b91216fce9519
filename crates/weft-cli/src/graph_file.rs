//! Graph files: JSON tasks addressed by human-readable keys.
//!
//! ```json
//! {
//!   "name": "etl",
//!   "tasks": [
//!     { "key": "extract", "payload": { "sleep_ms": 50 } },
//!     { "key": "load", "depends_on": ["extract"], "max_retries": 2 }
//!   ]
//! }
//! ```
//!
//! Payloads are stored as JSON bytes. Tasks without `max_retries` get the
//! configured default.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use weft_core::{GraphSpec, TaskId, TaskSpec};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GraphFile {
    name: String,
    tasks: Vec<TaskEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskEntry {
    key: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    depends_on: Vec<String>,
    max_retries: Option<u32>,
    #[serde(default)]
    tags: BTreeSet<String>,
}

/// A parsed graph plus the key of every task id, for display.
#[derive(Debug)]
pub struct LoadedGraph {
    pub spec: GraphSpec,
    pub keys: HashMap<TaskId, String>,
}

impl LoadedGraph {
    pub fn key(&self, id: TaskId) -> String {
        self.keys
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }
}

pub fn load(path: &Path, default_max_retries: u32) -> Result<LoadedGraph> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading graph file at {path:?}"))?;
    parse(&text, default_max_retries).with_context(|| format!("loading graph from {path:?}"))
}

pub fn parse(text: &str, default_max_retries: u32) -> Result<LoadedGraph> {
    let file: GraphFile = serde_json::from_str(text).context("parsing graph JSON")?;

    let mut spec = GraphSpec::new(file.name);
    let mut ids: HashMap<String, TaskId> = HashMap::with_capacity(file.tasks.len());
    let mut keys = HashMap::with_capacity(file.tasks.len());
    for entry in &file.tasks {
        if ids.contains_key(&entry.key) {
            bail!("task key {:?} appears more than once", entry.key);
        }
        let payload = serde_json::to_vec(&entry.payload)?;
        let mut task =
            TaskSpec::new(payload).max_retries(entry.max_retries.unwrap_or(default_max_retries));
        task.tags = entry.tags.clone();
        let id = spec.add_task(task);
        ids.insert(entry.key.clone(), id);
        keys.insert(id, entry.key.clone());
    }

    for entry in &file.tasks {
        let task = ids[&entry.key];
        for dep in &entry.depends_on {
            let Some(depends_on) = ids.get(dep) else {
                bail!("task {:?} depends on unknown task {:?}", entry.key, dep);
            };
            spec.add_dependency(task, *depends_on);
        }
    }
    Ok(LoadedGraph { spec, keys })
}
