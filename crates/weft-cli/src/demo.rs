//! Demo handler used by `weft run`.
//!
//! Payload fields (all optional):
//! - `sleep_ms`: pretend to work this long
//! - `fail`: fail every attempt
//! - `fail_attempts`: fail while the task's retry count is below this
//! - `output`: JSON returned as the task result

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;
use weft_core::{TaskHandler, TaskRecord};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DemoPayload {
    sleep_ms: u64,
    fail: bool,
    fail_attempts: u32,
    output: Option<serde_json::Value>,
}

pub struct DemoHandler;

#[async_trait]
impl TaskHandler for DemoHandler {
    async fn handle(&self, task: &TaskRecord) -> Result<Vec<u8>, String> {
        let payload: DemoPayload = if task.payload.is_empty() {
            DemoPayload::default()
        } else {
            serde_json::from_slice(&task.payload).map_err(|e| format!("json decode: {e}"))?
        };

        if payload.sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(payload.sleep_ms)).await;
        }
        if payload.fail {
            return Err("payload requested failure".into());
        }
        if task.retry_count < payload.fail_attempts {
            return Err(format!(
                "intentional failure (attempt {} of {})",
                task.retry_count + 1,
                payload.fail_attempts
            ));
        }

        info!(task = %task.id, "demo task done");
        let output = payload
            .output
            .unwrap_or_else(|| serde_json::json!({ "task": task.id.to_string() }));
        serde_json::to_vec(&output).map_err(|e| e.to_string())
    }
}
