mod cli;
mod demo;
mod graph_file;
mod logging;
mod settings;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use weft_core::app::validate_graph;
use weft_core::{
    GraphId, GraphState, GraphStatus, LeaseMonitor, MemoryStore, RetryingStore, Scheduler,
    TaskStatus, WeftConfig, WeftError, WorkerGroup, WorkerStats,
};

use crate::cli::Command;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    logging::init_logging(args.log_level);
    match run_main(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("weft error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run_main(args: cli::CliArgs) -> Result<ExitCode> {
    let config = settings::load(args.config.as_deref())?;
    match args.command {
        Command::Validate { graph } => validate(&config, &graph),
        Command::Run { graph, workers } => run(config, &graph, workers).await,
    }
}

fn validate(config: &WeftConfig, path: &Path) -> Result<ExitCode> {
    let loaded = graph_file::load(path, config.retry.default_max_retries)?;
    match validate_graph(&loaded.spec, &config.graph_limits()) {
        Ok(graph) => {
            let order = graph
                .topological_order()
                .map_err(|cycle| WeftError::CyclicGraph { cycle })?;
            println!("graph {:?}: {} task(s), valid", loaded.spec.name, order.len());
            for (i, id) in order.iter().enumerate() {
                let after: Vec<String> = graph
                    .dependencies_of(*id)
                    .iter()
                    .map(|dep| loaded.key(*dep))
                    .collect();
                if after.is_empty() {
                    println!("{:>4}. {}", i + 1, loaded.key(*id));
                } else {
                    println!("{:>4}. {} (after {})", i + 1, loaded.key(*id), after.join(", "));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(WeftError::CyclicGraph { cycle }) => {
            let keys: Vec<String> = cycle.iter().map(|id| loaded.key(*id)).collect();
            println!("dependency cycle: {}", keys.join(" -> "));
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err).context("graph is invalid"),
    }
}

#[derive(Debug, Serialize)]
struct TaskReport {
    key: String,
    id: String,
    status: TaskStatus,
    retries: u32,
    error: Option<String>,
    result: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    graph: GraphStatus,
    tasks: Vec<TaskReport>,
    workers: WorkerStats,
}

async fn run(config: WeftConfig, path: &Path, workers: usize) -> Result<ExitCode> {
    let loaded = graph_file::load(path, config.retry.default_max_retries)?;

    let store = Arc::new(RetryingStore::new(MemoryStore::new(), config.store_retry()));
    let scheduler = Arc::new(
        Scheduler::builder(store)
            .namespace(config.store.namespace.clone())
            .limits(config.graph_limits())
            .max_conflicts(config.store.max_conflicts)
            .build()?,
    );
    let graph_id = scheduler
        .submit_graph(loaded.spec.clone())
        .await
        .context("submitting graph")?;

    let (monitor_tx, monitor_rx) = watch::channel(false);
    let monitor = tokio::spawn(
        LeaseMonitor::new(scheduler.clone(), config.monitor_config()).run(monitor_rx),
    );
    let group = WorkerGroup::spawn(
        workers.max(1),
        scheduler.clone(),
        Arc::new(demo::DemoHandler),
        config.worker_config("weft"),
    );
    info!(graph = %graph_id, workers, "running graph");

    let finished = tokio::select! {
        state = wait_for_graph(&scheduler, graph_id) => Some(state?),
        signal = shutdown_signal() => {
            warn!(signal, "interrupted, draining workers");
            None
        }
    };

    let stats = group.shutdown_and_join().await?;
    // receivers may already be gone
    let _ = monitor_tx.send(true);
    monitor.await.context("lease monitor task")?;

    let status = scheduler.get_graph_status(graph_id).await?;
    let tasks = scheduler
        .list_graph_tasks(graph_id)
        .await?
        .into_iter()
        .map(|task| TaskReport {
            key: loaded.key(task.id),
            id: task.id.to_string(),
            status: task.status,
            retries: task.retry_count,
            error: task.error,
            result: task.result.map(|bytes| decode_result(&bytes)),
        })
        .collect();

    let report = RunReport {
        graph: status,
        tasks,
        workers: stats,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if finished == Some(GraphState::Succeeded) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Resolves on SIGINT, SIGTERM or SIGHUP with the signal's name.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let (terminate, hangup) = {
        use tokio::signal::unix::{SignalKind, signal};

        async fn on(kind: SignalKind, name: &'static str) {
            match signal(kind) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(err) => {
                    warn!(signal = name, error = %err, "signal handler unavailable");
                    std::future::pending::<()>().await;
                }
            }
        }
        (
            on(SignalKind::terminate(), "SIGTERM"),
            on(SignalKind::hangup(), "SIGHUP"),
        )
    };

    #[cfg(not(unix))]
    let (terminate, hangup) = (
        std::future::pending::<()>(),
        std::future::pending::<()>(),
    );

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
        _ = hangup => "SIGHUP",
    }
}

async fn wait_for_graph(scheduler: &Scheduler, graph: GraphId) -> weft_core::Result<GraphState> {
    loop {
        let status = scheduler.get_graph_status(graph).await?;
        if status.state.is_terminal() {
            return Ok(status.state);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn decode_result(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
