//! Worker runner - claim, execute, heartbeat, report.
//!
//! # Flow
//! 1. While fewer than `max_jobs` jobs run, `claim` a task and spawn it.
//! 2. Each job runs the handler in its own tokio task and heartbeats every
//!    third of the lease. Losing the lease aborts the handler; its result
//!    would be rejected anyway.
//! 3. Handler `Ok` -> `report_claim_success` then the `after_success` hook,
//!    `Err` or panic -> `report_claim_failure`. Heartbeats and reports name
//!    the claim's lease, so a job whose claim was reaped and handed to a
//!    sibling job of the same worker cannot touch the new attempt.
//! 4. Between claims the runner waits for a job to finish, the poll tick or
//!    shutdown. With `sweep_interval` set it also runs the lease monitor.
//! 5. On shutdown no new tasks are claimed and running jobs are drained.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::claim::ClaimedTask;
use super::scheduler::Scheduler;
use crate::domain::{LeaseConfig, Result, RetryPolicy, TaskRecord, WorkerId};

/// Executes task payloads. Interpretation of the payload is up to the
/// implementation; the returned bytes become the task result, an `Err`
/// becomes the recorded error.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: &TaskRecord) -> std::result::Result<Vec<u8>, String>;

    /// Runs once the success of `task` is recorded. An error here is only
    /// logged; the task stays succeeded.
    async fn after_success(
        &self,
        _task: &TaskRecord,
        _output: &[u8],
    ) -> std::result::Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub worker_id: WorkerId,
    /// Jobs run concurrently by this worker.
    pub max_jobs: usize,
    /// Delay between claim attempts while the queue is empty.
    pub poll_interval: Duration,
    pub lease: LeaseConfig,
    pub retry: RetryPolicy,
    /// Run a lease sweep this often. `None` leaves reaping to a separate
    /// monitor.
    pub sweep_interval: Option<Duration>,
    pub sweep_batch: usize,
    /// Lifetime of the presence key; refreshed every poll tick.
    pub presence_ttl: Duration,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<WorkerId>) -> Self {
        Self {
            worker_id: worker_id.into(),
            max_jobs: 8,
            poll_interval: Duration::from_secs(2),
            lease: LeaseConfig::default(),
            retry: RetryPolicy::default(),
            sweep_interval: Some(Duration::from_secs(30)),
            sweep_batch: 100,
            presence_ttl: Duration::from_secs(10),
        }
    }
}

/// Totals of one `Worker::run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs dropped after losing the lease.
    pub abandoned: usize,
    pub reaped: usize,
}

impl WorkerStats {
    fn absorb(&mut self, other: &WorkerStats) {
        self.claimed += other.claimed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.abandoned += other.abandoned;
        self.reaped += other.reaped;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Succeeded,
    Failed,
    Abandoned,
}

pub struct Worker {
    scheduler: Arc<Scheduler>,
    handler: Arc<dyn TaskHandler>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(scheduler: Arc<Scheduler>, handler: Arc<dyn TaskHandler>, config: WorkerConfig) -> Self {
        Self {
            scheduler,
            handler,
            config,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<WorkerStats> {
        let worker = self.config.worker_id.clone();
        let max_jobs = self.config.max_jobs.max(1);
        info!(%worker, max_jobs, poll = ?self.config.poll_interval, "worker started");

        let mut stats = WorkerStats::default();
        let mut jobs: JoinSet<JobOutcome> = JoinSet::new();
        let mut poll = ticker(self.config.poll_interval);
        let mut sweep = self.config.sweep_interval.map(ticker);
        self.announce(jobs.len()).await;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if jobs.len() < max_jobs {
                match self.scheduler.claim(&worker, &self.config.lease).await {
                    Ok(Some(claimed)) => {
                        stats.claimed += 1;
                        jobs.spawn(run_job(
                            self.scheduler.clone(),
                            self.handler.clone(),
                            worker.clone(),
                            self.config.lease.clone(),
                            self.config.retry.clone(),
                            claimed,
                        ));
                        continue;
                    }
                    Ok(None) => {}
                    Err(err) => warn!(%worker, error = %err, "claim failed"),
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(done) = jobs.join_next(), if !jobs.is_empty() => {
                    record(&mut stats, done);
                }
                _ = poll.tick() => {
                    self.announce(jobs.len()).await;
                }
                _ = tick(&mut sweep) => {
                    match self.scheduler.sweep(&self.config.retry, self.config.sweep_batch).await {
                        Ok(report) => stats.reaped += report.reaped(),
                        Err(err) => error!(%worker, error = %err, "lease sweep failed"),
                    }
                }
            }
        }

        if !jobs.is_empty() {
            info!(%worker, running = jobs.len(), "waiting for running jobs to finish");
        }
        while let Some(done) = jobs.join_next().await {
            record(&mut stats, done);
        }
        info!(
            %worker,
            claimed = stats.claimed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            abandoned = stats.abandoned,
            "worker stopped"
        );
        Ok(stats)
    }

    async fn announce(&self, running: usize) {
        if let Err(err) = self
            .scheduler
            .publish_presence(&self.config.worker_id, running, self.config.presence_ttl)
            .await
        {
            warn!(worker = %self.config.worker_id, error = %err, "presence update failed");
        }
    }
}

async fn run_job(
    scheduler: Arc<Scheduler>,
    handler: Arc<dyn TaskHandler>,
    worker: WorkerId,
    lease: LeaseConfig,
    retry: RetryPolicy,
    claimed: ClaimedTask,
) -> JobOutcome {
    let task_id = claimed.task.id;
    let mut work = {
        let handler = handler.clone();
        let task = claimed.task.clone();
        tokio::spawn(async move { handler.handle(&task).await })
    };

    let mut beat = ticker(lease.duration / 3);
    beat.tick().await;

    let finished = loop {
        tokio::select! {
            done = &mut work => break done,
            _ = beat.tick() => {
                match scheduler.heartbeat_claim(&claimed, &lease).await {
                    Ok(_) => {}
                    Err(err) if err.is_lease_loss() => {
                        warn!(task = %task_id, %worker, "lease lost, abandoning task");
                        work.abort();
                        return JobOutcome::Abandoned;
                    }
                    Err(err) => warn!(task = %task_id, %worker, error = %err, "heartbeat failed"),
                }
            }
        }
    };

    let reported = match finished {
        Ok(Ok(output)) => match scheduler.report_claim_success(&claimed, output.clone()).await {
            Ok(_) => {
                if let Err(message) = handler.after_success(&claimed.task, &output).await {
                    warn!(task = %task_id, %worker, %message, "post-success hook failed");
                }
                Ok(JobOutcome::Succeeded)
            }
            Err(err) => Err(err),
        },
        Ok(Err(message)) => scheduler
            .report_claim_failure(&claimed, message, &retry)
            .await
            .map(|_| JobOutcome::Failed),
        Err(join_err) => {
            let message = if join_err.is_panic() {
                panic_message(join_err.into_panic())
            } else {
                "handler was cancelled".to_string()
            };
            error!(task = %task_id, %worker, %message, "handler panicked");
            scheduler
                .report_claim_failure(&claimed, format!("handler panicked: {message}"), &retry)
                .await
                .map(|_| JobOutcome::Failed)
        }
    };

    match reported {
        Ok(outcome) => outcome,
        Err(err) if err.is_lease_loss() => {
            debug!(task = %task_id, %worker, "result discarded, lease no longer held");
            JobOutcome::Abandoned
        }
        Err(err) => {
            error!(task = %task_id, %worker, error = %err, "could not report result");
            JobOutcome::Abandoned
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn record(stats: &mut WorkerStats, done: std::result::Result<JobOutcome, tokio::task::JoinError>) {
    match done {
        Ok(JobOutcome::Succeeded) => stats.succeeded += 1,
        Ok(JobOutcome::Failed) => stats.failed += 1,
        Ok(JobOutcome::Abandoned) => stats.abandoned += 1,
        Err(err) => {
            error!(error = %err, "job task died");
            stats.abandoned += 1;
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Worker group handle.
/// - `shutdown_and_join()` stops claiming everywhere and drains running jobs
/// - dropping the group without it also stops the workers (the shutdown
///   sender goes away)
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<Result<WorkerStats>>>,
}

impl WorkerGroup {
    /// Spawn `n` workers named `{base.worker_id}-{i}`.
    pub fn spawn(
        n: usize,
        scheduler: Arc<Scheduler>,
        handler: Arc<dyn TaskHandler>,
        base: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for i in 0..n {
            let mut config = base.clone();
            config.worker_id = WorkerId::new(format!("{}-{i}", base.worker_id));
            let worker = Worker::new(Arc::clone(&scheduler), Arc::clone(&handler), config);
            joins.push(tokio::spawn(worker.run(shutdown_rx.clone())));
        }

        Self { shutdown_tx, joins }
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers; returns the combined stats.
    pub async fn shutdown_and_join(self) -> Result<WorkerStats> {
        self.request_shutdown();
        let mut total = WorkerStats::default();
        for join in self.joins {
            match join.await {
                Ok(stats) => total.absorb(&stats?),
                Err(err) => error!(error = %err, "worker task died"),
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::diamond;
    use crate::domain::{GraphSpec, GraphState, TaskSpec, TaskStatus};
    use crate::impls::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Payload `fail` fails, `panic` panics, `hang` never finishes, anything
    /// else echoes. The post-success hook fails for payload `bad-hook`.
    struct Scripted {
        calls: AtomicUsize,
        hooks: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for Scripted {
        async fn handle(&self, task: &TaskRecord) -> std::result::Result<Vec<u8>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match task.payload.as_slice() {
                b"fail" => Err("scripted failure".into()),
                b"panic" => panic!("scripted panic"),
                b"hang" => {
                    std::future::pending::<()>().await;
                    Ok(vec![])
                }
                other => Ok(other.to_vec()),
            }
        }

        async fn after_success(
            &self,
            task: &TaskRecord,
            _output: &[u8],
        ) -> std::result::Result<(), String> {
            self.hooks.fetch_add(1, Ordering::SeqCst);
            match task.payload.as_slice() {
                b"bad-hook" => Err("hook exploded".into()),
                _ => Ok(()),
            }
        }
    }

    fn scheduler() -> Arc<Scheduler> {
        Arc::new(
            Scheduler::builder(Arc::new(MemoryStore::new()))
                .build()
                .unwrap(),
        )
    }

    fn handler() -> Arc<Scripted> {
        Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            hooks: AtomicUsize::new(0),
        })
    }

    fn config(name: &str) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(5),
            lease: LeaseConfig::new(Duration::from_millis(300)),
            retry: RetryPolicy::immediate(),
            sweep_interval: Some(Duration::from_millis(20)),
            ..WorkerConfig::new(name)
        }
    }

    async fn wait_until_done(scheduler: &Scheduler, graph: crate::domain::GraphId) -> GraphState {
        for _ in 0..400 {
            let status = scheduler.get_graph_status(graph).await.unwrap();
            if status.state.is_terminal() {
                return status.state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("graph did not finish");
    }

    #[tokio::test]
    async fn group_runs_a_diamond_to_completion() {
        let scheduler = scheduler();
        let (spec, ids) = diamond(0);
        let graph = scheduler.submit_graph(spec).await.unwrap();

        let group = WorkerGroup::spawn(3, scheduler.clone(), handler(), config("w"));
        assert_eq!(wait_until_done(&scheduler, graph).await, GraphState::Succeeded);
        let stats = group.shutdown_and_join().await.unwrap();

        assert_eq!(stats.succeeded, 4);
        assert_eq!(stats.claimed, 4);
        for id in ids {
            let task = scheduler.get_task(id).await.unwrap();
            assert_eq!(task.result.as_deref(), Some(task.payload.as_slice()));
        }
    }

    #[tokio::test]
    async fn handler_errors_and_panics_become_failures() {
        let scheduler = scheduler();
        let mut spec = GraphSpec::new("bad");
        let failing = spec.add_task(TaskSpec::new("fail").max_retries(1));
        let panicking = spec.add_task(TaskSpec::new("panic"));
        let graph = scheduler.submit_graph(spec).await.unwrap();

        let handler = handler();
        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(scheduler.clone(), handler.clone(), config("w1"));
        let run = tokio::spawn(worker.run(rx));

        assert_eq!(wait_until_done(&scheduler, graph).await, GraphState::Failed);
        tx.send(true).unwrap();
        let stats = run.await.unwrap().unwrap();

        let failing = scheduler.get_task(failing).await.unwrap();
        assert_eq!(failing.status, TaskStatus::Failed);
        assert_eq!(failing.retry_count, 1);
        assert_eq!(failing.error.as_deref(), Some("scripted failure"));

        let panicking = scheduler.get_task(panicking).await.unwrap();
        assert!(panicking.error.unwrap().contains("scripted panic"));
        assert_eq!(stats.failed, 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failing_success_hook_keeps_task_succeeded() {
        let scheduler = scheduler();
        let mut spec = GraphSpec::new("hooks");
        let bad = spec.add_task(TaskSpec::new("bad-hook"));
        let good = spec.add_task(TaskSpec::new("fine"));
        let graph = scheduler.submit_graph(spec).await.unwrap();

        let handler = handler();
        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(scheduler.clone(), handler.clone(), config("w1"));
        let run = tokio::spawn(worker.run(rx));

        assert_eq!(wait_until_done(&scheduler, graph).await, GraphState::Succeeded);
        tx.send(true).unwrap();
        let stats = run.await.unwrap().unwrap();

        assert_eq!(stats.succeeded, 2);
        assert_eq!(handler.hooks.load(Ordering::SeqCst), 2);
        for id in [bad, good] {
            assert_eq!(scheduler.get_task_status(id).await.unwrap(), TaskStatus::Succeeded);
        }
    }

    #[tokio::test]
    async fn cancelled_task_is_abandoned_on_next_heartbeat() {
        let scheduler = scheduler();
        let mut spec = GraphSpec::new("hang");
        let id = spec.add_task(TaskSpec::new("hang"));
        scheduler.submit_graph(spec).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(scheduler.clone(), handler(), config("w1"));
        let run = tokio::spawn(worker.run(rx));

        for _ in 0..200 {
            if scheduler.get_task_status(id).await.unwrap() == TaskStatus::Claimed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        scheduler.cancel(id).await.unwrap();

        // next heartbeat (a third of the lease) notices
        tokio::time::sleep(Duration::from_millis(250)).await;
        tx.send(true).unwrap();
        let stats = run.await.unwrap().unwrap();
        assert_eq!(stats.abandoned, 1);
        assert_eq!(scheduler.get_task_status(id).await.unwrap(), TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn worker_publishes_presence() {
        let scheduler = scheduler();
        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(scheduler.clone(), handler(), config("w1"));
        let run = tokio::spawn(worker.run(rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let presence = scheduler
            .worker_presence(&WorkerId::new("w1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(presence.running, 0);

        tx.send(true).unwrap();
        run.await.unwrap().unwrap();
    }
}
