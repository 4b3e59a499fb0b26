use crate::crawler::CrawlOrchestrator;
use crate::types::{CrawlOutcome, CrawlStatus, IngestError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Delay before a freshly registered job fires for the first time.
const FIRST_FIRE_DELAY: Duration = Duration::from_secs(10);

/// Sent by a job task after every fire that actually ran.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub source_id: Uuid,
    pub finished_at: DateTime<Utc>,
    pub ok: bool,
}

/// Registry view of one scheduled job.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub source_id: Uuid,
    pub interval_minutes: u32,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_ok: Option<bool>,
}

/// How a manual trigger was satisfied.
#[derive(Debug)]
pub enum TriggerResult {
    /// A job exists; its next fire was pulled forward.
    Scheduled,
    /// No job registered; the crawl ran inline and finished.
    Completed(CrawlOutcome),
}

struct JobHandle {
    task: JoinHandle<()>,
    notify: Arc<Notify>,
}

/// One recurring crawl job per source. Backlogged fires coalesce, and at
/// most one crawl per source is in flight regardless of whether the timer
/// or a manual trigger started it.
pub struct CrawlScheduler {
    orchestrator: Arc<CrawlOrchestrator>,
    jobs: RwLock<HashMap<Uuid, JobHandle>>,
    registry: Arc<RwLock<HashMap<Uuid, JobInfo>>>,
    guards: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
    completion_tx: mpsc::Sender<CompletionEvent>,
    registry_worker: JoinHandle<()>,
}

impl CrawlScheduler {
    pub fn new(orchestrator: Arc<CrawlOrchestrator>) -> Self {
        let (completion_tx, mut completion_rx) = mpsc::channel::<CompletionEvent>(64);
        let registry: Arc<RwLock<HashMap<Uuid, JobInfo>>> = Arc::new(RwLock::new(HashMap::new()));

        let worker_registry = Arc::clone(&registry);
        let registry_worker = tokio::spawn(async move {
            while let Some(event) = completion_rx.recv().await {
                let mut registry = worker_registry.write().await;
                if let Some(info) = registry.get_mut(&event.source_id) {
                    info.last_run = Some(event.finished_at);
                    info.next_run = Some(
                        event.finished_at
                            + ChronoDuration::minutes(info.interval_minutes as i64),
                    );
                    info.last_ok = Some(event.ok);
                }
            }
        });

        Self {
            orchestrator,
            jobs: RwLock::new(HashMap::new()),
            registry,
            guards: RwLock::new(HashMap::new()),
            completion_tx,
            registry_worker,
        }
    }

    async fn guard_for(&self, source_id: Uuid) -> Arc<Mutex<()>> {
        let mut guards = self.guards.write().await;
        Arc::clone(guards.entry(source_id).or_default())
    }

    /// Register a recurring job. An existing job for the source is replaced.
    pub async fn add_job(&self, source_id: Uuid, interval_minutes: u32) {
        self.remove_job(source_id).await;

        let interval_minutes = interval_minutes.max(1);
        let notify = Arc::new(Notify::new());
        let guard = self.guard_for(source_id).await;
        let orchestrator = Arc::clone(&self.orchestrator);
        let completion_tx = self.completion_tx.clone();
        let task_notify = Arc::clone(&notify);

        let task = tokio::spawn(async move {
            let mut timer = interval_at(
                Instant::now() + FIRST_FIRE_DELAY,
                Duration::from_secs(interval_minutes as u64 * 60),
            );
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {}
                    _ = task_notify.notified() => {}
                }

                let Ok(_held) = guard.try_lock() else {
                    debug!(%source_id, "Crawl already in flight, dropping fire");
                    continue;
                };
                let ok = match orchestrator.run_crawl(source_id).await {
                    Ok(outcome) => outcome.status != CrawlStatus::Failed,
                    Err(e) => {
                        warn!(%source_id, error = %e, "Scheduled crawl failed");
                        false
                    }
                };
                let _ = completion_tx
                    .send(CompletionEvent {
                        source_id,
                        finished_at: Utc::now(),
                        ok,
                    })
                    .await;
            }
        });

        self.jobs
            .write()
            .await
            .insert(source_id, JobHandle { task, notify });
        self.registry.write().await.insert(
            source_id,
            JobInfo {
                source_id,
                interval_minutes,
                last_run: None,
                next_run: Some(Utc::now() + ChronoDuration::seconds(10)),
                last_ok: None,
            },
        );
        info!(%source_id, interval_minutes, "Registered crawl job");
    }

    /// Cancel and forget a job. No-op when none is registered.
    pub async fn remove_job(&self, source_id: Uuid) {
        if let Some(handle) = self.jobs.write().await.remove(&source_id) {
            handle.task.abort();
            self.registry.write().await.remove(&source_id);
            self.guards.write().await.remove(&source_id);
            info!(%source_id, "Removed crawl job");
        }
    }

    pub async fn update_job(&self, source_id: Uuid, interval_minutes: u32) {
        self.add_job(source_id, interval_minutes).await;
    }

    /// Fire a source's crawl now. With a registered job the fire goes
    /// through the job task; otherwise the crawl runs inline through the
    /// same per-source guard.
    pub async fn trigger_now(&self, source_id: Uuid) -> Result<TriggerResult> {
        if let Some(handle) = self.jobs.read().await.get(&source_id) {
            handle.notify.notify_one();
            return Ok(TriggerResult::Scheduled);
        }

        let guard = self.guard_for(source_id).await;
        let _held = guard
            .try_lock()
            .map_err(|_| IngestError::CrawlInFlight { id: source_id })?;
        let outcome = self.orchestrator.run_crawl(source_id).await?;
        let _ = self
            .completion_tx
            .send(CompletionEvent {
                source_id,
                finished_at: Utc::now(),
                ok: outcome.status != CrawlStatus::Failed,
            })
            .await;
        Ok(TriggerResult::Completed(outcome))
    }

    pub async fn has_job(&self, source_id: Uuid) -> bool {
        self.jobs.read().await.contains_key(&source_id)
    }

    pub async fn jobs(&self) -> Vec<JobInfo> {
        self.registry.read().await.values().cloned().collect()
    }

    /// Cancel every job task and the registry worker.
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.write().await;
        for (source_id, handle) in jobs.drain() {
            debug!(%source_id, "Stopping crawl job");
            handle.task.abort();
        }
        self.guards.write().await.clear();
        self.registry_worker.abort();
        info!("Scheduler stopped");
    }
}
