use crate::error::Result;
use crate::metrics;
use crate::recorder::reconciliation::StorageReconciler;
use crate::recorder::retention::RetentionEnforcer;
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A unit of periodic work. Runs must be idempotent.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self) -> Result<()>;
}

#[async_trait]
impl PeriodicJob for RetentionEnforcer {
    fn name(&self) -> &'static str {
        "retention"
    }

    async fn run(&self) -> Result<()> {
        self.enforce().await.map(|_| ())
    }
}

#[async_trait]
impl PeriodicJob for StorageReconciler {
    fn name(&self) -> &'static str {
        "reconciliation"
    }

    async fn run(&self) -> Result<()> {
        let run = self.reconcile_all().await?;
        if !run.failed_tenants.is_empty() {
            warn!(
                "Reconciliation skipped {} tenants: {:?}",
                run.failed_tenants.len(),
                run.failed_tenants
            );
        }
        Ok(())
    }
}

/// How long `shutdown` waits for runs still in progress
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// Owns one tokio task per periodic job
pub struct Scheduler {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    /// Held by a job's run while it is in progress
    running: Vec<(&'static str, Arc<Mutex<()>>)>,
    shutdown_grace: Duration,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            running: Vec::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Run `job` every `period`, first tick immediately.
    ///
    /// Each run executes in its own task so the ticker keeps going; a tick that
    /// finds the previous run still in progress is skipped.
    pub fn schedule(&mut self, job: Arc<dyn PeriodicJob>, period: Duration) {
        let cancel = self.cancel.clone();
        let running = Arc::new(Mutex::new(()));
        self.running.push((job.name(), running.clone()));
        info!("Scheduling job {} every {:?}", job.name(), period);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let guard = match running.clone().try_lock_owned() {
                    Ok(guard) => guard,
                    Err(_) => {
                        warn!("Job {} is still running, skipping this tick", job.name());
                        metrics::record_job_run(job.name(), "skipped");
                        continue;
                    }
                };

                let job = job.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    run_once(job.as_ref()).await;
                });
            }
            info!("Job {} stopped", job.name());
        });
        self.tasks.push(handle);
    }

    /// Stop ticking, then give runs in progress up to the shutdown grace to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Scheduler task ended abnormally: {}", e);
            }
        }

        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        for (name, running) in self.running {
            match tokio::time::timeout_at(deadline, running.lock()).await {
                Ok(_) => {}
                Err(_) => warn!(
                    "Job {} still running after {:?}, leaving it behind",
                    name, self.shutdown_grace
                ),
            }
        }
    }
}

/// Run a job once, recording its outcome and duration
pub async fn run_once(job: &dyn PeriodicJob) {
    let started = Instant::now();
    let status = match job.run().await {
        Ok(()) => "success",
        Err(e) => {
            error!("Job {} failed: {}", job.name(), e);
            "error"
        }
    };
    metrics::record_job_duration(job.name(), started.elapsed());
    metrics::record_job_run(job.name(), status);
}
