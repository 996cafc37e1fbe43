use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::ShutdownSignal;

pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone)]
struct Job {
    name: String,
    schedule: Schedule,
    run: JobFn,
}

/// Cron-driven job runner with the start / is_running / shutdown(wait)
/// contract the supervisor expects from long-lived components.
///
/// Jobs must be added before `start()`; the poll loop works on a snapshot.
pub struct JobScheduler {
    poll_interval: Duration,
    stop_timeout: Duration,
    jobs: Mutex<Vec<Job>>,
    running: AtomicBool,
    stop: ShutdownSignal,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            poll_interval,
            stop_timeout: Duration::from_secs(5),
            jobs: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            stop: ShutdownSignal::new(),
            handle: Mutex::new(None),
        })
    }

    pub fn add_job(&self, name: &str, cron_expr: &str, run: JobFn) -> Result<()> {
        let schedule = Schedule::from_str(cron_expr)
            .with_context(|| format!("invalid cron expression for job {name}: {cron_expr}"))?;
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Job {
                name: name.to_string(),
                schedule,
                run,
            });
        Ok(())
    }

    /// Starts the poll loop. A second call while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move { scheduler.run_loop().await });
        *self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        tracing::info!("job scheduler started");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the scheduler. With `wait`, the in-flight job is allowed to
    /// finish within the stop bound; past the bound the loop is aborted.
    pub async fn shutdown(&self, wait: bool) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop.trigger();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut handle) = handle else {
            return;
        };
        if wait {
            if tokio::time::timeout(self.stop_timeout, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!("scheduler did not stop within bound, aborting");
                handle.abort();
            }
        } else {
            handle.abort();
        }
        tracing::info!("job scheduler stopped");
    }

    async fn run_loop(&self) {
        let jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let mut next_due: HashMap<String, DateTime<Utc>> = HashMap::new();
        for job in &jobs {
            if let Some(next) = job.schedule.upcoming(Utc).next() {
                next_due.insert(job.name.clone(), next);
            }
        }
        loop {
            tokio::select! {
                _ = self.stop.wait() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            let now = Utc::now();
            for job in &jobs {
                let Some(due) = next_due.get(&job.name).copied() else {
                    continue;
                };
                if due > now {
                    continue;
                }
                tracing::debug!(job = %job.name, "running scheduled job");
                if let Err(error) = (job.run)().await {
                    tracing::error!(job = %job.name, %error, "scheduled job failed");
                }
                match job.schedule.after(&Utc::now()).next() {
                    Some(next) => {
                        next_due.insert(job.name.clone(), next);
                    }
                    None => {
                        next_due.remove(&job.name);
                    }
                }
            }
        }
        tracing::debug!("job scheduler loop exited");
    }
}
