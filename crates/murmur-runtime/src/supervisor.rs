use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::task::{Id, JoinError, JoinSet};

use crate::scheduler::JobScheduler;
use crate::signals::wait_for_shutdown_signal;
use crate::ShutdownSignal;

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Runs the bus and every listener under one cancellable scope.
///
/// The first of: an OS termination signal, a task failure, or an explicit
/// trigger on the shared [`ShutdownSignal`] starts the stop sequence. The
/// sequence runs once: set the signal, stop the scheduler with
/// `shutdown(wait=true)`, then drain the scope, aborting anything that
/// ignores the signal past the grace period.
pub struct ServiceSupervisor {
    shutdown: ShutdownSignal,
    tasks: JoinSet<Result<()>>,
    names: HashMap<Id, String>,
    scheduler: Option<Arc<JobScheduler>>,
    grace_period: Duration,
}

impl ServiceSupervisor {
    pub fn new() -> Self {
        Self {
            shutdown: ShutdownSignal::new(),
            tasks: JoinSet::new(),
            names: HashMap::new(),
            scheduler: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// The shared signal handed to every serve loop.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Registers a scheduler for ordered teardown during the stop sequence.
    pub fn attach_scheduler(&mut self, scheduler: Arc<JobScheduler>) {
        self.scheduler = Some(scheduler);
    }

    /// Spawns a long-lived task into the scope. The task is expected to
    /// observe the shutdown signal and return `Ok` after its own teardown;
    /// an `Err` is treated as fatal to the whole service.
    pub fn spawn<F>(&mut self, name: &str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let id = self.tasks.spawn(task).id();
        self.names.insert(id, name.to_string());
    }

    /// Runs until every task has returned. Exits `Ok` on a clean shutdown
    /// and `Err` carrying the first fatal failure otherwise.
    pub async fn run(mut self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let id = self
            .tasks
            .spawn(async move {
                tokio::select! {
                    result = wait_for_shutdown_signal() => {
                        result.map_err(|error| anyhow!("signal registration failed: {error}"))?;
                        tracing::info!("termination signal received");
                        shutdown.trigger();
                    }
                    _ = shutdown.wait() => {}
                }
                Ok(())
            })
            .id();
        self.names.insert(id, "signal-watcher".to_string());

        let mut failure: Option<anyhow::Error> = None;
        let mut scheduler_stopped = false;

        while !self.tasks.is_empty() {
            if self.shutdown.is_triggered() && !scheduler_stopped {
                scheduler_stopped = true;
                self.stop_scheduler().await;
            }
            if self.shutdown.is_triggered() {
                match tokio::time::timeout(self.grace_period, self.tasks.join_next_with_id()).await
                {
                    Ok(Some(joined)) => self.observe(joined, &mut failure),
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!("grace period elapsed, aborting remaining tasks");
                        self.tasks.abort_all();
                        while let Some(joined) = self.tasks.join_next_with_id().await {
                            self.observe(joined, &mut failure);
                        }
                    }
                }
            } else {
                match self.tasks.join_next_with_id().await {
                    Some(joined) => self.observe(joined, &mut failure),
                    None => break,
                }
            }
        }

        if !scheduler_stopped {
            self.stop_scheduler().await;
        }

        match failure {
            Some(error) => Err(error),
            None => {
                tracing::info!("service shutdown complete");
                Ok(())
            }
        }
    }

    fn observe(
        &mut self,
        joined: Result<(Id, Result<()>), JoinError>,
        failure: &mut Option<anyhow::Error>,
    ) {
        match joined {
            Ok((id, Ok(()))) => {
                tracing::debug!(task = %self.task_name(id), "task finished");
            }
            Ok((id, Err(error))) => {
                let name = self.task_name(id);
                tracing::error!(task = %name, %error, "task failed, stopping siblings");
                if failure.is_none() {
                    *failure = Some(error.context(format!("task {name} failed")));
                }
                self.initiate_stop();
            }
            Err(join_error) => {
                let name = self.task_name(join_error.id());
                if join_error.is_cancelled() {
                    tracing::debug!(task = %name, "task aborted");
                } else {
                    tracing::error!(task = %name, %join_error, "task panicked, stopping siblings");
                    if failure.is_none() {
                        *failure = Some(anyhow!("task {name} panicked: {join_error}"));
                    }
                    self.initiate_stop();
                }
            }
        }
    }

    fn initiate_stop(&self) {
        if self.shutdown.trigger() {
            tracing::info!("initiating graceful shutdown");
        }
    }

    async fn stop_scheduler(&self) {
        if let Some(scheduler) = &self.scheduler {
            if scheduler.is_running() {
                tracing::info!("stopping job scheduler");
                scheduler.shutdown(true).await;
            }
        }
    }

    fn task_name(&self, id: Id) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| "unnamed".to_string())
    }
}

impl Default for ServiceSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
