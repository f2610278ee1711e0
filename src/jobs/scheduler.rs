//! Runs lifecycle jobs on fixed intervals until shutdown.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{LifecycleError, Result};

/// A job the scheduler can run periodically
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    /// Run one invocation. Errors are logged and the next tick tries again.
    async fn tick(&self) -> Result<()>;
}

/// Collects jobs and starts one loop per job
pub struct JobScheduler {
    jobs: Vec<Arc<dyn ScheduledJob>>,
    shutdown_tx: watch::Sender<bool>,
}

impl JobScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            jobs: Vec::new(),
            shutdown_tx,
        }
    }

    /// Receiver that flips to `true` on shutdown. Hand it to jobs so they
    /// stop between items.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Add a job.
    ///
    /// # Errors
    ///
    /// `BadRequest` if the job's interval is zero.
    pub fn register(mut self, job: Arc<dyn ScheduledJob>) -> Result<Self> {
        if job.interval().is_zero() {
            return Err(LifecycleError::bad_request(format!(
                "job {} has a zero interval",
                job.name()
            )));
        }
        self.jobs.push(job);
        Ok(self)
    }

    /// Spawn the job loops. The first run of each job happens immediately.
    pub fn start(self) -> RunningScheduler {
        let handles = self
            .jobs
            .into_iter()
            .map(|job| {
                let shutdown_rx = self.shutdown_tx.subscribe();
                tokio::spawn(run_loop(job, shutdown_rx))
            })
            .collect();

        RunningScheduler {
            handles,
            shutdown_tx: self.shutdown_tx,
        }
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_loop(job: Arc<dyn ScheduledJob>, mut shutdown_rx: watch::Receiver<bool>) {
    let name = job.name().to_string();
    let mut ticker = tokio::time::interval(job.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(target: "taxflow::jobs", job = %name, interval_seconds = job.interval().as_secs(), "Job scheduled");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = job.tick().await {
                    tracing::error!(target: "taxflow::jobs", job = %name, error = %e, "Job run failed");
                }
            }
        }
    }

    tracing::info!(target: "taxflow::jobs", job = %name, "Job stopped");
}

/// Handle to the running job loops
pub struct RunningScheduler {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl RunningScheduler {
    /// Signal shutdown and wait for in-flight runs to finish
    pub async fn shutdown(self) {
        tracing::info!(target: "taxflow::jobs", "Shutting down job scheduler...");

        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }

        tracing::info!(target: "taxflow::jobs", "Job scheduler shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: AtomicUsize,
        interval: Duration,
    }

    impl CountingJob {
        fn every(interval: Duration) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                interval,
            })
        }
    }

    #[async_trait]
    impl ScheduledJob for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn tick(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_interval_until_shutdown() {
        let job = CountingJob::every(Duration::from_secs(60));
        let running = JobScheduler::new().register(job.clone()).unwrap().start();

        // First tick is immediate
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);

        running.shutdown().await;

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let err = JobScheduler::new()
            .register(CountingJob::every(Duration::ZERO))
            .err()
            .unwrap();
        assert!(matches!(err, LifecycleError::BadRequest(_)));
    }
}
