//! In-process job host on tokio tasks.
//!
//! Each unique job key owns one task. The task waits for the initial
//! delay, then loops: wait for the constraints, run the worker, sleep
//! until the next tick (after success) or for the backoff delay (after a
//! retry request). Ticks are computed from the first run so periods do not
//! drift; missed ticks are skipped. Nothing survives a restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info};

use super::sync_scheduler::{JobHandle, JobHost, PeriodicJobRequest, SystemEnvironment};
use super::sync_worker::{JobOutcome, JobWorker};

/// Job host running every job as a tokio task.
///
/// Must be used from within a tokio runtime.
pub struct TokioJobHost {
    worker: Arc<dyn JobWorker>,
    environment: Arc<dyn SystemEnvironment>,
    constraint_poll: Duration,
    jobs: Mutex<HashMap<String, (JobHandle, JoinHandle<()>)>>,
}

impl TokioJobHost {
    pub const DEFAULT_CONSTRAINT_POLL: Duration = Duration::from_secs(60);

    /// Shortest period and retry delay a job runs with.
    pub const MIN_INTERVAL: Duration = Duration::from_secs(60);

    pub fn new(worker: Arc<dyn JobWorker>, environment: Arc<dyn SystemEnvironment>) -> Self {
        Self {
            worker,
            environment,
            constraint_poll: Self::DEFAULT_CONSTRAINT_POLL,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Sets how often unmet constraints are re-checked.
    pub fn with_constraint_poll(mut self, interval: Duration) -> Self {
        self.constraint_poll = interval.max(Duration::from_secs(1));
        self
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, (JobHandle, JoinHandle<()>)>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether a job with this key is registered.
    pub fn is_registered(&self, unique_key: &str) -> bool {
        self.jobs().contains_key(unique_key)
    }

    pub fn job_count(&self) -> usize {
        self.jobs().len()
    }

    /// Aborts every job.
    pub fn shutdown(&self) {
        for (key, (_, task)) in self.jobs().drain() {
            debug!(job = %key, "aborting job");
            task.abort();
        }
    }
}

impl JobHost for TokioJobHost {
    fn enqueue_unique_periodic(&self, request: PeriodicJobRequest) -> JobHandle {
        let handle = JobHandle::new(request.unique_key.clone());
        let key = request.unique_key.clone();

        let task = tokio::spawn(run_job(
            request,
            self.worker.clone(),
            self.environment.clone(),
            self.constraint_poll,
        ));

        if let Some((old, old_task)) = self.jobs().insert(key.clone(), (handle.clone(), task)) {
            debug!(job = %key, replaced = %old.id, "replacing job");
            old_task.abort();
        }
        info!(job = %key, id = %handle.id, "job registered");
        handle
    }

    fn cancel_unique(&self, unique_key: &str) {
        if let Some((handle, task)) = self.jobs().remove(unique_key) {
            task.abort();
            info!(job = %unique_key, id = %handle.id, "job cancelled");
        }
    }
}

impl Drop for TokioJobHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_job(
    request: PeriodicJobRequest,
    worker: Arc<dyn JobWorker>,
    environment: Arc<dyn SystemEnvironment>,
    constraint_poll: Duration,
) {
    let period = request.period.max(TokioJobHost::MIN_INTERVAL);
    if period != request.period {
        debug!(job = %request.unique_key, period_secs = period.as_secs(), "period raised to the minimum");
    }

    sleep(request.initial_delay).await;

    let mut next_tick = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        while !request.constraints.are_met(environment.as_ref()) {
            debug!(job = %request.unique_key, "constraints not met, waiting");
            sleep(constraint_poll).await;
        }

        match worker.run(&request.account_id).await {
            JobOutcome::Success => {
                attempt = 0;
                let now = Instant::now();
                next_tick += period;
                while next_tick <= now {
                    next_tick += period;
                }
                sleep_until(next_tick).await;
            }
            JobOutcome::Retry => {
                attempt = attempt.saturating_add(1);
                let delay = request
                    .backoff
                    .delay_for_attempt(attempt)
                    .max(TokioJobHost::MIN_INTERVAL);
                debug!(job = %request.unique_key, attempt, delay_secs = delay.as_secs(), "job will retry");
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountId;
    use crate::services::sync_scheduler::{BackoffPolicy, Constraints};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const MINUTE: Duration = Duration::from_secs(60);

    /// Returns the scripted outcomes in order, then `Success`.
    #[derive(Default)]
    struct ScriptedWorker {
        runs: AtomicUsize,
        script: Mutex<Vec<JobOutcome>>,
    }

    impl ScriptedWorker {
        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobWorker for ScriptedWorker {
        async fn run(&self, _account_id: &AccountId) -> JobOutcome {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                JobOutcome::Success
            } else {
                script.remove(0)
            }
        }
    }

    struct Toggle {
        network: AtomicBool,
    }

    impl SystemEnvironment for Toggle {
        fn is_network_available(&self) -> bool {
            self.network.load(Ordering::SeqCst)
        }

        fn is_storage_low(&self) -> bool {
            false
        }

        fn is_auto_sync_enabled(&self) -> bool {
            true
        }
    }

    fn online() -> Arc<Toggle> {
        Arc::new(Toggle {
            network: AtomicBool::new(true),
        })
    }

    fn request(key: &str, initial_delay: Duration) -> PeriodicJobRequest {
        PeriodicJobRequest {
            unique_key: key.to_string(),
            period: 15 * MINUTE,
            initial_delay,
            constraints: Constraints::mail_sync(),
            backoff: BackoffPolicy::default(),
            account_id: AccountId::from("a"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_after_initial_delay_then_every_period() {
        let worker = Arc::new(ScriptedWorker::default());
        let host = TokioJobHost::new(worker.clone(), online());

        host.enqueue_unique_periodic(request("MailSync:a", 10 * MINUTE));

        sleep(9 * MINUTE).await;
        assert_eq!(worker.runs(), 0);
        sleep(2 * MINUTE).await;
        assert_eq!(worker.runs(), 1);
        sleep(15 * MINUTE).await;
        assert_eq!(worker.runs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_uses_backoff_and_keeps_the_rhythm() {
        let worker = Arc::new(ScriptedWorker {
            script: Mutex::new(vec![JobOutcome::Retry]),
            ..ScriptedWorker::default()
        });
        let host = TokioJobHost::new(worker.clone(), online());

        host.enqueue_unique_periodic(request("MailSync:a", Duration::ZERO));

        sleep(MINUTE).await;
        assert_eq!(worker.runs(), 1);
        // Retry after the initial five minute backoff.
        sleep(5 * MINUTE).await;
        assert_eq!(worker.runs(), 2);
        // Next regular run stays on the 15 minute grid.
        sleep(8 * MINUTE).await;
        assert_eq!(worker.runs(), 2);
        sleep(2 * MINUTE).await;
        assert_eq!(worker.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_constraints() {
        let worker = Arc::new(ScriptedWorker::default());
        let environment = Arc::new(Toggle {
            network: AtomicBool::new(false),
        });
        let host = TokioJobHost::new(worker.clone(), environment.clone())
            .with_constraint_poll(MINUTE);

        host.enqueue_unique_periodic(request("MailSync:a", Duration::ZERO));

        sleep(10 * MINUTE).await;
        assert_eq!(worker.runs(), 0);

        environment.network.store(true, Ordering::SeqCst);
        sleep(2 * MINUTE).await;
        assert_eq!(worker.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_the_job() {
        let worker = Arc::new(ScriptedWorker::default());
        let host = TokioJobHost::new(worker.clone(), online());

        host.enqueue_unique_periodic(request("MailSync:a", 5 * MINUTE));
        assert!(host.is_registered("MailSync:a"));

        host.cancel_unique("MailSync:a");
        assert!(!host.is_registered("MailSync:a"));

        sleep(60 * MINUTE).await;
        assert_eq!(worker.runs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_replaces_job_with_same_key() {
        let worker = Arc::new(ScriptedWorker::default());
        let host = TokioJobHost::new(worker.clone(), online());

        let first = host.enqueue_unique_periodic(request("MailSync:a", 5 * MINUTE));
        let second = host.enqueue_unique_periodic(request("MailSync:a", 20 * MINUTE));

        assert_ne!(first.id, second.id);
        assert_eq!(host.job_count(), 1);

        sleep(10 * MINUTE).await;
        assert_eq!(worker.runs(), 0);
        sleep(11 * MINUTE).await;
        assert_eq!(worker.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_and_backoff_are_raised_to_the_minimum() {
        let worker = Arc::new(ScriptedWorker {
            script: Mutex::new(vec![JobOutcome::Retry]),
            ..ScriptedWorker::default()
        });
        let host = TokioJobHost::new(worker.clone(), online());

        host.enqueue_unique_periodic(PeriodicJobRequest {
            period: Duration::ZERO,
            backoff: BackoffPolicy::exponential(Duration::ZERO),
            ..request("MailSync:a", Duration::ZERO)
        });

        sleep(MINUTE / 2).await;
        assert_eq!(worker.runs(), 1);
        // Retry one minute later, then one run per minute.
        sleep(MINUTE).await;
        assert_eq!(worker.runs(), 2);
        sleep(3 * MINUTE).await;
        assert_eq!(worker.runs(), 5);
    }
}
