//! Worker run loop.
//!
//! A worker is a single serial executor: it processes one record at a time,
//! scanning its queues in priority order and restarting the scan from the
//! highest-priority queue after every piece of work. Horizontal scaling is
//! achieved by running multiple workers against the same backend; safety
//! rests on the backend's atomic `pop`.
//!
//! Shutdown is cooperative: [`WorkerHandle::stop`] requests termination and
//! returns immediately; the in-flight job, if any, runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::core::types::WorkerId;
use crate::events::Event;
use crate::queue::QueueManager;

/// Default idle interval between empty queue scans.
const DEFAULT_SLEEP: Duration = Duration::from_secs(3);

/// Handle for requesting a worker to stop.
#[derive(Clone)]
pub struct WorkerHandle {
    quit: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl WorkerHandle {
    /// Request termination and return immediately. The worker finishes its
    /// current job, if any, then exits.
    pub fn stop(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Whether a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }
}

/// Long-lived loop pulling jobs from one or more queues.
pub struct Worker {
    manager: Arc<QueueManager>,
    id: WorkerId,
    queues: Vec<String>,
    sleep: Duration,
    max_jobs: u64,
    stop_when_empty: bool,
    /// Soft execution-time hint surfaced to operators; the engine does not
    /// kill handlers, it relies on the visibility timeout after a
    /// process-level kill.
    timeout: Option<Duration>,
    quit: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Worker {
    /// Create a worker over the manager's default queue.
    pub fn new(manager: Arc<QueueManager>) -> Self {
        let default_queue = manager.default_queue().to_string();
        Self {
            manager,
            id: WorkerId::new(),
            queues: vec![default_queue],
            sleep: DEFAULT_SLEEP,
            max_jobs: 0,
            stop_when_empty: false,
            timeout: None,
            quit: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Set the queues to pull from, highest priority first.
    pub fn with_queues(mut self, queues: Vec<String>) -> Self {
        if !queues.is_empty() {
            self.queues = queues;
        }
        self
    }

    /// Set the idle sleep interval.
    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    /// Stop after this many jobs (0 = unbounded).
    pub fn with_max_jobs(mut self, max_jobs: u64) -> Self {
        self.max_jobs = max_jobs;
        self
    }

    /// Exit the first time all queues are empty.
    pub fn with_stop_when_empty(mut self, stop_when_empty: bool) -> Self {
        self.stop_when_empty = stop_when_empty;
        self
    }

    /// Set the soft execution-time hint.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// This worker's identifier.
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// The queues this worker scans, highest priority first.
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Get a handle for stopping this worker from another task or a signal
    /// handler.
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            quit: self.quit.clone(),
            wake: self.wake.clone(),
        }
    }

    /// Run until stopped. Returns the number of jobs processed.
    pub async fn run(self) -> u64 {
        let events = self.manager.events();
        events
            .emit(Event::worker_started(self.id.clone(), self.queues.clone()))
            .await;
        tracing::info!(
            worker_id = %self.id,
            queues = ?self.queues,
            timeout = ?self.timeout,
            "worker started"
        );

        let mut jobs_processed = 0u64;

        loop {
            if self.quit.load(Ordering::SeqCst) {
                break;
            }

            let mut worked_this_pass = false;
            for queue in &self.queues {
                if self.manager.process_next_job(Some(queue)).await {
                    worked_this_pass = true;
                    jobs_processed += 1;
                    if self.max_jobs > 0 && jobs_processed >= self.max_jobs {
                        self.quit.store(true, Ordering::SeqCst);
                    }
                    // Restart the scan from the highest-priority queue.
                    break;
                }
            }

            if self.quit.load(Ordering::SeqCst) {
                break;
            }

            if !worked_this_pass {
                if self.stop_when_empty {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.sleep) => {}
                    _ = self.wake.notified() => {}
                }
            }
        }

        events
            .emit(Event::worker_stopped(self.id.clone(), jobs_processed))
            .await;
        tracing::info!(worker_id = %self.id, jobs_processed, "worker stopped");

        jobs_processed
    }
}
